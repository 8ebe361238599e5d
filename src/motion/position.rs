//! Coordinate and jog types shared by the controller and the session.
//!
//! All distances are device-native millimeters.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Mul, Sub};
use std::str::FromStr;

/// Immutable 3-axis coordinate.
///
/// Deserialization rejects non-finite components, so every vector that comes
/// off the wire is NaN-free.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawPosition")]
pub struct PositionVector {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

#[derive(Deserialize)]
struct RawPosition {
    x: f64,
    y: f64,
    z: f64,
}

impl TryFrom<RawPosition> for PositionVector {
    type Error = String;

    fn try_from(raw: RawPosition) -> Result<Self, Self::Error> {
        PositionVector::checked(raw.x, raw.y, raw.z)
            .ok_or_else(|| format!("non-finite coordinate ({}, {}, {})", raw.x, raw.y, raw.z))
    }
}

impl PositionVector {
    pub const ZERO: PositionVector = PositionVector {
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };

    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Build a vector only if every component is finite.
    pub fn checked(x: f64, y: f64, z: f64) -> Option<Self> {
        if x.is_finite() && y.is_finite() && z.is_finite() {
            Some(Self { x, y, z })
        } else {
            None
        }
    }

    pub const fn zero() -> Self {
        Self::ZERO
    }

    pub fn add(self, delta: PositionVector) -> PositionVector {
        PositionVector::new(self.x + delta.x, self.y + delta.y, self.z + delta.z)
    }

    pub fn subtract(self, other: PositionVector) -> PositionVector {
        PositionVector::new(self.x - other.x, self.y - other.y, self.z - other.z)
    }

    pub fn scale(self, factor: f64) -> PositionVector {
        PositionVector::new(self.x * factor, self.y * factor, self.z * factor)
    }

    /// Component-wise comparison within `epsilon`, for values that went
    /// through decimal step arithmetic.
    pub fn approx_eq(&self, other: &PositionVector, epsilon: f64) -> bool {
        (self.x - other.x).abs() <= epsilon
            && (self.y - other.y).abs() <= epsilon
            && (self.z - other.z).abs() <= epsilon
    }
}

impl Default for PositionVector {
    fn default() -> Self {
        Self::ZERO
    }
}

impl Add for PositionVector {
    type Output = PositionVector;

    fn add(self, rhs: PositionVector) -> PositionVector {
        PositionVector::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl Sub for PositionVector {
    type Output = PositionVector;

    fn sub(self, rhs: PositionVector) -> PositionVector {
        self.subtract(rhs)
    }
}

impl Mul<f64> for PositionVector {
    type Output = PositionVector;

    fn mul(self, rhs: f64) -> PositionVector {
        self.scale(rhs)
    }
}

impl fmt::Display for PositionVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.3}, {:.3}, {:.3})", self.x, self.y, self.z)
    }
}

/// Jog direction as seen by the operator facing the plate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MoveDirection {
    ToBack,
    ToFront,
    Up,
    Down,
    Left,
    Right,
}

impl MoveDirection {
    pub const ALL: [MoveDirection; 6] = [
        MoveDirection::ToBack,
        MoveDirection::ToFront,
        MoveDirection::Up,
        MoveDirection::Down,
        MoveDirection::Left,
        MoveDirection::Right,
    ];

    pub fn unit_vector(&self) -> PositionVector {
        match self {
            MoveDirection::ToBack => PositionVector::new(0.0, 1.0, 0.0),
            MoveDirection::ToFront => PositionVector::new(0.0, -1.0, 0.0),
            MoveDirection::Up => PositionVector::new(0.0, 0.0, 1.0),
            MoveDirection::Down => PositionVector::new(0.0, 0.0, -1.0),
            MoveDirection::Left => PositionVector::new(-1.0, 0.0, 0.0),
            MoveDirection::Right => PositionVector::new(1.0, 0.0, 0.0),
        }
    }

    pub fn is_vertical(&self) -> bool {
        matches!(self, MoveDirection::Up | MoveDirection::Down)
    }
}

impl FromStr for MoveDirection {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "back" | "toback" => Ok(MoveDirection::ToBack),
            "front" | "tofront" => Ok(MoveDirection::ToFront),
            "up" => Ok(MoveDirection::Up),
            "down" => Ok(MoveDirection::Down),
            "left" => Ok(MoveDirection::Left),
            "right" => Ok(MoveDirection::Right),
            _ => Err(format!("unknown direction '{value}'")),
        }
    }
}

/// Operator-selected jog magnitude.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(try_from = "f64", into = "f64")]
pub enum MoveDistance {
    #[default]
    Fine,
    Medium,
    Coarse,
}

impl MoveDistance {
    pub const ALL: [MoveDistance; 3] = [MoveDistance::Fine, MoveDistance::Medium, MoveDistance::Coarse];

    pub fn millimeters(&self) -> f64 {
        match self {
            MoveDistance::Fine => 0.1,
            MoveDistance::Medium => 1.0,
            MoveDistance::Coarse => 10.0,
        }
    }
}

impl From<MoveDistance> for f64 {
    fn from(distance: MoveDistance) -> f64 {
        distance.millimeters()
    }
}

impl TryFrom<f64> for MoveDistance {
    type Error = String;

    fn try_from(mm: f64) -> Result<Self, Self::Error> {
        MoveDistance::ALL
            .into_iter()
            .find(|distance| (distance.millimeters() - mm).abs() < 1e-9)
            .ok_or_else(|| format!("move distance must be 0.1, 1 or 10 mm (got {mm})"))
    }
}

impl FromStr for MoveDistance {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let mm: f64 = value
            .trim_end_matches("mm")
            .parse()
            .map_err(|_| format!("invalid move distance '{value}'"))?;
        MoveDistance::try_from(mm)
    }
}

impl fmt::Display for MoveDistance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} mm", self.millimeters())
    }
}
