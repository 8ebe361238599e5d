use std::str::FromStr;

use crate::motion::MoveDirection;

use super::CalibrationStep;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArrowKey {
    Up,
    Down,
    Left,
    Right,
}

impl FromStr for ArrowKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "up" | "arrowup" => Ok(ArrowKey::Up),
            "down" | "arrowdown" => Ok(ArrowKey::Down),
            "left" | "arrowleft" => Ok(ArrowKey::Left),
            "right" | "arrowright" => Ok(ArrowKey::Right),
            other => Err(format!("unknown key '{other}'")),
        }
    }
}

/// Map a key press to a jog direction for the given step.
///
/// On the plate and while locating the sensor, plain up/down move the head
/// away from or toward the operator and shift+up/down move it vertically.
/// While tuning power only up/down register, always vertically.
pub fn direction_for_key(step: CalibrationStep, key: ArrowKey, shift: bool) -> Option<MoveDirection> {
    if step == CalibrationStep::PowerCalibrated {
        return match key {
            ArrowKey::Up => Some(MoveDirection::Up),
            ArrowKey::Down => Some(MoveDirection::Down),
            ArrowKey::Left | ArrowKey::Right => None,
        };
    }

    if !step.allows_jog() {
        return None;
    }

    let direction = match (key, shift) {
        (ArrowKey::Up, true) => MoveDirection::Up,
        (ArrowKey::Down, true) => MoveDirection::Down,
        (ArrowKey::Up, false) => MoveDirection::ToBack,
        (ArrowKey::Down, false) => MoveDirection::ToFront,
        (ArrowKey::Left, _) => MoveDirection::Left,
        (ArrowKey::Right, _) => MoveDirection::Right,
    };
    Some(direction)
}
