use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::device::protocol::{InitReply, ReferenceReply};
use crate::device::ReferenceWell;
use crate::error::PreconditionError;
use crate::motion::{compute_alignment_offset, compute_laser_height_calibration, MoveDirection, PositionVector};

/// Calibration stages, in strict forward order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum CalibrationStep {
    #[default]
    Disconnected,
    AtReference1,
    AtReference2,
    AtReference3,
    OffsetSaved,
    AtLaserReference,
    PowerCalibrated,
    Done,
}

impl CalibrationStep {
    /// Reference well the step is anchored to, for the three plate steps.
    pub fn reference_well(&self) -> Option<ReferenceWell> {
        match self {
            CalibrationStep::AtReference1 => Some(ReferenceWell::A1),
            CalibrationStep::AtReference2 => Some(ReferenceWell::A12),
            CalibrationStep::AtReference3 => Some(ReferenceWell::H12),
            _ => None,
        }
    }

    /// Whether the operator may jog the head in this step.
    pub fn allows_jog(&self) -> bool {
        matches!(
            self,
            CalibrationStep::AtReference1
                | CalibrationStep::AtReference2
                | CalibrationStep::AtReference3
                | CalibrationStep::AtLaserReference
                | CalibrationStep::PowerCalibrated
        )
    }

    /// Power tuning only moves the head along z.
    pub fn allows_direction(&self, direction: MoveDirection) -> bool {
        match self {
            CalibrationStep::PowerCalibrated => direction.is_vertical(),
            step => step.allows_jog(),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            CalibrationStep::Disconnected => "Connect To Device",
            CalibrationStep::AtReference1 => "Calibrate to A1",
            CalibrationStep::AtReference2 => "Calibrate to A12",
            CalibrationStep::AtReference3 => "Calibrate to H12",
            CalibrationStep::OffsetSaved => "Save Calibration",
            CalibrationStep::AtLaserReference => "Locate Power Sensor",
            CalibrationStep::PowerCalibrated => "Adjust To Target Power",
            CalibrationStep::Done => "Finished",
        }
    }
}

impl fmt::Display for CalibrationStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Everything the session has measured so far.
///
/// Transitions work on a copy and replace the live state only after every
/// controller exchange for that transition has succeeded.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CalibrationState {
    pub step: CalibrationStep,
    pub session_id: Option<String>,
    pub connected_at: Option<DateTime<Utc>>,
    pub current_position: Option<PositionVector>,
    pub current_well_top: Option<PositionVector>,
    pub z_abs_min: Option<f64>,
    pub offset: Option<PositionVector>,
    pub laser_reference_distance: Option<f64>,
    pub puck_position: Option<PositionVector>,
    pub laser_height_calibration: Option<f64>,
    /// Step whose reference move has already been issued.
    #[serde(skip)]
    pub reference_move_issued_for: Option<CalibrationStep>,
}

impl CalibrationState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin_session(&mut self, session_id: String, connected_at: DateTime<Utc>, limits: InitReply) {
        *self = Self {
            step: CalibrationStep::AtReference1,
            session_id: Some(session_id),
            connected_at: Some(connected_at),
            z_abs_min: Some(limits.z_abs_min),
            laser_reference_distance: Some(limits.laser_reference_distance),
            ..Self::default()
        };
    }

    /// Reference well still waiting for its entry move, if any.
    pub fn pending_reference_move(&self) -> Option<ReferenceWell> {
        let well = self.step.reference_well()?;
        if self.reference_move_issued_for == Some(self.step) {
            None
        } else {
            Some(well)
        }
    }

    /// Record a reference move reply. The controller-reported offset is taken
    /// as-is until the next local derivation overwrites it.
    pub fn apply_reference(&mut self, reply: &ReferenceReply) {
        self.current_position = Some(reply.current_position);
        self.current_well_top = Some(reply.current_well_top);
        self.offset = Some(reply.current_offset);
        self.reference_move_issued_for = Some(self.step);
    }

    /// Derive the alignment offset from the recorded position and store it.
    pub fn derive_offset(&mut self) -> Result<PositionVector, PreconditionError> {
        let offset = compute_alignment_offset(self.current_position, self.current_well_top, self.z_abs_min)?;
        self.offset = Some(offset);
        Ok(offset)
    }

    pub fn derive_laser_height(&mut self) -> Result<f64, PreconditionError> {
        let height = compute_laser_height_calibration(self.current_position, self.puck_position)?;
        self.laser_height_calibration = Some(height);
        Ok(height)
    }

    /// Take the head position from a transition that failed part way, so the
    /// next relative move starts from where the controller actually is.
    pub fn adopt_motion(&mut self, attempted: &CalibrationState) {
        self.current_position = attempted.current_position;
        self.current_well_top = attempted.current_well_top;
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}
