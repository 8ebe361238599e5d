//! Alignment offset and laser height derivations.
//!
//! Pure functions over recorded positions. Missing inputs are reported as a
//! [`PreconditionError`] and never defaulted to zero.

use crate::error::PreconditionError;

use super::PositionVector;

/// Plate-to-tool offset: `(current - well_top) - (0, 0, z_abs_min)`.
pub fn compute_alignment_offset(
    current_position: Option<PositionVector>,
    well_top: Option<PositionVector>,
    z_abs_min: Option<f64>,
) -> Result<PositionVector, PreconditionError> {
    let current = current_position.ok_or(PreconditionError("no current position"))?;
    let well_top = well_top.ok_or(PreconditionError("no well top recorded"))?;
    let z_abs_min = z_abs_min.ok_or(PreconditionError("no zAbsMin reported"))?;

    Ok(current
        .subtract(well_top)
        .subtract(PositionVector::new(0.0, 0.0, z_abs_min)))
}

/// Height of the tool above the puck once the sensor reads target power.
pub fn compute_laser_height_calibration(
    current_position: Option<PositionVector>,
    puck_position: Option<PositionVector>,
) -> Result<f64, PreconditionError> {
    let current = current_position.ok_or(PreconditionError("no current position"))?;
    let puck = puck_position.ok_or(PreconditionError("no puck position recorded"))?;
    Ok(current.z - puck.z)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alignment_offset() {
        let offset = compute_alignment_offset(
            Some(PositionVector::new(10.0, 20.0, 5.0)),
            Some(PositionVector::new(10.0, 18.0, 5.0)),
            Some(2.0),
        )
        .unwrap();

        assert_eq!(offset, PositionVector::new(0.0, 2.0, -2.0));
    }

    #[test]
    fn test_alignment_offset_requires_every_input() {
        let position = Some(PositionVector::new(1.0, 1.0, 1.0));

        assert_eq!(
            compute_alignment_offset(None, position, Some(0.0)),
            Err(PreconditionError("no current position"))
        );
        assert_eq!(
            compute_alignment_offset(position, None, Some(0.0)),
            Err(PreconditionError("no well top recorded"))
        );
        assert_eq!(
            compute_alignment_offset(position, position, None),
            Err(PreconditionError("no zAbsMin reported"))
        );
    }

    #[test]
    fn test_laser_height_calibration() {
        let height = compute_laser_height_calibration(
            Some(PositionVector::new(3.0, 4.0, 30.0)),
            Some(PositionVector::new(3.0, 4.0, 12.0)),
        )
        .unwrap();
        assert_eq!(height, 18.0);

        assert!(compute_laser_height_calibration(Some(PositionVector::ZERO), None).is_err());
        assert!(compute_laser_height_calibration(None, Some(PositionVector::ZERO)).is_err());
    }
}
