use serde_json::Value;

use crate::device::protocol::{decode_reply, Command, InitReply, MoveReply, ReferenceReply};
use crate::device::{DeviceLink, ReferenceWell};
use crate::error::{CalibrationError, CommandError, PreconditionError};

use super::{MoveDirection, PositionVector};

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info, log_warn};

/// Issues motion commands over an exclusively owned [`DeviceLink`].
///
/// Holds no calibration state between calls: positions go in as arguments
/// and come back as the controller's authoritative replies.
pub struct MotionController {
    link: Box<dyn DeviceLink>,
}

impl MotionController {
    pub fn new(link: Box<dyn DeviceLink>) -> Self {
        Self { link }
    }

    pub fn is_connected(&self) -> bool {
        self.link.is_connected()
    }

    async fn exchange(&mut self, command: Command) -> Result<Value, CommandError> {
        let payload = command.payload()?;
        log_debug!("sending '{}'", command.name());
        let result = self.link.send_command(command.name(), payload).await;
        if let Err(err) = &result {
            log_warn!("'{}' failed: {}", command.name(), err);
        }
        result
    }

    /// Fetch the device constants. Must succeed before any move.
    pub async fn initialize(&mut self) -> Result<InitReply, CommandError> {
        let reply = self.exchange(Command::Init).await?;
        let limits: InitReply = decode_reply("init", reply)?;
        log_info!(
            "controller ready: zAbsMin={} laserReferenceDistance={}",
            limits.z_abs_min,
            limits.laser_reference_distance
        );
        Ok(limits)
    }

    pub async fn goto_reference(&mut self, well: ReferenceWell) -> Result<ReferenceReply, CommandError> {
        let reply = self.exchange(Command::GotoReference(well)).await?;
        decode_reply(well.command_name(), reply)
    }

    /// Absolute move. The returned position may differ from `target` when the
    /// controller clamps; callers must use the returned value.
    pub async fn move_to(&mut self, target: PositionVector) -> Result<PositionVector, CommandError> {
        let reply = self.exchange(Command::Move(target)).await?;
        let reply: MoveReply = decode_reply("move", reply)?;
        if reply.current_position != target {
            log_debug!("move to {} clamped to {}", target, reply.current_position);
        }
        Ok(reply.current_position)
    }

    /// Move `distance_mm` along `direction` starting from `from`.
    pub async fn move_relative(
        &mut self,
        direction: MoveDirection,
        distance_mm: f64,
        from: Option<PositionVector>,
    ) -> Result<PositionVector, CalibrationError> {
        let from = from.ok_or(PreconditionError("no current position"))?;
        let target = relative_target(from, direction, distance_mm);
        Ok(self.move_to(target).await?)
    }

    /// Push the running offset so later reference moves use it.
    pub async fn update_laser_offsets(&mut self, offset: PositionVector) -> Result<(), CommandError> {
        self.exchange(Command::UpdateLaserOffsets(offset)).await.map(|_| ())
    }

    pub async fn save_offset(&mut self, offset: PositionVector) -> Result<(), CommandError> {
        self.exchange(Command::SaveCalibration(offset)).await?;
        log_info!("saved plate offset {}", offset);
        Ok(())
    }

    pub async fn save_laser_height_calibration(&mut self, value: f64) -> Result<(), CommandError> {
        self.exchange(Command::SaveLaserDistCalibration(value)).await?;
        log_info!("saved laser height calibration {:.3}", value);
        Ok(())
    }

    pub async fn end(&mut self) -> Result<(), CommandError> {
        self.exchange(Command::End).await.map(|_| ())
    }

    pub async fn disconnect(&mut self) {
        self.link.disconnect().await;
    }
}

/// `from + unit(direction) * distance_mm`.
pub fn relative_target(from: PositionVector, direction: MoveDirection, distance_mm: f64) -> PositionVector {
    from.add(direction.unit_vector().scale(distance_mm))
}
