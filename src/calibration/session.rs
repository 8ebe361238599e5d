use std::{sync::Arc, time::Duration};

use chrono::Utc;
use serde::Serialize;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::device::{Connector, ReferenceWell};
use crate::error::{CalibrationError, CommandError, PreconditionError};
use crate::motion::{MotionController, MoveDirection, MoveDistance, PositionVector};
use crate::settings::CalibrationSettings;

use super::{CalibrationState, CalibrationStep};

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_error, log_info, log_warn};

#[derive(Debug, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub state: CalibrationState,
    pub label: &'static str,
    pub can_jog: bool,
    pub connected: bool,
}

/// Result of a jog request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum JogOutcome {
    /// The controller moved; this is its reported position.
    Moved(PositionVector),
    /// Another command was still in flight, so the request was discarded.
    Dropped,
}

struct SessionInner {
    state: CalibrationState,
    controller: Option<MotionController>,
    port: u16,
    connect_timeout: Duration,
}

impl SessionInner {
    fn controller(&mut self) -> Result<&mut MotionController, CommandError> {
        self.controller.as_mut().ok_or(CommandError::NotConnected)
    }

    fn expect_step(&self, expected: CalibrationStep, action: &'static str) -> Result<(), CalibrationError> {
        if self.state.step == expected {
            Ok(())
        } else {
            Err(CalibrationError::InvalidStep {
                step: self.state.step,
                action,
            })
        }
    }
}

/// Drives the calibration procedure against one motion controller.
///
/// Cloning yields another handle to the same session. Every operation holds
/// the session lock for its whole controller exchange, so commands never
/// overlap. A failed transition keeps the prior step and measurements; only
/// the head position from moves that did complete is carried over.
#[derive(Clone)]
pub struct CalibrationSession {
    inner: Arc<Mutex<SessionInner>>,
    connector: Arc<dyn Connector>,
}

impl CalibrationSession {
    pub fn new(connector: Arc<dyn Connector>, settings: &CalibrationSettings) -> Self {
        Self {
            inner: Arc::new(Mutex::new(SessionInner {
                state: CalibrationState::new(),
                controller: None,
                port: settings.port,
                connect_timeout: settings.connect_timeout(),
            })),
            connector,
        }
    }

    /// Pick up changed connection settings. Takes effect on the next connect.
    pub async fn configure(&self, settings: &CalibrationSettings) {
        let mut guard = self.inner.lock().await;
        guard.port = settings.port;
        guard.connect_timeout = settings.connect_timeout();
    }

    pub async fn get_state(&self) -> CalibrationState {
        self.inner.lock().await.state.clone()
    }

    pub async fn get_snapshot(&self) -> SessionSnapshot {
        let guard = self.inner.lock().await;
        SessionSnapshot {
            label: guard.state.step.label(),
            can_jog: guard.state.step.allows_jog(),
            connected: guard
                .controller
                .as_ref()
                .map(MotionController::is_connected)
                .unwrap_or(false),
            state: guard.state.clone(),
        }
    }

    /// Connect, initialize the controller and enter the first reference step.
    ///
    /// If the link or `init` fails the session stays disconnected. If only the
    /// entry reference move fails, the session is connected at the first step
    /// and [`initialize_step`](Self::initialize_step) retries the move.
    pub async fn connect(&self, address: &str) -> Result<CalibrationState, CalibrationError> {
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;
        inner.expect_step(CalibrationStep::Disconnected, "connect")?;

        let link = self
            .connector
            .connect(address, inner.port, inner.connect_timeout)
            .await
            .inspect_err(|err| log_warn!("connect to {} failed: {}", address, err))?;

        let mut controller = MotionController::new(link);
        let limits = match controller.initialize().await {
            Ok(limits) => limits,
            Err(err) => {
                log_warn!("controller at {} failed to initialize: {}", address, err);
                controller.disconnect().await;
                return Err(err.into());
            }
        };

        let session_id = Uuid::new_v4().to_string();
        log_info!("session {} connected to {}", session_id, address);
        inner.state.begin_session(session_id, Utc::now(), limits);
        inner.controller = Some(controller);

        enter_pending_reference(inner)
            .await
            .inspect_err(|err| report_failure("enter first reference", err))?;
        Ok(inner.state.clone())
    }

    /// Issue the current step's reference move unless it already ran.
    ///
    /// Returns whether a command was sent. Safe to call on every re-entry.
    pub async fn initialize_step(&self) -> Result<bool, CalibrationError> {
        let mut guard = self.inner.lock().await;
        enter_pending_reference(&mut guard)
            .await
            .inspect_err(|err| report_failure("initialize step", err))
    }

    /// Jog the head. Requests arriving while another command is in flight
    /// are dropped rather than queued.
    pub async fn jog(&self, direction: MoveDirection, distance: MoveDistance) -> Result<JogOutcome, CalibrationError> {
        let Ok(mut guard) = self.inner.try_lock() else {
            log_debug!("dropping {:?} jog, command in flight", direction);
            return Ok(JogOutcome::Dropped);
        };
        let inner = &mut *guard;

        let step = inner.state.step;
        if !step.allows_jog() {
            return Err(CalibrationError::InvalidStep { step, action: "jog" });
        }
        if !step.allows_direction(direction) {
            return Err(CalibrationError::InvalidStep {
                step,
                action: "jog horizontally",
            });
        }
        if inner.state.pending_reference_move().is_some() {
            return Err(CalibrationError::InvalidStep {
                step,
                action: "jog before the reference move",
            });
        }

        let from = inner.state.current_position;
        let position = inner
            .controller()?
            .move_relative(direction, distance.millimeters(), from)
            .await
            .inspect_err(|err| report_failure("jog", err))?;
        inner.state.current_position = Some(position);
        Ok(JogOutcome::Moved(position))
    }

    /// Operator confirmed the current reference well.
    pub async fn advance(&self) -> Result<CalibrationState, CalibrationError> {
        let mut guard = self.inner.lock().await;
        advance_reference(&mut guard)
            .await
            .inspect_err(|err| report_failure("advance", err))?;
        Ok(guard.state.clone())
    }

    /// Save the plate offset and finish without laser height calibration.
    pub async fn save_and_finish(&self) -> Result<CalibrationState, CalibrationError> {
        self.save_offset(CalibrationStep::Done, "save and finish").await
    }

    /// Save the plate offset and continue to laser height calibration.
    pub async fn save_and_continue(&self) -> Result<CalibrationState, CalibrationError> {
        self.save_offset(CalibrationStep::AtLaserReference, "save and continue").await
    }

    async fn save_offset(&self, next_step: CalibrationStep, action: &'static str) -> Result<CalibrationState, CalibrationError> {
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;

        let result = async {
            inner.expect_step(CalibrationStep::OffsetSaved, action)?;
            let offset = inner
                .state
                .offset
                .ok_or(PreconditionError("offset not derived before saving"))?;
            inner.controller()?.save_offset(offset).await?;
            Ok::<_, CalibrationError>(())
        }
        .await;
        result.inspect_err(|err| report_failure(action, err))?;

        inner.state.step = next_step;
        log_info!("offset saved, now {}", next_step);
        Ok(inner.state.clone())
    }

    /// Operator centered the tool on the power sensor: record the puck
    /// position and lift to the reference distance.
    pub async fn confirm_laser_reference(&self) -> Result<CalibrationState, CalibrationError> {
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;

        let result = async {
            inner.expect_step(CalibrationStep::AtLaserReference, "confirm sensor position")?;
            let mut next = inner.state.clone();
            let puck = next.current_position.ok_or(PreconditionError("no current position"))?;
            let lift = next
                .laser_reference_distance
                .ok_or(PreconditionError("no laser reference distance"))?;

            next.puck_position = Some(puck);
            let position = inner
                .controller()?
                .move_relative(MoveDirection::Up, lift, Some(puck))
                .await?;
            next.current_position = Some(position);
            next.step = CalibrationStep::PowerCalibrated;
            Ok::<_, CalibrationError>(next)
        }
        .await;

        inner.state = result.inspect_err(|err| report_failure("confirm sensor position", err))?;
        log_info!("puck recorded at {:?}", inner.state.puck_position);
        Ok(inner.state.clone())
    }

    /// Sensor reads target power: derive and save the laser height.
    pub async fn confirm_power(&self) -> Result<CalibrationState, CalibrationError> {
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;

        let result = async {
            inner.expect_step(CalibrationStep::PowerCalibrated, "confirm power")?;
            let mut next = inner.state.clone();
            let height = next.derive_laser_height()?;
            inner.controller()?.save_laser_height_calibration(height).await?;
            next.step = CalibrationStep::Done;
            Ok::<_, CalibrationError>(next)
        }
        .await;

        inner.state = result.inspect_err(|err| report_failure("confirm power", err))?;
        Ok(inner.state.clone())
    }

    /// End the controller session, release the link and clear all state.
    ///
    /// Always succeeds; a failing `end` is logged and the link is still
    /// released. Resetting a disconnected session does nothing.
    pub async fn reset(&self) {
        let mut guard = self.inner.lock().await;
        if let Some(mut controller) = guard.controller.take() {
            if let Err(err) = controller.end().await {
                log_warn!("controller rejected end during reset: {}", err);
            }
            controller.disconnect().await;
        }

        if let Some(session_id) = guard.state.session_id.take() {
            log_info!("session {} reset", session_id);
        }
        guard.state.clear();
    }
}

/// Run the entry reference move for the current step if it has not run yet.
async fn enter_pending_reference(inner: &mut SessionInner) -> Result<bool, CalibrationError> {
    if inner.state.pending_reference_move().is_none() {
        return Ok(false);
    }

    let mut next = inner.state.clone();
    let result = run_reference_entry(&mut next, inner.controller()?).await;
    settle(&mut inner.state, next, result)?;
    Ok(true)
}

/// Entry action of a reference step: move to the well, then for A12 and H12
/// replace the reported offset with the locally derived one.
async fn run_reference_entry(
    state: &mut CalibrationState,
    controller: &mut MotionController,
) -> Result<(), CalibrationError> {
    let Some(well) = state.pending_reference_move() else {
        return Ok(());
    };

    let reply = controller.goto_reference(well).await?;
    state.apply_reference(&reply);

    if well != ReferenceWell::A1 {
        let offset = state.derive_offset()?;
        controller.update_laser_offsets(offset).await?;
    }

    log_info!("at reference {} ({})", well, state.step);
    Ok(())
}

async fn advance_reference(inner: &mut SessionInner) -> Result<(), CalibrationError> {
    let step = inner.state.step;
    if step.reference_well().is_none() {
        return Err(CalibrationError::InvalidStep {
            step,
            action: "advance",
        });
    }

    let mut next = inner.state.clone();
    let result = advance_from(step, &mut next, inner.controller()?).await;
    settle(&mut inner.state, next, result)?;

    log_info!("{} -> {}", step, inner.state.step);
    Ok(())
}

async fn advance_from(
    step: CalibrationStep,
    next: &mut CalibrationState,
    controller: &mut MotionController,
) -> Result<(), CalibrationError> {
    match step {
        CalibrationStep::AtReference1 => {
            next.step = CalibrationStep::AtReference2;
            run_reference_entry(next, controller).await
        }
        CalibrationStep::AtReference2 => {
            let offset = next.derive_offset()?;
            controller.update_laser_offsets(offset).await?;
            next.step = CalibrationStep::AtReference3;
            run_reference_entry(next, controller).await
        }
        CalibrationStep::AtReference3 => {
            let offset = next.derive_offset()?;
            controller.update_laser_offsets(offset).await?;

            // Park the head at the start well. The derived offset is what gets
            // saved, so only the position is taken from this reply.
            let reply = controller.goto_reference(ReferenceWell::A1).await?;
            next.current_position = Some(reply.current_position);
            next.current_well_top = Some(reply.current_well_top);
            next.step = CalibrationStep::OffsetSaved;
            Ok(())
        }
        step => Err(CalibrationError::InvalidStep {
            step,
            action: "advance",
        }),
    }
}

/// Commit a finished transition. A failed one keeps the prior step but still
/// takes the head position from any move that completed before the failure.
fn settle(
    live: &mut CalibrationState,
    attempted: CalibrationState,
    result: Result<(), CalibrationError>,
) -> Result<(), CalibrationError> {
    match result {
        Ok(()) => {
            *live = attempted;
            Ok(())
        }
        Err(err) => {
            live.adopt_motion(&attempted);
            Err(err)
        }
    }
}

fn report_failure(action: &str, err: &CalibrationError) {
    if err.is_precondition() {
        log_error!("'{}' hit an ordering defect: {}", action, err);
    } else {
        log_warn!("'{}' failed: {}", action, err);
    }
}
