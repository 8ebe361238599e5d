//! In-process motion controller.
//!
//! Answers the full command table against a simple kinematic model: moves are
//! clamped to the travel envelope and never go below `zAbsMin`. Every command
//! received is recorded so callers can assert exact round-trip counts, and
//! failures can be injected per command.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

use crate::error::{CommandError, ConnectionError};
use crate::motion::PositionVector;

use super::protocol::{
    InitReply, LaserDistPayload, MoveReply, OffsetPayload, ReferenceReply, ReferenceWell,
    ReplyFrame, RequestFrame,
};
use super::{resolve_target, Connector, DeviceLink};

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info, log_warn};

#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    pub z_abs_min: f64,
    pub laser_reference_distance: f64,
    /// Well tops for A1, A12 and H12, in that order.
    pub well_tops: [PositionVector; 3],
    /// Offset the controller starts with and reports on reference moves.
    pub offset: PositionVector,
    pub travel_min: PositionVector,
    pub travel_max: PositionVector,
    /// Delay before every reply.
    pub latency: Duration,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            z_abs_min: 2.0,
            laser_reference_distance: 25.0,
            well_tops: [
                PositionVector::new(14.5, 11.25, 10.0),
                PositionVector::new(113.5, 11.25, 10.0),
                PositionVector::new(113.5, 74.25, 10.0),
            ],
            offset: PositionVector::new(0.5, -0.25, 1.0),
            travel_min: PositionVector::new(0.0, 0.0, 0.0),
            travel_max: PositionVector::new(200.0, 150.0, 120.0),
            latency: Duration::ZERO,
        }
    }
}

/// Outcome of delivering one command to the simulated controller.
#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
    Reply(Result<Value, String>),
    /// The controller dropped the connection instead of replying.
    Dropped,
}

struct DeviceState {
    config: SimulatorConfig,
    position: PositionVector,
    offset: PositionVector,
    initialized: bool,
    received: Vec<String>,
    saved_offset: Option<PositionVector>,
    saved_laser_height: Option<f64>,
    reject_next: Option<(String, String)>,
    drop_on: Option<String>,
    reported_offset: Option<PositionVector>,
    refuse_connections: bool,
    connects: usize,
    disconnects: usize,
}

/// Shared handle to one simulated controller. Clones observe the same device.
#[derive(Clone)]
pub struct SimulatedDevice {
    inner: Arc<Mutex<DeviceState>>,
}

impl Default for SimulatedDevice {
    fn default() -> Self {
        Self::new(SimulatorConfig::default())
    }
}

impl SimulatedDevice {
    pub fn new(config: SimulatorConfig) -> Self {
        let position = config.well_tops[0];
        let offset = config.offset;
        Self {
            inner: Arc::new(Mutex::new(DeviceState {
                config,
                position,
                offset,
                initialized: false,
                received: Vec::new(),
                saved_offset: None,
                saved_laser_height: None,
                reject_next: None,
                drop_on: None,
                reported_offset: None,
                refuse_connections: false,
                connects: 0,
                disconnects: 0,
            })),
        }
    }

    fn state(&self) -> MutexGuard<'_, DeviceState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn link(&self) -> SimulatedLink {
        self.state().connects += 1;
        SimulatedLink {
            device: self.clone(),
            connected: true,
        }
    }

    /// Record `name` and answer it, unless a drop was armed for it.
    pub fn deliver(&self, name: &str, payload: &Value) -> Delivery {
        let mut state = self.state();
        state.received.push(name.to_string());

        if state.drop_on.as_deref() == Some(name) {
            state.drop_on = None;
            log_warn!("simulated controller dropping link on '{}'", name);
            return Delivery::Dropped;
        }

        if let Some((command, message)) = state.reject_next.take() {
            if command == name {
                return Delivery::Reply(Err(message));
            }
            state.reject_next = Some((command, message));
        }

        Delivery::Reply(state.apply(name, payload))
    }

    pub fn latency(&self) -> Duration {
        self.state().config.latency
    }

    /// Names of every command received, in order.
    pub fn received(&self) -> Vec<String> {
        self.state().received.clone()
    }

    pub fn count(&self, name: &str) -> usize {
        self.state().received.iter().filter(|received| *received == name).count()
    }

    pub fn clear_received(&self) {
        self.state().received.clear();
    }

    pub fn position(&self) -> PositionVector {
        self.state().position
    }

    pub fn laser_offset(&self) -> PositionVector {
        self.state().offset
    }

    pub fn saved_offset(&self) -> Option<PositionVector> {
        self.state().saved_offset
    }

    pub fn saved_laser_height(&self) -> Option<f64> {
        self.state().saved_laser_height
    }

    pub fn connects(&self) -> usize {
        self.state().connects
    }

    pub fn disconnects(&self) -> usize {
        self.state().disconnects
    }

    /// Fail the next `command` with `message`.
    pub fn reject_next(&self, command: &str, message: &str) {
        self.state().reject_next = Some((command.to_string(), message.to_string()));
    }

    /// Drop the link the next time `command` arrives.
    pub fn drop_link_on(&self, command: &str) {
        self.state().drop_on = Some(command.to_string());
    }

    /// Report this offset on reference moves instead of the one in effect.
    pub fn report_offset(&self, offset: Option<PositionVector>) {
        self.state().reported_offset = offset;
    }

    pub fn refuse_connections(&self, refuse: bool) {
        self.state().refuse_connections = refuse;
    }

    fn refuses_connections(&self) -> bool {
        self.state().refuse_connections
    }

    fn record_disconnect(&self) {
        self.state().disconnects += 1;
    }
}

impl DeviceState {
    fn apply(&mut self, name: &str, payload: &Value) -> Result<Value, String> {
        if name == "init" {
            self.initialized = true;
            self.position = self.clamp(self.position);
            return to_value(InitReply {
                z_abs_min: self.config.z_abs_min,
                laser_reference_distance: self.config.laser_reference_distance,
            });
        }

        if name == "end" {
            self.initialized = false;
            return Ok(json!({}));
        }

        if !self.initialized {
            return Err("controller not initialized".into());
        }

        match name {
            "gotoReference1" | "gotoReference2" | "gotoReference3" => {
                let well = name
                    .strip_prefix("gotoReference")
                    .and_then(|id| id.parse::<u8>().ok())
                    .and_then(ReferenceWell::from_id)
                    .ok_or_else(|| format!("unknown reference '{name}'"))?;
                let well_top = self.config.well_tops[usize::from(well.id() - 1)];
                let lift = PositionVector::new(0.0, 0.0, self.config.z_abs_min);
                self.position = self.clamp(well_top + self.offset + lift);
                to_value(ReferenceReply {
                    current_position: self.position,
                    current_well_top: well_top,
                    current_offset: self.reported_offset.unwrap_or(self.offset),
                })
            }
            "move" => {
                let target: PositionVector = serde_json::from_value(payload.clone())
                    .map_err(|err| format!("invalid move target: {err}"))?;
                self.position = self.clamp(target);
                to_value(MoveReply {
                    current_position: self.position,
                })
            }
            "updateLaserOffsets" => {
                let body: OffsetPayload = serde_json::from_value(payload.clone())
                    .map_err(|err| format!("invalid offset: {err}"))?;
                self.offset = body.offset;
                Ok(json!({}))
            }
            "saveCalibration" => {
                let body: OffsetPayload = serde_json::from_value(payload.clone())
                    .map_err(|err| format!("invalid offset: {err}"))?;
                self.offset = body.offset;
                self.saved_offset = Some(body.offset);
                Ok(json!({}))
            }
            "saveLaserDistCalibration" => {
                let body: LaserDistPayload = serde_json::from_value(payload.clone())
                    .map_err(|err| format!("invalid calibration: {err}"))?;
                self.saved_laser_height = Some(body.new_calibration);
                Ok(json!({}))
            }
            _ => Err(format!("unknown command '{name}'")),
        }
    }

    fn clamp(&self, target: PositionVector) -> PositionVector {
        let min = &self.config.travel_min;
        let max = &self.config.travel_max;
        PositionVector::new(
            target.x.clamp(min.x, max.x),
            target.y.clamp(min.y, max.y),
            target.z.clamp(min.z.max(self.config.z_abs_min), max.z),
        )
    }
}

fn to_value<T: serde::Serialize>(reply: T) -> Result<Value, String> {
    serde_json::to_value(reply).map_err(|err| err.to_string())
}

/// Direct in-memory link to a [`SimulatedDevice`].
pub struct SimulatedLink {
    device: SimulatedDevice,
    connected: bool,
}

#[async_trait]
impl DeviceLink for SimulatedLink {
    async fn send_command(&mut self, name: &str, payload: Value) -> Result<Value, CommandError> {
        if !self.connected {
            return Err(CommandError::NotConnected);
        }

        let latency = self.device.latency();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        match self.device.deliver(name, &payload) {
            Delivery::Reply(Ok(reply)) => Ok(reply),
            Delivery::Reply(Err(message)) => Err(CommandError::Rejected {
                command: name.to_string(),
                message,
            }),
            Delivery::Dropped => {
                self.connected = false;
                Err(CommandError::LinkClosed {
                    command: name.to_string(),
                })
            }
        }
    }

    async fn disconnect(&mut self) {
        if self.connected {
            self.connected = false;
            self.device.record_disconnect();
        }
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}

/// Connector handing out [`SimulatedLink`]s to one shared device.
#[derive(Clone, Default)]
pub struct SimulatedConnector {
    device: SimulatedDevice,
}

impl SimulatedConnector {
    pub fn new(device: SimulatedDevice) -> Self {
        Self { device }
    }

    pub fn device(&self) -> &SimulatedDevice {
        &self.device
    }
}

#[async_trait]
impl Connector for SimulatedConnector {
    async fn connect(
        &self,
        address: &str,
        port: u16,
        _timeout: Duration,
    ) -> Result<Box<dyn DeviceLink>, ConnectionError> {
        let target = resolve_target(address, port)?;
        if self.device.refuses_connections() {
            return Err(ConnectionError::Refused {
                address: target.to_string(),
            });
        }
        log_info!("simulated controller accepted connection for {}", target);
        Ok(Box::new(self.device.link()))
    }
}

/// Serve `device` over newline-delimited JSON on every accepted connection.
pub async fn serve(listener: TcpListener, device: SimulatedDevice) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                log_info!("simulated controller serving {}", peer);
                tokio::spawn(serve_connection(stream, device.clone()));
            }
            Err(err) => {
                log_warn!("simulated controller accept failed: {}", err);
                break;
            }
        }
    }
}

async fn serve_connection(stream: TcpStream, device: SimulatedDevice) {
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();

    while let Ok(Some(line)) = lines.next_line().await {
        let request: RequestFrame = match serde_json::from_str(&line) {
            Ok(request) => request,
            Err(err) => {
                log_warn!("simulated controller ignoring bad frame: {}", err);
                continue;
            }
        };

        let latency = device.latency();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let reply = match device.deliver(&request.command, &request.payload) {
            Delivery::Reply(Ok(data)) => ReplyFrame::success(request.id, data),
            Delivery::Reply(Err(message)) => ReplyFrame::failure(request.id, message),
            Delivery::Dropped => break,
        };

        let Ok(mut encoded) = serde_json::to_string(&reply) else {
            break;
        };
        encoded.push('\n');
        if write_half.write_all(encoded.as_bytes()).await.is_err() {
            break;
        }
        log_debug!("simulated controller answered '{}'", request.command);
    }
}
