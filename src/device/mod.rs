//! Link to the motion controller.
//!
//! [`DeviceLink`] is a request/acknowledgement channel: each call to
//! `send_command` resolves with exactly one reply or fails. Links never retry
//! on their own; the caller decides.

pub mod address;
pub mod protocol;
pub mod simulated;
pub mod tcp;

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

use crate::error::{CommandError, ConnectionError};

pub use address::resolve_target;
pub use protocol::{Command, ReferenceWell};
pub use simulated::{SimulatedConnector, SimulatedDevice};
pub use tcp::{TcpConnector, TcpDeviceLink};

#[async_trait]
pub trait DeviceLink: Send {
    /// Send one command and wait for its reply body.
    ///
    /// Fails with [`CommandError::LinkClosed`] if the link drops before the
    /// reply arrives.
    async fn send_command(&mut self, name: &str, payload: Value) -> Result<Value, CommandError>;

    /// Release the link. Calling this on an already released link is a no-op.
    async fn disconnect(&mut self);

    fn is_connected(&self) -> bool;
}

/// Establishes links. Connection must materialize within `timeout`.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(
        &self,
        address: &str,
        port: u16,
        timeout: Duration,
    ) -> Result<Box<dyn DeviceLink>, ConnectionError>;
}
