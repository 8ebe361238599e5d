use thiserror::Error;

use crate::calibration::CalibrationStep;

/// Failures while establishing the link to the motion controller.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConnectionError {
    #[error("invalid device address '{0}'")]
    InvalidAddress(String),
    #[error("device at {address} did not connect within {waited_ms}ms")]
    Timeout { address: String, waited_ms: u64 },
    #[error("device at {address} refused the connection")]
    Refused { address: String },
    #[error("connection to {address} failed: {message}")]
    Io { address: String, message: String },
}

/// Failures of a single request/acknowledgement exchange.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CommandError {
    #[error("no device connected")]
    NotConnected,
    #[error("link closed while waiting for '{command}' reply")]
    LinkClosed { command: String },
    #[error("device rejected '{command}': {message}")]
    Rejected { command: String, message: String },
    #[error("malformed '{command}' reply: {reason}")]
    MalformedReply { command: String, reason: String },
    #[error("could not encode '{command}' request: {reason}")]
    Encode { command: String, reason: String },
}

/// Offset or height math invoked before its inputs were recorded.
///
/// This is an ordering defect in the caller, never a device fault.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("precondition failed: {0}")]
pub struct PreconditionError(pub &'static str);

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CalibrationError {
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    #[error(transparent)]
    Command(#[from] CommandError),
    #[error(transparent)]
    Precondition(#[from] PreconditionError),
    #[error("'{action}' is not available during '{step}'")]
    InvalidStep {
        step: CalibrationStep,
        action: &'static str,
    },
}

impl CalibrationError {
    pub fn is_precondition(&self) -> bool {
        matches!(self, CalibrationError::Precondition(_))
    }
}
