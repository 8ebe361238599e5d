pub mod commands;
pub mod keys;
pub mod session;
pub mod state;

pub use keys::{direction_for_key, ArrowKey};
pub use session::{CalibrationSession, JogOutcome, SessionSnapshot};
pub use state::{CalibrationState, CalibrationStep};
