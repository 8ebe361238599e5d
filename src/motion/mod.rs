pub mod controller;
pub mod offsets;
pub mod position;

pub use controller::MotionController;
pub use offsets::{compute_alignment_offset, compute_laser_height_calibration};
pub use position::{MoveDirection, MoveDistance, PositionVector};
