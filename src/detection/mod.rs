//! Per-crane event detection
//!
//! - `scheduler`: idle/active poll cadence
//! - `movement`: movement start/stop state machine
//! - `fault_tracker`: fault bit edge detection with downtime

pub mod fault_tracker;
pub mod movement;
pub mod scheduler;

pub use fault_tracker::{FaultState, FaultTracker};
pub use movement::{DetectorStep, MovementEventDetector};
pub use scheduler::{PollMode, PollScheduler};
