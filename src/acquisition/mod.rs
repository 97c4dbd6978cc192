//! Controller data acquisition
//!
//! Register addressing, the transport seam, per-crane sessions and an
//! in-memory simulated controller.

pub mod register_client;
pub mod session;
pub mod simulated;

pub use register_client::{
    BlockId, ClientFactory, RegisterAddress, RegisterArea, RegisterClient, RegisterError,
};
pub use session::{DeviceSession, SessionStats};
pub use simulated::{ControllerImage, SimulatedController, SimulatedFleet};
