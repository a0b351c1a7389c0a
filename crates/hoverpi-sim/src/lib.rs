//! hoverpi Simulation Library
//!
//! Stands in for the vehicle hardware: a six-axis sensor on a register bus,
//! four ESC outputs, and a vertical-axis airframe they share.

pub mod airframe;
pub mod clock;
pub mod error;
pub mod esc;
pub mod rig;
pub mod sensor;

// Re-export main types
pub use airframe::{Airframe, AirframeParams, AirframeState, SharedAirframe};
pub use clock::VirtualClock;
pub use error::SimError;
pub use esc::SimEscBank;
pub use rig::SimRig;
pub use sensor::{SensorConfig, SimBus};
