//! # hoverpi Core
//!
//! Attitude estimation and flight control for a quadcopter:
//! - Sensor scaling and temperature-compensated calibration
//! - Frame rotation math and Butterworth gravity filter
//! - Complementary-filter attitude estimator
//! - Cascaded PID network and motor mixer
//! - Flight phase state machine and flight plan sequencer
//! - Fixed-cadence acquisition, inline or on its own thread
//!
//! Hardware is reached only through the [`driver`] traits.

pub mod acquisition;
pub mod butterworth;
pub mod calibration;
pub mod cancel;
pub mod config;
pub mod control;
pub mod diagnostics;
pub mod driver;
pub mod error;
pub mod estimator;
pub mod flight;
pub mod flight_plan;
pub mod mixer;
pub mod pid;
pub mod rotation;
pub mod sample;
pub mod state_machine;

// Re-export core types
pub use acquisition::{Averager, Clock, InlineSource, MotionSource, SystemClock, ThreadedSource};
pub use calibration::{AccelTempModel, CalibrationModel, CalibrationStore, GravityRecord};
pub use cancel::CancelToken;
pub use config::{Airframe, ExecutionModel, FlightConfig, Mode};
pub use diagnostics::{DiagnosticRecord, DiagnosticsSink, NoDiagnostics};
pub use driver::{BusError, EscDriver, ImuDriver, RetryingImu, SensorBus};
pub use error::{ConfigError, Error, Result};
pub use flight::{fly, FlightController, FlightSummary};
pub use flight_plan::{FlightPlan, FlightStep};
pub use mixer::{MotorBank, MotorPins, PulseRange};
pub use sample::{MotionSample, RawSample};
pub use state_machine::{FlightPhase, StateMachine, NUM_PHASES};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
