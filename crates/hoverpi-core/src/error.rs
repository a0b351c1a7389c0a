//! Error types for hoverpi-core

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Rejected flight configuration. Detected before the control loop starts.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    /// None of fly, calibrate-gravity or a test case was requested
    #[error("select one of fly, calibrate-gravity or a test case")]
    NoMode,

    /// More than one run mode was requested
    #[error("fly, calibrate-gravity and test cases are mutually exclusive")]
    ConflictingModes,

    /// Hover pulse offset outside the ESC range
    #[error("hover target {0} must lie in 0..=1000")]
    HoverOutOfRange(i64),

    /// Unknown motor test case
    #[error("test case {0} does not exist (valid: 1, 2)")]
    UnknownTestCase(u8),

    /// Test case 1 spins motors to the hover target, which must be given explicitly
    #[error("test case 1 requires an explicit hover target")]
    MissingHoverTarget,

    /// A time constant or period that must be strictly positive
    #[error("{name} must be a positive finite number, got {value}")]
    NonPositive {
        /// Parameter name
        name: &'static str,
        /// Offending value
        value: f64,
    },

    /// A gain that is NaN or infinite
    #[error("gain {name} is not finite: {value}")]
    NonFiniteGain {
        /// PID axis name
        name: &'static str,
        /// Offending value
        value: f64,
    },

    /// Butterworth cutoff at or above Nyquist
    #[error("filter cutoff {cutoff} Hz must be below half the {sampling} Hz sampling rate")]
    CutoffAboveNyquist {
        /// Cutoff frequency (Hz)
        cutoff: f64,
        /// Sampling frequency (Hz)
        sampling: f64,
    },

    /// Gravity filter designed for a rate other than the motion-sample rate
    #[error("filter sampling rate {sampling} Hz does not match the {motion_rate} Hz motion-sample rate")]
    SamplingMismatch {
        /// Filter design rate (Hz)
        sampling: f64,
        /// Raw rate over the averaging window (Hz)
        motion_rate: f64,
    },

    /// Pulse width range is empty or inverted
    #[error("pulse width range {min}..{max} us is invalid")]
    PulseRange {
        /// Lower bound (us)
        min: u16,
        /// Upper bound (us)
        max: u16,
    },
}

/// hoverpi-core error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Calibration store could not be written
    #[error("calibration store write failed: {0}")]
    CalibrationStore(String),

    /// Calibration records do not determine a temperature model
    #[error("calibration data unusable: {0}")]
    CalibrationData(String),

    /// Diagnostics sink rejected a record
    #[error("diagnostics write failed: {0}")]
    Diagnostics(String),

    /// Acquisition context could not be started
    #[error("failed to spawn acquisition thread: {0}")]
    Spawn(std::io::Error),
}
