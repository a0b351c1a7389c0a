//! Flight configuration: run mode, airframe profiles and tunable parameters.

use crate::error::ConfigError;
use crate::estimator::EstimatorConfig;
use crate::mixer::{MotorPins, PulseRange, SpinCheckTiming};
use crate::pid::PidGains;
use std::time::Duration;

// ---------------------------------------------------------------------------
// Run mode
// ---------------------------------------------------------------------------

/// Propeller direction check: each motor alone, ramped to hover.
pub const TEST_SPIN_CHECK: u8 = 1;

/// Full flight with the attitude loops bypassed: rate targets held at zero.
pub const TEST_RATE_ONLY: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Fly,
    CalibrateGravity,
    TestCase(u8),
}

impl Mode {
    pub fn label(self) -> &'static str {
        match self {
            Self::Fly => "fly",
            Self::CalibrateGravity => "calibrate-gravity",
            Self::TestCase(TEST_SPIN_CHECK) => "test case 1 (spin check)",
            Self::TestCase(TEST_RATE_ONLY) => "test case 2 (rate loops only)",
            Self::TestCase(_) => "test case",
        }
    }

    /// Resolve the mode from the raw flags of the command line.
    pub fn select(
        fly: bool,
        calibrate_gravity: bool,
        test_case: Option<u8>,
        explicit_hover: bool,
    ) -> Result<Self, ConfigError> {
        let requested = fly as u8 + calibrate_gravity as u8 + test_case.is_some() as u8;
        if requested == 0 {
            return Err(ConfigError::NoMode);
        }
        if requested > 1 {
            return Err(ConfigError::ConflictingModes);
        }

        match test_case {
            Some(TEST_SPIN_CHECK) if !explicit_hover => Err(ConfigError::MissingHoverTarget),
            Some(n @ (TEST_SPIN_CHECK | TEST_RATE_ONLY)) => Ok(Self::TestCase(n)),
            Some(n) => Err(ConfigError::UnknownTestCase(n)),
            None if fly => Ok(Self::Fly),
            None => Ok(Self::CalibrateGravity),
        }
    }

    /// Whether this mode runs the warm-up, ramp and flight plan.
    pub fn flies(self) -> bool {
        matches!(self, Self::Fly | Self::TestCase(TEST_RATE_ONLY))
    }
}

/// Check a requested hover target and convert it to spin units.
pub fn hover_target(value: i64) -> Result<f64, ConfigError> {
    if (0..=1000).contains(&value) {
        Ok(value as f64)
    } else {
        Err(ConfigError::HoverOutOfRange(value))
    }
}

// ---------------------------------------------------------------------------
// Gains
// ---------------------------------------------------------------------------

/// Gains for the seven PIDs of the control cascade.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CascadeGains {
    pub vertical_velocity: PidGains,
    /// Shared by the quad x and y velocity PIDs
    pub horizontal_velocity: PidGains,
    pub pitch_rate: PidGains,
    pub roll_rate: PidGains,
    pub yaw_angle: PidGains,
    pub yaw_rate: PidGains,
}

impl CascadeGains {
    fn named(&self) -> [(&'static str, PidGains); 6] {
        [
            ("vertical velocity", self.vertical_velocity),
            ("horizontal velocity", self.horizontal_velocity),
            ("pitch rate", self.pitch_rate),
            ("roll rate", self.roll_rate),
            ("yaw angle", self.yaw_angle),
            ("yaw rate", self.yaw_rate),
        ]
    }
}

/// Yaw-angle loop gains are common to every airframe.
pub const YAW_ANGLE_GAINS: PidGains = PidGains::new(6.0, 3.0, 1.0);

// ---------------------------------------------------------------------------
// Airframes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Airframe {
    Standard,
    Compact,
    Agile,
    Heavy,
}

/// Per-airframe defaults that individual settings may override.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AirframeProfile {
    pub hover_target: f64,
    pub gains: CascadeGains,
    pub pins: MotorPins,
    /// GPIO line wired to the sensor's data-ready interrupt
    pub data_ready_pin: u8,
}

const X_FRAME_PINS: MotorPins = MotorPins {
    front_left: 27,
    front_right: 17,
    back_left: 5,
    back_right: 19,
};

impl Airframe {
    pub fn label(self) -> &'static str {
        match self {
            Self::Standard => "standard",
            Self::Compact => "compact",
            Self::Agile => "agile",
            Self::Heavy => "heavy",
        }
    }

    pub fn profile(self) -> AirframeProfile {
        let g = PidGains::new;
        match self {
            Self::Standard => AirframeProfile {
                hover_target: 600.0,
                gains: CascadeGains {
                    vertical_velocity: g(360.0, 180.0, 0.0),
                    horizontal_velocity: g(0.6, 0.3, 0.0),
                    pitch_rate: g(120.0, 60.0, 0.0),
                    roll_rate: g(110.0, 55.0, 0.0),
                    yaw_angle: YAW_ANGLE_GAINS,
                    yaw_rate: g(50.0, 25.0, 0.0),
                },
                pins: X_FRAME_PINS,
                data_ready_pin: 24,
            },
            Self::Compact => AirframeProfile {
                hover_target: 500.0,
                gains: CascadeGains {
                    vertical_velocity: g(250.0, 50.0, 0.0),
                    horizontal_velocity: g(0.6, 0.1, 0.005),
                    pitch_rate: g(75.0, 0.0, 0.0),
                    roll_rate: g(60.0, 0.0, 0.0),
                    yaw_angle: YAW_ANGLE_GAINS,
                    yaw_rate: g(30.0, 0.0, 0.0),
                },
                pins: MotorPins {
                    front_left: 18,
                    front_right: 17,
                    back_left: 23,
                    back_right: 22,
                },
                data_ready_pin: 25,
            },
            Self::Agile => AirframeProfile {
                hover_target: 600.0,
                gains: CascadeGains {
                    vertical_velocity: g(360.0, 180.0, 0.0),
                    horizontal_velocity: g(0.6, 0.4, 0.1),
                    pitch_rate: g(120.0, 60.0, 0.0),
                    roll_rate: g(110.0, 55.0, 0.0),
                    yaw_angle: YAW_ANGLE_GAINS,
                    yaw_rate: g(60.0, 30.0, 0.0),
                },
                pins: X_FRAME_PINS,
                data_ready_pin: 24,
            },
            Self::Heavy => AirframeProfile {
                hover_target: 500.0,
                gains: CascadeGains {
                    vertical_velocity: g(360.0, 180.0, 0.0),
                    horizontal_velocity: g(0.6, 0.3, 0.1),
                    pitch_rate: g(100.0, 50.0, 0.0),
                    roll_rate: g(90.0, 45.0, 0.0),
                    yaw_angle: YAW_ANGLE_GAINS,
                    yaw_rate: g(50.0, 25.0, 0.0),
                },
                pins: X_FRAME_PINS,
                data_ready_pin: 22,
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Flight config
// ---------------------------------------------------------------------------

/// Sensor register settings handed to the bus driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SensorSettings {
    /// Accelerometer digital low-pass code (0 = 260 Hz .. 6 = 5 Hz)
    pub accel_lpf: u8,
    /// Gyro digital low-pass code
    pub gyro_lpf: u8,
    pub data_ready_pin: u8,
}

impl Default for SensorSettings {
    fn default() -> Self {
        Self {
            accel_lpf: 3,
            gyro_lpf: 1,
            data_ready_pin: 24,
        }
    }
}

/// Raw sensor sample rate (Hz).
pub const RAW_SAMPLE_RATE: f64 = 1000.0;

/// Accelerometer low-pass code used while measuring gravity.
pub const CALIBRATION_ACCEL_LPF: u8 = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionModel {
    /// Control loop runs the averaging window itself
    Inline,
    /// Dedicated acquisition thread hands samples over a channel
    Threaded,
}

#[derive(Debug, Clone)]
pub struct FlightConfig {
    pub mode: Mode,
    pub airframe: Airframe,
    /// Vertical spin the ramp climbs to before the flight plan starts
    pub hover_target: f64,
    pub gains: CascadeGains,
    pub estimator: EstimatorConfig,
    /// Seconds the ramp takes to reach the hover target
    pub rtf_period: f64,
    pub warmup_duration: f64,
    /// Raw samples averaged into one motion sample
    pub averaging_window: usize,
    pub pins: MotorPins,
    pub pulse_range: PulseRange,
    pub sensor: SensorSettings,
    pub execution: ExecutionModel,
    /// Pause between zeroing the motors and releasing the ESCs
    pub esc_settle: Duration,
    pub spin_check: SpinCheckTiming,
}

impl FlightConfig {
    pub fn new(mode: Mode, airframe: Airframe) -> Self {
        let profile = airframe.profile();
        let mut sensor = SensorSettings {
            data_ready_pin: profile.data_ready_pin,
            ..SensorSettings::default()
        };
        if mode == Mode::CalibrateGravity {
            sensor.accel_lpf = CALIBRATION_ACCEL_LPF;
        }

        Self {
            mode,
            airframe,
            hover_target: profile.hover_target,
            gains: profile.gains,
            estimator: EstimatorConfig::default(),
            rtf_period: 1.0,
            warmup_duration: 20.0,
            averaging_window: 20,
            pins: profile.pins,
            pulse_range: PulseRange::default(),
            sensor,
            execution: ExecutionModel::Threaded,
            esc_settle: Duration::from_secs(1),
            spin_check: SpinCheckTiming::default(),
        }
    }

    /// Average `window` raw samples per motion sample and redesign the
    /// gravity filter for the resulting motion-sample rate.
    pub fn set_averaging_window(&mut self, window: usize) {
        self.averaging_window = window;
        if window > 0 {
            self.estimator.filter_sampling = RAW_SAMPLE_RATE / window as f64;
        }
    }

    /// Motion samples per second delivered by the averaging window.
    pub fn motion_sample_rate(&self) -> f64 {
        RAW_SAMPLE_RATE / self.averaging_window as f64
    }

    /// Reject settings the control loop cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("tau", self.estimator.tau),
            ("rtf period", self.rtf_period),
            ("warm-up duration", self.warmup_duration),
            ("filter sampling rate", self.estimator.filter_sampling),
            ("filter cutoff", self.estimator.filter_cutoff),
        ] {
            if !(value.is_finite() && value > 0.0) {
                return Err(ConfigError::NonPositive { name, value });
            }
        }

        if self.averaging_window == 0 {
            return Err(ConfigError::NonPositive {
                name: "averaging window",
                value: 0.0,
            });
        }

        let motion_rate = self.motion_sample_rate();
        if (self.estimator.filter_sampling - motion_rate).abs() > 1e-9 * motion_rate {
            return Err(ConfigError::SamplingMismatch {
                sampling: self.estimator.filter_sampling,
                motion_rate,
            });
        }

        if self.estimator.filter_cutoff >= self.estimator.filter_sampling / 2.0 {
            return Err(ConfigError::CutoffAboveNyquist {
                cutoff: self.estimator.filter_cutoff,
                sampling: self.estimator.filter_sampling,
            });
        }

        for (name, gains) in self.gains.named() {
            for value in [gains.p, gains.i, gains.d] {
                if !value.is_finite() {
                    return Err(ConfigError::NonFiniteGain { name, value });
                }
            }
        }

        if self.pulse_range.min >= self.pulse_range.max {
            return Err(ConfigError::PulseRange {
                min: self.pulse_range.min,
                max: self.pulse_range.max,
            });
        }

        hover_target(self.hover_target.round() as i64)?;
        Ok(())
    }
}
