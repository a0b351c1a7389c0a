//! Complementary-filter attitude estimator.
//!
//! Each motion sample's acceleration is rotated into the earth frame and
//! passed through a Butterworth low-pass per axis, leaving a slowly-varying
//! gravity estimate. Rotated back into the quad frame that estimate gives a
//! drift-free but laggy tilt, which is blended with the integrated gyro rates.

use crate::butterworth::GravityFilter;
use crate::rotation::{
    body_rate_to_euler_rate, rotate_body_to_earth, rotate_earth_to_body, tilt_from_vector,
    EulerRates,
};
use nalgebra::Vector3;

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EstimatorConfig {
    /// Complementary filter time constant (s)
    pub tau: f64,
    /// Motion sample rate seen by the gravity filter (Hz)
    pub filter_sampling: f64,
    /// Gravity filter cutoff (Hz)
    pub filter_cutoff: f64,
    pub filter_order: usize,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            tau: 0.5,
            filter_sampling: 50.0,
            filter_cutoff: 0.2,
            filter_order: 4,
        }
    }
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// Earth-relative attitude (rad) and the filtered earth-frame gravity (g).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AttitudeState {
    pub pitch: f64,
    pub roll: f64,
    /// Free-running gyro integral with no absolute reference
    pub yaw: f64,
    pub earth_gravity: Vector3<f64>,
}

impl Default for AttitudeState {
    fn default() -> Self {
        Self {
            pitch: 0.0,
            roll: 0.0,
            yaw: 0.0,
            earth_gravity: Vector3::new(0.0, 0.0, 1.0),
        }
    }
}

/// Everything one estimator update derived, for the control cascade and diagnostics.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EstimatorUpdate {
    /// Filtered earth-frame gravity
    pub earth_gravity: Vector3<f64>,
    /// Filtered gravity rotated back into the quad frame using the merged attitude
    pub quad_gravity: Vector3<f64>,
    /// Tilt implied by the filtered gravity alone
    pub revised_pitch: f64,
    pub revised_roll: f64,
    pub euler_rates: EulerRates,
    /// Set once every [`CONVERGENCE_WINDOW`] updates
    pub convergence: Option<Convergence>,
}

// ---------------------------------------------------------------------------
// Convergence diagnostic
// ---------------------------------------------------------------------------

pub const CONVERGENCE_WINDOW: usize = 10;

/// Gravity spread (g) under which the estimate counts as settled.
pub const CONVERGENCE_THRESHOLD: f64 = 0.001;

/// Per-axis mean absolute deviation of one block of gravity estimates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Convergence {
    pub spread: Vector3<f64>,
}

impl Convergence {
    pub fn settled(&self) -> bool {
        self.spread.iter().all(|&s| s < CONVERGENCE_THRESHOLD)
    }
}

#[derive(Debug, Clone, Default)]
struct ConvergenceWindow {
    samples: Vec<Vector3<f64>>,
}

impl ConvergenceWindow {
    fn push(&mut self, gravity: Vector3<f64>) -> Option<Convergence> {
        self.samples.push(gravity);
        if self.samples.len() < CONVERGENCE_WINDOW {
            return None;
        }

        let n = self.samples.len() as f64;
        let mean = self.samples.iter().sum::<Vector3<f64>>() / n;
        let spread = self
            .samples
            .iter()
            .map(|g| (g - mean).abs())
            .sum::<Vector3<f64>>()
            / n;
        self.samples.clear();
        Some(Convergence { spread })
    }
}

// ---------------------------------------------------------------------------
// Estimator
// ---------------------------------------------------------------------------

pub struct AttitudeEstimator {
    config: EstimatorConfig,
    state: AttitudeState,
    filter: GravityFilter,
    convergence: ConvergenceWindow,
    seeded: bool,
}

impl Default for AttitudeEstimator {
    fn default() -> Self {
        Self::new(EstimatorConfig::default())
    }
}

impl AttitudeEstimator {
    pub fn new(config: EstimatorConfig) -> Self {
        Self {
            config,
            state: AttitudeState::default(),
            filter: GravityFilter::new(
                config.filter_sampling,
                config.filter_cutoff,
                config.filter_order,
            ),
            convergence: ConvergenceWindow::default(),
            seeded: false,
        }
    }

    /// Initial pitch and roll straight from one acceleration reading; yaw zero.
    pub fn seed(&mut self, accel: &Vector3<f64>) {
        let (pitch, roll) = tilt_from_vector(accel);
        self.state.pitch = pitch;
        self.state.roll = roll;
        self.state.yaw = 0.0;
        self.seeded = true;
    }

    #[cfg(test)]
    pub fn is_seeded(&self) -> bool {
        self.seeded
    }

    /// Fold one motion sample into the attitude.
    ///
    /// Without `track_heading` the frame rotations run at zero yaw and yaw is
    /// not integrated; gravity is unaffected by heading, and before take-off
    /// there is no heading worth keeping.
    pub fn update(
        &mut self,
        accel: &Vector3<f64>,
        gyro: &Vector3<f64>,
        dt: f64,
        track_heading: bool,
    ) -> EstimatorUpdate {
        if !self.seeded {
            self.seed(accel);
        }

        let s = &mut self.state;
        let yaw = if track_heading { s.yaw } else { 0.0 };

        let earth_accel = rotate_body_to_earth(accel, s.pitch, s.roll, yaw);
        let earth_gravity = self.filter.filter(&earth_accel);
        let filtered = rotate_earth_to_body(&earth_gravity, s.pitch, s.roll, yaw);
        let (revised_pitch, revised_roll) = tilt_from_vector(&filtered);

        let euler_rates = body_rate_to_euler_rate(gyro, revised_pitch, revised_roll);

        let fraction = self.config.tau / (self.config.tau + dt);
        s.pitch = fraction * (s.pitch + euler_rates.pitch * dt) + (1.0 - fraction) * revised_pitch;
        s.roll = fraction * (s.roll + euler_rates.roll * dt) + (1.0 - fraction) * revised_roll;
        if track_heading {
            s.yaw += gyro.z * dt;
        }
        s.earth_gravity = earth_gravity;

        let yaw = if track_heading { s.yaw } else { 0.0 };
        let quad_gravity = rotate_earth_to_body(&earth_gravity, s.pitch, s.roll, yaw);

        EstimatorUpdate {
            earth_gravity,
            quad_gravity,
            revised_pitch,
            revised_roll,
            euler_rates,
            convergence: self.convergence.push(earth_gravity),
        }
    }

    pub fn state(&self) -> &AttitudeState {
        &self.state
    }

    /// Rotate an earth-frame vector into the quad frame at the current attitude.
    pub fn to_quad_frame(&self, v: &Vector3<f64>) -> Vector3<f64> {
        rotate_earth_to_body(v, self.state.pitch, self.state.roll, self.state.yaw)
    }
}
