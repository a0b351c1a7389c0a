//! Vertical-axis airframe model.
//!
//! The frame holds a fixed tilt and yaw rate; only height and climb rate
//! evolve. Thrust is proportional to the mean motor spin, normalised so that
//! `hover_spin` exactly balances gravity.

use hoverpi_core::calibration::GRAVITY;
use hoverpi_core::rotation::rotate_earth_to_body;
use nalgebra::Vector3;
use parking_lot::Mutex;
use std::sync::Arc;

/// Airframe shared between the sensor bus and the ESC bank.
pub type SharedAirframe = Arc<Mutex<Airframe>>;

// ---------------------------------------------------------------------------
// Parameters
// ---------------------------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AirframeParams {
    /// Mean spin (pulse above stopped) at which thrust equals weight
    pub hover_spin: f64,
    /// Fixed pitch of the frame (rad)
    pub pitch: f64,
    /// Fixed roll of the frame (rad)
    pub roll: f64,
    /// Linear vertical drag (1/s)
    pub drag: f64,
    /// Constant rotation about the earth vertical (rad/s)
    pub yaw_rate: f64,
}

impl Default for AirframeParams {
    fn default() -> Self {
        Self {
            hover_spin: 600.0,
            pitch: 0.0,
            roll: 0.0,
            drag: 0.5,
            yaw_rate: 0.0,
        }
    }
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct AirframeState {
    pub time: f64,
    /// Height above the ground (m)
    pub altitude: f64,
    /// Vertical velocity, up positive (m/s)
    pub climb_rate: f64,
    /// Vertical acceleration over the last step (m/s^2)
    pub acceleration: f64,
    /// Motor spins in front-left, front-right, back-left, back-right order
    pub spins: [f64; 4],
}

pub struct Airframe {
    params: AirframeParams,
    state: AirframeState,
}

impl Airframe {
    pub fn new(params: AirframeParams) -> Self {
        Self {
            params,
            state: AirframeState::default(),
        }
    }

    pub fn shared(params: AirframeParams) -> SharedAirframe {
        Arc::new(Mutex::new(Self::new(params)))
    }

    pub fn params(&self) -> &AirframeParams {
        &self.params
    }

    pub fn state(&self) -> AirframeState {
        self.state
    }

    pub fn set_spin(&mut self, motor: usize, spin: f64) {
        if let Some(s) = self.state.spins.get_mut(motor) {
            *s = spin.max(0.0);
        }
    }

    pub fn stop(&mut self) {
        self.state.spins = [0.0; 4];
    }

    /// Total thrust as a multiple of the frame's weight.
    pub fn thrust(&self) -> f64 {
        if self.params.hover_spin <= 0.0 {
            return 0.0;
        }
        let mean = self.state.spins.iter().sum::<f64>() / 4.0;
        mean / self.params.hover_spin
    }

    pub fn on_ground(&self) -> bool {
        self.state.altitude <= 0.0 && self.state.climb_rate <= 0.0
    }

    /// Advance the vertical dynamics by `dt` seconds.
    pub fn step(&mut self, dt: f64) {
        let thrust = self.thrust();
        let s = &mut self.state;
        let mut accel = (thrust - 1.0) * GRAVITY - self.params.drag * s.climb_rate;

        // Ground reaction cancels any net downward force at rest
        if s.altitude <= 0.0 && s.climb_rate <= 0.0 && accel < 0.0 {
            accel = 0.0;
        }

        s.climb_rate += accel * dt;
        s.altitude += s.climb_rate * dt;
        if s.altitude < 0.0 {
            s.altitude = 0.0;
            s.climb_rate = s.climb_rate.max(0.0);
        }
        s.acceleration = accel;
        s.time += dt;
    }

    /// What an ideal accelerometer on the frame reads, in g, quad frame.
    pub fn specific_force(&self) -> Vector3<f64> {
        let earth = Vector3::new(0.0, 0.0, 1.0 + self.state.acceleration / GRAVITY);
        rotate_earth_to_body(&earth, self.params.pitch, self.params.roll, 0.0)
    }

    /// What an ideal gyro on the frame reads (rad/s), quad frame.
    pub fn body_rates(&self) -> Vector3<f64> {
        let earth = Vector3::new(0.0, 0.0, self.params.yaw_rate);
        rotate_earth_to_body(&earth, self.params.pitch, self.params.roll, 0.0)
    }
}
