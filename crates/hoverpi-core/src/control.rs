//! Cascaded PID network: velocity -> attitude target -> rotation rate -> mixer input.

use crate::calibration::GRAVITY;
use crate::config::CascadeGains;
use crate::mixer::MixerInput;
use crate::pid::{Pid, PidTerms};
use nalgebra::Vector3;

/// Per-cycle inputs to the cascade, all in the quad frame unless noted.
#[derive(Debug, Clone, Copy)]
pub struct CascadeInput {
    /// Measured acceleration (g)
    pub accel: Vector3<f64>,
    /// Measured rotation rate (rad/s)
    pub gyro: Vector3<f64>,
    /// Filtered gravity rotated into the quad frame (g)
    pub gravity: Vector3<f64>,
    /// Velocity target already rotated into the quad frame (m/s)
    pub velocity_target: Vector3<f64>,
    /// Integrated yaw (rad)
    pub yaw: f64,
    /// Ramped or steady vertical spin
    pub hover: f64,
    pub dt: f64,
    /// Hold pitch, roll and yaw rate targets at zero
    pub rate_only: bool,
}

/// Everything the cascade computed in one cycle.
#[derive(Debug, Clone, Copy, Default)]
pub struct CascadeOutput {
    pub velocity: Vector3<f64>,
    /// x, y, z velocity PID terms
    pub velocity_terms: [PidTerms; 3],
    pub pitch_rate_target: f64,
    pub roll_rate_target: f64,
    pub yaw_angle_terms: PidTerms,
    pub yaw_rate_target: f64,
    pub pitch_rate_terms: PidTerms,
    pub roll_rate_terms: PidTerms,
    pub yaw_rate_terms: PidTerms,
    pub mixer: MixerInput,
}

pub struct ControlCascade {
    velocity: Vector3<f64>,
    velocity_pids: [Pid; 3],
    yaw_angle: Pid,
    pitch_rate: Pid,
    roll_rate: Pid,
    yaw_rate: Pid,
}

impl ControlCascade {
    pub fn new(gains: &CascadeGains) -> Self {
        Self {
            velocity: Vector3::zeros(),
            velocity_pids: [
                Pid::new(gains.horizontal_velocity),
                Pid::new(gains.horizontal_velocity),
                Pid::new(gains.vertical_velocity),
            ],
            yaw_angle: Pid::new(gains.yaw_angle),
            pitch_rate: Pid::new(gains.pitch_rate),
            roll_rate: Pid::new(gains.roll_rate),
            yaw_rate: Pid::new(gains.yaw_rate),
        }
    }

    /// Integrated quad-frame velocity (m/s).
    pub fn velocity(&self) -> Vector3<f64> {
        self.velocity
    }

    pub fn step(&mut self, input: &CascadeInput) -> CascadeOutput {
        let dt = input.dt;
        self.velocity += (input.accel - input.gravity) * dt * GRAVITY;

        let velocity_terms = [
            self.velocity_pids[0].compute(self.velocity.x, input.velocity_target.x, dt),
            self.velocity_pids[1].compute(self.velocity.y, input.velocity_target.y, dt),
            self.velocity_pids[2].compute(self.velocity.z, input.velocity_target.z, dt),
        ];

        // Horizontal acceleration demand becomes a tilt-rate target
        let mut pitch_rate_target = velocity_terms[0].total().atan();
        let mut roll_rate_target = -velocity_terms[1].total().atan();
        let vertical = input.hover + velocity_terms[2].total().round();

        let yaw_angle_terms = self.yaw_angle.compute(input.yaw, 0.0, dt);
        let mut yaw_rate_target = yaw_angle_terms.total();

        if input.rate_only {
            pitch_rate_target = 0.0;
            roll_rate_target = 0.0;
            yaw_rate_target = 0.0;
        }

        let pitch_rate_terms = self.pitch_rate.compute(input.gyro.y, pitch_rate_target, dt);
        let roll_rate_terms = self.roll_rate.compute(input.gyro.x, roll_rate_target, dt);
        let yaw_rate_terms = self.yaw_rate.compute(input.gyro.z, yaw_rate_target, dt);

        let mixer = MixerInput {
            vertical,
            pitch_rate: (pitch_rate_terms.total() / 2.0).round(),
            roll_rate: (roll_rate_terms.total() / 2.0).round(),
            yaw_rate: (yaw_rate_terms.total() / 2.0).round(),
        };

        CascadeOutput {
            velocity: self.velocity,
            velocity_terms,
            pitch_rate_target,
            roll_rate_target,
            yaw_angle_terms,
            yaw_rate_target,
            pitch_rate_terms,
            roll_rate_terms,
            yaw_rate_terms,
            mixer,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Airframe;
    use crate::pid::PidGains;

    fn still(hover: f64) -> CascadeInput {
        CascadeInput {
            accel: Vector3::new(0.0, 0.0, 1.0),
            gyro: Vector3::zeros(),
            gravity: Vector3::new(0.0, 0.0, 1.0),
            velocity_target: Vector3::zeros(),
            yaw: 0.0,
            hover,
            dt: 0.02,
            rate_only: false,
        }
    }

    #[test]
    fn test_still_airframe_outputs_hover_only() {
        let mut c = ControlCascade::new(&Airframe::Standard.profile().gains);
        let out = c.step(&still(600.0));
        assert_eq!(out.mixer.vertical, 600.0);
        assert_eq!(out.mixer.pitch_rate, 0.0);
        assert_eq!(out.mixer.roll_rate, 0.0);
        assert_eq!(out.mixer.yaw_rate, 0.0);
        assert_eq!(out.velocity, Vector3::zeros());
    }

    #[test]
    fn test_velocity_integrates_excess_accel() {
        let mut c = ControlCascade::new(&Airframe::Standard.profile().gains);
        let mut input = still(0.0);
        input.accel.z = 1.1;
        c.step(&input);
        assert!((c.velocity().z - 0.1 * 0.02 * GRAVITY).abs() < 1e-12);
    }

    #[test]
    fn test_climb_target_raises_vertical() {
        let mut c = ControlCascade::new(&Airframe::Standard.profile().gains);
        let mut input = still(600.0);
        input.velocity_target.z = 0.75;
        let out = c.step(&input);
        assert!(out.mixer.vertical > 600.0);
    }

    #[test]
    fn test_forward_target_pitches() {
        let mut c = ControlCascade::new(&Airframe::Standard.profile().gains);
        let mut input = still(600.0);
        input.velocity_target.x = 1.0;
        input.velocity_target.y = 1.0;
        let out = c.step(&input);
        assert!(out.pitch_rate_target > 0.0);
        assert!(out.roll_rate_target < 0.0);
        assert!(out.pitch_rate_target < std::f64::consts::FRAC_PI_2);
    }

    #[test]
    fn test_yaw_drift_corrected() {
        let mut c = ControlCascade::new(&Airframe::Standard.profile().gains);
        let mut input = still(600.0);
        input.yaw = 0.1;
        let out = c.step(&input);
        assert!(out.yaw_rate_target < 0.0);
        assert!(out.mixer.yaw_rate < 0.0);
    }

    #[test]
    fn test_rate_only_zeroes_targets() {
        let mut c = ControlCascade::new(&Airframe::Standard.profile().gains);
        let mut input = still(600.0);
        input.yaw = 0.1;
        input.velocity_target.x = 1.0;
        input.rate_only = true;
        let out = c.step(&input);
        assert_eq!(out.pitch_rate_target, 0.0);
        assert_eq!(out.roll_rate_target, 0.0);
        assert_eq!(out.yaw_rate_target, 0.0);
        assert_eq!(out.mixer.pitch_rate, 0.0);
    }

    #[test]
    fn test_rate_outputs_halved() {
        let gains = CascadeGains {
            vertical_velocity: PidGains::default(),
            horizontal_velocity: PidGains::default(),
            pitch_rate: PidGains::new(100.0, 0.0, 0.0),
            roll_rate: PidGains::new(100.0, 0.0, 0.0),
            yaw_angle: PidGains::default(),
            yaw_rate: PidGains::new(100.0, 0.0, 0.0),
        };
        let mut c = ControlCascade::new(&gains);
        let mut input = still(0.0);
        // Pitching nose up at 0.5 rad/s against a zero target
        input.gyro = Vector3::new(0.3, 0.5, -0.1);
        let out = c.step(&input);
        assert_eq!(out.mixer.pitch_rate, -25.0);
        assert_eq!(out.mixer.roll_rate, -15.0);
        assert_eq!(out.mixer.yaw_rate, 5.0);
    }
}
