//! Frame conversions between the quad (body) frame and the earth frame.
//!
//! Angles are 3-2-1 Euler angles in radians. All functions are pure.

use nalgebra::{Matrix3, Vector3};

/// Euler angle rates (rad/s).
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct EulerRates {
    pub pitch: f64,
    pub roll: f64,
    pub yaw: f64,
}

/// Pitch and roll of the airframe given the direction of a measured gravity vector.
///
/// Returns `(pitch, roll)`.
pub fn tilt_from_vector(v: &Vector3<f64>) -> (f64, f64) {
    let pitch = (-v.x).atan2((v.y * v.y + v.z * v.z).sqrt());
    let roll = v.y.atan2(v.z);
    (pitch, roll)
}

/// Cheaper tilt estimate, valid while the cross-axis terms stay small.
pub fn absolute_tilt(v: &Vector3<f64>) -> (f64, f64) {
    let pitch = (-v.x).atan2(v.z);
    let roll = v.y.atan2(v.z);
    (pitch, roll)
}

/// Convert quad-frame gyro rates to Euler angle rates.
///
/// Singular at pitch = +/-90 degrees; callers stay well inside that envelope.
pub fn body_rate_to_euler_rate(rates: &Vector3<f64>, pitch: f64, roll: f64) -> EulerRates {
    let (s_ra, c_ra) = roll.sin_cos();
    let c_pa = pitch.cos();
    let t_pa = pitch.tan();

    EulerRates {
        pitch: rates.y * c_ra - rates.z * s_ra,
        roll: rates.x + rates.y * s_ra * t_pa + rates.z * c_ra * t_pa,
        yaw: rates.y * s_ra / c_pa + rates.z * c_ra / c_pa,
    }
}

/// Rotation matrix taking earth-frame vectors into the quad frame.
pub fn earth_to_body_matrix(pitch: f64, roll: f64, yaw: f64) -> Matrix3<f64> {
    let (s_pa, c_pa) = pitch.sin_cos();
    let (s_ra, c_ra) = roll.sin_cos();
    let (s_ya, c_ya) = yaw.sin_cos();

    Matrix3::new(
        c_pa * c_ya,
        c_pa * s_ya,
        -s_pa,
        s_ra * s_pa * c_ya - c_ra * s_ya,
        s_ra * s_pa * s_ya + c_ra * c_ya,
        s_ra * c_pa,
        c_ra * s_pa * c_ya + s_ra * s_ya,
        c_ra * s_pa * s_ya - s_ra * c_ya,
        c_pa * c_ra,
    )
}

pub fn rotate_earth_to_body(v: &Vector3<f64>, pitch: f64, roll: f64, yaw: f64) -> Vector3<f64> {
    earth_to_body_matrix(pitch, roll, yaw) * v
}

/// Inverse of [`rotate_earth_to_body`] (the matrix is orthonormal, so its transpose).
pub fn rotate_body_to_earth(v: &Vector3<f64>, pitch: f64, roll: f64, yaw: f64) -> Vector3<f64> {
    earth_to_body_matrix(pitch, roll, yaw).transpose() * v
}
