//! Sensor sample types passed between acquisition and control.

use nalgebra::Vector3;

/// One six-axis register block as read from the sensor, plus the die temperature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RawSample {
    pub accel: [i16; 3],
    pub gyro: [i16; 3],
    pub temperature: i16,
}

impl RawSample {
    pub fn new(accel: [i16; 3], gyro: [i16; 3], temperature: i16) -> Self {
        Self {
            accel,
            gyro,
            temperature,
        }
    }

    pub fn accel_vector(&self) -> Vector3<f64> {
        Vector3::new(
            self.accel[0] as f64,
            self.accel[1] as f64,
            self.accel[2] as f64,
        )
    }

    pub fn gyro_vector(&self) -> Vector3<f64> {
        Vector3::new(self.gyro[0] as f64, self.gyro[1] as f64, self.gyro[2] as f64)
    }
}

/// Mean of a window of raw samples, still in sensor counts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawAverage {
    pub accel: Vector3<f64>,
    pub gyro: Vector3<f64>,
    pub temperature: f64,
}

impl RawAverage {
    /// Average a non-empty slice of samples. Returns `None` for an empty slice.
    pub fn of(samples: &[RawSample]) -> Option<Self> {
        if samples.is_empty() {
            return None;
        }
        let n = samples.len() as f64;
        let mut accel = Vector3::zeros();
        let mut gyro = Vector3::zeros();
        let mut temperature = 0.0;
        for s in samples {
            accel += s.accel_vector();
            gyro += s.gyro_vector();
            temperature += s.temperature as f64;
        }
        Some(Self {
            accel: accel / n,
            gyro: gyro / n,
            temperature: temperature / n,
        })
    }
}

/// Window-averaged, physically scaled motion data.
///
/// Produced once per averaging window by the acquisition loop and consumed
/// exactly once by the control loop.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotionSample {
    /// Quad-frame acceleration (g)
    pub accel: Vector3<f64>,
    /// Quad-frame rotation rate (rad/s)
    pub gyro: Vector3<f64>,
    /// Mean raw die temperature over the window
    pub temperature: f64,
    /// Wall-clock interval covered by this window (s)
    pub dt: f64,
    /// Cumulative raw samples read when this window closed
    pub raw_count: u64,
}
