//! Sensor scaling and calibration.
//!
//! Accelerometer zero offsets drift linearly with die temperature and are
//! modelled per axis as `offset = a + b * raw_temperature`. Gyro offsets are a
//! constant bias measured while the airframe sits still on the ground.

use crate::driver::ImuDriver;
use crate::error::{Error, Result};
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use tracing::{debug, info};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Accelerometer counts to g (+/-2 g over 16 bits).
pub const SCALE_ACCEL: f64 = 4.0 / 65536.0;

/// Gyro counts to rad/s.
pub const SCALE_GYRO: f64 = 500.0 * PI / (65536.0 * 180.0);

/// Raw z reading contributed by 1 g when level.
pub const COUNTS_PER_G: f64 = 1.0 / SCALE_ACCEL;

/// Samples averaged for each stationary calibration.
pub const CALIBRATION_SAMPLES: usize = 50;

/// Standard gravity (m/s^2).
pub const GRAVITY: f64 = 9.80665;

/// Convert a raw die temperature reading to degrees Celsius.
pub fn temperature_celsius(raw: f64) -> f64 {
    raw / 333.87 + 21.0
}

// ---------------------------------------------------------------------------
// Accelerometer temperature model
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AccelTempModel {
    /// Offset at raw temperature 0 (counts)
    pub a: Vector3<f64>,
    /// Offset drift per raw temperature count
    pub b: Vector3<f64>,
}

impl Default for AccelTempModel {
    fn default() -> Self {
        Self {
            a: Vector3::new(20.7368135, 50.97993518, 449.0789668),
            b: Vector3::new(0.00557761, 0.016785824, -0.038043957),
        }
    }
}

impl AccelTempModel {
    pub fn offset(&self, raw_temperature: f64) -> Vector3<f64> {
        self.a + self.b * raw_temperature
    }

    /// Least-squares fit of the offset model to stationary gravity records.
    ///
    /// The z axis of each record carries +1 g, which is removed before fitting.
    /// Needs at least two records at distinct temperatures.
    pub fn fit(records: &[GravityRecord]) -> Result<Self> {
        if records.len() < 2 {
            return Err(Error::CalibrationData(format!(
                "need at least 2 gravity records, found {}",
                records.len()
            )));
        }

        let n = records.len() as f64;
        let t_mean = records.iter().map(|r| r.raw_temperature as f64).sum::<f64>() / n;
        let o_mean = records.iter().map(|r| r.offset()).sum::<Vector3<f64>>() / n;

        let mut s_tt = 0.0;
        let mut s_to = Vector3::zeros();
        for r in records {
            let dt = r.raw_temperature as f64 - t_mean;
            s_tt += dt * dt;
            s_to += (r.offset() - o_mean) * dt;
        }

        if s_tt < f64::EPSILON {
            return Err(Error::CalibrationData(
                "all gravity records share one temperature".to_string(),
            ));
        }

        let b = s_to / s_tt;
        let a = o_mean - b * t_mean;
        Ok(Self { a, b })
    }
}

// ---------------------------------------------------------------------------
// Calibration model
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CalibrationModel {
    pub accel: AccelTempModel,
    /// Gyro zero-rate bias (counts)
    pub gyro_bias: Vector3<f64>,
}

impl CalibrationModel {
    pub fn new(accel: AccelTempModel) -> Self {
        Self {
            accel,
            gyro_bias: Vector3::zeros(),
        }
    }

    pub fn with_gyro_bias(mut self, gyro_bias: Vector3<f64>) -> Self {
        self.gyro_bias = gyro_bias;
        self
    }

    /// Scale raw counts to acceleration (g) and rotation rate (rad/s).
    pub fn scale(
        &self,
        accel_raw: &Vector3<f64>,
        gyro_raw: &Vector3<f64>,
        raw_temperature: f64,
    ) -> (Vector3<f64>, Vector3<f64>) {
        let accel = (accel_raw - self.accel.offset(raw_temperature)) * SCALE_ACCEL;
        let gyro = (gyro_raw - self.gyro_bias) * SCALE_GYRO;
        (accel, gyro)
    }
}

/// Average gyro output while stationary to find its zero-rate bias.
pub fn calibrate_gyros<I: ImuDriver + ?Sized>(imu: &mut I, samples: usize) -> Vector3<f64> {
    let samples = samples.max(1);
    let mut sum = Vector3::zeros();
    for _ in 0..samples {
        sum += imu.read_raw().gyro_vector();
    }
    let bias = sum / samples as f64;
    debug!(x = bias.x, y = bias.y, z = bias.z, "gyro bias");
    bias
}

// ---------------------------------------------------------------------------
// Gravity calibration
// ---------------------------------------------------------------------------

/// One stationary gravity measurement, in raw counts.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GravityRecord {
    pub raw_temperature: i32,
    pub temperature_c: f64,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl GravityRecord {
    /// Zero offset implied by this record (1 g removed from z).
    pub fn offset(&self) -> Vector3<f64> {
        Vector3::new(self.x, self.y, self.z - COUNTS_PER_G)
    }
}

/// Append-only persistence for gravity records.
pub trait CalibrationStore {
    fn append(&mut self, record: &GravityRecord) -> Result<()>;
}

/// Average stationary accelerometer output at the current temperature.
pub fn measure_gravity<I: ImuDriver + ?Sized>(imu: &mut I, samples: usize) -> GravityRecord {
    let samples = samples.max(1);
    let mut sum = Vector3::zeros();
    let mut temperature = 0.0;
    for _ in 0..samples {
        let raw = imu.read_raw();
        sum += raw.accel_vector();
        temperature += raw.temperature as f64;
    }
    let gravity = sum / samples as f64;
    let raw_temperature = (temperature / samples as f64).round() as i32;

    GravityRecord {
        raw_temperature,
        temperature_c: temperature_celsius(raw_temperature as f64),
        x: gravity.x,
        y: gravity.y,
        z: gravity.z,
    }
}

/// Measure gravity and append it to `store`.
pub fn calibrate_gravity<I, S>(imu: &mut I, store: &mut S, samples: usize) -> Result<GravityRecord>
where
    I: ImuDriver + ?Sized,
    S: CalibrationStore + ?Sized,
{
    let record = measure_gravity(imu, samples);
    store.append(&record)?;
    info!(
        raw_temperature = record.raw_temperature,
        temperature_c = record.temperature_c,
        x = record.x,
        y = record.y,
        z = record.z,
        "gravity calibration recorded"
    );
    Ok(record)
}
