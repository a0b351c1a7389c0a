//! Simulated six-axis sensor on the register bus.
//!
//! Produces raw counts the way the real part does: scaled specific force plus
//! a temperature-dependent zero offset, gyro rate plus a zero-rate bias, and
//! Gaussian noise whose level follows the configured digital low-pass.

use crate::airframe::SharedAirframe;
use crate::clock::VirtualClock;
use crate::error::SimError;
use hoverpi_core::calibration::{AccelTempModel, SCALE_ACCEL, SCALE_GYRO};
use hoverpi_core::config::SensorSettings;
use hoverpi_core::{BusError, RawSample, SensorBus};
use nalgebra::Vector3;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use std::thread;
use std::time::Duration;
use tracing::debug;

/// Noise bandwidth (Hz) for each digital low-pass code.
pub const DLPF_BANDWIDTH: [f64; 7] = [260.0, 184.0, 94.0, 44.0, 21.0, 10.0, 5.0];

pub fn dlpf_bandwidth(code: u8) -> f64 {
    DLPF_BANDWIDTH[(code as usize).min(DLPF_BANDWIDTH.len() - 1)]
}

/// Noise multiplier for a low-pass code, relative to the widest setting.
fn noise_factor(code: u8) -> f64 {
    (dlpf_bandwidth(code) / DLPF_BANDWIDTH[0]).sqrt()
}

#[derive(Debug, Clone)]
pub struct SensorConfig {
    pub noise_scale: f64,
    /// Accelerometer noise at the widest low-pass setting (g)
    pub accel_noise_std: f64,
    /// Gyro noise at the widest low-pass setting (rad/s)
    pub gyro_noise_std: f64,

    /// True accelerometer zero offsets against raw temperature
    pub accel_offsets: AccelTempModel,
    /// Gyro zero-rate output (counts)
    pub gyro_bias: Vector3<f64>,

    /// Raw die temperature at power-up
    pub start_temperature: f64,
    /// Raw temperature change per second
    pub temperature_drift: f64,

    /// Chance that a register read fails and must be retried
    pub read_failure_rate: f64,
    /// Chance that a read needs a transport-level retry that succeeds
    pub bus_retry_rate: f64,

    /// Data-ready rate (Hz)
    pub sample_rate: f64,
    /// Sleep out each sample period in wall time
    pub realtime: bool,
    pub settings: SensorSettings,
    pub seed: u64,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            noise_scale: 1.0,
            accel_noise_std: 0.004,
            gyro_noise_std: 0.002,
            accel_offsets: AccelTempModel::default(),
            gyro_bias: Vector3::new(-31.0, 12.0, 5.0),
            // 25 degC
            start_temperature: 1335.0,
            temperature_drift: 0.0,
            read_failure_rate: 0.0,
            bus_retry_rate: 0.0,
            sample_rate: 1000.0,
            realtime: false,
            settings: SensorSettings::default(),
            seed: 42,
        }
    }
}

pub struct SimBus {
    config: SensorConfig,
    airframe: SharedAirframe,
    clock: VirtualClock,
    rng: StdRng,
    accel_noise: Normal<f64>,
    gyro_noise: Normal<f64>,
    period: Duration,
    reads: u64,
    bus_errors: u64,
}

impl SimBus {
    pub fn new(
        config: SensorConfig,
        airframe: SharedAirframe,
        clock: VirtualClock,
    ) -> Result<Self, SimError> {
        if !(config.sample_rate.is_finite() && config.sample_rate > 0.0) {
            return Err(SimError::SampleRate(config.sample_rate));
        }
        for (name, value) in [
            ("read failure rate", config.read_failure_rate),
            ("bus retry rate", config.bus_retry_rate),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(SimError::Probability { name, value });
            }
        }

        let accel_std =
            config.noise_scale * config.accel_noise_std * noise_factor(config.settings.accel_lpf);
        let gyro_std =
            config.noise_scale * config.gyro_noise_std * noise_factor(config.settings.gyro_lpf);
        let accel_noise = Normal::new(0.0, accel_std)?;
        let gyro_noise = Normal::new(0.0, gyro_std)?;

        debug!(
            accel_lpf_hz = dlpf_bandwidth(config.settings.accel_lpf),
            gyro_lpf_hz = dlpf_bandwidth(config.settings.gyro_lpf),
            data_ready_pin = config.settings.data_ready_pin,
            sample_rate = config.sample_rate,
            "simulated sensor configured"
        );

        Ok(Self {
            rng: StdRng::seed_from_u64(config.seed),
            period: Duration::from_secs_f64(1.0 / config.sample_rate),
            config,
            airframe,
            clock,
            accel_noise,
            gyro_noise,
            reads: 0,
            bus_errors: 0,
        })
    }

    pub fn clock(&self) -> &VirtualClock {
        &self.clock
    }

    pub fn reads(&self) -> u64 {
        self.reads
    }

    /// Current raw die temperature.
    pub fn temperature(&self) -> f64 {
        self.config.start_temperature
            + self.config.temperature_drift * self.clock.elapsed().as_secs_f64()
    }

    fn noise(&mut self, gyro: bool) -> Vector3<f64> {
        let d = if gyro { self.gyro_noise } else { self.accel_noise };
        Vector3::new(
            d.sample(&mut self.rng),
            d.sample(&mut self.rng),
            d.sample(&mut self.rng),
        )
    }
}

fn counts(v: &Vector3<f64>) -> [i16; 3] {
    let c = |x: f64| x.round().clamp(i16::MIN as f64, i16::MAX as f64) as i16;
    [c(v.x), c(v.y), c(v.z)]
}

impl SensorBus for SimBus {
    fn wait_data_ready(&mut self) {
        if self.config.realtime {
            thread::sleep(self.period);
        }
        self.clock.advance(self.period);
        self.airframe.lock().step(self.period.as_secs_f64());
    }

    fn read_block(&mut self) -> Result<RawSample, BusError> {
        if self.config.bus_retry_rate > 0.0 && self.rng.random_bool(self.config.bus_retry_rate) {
            self.bus_errors += 1;
        }
        if self.config.read_failure_rate > 0.0
            && self.rng.random_bool(self.config.read_failure_rate)
        {
            return Err(BusError("simulated register read failure".to_string()));
        }

        let (force, rates) = {
            let frame = self.airframe.lock();
            (frame.specific_force(), frame.body_rates())
        };

        let temperature = self.temperature().round();
        let accel_noise = self.noise(false);
        let gyro_noise = self.noise(true);

        let accel = (force + accel_noise) / SCALE_ACCEL + self.config.accel_offsets.offset(temperature);
        let gyro = (rates + gyro_noise) / SCALE_GYRO + self.config.gyro_bias;

        self.reads += 1;
        Ok(RawSample::new(
            counts(&accel),
            counts(&gyro),
            temperature.clamp(i16::MIN as f64, i16::MAX as f64) as i16,
        ))
    }

    fn bus_errors(&self) -> u64 {
        self.bus_errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::airframe::{Airframe, AirframeParams};
    use hoverpi_core::calibration::{temperature_celsius, COUNTS_PER_G};

    fn quiet() -> SensorConfig {
        SensorConfig {
            noise_scale: 0.0,
            ..SensorConfig::default()
        }
    }

    fn bus(config: SensorConfig) -> SimBus {
        let airframe = Airframe::shared(AirframeParams::default());
        SimBus::new(config, airframe, VirtualClock::new()).unwrap()
    }

    #[test]
    fn test_level_counts() {
        let mut bus = bus(quiet());
        bus.wait_data_ready();
        let raw = bus.read_block().unwrap();

        let offset = AccelTempModel::default().offset(1335.0);
        assert_eq!(raw.accel[0], offset.x.round() as i16);
        assert_eq!(raw.accel[1], offset.y.round() as i16);
        assert_eq!(raw.accel[2], (COUNTS_PER_G + offset.z).round() as i16);
        assert_eq!(raw.gyro, [-31, 12, 5]);
        assert_eq!(raw.temperature, 1335);
        assert!((temperature_celsius(raw.temperature as f64) - 25.0).abs() < 0.01);
    }

    #[test]
    fn test_data_ready_advances_clock() {
        let mut bus = bus(quiet());
        for _ in 0..20 {
            bus.wait_data_ready();
        }
        assert_eq!(bus.clock().elapsed(), Duration::from_millis(20));
    }

    #[test]
    fn test_temperature_drifts() {
        let mut bus = bus(SensorConfig {
            temperature_drift: 100.0,
            ..quiet()
        });
        for _ in 0..1000 {
            bus.wait_data_ready();
        }
        assert!((bus.temperature() - 1435.0).abs() < 1e-6);
    }

    #[test]
    fn test_same_seed_same_noise() {
        let mut a = bus(SensorConfig::default());
        let mut b = bus(SensorConfig::default());
        for _ in 0..10 {
            a.wait_data_ready();
            b.wait_data_ready();
            assert_eq!(a.read_block().unwrap(), b.read_block().unwrap());
        }
    }

    #[test]
    fn test_narrow_lowpass_is_quieter() {
        assert!(noise_factor(6) < noise_factor(3));
        assert!((noise_factor(0) - 1.0).abs() < 1e-12);
        assert_eq!(dlpf_bandwidth(42), 5.0);
    }

    #[test]
    fn test_read_failures_injected() {
        let mut bus = bus(SensorConfig {
            read_failure_rate: 1.0,
            bus_retry_rate: 1.0,
            ..quiet()
        });
        bus.wait_data_ready();
        assert!(bus.read_block().is_err());
        assert_eq!(bus.bus_errors(), 1);
        assert_eq!(bus.reads(), 0);
    }

    #[test]
    fn test_rejects_bad_settings() {
        let airframe = Airframe::shared(AirframeParams::default());
        let rate = SimBus::new(
            SensorConfig {
                sample_rate: 0.0,
                ..SensorConfig::default()
            },
            airframe.clone(),
            VirtualClock::new(),
        );
        assert!(matches!(rate, Err(SimError::SampleRate(_))));

        let failure = SimBus::new(
            SensorConfig {
                read_failure_rate: 1.5,
                ..SensorConfig::default()
            },
            airframe,
            VirtualClock::new(),
        );
        assert!(matches!(failure, Err(SimError::Probability { .. })));
    }
}
