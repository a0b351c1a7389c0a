//! One simulated vehicle wired for a flight configuration.

use crate::airframe::{Airframe, AirframeParams, SharedAirframe};
use crate::clock::VirtualClock;
use crate::error::SimError;
use crate::esc::SimEscBank;
use crate::sensor::{SensorConfig, SimBus};
use hoverpi_core::{FlightConfig, MotorBank, RetryingImu};
use std::sync::Arc;
use tracing::info;

pub struct SimRig {
    pub imu: RetryingImu<SimBus>,
    pub motors: MotorBank<SimEscBank>,
    pub clock: VirtualClock,
    pub airframe: SharedAirframe,
}

impl SimRig {
    /// Build the sensor, ESCs and airframe. The sensor takes its register
    /// settings from `config`, overriding those in `sensor`.
    pub fn new(
        config: &FlightConfig,
        sensor: SensorConfig,
        params: AirframeParams,
    ) -> Result<Self, SimError> {
        let sensor = SensorConfig {
            settings: config.sensor,
            ..sensor
        };
        let airframe = Airframe::shared(params);
        let clock = VirtualClock::new();

        info!(
            airframe = config.airframe.label(),
            pitch_deg = params.pitch.to_degrees(),
            roll_deg = params.roll.to_degrees(),
            seed = sensor.seed,
            realtime = sensor.realtime,
            "simulated vehicle ready"
        );

        let bus = SimBus::new(sensor, Arc::clone(&airframe), clock.clone())?;
        let esc = SimEscBank::new(Arc::clone(&airframe), config.pins, config.pulse_range);

        Ok(Self {
            imu: RetryingImu::new(bus),
            motors: MotorBank::new(esc, config.pins, config.pulse_range),
            clock,
            airframe,
        })
    }
}
