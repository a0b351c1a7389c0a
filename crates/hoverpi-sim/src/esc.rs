//! Simulated ESC outputs: pulse widths become motor spins on the airframe.

use crate::airframe::SharedAirframe;
use hoverpi_core::{EscDriver, MotorPins, PulseRange};
use tracing::{debug, warn};

pub struct SimEscBank {
    airframe: SharedAirframe,
    pins: [u8; 4],
    range: PulseRange,
    pulses: [u16; 4],
    writes: u64,
    released: bool,
}

impl SimEscBank {
    pub fn new(airframe: SharedAirframe, pins: MotorPins, range: PulseRange) -> Self {
        Self {
            airframe,
            pins: [pins.front_left, pins.front_right, pins.back_left, pins.back_right],
            range,
            pulses: [0; 4],
            writes: 0,
            released: false,
        }
    }

    /// Last pulse written to each motor; 0 until the first write.
    pub fn pulses(&self) -> [u16; 4] {
        self.pulses
    }

    pub fn writes(&self) -> u64 {
        self.writes
    }

    pub fn is_released(&self) -> bool {
        self.released
    }
}

impl EscDriver for SimEscBank {
    fn set_pulse_width(&mut self, pin: u8, micros: u16) {
        let Some(motor) = self.pins.iter().position(|&p| p == pin) else {
            warn!(pin, micros, "pulse on unmapped pin");
            return;
        };
        let micros = micros.clamp(self.range.min, self.range.max);
        self.pulses[motor] = micros;
        self.writes += 1;
        self.airframe
            .lock()
            .set_spin(motor, (micros - self.range.min) as f64);
    }

    fn shutdown(&mut self) {
        self.airframe.lock().stop();
        self.released = true;
        debug!(writes = self.writes, "simulated ESCs released");
    }
}
