//! Collaborator interfaces: the six-axis sensor and the ESC outputs.

use crate::sample::RawSample;
use tracing::trace;

/// Transient failure reading the sensor register block.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("sensor bus read failed: {0}")]
pub struct BusError(pub String);

/// Register-level access to the six-axis sensor.
pub trait SensorBus: Send {
    /// Block until the sensor raises data-ready.
    fn wait_data_ready(&mut self);

    /// Read the accel, temperature and gyro registers in one transfer.
    fn read_block(&mut self) -> Result<RawSample, BusError>;

    /// Errors counted below the register layer (e.g. I2C transaction retries).
    fn bus_errors(&self) -> u64 {
        0
    }
}

/// Blocking source of raw samples that never surfaces transient errors.
pub trait ImuDriver: Send {
    /// Next fresh raw sample. Blocks until one is available.
    fn read_raw(&mut self) -> RawSample;

    /// Reads that failed and were retried.
    fn misses(&self) -> u64;

    /// Errors counted by the transport beneath the driver.
    fn bus_errors(&self) -> u64 {
        0
    }
}

impl<T: ImuDriver + ?Sized> ImuDriver for Box<T> {
    fn read_raw(&mut self) -> RawSample {
        (**self).read_raw()
    }

    fn misses(&self) -> u64 {
        (**self).misses()
    }

    fn bus_errors(&self) -> u64 {
        (**self).bus_errors()
    }
}

/// [`ImuDriver`] over a [`SensorBus`] that retries every failed read.
///
/// There is no timeout: a dead bus stalls the caller.
pub struct RetryingImu<B> {
    bus: B,
    misses: u64,
}

impl<B: SensorBus> RetryingImu<B> {
    pub fn new(bus: B) -> Self {
        Self { bus, misses: 0 }
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }
}

impl<B: SensorBus> ImuDriver for RetryingImu<B> {
    fn read_raw(&mut self) -> RawSample {
        loop {
            self.bus.wait_data_ready();
            match self.bus.read_block() {
                Ok(sample) => return sample,
                Err(e) => {
                    self.misses += 1;
                    trace!(misses = self.misses, "{e}");
                }
            }
        }
    }

    fn misses(&self) -> u64 {
        self.misses
    }

    fn bus_errors(&self) -> u64 {
        self.bus.bus_errors()
    }
}

/// Pulse-width outputs driving the ESCs.
pub trait EscDriver: Send {
    /// Set the pulse width on `pin`. Must not block.
    fn set_pulse_width(&mut self, pin: u8, micros: u16);

    /// Release every channel.
    fn shutdown(&mut self);
}
