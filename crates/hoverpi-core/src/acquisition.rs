//! Fixed-cadence acquisition: batches raw samples into motion samples.
//!
//! Two execution models deliver the same stream of [`MotionSample`]s:
//! - [`InlineSource`]: the control loop blocks on the averaging window itself.
//! - [`ThreadedSource`]: a dedicated thread runs the window continuously and
//!   hands each completed sample across a bounded channel.
//!
//! Either way there is exactly one producer and one consumer, and every
//! window yields exactly one sample.

use crate::calibration::CalibrationModel;
use crate::cancel::CancelToken;
use crate::driver::ImuDriver;
use crate::error::{Error, Result};
use crate::sample::{MotionSample, RawAverage, RawSample};
use crossbeam_channel::{bounded, select, Receiver, Sender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

/// Default number of raw samples per motion sample (1 kHz sensor, 50 Hz control).
pub const DEFAULT_WINDOW: usize = 20;

/// How often a waiting consumer re-checks cancellation.
const CANCEL_POLL: Duration = Duration::from_millis(10);

// ---------------------------------------------------------------------------
// Clock
// ---------------------------------------------------------------------------

/// Time source used to stamp averaging windows.
pub trait Clock: Send {
    fn now(&self) -> Instant;
}

/// Monotonic wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

// ---------------------------------------------------------------------------
// Averager
// ---------------------------------------------------------------------------

/// Accumulates raw samples and emits one scaled [`MotionSample`] per window.
pub struct Averager {
    window: usize,
    buffer: Vec<RawSample>,
    calibration: CalibrationModel,
    window_start: Instant,
    raw_count: u64,
}

impl Averager {
    pub fn new(window: usize, calibration: CalibrationModel) -> Self {
        let window = window.max(1);
        Self {
            window,
            buffer: Vec::with_capacity(window),
            calibration,
            window_start: Instant::now(),
            raw_count: 0,
        }
    }

    /// Start timing the next window from `now`, dropping any partial window.
    pub fn restart(&mut self, now: Instant) {
        self.buffer.clear();
        self.window_start = now;
    }

    /// Add one raw sample read at `now`; returns a sample when the window closes.
    pub fn push(&mut self, raw: RawSample, now: Instant) -> Option<MotionSample> {
        self.raw_count += 1;
        self.buffer.push(raw);
        if self.buffer.len() < self.window {
            return None;
        }

        let avg = RawAverage::of(&self.buffer)?;
        self.buffer.clear();

        let dt = now.saturating_duration_since(self.window_start).as_secs_f64();
        self.window_start = now;

        let (accel, gyro) = self.calibration.scale(&avg.accel, &avg.gyro, avg.temperature);
        Some(MotionSample {
            accel,
            gyro,
            temperature: avg.temperature,
            dt,
            raw_count: self.raw_count,
        })
    }

    pub fn raw_count(&self) -> u64 {
        self.raw_count
    }
}

// ---------------------------------------------------------------------------
// Sources
// ---------------------------------------------------------------------------

/// Counters reported when acquisition stops.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AcquisitionStats {
    pub raw_samples: u64,
    pub motion_samples: u64,
    pub elapsed: Duration,
    pub misses: u64,
    pub bus_errors: u64,
}

impl AcquisitionStats {
    /// Raw samples read per second of acquisition.
    pub fn loop_rate(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.raw_samples as f64 / secs
        } else {
            0.0
        }
    }

    pub fn log(&self) {
        info!(
            raw_samples = self.raw_samples,
            motion_samples = self.motion_samples,
            loops_per_second = self.loop_rate(),
            sensor_misses = self.misses,
            bus_errors = self.bus_errors,
            "acquisition stopped"
        );
    }
}

/// Consumer side of the motion-sample handoff.
pub trait MotionSource {
    /// Next motion sample, blocking until its window completes.
    /// `None` once cancelled or the producer has stopped.
    fn next_sample(&mut self) -> Option<MotionSample>;

    /// Stop producing and report counters. Idempotent.
    fn stop(&mut self) -> AcquisitionStats;
}

/// Single-context model: the caller's thread reads the sensor directly.
pub struct InlineSource<I, C = SystemClock> {
    imu: I,
    averager: Averager,
    clock: C,
    cancel: CancelToken,
    started: Instant,
    motion_samples: u64,
    stopped: Option<AcquisitionStats>,
}

impl<I: ImuDriver, C: Clock> InlineSource<I, C> {
    pub fn new(imu: I, mut averager: Averager, clock: C, cancel: CancelToken) -> Self {
        let started = clock.now();
        averager.restart(started);
        Self {
            imu,
            averager,
            clock,
            cancel,
            started,
            motion_samples: 0,
            stopped: None,
        }
    }

    fn stats(&self) -> AcquisitionStats {
        AcquisitionStats {
            raw_samples: self.averager.raw_count(),
            motion_samples: self.motion_samples,
            elapsed: self.clock.now().saturating_duration_since(self.started),
            misses: self.imu.misses(),
            bus_errors: self.imu.bus_errors(),
        }
    }
}

impl<I: ImuDriver, C: Clock> MotionSource for InlineSource<I, C> {
    fn next_sample(&mut self) -> Option<MotionSample> {
        if self.stopped.is_some() {
            return None;
        }
        loop {
            if self.cancel.is_cancelled() {
                return None;
            }
            let raw = self.imu.read_raw();
            if let Some(sample) = self.averager.push(raw, self.clock.now()) {
                self.motion_samples += 1;
                return Some(sample);
            }
        }
    }

    fn stop(&mut self) -> AcquisitionStats {
        let stats = self.stopped.unwrap_or_else(|| self.stats());
        self.stopped = Some(stats);
        stats
    }
}

/// Two-context model: a named acquisition thread produces, the caller consumes.
pub struct ThreadedSource {
    rx: Option<Receiver<MotionSample>>,
    handle: Option<JoinHandle<AcquisitionStats>>,
    halt: CancelToken,
    cancel: CancelToken,
    stopped: Option<AcquisitionStats>,
}

impl ThreadedSource {
    pub fn spawn<I, C>(imu: I, averager: Averager, clock: C, cancel: CancelToken) -> Result<Self>
    where
        I: ImuDriver + 'static,
        C: Clock + 'static,
    {
        // One slot: the producer waits rather than overwrite an unread sample
        let (tx, rx) = bounded(1);
        let halt = CancelToken::new();

        let thread_halt = halt.clone();
        let thread_cancel = cancel.clone();
        let handle = thread::Builder::new()
            .name("acquisition".into())
            .spawn(move || run_acquisition(imu, averager, clock, tx, thread_halt, thread_cancel))
            .map_err(Error::Spawn)?;

        Ok(Self {
            rx: Some(rx),
            handle: Some(handle),
            halt,
            cancel,
            stopped: None,
        })
    }
}

impl MotionSource for ThreadedSource {
    fn next_sample(&mut self) -> Option<MotionSample> {
        let rx = self.rx.as_ref()?;
        loop {
            if self.cancel.is_cancelled() {
                return None;
            }
            select! {
                recv(rx) -> msg => return msg.ok(),
                default(CANCEL_POLL) => {}
            }
        }
    }

    fn stop(&mut self) -> AcquisitionStats {
        if let Some(stats) = self.stopped {
            return stats;
        }

        self.halt.cancel();
        // Unblocks a producer waiting on a full channel
        self.rx.take();

        let stats = match self.handle.take().map(JoinHandle::join) {
            Some(Ok(stats)) => stats,
            Some(Err(_)) => {
                error!("acquisition thread panicked");
                AcquisitionStats::default()
            }
            None => AcquisitionStats::default(),
        };
        self.stopped = Some(stats);
        stats
    }
}

impl Drop for ThreadedSource {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_acquisition<I: ImuDriver, C: Clock>(
    mut imu: I,
    mut averager: Averager,
    clock: C,
    tx: Sender<MotionSample>,
    halt: CancelToken,
    cancel: CancelToken,
) -> AcquisitionStats {
    debug!("acquisition thread started");
    let started = clock.now();
    averager.restart(started);
    let mut motion_samples = 0;

    while !halt.is_cancelled() && !cancel.is_cancelled() {
        let raw = imu.read_raw();
        if let Some(sample) = averager.push(raw, clock.now()) {
            if tx.send(sample).is_err() {
                break;
            }
            motion_samples += 1;
        }
    }

    debug!("acquisition thread exiting");
    AcquisitionStats {
        raw_samples: averager.raw_count(),
        motion_samples,
        elapsed: clock.now().saturating_duration_since(started),
        misses: imu.misses(),
        bus_errors: imu.bus_errors(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::{AccelTempModel, COUNTS_PER_G};
    use nalgebra::Vector3;

    /// Counts up in the x accel register so ordering is visible.
    struct CountingImu {
        next: i16,
        limit: Option<i16>,
        cancel: CancelToken,
    }

    impl CountingImu {
        fn new() -> Self {
            Self {
                next: 0,
                limit: None,
                cancel: CancelToken::new(),
            }
        }
    }

    impl ImuDriver for CountingImu {
        fn read_raw(&mut self) -> RawSample {
            if Some(self.next) == self.limit {
                self.cancel.cancel();
            }
            let s = RawSample::new([self.next, 0, COUNTS_PER_G as i16], [0, 0, 0], 0);
            self.next = self.next.wrapping_add(1);
            s
        }

        fn misses(&self) -> u64 {
            2
        }
    }

    fn zero_model() -> CalibrationModel {
        CalibrationModel::new(AccelTempModel {
            a: Vector3::zeros(),
            b: Vector3::zeros(),
        })
    }

    #[test]
    fn test_averager_one_sample_per_window() {
        let mut avg = Averager::new(4, zero_model());
        let t0 = Instant::now();
        avg.restart(t0);

        let mut emitted = Vec::new();
        for i in 0..12 {
            let raw = RawSample::new([i, 0, 16384], [0, 0, 0], 100);
            if let Some(s) = avg.push(raw, t0 + Duration::from_millis(i as u64 + 1)) {
                emitted.push(s);
            }
        }

        assert_eq!(emitted.len(), 3);
        // mean of 0..4 counts
        assert!((emitted[0].accel.x - 1.5 * 4.0 / 65536.0).abs() < 1e-15);
        assert!((emitted[0].accel.z - 1.0).abs() < 1e-12);
        assert_eq!(emitted[0].temperature, 100.0);
        assert!((emitted[0].dt - 0.004).abs() < 1e-9);
        assert!((emitted[1].dt - 0.004).abs() < 1e-9);
        assert_eq!(emitted[2].raw_count, 12);
    }

    #[test]
    fn test_inline_source_blocks_for_window() {
        let mut src = InlineSource::new(
            CountingImu::new(),
            Averager::new(5, zero_model()),
            SystemClock,
            CancelToken::new(),
        );
        let a = src.next_sample().unwrap();
        let b = src.next_sample().unwrap();
        assert_eq!(a.raw_count, 5);
        assert_eq!(b.raw_count, 10);
        assert!(b.accel.x > a.accel.x);

        let stats = src.stop();
        assert_eq!(stats.raw_samples, 10);
        assert_eq!(stats.motion_samples, 2);
        assert_eq!(stats.misses, 2);
        assert!(src.next_sample().is_none());
    }

    #[test]
    fn test_inline_source_cancelled() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let mut src =
            InlineSource::new(CountingImu::new(), Averager::new(5, zero_model()), SystemClock, cancel);
        assert!(src.next_sample().is_none());
    }

    #[test]
    fn test_threaded_source_in_order_without_drops() {
        let cancel = CancelToken::new();
        let mut src =
            ThreadedSource::spawn(CountingImu::new(), Averager::new(4, zero_model()), SystemClock, cancel)
                .unwrap();

        let mut last = 0;
        for _ in 0..50 {
            let s = src.next_sample().unwrap();
            assert_eq!(s.raw_count, last + 4);
            last = s.raw_count;
            // Slow consumer; the producer must wait rather than skip
            thread::sleep(Duration::from_micros(200));
        }

        let stats = src.stop();
        assert!(stats.motion_samples >= 50);
        assert!(src.next_sample().is_none());
    }

    #[test]
    fn test_threaded_source_stops_on_cancel() {
        let mut imu = CountingImu::new();
        imu.limit = Some(40);
        let cancel = imu.cancel.clone();

        let mut src =
            ThreadedSource::spawn(imu, Averager::new(4, zero_model()), SystemClock, cancel).unwrap();
        let mut received = 0;
        while src.next_sample().is_some() {
            received += 1;
        }
        assert!(received <= 11);
        let stats = src.stop();
        assert!(stats.raw_samples >= 40);
    }

    #[test]
    fn test_loop_rate() {
        let stats = AcquisitionStats {
            raw_samples: 2000,
            elapsed: Duration::from_secs(2),
            ..Default::default()
        };
        assert_eq!(stats.loop_rate(), 1000.0);
        assert_eq!(AcquisitionStats::default().loop_rate(), 0.0);
    }
}
