//! Control loop orchestration: estimator, sequencer, PID cascade and mixer,
//! once per motion sample, driven by the flight phase state machine.

use crate::acquisition::{
    AcquisitionStats, Averager, Clock, InlineSource, MotionSource, ThreadedSource,
};
use crate::calibration::{calibrate_gyros, temperature_celsius, CalibrationModel, CALIBRATION_SAMPLES};
use crate::cancel::CancelToken;
use crate::config::{ExecutionModel, FlightConfig, Mode, TEST_RATE_ONLY};
use crate::control::{CascadeInput, ControlCascade};
use crate::diagnostics::{CycleSnapshot, DiagnosticRecord, DiagnosticsSink};
use crate::driver::{EscDriver, ImuDriver};
use crate::error::Result;
use crate::estimator::{AttitudeEstimator, AttitudeState};
use crate::flight_plan::FlightPlan;
use crate::mixer::MotorBank;
use crate::sample::MotionSample;
use crate::state_machine::{FlightPhase, StateInput, StateMachine, StateMachineConfig};
use nalgebra::Vector3;
use std::thread;
use tracing::{debug, info, warn};

/// Outcome of one run of the control loop.
#[derive(Debug, Clone, Copy)]
pub struct FlightSummary {
    /// Phase the loop was in when it stopped
    pub last_phase: FlightPhase,
    /// Motion samples consumed
    pub cycles: u64,
    /// Sum of motion sample intervals (s)
    pub elapsed: f64,
    pub cancelled: bool,
    /// Attitude and gravity recorded at the end of warm-up
    pub takeoff: Option<AttitudeState>,
    pub acquisition: AcquisitionStats,
}

pub struct FlightController<E, D> {
    config: FlightConfig,
    estimator: AttitudeEstimator,
    state_machine: StateMachine,
    cascade: ControlCascade,
    plan_template: FlightPlan,
    plan: Option<FlightPlan>,
    motors: MotorBank<E>,
    diagnostics: D,
    cancel: CancelToken,

    hover: f64,
    time: f64,
    next_countdown: f64,
    cycles: u64,
    takeoff: Option<AttitudeState>,
    diagnostics_ok: bool,
}

impl<E: EscDriver, D: DiagnosticsSink> FlightController<E, D> {
    pub fn new(config: FlightConfig, motors: MotorBank<E>, diagnostics: D, cancel: CancelToken) -> Self {
        let state_machine = StateMachine::new(StateMachineConfig {
            warmup_duration: config.warmup_duration,
            hover_target: config.hover_target,
        });
        Self {
            estimator: AttitudeEstimator::new(config.estimator),
            cascade: ControlCascade::new(&config.gains),
            state_machine,
            plan_template: FlightPlan::default(),
            plan: None,
            motors,
            diagnostics,
            cancel,
            hover: 0.0,
            time: 0.0,
            next_countdown: 0.0,
            cycles: 0,
            takeoff: None,
            diagnostics_ok: true,
            config,
        }
    }

    /// Fly `plan` instead of the default climb / hover / descend sequence.
    pub fn with_plan(mut self, plan: FlightPlan) -> Self {
        self.plan_template = plan;
        self
    }

    pub fn phase(&self) -> FlightPhase {
        self.state_machine.current_state()
    }

    pub fn attitude(&self) -> &AttitudeState {
        self.estimator.state()
    }

    pub fn hover(&self) -> f64 {
        self.hover
    }

    pub fn motors(&self) -> &MotorBank<E> {
        &self.motors
    }

    pub fn diagnostics(&self) -> &D {
        &self.diagnostics
    }

    /// Consume motion samples until shutdown, then run the shutdown sequence.
    pub fn run<S: MotionSource + ?Sized>(&mut self, source: &mut S) -> FlightSummary {
        while self.phase() != FlightPhase::Shutdown {
            match source.next_sample() {
                Some(sample) => {
                    self.step(&sample);
                }
                None => {
                    // Source ends only on cancellation or producer exit
                    self.state_machine.shutdown(self.time);
                }
            }
        }
        let acquisition = source.stop();
        self.shutdown();
        acquisition.log();

        FlightSummary {
            last_phase: self.phase(),
            cycles: self.cycles,
            elapsed: self.time,
            cancelled: self.cancel.is_cancelled(),
            takeoff: self.takeoff,
            acquisition,
        }
    }

    /// Process one motion sample. `sample.dt` must be positive.
    pub fn step(&mut self, sample: &MotionSample) -> FlightPhase {
        if self.phase() == FlightPhase::Shutdown {
            return FlightPhase::Shutdown;
        }
        self.cycles += 1;
        self.time += sample.dt;

        match self.phase() {
            FlightPhase::Warmup => self.warmup_cycle(sample),
            _ => self.flight_cycle(sample),
        }
    }

    fn warmup_cycle(&mut self, sample: &MotionSample) -> FlightPhase {
        let estimate = self.estimator.update(&sample.accel, &sample.gyro, sample.dt, false);

        if let Some(c) = estimate.convergence {
            debug!(
                settled = c.settled(),
                x = c.spread.x,
                y = c.spread.y,
                z = c.spread.z,
                "gravity spread"
            );
        }

        if self.time >= self.next_countdown {
            let remaining = (self.config.warmup_duration - self.time).round().max(0.0);
            info!(
                remaining = remaining as i64,
                temperature_c = temperature_celsius(sample.temperature),
                "warming up"
            );
            self.next_countdown += 1.0;
        }

        let phase = self.state_machine.update(StateInput {
            time: self.time,
            cancelled: self.cancel.is_cancelled(),
            ..Default::default()
        });

        if phase == FlightPhase::ReadyToFlyRamp {
            let s = *self.estimator.state();
            info!(
                pitch = s.pitch.to_degrees(),
                roll = s.roll.to_degrees(),
                "take-off surface tilt"
            );
            info!(
                x = s.earth_gravity.x,
                y = s.earth_gravity.y,
                z = s.earth_gravity.z,
                "earth frame gravity"
            );
            self.takeoff = Some(s);
        }
        phase
    }

    fn flight_cycle(&mut self, sample: &MotionSample) -> FlightPhase {
        let dt = sample.dt;
        let estimate = self.estimator.update(&sample.accel, &sample.gyro, dt, true);
        let cancelled = self.cancel.is_cancelled();

        let mut earth_target = Vector3::zeros();
        let phase = match self.phase() {
            FlightPhase::ReadyToFlyRamp => {
                let phase = self.state_machine.update(StateInput {
                    time: self.time,
                    hover_speed: self.hover,
                    cancelled,
                    ..Default::default()
                });
                match phase {
                    FlightPhase::ActiveFlight => {
                        self.hover = self.config.hover_target;
                        self.plan = Some(self.plan_template.clone());
                    }
                    FlightPhase::ReadyToFlyRamp => {
                        self.hover += self.config.hover_target * dt / self.config.rtf_period;
                    }
                    _ => {}
                }
                phase
            }
            _ => {
                let target = self.plan.as_mut().and_then(|plan| plan.targets(dt));
                if let Some(t) = target {
                    earth_target = t;
                }
                self.state_machine.update(StateInput {
                    time: self.time,
                    hover_speed: self.hover,
                    plan_complete: target.is_none(),
                    cancelled,
                })
            }
        };

        if phase == FlightPhase::Shutdown {
            return phase;
        }

        let attitude = *self.estimator.state();
        let quad_target = self.estimator.to_quad_frame(&earth_target);
        let cascade = self.cascade.step(&CascadeInput {
            accel: sample.accel,
            gyro: sample.gyro,
            gravity: estimate.quad_gravity,
            velocity_target: quad_target,
            yaw: attitude.yaw,
            hover: self.hover,
            dt,
            rate_only: self.config.mode == Mode::TestCase(TEST_RATE_ONLY),
        });
        let pulses = self.motors.apply(&cascade.mixer);

        if self.diagnostics_ok {
            let record = DiagnosticRecord::from_cycle(&CycleSnapshot {
                time: self.time,
                sample,
                estimate: &estimate,
                attitude: &attitude,
                earth_target,
                quad_target,
                cascade: &cascade,
                pulses,
            });
            if let Err(e) = self.diagnostics.record(&record) {
                warn!("diagnostics disabled: {e}");
                self.diagnostics_ok = false;
            }
        }

        phase
    }

    /// Zero the motors, flush diagnostics, wait for the ESCs to settle and release them.
    fn shutdown(&mut self) {
        self.motors.stop_all();
        if let Err(e) = self.diagnostics.flush() {
            warn!("diagnostics flush failed: {e}");
        }
        if !self.config.esc_settle.is_zero() {
            thread::sleep(self.config.esc_settle);
        }
        self.motors.release();
        info!(cycles = self.cycles, elapsed = self.time, "control loop stopped");
    }
}

/// Full flight: gyro calibration, acquisition start, then the control loop to shutdown.
pub fn fly<I, E, D, C>(
    config: FlightConfig,
    mut imu: I,
    calibration: CalibrationModel,
    motors: MotorBank<E>,
    diagnostics: D,
    clock: C,
    cancel: CancelToken,
) -> Result<FlightSummary>
where
    I: ImuDriver + 'static,
    E: EscDriver,
    D: DiagnosticsSink,
    C: Clock + 'static,
{
    info!(mode = config.mode.label(), airframe = config.airframe.label(), "starting flight");
    let gyro_bias = calibrate_gyros(&mut imu, CALIBRATION_SAMPLES);
    let averager = Averager::new(config.averaging_window, calibration.with_gyro_bias(gyro_bias));

    let mut source: Box<dyn MotionSource> = match config.execution {
        ExecutionModel::Inline => Box::new(InlineSource::new(imu, averager, clock, cancel.clone())),
        ExecutionModel::Threaded => {
            Box::new(ThreadedSource::spawn(imu, averager, clock, cancel.clone())?)
        }
    };

    let mut controller = FlightController::new(config, motors, diagnostics, cancel);
    Ok(controller.run(source.as_mut()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Airframe, TEST_SPIN_CHECK};
    use crate::mixer::{MotorPins, PulseRange};
    use std::time::Duration;

    #[derive(Default)]
    struct NullEsc {
        released: bool,
    }

    impl EscDriver for NullEsc {
        fn set_pulse_width(&mut self, _pin: u8, _micros: u16) {}

        fn shutdown(&mut self) {
            self.released = true;
        }
    }

    /// Replays a stationary, level airframe at 50 Hz.
    struct StillSource {
        remaining: usize,
        cancel_after: Option<usize>,
        cancel: CancelToken,
        served: usize,
    }

    impl StillSource {
        fn new(remaining: usize, cancel: CancelToken) -> Self {
            Self {
                remaining,
                cancel_after: None,
                cancel,
                served: 0,
            }
        }
    }

    impl MotionSource for StillSource {
        fn next_sample(&mut self) -> Option<MotionSample> {
            if Some(self.served) == self.cancel_after {
                self.cancel.cancel();
            }
            if self.remaining == 0 || self.cancel.is_cancelled() {
                return None;
            }
            self.remaining -= 1;
            self.served += 1;
            Some(MotionSample {
                accel: Vector3::new(0.0, 0.0, 1.0),
                gyro: Vector3::zeros(),
                temperature: 0.0,
                dt: 0.02,
                raw_count: self.served as u64 * 20,
            })
        }

        fn stop(&mut self) -> AcquisitionStats {
            AcquisitionStats::default()
        }
    }

    const PINS: MotorPins = MotorPins {
        front_left: 27,
        front_right: 17,
        back_left: 5,
        back_right: 19,
    };

    fn config(mode: Mode) -> FlightConfig {
        let mut cfg = FlightConfig::new(mode, Airframe::Standard);
        cfg.warmup_duration = 2.0;
        // Settle the gravity estimate inside the shortened warm-up
        cfg.estimator.filter_cutoff = 2.0;
        cfg.esc_settle = Duration::ZERO;
        cfg
    }

    fn controller(
        mode: Mode,
        cancel: CancelToken,
    ) -> FlightController<NullEsc, Vec<DiagnosticRecord>> {
        let motors = MotorBank::new(NullEsc::default(), PINS, PulseRange::default());
        FlightController::new(config(mode), motors, Vec::new(), cancel)
    }

    #[test]
    fn test_phases_in_order() {
        let cancel = CancelToken::new();
        let mut fc = controller(Mode::Fly, cancel.clone());
        let mut source = StillSource::new(10_000, cancel);

        let summary = fc.run(&mut source);
        assert_eq!(summary.last_phase, FlightPhase::Shutdown);
        assert!(!summary.cancelled);
        assert!(summary.takeoff.is_some());

        let sm = &fc.state_machine;
        let warm = sm.transition_time(FlightPhase::ReadyToFlyRamp);
        let active = sm.transition_time(FlightPhase::ActiveFlight);
        let end = sm.transition_time(FlightPhase::Shutdown);
        assert!((warm - 2.0).abs() < 0.021);
        // 600 spin at 12 per cycle over the 1 s ramp
        assert!((active - warm - 1.02).abs() < 0.021);
        // 9 s flight plan
        assert!((end - active - 9.0).abs() < 0.05);
        assert!(fc.motors().esc().released);
        assert_eq!(fc.motors().pulse_widths(), [1000; 4]);
    }

    #[test]
    fn test_warmup_holds_motors_at_idle() {
        let cancel = CancelToken::new();
        let mut fc = controller(Mode::Fly, cancel);
        let sample = MotionSample {
            accel: Vector3::new(0.0, 0.0, 1.0),
            gyro: Vector3::zeros(),
            temperature: 0.0,
            dt: 0.02,
            raw_count: 20,
        };
        for _ in 0..50 {
            assert_eq!(fc.step(&sample), FlightPhase::Warmup);
        }
        assert_eq!(fc.motors().pulse_widths(), [1000; 4]);
        assert!(fc.diagnostics().is_empty());
    }

    #[test]
    fn test_ramp_reaches_hover() {
        let cancel = CancelToken::new();
        let mut fc = controller(Mode::Fly, cancel);
        let sample = MotionSample {
            accel: Vector3::new(0.0, 0.0, 1.0),
            gyro: Vector3::zeros(),
            temperature: 0.0,
            dt: 0.02,
            raw_count: 20,
        };
        while fc.phase() != FlightPhase::ActiveFlight {
            let before = fc.hover();
            fc.step(&sample);
            assert!(fc.hover() >= before);
            assert!(fc.hover() <= 600.0 + 1e-9);
        }
        assert_eq!(fc.hover(), 600.0);

        let last = fc.diagnostics().last().unwrap();
        assert_eq!(last.vert_out, 600.0);
        assert_eq!(fc.motors().pulse_widths(), [1600; 4]);
    }

    #[test]
    fn test_cancel_mid_flight() {
        let cancel = CancelToken::new();
        let mut fc = controller(Mode::Fly, cancel.clone());
        let mut source = StillSource::new(10_000, cancel);
        source.cancel_after = Some(200);

        let summary = fc.run(&mut source);
        assert!(summary.cancelled);
        assert_eq!(summary.cycles, 200);
        assert_eq!(summary.last_phase, FlightPhase::Shutdown);
        assert_eq!(fc.motors().pulse_widths(), [1000; 4]);
        assert!(fc.motors().esc().released);
    }

    #[test]
    fn test_source_exhausted_shuts_down() {
        let cancel = CancelToken::new();
        let mut fc = controller(Mode::TestCase(TEST_RATE_ONLY), cancel.clone());
        let summary = fc.run(&mut StillSource::new(5, cancel));
        assert_eq!(summary.cycles, 5);
        assert!(!summary.cancelled);
        assert!(summary.takeoff.is_none());
    }

    #[test]
    fn test_diagnostics_one_row_per_flight_cycle() {
        let cancel = CancelToken::new();
        let mut fc = controller(Mode::Fly, cancel.clone());
        let summary = fc.run(&mut StillSource::new(10_000, cancel));

        // Warm-up cycles and the final shutdown cycle write no row
        let warm = fc.state_machine.transition_time(FlightPhase::ReadyToFlyRamp);
        let warmup_cycles = (warm / 0.02).round() as u64;
        assert_eq!(fc.diagnostics().len() as u64, summary.cycles - warmup_cycles - 1);
        let row = &fc.diagnostics()[0];
        assert!((row.egz - 1.0).abs() < 0.05);
        assert_eq!(row.evz_target, 0.0);
    }

    #[test]
    fn test_spin_check_mode_label() {
        assert!(Mode::TestCase(TEST_SPIN_CHECK).label().contains("spin"));
    }
}
