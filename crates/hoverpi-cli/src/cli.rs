//! hoverpi command line: argument parsing, configuration and run-mode dispatch.

use crate::record::CsvDiagnostics;
use crate::store::{load_calibration, CsvCalibrationStore};
use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use hoverpi_core::calibration::{calibrate_gravity, CalibrationModel, CALIBRATION_SAMPLES};
use hoverpi_core::config::{hover_target, TEST_RATE_ONLY, TEST_SPIN_CHECK};
use hoverpi_core::pid::PidGains;
use hoverpi_core::{
    fly, Airframe, CancelToken, ConfigError, DiagnosticsSink, EscDriver, ExecutionModel,
    FlightConfig, FlightSummary, Mode, MotorBank, NoDiagnostics, PulseRange,
};
use hoverpi_sim::{AirframeParams, SensorConfig, SimRig};
use signal_hook::consts::{SIGINT, SIGTERM};
use std::path::PathBuf;
use std::thread;
use std::time::Duration;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "hoverpi")]
#[command(about = "Quadcopter attitude estimator and flight controller")]
#[command(version)]
pub struct Args {
    // ── Run mode ──────────────────────────────────────────────
    /// Fly the built-in flight plan
    #[arg(short, long)]
    fly: bool,

    /// Measure gravity at the current temperature and append it to the calibration file
    #[arg(short = 'g', long)]
    calibrate_gravity: bool,

    /// Motor test case: 1 = propeller spin check, 2 = rate loops only
    #[arg(short, long)]
    test_case: Option<u8>,

    /// Hover spin above the stopped pulse (0-1000)
    #[arg(long, allow_negative_numbers = true)]
    hover_target: Option<i64>,

    #[arg(short, long, value_enum, default_value = "standard")]
    airframe: AirframeArg,

    // ── Gains ─────────────────────────────────────────────────
    /// Vertical velocity P gain
    #[arg(long)]
    vvp: Option<f64>,
    #[arg(long)]
    vvi: Option<f64>,
    #[arg(long)]
    vvd: Option<f64>,

    /// Horizontal velocity P gain
    #[arg(long)]
    hvp: Option<f64>,
    #[arg(long)]
    hvi: Option<f64>,
    #[arg(long)]
    hvd: Option<f64>,

    /// Pitch rate P gain
    #[arg(long)]
    prp: Option<f64>,
    #[arg(long)]
    pri: Option<f64>,
    #[arg(long)]
    prd: Option<f64>,

    /// Roll rate P gain
    #[arg(long)]
    rrp: Option<f64>,
    #[arg(long)]
    rri: Option<f64>,
    #[arg(long)]
    rrd: Option<f64>,

    /// Yaw rate P gain
    #[arg(long)]
    yrp: Option<f64>,
    #[arg(long)]
    yri: Option<f64>,
    #[arg(long)]
    yrd: Option<f64>,

    // ── Estimator and loop timing ─────────────────────────────
    /// Complementary filter time constant (s)
    #[arg(long)]
    tau: Option<f64>,

    /// Seconds to ramp from stopped to the hover target
    #[arg(long)]
    rtf_period: Option<f64>,

    /// Warm-up duration before take-off (s)
    #[arg(long)]
    warmup: Option<f64>,

    /// Raw samples averaged per control cycle
    #[arg(long)]
    window: Option<usize>,

    /// Gravity filter cutoff (Hz)
    #[arg(long)]
    filter_cutoff: Option<f64>,

    #[arg(long)]
    filter_order: Option<usize>,

    #[arg(long)]
    min_pulse: Option<u16>,

    #[arg(long)]
    max_pulse: Option<u16>,

    /// Pause between stopping the motors and releasing the ESCs (s)
    #[arg(long, default_value_t = 1.0)]
    esc_settle: f64,

    // ── Sensor ────────────────────────────────────────────────
    /// Accelerometer low-pass code (0-6); gravity calibration always uses 6
    #[arg(long)]
    alpf: Option<u8>,

    /// Gyro low-pass code (0-6)
    #[arg(long)]
    glpf: Option<u8>,

    /// Run the averaging window on the control loop instead of its own thread
    #[arg(long)]
    inline: bool,

    // ── Files ─────────────────────────────────────────────────
    /// Write one CSV row per control cycle
    #[arg(long)]
    diagnostics: Option<PathBuf>,

    /// Gravity records: appended by calibration, fitted before flight
    #[arg(long, default_value = "qcgravity.csv")]
    calibration_file: PathBuf,

    // ── Simulated vehicle ─────────────────────────────────────
    #[arg(long, default_value_t = 42)]
    seed: u64,

    #[arg(long, default_value_t = 1.0)]
    noise_scale: f64,

    /// Frame pitch on the ground (degrees)
    #[arg(long, default_value_t = 0.0, allow_negative_numbers = true)]
    tilt_pitch: f64,

    /// Frame roll on the ground (degrees)
    #[arg(long, default_value_t = 0.0, allow_negative_numbers = true)]
    tilt_roll: f64,

    /// Chance of an injected sensor read failure
    #[arg(long, default_value_t = 0.0)]
    read_failure_rate: f64,

    /// Pace the simulated sensor in wall time
    #[arg(long)]
    realtime: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum AirframeArg {
    Standard,
    Compact,
    Agile,
    Heavy,
}

impl From<AirframeArg> for Airframe {
    fn from(arg: AirframeArg) -> Self {
        match arg {
            AirframeArg::Standard => Airframe::Standard,
            AirframeArg::Compact => Airframe::Compact,
            AirframeArg::Agile => Airframe::Agile,
            AirframeArg::Heavy => Airframe::Heavy,
        }
    }
}

/// How a run that got past configuration ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Completed,
    CalibrationFailed,
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

fn override_gains(gains: &mut PidGains, p: Option<f64>, i: Option<f64>, d: Option<f64>) {
    if let Some(p) = p {
        gains.p = p;
    }
    if let Some(i) = i {
        gains.i = i;
    }
    if let Some(d) = d {
        gains.d = d;
    }
}

/// Airframe profile defaults with every flag given on the command line applied.
pub fn build_config(args: &Args) -> Result<FlightConfig, ConfigError> {
    let mode = Mode::select(
        args.fly,
        args.calibrate_gravity,
        args.test_case,
        args.hover_target.is_some(),
    )?;
    let mut config = FlightConfig::new(mode, args.airframe.into());

    if let Some(hover) = args.hover_target {
        config.hover_target = hover_target(hover)?;
    }

    let g = &mut config.gains;
    override_gains(&mut g.vertical_velocity, args.vvp, args.vvi, args.vvd);
    override_gains(&mut g.horizontal_velocity, args.hvp, args.hvi, args.hvd);
    override_gains(&mut g.pitch_rate, args.prp, args.pri, args.prd);
    override_gains(&mut g.roll_rate, args.rrp, args.rri, args.rrd);
    override_gains(&mut g.yaw_rate, args.yrp, args.yri, args.yrd);

    if let Some(tau) = args.tau {
        config.estimator.tau = tau;
    }
    if let Some(period) = args.rtf_period {
        config.rtf_period = period;
    }
    if let Some(warmup) = args.warmup {
        config.warmup_duration = warmup;
    }
    if let Some(window) = args.window {
        config.set_averaging_window(window);
    }
    if let Some(cutoff) = args.filter_cutoff {
        config.estimator.filter_cutoff = cutoff;
    }
    if let Some(order) = args.filter_order {
        config.estimator.filter_order = order;
    }
    config.pulse_range = PulseRange {
        min: args.min_pulse.unwrap_or(config.pulse_range.min),
        max: args.max_pulse.unwrap_or(config.pulse_range.max),
    };

    if !(args.esc_settle.is_finite() && args.esc_settle >= 0.0) {
        return Err(ConfigError::NonPositive {
            name: "ESC settle time",
            value: args.esc_settle,
        });
    }
    config.esc_settle = Duration::from_secs_f64(args.esc_settle);

    if mode != Mode::CalibrateGravity {
        if let Some(code) = args.alpf {
            config.sensor.accel_lpf = code;
        }
    }
    if let Some(code) = args.glpf {
        config.sensor.gyro_lpf = code;
    }
    if args.inline {
        config.execution = ExecutionModel::Inline;
    }

    config.validate()?;
    Ok(config)
}

fn sensor_config(args: &Args) -> SensorConfig {
    SensorConfig {
        noise_scale: args.noise_scale,
        read_failure_rate: args.read_failure_rate,
        realtime: args.realtime,
        seed: args.seed,
        ..SensorConfig::default()
    }
}

fn airframe_params(args: &Args, config: &FlightConfig) -> AirframeParams {
    AirframeParams {
        hover_spin: config.hover_target.max(1.0),
        pitch: args.tilt_pitch.to_radians(),
        roll: args.tilt_roll.to_radians(),
        ..AirframeParams::default()
    }
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

/// Validate the arguments, wire up cancellation and run the selected mode.
pub fn run(args: Args) -> Result<Outcome> {
    let config = build_config(&args)?;
    let cancel = CancelToken::new();
    for signal in [SIGINT, SIGTERM] {
        signal_hook::flag::register(signal, cancel.flag())
            .with_context(|| format!("registering handler for signal {signal}"))?;
    }
    run_mode(&args, config, cancel)
}

pub fn run_mode(args: &Args, config: FlightConfig, cancel: CancelToken) -> Result<Outcome> {
    info!(
        mode = config.mode.label(),
        airframe = config.airframe.label(),
        hover_target = config.hover_target,
        "hoverpi {}",
        hoverpi_core::VERSION
    );
    let mut rig = SimRig::new(&config, sensor_config(args), airframe_params(args, &config))
        .context("building simulated vehicle")?;

    match config.mode {
        Mode::Fly | Mode::TestCase(TEST_RATE_ONLY) => {
            let calibration = CalibrationModel::new(load_calibration(&args.calibration_file));
            let summary = match &args.diagnostics {
                Some(path) => {
                    let sink = CsvDiagnostics::create(path)
                        .with_context(|| format!("opening diagnostics file {}", path.display()))?;
                    fly_with(config, rig, calibration, sink, cancel)?
                }
                None => fly_with(config, rig, calibration, NoDiagnostics, cancel)?,
            };
            log_summary(&summary);
            Ok(Outcome::Completed)
        }
        Mode::TestCase(TEST_SPIN_CHECK) => {
            rig.motors
                .spin_check(config.hover_target, config.spin_check, &cancel);
            shutdown_motors(&mut rig.motors, config.esc_settle);
            Ok(Outcome::Completed)
        }
        Mode::CalibrateGravity => {
            let mut store = CsvCalibrationStore::new(&args.calibration_file);
            let result = calibrate_gravity(&mut rig.imu, &mut store, CALIBRATION_SAMPLES);
            shutdown_motors(&mut rig.motors, config.esc_settle);
            match result {
                Ok(_) => Ok(Outcome::Completed),
                Err(e) => {
                    error!(error = %e, "gravity calibration failed");
                    Ok(Outcome::CalibrationFailed)
                }
            }
        }
        Mode::TestCase(n) => Err(ConfigError::UnknownTestCase(n).into()),
    }
}

fn fly_with<D: DiagnosticsSink>(
    config: FlightConfig,
    rig: SimRig,
    calibration: CalibrationModel,
    diagnostics: D,
    cancel: CancelToken,
) -> Result<FlightSummary> {
    let summary = fly(
        config,
        rig.imu,
        calibration,
        rig.motors,
        diagnostics,
        rig.clock,
        cancel,
    )?;
    Ok(summary)
}

/// Shutdown for runs that never start the control loop.
fn shutdown_motors<E: EscDriver>(motors: &mut MotorBank<E>, settle: Duration) {
    motors.stop_all();
    if !settle.is_zero() {
        thread::sleep(settle);
    }
    motors.release();
}

fn log_summary(summary: &FlightSummary) {
    info!(
        phase = summary.last_phase.label(),
        cycles = summary.cycles,
        elapsed = summary.elapsed,
        cancelled = summary.cancelled,
        "flight finished"
    );
    if let Some(takeoff) = &summary.takeoff {
        info!(
            pitch_deg = takeoff.pitch.to_degrees(),
            roll_deg = takeoff.roll.to_degrees(),
            "take-off attitude"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::read_records;

    fn parse(args: &[&str]) -> Args {
        let mut full = vec!["hoverpi"];
        full.extend_from_slice(args);
        Args::parse_from(full)
    }

    #[test]
    fn test_defaults_from_profile() {
        let config = build_config(&parse(&["--fly", "--airframe", "compact"])).unwrap();
        assert_eq!(config.mode, Mode::Fly);
        assert_eq!(config.airframe, Airframe::Compact);
        assert_eq!(config.hover_target, Airframe::Compact.profile().hover_target);
        assert_eq!(config.execution, ExecutionModel::Threaded);
        assert_eq!(config.esc_settle, Duration::from_secs(1));
    }

    #[test]
    fn test_overrides_applied() {
        let config = build_config(&parse(&[
            "--fly",
            "--hover-target",
            "550",
            "--prp",
            "40",
            "--yrd",
            "0.5",
            "--tau",
            "0.25",
            "--alpf",
            "2",
            "--inline",
        ]))
        .unwrap();
        let profile = Airframe::Standard.profile();

        assert_eq!(config.hover_target, 550.0);
        assert_eq!(config.gains.pitch_rate.p, 40.0);
        assert_eq!(config.gains.pitch_rate.i, profile.gains.pitch_rate.i);
        assert_eq!(config.gains.yaw_rate.d, 0.5);
        assert_eq!(config.estimator.tau, 0.25);
        assert_eq!(config.sensor.accel_lpf, 2);
        assert_eq!(config.execution, ExecutionModel::Inline);
    }

    #[test]
    fn test_window_override_keeps_filter_in_step() {
        let config = build_config(&parse(&["--fly", "--window", "10"])).unwrap();
        assert_eq!(config.averaging_window, 10);
        assert_eq!(config.estimator.filter_sampling, 100.0);

        let config = build_config(&parse(&["--fly"])).unwrap();
        assert_eq!(config.estimator.filter_sampling, 50.0);
    }

    #[test]
    fn test_calibration_forces_narrow_lowpass() {
        let config = build_config(&parse(&["--calibrate-gravity", "--alpf", "1"])).unwrap();
        assert_eq!(config.sensor.accel_lpf, 6);
    }

    #[test]
    fn test_rejections() {
        let cases: [(&[&str], ConfigError); 5] = [
            (&[], ConfigError::NoMode),
            (&["--fly", "--calibrate-gravity"], ConfigError::ConflictingModes),
            (&["--test-case", "1"], ConfigError::MissingHoverTarget),
            (&["--test-case", "3"], ConfigError::UnknownTestCase(3)),
            (
                &["--fly", "--hover-target", "1001"],
                ConfigError::HoverOutOfRange(1001),
            ),
        ];
        for (args, expected) in cases {
            assert_eq!(build_config(&parse(args)).unwrap_err(), expected);
        }

        assert!(matches!(
            build_config(&parse(&["--fly", "--tau", "0"])),
            Err(ConfigError::NonPositive { .. })
        ));
        assert!(matches!(
            build_config(&parse(&["--fly", "--filter-cutoff", "30"])),
            Err(ConfigError::CutoffAboveNyquist { .. })
        ));
        assert!(matches!(
            build_config(&parse(&["--fly", "--min-pulse", "2000"])),
            Err(ConfigError::PulseRange { .. })
        ));
    }

    #[test]
    fn test_calibrate_gravity_appends_record() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("gravity.csv");
        let file_arg = file.to_str().unwrap();

        for _ in 0..2 {
            let args = parse(&[
                "--calibrate-gravity",
                "--calibration-file",
                file_arg,
                "--esc-settle",
                "0",
            ]);
            let config = build_config(&args).unwrap();
            let outcome = run_mode(&args, config, CancelToken::new()).unwrap();
            assert_eq!(outcome, Outcome::Completed);
        }

        let records = read_records(&file).unwrap();
        assert_eq!(records.len(), 2);
        assert!((records[0].z - 16384.0).abs() < 600.0);
    }

    #[test]
    fn test_calibration_write_failure() {
        let dir = tempfile::tempdir().unwrap();
        // A directory cannot be opened for append
        let args = parse(&[
            "--calibrate-gravity",
            "--calibration-file",
            dir.path().to_str().unwrap(),
            "--esc-settle",
            "0",
        ]);
        let config = build_config(&args).unwrap();
        let outcome = run_mode(&args, config, CancelToken::new()).unwrap();
        assert_eq!(outcome, Outcome::CalibrationFailed);
    }

    #[test]
    fn test_flight_writes_diagnostics() {
        let dir = tempfile::tempdir().unwrap();
        let csv_path = dir.path().join("flight.csv");
        let args = parse(&[
            "--test-case",
            "2",
            "--warmup",
            "2",
            "--filter-cutoff",
            "2",
            "--esc-settle",
            "0",
            "--diagnostics",
            csv_path.to_str().unwrap(),
            "--calibration-file",
            dir.path().join("missing.csv").to_str().unwrap(),
        ]);
        let config = build_config(&args).unwrap();
        assert_eq!(run_mode(&args, config, CancelToken::new()).unwrap(), Outcome::Completed);

        let mut reader = csv::Reader::from_path(&csv_path).unwrap();
        let headers = reader.headers().unwrap().clone();
        assert!(headers.iter().any(|h| h == "fl_pulse"));
        assert!(headers.iter().any(|h| h == "pr_target"));

        let rows: Vec<_> = reader.records().map(|r| r.unwrap()).collect();
        // ramp (1 s) plus plan (9 s) at 50 Hz
        assert!(rows.len() > 450, "rows {}", rows.len());

        let pr_target = headers.iter().position(|h| h == "pr_target").unwrap();
        for row in &rows {
            let target: f64 = row[pr_target].parse().unwrap();
            assert_eq!(target, 0.0);
        }
    }
}
