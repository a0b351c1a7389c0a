//! Motor layout and the mixer that turns four control outputs into pulse widths.

use crate::cancel::CancelToken;
use crate::driver::EscDriver;
use std::ops::BitOr;
use std::thread;
use std::time::Duration;
use tracing::info;

// ---------------------------------------------------------------------------
// Layout
// ---------------------------------------------------------------------------

/// Position of a motor on the frame as bit flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MotorLocation(u8);

impl MotorLocation {
    pub const FRONT: Self = Self(0b0001);
    pub const BACK: Self = Self(0b0010);
    pub const LEFT: Self = Self(0b0100);
    pub const RIGHT: Self = Self(0b1000);

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for MotorLocation {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Propeller rotation sense seen from above.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rotation {
    Clockwise,
    Anticlockwise,
}

impl Rotation {
    pub fn label(self) -> &'static str {
        match self {
            Self::Clockwise => "clockwise",
            Self::Anticlockwise => "anticlockwise",
        }
    }
}

/// ESC output pins in front-left, front-right, back-left, back-right order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MotorPins {
    pub front_left: u8,
    pub front_right: u8,
    pub back_left: u8,
    pub back_right: u8,
}

/// Allowed ESC pulse widths (us).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PulseRange {
    pub min: u16,
    pub max: u16,
}

impl Default for PulseRange {
    fn default() -> Self {
        Self {
            min: 1000,
            max: 2000,
        }
    }
}

impl PulseRange {
    /// Pulse width for `spin` above the stopped pulse, rounded and clamped.
    ///
    /// A NaN spin maps to the stopped pulse.
    pub fn pulse_for(&self, spin: f64) -> u16 {
        if spin.is_nan() {
            return self.min;
        }
        let pulse = (self.min as f64 + spin).round();
        pulse.clamp(self.min as f64, self.max as f64) as u16
    }
}

// ---------------------------------------------------------------------------
// Channels
// ---------------------------------------------------------------------------

/// The four scalar outputs of the control cascade.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MixerInput {
    pub vertical: f64,
    pub pitch_rate: f64,
    pub roll_rate: f64,
    pub yaw_rate: f64,
}

#[derive(Debug, Clone)]
pub struct MotorChannel {
    pub name: &'static str,
    pub pin: u8,
    pub location: MotorLocation,
    pub rotation: Rotation,
    pulse_width: u16,
}

impl MotorChannel {
    /// A channel resting at `idle`, the stopped pulse of its ESC.
    pub fn new(
        name: &'static str,
        pin: u8,
        location: MotorLocation,
        rotation: Rotation,
        idle: u16,
    ) -> Self {
        Self {
            name,
            pin,
            location,
            rotation,
            pulse_width: idle,
        }
    }

    /// Spin demand for this motor before clamping.
    ///
    /// Right motors subtract the roll term, back motors add the pitch term,
    /// clockwise motors add the yaw term.
    pub fn mix(&self, input: &MixerInput) -> f64 {
        let mut spin = input.vertical;

        if self.location.contains(MotorLocation::RIGHT) {
            spin -= input.roll_rate;
        } else {
            spin += input.roll_rate;
        }

        if self.location.contains(MotorLocation::BACK) {
            spin += input.pitch_rate;
        } else {
            spin -= input.pitch_rate;
        }

        match self.rotation {
            Rotation::Clockwise => spin += input.yaw_rate,
            Rotation::Anticlockwise => spin -= input.yaw_rate,
        }

        spin
    }

    pub fn pulse_width(&self) -> u16 {
        self.pulse_width
    }
}

// ---------------------------------------------------------------------------
// Motor bank
// ---------------------------------------------------------------------------

/// Timing of the single-motor propeller direction check.
#[derive(Debug, Clone, Copy)]
pub struct SpinCheckTiming {
    pub step: Duration,
    pub step_size: usize,
    pub hold: Duration,
}

impl Default for SpinCheckTiming {
    fn default() -> Self {
        Self {
            step: Duration::from_millis(10),
            step_size: 10,
            hold: Duration::from_secs(5),
        }
    }
}

/// The four motors of an X-frame quad and the ESC driver they write through.
pub struct MotorBank<E> {
    channels: [MotorChannel; 4],
    esc: E,
    range: PulseRange,
}

/// Slice length of cancellable sleeps.
const CANCEL_POLL: Duration = Duration::from_millis(20);

/// Sleep for `duration` unless `cancel` fires first.
fn sleep_unless_cancelled(duration: Duration, cancel: &CancelToken) {
    let mut remaining = duration;
    while !remaining.is_zero() && !cancel.is_cancelled() {
        let slice = remaining.min(CANCEL_POLL);
        thread::sleep(slice);
        remaining -= slice;
    }
}

impl<E: EscDriver> MotorBank<E> {
    /// Build the bank and arm every ESC with the stopped pulse.
    pub fn new(esc: E, pins: MotorPins, range: PulseRange) -> Self {
        use MotorLocation as L;
        let idle = range.min;
        let channels = [
            MotorChannel::new("front-left", pins.front_left, L::FRONT | L::LEFT, Rotation::Anticlockwise, idle),
            MotorChannel::new("front-right", pins.front_right, L::FRONT | L::RIGHT, Rotation::Clockwise, idle),
            MotorChannel::new("back-left", pins.back_left, L::BACK | L::LEFT, Rotation::Clockwise, idle),
            MotorChannel::new("back-right", pins.back_right, L::BACK | L::RIGHT, Rotation::Anticlockwise, idle),
        ];
        let mut bank = Self {
            channels,
            esc,
            range,
        };
        bank.stop_all();
        info!(pulse = idle, "ESCs armed");
        bank
    }

    pub fn channels(&self) -> &[MotorChannel; 4] {
        &self.channels
    }

    pub fn pulse_widths(&self) -> [u16; 4] {
        [
            self.channels[0].pulse_width,
            self.channels[1].pulse_width,
            self.channels[2].pulse_width,
            self.channels[3].pulse_width,
        ]
    }

    /// Mix and write one control cycle's outputs.
    pub fn apply(&mut self, input: &MixerInput) -> [u16; 4] {
        for i in 0..self.channels.len() {
            let spin = self.channels[i].mix(input);
            self.set_spin(i, spin);
        }
        self.pulse_widths()
    }

    /// Drive one motor at `spin` above the stopped pulse.
    pub fn set_spin(&mut self, index: usize, spin: f64) {
        let pulse = self.range.pulse_for(spin);
        let channel = &mut self.channels[index];
        channel.pulse_width = pulse;
        self.esc.set_pulse_width(channel.pin, pulse);
    }

    pub fn stop_all(&mut self) {
        for i in 0..self.channels.len() {
            self.set_spin(i, 0.0);
        }
    }

    /// Spin each motor alone up to `hover`, hold, then stop it.
    ///
    /// Returns early, with every motor stopped, if `cancel` fires.
    pub fn spin_check(&mut self, hover: f64, timing: SpinCheckTiming, cancel: &CancelToken) {
        'motors: for i in 0..self.channels.len() {
            info!(
                motor = self.channels[i].name,
                expected = self.channels[i].rotation.label(),
                "spinning motor"
            );

            for spin in (0..hover.max(0.0) as usize).step_by(timing.step_size.max(1)) {
                if cancel.is_cancelled() {
                    break 'motors;
                }
                self.set_spin(i, spin as f64);
                sleep_unless_cancelled(timing.step, cancel);
            }

            self.set_spin(i, hover);
            sleep_unless_cancelled(timing.hold, cancel);
            self.set_spin(i, 0.0);
        }
        self.stop_all();
    }

    pub fn esc(&self) -> &E {
        &self.esc
    }

    /// Stop every motor and release the ESC outputs.
    pub fn release(&mut self) {
        self.stop_all();
        self.esc.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct RecordingEsc {
        writes: Vec<(u8, u16)>,
        released: bool,
    }

    impl EscDriver for RecordingEsc {
        fn set_pulse_width(&mut self, pin: u8, micros: u16) {
            self.writes.push((pin, micros));
        }

        fn shutdown(&mut self) {
            self.released = true;
        }
    }

    const PINS: MotorPins = MotorPins {
        front_left: 27,
        front_right: 17,
        back_left: 5,
        back_right: 19,
    };

    fn bank() -> MotorBank<RecordingEsc> {
        MotorBank::new(RecordingEsc::default(), PINS, PulseRange::default())
    }

    #[test]
    fn test_sign_table() {
        let input = MixerInput {
            vertical: 1000.0,
            roll_rate: 100.0,
            pitch_rate: 50.0,
            yaw_rate: 20.0,
        };
        let bank = bank();
        let spins: Vec<f64> = bank.channels().iter().map(|c| c.mix(&input)).collect();

        // front-left ACW: +roll -pitch -yaw
        assert_eq!(spins[0], 1030.0);
        // front-right CW: -roll -pitch +yaw
        assert_eq!(spins[1], 870.0);
        // back-left CW: +roll +pitch +yaw
        assert_eq!(spins[2], 1170.0);
        // back-right ACW: -roll +pitch -yaw
        assert_eq!(spins[3], 930.0);
    }

    #[test]
    fn test_new_arms_escs_at_idle() {
        let bank = bank();
        assert_eq!(bank.pulse_widths(), [1000; 4]);
        assert_eq!(bank.esc().writes, vec![(27, 1000), (17, 1000), (5, 1000), (19, 1000)]);
        assert!(bank.channels().iter().all(|c| c.pulse_width() == 1000));
    }

    #[test]
    fn test_apply_clamps_and_writes() {
        let mut bank = bank();
        let pulses = bank.apply(&MixerInput {
            vertical: 500.0,
            roll_rate: 700.0,
            pitch_rate: 0.0,
            yaw_rate: 0.0,
        });
        assert_eq!(pulses, [2000, 1000, 2000, 1000]);
        assert_eq!(&bank.esc().writes[4..], &[(27, 2000), (17, 1000), (5, 2000), (19, 1000)]);
    }

    #[test]
    fn test_pulse_rounding() {
        let range = PulseRange::default();
        assert_eq!(range.pulse_for(600.4), 1600);
        assert_eq!(range.pulse_for(600.6), 1601);
        assert_eq!(range.pulse_for(-50.0), 1000);
    }

    #[test]
    fn test_nan_spin_stops_motor() {
        let range = PulseRange::default();
        assert_eq!(range.pulse_for(f64::NAN), 1000);

        let mut bank = bank();
        let pulses = bank.apply(&MixerInput {
            vertical: f64::NAN,
            ..Default::default()
        });
        assert_eq!(pulses, [1000; 4]);
    }

    #[test]
    fn test_location_flags() {
        let fl = MotorLocation::FRONT | MotorLocation::LEFT;
        assert!(fl.contains(MotorLocation::FRONT));
        assert!(!fl.contains(MotorLocation::RIGHT));
        assert!(fl.contains(MotorLocation::FRONT | MotorLocation::LEFT));
        assert!(!fl.contains(MotorLocation::BACK | MotorLocation::LEFT));
    }

    #[test]
    fn test_release_zeroes_then_shuts_down() {
        let mut bank = bank();
        bank.apply(&MixerInput {
            vertical: 400.0,
            ..Default::default()
        });
        bank.release();
        assert_eq!(bank.pulse_widths(), [1000; 4]);
        assert!(bank.esc().released);
    }

    #[test]
    fn test_spin_check_one_motor_at_a_time() {
        let mut bank = bank();
        let timing = SpinCheckTiming {
            step: Duration::ZERO,
            step_size: 10,
            hold: Duration::ZERO,
        };
        bank.spin_check(30.0, timing, &CancelToken::new());

        // arming writes first
        let writes = &bank.esc().writes[4..];
        // 0, 10, 20 ramp, hover, stop per motor, then the final stop of all four
        assert_eq!(writes.len(), 4 * 5 + 4);
        assert_eq!(&writes[..5], &[(27, 1000), (27, 1010), (27, 1020), (27, 1030), (27, 1000)]);
        assert!(writes[5..10].iter().all(|&(pin, _)| pin == 17));
        assert_eq!(bank.pulse_widths(), [1000; 4]);
    }

    #[test]
    fn test_spin_check_cancelled() {
        let mut bank = bank();
        let cancel = CancelToken::new();
        cancel.cancel();
        bank.spin_check(500.0, SpinCheckTiming::default(), &cancel);
        assert_eq!(bank.esc().writes.len(), 4 + 4);
        assert_eq!(bank.pulse_widths(), [1000; 4]);
    }

    #[test]
    fn test_spin_check_hold_interrupted() {
        let mut bank = bank();
        let cancel = CancelToken::new();
        let timing = SpinCheckTiming {
            step: Duration::ZERO,
            step_size: 100,
            hold: Duration::from_secs(5),
        };

        let trigger = cancel.clone();
        let canceller = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            trigger.cancel();
        });

        let start = std::time::Instant::now();
        bank.spin_check(300.0, timing, &cancel);
        canceller.join().unwrap();

        assert!(start.elapsed() < Duration::from_secs(1));
        assert_eq!(bank.pulse_widths(), [1000; 4]);
    }
}
