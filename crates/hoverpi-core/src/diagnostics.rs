//! Per-cycle diagnostics record and the sink it is written to.

use crate::control::CascadeOutput;
use crate::error::Result;
use crate::estimator::{AttitudeState, EstimatorUpdate};
use crate::pid::PidTerms;
use crate::sample::MotionSample;
use nalgebra::Vector3;
use serde::Serialize;

/// One control cycle, flattened for tabular output. Angles in degrees.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct DiagnosticRecord {
    pub time: f64,
    pub dt: f64,
    pub loops: u64,
    pub qrx: f64,
    pub qry: f64,
    pub qrz: f64,
    pub qax: f64,
    pub qay: f64,
    pub qaz: f64,
    pub egx: f64,
    pub egy: f64,
    pub egz: f64,
    pub qgx: f64,
    pub qgy: f64,
    pub qgz: f64,
    pub qvx: f64,
    pub qvy: f64,
    pub qvz: f64,
    pub pitch: f64,
    pub roll: f64,
    pub yaw: f64,
    pub evx_target: f64,
    pub qvx_target: f64,
    pub qvx_p: f64,
    pub qvx_i: f64,
    pub qvx_d: f64,
    pub pr_target: f64,
    pub pr_p: f64,
    pub pr_i: f64,
    pub pr_d: f64,
    pub pr_out: f64,
    pub evy_target: f64,
    pub qvy_target: f64,
    pub qvy_p: f64,
    pub qvy_i: f64,
    pub qvy_d: f64,
    pub rr_target: f64,
    pub rr_p: f64,
    pub rr_i: f64,
    pub rr_d: f64,
    pub rr_out: f64,
    pub evz_target: f64,
    pub qvz_target: f64,
    pub qvz_p: f64,
    pub qvz_i: f64,
    pub qvz_d: f64,
    pub vert_out: f64,
    pub ya_p: f64,
    pub ya_i: f64,
    pub ya_d: f64,
    pub yr_target: f64,
    pub yr_p: f64,
    pub yr_i: f64,
    pub yr_d: f64,
    pub yr_out: f64,
    pub fl_pulse: u16,
    pub fr_pulse: u16,
    pub bl_pulse: u16,
    pub br_pulse: u16,
}

/// Borrowed pieces of one cycle that make up a [`DiagnosticRecord`].
pub struct CycleSnapshot<'a> {
    pub time: f64,
    pub sample: &'a MotionSample,
    pub estimate: &'a EstimatorUpdate,
    pub attitude: &'a AttitudeState,
    pub earth_target: Vector3<f64>,
    pub quad_target: Vector3<f64>,
    pub cascade: &'a CascadeOutput,
    pub pulses: [u16; 4],
}

impl DiagnosticRecord {
    pub fn from_cycle(c: &CycleSnapshot<'_>) -> Self {
        let [vx, vy, vz]: [PidTerms; 3] = c.cascade.velocity_terms;
        let out = &c.cascade;

        Self {
            time: c.time,
            dt: c.sample.dt,
            loops: c.sample.raw_count,
            qrx: c.sample.gyro.x,
            qry: c.sample.gyro.y,
            qrz: c.sample.gyro.z,
            qax: c.sample.accel.x,
            qay: c.sample.accel.y,
            qaz: c.sample.accel.z,
            egx: c.estimate.earth_gravity.x,
            egy: c.estimate.earth_gravity.y,
            egz: c.estimate.earth_gravity.z,
            qgx: c.estimate.quad_gravity.x,
            qgy: c.estimate.quad_gravity.y,
            qgz: c.estimate.quad_gravity.z,
            qvx: out.velocity.x,
            qvy: out.velocity.y,
            qvz: out.velocity.z,
            pitch: c.attitude.pitch.to_degrees(),
            roll: c.attitude.roll.to_degrees(),
            yaw: c.attitude.yaw.to_degrees(),
            evx_target: c.earth_target.x,
            qvx_target: c.quad_target.x,
            qvx_p: vx.p,
            qvx_i: vx.i,
            qvx_d: vx.d,
            pr_target: out.pitch_rate_target.to_degrees(),
            pr_p: out.pitch_rate_terms.p,
            pr_i: out.pitch_rate_terms.i,
            pr_d: out.pitch_rate_terms.d,
            pr_out: out.mixer.pitch_rate,
            evy_target: c.earth_target.y,
            qvy_target: c.quad_target.y,
            qvy_p: vy.p,
            qvy_i: vy.i,
            qvy_d: vy.d,
            rr_target: out.roll_rate_target.to_degrees(),
            rr_p: out.roll_rate_terms.p,
            rr_i: out.roll_rate_terms.i,
            rr_d: out.roll_rate_terms.d,
            rr_out: out.mixer.roll_rate,
            evz_target: c.earth_target.z,
            qvz_target: c.quad_target.z,
            qvz_p: vz.p,
            qvz_i: vz.i,
            qvz_d: vz.d,
            vert_out: out.mixer.vertical,
            ya_p: out.yaw_angle_terms.p,
            ya_i: out.yaw_angle_terms.i,
            ya_d: out.yaw_angle_terms.d,
            yr_target: out.yaw_rate_target.to_degrees(),
            yr_p: out.yaw_rate_terms.p,
            yr_i: out.yaw_rate_terms.i,
            yr_d: out.yaw_rate_terms.d,
            yr_out: out.mixer.yaw_rate,
            fl_pulse: c.pulses[0],
            fr_pulse: c.pulses[1],
            bl_pulse: c.pulses[2],
            br_pulse: c.pulses[3],
        }
    }
}

/// Destination for diagnostics records.
pub trait DiagnosticsSink {
    fn record(&mut self, record: &DiagnosticRecord) -> Result<()>;

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

impl DiagnosticsSink for Vec<DiagnosticRecord> {
    fn record(&mut self, record: &DiagnosticRecord) -> Result<()> {
        self.push(record.clone());
        Ok(())
    }
}

/// Sink that drops everything, for runs without diagnostics.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoDiagnostics;

impl DiagnosticsSink for NoDiagnostics {
    fn record(&mut self, _record: &DiagnosticRecord) -> Result<()> {
        Ok(())
    }
}
