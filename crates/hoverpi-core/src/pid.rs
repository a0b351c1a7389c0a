//! Proportional-integral-derivative compute unit, one instance per control axis.

/// Proportional, integral and derivative gains.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PidGains {
    pub p: f64,
    pub i: f64,
    pub d: f64,
}

impl PidGains {
    pub const fn new(p: f64, i: f64, d: f64) -> Self {
        Self { p, i, d }
    }

    pub fn is_finite(&self) -> bool {
        self.p.is_finite() && self.i.is_finite() && self.d.is_finite()
    }
}

/// The three weighted terms of one PID evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PidTerms {
    pub p: f64,
    pub i: f64,
    pub d: f64,
}

impl PidTerms {
    pub fn total(&self) -> f64 {
        self.p + self.i + self.d
    }
}

/// Trapezoidal-integral PID with no integral clamp.
#[derive(Debug, Clone)]
pub struct Pid {
    gains: PidGains,
    last_error: f64,
    integral: f64,
}

impl Pid {
    pub fn new(gains: PidGains) -> Self {
        Self {
            gains,
            last_error: 0.0,
            integral: 0.0,
        }
    }

    /// Evaluate against `target`. `dt` must be strictly positive.
    pub fn compute(&mut self, measured: f64, target: f64, dt: f64) -> PidTerms {
        let error = target - measured;
        self.integral += (error + self.last_error) * dt;
        let derivative = (error - self.last_error) / dt;
        self.last_error = error;

        PidTerms {
            p: self.gains.p * error,
            i: self.gains.i * self.integral,
            d: self.gains.d * derivative,
        }
    }

    /// Accumulated (unweighted) integral error.
    pub fn integral(&self) -> f64 {
        self.integral
    }
}
