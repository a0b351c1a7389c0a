//! Low-pass Butterworth filter built from cascaded second-order sections.

use nalgebra::Vector3;

#[derive(Debug, Clone, Copy)]
struct Section {
    gain: f64,
    d1: f64,
    d2: f64,
    w1: f64,
    w2: f64,
}

impl Section {
    fn step(&mut self, input: f64) -> f64 {
        let w0 = self.d1 * self.w1 + self.d2 * self.w2 + input;
        let output = self.gain * (w0 + 2.0 * self.w1 + self.w2);
        self.w2 = self.w1;
        self.w1 = w0;
        output
    }
}

/// Butterworth low-pass of even `order`, restartable only by rebuilding.
#[derive(Debug, Clone)]
pub struct Butterworth {
    sections: Vec<Section>,
}

impl Butterworth {
    /// Bilinear-transform coefficients for `order / 2` sections (at least one).
    pub fn new(sampling: f64, cutoff: f64, order: usize) -> Self {
        let n = (order / 2).max(1);
        let a = (std::f64::consts::PI * cutoff / sampling).tan();
        let a2 = a * a;

        let sections = (0..n)
            .map(|k| {
                let r = (std::f64::consts::PI * (2.0 * k as f64 + 1.0) / (4.0 * n as f64)).sin();
                let s = a2 + 2.0 * a * r + 1.0;
                Section {
                    gain: a2 / s,
                    d1: 2.0 * (1.0 - a2) / s,
                    d2: -(a2 - 2.0 * a * r + 1.0) / s,
                    w1: 0.0,
                    w2: 0.0,
                }
            })
            .collect();

        Self { sections }
    }

    pub fn order(&self) -> usize {
        self.sections.len() * 2
    }

    pub fn filter(&mut self, input: f64) -> f64 {
        self.sections
            .iter_mut()
            .fold(input, |signal, section| section.step(signal))
    }
}

/// One Butterworth instance per earth axis.
#[derive(Debug, Clone)]
pub struct GravityFilter {
    axes: [Butterworth; 3],
}

impl GravityFilter {
    pub fn new(sampling: f64, cutoff: f64, order: usize) -> Self {
        let f = Butterworth::new(sampling, cutoff, order);
        Self {
            axes: [f.clone(), f.clone(), f],
        }
    }

    pub fn filter(&mut self, v: &Vector3<f64>) -> Vector3<f64> {
        Vector3::new(
            self.axes[0].filter(v.x),
            self.axes[1].filter(v.y),
            self.axes[2].filter(v.z),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dc_gain_unity() {
        // Fast enough cutoff to settle well inside the iteration budget
        let mut f = Butterworth::new(50.0, 5.0, 4);
        let mut out = 0.0;
        for _ in 0..60 {
            out = f.filter(1.0);
        }
        assert!((out - 1.0).abs() < 0.01, "settled at {out}");
    }

    #[test]
    fn test_dc_gain_unity_gravity_cutoff() {
        let mut f = Butterworth::new(50.0, 0.2, 4);
        let mut out = 0.0;
        for _ in 0..5000 {
            out = f.filter(1.0);
        }
        assert!((out - 1.0).abs() < 0.01, "settled at {out}");
    }

    #[test]
    fn test_attenuates_high_frequency() {
        let mut f = Butterworth::new(50.0, 0.2, 4);
        let mut peak: f64 = 0.0;
        for i in 0..2000 {
            // Nyquist-rate alternation
            let x = if i % 2 == 0 { 1.0 } else { -1.0 };
            let y = f.filter(x);
            if i > 500 {
                peak = peak.max(y.abs());
            }
        }
        assert!(peak < 1e-3, "peak {peak}");
    }

    #[test]
    fn test_order_rounding() {
        assert_eq!(Butterworth::new(50.0, 1.0, 4).order(), 4);
        assert_eq!(Butterworth::new(50.0, 1.0, 1).order(), 2);
    }

    #[test]
    fn test_gravity_filter_axes_independent() {
        let mut g = GravityFilter::new(50.0, 5.0, 4);
        let mut out = Vector3::zeros();
        for _ in 0..200 {
            out = g.filter(&Vector3::new(0.0, 0.5, 1.0));
        }
        assert!(out.x.abs() < 1e-12);
        assert!((out.y - 0.5).abs() < 1e-3);
        assert!((out.z - 1.0).abs() < 1e-3);
    }
}
