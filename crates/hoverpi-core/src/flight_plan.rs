//! Time-indexed sequence of earth-frame velocity targets.

use nalgebra::Vector3;
use tracing::info;

/// One named leg of the flight plan.
#[derive(Debug, Clone, PartialEq)]
pub struct FlightStep {
    pub name: String,
    /// Earth-frame velocity target (m/s)
    pub velocity: Vector3<f64>,
    /// Seconds spent in this step
    pub duration: f64,
}

impl FlightStep {
    pub fn new(name: &str, velocity: Vector3<f64>, duration: f64) -> Self {
        Self {
            name: name.to_string(),
            velocity,
            duration,
        }
    }
}

/// Sequencer over a fixed list of [`FlightStep`]s.
#[derive(Debug, Clone)]
pub struct FlightPlan {
    steps: Vec<FlightStep>,
    elapsed: f64,
    current: Option<usize>,
}

impl Default for FlightPlan {
    /// Climb at 0.75 m/s for 2 s, hover for 5 s, descend for 2 s, stop.
    fn default() -> Self {
        Self::new(vec![
            FlightStep::new("RTF", Vector3::zeros(), 0.0),
            FlightStep::new("ASCENT", Vector3::new(0.0, 0.0, 0.75), 2.0),
            FlightStep::new("HOVER", Vector3::zeros(), 5.0),
            FlightStep::new("DESCENT", Vector3::new(0.0, 0.0, -0.75), 2.0),
            FlightStep::new("STOP", Vector3::zeros(), 0.0),
        ])
    }
}

impl FlightPlan {
    pub fn new(steps: Vec<FlightStep>) -> Self {
        Self {
            steps,
            elapsed: 0.0,
            current: Some(0),
        }
    }

    /// Advance by `dt` and return the active velocity target.
    ///
    /// `None` once elapsed time runs past the last step; the plan stays
    /// terminal from then on.
    pub fn targets(&mut self, dt: f64) -> Option<Vector3<f64>> {
        self.current?;
        self.elapsed += dt;

        let mut cumulative = 0.0;
        let index = self.steps.iter().position(|step| {
            cumulative += step.duration;
            self.elapsed < cumulative
        });

        if index != self.current {
            match index {
                Some(i) => info!(step = %self.steps[i].name, elapsed = self.elapsed, "flight plan step"),
                None => info!(elapsed = self.elapsed, "flight plan complete"),
            }
            self.current = index;
        }

        index.map(|i| self.steps[i].velocity)
    }

    pub fn elapsed(&self) -> f64 {
        self.elapsed
    }

    pub fn current_step(&self) -> Option<&FlightStep> {
        self.current.map(|i| &self.steps[i])
    }

    #[cfg(test)]
    pub fn is_complete(&self) -> bool {
        self.current.is_none()
    }

    /// Sum of all step durations.
    pub fn duration(&self) -> f64 {
        self.steps.iter().map(|s| s.duration).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_plan_lookup() {
        let mut plan = FlightPlan::default();
        assert_eq!(plan.targets(1.0), Some(Vector3::new(0.0, 0.0, 0.75)));
        assert_eq!(plan.current_step().unwrap().name, "ASCENT");

        assert_eq!(plan.targets(7.9), Some(Vector3::new(0.0, 0.0, -0.75)));
        assert!((plan.elapsed() - 8.9).abs() < 1e-12);

        assert_eq!(plan.targets(0.2), None);
        assert!(plan.is_complete());
    }

    #[test]
    fn test_hover_step() {
        let mut plan = FlightPlan::default();
        assert_eq!(plan.targets(4.0), Some(Vector3::zeros()));
        assert_eq!(plan.current_step().unwrap().name, "HOVER");
    }

    #[test]
    fn test_terminal_is_sticky() {
        let mut plan = FlightPlan::default();
        assert_eq!(plan.targets(20.0), None);
        assert_eq!(plan.targets(0.02), None);
        assert!((plan.elapsed() - 20.0).abs() < 1e-12);
    }

    #[test]
    fn test_small_steps_walk_through_plan() {
        let mut plan = FlightPlan::default();
        let dt = 0.02;
        let mut cycles = 0;
        while plan.targets(dt).is_some() {
            cycles += 1;
            assert!(cycles < 1000);
        }
        assert!((plan.elapsed() - plan.duration()).abs() <= dt + 1e-9);
    }

    #[test]
    fn test_empty_plan_is_terminal() {
        let mut plan = FlightPlan::new(Vec::new());
        assert_eq!(plan.targets(0.02), None);
    }
}
