use serde::{Deserialize, Serialize};

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq)]
pub struct Gains {
    pub p: f32,
    pub i: f32,
    pub d: f32,
}

impl Gains {
    pub fn new(p: f32, i: f32, d: f32) -> Self {
        Self { p, i, d }
    }
}

/// PID corrector turning a signed error into a command.
///
/// Integral and previous error are seeded at construction and carried for the
/// whole run. With anti-windup enabled the integral stops accumulating while
/// the raw command would exceed the limit.
#[derive(Debug, Clone)]
pub struct Corrector {
    gains: Gains,
    integral: f32,
    previous_error: f32,
    windup_limit: Option<f32>,
}

impl Corrector {
    pub fn new(gains: Gains, initial_error: f32) -> Self {
        Self {
            gains,
            integral: 0.0,
            previous_error: initial_error,
            windup_limit: None,
        }
    }

    pub fn with_anti_windup(mut self, limit: f32) -> Self {
        self.windup_limit = Some(limit.abs());
        self
    }

    pub fn integral(&self) -> f32 {
        self.integral
    }

    pub fn update(&mut self, error: f32, dt: f32) -> f32 {
        let usable_dt = dt.is_finite() && dt > 0.0;
        let (candidate, derivative) = if usable_dt {
            (
                self.integral + error * dt,
                (error - self.previous_error) / dt,
            )
        } else {
            (self.integral, 0.0)
        };
        self.previous_error = error;

        let proportional = self.gains.p * error + self.gains.d * derivative;
        let command = proportional + self.gains.i * candidate;
        match self.windup_limit {
            Some(limit) if command.abs() > limit => proportional + self.gains.i * self.integral,
            _ => {
                self.integral = candidate;
                command
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn zero_gains_give_zero() {
        let mut corrector = Corrector::new(Gains::new(0.0, 0.0, 0.0), 0.0);
        for (error, dt) in [(1.0, 0.1), (-3.0, 0.1), (10.0, 0.0), (0.5, 0.2)] {
            assert_relative_eq!(corrector.update(error, dt), 0.0);
        }
    }

    #[test]
    fn proportional_integral_derivative_terms() {
        let mut corrector = Corrector::new(Gains::new(2.0, 1.0, 0.5), 0.0);
        // p: 2 * 1, i: 1 * (1 * 0.5), d: 0.5 * (1 - 0) / 0.5
        assert_relative_eq!(corrector.update(1.0, 0.5), 3.5);
        assert_relative_eq!(corrector.integral(), 0.5);
    }

    #[test]
    fn derivative_seeded_from_initial_error() {
        let mut corrector = Corrector::new(Gains::new(0.0, 0.0, 1.0), 2.0);
        assert_relative_eq!(corrector.update(1.0, 0.5), -2.0);
    }

    #[test]
    fn zero_dt_skips_derivative_and_integral() {
        let mut corrector = Corrector::new(Gains::new(1.0, 1.0, 1.0), 5.0);
        let command = corrector.update(1.0, 0.0);
        assert!(command.is_finite());
        assert_relative_eq!(command, 1.0);
        assert_relative_eq!(corrector.integral(), 0.0);
    }

    #[test]
    fn integral_frozen_while_saturated() {
        let mut corrector =
            Corrector::new(Gains::new(10.0, 1.0, 0.0), 1.0).with_anti_windup(5.0);
        corrector.update(1.0, 0.1);
        let after_first = corrector.integral();
        for _ in 0..50 {
            corrector.update(1.0, 0.1);
        }
        assert_relative_eq!(corrector.integral(), after_first);
    }

    #[test]
    fn integral_accumulates_below_limit() {
        let mut corrector =
            Corrector::new(Gains::new(1.0, 1.0, 0.0), 0.1).with_anti_windup(5.0);
        for _ in 0..10 {
            corrector.update(0.1, 0.1);
        }
        assert_relative_eq!(corrector.integral(), 0.1, epsilon = 1e-6);
    }

    #[test]
    fn integral_unbounded_without_anti_windup() {
        let mut corrector = Corrector::new(Gains::new(10.0, 1.0, 0.0), 1.0);
        for _ in 0..10 {
            corrector.update(1.0, 0.1);
        }
        assert_relative_eq!(corrector.integral(), 1.0, epsilon = 1e-5);
    }
}
