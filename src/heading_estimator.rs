use serde::{Deserialize, Serialize};

use crate::{
    error::ConfigError,
    pose::{shortest_angle_diff, wrap_angle},
};

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EstimatorMode {
    /// Integrate wheel odometry only.
    OdometryOnly,
    /// Predict from wheel odometry, correct with the gyro heading.
    Fused,
}

#[derive(Deserialize, Debug, Clone)]
pub struct EstimatorConfig {
    pub mode: EstimatorMode,
    /// heading variance added per prediction (rad^2)
    pub process_noise: f32,
    /// gyro heading variance (rad^2)
    pub measurement_noise: f32,
    #[serde(default = "default_initial_variance")]
    pub initial_variance: f32,
    #[serde(default = "default_acceleration_window")]
    pub acceleration_window: usize,
    #[serde(default = "default_acceleration_scale")]
    pub acceleration_scale: f32,
}

fn default_initial_variance() -> f32 {
    0.01
}

fn default_acceleration_window() -> usize {
    5
}

fn default_acceleration_scale() -> f32 {
    10.0
}

impl EstimatorConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("estimator.process_noise", self.process_noise),
            ("estimator.measurement_noise", self.measurement_noise),
        ] {
            if !(value.is_finite() && value > 0.0) {
                return Err(ConfigError::NotPositive { name, value });
            }
        }
        if !(self.initial_variance.is_finite() && self.initial_variance >= 0.0) {
            return Err(ConfigError::Negative {
                name: "estimator.initial_variance",
                value: self.initial_variance,
            });
        }
        if self.acceleration_window == 0 {
            return Err(ConfigError::ZeroCount("estimator.acceleration_window"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct HeadingEstimate {
    /// heading used for guidance and dead reckoning
    pub fused: f32,
    /// wheel odometry integrated on its own
    pub odometry: f32,
    /// last gyro heading, relative to the start heading
    pub gyro: Option<f32>,
    pub variance: f32,
}

/// One dimensional Kalman filter on heading.
#[derive(Debug, Clone)]
pub struct HeadingEstimator {
    mode: EstimatorMode,
    process_noise: f32,
    measurement_noise: f32,
    heading: f32,
    odometry_heading: f32,
    variance: f32,
    gyro_heading: Option<f32>,
    yaw_offset: Option<f32>,
}

impl HeadingEstimator {
    pub fn new(config: &EstimatorConfig, initial_heading: f32) -> Self {
        let initial_heading = wrap_angle(initial_heading);
        Self {
            mode: config.mode,
            process_noise: config.process_noise,
            measurement_noise: config.measurement_noise,
            heading: initial_heading,
            odometry_heading: initial_heading,
            variance: config.initial_variance,
            gyro_heading: None,
            yaw_offset: None,
        }
    }

    pub fn heading(&self) -> f32 {
        self.heading
    }

    pub fn estimate(&self) -> HeadingEstimate {
        HeadingEstimate {
            fused: self.heading,
            odometry: self.odometry_heading,
            gyro: self.gyro_heading,
            variance: self.variance,
        }
    }

    /// Propagate with the heading change measured by the wheels.
    pub fn predict(&mut self, delta_heading: f32) {
        self.odometry_heading = wrap_angle(self.odometry_heading + delta_heading);
        self.heading = wrap_angle(self.heading + delta_heading);
        if self.mode == EstimatorMode::Fused {
            self.variance += self.process_noise;
        }
    }

    /// Blend in an absolute yaw reading.
    ///
    /// The first reading defines the yaw offset, so the gyro heading starts out
    /// equal to the current estimate. In odometry-only mode the reading is kept
    /// for diagnostics and nothing else.
    pub fn correct(&mut self, raw_yaw: f32) {
        let offset = *self
            .yaw_offset
            .get_or_insert_with(|| wrap_angle(raw_yaw - self.heading));
        let measured = wrap_angle(raw_yaw - offset);
        self.gyro_heading = Some(measured);

        if self.mode == EstimatorMode::Fused {
            let gain = self.variance / (self.variance + self.measurement_noise);
            let innovation = shortest_angle_diff(measured, self.heading);
            self.heading = wrap_angle(self.heading + gain * innovation);
            self.variance *= 1.0 - gain;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f32::consts::PI;

    fn config(mode: EstimatorMode) -> EstimatorConfig {
        EstimatorConfig {
            mode,
            process_noise: 0.01,
            measurement_noise: 0.01,
            initial_variance: 0.0,
            acceleration_window: 5,
            acceleration_scale: 10.0,
        }
    }

    #[test]
    fn odometry_only_integrates_and_wraps() {
        let mut estimator = HeadingEstimator::new(&config(EstimatorMode::OdometryOnly), 3.0);
        estimator.predict(0.5);
        assert_relative_eq!(estimator.heading(), 3.5 - 2.0 * PI, epsilon = 1e-5);
        estimator.correct(1.0);
        estimator.correct(2.0);
        assert_relative_eq!(estimator.heading(), 3.5 - 2.0 * PI, epsilon = 1e-5);
        assert_relative_eq!(estimator.estimate().gyro.unwrap(), 4.5 - 2.0 * PI, epsilon = 1e-5);
    }

    #[test]
    fn first_gyro_reading_aligns_with_estimate() {
        let mut estimator = HeadingEstimator::new(&config(EstimatorMode::Fused), 0.0);
        estimator.correct(1.2);
        assert_relative_eq!(estimator.estimate().gyro.unwrap(), 0.0);
        assert_relative_eq!(estimator.heading(), 0.0);
    }

    #[test]
    fn equal_noise_splits_the_difference() {
        let mut estimator = HeadingEstimator::new(&config(EstimatorMode::Fused), 0.0);
        estimator.correct(0.0);
        // odometry says 0.2, gyro says 0.0, P = Q = R
        estimator.predict(0.2);
        estimator.correct(0.0);
        assert_relative_eq!(estimator.heading(), 0.1, epsilon = 1e-6);
        assert_relative_eq!(estimator.estimate().odometry, 0.2);
        assert_relative_eq!(estimator.estimate().variance, 0.005, epsilon = 1e-6);
    }

    #[test]
    fn fusion_takes_short_way_round() {
        let mut estimator = HeadingEstimator::new(&config(EstimatorMode::Fused), 0.0);
        estimator.correct(0.0);
        estimator.predict(PI - 0.05);
        estimator.correct(-PI + 0.05);
        let heading = estimator.heading();
        assert!(heading.abs() > PI - 0.1, "{}", heading);
    }

    #[test]
    fn prediction_alone_tracks_odometry() {
        let mut estimator = HeadingEstimator::new(&config(EstimatorMode::Fused), 0.0);
        for _ in 0..10 {
            estimator.predict(0.1);
        }
        assert_relative_eq!(estimator.heading(), 1.0, epsilon = 1e-5);
        assert_relative_eq!(estimator.estimate().odometry, 1.0, epsilon = 1e-5);
    }
}
