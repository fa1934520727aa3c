use serde::Serialize;

use crate::{
    driver::WheelRates,
    heading_estimator::{EstimatorConfig, HeadingEstimate, HeadingEstimator},
    inertial::AccelerationFilter,
    odometry::{BodyConfig, MotionMode, Odometer},
    pose::Pose,
};

/// Inputs gathered by the navigation loop for one cycle.
#[derive(Debug, Clone, Copy)]
pub struct NavigationInput {
    pub rates: WheelRates,
    pub mode: MotionMode,
    pub dt: f32,
    pub yaw: Option<f32>,
    pub acceleration: Option<(f32, f32)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct NavigationSolution {
    pub pose: Pose,
    pub heading: HeadingEstimate,
    pub acceleration: (f32, f32),
}

/// Dead reckoning on top of the heading estimator.
#[derive(Debug, Clone)]
pub struct Navigator {
    odometer: Odometer,
    estimator: HeadingEstimator,
    acceleration: AccelerationFilter,
    pose: Pose,
}

impl Navigator {
    pub fn new(body: BodyConfig, estimator: &EstimatorConfig, initial_pose: Pose) -> Self {
        Self {
            odometer: Odometer::new(body),
            estimator: HeadingEstimator::new(estimator, initial_pose.heading()),
            acceleration: AccelerationFilter::new(
                estimator.acceleration_window,
                estimator.acceleration_scale,
            ),
            pose: initial_pose,
        }
    }

    pub fn pose(&self) -> Pose {
        self.pose
    }

    pub fn solution(&self) -> NavigationSolution {
        NavigationSolution {
            pose: self.pose,
            heading: self.estimator.estimate(),
            acceleration: self.acceleration.average(),
        }
    }

    pub fn step(&mut self, input: &NavigationInput) -> NavigationSolution {
        let delta = self.odometer.delta(&input.rates, input.mode, input.dt);
        self.estimator.predict(delta.heading);
        if let Some(yaw) = input.yaw {
            self.estimator.correct(yaw);
        }
        if let Some(acceleration) = input.acceleration {
            self.acceleration.push(acceleration);
        }
        self.pose = self.pose.advance(delta.distance, self.estimator.heading());
        self.solution()
    }
}
