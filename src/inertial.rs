use std::collections::VecDeque;

use crate::error::SensorError;

/// Orientation and acceleration source polled once per navigation cycle.
pub trait InertialSensor: Send {
    /// Absolute yaw in radians, counter-clockwise positive.
    fn read_orientation(&mut self) -> Result<f32, SensorError>;

    /// Planar acceleration in sensor units.
    fn read_acceleration(&mut self) -> Result<(f32, f32), SensorError>;

    fn read_temperature(&mut self) -> Option<f32> {
        None
    }
}

/// Stand-in for rovers without an inertial unit. Every read fails, so the
/// heading estimator runs on wheel odometry alone.
#[derive(Debug, Default)]
pub struct NoInertialSensor;

impl InertialSensor for NoInertialSensor {
    fn read_orientation(&mut self) -> Result<f32, SensorError> {
        Err(SensorError::NotAvailable)
    }

    fn read_acceleration(&mut self) -> Result<(f32, f32), SensorError> {
        Err(SensorError::NotAvailable)
    }
}

/// Moving average over the last `window` acceleration samples.
#[derive(Debug, Clone)]
pub struct AccelerationFilter {
    window: usize,
    scale: f32,
    samples: VecDeque<(f32, f32)>,
}

impl AccelerationFilter {
    pub fn new(window: usize, scale: f32) -> Self {
        let window = window.max(1);
        Self {
            window,
            scale,
            samples: VecDeque::with_capacity(window),
        }
    }

    pub fn push(&mut self, (ax, ay): (f32, f32)) -> (f32, f32) {
        if self.samples.len() == self.window {
            self.samples.pop_front();
        }
        self.samples.push_back((ax * self.scale, ay * self.scale));
        self.average()
    }

    pub fn average(&self) -> (f32, f32) {
        if self.samples.is_empty() {
            return (0.0, 0.0);
        }
        let (sum_x, sum_y) = self
            .samples
            .iter()
            .fold((0.0, 0.0), |(sx, sy), (x, y)| (sx + x, sy + y));
        let count = self.samples.len() as f32;
        (sum_x / count, sum_y / count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn average_over_window() {
        let mut filter = AccelerationFilter::new(2, 10.0);
        filter.push((1.0, 0.0));
        filter.push((3.0, 1.0));
        let (ax, ay) = filter.push((5.0, 1.0));
        assert_relative_eq!(ax, 40.0);
        assert_relative_eq!(ay, 10.0);
    }

    #[test]
    fn empty_filter_reads_zero() {
        assert_eq!(AccelerationFilter::new(3, 1.0).average(), (0.0, 0.0));
    }

    #[test]
    fn missing_sensor_reports_unavailable() {
        let mut sensor = NoInertialSensor;
        assert!(matches!(
            sensor.read_orientation(),
            Err(SensorError::NotAvailable)
        ));
        assert_eq!(sensor.read_temperature(), None);
    }
}
