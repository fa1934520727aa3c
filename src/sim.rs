//! Kinematic simulator used for dry runs and tests.
//!
//! A [`Plant`] holds the true pose of the rover. [`SimulatedBoard`] and
//! [`SimulatedImu`] share one plant and stand in for the motor control board
//! and the inertial unit.

use async_trait::async_trait;
use nalgebra as na;
use serde::Deserialize;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::time::Instant;

use crate::{
    driver::{ActuatorLink, ObstacleReadings, SetpointFrame, TelemetryFrame, WheelRates},
    error::{LinkError, SensorError},
    inertial::InertialSensor,
    odometry::BodyConfig,
    pose::{shortest_angle_diff, wrap_angle, Pose},
};

const GRAVITY: f32 = 9.81;

#[derive(Deserialize, Debug, Clone)]
pub struct SimulationConfig {
    /// point obstacles in world frame
    #[serde(default)]
    pub obstacles: Vec<na::Point2<f32>>,
    #[serde(default)]
    pub obstacle_radius: f32,
    /// raw gyro yaw when the rover faces +x
    #[serde(default)]
    pub yaw_offset: f32,
    /// half angle of each distance sensor's field of view
    #[serde(default = "default_sensor_fov")]
    pub sensor_fov: f32,
    #[serde(default = "default_sensor_range")]
    pub sensor_range: f32,
}

fn default_sensor_fov() -> f32 {
    30_f32.to_radians()
}

fn default_sensor_range() -> f32 {
    2.0
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            obstacles: vec![],
            obstacle_radius: 0.0,
            yaw_offset: 0.0,
            sensor_fov: default_sensor_fov(),
            sensor_range: default_sensor_range(),
        }
    }
}

/// Ground truth differential drive kinematics.
#[derive(Debug, Clone)]
pub struct Plant {
    body: BodyConfig,
    config: SimulationConfig,
    pose: Pose,
    speed: f32,
    acceleration: (f32, f32),
}

impl Plant {
    pub fn new(body: BodyConfig, config: SimulationConfig, pose: Pose) -> Self {
        Self {
            body,
            config,
            pose,
            speed: 0.0,
            acceleration: (0.0, 0.0),
        }
    }

    pub fn pose(&self) -> Pose {
        self.pose
    }

    /// Drive the wheels at signed `left`/`right` board rates for `dt` seconds.
    pub fn advance(&mut self, left: f32, right: f32, dt: f32) {
        if !(dt.is_finite() && dt > 0.0) {
            return;
        }
        let scale = self.body.wheel_radius * dt * self.body.rate_to_rad_per_sec;
        let distance = scale * (left + right) / 2.0;
        let heading_change = scale * (right - left) / self.body.track_width;
        let speed = distance / dt;
        // body frame, in g
        self.acceleration = (
            (speed - self.speed) / dt / GRAVITY,
            speed * heading_change / dt / GRAVITY,
        );
        self.speed = speed;
        self.pose = self
            .pose
            .advance(distance, self.pose.heading() + heading_change);
    }

    /// Nearest obstacle in each sensor's field of view.
    ///
    /// The left sensor covers bearings from dead ahead to `sensor_fov` on the
    /// left, the right sensor the mirror image.
    pub fn obstacle_readings(&self) -> ObstacleReadings {
        let mut readings = ObstacleReadings::default();
        for obstacle in &self.config.obstacles {
            let distance = self.pose.distance_to(obstacle) - self.config.obstacle_radius;
            if distance > self.config.sensor_range {
                continue;
            }
            let bearing = shortest_angle_diff(self.pose.bearing_to(obstacle), self.pose.heading());
            if bearing.abs() > self.config.sensor_fov {
                continue;
            }
            let distance = distance.max(0.0);
            if bearing >= 0.0 {
                readings.left = readings.left.min(distance);
            } else {
                readings.right = readings.right.min(distance);
            }
        }
        readings
    }

    pub fn yaw(&self) -> f32 {
        wrap_angle(self.pose.heading() + self.config.yaw_offset)
    }

    pub fn acceleration(&self) -> (f32, f32) {
        self.acceleration
    }
}

pub type SharedPlant = Arc<Mutex<Plant>>;

pub fn shared_plant(plant: Plant) -> SharedPlant {
    Arc::new(Mutex::new(plant))
}

/// Motor control board that applies setpoints instantly. Each reply carries
/// the wheel rate magnitudes it ran since the previous exchange, as the real
/// board does.
pub struct SimulatedBoard {
    plant: SharedPlant,
    applied: SetpointFrame,
    last_exchange: Option<Instant>,
}

impl SimulatedBoard {
    pub fn new(plant: SharedPlant) -> Self {
        Self {
            plant,
            applied: SetpointFrame::default(),
            last_exchange: None,
        }
    }
}

#[async_trait]
impl ActuatorLink for SimulatedBoard {
    async fn exchange(&mut self, request: SetpointFrame) -> Result<TelemetryFrame, LinkError> {
        let now = Instant::now();
        let mut plant = self.plant.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = self.last_exchange.replace(now) {
            plant.advance(
                self.applied.left,
                self.applied.right,
                (now - previous).as_secs_f32(),
            );
        }
        // measured over the interval that just ended
        let measured = std::mem::replace(&mut self.applied, request);
        Ok(TelemetryFrame {
            rates: WheelRates::new(measured.left.abs(), measured.right.abs()),
            obstacles: plant.obstacle_readings(),
        })
    }
}

pub struct SimulatedImu {
    plant: SharedPlant,
}

impl SimulatedImu {
    pub fn new(plant: SharedPlant) -> Self {
        Self { plant }
    }

    fn plant(&self) -> std::sync::MutexGuard<'_, Plant> {
        self.plant.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl InertialSensor for SimulatedImu {
    fn read_orientation(&mut self) -> Result<f32, SensorError> {
        Ok(self.plant().yaw())
    }

    fn read_acceleration(&mut self) -> Result<(f32, f32), SensorError> {
        Ok(self.plant().acceleration())
    }

    fn read_temperature(&mut self) -> Option<f32> {
        Some(25.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::LinkMode;
    use approx::assert_relative_eq;
    use std::f32::consts::FRAC_PI_2;
    use std::time::Duration;

    fn body() -> BodyConfig {
        BodyConfig {
            wheel_radius: 0.1,
            track_width: 0.3,
            rate_to_rad_per_sec: 1.0,
        }
    }

    fn plant_with(obstacles: &[(f32, f32)]) -> Plant {
        let config = SimulationConfig {
            obstacles: obstacles
                .iter()
                .map(|(x, y)| na::Point2::new(*x, *y))
                .collect(),
            ..Default::default()
        };
        Plant::new(body(), config, Pose::default())
    }

    #[test]
    fn straight_line_motion() {
        let mut plant = plant_with(&[]);
        plant.advance(10.0, 10.0, 1.0);
        assert_relative_eq!(plant.pose().x(), 1.0);
        assert_relative_eq!(plant.pose().heading(), 0.0);
    }

    #[test]
    fn pivot_in_place() {
        let mut plant = plant_with(&[]);
        plant.advance(-1.5 * FRAC_PI_2, 1.5 * FRAC_PI_2, 1.0);
        assert_relative_eq!(plant.pose().x(), 0.0);
        assert_relative_eq!(plant.pose().heading(), FRAC_PI_2, epsilon = 1e-6);
    }

    #[test]
    fn sensors_split_left_and_right() {
        let plant = plant_with(&[(1.0, 0.2), (0.5, -0.1), (-1.0, 0.0), (0.1, 1.0)]);
        let readings = plant.obstacle_readings();
        assert_relative_eq!(readings.left, (1.0_f32 + 0.04).sqrt());
        assert_relative_eq!(readings.right, (0.25_f32 + 0.01).sqrt());
    }

    #[test]
    fn out_of_range_obstacle_not_seen() {
        let plant = plant_with(&[(5.0, 0.0)]);
        assert_eq!(plant.obstacle_readings(), ObstacleReadings::default());
    }

    #[test]
    fn imu_reports_offset_yaw() {
        let config = SimulationConfig {
            yaw_offset: 1.0,
            ..Default::default()
        };
        let plant = shared_plant(Plant::new(body(), config, Pose::new((0.0, 0.0), 0.5)));
        let mut imu = SimulatedImu::new(plant);
        assert_relative_eq!(imu.read_orientation().unwrap(), 1.5);
    }

    #[tokio::test(start_paused = true)]
    async fn board_applies_setpoints_between_exchanges() {
        let plant = shared_plant(plant_with(&[]));
        let mut board = SimulatedBoard::new(plant.clone());
        let reply = board
            .exchange(SetpointFrame::new(-10.0, -10.0, LinkMode::Normal))
            .await
            .unwrap();
        assert_eq!(reply.rates, WheelRates::default());
        tokio::time::advance(Duration::from_millis(500)).await;
        let reply = board.exchange(SetpointFrame::halt()).await.unwrap();
        assert_eq!(reply.rates, WheelRates::new(10.0, 10.0));
        let reply = board.exchange(SetpointFrame::halt()).await.unwrap();
        assert_eq!(reply.rates, WheelRates::default());
        assert_relative_eq!(plant.lock().unwrap().pose().x(), -0.5, epsilon = 1e-4);
    }
}
