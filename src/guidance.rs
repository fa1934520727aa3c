//! Waypoint following and obstacle avoidance.
//!
//! [`GuidanceFsm::step`] is the whole state machine: it takes the latest pose,
//! obstacle readings and loop period, and returns what the rover should do
//! this cycle along with the state it moved to. It never sleeps or reads a
//! clock, so it behaves identically under test and on the vehicle.

use nalgebra as na;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::*;

use crate::{
    corrector::{Corrector, Gains},
    driver::{LinkMode, ObstacleReadings},
    error::ConfigError,
    odometry::MotionMode,
    pose::{segment_heading, shortest_angle_diff, wrap_angle, Pose},
    saturator::{Saturator, WheelSetpoints},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum GuidanceState {
    /// Drive towards the active waypoint.
    #[default]
    GoTo,
    /// Pivot onto the next leg after reaching a waypoint.
    Turn,
    /// Pivot away from an obstacle.
    Deviation,
    /// Back away from an obstacle.
    Recul,
    /// Drive clear of an obstacle on the deviation heading.
    Recover,
    /// All waypoints reached.
    End,
    /// Operator stop, shuts the rover down.
    Stop,
}

impl fmt::Display for GuidanceState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Deserialize, Debug, Clone)]
pub struct GuidanceConfig {
    pub waypoints: Vec<na::Point2<f32>>,
    /// meters
    pub position_precision: f32,
    /// radians
    pub angular_precision: f32,
    /// meters
    pub obstacle_stop_distance: f32,
    /// radians turned away from an obstacle
    pub avoidance_angle: f32,
    /// seconds spent reversing
    pub reverse_duration: f32,
    /// seconds spent driving clear after a deviation
    pub recover_duration: f32,
    pub cruise_speed: f32,
    pub pivot_speed: f32,
    /// usually negative
    pub reverse_speed: f32,
    pub heading_gains: Gains,
    #[serde(default = "default_anti_windup")]
    pub anti_windup: bool,
    pub forward: Saturator,
    pub reverse: Saturator,
}

fn default_anti_windup() -> bool {
    true
}

impl GuidanceConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.waypoints.is_empty() {
            return Err(ConfigError::NoWaypoints);
        }
        for (name, value) in [
            ("guidance.position_precision", self.position_precision),
            ("guidance.angular_precision", self.angular_precision),
            ("guidance.obstacle_stop_distance", self.obstacle_stop_distance),
        ] {
            if !(value.is_finite() && value > 0.0) {
                return Err(ConfigError::NotPositive { name, value });
            }
        }
        for (name, value) in [
            ("guidance.reverse_duration", self.reverse_duration),
            ("guidance.recover_duration", self.recover_duration),
            ("guidance.pivot_speed", self.pivot_speed),
            ("guidance.cruise_speed", self.cruise_speed),
        ] {
            if !(value.is_finite() && value >= 0.0) {
                return Err(ConfigError::Negative { name, value });
            }
        }
        self.forward.validate("guidance.forward")?;
        self.reverse.validate("guidance.reverse")?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct GuidanceInput {
    pub pose: Pose,
    pub obstacles: ObstacleReadings,
    /// duration of the previous guidance iteration in seconds
    pub dt: f32,
    pub stop_requested: bool,
}

/// Everything a single step decided.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GuidanceOutput {
    pub setpoints: WheelSetpoints,
    pub motion: MotionMode,
    pub link_mode: LinkMode,
    pub target_heading: Option<f32>,
    pub heading_error: Option<f32>,
    /// state after this step
    pub state: GuidanceState,
    pub waypoint_index: usize,
    pub shutdown: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PivotDirection {
    Left,
    Right,
}

impl PivotDirection {
    /// Positive errors pivot left. Zero pivots right.
    pub fn from_error(error: f32) -> Self {
        if 0.0 < error {
            PivotDirection::Left
        } else {
            PivotDirection::Right
        }
    }
}

struct Command {
    setpoints: WheelSetpoints,
    motion: MotionMode,
    link_mode: LinkMode,
    target_heading: Option<f32>,
    heading_error: Option<f32>,
}

impl Command {
    fn halt(link_mode: LinkMode) -> Self {
        Self {
            setpoints: WheelSetpoints::zero(),
            motion: MotionMode::Forward,
            link_mode,
            target_heading: None,
            heading_error: None,
        }
    }

    fn aimed(mut self, target: f32, error: f32) -> Self {
        self.target_heading = Some(target);
        self.heading_error = Some(error);
        self
    }
}

pub struct GuidanceFsm {
    config: GuidanceConfig,
    state: GuidanceState,
    waypoint_index: usize,
    iterations: u32,
    heading_snapshot: f32,
    obstacle_snapshot: ObstacleReadings,
    deviation_heading: f32,
    waypoint_corrector: Corrector,
    avoidance_corrector: Corrector,
}

impl GuidanceFsm {
    pub fn new(config: GuidanceConfig, initial_pose: Pose) -> Self {
        let initial_error = config
            .waypoints
            .first()
            .map(|waypoint| {
                shortest_angle_diff(initial_pose.bearing_to(waypoint), initial_pose.heading())
            })
            .unwrap_or_default();
        let mut waypoint_corrector = Corrector::new(config.heading_gains, initial_error);
        let mut avoidance_corrector = Corrector::new(config.heading_gains, 0.0);
        if config.anti_windup {
            // both correctors steer around cruise speed
            let limit = config.forward.headroom(config.cruise_speed);
            waypoint_corrector = waypoint_corrector.with_anti_windup(limit);
            avoidance_corrector = avoidance_corrector.with_anti_windup(limit);
        }
        Self {
            config,
            state: GuidanceState::GoTo,
            waypoint_index: 0,
            iterations: 0,
            heading_snapshot: initial_pose.heading(),
            obstacle_snapshot: ObstacleReadings::default(),
            deviation_heading: initial_pose.heading(),
            waypoint_corrector,
            avoidance_corrector,
        }
    }

    pub fn state(&self) -> GuidanceState {
        self.state
    }

    pub fn waypoint_index(&self) -> usize {
        self.waypoint_index
    }

    pub fn step(&mut self, input: &GuidanceInput) -> GuidanceOutput {
        if input.stop_requested && self.state != GuidanceState::Stop {
            self.transition(GuidanceState::Stop);
        }
        let command = match self.state {
            GuidanceState::GoTo => self.go_to(input),
            GuidanceState::Turn => self.turn(input),
            GuidanceState::Deviation => self.deviate(input),
            GuidanceState::Recul => self.reverse(input),
            GuidanceState::Recover => self.recover(input),
            GuidanceState::End => Command::halt(LinkMode::Terminal),
            GuidanceState::Stop => Command::halt(LinkMode::Terminal),
        };
        GuidanceOutput {
            setpoints: command.setpoints,
            motion: command.motion,
            link_mode: command.link_mode,
            target_heading: command.target_heading,
            heading_error: command.heading_error,
            state: self.state,
            waypoint_index: self.waypoint_index,
            shutdown: self.state == GuidanceState::Stop,
        }
    }

    fn transition(&mut self, next: GuidanceState) {
        info!("Guidance {} -> {}", self.state, next);
        self.state = next;
    }

    fn elapsed(&self, dt: f32) -> f32 {
        self.iterations as f32 * dt
    }

    fn start_reversing(&mut self, obstacles: ObstacleReadings) {
        debug!(
            left = obstacles.left,
            right = obstacles.right,
            "Obstacle within stop distance"
        );
        self.obstacle_snapshot = obstacles;
        self.iterations = 0;
        self.transition(GuidanceState::Recul);
    }

    fn pivot(&self, target: f32, error: f32) -> Command {
        let (differential, motion) = match PivotDirection::from_error(error) {
            PivotDirection::Left => (self.config.pivot_speed, MotionMode::PivotLeft),
            PivotDirection::Right => (-self.config.pivot_speed, MotionMode::PivotRight),
        };
        Command {
            setpoints: self.config.forward.combine(0.0, differential),
            motion,
            link_mode: LinkMode::Turning,
            target_heading: None,
            heading_error: None,
        }
        .aimed(target, error)
    }

    fn drive(&self, differential: f32) -> Command {
        Command {
            setpoints: self
                .config
                .forward
                .combine(self.config.cruise_speed, differential),
            motion: MotionMode::Forward,
            link_mode: LinkMode::Normal,
            target_heading: None,
            heading_error: None,
        }
    }

    fn go_to(&mut self, input: &GuidanceInput) -> Command {
        let Some(waypoint) = self.config.waypoints.get(self.waypoint_index).copied() else {
            self.transition(GuidanceState::End);
            return Command::halt(LinkMode::Terminal);
        };

        if input.obstacles.closer_than(self.config.obstacle_stop_distance) {
            self.start_reversing(input.obstacles);
            return Command::halt(LinkMode::Normal);
        }

        if input.pose.distance_to(&waypoint) <= self.config.position_precision {
            info!(
                "Reached waypoint {} [{}, {}] at {}",
                self.waypoint_index, waypoint.x, waypoint.y, input.pose
            );
            self.heading_snapshot = input.pose.heading();
            self.waypoint_index += 1;
            if self.waypoint_index == self.config.waypoints.len() {
                self.transition(GuidanceState::End);
                return Command::halt(LinkMode::Terminal);
            }
            self.transition(GuidanceState::Turn);
            return Command::halt(LinkMode::Normal);
        }

        let target = input.pose.bearing_to(&waypoint);
        let error = shortest_angle_diff(target, input.pose.heading());
        let correction = self.waypoint_corrector.update(error, input.dt);
        self.drive(correction).aimed(target, error)
    }

    /// Heading of the leg from the waypoint just reached to the next one.
    fn next_leg_heading(&self) -> f32 {
        let waypoints = &self.config.waypoints;
        match (
            self.waypoint_index
                .checked_sub(1)
                .and_then(|index| waypoints.get(index)),
            waypoints.get(self.waypoint_index),
        ) {
            (Some(from), Some(to)) => segment_heading(from, to, self.heading_snapshot),
            _ => self.heading_snapshot,
        }
    }

    fn turn(&mut self, input: &GuidanceInput) -> Command {
        let target = self.next_leg_heading();
        let error = shortest_angle_diff(target, input.pose.heading());
        let command = self.pivot(target, error);
        if error.abs() <= self.config.angular_precision {
            self.transition(GuidanceState::GoTo);
        }
        command
    }

    fn deviate(&mut self, input: &GuidanceInput) -> Command {
        let target = self.deviation_heading;
        let error = shortest_angle_diff(target, input.pose.heading());
        let command = self.pivot(target, error);
        if error.abs() <= self.config.angular_precision {
            self.iterations = 0;
            self.transition(GuidanceState::Recover);
        }
        command
    }

    fn reverse(&mut self, input: &GuidanceInput) -> Command {
        self.iterations += 1;
        let command = Command {
            setpoints: self.config.reverse.combine(self.config.reverse_speed, 0.0),
            motion: MotionMode::Reverse,
            link_mode: LinkMode::Normal,
            target_heading: None,
            heading_error: None,
        };
        if self.elapsed(input.dt) > self.config.reverse_duration {
            self.iterations = 0;
            self.heading_snapshot = input.pose.heading();
            // turn away from the closer obstacle
            let avoidance = if self.obstacle_snapshot.left <= self.obstacle_snapshot.right {
                -self.config.avoidance_angle
            } else {
                self.config.avoidance_angle
            };
            self.deviation_heading = wrap_angle(self.heading_snapshot + avoidance);
            self.transition(GuidanceState::Deviation);
        }
        command
    }

    fn recover(&mut self, input: &GuidanceInput) -> Command {
        if input.obstacles.closer_than(self.config.obstacle_stop_distance) {
            self.start_reversing(input.obstacles);
            return Command::halt(LinkMode::Normal);
        }
        self.iterations += 1;
        let target = self.deviation_heading;
        let error = shortest_angle_diff(target, input.pose.heading());
        let correction = self.avoidance_corrector.update(error, input.dt);
        let command = self.drive(correction).aimed(target, error);
        if self.elapsed(input.dt) > self.config.recover_duration {
            self.iterations = 0;
            self.transition(GuidanceState::GoTo);
        }
        command
    }
}
