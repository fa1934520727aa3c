//! Wires guidance, navigation and control together.
//!
//! Each loop runs as its own tokio task on the shared period. Loops talk only
//! through single writer slots from [`crate::shared`], and every loop checks
//! the [`ExitFlag`] at the top of each iteration.

use chrono::Utc;
use serde::Serialize;
use tokio::{task::JoinHandle, time::Instant};
use tracing::*;

use crate::{
    configuration::AppConfig,
    driver::{
        ActuatorLink, ExchangeOutcome, LinkMode, LinkSupervisor, ObstacleReadings,
        SetpointFrame, WheelRates,
    },
    error::ConfigError,
    guidance::{GuidanceFsm, GuidanceInput, GuidanceState},
    inertial::InertialSensor,
    navigation::{NavigationInput, NavigationSolution, Navigator},
    odometry::MotionMode,
    pose::Pose,
    saturator::WheelSetpoints,
    scheduler::PeriodicScheduler,
    shared::{self, ExitFlag, Publisher, Subscriber},
    telemetry::{TelemetryRecord, TelemetrySink},
};

/// Last reply from the motor control board.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct BoardStatus {
    pub rates: WheelRates,
    pub obstacles: ObstacleReadings,
    pub consecutive_failures: u32,
}

/// Latest guidance decision.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct GuidanceStatus {
    pub setpoints: WheelSetpoints,
    pub link_mode: LinkMode,
    pub motion: MotionMode,
    pub state: GuidanceState,
    pub waypoint_index: usize,
    pub target_heading: Option<f32>,
}

/// Hardware, or simulated stand-ins, the loops drive.
pub struct Peripherals {
    pub link: Box<dyn ActuatorLink>,
    pub imu: Box<dyn InertialSensor>,
    pub telemetry: Option<TelemetrySink>,
}

pub struct Rover {
    config: AppConfig,
    exit: ExitFlag,
}

impl Rover {
    pub fn new(config: AppConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            exit: ExitFlag::new(),
        })
    }

    pub fn exit_flag(&self) -> ExitFlag {
        self.exit.clone()
    }

    /// Spawn the three loops. They all start at the same instant, once the
    /// startup delay has passed.
    pub fn start(self, peripherals: Peripherals) -> RunningRover {
        let Rover { config, exit } = self;
        let period = config.timing.period();
        let barrier = Instant::now() + config.timing.startup_delay();
        let initial_pose = Pose::default();
        info!(
            "Starting rover with {} waypoints, loops start in {:?}",
            config.guidance.waypoints.len(),
            config.timing.startup_delay()
        );

        let navigator = Navigator::new(config.body, &config.estimator, initial_pose);
        let (navigation_tx, navigation_rx) = shared::channel(navigator.solution());
        let (board_tx, board_rx) = shared::channel(BoardStatus::default());
        let (guidance_tx, guidance_rx) = shared::channel(GuidanceStatus::default());

        let guidance = tokio::spawn(guidance_loop(
            PeriodicScheduler::new("guidance", period, barrier),
            GuidanceFsm::new(config.guidance.clone(), initial_pose),
            navigation_rx.clone(),
            board_rx.clone(),
            guidance_tx,
            exit.clone(),
        ));
        let navigation = tokio::spawn(navigation_loop(
            PeriodicScheduler::new("navigation", period, barrier),
            navigator,
            peripherals.imu,
            peripherals.telemetry,
            board_rx.clone(),
            guidance_rx.clone(),
            navigation_tx,
            exit.clone(),
        ));
        let control = tokio::spawn(control_loop(
            PeriodicScheduler::new("control", period, barrier),
            LinkSupervisor::new(peripherals.link, &config.link),
            guidance_rx.clone(),
            board_tx,
            exit.clone(),
        ));

        RunningRover {
            exit,
            navigation: navigation_rx,
            board: board_rx,
            guidance: guidance_rx,
            handles: [guidance, navigation, control],
        }
    }
}

pub struct RunningRover {
    exit: ExitFlag,
    navigation: Subscriber<NavigationSolution>,
    board: Subscriber<BoardStatus>,
    guidance: Subscriber<GuidanceStatus>,
    handles: [JoinHandle<()>; 3],
}

impl RunningRover {
    pub fn exit_flag(&self) -> ExitFlag {
        self.exit.clone()
    }

    pub fn navigation(&self) -> Subscriber<NavigationSolution> {
        self.navigation.clone()
    }

    pub fn board(&self) -> Subscriber<BoardStatus> {
        self.board.clone()
    }

    pub fn guidance(&self) -> Subscriber<GuidanceStatus> {
        self.guidance.clone()
    }

    /// Wait for every loop to return.
    pub async fn join(self) -> anyhow::Result<()> {
        for handle in self.handles {
            handle.await?;
        }
        info!("All loops stopped");
        Ok(())
    }
}

async fn guidance_loop(
    mut scheduler: PeriodicScheduler,
    mut fsm: GuidanceFsm,
    navigation: Subscriber<NavigationSolution>,
    board: Subscriber<BoardStatus>,
    publisher: Publisher<GuidanceStatus>,
    exit: ExitFlag,
) {
    scheduler.wait_for_start().await;
    while !exit.is_raised() {
        let dt = scheduler.begin();
        let output = fsm.step(&GuidanceInput {
            pose: navigation.latest().pose,
            obstacles: board.latest().obstacles,
            dt,
            stop_requested: exit.stop_requested(),
        });
        trace!(state = %output.state, error = ?output.heading_error, "Guidance step");
        publisher.publish(GuidanceStatus {
            setpoints: output.setpoints,
            link_mode: output.link_mode,
            motion: output.motion,
            state: output.state,
            waypoint_index: output.waypoint_index,
            target_heading: output.target_heading,
        });
        if output.shutdown {
            info!("Guidance stopped, shutting down");
            exit.raise();
            break;
        }
        scheduler.end().await;
    }
    debug!("Guidance loop exiting after {} cycles", scheduler.cycles());
}

#[allow(clippy::too_many_arguments)]
async fn navigation_loop(
    mut scheduler: PeriodicScheduler,
    mut navigator: Navigator,
    mut imu: Box<dyn InertialSensor>,
    telemetry: Option<TelemetrySink>,
    board: Subscriber<BoardStatus>,
    guidance: Subscriber<GuidanceStatus>,
    publisher: Publisher<NavigationSolution>,
    exit: ExitFlag,
) {
    scheduler.wait_for_start().await;
    let started = Instant::now();
    while !exit.is_raised() {
        let dt = scheduler.begin();
        let board = board.latest();
        let guidance = guidance.latest();

        let yaw = match imu.read_orientation() {
            Ok(yaw) => Some(yaw),
            Err(e) => {
                trace!("No orientation this cycle: {}", e);
                None
            }
        };
        let acceleration = imu.read_acceleration().ok();
        let temperature = imu.read_temperature();

        let solution = navigator.step(&NavigationInput {
            rates: board.rates,
            mode: guidance.motion,
            dt,
            yaw,
            acceleration,
        });
        publisher.publish(solution);

        if let Some(sink) = &telemetry {
            sink.record(TelemetryRecord {
                time: Utc::now(),
                elapsed: started.elapsed().as_secs_f32(),
                dt,
                orientation: yaw,
                acceleration: solution.acceleration,
                temperature,
                pose: solution.pose,
                wheel_rates: board.rates,
                target_heading: guidance.target_heading,
                gyro_heading: solution.heading.gyro,
                odometry_heading: solution.heading.odometry,
                guidance_state: guidance.state,
            });
        }
        scheduler.end().await;
    }
    debug!("Navigation loop exiting at {}", navigator.pose());
}

async fn control_loop(
    mut scheduler: PeriodicScheduler,
    mut link: LinkSupervisor,
    guidance: Subscriber<GuidanceStatus>,
    publisher: Publisher<BoardStatus>,
    exit: ExitFlag,
) {
    scheduler.wait_for_start().await;
    while !exit.is_raised() {
        scheduler.begin();
        let command = guidance.latest();
        let request = SetpointFrame::new(
            command.setpoints.left,
            command.setpoints.right,
            command.link_mode,
        );
        let outcome = link.cycle(request).await;
        let telemetry = outcome.telemetry();
        publisher.publish(BoardStatus {
            rates: telemetry.rates,
            obstacles: telemetry.obstacles,
            consecutive_failures: link.consecutive_failures(),
        });
        if let ExchangeOutcome::Exhausted(_) = outcome {
            error!("Giving up on motor controller link, shutting down");
            exit.raise();
            break;
        }
        scheduler.end().await;
    }

    match link.halt().await {
        Ok(()) => info!("Wheels halted"),
        Err(e) => error!("Failed to send final halt frame: {}", e),
    }
}
