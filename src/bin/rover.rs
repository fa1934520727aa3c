use anyhow::Result;
use clap::Parser;
use rover::{
    configuration::AppConfig,
    driver::{ActuatorLink, SerialActuatorLink},
    inertial::{InertialSensor, NoInertialSensor},
    logging,
    pose::Pose,
    rover::{Peripherals, Rover},
    sim::{shared_plant, Plant, SimulatedBoard, SimulatedImu},
    telemetry::TelemetrySink,
};
use std::{path::PathBuf, time::Duration};
use tracing::*;

/// time guidance gets to stop the rover before the loops are torn down
const STOP_GRACE_PERIOD: Duration = Duration::from_secs(2);

#[derive(Parser, Debug)]
#[command(version, author = "David M. Weis <dweis7@gmail.com>", about = "Rover")]
struct Args {
    /// path to config
    #[arg(long)]
    config: Option<PathBuf>,

    /// drive the kinematic simulator instead of the serial board
    #[arg(long)]
    simulate: bool,

    /// Sets the level of verbosity
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbosity: u8,

    /// log as JSON lines
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    logging::setup_tracing(args.verbosity, args.json_logs);

    let app_config = AppConfig::load_config(&args.config)?;

    let (link, imu): (Box<dyn ActuatorLink>, Box<dyn InertialSensor>) = if args.simulate {
        info!("Running against simulator");
        let plant = shared_plant(Plant::new(
            app_config.body,
            app_config.simulation.clone(),
            Pose::default(),
        ));
        (
            Box::new(SimulatedBoard::new(plant.clone())),
            Box::new(SimulatedImu::new(plant)),
        )
    } else {
        let link = SerialActuatorLink::open(&app_config.link.port, app_config.link.baud_rate)?;
        (Box::new(link), Box::new(NoInertialSensor))
    };

    let (telemetry, telemetry_writer) = match &app_config.telemetry.path {
        Some(path) => {
            let (sink, writer) =
                TelemetrySink::to_file(path, app_config.telemetry.queue_size).await?;
            (Some(sink), Some(writer))
        }
        None => (None, None),
    };

    let rover = Rover::new(app_config)?;
    let running = rover.start(Peripherals {
        link,
        imu,
        telemetry,
    });

    let exit = running.exit_flag();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for ctrl-c {}", e);
            return;
        }
        info!("Stop requested");
        exit.request_stop();
        tokio::time::sleep(STOP_GRACE_PERIOD).await;
        if !exit.is_raised() {
            warn!("Guidance did not stop in time, forcing exit");
            exit.raise();
        }
    });

    let guidance = running.guidance();
    running.join().await?;
    if let Some(writer) = telemetry_writer {
        writer.await?;
    }
    info!("Finished in state {}", guidance.latest().state);
    Ok(())
}
