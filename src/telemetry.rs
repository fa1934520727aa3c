use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::{
    io::{AsyncWrite, AsyncWriteExt, BufWriter},
    sync::mpsc,
    task::JoinHandle,
};
use tracing::*;

use crate::{driver::WheelRates, guidance::GuidanceState, pose::Pose};

/// One navigation cycle worth of state.
#[derive(Debug, Clone, Serialize)]
pub struct TelemetryRecord {
    pub time: DateTime<Utc>,
    /// seconds since the loops started
    pub elapsed: f32,
    pub dt: f32,
    /// raw yaw from the inertial sensor
    pub orientation: Option<f32>,
    pub acceleration: (f32, f32),
    pub temperature: Option<f32>,
    pub pose: Pose,
    pub wheel_rates: WheelRates,
    pub target_heading: Option<f32>,
    pub gyro_heading: Option<f32>,
    pub odometry_heading: f32,
    pub guidance_state: GuidanceState,
}

#[derive(Deserialize, Debug, Clone)]
pub struct TelemetryConfig {
    /// JSON lines output, disabled when missing
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default = "default_queue_size")]
    pub queue_size: usize,
}

fn default_queue_size() -> usize {
    256
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            path: None,
            queue_size: default_queue_size(),
        }
    }
}

/// Handle used by the navigation loop. Never blocks, drops records when the
/// writer falls behind.
#[derive(Debug, Clone)]
pub struct TelemetrySink {
    sender: mpsc::Sender<TelemetryRecord>,
}

impl TelemetrySink {
    pub fn spawn<W>(writer: W, queue_size: usize) -> (Self, JoinHandle<()>)
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (sender, receiver) = mpsc::channel(queue_size.max(1));
        let handle = tokio::spawn(write_records(BufWriter::new(writer), receiver));
        (Self { sender }, handle)
    }

    pub async fn to_file(path: &Path, queue_size: usize) -> anyhow::Result<(Self, JoinHandle<()>)> {
        let file = tokio::fs::File::create(path).await?;
        info!("Writing telemetry to {:?}", path);
        Ok(Self::spawn(file, queue_size))
    }

    pub fn record(&self, record: TelemetryRecord) {
        match self.sender.try_send(record) {
            Ok(()) => (),
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("Telemetry queue full, dropping record")
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!("Telemetry writer stopped, dropping record")
            }
        }
    }
}

async fn write_records<W>(mut writer: BufWriter<W>, mut receiver: mpsc::Receiver<TelemetryRecord>)
where
    W: AsyncWrite + Unpin,
{
    while let Some(record) = receiver.recv().await {
        let mut line = match serde_json::to_vec(&record) {
            Ok(line) => line,
            Err(e) => {
                warn!("Failed to serialize telemetry record {}", e);
                continue;
            }
        };
        line.push(b'\n');
        if let Err(e) = writer.write_all(&line).await {
            warn!("Failed to write telemetry record {}", e);
            continue;
        }
        // keep the file readable while the rover runs
        if receiver.is_empty() {
            if let Err(e) = writer.flush().await {
                warn!("Failed to flush telemetry {}", e);
            }
        }
    }
    if let Err(e) = writer.shutdown().await {
        warn!("Failed to close telemetry output {}", e);
    }
    debug!("Telemetry writer finished");
}
