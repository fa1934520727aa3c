pub mod serial_link;

pub use serial_link::{FramedActuatorLink, SerialActuatorLink};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::*;

use crate::error::{ConfigError, LinkError};

/// Measured wheel angular velocity in board units.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct WheelRates {
    pub left: f32,
    pub right: f32,
}

impl WheelRates {
    pub fn new(left: f32, right: f32) -> Self {
        Self { left, right }
    }
}

/// Distance to the nearest obstacle seen by each front sensor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ObstacleReadings {
    pub left: f32,
    pub right: f32,
}

impl ObstacleReadings {
    pub fn new(left: f32, right: f32) -> Self {
        Self { left, right }
    }

    pub fn closer_than(&self, distance: f32) -> bool {
        self.left < distance || self.right < distance
    }
}

impl Default for ObstacleReadings {
    /// Nothing in sight until the board says otherwise.
    fn default() -> Self {
        Self {
            left: f32::INFINITY,
            right: f32::INFINITY,
        }
    }
}

/// Motion intent forwarded to the board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum LinkMode {
    #[default]
    Normal = 0,
    Turning = 1,
    Terminal = 2,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SetpointFrame {
    pub left: f32,
    pub right: f32,
    pub mode: LinkMode,
}

impl SetpointFrame {
    pub fn new(left: f32, right: f32, mode: LinkMode) -> Self {
        Self { left, right, mode }
    }

    pub fn halt() -> Self {
        Self::new(0.0, 0.0, LinkMode::Terminal)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TelemetryFrame {
    pub rates: WheelRates,
    pub obstacles: ObstacleReadings,
}

#[async_trait]
pub trait ActuatorLink: Send {
    /// Send one setpoint frame and wait for the board's reply.
    async fn exchange(&mut self, request: SetpointFrame) -> Result<TelemetryFrame, LinkError>;
}

#[derive(Deserialize, Debug, Clone)]
pub struct LinkConfig {
    pub port: String,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// seconds allowed for a single attempt
    pub exchange_timeout: f32,
    /// extra attempts within one cycle
    #[serde(default)]
    pub max_retries: u32,
    pub max_consecutive_failures: u32,
}

fn default_baud_rate() -> u32 {
    115200
}

impl LinkConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.exchange_timeout.is_finite() && self.exchange_timeout > 0.0) {
            return Err(ConfigError::NotPositive {
                name: "link.exchange_timeout",
                value: self.exchange_timeout,
            });
        }
        if self.max_consecutive_failures == 0 {
            return Err(ConfigError::ZeroCount("link.max_consecutive_failures"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ExchangeOutcome {
    /// Fresh telemetry from the board.
    Updated(TelemetryFrame),
    /// All attempts failed; last known telemetry.
    Retained(TelemetryFrame),
    /// Too many consecutive cycles failed.
    Exhausted(TelemetryFrame),
}

impl ExchangeOutcome {
    pub fn telemetry(&self) -> TelemetryFrame {
        match self {
            ExchangeOutcome::Updated(frame)
            | ExchangeOutcome::Retained(frame)
            | ExchangeOutcome::Exhausted(frame) => *frame,
        }
    }
}

/// Wraps a link with per-attempt timeouts, bounded retries and failure accounting.
pub struct LinkSupervisor {
    link: Box<dyn ActuatorLink>,
    timeout: Duration,
    max_retries: u32,
    max_consecutive_failures: u32,
    consecutive_failures: u32,
    last: TelemetryFrame,
}

impl LinkSupervisor {
    pub fn new(link: Box<dyn ActuatorLink>, config: &LinkConfig) -> Self {
        Self {
            link,
            timeout: Duration::from_secs_f32(config.exchange_timeout),
            max_retries: config.max_retries,
            max_consecutive_failures: config.max_consecutive_failures,
            consecutive_failures: 0,
            last: TelemetryFrame::default(),
        }
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    async fn attempt(&mut self, request: SetpointFrame) -> Result<TelemetryFrame, LinkError> {
        match tokio::time::timeout(self.timeout, self.link.exchange(request)).await {
            Ok(result) => result,
            Err(_) => Err(LinkError::Timeout),
        }
    }

    pub async fn cycle(&mut self, request: SetpointFrame) -> ExchangeOutcome {
        let mut last_error = None;
        for attempt in 0..=self.max_retries {
            match self.attempt(request).await {
                Ok(frame) => {
                    if self.consecutive_failures > 0 {
                        info!(
                            "Motor controller link recovered after {} failed cycles",
                            self.consecutive_failures
                        );
                    }
                    self.consecutive_failures = 0;
                    self.last = frame;
                    return ExchangeOutcome::Updated(frame);
                }
                Err(err) => {
                    debug!("Exchange attempt {} failed: {}", attempt + 1, err);
                    last_error = Some(err);
                }
            }
        }

        self.consecutive_failures += 1;
        if let Some(err) = last_error {
            warn!(
                failures = self.consecutive_failures,
                "Exchange with motor controller failed: {}", err
            );
        }
        if self.consecutive_failures >= self.max_consecutive_failures {
            error!(
                "Motor controller unreachable for {} consecutive cycles",
                self.consecutive_failures
            );
            ExchangeOutcome::Exhausted(self.last)
        } else {
            ExchangeOutcome::Retained(self.last)
        }
    }

    /// Single attempt at stopping the wheels, used on the way out.
    pub async fn halt(&mut self) -> Result<(), LinkError> {
        self.attempt(SetpointFrame::halt()).await.map(|_| ())
    }
}
