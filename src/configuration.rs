use config::Config;
use serde::Deserialize;
use std::{path::PathBuf, time::Duration};
use tracing::*;

use crate::{
    driver::LinkConfig, error::ConfigError, guidance::GuidanceConfig,
    heading_estimator::EstimatorConfig, odometry::BodyConfig, sim::SimulationConfig,
    telemetry::TelemetryConfig,
};

#[derive(Deserialize, Debug, Clone)]
pub struct TimingConfig {
    /// loop period in seconds, shared by all loops
    pub period: f32,
    /// seconds between startup and the first iteration of every loop
    #[serde(default)]
    pub startup_delay: f32,
}

impl TimingConfig {
    pub fn period(&self) -> Duration {
        Duration::from_secs_f32(self.period)
    }

    pub fn startup_delay(&self) -> Duration {
        Duration::from_secs_f32(self.startup_delay)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.period.is_finite() && self.period > 0.0) {
            return Err(ConfigError::NotPositive {
                name: "timing.period",
                value: self.period,
            });
        }
        if !(self.startup_delay.is_finite() && self.startup_delay >= 0.0) {
            return Err(ConfigError::Negative {
                name: "timing.startup_delay",
                value: self.startup_delay,
            });
        }
        Ok(())
    }
}

#[derive(Deserialize, Debug, Clone)]
pub struct AppConfig {
    pub timing: TimingConfig,
    pub link: LinkConfig,
    pub body: BodyConfig,
    pub guidance: GuidanceConfig,
    pub estimator: EstimatorConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
    #[serde(default)]
    pub simulation: SimulationConfig,
}

/// `APP_LINK__PORT=/dev/ttyUSB0` overrides `link.port`
fn environment() -> config::Environment {
    config::Environment::with_prefix("APP")
        .prefix_separator("_")
        .separator("__")
}

impl AppConfig {
    pub fn load_config(config: &Option<PathBuf>) -> anyhow::Result<Self> {
        let settings = if let Some(config) = config {
            info!("Using configuration from {:?}", config);
            Config::builder()
                .add_source(config::File::with_name(
                    config
                        .to_str()
                        .ok_or_else(|| anyhow::anyhow!("Failed to convert path"))?,
                ))
                .add_source(environment())
                .build()?
        } else {
            info!("Using dev configuration");
            Config::builder()
                .add_source(config::File::with_name("config/settings"))
                .add_source(config::File::with_name("config/dev_settings").required(false))
                .add_source(environment())
                .build()?
        };

        let app_config: Self = settings.try_deserialize()?;
        app_config.validate()?;
        Ok(app_config)
    }

    /// Reject configurations the loops can't run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.timing.validate()?;
        self.link.validate()?;
        self.body.validate()?;
        self.guidance.validate()?;
        self.estimator.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heading_estimator::EstimatorMode;

    static DEFAULT_CONFIG: &str = include_str!("../config/settings.yaml");

    fn default_config() -> AppConfig {
        Config::builder()
            .add_source(config::File::from_str(
                DEFAULT_CONFIG,
                config::FileFormat::Yaml,
            ))
            .build()
            .unwrap()
            .try_deserialize::<AppConfig>()
            .unwrap()
    }

    #[test]
    fn test_config() {
        let config = default_config();
        config.validate().unwrap();
        assert_eq!(config.guidance.waypoints.len(), 3);
        assert_eq!(config.estimator.mode, EstimatorMode::Fused);
        assert_eq!(config.link.baud_rate, 115200);
        assert!(config.telemetry.path.is_none());
    }

    #[test]
    fn empty_waypoints_rejected() {
        let mut config = default_config();
        config.guidance.waypoints.clear();
        assert_eq!(config.validate(), Err(ConfigError::NoWaypoints));
    }

    #[test]
    fn non_positive_period_rejected() {
        let mut config = default_config();
        config.timing.period = 0.0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::NotPositive {
                name: "timing.period",
                ..
            })
        ));
        config.timing.period = 0.1;
        config.timing.startup_delay = -1.0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Negative { .. })
        ));
    }

    #[test]
    fn inverted_saturator_rejected() {
        let mut config = default_config();
        config.guidance.forward.min = 50.0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidBounds { .. })
        ));
    }

    #[test]
    fn zero_window_rejected() {
        let mut config = default_config();
        config.estimator.acceleration_window = 0;
        assert_eq!(
            config.validate(),
            Err(ConfigError::ZeroCount("estimator.acceleration_window"))
        );
    }
}
