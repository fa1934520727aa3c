use thiserror::Error;

/// Rejected configuration. Raised before any task is started.
#[derive(Error, Debug, PartialEq)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("waypoint list is empty")]
    NoWaypoints,
    #[error("{name} must be positive and finite, got {value}")]
    NotPositive { name: &'static str, value: f32 },
    #[error("{name} must not be negative, got {value}")]
    Negative { name: &'static str, value: f32 },
    #[error("{name} saturator bounds [{min}, {max}] must be ordered and contain zero")]
    InvalidBounds {
        name: &'static str,
        min: f32,
        max: f32,
    },
    #[error("{0} must be at least 1")]
    ZeroCount(&'static str),
}

/// Failure of a single exchange with the motor controller.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum LinkError {
    #[error("communication with motor controller failed")]
    CommError(#[from] std::io::Error),
    #[error("failed opening serial port {0}")]
    FailedOpeningSerialPort(String),
    #[error("exchange timed out")]
    Timeout,
    #[error("malformed frame: {0}")]
    MalformedFrame(String),
    #[error("link closed by motor controller")]
    Closed,
}

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum SensorError {
    #[error("inertial sensor not available")]
    NotAvailable,
    #[error("inertial sensor read failed: {0}")]
    ReadFailed(String),
}
