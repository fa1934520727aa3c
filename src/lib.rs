#![doc = include_str!("../README.md")]
pub mod configuration;
pub mod corrector;
pub mod driver;
pub mod error;
pub mod guidance;
pub mod heading_estimator;
pub mod inertial;
pub mod logging;
pub mod navigation;
pub mod odometry;
pub mod pose;
pub mod rover;
pub mod saturator;
pub mod scheduler;
pub mod shared;
pub mod sim;
pub mod telemetry;
