use serde::{Deserialize, Serialize};

use crate::{driver::WheelRates, error::ConfigError};

/// Geometry of the drive train.
#[derive(Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct BodyConfig {
    /// meters
    pub wheel_radius: f32,
    /// distance between wheel contact points in meters
    pub track_width: f32,
    /// multiply a raw board wheel rate by this to get rad/s
    #[serde(default = "default_rate_conversion")]
    pub rate_to_rad_per_sec: f32,
}

fn default_rate_conversion() -> f32 {
    // RPM
    std::f32::consts::TAU / 60.0
}

impl BodyConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("body.wheel_radius", self.wheel_radius),
            ("body.track_width", self.track_width),
            ("body.rate_to_rad_per_sec", self.rate_to_rad_per_sec),
        ] {
            if !(value.is_finite() && value > 0.0) {
                return Err(ConfigError::NotPositive { name, value });
            }
        }
        Ok(())
    }
}

/// Coarse motion intent published by guidance.
///
/// The board reports wheel speed magnitudes, so the direction of each wheel is
/// taken from the mode that was commanded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum MotionMode {
    #[default]
    Forward,
    PivotLeft,
    PivotRight,
    Reverse,
}

impl MotionMode {
    fn wheel_signs(self) -> (f32, f32) {
        match self {
            MotionMode::Forward => (1.0, 1.0),
            MotionMode::PivotLeft => (-1.0, 1.0),
            MotionMode::PivotRight => (1.0, -1.0),
            MotionMode::Reverse => (-1.0, -1.0),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct OdometryDelta {
    /// signed distance travelled by the body center
    pub distance: f32,
    /// counter-clockwise heading change
    pub heading: f32,
}

#[derive(Debug, Clone)]
pub struct Odometer {
    body: BodyConfig,
}

impl Odometer {
    pub fn new(body: BodyConfig) -> Self {
        Self { body }
    }

    pub fn delta(&self, rates: &WheelRates, mode: MotionMode, dt: f32) -> OdometryDelta {
        if !(dt.is_finite() && dt > 0.0) {
            return OdometryDelta::default();
        }
        let (left_sign, right_sign) = mode.wheel_signs();
        let left = left_sign * rates.left.abs();
        let right = right_sign * rates.right.abs();
        let scale = self.body.wheel_radius * dt * self.body.rate_to_rad_per_sec;
        OdometryDelta {
            distance: scale * (left + right) / 2.0,
            heading: scale * (right - left) / self.body.track_width,
        }
    }
}
