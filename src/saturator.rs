use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct WheelSetpoints {
    pub left: f32,
    pub right: f32,
}

impl WheelSetpoints {
    pub fn new(left: f32, right: f32) -> Self {
        Self { left, right }
    }

    pub fn zero() -> Self {
        Self::default()
    }
}

/// Wheel setpoint bounds.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq)]
pub struct Saturator {
    pub min: f32,
    pub max: f32,
}

impl Saturator {
    pub fn new(min: f32, max: f32) -> Self {
        Self { min, max }
    }

    /// Bounds must be ordered and contain zero so a halted wheel is always valid.
    pub fn validate(&self, name: &'static str) -> Result<(), ConfigError> {
        let ordered = self.min.is_finite() && self.max.is_finite() && self.min <= self.max;
        if ordered && self.min <= 0.0 && self.max >= 0.0 {
            Ok(())
        } else {
            Err(ConfigError::InvalidBounds {
                name,
                min: self.min,
                max: self.max,
            })
        }
    }

    /// NaN collapses onto the lower bound.
    pub fn clamp(&self, value: f32) -> f32 {
        value.max(self.min).min(self.max)
    }

    /// Largest differential that leaves both wheels unclamped around `base`.
    pub fn headroom(&self, base: f32) -> f32 {
        (self.max - base).min(base - self.min).max(0.0)
    }

    /// Mix a common speed with a steering differential, clamping each wheel on its own.
    pub fn combine(&self, base: f32, differential: f32) -> WheelSetpoints {
        WheelSetpoints {
            left: self.clamp(base - differential),
            right: self.clamp(base + differential),
        }
    }

    pub fn contains(&self, setpoints: &WheelSetpoints) -> bool {
        let inside = |value: f32| value >= self.min && value <= self.max;
        inside(setpoints.left) && inside(setpoints.right)
    }
}
