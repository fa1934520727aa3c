use nalgebra as na;
use serde::Serialize;
use std::f32::consts::{FRAC_PI_2, PI, TAU};
use std::fmt;

/// Wrap an angle into (-pi, pi].
pub fn wrap_angle(angle: f32) -> f32 {
    if angle > -PI && angle <= PI {
        return angle;
    }
    let wrapped = (angle + PI).rem_euclid(TAU) - PI;
    if wrapped <= -PI {
        wrapped + TAU
    } else {
        wrapped
    }
}

/// Shortest signed rotation taking `current` onto `target`.
///
/// Positive means counter-clockwise.
pub fn shortest_angle_diff(target: f32, current: f32) -> f32 {
    wrap_angle(target - current)
}

/// Heading of the segment `from -> to`.
///
/// A vertical segment resolves to +-pi/2 without going through the slope, and
/// coincident points have no heading at all so `fallback` is returned.
pub fn segment_heading(from: &na::Point2<f32>, to: &na::Point2<f32>, fallback: f32) -> f32 {
    let delta = to - from;
    if delta.x == 0.0 {
        if delta.y > 0.0 {
            FRAC_PI_2
        } else if delta.y < 0.0 {
            -FRAC_PI_2
        } else {
            fallback
        }
    } else {
        delta.y.atan2(delta.x)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Pose {
    position: na::Point2<f32>,
    heading: f32,
}

impl Pose {
    pub fn new((x, y): (f32, f32), heading: f32) -> Self {
        Self {
            position: na::Point2::new(x, y),
            heading: wrap_angle(heading),
        }
    }

    pub fn from_na(position: na::Point2<f32>, heading: f32) -> Self {
        Self {
            position,
            heading: wrap_angle(heading),
        }
    }

    pub fn position(&self) -> &na::Point2<f32> {
        &self.position
    }

    pub fn x(&self) -> f32 {
        self.position.x
    }

    pub fn y(&self) -> f32 {
        self.position.y
    }

    pub fn heading(&self) -> f32 {
        self.heading
    }

    pub fn distance_to(&self, point: &na::Point2<f32>) -> f32 {
        na::distance(&self.position, point)
    }

    /// Bearing from this pose's position towards `point`.
    pub fn bearing_to(&self, point: &na::Point2<f32>) -> f32 {
        segment_heading(&self.position, point, self.heading)
    }

    /// Move `distance` along `heading`, which becomes the new heading.
    pub fn advance(&self, distance: f32, heading: f32) -> Self {
        let heading = wrap_angle(heading);
        let step = na::Vector2::new(heading.cos(), heading.sin()) * distance;
        Self {
            position: self.position + step,
            heading,
        }
    }
}

impl Default for Pose {
    fn default() -> Self {
        Self::new((0.0, 0.0), 0.0)
    }
}

impl fmt::Display for Pose {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "[{:.3}, {:.3}] -> {:.1}",
            self.position.x,
            self.position.y,
            self.heading.to_degrees()
        )
    }
}
