//! Navigation goals and arrival criteria

use crate::config::GoalCriteriaConfig;
use crate::error::{Error, Result};
use std::f64::consts::FRAC_PI_2;

/// Largest accepted goal heading magnitude (degrees)
pub const MAX_GOAL_ANGLE_DEG: f64 = 180.0;

/// Target pose of one navigation request
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NavGoal {
    position: Option<(f64, f64)>,
    angle: Option<f64>,
    backwards: bool,
}

impl NavGoal {
    /// Position in metres and/or final heading in degrees
    pub fn new(position: Option<(f64, f64)>, angle_deg: Option<f64>, backwards: bool) -> Result<Self> {
        if position.is_none() && angle_deg.is_none() {
            return Err(Error::Configuration(
                "navigation goal needs a position, an angle or both".to_string(),
            ));
        }
        if let Some((x, y)) = position {
            if !x.is_finite() || !y.is_finite() {
                return Err(Error::InvalidParameter(format!(
                    "goal position ({}, {}) is not a finite point",
                    x, y
                )));
            }
        }
        if let Some(angle) = angle_deg {
            if !(-MAX_GOAL_ANGLE_DEG..=MAX_GOAL_ANGLE_DEG).contains(&angle) {
                return Err(Error::InvalidParameter(format!(
                    "goal angle must be within ±{}°, got {}",
                    MAX_GOAL_ANGLE_DEG, angle
                )));
            }
        }
        Ok(Self {
            position,
            angle: angle_deg.map(f64::to_radians),
            backwards,
        })
    }

    pub fn position(&self) -> Option<(f64, f64)> {
        self.position
    }

    /// Final heading (rad)
    pub fn angle(&self) -> Option<f64> {
        self.angle
    }

    pub fn backwards(&self) -> bool {
        self.backwards
    }
}

/// Arrival tolerances, scaled by the current speed factors
#[derive(Debug, Clone)]
pub struct GoalCriteria {
    full_speed_distance_error: f64,
    full_speed_angle_error: f64,
    max_distance_error: f64,
    max_angle_error: f64,
    starting_angle_error: Option<f64>,
}

impl GoalCriteria {
    pub fn new(config: &GoalCriteriaConfig) -> Self {
        let full_speed_angle_error = config.angle_tolerance_deg.to_radians();
        Self {
            full_speed_distance_error: config.distance_tolerance,
            full_speed_angle_error,
            max_distance_error: config.distance_tolerance,
            max_angle_error: full_speed_angle_error,
            starting_angle_error: None,
        }
    }

    pub fn update_linear_speed(&mut self, speed_factor: f64) {
        self.max_distance_error = speed_factor * self.full_speed_distance_error;
    }

    pub fn update_angular_speed(&mut self, speed_factor: f64) {
        self.max_angle_error = speed_factor * self.full_speed_angle_error;
    }

    /// Current distance tolerance (m)
    pub fn max_distance_error(&self) -> f64 {
        self.max_distance_error
    }

    /// Current heading tolerance (rad)
    pub fn max_angle_error(&self) -> f64 {
        self.max_angle_error
    }

    /// Heading reached: inside tolerance, or the error changed sign since
    /// the first sample of this approach (the robot turned past the target)
    pub fn angle(&mut self, angle_error: f64) -> bool {
        let starting = *self.starting_angle_error.get_or_insert(angle_error);
        if angle_error.abs() < self.max_angle_error || starting * angle_error < 0.0 {
            self.starting_angle_error = None;
            return true;
        }
        false
    }

    /// Position reached: inside tolerance, or the target is now behind the
    /// robot (overshoot is accepted rather than reversing a few millimetres)
    pub fn distance(&self, distance_error: f64, angle_error: f64) -> bool {
        distance_error.abs() < self.max_distance_error || angle_error.abs() > FRAC_PI_2
    }

    pub fn within_distance(&self, distance_error: f64) -> bool {
        distance_error.abs() < self.max_distance_error
    }

    /// Forget the overshoot reference
    pub fn reset(&mut self) {
        self.starting_angle_error = None;
    }
}

impl Default for GoalCriteria {
    fn default() -> Self {
        Self::new(&GoalCriteriaConfig::default())
    }
}
