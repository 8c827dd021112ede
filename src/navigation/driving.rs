//! Speed command generation from pose errors
//!
//! Two PID loops with setpoint 0 and output in [-1, 1]: one on the signed
//! distance error, one on the heading error. The output is scaled by the
//! speed factor and the chassis limit. The proportional gain is chosen so
//! the output saturates until the robot is within the deceleration
//! distance (or angle), which shrinks with the speed factor.

use crate::error::Result;
use crate::pid::{Pid, PidGains};
use crate::utils::validate_factor;

/// Distance at which full-speed approach starts to slow down (m)
const FULL_SPEED_DECELERATION_DISTANCE: f64 = 0.4;

/// Angle at which a full-speed turn starts to slow down (degrees)
const FULL_SPEED_DECELERATION_ANGLE_DEG: f64 = 120.0;

const KI: f64 = 0.1;
const KD: f64 = 0.1;

/// Per-axis speed controllers
#[derive(Debug, Clone)]
pub struct DrivingManager {
    max_motor_speed: f64,
    max_angular_speed: f64,
    linear_speed_factor: f64,
    angular_speed_factor: f64,
    distance: Pid,
    heading: Pid,
}

impl DrivingManager {
    pub fn new(
        max_motor_speed: f64,
        max_angular_speed: f64,
        linear_speed_factor: f64,
        angular_speed_factor: f64,
    ) -> Result<Self> {
        let gains = PidGains {
            kp: 0.0,
            ki: KI,
            kd: KD,
        };
        let mut manager = Self {
            max_motor_speed,
            max_angular_speed,
            linear_speed_factor,
            angular_speed_factor,
            distance: Pid::new(gains, 0.0, 1.0),
            heading: Pid::new(gains, 0.0, 1.0),
        };
        manager.update_linear_speed(linear_speed_factor)?;
        manager.update_angular_speed(angular_speed_factor)?;
        Ok(manager)
    }

    pub fn linear_speed_factor(&self) -> f64 {
        self.linear_speed_factor
    }

    pub fn angular_speed_factor(&self) -> f64 {
        self.angular_speed_factor
    }

    /// Fastest linear command at the current factor (m/s)
    pub fn max_velocity(&self) -> f64 {
        self.linear_speed_factor * self.max_motor_speed
    }

    /// Fastest angular command at the current factor (rad/s)
    pub fn max_angular_velocity(&self) -> f64 {
        self.angular_speed_factor * self.max_angular_speed
    }

    pub fn update_linear_speed(&mut self, speed_factor: f64) -> Result<()> {
        validate_factor("linear_speed_factor", speed_factor)?;
        self.linear_speed_factor = speed_factor;
        let deceleration_distance = speed_factor * FULL_SPEED_DECELERATION_DISTANCE;
        self.distance.set_gains(PidGains {
            kp: 1.0 / deceleration_distance,
            ..self.distance.gains()
        });
        Ok(())
    }

    pub fn update_angular_speed(&mut self, speed_factor: f64) -> Result<()> {
        validate_factor("angular_speed_factor", speed_factor)?;
        self.angular_speed_factor = speed_factor;
        let deceleration_angle = speed_factor * FULL_SPEED_DECELERATION_ANGLE_DEG.to_radians();
        self.heading.set_gains(PidGains {
            kp: 1.0 / deceleration_angle,
            ..self.heading.gains()
        });
        Ok(())
    }

    /// Linear speed (m/s) for a signed distance error
    pub fn linear_speed(&mut self, distance_error: f64) -> f64 {
        self.distance.update(distance_error) * self.max_velocity()
    }

    /// Angular speed (rad/s) for a heading error
    pub fn angular_speed(&mut self, angle_error: f64) -> f64 {
        self.heading.update(angle_error) * self.max_angular_velocity()
    }

    pub fn reset(&mut self) {
        self.distance.reset();
        self.heading.reset();
    }
}
