//! Differential drive controller
//!
//! Turns twist-level commands into paired encoder motor commands. Every
//! command goes through the MCU synchronous-start barrier so both wheels
//! begin on the same MCU tick:
//!
//! ```text
//! 1. SYNC_CONFIG <- left_bit | right_bit   (motors hold new targets)
//! 2. left.set_target_speed(..)
//! 3. right.set_target_speed(..)
//! 4. SYNC_START  <- 1                      (both start together)
//! 5. SYNC_CONFIG <- 0
//! ```
//!
//! Each step is followed by a short settle sleep.

mod kinematics;

pub use kinematics::WheelKinematics;

use crate::config::DriveConfig;
use crate::error::{Error, Result};
use crate::motor::{Direction, EncoderMotor};
use crate::pid::Pid;
use crate::plate::PlateSession;
use crate::plate::registers::{
    MOTOR_SYNC_START, REGISTER_MOTOR_SYNC_CONFIG, REGISTER_MOTOR_SYNC_START,
};
use crate::utils::with_sign_of;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// `rotate` speed factors above this draw a warning
const ROTATE_SAFE_SPEED_FACTOR: f64 = 0.3;

/// Wheel rpm below which a wheel counts as stopped
const STANDSTILL_RPM: f64 = 0.5;

/// Poll period while waiting for standstill
const STANDSTILL_POLL: Duration = Duration::from_millis(10);

/// One wheel's share of a drive command
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotorSetting {
    /// Wheel surface speed (m/s), signed
    pub speed: f64,
    /// Distance to roll before the MCU stops the wheel (m); 0 = unbounded
    pub distance: f64,
}

impl MotorSetting {
    pub fn new(speed: f64, distance: Option<f64>) -> Self {
        Self {
            speed,
            distance: distance.map_or(0.0, |d| with_sign_of(d, speed)),
        }
    }
}

/// Robot twist `[v, ω]` read from the wheel encoders
///
/// Cheap to clone; shares the motors with the [`DriveController`] that
/// created it.
#[derive(Clone)]
pub struct OdometrySource {
    left: Arc<EncoderMotor>,
    right: Arc<EncoderMotor>,
    wheel_separation: f64,
}

impl OdometrySource {
    /// `(v, ω)` in m/s and rad/s
    pub fn read(&self) -> Result<(f64, f64)> {
        let left = self.left.current_speed()?;
        let right = self.right.current_speed()?;
        Ok(crate::utils::odometry_from_wheels(left, right, self.wheel_separation))
    }
}

/// Two-wheel drive
pub struct DriveController {
    session: Arc<PlateSession>,
    left: Arc<EncoderMotor>,
    right: Arc<EncoderMotor>,
    kinematics: WheelKinematics,
    linear_speed_hold: f64,
    target_lock: Pid,
    sync_settle: Duration,
    rotate_watchdog: Duration,
}

impl DriveController {
    /// Claim both motor ports and derive the chassis limits
    pub fn new(session: &Arc<PlateSession>, config: &DriveConfig) -> Result<Self> {
        config.validate()?;
        let left = EncoderMotor::new(
            session,
            config.left_motor_port,
            config.left_forward_direction,
            config.braking_type,
            config.wheel_diameter,
        )?;
        let right = EncoderMotor::new(
            session,
            config.right_motor_port,
            config.right_forward_direction,
            config.braking_type,
            config.wheel_diameter,
        )?;

        // Round down so no command can exceed a motor limit through rounding
        let max_motor_speed = (left.max_speed().min(right.max_speed()) * 1000.0).floor() / 1000.0;
        let kinematics = WheelKinematics::new(config.wheel_separation, max_motor_speed);
        let target_lock = Pid::new(config.target_lock, 0.0, kinematics.max_robot_angular_speed());

        log::info!(
            "DriveController: left {} right {}, max {:.3} m/s, {:.3} rad/s",
            left.port(),
            right.port(),
            max_motor_speed,
            kinematics.max_robot_angular_speed()
        );

        Ok(Self {
            session: Arc::clone(session),
            left: Arc::new(left),
            right: Arc::new(right),
            kinematics,
            linear_speed_hold: 0.0,
            target_lock,
            sync_settle: Duration::from_millis(config.sync_settle_ms),
            rotate_watchdog: Duration::from_millis(config.rotate_watchdog_ms),
        })
    }

    pub fn max_motor_speed(&self) -> f64 {
        self.kinematics.max_motor_speed()
    }

    pub fn max_robot_angular_speed(&self) -> f64 {
        self.kinematics.max_robot_angular_speed()
    }

    pub fn wheel_separation(&self) -> f64 {
        self.kinematics.wheel_separation()
    }

    pub fn kinematics(&self) -> &WheelKinematics {
        &self.kinematics
    }

    pub fn left_motor(&self) -> &EncoderMotor {
        &self.left
    }

    pub fn right_motor(&self) -> &EncoderMotor {
        &self.right
    }

    /// Linear speed kept by `left`/`right`/`stop_rotation` (m/s)
    pub fn linear_speed_hold(&self) -> f64 {
        self.linear_speed_hold
    }

    /// Encoder odometry sharing this controller's motors
    pub fn odometry_source(&self) -> OdometrySource {
        OdometrySource {
            left: Arc::clone(&self.left),
            right: Arc::clone(&self.right),
            wheel_separation: self.kinematics.wheel_separation(),
        }
    }

    /// Current `(v, ω)` from the wheel encoders
    pub fn odometry(&self) -> Result<(f64, f64)> {
        self.odometry_source().read()
    }

    /// Drive with a twist, optionally about a turn centre and for a distance
    pub fn robot_move(
        &mut self,
        linear_speed: f64,
        angular_speed: f64,
        turn_radius: f64,
        distance: Option<f64>,
    ) -> Result<()> {
        if !linear_speed.is_finite() || !angular_speed.is_finite() || !turn_radius.is_finite() {
            return Err(Error::InvalidParameter(format!(
                "non-finite twist ({}, {}, r={})",
                linear_speed, angular_speed, turn_radius
            )));
        }
        if let Some(d) = distance {
            if !d.is_finite() || d < 0.0 {
                return Err(Error::InvalidParameter(format!(
                    "distance must be a non-negative number of metres, got {}",
                    d
                )));
            }
        }
        let (left, right) = self
            .kinematics
            .wheel_speeds(linear_speed, angular_speed, turn_radius);
        self.apply(MotorSetting::new(left, distance), MotorSetting::new(right, distance))
    }

    /// Straight line at `speed_factor` of the top speed; `hold` keeps it as
    /// the base speed of later turns
    pub fn forward(&mut self, speed_factor: f64, hold: bool, distance: Option<f64>) -> Result<()> {
        validate_speed_factor(speed_factor)?;
        let linear = self.max_motor_speed() * speed_factor;
        self.linear_speed_hold = if hold { linear } else { 0.0 };
        self.robot_move(linear, 0.0, 0.0, distance)
    }

    pub fn backward(&mut self, speed_factor: f64, hold: bool, distance: Option<f64>) -> Result<()> {
        self.forward(-speed_factor, hold, distance)
    }

    /// Turn left at `speed_factor` of the top turn rate on top of the held
    /// linear speed
    pub fn left(&mut self, speed_factor: f64, turn_radius: f64, distance: Option<f64>) -> Result<()> {
        validate_speed_factor(speed_factor)?;
        let angular = self.max_robot_angular_speed() * speed_factor;
        self.robot_move(self.linear_speed_hold, angular, turn_radius, distance)
    }

    pub fn right(&mut self, speed_factor: f64, turn_radius: f64, distance: Option<f64>) -> Result<()> {
        self.left(-speed_factor, -turn_radius, distance)
    }

    /// Rotate in place by `angle_deg`, blocking until the turn completes
    ///
    /// When `time_to_take` is missing or too short for the allowed turn
    /// rate, the fastest time permitted by `max_speed_factor` is used.
    /// Returns the planned duration.
    pub fn rotate(
        &mut self,
        angle_deg: f64,
        time_to_take: Option<f64>,
        max_speed_factor: f64,
    ) -> Result<Duration> {
        if !angle_deg.is_finite() {
            return Err(Error::InvalidParameter(format!("invalid angle {}", angle_deg)));
        }
        crate::utils::validate_factor("max_speed_factor", max_speed_factor)?;
        if let Some(t) = time_to_take {
            if !(t > 0.0) || !t.is_finite() {
                return Err(Error::InvalidParameter(format!(
                    "time_to_take must be positive, got {}",
                    t
                )));
            }
        }
        if max_speed_factor > ROTATE_SAFE_SPEED_FACTOR {
            log::warn!(
                "DriveController: rotating at {:.0}% of top speed may overshoot the target angle",
                max_speed_factor * 100.0
            );
        }

        let angle = angle_deg.to_radians();
        if angle == 0.0 {
            self.robot_move(0.0, 0.0, 0.0, None)?;
            return Ok(Duration::ZERO);
        }

        let min_time = angle.abs() / (self.max_robot_angular_speed() * max_speed_factor);
        let time = match time_to_take {
            Some(t) if t >= min_time => t,
            _ => min_time,
        };
        let angular = angle / time;
        let (left, right) = self.kinematics.wheel_speeds(0.0, angular, 0.0);
        let distance = angle.abs() * self.wheel_separation() / 2.0;

        log::debug!(
            "DriveController: rotate {:.1}° over {:.3}s ({:.3} rad/s)",
            angle_deg,
            time,
            angular
        );
        self.apply(
            MotorSetting::new(left, Some(distance)),
            MotorSetting::new(right, Some(distance)),
        )?;

        let planned = Duration::from_secs_f64(time);
        thread::sleep(planned);
        self.wait_for_standstill()?;
        Ok(planned)
    }

    /// Zero twist; also drops the held linear speed
    pub fn stop(&mut self) -> Result<()> {
        self.linear_speed_hold = 0.0;
        self.robot_move(0.0, 0.0, 0.0, None)
    }

    /// Zero angular speed, keep the held linear speed
    pub fn stop_rotation(&mut self) -> Result<()> {
        self.robot_move(self.linear_speed_hold, 0.0, 0.0, None)
    }

    /// Steer to null an externally measured heading error (degrees) while
    /// keeping the held linear speed; returns the commanded turn rate
    pub fn target_lock_drive_angle(&mut self, angle_deg: f64) -> Result<f64> {
        if !angle_deg.is_finite() {
            return Err(Error::InvalidParameter(format!("invalid angle {}", angle_deg)));
        }
        let angular = self.target_lock.update(angle_deg);
        self.robot_move(self.linear_speed_hold, angular, 0.0, None)?;
        Ok(angular)
    }

    /// Reset the target-lock controller memory
    pub fn reset_target_lock(&mut self) {
        self.target_lock.reset();
    }

    fn apply(&mut self, left: MotorSetting, right: MotorSetting) -> Result<()> {
        for (motor, setting) in [(&self.left, &left), (&self.right, &right)] {
            if setting.speed.abs() > motor.max_speed() + 1e-9 {
                return Err(Error::InvalidParameter(format!(
                    "{} speed {} m/s exceeds {:.3} m/s",
                    motor.port(),
                    setting.speed,
                    motor.max_speed()
                )));
            }
        }

        let sync_bits = self.left.port().sync_bit() | self.right.port().sync_bit();
        self.session.write_u8(REGISTER_MOTOR_SYNC_CONFIG, sync_bits)?;
        self.settle();
        // Setting speeds are signed in the robot frame
        self.left
            .set_target_speed(left.speed, Direction::Forward, left.distance)?;
        self.settle();
        self.right
            .set_target_speed(right.speed, Direction::Forward, right.distance)?;
        self.settle();
        self.session.write_u8(REGISTER_MOTOR_SYNC_START, MOTOR_SYNC_START)?;
        self.settle();
        self.session.write_u8(REGISTER_MOTOR_SYNC_CONFIG, 0)?;
        self.settle();
        log::trace!(
            "DriveController: wheels ({:.3}, {:.3}) m/s",
            left.speed,
            right.speed
        );
        Ok(())
    }

    #[inline]
    fn settle(&self) {
        if !self.sync_settle.is_zero() {
            thread::sleep(self.sync_settle);
        }
    }

    fn wait_for_standstill(&self) -> Result<()> {
        let deadline = Instant::now() + self.rotate_watchdog;
        loop {
            let left = self.left.current_rpm()?;
            let right = self.right.current_rpm()?;
            if left.abs() < STANDSTILL_RPM && right.abs() < STANDSTILL_RPM {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(Error::HardwareTimeout(format!(
                    "wheels still turning ({:.1}, {:.1} rpm) {}ms after rotate",
                    left,
                    right,
                    self.rotate_watchdog.as_millis()
                )));
            }
            thread::sleep(STANDSTILL_POLL);
        }
    }
}

fn validate_speed_factor(speed_factor: f64) -> Result<()> {
    if (-1.0..=1.0).contains(&speed_factor) {
        Ok(())
    } else {
        Err(Error::InvalidParameter(format!(
            "speed factor {} outside [-1.0, 1.0]",
            speed_factor
        )))
    }
}
