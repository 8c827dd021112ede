//! Configuration for Chakra
//!
//! Loaded from a TOML file. Every field has a default, so a file only needs
//! the values it changes:
//!
//! ```toml
//! [drive]
//! wheel_diameter = 0.065
//!
//! [navigation]
//! linear_speed_factor = 0.5
//! ```

use crate::error::{Error, Result};
use crate::motor::{BrakingType, ForwardDirection};
use crate::pid::PidGains;
use crate::plate::registers::{DEFAULT_I2C_BUS, MotorPort, PLATE_MCU_ADDRESS};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Top-level configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub plate: PlateConfig,
    #[serde(default)]
    pub drive: DriveConfig,
    #[serde(default)]
    pub navigation: NavigationConfig,
    #[serde(default)]
    pub ultrasonic: UltrasonicConfig,
}

/// Plate MCU connection and heartbeat
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PlateConfig {
    /// I2C bus number (/dev/i2c-N)
    #[serde(default = "default_i2c_bus")]
    pub i2c_bus: u8,

    /// 7-bit MCU address
    #[serde(default = "default_address")]
    pub address: u8,

    /// Heartbeat period in milliseconds
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,

    /// Seconds the MCU keeps running without a heartbeat
    #[serde(default = "default_heartbeat_countdown_s")]
    pub heartbeat_countdown_s: u8,
}

/// Chassis geometry and motor wiring
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DriveConfig {
    #[serde(default = "default_left_motor_port")]
    pub left_motor_port: MotorPort,

    #[serde(default = "default_right_motor_port")]
    pub right_motor_port: MotorPort,

    #[serde(default = "default_left_forward_direction")]
    pub left_forward_direction: ForwardDirection,

    #[serde(default = "default_right_forward_direction")]
    pub right_forward_direction: ForwardDirection,

    /// Distance between the wheel contact points (m)
    #[serde(default = "default_wheel_separation")]
    pub wheel_separation: f64,

    /// Wheel diameter (m)
    #[serde(default = "default_wheel_diameter")]
    pub wheel_diameter: f64,

    #[serde(default)]
    pub braking_type: BrakingType,

    /// Sleep after each write of the synchronous-start sequence (ms)
    #[serde(default = "default_sync_settle_ms")]
    pub sync_settle_ms: u64,

    /// Upper bound on waiting for the wheels to stop after `rotate` (ms)
    #[serde(default = "default_rotate_watchdog_ms")]
    pub rotate_watchdog_ms: u64,

    /// Gains of the target-lock heading controller
    #[serde(default = "default_target_lock")]
    pub target_lock: PidGains,
}

/// Pose estimation and goal navigation
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NavigationConfig {
    /// Odometry sampling rate (Hz)
    #[serde(default = "default_measurement_frequency")]
    pub measurement_frequency: f64,

    #[serde(default = "default_linear_speed_factor")]
    pub linear_speed_factor: f64,

    #[serde(default = "default_angular_speed_factor")]
    pub angular_speed_factor: f64,

    /// Measurement periods to wait for a fresh pose before giving up
    #[serde(default = "default_measurement_wait_periods")]
    pub measurement_wait_periods: u32,

    #[serde(default)]
    pub goal_criteria: GoalCriteriaConfig,
}

/// Full-speed goal tolerances
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GoalCriteriaConfig {
    /// Position tolerance at speed factor 1 (m)
    #[serde(default = "default_distance_tolerance")]
    pub distance_tolerance: f64,

    /// Heading tolerance at speed factor 1 (degrees)
    #[serde(default = "default_angle_tolerance_deg")]
    pub angle_tolerance_deg: f64,
}

/// Ultrasonic sensor on an analog port
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UltrasonicConfig {
    /// Readings above this are reported as this (m)
    #[serde(default = "default_max_distance")]
    pub max_distance: f64,

    /// In-range threshold (m)
    #[serde(default = "default_threshold_distance")]
    pub threshold_distance: f64,

    /// Median filter length
    #[serde(default = "default_queue_len")]
    pub queue_len: usize,

    #[serde(default = "default_read_interval_ms")]
    pub read_interval_ms: u64,
}

impl Config {
    /// Load and validate configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values no component could run with
    pub fn validate(&self) -> Result<()> {
        self.plate.validate()?;
        self.drive.validate()?;
        self.navigation.validate()?;
        self.ultrasonic.validate()
    }
}

impl PlateConfig {
    /// The heartbeat must tick, and tick before the MCU countdown runs out
    pub fn validate(&self) -> Result<()> {
        if self.heartbeat_interval_ms == 0 {
            return Err(Error::Configuration(
                "heartbeat_interval_ms must be positive".to_string(),
            ));
        }
        let countdown_ms = u64::from(self.heartbeat_countdown_s) * 1000;
        if self.heartbeat_interval_ms >= countdown_ms {
            return Err(Error::Configuration(format!(
                "heartbeat_interval_ms {} must be shorter than the {}s countdown",
                self.heartbeat_interval_ms, self.heartbeat_countdown_s
            )));
        }
        Ok(())
    }
}

impl DriveConfig {
    pub fn validate(&self) -> Result<()> {
        if self.left_motor_port == self.right_motor_port {
            return Err(Error::Configuration(format!(
                "left and right motors both use port {}",
                self.left_motor_port
            )));
        }
        if self.left_forward_direction == self.right_forward_direction {
            return Err(Error::Configuration(
                "left and right motors must have opposite forward directions".to_string(),
            ));
        }
        if self.wheel_separation <= 0.0 || !self.wheel_separation.is_finite() {
            return Err(Error::Configuration(format!(
                "wheel_separation must be positive, got {}",
                self.wheel_separation
            )));
        }
        if self.wheel_diameter <= 0.0 || !self.wheel_diameter.is_finite() {
            return Err(Error::InvalidParameter(format!(
                "wheel_diameter must be positive, got {}",
                self.wheel_diameter
            )));
        }
        Ok(())
    }
}

impl NavigationConfig {
    pub fn validate(&self) -> Result<()> {
        if self.measurement_frequency <= 0.0 || !self.measurement_frequency.is_finite() {
            return Err(Error::Configuration(format!(
                "measurement_frequency must be positive, got {}",
                self.measurement_frequency
            )));
        }
        crate::utils::validate_factor("linear_speed_factor", self.linear_speed_factor)?;
        crate::utils::validate_factor("angular_speed_factor", self.angular_speed_factor)?;
        if self.goal_criteria.distance_tolerance < 0.0 || self.goal_criteria.angle_tolerance_deg < 0.0
        {
            return Err(Error::Configuration(
                "goal tolerances must not be negative".to_string(),
            ));
        }
        Ok(())
    }
}

impl UltrasonicConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_distance <= 0.0 {
            return Err(Error::InvalidParameter(
                "invalid maximum distance (must be positive)".to_string(),
            ));
        }
        if self.queue_len == 0 {
            return Err(Error::Configuration("queue_len must be at least 1".to_string()));
        }
        Ok(())
    }
}

impl Default for PlateConfig {
    fn default() -> Self {
        Self {
            i2c_bus: default_i2c_bus(),
            address: default_address(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            heartbeat_countdown_s: default_heartbeat_countdown_s(),
        }
    }
}

impl Default for DriveConfig {
    fn default() -> Self {
        Self {
            left_motor_port: default_left_motor_port(),
            right_motor_port: default_right_motor_port(),
            left_forward_direction: default_left_forward_direction(),
            right_forward_direction: default_right_forward_direction(),
            wheel_separation: default_wheel_separation(),
            wheel_diameter: default_wheel_diameter(),
            braking_type: BrakingType::default(),
            sync_settle_ms: default_sync_settle_ms(),
            rotate_watchdog_ms: default_rotate_watchdog_ms(),
            target_lock: default_target_lock(),
        }
    }
}

impl Default for NavigationConfig {
    fn default() -> Self {
        Self {
            measurement_frequency: default_measurement_frequency(),
            linear_speed_factor: default_linear_speed_factor(),
            angular_speed_factor: default_angular_speed_factor(),
            measurement_wait_periods: default_measurement_wait_periods(),
            goal_criteria: GoalCriteriaConfig::default(),
        }
    }
}

impl Default for GoalCriteriaConfig {
    fn default() -> Self {
        Self {
            distance_tolerance: default_distance_tolerance(),
            angle_tolerance_deg: default_angle_tolerance_deg(),
        }
    }
}

impl Default for UltrasonicConfig {
    fn default() -> Self {
        Self {
            max_distance: default_max_distance(),
            threshold_distance: default_threshold_distance(),
            queue_len: default_queue_len(),
            read_interval_ms: default_read_interval_ms(),
        }
    }
}

// Default value functions
fn default_i2c_bus() -> u8 {
    DEFAULT_I2C_BUS
}
fn default_address() -> u8 {
    PLATE_MCU_ADDRESS
}
fn default_heartbeat_interval_ms() -> u64 {
    5000
}
fn default_heartbeat_countdown_s() -> u8 {
    15
}

// Drive defaults
fn default_left_motor_port() -> MotorPort {
    MotorPort::M3
}
fn default_right_motor_port() -> MotorPort {
    MotorPort::M0
}
fn default_left_forward_direction() -> ForwardDirection {
    ForwardDirection::Clockwise
}
fn default_right_forward_direction() -> ForwardDirection {
    ForwardDirection::CounterClockwise
}
fn default_wheel_separation() -> f64 {
    0.163
}
fn default_wheel_diameter() -> f64 {
    0.075
}
fn default_sync_settle_ms() -> u64 {
    20
}
fn default_rotate_watchdog_ms() -> u64 {
    5000
}
fn default_target_lock() -> PidGains {
    PidGains {
        kp: 0.045,
        ki: 0.002,
        kd: 0.0035,
    }
}

// Navigation defaults
fn default_measurement_frequency() -> f64 {
    10.0
}
fn default_linear_speed_factor() -> f64 {
    0.75
}
fn default_angular_speed_factor() -> f64 {
    0.5
}
fn default_measurement_wait_periods() -> u32 {
    5
}
fn default_distance_tolerance() -> f64 {
    0.02
}
fn default_angle_tolerance_deg() -> f64 {
    3.0
}

// Ultrasonic defaults
fn default_max_distance() -> f64 {
    3.0
}
fn default_threshold_distance() -> f64 {
    0.3
}
fn default_queue_len() -> usize {
    5
}
fn default_read_interval_ms() -> u64 {
    100
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.plate.i2c_bus, 1);
        assert_eq!(config.plate.address, 0x04);
        assert_eq!(config.plate.heartbeat_interval_ms, 5000);
        assert_eq!(config.plate.heartbeat_countdown_s, 15);
        assert_eq!(config.drive.left_motor_port, MotorPort::M3);
        assert_eq!(config.drive.right_motor_port, MotorPort::M0);
        assert_eq!(config.drive.wheel_separation, 0.163);
        assert_eq!(config.drive.braking_type, BrakingType::Coast);
        assert_eq!(config.drive.target_lock.kp, 0.045);
        assert_eq!(config.navigation.measurement_frequency, 10.0);
        assert_eq!(config.navigation.goal_criteria.angle_tolerance_deg, 3.0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml() {
        let toml_content = r#"
[drive]
left_motor_port = "M1"
right_motor_port = "M2"
left_forward_direction = "counter_clockwise"
right_forward_direction = "clockwise"
braking_type = "brake"

[drive.target_lock]
kp = 0.1
ki = 0.0
kd = 0.0

[navigation]
linear_speed_factor = 0.5
"#;

        let config = Config::from_toml(toml_content).unwrap();
        assert_eq!(config.drive.left_motor_port, MotorPort::M1);
        assert_eq!(
            config.drive.left_forward_direction,
            ForwardDirection::CounterClockwise
        );
        assert_eq!(config.drive.braking_type, BrakingType::Brake);
        assert_eq!(config.drive.target_lock.kp, 0.1);
        assert_eq!(config.drive.wheel_diameter, 0.075);
        assert_eq!(config.navigation.linear_speed_factor, 0.5);
        assert_eq!(config.navigation.angular_speed_factor, 0.5);
        assert_eq!(config.plate.heartbeat_countdown_s, 15);
    }

    #[test]
    fn test_shipped_config_matches_defaults() {
        let shipped = Config::from_toml(include_str!("../config/chakra.toml")).unwrap();
        let defaults = Config::default();
        assert_eq!(shipped.plate.address, defaults.plate.address);
        assert_eq!(shipped.drive.right_motor_port, defaults.drive.right_motor_port);
        assert_eq!(shipped.drive.wheel_separation, defaults.drive.wheel_separation);
        assert_eq!(
            shipped.navigation.goal_criteria.angle_tolerance_deg,
            defaults.navigation.goal_criteria.angle_tolerance_deg
        );
        assert_eq!(shipped.ultrasonic.queue_len, defaults.ultrasonic.queue_len);
    }

    #[test]
    fn test_toml_round_trip() {
        let config = Config::default();
        let text = toml::to_string_pretty(&config).unwrap();
        assert!(text.contains("[plate]"));
        assert!(text.contains("[drive.target_lock]"));
        assert!(text.contains("left_motor_port = \"M3\""));
        let parsed = Config::from_toml(&text).unwrap();
        assert_eq!(parsed.drive.wheel_separation, config.drive.wheel_separation);
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let same_port = "[drive]\nleft_motor_port = \"M0\"\nright_motor_port = \"M0\"\n";
        assert!(matches!(
            Config::from_toml(same_port),
            Err(Error::Configuration(_))
        ));

        let bad_factor = "[navigation]\nangular_speed_factor = 0.0\n";
        assert!(matches!(
            Config::from_toml(bad_factor),
            Err(Error::Configuration(_))
        ));

        let bad_wheel = "[drive]\nwheel_diameter = -0.1\n";
        assert!(matches!(
            Config::from_toml(bad_wheel),
            Err(Error::InvalidParameter(_))
        ));

        let unknown_port = "[drive]\nleft_motor_port = \"M7\"\n";
        assert!(matches!(Config::from_toml(unknown_port), Err(Error::Toml(_))));
    }

    #[test]
    fn test_heartbeat_must_beat_the_countdown() {
        let silent = "[plate]\nheartbeat_interval_ms = 0\n";
        assert!(matches!(Config::from_toml(silent), Err(Error::Configuration(_))));

        let mut plate = PlateConfig {
            heartbeat_interval_ms: 15_000,
            ..PlateConfig::default()
        };
        assert!(matches!(plate.validate(), Err(Error::Configuration(_))));
        plate.heartbeat_interval_ms = 14_999;
        assert!(plate.validate().is_ok());
        plate.heartbeat_countdown_s = 0;
        assert!(plate.validate().is_err());
    }
}
