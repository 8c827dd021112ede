//! Chakra - control core for differential-drive robots on an expansion plate
//!
//! This library talks to the plate MCU over I2C, drives a pair of encoder
//! motors and navigates to goals with a filtered pose estimate.
//!
//! ## Layers
//!
//! - [`plate`]: I2C session to the MCU, heartbeat and port ownership
//! - [`motor`]: one encoder motor in wheel units
//! - [`drive`]: synchronized two-wheel commands and odometry
//! - [`navigation`]: pose filter, measurement clock and goal navigation
//! - [`sensors`]: ultrasonic distance sensor
//!
//! ## Features
//!
//! - `mock`: simulated plate MCU for hardware-free testing (default)
//! - `linux`: real I2C through `/dev/i2c-N`

pub mod config;
pub mod drive;
pub mod error;
pub mod motor;
pub mod navigation;
pub mod pid;
pub mod plate;
pub mod sensors;
pub mod transport;
pub mod utils;

// Re-export commonly used types
pub use config::Config;
pub use drive::DriveController;
pub use error::{Error, Result};
pub use motor::EncoderMotor;
pub use navigation::{NavigationController, Pose};
pub use plate::PlateSession;
pub use sensors::UltrasonicSensor;
