//! Shared setup for integration tests against the simulated plate.

#![allow(dead_code)]

use chakra::config::{Config, DriveConfig, NavigationConfig, PlateConfig};
use chakra::transport::MockPlate;
use chakra::PlateSession;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Plate settings with a fast heartbeat so sessions shut down quickly
pub fn plate_config() -> PlateConfig {
    PlateConfig {
        heartbeat_interval_ms: 50,
        ..PlateConfig::default()
    }
}

/// Full configuration with no sync settle delay and a 50 Hz pose filter
pub fn config() -> Config {
    Config {
        plate: plate_config(),
        drive: DriveConfig {
            sync_settle_ms: 0,
            ..DriveConfig::default()
        },
        navigation: NavigationConfig {
            measurement_frequency: 50.0,
            ..NavigationConfig::default()
        },
        ..Config::default()
    }
}

/// Connect a private session to a fresh mock plate
pub fn session() -> (MockPlate, Arc<PlateSession>) {
    let plate = MockPlate::new();
    let session = PlateSession::connect(Box::new(plate.clone()), &plate_config()).unwrap();
    (plate, session)
}

/// Poll `condition` until it holds or `timeout` expires
pub fn eventually<F: FnMut() -> bool>(timeout: Duration, mut condition: F) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}
