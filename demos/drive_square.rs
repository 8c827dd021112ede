//! Drive a 30 cm square on the simulated plate
//!
//! Sequence:
//! 1. Connect to a mock plate MCU
//! 2. Start pose tracking and an ultrasonic sensor on A1
//! 3. Visit the four corners, turning to face along each edge
//! 4. Report the final pose and stop
//!
//! ```sh
//! RUST_LOG=info cargo run --example drive_square [config/chakra.toml]
//! ```
//!
//! Ctrl-C aborts the current leg and stops the wheels.

use chakra::config::Config;
use chakra::plate::registers::AnalogPort;
use chakra::transport::MockPlate;
use chakra::{NavigationController, PlateSession, UltrasonicSensor};
use std::env;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

const SIDE: f64 = 0.3;

/// Per-leg limit before the demo gives up
const LEG_TIMEOUT: Duration = Duration::from_secs(20);

const POLL: Duration = Duration::from_millis(100);

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = match env::args().nth(1) {
        Some(path) => {
            log::info!("Using config: {}", path);
            Config::load(&path)?
        }
        None => Config::default(),
    };

    // === 1. Plate ===
    let plate = MockPlate::new();
    plate.set_ultrasonic_cm(AnalogPort::A1, 250);
    let session = PlateSession::connect(Box::new(plate.clone()), &config.plate)?;

    // === 2. Pose tracking and obstacle sensor ===
    let mut nav = NavigationController::new(&session, &config)?;
    let sensor = UltrasonicSensor::new(&session, AnalogPort::A1, &config.ultrasonic)?;
    sensor.when_in_range(|| log::warn!("Obstacle within range"));

    let running = Arc::new(AtomicBool::new(true));
    let r = Arc::clone(&running);
    ctrlc::set_handler(move || {
        log::info!("Received shutdown signal");
        r.store(false, Ordering::Relaxed);
    })?;

    // === 3. Square ===
    let corners = [
        ((SIDE, 0.0), 90.0),
        ((SIDE, SIDE), 180.0),
        ((0.0, SIDE), -90.0),
        ((0.0, 0.0), 0.0),
    ];
    'legs: for (i, (position, angle)) in corners.into_iter().enumerate() {
        log::info!("Leg {}: to ({:.2}, {:.2}) facing {}°", i + 1, position.0, position.1, angle);
        nav.go_to(Some(position), Some(angle), None, false)?;

        let mut waited = Duration::ZERO;
        while !nav.wait(Some(POLL))? {
            waited += POLL;
            if !running.load(Ordering::Relaxed) || waited >= LEG_TIMEOUT {
                log::warn!("Aborting leg {}", i + 1);
                nav.stop()?;
                break 'legs;
            }
        }
        log::info!("   pose {} (obstacle {:.2} m)", nav.pose()?, sensor.distance());
    }

    // === 4. Report ===
    let pose = nav.pose()?;
    log::info!(
        "Final pose ({:.3}, {:.3}) at {:.1}° ± {:.1}°",
        pose.x,
        pose.y,
        pose.angle_deg(),
        pose.angle_tolerance_deg()
    );
    nav.stop()?;
    Ok(())
}
