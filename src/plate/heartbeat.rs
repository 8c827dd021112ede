//! Heartbeat thread
//!
//! The plate MCU coasts every motor and powers down once its countdown
//! expires, so the countdown byte has to be rewritten well before that.

use super::SessionShared;
use super::registers::REGISTER_HEARTBEAT;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::thread;
use std::time::Duration;

/// Number of sleep slices per heartbeat interval
const SLEEP_SLICES: u32 = 10;

/// Heartbeat loop: write countdown, sleep one interval in slices, repeat
///
/// Exits when the session shuts down or when a heartbeat write fails, in
/// which case the session is marked disconnected.
pub(super) fn heartbeat_loop(shared: Arc<SessionShared>, interval: Duration, countdown: u8) {
    log::info!(
        "Plate: heartbeat started ({}ms interval, {}s countdown)",
        interval.as_millis(),
        countdown
    );
    let slice = interval / SLEEP_SLICES;

    while shared.is_running() {
        {
            let mut bus = shared.bus.lock();
            if let Err(e) = bus.write(shared.address, &[REGISTER_HEARTBEAT, countdown]) {
                log::error!("Plate: heartbeat write failed: {}", e);
                shared.connected.store(false, Ordering::Release);
                break;
            }
        } // Release lock before sleeping
        log::trace!("Plate: heartbeat sent");

        for _ in 0..SLEEP_SLICES {
            if !shared.is_running() {
                break;
            }
            thread::sleep(slice);
        }
    }

    log::info!("Plate: heartbeat stopped");
}
