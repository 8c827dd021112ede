//! Ultrasonic distance sensor on an analog port
//!
//! The MCU runs the ranging itself once a port's config register holds the
//! enable byte; the host only polls the data word (u16 LE centimetres, 0 when
//! no echo came back). A background thread polls at a fixed interval and keeps
//! a median over the last `queue_len` readings.
//!
//! The sensor starts *active* (nothing in range). Once the median window is
//! full it publishes [`SensorEvent::Deactivated`] when the filtered distance
//! drops below the threshold and [`SensorEvent::Activated`] when it rises back
//! to or above it.

use super::events::{EventHub, SensorEvent, SubscriptionId};
use crate::config::UltrasonicConfig;
use crate::error::{Error, Result};
use crate::plate::registers::{AnalogPort, UltrasonicRegisters};
use crate::plate::{Endian, PlateSession, PortClaim};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

const CENTIMETRES_PER_METRE: f64 = 100.0;

/// Longest single sleep of the read loop
const MAX_SLEEP: Duration = Duration::from_millis(10);

struct Readings {
    window: VecDeque<f64>,
    capacity: usize,
    filtered: f64,
    active: bool,
    max_distance: f64,
    threshold: f64,
    generation: u64,
}

impl Readings {
    fn is_ready(&self) -> bool {
        self.window.len() >= self.capacity
    }

    /// Push one raw distance; returns the events to publish
    fn push(&mut self, distance: f64) -> Vec<SensorEvent> {
        if self.window.len() == self.capacity {
            self.window.pop_front();
        }
        self.window.push_back(distance);

        let previous = self.filtered;
        self.filtered = median(&self.window);
        self.generation += 1;

        let mut events = Vec::new();
        if self.filtered != previous {
            events.push(SensorEvent::ValueChanged(self.filtered));
        }
        if self.is_ready() {
            if self.active && self.filtered < self.threshold {
                self.active = false;
                events.push(SensorEvent::Deactivated);
            } else if !self.active && self.filtered >= self.threshold {
                self.active = true;
                events.push(SensorEvent::Activated);
            }
        }
        events
    }
}

fn median(window: &VecDeque<f64>) -> f64 {
    let mut sorted: Vec<f64> = window.iter().copied().collect();
    sorted.sort_by(f64::total_cmp);
    let n = sorted.len();
    match n {
        0 => 0.0,
        _ if n % 2 == 1 => sorted[n / 2],
        _ => (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0,
    }
}

struct Shared {
    session: Arc<PlateSession>,
    registers: UltrasonicRegisters,
    readings: Mutex<Readings>,
    new_reading: Condvar,
    events: EventHub,
    running: AtomicBool,
}

/// Ultrasonic sensor with a median-filtered distance
pub struct UltrasonicSensor {
    shared: Arc<Shared>,
    port: AnalogPort,
    handle: Option<JoinHandle<()>>,
    _claim: PortClaim,
}

impl UltrasonicSensor {
    /// Claim `port`, enable ranging and start polling
    pub fn new(session: &Arc<PlateSession>, port: AnalogPort, config: &UltrasonicConfig) -> Result<Self> {
        config.validate()?;
        if config.threshold_distance.is_nan() || config.threshold_distance < 0.0 {
            return Err(Error::InvalidParameter(format!(
                "invalid threshold distance {}",
                config.threshold_distance
            )));
        }
        let registers = port.ultrasonic_registers().ok_or_else(|| {
            Error::Configuration(format!(
                "ultrasonic sensor is not supported on port {} (use A1 or A3)",
                port
            ))
        })?;
        let claim = session.claim(port)?;
        session.write_u8(registers.config, registers.enable)?;

        let shared = Arc::new(Shared {
            session: Arc::clone(session),
            registers,
            readings: Mutex::new(Readings {
                window: VecDeque::with_capacity(config.queue_len),
                capacity: config.queue_len,
                filtered: config.max_distance,
                active: true,
                max_distance: config.max_distance,
                threshold: config.threshold_distance,
                generation: 0,
            }),
            new_reading: Condvar::new(),
            events: EventHub::new(),
            running: AtomicBool::new(true),
        });

        let thread_shared = Arc::clone(&shared);
        let interval = Duration::from_millis(config.read_interval_ms);
        let handle = thread::Builder::new()
            .name(format!("ultrasonic-{}", port))
            .spawn(move || read_loop(thread_shared, interval))?;

        log::info!(
            "Ultrasonic: {} ready (max {} m, threshold {} m)",
            port,
            config.max_distance,
            config.threshold_distance
        );
        Ok(Self {
            shared,
            port,
            handle: Some(handle),
            _claim: claim,
        })
    }

    pub fn port(&self) -> AnalogPort {
        self.port
    }

    /// Filtered distance (m), `max_distance` when nothing echoes
    pub fn distance(&self) -> f64 {
        self.shared.readings.lock().filtered
    }

    /// Filtered distance scaled to [0, 1] of `max_distance`
    pub fn value(&self) -> f64 {
        let readings = self.shared.readings.lock();
        (readings.filtered / readings.max_distance).min(1.0)
    }

    /// True when an object is closer than the threshold
    pub fn in_range(&self) -> bool {
        !self.shared.readings.lock().active
    }

    /// True once the median window has filled
    pub fn is_ready(&self) -> bool {
        self.shared.readings.lock().is_ready()
    }

    pub fn max_distance(&self) -> f64 {
        self.shared.readings.lock().max_distance
    }

    pub fn set_max_distance(&self, max_distance: f64) -> Result<()> {
        if max_distance.is_nan() || max_distance <= 0.0 {
            return Err(Error::InvalidParameter(
                "invalid maximum distance (must be positive)".to_string(),
            ));
        }
        self.shared.readings.lock().max_distance = max_distance;
        Ok(())
    }

    pub fn threshold_distance(&self) -> f64 {
        self.shared.readings.lock().threshold
    }

    pub fn set_threshold_distance(&self, threshold: f64) -> Result<()> {
        if threshold.is_nan() || threshold < 0.0 {
            return Err(Error::InvalidParameter(format!(
                "invalid threshold distance {}",
                threshold
            )));
        }
        self.shared.readings.lock().threshold = threshold;
        Ok(())
    }

    pub fn events(&self) -> &EventHub {
        &self.shared.events
    }

    /// Call `callback` each time an object comes within the threshold
    pub fn when_in_range<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.shared.events.subscribe(move |event| {
            if *event == SensorEvent::Deactivated {
                callback();
            }
        })
    }

    /// Call `callback` each time the object moves beyond the threshold
    pub fn when_out_of_range<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.shared.events.subscribe(move |event| {
            if *event == SensorEvent::Activated {
                callback();
            }
        })
    }

    /// Block until the next reading is filtered; false on timeout
    pub fn wait_for_reading(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut readings = self.shared.readings.lock();
        let start = readings.generation;
        while readings.generation == start {
            if self
                .shared
                .new_reading
                .wait_until(&mut readings, deadline)
                .timed_out()
            {
                return readings.generation != start;
            }
        }
        true
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Stop polling and disable ranging on the MCU
    pub fn close(&mut self) -> Result<()> {
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };
        self.shared.running.store(false, Ordering::Release);
        if handle.join().is_err() {
            log::error!("Ultrasonic: {} read thread panicked", self.port);
        }
        self.shared.session.write_u8(self.shared.registers.config, 0)?;
        log::info!("Ultrasonic: {} closed", self.port);
        Ok(())
    }
}

impl Drop for UltrasonicSensor {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            log::warn!("Ultrasonic: {} close failed: {}", self.port, e);
        }
    }
}

fn read_loop(shared: Arc<Shared>, interval: Duration) {
    let mut deadline = Instant::now();

    while shared.running.load(Ordering::Acquire) {
        let now = Instant::now();
        if now < deadline {
            thread::sleep((deadline - now).min(MAX_SLEEP));
            continue;
        }
        deadline = (deadline + interval).max(now);

        let raw = match shared.session.read_u16(shared.registers.data, Endian::Little) {
            Ok(raw) => raw,
            Err(e) => {
                log::error!("Ultrasonic: read failed, stopping: {}", e);
                break;
            }
        };

        let events = {
            let mut readings = shared.readings.lock();
            let distance = match raw {
                0 => readings.max_distance,
                cm => (cm as f64 / CENTIMETRES_PER_METRE).min(readings.max_distance),
            };
            let events = readings.push(distance);
            shared.new_reading.notify_all();
            events
        };
        for event in events {
            log::trace!("Ultrasonic: {:?}", event);
            shared.events.publish(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn readings(capacity: usize) -> Readings {
        Readings {
            window: VecDeque::new(),
            capacity,
            filtered: 3.0,
            active: true,
            max_distance: 3.0,
            threshold: 0.3,
            generation: 0,
        }
    }

    #[test]
    fn test_median_odd_and_even() {
        let odd: VecDeque<f64> = [0.5, 3.0, 0.1].into_iter().collect();
        assert_relative_eq!(median(&odd), 0.5);
        let even: VecDeque<f64> = [0.4, 0.1, 0.2, 3.0].into_iter().collect();
        assert_relative_eq!(median(&even), 0.3);
    }

    #[test]
    fn test_median_rejects_single_spike() {
        let mut r = readings(3);
        r.push(1.0);
        r.push(1.0);
        r.push(0.05);
        assert_relative_eq!(r.filtered, 1.0);
        assert!(r.active);
    }

    #[test]
    fn test_no_transition_before_window_fills() {
        let mut r = readings(3);
        assert_eq!(r.push(0.1), vec![SensorEvent::ValueChanged(0.1)]);
        assert!(r.active);
        r.push(0.1);
        let events = r.push(0.1);
        assert_eq!(events, vec![SensorEvent::Deactivated]);
        assert!(!r.active);
    }

    #[test]
    fn test_threshold_is_inclusive_for_activation() {
        let mut r = readings(1);
        r.push(0.1);
        assert!(!r.active);
        let events = r.push(0.3);
        assert_eq!(events, vec![SensorEvent::ValueChanged(0.3), SensorEvent::Activated]);
    }

    #[test]
    fn test_window_slides() {
        let mut r = readings(2);
        r.push(1.0);
        r.push(2.0);
        r.push(3.0);
        assert_eq!(r.window.len(), 2);
        assert_relative_eq!(r.filtered, 2.5);
    }
}
