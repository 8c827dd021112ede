//! Fixed-rate odometry sampling
//!
//! A background thread samples the odometry source at the configured
//! frequency, feeds the pose filter and wakes every thread blocked in
//! [`MeasurementSignal::wait_for_measurement`]. Ticks are scheduled on
//! absolute deadlines so jitter does not accumulate; a loop that falls more
//! than one period behind restarts its schedule from the current time.
//!
//! A failed odometry read skips the tick. Its error stays on the signal until
//! the next successful read so that a waiter that times out can report it.

use super::filter::PoseFilter;
use crate::error::{Error, Result};
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Longest single sleep, bounds how long a stop request waits
const MAX_SLEEP: Duration = Duration::from_millis(10);

/// Odometry callback: `(v, ω)` in m/s and rad/s
pub type OdometryFn = Box<dyn FnMut() -> Result<(f64, f64)> + Send>;

/// Optional gyroscope callback: ω in rad/s
pub type ImuFn = Box<dyn FnMut() -> Option<f64> + Send>;

/// Shared slot for the gyroscope callback, replaceable while running
pub type ImuSlot = Arc<Mutex<Option<ImuFn>>>;

/// New-measurement event
///
/// A generation counter under a condvar: every tick bumps the counter and
/// wakes all waiters, so each waiter sees exactly one fresh measurement.
#[derive(Default)]
pub struct MeasurementSignal {
    generation: Mutex<u64>,
    condvar: Condvar,
    failure: Mutex<Option<String>>,
}

impl MeasurementSignal {
    pub fn generation(&self) -> u64 {
        *self.generation.lock()
    }

    fn notify(&self) {
        *self.failure.lock() = None;
        *self.generation.lock() += 1;
        self.condvar.notify_all();
    }

    fn record_failure(&self, error: &Error) {
        *self.failure.lock() = Some(error.to_string());
    }

    /// Error of the latest odometry read, if it failed
    pub fn last_failure(&self) -> Option<Error> {
        self.failure
            .lock()
            .as_ref()
            .map(|cause| Error::Communication(format!("odometry read failed: {}", cause)))
    }

    /// Cause of a missed measurement: the last read failure, or a timeout
    pub fn missed_measurement(&self, timeout: Duration) -> Error {
        self.last_failure().unwrap_or_else(|| {
            Error::HardwareTimeout(format!(
                "no odometry measurement within {}ms",
                timeout.as_millis()
            ))
        })
    }

    /// Block until the next measurement lands; false on timeout
    pub fn wait_for_measurement(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut generation = self.generation.lock();
        let start = *generation;
        while *generation == start {
            if self.condvar.wait_until(&mut generation, deadline).timed_out() {
                return *generation != start;
            }
        }
        true
    }
}

/// Background measurement clock
pub struct MeasurementScheduler {
    period: Duration,
    signal: Arc<MeasurementSignal>,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl MeasurementScheduler {
    /// Start sampling `odometry` at `frequency` Hz into `filter`
    pub fn start(
        frequency: f64,
        filter: Arc<Mutex<PoseFilter>>,
        odometry: OdometryFn,
        imu: ImuSlot,
    ) -> Result<Self> {
        let period = Duration::from_secs_f64(1.0 / frequency);
        let signal = Arc::new(MeasurementSignal::default());
        let running = Arc::new(AtomicBool::new(true));

        let thread_signal = Arc::clone(&signal);
        let thread_running = Arc::clone(&running);
        let handle = thread::Builder::new()
            .name("measurement".to_string())
            .spawn(move || {
                measurement_loop(period, filter, odometry, imu, thread_signal, thread_running)
            })?;

        log::info!("MeasurementScheduler: sampling at {:.1} Hz", frequency);
        Ok(Self {
            period,
            signal,
            running,
            handle: Some(handle),
        })
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn signal(&self) -> Arc<MeasurementSignal> {
        Arc::clone(&self.signal)
    }

    /// Measurements taken so far
    pub fn measurement_count(&self) -> u64 {
        self.signal.generation()
    }

    pub fn wait_for_measurement(&self, timeout: Duration) -> bool {
        self.signal.wait_for_measurement(timeout)
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Stop the clock and join its thread
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("MeasurementScheduler: thread panicked");
            }
        }
    }
}

impl Drop for MeasurementScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

fn measurement_loop(
    period: Duration,
    filter: Arc<Mutex<PoseFilter>>,
    mut odometry: OdometryFn,
    imu: ImuSlot,
    signal: Arc<MeasurementSignal>,
    running: Arc<AtomicBool>,
) {
    let mut previous = Instant::now();
    let mut deadline = previous + period;

    while running.load(Ordering::Acquire) {
        let now = Instant::now();
        if now < deadline {
            thread::sleep((deadline - now).min(MAX_SLEEP));
            continue;
        }

        deadline += period;
        if deadline < now {
            log::debug!("MeasurementScheduler: fell behind, rescheduling");
            deadline = now + period;
        }

        let measurement = match odometry() {
            Ok(measurement) => measurement,
            Err(e) => {
                log::warn!("MeasurementScheduler: odometry read failed: {}", e);
                signal.record_failure(&e);
                continue;
            }
        };
        let dt = now.duration_since(previous).as_secs_f64();
        previous = now;
        let gyro = imu.lock().as_mut().and_then(|read| read());

        filter.lock().add_measurements(measurement, dt, gyro);
        signal.notify();
        log::trace!("MeasurementScheduler: tick dt={:.4}s", dt);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn constant(v: f64, w: f64) -> OdometryFn {
        Box::new(move || Ok((v, w)))
    }

    fn start(frequency: f64, odometry: OdometryFn) -> (Arc<Mutex<PoseFilter>>, MeasurementScheduler) {
        let filter = Arc::new(Mutex::new(PoseFilter::new(frequency)));
        let scheduler = MeasurementScheduler::start(
            frequency,
            Arc::clone(&filter),
            odometry,
            Arc::new(Mutex::new(None)),
        )
        .unwrap();
        (filter, scheduler)
    }

    #[test]
    fn test_ticks_feed_filter() {
        let (filter, scheduler) = start(100.0, constant(0.5, 0.0));
        assert!(scheduler.wait_for_measurement(Duration::from_secs(1)));
        assert!(scheduler.wait_for_measurement(Duration::from_secs(1)));
        assert!(scheduler.wait_for_measurement(Duration::from_secs(1)));
        let pose = filter.lock().pose();
        assert!(pose.x > 0.0);
        assert_relative_eq!(pose.v, 0.5);
    }

    #[test]
    fn test_rate_is_close_to_frequency() {
        let (_filter, scheduler) = start(50.0, constant(0.0, 0.0));
        let before = scheduler.measurement_count();
        thread::sleep(Duration::from_millis(500));
        let ticks = scheduler.measurement_count() - before;
        assert!((15..=30).contains(&ticks), "{} ticks", ticks);
    }

    #[test]
    fn test_failed_odometry_skips_tick() {
        let unplugged: OdometryFn =
            Box::new(|| Err(crate::Error::Communication("unplugged".to_string())));
        let (_filter, scheduler) = start(100.0, unplugged);
        assert!(!scheduler.wait_for_measurement(Duration::from_millis(100)));
        assert!(scheduler.is_running());
        let timeout = Duration::from_millis(100);
        assert!(matches!(
            scheduler.signal().missed_measurement(timeout),
            Error::Communication(_)
        ));
    }

    #[test]
    fn test_successful_read_clears_failure() {
        let mut calls = 0u32;
        let flaky: OdometryFn = Box::new(move || {
            calls += 1;
            if calls <= 3 {
                Err(Error::Communication("unplugged".to_string()))
            } else {
                Ok((0.0, 0.0))
            }
        });
        let (_filter, scheduler) = start(100.0, flaky);
        assert!(scheduler.wait_for_measurement(Duration::from_secs(1)));
        let signal = scheduler.signal();
        assert!(signal.last_failure().is_none());
        assert!(matches!(
            signal.missed_measurement(Duration::from_millis(10)),
            Error::HardwareTimeout(_)
        ));
    }

    #[test]
    fn test_failed_read_keeps_its_interval() {
        let mut calls = 0u32;
        let every_other: OdometryFn = Box::new(move || {
            calls += 1;
            if calls % 2 == 0 {
                Err(Error::Communication("glitch".to_string()))
            } else {
                Ok((1.0, 0.0))
            }
        });
        let begin = Instant::now();
        let (filter, scheduler) = start(100.0, every_other);
        for _ in 0..20 {
            assert!(scheduler.wait_for_measurement(Duration::from_secs(1)));
        }
        let elapsed = begin.elapsed().as_secs_f64();
        let x = filter.lock().pose().x;
        // Only the first interval is lost, to the zero initial input
        assert!(x > 0.75 * elapsed, "x={} elapsed={}", x, elapsed);
        assert!(x <= elapsed);
    }

    #[test]
    fn test_gyro_source_is_sampled() {
        let imu: ImuSlot = Arc::new(Mutex::new(None));
        let filter = Arc::new(Mutex::new(PoseFilter::new(100.0)));
        let scheduler = MeasurementScheduler::start(
            100.0,
            Arc::clone(&filter),
            constant(0.0, 0.0),
            Arc::clone(&imu),
        )
        .unwrap();
        let gyro: ImuFn = Box::new(|| Some(1.0));
        *imu.lock() = Some(gyro);
        for _ in 0..5 {
            assert!(scheduler.wait_for_measurement(Duration::from_secs(1)));
        }
        assert!(filter.lock().w() > 0.0);
    }

    #[test]
    fn test_stop_joins_thread() {
        let (_filter, mut scheduler) = start(10.0, constant(0.0, 0.0));
        let begin = Instant::now();
        scheduler.stop();
        assert!(begin.elapsed() < Duration::from_millis(100));
        assert!(!scheduler.is_running());
        assert!(!scheduler.wait_for_measurement(Duration::from_millis(150)));
    }
}
