//! Navigation controller
//!
//! Owns a drive, a pose filter fed by a measurement scheduler, and a
//! navigator. `go_to` validates the goal and starts a worker thread that
//! pumps navigator commands into the drive, one per fresh measurement:
//!
//! ```text
//!  measurement thread            navigation worker
//!  ──────────────────            ─────────────────
//!  odometry() ─► filter ──pose──► navigator.step() ──twist──► drive.robot_move()
//!        └──── signal ──────────► (wakes once per tick)
//! ```

use super::filter::{Pose, PoseFilter};
use super::goal::NavGoal;
use super::navigator::{NavigationRun, Navigator};
use super::scheduler::{ImuFn, ImuSlot, MeasurementScheduler, MeasurementSignal};
use crate::config::{Config, NavigationConfig};
use crate::drive::{DriveController, OdometrySource};
use crate::error::{Error, Result};
use crate::plate::PlateSession;
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Callback run once when a goal is reached
pub type FinishCallback = Box<dyn FnOnce() + Send>;

/// Poll period of `wait` for a worker that died without reporting
const WORKER_POLL: Duration = Duration::from_millis(50);

#[derive(Default)]
struct NavStatus {
    in_progress: bool,
    error: Option<Error>,
    on_finish: Option<FinishCallback>,
}

/// State shared between the controller and its worker
#[derive(Default)]
struct NavShared {
    status: Mutex<NavStatus>,
    finished: Condvar,
}

/// Goal-directed driving on top of a [`DriveController`]
pub struct NavigationController {
    drive: Arc<Mutex<DriveController>>,
    odometry: OdometrySource,
    filter: Arc<Mutex<PoseFilter>>,
    scheduler: MeasurementScheduler,
    navigator: Arc<Mutex<Navigator>>,
    imu: ImuSlot,
    shared: Arc<NavShared>,
    worker: Option<JoinHandle<()>>,
    measurement_timeout: Duration,
}

impl NavigationController {
    /// Build the drive described by `config` and start pose tracking
    pub fn new(session: &Arc<PlateSession>, config: &Config) -> Result<Self> {
        let drive = DriveController::new(session, &config.drive)?;
        Self::with_drive(drive, &config.navigation)
    }

    /// Start pose tracking on an existing drive
    pub fn with_drive(drive: DriveController, config: &NavigationConfig) -> Result<Self> {
        config.validate()?;
        let navigator = Navigator::new(
            drive.max_motor_speed(),
            drive.max_robot_angular_speed(),
            config,
        )?;
        let filter = Arc::new(Mutex::new(PoseFilter::new(config.measurement_frequency)));
        let odometry = drive.odometry_source();
        let imu: ImuSlot = Arc::new(Mutex::new(None));

        let source = odometry.clone();
        let scheduler = MeasurementScheduler::start(
            config.measurement_frequency,
            Arc::clone(&filter),
            Box::new(move || source.read()),
            Arc::clone(&imu),
        )?;
        let measurement_timeout = scheduler.period() * config.measurement_wait_periods.max(1);

        Ok(Self {
            drive: Arc::new(Mutex::new(drive)),
            odometry,
            filter,
            scheduler,
            navigator: Arc::new(Mutex::new(navigator)),
            imu,
            shared: Arc::new(NavShared::default()),
            worker: None,
            measurement_timeout,
        })
    }

    /// Navigate to `position` (m) and/or `angle` (degrees) relative to the
    /// pose at start-up or the last reset
    ///
    /// Returns immediately; chain [`wait`](Self::wait) to block. `on_finish`
    /// runs on the worker thread when the goal is reached, never after
    /// [`stop`](Self::stop).
    pub fn go_to(
        &mut self,
        position: Option<(f64, f64)>,
        angle: Option<f64>,
        on_finish: Option<FinishCallback>,
        backwards: bool,
    ) -> Result<&mut Self> {
        if self.in_progress() {
            return Err(Error::NavigationInProgress);
        }
        let goal = NavGoal::new(position, angle, backwards)?;
        self.reap_worker();

        let run = self.navigator.lock().plan(&goal);
        {
            let mut status = self.shared.status.lock();
            status.in_progress = true;
            status.error = None;
            status.on_finish = on_finish;
        }

        let worker = Worker {
            run,
            shared: Arc::clone(&self.shared),
            navigator: Arc::clone(&self.navigator),
            drive: Arc::clone(&self.drive),
            filter: Arc::clone(&self.filter),
            signal: self.scheduler.signal(),
            measurement_timeout: self.measurement_timeout,
        };
        let spawned = thread::Builder::new()
            .name("navigation".to_string())
            .spawn(move || worker.run());
        match spawned {
            Ok(handle) => self.worker = Some(handle),
            Err(e) => {
                let mut status = self.shared.status.lock();
                status.in_progress = false;
                status.on_finish = None;
                return Err(e.into());
            }
        }

        log::info!(
            "NavigationController: go to {:?} / {:?}°{}",
            position,
            angle,
            if backwards { " backwards" } else { "" }
        );
        Ok(self)
    }

    /// Block until the current goal completes or is stopped
    ///
    /// `Ok(false)` on timeout. A worker failure is returned once as `Err`.
    pub fn wait(&self, timeout: Option<Duration>) -> Result<bool> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut status = self.shared.status.lock();
        while status.in_progress {
            let now = Instant::now();
            if deadline.is_some_and(|d| now >= d) {
                return Ok(false);
            }
            let slice = deadline.map_or(WORKER_POLL, |d| (d - now).min(WORKER_POLL));
            self.shared.finished.wait_for(&mut status, slice);

            if status.in_progress && self.worker.as_ref().is_some_and(|h| h.is_finished()) {
                status.in_progress = false;
                return Err(Error::ThreadPanic("navigation"));
            }
        }
        match status.error.take() {
            Some(e) => Err(e),
            None => Ok(true),
        }
    }

    /// Abort the current goal without its callback, then stop the drive
    pub fn stop(&mut self) -> Result<()> {
        self.stop_navigation();
        self.drive.lock().stop()
    }

    fn stop_navigation(&mut self) {
        self.shared.status.lock().on_finish = None;
        self.navigator.lock().request_stop();
        self.reap_worker();
        let mut status = self.shared.status.lock();
        if status.in_progress {
            status.in_progress = false;
            self.shared.finished.notify_all();
        }
    }

    fn reap_worker(&mut self) {
        if let Some(handle) = self.worker.take() {
            if handle.join().is_err() {
                log::error!("NavigationController: navigation worker panicked");
            }
        }
    }

    pub fn in_progress(&self) -> bool {
        self.shared.status.lock().in_progress
    }

    /// Current pose after at least one fresh measurement
    ///
    /// Fails with the odometry read error when the plate stopped answering,
    /// or `HardwareTimeout` when no measurement arrived for another reason.
    pub fn pose(&self) -> Result<Pose> {
        if !self.scheduler.wait_for_measurement(self.measurement_timeout) {
            return Err(self.scheduler.signal().missed_measurement(self.measurement_timeout));
        }
        Ok(self.filter.lock().pose())
    }

    /// Latest filter state without waiting
    pub fn last_pose(&self) -> Pose {
        self.filter.lock().pose()
    }

    /// `(v, ω)` from the wheel encoders
    pub fn odometry(&self) -> Result<(f64, f64)> {
        self.odometry.read()
    }

    pub fn reset_position_and_angle(&self) {
        self.filter.lock().reset_pose();
    }

    /// Fuse a gyroscope ω source into the pose filter, or remove it
    pub fn set_imu_source(&self, source: Option<ImuFn>) {
        *self.imu.lock() = source;
    }

    pub fn linear_speed_factor(&self) -> f64 {
        self.navigator.lock().linear_speed_factor()
    }

    pub fn set_linear_speed_factor(&self, speed_factor: f64) -> Result<()> {
        self.navigator.lock().set_linear_speed_factor(speed_factor)
    }

    pub fn angular_speed_factor(&self) -> f64 {
        self.navigator.lock().angular_speed_factor()
    }

    pub fn set_angular_speed_factor(&self, speed_factor: f64) -> Result<()> {
        self.navigator.lock().set_angular_speed_factor(speed_factor)
    }

    /// Direct access to the drive between goals
    pub fn drive(&self) -> MutexGuard<'_, DriveController> {
        self.drive.lock()
    }
}

impl Drop for NavigationController {
    fn drop(&mut self) {
        if self.worker.is_some() {
            let was_running = self.in_progress();
            self.stop_navigation();
            if was_running {
                if let Err(e) = self.drive.lock().stop() {
                    log::warn!("NavigationController: failed to stop drive on drop: {}", e);
                }
            }
        }
    }
}

/// Everything the navigation thread needs for one goal
struct Worker {
    run: NavigationRun,
    shared: Arc<NavShared>,
    navigator: Arc<Mutex<Navigator>>,
    drive: Arc<Mutex<DriveController>>,
    filter: Arc<Mutex<PoseFilter>>,
    signal: Arc<MeasurementSignal>,
    measurement_timeout: Duration,
}

impl Worker {
    fn run(mut self) {
        let outcome = self.drive_to_goal();
        let stopped = self.navigator.lock().stop_requested();

        let callback = {
            let mut status = self.shared.status.lock();
            status.in_progress = false;
            let callback = status.on_finish.take();
            self.shared.finished.notify_all();
            match outcome {
                Ok(()) if !stopped => {
                    log::info!("NavigationController: goal reached");
                    callback
                }
                Ok(()) => None,
                Err(e) => {
                    log::error!("NavigationController: navigation failed: {}", e);
                    status.error = Some(e);
                    None
                }
            }
        };
        if let Some(callback) = callback {
            callback();
        }
    }

    fn drive_to_goal(&mut self) -> Result<()> {
        loop {
            if !self.signal.wait_for_measurement(self.measurement_timeout) {
                return Err(self.signal.missed_measurement(self.measurement_timeout));
            }
            let pose = self.filter.lock().pose();
            let Some(twist) = self.navigator.lock().step(&mut self.run, &pose) else {
                return Ok(());
            };
            self.drive
                .lock()
                .robot_move(twist.linear, twist.angular, 0.0, None)?;
        }
    }
}
