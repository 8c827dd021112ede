//! Pose estimation and goal navigation
//!
//! - [`PoseFilter`]: 5-state Kalman filter over odometry and optional gyro
//! - [`MeasurementScheduler`]: fixed-rate thread feeding the filter
//! - [`Navigator`]: three-phase goal state machine producing [`Twist`]s
//! - [`NavigationController`]: `go_to` / `wait` / `stop` on top of a drive

mod controller;
mod driving;
mod filter;
mod goal;
mod navigator;
mod scheduler;

pub use controller::{FinishCallback, NavigationController};
pub use driving::DrivingManager;
pub use filter::{Pose, PoseFilter};
pub use goal::{GoalCriteria, MAX_GOAL_ANGLE_DEG, NavGoal};
pub use navigator::{Commands, MINIMUM_HITS, NavigationRun, Navigator, Twist};
pub use scheduler::{ImuFn, ImuSlot, MeasurementScheduler, MeasurementSignal, OdometryFn};
