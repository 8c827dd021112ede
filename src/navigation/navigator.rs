//! Goal navigator
//!
//! Converts a [`NavGoal`] into a stream of [`Twist`] commands using only the
//! current pose as feedback. A goal runs through up to three phases:
//!
//! ```text
//!  position given            position given           angle given
//! ┌────────────────┐       ┌─────────────────┐       ┌──────────────┐
//! │ course heading │ ────► │ drive to target │ ────► │ final angle  │ ──► done
//! │ (turn in place)│       │ (drive + steer) │       │ (turn)       │
//! └────────────────┘       └─────────────────┘       └──────────────┘
//! ```
//!
//! Each phase ends with a zero twist and a controller reset. The navigator
//! is pull-based: callers feed a pose to [`Navigator::step`] and apply the
//! returned twist, until it returns `None`.

use super::driving::DrivingManager;
use super::filter::Pose;
use super::goal::{GoalCriteria, NavGoal};
use crate::config::NavigationConfig;
use crate::error::Result;
use crate::utils::normalize_angle;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Consecutive in-tolerance readings that end a turning phase
pub const MINIMUM_HITS: usize = 2;

/// Linear and angular speed command
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Twist {
    /// m/s
    pub linear: f64,
    /// rad/s
    pub angular: f64,
}

impl Twist {
    pub const ZERO: Twist = Twist {
        linear: 0.0,
        angular: 0.0,
    };

    pub fn new(linear: f64, angular: f64) -> Self {
        Self { linear, angular }
    }

    pub fn is_zero(&self) -> bool {
        self.linear == 0.0 && self.angular == 0.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Phase {
    CourseHeading { x: f64, y: f64 },
    DriveToPosition { x: f64, y: f64 },
    FinalAngle { theta: f64 },
}

/// Progress through one goal
#[derive(Debug, Clone)]
pub struct NavigationRun {
    phases: VecDeque<Phase>,
    backwards: bool,
    hits: usize,
}

impl NavigationRun {
    pub fn is_finished(&self) -> bool {
        self.phases.is_empty()
    }

    /// Phases left, including the current one
    pub fn remaining_phases(&self) -> usize {
        self.phases.len()
    }
}

/// Goal navigator
pub struct Navigator {
    criteria: GoalCriteria,
    driving: DrivingManager,
    stop: Arc<AtomicBool>,
}

impl Navigator {
    pub fn new(max_motor_speed: f64, max_angular_speed: f64, config: &NavigationConfig) -> Result<Self> {
        let driving = DrivingManager::new(
            max_motor_speed,
            max_angular_speed,
            config.linear_speed_factor,
            config.angular_speed_factor,
        )?;
        let mut criteria = GoalCriteria::new(&config.goal_criteria);
        criteria.update_linear_speed(config.linear_speed_factor);
        criteria.update_angular_speed(config.angular_speed_factor);
        Ok(Self {
            criteria,
            driving,
            stop: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn linear_speed_factor(&self) -> f64 {
        self.driving.linear_speed_factor()
    }

    /// Change the linear speed factor and the distance tolerance with it
    pub fn set_linear_speed_factor(&mut self, speed_factor: f64) -> Result<()> {
        self.driving.update_linear_speed(speed_factor)?;
        self.criteria.update_linear_speed(speed_factor);
        Ok(())
    }

    pub fn angular_speed_factor(&self) -> f64 {
        self.driving.angular_speed_factor()
    }

    /// Change the angular speed factor and the heading tolerance with it
    pub fn set_angular_speed_factor(&mut self, speed_factor: f64) -> Result<()> {
        self.driving.update_angular_speed(speed_factor)?;
        self.criteria.update_angular_speed(speed_factor);
        Ok(())
    }

    pub fn criteria(&self) -> &GoalCriteria {
        &self.criteria
    }

    /// Flag polled on every step; setting it ends the current run
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    pub fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    /// Lay out the phases of `goal` and clear any earlier stop request
    pub fn plan(&mut self, goal: &NavGoal) -> NavigationRun {
        let mut phases = VecDeque::with_capacity(3);
        if let Some((x, y)) = goal.position() {
            phases.push_back(Phase::CourseHeading { x, y });
            phases.push_back(Phase::DriveToPosition { x, y });
        }
        if let Some(theta) = goal.angle() {
            phases.push_back(Phase::FinalAngle { theta });
        }
        self.stop.store(false, Ordering::SeqCst);
        self.driving.reset();
        self.criteria.reset();
        log::debug!("Navigator: planned {:?}", phases);
        NavigationRun {
            phases,
            backwards: goal.backwards(),
            hits: 0,
        }
    }

    /// Next command for `pose`, or `None` once the run is over or stopped
    pub fn step(&mut self, run: &mut NavigationRun, pose: &Pose) -> Option<Twist> {
        if self.stop_requested() {
            return None;
        }
        let phase = *run.phases.front()?;

        let (done, command) = match phase {
            Phase::CourseHeading { x, y } => {
                let (dx, dy) = position_error(pose, x, y, run.backwards);
                let angle_error = normalize_angle(pose.theta - dy.atan2(dx));
                if self.criteria.within_distance(distance_error(dx, dy, run.backwards)) {
                    (true, Twist::ZERO)
                } else {
                    let done = self.count_hit(run, angle_error);
                    (done, self.motor_input(angle_error, 0.0))
                }
            }
            Phase::DriveToPosition { x, y } => {
                let (dx, dy) = position_error(pose, x, y, run.backwards);
                let angle_error = normalize_angle(pose.theta - dy.atan2(dx));
                let distance_error = distance_error(dx, dy, run.backwards);
                if self.criteria.distance(distance_error, angle_error) {
                    (true, Twist::ZERO)
                } else {
                    (false, self.motor_input(angle_error, distance_error))
                }
            }
            Phase::FinalAngle { theta } => {
                let angle_error = normalize_angle(pose.theta - theta);
                let done = self.count_hit(run, angle_error);
                (done, self.motor_input(angle_error, 0.0))
            }
        };

        if done {
            log::debug!(
                "Navigator: {:?} reached at ({:.3}, {:.3}, {:.1}°)",
                phase,
                pose.x,
                pose.y,
                pose.angle_deg()
            );
            run.phases.pop_front();
            run.hits = 0;
            self.driving.reset();
            self.criteria.reset();
            return Some(Twist::ZERO);
        }
        Some(command)
    }

    /// Iterate commands for `goal`, polling `pose` before each one
    pub fn commands<F>(&mut self, goal: &NavGoal, pose: F) -> Commands<'_, F>
    where
        F: FnMut() -> Pose,
    {
        let run = self.plan(goal);
        Commands {
            navigator: self,
            run,
            pose,
        }
    }

    fn count_hit(&mut self, run: &mut NavigationRun, angle_error: f64) -> bool {
        if self.criteria.angle(angle_error) {
            run.hits += 1;
            self.driving.reset();
        } else {
            run.hits = 0;
        }
        run.hits >= MINIMUM_HITS
    }

    fn motor_input(&mut self, angle_error: f64, distance_error: f64) -> Twist {
        let mut twist = Twist::ZERO;
        if distance_error != 0.0 {
            twist.linear = self.driving.linear_speed(distance_error);
        }
        if angle_error != 0.0 {
            twist.angular = self.driving.angular_speed(angle_error);
        }
        twist
    }
}

/// `(Δx, Δy)` toward the target, inverted when driving backwards
fn position_error(pose: &Pose, x: f64, y: f64, backwards: bool) -> (f64, f64) {
    if backwards {
        (pose.x - x, pose.y - y)
    } else {
        (x - pose.x, y - pose.y)
    }
}

/// Negative when the target pulls the robot forward
fn distance_error(dx: f64, dy: f64, backwards: bool) -> f64 {
    let d = dx.hypot(dy);
    if backwards { d } else { -d }
}

/// Command stream of one goal, see [`Navigator::commands`]
pub struct Commands<'a, F> {
    navigator: &'a mut Navigator,
    run: NavigationRun,
    pose: F,
}

impl<F> Iterator for Commands<'_, F>
where
    F: FnMut() -> Pose,
{
    type Item = Twist;

    fn next(&mut self) -> Option<Twist> {
        if self.run.is_finished() {
            return None;
        }
        let pose = (self.pose)();
        self.navigator.step(&mut self.run, &pose)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::FRAC_PI_4;

    const MAX_SPEED: f64 = 0.4;
    const MAX_ANGULAR: f64 = 0.4 / 0.0815;

    fn navigator() -> Navigator {
        Navigator::new(MAX_SPEED, MAX_ANGULAR, &NavigationConfig::default()).unwrap()
    }

    fn goal(position: Option<(f64, f64)>, angle: Option<f64>) -> NavGoal {
        NavGoal::new(position, angle, false).unwrap()
    }

    #[test]
    fn test_heading_phase_then_drive() {
        let mut nav = navigator();
        let mut run = nav.plan(&goal(Some((1.0, 1.0)), None));
        let start = Pose::at(0.0, 0.0, 0.0);

        for _ in 0..5 {
            let twist = nav.step(&mut run, &start).unwrap();
            assert_eq!(twist.linear, 0.0);
            assert!(twist.angular > 0.0);
        }

        let aligned = Pose::at(0.0, 0.0, FRAC_PI_4);
        let first = nav.step(&mut run, &aligned).unwrap();
        assert_eq!(first.linear, 0.0);
        assert_eq!(nav.step(&mut run, &aligned), Some(Twist::ZERO));
        assert_eq!(run.remaining_phases(), 1);

        let drive = nav.step(&mut run, &aligned).unwrap();
        assert!(drive.linear > 0.0);
        assert!(drive.angular.abs() < 1e-6);
    }

    #[test]
    fn test_hits_must_be_consecutive() {
        let mut nav = navigator();
        let mut run = nav.plan(&goal(None, Some(90.0)));
        let on_target = Pose::at(0.0, 0.0, 90f64.to_radians());
        let off_target = Pose::at(0.0, 0.0, 0.0);

        nav.step(&mut run, &on_target).unwrap();
        nav.step(&mut run, &off_target).unwrap();
        nav.step(&mut run, &on_target).unwrap();
        assert!(!run.is_finished());
        assert_eq!(nav.step(&mut run, &on_target), Some(Twist::ZERO));
        assert!(run.is_finished());
        assert_eq!(nav.step(&mut run, &on_target), None);
    }

    #[test]
    fn test_already_at_position_skips_rotation() {
        let mut nav = navigator();
        let pose = Pose::at(1.0, 0.0, 0.0);
        let commands: Vec<Twist> = nav.commands(&goal(Some((0.99, 0.0)), None), || pose).collect();
        assert_eq!(commands, vec![Twist::ZERO, Twist::ZERO]);
    }

    #[test]
    fn test_origin_goal_finishes_immediately() {
        let mut nav = navigator();
        let pose = Pose::at(0.0, 0.0, 0.0);
        let commands: Vec<Twist> = nav.commands(&goal(Some((0.0, 0.0)), Some(0.0)), || pose).collect();
        assert!(commands.len() <= 5);
        assert!(commands.iter().all(Twist::is_zero));
    }

    #[test]
    fn test_overshoot_ends_drive_phase() {
        let mut nav = navigator();
        let mut run = nav.plan(&goal(Some((1.0, 0.0)), None));
        let start = Pose::at(0.0, 0.0, 0.0);
        nav.step(&mut run, &start);
        nav.step(&mut run, &start);
        assert_eq!(run.remaining_phases(), 1);

        let driving = nav.step(&mut run, &Pose::at(0.5, 0.0, 0.0)).unwrap();
        assert!(driving.linear > 0.0);
        // Past the target by more than the tolerance
        assert_eq!(nav.step(&mut run, &Pose::at(1.1, 0.0, 0.0)), Some(Twist::ZERO));
        assert!(run.is_finished());
    }

    #[test]
    fn test_backwards_drives_in_reverse() {
        let mut nav = navigator();
        let backwards = NavGoal::new(Some((-1.0, 0.0)), None, true).unwrap();
        let mut run = nav.plan(&backwards);
        let start = Pose::at(0.0, 0.0, 0.0);
        // Facing away from the target is already aligned for reversing
        nav.step(&mut run, &start);
        assert_eq!(nav.step(&mut run, &start), Some(Twist::ZERO));
        let twist = nav.step(&mut run, &start).unwrap();
        assert!(twist.linear < 0.0);
        assert_eq!(twist.angular, 0.0);
    }

    #[test]
    fn test_steers_toward_target_while_driving() {
        let mut nav = navigator();
        let mut run = nav.plan(&goal(Some((1.0, 0.0)), None));
        let start = Pose::at(0.0, 0.0, 0.0);
        nav.step(&mut run, &start);
        nav.step(&mut run, &start);
        // Robot drifted right of the line: target is to the left
        let twist = nav.step(&mut run, &Pose::at(0.3, -0.1, 0.0)).unwrap();
        assert!(twist.linear > 0.0);
        assert!(twist.angular > 0.0);
    }

    #[test]
    fn test_stop_request_ends_run() {
        let mut nav = navigator();
        let mut run = nav.plan(&goal(None, Some(90.0)));
        let stop = nav.stop_handle();
        assert!(nav.step(&mut run, &Pose::default()).is_some());
        stop.store(true, Ordering::SeqCst);
        assert_eq!(nav.step(&mut run, &Pose::default()), None);
        // A new plan clears the request
        let mut run = nav.plan(&goal(None, Some(90.0)));
        assert!(nav.step(&mut run, &Pose::default()).is_some());
    }

    #[test]
    fn test_speed_factor_updates_tolerance() {
        let mut nav = navigator();
        assert!(nav.set_angular_speed_factor(0.0).is_err());
        nav.set_linear_speed_factor(0.5).unwrap();
        nav.set_angular_speed_factor(1.0).unwrap();
        approx::assert_relative_eq!(nav.criteria().max_distance_error(), 0.01);
        approx::assert_relative_eq!(nav.criteria().max_angle_error(), 3f64.to_radians());
        assert_eq!(nav.linear_speed_factor(), 0.5);
        assert_eq!(nav.angular_speed_factor(), 1.0);
    }
}
