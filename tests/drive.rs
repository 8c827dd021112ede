//! Drive integration tests against the simulated plate.
//!
//! The mock integrates each motor's odometer at the commanded rpm, so the
//! encoder feedback seen here is what the MCU would report on a perfect floor.

#![cfg(feature = "mock")]

mod common;

use approx::assert_relative_eq;
use chakra::motor::GEAR_RATIO;
use chakra::plate::registers::MotorPort;
use chakra::{DriveController, Error};
use std::f64::consts::FRAC_PI_4;
use std::time::Duration;

fn drive() -> (chakra::transport::MockPlate, DriveController) {
    let (plate, session) = common::session();
    let drive = DriveController::new(&session, &common::config().drive).unwrap();
    (plate, drive)
}

/// Largest speed error from rounding a wheel rpm to whole DC-motor rpm
fn rpm_quantum(drive: &DriveController) -> f64 {
    drive.left_motor().wheel_circumference() / 60.0 / GEAR_RATIO
}

// ============================================================================
// Twist commands
// ============================================================================

#[test]
fn test_forward_odometry_matches_command() {
    let (_plate, mut drive) = drive();
    drive.forward(0.5, false, None).unwrap();

    let (v, w) = drive.odometry().unwrap();
    assert_relative_eq!(v, 0.5 * drive.max_motor_speed(), epsilon = rpm_quantum(&drive));
    assert_relative_eq!(w, 0.0, epsilon = 1e-3);

    drive.stop().unwrap();
    let (v, w) = drive.odometry().unwrap();
    assert_eq!((v, w), (0.0, 0.0));
}

#[test]
fn test_backward_reverses_both_wheels() {
    let (_plate, mut drive) = drive();
    drive.backward(0.25, false, None).unwrap();
    let left = drive.left_motor().current_speed().unwrap();
    let right = drive.right_motor().current_speed().unwrap();
    assert!(left < 0.0 && right < 0.0);
    assert_relative_eq!(left, right, epsilon = 1e-9);
}

#[test]
fn test_spin_in_place_turns_counter_clockwise() {
    let (_plate, mut drive) = drive();
    drive.left(0.5, 0.0, None).unwrap();
    let (v, w) = drive.odometry().unwrap();
    assert_relative_eq!(v, 0.0, epsilon = 1e-3);
    assert_relative_eq!(w, 0.5 * drive.max_robot_angular_speed(), epsilon = 0.01);
}

#[test]
fn test_turn_keeps_held_speed() {
    let (_plate, mut drive) = drive();
    drive.forward(0.4, true, None).unwrap();
    drive.right(0.2, 0.0, None).unwrap();
    let (v, w) = drive.odometry().unwrap();
    assert_relative_eq!(v, drive.linear_speed_hold(), epsilon = rpm_quantum(&drive));
    assert!(w < 0.0);

    drive.stop_rotation().unwrap();
    let (v, w) = drive.odometry().unwrap();
    assert_relative_eq!(v, drive.linear_speed_hold(), epsilon = rpm_quantum(&drive));
    assert_relative_eq!(w, 0.0, epsilon = 1e-3);
}

#[test]
fn test_bounded_move_stops_after_distance() {
    let (plate, mut drive) = drive();
    drive.forward(1.0, false, Some(0.1)).unwrap();

    let (left, right) = (drive.left_motor(), drive.right_motor());
    assert!(common::eventually(Duration::from_secs(2), || {
        left.current_rpm().unwrap() == 0.0 && right.current_rpm().unwrap() == 0.0
    }));
    // Bounded moves resolve to whole DC-motor rotations
    let one_rotation = left.wheel_circumference() / GEAR_RATIO;
    assert_relative_eq!(left.distance().unwrap(), 0.1, epsilon = one_rotation);
    assert_relative_eq!(right.distance().unwrap(), 0.1, epsilon = one_rotation);
    assert_eq!(plate.motor(MotorPort::M0).control_mode, 2);
}

#[test]
fn test_invalid_commands_write_nothing() {
    let (plate, mut drive) = drive();
    plate.clear_writes();
    assert!(matches!(drive.forward(1.5, false, None), Err(Error::InvalidParameter(_))));
    assert!(matches!(
        drive.robot_move(0.1, 0.0, 0.0, Some(-1.0)),
        Err(Error::InvalidParameter(_))
    ));
    assert!(matches!(
        drive.robot_move(f64::NAN, 0.0, 0.0, None),
        Err(Error::InvalidParameter(_))
    ));
    assert!(plate.writes().is_empty());
}

// ============================================================================
// Rotation
// ============================================================================

#[test]
fn test_rotate_blocks_until_turn_is_done() {
    let (_plate, mut drive) = drive();
    let started = std::time::Instant::now();
    let planned = drive.rotate(45.0, None, 0.3).unwrap();

    let expected = FRAC_PI_4 / (drive.max_robot_angular_speed() * 0.3);
    assert_relative_eq!(planned.as_secs_f64(), expected, epsilon = 1e-6);
    assert!(started.elapsed() >= planned);

    let left = drive.left_motor();
    let right = drive.right_motor();
    assert_eq!(left.current_rpm().unwrap(), 0.0);
    assert_eq!(right.current_rpm().unwrap(), 0.0);

    let arc = FRAC_PI_4 * drive.wheel_separation() / 2.0;
    let one_rotation = left.wheel_circumference() / GEAR_RATIO;
    assert_relative_eq!(left.distance().unwrap(), -arc, epsilon = one_rotation);
    assert_relative_eq!(right.distance().unwrap(), arc, epsilon = one_rotation);
}

#[test]
fn test_rotate_commands_opposite_wheel_speeds() {
    let (plate, mut drive) = drive();
    drive.rotate(90.0, None, 0.3).unwrap();

    let expected = 0.3 * drive.max_motor_speed();
    let left = drive.left_motor().target_speed().unwrap();
    let right = drive.right_motor().target_speed().unwrap();
    assert_relative_eq!(left, -expected, epsilon = rpm_quantum(&drive));
    assert_relative_eq!(right, expected, epsilon = rpm_quantum(&drive));

    // Both wheels got the same raw DC rpm magnitude
    let left_raw = plate.motor(MotorPort::M3).mode_2_rpm;
    let right_raw = plate.motor(MotorPort::M0).mode_2_rpm;
    assert_ne!(left_raw, 0);
    assert_eq!(left_raw.abs(), right_raw.abs());
}

#[test]
fn test_rotate_honours_slower_time() {
    let (_plate, mut drive) = drive();
    let planned = drive.rotate(-20.0, Some(0.4), 0.3).unwrap();
    assert_eq!(planned, Duration::from_secs_f64(0.4));
    assert!(drive.left_motor().distance().unwrap() > 0.0);
}

#[test]
fn test_rotate_reports_unplugged_plate() {
    let (plate, mut drive) = drive();
    plate.set_fail(true);
    assert!(matches!(drive.rotate(10.0, None, 0.2), Err(Error::Communication(_))));
}
