//! Differential-drive kinematics
//!
//! Positive angular speed turns the robot counter-clockwise, so the right
//! wheel runs faster than the left.

/// Twist to wheel-speed conversion for a two-wheel chassis
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WheelKinematics {
    wheel_separation: f64,
    max_motor_speed: f64,
}

impl WheelKinematics {
    pub fn new(wheel_separation: f64, max_motor_speed: f64) -> Self {
        Self {
            wheel_separation,
            max_motor_speed,
        }
    }

    pub fn wheel_separation(&self) -> f64 {
        self.wheel_separation
    }

    /// Highest wheel surface speed either motor is commanded to (m/s)
    pub fn max_motor_speed(&self) -> f64 {
        self.max_motor_speed
    }

    /// Turn rate with one wheel at full speed forward and the other backward
    pub fn max_robot_angular_speed(&self) -> f64 {
        self.max_motor_speed / (self.wheel_separation / 2.0)
    }

    /// Wheel speeds `(left, right)` for a twist about a point `turn_radius`
    /// to the left of the robot centre
    ///
    /// If either wheel would exceed `max_motor_speed`, both are scaled by the
    /// same factor so the path curvature is preserved.
    pub fn wheel_speeds(&self, linear: f64, angular: f64, turn_radius: f64) -> (f64, f64) {
        let half = self.wheel_separation / 2.0;
        let mut right = linear + (turn_radius + half) * angular;
        let mut left = linear + (turn_radius - half) * angular;

        let fastest = left.abs().max(right.abs());
        if fastest > self.max_motor_speed {
            let factor = self.max_motor_speed / fastest;
            left *= factor;
            right *= factor;
        }
        (left, right)
    }

    /// Robot twist `(v, ω)` from wheel speeds
    pub fn twist(&self, left: f64, right: f64) -> (f64, f64) {
        crate::utils::odometry_from_wheels(left, right, self.wheel_separation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn chassis() -> WheelKinematics {
        WheelKinematics::new(0.163, 0.4)
    }

    #[test]
    fn test_max_angular_speed() {
        let k = chassis();
        assert_relative_eq!(k.max_robot_angular_speed(), 0.4 / 0.0815);
        assert_relative_eq!(k.max_robot_angular_speed(), 4.9079754, epsilon = 1e-6);
    }

    #[test]
    fn test_straight_line() {
        let (l, r) = chassis().wheel_speeds(0.2, 0.0, 0.0);
        assert_relative_eq!(l, 0.2);
        assert_relative_eq!(r, 0.2);
    }

    #[test]
    fn test_curved_turn_is_scaled_uniformly() {
        let (l, r) = chassis().wheel_speeds(0.3, 0.3, 0.8);
        // Unscaled: (0.51555, 0.56445)
        let factor = 0.4 / 0.56445;
        assert_relative_eq!(r, 0.4, epsilon = 1e-12);
        assert_relative_eq!(l, 0.51555 * factor, epsilon = 1e-9);
        assert_relative_eq!(l, 0.365, epsilon = 1e-3);
        // Ratio is preserved
        assert_relative_eq!(l / r, 0.51555 / 0.56445, epsilon = 1e-9);
    }

    #[test]
    fn test_rotation_in_place() {
        let (l, r) = chassis().wheel_speeds(0.0, 1.0, 0.0);
        assert_relative_eq!(l, -0.0815);
        assert_relative_eq!(r, 0.0815);
    }

    #[test]
    fn test_scaling_never_exceeds_limit() {
        let k = chassis();
        for i in -10..=10 {
            for j in -10..=10 {
                for radius in [-1.0, -0.1, 0.0, 0.05, 0.5] {
                    let (l, r) = k.wheel_speeds(i as f64 * 0.1, j as f64 * 0.7, radius);
                    assert!(l.abs() <= 0.4 + 1e-12 && r.abs() <= 0.4 + 1e-12);
                }
            }
        }
    }

    #[test]
    fn test_twist_inverts_wheel_speeds() {
        let k = chassis();
        let (l, r) = k.wheel_speeds(0.1, 0.5, 0.0);
        let (v, w) = k.twist(l, r);
        assert_relative_eq!(v, 0.1, epsilon = 1e-12);
        assert_relative_eq!(w, 0.5, epsilon = 1e-12);
    }
}
