//! Dead-reckoning pose filter
//!
//! Linear Kalman filter over the state `[x, y, θ, v, ω]`. The control
//! input of each predict is the previous odometry measurement, which
//! tracks the robot better than the command last sent to the MCU.
//!
//! Predict:
//!
//! ```text
//! x' = F·x + B(θ, ω, dt)·u        F = diag(1, 1, 1, 0, 0)
//! P' = F·P·Fᵀ + Q
//!
//!      | dt·cos(θ + ½·dt·ω)  0  |
//!      | dt·sin(θ + ½·dt·ω)  0  |
//! B =  | 0                   dt |
//!      | 1                   0  |
//!      | 0                   1  |
//! ```
//!
//! The covariance is propagated with `F` itself as the Jacobian. An
//! optional gyroscope reading of ω is fused with `H = [0 0 0 0 1]`.

use crate::utils::normalize_angle;
use nalgebra::{SMatrix, SVector, Vector2};
use std::collections::VecDeque;

type StateVector = SVector<f64, 5>;
type Covariance = SMatrix<f64, 5, 5>;

/// State indices
const X: usize = 0;
const Y: usize = 1;
const THETA: usize = 2;
const V: usize = 3;
const W: usize = 4;

/// Initial covariance: the start pose is known
const INITIAL_VARIANCE: f64 = 1e-6;

/// Wheel speed resolution of the encoders (m/s), used directly as sigma
const LINEAR_VELOCITY_SIGMA: f64 = 0.005;

/// Step length the process sigmas are expressed for (s)
const SIGMA_DEFAULT_DT: f64 = 0.1;

/// Gyroscope ω sigma (°/s)
const GYRO_SIGMA_DEG: f64 = 0.5;

/// Snapshot of the filter state
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Pose {
    /// Position (m)
    pub x: f64,
    pub y: f64,
    /// Heading (rad) in (-π, π]
    pub theta: f64,
    /// Linear velocity (m/s)
    pub v: f64,
    /// Angular velocity (rad/s)
    pub w: f64,
    /// 2σ tolerances of the fields above
    pub x_tolerance: f64,
    pub y_tolerance: f64,
    pub theta_tolerance: f64,
    pub v_tolerance: f64,
    pub w_tolerance: f64,
}

impl Pose {
    /// Exact pose with zero velocity and zero uncertainty
    pub fn at(x: f64, y: f64, theta: f64) -> Self {
        Self {
            x,
            y,
            theta,
            ..Self::default()
        }
    }

    pub fn angle_deg(&self) -> f64 {
        self.theta.to_degrees()
    }

    pub fn angle_tolerance_deg(&self) -> f64 {
        self.theta_tolerance.to_degrees()
    }

    pub fn position(&self) -> (f64, f64) {
        (self.x, self.y)
    }
}

impl std::fmt::Display for Pose {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "x={:.3}±{:.3} m, y={:.3}±{:.3} m, θ={:.1}±{:.1}°, v={:.3} m/s, ω={:.1}°/s",
            self.x,
            self.x_tolerance,
            self.y,
            self.y_tolerance,
            self.angle_deg(),
            self.angle_tolerance_deg(),
            self.v,
            self.w.to_degrees()
        )
    }
}

/// Five-state pose filter
#[derive(Debug, Clone)]
pub struct PoseFilter {
    x: StateVector,
    p: Covariance,
    q: Covariance,
    f: Covariance,
    gyro_variance: f64,
    /// Last two odometry measurements, oldest first
    velocities: VecDeque<Vector2<f64>>,
}

impl PoseFilter {
    /// Filter tuned for odometry sampled at `measurement_frequency` Hz
    pub fn new(measurement_frequency: f64) -> Self {
        let q_sigma = LINEAR_VELOCITY_SIGMA / (SIGMA_DEFAULT_DT * measurement_frequency);
        let q = Covariance::from_diagonal(&StateVector::from([
            q_sigma * q_sigma,
            q_sigma * q_sigma,
            q_sigma.to_radians(),
            q_sigma * q_sigma,
            q_sigma * q_sigma,
        ]));
        let f = Covariance::from_diagonal(&StateVector::from([1.0, 1.0, 1.0, 0.0, 0.0]));

        let mut velocities = VecDeque::with_capacity(2);
        velocities.push_back(Vector2::zeros());

        Self {
            x: StateVector::zeros(),
            p: Covariance::identity() * INITIAL_VARIANCE,
            q,
            f,
            gyro_variance: GYRO_SIGMA_DEG.to_radians().powi(2),
            velocities,
        }
    }

    /// Fold in one odometry sample `(v, ω)` taken `dt` seconds after the
    /// previous one, plus an optional gyroscope ω
    pub fn add_measurements(&mut self, odometry: (f64, f64), dt: f64, gyro: Option<f64>) {
        if self.velocities.len() == 2 {
            self.velocities.pop_front();
        }
        self.velocities.push_back(Vector2::new(odometry.0, odometry.1));
        let u = self.velocities[0];

        self.predict(&u, dt);
        if let Some(w) = gyro {
            self.update_gyro(w);
        }
        self.x[THETA] = normalize_angle(self.x[THETA]);
    }

    fn predict(&mut self, u: &Vector2<f64>, dt: f64) {
        let heading = self.x[THETA] + 0.5 * dt * self.x[W];
        #[rustfmt::skip]
        let b = SMatrix::<f64, 5, 2>::new(
            dt * heading.cos(), 0.0,
            dt * heading.sin(), 0.0,
            0.0, dt,
            1.0, 0.0,
            0.0, 1.0,
        );
        self.x = self.f * self.x + b * u;
        self.p = self.f * self.p * self.f.transpose() + self.q;
    }

    /// Scalar Kalman update of ω, Joseph form
    fn update_gyro(&mut self, w: f64) {
        let mut h = SMatrix::<f64, 1, 5>::zeros();
        h[(0, W)] = 1.0;

        let s = (h * self.p * h.transpose())[(0, 0)] + self.gyro_variance;
        if s <= 0.0 {
            return;
        }
        let k = self.p * h.transpose() / s;
        let innovation = w - self.x[W];
        self.x += k * innovation;

        let i_kh = Covariance::identity() - k * h;
        self.p = i_kh * self.p * i_kh.transpose() + k * k.transpose() * self.gyro_variance;
        self.p = (self.p + self.p.transpose()) * 0.5;
    }

    /// Zero the position and heading, keep velocities and covariance
    pub fn reset_pose(&mut self) {
        self.x[X] = 0.0;
        self.x[Y] = 0.0;
        self.x[THETA] = 0.0;
    }

    pub fn x(&self) -> f64 {
        self.x[X]
    }

    pub fn y(&self) -> f64 {
        self.x[Y]
    }

    /// Heading (rad)
    pub fn theta(&self) -> f64 {
        self.x[THETA]
    }

    /// Heading (degrees)
    pub fn angle(&self) -> f64 {
        self.x[THETA].to_degrees()
    }

    pub fn v(&self) -> f64 {
        self.x[V]
    }

    pub fn w(&self) -> f64 {
        self.x[W]
    }

    /// 2σ of state `index`
    #[inline]
    fn tolerance(&self, index: usize) -> f64 {
        2.0 * self.p[(index, index)].max(0.0).sqrt()
    }

    pub fn x_tolerance(&self) -> f64 {
        self.tolerance(X)
    }

    pub fn y_tolerance(&self) -> f64 {
        self.tolerance(Y)
    }

    pub fn theta_tolerance(&self) -> f64 {
        self.tolerance(THETA)
    }

    pub fn v_tolerance(&self) -> f64 {
        self.tolerance(V)
    }

    pub fn w_tolerance(&self) -> f64 {
        self.tolerance(W)
    }

    pub fn covariance(&self) -> &SMatrix<f64, 5, 5> {
        &self.p
    }

    pub fn pose(&self) -> Pose {
        Pose {
            x: self.x(),
            y: self.y(),
            theta: self.theta(),
            v: self.v(),
            w: self.w(),
            x_tolerance: self.x_tolerance(),
            y_tolerance: self.y_tolerance(),
            theta_tolerance: self.theta_tolerance(),
            v_tolerance: self.v_tolerance(),
            w_tolerance: self.w_tolerance(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::{assert_abs_diff_eq, assert_relative_eq};
    use std::f64::consts::{FRAC_PI_2, PI};

    fn assert_symmetric(p: &SMatrix<f64, 5, 5>) {
        for i in 0..5 {
            for j in 0..5 {
                assert_abs_diff_eq!(p[(i, j)], p[(j, i)], epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn test_zero_input_keeps_pose_and_grows_uncertainty() {
        let mut filter = PoseFilter::new(10.0);
        let mut last_pxx = filter.covariance()[(X, X)];
        let mut last_theta_tol = filter.theta_tolerance();
        for _ in 0..100 {
            filter.add_measurements((0.0, 0.0), 0.1, None);
            assert_eq!((filter.x(), filter.y(), filter.theta()), (0.0, 0.0, 0.0));
            let pxx = filter.covariance()[(X, X)];
            assert!(pxx > last_pxx);
            assert!(filter.theta_tolerance() > last_theta_tol);
            last_pxx = pxx;
            last_theta_tol = filter.theta_tolerance();
            assert_symmetric(filter.covariance());
        }
    }

    #[test]
    fn test_process_noise_scales_with_frequency() {
        let mut slow = PoseFilter::new(10.0);
        let mut fast = PoseFilter::new(20.0);
        slow.add_measurements((0.0, 0.0), 0.1, None);
        fast.add_measurements((0.0, 0.0), 0.05, None);
        let q_slow = slow.covariance()[(X, X)] - INITIAL_VARIANCE;
        let q_fast = fast.covariance()[(X, X)] - INITIAL_VARIANCE;
        assert_relative_eq!(q_slow, 0.005 * 0.005, epsilon = 1e-15);
        assert_relative_eq!(q_slow / q_fast, 4.0, epsilon = 1e-9);
    }

    #[test]
    fn test_uses_previous_measurement_as_input() {
        let mut filter = PoseFilter::new(10.0);
        filter.add_measurements((0.2, 0.0), 0.1, None);
        // First predict integrates the initial zero measurement
        assert_eq!(filter.x(), 0.0);
        assert_eq!(filter.v(), 0.0);

        filter.add_measurements((0.2, 0.0), 0.1, None);
        assert_relative_eq!(filter.x(), 0.02, epsilon = 1e-12);
        assert_relative_eq!(filter.v(), 0.2);
        assert_eq!(filter.y(), 0.0);
    }

    #[test]
    fn test_straight_line_distance() {
        let mut filter = PoseFilter::new(10.0);
        for _ in 0..11 {
            filter.add_measurements((0.1, 0.0), 0.1, None);
        }
        assert_relative_eq!(filter.x(), 0.1, epsilon = 1e-9);
        assert_abs_diff_eq!(filter.y(), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_heading_integrates_and_wraps() {
        let mut filter = PoseFilter::new(10.0);
        filter.add_measurements((0.0, 1.0), 0.1, None);
        for _ in 0..30 {
            filter.add_measurements((0.0, 1.0), 0.1, None);
            assert!(filter.theta() > -PI && filter.theta() <= PI);
        }
        // 3 rad of turning
        assert_relative_eq!(filter.theta(), 3.0, epsilon = 1e-9);
        filter.add_measurements((0.0, 1.0), 0.2, None);
        assert_relative_eq!(filter.theta(), 3.2 - 2.0 * PI, epsilon = 1e-9);
    }

    #[test]
    fn test_arc_uses_mid_step_heading() {
        let mut filter = PoseFilter::new(10.0);
        filter.add_measurements((1.0, FRAC_PI_2), 1.0, None);
        filter.add_measurements((1.0, FRAC_PI_2), 1.0, None);
        // Heading at the start of the step was 0 and ω was still 0
        assert_relative_eq!(filter.x(), 1.0, epsilon = 1e-12);
        assert_relative_eq!(filter.theta(), FRAC_PI_2, epsilon = 1e-12);
        filter.add_measurements((1.0, FRAC_PI_2), 1.0, None);
        // Now ω = π/2, so the step runs along θ + π/4
        let mid = FRAC_PI_2 + 0.5 * FRAC_PI_2;
        assert_relative_eq!(filter.x(), 1.0 + mid.cos(), epsilon = 1e-12);
        assert_relative_eq!(filter.y(), mid.sin(), epsilon = 1e-12);
    }

    #[test]
    fn test_gyro_update_pulls_angular_velocity() {
        let mut odometry_only = PoseFilter::new(10.0);
        let mut fused = PoseFilter::new(10.0);
        for filter in [&mut odometry_only, &mut fused] {
            filter.add_measurements((0.0, 0.5), 0.1, None);
        }
        odometry_only.add_measurements((0.0, 0.5), 0.1, None);
        fused.add_measurements((0.0, 0.5), 0.1, Some(1.0));

        assert_relative_eq!(odometry_only.w(), 0.5);
        assert!(fused.w() > 0.5 && fused.w() < 1.0);
        assert!(fused.w_tolerance() < odometry_only.w_tolerance());
        assert_symmetric(fused.covariance());
    }

    #[test]
    fn test_gyro_gain_matches_half_degree_sigma() {
        let mut filter = PoseFilter::new(10.0);
        filter.add_measurements((0.0, 0.0), 0.1, Some(1.0));

        // ω is fully replaced on predict, so its prior variance is Qσ²
        let prior = 0.005 * 0.005;
        let r = 0.5f64.to_radians().powi(2);
        let gain = prior / (prior + r);
        assert_relative_eq!(filter.w(), gain, epsilon = 1e-12);
        assert_relative_eq!(filter.covariance()[(W, W)], (1.0 - gain) * prior, epsilon = 1e-15);
    }

    #[test]
    fn test_reset_pose() {
        let mut filter = PoseFilter::new(10.0);
        for _ in 0..5 {
            filter.add_measurements((0.3, 0.4), 0.1, None);
        }
        assert!(filter.x() != 0.0 && filter.theta() != 0.0);
        filter.reset_pose();
        assert_eq!((filter.x(), filter.y(), filter.theta()), (0.0, 0.0, 0.0));

        let mut filter = PoseFilter::new(10.0);
        filter.reset_pose();
        filter.add_measurements((0.0, 0.0), 0.1, None);
        assert_eq!((filter.x(), filter.y(), filter.theta()), (0.0, 0.0, 0.0));
    }

    #[test]
    fn test_pose_snapshot() {
        let mut filter = PoseFilter::new(10.0);
        filter.add_measurements((0.1, 0.0), 0.1, None);
        let pose = filter.pose();
        assert_eq!(pose.x, filter.x());
        assert_relative_eq!(pose.x_tolerance, 2.0 * filter.covariance()[(X, X)].sqrt());
        assert_relative_eq!(pose.angle_deg(), filter.angle());
        let exact = Pose::at(1.0, 2.0, 0.5);
        assert_eq!(exact.position(), (1.0, 2.0));
        assert_eq!(exact.x_tolerance, 0.0);
    }
}
