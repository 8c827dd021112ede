//! PID controller with output limits and anti-windup
//!
//! Error is `setpoint - input`. The derivative acts on the measurement
//! (not the error), so setpoint jumps produce no derivative kick. The
//! integral term is accumulated already multiplied by `ki` and clamped to
//! the output limits.

use std::time::Instant;

/// Smallest dt accepted, guards the derivative term against division by zero
const MIN_DT: f64 = 1e-16;

/// PID gains
#[derive(Debug, Clone, Copy, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct PidGains {
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
}

/// Discrete PID controller
#[derive(Debug, Clone)]
pub struct Pid {
    gains: PidGains,
    setpoint: f64,
    limits: (f64, f64),
    integral: f64,
    last_input: Option<f64>,
    last_time: Instant,
}

impl Pid {
    /// Create a controller bounded to `±limit`
    pub fn new(gains: PidGains, setpoint: f64, limit: f64) -> Self {
        let limit = limit.abs();
        Self {
            gains,
            setpoint,
            limits: (-limit, limit),
            integral: 0.0,
            last_input: None,
            last_time: Instant::now(),
        }
    }

    pub fn gains(&self) -> PidGains {
        self.gains
    }

    pub fn set_gains(&mut self, gains: PidGains) {
        self.gains = gains;
    }

    pub fn output_limit(&self) -> f64 {
        self.limits.1
    }

    /// Change the output bound, clamping the stored integral to it
    pub fn set_output_limit(&mut self, limit: f64) {
        let limit = limit.abs();
        self.limits = (-limit, limit);
        self.integral = self.clamp(self.integral);
    }

    /// Compute the next output using wall-clock time since the previous call
    pub fn update(&mut self, input: f64) -> f64 {
        let now = Instant::now();
        let dt = now.duration_since(self.last_time).as_secs_f64();
        self.last_time = now;
        self.step(input, dt)
    }

    /// Compute the next output for an explicit time step
    pub fn update_with_dt(&mut self, input: f64, dt: f64) -> f64 {
        self.last_time = Instant::now();
        self.step(input, dt)
    }

    /// Clear integral and derivative memory
    pub fn reset(&mut self) {
        self.integral = 0.0;
        self.last_input = None;
        self.last_time = Instant::now();
    }

    fn step(&mut self, input: f64, dt: f64) -> f64 {
        let dt = dt.max(MIN_DT);
        let error = self.setpoint - input;
        let d_input = self.last_input.map_or(0.0, |last| input - last);

        let proportional = self.gains.kp * error;
        self.integral = self.clamp(self.integral + self.gains.ki * error * dt);
        let derivative = -self.gains.kd * d_input / dt;

        self.last_input = Some(input);
        self.clamp(proportional + self.integral + derivative)
    }

    #[inline]
    fn clamp(&self, value: f64) -> f64 {
        value.clamp(self.limits.0, self.limits.1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn gains(kp: f64, ki: f64, kd: f64) -> PidGains {
        PidGains { kp, ki, kd }
    }

    #[test]
    fn test_proportional_only() {
        let mut pid = Pid::new(gains(2.0, 0.0, 0.0), 0.0, 10.0);
        assert_relative_eq!(pid.update_with_dt(1.5, 0.1), -3.0);
        assert_relative_eq!(pid.update_with_dt(-1.0, 0.1), 2.0);
    }

    #[test]
    fn test_output_is_clamped() {
        let mut pid = Pid::new(gains(100.0, 0.0, 0.0), 0.0, 1.0);
        assert_relative_eq!(pid.update_with_dt(5.0, 0.1), -1.0);
        assert_relative_eq!(pid.update_with_dt(-5.0, 0.1), 1.0);
    }

    #[test]
    fn test_integral_accumulates_and_is_clamped() {
        let mut pid = Pid::new(gains(0.0, 1.0, 0.0), 0.0, 0.5);
        assert_relative_eq!(pid.update_with_dt(-1.0, 0.1), 0.1, epsilon = 1e-12);
        assert_relative_eq!(pid.update_with_dt(-1.0, 0.1), 0.2, epsilon = 1e-12);
        for _ in 0..100 {
            pid.update_with_dt(-1.0, 0.1);
        }
        assert_relative_eq!(pid.update_with_dt(-1.0, 0.1), 0.5);

        // Wound-up integral unwinds immediately once the error flips
        let out = pid.update_with_dt(1.0, 0.1);
        assert!(out < 0.5);
    }

    #[test]
    fn test_derivative_on_measurement() {
        let mut pid = Pid::new(gains(0.0, 0.0, 1.0), 0.0, 100.0);
        // First sample has no history
        assert_relative_eq!(pid.update_with_dt(1.0, 0.1), 0.0);
        // Input rising by 1 over 0.1 s opposes with -10
        assert_relative_eq!(pid.update_with_dt(2.0, 0.1), -10.0, epsilon = 1e-9);
    }

    #[test]
    fn test_reset_clears_memory() {
        let mut pid = Pid::new(gains(0.0, 1.0, 1.0), 0.0, 100.0);
        pid.update_with_dt(-1.0, 0.5);
        pid.update_with_dt(-2.0, 0.5);
        pid.reset();
        assert_relative_eq!(pid.update_with_dt(-1.0, 0.5), 0.5);
    }

    #[test]
    fn test_set_output_limit_clamps_integral() {
        let mut pid = Pid::new(gains(0.0, 1.0, 0.0), 0.0, 10.0);
        pid.update_with_dt(-1.0, 5.0);
        pid.set_output_limit(2.0);
        assert_relative_eq!(pid.output_limit(), 2.0);
        assert_relative_eq!(pid.update_with_dt(0.0, 0.1), 2.0);
    }
}
