//! Shared utility functions

use std::f64::consts::{PI, TAU};

/// Normalize angle to (-π, π]
///
/// Uses `((θ + π) mod 2π) − π` with a Euclidean remainder, then folds the
/// single point -π onto +π.
#[inline]
pub fn normalize_angle(angle: f64) -> f64 {
    let a = (angle + PI).rem_euclid(TAU) - PI;
    if a <= -PI { a + TAU } else { a }
}

/// Magnitude of `magnitude` with the sign of `sign`, treating `0.0` as positive
#[inline]
pub fn with_sign_of(magnitude: f64, sign: f64) -> f64 {
    magnitude.abs().copysign(sign)
}

/// Robot twist `[v, ω]` from left/right wheel speeds (m/s)
#[inline]
pub fn odometry_from_wheels(left: f64, right: f64, wheel_separation: f64) -> (f64, f64) {
    ((right + left) / 2.0, (right - left) / wheel_separation)
}

/// Check that a value lies in the half-open factor range (0, 1]
pub fn validate_factor(name: &str, value: f64) -> crate::Result<()> {
    if value > 0.0 && value <= 1.0 {
        Ok(())
    } else {
        Err(crate::Error::Configuration(format!(
            "{} must be in (0, 1], got {}",
            name, value
        )))
    }
}
