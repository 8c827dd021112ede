//! Encoder motor
//!
//! Typed view of one motor port's register window. Commands are given in
//! wheel units (rpm, m/s, rotations, metres) and converted to DC-motor units
//! through the fixed gear ratio before they reach the MCU. Every command and
//! reading is multiplied by the motor's forward-direction sign.
//!
//! | Operation | Mode | Payload |
//! |-----------|------|---------|
//! | `set_raw_power` / `set_power` | 0 | power i16 LE in [-1000, 1000] |
//! | `set_target_rpm` (no rotations) | 1 | DC rpm i16 LE |
//! | `set_target_rpm` (rotations) | 2 | target odometer i16 LE + DC rpm i16 LE |
//!
//! All arguments are validated before any I2C write.

mod types;

pub use crate::plate::registers::MotorPort;
pub use types::{BrakingType, ControlMode, Direction, ForwardDirection};

use crate::error::{Error, Result};
use crate::plate::registers::MotorRegisters;
use crate::plate::{Endian, PlateSession, PortClaim};
use std::f64::consts::PI;
use std::sync::Arc;

/// DC-motor shaft turns per wheel turn
pub const GEAR_RATIO: f64 = 41.8;

/// Highest DC-motor rpm the MCU accepts
pub const MAX_DC_MOTOR_RPM: i32 = 4800;

/// Full-scale raw power
pub const MAX_RAW_POWER: i32 = 1000;

/// Tachometer reads before an implausible value is reported as an error
const MAX_TACHOMETER_ATTEMPTS: usize = 10;

/// Tolerance on speed limit checks, absorbs float rounding in callers
const SPEED_EPSILON: f64 = 1e-9;

/// One encoder motor on a plate motor port
pub struct EncoderMotor {
    session: Arc<PlateSession>,
    _claim: PortClaim,
    port: MotorPort,
    registers: MotorRegisters,
    forward_direction: ForwardDirection,
    wheel_diameter: f64,
}

impl EncoderMotor {
    /// Claim `port` and configure its braking policy
    pub fn new(
        session: &Arc<PlateSession>,
        port: MotorPort,
        forward_direction: ForwardDirection,
        braking_type: BrakingType,
        wheel_diameter: f64,
    ) -> Result<Self> {
        validate_wheel_diameter(wheel_diameter)?;
        let claim = session.claim(port)?;
        let motor = Self {
            session: Arc::clone(session),
            _claim: claim,
            port,
            registers: port.registers(),
            forward_direction,
            wheel_diameter,
        };
        motor.set_braking_type(braking_type)?;
        log::info!(
            "EncoderMotor: {} ready ({:?}, {:?}, wheel {} m)",
            port,
            forward_direction,
            braking_type,
            wheel_diameter
        );
        Ok(motor)
    }

    pub fn port(&self) -> MotorPort {
        self.port
    }

    pub fn forward_direction(&self) -> ForwardDirection {
        self.forward_direction
    }

    pub fn wheel_diameter(&self) -> f64 {
        self.wheel_diameter
    }

    pub fn set_wheel_diameter(&mut self, diameter: f64) -> Result<()> {
        validate_wheel_diameter(diameter)?;
        self.wheel_diameter = diameter;
        Ok(())
    }

    pub fn wheel_circumference(&self) -> f64 {
        self.wheel_diameter * PI
    }

    /// Highest whole wheel rpm that stays within the DC-motor limit
    pub fn max_rpm(&self) -> f64 {
        (MAX_DC_MOTOR_RPM as f64 / GEAR_RATIO).floor()
    }

    /// Highest wheel surface speed (m/s)
    pub fn max_speed(&self) -> f64 {
        self.max_rpm() / 60.0 * self.wheel_circumference()
    }

    #[inline]
    fn sign(&self, direction: Direction) -> i32 {
        self.forward_direction.sign() * direction.sign()
    }

    // Registers

    pub fn control_mode(&self) -> Result<ControlMode> {
        ControlMode::from_register(self.session.read_u8(self.registers.control_mode)?)
    }

    pub fn set_control_mode(&self, mode: ControlMode) -> Result<()> {
        self.session.write_u8(self.registers.control_mode, mode as u8)
    }

    pub fn braking_type(&self) -> Result<BrakingType> {
        BrakingType::from_register(self.session.read_u8(self.registers.brake_type)?)
    }

    pub fn set_braking_type(&self, braking_type: BrakingType) -> Result<()> {
        self.session
            .write_u8(self.registers.brake_type, braking_type.register_value())
    }

    // Mode 0

    /// Raw mode 0 power in [-1000, 1000], no direction handling
    pub fn set_raw_power(&self, power: i32) -> Result<()> {
        if power.abs() > MAX_RAW_POWER {
            return Err(Error::InvalidParameter(format!(
                "power {} outside [-{}, {}]",
                power, MAX_RAW_POWER, MAX_RAW_POWER
            )));
        }
        self.set_control_mode(ControlMode::Power)?;
        self.session
            .write_word(self.registers.mode_0_power, power, Endian::Little, true)
    }

    /// Fractional power in [-1.0, 1.0] relative to forward
    pub fn set_power(&self, power: f64, direction: Direction) -> Result<()> {
        if !(-1.0..=1.0).contains(&power) {
            return Err(Error::InvalidParameter(format!(
                "power {} outside [-1.0, 1.0]",
                power
            )));
        }
        let raw = (power * MAX_RAW_POWER as f64).round() as i32 * self.sign(direction);
        self.set_raw_power(raw)
    }

    /// Current mode 0 power in [-1.0, 1.0] relative to forward
    pub fn power(&self) -> Result<f64> {
        let raw = self.session.read_i16(self.registers.mode_0_power, Endian::Little)?;
        Ok(raw as f64 / MAX_RAW_POWER as f64 * self.forward_direction.sign() as f64)
    }

    // Modes 1 and 2

    /// Run the wheel at `rpm`; bounded to `total_rotations` wheel turns unless 0
    pub fn set_target_rpm(&self, rpm: f64, direction: Direction, total_rotations: f64) -> Result<()> {
        if !rpm.is_finite() || !total_rotations.is_finite() {
            return Err(Error::InvalidParameter(format!(
                "non-finite target rpm {} / rotations {}",
                rpm, total_rotations
            )));
        }
        let sign = self.sign(direction) as f64;
        let dc_rpm = (rpm * GEAR_RATIO).round() * sign;
        if dc_rpm.abs() > MAX_DC_MOTOR_RPM as f64 {
            return Err(Error::InvalidParameter(format!(
                "{} rpm exceeds the {} rpm limit of {}",
                rpm,
                self.max_rpm(),
                self.port
            )));
        }
        let dc_rpm = dc_rpm as i32;

        if total_rotations == 0.0 {
            log::debug!("EncoderMotor: {} mode 1, {} dc rpm", self.port, dc_rpm);
            self.set_control_mode(ControlMode::Rpm)?;
            return self
                .session
                .write_word(self.registers.mode_1_rpm, dc_rpm, Endian::Little, true);
        }

        let dc_rotations = (total_rotations * GEAR_RATIO).round() * sign;
        if dc_rotations.abs() > i16::MAX as f64 {
            return Err(Error::InvalidParameter(format!(
                "{} rotations is beyond a single bounded move",
                total_rotations
            )));
        }
        // The MCU compares against the 16-bit truncation of its odometer
        let odometer = self.session.read_i32(self.registers.odometer, Endian::Little)?;
        let target = (odometer as i16).wrapping_add(dc_rotations as i16);

        log::debug!(
            "EncoderMotor: {} mode 2, {} dc rpm until odometer {}",
            self.port,
            dc_rpm,
            target
        );
        self.set_control_mode(ControlMode::RpmWithRotations)?;
        let mut payload = [0u8; 4];
        payload[..2].copy_from_slice(&target.to_le_bytes());
        payload[2..].copy_from_slice(&(dc_rpm as i16).to_le_bytes());
        self.session
            .write_n_bytes(self.registers.mode_2_rpm_with_rotations, &payload)
    }

    /// Commanded wheel rpm of the active mode (0 in power mode)
    pub fn target_rpm(&self) -> Result<f64> {
        let dc_rpm = match self.control_mode()? {
            ControlMode::Power => 0,
            ControlMode::Rpm => self.session.read_i16(self.registers.mode_1_rpm, Endian::Little)?,
            ControlMode::RpmWithRotations => {
                let bytes = self
                    .session
                    .read_bytes(self.registers.mode_2_rpm_with_rotations, 4)?;
                i16::from_le_bytes([bytes[2], bytes[3]])
            }
        };
        Ok(dc_rpm as f64 / GEAR_RATIO * self.forward_direction.sign() as f64)
    }

    /// Run the wheel at `speed` m/s; bounded to `distance` metres unless 0
    pub fn set_target_speed(&self, speed: f64, direction: Direction, distance: f64) -> Result<()> {
        if !speed.is_finite() || speed.abs() > self.max_speed() + SPEED_EPSILON {
            return Err(Error::InvalidParameter(format!(
                "speed {} m/s outside ±{:.3} m/s",
                speed,
                self.max_speed()
            )));
        }
        let circumference = self.wheel_circumference();
        let rpm = 60.0 * speed / circumference;
        let rotations = distance / circumference;
        self.set_target_rpm(rpm, direction, rotations)
    }

    pub fn target_speed(&self) -> Result<f64> {
        Ok(self.target_rpm()? / 60.0 * self.wheel_circumference())
    }

    // Feedback

    /// Measured wheel rpm
    pub fn current_rpm(&self) -> Result<f64> {
        for _ in 0..MAX_TACHOMETER_ATTEMPTS {
            let dc_rpm = self.session.read_i16(self.registers.tachometer, Endian::Little)?;
            if (dc_rpm as i32).abs() <= MAX_DC_MOTOR_RPM {
                return Ok(dc_rpm as f64 / GEAR_RATIO * self.forward_direction.sign() as f64);
            }
            log::debug!("EncoderMotor: {} discarding tachometer {}", self.port, dc_rpm);
        }
        Err(Error::Communication(format!(
            "{} tachometer implausible after {} reads",
            self.port, MAX_TACHOMETER_ATTEMPTS
        )))
    }

    /// Measured wheel surface speed (m/s)
    pub fn current_speed(&self) -> Result<f64> {
        Ok(self.current_rpm()? / 60.0 * self.wheel_circumference())
    }

    /// Wheel turns since power-on
    pub fn rotation_counter(&self) -> Result<f64> {
        let dc_rotations = self.session.read_i32(self.registers.odometer, Endian::Little)?;
        Ok(dc_rotations as f64 / GEAR_RATIO * self.forward_direction.sign() as f64)
    }

    /// Distance rolled since power-on (m)
    pub fn distance(&self) -> Result<f64> {
        Ok(self.rotation_counter()? * self.wheel_circumference())
    }

    /// Issue the zero command of whichever mode is active
    pub fn stop(&self) -> Result<()> {
        match self.control_mode()? {
            ControlMode::Power => self.set_raw_power(0),
            ControlMode::Rpm => {
                self.set_control_mode(ControlMode::Rpm)?;
                self.session
                    .write_word(self.registers.mode_1_rpm, 0, Endian::Little, true)
            }
            ControlMode::RpmWithRotations => {
                self.set_control_mode(ControlMode::RpmWithRotations)?;
                self.session
                    .write_n_bytes(self.registers.mode_2_rpm_with_rotations, &[0; 4])
            }
        }
    }
}

impl Drop for EncoderMotor {
    fn drop(&mut self) {
        if self.session.is_connected() {
            if let Err(e) = self.stop() {
                log::warn!("EncoderMotor: {} failed to stop on drop: {}", self.port, e);
            }
        }
    }
}

impl std::fmt::Debug for EncoderMotor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncoderMotor")
            .field("port", &self.port)
            .field("forward_direction", &self.forward_direction)
            .field("wheel_diameter", &self.wheel_diameter)
            .finish()
    }
}

fn validate_wheel_diameter(diameter: f64) -> Result<()> {
    if diameter > 0.0 && diameter.is_finite() {
        Ok(())
    } else {
        Err(Error::InvalidParameter(format!(
            "wheel diameter must be positive, got {}",
            diameter
        )))
    }
}
