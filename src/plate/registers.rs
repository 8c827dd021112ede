//! Plate MCU register map
//!
//! | Register | M0 | M1 | M2 | M3 |
//! |----------|----|----|----|----|
//! | Control mode (u8) | 0x60 | 0x61 | 0x62 | 0x63 |
//! | Mode 0 power (i16 LE) | 0x64 | 0x65 | 0x66 | 0x67 |
//! | Mode 1 rpm (i16 LE) | 0x68 | 0x69 | 0x6A | 0x6B |
//! | Mode 2 rotations + rpm (2x i16 LE) | 0x6C | 0x6D | 0x6E | 0x6F |
//! | Brake type (u8) | 0x70 | 0x71 | 0x72 | 0x73 |
//! | Tachometer (i16 LE, ro) | 0x75 | 0x76 | 0x77 | 0x78 |
//! | Odometer (i32 LE, ro) | 0x7A | 0x7B | 0x7C | 0x7D |
//!
//! Motor sync and heartbeat registers are MCU-wide.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Default I2C bus of the plate on a Raspberry Pi
pub const DEFAULT_I2C_BUS: u8 = 1;

/// 7-bit I2C address of the plate MCU
pub const PLATE_MCU_ADDRESS: u8 = 0x04;

/// Heartbeat register: seconds-before-shutdown countdown (u8)
pub const REGISTER_HEARTBEAT: u8 = 0x90;

/// Motor sync configuration bitmask (u8), one bit per motor port
pub const REGISTER_MOTOR_SYNC_CONFIG: u8 = 0x80;

/// Motor sync start (u8), write 1 to start all configured motors
pub const REGISTER_MOTOR_SYNC_START: u8 = 0x81;

/// Value written to the sync start register
pub const MOTOR_SYNC_START: u8 = 1;

const CONTROL_MODE_BASE: u8 = 0x60;
const MODE_0_POWER_BASE: u8 = 0x64;
const MODE_1_RPM_BASE: u8 = 0x68;
const MODE_2_RPM_WITH_ROTATIONS_BASE: u8 = 0x6C;
const BRAKE_TYPE_BASE: u8 = 0x70;
const TACHOMETER_BASE: u8 = 0x75;
const ODOMETER_BASE: u8 = 0x7A;

/// Encoder motor port on the plate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MotorPort {
    M0,
    M1,
    M2,
    M3,
}

impl MotorPort {
    pub const ALL: [MotorPort; 4] = [MotorPort::M0, MotorPort::M1, MotorPort::M2, MotorPort::M3];

    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Register window of this port
    pub const fn registers(self) -> MotorRegisters {
        let i = self as u8;
        MotorRegisters {
            control_mode: CONTROL_MODE_BASE + i,
            mode_0_power: MODE_0_POWER_BASE + i,
            mode_1_rpm: MODE_1_RPM_BASE + i,
            mode_2_rpm_with_rotations: MODE_2_RPM_WITH_ROTATIONS_BASE + i,
            brake_type: BRAKE_TYPE_BASE + i,
            tachometer: TACHOMETER_BASE + i,
            odometer: ODOMETER_BASE + i,
        }
    }

    /// Bit of this port in the sync configuration mask
    #[inline]
    pub const fn sync_bit(self) -> u8 {
        1 << (self as u8)
    }
}

impl fmt::Display for MotorPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "M{}", self.index())
    }
}

impl FromStr for MotorPort {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s {
            "M0" => Ok(MotorPort::M0),
            "M1" => Ok(MotorPort::M1),
            "M2" => Ok(MotorPort::M2),
            "M3" => Ok(MotorPort::M3),
            other => Err(crate::Error::Configuration(format!(
                "unknown motor port '{}'",
                other
            ))),
        }
    }
}

/// Per-port register offsets of one encoder motor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MotorRegisters {
    pub control_mode: u8,
    pub mode_0_power: u8,
    pub mode_1_rpm: u8,
    pub mode_2_rpm_with_rotations: u8,
    pub brake_type: u8,
    pub tachometer: u8,
    pub odometer: u8,
}

/// Analog port on the plate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AnalogPort {
    A0,
    A1,
    A2,
    A3,
}

impl AnalogPort {
    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Ultrasonic registers of this port; only A1 and A3 are wired to the
    /// MCU ultrasonic engine
    pub const fn ultrasonic_registers(self) -> Option<UltrasonicRegisters> {
        match self {
            AnalogPort::A1 => Some(UltrasonicRegisters {
                config: 0x54,
                data: 0x55,
                enable: 0x01,
            }),
            AnalogPort::A3 => Some(UltrasonicRegisters {
                config: 0x58,
                data: 0x59,
                enable: 0x02,
            }),
            AnalogPort::A0 | AnalogPort::A2 => None,
        }
    }
}

impl fmt::Display for AnalogPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "A{}", self.index())
    }
}

impl FromStr for AnalogPort {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s {
            "A0" => Ok(AnalogPort::A0),
            "A1" => Ok(AnalogPort::A1),
            "A2" => Ok(AnalogPort::A2),
            "A3" => Ok(AnalogPort::A3),
            other => Err(crate::Error::Configuration(format!(
                "unknown analog port '{}'",
                other
            ))),
        }
    }
}

/// Ultrasonic registers of one analog port
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UltrasonicRegisters {
    /// Config byte: `enable` to start ranging, 0 to stop
    pub config: u8,
    /// Filtered distance word (u16 LE, centimetres, 0 = no echo)
    pub data: u8,
    pub enable: u8,
}

/// Any port a device can claim on the plate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PortId {
    Motor(MotorPort),
    Analog(AnalogPort),
}

impl fmt::Display for PortId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortId::Motor(p) => p.fmt(f),
            PortId::Analog(p) => p.fmt(f),
        }
    }
}

impl From<MotorPort> for PortId {
    fn from(port: MotorPort) -> Self {
        PortId::Motor(port)
    }
}

impl From<AnalogPort> for PortId {
    fn from(port: AnalogPort) -> Self {
        PortId::Analog(port)
    }
}
