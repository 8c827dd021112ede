//! Encoder motor value types

use serde::{Deserialize, Serialize};

/// Rotation sense that moves the robot forward; absorbs wiring and mounting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ForwardDirection {
    Clockwise,
    CounterClockwise,
}

impl ForwardDirection {
    /// Sign applied to every command and reading
    #[inline]
    pub const fn sign(self) -> i32 {
        match self {
            ForwardDirection::Clockwise => -1,
            ForwardDirection::CounterClockwise => 1,
        }
    }

    pub const fn opposite(self) -> Self {
        match self {
            ForwardDirection::Clockwise => ForwardDirection::CounterClockwise,
            ForwardDirection::CounterClockwise => ForwardDirection::Clockwise,
        }
    }
}

/// Per-command direction relative to forward
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    #[default]
    Forward,
    Back,
}

impl Direction {
    #[inline]
    pub const fn sign(self) -> i32 {
        match self {
            Direction::Forward => 1,
            Direction::Back => -1,
        }
    }
}

/// What the MCU does with a motor commanded to zero
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BrakingType {
    #[default]
    Coast,
    Brake,
}

impl BrakingType {
    pub const fn register_value(self) -> u8 {
        match self {
            BrakingType::Coast => 0,
            BrakingType::Brake => 1,
        }
    }

    pub fn from_register(value: u8) -> crate::Result<Self> {
        match value {
            0 => Ok(BrakingType::Coast),
            1 => Ok(BrakingType::Brake),
            other => Err(crate::Error::Communication(format!(
                "invalid brake type register value {}",
                other
            ))),
        }
    }
}

/// MCU control mode of one motor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlMode {
    /// Raw power in [-1000, 1000]
    Power = 0,
    /// Indefinite target rpm
    Rpm = 1,
    /// Target rpm until an odometer target is reached
    RpmWithRotations = 2,
}

impl ControlMode {
    pub fn from_register(value: u8) -> crate::Result<Self> {
        match value {
            0 => Ok(ControlMode::Power),
            1 => Ok(ControlMode::Rpm),
            2 => Ok(ControlMode::RpmWithRotations),
            other => Err(crate::Error::Communication(format!(
                "invalid control mode register value {}",
                other
            ))),
        }
    }
}
