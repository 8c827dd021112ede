//! Simulated plate MCU for hardware-free testing
//!
//! Implements the register protocol of the plate: motor control modes,
//! tachometer/odometer integration over wall-clock time, mode 2
//! self-termination, synchronous-start holding, heartbeat bookkeeping and
//! ultrasonic distance words. Every write except heartbeats is logged so
//! tests can assert on the exact register traffic.

use super::I2cBus;
use crate::error::{Error, Result};
use crate::plate::registers::{
    AnalogPort, MotorPort, REGISTER_HEARTBEAT, REGISTER_MOTOR_SYNC_CONFIG,
    REGISTER_MOTOR_SYNC_START,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

/// DC-motor rpm at full power in mode 0
const FULL_POWER_DC_RPM: f64 = 4800.0;

/// Mock plate MCU
#[derive(Clone)]
pub struct MockPlate {
    inner: Arc<Mutex<MockPlateInner>>,
}

/// Register-level view of one simulated motor
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MockMotorSnapshot {
    pub control_mode: u8,
    pub power: i16,
    pub rpm: i16,
    pub mode_2_rotations: i16,
    pub mode_2_rpm: i16,
    pub brake_type: u8,
    /// DC-motor rpm currently being driven
    pub active_rpm: f64,
    /// DC-motor rotations, unrounded
    pub odometer: f64,
}

struct MockPlateInner {
    motors: [SimMotor; 4],
    sync_config: u8,
    sync_starts: usize,
    heartbeat_value: u8,
    heartbeat_count: usize,
    ultrasonic: HashMap<u8, u8>,
    ultrasonic_cm: HashMap<u8, u16>,
    writes: Vec<(u8, Vec<u8>)>,
    fail: bool,
}

#[derive(Clone, Copy)]
struct SimMotor {
    control_mode: u8,
    power: i16,
    rpm: i16,
    mode_2_rotations: i16,
    mode_2_rpm: i16,
    brake_type: u8,
    active_rpm: f64,
    /// Rotations left before a mode 2 command self-terminates
    remaining: Option<f64>,
    odometer: f64,
    last_update: Instant,
    /// Tachometer reads to corrupt before returning real data
    tachometer_glitches: usize,
}

impl SimMotor {
    fn new() -> Self {
        Self {
            control_mode: 0,
            power: 0,
            rpm: 0,
            mode_2_rotations: 0,
            mode_2_rpm: 0,
            brake_type: 0,
            active_rpm: 0.0,
            remaining: None,
            odometer: 0.0,
            last_update: Instant::now(),
            tachometer_glitches: 0,
        }
    }

    /// Integrate the odometer up to `now`
    fn advance(&mut self, now: Instant) {
        let dt = now.duration_since(self.last_update).as_secs_f64();
        self.last_update = now;
        let step = self.active_rpm / 60.0 * dt;

        match self.remaining {
            Some(remaining) if step.abs() >= remaining.abs() => {
                self.odometer += remaining;
                self.remaining = None;
                self.active_rpm = 0.0;
            }
            Some(remaining) => {
                self.odometer += step;
                self.remaining = Some(remaining - step);
            }
            None => self.odometer += step,
        }
    }

    /// Start executing the command held in the payload registers
    fn apply(&mut self, now: Instant) {
        self.advance(now);
        self.remaining = None;
        match self.control_mode {
            0 => self.active_rpm = self.power as f64 / 1000.0 * FULL_POWER_DC_RPM,
            1 => self.active_rpm = self.rpm as f64,
            _ => {
                let current = self.odometer.round() as i64 as i16;
                let delta = self.mode_2_rotations.wrapping_sub(current) as f64;
                if delta == 0.0 || self.mode_2_rpm == 0 {
                    self.active_rpm = 0.0;
                } else {
                    self.active_rpm = (self.mode_2_rpm as f64).abs().copysign(delta);
                    self.remaining = Some(delta);
                }
            }
        }
    }

    fn snapshot(&self) -> MockMotorSnapshot {
        MockMotorSnapshot {
            control_mode: self.control_mode,
            power: self.power,
            rpm: self.rpm,
            mode_2_rotations: self.mode_2_rotations,
            mode_2_rpm: self.mode_2_rpm,
            brake_type: self.brake_type,
            active_rpm: self.active_rpm,
            odometer: self.odometer,
        }
    }
}

/// Register role of a motor register address
enum MotorRegister {
    ControlMode,
    Power,
    Rpm,
    RpmWithRotations,
    BrakeType,
    Tachometer,
    Odometer,
}

fn decode_motor_register(register: u8) -> Option<(usize, MotorRegister)> {
    MotorPort::ALL.iter().find_map(|port| {
        let r = port.registers();
        let role = if register == r.control_mode {
            MotorRegister::ControlMode
        } else if register == r.mode_0_power {
            MotorRegister::Power
        } else if register == r.mode_1_rpm {
            MotorRegister::Rpm
        } else if register == r.mode_2_rpm_with_rotations {
            MotorRegister::RpmWithRotations
        } else if register == r.brake_type {
            MotorRegister::BrakeType
        } else if register == r.tachometer {
            MotorRegister::Tachometer
        } else if register == r.odometer {
            MotorRegister::Odometer
        } else {
            return None;
        };
        Some((port.index(), role))
    })
}

fn i16_at(payload: &[u8], offset: usize) -> i16 {
    let lo = payload.get(offset).copied().unwrap_or(0);
    let hi = payload.get(offset + 1).copied().unwrap_or(0);
    i16::from_le_bytes([lo, hi])
}

impl MockPlate {
    /// Create a mock plate with all motors idle
    pub fn new() -> Self {
        MockPlate {
            inner: Arc::new(Mutex::new(MockPlateInner {
                motors: [SimMotor::new(); 4],
                sync_config: 0,
                sync_starts: 0,
                heartbeat_value: 0,
                heartbeat_count: 0,
                ultrasonic: HashMap::new(),
                ultrasonic_cm: HashMap::new(),
                writes: Vec::new(),
                fail: false,
            })),
        }
    }

    /// Make every subsequent transaction fail (simulates an unplugged plate)
    pub fn set_fail(&self, fail: bool) {
        self.inner.lock().fail = fail;
    }

    /// All non-heartbeat writes as `(register, payload)` pairs, oldest first
    pub fn writes(&self) -> Vec<(u8, Vec<u8>)> {
        self.inner.lock().writes.clone()
    }

    /// Writes to a single register, oldest first
    pub fn writes_to(&self, register: u8) -> Vec<Vec<u8>> {
        self.inner
            .lock()
            .writes
            .iter()
            .filter(|(r, _)| *r == register)
            .map(|(_, p)| p.clone())
            .collect()
    }

    pub fn clear_writes(&self) {
        self.inner.lock().writes.clear();
    }

    pub fn heartbeat_count(&self) -> usize {
        self.inner.lock().heartbeat_count
    }

    /// Last countdown written to the heartbeat register
    pub fn heartbeat_value(&self) -> u8 {
        self.inner.lock().heartbeat_value
    }

    pub fn sync_config(&self) -> u8 {
        self.inner.lock().sync_config
    }

    /// Number of sync start barriers received
    pub fn sync_starts(&self) -> usize {
        self.inner.lock().sync_starts
    }

    /// Register state of one motor, with the odometer advanced to now
    pub fn motor(&self, port: MotorPort) -> MockMotorSnapshot {
        let mut inner = self.inner.lock();
        let motor = &mut inner.motors[port.index()];
        motor.advance(Instant::now());
        motor.snapshot()
    }

    /// Overwrite the odometer of one motor (DC-motor rotations)
    pub fn set_odometer(&self, port: MotorPort, rotations: f64) {
        let mut inner = self.inner.lock();
        let motor = &mut inner.motors[port.index()];
        motor.advance(Instant::now());
        motor.odometer = rotations;
    }

    /// Return an out-of-range tachometer value for the next `count` reads
    pub fn glitch_tachometer(&self, port: MotorPort, count: usize) {
        self.inner.lock().motors[port.index()].tachometer_glitches = count;
    }

    /// Set the distance word reported by an ultrasonic port (centimetres)
    pub fn set_ultrasonic_cm(&self, port: AnalogPort, centimetres: u16) {
        if let Some(regs) = port.ultrasonic_registers() {
            self.inner.lock().ultrasonic_cm.insert(regs.data, centimetres);
        }
    }

    /// Config byte last written to an ultrasonic port
    pub fn ultrasonic_config(&self, port: AnalogPort) -> u8 {
        port.ultrasonic_registers()
            .and_then(|regs| self.inner.lock().ultrasonic.get(&regs.config).copied())
            .unwrap_or(0)
    }
}

impl MockPlateInner {
    fn handle_write(&mut self, register: u8, payload: &[u8]) {
        let now = Instant::now();
        let byte = payload.first().copied().unwrap_or(0);
        if register == REGISTER_HEARTBEAT {
            self.heartbeat_value = byte;
            self.heartbeat_count += 1;
            return;
        }
        self.writes.push((register, payload.to_vec()));

        match register {
            REGISTER_MOTOR_SYNC_CONFIG => self.sync_config = byte,
            REGISTER_MOTOR_SYNC_START => {
                self.sync_starts += 1;
                for port in MotorPort::ALL {
                    if self.sync_config & port.sync_bit() != 0 {
                        self.motors[port.index()].apply(now);
                    }
                }
            }
            _ => {
                if let Some((index, role)) = decode_motor_register(register) {
                    let held = self.sync_config & (1 << index) != 0;
                    let motor = &mut self.motors[index];
                    let payload_write = match role {
                        MotorRegister::ControlMode => {
                            motor.control_mode = byte;
                            false
                        }
                        MotorRegister::Power => {
                            motor.power = i16_at(payload, 0);
                            true
                        }
                        MotorRegister::Rpm => {
                            motor.rpm = i16_at(payload, 0);
                            true
                        }
                        MotorRegister::RpmWithRotations => {
                            motor.mode_2_rotations = i16_at(payload, 0);
                            motor.mode_2_rpm = i16_at(payload, 2);
                            true
                        }
                        MotorRegister::BrakeType => {
                            motor.brake_type = byte;
                            false
                        }
                        MotorRegister::Tachometer | MotorRegister::Odometer => false,
                    };
                    if payload_write && !held {
                        motor.apply(now);
                    }
                } else {
                    self.ultrasonic.insert(register, byte);
                }
            }
        }
    }

    fn handle_read(&mut self, register: u8, buffer: &mut [u8]) {
        let now = Instant::now();
        buffer.fill(0);
        let bytes: Vec<u8> = match register {
            REGISTER_HEARTBEAT => vec![self.heartbeat_value],
            REGISTER_MOTOR_SYNC_CONFIG => vec![self.sync_config],
            _ => match decode_motor_register(register) {
                Some((index, role)) => {
                    let motor = &mut self.motors[index];
                    match role {
                        MotorRegister::ControlMode => vec![motor.control_mode],
                        MotorRegister::Power => motor.power.to_le_bytes().to_vec(),
                        MotorRegister::Rpm => motor.rpm.to_le_bytes().to_vec(),
                        MotorRegister::RpmWithRotations => {
                            let mut b = motor.mode_2_rotations.to_le_bytes().to_vec();
                            b.extend_from_slice(&motor.mode_2_rpm.to_le_bytes());
                            b
                        }
                        MotorRegister::BrakeType => vec![motor.brake_type],
                        MotorRegister::Tachometer => {
                            motor.advance(now);
                            if motor.tachometer_glitches > 0 {
                                motor.tachometer_glitches -= 1;
                                i16::MAX.to_le_bytes().to_vec()
                            } else {
                                (motor.active_rpm.round() as i16).to_le_bytes().to_vec()
                            }
                        }
                        MotorRegister::Odometer => {
                            motor.advance(now);
                            (motor.odometer.round() as i32).to_le_bytes().to_vec()
                        }
                    }
                }
                None => match self.ultrasonic_cm.get(&register) {
                    Some(cm) => cm.to_le_bytes().to_vec(),
                    None => vec![self.ultrasonic.get(&register).copied().unwrap_or(0)],
                },
            },
        };
        for (dst, src) in buffer.iter_mut().zip(bytes) {
            *dst = src;
        }
    }
}

impl I2cBus for MockPlate {
    fn write(&mut self, _address: u8, bytes: &[u8]) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.fail {
            return Err(Error::Communication("mock plate: write NACK".to_string()));
        }
        if let Some((&register, payload)) = bytes.split_first() {
            inner.handle_write(register, payload);
        }
        Ok(())
    }

    fn write_read(&mut self, _address: u8, bytes: &[u8], buffer: &mut [u8]) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.fail {
            return Err(Error::Communication("mock plate: read NACK".to_string()));
        }
        let register = bytes.first().copied().unwrap_or(0);
        inner.handle_read(register, buffer);
        Ok(())
    }
}

impl Default for MockPlate {
    fn default() -> Self {
        Self::new()
    }
}
