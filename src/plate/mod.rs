//! Plate MCU session
//!
//! All hardware access flows through a [`PlateSession`]: a mutex-guarded I2C
//! bus to the plate MCU plus the heartbeat thread that keeps the plate alive.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────┐
//! │ PlateSession                                        │
//! │  ├── bus: Mutex<Box<dyn I2cBus>>  (all transactions)│
//! │  ├── heartbeat thread (same mutex, every T_hb)      │
//! │  └── port registry (one owner per port)             │
//! └────────────────────────────────────────────────────┘
//!         ▲                ▲                 ▲
//!   EncoderMotor     EncoderMotor     UltrasonicSensor
//! ```
//!
//! # Lifecycle
//!
//! - `connect()` probes the MCU and starts the heartbeat. A plate that does
//!   not acknowledge yields [`Error::HardwareUnavailable`].
//! - Any failed transaction, heartbeat included, marks the session
//!   disconnected; every later transaction fails with
//!   [`Error::Communication`].
//! - `disconnect()` (or dropping the last handle) stops the heartbeat and
//!   joins its thread before the bus is released.
//!
//! One session per process is shared through [`PlateSession::global`],
//! which hands out `Arc` handles to the same session until the last one is
//! dropped.

mod heartbeat;
pub mod registers;

use crate::config::PlateConfig;
use crate::error::{Error, Result};
use crate::transport::I2cBus;
use parking_lot::Mutex;
use registers::{PortId, REGISTER_HEARTBEAT};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Process-wide session slot used by [`PlateSession::global`]
static GLOBAL_SESSION: Mutex<Weak<PlateSession>> = parking_lot::const_mutex(Weak::new());

/// Byte order of multi-byte registers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endian {
    Little,
    Big,
}

/// State shared with the heartbeat thread
pub(crate) struct SessionShared {
    pub(crate) bus: Mutex<Box<dyn I2cBus>>,
    pub(crate) address: u8,
    pub(crate) connected: AtomicBool,
    shutdown: AtomicBool,
}

impl SessionShared {
    fn is_running(&self) -> bool {
        !self.shutdown.load(Ordering::Acquire) && self.connected.load(Ordering::Acquire)
    }
}

/// Session to the plate MCU
pub struct PlateSession {
    shared: Arc<SessionShared>,
    heartbeat: Mutex<Option<JoinHandle<()>>>,
    claims: Mutex<HashSet<PortId>>,
}

impl PlateSession {
    /// Probe the plate on `bus` and start the heartbeat
    pub fn connect(bus: Box<dyn I2cBus>, config: &PlateConfig) -> Result<Arc<Self>> {
        config.validate()?;
        let shared = Arc::new(SessionShared {
            bus: Mutex::new(bus),
            address: config.address,
            connected: AtomicBool::new(false),
            shutdown: AtomicBool::new(false),
        });

        {
            let mut bus = shared.bus.lock();
            let mut probe = [0u8; 1];
            bus.write_read(shared.address, &[REGISTER_HEARTBEAT], &mut probe)
                .map_err(|e| {
                    Error::HardwareUnavailable(format!(
                        "no response at {:#04x}: {}",
                        shared.address, e
                    ))
                })?;
        }
        shared.connected.store(true, Ordering::Release);
        log::info!("Plate: connected at {:#04x}", shared.address);

        let thread_shared = Arc::clone(&shared);
        let interval = Duration::from_millis(config.heartbeat_interval_ms);
        let countdown = config.heartbeat_countdown_s;
        let handle = thread::Builder::new()
            .name("plate-heartbeat".to_string())
            .spawn(move || heartbeat::heartbeat_loop(thread_shared, interval, countdown))
            .map_err(|e| Error::HardwareUnavailable(format!("heartbeat thread: {}", e)))?;

        Ok(Arc::new(Self {
            shared,
            heartbeat: Mutex::new(Some(handle)),
            claims: Mutex::new(HashSet::new()),
        }))
    }

    /// Shared process-wide session, connecting through `open` on first use
    ///
    /// Later calls return the live session regardless of `config` until every
    /// handle is dropped; the next call after that connects again.
    pub fn global<F>(config: &PlateConfig, open: F) -> Result<Arc<Self>>
    where
        F: FnOnce(&PlateConfig) -> Result<Box<dyn I2cBus>>,
    {
        let mut slot = GLOBAL_SESSION.lock();
        if let Some(session) = slot.upgrade() {
            return Ok(session);
        }
        let session = Self::connect(open(config)?, config)?;
        *slot = Arc::downgrade(&session);
        Ok(session)
    }

    /// Shared session over `/dev/i2c-<bus>`
    #[cfg(feature = "linux")]
    pub fn open(config: &PlateConfig) -> Result<Arc<Self>> {
        Self::global(config, crate::transport::open_linux_bus)
    }

    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::Acquire)
    }

    pub fn address(&self) -> u8 {
        self.shared.address
    }

    /// True while the heartbeat thread is alive
    pub fn heartbeat_running(&self) -> bool {
        self.heartbeat
            .lock()
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    /// Stop the heartbeat, join it and mark the session disconnected
    pub fn disconnect(&self) {
        self.shared.shutdown.store(true, Ordering::Release);
        if let Some(handle) = self.heartbeat.lock().take() {
            if handle.join().is_err() {
                log::error!("Plate: heartbeat thread panicked");
            }
        }
        if self.shared.connected.swap(false, Ordering::AcqRel) {
            log::info!("Plate: disconnected");
        }
    }

    /// Reserve `port` for exclusive use until the returned claim is dropped
    pub fn claim(self: &Arc<Self>, port: impl Into<PortId>) -> Result<PortClaim> {
        let port = port.into();
        if !self.claims.lock().insert(port) {
            return Err(Error::Configuration(format!("port {} is already in use", port)));
        }
        log::debug!("Plate: port {} claimed", port);
        Ok(PortClaim {
            session: Arc::clone(self),
            port,
        })
    }

    /// True if some device currently owns `port`
    pub fn is_claimed(&self, port: impl Into<PortId>) -> bool {
        self.claims.lock().contains(&port.into())
    }

    fn release(&self, port: PortId) {
        self.claims.lock().remove(&port);
        log::debug!("Plate: port {} released", port);
    }

    // Transactions

    fn ensure_connected(&self) -> Result<()> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(Error::Communication("plate session is disconnected".to_string()))
        }
    }

    fn fail(&self, error: Error) -> Error {
        log::error!("Plate: {}", error);
        self.shared.connected.store(false, Ordering::Release);
        match error {
            Error::Communication(_) => error,
            other => Error::Communication(other.to_string()),
        }
    }

    /// Read `n` raw bytes starting at `register`
    pub fn read_bytes(&self, register: u8, n: usize) -> Result<Vec<u8>> {
        self.ensure_connected()?;
        let mut buffer = vec![0u8; n];
        let result = self
            .shared
            .bus
            .lock()
            .write_read(self.shared.address, &[register], &mut buffer);
        result.map_err(|e| self.fail(e))?;
        log::trace!("Plate: read {:#04x} -> {:02x?}", register, buffer);
        Ok(buffer)
    }

    /// Write raw `bytes` starting at `register`
    pub fn write_n_bytes(&self, register: u8, bytes: &[u8]) -> Result<()> {
        self.ensure_connected()?;
        let mut frame = Vec::with_capacity(bytes.len() + 1);
        frame.push(register);
        frame.extend_from_slice(bytes);
        let result = self.shared.bus.lock().write(self.shared.address, &frame);
        result.map_err(|e| self.fail(e))?;
        log::trace!("Plate: write {:#04x} <- {:02x?}", register, bytes);
        Ok(())
    }

    /// Read an `n`-byte integer (1..=8 bytes)
    pub fn read_n_bytes(&self, register: u8, n: usize, endian: Endian, signed: bool) -> Result<i64> {
        if n == 0 || n > 8 {
            return Err(Error::InvalidParameter(format!(
                "cannot read a {}-byte integer",
                n
            )));
        }
        let bytes = self.read_bytes(register, n)?;
        Ok(decode_int(&bytes, endian, signed))
    }

    pub fn read_u8(&self, register: u8) -> Result<u8> {
        Ok(self.read_bytes(register, 1)?[0])
    }

    pub fn read_i8(&self, register: u8) -> Result<i8> {
        Ok(self.read_u8(register)? as i8)
    }

    pub fn read_u16(&self, register: u8, endian: Endian) -> Result<u16> {
        Ok(self.read_n_bytes(register, 2, endian, false)? as u16)
    }

    pub fn read_i16(&self, register: u8, endian: Endian) -> Result<i16> {
        Ok(self.read_n_bytes(register, 2, endian, true)? as i16)
    }

    pub fn read_i32(&self, register: u8, endian: Endian) -> Result<i32> {
        Ok(self.read_n_bytes(register, 4, endian, true)? as i32)
    }

    pub fn write_u8(&self, register: u8, value: u8) -> Result<()> {
        self.write_n_bytes(register, &[value])
    }

    /// Write a 16-bit word, validating it fits the signed or unsigned range
    pub fn write_word(&self, register: u8, value: i32, endian: Endian, signed: bool) -> Result<()> {
        let bytes = if signed {
            let v = i16::try_from(value).map_err(|_| {
                Error::InvalidParameter(format!("{} does not fit a signed word", value))
            })?;
            match endian {
                Endian::Little => v.to_le_bytes(),
                Endian::Big => v.to_be_bytes(),
            }
        } else {
            let v = u16::try_from(value).map_err(|_| {
                Error::InvalidParameter(format!("{} does not fit an unsigned word", value))
            })?;
            match endian {
                Endian::Little => v.to_le_bytes(),
                Endian::Big => v.to_be_bytes(),
            }
        };
        self.write_n_bytes(register, &bytes)
    }
}

impl Drop for PlateSession {
    fn drop(&mut self) {
        self.disconnect();
    }
}

/// Exclusive ownership of one plate port; released on drop
pub struct PortClaim {
    session: Arc<PlateSession>,
    port: PortId,
}

impl PortClaim {
    pub fn port(&self) -> PortId {
        self.port
    }

    pub fn session(&self) -> &Arc<PlateSession> {
        &self.session
    }
}

impl Drop for PortClaim {
    fn drop(&mut self) {
        self.session.release(self.port);
    }
}

impl std::fmt::Debug for PortClaim {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PortClaim").field("port", &self.port).finish()
    }
}

/// Assemble an integer from register bytes, sign-extending if `signed`
pub fn decode_int(bytes: &[u8], endian: Endian, signed: bool) -> i64 {
    if bytes.is_empty() {
        return 0;
    }
    let mut raw: u64 = 0;
    let ordered: Box<dyn Iterator<Item = &u8>> = match endian {
        Endian::Little => Box::new(bytes.iter().rev()),
        Endian::Big => Box::new(bytes.iter()),
    };
    for b in ordered {
        raw = (raw << 8) | u64::from(*b);
    }
    let bits = bytes.len() as u32 * 8;
    if signed && bits < 64 && raw & (1 << (bits - 1)) != 0 {
        (raw | (u64::MAX << bits)) as i64
    } else {
        raw as i64
    }
}
