//! I2C transport layer
//!
//! [`I2cBus`] is the only seam between the plate session and the wire.
//! Real hardware goes through [`HalI2cBus`], which wraps any
//! `embedded_hal::i2c::I2c` implementation; tests use [`MockPlate`].

use crate::error::Result;

mod hal;
pub use hal::HalI2cBus;
#[cfg(feature = "linux")]
pub use hal::open_linux_bus;

#[cfg(feature = "mock")]
mod mock;
#[cfg(feature = "mock")]
pub use mock::{MockMotorSnapshot, MockPlate};

/// Byte-level I2C bus used by the plate session
pub trait I2cBus: Send {
    /// Write `bytes` to the device at `address`
    fn write(&mut self, address: u8, bytes: &[u8]) -> Result<()>;

    /// Write `bytes`, then read `buffer.len()` bytes in the same transaction
    fn write_read(&mut self, address: u8, bytes: &[u8], buffer: &mut [u8]) -> Result<()>;
}

impl<B: I2cBus + ?Sized> I2cBus for Box<B> {
    fn write(&mut self, address: u8, bytes: &[u8]) -> Result<()> {
        (**self).write(address, bytes)
    }

    fn write_read(&mut self, address: u8, bytes: &[u8], buffer: &mut [u8]) -> Result<()> {
        (**self).write_read(address, bytes, buffer)
    }
}
