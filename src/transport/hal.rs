//! `embedded-hal` adapter

use super::I2cBus;
use crate::error::{Error, Result};
use embedded_hal::i2c::{Error as _, I2c};

/// [`I2cBus`] over any `embedded-hal` 1.0 I2C implementation
pub struct HalI2cBus<T> {
    i2c: T,
}

impl<T> HalI2cBus<T> {
    pub fn new(i2c: T) -> Self {
        Self { i2c }
    }

    /// Release the wrapped peripheral
    pub fn into_inner(self) -> T {
        self.i2c
    }
}

impl<T> I2cBus for HalI2cBus<T>
where
    T: I2c + Send,
{
    fn write(&mut self, address: u8, bytes: &[u8]) -> Result<()> {
        self.i2c.write(address, bytes).map_err(|e| {
            Error::Communication(format!("write to {:#04x} failed: {:?}", address, e.kind()))
        })
    }

    fn write_read(&mut self, address: u8, bytes: &[u8], buffer: &mut [u8]) -> Result<()> {
        self.i2c.write_read(address, bytes, buffer).map_err(|e| {
            Error::Communication(format!("read from {:#04x} failed: {:?}", address, e.kind()))
        })
    }
}

/// Open `/dev/i2c-<bus>` through linux-embedded-hal
#[cfg(feature = "linux")]
pub fn open_linux_bus(config: &crate::config::PlateConfig) -> Result<Box<dyn I2cBus>> {
    let path = format!("/dev/i2c-{}", config.i2c_bus);
    log::info!("Plate: opening {}", path);
    let dev = linux_embedded_hal::I2cdev::new(&path)
        .map_err(|e| Error::HardwareUnavailable(format!("cannot open {}: {:?}", path, e)))?;
    Ok(Box::new(HalI2cBus::new(dev)))
}
