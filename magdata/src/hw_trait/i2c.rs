//! I2C hardware abstraction trait.

use async_trait::async_trait;

use super::Result;

/// Register-oriented I2C bus.
///
/// Every transfer addresses a register: writes send the register followed by
/// the data, reads set the register pointer and then fill `buf`.
#[async_trait]
pub trait I2c: Send {
    /// Write `data` starting at register `reg`.
    async fn write(&mut self, addr: u8, reg: u8, data: &[u8]) -> Result<()>;

    /// Set the register pointer, then read `buf.len()` bytes in a separate
    /// transaction.
    async fn read(&mut self, addr: u8, reg: u8, buf: &mut [u8]) -> Result<()>;

    /// Write the register and read `buf.len()` bytes back in one combined
    /// transaction.
    async fn write_read(&mut self, addr: u8, reg: u8, buf: &mut [u8]) -> Result<()>;

    /// Set the bus frequency in kHz. The bus may round to a supported speed.
    async fn set_frequency(&mut self, khz: u32) -> Result<()>;
}

#[async_trait]
impl<B: I2c + ?Sized> I2c for &mut B {
    async fn write(&mut self, addr: u8, reg: u8, data: &[u8]) -> Result<()> {
        (**self).write(addr, reg, data).await
    }

    async fn read(&mut self, addr: u8, reg: u8, buf: &mut [u8]) -> Result<()> {
        (**self).read(addr, reg, buf).await
    }

    async fn write_read(&mut self, addr: u8, reg: u8, buf: &mut [u8]) -> Result<()> {
        (**self).write_read(addr, reg, buf).await
    }

    async fn set_frequency(&mut self, khz: u32) -> Result<()> {
        (**self).set_frequency(khz).await
    }
}
