//! [`I2c`] implementation over the adapter.

use async_trait::async_trait;

use super::PololuAdapter;
use crate::hw_trait::{HwError, I2c, Result};
use crate::transport::Transport;

fn read_len(buf: &[u8]) -> Result<u8> {
    u8::try_from(buf.len()).map_err(|_| {
        HwError::InvalidParameter(format!("read of {} bytes exceeds 255", buf.len()))
    })
}

#[async_trait]
impl<T: Transport> I2c for PololuAdapter<T> {
    async fn write(&mut self, addr: u8, reg: u8, data: &[u8]) -> Result<()> {
        self.write_to(addr, reg, data).await?;
        Ok(())
    }

    async fn read(&mut self, addr: u8, reg: u8, buf: &mut [u8]) -> Result<()> {
        let data = self.read_from(addr, reg, read_len(buf)?).await?;
        buf.copy_from_slice(&data);
        Ok(())
    }

    async fn write_read(&mut self, addr: u8, reg: u8, buf: &mut [u8]) -> Result<()> {
        let data = self.write_and_read_from(addr, reg, read_len(buf)?).await?;
        buf.copy_from_slice(&data);
        Ok(())
    }

    async fn set_frequency(&mut self, khz: u32) -> Result<()> {
        PololuAdapter::set_frequency(self, khz).await?;
        Ok(())
    }
}
