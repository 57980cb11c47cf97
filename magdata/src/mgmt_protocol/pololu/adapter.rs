//! Request/response operations on the adapter.

use super::error::{OpError, ProtocolError};
use super::{Command, DeviceInfo, ErrorCode, I2cMode, DEVICE_INFO_MAX_LEN, SCAN_ADDRESSES};
use crate::tracing::prelude::*;
use crate::transport::{SerialTransport, Transport};

type Result<T> = std::result::Result<T, OpError>;

/// Host side of the adapter protocol.
///
/// Owns the transport exclusively. The protocol has no request IDs, so
/// exactly one request may be in flight; every operation takes `&mut self`
/// and awaits its full response before returning.
pub struct PololuAdapter<T: Transport> {
    transport: T,
}

impl<T: Transport> PololuAdapter<T> {
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn into_inner(self) -> T {
        self.transport
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    /// (Re)open the underlying link.
    pub async fn connect(&mut self) -> Result<()> {
        self.transport.connect().await?;
        Ok(())
    }

    pub fn disconnect(&mut self) {
        self.transport.disconnect();
    }

    fn ensure_connected(&self) -> Result<()> {
        if self.transport.is_connected() {
            Ok(())
        } else {
            Err(crate::transport::TransportError::NotConnected.into())
        }
    }

    /// Write one request. Anything still unread belongs to an earlier
    /// request that timed out and is dropped first.
    async fn send(&mut self, frame: &[u8]) -> Result<()> {
        self.transport.discard_input()?;
        trace!(frame = ?frame, "TX adapter");
        self.transport.write_all(frame).await?;
        Ok(())
    }

    /// Read exactly `expected` bytes, or fail with a short read.
    async fn receive(&mut self, expected: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; expected];
        let mut received = 0;

        while received < expected {
            let n = self.transport.read(&mut buf[received..]).await?;
            if n == 0 {
                debug!(expected, received, "Adapter response incomplete");
                return Err(ProtocolError::ShortRead { expected, received }.into());
            }
            received += n;
        }

        trace!(frame = ?buf, "RX adapter");
        Ok(buf)
    }

    /// Send one command and collect its fixed-size response.
    async fn transact(&mut self, command: Command<'_>) -> Result<Vec<u8>> {
        self.ensure_connected()?;
        let frame = command.encode()?;
        self.send(&frame).await?;
        self.receive(command.response_len()).await
    }

    fn check_status(addr: u8, status: u8) -> Result<()> {
        if status == ErrorCode::None as u8 {
            Ok(())
        } else {
            Err(OpError::device(addr, status))
        }
    }

    /// Write `data` to register `reg` of the device at `addr`.
    ///
    /// Returns the number of data bytes written.
    pub async fn write_to(&mut self, addr: u8, reg: u8, data: &[u8]) -> Result<usize> {
        let response = self.transact(Command::Write { addr, reg, data }).await?;
        Self::check_status(addr, response[0])?;
        Ok(data.len())
    }

    /// Read `len` bytes starting at register `reg`.
    ///
    /// Two bus transactions: a register-pointer write, then a plain read.
    pub async fn read_from(&mut self, addr: u8, reg: u8, len: u8) -> Result<Vec<u8>> {
        self.write_to(addr, reg, &[]).await?;

        let mut response = self.transact(Command::Read { addr, size: len }).await?;
        Self::check_status(addr, response[0])?;
        Ok(response.split_off(1))
    }

    /// Read `len` bytes starting at register `reg` in one combined frame.
    pub async fn write_and_read_from(&mut self, addr: u8, reg: u8, len: u8) -> Result<Vec<u8>> {
        let mut response = self
            .transact(Command::WriteAndRead {
                addr,
                reg,
                size: len,
            })
            .await?;
        Self::check_status(addr, response[0])?;
        Ok(response.split_off(1))
    }

    /// Select the bus speed for `khz`. Returns the mode actually selected.
    pub async fn set_frequency(&mut self, khz: u32) -> Result<I2cMode> {
        let mode = I2cMode::from_khz(khz);
        self.transact(Command::SetMode(mode)).await?;
        debug!(requested_khz = khz, mode = ?mode, "I2C mode set");
        Ok(mode)
    }

    /// Ask the adapter to clock out a stuck bus.
    pub async fn clear_bus(&mut self) -> Result<()> {
        self.transact(Command::ClearBus).await?;
        debug!("I2C bus cleared");
        Ok(())
    }

    /// Query the adapter's identity.
    pub async fn get_device_info(&mut self) -> Result<DeviceInfo> {
        let length = self.transact(Command::GetDeviceInfo).await?[0];
        if length == 0 || length > DEVICE_INFO_MAX_LEN {
            return Err(ProtocolError::InvalidInfoLength(length).into());
        }

        let payload = self.receive(length as usize - 1).await?;
        Ok(DeviceInfo::parse(&payload)?)
    }

    /// Probe every 7-bit address and return those that acknowledged.
    ///
    /// All 128 probes go out as one burst and the 128 status bytes are read
    /// back together. At most `max_results` addresses are returned, in
    /// ascending order.
    pub async fn scan(&mut self, max_results: usize) -> Result<Vec<u8>> {
        self.ensure_connected()?;

        let mut burst = Vec::with_capacity(SCAN_ADDRESSES * 3);
        for addr in 0..SCAN_ADDRESSES as u8 {
            burst.extend(Command::Probe { addr }.encode()?);
        }
        self.send(&burst).await?;
        let statuses = self.receive(SCAN_ADDRESSES).await?;

        let mut found = Vec::new();
        for (addr, &status) in statuses.iter().enumerate() {
            let addr = addr as u8;
            match ErrorCode::try_from(status) {
                Ok(ErrorCode::None) => {
                    if found.len() < max_results {
                        found.push(addr);
                    }
                }
                Ok(ErrorCode::AddressNack) => {}
                _ => warn!(
                    addr = %format!("{:#04x}", addr),
                    status,
                    error = super::error_string(i32::from(status)),
                    "Unexpected scan response"
                ),
            }
        }

        debug!(found = ?found, "I2C scan complete");
        Ok(found)
    }
}

impl PololuAdapter<SerialTransport> {
    /// Connect to the adapter at `path`.
    pub async fn open(path: &str) -> Result<Self> {
        let transport = SerialTransport::open(path).await?;
        Ok(Self::new(transport))
    }

    /// Whether `path` is a reachable adapter with a supported identity.
    pub async fn is_device_valid(path: &str) -> bool {
        let result = async {
            let mut adapter = Self::open(path).await?;
            let info = adapter.get_device_info().await;
            adapter.disconnect();
            info?.validate_identity()?;
            Ok::<_, OpError>(())
        }
        .await;

        match result {
            Ok(()) => true,
            Err(e) => {
                debug!(path, error = %e, "Not a usable adapter");
                false
            }
        }
    }
}
