//! Microchip MCP9808/MCP9804 temperature sensor driver.
//!
//! The ambient temperature register holds a 13-bit value in 1/16 degree
//! steps below three alert-comparator flags.

use crate::error::ValidationError;
use crate::hw_trait::i2c::I2c;
use crate::hw_trait::Result;
use crate::tracing::prelude::*;

/// Address of the board-local sensor
pub const LOCAL_ADDRESS: u8 = 0x18;

/// Address of the sensor mounted next to the magnetometer
pub const REMOTE_ADDRESS: u8 = 0x19;

pub const MANUFACTURER_ID: u16 = 0x0054;
pub const DEVICE_ID_MCP9808: u16 = 0x0400;
pub const DEVICE_ID_MCP9804: u16 = 0x0200;

/// MCP9808 register addresses
#[allow(dead_code)]
pub mod regs {
    pub const CONFIG: u8 = 0x01;
    pub const T_UPPER: u8 = 0x02;
    pub const T_LOWER: u8 = 0x03;
    pub const T_CRIT: u8 = 0x04;
    /// Ambient temperature
    pub const AMBIENT: u8 = 0x05;
    pub const MANUF_ID: u8 = 0x06;
    /// Device ID (high byte) and revision (low byte)
    pub const DEVICE_ID: u8 = 0x07;
    pub const RESOLUTION: u8 = 0x08;
}

const FLAG_CRITICAL: u16 = 1 << 15;
const FLAG_UPPER: u16 = 1 << 14;
const FLAG_LOWER: u16 = 1 << 13;
const SIGN_BIT: u16 = 1 << 12;

/// Convert an ambient temperature register value to degrees Celsius.
///
/// The three flag bits are ignored.
pub fn decode_celsius(raw: u16) -> f64 {
    let field = raw & 0x1FFF;
    let magnitude = f64::from(field & 0x0FFF) / 16.0;
    if field & SIGN_BIT != 0 {
        -magnitude - 256.0
    } else {
        magnitude
    }
}

/// Alert comparator outputs latched into the temperature register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AlertFlags {
    /// Ta >= T_CRIT
    pub critical: bool,
    /// Ta > T_UPPER
    pub upper: bool,
    /// Ta < T_LOWER
    pub lower: bool,
}

impl AlertFlags {
    pub fn from_raw(raw: u16) -> Self {
        Self {
            critical: raw & FLAG_CRITICAL != 0,
            upper: raw & FLAG_UPPER != 0,
            lower: raw & FLAG_LOWER != 0,
        }
    }

    pub fn any(&self) -> bool {
        self.critical || self.upper || self.lower
    }
}

/// One ambient temperature read.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TemperatureReading {
    /// Register value as read, flags included
    pub raw: u16,
    pub celsius: f64,
}

impl TemperatureReading {
    pub fn from_raw(raw: u16) -> Self {
        Self {
            raw,
            celsius: decode_celsius(raw),
        }
    }

    /// Decode the two register bytes, MSB first.
    pub fn from_bytes(bytes: [u8; 2]) -> Self {
        Self::from_raw(u16::from_be_bytes(bytes))
    }

    pub fn alerts(&self) -> AlertFlags {
        AlertFlags::from_raw(self.raw)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Variant {
    Mcp9808,
    Mcp9804,
}

/// MCP9808 driver
pub struct Mcp9808<I: I2c> {
    i2c: I,
    address: u8,
}

impl<I: I2c> Mcp9808<I> {
    /// Create a driver for the remote sensor address
    pub fn new(i2c: I) -> Self {
        Self::new_with_address(i2c, REMOTE_ADDRESS)
    }

    pub fn new_with_address(i2c: I, address: u8) -> Self {
        Self { i2c, address }
    }

    pub fn address(&self) -> u8 {
        self.address
    }

    async fn read_register(&mut self, reg: u8) -> Result<u16> {
        let mut buf = [0u8; 2];
        self.i2c.write_read(self.address, reg, &mut buf).await?;
        Ok(u16::from_be_bytes(buf))
    }

    /// Check the manufacturer and device IDs.
    pub async fn verify(&mut self) -> Result<Variant> {
        let manufacturer = self.read_register(regs::MANUF_ID).await?;
        let device_id = self.read_register(regs::DEVICE_ID).await?;

        let variant = match (manufacturer, device_id & 0xFF00) {
            (MANUFACTURER_ID, DEVICE_ID_MCP9808) => Variant::Mcp9808,
            (MANUFACTURER_ID, DEVICE_ID_MCP9804) => Variant::Mcp9804,
            _ => {
                return Err(ValidationError::UnexpectedTemperatureSensor {
                    addr: self.address,
                    manufacturer,
                    device_id,
                }
                .into())
            }
        };

        info!(
            addr = %format!("{:#04x}", self.address),
            variant = ?variant,
            revision = device_id & 0x00FF,
            "Temperature sensor detected"
        );
        Ok(variant)
    }

    /// Read the ambient temperature.
    pub async fn read_temperature(&mut self) -> Result<TemperatureReading> {
        let raw = self.read_register(regs::AMBIENT).await?;
        let reading = TemperatureReading::from_raw(raw);
        if reading.alerts().any() {
            debug!(addr = %format!("{:#04x}", self.address), alerts = ?reading.alerts(), "Temperature alert flags set");
        }
        Ok(reading)
    }
}
