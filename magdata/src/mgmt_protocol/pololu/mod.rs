//! Pololu Isolated USB-to-I2C adapter command protocol.
//!
//! The adapter exposes a CDC-ACM serial port and speaks a small binary
//! command set. Every request starts with a one-byte command code; there is
//! no length prefix, request ID or checksum, so host and adapter stay in
//! step purely by both sides knowing the exact size of every frame.
//!
//! # Frames
//!
//! ```text
//! Write:          [0x91] [addr] [1+n] [reg] [data:n]  -> [status]
//! Read:           [0x92] [addr] [size]                -> [status] [data:size]
//! Set mode:       [0x94] [mode]                       -> (nothing)
//! Clear bus:      [0x98]                              -> (nothing)
//! Write-and-read: [0x9B] [addr] [1] [size] [reg]      -> [status] [data:size]
//! Device info:    [0xA7]                              -> [len] [payload:len-1]
//! ```
//!
//! A bus-scan probe is a zero-length write, `[0x91] [addr] [0x00]`.
//!
//! The status byte is an [`ErrorCode`]; anything other than
//! [`ErrorCode::None`] means the I2C transaction failed on the bus.

pub mod adapter;
pub mod error;
pub mod i2c;

use bytes::{Buf, BufMut};

pub use adapter::PololuAdapter;
pub use error::{OpError, ProtocolError};

use crate::error::ValidationError;

/// Largest data block a single write frame can carry. The length byte
/// covers the register plus the data.
pub const MAX_WRITE_DATA: usize = 254;

/// Size of the device-info payload after the length byte.
pub const DEVICE_INFO_PAYLOAD_LEN: usize = 27;

/// Largest length byte the device-info response may carry.
pub const DEVICE_INFO_MAX_LEN: u8 = 28;

/// Number of 7-bit addresses probed by a scan.
pub const SCAN_ADDRESSES: usize = 128;

/// Pololu's USB vendor ID.
pub const POLOLU_VENDOR_ID: u16 = 0x1FFB;

/// Product IDs of the two isolated adapter variants.
pub const ADAPTER_PRODUCT_IDS: [u16; 2] = [0x2502, 0x2503];

/// Command codes understood by the adapter firmware.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CommandCode {
    Write = 0x91,
    Read = 0x92,
    SetMode = 0x94,
    ClearBus = 0x98,
    WriteAndRead = 0x9B,
    GetDeviceInfo = 0xA7,
}

/// I2C bus speed selected with the set-mode command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum I2cMode {
    /// 100 kHz
    Standard = 0,
    /// 400 kHz
    Fast = 1,
    /// 1 MHz
    FastPlus = 2,
    /// 10 kHz
    TenKhz = 3,
}

impl I2cMode {
    /// Pick the mode for a requested bus frequency.
    pub fn from_khz(khz: u32) -> Self {
        match khz {
            1000.. => Self::FastPlus,
            400.. => Self::Fast,
            100.. => Self::Standard,
            _ => Self::TenKhz,
        }
    }

    /// Nominal bus frequency of this mode.
    pub fn khz(self) -> u32 {
        match self {
            Self::Standard => 100,
            Self::Fast => 400,
            Self::FastPlus => 1000,
            Self::TenKhz => 10,
        }
    }
}

/// A request frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command<'a> {
    /// Write `data` starting at register `reg`. Empty `data` just sets the
    /// device's register pointer.
    Write { addr: u8, reg: u8, data: &'a [u8] },
    /// Zero-length write used to detect a device.
    Probe { addr: u8 },
    Read { addr: u8, size: u8 },
    WriteAndRead { addr: u8, reg: u8, size: u8 },
    SetMode(I2cMode),
    ClearBus,
    GetDeviceInfo,
}

impl Command<'_> {
    pub fn code(&self) -> CommandCode {
        match self {
            Self::Write { .. } | Self::Probe { .. } => CommandCode::Write,
            Self::Read { .. } => CommandCode::Read,
            Self::WriteAndRead { .. } => CommandCode::WriteAndRead,
            Self::SetMode(_) => CommandCode::SetMode,
            Self::ClearBus => CommandCode::ClearBus,
            Self::GetDeviceInfo => CommandCode::GetDeviceInfo,
        }
    }

    /// Number of response bytes the adapter sends for this frame.
    pub fn response_len(&self) -> usize {
        match self {
            Self::Write { .. } | Self::Probe { .. } => 1,
            Self::Read { size, .. } | Self::WriteAndRead { size, .. } => 1 + *size as usize,
            Self::SetMode(_) | Self::ClearBus => 0,
            // Variable; the length byte comes first
            Self::GetDeviceInfo => 1,
        }
    }

    /// Encode to wire bytes.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        let mut buf = Vec::with_capacity(5);
        buf.put_u8(self.code() as u8);

        match self {
            Self::Write { addr, reg, data } => {
                if data.len() > MAX_WRITE_DATA {
                    return Err(ProtocolError::PayloadTooLong(data.len()));
                }
                buf.put_u8(*addr);
                buf.put_u8(1 + data.len() as u8);
                buf.put_u8(*reg);
                buf.put_slice(data);
            }
            Self::Probe { addr } => {
                buf.put_u8(*addr);
                buf.put_u8(0);
            }
            Self::Read { addr, size } => {
                buf.put_u8(*addr);
                buf.put_u8(*size);
            }
            Self::WriteAndRead { addr, reg, size } => {
                buf.put_u8(*addr);
                buf.put_u8(1);
                buf.put_u8(*size);
                buf.put_u8(*reg);
            }
            Self::SetMode(mode) => buf.put_u8(*mode as u8),
            Self::ClearBus | Self::GetDeviceInfo => {}
        }

        Ok(buf)
    }
}

/// Status byte returned by the adapter for I2C transactions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ErrorCode {
    None = 0,
    Protocol = 1,
    PreviousTimeout = 2,
    Timeout = 3,
    AddressTimeout = 4,
    TxTimeout = 5,
    RxTimeout = 6,
    Nack = 7,
    AddressNack = 8,
    TxDataNack = 9,
    BusError = 10,
    ArbitrationLost = 11,
    Other = 12,
    NotSupported = 13,
}

impl TryFrom<u8> for ErrorCode {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => Self::None,
            1 => Self::Protocol,
            2 => Self::PreviousTimeout,
            3 => Self::Timeout,
            4 => Self::AddressTimeout,
            5 => Self::TxTimeout,
            6 => Self::RxTimeout,
            7 => Self::Nack,
            8 => Self::AddressNack,
            9 => Self::TxDataNack,
            10 => Self::BusError,
            11 => Self::ArbitrationLost,
            12 => Self::Other,
            13 => Self::NotSupported,
            _ => return Err(value),
        })
    }
}

impl ErrorCode {
    pub fn description(self) -> &'static str {
        match self {
            Self::None => "No error",
            Self::Protocol => "Protocol error",
            Self::PreviousTimeout => "Previous operation timed out",
            Self::Timeout => "Timeout",
            Self::AddressTimeout => "Timeout sending address",
            Self::TxTimeout => "Timeout transmitting data",
            Self::RxTimeout => "Timeout receiving data",
            Self::Nack => "NACK received",
            Self::AddressNack => "Address NACK (no device at address)",
            Self::TxDataNack => "NACK while transmitting data",
            Self::BusError => "Bus error",
            Self::ArbitrationLost => "Arbitration lost",
            Self::Other => "Other error",
            Self::NotSupported => "Operation not supported",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.description())
    }
}

/// Human-readable string for a status code.
///
/// Negated codes map to the same string as their positive counterpart.
/// Anything outside the table is "Unknown error".
pub fn error_string(code: i32) -> &'static str {
    u8::try_from(code.unsigned_abs())
        .ok()
        .and_then(|c| ErrorCode::try_from(c).ok())
        .map_or("Unknown error", ErrorCode::description)
}

/// Adapter identity reported by the get-device-info command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub vendor_id: u16,
    pub product_id: u16,
    pub firmware_bcd: u16,
    pub modification: [u8; 8],
    pub serial: [u8; 12],
}

impl DeviceInfo {
    /// Decode the payload that follows the length byte.
    ///
    /// Layout (little-endian): version(1) vendor(2) product(2)
    /// firmware_bcd(2) modification(8) serial(12).
    pub fn parse(payload: &[u8]) -> Result<Self, ProtocolError> {
        if payload.len() < DEVICE_INFO_PAYLOAD_LEN {
            return Err(ProtocolError::TruncatedPayload {
                expected: DEVICE_INFO_PAYLOAD_LEN,
                actual: payload.len(),
            });
        }

        let mut buf = payload;
        let version = buf.get_u8();
        if version != 0 {
            return Err(ProtocolError::UnsupportedInfoVersion(version));
        }

        let vendor_id = buf.get_u16_le();
        let product_id = buf.get_u16_le();
        let firmware_bcd = buf.get_u16_le();
        let mut modification = [0u8; 8];
        buf.copy_to_slice(&mut modification);
        let mut serial = [0u8; 12];
        buf.copy_to_slice(&mut serial);

        Ok(Self {
            vendor_id,
            product_id,
            firmware_bcd,
            modification,
            serial,
        })
    }

    /// Firmware version as "major.minor", e.g. 0x0102 -> "1.02".
    pub fn firmware_version(&self) -> String {
        format!("{:x}.{:02x}", self.firmware_bcd >> 8, self.firmware_bcd & 0xff)
    }

    /// Firmware modification label. A bare dash means "none".
    pub fn firmware_modification(&self) -> String {
        let end = self
            .modification
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(self.modification.len());
        let label = String::from_utf8_lossy(&self.modification[..end]);
        if label == "-" {
            String::new()
        } else {
            label.into_owned()
        }
    }

    /// Serial number as six dash-joined hex groups.
    pub fn serial_number(&self) -> String {
        self.serial
            .chunks(2)
            .map(|pair| format!("{:02X}{:02X}", pair[0], pair[1]))
            .collect::<Vec<_>>()
            .join("-")
    }

    /// Check that this is one of the supported adapters.
    pub fn validate_identity(&self) -> Result<(), ValidationError> {
        if self.vendor_id == POLOLU_VENDOR_ID && ADAPTER_PRODUCT_IDS.contains(&self.product_id) {
            Ok(())
        } else {
            Err(ValidationError::UnexpectedAdapter {
                vendor_id: self.vendor_id,
                product_id: self.product_id,
            })
        }
    }
}
