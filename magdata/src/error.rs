//! Crate-level error types.
//!
//! Each layer has its own error enum ([`TransportError`], [`OpError`],
//! [`HwError`]); [`Error`] gathers them for the session and the binary.
//! [`ValidationError`] is shared because identity and calibration checks
//! happen at more than one layer.

use thiserror::Error;

use crate::hw_trait::HwError;
use crate::mgmt_protocol::pololu::error::OpError;
use crate::transport::TransportError;

/// A value read from, or destined for, the hardware failed a sanity check.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Unexpected adapter identity: vendor 0x{vendor_id:04X}, product 0x{product_id:04X}")]
    UnexpectedAdapter { vendor_id: u16, product_id: u16 },

    #[error("Cycle count {0} out of range (1..=800)")]
    CycleCountOutOfRange(u16),

    #[error("NOS divisor must be non-zero")]
    ZeroNos,

    #[error("Cycle count readback mismatch: wrote {written:?}, read {read:?}")]
    CycleCountMismatch { written: [u16; 3], read: [u16; 3] },

    #[error("Unexpected RM3100 revision 0x{found:02X} (expected 0x{expected:02X})")]
    UnexpectedRevision { found: u8, expected: u8 },

    #[error(
        "Unexpected temperature sensor at 0x{addr:02X}: \
         manufacturer 0x{manufacturer:04X}, device 0x{device_id:04X}"
    )]
    UnexpectedTemperatureSensor {
        addr: u8,
        manufacturer: u16,
        device_id: u16,
    },
}

/// Top-level error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Op(#[from] OpError),

    #[error(transparent)]
    Hw(#[from] HwError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;
