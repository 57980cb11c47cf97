//! Errors raised by adapter operations.

use thiserror::Error;

use super::ErrorCode;
use crate::error::ValidationError;
use crate::transport::TransportError;

/// The byte stream from the adapter did not have the expected shape.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// Fewer bytes arrived than the frame requires before the read timed out.
    #[error("Short read: expected {expected} bytes, received {received}")]
    ShortRead { expected: usize, received: usize },

    #[error("Device info length byte {0} out of range (1..=28)")]
    InvalidInfoLength(u8),

    #[error("Payload truncated: expected {expected} bytes, got {actual}")]
    TruncatedPayload { expected: usize, actual: usize },

    #[error("Unsupported device info version {0}")]
    UnsupportedInfoVersion(u8),

    #[error("Payload of {0} bytes exceeds frame limit")]
    PayloadTooLong(usize),
}

impl ProtocolError {
    /// Whether the adapter simply stopped answering.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::ShortRead { .. })
    }
}

/// Error from an adapter operation.
#[derive(Debug, Error)]
pub enum OpError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The adapter reported a failed I2C transaction.
    #[error("I2C error at 0x{addr:02X}: {message} (code {status})")]
    Device {
        addr: u8,
        status: u8,
        message: &'static str,
    },

    #[error(transparent)]
    Validation(#[from] ValidationError),
}

impl OpError {
    pub(crate) fn device(addr: u8, status: u8) -> Self {
        Self::Device {
            addr,
            status,
            message: super::error_string(i32::from(status)),
        }
    }

    /// Decoded status code, if this is a bus error the adapter reported.
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            Self::Device { status, .. } => ErrorCode::try_from(*status).ok(),
            _ => None,
        }
    }

    /// No device acknowledged the address.
    pub fn is_address_nack(&self) -> bool {
        self.code() == Some(ErrorCode::AddressNack)
    }

    pub fn is_not_connected(&self) -> bool {
        matches!(self, Self::Transport(TransportError::NotConnected))
    }
}
