//! Hardware abstraction layer traits.
//!
//! Sensor drivers are written against [`I2c`] rather than a particular
//! bridge, so the same driver works through the USB adapter, a native
//! kernel bus, or the test simulator.

pub mod i2c;

pub use i2c::I2c;

use crate::error::ValidationError;
use crate::mgmt_protocol::pololu::OpError;

/// Common error type for hardware operations
#[derive(Debug, thiserror::Error)]
pub enum HwError {
    /// The bus operation itself failed
    #[error(transparent)]
    Bus(#[from] OpError),

    /// Invalid parameter or argument
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// A device returned values that fail its sanity checks
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// A bounded wait ran out of attempts
    #[error("Timed out waiting for {what} after {attempts} attempts")]
    Timeout { what: &'static str, attempts: u32 },
}

impl HwError {
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::Timeout { .. } => true,
            Self::Bus(OpError::Protocol(e)) => e.is_timeout(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, HwError>;
