//! Host-side acquisition for an RM3100 magnetometer and MCP9808 temperature
//! sensors behind a Pololu Isolated USB-to-I2C adapter.
//!
//! Layers, lowest first:
//!
//! - [`transport`]: the adapter's serial device node
//! - [`mgmt_protocol::pololu`]: the adapter's command frames
//! - [`hw_trait`]: bus traits the sensor drivers are written against
//! - [`peripheral`]: RM3100 and MCP9808 drivers
//! - [`session`]: bring-up and one-call sampling
//!
//! [`daemon`] wires these into the `magdata` binary.

pub mod config;
pub mod daemon;
pub mod error;
pub mod hw_trait;
pub mod mgmt_protocol;
pub mod peripheral;
pub mod session;
pub mod tracing;
pub mod transport;

pub use config::SessionConfig;
pub use error::{Error, Result};
pub use session::{Reading, Session};
