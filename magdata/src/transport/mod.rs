//! Byte transport to the USB-to-I2C adapter.
//!
//! The adapter is reached through a character device (`/dev/ttyACM*`). This
//! module owns that descriptor: it checks that the node is usable, opens and
//! configures the serial line, and moves raw bytes. It knows nothing about
//! the adapter's command set; see [`crate::mgmt_protocol::pololu`] for that.
//!
//! [`Transport`] is the seam between the two. The serial backend is the only
//! production implementation, but anything that can move bytes (a native
//! kernel I2C bridge, a simulator) can stand in without touching the
//! protocol or sensor code.

#[cfg(test)]
pub(crate) mod mock;
pub mod serial;

use async_trait::async_trait;

pub use serial::{check_device_available, SerialTransport};

/// Errors raised while opening or using the adapter's serial link.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Device not found: {path}")]
    NotFound { path: String },

    #[error("Device busy (held by another process): {path}")]
    Busy { path: String },

    #[error("Permission denied: {path}")]
    PermissionDenied { path: String },

    #[error("Not a character device: {path}")]
    NotCharDevice { path: String },

    #[error("Adapter not connected")]
    NotConnected,

    #[error("Failed to open {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: tokio_serial::Error,
    },

    #[error("Failed to configure {path}: {source}")]
    Configure {
        path: String,
        #[source]
        source: tokio_serial::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A connection to the adapter that can move raw bytes.
///
/// Implementations start out disconnected. [`connect`](Transport::connect)
/// is the only way to reach the connected state, and any fatal I/O error
/// drops back to disconnected.
#[async_trait]
pub trait Transport: Send {
    /// Open and configure the link. A no-op when already connected.
    async fn connect(&mut self) -> Result<(), TransportError>;

    /// Release the link. Idempotent.
    fn disconnect(&mut self);

    /// Whether the link is currently usable.
    fn is_connected(&self) -> bool;

    /// Write every byte of `data`.
    async fn write_all(&mut self, data: &[u8]) -> Result<(), TransportError>;

    /// Read whatever is available into `buf`.
    ///
    /// Waits at most the transport's per-read timeout. Returns `Ok(0)` when
    /// nothing arrived in time or the peer closed the link; callers that
    /// need an exact byte count treat that as a short read.
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError>;

    /// Drop any received bytes that have not been read yet.
    ///
    /// A reply that arrives after its read timed out would otherwise be
    /// taken as the reply to the next request.
    fn discard_input(&mut self) -> Result<(), TransportError>;
}
