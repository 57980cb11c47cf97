//! Serial backend for the adapter.
//!
//! The adapter enumerates as a USB CDC-ACM device. The link runs at 115200
//! baud, 8N1, no flow control, in raw mode, with a 100 ms cap on every
//! individual read.

use std::fs::OpenOptions;
use std::io;
use std::os::unix::fs::{FileTypeExt, OpenOptionsExt};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::{self, Instant};
use tokio_serial::{
    ClearBuffer, DataBits, FlowControl, Parity, SerialPort, SerialPortBuilderExt, SerialStream,
    StopBits,
};

use super::{Transport, TransportError};
use crate::tracing::prelude::*;

/// Line speed expected by the adapter firmware.
pub const BAUD_RATE: u32 = 115_200;

/// Upper bound on a single read.
pub const READ_TIMEOUT: Duration = Duration::from_millis(100);

/// How long `connect` waits for the device node to become usable.
pub const CONNECT_AVAILABILITY_BUDGET: Duration = Duration::from_millis(500);

const AVAILABILITY_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Wait until `path` is a character device that can be opened.
///
/// Missing, busy and permission-denied nodes are retried every 50 ms until
/// `timeout` has elapsed; a zero timeout performs a single check. The probe
/// open is non-blocking and closed immediately, so this never holds the
/// device.
pub async fn check_device_available(path: &str, timeout: Duration) -> Result<(), TransportError> {
    let deadline = Instant::now() + timeout;

    loop {
        let err = match probe(path) {
            Ok(()) => return Ok(()),
            Err(err) => err,
        };

        let retryable = matches!(
            err,
            TransportError::NotFound { .. }
                | TransportError::Busy { .. }
                | TransportError::PermissionDenied { .. }
        );
        if !retryable || Instant::now() >= deadline {
            debug!(path, error = %err, "Device not available");
            return Err(err);
        }

        trace!(path, error = %err, "Device not ready, retrying");
        time::sleep(AVAILABILITY_POLL_INTERVAL).await;
    }
}

fn probe(path: &str) -> Result<(), TransportError> {
    let metadata = std::fs::metadata(path).map_err(|e| classify(path, e))?;
    if !metadata.file_type().is_char_device() {
        return Err(TransportError::NotCharDevice {
            path: path.to_string(),
        });
    }

    // An exclusive holder (TIOCEXCL) makes this fail with EBUSY.
    OpenOptions::new()
        .read(true)
        .write(true)
        .custom_flags(libc::O_NOCTTY | libc::O_NONBLOCK)
        .open(path)
        .map(drop)
        .map_err(|e| classify(path, e))
}

fn classify(path: &str, err: io::Error) -> TransportError {
    let path = path.to_string();
    match err.raw_os_error() {
        Some(libc::ENOENT) => TransportError::NotFound { path },
        Some(libc::EBUSY) => TransportError::Busy { path },
        Some(libc::EACCES) | Some(libc::EPERM) => TransportError::PermissionDenied { path },
        _ => TransportError::Io(err),
    }
}

/// Serial connection to one adapter.
///
/// Owns at most one open descriptor. Dropping the transport (or calling
/// [`disconnect`](Transport::disconnect)) closes it.
pub struct SerialTransport {
    path: String,
    port: Option<SerialStream>,
    read_timeout: Duration,
}

impl SerialTransport {
    /// Create a disconnected transport for the device at `path`.
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            port: None,
            read_timeout: READ_TIMEOUT,
        }
    }

    /// Create a transport and connect it.
    pub async fn open(path: impl Into<String>) -> Result<Self, TransportError> {
        let mut transport = Self::new(path);
        transport.connect().await?;
        Ok(transport)
    }

    /// Device node this transport talks to.
    pub fn path(&self) -> &str {
        &self.path
    }

    fn open_port(&self) -> Result<SerialStream, TransportError> {
        let mut port = tokio_serial::new(self.path.as_str(), BAUD_RATE)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(self.read_timeout)
            .open_native_async()
            .map_err(|source| TransportError::Open {
                path: self.path.clone(),
                source,
            })?;

        // From here on, returning early drops `port` and closes the descriptor.
        port.set_exclusive(true)
            .map_err(|source| TransportError::Configure {
                path: self.path.clone(),
                source,
            })?;
        port.clear(ClearBuffer::Input)
            .map_err(|source| TransportError::Configure {
                path: self.path.clone(),
                source,
            })?;

        Ok(port)
    }
}

#[async_trait]
impl Transport for SerialTransport {
    async fn connect(&mut self) -> Result<(), TransportError> {
        if self.port.is_some() {
            return Ok(());
        }

        check_device_available(&self.path, CONNECT_AVAILABILITY_BUDGET).await?;
        let port = self.open_port()?;
        self.port = Some(port);

        debug!(path = %self.path, baud = BAUD_RATE, "Adapter connected");
        Ok(())
    }

    fn disconnect(&mut self) {
        if self.port.take().is_some() {
            debug!(path = %self.path, "Adapter disconnected");
        }
    }

    fn is_connected(&self) -> bool {
        self.port.is_some()
    }

    async fn write_all(&mut self, data: &[u8]) -> Result<(), TransportError> {
        let port = self.port.as_mut().ok_or(TransportError::NotConnected)?;

        let result = async {
            port.write_all(data).await?;
            port.flush().await
        }
        .await;

        if let Err(e) = result {
            error!(path = %self.path, error = %e, "Write failed, dropping connection");
            self.port = None;
            return Err(e.into());
        }
        Ok(())
    }

    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        let port = self.port.as_mut().ok_or(TransportError::NotConnected)?;

        let result = time::timeout(self.read_timeout, port.read(buf)).await.ok();
        match ReadOutcome::from_result(result) {
            ReadOutcome::Data(n) => Ok(n),
            ReadOutcome::TimedOut => Ok(0),
            ReadOutcome::Eof => {
                debug!(path = %self.path, "Read hit end of file");
                Ok(0)
            }
            ReadOutcome::Failed(e) => {
                error!(path = %self.path, error = %e, "Read failed, dropping connection");
                self.port = None;
                Err(e.into())
            }
        }
    }

    fn discard_input(&mut self) -> Result<(), TransportError> {
        let port = self.port.as_mut().ok_or(TransportError::NotConnected)?;
        port.clear(ClearBuffer::Input)
            .map_err(|source| TransportError::Configure {
                path: self.path.clone(),
                source,
            })
    }
}

/// What a single timed read produced.
#[derive(Debug)]
enum ReadOutcome {
    Data(usize),
    TimedOut,
    Eof,
    Failed(io::Error),
}

impl ReadOutcome {
    /// `None` means the read timer fired first.
    fn from_result(result: Option<io::Result<usize>>) -> Self {
        match result {
            None => Self::TimedOut,
            Some(Ok(0)) => Self::Eof,
            Some(Ok(n)) => Self::Data(n),
            Some(Err(e)) if e.kind() == io::ErrorKind::TimedOut => Self::TimedOut,
            Some(Err(e)) => Self::Failed(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MISSING: &str = "/dev/does_not_exist";

    #[tokio::test]
    async fn test_missing_device_single_check() {
        let err = check_device_available(MISSING, Duration::ZERO)
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_missing_device_waits_for_budget() {
        let started = std::time::Instant::now();
        let err = check_device_available(MISSING, Duration::from_millis(120))
            .await
            .unwrap_err();

        assert!(matches!(err, TransportError::NotFound { .. }));
        assert!(started.elapsed() >= Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_regular_file_is_rejected() {
        let manifest = concat!(env!("CARGO_MANIFEST_DIR"), "/Cargo.toml");
        let err = check_device_available(manifest, Duration::from_millis(200))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::NotCharDevice { .. }));
    }

    #[tokio::test]
    async fn test_char_device_is_available() {
        if !std::path::Path::new("/dev/null").exists() {
            return;
        }
        check_device_available("/dev/null", Duration::ZERO)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_connect_missing_device_stays_disconnected() {
        let mut transport = SerialTransport::new(MISSING);
        assert!(!transport.is_connected());

        let err = transport.connect().await.unwrap_err();
        assert!(matches!(err, TransportError::NotFound { .. }));
        assert!(!transport.is_connected());

        assert!(SerialTransport::open(MISSING).await.is_err());
    }

    #[tokio::test]
    async fn test_io_requires_connection() {
        let mut transport = SerialTransport::new(MISSING);

        let err = transport.write_all(&[0x98]).await.unwrap_err();
        assert!(matches!(err, TransportError::NotConnected));

        let mut buf = [0u8; 4];
        let err = transport.read(&mut buf).await.unwrap_err();
        assert!(matches!(err, TransportError::NotConnected));
        let err = transport.discard_input().unwrap_err();
        assert!(matches!(err, TransportError::NotConnected));

        // Idempotent on an already-closed link
        transport.disconnect();
        transport.disconnect();
        assert!(!transport.is_connected());
        assert_eq!(transport.path(), MISSING);
    }

    #[test]
    fn test_read_outcomes_are_distinct() {
        assert!(matches!(ReadOutcome::from_result(None), ReadOutcome::TimedOut));
        assert!(matches!(ReadOutcome::from_result(Some(Ok(0))), ReadOutcome::Eof));
        assert!(matches!(ReadOutcome::from_result(Some(Ok(5))), ReadOutcome::Data(5)));

        let timed_out = io::Error::from(io::ErrorKind::TimedOut);
        assert!(matches!(
            ReadOutcome::from_result(Some(Err(timed_out))),
            ReadOutcome::TimedOut
        ));

        let gone = io::Error::from_raw_os_error(libc::EIO);
        assert!(matches!(
            ReadOutcome::from_result(Some(Err(gone))),
            ReadOutcome::Failed(_)
        ));
    }
}
