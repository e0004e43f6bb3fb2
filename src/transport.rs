//! Byte level access to the device's debug UART.
//!
//! The [`Transport`] trait is what the bootloader session talks to. The real
//! implementation, [`SerialTransport`], owns the serial port for the whole run
//! and releases it when dropped, whichever way the run ends.

use std::{
    fmt,
    io::{Read, Write},
    time::Duration,
};

use log::{debug, info, warn};
use serialport::SerialPort;

use crate::error::{Result, UnlockError};
use crate::settings::Settings;

/// Maximum number of bytes pulled from the port in one read.
pub const MAX_READ_CHUNK: usize = 4096;

/// Timeout used for reads issued while draining, when bytes are known to be
/// already buffered.
const DRAIN_READ_TIMEOUT: Duration = Duration::from_millis(10);

// =============================================================================
// Public Interface
// =============================================================================

/// A half-duplex byte pipe to the device console.
pub trait Transport {
    /// A human readable name for logs, usually the port path.
    fn name(&self) -> String;

    /// Write all of `data`.
    fn write(&mut self, data: &[u8]) -> Result<()>;

    /// Number of bytes ready to be read, without blocking.
    fn poll(&mut self) -> Result<usize>;

    /// Read up to `buf.len()` bytes, waiting at most `timeout`. Returns `0` if
    /// nothing arrived in time.
    fn read_timeout(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize>;

    /// Everything currently buffered on the input side.
    fn drain(&mut self) -> Result<Vec<u8>> {
        let mut data = Vec::new();
        loop {
            let available = self.poll()?;
            if available == 0 {
                break;
            }
            let mut chunk = vec![0; available.min(MAX_READ_CHUNK)];
            let read = self.read_timeout(&mut chunk, DRAIN_READ_TIMEOUT)?;
            if read == 0 {
                break;
            }
            data.extend_from_slice(&chunk[..read]);
        }
        Ok(data)
    }
}

/// Exclusive handle on a serial port.
pub struct SerialTransport {
    port: Box<dyn SerialPort>,
}

impl SerialTransport {
    /// Open the port named in `settings`, retrying with exponential backoff
    /// while the failure looks transient (device busy or not there yet).
    pub fn open(settings: &Settings) -> Result<Self> {
        use retry::{retry_with_index, OperationResult};

        let path = settings
            .path
            .as_deref()
            .ok_or_else(|| UnlockError::Connection("no serial port selected".into()))?;

        let result = retry_with_index(
            backoff_schedule(settings.open_backoff, settings.open_attempts),
            |attempt| {
                debug!("Opening {} (attempt {})", path, attempt);
                let builder = serialport::new(path, settings.baud_rate)
                    .data_bits(settings.data_bits)
                    .stop_bits(settings.stop_bits)
                    .parity(settings.parity)
                    .flow_control(settings.flow_control)
                    .timeout(settings.read_timeout);
                match builder.open() {
                    Ok(port) => OperationResult::Ok(port),
                    Err(err) if is_recoverable(&err) => {
                        warn!("Could not open {}: {}", path, err);
                        OperationResult::Retry(err)
                    }
                    Err(err) => OperationResult::Err(err),
                }
            },
        );

        match result {
            Ok(port) => {
                info!(
                    "Connected to {} at {} baud",
                    path,
                    port.baud_rate().unwrap_or(settings.baud_rate)
                );
                Ok(SerialTransport { port })
            }
            Err(retry::Error::Operation {
                error,
                total_delay,
                tries,
            }) => {
                info!(
                    "Failed to open the port after {:?} and {} tries: {}",
                    total_delay, tries, error,
                );
                Err(error.into())
            }
            Err(retry::Error::Internal(msg)) => Err(UnlockError::Connection(format!(
                "internal error while retrying to open the port: {}",
                msg
            ))),
        }
    }
}

impl Transport for SerialTransport {
    fn name(&self) -> String {
        self.port.name().unwrap_or_else(|| "<unnamed>".into())
    }

    fn write(&mut self, data: &[u8]) -> Result<()> {
        self.port.write_all(data)?;
        self.port.flush()?;
        Ok(())
    }

    fn poll(&mut self) -> Result<usize> {
        Ok(self.port.bytes_to_read()? as usize)
    }

    fn read_timeout(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        if self.port.timeout() != timeout {
            self.port.set_timeout(timeout)?;
        }
        match self.port.read(buf) {
            Ok(read) => Ok(read),
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(0),
            Err(e) => Err(e.into()),
        }
    }
}

impl fmt::Debug for SerialTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SerialTransport")
            .field(&self.port.name())
            .field(&self.port.baud_rate())
            .field(&self.port.data_bits())
            .field(&self.port.stop_bits())
            .field(&self.port.parity())
            .finish()
    }
}

impl Drop for SerialTransport {
    fn drop(&mut self) {
        debug!("Releasing serial port {}", self.name());
    }
}

// =============================================================================
// Private stuff
// =============================================================================

/// Delays between open attempts: `base`, `2 * base`, `4 * base`... one less
/// than the number of attempts since the first try is immediate.
fn backoff_schedule(base: Duration, attempts: u32) -> impl Iterator<Item = Duration> {
    (0..attempts.saturating_sub(1)).map(move |i| base * 2u32.saturating_pow(i))
}

/// A missing or busy device may come back, a bad configuration will not.
fn is_recoverable(err: &serialport::Error) -> bool {
    !matches!(err.kind(), serialport::ErrorKind::InvalidInput)
}

// =============================================================================
// Unit Tests
// =============================================================================
