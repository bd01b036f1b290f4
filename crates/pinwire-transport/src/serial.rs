use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Write};
use std::os::fd::AsRawFd;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, info};

use crate::error::{Result, TransportError};
use crate::socket::classify_io;
use crate::sys;
use crate::traits::{ByteStream, DEFAULT_POLL_INTERVAL};

/// A serial tty (USB CDC, UART adapter) used as a [`ByteStream`].
///
/// The device is opened in raw 8N1 mode. Reads return after the poll
/// interval, rounded up to the tty's 100 ms timer resolution.
pub struct SerialDevice {
    file: File,
    path: PathBuf,
    baud: u32,
}

impl SerialDevice {
    /// Open and configure a serial device.
    pub fn open(path: impl AsRef<Path>, baud: u32) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let speed = sys::baud_to_speed(baud).ok_or(TransportError::UnsupportedBaud(baud))?;

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NOCTTY)
            .open(&path)
            .map_err(|e| TransportError::Connect {
                endpoint: format!("serial://{}", path.display()),
                source: e,
            })?;

        sys::configure_raw_tty(
            file.as_raw_fd(),
            speed,
            sys::poll_to_vtime(DEFAULT_POLL_INTERVAL),
        )
        .map_err(|e| TransportError::Connect {
            endpoint: format!("serial://{}", path.display()),
            source: e,
        })?;

        info!(?path, baud, "opened serial device");
        Ok(Self { file, path, baud })
    }

    /// Device path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Configured baud rate.
    pub fn baud(&self) -> u32 {
        self.baud
    }
}

impl ByteStream for SerialDevice {
    fn bytes_available(&mut self) -> Result<usize> {
        sys::pending_bytes(self.file.as_raw_fd()).map_err(Into::into)
    }

    fn read_into(&mut self, buf: &mut [u8]) -> Result<usize> {
        // With VMIN=0 a zero-length read is a timeout, not end of file; a
        // vanished USB adapter surfaces as an error instead.
        loop {
            match self.file.read(buf) {
                Ok(n) => return Ok(n),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock => return Ok(0),
                Err(err) => return Err(classify_io(err)),
            }
        }
    }

    fn write_bytes(&mut self, buf: &[u8]) -> Result<usize> {
        loop {
            match self.file.write(buf) {
                Ok(n) => return Ok(n),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock => return Ok(0),
                Err(err) => return Err(classify_io(err)),
            }
        }
    }

    fn flush(&mut self) -> Result<()> {
        self.file.flush().map_err(classify_io)
    }

    fn set_poll_interval(&mut self, interval: Duration) -> Result<()> {
        debug!(path = ?self.path, ?interval, "updating serial read timeout");
        sys::set_tty_vtime(self.file.as_raw_fd(), sys::poll_to_vtime(interval)).map_err(Into::into)
    }
}

impl std::fmt::Debug for SerialDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialDevice")
            .field("path", &self.path)
            .field("baud", &self.baud)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::DEFAULT_BAUD;

    #[test]
    fn rejects_unsupported_baud_before_opening() {
        let err = SerialDevice::open("/dev/does-not-exist", 12345).unwrap_err();
        assert!(matches!(err, TransportError::UnsupportedBaud(12345)));
    }

    #[test]
    fn missing_device_is_connect_error() {
        let err = SerialDevice::open("/dev/pinwire-missing-tty", DEFAULT_BAUD).unwrap_err();
        assert!(matches!(err, TransportError::Connect { .. }));
    }
}
