use std::time::Duration;

use crate::error::Result;

/// Default time a single read waits for data before reporting "nothing yet".
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// A duplex, byte-granular channel with no message framing of its own.
///
/// Reads never block for longer than the stream's poll interval: `Ok(0)` from
/// [`read_into`](ByteStream::read_into) means no data arrived in that window,
/// while a peer that went away is reported as
/// [`TransportError::Closed`](crate::TransportError::Closed). Callers that need
/// a deadline loop over short reads.
pub trait ByteStream: Send {
    /// Number of bytes that can be read without waiting.
    fn bytes_available(&mut self) -> Result<usize>;

    /// Read up to `buf.len()` bytes. `Ok(0)` means no data within the poll interval.
    fn read_into(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Write some prefix of `buf`, returning how many bytes were accepted.
    fn write_bytes(&mut self, buf: &[u8]) -> Result<usize>;

    /// Push buffered output to the peer.
    fn flush(&mut self) -> Result<()>;

    /// Change how long a single read waits for data.
    fn set_poll_interval(&mut self, interval: Duration) -> Result<()>;

    /// Read a single byte, `None` if nothing arrived within the poll interval.
    fn read_byte(&mut self) -> Result<Option<u8>> {
        let mut byte = [0u8; 1];
        match self.read_into(&mut byte)? {
            0 => Ok(None),
            _ => Ok(Some(byte[0])),
        }
    }
}

impl<S: ByteStream + ?Sized> ByteStream for Box<S> {
    fn bytes_available(&mut self) -> Result<usize> {
        (**self).bytes_available()
    }

    fn read_into(&mut self, buf: &mut [u8]) -> Result<usize> {
        (**self).read_into(buf)
    }

    fn write_bytes(&mut self, buf: &[u8]) -> Result<usize> {
        (**self).write_bytes(buf)
    }

    fn flush(&mut self) -> Result<()> {
        (**self).flush()
    }

    fn set_poll_interval(&mut self, interval: Duration) -> Result<()> {
        (**self).set_poll_interval(interval)
    }

    fn read_byte(&mut self) -> Result<Option<u8>> {
        (**self).read_byte()
    }
}

impl<S: ByteStream + ?Sized> ByteStream for &mut S {
    fn bytes_available(&mut self) -> Result<usize> {
        (**self).bytes_available()
    }

    fn read_into(&mut self, buf: &mut [u8]) -> Result<usize> {
        (**self).read_into(buf)
    }

    fn write_bytes(&mut self, buf: &[u8]) -> Result<usize> {
        (**self).write_bytes(buf)
    }

    fn flush(&mut self) -> Result<()> {
        (**self).flush()
    }

    fn set_poll_interval(&mut self, interval: Duration) -> Result<()> {
        (**self).set_poll_interval(interval)
    }

    fn read_byte(&mut self) -> Result<Option<u8>> {
        (**self).read_byte()
    }
}
