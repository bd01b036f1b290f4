use std::io::{ErrorKind, Read, Write};
use std::net::TcpStream;
use std::time::Duration;

use tracing::debug;

use crate::error::{Result, TransportError};
use crate::traits::{ByteStream, DEFAULT_POLL_INTERVAL};

/// A connected network socket used as a [`ByteStream`].
///
/// Wraps either a TCP stream or, on Unix, a Unix domain socket stream. The
/// poll interval is applied as the socket read timeout.
pub struct SocketStream {
    inner: SocketInner,
}

enum SocketInner {
    Tcp(TcpStream),
    #[cfg(unix)]
    Unix(std::os::unix::net::UnixStream),
}

impl SocketStream {
    /// Wrap a connected TCP stream.
    pub fn from_tcp(stream: TcpStream) -> Result<Self> {
        stream.set_nodelay(true)?;
        let mut this = Self {
            inner: SocketInner::Tcp(stream),
        };
        this.set_poll_interval(DEFAULT_POLL_INTERVAL)?;
        Ok(this)
    }

    /// Wrap a connected Unix domain socket stream.
    #[cfg(unix)]
    pub fn from_unix(stream: std::os::unix::net::UnixStream) -> Result<Self> {
        let mut this = Self {
            inner: SocketInner::Unix(stream),
        };
        this.set_poll_interval(DEFAULT_POLL_INTERVAL)?;
        Ok(this)
    }

    /// Connect to a TCP address (blocking).
    pub fn connect_tcp(addr: &str) -> Result<Self> {
        let stream = TcpStream::connect(addr).map_err(|e| TransportError::Connect {
            endpoint: format!("tcp://{addr}"),
            source: e,
        })?;
        debug!(addr, "connected to tcp endpoint");
        Self::from_tcp(stream)
    }

    /// Set write timeout on the underlying socket.
    pub fn set_write_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        match &self.inner {
            SocketInner::Tcp(stream) => stream.set_write_timeout(timeout).map_err(Into::into),
            #[cfg(unix)]
            SocketInner::Unix(stream) => stream.set_write_timeout(timeout).map_err(Into::into),
        }
    }

    /// Shut down both directions of the socket.
    pub fn shutdown(&self) -> Result<()> {
        let result = match &self.inner {
            SocketInner::Tcp(stream) => stream.shutdown(std::net::Shutdown::Both),
            #[cfg(unix)]
            SocketInner::Unix(stream) => stream.shutdown(std::net::Shutdown::Both),
        };
        match result {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotConnected => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    /// Transport name for diagnostics.
    pub fn transport_name(&self) -> &'static str {
        match &self.inner {
            SocketInner::Tcp(_) => "tcp",
            #[cfg(unix)]
            SocketInner::Unix(_) => "unix-domain-socket",
        }
    }

    fn raw_read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match &mut self.inner {
            SocketInner::Tcp(stream) => stream.read(buf),
            #[cfg(unix)]
            SocketInner::Unix(stream) => stream.read(buf),
        }
    }

    fn raw_write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match &mut self.inner {
            SocketInner::Tcp(stream) => stream.write(buf),
            #[cfg(unix)]
            SocketInner::Unix(stream) => stream.write(buf),
        }
    }

    #[cfg(unix)]
    fn raw_fd(&self) -> std::os::fd::RawFd {
        use std::os::fd::AsRawFd;

        match &self.inner {
            SocketInner::Tcp(stream) => stream.as_raw_fd(),
            SocketInner::Unix(stream) => stream.as_raw_fd(),
        }
    }
}

impl ByteStream for SocketStream {
    #[cfg(unix)]
    fn bytes_available(&mut self) -> Result<usize> {
        crate::sys::pending_bytes(self.raw_fd()).map_err(Into::into)
    }

    #[cfg(not(unix))]
    fn bytes_available(&mut self) -> Result<usize> {
        Ok(0)
    }

    fn read_into(&mut self, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        loop {
            match self.raw_read(buf) {
                Ok(0) => return Err(TransportError::Closed),
                Ok(n) => return Ok(n),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err)
                    if err.kind() == ErrorKind::WouldBlock || err.kind() == ErrorKind::TimedOut =>
                {
                    return Ok(0)
                }
                Err(err) => return Err(classify_io(err)),
            }
        }
    }

    fn write_bytes(&mut self, buf: &[u8]) -> Result<usize> {
        loop {
            match self.raw_write(buf) {
                Ok(n) => return Ok(n),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock => return Ok(0),
                Err(err) => return Err(classify_io(err)),
            }
        }
    }

    fn flush(&mut self) -> Result<()> {
        let result = match &mut self.inner {
            SocketInner::Tcp(stream) => stream.flush(),
            #[cfg(unix)]
            SocketInner::Unix(stream) => stream.flush(),
        };
        result.map_err(classify_io)
    }

    fn set_poll_interval(&mut self, interval: Duration) -> Result<()> {
        // A zero timeout means "block forever" for std sockets.
        let timeout = Some(interval.max(Duration::from_millis(1)));
        match &self.inner {
            SocketInner::Tcp(stream) => stream.set_read_timeout(timeout)?,
            #[cfg(unix)]
            SocketInner::Unix(stream) => stream.set_read_timeout(timeout)?,
        }
        Ok(())
    }
}

/// Map link-loss style I/O errors to [`TransportError::Closed`].
pub(crate) fn classify_io(err: std::io::Error) -> TransportError {
    match err.kind() {
        ErrorKind::BrokenPipe
        | ErrorKind::ConnectionReset
        | ErrorKind::ConnectionAborted
        | ErrorKind::NotConnected
        | ErrorKind::UnexpectedEof => TransportError::Closed,
        _ => TransportError::Io(err),
    }
}

impl std::fmt::Debug for SocketStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SocketStream")
            .field("type", &self.transport_name())
            .finish()
    }
}
