use std::io;
use std::time::Duration;

use bytes::{Buf, BytesMut};
use pinwire_frame::{Channel, FrameError};
use pinwire_transport::{ByteStream, TransportError, DEFAULT_POLL_INTERVAL};

/// A virtual serial console carried on one multiplexed channel.
///
/// Usable wherever a [`ByteStream`] is expected, and as `std::io::Read` /
/// `Write`. Each write goes out as one frame; reads hand out received frames
/// byte by byte.
#[derive(Debug)]
pub struct RemoteSerial<S: ByteStream> {
    index: u8,
    channel: Channel<S>,
    pending: BytesMut,
    poll_interval: Duration,
}

fn to_transport(err: FrameError) -> TransportError {
    match err {
        FrameError::TransportClosed => TransportError::Closed,
        FrameError::Transport(inner) => inner,
        other => TransportError::Io(io::Error::other(other)),
    }
}

impl<S: ByteStream> RemoteSerial<S> {
    pub(crate) fn new(index: u8, channel: Channel<S>) -> Self {
        Self {
            index,
            channel,
            pending: BytesMut::new(),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Console index, 0-2.
    pub fn index(&self) -> u8 {
        self.index
    }

    /// Move every frame already received for this console into `pending`.
    fn collect_ready(&mut self) -> pinwire_transport::Result<()> {
        while let Some(payload) = self.channel.try_read().map_err(to_transport)? {
            self.pending.extend_from_slice(&payload);
        }
        Ok(())
    }

    fn take_pending(&mut self, buf: &mut [u8]) -> usize {
        let n = buf.len().min(self.pending.len());
        buf[..n].copy_from_slice(&self.pending[..n]);
        self.pending.advance(n);
        n
    }
}

impl<S: ByteStream> ByteStream for RemoteSerial<S> {
    fn bytes_available(&mut self) -> pinwire_transport::Result<usize> {
        self.collect_ready()?;
        Ok(self.pending.len())
    }

    fn read_into(&mut self, buf: &mut [u8]) -> pinwire_transport::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if self.pending.is_empty() {
            match self.channel.read_frame(self.poll_interval) {
                Ok(payload) => self.pending.extend_from_slice(&payload),
                Err(FrameError::Timeout(_)) => return Ok(0),
                Err(err) => return Err(to_transport(err)),
            }
        }
        Ok(self.take_pending(buf))
    }

    fn write_bytes(&mut self, buf: &[u8]) -> pinwire_transport::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        self.channel.write(buf).map_err(to_transport)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> pinwire_transport::Result<()> {
        if self.channel.is_closed() {
            return Err(TransportError::Closed);
        }
        Ok(())
    }

    fn set_poll_interval(&mut self, interval: Duration) -> pinwire_transport::Result<()> {
        self.poll_interval = interval;
        Ok(())
    }
}

impl<S: ByteStream> io::Read for RemoteSerial<S> {
    /// Blocks until data arrives. A closed link reads as end of file.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        loop {
            match self.read_into(buf) {
                Ok(0) => continue,
                Ok(n) => return Ok(n),
                Err(TransportError::Closed) => return Ok(0),
                Err(err) => return Err(io::Error::other(err)),
            }
        }
    }
}

impl<S: ByteStream> io::Write for RemoteSerial<S> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.write_bytes(buf) {
            Ok(n) => Ok(n),
            Err(TransportError::Closed) => Err(io::ErrorKind::BrokenPipe.into()),
            Err(err) => Err(io::Error::other(err)),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        ByteStream::flush(self).map_err(|err| match err {
            TransportError::Closed => io::ErrorKind::BrokenPipe.into(),
            other => io::Error::other(other),
        })
    }
}
