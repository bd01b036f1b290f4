use std::time::Duration;

use pinwire_transport::ByteStream;
use tracing::debug;

use crate::codec::{Frame, FrameConfig};
use crate::error::Result;
use crate::reader::FrameReader;
use crate::writer::FrameWriter;

/// A byte stream with a frame reader and writer attached.
///
/// Single owner: whoever holds the link is the only reader and writer of the
/// stream. The [`Multiplexer`](crate::Multiplexer) wraps one behind a lock to
/// share it between channels.
#[derive(Debug)]
pub struct FramedLink<S> {
    stream: S,
    reader: FrameReader,
    writer: FrameWriter,
}

impl<S: ByteStream> FramedLink<S> {
    /// Wrap a stream with default configuration.
    pub fn new(stream: S) -> Result<Self> {
        Self::with_config(stream, FrameConfig::default())
    }

    /// Wrap a stream and apply the configured poll interval to it.
    pub fn with_config(mut stream: S, config: FrameConfig) -> Result<Self> {
        stream.set_poll_interval(config.poll_interval)?;
        debug!(
            max_payload = config.max_payload_size,
            poll_interval = ?config.poll_interval,
            "framed link ready"
        );
        Ok(Self {
            stream,
            reader: FrameReader::with_config(config.clone()),
            writer: FrameWriter::with_config(config),
        })
    }

    /// Send one frame.
    pub fn send(&mut self, channel: u8, payload: &[u8]) -> Result<()> {
        self.writer.send(&mut self.stream, channel, payload)
    }

    /// Wait up to `timeout` for the next intact frame on any channel.
    pub fn read_frame(&mut self, timeout: Duration) -> Result<Frame> {
        self.reader.read_frame(&mut self.stream, timeout)
    }

    /// Decode a frame that is already buffered, without touching the stream.
    pub fn next_buffered(&mut self) -> Result<Option<Frame>> {
        self.reader.next_frame()
    }

    /// Perform one stream read (bounded by the poll interval) into the buffer.
    pub fn fill(&mut self) -> Result<usize> {
        self.reader.fill(&mut self.stream)
    }

    /// Return an already-buffered frame, or perform a single bounded read.
    ///
    /// Blocks at most one poll interval. Corrupt frames are reported as
    /// [`FrameError::ChecksumMismatch`](crate::FrameError::ChecksumMismatch)
    /// so callers can count them.
    pub fn poll_frame(&mut self) -> Result<Option<Frame>> {
        if let Some(frame) = self.reader.next_frame()? {
            return Ok(Some(frame));
        }
        if self.reader.fill(&mut self.stream)? == 0 {
            return Ok(None);
        }
        self.reader.next_frame()
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &S {
        &self.stream
    }

    /// Mutably borrow the underlying stream.
    pub fn get_mut(&mut self) -> &mut S {
        &mut self.stream
    }

    /// Consume the link and return the stream. Buffered bytes are lost.
    pub fn into_inner(self) -> S {
        self.stream
    }

    /// Bytes skipped while resynchronising.
    pub fn discarded_bytes(&self) -> u64 {
        self.reader.discarded_bytes()
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use pinwire_transport::pipe;

    use super::*;
    use crate::error::FrameError;

    #[test]
    fn frames_cross_a_pipe() {
        let (a, b) = pipe();
        let mut left = FramedLink::new(a).unwrap();
        let mut right = FramedLink::new(b).unwrap();

        left.send(4, b"\x00\x01\x02").unwrap();
        left.send(0, b"console").unwrap();

        let first = right.read_frame(Duration::from_secs(1)).unwrap();
        let second = right.read_frame(Duration::from_secs(1)).unwrap();
        assert_eq!(first, Frame::new(4, &b"\x00\x01\x02"[..]));
        assert_eq!(second, Frame::new(0, &b"console"[..]));
    }

    #[test]
    fn request_reply_between_threads() {
        let (a, b) = pipe();
        let mut host = FramedLink::new(a).unwrap();
        let mut agent = FramedLink::new(b).unwrap();

        let responder = thread::spawn(move || {
            let frame = agent.read_frame(Duration::from_secs(2)).unwrap();
            let mut reply = frame.payload.to_vec();
            reply.reverse();
            agent.send(frame.channel, &reply).unwrap();
        });

        host.send(5, b"abc").unwrap();
        let reply = host.read_frame(Duration::from_secs(2)).unwrap();
        assert_eq!(reply, Frame::new(5, &b"cba"[..]));
        responder.join().unwrap();
    }

    #[test]
    fn poll_frame_returns_none_when_idle() {
        let (a, _b) = pipe();
        let config = FrameConfig {
            poll_interval: Duration::from_millis(5),
            ..FrameConfig::default()
        };
        let mut link = FramedLink::with_config(a, config).unwrap();
        assert!(link.poll_frame().unwrap().is_none());
    }

    #[test]
    fn peer_drop_surfaces_as_transport_closed() {
        let (a, b) = pipe();
        let mut link = FramedLink::new(a).unwrap();
        drop(b);
        assert!(matches!(
            link.read_frame(Duration::from_secs(1)),
            Err(FrameError::TransportClosed)
        ));
        assert!(matches!(
            link.send(1, b"late"),
            Err(FrameError::TransportClosed)
        ));
    }
}
