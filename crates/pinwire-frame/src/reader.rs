use std::time::{Duration, Instant};

use bytes::{Buf, BytesMut};
use pinwire_transport::ByteStream;
use tracing::{trace, warn};

use crate::codec::{decode_frame, Frame, FrameConfig};
use crate::error::{FrameError, Result};

const INITIAL_BUFFER_CAPACITY: usize = 1024;
const READ_CHUNK_SIZE: usize = 1024;

/// Assembles complete frames from the bytes of a [`ByteStream`].
///
/// Handles partial reads internally and resynchronises after line noise by
/// skipping bytes until a plausible frame header lines up again. The reader
/// does not own the stream, so a single stream can be shared with a
/// [`FrameWriter`](crate::FrameWriter).
#[derive(Debug)]
pub struct FrameReader {
    buf: BytesMut,
    config: FrameConfig,
    discarded: u64,
}

impl FrameReader {
    /// Create a new frame reader with default configuration.
    pub fn new() -> Self {
        Self::with_config(FrameConfig::default())
    }

    /// Create a new frame reader with explicit configuration.
    pub fn with_config(config: FrameConfig) -> Self {
        Self {
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            config,
            discarded: 0,
        }
    }

    /// Feed raw bytes into the reader.
    pub fn push_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Perform one read on the stream and buffer whatever arrived.
    ///
    /// Waits at most the stream's poll interval. Returns the number of bytes read.
    pub fn fill<S: ByteStream + ?Sized>(&mut self, stream: &mut S) -> Result<usize> {
        let mut chunk = [0u8; READ_CHUNK_SIZE];
        let read = stream.read_into(&mut chunk)?;
        self.buf.extend_from_slice(&chunk[..read]);
        Ok(read)
    }

    /// Decode the next buffered frame, if one is complete.
    ///
    /// Garbage before a frame is skipped. A frame whose checksum fails is
    /// dropped and reported as [`FrameError::ChecksumMismatch`].
    pub fn next_frame(&mut self) -> Result<Option<Frame>> {
        loop {
            match decode_frame(&mut self.buf, self.config.max_payload_size) {
                Ok(frame) => return Ok(frame),
                Err(FrameError::InvalidMagic) | Err(FrameError::PayloadTooLarge { .. }) => {
                    self.buf.advance(1);
                    self.discarded += 1;
                    trace!(discarded = self.discarded, "resynchronising frame stream");
                }
                Err(err @ FrameError::ChecksumMismatch { .. }) => {
                    warn!(error = %err, "dropping corrupt frame");
                    return Err(err);
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Read the next complete frame, waiting at most `timeout`.
    ///
    /// Corrupt frames are skipped. Returns [`FrameError::Timeout`] when the
    /// deadline passes, at most one poll interval late.
    pub fn read_frame<S: ByteStream + ?Sized>(
        &mut self,
        stream: &mut S,
        timeout: Duration,
    ) -> Result<Frame> {
        let deadline = Instant::now() + timeout;
        loop {
            match self.next_frame() {
                Ok(Some(frame)) => return Ok(frame),
                Ok(None) => {}
                Err(FrameError::ChecksumMismatch { .. }) => continue,
                Err(err) => return Err(err),
            }

            if Instant::now() >= deadline {
                return Err(FrameError::Timeout(timeout));
            }
            self.fill(stream)?;
        }
    }

    /// Number of bytes currently buffered.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Bytes skipped while resynchronising.
    pub fn discarded_bytes(&self) -> u64 {
        self.discarded
    }

    /// Update maximum payload size for subsequent frame decoding.
    pub fn set_max_payload_size(&mut self, max_payload_size: usize) {
        self.config.max_payload_size = max_payload_size;
    }

    /// Current frame reader configuration.
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}

impl Default for FrameReader {
    fn default() -> Self {
        Self::new()
    }
}
