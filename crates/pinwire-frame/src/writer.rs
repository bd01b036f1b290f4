use bytes::BytesMut;
use pinwire_transport::ByteStream;

use crate::codec::{encode_frame, Frame, FrameConfig};
use crate::error::{FrameError, Result};

const INITIAL_BUFFER_CAPACITY: usize = 1024;

/// Encodes frames and writes them whole to a [`ByteStream`].
#[derive(Debug)]
pub struct FrameWriter {
    buf: BytesMut,
    config: FrameConfig,
}

impl FrameWriter {
    /// Create a new frame writer with default configuration.
    pub fn new() -> Self {
        Self::with_config(FrameConfig::default())
    }

    /// Create a new frame writer with explicit configuration.
    pub fn with_config(config: FrameConfig) -> Self {
        Self {
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            config,
        }
    }

    /// Write a complete frame.
    pub fn write_frame<S: ByteStream + ?Sized>(
        &mut self,
        stream: &mut S,
        frame: &Frame,
    ) -> Result<()> {
        self.send(stream, frame.channel, frame.payload.as_ref())
    }

    /// Encode and send a payload on a channel, then flush.
    ///
    /// Returns only after every byte of the frame was accepted by the stream.
    pub fn send<S: ByteStream + ?Sized>(
        &mut self,
        stream: &mut S,
        channel: u8,
        payload: &[u8],
    ) -> Result<()> {
        if payload.len() > self.config.max_payload_size {
            return Err(FrameError::PayloadTooLarge {
                size: payload.len(),
                max: self.config.max_payload_size,
            });
        }

        self.buf.clear();
        encode_frame(channel, payload, &mut self.buf)?;

        let mut offset = 0usize;
        while offset < self.buf.len() {
            match stream.write_bytes(&self.buf[offset..])? {
                0 => return Err(FrameError::TransportClosed),
                n => offset += n,
            }
        }

        stream.flush()?;
        Ok(())
    }

    /// Update maximum payload size for subsequent frame encoding.
    pub fn set_max_payload_size(&mut self, max_payload_size: usize) {
        self.config.max_payload_size = max_payload_size;
    }

    /// Current frame writer configuration.
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}

impl Default for FrameWriter {
    fn default() -> Self {
        Self::new()
    }
}
