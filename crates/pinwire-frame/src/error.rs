use std::time::Duration;

use pinwire_transport::TransportError;

/// Errors that can occur while framing, reading or routing frames.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The bytes at the read position do not start with the frame magic.
    #[error("invalid frame magic (expected 0x5057 \"PW\")")]
    InvalidMagic,

    /// The payload exceeds the configured maximum size.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// A complete frame arrived but its CRC did not match; the frame was dropped.
    #[error("frame checksum mismatch on channel {channel} (expected {expected:#06x}, got {actual:#06x})")]
    ChecksumMismatch {
        channel: u8,
        expected: u16,
        actual: u16,
    },

    /// The channel is already open on this multiplexer.
    #[error("channel {0} is already open")]
    ChannelInUse(u8),

    /// No frame arrived before the deadline.
    #[error("no frame within {0:?}")]
    Timeout(Duration),

    /// The stream was closed or failed; nothing more can be sent or received.
    #[error("transport closed")]
    TransportClosed,

    /// A stream-level error that does not by itself end the link.
    #[error("transport error: {0}")]
    Transport(TransportError),
}

impl From<TransportError> for FrameError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Closed => FrameError::TransportClosed,
            other => FrameError::Transport(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, FrameError>;
