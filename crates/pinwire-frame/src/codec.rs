use std::time::Duration;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use pinwire_transport::DEFAULT_POLL_INTERVAL;

use crate::crc::FrameCrc;
use crate::error::{FrameError, Result};

/// Frame header: magic (2) + channel (1) + length (4) = 7 bytes.
pub const HEADER_SIZE: usize = 7;

/// Frame trailer: CRC-16 (2 bytes).
pub const TRAILER_SIZE: usize = FrameCrc::LENGTH;

/// Magic bytes: "PW" (0x50 0x57).
pub const MAGIC: [u8; 2] = [0x50, 0x57];

/// Default maximum payload size: 64 KiB.
pub const DEFAULT_MAX_PAYLOAD: usize = 64 * 1024;

/// Default number of frames buffered per channel before the oldest is dropped.
pub const DEFAULT_MAX_QUEUED_FRAMES: usize = 64;

/// A framed message with channel routing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// The logical channel this message belongs to.
    pub channel: u8,
    /// The message payload.
    pub payload: Bytes,
}

impl Frame {
    /// Create a new frame.
    pub fn new(channel: u8, payload: impl Into<Bytes>) -> Self {
        Self {
            channel,
            payload: payload.into(),
        }
    }

    /// The total wire size of this frame (header + payload + trailer).
    pub fn wire_size(&self) -> usize {
        HEADER_SIZE + self.payload.len() + TRAILER_SIZE
    }
}

/// Encode a frame into the wire format.
///
/// Wire format (little endian):
/// ```text
/// ┌────────────┬─────────┬────────────┬──────────────────┬────────────┐
/// │ Magic (2B) │ Channel │ Length     │ Payload          │ CRC-16     │
/// │ 0x50 0x57  │ (1B)    │ (4B LE)    │ (Length bytes)   │ (2B LE)    │
/// │ "PW"       │         │            │                  │            │
/// └────────────┴─────────┴────────────┴──────────────────┴────────────┘
/// ```
/// The CRC covers channel, length and payload.
pub fn encode_frame(channel: u8, payload: &[u8], dst: &mut BytesMut) -> Result<()> {
    if payload.len() > u32::MAX as usize {
        return Err(FrameError::PayloadTooLarge {
            size: payload.len(),
            max: u32::MAX as usize,
        });
    }
    dst.reserve(HEADER_SIZE + payload.len() + TRAILER_SIZE);
    let start = dst.len();
    dst.put_slice(&MAGIC);
    dst.put_u8(channel);
    dst.put_u32_le(payload.len() as u32);
    dst.put_slice(payload);
    let crc = FrameCrc::of(&dst[start + MAGIC.len()..]);
    dst.put_u16_le(crc);
    Ok(())
}

/// Decode a frame from a buffer.
///
/// Returns `Ok(None)` if the buffer doesn't contain a complete frame yet.
/// `InvalidMagic` and `PayloadTooLarge` leave the buffer untouched so the
/// caller can resynchronise; a `ChecksumMismatch` consumes the bad frame.
pub fn decode_frame(src: &mut BytesMut, max_payload: usize) -> Result<Option<Frame>> {
    if src.is_empty() {
        return Ok(None);
    }
    let magic_seen = src.len().min(MAGIC.len());
    if src[..magic_seen] != MAGIC[..magic_seen] {
        return Err(FrameError::InvalidMagic);
    }
    if src.len() < HEADER_SIZE {
        return Ok(None);
    }

    let channel = src[2];
    let payload_len = u32::from_le_bytes([src[3], src[4], src[5], src[6]]) as usize;

    if payload_len > max_payload {
        return Err(FrameError::PayloadTooLarge {
            size: payload_len,
            max: max_payload,
        });
    }

    let body_end = HEADER_SIZE + payload_len;
    if src.len() < body_end + TRAILER_SIZE {
        return Ok(None);
    }

    let actual = FrameCrc::of(&src[MAGIC.len()..body_end]);
    let expected = u16::from_le_bytes([src[body_end], src[body_end + 1]]);

    src.advance(HEADER_SIZE);
    let payload = src.split_to(payload_len).freeze();
    src.advance(TRAILER_SIZE);

    if actual != expected {
        return Err(FrameError::ChecksumMismatch {
            channel,
            expected,
            actual,
        });
    }

    Ok(Some(Frame { channel, payload }))
}

/// Configuration for framing and multiplexing.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Maximum payload size in bytes. Default: 64 KiB.
    pub max_payload_size: usize,
    /// How long a single stream read may wait. Bounds how late a deadline is noticed.
    pub poll_interval: Duration,
    /// Frames kept per channel before the oldest is dropped.
    pub max_queued_frames: usize,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_payload_size: DEFAULT_MAX_PAYLOAD,
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_queued_frames: DEFAULT_MAX_QUEUED_FRAMES,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_decode() {
        let mut buf = BytesMut::new();
        let payload = b"digital write";

        encode_frame(4, payload, &mut buf).unwrap();
        assert_eq!(buf.len(), HEADER_SIZE + payload.len() + TRAILER_SIZE);

        let frame = decode_frame(&mut buf, DEFAULT_MAX_PAYLOAD)
            .unwrap()
            .unwrap();
        assert_eq!(frame.channel, 4);
        assert_eq!(frame.payload.as_ref(), payload);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_length_field_exceeds_one_byte() {
        let payload = vec![0x5a; 1000];
        let mut buf = BytesMut::new();
        encode_frame(5, &payload, &mut buf).unwrap();
        assert_eq!(&buf[3..7], &1000u32.to_le_bytes());

        let frame = decode_frame(&mut buf, DEFAULT_MAX_PAYLOAD)
            .unwrap()
            .unwrap();
        assert_eq!(frame.payload.len(), 1000);
    }

    #[test]
    fn test_decode_incomplete_header() {
        let mut buf = BytesMut::from(&[0x50, 0x57, 0x01][..]);
        assert!(decode_frame(&mut buf, DEFAULT_MAX_PAYLOAD).unwrap().is_none());
        assert_eq!(buf.len(), 3);
    }

    #[test]
    fn test_decode_incomplete_trailer() {
        let mut buf = BytesMut::new();
        encode_frame(1, b"hello", &mut buf).unwrap();
        buf.truncate(buf.len() - 1);

        assert!(decode_frame(&mut buf, DEFAULT_MAX_PAYLOAD).unwrap().is_none());
    }

    #[test]
    fn test_decode_invalid_magic() {
        let mut buf = BytesMut::from(&[0xFF, 0x57, 0x00][..]);
        assert!(matches!(
            decode_frame(&mut buf, DEFAULT_MAX_PAYLOAD),
            Err(FrameError::InvalidMagic)
        ));

        // A lone first magic byte is still a possible frame start.
        let mut buf = BytesMut::from(&[0x50][..]);
        assert!(decode_frame(&mut buf, DEFAULT_MAX_PAYLOAD).unwrap().is_none());
    }

    #[test]
    fn test_decode_payload_too_large() {
        let mut buf = BytesMut::new();
        buf.put_slice(&MAGIC);
        buf.put_u8(1);
        buf.put_u32_le(1024 * 1024);

        let result = decode_frame(&mut buf, DEFAULT_MAX_PAYLOAD);
        assert!(matches!(result, Err(FrameError::PayloadTooLarge { .. })));
        assert_eq!(buf.len(), HEADER_SIZE);
    }

    #[test]
    fn test_corrupted_payload_is_consumed_and_reported() {
        let mut buf = BytesMut::new();
        encode_frame(6, b"i2c data", &mut buf).unwrap();
        encode_frame(6, b"next", &mut buf).unwrap();
        buf[HEADER_SIZE + 2] ^= 0x01;

        let err = decode_frame(&mut buf, DEFAULT_MAX_PAYLOAD).unwrap_err();
        assert!(matches!(err, FrameError::ChecksumMismatch { channel: 6, .. }));

        let next = decode_frame(&mut buf, DEFAULT_MAX_PAYLOAD)
            .unwrap()
            .unwrap();
        assert_eq!(next.payload.as_ref(), b"next");
    }

    #[test]
    fn test_multiple_frames() {
        let mut buf = BytesMut::new();
        encode_frame(0, b"first", &mut buf).unwrap();
        encode_frame(2, b"second", &mut buf).unwrap();

        let f1 = decode_frame(&mut buf, DEFAULT_MAX_PAYLOAD)
            .unwrap()
            .unwrap();
        let f2 = decode_frame(&mut buf, DEFAULT_MAX_PAYLOAD)
            .unwrap()
            .unwrap();
        assert_eq!((f1.channel, f1.payload.as_ref()), (0, b"first".as_ref()));
        assert_eq!((f2.channel, f2.payload.as_ref()), (2, b"second".as_ref()));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_empty_payload() {
        let mut buf = BytesMut::new();
        encode_frame(3, b"", &mut buf).unwrap();

        let frame = decode_frame(&mut buf, DEFAULT_MAX_PAYLOAD)
            .unwrap()
            .unwrap();
        assert_eq!(frame.channel, 3);
        assert!(frame.payload.is_empty());
    }

    #[test]
    fn test_frame_wire_size() {
        let frame = Frame::new(1, Bytes::from_static(b"test"));
        assert_eq!(frame.wire_size(), HEADER_SIZE + 4 + TRAILER_SIZE);
    }
}
