//! Length-prefixed, CRC-checked framing with channel multiplexing.
//!
//! Every frame on the wire carries:
//! - A 2-byte magic number ("PW") for stream synchronisation
//! - A 1-byte channel id
//! - A 4-byte little-endian payload length
//! - A CRC-16 over channel, length and payload
//!
//! [`Multiplexer`] shares one [`ByteStream`](pinwire_transport::ByteStream)
//! between independent logical channels without interleaving their frames.

pub mod channel;
pub mod codec;
pub mod crc;
pub mod error;
pub mod link;
pub mod mux;
pub mod reader;
pub mod writer;

pub use channel::{
    channel_name, console_channel, is_console, CONSOLE_0, CONSOLE_1, CONSOLE_2, CONSOLE_COUNT,
    CONTROL, GPIO, I2C, SPI,
};
pub use codec::{
    decode_frame, encode_frame, Frame, FrameConfig, DEFAULT_MAX_PAYLOAD,
    DEFAULT_MAX_QUEUED_FRAMES, HEADER_SIZE, MAGIC, TRAILER_SIZE,
};
pub use crc::FrameCrc;
pub use error::{FrameError, Result};
pub use link::FramedLink;
pub use mux::{Channel, Multiplexer, MuxStats};
pub use reader::FrameReader;
pub use writer::FrameWriter;
