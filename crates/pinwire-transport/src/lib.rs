//! Byte stream abstraction for pinwire links.
//!
//! The protocol layers above only ever see a [`ByteStream`]: a duplex,
//! byte-granular channel with no framing of its own. Implementations here:
//! - TCP and Unix domain sockets ([`SocketStream`], [`StreamListener`])
//! - Serial ttys on Unix ([`SerialDevice`])
//! - In-memory pipes for tests and demos ([`memory::pipe`])

pub mod endpoint;
pub mod error;
pub mod listener;
pub mod memory;
pub mod socket;
pub mod traits;

#[cfg(unix)]
pub mod serial;
#[cfg(unix)]
mod sys;

pub use endpoint::{connect, Endpoint, DEFAULT_BAUD};
pub use error::{Result, TransportError};
pub use listener::StreamListener;
pub use memory::{pipe, MemoryStream, PipeCloser};
pub use socket::SocketStream;
pub use traits::{ByteStream, DEFAULT_POLL_INTERVAL};

#[cfg(unix)]
pub use serial::SerialDevice;
