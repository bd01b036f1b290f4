//! Remote peripheral protocol for pinwire.
//!
//! Application code calls a [`Hardware`] registry with pin/bus operations.
//! After [`bind`], those calls become request/response exchanges with a
//! remote [`Agent`] over one multiplexed byte stream:
//!
//! ```text
//! Hardware -> RemoteGpio/RemoteSpi/RemoteI2c -> Requester -> Multiplexer -> ByteStream
//!                                                                   |
//!                                      Agent -> local Hardware <----+
//! ```

pub mod agent;
pub mod binding;
pub mod error;
pub mod exchange;
pub mod gpio;
pub mod i2c;
pub mod message;
pub mod registry;
pub mod serial;
pub mod sim;
pub mod spi;

pub use agent::{Agent, ConsoleHandler};
pub use binding::{bind, LinkConfig, RemoteLink};
pub use error::{BusError, Result};
pub use exchange::{ExchangeGate, ExchangeState, Requester, DEFAULT_RESPONSE_TIMEOUT};
pub use gpio::{GpioBackend, RemoteGpio};
pub use i2c::{I2cBackend, RemoteI2c, DEFAULT_I2C_BUFFER_SIZE};
pub use message::{
    status, status_text, BitOrder, Command, DecodeError, Level, Opcode, PinMode, Response,
    SpiMode, SpiSettings, RESPONSE_HEADER_SIZE,
};
pub use registry::{Capability, Hardware};
pub use serial::RemoteSerial;
pub use sim::{SimGpio, SimI2c, SimSpi};
pub use spi::{RemoteSpi, SpiBackend};
