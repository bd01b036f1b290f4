//! Run pin and bus oriented hardware code on a host without pins.
//!
//! Application code calls a [`Hardware`] registry for digital I/O, SPI and
//! I2C. [`bind`] connects that registry to a remote agent over any byte
//! stream, so each call becomes a request/response exchange on one of several
//! channels multiplexed over the link.
//!
//! # Crate Structure
//!
//! - [`transport`]: byte streams (sockets, serial ttys, in-memory pipes)
//! - [`frame`]: wire codec and channel multiplexer
//! - [`bus`]: messages, remote clients, the capability registry and the agent
//!
//! # Example
//!
//! ```no_run
//! use pinwire::transport::{connect, Endpoint};
//! use pinwire::{bind, Hardware, Level, LinkConfig, PinMode};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let endpoint: Endpoint = "tcp://192.168.1.40:7000".parse()?;
//! let hardware = Hardware::new();
//! let _link = bind(&hardware, connect(&endpoint)?, LinkConfig::default())?;
//!
//! hardware.pin_mode(13, PinMode::Output)?;
//! hardware.digital_write(13, Level::High)?;
//! # Ok(())
//! # }
//! ```

/// Re-export transport types.
pub mod transport {
    pub use pinwire_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use pinwire_frame::*;
}

/// Re-export bus types.
pub mod bus {
    pub use pinwire_bus::*;
}

pub use pinwire_bus::{
    bind, Agent, BusError, Capability, Hardware, Level, LinkConfig, PinMode, RemoteLink,
    RemoteSerial, SpiSettings,
};
