use bytes::Buf;
use pinwire_transport::ByteStream;

use crate::error::{BusError, Result};
use crate::exchange::Requester;
use crate::message::{Command, Level, PinMode};

/// Digital and analog pin access.
pub trait GpioBackend: Send + Sync {
    fn set_mode(&self, pin: u8, mode: PinMode) -> Result<()>;

    fn write(&self, pin: u8, level: Level) -> Result<()>;

    /// Current level of `pin`. Fails rather than guessing a level.
    fn read(&self, pin: u8) -> Result<Level>;

    fn analog_read(&self, pin: u8) -> Result<u16>;

    fn analog_write(&self, pin: u8, value: u16) -> Result<()>;
}

/// GPIO executed by a remote agent.
#[derive(Debug)]
pub struct RemoteGpio<S: ByteStream> {
    requester: Requester<S>,
}

impl<S: ByteStream> RemoteGpio<S> {
    pub fn new(requester: Requester<S>) -> Self {
        Self { requester }
    }
}

impl<S: ByteStream> GpioBackend for RemoteGpio<S> {
    fn set_mode(&self, pin: u8, mode: PinMode) -> Result<()> {
        self.requester.call(&Command::SetPinMode { pin, mode })?;
        Ok(())
    }

    fn write(&self, pin: u8, level: Level) -> Result<()> {
        self.requester.call(&Command::DigitalWrite { pin, level })?;
        Ok(())
    }

    fn read(&self, pin: u8) -> Result<Level> {
        let payload = self.requester.call(&Command::DigitalRead { pin })?;
        match payload.as_ref() {
            [0] => Ok(Level::Low),
            [1] => Ok(Level::High),
            other => Err(BusError::Protocol(format!(
                "digital read of pin {pin} returned {other:02x?}"
            ))),
        }
    }

    fn analog_read(&self, pin: u8) -> Result<u16> {
        let mut payload = self.requester.call(&Command::AnalogRead { pin })?;
        if payload.len() != 2 {
            return Err(BusError::Protocol(format!(
                "analog read of pin {pin} returned {} bytes",
                payload.len()
            )));
        }
        Ok(payload.get_u16_le())
    }

    fn analog_write(&self, pin: u8, value: u16) -> Result<()> {
        self.requester.call(&Command::AnalogWrite { pin, value })?;
        Ok(())
    }
}
