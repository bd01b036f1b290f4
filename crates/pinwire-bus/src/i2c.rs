use std::sync::{Mutex, MutexGuard, PoisonError};

use bytes::{Bytes, BytesMut};
use pinwire_transport::ByteStream;
use tracing::{debug, trace};

use crate::error::{BusError, Result};
use crate::exchange::Requester;
use crate::message::{status, Command, Opcode};

/// Default size of the transmit buffer behind `write`.
pub const DEFAULT_I2C_BUFFER_SIZE: usize = 256;

/// Transactional I2C controller access, shaped like the Wire API.
///
/// Writes are two-phase: `begin_transmission` picks the target, `write`
/// only buffers, and `end_transmission` puts the whole message on the bus.
pub trait I2cBackend: Send + Sync {
    fn begin(&self) -> Result<()>;

    fn end(&self) -> Result<()>;

    fn set_clock(&self, hz: u32) -> Result<()>;

    fn begin_transmission(&self, address: u8) -> Result<()>;

    /// Buffer bytes for the open transmission. Returns how many were accepted.
    fn write(&self, data: &[u8]) -> Result<usize>;

    /// Send the buffered transmission. A NACK or overflow is a
    /// [`BusError::RemoteFailure`] carrying the Wire status code.
    fn end_transmission(&self, stop: bool) -> Result<()>;

    /// Read up to `count` bytes from `address`.
    ///
    /// Implementations either return what the device sent, possibly fewer
    /// than `count` bytes, or fail with [`BusError::ShortRead`].
    /// [`Hardware::i2c_request_from`](crate::Hardware::i2c_request_from)
    /// turns the former into the latter.
    fn request_from(&self, address: u8, count: usize, stop: bool) -> Result<Bytes>;
}

#[derive(Debug, Default)]
struct Transmission {
    address: Option<u8>,
    buffer: BytesMut,
    overflowed: bool,
}

/// I2C executed by a remote agent.
#[derive(Debug)]
pub struct RemoteI2c<S: ByteStream> {
    requester: Requester<S>,
    tx: Mutex<Transmission>,
    buffer_size: usize,
}

impl<S: ByteStream> RemoteI2c<S> {
    pub fn new(requester: Requester<S>, buffer_size: usize) -> Self {
        Self {
            requester,
            tx: Mutex::new(Transmission::default()),
            buffer_size,
        }
    }

    fn tx(&self) -> MutexGuard<'_, Transmission> {
        self.tx.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<S: ByteStream> I2cBackend for RemoteI2c<S> {
    fn begin(&self) -> Result<()> {
        self.requester.call(&Command::I2cBegin)?;
        Ok(())
    }

    fn end(&self) -> Result<()> {
        *self.tx() = Transmission::default();
        self.requester.call(&Command::I2cEnd)?;
        Ok(())
    }

    fn set_clock(&self, hz: u32) -> Result<()> {
        self.requester.call(&Command::I2cSetClock { hz })?;
        Ok(())
    }

    fn begin_transmission(&self, address: u8) -> Result<()> {
        let mut tx = self.tx();
        tx.address = Some(address);
        tx.buffer.clear();
        tx.overflowed = false;
        trace!(address, "i2c transmission opened");
        Ok(())
    }

    fn write(&self, data: &[u8]) -> Result<usize> {
        let mut tx = self.tx();
        if tx.address.is_none() {
            return Err(BusError::InvalidState("i2c write without begin_transmission"));
        }
        let room = self.buffer_size.saturating_sub(tx.buffer.len());
        let accepted = data.len().min(room);
        if accepted < data.len() {
            tx.overflowed = true;
        }
        tx.buffer.extend_from_slice(&data[..accepted]);
        Ok(accepted)
    }

    fn end_transmission(&self, stop: bool) -> Result<()> {
        let (address, data) = {
            let mut tx = self.tx();
            let address = tx
                .address
                .take()
                .ok_or(BusError::InvalidState("i2c end_transmission without begin_transmission"))?;
            let data = tx.buffer.split().freeze();
            // An overflowed transmission never reaches the bus.
            if std::mem::take(&mut tx.overflowed) {
                debug!(address, "i2c transmission overflowed the buffer");
                return Err(BusError::RemoteFailure {
                    opcode: Opcode::I2cWrite,
                    status: status::DATA_TOO_LONG,
                });
            }
            (address, data)
        };
        self.requester.call(&Command::I2cWrite {
            address,
            stop,
            data,
        })?;
        Ok(())
    }

    fn request_from(&self, address: u8, count: usize, stop: bool) -> Result<Bytes> {
        let wire_count = u16::try_from(count)
            .ok()
            .filter(|_| count <= self.buffer_size)
            .ok_or(BusError::InvalidState("i2c request larger than the receive buffer"))?;
        let received = self.requester.call(&Command::I2cRequestFrom {
            address,
            count: wire_count,
            stop,
        })?;
        if received.len() < count {
            return Err(BusError::ShortRead {
                expected: count,
                received: received.len(),
            });
        }
        if received.len() > count {
            return Err(BusError::Protocol(format!(
                "i2c request for {count} bytes returned {}",
                received.len()
            )));
        }
        Ok(received)
    }
}
