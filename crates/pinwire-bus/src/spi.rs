use bytes::Bytes;
use pinwire_transport::ByteStream;

use crate::error::{BusError, Result};
use crate::exchange::Requester;
use crate::message::{Command, SpiSettings, RESPONSE_HEADER_SIZE};

/// Full-duplex SPI access.
pub trait SpiBackend: Send + Sync {
    fn begin_transaction(&self, settings: SpiSettings) -> Result<()>;

    /// Clock `data` out and return the bytes clocked in, same length.
    fn transfer(&self, data: &[u8]) -> Result<Bytes>;

    fn end_transaction(&self) -> Result<()>;
}

/// SPI executed by a remote agent.
#[derive(Debug)]
pub struct RemoteSpi<S: ByteStream> {
    requester: Requester<S>,
    max_transfer: usize,
}

impl<S: ByteStream> RemoteSpi<S> {
    /// `max_transfer` is the largest transfer whose echoed response still fits
    /// in one frame.
    pub fn new(requester: Requester<S>, max_transfer: usize) -> Self {
        Self {
            requester,
            max_transfer,
        }
    }

    /// Largest transfer the link can carry for a frame limit of `max_payload_size`.
    pub fn max_transfer_for(max_payload_size: usize) -> usize {
        max_payload_size.saturating_sub(RESPONSE_HEADER_SIZE)
    }
}

impl<S: ByteStream> SpiBackend for RemoteSpi<S> {
    fn begin_transaction(&self, settings: SpiSettings) -> Result<()> {
        self.requester
            .call(&Command::SpiBeginTransaction(settings))?;
        Ok(())
    }

    fn transfer(&self, data: &[u8]) -> Result<Bytes> {
        if data.len() > self.max_transfer {
            return Err(BusError::InvalidState("spi transfer larger than one frame"));
        }
        let received = self
            .requester
            .call(&Command::SpiTransfer(Bytes::copy_from_slice(data)))?;
        if received.len() != data.len() {
            return Err(BusError::Protocol(format!(
                "spi transfer sent {} bytes but received {}",
                data.len(),
                received.len()
            )));
        }
        Ok(received)
    }

    fn end_transaction(&self) -> Result<()> {
        self.requester.call(&Command::SpiEndTransaction)?;
        Ok(())
    }
}
