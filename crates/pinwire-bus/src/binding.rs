use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use pinwire_frame::{
    console_channel, FrameConfig, FrameError, Multiplexer, MuxStats, CONTROL, GPIO, I2C, SPI,
};
use pinwire_transport::ByteStream;
use tracing::{debug, info};

use crate::error::{BusError, Result};
use crate::exchange::{ExchangeGate, Requester, DEFAULT_RESPONSE_TIMEOUT};
use crate::gpio::RemoteGpio;
use crate::i2c::{RemoteI2c, DEFAULT_I2C_BUFFER_SIZE};
use crate::message::Command;
use crate::registry::Hardware;
use crate::serial::RemoteSerial;
use crate::spi::RemoteSpi;

/// Settings for a bound link.
#[derive(Debug, Clone)]
pub struct LinkConfig {
    pub frame: FrameConfig,
    /// How long each bus call waits for its response.
    pub response_timeout: Duration,
    /// Transmit/receive buffer size of the remote I2C client.
    pub i2c_buffer_size: usize,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            frame: FrameConfig::default(),
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
            i2c_buffer_size: DEFAULT_I2C_BUFFER_SIZE,
        }
    }
}

/// A stream bound to a [`Hardware`] registry.
///
/// The registry's GPIO, SPI and I2C clients talk through this link. Keep it
/// to open consoles, ping the agent or close the connection.
#[derive(Debug)]
pub struct RemoteLink<S: ByteStream> {
    mux: Multiplexer<S>,
    control: Requester<S>,
}

/// Bind `stream` to `hardware`: build fresh remote clients over it and
/// install them, replacing (and releasing) whatever was bound before.
pub fn bind<S>(hardware: &Hardware, stream: S, config: LinkConfig) -> Result<RemoteLink<S>>
where
    S: ByteStream + 'static,
{
    let mux = Multiplexer::with_config(stream, config.frame.clone())?;
    let gate = ExchangeGate::new();
    let requester = |id: u8| -> Result<Requester<S>> {
        let channel = mux.open_channel(id)?;
        Ok(Requester::new(
            channel,
            gate.clone(),
            config.response_timeout,
        ))
    };

    let gpio = RemoteGpio::new(requester(GPIO)?);
    let spi = RemoteSpi::new(
        requester(SPI)?,
        RemoteSpi::<S>::max_transfer_for(config.frame.max_payload_size),
    );
    let i2c = RemoteI2c::new(requester(I2C)?, config.i2c_buffer_size);
    let control = requester(CONTROL)?;

    hardware.install_gpio(Box::new(gpio));
    hardware.install_spi(Box::new(spi));
    hardware.install_i2c(Box::new(i2c));
    info!(
        response_timeout = ?config.response_timeout,
        "remote hardware bound"
    );

    Ok(RemoteLink { mux, control })
}

impl<S: ByteStream> RemoteLink<S> {
    /// Open virtual serial console `index` (0-2).
    pub fn console(&self, index: u8) -> Result<RemoteSerial<S>> {
        let id = console_channel(index)
            .ok_or(BusError::InvalidState("console index out of range"))?;
        match self.mux.open_channel(id) {
            Ok(channel) => Ok(RemoteSerial::new(index, channel)),
            Err(FrameError::ChannelInUse(_)) => {
                Err(BusError::InvalidState("console already open"))
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Round trip to the agent over the control channel.
    pub fn ping(&self) -> Result<Duration> {
        let stamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |since| since.as_nanos() as u64);
        let nonce = Bytes::copy_from_slice(&stamp.to_le_bytes());
        let started = Instant::now();
        let echoed = self.control.call(&Command::Ping(nonce.clone()))?;
        if echoed != nonce {
            return Err(BusError::Protocol("ping echo does not match".to_string()));
        }
        let rtt = started.elapsed();
        debug!(?rtt, "ping");
        Ok(rtt)
    }

    pub fn stats(&self) -> MuxStats {
        self.mux.stats()
    }

    pub fn is_closed(&self) -> bool {
        self.mux.is_closed()
    }

    /// Drop the stream. Every client bound to it fails with `TransportClosed` from now on.
    pub fn close(&self) {
        self.mux.close();
    }
}
