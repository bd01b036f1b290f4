//! The remote side of a link: executes commands against local hardware.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use pinwire_frame::{
    channel_name, is_console, Frame, FrameConfig, FrameError, FramedLink, CONTROL, GPIO, I2C, SPI,
};
use pinwire_transport::ByteStream;
use tracing::{debug, trace, warn};

use crate::error::{BusError, Result};
use crate::message::{status, Command, DecodeError, Opcode, Response, COMMAND_HEADER_SIZE};
use crate::registry::Hardware;

/// Handles frames on a console channel: `(console index, bytes) -> reply`.
pub type ConsoleHandler = Box<dyn FnMut(u8, &[u8]) -> Option<Vec<u8>> + Send>;

/// Serves bus commands arriving on a stream.
///
/// Commands are executed against a local [`Hardware`] registry, typically
/// real pins or [`Hardware::simulated`]. The registry is shared so state
/// survives across connections.
pub struct Agent<S: ByteStream> {
    link: FramedLink<S>,
    hardware: Arc<Hardware>,
    console: Option<ConsoleHandler>,
    served: u64,
}

impl<S: ByteStream> Agent<S> {
    pub fn new(stream: S, hardware: Arc<Hardware>, config: FrameConfig) -> Result<Self> {
        Ok(Self {
            link: FramedLink::with_config(stream, config)?,
            hardware,
            console: None,
            served: 0,
        })
    }

    /// Install a handler for console traffic. Without one, console frames are ignored.
    pub fn with_console_handler(
        mut self,
        handler: impl FnMut(u8, &[u8]) -> Option<Vec<u8>> + Send + 'static,
    ) -> Self {
        self.console = Some(Box::new(handler));
        self
    }

    /// Wait up to `timeout` for one frame and handle it.
    ///
    /// Returns `Ok(false)` if nothing arrived. Corrupt frames are skipped.
    pub fn serve_once(&mut self, timeout: Duration) -> Result<bool> {
        let frame = match self.link.read_frame(timeout) {
            Ok(frame) => frame,
            Err(FrameError::Timeout(_)) => return Ok(false),
            Err(err) => return Err(err.into()),
        };
        self.handle(frame)?;
        Ok(true)
    }

    /// Serve until `running` is cleared or the peer goes away.
    pub fn run(&mut self, running: &AtomicBool) -> Result<()> {
        let interval = Duration::from_millis(100);
        while running.load(Ordering::SeqCst) {
            match self.serve_once(interval) {
                Ok(_) => {}
                Err(BusError::TransportClosed) => {
                    debug!(served = self.served, "peer disconnected");
                    return Ok(());
                }
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    /// Number of commands answered so far.
    pub fn requests_served(&self) -> u64 {
        self.served
    }

    fn handle(&mut self, frame: Frame) -> Result<()> {
        if is_console(frame.channel) {
            let Some(handler) = self.console.as_mut() else {
                trace!(channel = frame.channel, "no console handler, dropping");
                return Ok(());
            };
            if let Some(reply) = handler(frame.channel, &frame.payload) {
                self.link.send(frame.channel, &reply)?;
            }
            return Ok(());
        }

        if !matches!(frame.channel, CONTROL | GPIO | SPI | I2C) {
            debug!(channel = frame.channel, "ignoring frame on unknown channel");
            return Ok(());
        }

        let response = match Command::decode(frame.payload.clone()) {
            Ok((request_id, command)) => {
                trace!(
                    channel = channel_name(frame.channel),
                    request_id,
                    opcode = %command.opcode(),
                    "executing command"
                );
                let opcode = command.opcode();
                match execute(&self.hardware, command) {
                    Ok(payload) => Response::ok(request_id, opcode, payload),
                    Err(code) => Response::failure(request_id, opcode as u8, code),
                }
            }
            Err(DecodeError::UnsupportedCommand { request_id, op }) => {
                warn!(op, "unsupported command");
                Response::failure(request_id, op, status::UNSUPPORTED)
            }
            Err(err) if frame.payload.len() >= COMMAND_HEADER_SIZE => {
                warn!(error = %err, "malformed command");
                let request_id = u16::from_le_bytes([frame.payload[0], frame.payload[1]]);
                Response::failure(request_id, frame.payload[2], status::MALFORMED)
            }
            Err(err) => {
                warn!(error = %err, "dropping unanswerable command");
                return Ok(());
            }
        };

        match self.link.send(frame.channel, &response.encode()) {
            Ok(()) => {}
            Err(FrameError::PayloadTooLarge { size, max }) => {
                warn!(
                    request_id = response.request_id,
                    size, max, "response does not fit in one frame"
                );
                let failure =
                    Response::failure(response.request_id, response.opcode, status::DATA_TOO_LONG);
                self.link.send(frame.channel, &failure.encode())?;
            }
            Err(err) => return Err(err.into()),
        }
        self.served += 1;
        Ok(())
    }
}

impl<S: ByteStream> std::fmt::Debug for Agent<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("hardware", &self.hardware)
            .field("served", &self.served)
            .finish_non_exhaustive()
    }
}

/// Status code reported back for a failed local operation.
fn status_for(err: &BusError) -> u8 {
    match err {
        BusError::RemoteFailure { status, .. } => *status,
        BusError::Unbound(_) => status::UNSUPPORTED,
        _ => status::OTHER,
    }
}

fn execute(hardware: &Hardware, command: Command) -> std::result::Result<Bytes, u8> {
    let outcome = match command {
        Command::SetPinMode { pin, mode } => hardware.pin_mode(pin, mode).map(|()| Bytes::new()),
        Command::DigitalWrite { pin, level } => {
            hardware.digital_write(pin, level).map(|()| Bytes::new())
        }
        Command::DigitalRead { pin } => hardware
            .digital_read(pin)
            .map(|level| Bytes::copy_from_slice(&[u8::from(level.is_high())])),
        Command::AnalogRead { pin } => hardware
            .analog_read(pin)
            .map(|value| Bytes::copy_from_slice(&value.to_le_bytes())),
        Command::AnalogWrite { pin, value } => {
            hardware.analog_write(pin, value).map(|()| Bytes::new())
        }
        Command::SpiBeginTransaction(settings) => hardware
            .spi_begin_transaction(settings)
            .map(|()| Bytes::new()),
        Command::SpiTransfer(data) => hardware.spi_transfer(&data),
        Command::SpiEndTransaction => hardware.spi_end_transaction().map(|()| Bytes::new()),
        Command::I2cBegin => hardware.i2c_begin().map(|()| Bytes::new()),
        Command::I2cWrite {
            address,
            stop,
            data,
        } => hardware
            .i2c_begin_transmission(address)
            .and_then(|()| hardware.i2c_write(&data))
            .and_then(|accepted| {
                let ended = hardware.i2c_end_transmission(stop);
                if accepted < data.len() {
                    return Err(BusError::RemoteFailure {
                        opcode: Opcode::I2cWrite,
                        status: status::DATA_TOO_LONG,
                    });
                }
                ended
            })
            .map(|()| Bytes::new()),
        Command::I2cEnd => hardware.i2c_end().map(|()| Bytes::new()),
        Command::I2cRequestFrom {
            address,
            count,
            stop,
        } => hardware.i2c_read_available(address, usize::from(count), stop),
        Command::I2cSetClock { hz } => hardware.i2c_set_clock(hz).map(|()| Bytes::new()),
        Command::Ping(nonce) => Ok(nonce),
    };

    outcome.map_err(|err| {
        debug!(error = %err, "local operation failed");
        status_for(&err)
    })
}

#[cfg(test)]
mod tests {
    use pinwire_transport::{pipe, MemoryStream};

    use super::*;
    use crate::message::Level;

    fn agent_with_peer() -> (Agent<MemoryStream>, FramedLink<MemoryStream>) {
        let (a, b) = pipe();
        let hardware = Arc::new(Hardware::simulated());
        let agent = Agent::new(a, hardware, FrameConfig::default()).unwrap();
        (agent, FramedLink::new(b).unwrap())
    }

    fn exchange(
        agent: &mut Agent<MemoryStream>,
        peer: &mut FramedLink<MemoryStream>,
        channel: u8,
        payload: &[u8],
    ) -> Response {
        peer.send(channel, payload).unwrap();
        assert!(agent.serve_once(Duration::from_secs(1)).unwrap());
        let frame = peer.read_frame(Duration::from_secs(1)).unwrap();
        assert_eq!(frame.channel, channel);
        Response::decode(frame.payload).unwrap()
    }

    #[test]
    fn answers_with_matching_request_id() {
        let (mut agent, mut peer) = agent_with_peer();
        let write = Command::DigitalWrite {
            pin: 7,
            level: Level::High,
        };
        let response = exchange(&mut agent, &mut peer, GPIO, &write.encode(41));
        assert_eq!(response.request_id, 41);
        assert_eq!(response.status, status::OK);

        let read = Command::DigitalRead { pin: 7 };
        let response = exchange(&mut agent, &mut peer, GPIO, &read.encode(42));
        assert_eq!(response.request_id, 42);
        assert_eq!(response.opcode, Opcode::DigitalRead as u8);
        assert_eq!(response.payload.as_ref(), &[1]);
        assert_eq!(agent.requests_served(), 2);
    }

    #[test]
    fn unsupported_opcode_gets_status() {
        let (mut agent, mut peer) = agent_with_peer();
        let response = exchange(&mut agent, &mut peer, GPIO, &[9, 0, 0x55]);
        assert_eq!(response.request_id, 9);
        assert_eq!(response.status, status::UNSUPPORTED);
    }

    #[test]
    fn malformed_operands_get_status() {
        let (mut agent, mut peer) = agent_with_peer();
        let truncated = [3, 0, Opcode::I2cRequestFrom as u8];
        let response = exchange(&mut agent, &mut peer, I2C, &truncated);
        assert_eq!(response.request_id, 3);
        assert_eq!(response.status, status::MALFORMED);
    }

    #[test]
    fn i2c_nack_is_reported() {
        let (a, b) = pipe();
        let hardware = Hardware::new();
        hardware.install_i2c(Box::new(crate::sim::SimI2c::with_devices([0x76])));
        let mut agent = Agent::new(a, Arc::new(hardware), FrameConfig::default()).unwrap();
        let mut peer = FramedLink::new(b).unwrap();

        let write = Command::I2cWrite {
            address: 0x77,
            stop: true,
            data: Bytes::from_static(b"\xd0"),
        };
        let response = exchange(&mut agent, &mut peer, I2C, &write.encode(1));
        assert_eq!(response.status, status::ADDRESS_NACK);
    }

    #[test]
    fn oversized_response_becomes_a_failure() {
        let (mut agent, mut peer) = agent_with_peer();
        let max = FrameConfig::default().max_payload_size;

        // The echo needs one more byte of header than the command carried.
        let transfer = Command::SpiTransfer(Bytes::from(vec![0xA5; max - COMMAND_HEADER_SIZE]));
        let response = exchange(&mut agent, &mut peer, SPI, &transfer.encode(5));
        assert_eq!(response.request_id, 5);
        assert_eq!(response.opcode, Opcode::SpiTransfer as u8);
        assert_eq!(response.status, status::DATA_TOO_LONG);
        assert!(response.payload.is_empty());

        let ping = Command::Ping(Bytes::from_static(b"ok"));
        let response = exchange(&mut agent, &mut peer, CONTROL, &ping.encode(6));
        assert_eq!(response.status, status::OK);
        assert_eq!(agent.requests_served(), 2);
    }

    #[test]
    fn i2c_write_past_buffer_is_data_too_long() {
        let (mut agent, mut peer) = agent_with_peer();
        let write = Command::I2cWrite {
            address: 0x42,
            stop: true,
            data: Bytes::from(vec![0x11; 300]),
        };
        let response = exchange(&mut agent, &mut peer, I2C, &write.encode(9));
        assert_eq!(response.status, status::DATA_TOO_LONG);

        let read = Command::I2cRequestFrom {
            address: 0x42,
            count: 1,
            stop: true,
        };
        let response = exchange(&mut agent, &mut peer, I2C, &read.encode(10));
        assert_eq!(response.status, status::OK);
        assert!(response.payload.is_empty());
    }

    #[test]
    fn unbound_capability_is_unsupported() {
        let (a, b) = pipe();
        let mut agent = Agent::new(a, Arc::new(Hardware::new()), FrameConfig::default()).unwrap();
        let mut peer = FramedLink::new(b).unwrap();

        let response = exchange(
            &mut agent,
            &mut peer,
            SPI,
            &Command::SpiTransfer(Bytes::from_static(b"\x00")).encode(5),
        );
        assert_eq!(response.status, status::UNSUPPORTED);
    }

    #[test]
    fn console_handler_replies_on_same_channel() {
        let (mut agent, mut peer) = agent_with_peer();
        agent = agent.with_console_handler(|index, bytes| {
            let mut reply = format!("console{index}:").into_bytes();
            reply.extend_from_slice(bytes);
            Some(reply)
        });

        peer.send(2, b"hi").unwrap();
        assert!(agent.serve_once(Duration::from_secs(1)).unwrap());
        let frame = peer.read_frame(Duration::from_secs(1)).unwrap();
        assert_eq!(frame, Frame::new(2, &b"console2:hi"[..]));
    }

    #[test]
    fn idle_serve_returns_false() {
        let (mut agent, _peer) = agent_with_peer();
        assert!(!agent.serve_once(Duration::from_millis(20)).unwrap());
    }

    #[test]
    fn run_ends_when_peer_disconnects() {
        let (mut agent, peer) = agent_with_peer();
        drop(peer);
        let running = AtomicBool::new(true);
        agent.run(&running).unwrap();
    }
}
