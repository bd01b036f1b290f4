//! Command and response payloads carried inside bus frames.
//!
//! Command payload:
//! ```text
//! ┌────────────┬────────┬───────────────────┐
//! │ Request ID │ Opcode │ Operands          │
//! │ u16 LE     │ u8     │ (opcode specific) │
//! └────────────┴────────┴───────────────────┘
//! ```
//! Response payload:
//! ```text
//! ┌────────────┬────────┬────────┬───────────────────┐
//! │ Request ID │ Opcode │ Status │ Result payload    │
//! │ u16 LE     │ u8     │ u8     │ (opcode specific) │
//! └────────────┴────────┴────────┴───────────────────┘
//! ```
//! The request id is echoed so a late answer to an abandoned request can be
//! told apart from the answer to the current one.

use std::fmt;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::error::BusError;

/// Size of the command header (request id + opcode).
pub const COMMAND_HEADER_SIZE: usize = 3;

/// Size of the response header (request id + opcode + status).
pub const RESPONSE_HEADER_SIZE: usize = 4;

/// Response status codes.
///
/// 1-4 follow the Wire `endTransmission()` return values.
pub mod status {
    pub const OK: u8 = 0;
    pub const DATA_TOO_LONG: u8 = 1;
    pub const ADDRESS_NACK: u8 = 2;
    pub const DATA_NACK: u8 = 3;
    pub const OTHER: u8 = 4;
    pub const UNSUPPORTED: u8 = 0x10;
    pub const MALFORMED: u8 = 0x11;
}

/// Human-readable description of a status code.
pub fn status_text(code: u8) -> &'static str {
    match code {
        status::OK => "ok",
        status::DATA_TOO_LONG => "data too long for transmit buffer",
        status::ADDRESS_NACK => "address not acknowledged",
        status::DATA_NACK => "data not acknowledged",
        status::OTHER => "bus error",
        status::UNSUPPORTED => "unsupported command",
        status::MALFORMED => "malformed command",
        _ => "unknown status",
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Opcode {
    SetPinMode = 0x01,
    DigitalWrite = 0x02,
    DigitalRead = 0x03,
    AnalogRead = 0x04,
    AnalogWrite = 0x05,
    SpiBeginTransaction = 0x10,
    SpiTransfer = 0x11,
    SpiEndTransaction = 0x12,
    I2cBegin = 0x20,
    I2cWrite = 0x21,
    I2cEnd = 0x22,
    I2cRequestFrom = 0x23,
    I2cSetClock = 0x24,
    Ping = 0x7f,
}

impl TryFrom<u8> for Opcode {
    type Error = DecodeError;

    fn try_from(value: u8) -> Result<Self, DecodeError> {
        Ok(match value {
            0x01 => Opcode::SetPinMode,
            0x02 => Opcode::DigitalWrite,
            0x03 => Opcode::DigitalRead,
            0x04 => Opcode::AnalogRead,
            0x05 => Opcode::AnalogWrite,
            0x10 => Opcode::SpiBeginTransaction,
            0x11 => Opcode::SpiTransfer,
            0x12 => Opcode::SpiEndTransaction,
            0x20 => Opcode::I2cBegin,
            0x21 => Opcode::I2cWrite,
            0x22 => Opcode::I2cEnd,
            0x23 => Opcode::I2cRequestFrom,
            0x24 => Opcode::I2cSetClock,
            0x7f => Opcode::Ping,
            other => return Err(DecodeError::UnknownOpcode(other)),
        })
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Pin direction and pull configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PinMode {
    Input,
    Output,
    InputPullup,
    InputPulldown,
}

impl PinMode {
    fn to_wire(self) -> u8 {
        match self {
            PinMode::Input => 0,
            PinMode::Output => 1,
            PinMode::InputPullup => 2,
            PinMode::InputPulldown => 3,
        }
    }

    fn from_wire(value: u8) -> Result<Self, DecodeError> {
        match value {
            0 => Ok(PinMode::Input),
            1 => Ok(PinMode::Output),
            2 => Ok(PinMode::InputPullup),
            3 => Ok(PinMode::InputPulldown),
            other => Err(DecodeError::InvalidOperand("pin mode", other)),
        }
    }
}

/// Digital logic level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Low,
    High,
}

impl Level {
    pub fn is_high(self) -> bool {
        self == Level::High
    }

    fn to_wire(self) -> u8 {
        match self {
            Level::Low => 0,
            Level::High => 1,
        }
    }

    fn from_wire(value: u8) -> Result<Self, DecodeError> {
        match value {
            0 => Ok(Level::Low),
            1 => Ok(Level::High),
            other => Err(DecodeError::InvalidOperand("level", other)),
        }
    }
}

impl From<bool> for Level {
    fn from(high: bool) -> Self {
        if high {
            Level::High
        } else {
            Level::Low
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Level::Low => "low",
            Level::High => "high",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BitOrder {
    MsbFirst,
    LsbFirst,
}

/// SPI clock polarity/phase, as in modes 0-3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpiMode {
    Mode0,
    Mode1,
    Mode2,
    Mode3,
}

/// Settings applied for the duration of an SPI transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpiSettings {
    pub clock_hz: u32,
    pub bit_order: BitOrder,
    pub mode: SpiMode,
}

impl Default for SpiSettings {
    fn default() -> Self {
        Self {
            clock_hz: 4_000_000,
            bit_order: BitOrder::MsbFirst,
            mode: SpiMode::Mode0,
        }
    }
}

/// A bus command and its operands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    SetPinMode { pin: u8, mode: PinMode },
    DigitalWrite { pin: u8, level: Level },
    DigitalRead { pin: u8 },
    AnalogRead { pin: u8 },
    AnalogWrite { pin: u8, value: u16 },
    SpiBeginTransaction(SpiSettings),
    SpiTransfer(Bytes),
    SpiEndTransaction,
    I2cBegin,
    /// One buffered transmission, sent when the transmission ends.
    I2cWrite { address: u8, stop: bool, data: Bytes },
    I2cEnd,
    I2cRequestFrom { address: u8, count: u16, stop: bool },
    I2cSetClock { hz: u32 },
    Ping(Bytes),
}

impl Command {
    pub fn opcode(&self) -> Opcode {
        match self {
            Command::SetPinMode { .. } => Opcode::SetPinMode,
            Command::DigitalWrite { .. } => Opcode::DigitalWrite,
            Command::DigitalRead { .. } => Opcode::DigitalRead,
            Command::AnalogRead { .. } => Opcode::AnalogRead,
            Command::AnalogWrite { .. } => Opcode::AnalogWrite,
            Command::SpiBeginTransaction(_) => Opcode::SpiBeginTransaction,
            Command::SpiTransfer(_) => Opcode::SpiTransfer,
            Command::SpiEndTransaction => Opcode::SpiEndTransaction,
            Command::I2cBegin => Opcode::I2cBegin,
            Command::I2cWrite { .. } => Opcode::I2cWrite,
            Command::I2cEnd => Opcode::I2cEnd,
            Command::I2cRequestFrom { .. } => Opcode::I2cRequestFrom,
            Command::I2cSetClock { .. } => Opcode::I2cSetClock,
            Command::Ping(_) => Opcode::Ping,
        }
    }

    /// Encode as a command payload carrying `request_id`.
    pub fn encode(&self, request_id: u16) -> Bytes {
        let mut buf = BytesMut::with_capacity(COMMAND_HEADER_SIZE + 8);
        buf.put_u16_le(request_id);
        buf.put_u8(self.opcode() as u8);
        match self {
            Command::SetPinMode { pin, mode } => {
                buf.put_u8(*pin);
                buf.put_u8(mode.to_wire());
            }
            Command::DigitalWrite { pin, level } => {
                buf.put_u8(*pin);
                buf.put_u8(level.to_wire());
            }
            Command::DigitalRead { pin } | Command::AnalogRead { pin } => buf.put_u8(*pin),
            Command::AnalogWrite { pin, value } => {
                buf.put_u8(*pin);
                buf.put_u16_le(*value);
            }
            Command::SpiBeginTransaction(settings) => {
                buf.put_u32_le(settings.clock_hz);
                buf.put_u8(match settings.bit_order {
                    BitOrder::MsbFirst => 0,
                    BitOrder::LsbFirst => 1,
                });
                buf.put_u8(match settings.mode {
                    SpiMode::Mode0 => 0,
                    SpiMode::Mode1 => 1,
                    SpiMode::Mode2 => 2,
                    SpiMode::Mode3 => 3,
                });
            }
            Command::SpiTransfer(data) | Command::Ping(data) => buf.put_slice(data),
            Command::SpiEndTransaction | Command::I2cBegin | Command::I2cEnd => {}
            Command::I2cWrite {
                address,
                stop,
                data,
            } => {
                buf.put_u8(*address);
                buf.put_u8(u8::from(*stop));
                buf.put_slice(data);
            }
            Command::I2cRequestFrom {
                address,
                count,
                stop,
            } => {
                buf.put_u8(*address);
                buf.put_u16_le(*count);
                buf.put_u8(u8::from(*stop));
            }
            Command::I2cSetClock { hz } => buf.put_u32_le(*hz),
        }
        buf.freeze()
    }

    /// Decode a command payload into its request id and command.
    pub fn decode(mut src: Bytes) -> Result<(u16, Command), DecodeError> {
        need(&src, COMMAND_HEADER_SIZE, "command header")?;
        let request_id = src.get_u16_le();
        let opcode = Opcode::try_from(src.get_u8()).map_err(|err| match err {
            DecodeError::UnknownOpcode(op) => DecodeError::UnsupportedCommand { request_id, op },
            other => other,
        })?;

        let command = match opcode {
            Opcode::SetPinMode => {
                need(&src, 2, "pin mode operands")?;
                Command::SetPinMode {
                    pin: src.get_u8(),
                    mode: PinMode::from_wire(src.get_u8())?,
                }
            }
            Opcode::DigitalWrite => {
                need(&src, 2, "digital write operands")?;
                Command::DigitalWrite {
                    pin: src.get_u8(),
                    level: Level::from_wire(src.get_u8())?,
                }
            }
            Opcode::DigitalRead => {
                need(&src, 1, "pin")?;
                Command::DigitalRead { pin: src.get_u8() }
            }
            Opcode::AnalogRead => {
                need(&src, 1, "pin")?;
                Command::AnalogRead { pin: src.get_u8() }
            }
            Opcode::AnalogWrite => {
                need(&src, 3, "analog write operands")?;
                Command::AnalogWrite {
                    pin: src.get_u8(),
                    value: src.get_u16_le(),
                }
            }
            Opcode::SpiBeginTransaction => {
                need(&src, 6, "spi settings")?;
                let clock_hz = src.get_u32_le();
                let bit_order = match src.get_u8() {
                    0 => BitOrder::MsbFirst,
                    1 => BitOrder::LsbFirst,
                    other => return Err(DecodeError::InvalidOperand("bit order", other)),
                };
                let mode = match src.get_u8() {
                    0 => SpiMode::Mode0,
                    1 => SpiMode::Mode1,
                    2 => SpiMode::Mode2,
                    3 => SpiMode::Mode3,
                    other => return Err(DecodeError::InvalidOperand("spi mode", other)),
                };
                Command::SpiBeginTransaction(SpiSettings {
                    clock_hz,
                    bit_order,
                    mode,
                })
            }
            Opcode::SpiTransfer => Command::SpiTransfer(src),
            Opcode::SpiEndTransaction => Command::SpiEndTransaction,
            Opcode::I2cBegin => Command::I2cBegin,
            Opcode::I2cWrite => {
                need(&src, 2, "i2c write operands")?;
                let address = src.get_u8();
                let stop = src.get_u8() != 0;
                Command::I2cWrite {
                    address,
                    stop,
                    data: src,
                }
            }
            Opcode::I2cEnd => Command::I2cEnd,
            Opcode::I2cRequestFrom => {
                need(&src, 4, "i2c request operands")?;
                Command::I2cRequestFrom {
                    address: src.get_u8(),
                    count: src.get_u16_le(),
                    stop: src.get_u8() != 0,
                }
            }
            Opcode::I2cSetClock => {
                need(&src, 4, "i2c clock")?;
                Command::I2cSetClock {
                    hz: src.get_u32_le(),
                }
            }
            Opcode::Ping => Command::Ping(src),
        };
        Ok((request_id, command))
    }
}

/// A decoded response payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub request_id: u16,
    /// Raw opcode byte, echoed from the command.
    pub opcode: u8,
    pub status: u8,
    pub payload: Bytes,
}

impl Response {
    /// Successful response to `request_id`.
    pub fn ok(request_id: u16, opcode: Opcode, payload: impl Into<Bytes>) -> Self {
        Self {
            request_id,
            opcode: opcode as u8,
            status: status::OK,
            payload: payload.into(),
        }
    }

    /// Failed response with an empty payload.
    pub fn failure(request_id: u16, opcode: u8, status: u8) -> Self {
        Self {
            request_id,
            opcode,
            status,
            payload: Bytes::new(),
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(RESPONSE_HEADER_SIZE + self.payload.len());
        buf.put_u16_le(self.request_id);
        buf.put_u8(self.opcode);
        buf.put_u8(self.status);
        buf.put_slice(&self.payload);
        buf.freeze()
    }

    pub fn decode(mut src: Bytes) -> Result<Self, DecodeError> {
        need(&src, RESPONSE_HEADER_SIZE, "response header")?;
        Ok(Self {
            request_id: src.get_u16_le(),
            opcode: src.get_u8(),
            status: src.get_u8(),
            payload: src,
        })
    }
}

/// A command or response payload that could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("payload truncated: missing {0}")]
    Truncated(&'static str),

    #[error("unknown opcode {0:#04x}")]
    UnknownOpcode(u8),

    /// Header decoded but the opcode is not one this side understands.
    #[error("unsupported opcode {op:#04x} in request {request_id}")]
    UnsupportedCommand { request_id: u16, op: u8 },

    #[error("invalid {0} value {1}")]
    InvalidOperand(&'static str, u8),
}

impl From<DecodeError> for BusError {
    fn from(err: DecodeError) -> Self {
        BusError::Protocol(err.to_string())
    }
}

fn need(src: &Bytes, len: usize, what: &'static str) -> Result<(), DecodeError> {
    if src.remaining() < len {
        return Err(DecodeError::Truncated(what));
    }
    Ok(())
}
