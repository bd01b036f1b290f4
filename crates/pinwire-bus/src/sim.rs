//! Simulated peripherals for hosts without pins.
//!
//! These are the "local" backends an agent serves when no real hardware is
//! attached: pins loop back what was written, SPI echoes MOSI onto MISO and
//! I2C devices hand back the bytes last written to them.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use tracing::trace;

use crate::error::{BusError, Result};
use crate::gpio::GpioBackend;
use crate::i2c::{I2cBackend, DEFAULT_I2C_BUFFER_SIZE};
use crate::message::{status, Level, Opcode, PinMode, SpiSettings};
use crate::spi::SpiBackend;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Clone, Copy)]
struct Pin {
    mode: PinMode,
    written: Option<Level>,
    input: Option<Level>,
    analog: u16,
}

impl Default for Pin {
    fn default() -> Self {
        Self {
            mode: PinMode::Input,
            written: None,
            input: None,
            analog: 0,
        }
    }
}

/// Loopback pins: a pin reads back the last level written to it.
///
/// Levels injected with [`SimGpio::set_input`] win over written ones; an
/// untouched pin reads its pull level.
#[derive(Debug, Default)]
pub struct SimGpio {
    pins: Mutex<HashMap<u8, Pin>>,
}

impl SimGpio {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drive `pin` from outside, as a button or sensor would.
    pub fn set_input(&self, pin: u8, level: Level) {
        lock(&self.pins).entry(pin).or_default().input = Some(level);
    }

    /// Set the value the ADC reports for `pin`.
    pub fn set_analog(&self, pin: u8, value: u16) {
        lock(&self.pins).entry(pin).or_default().analog = value;
    }

    pub fn mode(&self, pin: u8) -> PinMode {
        lock(&self.pins).get(&pin).map_or(PinMode::Input, |p| p.mode)
    }
}

impl GpioBackend for SimGpio {
    fn set_mode(&self, pin: u8, mode: PinMode) -> Result<()> {
        lock(&self.pins).entry(pin).or_default().mode = mode;
        trace!(pin, ?mode, "sim pin mode");
        Ok(())
    }

    fn write(&self, pin: u8, level: Level) -> Result<()> {
        lock(&self.pins).entry(pin).or_default().written = Some(level);
        Ok(())
    }

    fn read(&self, pin: u8) -> Result<Level> {
        let pins = lock(&self.pins);
        let Some(state) = pins.get(&pin) else {
            return Ok(Level::Low);
        };
        let pulled = match state.mode {
            PinMode::InputPullup => Level::High,
            _ => Level::Low,
        };
        Ok(state.input.or(state.written).unwrap_or(pulled))
    }

    fn analog_read(&self, pin: u8) -> Result<u16> {
        Ok(lock(&self.pins).get(&pin).map_or(0, |p| p.analog))
    }

    fn analog_write(&self, pin: u8, value: u16) -> Result<()> {
        lock(&self.pins).entry(pin).or_default().analog = value;
        Ok(())
    }
}

#[derive(Debug, Default)]
struct SpiState {
    settings: Option<SpiSettings>,
    transfers: u64,
}

/// SPI with MOSI wired to MISO.
#[derive(Debug, Default)]
pub struct SimSpi {
    state: Mutex<SpiState>,
}

impl SimSpi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Settings of the open transaction, if any.
    pub fn settings(&self) -> Option<SpiSettings> {
        lock(&self.state).settings
    }

    pub fn transfers(&self) -> u64 {
        lock(&self.state).transfers
    }
}

impl SpiBackend for SimSpi {
    fn begin_transaction(&self, settings: SpiSettings) -> Result<()> {
        lock(&self.state).settings = Some(settings);
        Ok(())
    }

    fn transfer(&self, data: &[u8]) -> Result<Bytes> {
        lock(&self.state).transfers += 1;
        Ok(Bytes::copy_from_slice(data))
    }

    fn end_transaction(&self) -> Result<()> {
        lock(&self.state).settings = None;
        Ok(())
    }
}

#[derive(Debug, Default)]
struct I2cState {
    clock_hz: Option<u32>,
    tx_address: Option<u8>,
    tx: Vec<u8>,
    overflowed: bool,
    devices: HashMap<u8, VecDeque<u8>>,
}

/// Store-and-echo I2C devices.
///
/// Every address behaves like a FIFO: bytes written in a transmission are
/// read back by the next `request_from`. With [`SimI2c::with_devices`] only
/// the listed addresses acknowledge.
#[derive(Debug)]
pub struct SimI2c {
    state: Mutex<I2cState>,
    present: Option<HashSet<u8>>,
    buffer_size: usize,
}

impl Default for SimI2c {
    fn default() -> Self {
        Self::new()
    }
}

impl SimI2c {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(I2cState::default()),
            present: None,
            buffer_size: DEFAULT_I2C_BUFFER_SIZE,
        }
    }

    /// Only these addresses acknowledge; all others NACK.
    pub fn with_devices(addresses: impl IntoIterator<Item = u8>) -> Self {
        Self {
            present: Some(addresses.into_iter().collect()),
            ..Self::new()
        }
    }

    pub fn clock_hz(&self) -> Option<u32> {
        lock(&self.state).clock_hz
    }

    fn acknowledges(&self, address: u8) -> bool {
        self.present
            .as_ref()
            .is_none_or(|present| present.contains(&address))
    }
}

impl I2cBackend for SimI2c {
    fn begin(&self) -> Result<()> {
        Ok(())
    }

    fn end(&self) -> Result<()> {
        let mut state = lock(&self.state);
        state.tx_address = None;
        state.tx.clear();
        Ok(())
    }

    fn set_clock(&self, hz: u32) -> Result<()> {
        lock(&self.state).clock_hz = Some(hz);
        Ok(())
    }

    fn begin_transmission(&self, address: u8) -> Result<()> {
        let mut state = lock(&self.state);
        state.tx_address = Some(address);
        state.tx.clear();
        state.overflowed = false;
        Ok(())
    }

    fn write(&self, data: &[u8]) -> Result<usize> {
        let mut state = lock(&self.state);
        if state.tx_address.is_none() {
            return Err(BusError::InvalidState("i2c write without begin_transmission"));
        }
        let room = self.buffer_size.saturating_sub(state.tx.len());
        let accepted = data.len().min(room);
        if accepted < data.len() {
            state.overflowed = true;
        }
        state.tx.extend_from_slice(&data[..accepted]);
        Ok(accepted)
    }

    fn end_transmission(&self, _stop: bool) -> Result<()> {
        let mut state = lock(&self.state);
        let address = state.tx_address.take().ok_or(BusError::InvalidState(
            "i2c end_transmission without begin_transmission",
        ))?;
        let data = std::mem::take(&mut state.tx);

        let failure = if std::mem::take(&mut state.overflowed) {
            Some(status::DATA_TOO_LONG)
        } else if !self.acknowledges(address) {
            Some(status::ADDRESS_NACK)
        } else {
            None
        };
        if let Some(status) = failure {
            return Err(BusError::RemoteFailure {
                opcode: Opcode::I2cWrite,
                status,
            });
        }

        trace!(address, len = data.len(), "sim i2c stored transmission");
        state.devices.entry(address).or_default().extend(data);
        Ok(())
    }

    fn request_from(&self, address: u8, count: usize, _stop: bool) -> Result<Bytes> {
        if !self.acknowledges(address) {
            return Err(BusError::RemoteFailure {
                opcode: Opcode::I2cRequestFrom,
                status: status::ADDRESS_NACK,
            });
        }
        let mut state = lock(&self.state);
        let fifo = state.devices.entry(address).or_default();
        let take = count.min(fifo.len());
        Ok(fifo.drain(..take).collect::<Vec<u8>>().into())
    }
}
