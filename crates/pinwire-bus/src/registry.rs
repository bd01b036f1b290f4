//! The capability registry application code calls through.

use std::fmt;
use std::sync::{PoisonError, RwLock};

use bytes::Bytes;
use serde::Serialize;
use tracing::debug;

use crate::error::{BusError, Result};
use crate::gpio::GpioBackend;
use crate::i2c::I2cBackend;
use crate::message::{Level, PinMode, SpiSettings};
use crate::sim::{SimGpio, SimI2c, SimSpi};
use crate::spi::SpiBackend;

/// A bus capability that can be bound to a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Capability {
    Gpio,
    Spi,
    I2c,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Capability::Gpio => "gpio",
            Capability::Spi => "spi",
            Capability::I2c => "i2c",
        })
    }
}

type Slot<B> = RwLock<Option<Box<B>>>;

/// Run `f` against the backend in `slot` while holding the read lock.
fn with<B: ?Sized, T>(
    slot: &Slot<B>,
    capability: Capability,
    f: impl FnOnce(&B) -> Result<T>,
) -> Result<T> {
    let guard = slot.read().unwrap_or_else(PoisonError::into_inner);
    let backend = guard.as_deref().ok_or(BusError::Unbound(capability))?;
    f(backend)
}

/// Swap the backend in `slot`. Waits for in-flight calls, then drops the old one.
fn replace<B: ?Sized>(slot: &Slot<B>, capability: Capability, backend: Option<Box<B>>) {
    let previous = {
        let mut guard = slot.write().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *guard, backend)
    };
    if previous.is_some() {
        debug!(%capability, "released previous backend");
    }
}

/// Holds the active backend for each bus capability.
///
/// Each call holds a read lock on its capability for its whole duration.
/// Installing a backend takes the write lock, so a rebind waits until every
/// in-flight call on the old backend has returned before releasing it.
#[derive(Default)]
pub struct Hardware {
    gpio: Slot<dyn GpioBackend>,
    spi: Slot<dyn SpiBackend>,
    i2c: Slot<dyn I2cBackend>,
}

impl Hardware {
    /// A registry with nothing bound.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry bound to simulated peripherals.
    pub fn simulated() -> Self {
        let hardware = Self::new();
        hardware.install_gpio(Box::new(SimGpio::new()));
        hardware.install_spi(Box::new(SimSpi::new()));
        hardware.install_i2c(Box::new(SimI2c::new()));
        hardware
    }

    pub fn install_gpio(&self, backend: Box<dyn GpioBackend>) {
        replace(&self.gpio, Capability::Gpio, Some(backend));
        debug!("gpio backend installed");
    }

    pub fn install_spi(&self, backend: Box<dyn SpiBackend>) {
        replace(&self.spi, Capability::Spi, Some(backend));
        debug!("spi backend installed");
    }

    pub fn install_i2c(&self, backend: Box<dyn I2cBackend>) {
        replace(&self.i2c, Capability::I2c, Some(backend));
        debug!("i2c backend installed");
    }

    /// Unbind a capability, releasing its backend once it is idle.
    pub fn uninstall(&self, capability: Capability) {
        match capability {
            Capability::Gpio => replace(&self.gpio, capability, None),
            Capability::Spi => replace(&self.spi, capability, None),
            Capability::I2c => replace(&self.i2c, capability, None),
        }
    }

    pub fn is_bound(&self, capability: Capability) -> bool {
        fn bound<B: ?Sized>(slot: &Slot<B>) -> bool {
            slot.read()
                .unwrap_or_else(PoisonError::into_inner)
                .is_some()
        }
        match capability {
            Capability::Gpio => bound(&self.gpio),
            Capability::Spi => bound(&self.spi),
            Capability::I2c => bound(&self.i2c),
        }
    }

    pub fn pin_mode(&self, pin: u8, mode: PinMode) -> Result<()> {
        with(&self.gpio, Capability::Gpio, |gpio| gpio.set_mode(pin, mode))
    }

    pub fn digital_write(&self, pin: u8, level: Level) -> Result<()> {
        with(&self.gpio, Capability::Gpio, |gpio| gpio.write(pin, level))
    }

    pub fn digital_read(&self, pin: u8) -> Result<Level> {
        with(&self.gpio, Capability::Gpio, |gpio| gpio.read(pin))
    }

    pub fn analog_read(&self, pin: u8) -> Result<u16> {
        with(&self.gpio, Capability::Gpio, |gpio| gpio.analog_read(pin))
    }

    pub fn analog_write(&self, pin: u8, value: u16) -> Result<()> {
        with(&self.gpio, Capability::Gpio, |gpio| gpio.analog_write(pin, value))
    }

    pub fn spi_begin_transaction(&self, settings: SpiSettings) -> Result<()> {
        with(&self.spi, Capability::Spi, |spi| spi.begin_transaction(settings))
    }

    pub fn spi_transfer(&self, data: &[u8]) -> Result<Bytes> {
        with(&self.spi, Capability::Spi, |spi| spi.transfer(data))
    }

    pub fn spi_end_transaction(&self) -> Result<()> {
        with(&self.spi, Capability::Spi, |spi| spi.end_transaction())
    }

    pub fn i2c_begin(&self) -> Result<()> {
        with(&self.i2c, Capability::I2c, |i2c| i2c.begin())
    }

    pub fn i2c_end(&self) -> Result<()> {
        with(&self.i2c, Capability::I2c, |i2c| i2c.end())
    }

    pub fn i2c_set_clock(&self, hz: u32) -> Result<()> {
        with(&self.i2c, Capability::I2c, |i2c| i2c.set_clock(hz))
    }

    pub fn i2c_begin_transmission(&self, address: u8) -> Result<()> {
        with(&self.i2c, Capability::I2c, |i2c| i2c.begin_transmission(address))
    }

    pub fn i2c_write(&self, data: &[u8]) -> Result<usize> {
        with(&self.i2c, Capability::I2c, |i2c| i2c.write(data))
    }

    pub fn i2c_end_transmission(&self, stop: bool) -> Result<()> {
        with(&self.i2c, Capability::I2c, |i2c| i2c.end_transmission(stop))
    }

    /// Read exactly `count` bytes from `address`; fewer is [`BusError::ShortRead`].
    pub fn i2c_request_from(&self, address: u8, count: usize, stop: bool) -> Result<Bytes> {
        let received = self.i2c_read_available(address, count, stop)?;
        if received.len() != count {
            return Err(BusError::ShortRead {
                expected: count,
                received: received.len(),
            });
        }
        Ok(received)
    }

    /// Read whatever the device sends, up to `count` bytes.
    pub(crate) fn i2c_read_available(&self, address: u8, count: usize, stop: bool) -> Result<Bytes> {
        with(&self.i2c, Capability::I2c, |i2c| {
            i2c.request_from(address, count, stop)
        })
    }
}

impl fmt::Debug for Hardware {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hardware")
            .field("gpio", &self.is_bound(Capability::Gpio))
            .field("spi", &self.is_bound(Capability::Spi))
            .field("i2c", &self.is_bound(Capability::I2c))
            .finish()
    }
}
