//! Well-known channel ids.
//!
//! Channels 0-2 carry the virtual serial consoles; the bus protocol clients
//! each get their own channel above that.

/// First virtual serial console.
pub const CONSOLE_0: u8 = 0;

/// Second virtual serial console.
pub const CONSOLE_1: u8 = 1;

/// Third virtual serial console.
pub const CONSOLE_2: u8 = 2;

/// Link management (ping).
pub const CONTROL: u8 = 3;

/// Digital and analog pin commands.
pub const GPIO: u8 = 4;

/// SPI transfers.
pub const SPI: u8 = 5;

/// I2C transactions.
pub const I2C: u8 = 6;

/// Number of virtual serial consoles.
pub const CONSOLE_COUNT: u8 = 3;

/// Returns a human-readable name for a channel id.
pub fn channel_name(id: u8) -> &'static str {
    match id {
        CONSOLE_0 => "CONSOLE0",
        CONSOLE_1 => "CONSOLE1",
        CONSOLE_2 => "CONSOLE2",
        CONTROL => "CONTROL",
        GPIO => "GPIO",
        SPI => "SPI",
        I2C => "I2C",
        _ => "RESERVED",
    }
}

/// Returns the console channel for a console index, if it exists.
pub fn console_channel(index: u8) -> Option<u8> {
    (index < CONSOLE_COUNT).then_some(CONSOLE_0 + index)
}

/// Returns true if the channel carries a virtual serial console.
pub fn is_console(id: u8) -> bool {
    id < CONSOLE_COUNT
}
