use std::time::Duration;

use clap::{Args, Subcommand, ValueEnum};
use pinwire_bus::{bind, Hardware, Level, LinkConfig, PinMode, RemoteLink};
use pinwire_frame::FrameConfig;
use pinwire_transport::{connect, ByteStream, Endpoint};

use crate::exit::{bus_error, transport_error, CliError, CliResult};
use crate::output::OutputFormat;

pub mod agent;
pub mod gpio;
pub mod i2c;
pub mod ping;
pub mod spi;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Serve simulated hardware to hosts (Ctrl-C to stop).
    Agent(AgentArgs),
    /// Drive a digital or analog pin on a remote agent.
    Gpio(GpioArgs),
    /// Run one SPI transaction and print the bytes clocked in.
    Spi(SpiArgs),
    /// Write to or read from an I2C device.
    I2c(I2cArgs),
    /// Measure round trips to an agent.
    Ping(PingArgs),
    /// Show version information.
    Version(VersionArgs),
}

/// Settings shared by every command.
#[derive(Debug, Clone, Copy)]
pub struct Context {
    pub format: OutputFormat,
    pub timeout: Duration,
    pub poll_interval: Duration,
}

impl Context {
    pub fn frame_config(&self) -> FrameConfig {
        FrameConfig {
            poll_interval: self.poll_interval,
            ..FrameConfig::default()
        }
    }

    pub fn link_config(&self) -> LinkConfig {
        LinkConfig {
            frame: self.frame_config(),
            response_timeout: self.timeout,
            ..LinkConfig::default()
        }
    }
}

pub fn run(command: Command, ctx: &Context) -> CliResult<i32> {
    match command {
        Command::Agent(args) => agent::run(args, ctx),
        Command::Gpio(args) => gpio::run(args, ctx),
        Command::Spi(args) => spi::run(args, ctx),
        Command::I2c(args) => i2c::run(args, ctx),
        Command::Ping(args) => ping::run(args, ctx),
        Command::Version(args) => version::run(args),
    }
}

/// A registry bound to the agent at `endpoint`.
pub struct Remote {
    pub hardware: Hardware,
    pub link: RemoteLink<Box<dyn ByteStream>>,
}

pub fn open_remote(endpoint: &Endpoint, ctx: &Context) -> CliResult<Remote> {
    let stream = connect(endpoint).map_err(|err| transport_error("connect failed", err))?;
    let hardware = Hardware::new();
    let link = bind(&hardware, stream, ctx.link_config())
        .map_err(|err| bus_error("bind failed", err))?;
    Ok(Remote { hardware, link })
}

pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::usage("duration must not be empty"));
    }

    let (number, millis) = if let Some(num) = input.strip_suffix("ms") {
        (num, true)
    } else if let Some(num) = input.strip_suffix('s') {
        (num, false)
    } else {
        (input, false)
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::usage(format!("invalid duration value: {input}")))?;
    if value == 0 {
        return Err(CliError::usage("duration must be greater than zero"));
    }

    Ok(if millis {
        Duration::from_millis(value)
    } else {
        Duration::from_secs(value)
    })
}

/// Parse an integer written in decimal or with a `0x` prefix.
fn parse_number<T>(input: &str) -> Result<T, String>
where
    T: TryFrom<u64>,
{
    let value = match input.strip_prefix("0x").or_else(|| input.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => input.parse::<u64>(),
    }
    .map_err(|_| format!("not a number: {input}"))?;
    T::try_from(value).map_err(|_| format!("out of range: {input}"))
}

fn parse_u8(input: &str) -> Result<u8, String> {
    parse_number(input)
}

fn parse_u16(input: &str) -> Result<u16, String> {
    parse_number(input)
}

fn parse_u32(input: &str) -> Result<u32, String> {
    parse_number(input)
}

fn parse_i2c_address(input: &str) -> Result<u8, String> {
    let address: u8 = parse_number(input)?;
    if address > 0x7f {
        return Err(format!("I2C addresses are 7-bit: {input}"));
    }
    Ok(address)
}

#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum ModeArg {
    Input,
    Output,
    InputPullup,
    InputPulldown,
}

impl From<ModeArg> for PinMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Input => PinMode::Input,
            ModeArg::Output => PinMode::Output,
            ModeArg::InputPullup => PinMode::InputPullup,
            ModeArg::InputPulldown => PinMode::InputPulldown,
        }
    }
}

#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum LevelArg {
    Low,
    High,
}

impl From<LevelArg> for Level {
    fn from(level: LevelArg) -> Self {
        match level {
            LevelArg::Low => Level::Low,
            LevelArg::High => Level::High,
        }
    }
}

#[derive(Args, Debug)]
pub struct AgentArgs {
    /// Endpoint to serve: tcp://host:port, unix:///path or serial:///dev/tty...
    pub endpoint: Endpoint,
    /// Exit after the first host disconnects.
    #[arg(long)]
    pub once: bool,
    /// Echo console traffic back to the host.
    #[arg(long)]
    pub console_echo: bool,
    /// Simulate only these I2C devices (comma-separated); others NACK.
    #[arg(long, value_delimiter = ',', value_parser = parse_i2c_address)]
    pub i2c_devices: Option<Vec<u8>>,
}

#[derive(Args, Debug)]
pub struct GpioArgs {
    /// Agent endpoint.
    pub endpoint: Endpoint,
    #[command(subcommand)]
    pub action: GpioAction,
}

#[derive(Subcommand, Debug)]
pub enum GpioAction {
    /// Configure pin direction and pulls.
    Mode {
        #[arg(value_parser = parse_u8)]
        pin: u8,
        mode: ModeArg,
    },
    /// Drive an output pin.
    Write {
        #[arg(value_parser = parse_u8)]
        pin: u8,
        level: LevelArg,
    },
    /// Read a digital level.
    Read {
        #[arg(value_parser = parse_u8)]
        pin: u8,
    },
    /// Read the ADC value of a pin.
    AnalogRead {
        #[arg(value_parser = parse_u8)]
        pin: u8,
    },
    /// Write a PWM/DAC value.
    AnalogWrite {
        #[arg(value_parser = parse_u8)]
        pin: u8,
        #[arg(value_parser = parse_u16)]
        value: u16,
    },
}

#[derive(Args, Debug)]
pub struct SpiArgs {
    /// Agent endpoint.
    pub endpoint: Endpoint,
    /// Bytes to clock out, in hex (e.g. 9f000000).
    pub data: String,
    /// SPI clock in Hz.
    #[arg(long, default_value = "4000000", value_parser = parse_u32)]
    pub clock_hz: u32,
    /// SPI mode (0-3).
    #[arg(long, default_value = "0", value_parser = clap::value_parser!(u8).range(0..=3))]
    pub mode: u8,
    /// Shift the least significant bit first.
    #[arg(long)]
    pub lsb_first: bool,
}

#[derive(Args, Debug)]
pub struct I2cArgs {
    /// Agent endpoint.
    pub endpoint: Endpoint,
    #[command(subcommand)]
    pub action: I2cAction,
}

#[derive(Subcommand, Debug)]
pub enum I2cAction {
    /// Write hex bytes to a device.
    Write {
        #[arg(value_parser = parse_i2c_address)]
        address: u8,
        data: String,
        /// Keep the bus (repeated start) instead of sending a stop.
        #[arg(long)]
        no_stop: bool,
    },
    /// Read bytes from a device.
    Read {
        #[arg(value_parser = parse_i2c_address)]
        address: u8,
        count: usize,
        /// Keep the bus (repeated start) instead of sending a stop.
        #[arg(long)]
        no_stop: bool,
    },
}

#[derive(Args, Debug)]
pub struct PingArgs {
    /// Agent endpoint.
    pub endpoint: Endpoint,
    /// Number of round trips.
    #[arg(long, short = 'n', default_value = "1")]
    pub count: u32,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}
