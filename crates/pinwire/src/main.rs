mod cmd;
mod exit;
mod logging;
mod output;

use clap::Parser;

use crate::cmd::{parse_duration, Command, Context};
use crate::exit::CliResult;
use crate::logging::{init_logging, LogFormat, LogLevel};
use crate::output::OutputFormat;

#[derive(Parser, Debug)]
#[command(name = "pinwire", version, about = "Remote GPIO, SPI and I2C over a byte link")]
struct Cli {
    /// Output format.
    #[arg(long, value_name = "FORMAT", global = true)]
    format: Option<OutputFormat>,

    /// Log output format (stderr).
    #[arg(long, value_name = "FORMAT", default_value = "text", global = true)]
    log_format: LogFormat,

    /// Minimum log level (stderr).
    #[arg(long, value_name = "LEVEL", default_value = "info", global = true)]
    log_level: LogLevel,

    /// How long each bus call waits for its response (e.g. 1s, 500ms).
    #[arg(long, default_value = "1s", global = true, env = "PINWIRE_TIMEOUT")]
    timeout: String,

    /// Stream poll interval (e.g. 10ms).
    #[arg(long, default_value = "10ms", global = true)]
    poll_interval: String,

    #[command(subcommand)]
    command: Command,
}

impl Cli {
    fn context(&self) -> CliResult<Context> {
        Ok(Context {
            format: self
                .format
                .unwrap_or_else(OutputFormat::default_for_stdout),
            timeout: parse_duration(&self.timeout)?,
            poll_interval: parse_duration(&self.poll_interval)?,
        })
    }
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_format, cli.log_level);

    let result = cli.context().and_then(|ctx| cmd::run(cli.command, &ctx));

    match result {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(err.code);
        }
    }
}
