use pinwire_bus::{BitOrder, SpiMode, SpiSettings};
use serde::Serialize;

use crate::cmd::{open_remote, Context, SpiArgs};
use crate::exit::{bus_error, CliResult, SUCCESS};
use crate::output::{parse_hex, print_report, to_hex, Report};

#[derive(Serialize)]
struct SpiReport {
    kind: &'static str,
    settings: SpiSettings,
    sent: String,
    received: String,
    #[serde(skip)]
    raw: Vec<u8>,
}

impl Report for SpiReport {
    fn rows(&self) -> Vec<(&'static str, String)> {
        vec![
            ("clock_hz", self.settings.clock_hz.to_string()),
            ("sent", self.sent.clone()),
            ("received", self.received.clone()),
        ]
    }

    fn raw(&self) -> Vec<u8> {
        self.raw.clone()
    }
}

fn settings(args: &SpiArgs) -> SpiSettings {
    let mode = match args.mode {
        1 => SpiMode::Mode1,
        2 => SpiMode::Mode2,
        3 => SpiMode::Mode3,
        _ => SpiMode::Mode0,
    };
    SpiSettings {
        clock_hz: args.clock_hz,
        bit_order: if args.lsb_first {
            BitOrder::LsbFirst
        } else {
            BitOrder::MsbFirst
        },
        mode,
    }
}

pub fn run(args: SpiArgs, ctx: &Context) -> CliResult<i32> {
    let data = parse_hex(&args.data)?;
    let settings = settings(&args);
    let remote = open_remote(&args.endpoint, ctx)?;
    let hw = &remote.hardware;

    hw.spi_begin_transaction(settings)
        .map_err(|err| bus_error("begin transaction failed", err))?;
    let received = hw.spi_transfer(&data);
    // Release the bus even when the transfer failed.
    let ended = hw.spi_end_transaction();
    let received = received.map_err(|err| bus_error("transfer failed", err))?;
    ended.map_err(|err| bus_error("end transaction failed", err))?;

    let report = SpiReport {
        kind: "spi-transfer",
        settings,
        sent: to_hex(&data),
        received: to_hex(&received),
        raw: received.to_vec(),
    };
    print_report(&report, ctx.format);
    Ok(SUCCESS)
}
