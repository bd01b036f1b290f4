use serde::Serialize;

use crate::cmd::{open_remote, Context, I2cAction, I2cArgs};
use crate::exit::{bus_error, CliResult, SUCCESS};
use crate::output::{parse_hex, print_report, to_hex, Report};

#[derive(Serialize)]
struct I2cReport {
    kind: &'static str,
    address: u8,
    count: usize,
    data: String,
    #[serde(skip)]
    raw: Vec<u8>,
}

impl Report for I2cReport {
    fn rows(&self) -> Vec<(&'static str, String)> {
        vec![
            ("op", self.kind.to_string()),
            ("address", format!("0x{:02x}", self.address)),
            ("count", self.count.to_string()),
            ("data", self.data.clone()),
        ]
    }

    fn raw(&self) -> Vec<u8> {
        self.raw.clone()
    }
}

pub fn run(args: I2cArgs, ctx: &Context) -> CliResult<i32> {
    let report = match args.action {
        I2cAction::Write {
            address,
            data,
            no_stop,
        } => {
            let data = parse_hex(&data)?;
            let remote = open_remote(&args.endpoint, ctx)?;
            let hw = &remote.hardware;
            hw.i2c_begin_transmission(address)
                .map_err(|err| bus_error("begin transmission failed", err))?;
            let written = hw
                .i2c_write(&data)
                .map_err(|err| bus_error("write failed", err))?;
            hw.i2c_end_transmission(!no_stop)
                .map_err(|err| bus_error("end transmission failed", err))?;
            I2cReport {
                kind: "i2c-write",
                address,
                count: written,
                data: to_hex(&data[..written]),
                raw: Vec::new(),
            }
        }
        I2cAction::Read {
            address,
            count,
            no_stop,
        } => {
            let remote = open_remote(&args.endpoint, ctx)?;
            let received = remote
                .hardware
                .i2c_request_from(address, count, !no_stop)
                .map_err(|err| bus_error("read failed", err))?;
            I2cReport {
                kind: "i2c-read",
                address,
                count: received.len(),
                data: to_hex(&received),
                raw: received.to_vec(),
            }
        }
    };

    print_report(&report, ctx.format);
    Ok(SUCCESS)
}
