use serde::Serialize;

use crate::cmd::{open_remote, Context, PingArgs};
use crate::exit::{bus_error, CliResult, SUCCESS};
use crate::output::{print_report, Report};

#[derive(Serialize)]
struct PingReport {
    kind: &'static str,
    endpoint: String,
    seq: u32,
    rtt_us: u64,
}

impl Report for PingReport {
    fn rows(&self) -> Vec<(&'static str, String)> {
        vec![
            ("endpoint", self.endpoint.clone()),
            ("seq", self.seq.to_string()),
            ("rtt_us", self.rtt_us.to_string()),
        ]
    }

    fn raw(&self) -> Vec<u8> {
        format!("{}\n", self.rtt_us).into_bytes()
    }
}

pub fn run(args: PingArgs, ctx: &Context) -> CliResult<i32> {
    let remote = open_remote(&args.endpoint, ctx)?;

    for seq in 1..=args.count.max(1) {
        let rtt = remote
            .link
            .ping()
            .map_err(|err| bus_error("ping failed", err))?;
        print_report(
            &PingReport {
                kind: "ping",
                endpoint: args.endpoint.to_string(),
                seq,
                rtt_us: u64::try_from(rtt.as_micros()).unwrap_or(u64::MAX),
            },
            ctx.format,
        );
    }

    Ok(SUCCESS)
}
