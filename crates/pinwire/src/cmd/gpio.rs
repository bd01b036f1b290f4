use pinwire_bus::{Level, PinMode};
use serde::Serialize;

use crate::cmd::{open_remote, Context, GpioAction, GpioArgs};
use crate::exit::{bus_error, CliResult, SUCCESS};
use crate::output::{print_report, Report};

#[derive(Serialize)]
struct GpioReport {
    kind: &'static str,
    pin: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    mode: Option<PinMode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    level: Option<Level>,
    #[serde(skip_serializing_if = "Option::is_none")]
    value: Option<u16>,
}

impl GpioReport {
    fn new(kind: &'static str, pin: u8) -> Self {
        Self {
            kind,
            pin,
            mode: None,
            level: None,
            value: None,
        }
    }
}

impl Report for GpioReport {
    fn rows(&self) -> Vec<(&'static str, String)> {
        let mut rows = vec![("op", self.kind.to_string()), ("pin", self.pin.to_string())];
        if let Some(mode) = self.mode {
            let name = serde_json::to_string(&mode).unwrap_or_default();
            rows.push(("mode", name.trim_matches('"').to_string()));
        }
        if let Some(level) = self.level {
            rows.push(("level", level.to_string()));
        }
        if let Some(value) = self.value {
            rows.push(("value", value.to_string()));
        }
        rows
    }

    fn raw(&self) -> Vec<u8> {
        match (self.level, self.value) {
            (Some(level), _) => format!("{level}\n").into_bytes(),
            (None, Some(value)) => format!("{value}\n").into_bytes(),
            (None, None) => Vec::new(),
        }
    }
}

pub fn run(args: GpioArgs, ctx: &Context) -> CliResult<i32> {
    let remote = open_remote(&args.endpoint, ctx)?;
    let hw = &remote.hardware;

    let report = match args.action {
        GpioAction::Mode { pin, mode } => {
            let mode = PinMode::from(mode);
            hw.pin_mode(pin, mode)
                .map_err(|err| bus_error("pin mode failed", err))?;
            GpioReport {
                mode: Some(mode),
                ..GpioReport::new("gpio-mode", pin)
            }
        }
        GpioAction::Write { pin, level } => {
            let level = Level::from(level);
            hw.digital_write(pin, level)
                .map_err(|err| bus_error("digital write failed", err))?;
            GpioReport {
                level: Some(level),
                ..GpioReport::new("gpio-write", pin)
            }
        }
        GpioAction::Read { pin } => {
            let level = hw
                .digital_read(pin)
                .map_err(|err| bus_error("digital read failed", err))?;
            GpioReport {
                level: Some(level),
                ..GpioReport::new("gpio-read", pin)
            }
        }
        GpioAction::AnalogRead { pin } => {
            let value = hw
                .analog_read(pin)
                .map_err(|err| bus_error("analog read failed", err))?;
            GpioReport {
                value: Some(value),
                ..GpioReport::new("analog-read", pin)
            }
        }
        GpioAction::AnalogWrite { pin, value } => {
            hw.analog_write(pin, value)
                .map_err(|err| bus_error("analog write failed", err))?;
            GpioReport {
                value: Some(value),
                ..GpioReport::new("analog-write", pin)
            }
        }
    };

    print_report(&report, ctx.format);
    Ok(SUCCESS)
}
