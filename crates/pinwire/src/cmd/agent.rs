use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use pinwire_bus::{Agent, BusError, Hardware, SimI2c};
use pinwire_transport::{connect, ByteStream, Endpoint, StreamListener};
use tracing::{info, warn};

use crate::cmd::{AgentArgs, Context};
use crate::exit::{bus_error, transport_error, CliError, CliResult, INTERNAL, SUCCESS};

pub fn run(args: AgentArgs, ctx: &Context) -> CliResult<i32> {
    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

    // Pin and device state outlives individual host connections.
    let hardware = Hardware::simulated();
    if let Some(devices) = &args.i2c_devices {
        hardware.install_i2c(Box::new(SimI2c::with_devices(devices.iter().copied())));
    }
    let hardware = Arc::new(hardware);

    if let Endpoint::Serial { .. } = args.endpoint {
        let stream = connect(&args.endpoint).map_err(|err| transport_error("open failed", err))?;
        serve(stream, &hardware, &args, ctx, &running)?;
        return Ok(SUCCESS);
    }

    let listener =
        StreamListener::bind(&args.endpoint).map_err(|err| transport_error("bind failed", err))?;
    info!(endpoint = %args.endpoint, "agent ready");

    while running.load(Ordering::SeqCst) {
        let stream = listener
            .accept()
            .map_err(|err| transport_error("accept failed", err))?;
        info!("host connected");
        if let Err(err) = serve(stream, &hardware, &args, ctx, &running) {
            warn!(error = %err, "connection ended with error");
        }
        if args.once {
            break;
        }
    }

    Ok(SUCCESS)
}

fn serve<S: ByteStream>(
    stream: S,
    hardware: &Arc<Hardware>,
    args: &AgentArgs,
    ctx: &Context,
    running: &AtomicBool,
) -> CliResult<()> {
    let mut agent = Agent::new(stream, Arc::clone(hardware), ctx.frame_config())
        .map_err(|err| bus_error("agent setup failed", err))?;
    if args.console_echo {
        agent = agent.with_console_handler(|_, bytes| Some(bytes.to_vec()));
    }

    let result = agent.run(running);
    info!(served = agent.requests_served(), "host disconnected");
    match result {
        Ok(()) | Err(BusError::TransportClosed) => Ok(()),
        Err(err) => Err(bus_error("serve failed", err)),
    }
}

fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}
