//! Virtual consoles example: three serial consoles share one link with the buses.
//!
//! Run with:
//!   cargo run --example consoles

use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use pinwire::transport::pipe;
use pinwire::{bind, Agent, Hardware, LinkConfig};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let (host_end, agent_end) = pipe();
    let running = Arc::new(AtomicBool::new(true));

    let agent_running = Arc::clone(&running);
    let agent = thread::spawn(move || -> Result<(), pinwire::BusError> {
        let config = LinkConfig::default().frame;
        let mut agent = Agent::new(agent_end, Arc::new(Hardware::simulated()), config)?
            .with_console_handler(|index, bytes| {
                let mut reply = format!("[console{index}] ").into_bytes();
                reply.extend_from_slice(bytes);
                Some(reply)
            });
        agent.run(&agent_running)
    });

    let hardware = Hardware::new();
    let link = bind(&hardware, host_end, LinkConfig::default())?;

    let mut consoles = (0..3)
        .map(|index| link.console(index))
        .collect::<Result<Vec<_>, _>>()?;

    for console in consoles.iter_mut() {
        console.write_all(b"hello from host\n")?;
    }

    // SPI traffic interleaves with console traffic on the same stream.
    let echoed = hardware.spi_transfer(b"\x9f\x00\x00")?;
    eprintln!("[host] spi echoed {:02x?}", echoed.as_ref());

    for console in consoles.iter_mut() {
        let mut buf = [0u8; 64];
        let n = console.read(&mut buf)?;
        eprint!("{}", String::from_utf8_lossy(&buf[..n]));
    }

    drop(consoles);
    link.close();
    running.store(false, Ordering::SeqCst);
    agent.join().map_err(|_| "agent thread panicked")??;
    Ok(())
}
