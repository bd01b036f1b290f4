//! Blink example: host code toggles a pin on an agent running in-process.
//!
//! Run with:
//!   cargo run --example blink-loopback

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use pinwire::transport::pipe;
use pinwire::{bind, Agent, Hardware, Level, LinkConfig, PinMode};

const LED: u8 = 13;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let (host_end, agent_end) = pipe();
    let running = Arc::new(AtomicBool::new(true));

    let agent_running = Arc::clone(&running);
    let agent = thread::spawn(move || -> Result<u64, pinwire::BusError> {
        let config = LinkConfig::default().frame;
        let mut agent = Agent::new(agent_end, Arc::new(Hardware::simulated()), config)?;
        agent.run(&agent_running)?;
        Ok(agent.requests_served())
    });

    let hardware = Hardware::new();
    let link = bind(&hardware, host_end, LinkConfig::default())?;

    hardware.pin_mode(LED, PinMode::Output)?;
    for i in 0..6 {
        let level = Level::from(i % 2 == 0);
        hardware.digital_write(LED, level)?;
        let seen = hardware.digital_read(LED)?;
        eprintln!("[host] wrote {level}, agent reads {seen}");
        thread::sleep(Duration::from_millis(50));
    }

    eprintln!("[host] ping {:?}", link.ping()?);
    let stats = link.stats();
    eprintln!(
        "[host] frames sent={} received={}",
        stats.frames_sent, stats.frames_received
    );

    link.close();
    running.store(false, Ordering::SeqCst);
    let served = agent.join().map_err(|_| "agent thread panicked")??;
    eprintln!("[agent] served {served} commands");
    Ok(())
}
