use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use pinwire_bus::{
    bind, status, Agent, BusError, Capability, Hardware, Level, LinkConfig, Opcode, PinMode,
    RemoteLink, SpiSettings, RESPONSE_HEADER_SIZE,
};
use pinwire_frame::{FrameConfig, DEFAULT_MAX_PAYLOAD};
use pinwire_transport::{pipe, ByteStream, MemoryStream};

fn frame_config() -> FrameConfig {
    FrameConfig {
        poll_interval: Duration::from_millis(2),
        ..FrameConfig::default()
    }
}

fn link_config(response_timeout: Duration) -> LinkConfig {
    LinkConfig {
        frame: frame_config(),
        response_timeout,
        ..LinkConfig::default()
    }
}

/// A host registry bound over an in-memory pipe to an agent thread.
struct Harness {
    hardware: Arc<Hardware>,
    link: RemoteLink<MemoryStream>,
    running: Arc<AtomicBool>,
    agent: Option<JoinHandle<u64>>,
}

impl Harness {
    fn new() -> Self {
        Self::with_remote(Arc::new(Hardware::simulated()))
    }

    fn with_remote(remote: Arc<Hardware>) -> Self {
        let (host_end, agent_end) = pipe();
        let running = Arc::new(AtomicBool::new(true));
        let agent = {
            let running = Arc::clone(&running);
            thread::spawn(move || {
                let mut agent = Agent::new(agent_end, remote, frame_config())
                    .unwrap()
                    .with_console_handler(|_, bytes| Some(bytes.to_ascii_uppercase()));
                agent.run(&running).unwrap();
                agent.requests_served()
            })
        };

        let hardware = Arc::new(Hardware::new());
        let link = bind(&hardware, host_end, link_config(Duration::from_secs(2))).unwrap();
        Self {
            hardware,
            link,
            running,
            agent: Some(agent),
        }
    }

    fn stop(&mut self) -> u64 {
        self.running.store(false, Ordering::SeqCst);
        self.agent
            .take()
            .map(|agent| agent.join().unwrap())
            .unwrap_or_default()
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

#[test]
fn gpio_write_then_read_loops_back_on_every_pin() {
    let mut harness = Harness::new();
    let hw = &harness.hardware;

    for pin in 0..=u8::MAX {
        hw.pin_mode(pin, PinMode::Output).unwrap();
        hw.digital_write(pin, Level::High).unwrap();
        assert_eq!(hw.digital_read(pin).unwrap(), Level::High, "pin {pin}");
        hw.digital_write(pin, Level::Low).unwrap();
        assert_eq!(hw.digital_read(pin).unwrap(), Level::Low, "pin {pin}");
    }

    assert_eq!(harness.stop(), 256 * 5);
}

#[test]
fn gpio_inputs_and_analog_come_from_the_agent() {
    let remote = Arc::new(Hardware::new());
    let sim = pinwire_bus::SimGpio::new();
    sim.set_input(4, Level::High);
    sim.set_analog(0, 731);
    remote.install_gpio(Box::new(sim));

    let harness = Harness::with_remote(remote);
    let hw = &harness.hardware;
    hw.pin_mode(4, PinMode::Input).unwrap();
    assert_eq!(hw.digital_read(4).unwrap(), Level::High);
    assert_eq!(hw.analog_read(0).unwrap(), 731);
    hw.analog_write(0, 12).unwrap();
    assert_eq!(hw.analog_read(0).unwrap(), 12);
}

#[test]
fn spi_transfer_echoes_identical_bytes() {
    let harness = Harness::new();
    let hw = &harness.hardware;

    hw.spi_begin_transaction(SpiSettings::default()).unwrap();
    for len in [0usize, 1, 2, 255, 256, 1000, 4096] {
        let out: Vec<u8> = (0..len).map(|i| (i * 7 + 3) as u8).collect();
        let received = hw.spi_transfer(&out).unwrap();
        assert_eq!(received.len(), out.len());
        assert_eq!(received.as_ref(), out.as_slice());
    }
    hw.spi_end_transaction().unwrap();
}

#[test]
fn spi_transfer_at_frame_limit_keeps_link() {
    let harness = Harness::new();
    let hw = &harness.hardware;
    let largest = DEFAULT_MAX_PAYLOAD - RESPONSE_HEADER_SIZE;

    hw.pin_mode(4, PinMode::Output).unwrap();
    hw.digital_write(4, Level::High).unwrap();

    let received = hw.spi_transfer(&vec![0xA5; largest]).unwrap();
    assert_eq!(received.len(), largest);
    assert!(received.iter().all(|&b| b == 0xA5));

    // One byte more fits the command frame but not the echo.
    assert!(matches!(
        hw.spi_transfer(&vec![0xA5; largest + 1]),
        Err(BusError::InvalidState(_))
    ));
    assert_eq!(hw.digital_read(4).unwrap(), Level::High);
    assert_eq!(hw.spi_transfer(b"\x01\x02").unwrap().as_ref(), b"\x01\x02");
}

#[test]
fn i2c_overflow_fails_like_local_backend() {
    let harness = Harness::new();
    let local = Hardware::simulated();
    let data = vec![0x5A; 300];

    for hw in [&harness.hardware, &local] {
        hw.i2c_begin_transmission(0x42).unwrap();
        assert_eq!(hw.i2c_write(&data).unwrap(), 256);
        match hw.i2c_end_transmission(true) {
            Err(BusError::RemoteFailure { opcode, status: code }) => {
                assert_eq!(opcode, Opcode::I2cWrite);
                assert_eq!(code, status::DATA_TOO_LONG);
            }
            other => panic!("expected DATA_TOO_LONG, got {other:?}"),
        }
        // Nothing from the overflowed transmission was stored.
        assert!(matches!(
            hw.i2c_request_from(0x42, 1, true),
            Err(BusError::ShortRead {
                expected: 1,
                received: 0
            })
        ));

        hw.i2c_begin_transmission(0x42).unwrap();
        assert_eq!(hw.i2c_write(&data[..256]).unwrap(), 256);
        hw.i2c_end_transmission(true).unwrap();
    }
}

#[test]
fn i2c_store_and_echo() {
    let harness = Harness::new();
    let hw = &harness.hardware;
    let bytes = b"\x10\x20\x30\x40\x50";

    hw.i2c_begin().unwrap();
    hw.i2c_set_clock(400_000).unwrap();
    hw.i2c_begin_transmission(0x42).unwrap();
    assert_eq!(hw.i2c_write(&bytes[..2]).unwrap(), 2);
    assert_eq!(hw.i2c_write(&bytes[2..]).unwrap(), 3);
    hw.i2c_end_transmission(true).unwrap();

    let echoed = hw.i2c_request_from(0x42, bytes.len(), true).unwrap();
    assert_eq!(echoed.as_ref(), bytes);
    hw.i2c_end().unwrap();
}

#[test]
fn i2c_short_read_is_signalled() {
    let harness = Harness::new();
    let hw = &harness.hardware;

    hw.i2c_begin_transmission(0x33).unwrap();
    hw.i2c_write(b"\x01\x02").unwrap();
    hw.i2c_end_transmission(true).unwrap();

    assert!(matches!(
        hw.i2c_request_from(0x33, 4, true),
        Err(BusError::ShortRead {
            expected: 4,
            received: 2
        })
    ));
}

#[test]
fn i2c_write_without_transmission_is_rejected_locally() {
    let harness = Harness::new();
    assert!(matches!(
        harness.hardware.i2c_write(b"\x00"),
        Err(BusError::InvalidState(_))
    ));
}

#[test]
fn i2c_nack_is_a_remote_failure() {
    let remote = Arc::new(Hardware::new());
    remote.install_i2c(Box::new(pinwire_bus::SimI2c::with_devices([0x68])));
    let harness = Harness::with_remote(remote);
    let hw = &harness.hardware;

    hw.i2c_begin_transmission(0x69).unwrap();
    hw.i2c_write(b"\x75").unwrap();
    let err = hw.i2c_end_transmission(true).unwrap_err();
    assert!(matches!(
        err,
        BusError::RemoteFailure {
            status: pinwire_bus::status::ADDRESS_NACK,
            ..
        }
    ));

    // The link is still usable afterwards.
    hw.i2c_begin_transmission(0x68).unwrap();
    hw.i2c_write(b"\x75").unwrap();
    hw.i2c_end_transmission(true).unwrap();
}

#[test]
fn silent_agent_times_out_within_bound() {
    let (host_end, _silent) = pipe();
    let hardware = Hardware::new();
    let _link = bind(&hardware, host_end, link_config(Duration::from_millis(100))).unwrap();

    let start = Instant::now();
    let err = hardware.digital_read(3).unwrap_err();
    let elapsed = start.elapsed();

    assert!(matches!(err, BusError::Timeout(_)), "{err:?}");
    assert!(elapsed >= Duration::from_millis(100));
    assert!(elapsed < Duration::from_millis(600));
}

#[test]
fn closed_stream_fails_in_flight_and_later_calls() {
    let (host_end, silent) = pipe();
    let closer = silent.closer();
    let hardware = Arc::new(Hardware::new());
    let _link = bind(&hardware, host_end, link_config(Duration::from_secs(10))).unwrap();

    let in_flight = {
        let hardware = Arc::clone(&hardware);
        thread::spawn(move || {
            let start = Instant::now();
            (hardware.digital_read(1), start.elapsed())
        })
    };
    thread::sleep(Duration::from_millis(50));
    closer.close();

    let (result, elapsed) = in_flight.join().unwrap();
    assert!(matches!(result, Err(BusError::TransportClosed)), "{result:?}");
    assert!(elapsed < Duration::from_secs(2));

    let start = Instant::now();
    assert!(matches!(
        hardware.digital_write(1, Level::High),
        Err(BusError::TransportClosed)
    ));
    assert!(matches!(
        hardware.spi_transfer(b"\x00"),
        Err(BusError::TransportClosed)
    ));
    hardware.i2c_begin_transmission(0x10).unwrap();
    assert!(matches!(
        hardware.i2c_end_transmission(true),
        Err(BusError::TransportClosed)
    ));
    assert!(start.elapsed() < Duration::from_millis(500));
    drop(silent);
}

#[test]
fn closing_the_link_fails_every_client() {
    let harness = Harness::new();
    harness.hardware.digital_write(2, Level::High).unwrap();
    harness.link.close();
    assert!(harness.link.is_closed());
    assert!(matches!(
        harness.hardware.digital_read(2),
        Err(BusError::TransportClosed)
    ));
    assert!(matches!(harness.link.ping(), Err(BusError::TransportClosed)));
}

#[test]
fn concurrent_callers_share_one_stream() {
    let harness = Harness::new();
    let workers: Vec<_> = (0..4u8)
        .map(|worker| {
            let hw = Arc::clone(&harness.hardware);
            thread::spawn(move || {
                for round in 0..50u8 {
                    let pin = worker * 10 + (round % 10);
                    hw.digital_write(pin, Level::from(round % 2 == 0)).unwrap();
                    let payload = [worker, round, 0xa5];
                    assert_eq!(hw.spi_transfer(&payload).unwrap().as_ref(), &payload);
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }
    let stats = harness.link.stats();
    assert_eq!(stats.frames_sent, 4 * 50 * 2);
    assert_eq!(stats.corrupt_frames, 0);
}

#[test]
fn consoles_are_independent_byte_streams() {
    let harness = Harness::new();
    let mut first = harness.link.console(0).unwrap();
    let mut third = harness.link.console(2).unwrap();
    assert!(matches!(
        harness.link.console(0),
        Err(BusError::InvalidState(_))
    ));
    assert!(matches!(
        harness.link.console(3),
        Err(BusError::InvalidState(_))
    ));

    first.write_all(b"hello").unwrap();
    third.write_all(b"other").unwrap();

    let mut buf = [0u8; 5];
    third.read_exact(&mut buf).unwrap();
    assert_eq!(&buf, b"OTHER");
    first.read_exact(&mut buf).unwrap();
    assert_eq!(&buf, b"HELLO");

    first.set_poll_interval(Duration::from_millis(5)).unwrap();
    let mut idle = [0u8; 4];
    assert_eq!(first.read_into(&mut idle).unwrap(), 0);
    assert_eq!(first.index(), 0);
}

#[test]
fn ping_measures_round_trip() {
    let harness = Harness::new();
    let rtt = harness.link.ping().unwrap();
    assert!(rtt < Duration::from_secs(2));
}

#[test]
fn rebinding_replaces_every_client() {
    let mut first = Harness::new();
    first.hardware.digital_write(9, Level::High).unwrap();

    // Bind the same registry to a second agent with its own pin state.
    let (host_end, agent_end) = pipe();
    let running = Arc::new(AtomicBool::new(true));
    let second_agent = {
        let running = Arc::clone(&running);
        thread::spawn(move || {
            let mut agent =
                Agent::new(agent_end, Arc::new(Hardware::simulated()), frame_config()).unwrap();
            agent.run(&running).unwrap();
        })
    };
    let second_link = bind(&first.hardware, host_end, link_config(Duration::from_secs(2))).unwrap();

    assert_eq!(first.hardware.digital_read(9).unwrap(), Level::Low);
    assert!(first.hardware.is_bound(Capability::I2c));

    // The old link's agent no longer sees traffic from the registry.
    first.link.close();
    assert_eq!(first.hardware.digital_read(9).unwrap(), Level::Low);
    first.stop();

    drop(second_link);
    running.store(false, Ordering::SeqCst);
    second_agent.join().unwrap();
}
