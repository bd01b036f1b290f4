//! Channel multiplexer: many logical channels over one framed stream.
//!
//! All channels share a single [`FramedLink`] behind a mutex. A write encodes
//! and sends its whole frame while holding the lock, so frames from
//! different channels can never interleave on the wire. Reads pump the
//! stream on behalf of every channel and route frames into per-channel
//! queues; whichever channel is waiting does the pumping.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use bytes::Bytes;
use pinwire_transport::ByteStream;
use tracing::{debug, trace, warn};

use crate::channel::channel_name;
use crate::codec::{Frame, FrameConfig};
use crate::error::{FrameError, Result};
use crate::link::FramedLink;

/// Traffic counters for one multiplexer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MuxStats {
    pub frames_sent: u64,
    pub bytes_sent: u64,
    pub frames_received: u64,
    pub bytes_received: u64,
    /// Frames for unopened channels plus frames evicted from full queues.
    pub dropped_frames: u64,
    /// Frames that failed the CRC check.
    pub corrupt_frames: u64,
}

struct MuxState<S> {
    /// `None` once the multiplexer is closed.
    link: Option<FramedLink<S>>,
    queues: HashMap<u8, VecDeque<Bytes>>,
    max_queued: usize,
    stats: MuxStats,
}

impl<S: ByteStream> MuxState<S> {
    fn link(&mut self) -> Result<&mut FramedLink<S>> {
        self.link.as_mut().ok_or(FrameError::TransportClosed)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.link.is_none() {
            return Err(FrameError::TransportClosed);
        }
        Ok(())
    }

    /// Translate a link error, marking the multiplexer closed when the stream is gone.
    fn fail(&mut self, err: FrameError) -> FrameError {
        match err {
            FrameError::TransportClosed | FrameError::Transport(_) => {
                if self.link.take().is_some() {
                    debug!(error = %err, "stream lost, closing multiplexer");
                }
                FrameError::TransportClosed
            }
            other => other,
        }
    }

    fn send(&mut self, channel: u8, payload: &[u8]) -> Result<()> {
        let result = self.link()?.send(channel, payload);
        match result {
            Ok(()) => {
                self.stats.frames_sent += 1;
                self.stats.bytes_sent += payload.len() as u64;
                trace!(channel, len = payload.len(), "frame sent");
                Ok(())
            }
            Err(err) => Err(self.fail(err)),
        }
    }

    /// Route every complete frame already sitting in the read buffer.
    fn drain_buffered(&mut self) -> Result<()> {
        loop {
            let next = self.link()?.next_buffered();
            match next {
                Ok(Some(frame)) => self.route(frame),
                Ok(None) => return Ok(()),
                Err(FrameError::ChecksumMismatch { .. }) => self.stats.corrupt_frames += 1,
                Err(err) => return Err(self.fail(err)),
            }
        }
    }

    /// One stream read, waiting at most the poll interval.
    fn fill(&mut self) -> Result<usize> {
        let result = self.link()?.fill();
        result.map_err(|err| self.fail(err))
    }

    fn has_unread_bytes(&mut self) -> Result<bool> {
        let result = self.link()?.get_mut().bytes_available();
        match result {
            Ok(n) => Ok(n > 0),
            Err(err) => Err(self.fail(err.into())),
        }
    }

    fn route(&mut self, frame: Frame) {
        self.stats.frames_received += 1;
        self.stats.bytes_received += frame.payload.len() as u64;

        let Some(queue) = self.queues.get_mut(&frame.channel) else {
            self.stats.dropped_frames += 1;
            debug!(
                channel = frame.channel,
                name = channel_name(frame.channel),
                "dropping frame for unopened channel"
            );
            return;
        };

        if queue.len() >= self.max_queued {
            queue.pop_front();
            self.stats.dropped_frames += 1;
            warn!(
                channel = frame.channel,
                limit = self.max_queued,
                "channel queue full, dropped oldest frame"
            );
        }
        queue.push_back(frame.payload);
    }

    fn pop(&mut self, channel: u8) -> Option<Bytes> {
        self.queues.get_mut(&channel).and_then(VecDeque::pop_front)
    }
}

type Shared<S> = Arc<Mutex<MuxState<S>>>;

fn lock<S>(shared: &Shared<S>) -> MutexGuard<'_, MuxState<S>> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Shares one stream between independent logical channels.
///
/// Cloning is cheap; every clone refers to the same stream.
pub struct Multiplexer<S> {
    shared: Shared<S>,
}

impl<S> Clone for Multiplexer<S> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<S: ByteStream> Multiplexer<S> {
    /// Multiplex a stream with default configuration.
    pub fn new(stream: S) -> Result<Self> {
        Self::with_config(stream, FrameConfig::default())
    }

    /// Multiplex a stream with explicit configuration.
    pub fn with_config(stream: S, config: FrameConfig) -> Result<Self> {
        let max_queued = config.max_queued_frames.max(1);
        let link = FramedLink::with_config(stream, config)?;
        Ok(Self {
            shared: Arc::new(Mutex::new(MuxState {
                link: Some(link),
                queues: HashMap::new(),
                max_queued,
                stats: MuxStats::default(),
            })),
        })
    }

    /// Open a logical channel. Each id can be open at most once at a time.
    pub fn open_channel(&self, id: u8) -> Result<Channel<S>> {
        let mut state = lock(&self.shared);
        state.ensure_open()?;
        if state.queues.contains_key(&id) {
            return Err(FrameError::ChannelInUse(id));
        }
        state.queues.insert(id, VecDeque::new());
        debug!(channel = id, name = channel_name(id), "channel opened");
        Ok(Channel {
            id,
            shared: Arc::clone(&self.shared),
        })
    }

    /// Close the multiplexer and drop the stream.
    ///
    /// Every channel operation fails with `TransportClosed` from now on.
    pub fn close(&self) {
        let mut state = lock(&self.shared);
        if state.link.take().is_some() {
            debug!("multiplexer closed");
        }
        for queue in state.queues.values_mut() {
            queue.clear();
        }
    }

    /// Whether the stream has been closed or lost.
    pub fn is_closed(&self) -> bool {
        lock(&self.shared).link.is_none()
    }

    /// Traffic counters so far.
    pub fn stats(&self) -> MuxStats {
        lock(&self.shared).stats
    }

    /// Ids of the currently open channels, ascending.
    pub fn open_channels(&self) -> Vec<u8> {
        let mut ids: Vec<u8> = lock(&self.shared).queues.keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}

impl<S> std::fmt::Debug for Multiplexer<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Multiplexer").finish_non_exhaustive()
    }
}

/// One logical channel of a [`Multiplexer`].
///
/// Dropping the channel closes it and discards its queued frames.
pub struct Channel<S: ByteStream> {
    id: u8,
    shared: Shared<S>,
}

impl<S: ByteStream> Channel<S> {
    /// Channel id.
    pub fn id(&self) -> u8 {
        self.id
    }

    /// Send `payload` as one frame on this channel.
    pub fn write(&self, payload: &[u8]) -> Result<()> {
        lock(&self.shared).send(self.id, payload)
    }

    /// Wait up to `timeout` for the next frame addressed to this channel.
    ///
    /// Frames for other channels read in the meantime are queued for them.
    /// The deadline is noticed at most one poll interval late.
    pub fn read_frame(&self, timeout: Duration) -> Result<Bytes> {
        let deadline = Instant::now() + timeout;
        loop {
            let mut state = lock(&self.shared);
            state.ensure_open()?;
            state.drain_buffered()?;
            if let Some(payload) = state.pop(self.id) {
                return Ok(payload);
            }
            if Instant::now() >= deadline {
                return Err(FrameError::Timeout(timeout));
            }
            state.fill()?;
            // Lock released here so writers and other readers get a turn.
        }
    }

    /// Return a frame for this channel if one is available without waiting.
    pub fn try_read(&self) -> Result<Option<Bytes>> {
        let mut state = lock(&self.shared);
        state.ensure_open()?;
        state.drain_buffered()?;
        if let Some(payload) = state.pop(self.id) {
            return Ok(Some(payload));
        }
        if state.has_unread_bytes()? {
            state.fill()?;
            state.drain_buffered()?;
        }
        Ok(state.pop(self.id))
    }

    /// Total payload bytes queued for this channel.
    pub fn queued_bytes(&self) -> usize {
        lock(&self.shared)
            .queues
            .get(&self.id)
            .map_or(0, |queue| queue.iter().map(Bytes::len).sum())
    }

    /// Whether the underlying stream has been closed or lost.
    pub fn is_closed(&self) -> bool {
        lock(&self.shared).link.is_none()
    }
}

impl<S: ByteStream> Drop for Channel<S> {
    fn drop(&mut self) {
        lock(&self.shared).queues.remove(&self.id);
        trace!(channel = self.id, "channel released");
    }
}

impl<S: ByteStream> std::fmt::Debug for Channel<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel").field("id", &self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    use bytes::BytesMut;
    use pinwire_transport::{pipe, MemoryStream};

    use super::*;
    use crate::channel::{CONSOLE_0, CONSOLE_1, GPIO, SPI};
    use crate::reader::FrameReader;

    fn fast_config() -> FrameConfig {
        FrameConfig {
            poll_interval: Duration::from_millis(2),
            ..FrameConfig::default()
        }
    }

    fn mux_pair() -> (Multiplexer<MemoryStream>, FramedLink<MemoryStream>) {
        let (a, b) = pipe();
        let mux = Multiplexer::with_config(a, fast_config()).unwrap();
        let far = FramedLink::with_config(b, fast_config()).unwrap();
        (mux, far)
    }

    /// Records everything written; never has anything to read.
    #[derive(Clone, Default)]
    struct Recorder {
        wire: Arc<Mutex<Vec<u8>>>,
        writes: Arc<AtomicUsize>,
    }

    impl ByteStream for Recorder {
        fn bytes_available(&mut self) -> pinwire_transport::Result<usize> {
            Ok(0)
        }

        fn read_into(&mut self, _buf: &mut [u8]) -> pinwire_transport::Result<usize> {
            Ok(0)
        }

        fn write_bytes(&mut self, buf: &[u8]) -> pinwire_transport::Result<usize> {
            // Accept in small pieces so an unlocked writer would interleave.
            let n = buf.len().min(5);
            self.wire.lock().unwrap().extend_from_slice(&buf[..n]);
            self.writes.fetch_add(1, Ordering::SeqCst);
            thread::yield_now();
            Ok(n)
        }

        fn flush(&mut self) -> pinwire_transport::Result<()> {
            Ok(())
        }

        fn set_poll_interval(&mut self, _interval: Duration) -> pinwire_transport::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn routes_frames_to_their_channels() {
        let (mux, mut far) = mux_pair();
        let gpio = mux.open_channel(GPIO).unwrap();
        let console = mux.open_channel(CONSOLE_0).unwrap();

        far.send(CONSOLE_0, b"hello from console").unwrap();
        far.send(GPIO, b"\x01\x00\x03\x00\x01").unwrap();

        // The GPIO reader pumps past the console frame and queues it.
        let gpio_payload = gpio.read_frame(Duration::from_secs(1)).unwrap();
        assert_eq!(gpio_payload.as_ref(), b"\x01\x00\x03\x00\x01");
        assert!(console.queued_bytes() > 0);
        let console_payload = console.try_read().unwrap().unwrap();
        assert_eq!(console_payload.as_ref(), b"hello from console");

        let stats = mux.stats();
        assert_eq!(stats.frames_received, 2);
        assert_eq!(stats.dropped_frames, 0);
    }

    #[test]
    fn write_reaches_far_side() {
        let (mux, mut far) = mux_pair();
        let spi = mux.open_channel(SPI).unwrap();
        spi.write(b"\xde\xad\xbe\xef").unwrap();

        let frame = far.read_frame(Duration::from_secs(1)).unwrap();
        assert_eq!(frame, Frame::new(SPI, &b"\xde\xad\xbe\xef"[..]));
        assert_eq!(mux.stats().frames_sent, 1);
        assert_eq!(mux.stats().bytes_sent, 4);
    }

    #[test]
    fn duplicate_open_is_rejected_until_dropped() {
        let (mux, _far) = mux_pair();
        let first = mux.open_channel(CONSOLE_1).unwrap();
        assert!(matches!(
            mux.open_channel(CONSOLE_1),
            Err(FrameError::ChannelInUse(CONSOLE_1))
        ));
        drop(first);
        assert!(mux.open_channel(CONSOLE_1).is_ok());
    }

    #[test]
    fn frames_for_unopened_channels_are_dropped() {
        let (mux, mut far) = mux_pair();
        let gpio = mux.open_channel(GPIO).unwrap();

        far.send(SPI, b"nobody listens").unwrap();
        far.send(GPIO, b"ok").unwrap();

        assert_eq!(gpio.read_frame(Duration::from_secs(1)).unwrap().as_ref(), b"ok");
        assert_eq!(mux.stats().dropped_frames, 1);
    }

    #[test]
    fn full_queue_evicts_oldest() {
        let (a, b) = pipe();
        let config = FrameConfig {
            max_queued_frames: 2,
            ..fast_config()
        };
        let mux = Multiplexer::with_config(a, config).unwrap();
        let mut far = FramedLink::with_config(b, fast_config()).unwrap();
        let console = mux.open_channel(CONSOLE_0).unwrap();
        let gpio = mux.open_channel(GPIO).unwrap();

        for line in [&b"one"[..], b"two", b"three"] {
            far.send(CONSOLE_0, line).unwrap();
        }
        far.send(GPIO, b"done").unwrap();
        gpio.read_frame(Duration::from_secs(1)).unwrap();

        assert_eq!(console.try_read().unwrap().unwrap().as_ref(), b"two");
        assert_eq!(console.try_read().unwrap().unwrap().as_ref(), b"three");
        assert!(console.try_read().unwrap().is_none());
        assert_eq!(mux.stats().dropped_frames, 1);
    }

    #[test]
    fn corrupt_frames_are_counted_and_skipped() {
        let (a, mut b) = pipe();
        let mux = Multiplexer::with_config(a, fast_config()).unwrap();
        let gpio = mux.open_channel(GPIO).unwrap();

        let mut wire = BytesMut::new();
        crate::codec::encode_frame(GPIO, b"bad", &mut wire).unwrap();
        let last = wire.len() - 1;
        wire[last] ^= 0x5a;
        crate::codec::encode_frame(GPIO, b"good", &mut wire).unwrap();
        b.write_bytes(&wire).unwrap();

        assert_eq!(gpio.read_frame(Duration::from_secs(1)).unwrap().as_ref(), b"good");
        assert_eq!(mux.stats().corrupt_frames, 1);
    }

    #[test]
    fn silent_stream_times_out_within_bound() {
        let (mux, _far) = mux_pair();
        let gpio = mux.open_channel(GPIO).unwrap();

        let start = Instant::now();
        let err = gpio.read_frame(Duration::from_millis(50)).unwrap_err();
        let elapsed = start.elapsed();

        assert!(matches!(err, FrameError::Timeout(_)));
        assert!(elapsed >= Duration::from_millis(50));
        assert!(elapsed < Duration::from_millis(500));
        assert!(!gpio.is_closed());
    }

    #[test]
    fn closed_stream_fails_every_channel_immediately() {
        let (mux, far) = mux_pair();
        let gpio = mux.open_channel(GPIO).unwrap();
        let spi = mux.open_channel(SPI).unwrap();
        drop(far);

        assert!(matches!(
            gpio.read_frame(Duration::from_secs(5)),
            Err(FrameError::TransportClosed)
        ));
        assert!(mux.is_closed());

        let start = Instant::now();
        assert!(matches!(spi.write(b"x"), Err(FrameError::TransportClosed)));
        assert!(matches!(
            spi.read_frame(Duration::from_secs(5)),
            Err(FrameError::TransportClosed)
        ));
        assert!(matches!(spi.try_read(), Err(FrameError::TransportClosed)));
        assert!(start.elapsed() < Duration::from_secs(1));
        assert!(matches!(
            mux.open_channel(CONSOLE_0),
            Err(FrameError::TransportClosed)
        ));
    }

    #[test]
    fn close_fails_later_calls() {
        let (mux, _far) = mux_pair();
        let console = mux.open_channel(CONSOLE_0).unwrap();
        mux.close();
        assert!(console.is_closed());
        assert!(matches!(
            console.write(b"after close"),
            Err(FrameError::TransportClosed)
        ));
    }

    #[test]
    fn concurrent_writers_never_interleave() {
        let recorder = Recorder::default();
        let wire = Arc::clone(&recorder.wire);
        let mux = Multiplexer::new(recorder).unwrap();

        let short = vec![0x11u8; 13];
        let long = vec![0x22u8; 211];
        const ROUNDS: usize = 50;

        let writers: Vec<_> = [(CONSOLE_0, short.clone()), (CONSOLE_1, long.clone())]
            .into_iter()
            .map(|(id, payload)| {
                let channel = mux.open_channel(id).unwrap();
                thread::spawn(move || {
                    for _ in 0..ROUNDS {
                        channel.write(&payload).unwrap();
                    }
                })
            })
            .collect();
        for writer in writers {
            writer.join().unwrap();
        }

        let bytes = wire.lock().unwrap().clone();
        // Two independent decoders replay the same recording; each keeps its own channel.
        for (id, expected) in [(CONSOLE_0, &short), (CONSOLE_1, &long)] {
            let mut decoder = FrameReader::new();
            decoder.push_bytes(&bytes);
            let mut seen = 0;
            while let Some(frame) = decoder.next_frame().unwrap() {
                if frame.channel == id {
                    assert_eq!(frame.payload.as_ref(), expected.as_slice());
                    seen += 1;
                }
            }
            assert_eq!(seen, ROUNDS);
            assert_eq!(decoder.discarded_bytes(), 0);
            assert_eq!(decoder.buffered(), 0);
        }
    }
}
