//! In-process duplex byte pipe.
//!
//! Behaves like a socket pair: bytes written on one end become readable on
//! the other, reads wait at most the poll interval, and closing either end
//! makes the other side observe [`TransportError::Closed`] once it has drained
//! what was already sent.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::error::{Result, TransportError};
use crate::traits::{ByteStream, DEFAULT_POLL_INTERVAL};

#[derive(Default)]
struct Direction {
    bytes: VecDeque<u8>,
    closed: bool,
}

#[derive(Default)]
struct Lane {
    state: Mutex<Direction>,
    ready: Condvar,
}

impl Lane {
    fn lock(&self) -> MutexGuard<'_, Direction> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn close(&self) {
        self.lock().closed = true;
        self.ready.notify_all();
    }
}

/// One end of an in-memory duplex pipe created by [`pipe`].
pub struct MemoryStream {
    rx: Arc<Lane>,
    tx: Arc<Lane>,
    poll_interval: Duration,
}

/// Create a connected pair of in-memory streams.
pub fn pipe() -> (MemoryStream, MemoryStream) {
    let a_to_b = Arc::new(Lane::default());
    let b_to_a = Arc::new(Lane::default());
    let a = MemoryStream {
        rx: Arc::clone(&b_to_a),
        tx: Arc::clone(&a_to_b),
        poll_interval: DEFAULT_POLL_INTERVAL,
    };
    let b = MemoryStream {
        rx: a_to_b,
        tx: b_to_a,
        poll_interval: DEFAULT_POLL_INTERVAL,
    };
    (a, b)
}

impl MemoryStream {
    /// Close both directions. The peer drains pending bytes, then sees `Closed`.
    pub fn close(&self) {
        self.tx.close();
        self.rx.close();
    }

    /// A handle that can close this pipe from another thread.
    pub fn closer(&self) -> PipeCloser {
        PipeCloser {
            rx: Arc::clone(&self.rx),
            tx: Arc::clone(&self.tx),
        }
    }
}

impl ByteStream for MemoryStream {
    fn bytes_available(&mut self) -> Result<usize> {
        let state = self.rx.lock();
        if state.bytes.is_empty() && state.closed {
            return Err(TransportError::Closed);
        }
        Ok(state.bytes.len())
    }

    fn read_into(&mut self, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let deadline = Instant::now() + self.poll_interval;
        let mut state = self.rx.lock();
        loop {
            if !state.bytes.is_empty() {
                let n = buf.len().min(state.bytes.len());
                for (slot, byte) in buf.iter_mut().zip(state.bytes.drain(..n)) {
                    *slot = byte;
                }
                return Ok(n);
            }
            if state.closed {
                return Err(TransportError::Closed);
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(0);
            }
            state = self
                .rx
                .ready
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    fn write_bytes(&mut self, buf: &[u8]) -> Result<usize> {
        let mut state = self.tx.lock();
        if state.closed {
            return Err(TransportError::Closed);
        }
        state.bytes.extend(buf.iter().copied());
        drop(state);
        self.tx.ready.notify_all();
        Ok(buf.len())
    }

    fn flush(&mut self) -> Result<()> {
        if self.tx.lock().closed {
            return Err(TransportError::Closed);
        }
        Ok(())
    }

    fn set_poll_interval(&mut self, interval: Duration) -> Result<()> {
        self.poll_interval = interval;
        Ok(())
    }
}

impl Drop for MemoryStream {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for MemoryStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStream")
            .field("poll_interval", &self.poll_interval)
            .finish()
    }
}

/// Closes a [`MemoryStream`] pair from outside the thread that owns it.
#[derive(Clone)]
pub struct PipeCloser {
    rx: Arc<Lane>,
    tx: Arc<Lane>,
}

impl PipeCloser {
    /// Close both directions of the pipe.
    pub fn close(&self) {
        self.tx.close();
        self.rx.close();
    }
}
