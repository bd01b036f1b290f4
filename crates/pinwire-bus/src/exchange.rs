//! Blocking request/response exchanges over a multiplexed channel.

use std::fmt;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use bytes::Bytes;
use pinwire_frame::{Channel, FrameError};
use pinwire_transport::ByteStream;
use tracing::{debug, trace};

use crate::error::{BusError, Result};
use crate::message::{status, Command, Opcode, Response};

/// Default time to wait for a response.
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Where an exchange is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeState {
    Idle,
    Sending,
    AwaitingResponse,
    Complete,
    TimedOut,
    ProtocolError,
}

impl fmt::Display for ExchangeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Serialises exchanges on one physical stream and hands out request ids.
///
/// Every client bound to the same stream shares one gate, so at most one
/// command is outstanding on that stream at any instant.
#[derive(Clone, Default)]
pub struct ExchangeGate {
    inner: Arc<GateInner>,
}

#[derive(Default)]
struct GateInner {
    turn: Mutex<()>,
    next_id: AtomicU16,
}

impl ExchangeGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for the stream to be free. The turn ends when the guard drops.
    fn acquire(&self) -> MutexGuard<'_, ()> {
        self.inner
            .turn
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn next_id(&self) -> u16 {
        self.inner.next_id.fetch_add(1, Ordering::Relaxed)
    }
}

impl fmt::Debug for ExchangeGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExchangeGate")
            .field("next_id", &self.inner.next_id.load(Ordering::Relaxed))
            .finish()
    }
}

/// Tracks one exchange through its states.
struct Exchange {
    request_id: u16,
    opcode: Opcode,
    state: ExchangeState,
}

impl Exchange {
    fn new(request_id: u16, opcode: Opcode) -> Self {
        Self {
            request_id,
            opcode,
            state: ExchangeState::Idle,
        }
    }

    fn advance(&mut self, next: ExchangeState) {
        trace!(
            request_id = self.request_id,
            opcode = %self.opcode,
            from = %self.state,
            to = %next,
            "exchange state"
        );
        self.state = next;
    }

    /// Record a terminal failure and hand the error back.
    fn fail(&mut self, err: BusError) -> BusError {
        let next = match err {
            BusError::Timeout(_) => ExchangeState::TimedOut,
            _ => ExchangeState::ProtocolError,
        };
        self.advance(next);
        debug!(request_id = self.request_id, opcode = %self.opcode, error = %err, "exchange failed");
        err
    }
}

/// Drives exchanges for one bus client over its channel.
pub struct Requester<S: ByteStream> {
    channel: Channel<S>,
    gate: ExchangeGate,
    timeout: Duration,
}

impl<S: ByteStream> Requester<S> {
    pub fn new(channel: Channel<S>, gate: ExchangeGate, timeout: Duration) -> Self {
        Self {
            channel,
            gate,
            timeout,
        }
    }

    /// Send `command` and block until its response, a timeout, or a failure.
    ///
    /// Returns the response payload on success. Responses carrying another
    /// request id are late answers to abandoned exchanges and are skipped.
    /// Nothing is retried.
    pub fn call(&self, command: &Command) -> Result<Bytes> {
        let _turn = self.gate.acquire();
        let mut exchange = Exchange::new(self.gate.next_id(), command.opcode());

        exchange.advance(ExchangeState::Sending);
        if let Err(err) = self.channel.write(&command.encode(exchange.request_id)) {
            return Err(exchange.fail(err.into()));
        }

        exchange.advance(ExchangeState::AwaitingResponse);
        let deadline = Instant::now() + self.timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let payload = match self.channel.read_frame(remaining) {
                Ok(payload) => payload,
                Err(FrameError::Timeout(_)) => {
                    return Err(exchange.fail(BusError::Timeout(self.timeout)));
                }
                Err(err) => return Err(exchange.fail(err.into())),
            };

            let response = match Response::decode(payload) {
                Ok(response) => response,
                Err(err) => return Err(exchange.fail(err.into())),
            };

            if response.request_id != exchange.request_id {
                debug!(
                    expected = exchange.request_id,
                    received = response.request_id,
                    "discarding stale response"
                );
                continue;
            }

            if response.opcode != exchange.opcode as u8 {
                let err = BusError::Protocol(format!(
                    "response opcode {:#04x} does not match {}",
                    response.opcode, exchange.opcode
                ));
                return Err(exchange.fail(err));
            }

            if response.status != status::OK {
                let err = BusError::RemoteFailure {
                    opcode: exchange.opcode,
                    status: response.status,
                };
                return Err(exchange.fail(err));
            }

            exchange.advance(ExchangeState::Complete);
            return Ok(response.payload);
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    pub fn channel_id(&self) -> u8 {
        self.channel.id()
    }
}

impl<S: ByteStream> fmt::Debug for Requester<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Requester")
            .field("channel", &self.channel.id())
            .field("timeout", &self.timeout)
            .finish()
    }
}
