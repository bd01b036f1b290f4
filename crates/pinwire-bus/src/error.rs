use std::time::Duration;

use pinwire_frame::FrameError;

use crate::message::Opcode;
use crate::registry::Capability;

/// Errors surfaced by bus operations.
///
/// A failed operation never yields a default reading: every failure mode of
/// an exchange maps to one of these variants.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    /// The stream failed or was closed. Every client bound to it is now dead.
    #[error("transport closed")]
    TransportClosed,

    /// No response arrived before the deadline.
    #[error("no response within {0:?}")]
    Timeout(Duration),

    /// The response was malformed or did not match the request.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// An I2C read returned fewer bytes than requested.
    #[error("short read: expected {expected} bytes, received {received}")]
    ShortRead { expected: usize, received: usize },

    /// The command was executed but the bus reported a failure status,
    /// e.g. an I2C address NACK.
    #[error("remote failure on {opcode}: {}", crate::message::status_text(*status))]
    RemoteFailure { opcode: Opcode, status: u8 },

    /// No backend is installed for the capability.
    #[error("no {0} backend installed")]
    Unbound(Capability),

    /// The call is not valid in the current bus state.
    #[error("invalid state: {0}")]
    InvalidState(&'static str),
}

impl BusError {
    /// Whether the link behind this error is gone for good.
    pub fn is_transport_closed(&self) -> bool {
        matches!(self, BusError::TransportClosed)
    }
}

impl From<FrameError> for BusError {
    fn from(err: FrameError) -> Self {
        match err {
            FrameError::TransportClosed | FrameError::Transport(_) => BusError::TransportClosed,
            FrameError::Timeout(timeout) => BusError::Timeout(timeout),
            other => BusError::Protocol(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, BusError>;
