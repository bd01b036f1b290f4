use std::fmt;
use std::io;

use pinwire_bus::BusError;
use pinwire_transport::TransportError;

pub const SUCCESS: i32 = 0;
pub const TRANSPORT_ERROR: i32 = 3;
pub const PROTOCOL_ERROR: i32 = 60;
pub const REMOTE_FAILURE: i32 = 61;
pub const USAGE: i32 = 64;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn usage(message: impl Into<String>) -> Self {
        Self::new(USAGE, message)
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        _ => TRANSPORT_ERROR,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn transport_error(context: &str, err: TransportError) -> CliError {
    match err {
        TransportError::Bind { source, .. }
        | TransportError::Connect { source, .. }
        | TransportError::Accept(source)
        | TransportError::Io(source) => io_error(context, source),
        TransportError::InvalidEndpoint { .. } | TransportError::UnsupportedBaud(_) => {
            CliError::new(USAGE, format!("{context}: {err}"))
        }
        other => CliError::new(TRANSPORT_ERROR, format!("{context}: {other}")),
    }
}

pub fn bus_error(context: &str, err: BusError) -> CliError {
    let code = match &err {
        BusError::TransportClosed => TRANSPORT_ERROR,
        BusError::Timeout(_) => TIMEOUT,
        BusError::Protocol(_) | BusError::ShortRead { .. } => PROTOCOL_ERROR,
        BusError::RemoteFailure { .. } => REMOTE_FAILURE,
        BusError::InvalidState(_) => USAGE,
        BusError::Unbound(_) => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use pinwire_bus::{status, Opcode};

    use super::*;

    #[test]
    fn bus_errors_map_to_exit_codes() {
        let cases = [
            (BusError::TransportClosed, TRANSPORT_ERROR),
            (BusError::Timeout(Duration::from_millis(10)), TIMEOUT),
            (BusError::Protocol("bad".to_string()), PROTOCOL_ERROR),
            (
                BusError::ShortRead {
                    expected: 2,
                    received: 1,
                },
                PROTOCOL_ERROR,
            ),
            (
                BusError::RemoteFailure {
                    opcode: Opcode::I2cWrite,
                    status: status::ADDRESS_NACK,
                },
                REMOTE_FAILURE,
            ),
        ];
        for (err, code) in cases {
            assert_eq!(bus_error("op", err).code, code);
        }
    }

    #[test]
    fn refused_connection_is_a_transport_error() {
        let err = TransportError::Connect {
            endpoint: "unix:///tmp/none.sock".to_string(),
            source: io::Error::from(io::ErrorKind::ConnectionRefused),
        };
        let cli = transport_error("connect failed", err);
        assert_eq!(cli.code, TRANSPORT_ERROR);
        assert!(cli.message.starts_with("connect failed: "));
    }
}
