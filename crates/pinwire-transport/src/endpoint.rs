use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::{Result, TransportError};
use crate::socket::SocketStream;
use crate::traits::ByteStream;

/// Default baud rate for agent serial links.
pub const DEFAULT_BAUD: u32 = 115_200;

/// Where an agent can be reached.
///
/// Parsed from URL-like strings:
/// - `tcp://host:port`
/// - `unix:///run/pinwire/agent.sock`
/// - `serial:///dev/ttyUSB0` or `serial:///dev/ttyUSB0?baud=57600`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    Tcp(String),
    Unix(PathBuf),
    Serial { path: PathBuf, baud: u32 },
}

impl FromStr for Endpoint {
    type Err = TransportError;

    fn from_str(input: &str) -> Result<Self> {
        let invalid = |reason: &str| TransportError::InvalidEndpoint {
            input: input.to_string(),
            reason: reason.to_string(),
        };

        let (scheme, rest) = input
            .split_once("://")
            .ok_or_else(|| invalid("expected <scheme>://<target>"))?;
        if rest.is_empty() {
            return Err(invalid("missing target"));
        }

        match scheme {
            "tcp" => {
                let (host, port) = rest
                    .rsplit_once(':')
                    .ok_or_else(|| invalid("tcp endpoint needs host:port"))?;
                if host.is_empty() || port.parse::<u16>().is_err() {
                    return Err(invalid("tcp endpoint needs host:port"));
                }
                Ok(Endpoint::Tcp(rest.to_string()))
            }
            "unix" => Ok(Endpoint::Unix(PathBuf::from(rest))),
            "serial" => {
                let (path, query) = match rest.split_once('?') {
                    Some((path, query)) => (path, Some(query)),
                    None => (rest, None),
                };
                let baud = match query {
                    None => DEFAULT_BAUD,
                    Some(query) => query
                        .strip_prefix("baud=")
                        .and_then(|value| value.parse::<u32>().ok())
                        .ok_or_else(|| invalid("serial options must be baud=<rate>"))?,
                };
                Ok(Endpoint::Serial {
                    path: PathBuf::from(path),
                    baud,
                })
            }
            _ => Err(invalid("unknown scheme (expected tcp, unix or serial)")),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Tcp(addr) => write!(f, "tcp://{addr}"),
            Endpoint::Unix(path) => write!(f, "unix://{}", path.display()),
            Endpoint::Serial { path, baud } => {
                write!(f, "serial://{}?baud={baud}", path.display())
            }
        }
    }
}

/// Open a stream to an endpoint as the host (connecting) side.
pub fn connect(endpoint: &Endpoint) -> Result<Box<dyn ByteStream>> {
    match endpoint {
        Endpoint::Tcp(addr) => Ok(Box::new(SocketStream::connect_tcp(addr)?)),
        #[cfg(unix)]
        Endpoint::Unix(path) => {
            let stream = std::os::unix::net::UnixStream::connect(path).map_err(|e| {
                TransportError::Connect {
                    endpoint: endpoint.to_string(),
                    source: e,
                }
            })?;
            tracing::debug!(?path, "connected to unix domain socket");
            Ok(Box::new(SocketStream::from_unix(stream)?))
        }
        #[cfg(unix)]
        Endpoint::Serial { path, baud } => Ok(Box::new(crate::SerialDevice::open(path, *baud)?)),
        #[cfg(not(unix))]
        other => Err(TransportError::Connect {
            endpoint: other.to_string(),
            source: std::io::Error::new(
                std::io::ErrorKind::Unsupported,
                "unix sockets and serial ttys require a Unix host",
            ),
        }),
    }
}
