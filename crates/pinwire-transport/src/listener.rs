use std::net::TcpListener;
#[cfg(unix)]
use std::os::unix::fs::{FileTypeExt, MetadataExt, PermissionsExt};
#[cfg(unix)]
use std::os::unix::net::UnixListener;
#[cfg(unix)]
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::endpoint::Endpoint;
use crate::error::{Result, TransportError};
use crate::socket::SocketStream;

/// Default permission mode for created agent socket paths.
#[cfg(unix)]
pub const DEFAULT_SOCKET_MODE: u32 = 0o600;

/// Unix `sockaddr_un.sun_path` is 108 bytes on Linux, 104 elsewhere.
#[cfg(target_os = "linux")]
const MAX_SOCKET_PATH_LEN: usize = 108;
#[cfg(all(unix, not(target_os = "linux")))]
const MAX_SOCKET_PATH_LEN: usize = 104;

/// Accepts agent-side connections on a TCP port or a Unix socket path.
///
/// Unix socket files created here are removed again on drop, but only if the
/// path still refers to the socket this listener created.
pub struct StreamListener {
    inner: ListenerInner,
}

enum ListenerInner {
    Tcp(TcpListener),
    #[cfg(unix)]
    Unix(UnixSocketFile),
}

#[cfg(unix)]
struct UnixSocketFile {
    listener: UnixListener,
    path: PathBuf,
    created_inode: (u64, u64),
}

impl StreamListener {
    /// Bind a listener for a `tcp://` or `unix://` endpoint.
    pub fn bind(endpoint: &Endpoint) -> Result<Self> {
        match endpoint {
            Endpoint::Tcp(addr) => {
                let listener = TcpListener::bind(addr.as_str()).map_err(|e| TransportError::Bind {
                    endpoint: endpoint.to_string(),
                    source: e,
                })?;
                info!(%endpoint, "listening on tcp endpoint");
                Ok(Self {
                    inner: ListenerInner::Tcp(listener),
                })
            }
            #[cfg(unix)]
            Endpoint::Unix(path) => Ok(Self {
                inner: ListenerInner::Unix(bind_unix(path, DEFAULT_SOCKET_MODE)?),
            }),
            other => Err(TransportError::Bind {
                endpoint: other.to_string(),
                source: std::io::Error::new(
                    std::io::ErrorKind::Unsupported,
                    "only tcp and unix endpoints can listen",
                ),
            }),
        }
    }

    /// Accept an incoming connection (blocking).
    pub fn accept(&self) -> Result<SocketStream> {
        match &self.inner {
            ListenerInner::Tcp(listener) => {
                let (stream, addr) = listener.accept().map_err(TransportError::Accept)?;
                debug!(%addr, "accepted tcp connection");
                SocketStream::from_tcp(stream)
            }
            #[cfg(unix)]
            ListenerInner::Unix(socket) => {
                let (stream, _addr) = socket.listener.accept().map_err(TransportError::Accept)?;
                debug!(path = ?socket.path, "accepted unix connection");
                SocketStream::from_unix(stream)
            }
        }
    }

    /// The endpoint this listener is bound to, with the real port for `tcp://...:0`.
    pub fn local_endpoint(&self) -> Result<Endpoint> {
        match &self.inner {
            ListenerInner::Tcp(listener) => Ok(Endpoint::Tcp(listener.local_addr()?.to_string())),
            #[cfg(unix)]
            ListenerInner::Unix(socket) => Ok(Endpoint::Unix(socket.path.clone())),
        }
    }
}

#[cfg(unix)]
fn bind_unix(path: &Path, mode: u32) -> Result<UnixSocketFile> {
    let path = path.to_path_buf();
    let bind_err = |path: &Path, source: std::io::Error| TransportError::Bind {
        endpoint: format!("unix://{}", path.display()),
        source,
    };

    let path_bytes = path.as_os_str().len();
    if path_bytes >= MAX_SOCKET_PATH_LEN {
        return Err(TransportError::PathTooLong {
            path,
            len: path_bytes,
            max: MAX_SOCKET_PATH_LEN,
        });
    }

    // A socket left behind by a crashed agent is replaced; any other file is not.
    if let Ok(metadata) = std::fs::symlink_metadata(&path) {
        if !metadata.file_type().is_socket() {
            return Err(bind_err(
                &path,
                std::io::Error::new(
                    std::io::ErrorKind::AlreadyExists,
                    "existing path is not a unix socket",
                ),
            ));
        }
        debug!(?path, "removing stale socket");
        std::fs::remove_file(&path).map_err(|e| bind_err(&path, e))?;
    }

    let listener = UnixListener::bind(&path).map_err(|e| bind_err(&path, e))?;
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(mode))
        .map_err(|e| bind_err(&path, e))?;
    let created = std::fs::symlink_metadata(&path).map_err(|e| bind_err(&path, e))?;

    info!(?path, "listening on unix domain socket");
    Ok(UnixSocketFile {
        listener,
        created_inode: (created.dev(), created.ino()),
        path,
    })
}

#[cfg(unix)]
impl Drop for UnixSocketFile {
    fn drop(&mut self) {
        let Ok(metadata) = std::fs::symlink_metadata(&self.path) else {
            return;
        };
        let (dev, ino) = self.created_inode;
        if metadata.file_type().is_socket() && metadata.dev() == dev && metadata.ino() == ino {
            debug!(path = ?self.path, "cleaning up socket file");
            let _ = std::fs::remove_file(&self.path);
        } else {
            debug!(path = ?self.path, "socket path identity changed; skipping cleanup");
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::traits::ByteStream;

    fn temp_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("pinwire-{tag}-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn unix_bind_accept_connect() {
        let dir = temp_dir("listen");
        let sock_path = dir.join("agent.sock");
        let endpoint = Endpoint::Unix(sock_path.clone());

        let listener = StreamListener::bind(&endpoint).unwrap();
        assert!(sock_path.exists());

        let client_endpoint = endpoint.clone();
        let handle = std::thread::spawn(move || {
            let mut client = crate::endpoint::connect(&client_endpoint).unwrap();
            client.write_bytes(b"hello").unwrap();
            client.flush().unwrap();
        });

        let mut server = listener.accept().unwrap();
        let mut got = Vec::new();
        let mut buf = [0u8; 8];
        while got.len() < 5 {
            let n = server.read_into(&mut buf).unwrap();
            got.extend_from_slice(&buf[..n]);
        }
        assert_eq!(got, b"hello");
        handle.join().unwrap();

        drop(listener);
        assert!(!sock_path.exists(), "socket file should be cleaned up on drop");
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn tcp_listener_reports_bound_port() {
        let listener = StreamListener::bind(&Endpoint::Tcp("127.0.0.1:0".to_string())).unwrap();
        match listener.local_endpoint().unwrap() {
            Endpoint::Tcp(addr) => assert!(!addr.ends_with(":0")),
            other => panic!("unexpected endpoint {other}"),
        }
    }

    #[test]
    fn unix_path_too_long() {
        let long_path = PathBuf::from("/tmp/".to_string() + &"a".repeat(200) + ".sock");
        let result = StreamListener::bind(&Endpoint::Unix(long_path));
        assert!(matches!(result, Err(TransportError::PathTooLong { .. })));
    }

    #[test]
    fn unix_bind_permissions_hardened() {
        let dir = temp_dir("perms");
        let sock_path = dir.join("perm.sock");

        let listener = StreamListener::bind(&Endpoint::Unix(sock_path.clone())).unwrap();
        let mode = std::fs::metadata(&sock_path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);

        drop(listener);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn unix_bind_rejects_regular_file() {
        let dir = temp_dir("regular");
        let sock_path = dir.join("not-a-socket.sock");
        std::fs::write(&sock_path, b"regular-file").unwrap();

        let result = StreamListener::bind(&Endpoint::Unix(sock_path.clone()));
        assert!(matches!(result, Err(TransportError::Bind { .. })));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn serial_endpoint_cannot_listen() {
        let endpoint = Endpoint::Serial {
            path: PathBuf::from("/dev/ttyUSB0"),
            baud: 115200,
        };
        assert!(matches!(
            StreamListener::bind(&endpoint),
            Err(TransportError::Bind { .. })
        ));
    }
}
