//! Threaded unix-socket server for length-prefixed JSON peers.
//!
//! Both the notification listener and the stand-in controller serve sockets
//! the same way: bind with stale-socket recovery, accept without blocking so
//! the exit flag is honoured, hand each connection to its own thread and
//! remove the socket file on the way out.

use std::fs;
use std::io;
use std::os::unix::fs::FileTypeExt;
use std::os::unix::net::{UnixListener, UnixStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use thiserror::Error;
use tracing::{info, warn};

const SERVER_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::server");
const ACCEPT_BACKOFF: Duration = Duration::from_millis(25);
const ERROR_BACKOFF: Duration = Duration::from_millis(150);

/// Errors raised while binding a server socket.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The socket could not be bound or configured.
    #[error("failed to bind socket {path}: {source}")]
    Bind {
        /// Socket path.
        path: Utf8PathBuf,
        /// Underlying failure.
        #[source]
        source: io::Error,
    },
    /// Another live process serves the socket.
    #[error("socket {path} is already in use")]
    SocketInUse {
        /// Socket path.
        path: Utf8PathBuf,
    },
    /// The path exists but is not a socket.
    #[error("{path} exists and is not a socket")]
    NotSocket {
        /// Offending path.
        path: Utf8PathBuf,
    },
}

/// A bound, non-blocking unix socket.
#[derive(Debug)]
pub struct SocketServer {
    path: Utf8PathBuf,
    listener: UnixListener,
}

impl SocketServer {
    /// Binds `path`, replacing a stale socket file left by a dead server.
    pub fn bind(path: &Utf8Path) -> Result<Self, ServerError> {
        clear_stale_socket(path)?;
        let bind_error = |source| ServerError::Bind {
            path: path.to_owned(),
            source,
        };
        let listener = UnixListener::bind(path).map_err(bind_error)?;
        listener.set_nonblocking(true).map_err(bind_error)?;
        Ok(Self {
            path: path.to_owned(),
            listener,
        })
    }

    /// Socket path.
    #[must_use]
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// Accepts connections until `exit` is set, running `handler` on a new
    /// thread for each. Accepted streams are switched back to blocking mode.
    pub fn serve<F>(self, exit: &AtomicBool, handler: F)
    where
        F: Fn(UnixStream) + Send + Sync + 'static,
    {
        info!(target: SERVER_TARGET, path = %self.path, "socket server active");
        let handler = Arc::new(handler);
        let mut last_error = None::<io::ErrorKind>;
        while !exit.load(Ordering::SeqCst) {
            match self.listener.accept() {
                Ok((stream, _)) => {
                    last_error = None;
                    if let Err(error) = stream.set_nonblocking(false) {
                        warn!(target: SERVER_TARGET, %error, "cannot switch connection to blocking mode");
                        continue;
                    }
                    let handler = Arc::clone(&handler);
                    thread::spawn(move || (*handler)(stream));
                }
                Err(error) if error.kind() == io::ErrorKind::WouldBlock => {
                    thread::sleep(ACCEPT_BACKOFF);
                }
                Err(error) => {
                    let kind = error.kind();
                    if last_error != Some(kind) {
                        warn!(target: SERVER_TARGET, %error, "accept error");
                    }
                    last_error = Some(kind);
                    thread::sleep(ERROR_BACKOFF);
                }
            }
        }
        if let Err(error) = fs::remove_file(&self.path)
            && error.kind() != io::ErrorKind::NotFound
        {
            warn!(target: SERVER_TARGET, path = %self.path, %error, "failed to remove socket");
        }
    }
}

fn clear_stale_socket(path: &Utf8Path) -> Result<(), ServerError> {
    let bind_error = |source| ServerError::Bind {
        path: path.to_owned(),
        source,
    };
    let metadata = match fs::symlink_metadata(path) {
        Ok(metadata) => metadata,
        Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(source) => return Err(bind_error(source)),
    };
    if !metadata.file_type().is_socket() {
        return Err(ServerError::NotSocket {
            path: path.to_owned(),
        });
    }
    match UnixStream::connect(path) {
        Ok(_stream) => Err(ServerError::SocketInUse {
            path: path.to_owned(),
        }),
        Err(error)
            if matches!(
                error.kind(),
                io::ErrorKind::ConnectionRefused | io::ErrorKind::NotFound
            ) =>
        {
            fs::remove_file(path).map_err(bind_error)
        }
        Err(source) => Err(bind_error(source)),
    }
}
