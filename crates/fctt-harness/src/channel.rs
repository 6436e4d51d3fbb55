//! Framed request/response channel over a Unix domain socket.

use std::io;
use std::net::Shutdown;
use std::os::unix::net::UnixStream;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use serde_json::Value;
use socket2::{Domain, SockAddr, Socket, Type};
use thiserror::Error;
use tracing::debug;

use crate::framing::{self, FrameError};
use crate::wait::{PollStep, wait_until};

const CHANNEL_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::channel");

/// Errors raised by [`FramedChannel`].
#[derive(Debug, Error)]
pub enum ChannelError {
    /// The socket never appeared or never accepted a connection.
    #[error("could not connect to '{path}' within {timeout:?}")]
    ConnectTimeout {
        /// Socket path.
        path: Utf8PathBuf,
        /// Bound that elapsed.
        timeout: Duration,
        /// Last connection failure, if any attempt was made.
        #[source]
        source: Option<io::Error>,
    },
    /// Configuring the socket failed.
    #[error("failed to configure socket '{path}': {source}")]
    Configure {
        /// Socket path.
        path: Utf8PathBuf,
        /// Underlying failure.
        #[source]
        source: io::Error,
    },
    /// No reply arrived within the call's bound.
    #[error("no reply on '{path}' within {timeout:?}")]
    Timeout {
        /// Socket path.
        path: Utf8PathBuf,
        /// Bound that elapsed.
        timeout: Duration,
    },
    /// The peer closed the connection before replying.
    #[error("'{path}' closed the connection before replying")]
    Closed {
        /// Socket path.
        path: Utf8PathBuf,
    },
    /// Reading, writing or decoding a frame failed.
    #[error("frame exchange on '{path}' failed: {source}")]
    Frame {
        /// Socket path.
        path: Utf8PathBuf,
        /// Underlying failure.
        #[source]
        source: FrameError,
    },
}

/// Client end of a framed Unix socket.
///
/// One request is in flight at a time; open separate channels for
/// concurrent callers. The connection is opened lazily and kept for
/// subsequent calls until [`FramedChannel::close`].
#[derive(Debug)]
pub struct FramedChannel {
    path: Utf8PathBuf,
    connect_timeout: Duration,
    stream: Option<UnixStream>,
}

impl FramedChannel {
    /// Prepares a channel to `path` without connecting.
    #[must_use]
    pub fn new(path: impl Into<Utf8PathBuf>, connect_timeout: Duration) -> Self {
        Self {
            path: path.into(),
            connect_timeout,
            stream: None,
        }
    }

    /// Socket path the channel targets.
    #[must_use]
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// Returns `true` while a connection is open.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    /// Waits for the socket path to exist, then connects.
    ///
    /// Connection refusals while the peer is still binding are retried until
    /// the connect bound elapses.
    pub fn connect(&mut self) -> Result<(), ChannelError> {
        let mut last_error = None;
        let stream = wait_until(self.connect_timeout, PollStep::FILESYSTEM, || {
            if !self.path.exists() {
                return None;
            }
            match connect_unix(&self.path, self.connect_timeout) {
                Ok(stream) => Some(stream),
                Err(error) => {
                    last_error = Some(error);
                    None
                }
            }
        });
        match stream {
            Some(connected) => {
                debug!(target: CHANNEL_TARGET, path = %self.path, "channel connected");
                self.stream = Some(connected);
                Ok(())
            }
            None => Err(ChannelError::ConnectTimeout {
                path: self.path.clone(),
                timeout: self.connect_timeout,
                source: last_error,
            }),
        }
    }

    /// Sends `message` and waits up to `timeout` for the framed reply.
    ///
    /// A timeout is reported, never retried; the connection is dropped so the
    /// next call starts from a clean stream.
    pub fn request(&mut self, message: &Value, timeout: Duration) -> Result<Value, ChannelError> {
        let result = self.exchange(message, timeout);
        if result.is_err() {
            self.close();
        }
        result
    }

    /// Sends `message` without waiting for any response.
    pub fn notification(&mut self, message: &Value) -> Result<(), ChannelError> {
        let stream = self.stream()?;
        let result = framing::write_json(stream, message);
        result.map_err(|source| {
            self.close();
            ChannelError::Frame {
                path: self.path.clone(),
                source,
            }
        })
    }

    /// Closes the connection, if open.
    pub fn close(&mut self) {
        if let Some(stream) = self.stream.take()
            && let Err(error) = stream.shutdown(Shutdown::Both)
        {
            debug!(target: CHANNEL_TARGET, path = %self.path, %error, "peer already gone");
        }
    }

    fn exchange(&mut self, message: &Value, timeout: Duration) -> Result<Value, ChannelError> {
        let path = self.path.clone();
        let stream = self.stream()?;
        stream
            .set_read_timeout(Some(timeout))
            .map_err(|source| ChannelError::Configure {
                path: path.clone(),
                source,
            })?;
        let frame_error = |source: FrameError| {
            if source.is_timeout() {
                ChannelError::Timeout {
                    path: path.clone(),
                    timeout,
                }
            } else {
                ChannelError::Frame {
                    path: path.clone(),
                    source,
                }
            }
        };
        framing::write_json(stream, message).map_err(frame_error)?;
        match framing::read_json(stream).map_err(frame_error)? {
            Some(reply) => Ok(reply),
            None => Err(ChannelError::Closed { path: path.clone() }),
        }
    }

    fn stream(&mut self) -> Result<&mut UnixStream, ChannelError> {
        if self.stream.is_none() {
            self.connect()?;
        }
        self.stream.as_mut().ok_or_else(|| ChannelError::Closed {
            path: self.path.clone(),
        })
    }
}

impl Drop for FramedChannel {
    fn drop(&mut self) {
        self.close();
    }
}

fn connect_unix(path: &Utf8Path, timeout: Duration) -> io::Result<UnixStream> {
    let socket = Socket::new(Domain::UNIX, Type::STREAM, None)?;
    let address = SockAddr::unix(path.as_std_path())?;
    socket.connect_timeout(&address, timeout)?;
    Ok(socket.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::{fixture, rstest};
    use serde_json::json;
    use std::os::unix::net::UnixListener;
    use std::thread;
    use tempfile::TempDir;

    #[fixture]
    fn socket_dir() -> TempDir {
        TempDir::new().expect("temp dir")
    }

    fn socket_path(dir: &TempDir) -> Utf8PathBuf {
        Utf8PathBuf::from_path_buf(dir.path().join("control.soc")).expect("utf-8 path")
    }

    fn serve_once<F>(listener: UnixListener, respond: F) -> thread::JoinHandle<Option<Value>>
    where
        F: FnOnce(&mut UnixStream, Value) + Send + 'static,
    {
        thread::spawn(move || {
            let (mut stream, _) = listener.accept().expect("accept");
            let request = framing::read_json(&mut stream).expect("read request")?;
            respond(&mut stream, request.clone());
            Some(request)
        })
    }

    #[rstest]
    fn request_round_trips_through_peer(socket_dir: TempDir) {
        let path = socket_path(&socket_dir);
        let listener = UnixListener::bind(&path).expect("bind");
        let server = serve_once(listener, |stream, request| {
            let reply = json!({"module": request["module"], "action": request["action"], "kind": "reply"});
            framing::write_json(stream, &reply).expect("write reply");
        });

        let mut channel = FramedChannel::new(&path, Duration::from_secs(2));
        let reply = channel
            .request(&json!({"module": "about", "action": "get"}), Duration::from_secs(2))
            .expect("reply");
        assert_eq!(reply, json!({"module": "about", "action": "get", "kind": "reply"}));
        assert!(channel.is_connected());
        let seen = server.join().expect("server thread");
        assert_eq!(seen, Some(json!({"module": "about", "action": "get"})));
    }

    #[rstest]
    fn connect_waits_for_late_socket(socket_dir: TempDir) {
        let path = socket_path(&socket_dir);
        let late = path.clone();
        let binder = thread::spawn(move || {
            thread::sleep(Duration::from_millis(300));
            UnixListener::bind(&late).expect("bind late listener")
        });
        let mut channel = FramedChannel::new(&path, Duration::from_secs(5));
        channel.connect().expect("connect after socket appears");
        drop(binder.join().expect("binder thread"));
    }

    #[rstest]
    fn connect_times_out_without_socket(socket_dir: TempDir) {
        let mut channel = FramedChannel::new(socket_path(&socket_dir), Duration::from_millis(300));
        let error = channel.connect().expect_err("no socket");
        assert!(matches!(error, ChannelError::ConnectTimeout { source: None, .. }));
    }

    #[rstest]
    fn silent_peer_surfaces_timeout(socket_dir: TempDir) {
        let path = socket_path(&socket_dir);
        let listener = UnixListener::bind(&path).expect("bind");
        let server = serve_once(listener, |_, _| thread::sleep(Duration::from_millis(500)));

        let mut channel = FramedChannel::new(&path, Duration::from_secs(2));
        let error = channel
            .request(&json!({"module": "about"}), Duration::from_millis(100))
            .expect_err("timeout");
        assert!(matches!(error, ChannelError::Timeout { .. }), "{error:?}");
        assert!(!channel.is_connected());
        server.join().expect("server thread");
    }

    #[rstest]
    fn notification_does_not_wait_for_reply(socket_dir: TempDir) {
        let path = socket_path(&socket_dir);
        let listener = UnixListener::bind(&path).expect("bind");
        let server = serve_once(listener, |_, _| {});

        let mut channel = FramedChannel::new(&path, Duration::from_secs(2));
        channel
            .notification(&json!({"module": "updater", "action": "run", "kind": "notification"}))
            .expect("notify");
        let seen = server.join().expect("server thread");
        assert_eq!(seen.and_then(|value| value.get("kind").cloned()), Some(json!("notification")));
    }

    #[rstest]
    fn close_after_peer_hangs_up_disconnects_quietly(socket_dir: TempDir) {
        let path = socket_path(&socket_dir);
        let listener = UnixListener::bind(&path).expect("bind");
        let mut channel = FramedChannel::new(&path, Duration::from_secs(2));
        channel.connect().expect("connect");
        drop(listener.accept().expect("accept"));

        channel.close();
        channel.close();
        assert!(!channel.is_connected());
    }
}
