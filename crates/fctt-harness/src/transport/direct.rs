//! Requests over the controller's own framed control socket.

use std::ffi::OsString;
use std::fs;
use std::io;
use std::time::Duration;

use camino::Utf8PathBuf;
use fctt_config::TransportKind;
use fctt_messages::{Reply, Request};
use tracing::{debug, warn};

use super::{BusTransport, TRANSPORT_TARGET, TransportError};
use crate::channel::FramedChannel;

/// Adapter for the `unix-socket` transport.
///
/// There is no broker. Every call opens a fresh [`FramedChannel`] to the
/// control socket, so calls from separate adapters never share a stream.
/// Bodies of any size travel in one frame.
#[derive(Debug)]
pub struct DirectSocketTransport {
    control_socket: Utf8PathBuf,
    notification_socket: Utf8PathBuf,
    connect_timeout: Duration,
    call_timeout: Duration,
}

impl DirectSocketTransport {
    /// Targets the controller serving `control_socket` and pushing
    /// notifications to `notification_socket`.
    #[must_use]
    pub fn new(
        control_socket: impl Into<Utf8PathBuf>,
        notification_socket: impl Into<Utf8PathBuf>,
        connect_timeout: Duration,
        call_timeout: Duration,
    ) -> Self {
        Self {
            control_socket: control_socket.into(),
            notification_socket: notification_socket.into(),
            connect_timeout,
            call_timeout,
        }
    }
}

impl BusTransport for DirectSocketTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::UnixSocket
    }

    fn start_bus(&mut self) -> Result<(), TransportError> {
        Ok(())
    }

    fn stop_bus(&mut self) {
        for path in [&self.control_socket, &self.notification_socket] {
            match fs::remove_file(path) {
                Err(error) if error.kind() != io::ErrorKind::NotFound => {
                    warn!(target: TRANSPORT_TARGET, %path, %error, "failed to remove socket");
                }
                _ => {}
            }
        }
    }

    fn listener_args(&self) -> Vec<OsString> {
        vec![
            "unix-socket".into(),
            "--socket".into(),
            self.notification_socket.as_str().into(),
        ]
    }

    fn daemon_args(&self) -> Vec<OsString> {
        vec![
            "unix-socket".into(),
            "--path".into(),
            self.control_socket.as_str().into(),
            "--notifications-path".into(),
            self.notification_socket.as_str().into(),
        ]
    }

    fn call(&mut self, request: &Request) -> Result<Reply, TransportError> {
        let mut channel = FramedChannel::new(self.control_socket.clone(), self.connect_timeout);
        let response = channel.request(&request.to_wire(), self.call_timeout)?;
        debug!(
            target: TRANSPORT_TARGET,
            module = %request.module,
            action = %request.action,
            "direct socket reply received"
        );
        serde_json::from_value(response).map_err(TransportError::MalformedReply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framing;
    use rstest::rstest;
    use serde_json::json;
    use std::os::unix::net::UnixListener;
    use std::thread;
    use tempfile::TempDir;

    #[rstest]
    fn call_echoes_module_and_action() {
        let dir = TempDir::new().expect("temp dir");
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).expect("utf-8 path");
        let control = root.join("control.soc");
        let listener = UnixListener::bind(&control).expect("bind control socket");
        let controller = thread::spawn(move || {
            let (mut stream, _) = listener.accept().expect("accept");
            let request = framing::read_json(&mut stream)
                .expect("read request")
                .expect("request frame");
            let reply = json!({
                "module": request["module"],
                "action": request["action"],
                "kind": "reply",
                "data": {"ok": true},
            });
            framing::write_json(&mut stream, &reply).expect("write reply");
            request
        });

        let mut transport = DirectSocketTransport::new(
            &control,
            root.join("notifications.soc"),
            Duration::from_secs(2),
            Duration::from_secs(2),
        );
        let reply = transport
            .call(&Request::new("about", "get"))
            .expect("reply");
        let seen = controller.join().expect("controller thread");

        assert_eq!(seen, json!({"module": "about", "action": "get", "kind": "request"}));
        assert_eq!(
            serde_json::to_value(&reply).expect("encode"),
            json!({"module": "about", "action": "get", "kind": "reply", "data": {"ok": true}})
        );
    }

    #[rstest]
    fn daemon_flags_name_both_sockets() {
        let transport = DirectSocketTransport::new(
            "/tmp/c.soc",
            "/tmp/n.soc",
            Duration::from_secs(1),
            Duration::from_secs(1),
        );
        assert_eq!(
            transport.daemon_args(),
            ["unix-socket", "--path", "/tmp/c.soc", "--notifications-path", "/tmp/n.soc"]
                .map(OsString::from)
        );
        assert_eq!(
            transport.listener_args(),
            ["unix-socket", "--socket", "/tmp/n.soc"].map(OsString::from)
        );
    }
}
