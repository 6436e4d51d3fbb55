//! RPC bus access through `ubusd`.
//!
//! Lookups and method calls speak the bus's own socket protocol, so call
//! arguments are bounded only by the broker's message limit
//! ([`MAX_MESSAGE_LEN`]). Event subscriptions run the `ubus listen`
//! command-line client, whose JSON output is parsed line by line.

mod blob;
mod session;
#[cfg(test)]
pub(crate) mod stub;
mod wire;

use std::ffi::OsString;
use std::io::BufReader;
use std::process::{Child, ChildStdout, Command, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use serde_json::Value;
use tracing::{debug, warn};

use super::{BusError, RpcBusConnector, RpcBusSession, RpcEvent, RpcEventStream};
use crate::wait::{PollStep, wait_until};
use session::UbusSession;

pub use blob::BlobError;
pub use wire::MAX_MESSAGE_LEN;

const UBUS_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::bus::ubus");

/// Poll step while waiting for an object to be registered.
const LOOKUP_POLL: PollStep = PollStep::Fixed(Duration::from_millis(50));

/// [`RpcBusConnector`] for the bus served on a `ubusd` socket.
#[derive(Debug, Clone)]
pub struct UbusConnector {
    program: OsString,
    socket: Utf8PathBuf,
    call_timeout: Duration,
}

impl UbusConnector {
    /// Targets the bus listening on `socket`.
    ///
    /// `program` is the `ubus` client used for event subscriptions; calls
    /// are bounded by `call_timeout`.
    #[must_use]
    pub fn new(program: impl Into<OsString>, socket: impl Into<Utf8PathBuf>, call_timeout: Duration) -> Self {
        Self {
            program: program.into(),
            socket: socket.into(),
            call_timeout,
        }
    }

    /// Bus socket.
    #[must_use]
    pub fn socket(&self) -> &Utf8Path {
        &self.socket
    }
}

impl RpcBusConnector for UbusConnector {
    fn wait_for(&self, object: &str, timeout: Duration) -> Result<(), BusError> {
        let registered = wait_until(timeout, LOOKUP_POLL, || {
            match UbusSession::open(&self.socket, timeout).and_then(|mut session| session.lookup(object)) {
                Ok(Some(_)) => Some(()),
                Ok(None) => None,
                Err(error) => {
                    debug!(target: UBUS_TARGET, object, %error, "lookup failed; retrying");
                    None
                }
            }
        });
        registered.ok_or_else(|| BusError::Timeout {
            operation: format!("wait_for {object}"),
            timeout,
        })
    }

    fn connect(&self) -> Result<Box<dyn RpcBusSession>, BusError> {
        Ok(Box::new(UbusSession::open(&self.socket, self.call_timeout)?))
    }

    fn listen(&self, pattern: &str) -> Result<Box<dyn RpcEventStream>, BusError> {
        let mut command = Command::new(&self.program);
        command
            .arg("-s")
            .arg(self.socket.as_str())
            .arg("listen")
            .arg(pattern)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null());
        let mut child = command.spawn().map_err(|source| BusError::Spawn {
            program: self.program.to_string_lossy().into_owned(),
            source,
        })?;
        let Some(stdout) = child.stdout.take() else {
            // Only reachable if the pipe was not requested.
            stop_listener(&mut child);
            return Err(BusError::Disconnected("listen output unavailable".to_owned()));
        };
        let (sender, receiver) = mpsc::channel();
        thread::spawn(move || forward_events(stdout, &sender));
        debug!(target: UBUS_TARGET, pattern, "listening for bus events");
        Ok(Box::new(UbusEventStream { child, receiver }))
    }
}

struct UbusEventStream {
    child: Child,
    receiver: Receiver<RpcEvent>,
}

impl RpcEventStream for UbusEventStream {
    fn next_event(&mut self, timeout: Duration) -> Result<Option<RpcEvent>, BusError> {
        match self.receiver.recv_timeout(timeout) {
            Ok(event) => Ok(Some(event)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(BusError::Disconnected(
                "ubus listen exited".to_owned(),
            )),
        }
    }
}

impl Drop for UbusEventStream {
    fn drop(&mut self) {
        stop_listener(&mut self.child);
    }
}

fn stop_listener(child: &mut Child) {
    if let Err(error) = child.kill() {
        debug!(target: UBUS_TARGET, %error, "listen client already gone");
    }
    if let Err(error) = child.wait() {
        debug!(target: UBUS_TARGET, %error, "failed to reap listen client");
    }
}

fn forward_events(stdout: ChildStdout, sender: &mpsc::Sender<RpcEvent>) {
    let values = serde_json::Deserializer::from_reader(BufReader::new(stdout)).into_iter::<Value>();
    for value in values {
        match value {
            Ok(record) => {
                for event in split_events(record) {
                    if sender.send(event).is_err() {
                        return;
                    }
                }
            }
            Err(error) => {
                warn!(target: UBUS_TARGET, %error, "discarding unreadable bus event");
                return;
            }
        }
    }
}

/// Splits a `{ "<event name>": <data> }` record into events.
fn split_events(record: Value) -> Vec<RpcEvent> {
    match record {
        Value::Object(map) => map
            .into_iter()
            .map(|(name, data)| RpcEvent { name, data })
            .collect(),
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;
    use super::stub::StubBus;
    use tempfile::TempDir;

    fn socket_in(dir: &TempDir) -> Utf8PathBuf {
        Utf8PathBuf::from_path_buf(dir.path().join("ubus.soc")).expect("utf-8 path")
    }

    #[rstest]
    fn listen_records_split_into_events() {
        let events = split_events(json!({"foris-controller-updater": {"action": "run"}}));
        assert_eq!(
            events,
            vec![RpcEvent {
                name: "foris-controller-updater".to_owned(),
                data: json!({"action": "run"}),
            }]
        );
    }

    #[rstest]
    fn calls_round_trip_through_the_bus_socket() {
        let dir = TempDir::new().expect("temp dir");
        let socket = socket_in(&dir);
        let bus = StubBus::serve(&socket, &["foris-controller-about"], |_, _| {
            vec![json!({"data": "{\"data\": "}), json!({"data": "{}}"})]
        });
        let connector = UbusConnector::new("ubus", socket, Duration::from_secs(5));

        let mut session = connector.connect().expect("connect");
        let responses = session
            .call("foris-controller-about", "get", &json!({"final": true, "n": 3}))
            .expect("call");
        session.disconnect();

        assert_eq!(responses, vec![json!({"data": "{\"data\": "}), json!({"data": "{}}"})]);
        let calls = bus.calls();
        let call = calls.first().expect("one call");
        assert_eq!(call.object, "foris-controller-about");
        assert_eq!(call.method, "get");
        assert_eq!(call.payload, json!({"final": true, "n": 3}));
    }

    #[rstest]
    fn unknown_objects_report_not_found() {
        let dir = TempDir::new().expect("temp dir");
        let socket = socket_in(&dir);
        let _bus = StubBus::serve(&socket, &[], |_, _| Vec::new());
        let connector = UbusConnector::new("ubus", socket, Duration::from_secs(5));

        let mut session = connector.connect().expect("connect");
        let error = session
            .call("foris-controller-missing", "get", &json!({}))
            .expect_err("object is not registered");
        assert!(matches!(error, BusError::Status { code: 4, .. }), "{error:?}");
    }

    #[rstest]
    fn wait_for_returns_once_the_object_is_registered() {
        let dir = TempDir::new().expect("temp dir");
        let socket = socket_in(&dir);
        let _bus = StubBus::serve(&socket, &["foris-controller-about"], |_, _| Vec::new());
        let connector = UbusConnector::new("ubus", socket, Duration::from_secs(5));

        connector
            .wait_for("foris-controller-about", Duration::from_secs(2))
            .expect("registered");
        let error = connector
            .wait_for("foris-controller-missing", Duration::from_millis(150))
            .expect_err("never registered");
        assert!(matches!(error, BusError::Timeout { .. }));
    }

    #[rstest]
    fn wait_for_without_a_bus_times_out() {
        let dir = TempDir::new().expect("temp dir");
        let connector = UbusConnector::new("ubus", socket_in(&dir), Duration::from_secs(1));
        let error = connector
            .wait_for("foris-controller-about", Duration::from_millis(100))
            .expect_err("no bus");
        assert!(matches!(error, BusError::Timeout { .. }));
    }

    #[rstest]
    fn missing_listen_program_is_a_spawn_error() {
        let connector = UbusConnector::new("/nonexistent/ubus", "/tmp/none.soc", Duration::from_secs(1));
        let error = connector.listen("foris-controller-*").err().expect("spawn should fail");
        assert!(matches!(error, BusError::Spawn { .. }));
    }
}
