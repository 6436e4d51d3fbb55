//! Requests over the RPC bus.
//!
//! Each controller module is exported as the bus object
//! `foris-controller-<module>` and each action as a method on it. Bodies are
//! planned into [`ChunkEnvelope`] calls; the reply is the concatenation of the
//! string `data` fields of the last call's response fragments.

use std::ffi::OsString;
use std::fs;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use camino::Utf8PathBuf;
use fctt_config::TransportKind;
use fctt_messages::{ChunkEnvelope, Reply, Request};
use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{Broker, BusTransport, TRANSPORT_TARGET, TransportError};
use crate::bus::{BusError, RpcBusConnector, RpcBusSession};
use crate::wait::PollStep;

const OBJECT_PREFIX: &str = "foris-controller-";

/// Bus object exporting `module`.
#[must_use]
pub fn object_name(module: &str) -> String {
    format!("{OBJECT_PREFIX}{module}")
}

/// Strips the object prefix, returning the module name.
#[must_use]
pub fn module_of_object(object: &str) -> Option<&str> {
    object
        .strip_prefix(OBJECT_PREFIX)
        .filter(|module| !module.is_empty())
}

/// Adapter for the `ubus` transport.
pub struct RpcBusTransport {
    connector: Arc<dyn RpcBusConnector>,
    socket: Utf8PathBuf,
    client_program: OsString,
    module_wait: Duration,
    broker: Option<(Broker, Duration)>,
}

impl RpcBusTransport {
    /// Calls through `connector` on the bus at `socket`.
    ///
    /// `client_program` is forwarded to the listener so it reaches the bus
    /// the same way.
    #[must_use]
    pub fn new(
        connector: Arc<dyn RpcBusConnector>,
        socket: impl Into<Utf8PathBuf>,
        client_program: impl Into<OsString>,
        module_wait: Duration,
    ) -> Self {
        Self {
            connector,
            socket: socket.into(),
            client_program: client_program.into(),
            module_wait,
            broker: None,
        }
    }

    /// Starts `broker` in [`BusTransport::start_bus`], waiting up to
    /// `timeout` for its socket.
    #[must_use]
    pub fn with_broker(mut self, broker: Broker, timeout: Duration) -> Self {
        self.broker = Some((broker, timeout));
        self
    }

    /// Waits for the module's object, proceeding regardless of the outcome.
    fn await_module(&self, object: &str) {
        if let Err(error) = self.connector.wait_for(object, self.module_wait) {
            warn!(
                target: TRANSPORT_TARGET,
                object,
                timeout = ?self.module_wait,
                %error,
                "module not confirmed on the bus; calling anyway"
            );
        }
    }

    /// Runs `calls` on one session and returns the last call's fragments.
    fn exchange(
        &self,
        object: &str,
        method: &str,
        calls: &[ChunkEnvelope],
    ) -> Result<Vec<Value>, TransportError> {
        let mut session = self.connector.connect()?;
        let result = send_all(session.as_mut(), object, method, calls);
        session.disconnect();
        result
    }
}

impl BusTransport for RpcBusTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Ubus
    }

    fn start_bus(&mut self) -> Result<(), TransportError> {
        let Some((broker, timeout)) = self.broker.as_mut() else {
            return Ok(());
        };
        remove_socket(&self.socket);
        let socket = self.socket.clone();
        broker.start(socket.as_str(), *timeout, PollStep::Fixed(Duration::from_millis(300)), || {
            socket.exists()
        })
    }

    fn stop_bus(&mut self) {
        if let Some((broker, _)) = self.broker.as_mut() {
            broker.stop();
        }
        remove_socket(&self.socket);
    }

    fn listener_args(&self) -> Vec<OsString> {
        vec![
            "ubus".into(),
            "--socket".into(),
            self.socket.as_str().into(),
            "--ubus".into(),
            self.client_program.clone(),
        ]
    }

    fn daemon_args(&self) -> Vec<OsString> {
        vec!["ubus".into(), "--path".into(), self.socket.as_str().into()]
    }

    fn call(&mut self, request: &Request) -> Result<Reply, TransportError> {
        let object = object_name(&request.module);
        self.await_module(&object);
        let body = request
            .data
            .clone()
            .unwrap_or_else(|| Value::Object(serde_json::Map::new()));
        let calls = ChunkEnvelope::plan(&body, Uuid::new_v4());
        debug!(
            target: TRANSPORT_TARGET,
            object = %object,
            method = %request.action,
            calls = calls.len(),
            "calling over the rpc bus"
        );
        let fragments = self.exchange(&object, &request.action, &calls)?;
        reassemble_reply(request, &fragments)
    }

    fn raw_call(
        &mut self,
        request: &Request,
        envelope: &ChunkEnvelope,
    ) -> Result<Option<Reply>, TransportError> {
        let object = object_name(&request.module);
        self.await_module(&object);
        let fragments = self.exchange(&object, &request.action, std::slice::from_ref(envelope))?;
        if fragments.is_empty() {
            return Ok(None);
        }
        reassemble_reply(request, &fragments).map(Some)
    }
}

fn send_all(
    session: &mut dyn RpcBusSession,
    object: &str,
    method: &str,
    calls: &[ChunkEnvelope],
) -> Result<Vec<Value>, TransportError> {
    let mut fragments = Vec::new();
    for call in calls {
        let payload = serde_json::to_value(call).map_err(BusError::from)?;
        fragments = session.call(object, method, &payload)?;
    }
    Ok(fragments)
}

/// Builds the reply to `request` from the bus's response fragments.
///
/// Fragment `data` strings are concatenated in arrival order and parsed as
/// one JSON document. A top-level `errors` key yields an error reply, a
/// `data` key a data reply, anything else a bare acknowledgement.
pub fn reassemble_reply(request: &Request, fragments: &[Value]) -> Result<Reply, TransportError> {
    let mut text = String::new();
    for (index, fragment) in fragments.iter().enumerate() {
        let part = fragment
            .get("data")
            .and_then(Value::as_str)
            .ok_or(TransportError::MalformedFragment { index })?;
        text.push_str(part);
    }
    let body: Value = serde_json::from_str(&text).map_err(|source| TransportError::Reassembly {
        fragments: fragments.len(),
        source,
    })?;
    Ok(match body {
        Value::Object(mut map) => {
            if let Some(errors) = map.remove("errors") {
                let list = match errors {
                    Value::Array(items) => items,
                    other => vec![other],
                };
                Reply::with_errors(request, list)
            } else if let Some(data) = map.remove("data") {
                Reply::with_data(request, data)
            } else {
                Reply::ack(request)
            }
        }
        _ => Reply::ack(request),
    })
}

fn remove_socket(path: &Utf8PathBuf) {
    match fs::remove_file(path) {
        Err(error) if error.kind() != io::ErrorKind::NotFound => {
            warn!(target: TRANSPORT_TARGET, %path, %error, "failed to remove bus socket");
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{MockRpcBusConnector, MockRpcBusSession, StubBus, UbusConnector};
    use fctt_messages::CHUNK_SIZE;
    use rstest::rstest;
    use serde_json::json;
    use std::sync::Mutex;
    use tempfile::TempDir;

    type Recorded = Arc<Mutex<Vec<(String, String, Value)>>>;

    /// Connector whose sessions record every call and answer with `response`.
    fn recording_connector(response: Vec<Value>, wait_ok: bool) -> (MockRpcBusConnector, Recorded) {
        let recorded: Recorded = Arc::new(Mutex::new(Vec::new()));
        let mut connector = MockRpcBusConnector::new();
        connector.expect_wait_for().returning(move |object, timeout| {
            if wait_ok {
                Ok(())
            } else {
                Err(BusError::Timeout {
                    operation: format!("wait_for {object}"),
                    timeout,
                })
            }
        });
        let sink = Arc::clone(&recorded);
        connector.expect_connect().times(1).returning(move || {
            let mut session = MockRpcBusSession::new();
            let calls = Arc::clone(&sink);
            let fragments = response.clone();
            session.expect_call().returning(move |object, method, payload| {
                calls
                    .lock()
                    .expect("record lock")
                    .push((object.to_owned(), method.to_owned(), payload.clone()));
                Ok(fragments.clone())
            });
            session.expect_disconnect().times(1).return_const(());
            Ok(Box::new(session) as Box<dyn RpcBusSession>)
        });
        (connector, recorded)
    }

    fn transport(connector: MockRpcBusConnector) -> RpcBusTransport {
        RpcBusTransport::new(
            Arc::new(connector),
            "/tmp/ubus-test.soc",
            "ubus",
            Duration::from_millis(10),
        )
    }

    fn fragments(body: &str, pieces: usize) -> Vec<Value> {
        let step = body.len().div_ceil(pieces);
        body.as_bytes()
            .chunks(step)
            .map(|chunk| json!({"data": String::from_utf8(chunk.to_vec()).expect("ascii body")}))
            .collect()
    }

    #[rstest]
    fn small_bodies_are_one_final_call() {
        let (connector, recorded) =
            recording_connector(fragments(r#"{"data": {"ok": true}}"#, 1), true);
        let mut adapter = transport(connector);

        let request = Request::new("about", "get").with_data(json!({"x": 1}));
        let reply = adapter.call(&request).expect("reply");

        assert_eq!(reply, Reply::with_data(&request, json!({"ok": true})));
        let calls = recorded.lock().expect("record lock");
        assert_eq!(calls.len(), 1);
        let (object, method, payload) = calls.first().expect("one call");
        assert_eq!(object, "foris-controller-about");
        assert_eq!(method, "get");
        assert_eq!(payload["payload"], json!({"data": {"x": 1}}));
        assert_eq!(payload["final"], json!(true));
        assert_eq!(payload["multipart"], json!(false));
    }

    #[rstest]
    fn large_bodies_are_fragmented_with_one_request_id() {
        let (connector, recorded) = recording_connector(fragments("{}", 1), true);
        let mut adapter = transport(connector);

        let big = json!({"blob": "y".repeat(CHUNK_SIZE * 2)});
        let request = Request::new("updater", "set").with_data(big.clone());
        let reply = adapter.call(&request).expect("reply");
        assert_eq!(reply, Reply::ack(&request));

        let calls = recorded.lock().expect("record lock");
        let serialised = big.to_string();
        let expected_fragments = serialised.len().div_ceil(CHUNK_SIZE);
        assert_eq!(calls.len(), expected_fragments + 1);

        let ids: Vec<&Value> = calls.iter().map(|(_, _, payload)| &payload["request_id"]).collect();
        assert!(ids.windows(2).all(|pair| pair.first() == pair.last()));

        let (last, parts) = calls.split_last().expect("terminator");
        assert!(parts
            .iter()
            .all(|(_, _, payload)| payload["multipart"] == json!(true) && payload["final"] == json!(false)));
        assert_eq!(last.2["final"], json!(true));
        assert_eq!(last.2["payload"]["multipart_data"], json!(""));
        let joined: String = parts
            .iter()
            .filter_map(|(_, _, payload)| payload["payload"]["multipart_data"].as_str())
            .collect();
        assert_eq!(joined, serialised);
    }

    #[rstest]
    fn split_reply_fragments_are_concatenated() {
        let body = r#"{"data": {"version": "1.0", "serial": "0000000d30000000"}}"#;
        let (connector, _) = recording_connector(fragments(body, 3), true);
        let mut adapter = transport(connector);
        let request = Request::new("about", "get");
        let reply = adapter.call(&request).expect("reply");
        assert_eq!(
            reply.data,
            Some(json!({"version": "1.0", "serial": "0000000d30000000"}))
        );
    }

    #[rstest]
    fn application_errors_stay_in_the_reply() {
        let body = r#"{"errors": [{"description": "Incorrect input.", "stacktrace": ""}]}"#;
        let (connector, _) = recording_connector(fragments(body, 2), true);
        let mut adapter = transport(connector);
        let reply = adapter.call(&Request::new("wifi", "update_settings")).expect("reply");
        assert!(reply.is_error());
        assert_eq!(reply.data, None);
    }

    #[rstest]
    fn module_wait_timeout_is_not_fatal() {
        let (connector, recorded) = recording_connector(fragments(r#"{"data": {}}"#, 1), false);
        let mut adapter = transport(connector);
        adapter.call(&Request::new("about", "get")).expect("call proceeds");
        assert_eq!(recorded.lock().expect("record lock").len(), 1);
    }

    #[rstest]
    #[case(vec![json!({"data": "{\"a\""}), json!({"oops": 1})], 1)]
    #[case(vec![json!({"data": 7})], 0)]
    fn fragments_without_string_data_are_integrity_errors(
        #[case] response: Vec<Value>,
        #[case] index: usize,
    ) {
        let error = reassemble_reply(&Request::new("m", "a"), &response).expect_err("malformed");
        assert!(
            matches!(error, TransportError::MalformedFragment { index: found } if found == index),
            "{error:?}"
        );
    }

    #[rstest]
    fn unparsable_concatenation_names_fragment_count() {
        let response = vec![json!({"data": "{\"data\": "}), json!({"data": "[1, 2"})];
        let error = reassemble_reply(&Request::new("m", "a"), &response).expect_err("truncated");
        assert!(matches!(error, TransportError::Reassembly { fragments: 2, .. }));
    }

    #[rstest]
    fn raw_call_without_fragments_is_none() {
        let (connector, recorded) = recording_connector(Vec::new(), true);
        let mut adapter = transport(connector);
        let request = Request::new("updater", "set");
        let envelope = ChunkEnvelope::fragment("{\"a\":", Uuid::new_v4());
        let reply = adapter.raw_call(&request, &envelope).expect("raw call");
        assert!(reply.is_none());
        let calls = recorded.lock().expect("record lock");
        assert_eq!(calls.first().map(|call| &call.2["multipart"]), Some(&json!(true)));
    }

    /// Transport over a real bus connection to an in-process bus; only the
    /// final call of a request gets a reply.
    fn socket_transport(dir: &TempDir) -> (RpcBusTransport, StubBus) {
        let socket = Utf8PathBuf::from_path_buf(dir.path().join("ubus.soc")).expect("utf-8 path");
        let bus = StubBus::serve(&socket, &["foris-controller-updater"], |_, payload| {
            if payload["final"] == json!(true) {
                vec![json!({"data": "{\"data\": "}), json!({"data": "{\"ok\": true}}"})]
            } else {
                Vec::new()
            }
        });
        let connector = UbusConnector::new("ubus", socket.clone(), Duration::from_secs(5));
        let adapter = RpcBusTransport::new(Arc::new(connector), socket, "ubus", Duration::from_secs(2));
        (adapter, bus)
    }

    #[rstest]
    fn bodies_past_the_argument_limit_go_whole_over_the_socket() {
        let dir = TempDir::new().expect("temp dir");
        let (mut adapter, bus) = socket_transport(&dir);

        let body = json!({"blob": "x".repeat(200 * 1024)});
        let request = Request::new("updater", "set").with_data(body.clone());
        let reply = adapter.call(&request).expect("reply");

        assert_eq!(reply, Reply::with_data(&request, json!({"ok": true})));
        let calls = bus.calls();
        assert_eq!(calls.len(), 1);
        let call = calls.first().expect("one call");
        assert_eq!(call.object, "foris-controller-updater");
        assert_eq!(call.method, "set");
        assert_eq!(call.payload["payload"]["data"], body);
        assert_eq!(call.payload["multipart"], json!(false));
    }

    #[rstest]
    fn chunked_bodies_reassemble_on_the_bus() {
        let dir = TempDir::new().expect("temp dir");
        let (mut adapter, bus) = socket_transport(&dir);

        let body = json!({"blob": "z".repeat(CHUNK_SIZE * 2 + 1000)});
        let request = Request::new("updater", "set").with_data(body.clone());
        let reply = adapter.call(&request).expect("reply");
        assert_eq!(reply, Reply::with_data(&request, json!({"ok": true})));

        let calls = bus.calls();
        let serialised = body.to_string();
        assert_eq!(calls.len(), serialised.len().div_ceil(CHUNK_SIZE) + 1);
        let first_id = &calls.first().expect("calls").payload["request_id"];
        assert!(calls.iter().all(|call| &call.payload["request_id"] == first_id));

        let (last, parts) = calls.split_last().expect("terminator");
        assert_eq!(last.payload["final"], json!(true));
        assert_eq!(last.payload["payload"]["multipart_data"], json!(""));
        let joined: String = parts
            .iter()
            .filter_map(|call| call.payload["payload"]["multipart_data"].as_str())
            .collect();
        assert_eq!(joined, serialised);
    }

    #[rstest]
    #[case("foris-controller-updater", Some("updater"))]
    #[case("foris-controller-", None)]
    #[case("other-updater", None)]
    fn object_names_strip_to_modules(#[case] object: &str, #[case] module: Option<&str>) {
        assert_eq!(module_of_object(object), module);
        if let Some(name) = module {
            assert_eq!(object_name(name), object);
        }
    }
}
