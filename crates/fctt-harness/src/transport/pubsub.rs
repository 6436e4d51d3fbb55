//! Requests over the pub/sub bus.

use std::ffi::OsString;
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::time::{Duration, Instant};

use fctt_config::{MqttSettings, TransportKind};
use fctt_messages::{Reply, Request};
use serde_json::{Value, json};
use tracing::{debug, info};
use uuid::Uuid;

use super::{Broker, BusTransport, TRANSPORT_TARGET, TransportError};
use crate::bus::{PubSubConnector, PubSubSession};
use crate::topics;
use crate::wait::PollStep;

/// Advertized controller states that mean requests will be served.
pub const ADVERTIZE_READY_STATES: [&str; 2] = ["started", "running"];

const CONNECT_TIMEOUT: Duration = Duration::from_millis(250);

/// Adapter for the `mqtt` transport.
///
/// Every call runs on its own client connection: subscribe to the reply
/// topic, publish the request, wait for the single reply, disconnect. The
/// first call additionally waits for the controller to advertize itself.
pub struct PubSubTransport {
    connector: Arc<dyn PubSubConnector>,
    settings: MqttSettings,
    call_timeout: Duration,
    advertized: bool,
    broker: Option<(Broker, Duration)>,
}

impl PubSubTransport {
    /// Calls through `connector` to the controller described by `settings`.
    #[must_use]
    pub fn new(connector: Arc<dyn PubSubConnector>, settings: MqttSettings, call_timeout: Duration) -> Self {
        Self {
            connector,
            settings,
            call_timeout,
            advertized: false,
            broker: None,
        }
    }

    /// Starts `broker` in [`BusTransport::start_bus`], waiting up to
    /// `timeout` for its port to accept connections.
    #[must_use]
    pub fn with_broker(mut self, broker: Broker, timeout: Duration) -> Self {
        self.broker = Some((broker, timeout));
        self
    }

    fn ensure_advertized(&mut self) -> Result<(), TransportError> {
        if self.advertized {
            return Ok(());
        }
        let id = self.settings.controller_id.as_str();
        let mut session = self.connector.connect(&format!("fctt-advertize-{}", Uuid::new_v4()))?;
        let result = await_advertize(session.as_mut(), &topics::advertize_topic(id), self.call_timeout);
        session.disconnect();
        result?;
        info!(target: TRANSPORT_TARGET, controller_id = id, "controller advertized readiness");
        self.advertized = true;
        Ok(())
    }

    fn exchange(
        &self,
        session: &mut dyn PubSubSession,
        request: &Request,
        reply_id: Uuid,
    ) -> Result<Reply, TransportError> {
        let id = self.settings.controller_id.as_str();
        let reply_topic = topics::reply_topic(id, reply_id);
        session.subscribe(&reply_topic)?;

        let mut body = json!({"reply_msg_id": reply_id.to_string()});
        if let (Some(data), Some(object)) = (&request.data, body.as_object_mut()) {
            object.insert("data".to_owned(), data.clone());
        }
        let request_topic = topics::request_topic(id, &request.module, &request.action);
        session.publish(&request_topic, body.to_string().as_bytes())?;
        debug!(target: TRANSPORT_TARGET, topic = %request_topic, "request published");

        let deadline = Instant::now() + self.call_timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(TransportError::ReplyTimeout {
                    module: request.module.clone(),
                    action: request.action.clone(),
                    timeout: self.call_timeout,
                });
            }
            match session.next_message(remaining)? {
                Some(message) if message.topic == reply_topic => {
                    return serde_json::from_slice(&message.payload)
                        .map_err(TransportError::MalformedReply);
                }
                _ => {}
            }
        }
    }
}

impl BusTransport for PubSubTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Mqtt
    }

    fn start_bus(&mut self) -> Result<(), TransportError> {
        let Some((broker, timeout)) = self.broker.as_mut() else {
            return Ok(());
        };
        let endpoint = format!("{}:{}", self.settings.host, self.settings.port);
        let host = self.settings.host.clone();
        let port = self.settings.port;
        broker.start(&endpoint, *timeout, PollStep::BACKOFF, || port_accepts(&host, port))
    }

    fn stop_bus(&mut self) {
        if let Some((broker, _)) = self.broker.as_mut() {
            broker.stop();
        }
        self.advertized = false;
    }

    fn listener_args(&self) -> Vec<OsString> {
        mqtt_args(&self.settings)
    }

    fn daemon_args(&self) -> Vec<OsString> {
        mqtt_args(&self.settings)
    }

    fn call(&mut self, request: &Request) -> Result<Reply, TransportError> {
        self.ensure_advertized()?;
        let reply_id = Uuid::new_v4();
        let mut session = self.connector.connect(&format!("fctt-call-{reply_id}"))?;
        let result = self.exchange(session.as_mut(), request, reply_id);
        session.disconnect();
        result
    }
}

fn mqtt_args(settings: &MqttSettings) -> Vec<OsString> {
    vec![
        "mqtt".into(),
        "--host".into(),
        settings.host.clone().into(),
        "--port".into(),
        settings.port.to_string().into(),
        "--controller-id".into(),
        settings.controller_id.clone().into(),
    ]
}

fn await_advertize(
    session: &mut dyn PubSubSession,
    topic: &str,
    timeout: Duration,
) -> Result<(), TransportError> {
    session.subscribe(topic)?;
    let deadline = Instant::now() + timeout;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(TransportError::NotAdvertized { timeout });
        }
        if let Some(message) = session.next_message(remaining)?
            && message.topic == topic
            && advertizes_ready(&message.payload)
        {
            return Ok(());
        }
    }
}

fn advertizes_ready(payload: &[u8]) -> bool {
    serde_json::from_slice::<Value>(payload)
        .ok()
        .and_then(|body| body.pointer("/data/state").and_then(Value::as_str).map(str::to_owned))
        .is_some_and(|state| ADVERTIZE_READY_STATES.contains(&state.as_str()))
}

fn port_accepts(host: &str, port: u16) -> bool {
    let Ok(mut addresses) = (host, port).to_socket_addrs() else {
        return false;
    };
    addresses.any(|address| TcpStream::connect_timeout(&address, CONNECT_TIMEOUT).is_ok())
}
