//! Pub/sub bus access through the synchronous `rumqttc` client.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use rumqttc::{Client, Connection, Event, MqttOptions, Packet, QoS, RecvTimeoutError};
use tracing::debug;

use super::{BusError, BusMessage, PubSubConnector, PubSubSession};

const MQTT_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::bus::mqtt");
const REQUEST_CAPACITY: usize = 16;
const KEEP_ALIVE: Duration = Duration::from_secs(5);
const DISCONNECT_DRAIN: Duration = Duration::from_millis(200);
/// Packet bound in both directions; requests carry whole bodies.
const MAX_PACKET_SIZE: usize = 64 * 1024 * 1024;

/// [`PubSubConnector`] for an MQTT broker.
#[derive(Debug, Clone)]
pub struct MqttConnector {
    host: String,
    port: u16,
    timeout: Duration,
}

impl MqttConnector {
    /// Targets the broker at `host:port`; handshakes are bounded by `timeout`.
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16, timeout: Duration) -> Self {
        Self {
            host: host.into(),
            port,
            timeout,
        }
    }
}

impl PubSubConnector for MqttConnector {
    fn connect(&self, client_id: &str) -> Result<Box<dyn PubSubSession>, BusError> {
        let mut options = MqttOptions::new(client_id, self.host.clone(), self.port);
        options.set_keep_alive(KEEP_ALIVE);
        options.set_clean_session(true);
        options.set_max_packet_size(MAX_PACKET_SIZE, MAX_PACKET_SIZE);
        let (client, connection) = Client::new(options, REQUEST_CAPACITY);
        let mut session = MqttSession {
            client,
            connection,
            pending: VecDeque::new(),
            timeout: self.timeout,
        };
        session.await_packet("connect", |packet| matches!(packet, Packet::ConnAck(_)))?;
        debug!(target: MQTT_TARGET, client_id, "connected to broker");
        Ok(Box::new(session))
    }
}

/// Messages published while waiting for an acknowledgement are queued in
/// `pending` and handed out by [`PubSubSession::next_message`] in arrival
/// order.
struct MqttSession {
    client: Client,
    connection: Connection,
    pending: VecDeque<BusMessage>,
    timeout: Duration,
}

impl MqttSession {
    /// Drives the connection until `wanted` matches an incoming packet.
    fn await_packet<F>(&mut self, operation: &str, wanted: F) -> Result<(), BusError>
    where
        F: Fn(&Packet) -> bool,
    {
        let deadline = Instant::now() + self.timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(BusError::Timeout {
                    operation: operation.to_owned(),
                    timeout: self.timeout,
                });
            }
            match self.poll(remaining)? {
                Some(Packet::Publish(publish)) => self.pending.push_back(BusMessage {
                    topic: publish.topic,
                    payload: publish.payload.to_vec(),
                }),
                Some(packet) if wanted(&packet) => return Ok(()),
                _ => {}
            }
        }
    }

    fn poll(&mut self, timeout: Duration) -> Result<Option<Packet>, BusError> {
        match self.connection.recv_timeout(timeout) {
            Ok(Ok(Event::Incoming(packet))) => Ok(Some(packet)),
            Ok(Ok(Event::Outgoing(_))) | Err(RecvTimeoutError::Timeout) => Ok(None),
            Ok(Err(error)) => Err(BusError::Client(error.to_string())),
            Err(RecvTimeoutError::Disconnected) => {
                Err(BusError::Disconnected("event loop stopped".to_owned()))
            }
        }
    }
}

impl PubSubSession for MqttSession {
    fn subscribe(&mut self, topic: &str) -> Result<(), BusError> {
        self.client
            .subscribe(topic, QoS::AtLeastOnce)
            .map_err(|error| BusError::Client(error.to_string()))?;
        self.await_packet("subscribe", |packet| matches!(packet, Packet::SubAck(_)))
    }

    fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), BusError> {
        self.client
            .publish(topic, QoS::AtLeastOnce, false, payload.to_vec())
            .map_err(|error| BusError::Client(error.to_string()))?;
        self.await_packet("publish", |packet| matches!(packet, Packet::PubAck(_)))
    }

    fn next_message(&mut self, timeout: Duration) -> Result<Option<BusMessage>, BusError> {
        if let Some(message) = self.pending.pop_front() {
            return Ok(Some(message));
        }
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            if let Some(Packet::Publish(publish)) = self.poll(remaining)? {
                return Ok(Some(BusMessage {
                    topic: publish.topic,
                    payload: publish.payload.to_vec(),
                }));
            }
        }
    }

    fn disconnect(&mut self) {
        if let Err(error) = self.client.disconnect() {
            debug!(target: MQTT_TARGET, %error, "disconnect request failed");
            return;
        }
        // Let the event loop flush the DISCONNECT packet.
        let deadline = Instant::now() + DISCONNECT_DRAIN;
        while Instant::now() < deadline {
            match self.connection.recv_timeout(DISCONNECT_DRAIN) {
                Ok(Ok(Event::Outgoing(rumqttc::Outgoing::Disconnect))) | Ok(Err(_)) | Err(_) => {
                    break;
                }
                Ok(Ok(_)) => {}
            }
        }
    }
}
