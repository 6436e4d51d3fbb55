//! Capability interfaces over the two brokered buses.
//!
//! Transport adapters and listeners depend on these traits rather than on a
//! concrete client, so their protocol logic runs against in-memory doubles
//! in tests. [`UbusConnector`] and [`MqttConnector`] are the real implementations.

mod mqtt;
mod ubus;

use std::io;
use std::time::Duration;

use serde_json::Value;
use thiserror::Error;

pub use mqtt::MqttConnector;
pub use ubus::{BlobError, MAX_MESSAGE_LEN, UbusConnector};
#[cfg(test)]
pub(crate) use ubus::stub::{ReceivedCall, StubBus};

/// Errors raised by bus clients.
#[derive(Debug, Error)]
pub enum BusError {
    /// The client program could not be started.
    #[error("failed to launch '{program}': {source}")]
    Spawn {
        /// Program that failed to start.
        program: String,
        /// Underlying failure.
        #[source]
        source: io::Error,
    },
    /// Reading from or writing to the bus socket failed.
    #[error("bus socket {operation} failed: {source}")]
    Io {
        /// Socket operation.
        operation: &'static str,
        /// Underlying failure.
        #[source]
        source: io::Error,
    },
    /// The broker answered a request with a non-zero status.
    #[error("{operation} failed with bus status {code}")]
    Status {
        /// Request description.
        operation: String,
        /// Status code reported by the broker.
        code: u32,
    },
    /// A bus message could not be decoded.
    #[error("malformed bus attribute: {0}")]
    Blob(#[from] BlobError),
    /// The broker sent something the protocol does not allow here.
    #[error("bus protocol violation: {0}")]
    Protocol(String),
    /// The bus produced output that is not JSON.
    #[error("bus returned malformed output: {0}")]
    Decode(#[from] serde_json::Error),
    /// A bounded bus operation did not finish in time.
    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        /// Operation that timed out.
        operation: String,
        /// Bound that elapsed.
        timeout: Duration,
    },
    /// The connection to the broker was lost.
    #[error("bus connection lost: {0}")]
    Disconnected(String),
    /// A message exceeds what the broker accepts.
    #[error("message of {len} bytes exceeds the {limit} byte bus limit")]
    MessageTooLarge {
        /// Encoded message size.
        len: usize,
        /// Accepted maximum.
        limit: usize,
    },
    /// The pub/sub client reported an error.
    #[error("pub/sub client error: {0}")]
    Client(String),
}

/// An event received from the RPC bus.
#[derive(Debug, Clone, PartialEq)]
pub struct RpcEvent {
    /// Event name, i.e. the emitting object.
    pub name: String,
    /// Event payload.
    pub data: Value,
}

/// Entry point to the RPC bus.
#[cfg_attr(test, mockall::automock)]
pub trait RpcBusConnector: Send + Sync {
    /// Blocks until `object` is registered or `timeout` elapses.
    fn wait_for(&self, object: &str, timeout: Duration) -> Result<(), BusError>;

    /// Opens a session for issuing calls.
    fn connect(&self) -> Result<Box<dyn RpcBusSession>, BusError>;

    /// Subscribes to events whose names match `pattern`.
    fn listen(&self, pattern: &str) -> Result<Box<dyn RpcEventStream>, BusError>;
}

/// One connection to the RPC bus.
#[cfg_attr(test, mockall::automock)]
pub trait RpcBusSession: Send {
    /// Invokes `method` on `object`, returning every response fragment.
    fn call(&mut self, object: &str, method: &str, payload: &Value) -> Result<Vec<Value>, BusError>;

    /// Releases the connection.
    fn disconnect(&mut self);
}

/// Stream of RPC bus events.
pub trait RpcEventStream: Send {
    /// Waits up to `timeout` for the next event.
    fn next_event(&mut self, timeout: Duration) -> Result<Option<RpcEvent>, BusError>;
}

/// A message received from the pub/sub bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    /// Topic the message was published on.
    pub topic: String,
    /// Raw payload.
    pub payload: Vec<u8>,
}

/// Entry point to the pub/sub bus.
pub trait PubSubConnector: Send + Sync {
    /// Opens a session identified by `client_id`.
    fn connect(&self, client_id: &str) -> Result<Box<dyn PubSubSession>, BusError>;
}

/// One pub/sub client connection.
pub trait PubSubSession: Send {
    /// Subscribes to `topic`, returning once the broker acknowledges.
    fn subscribe(&mut self, topic: &str) -> Result<(), BusError>;

    /// Publishes `payload` on `topic`.
    fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), BusError>;

    /// Waits up to `timeout` for the next message on any subscription.
    fn next_message(&mut self, timeout: Duration) -> Result<Option<BusMessage>, BusError>;

    /// Closes the connection.
    fn disconnect(&mut self);
}
