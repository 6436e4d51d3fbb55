//! Request/reply adapters, one per bus.
//!
//! The orchestrator holds exactly one [`BusTransport`] and never branches on
//! the transport kind itself: broker lifecycle, listener and controller
//! command-line flags, and call semantics all live behind the trait.

mod broker;
mod direct;
mod pubsub;
mod rpc;

use std::ffi::OsString;
use std::time::Duration;

use fctt_config::TransportKind;
use fctt_messages::{ChunkEnvelope, Reply, Request};
use thiserror::Error;

use crate::bus::BusError;
use crate::channel::ChannelError;
use crate::process::ProcessError;

pub use broker::Broker;
pub use direct::DirectSocketTransport;
pub use pubsub::{ADVERTIZE_READY_STATES, PubSubTransport};
pub use rpc::{RpcBusTransport, module_of_object, object_name, reassemble_reply};

pub(crate) const TRANSPORT_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::transport");

/// Errors raised while talking to the controller.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The framed socket failed.
    #[error(transparent)]
    Channel(#[from] ChannelError),
    /// The bus client failed.
    #[error(transparent)]
    Bus(#[from] BusError),
    /// A broker process could not be launched.
    #[error(transparent)]
    Process(#[from] ProcessError),
    /// The broker did not become reachable in time.
    #[error("broker at {endpoint} not ready after {timeout:?}")]
    BrokerNotReady {
        /// Socket path or `host:port`.
        endpoint: String,
        /// Bound that elapsed.
        timeout: Duration,
    },
    /// The controller never announced itself on the pub/sub bus.
    #[error("controller did not advertize readiness within {timeout:?}")]
    NotAdvertized {
        /// Bound that elapsed.
        timeout: Duration,
    },
    /// No reply arrived within the call bound.
    #[error("no reply to {module}/{action} within {timeout:?}")]
    ReplyTimeout {
        /// Requested module.
        module: String,
        /// Requested action.
        action: String,
        /// Bound that elapsed.
        timeout: Duration,
    },
    /// A response fragment lacked its string `data` field.
    #[error("response fragment {index} has no string 'data' field")]
    MalformedFragment {
        /// Zero-based position of the fragment.
        index: usize,
    },
    /// The concatenated response fragments are not one JSON document.
    #[error("reassembled reply from {fragments} fragment(s) is not valid JSON: {source}")]
    Reassembly {
        /// Number of fragments concatenated.
        fragments: usize,
        /// Parse failure.
        #[source]
        source: serde_json::Error,
    },
    /// A reply could not be decoded.
    #[error("malformed reply: {0}")]
    MalformedReply(#[source] serde_json::Error),
    /// The operation exists only on another transport.
    #[error("{operation} is not supported on the {transport} transport")]
    Unsupported {
        /// Requested operation.
        operation: &'static str,
        /// Active transport.
        transport: TransportKind,
    },
}

/// One bus variant: its broker, its flags and its call semantics.
pub trait BusTransport: Send {
    /// Transport this adapter implements.
    fn kind(&self) -> TransportKind;

    /// Starts the broker, if the bus has one, and waits until it is reachable.
    fn start_bus(&mut self) -> Result<(), TransportError>;

    /// Stops the broker and removes the bus's socket files. Best effort.
    fn stop_bus(&mut self);

    /// Arguments selecting this bus on the listener command line.
    fn listener_args(&self) -> Vec<OsString>;

    /// Bus positional and bus flags appended to the controller command line.
    fn daemon_args(&self) -> Vec<OsString>;

    /// Performs one request/reply exchange.
    ///
    /// Application failures come back inside [`Reply::errors`]; only
    /// transport failures are errors.
    fn call(&mut self, request: &Request) -> Result<Reply, TransportError>;

    /// Sends one hand-built chunk envelope for `request`.
    ///
    /// Returns `None` when the bus produced no response fragments.
    fn raw_call(
        &mut self,
        request: &Request,
        envelope: &ChunkEnvelope,
    ) -> Result<Option<Reply>, TransportError> {
        let _ = (request, envelope);
        Err(TransportError::Unsupported {
            operation: "raw chunk call",
            transport: self.kind(),
        })
    }
}
