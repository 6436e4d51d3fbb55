//! Multi-transport test harness for the Foris controller.
//!
//! The harness starts a controller under test together with the bus it talks
//! over and an out-of-process notification listener, then gives tests one
//! call surface that behaves the same on every bus:
//!
//! - the controller's own unix socket, with length-prefixed JSON frames
//!   ([`transport::DirectSocketTransport`]);
//! - the `ubus` RPC bus, with chunked request bodies
//!   ([`transport::RpcBusTransport`]);
//! - an MQTT broker, with per-call reply topics
//!   ([`transport::PubSubTransport`]).
//!
//! Notifications emitted by the controller are normalised by the listener
//! (the `fctt-listener` binary) into one JSON-lines log which tests poll
//! through [`Infrastructure::get_notifications`].
//!
//! ```no_run
//! use fctt_config::{BackendKind, HarnessConfig, TransportKind};
//! use fctt_harness::Infrastructure;
//! use fctt_messages::{NotificationFilter, Request};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = HarnessConfig::builder(TransportKind::UnixSocket, BackendKind::Mock)
//!     .modules(["about", "updater"])
//!     .build()?;
//! let mut harness = Infrastructure::start(config)?;
//! let reply = harness.process_message(&Request::new("about", "get"))?;
//! assert!(!reply.is_error());
//! let seen = harness.get_notifications(None, &NotificationFilter::all())?;
//! println!("{} notification(s) so far", seen.len());
//! harness.exit();
//! # Ok(())
//! # }
//! ```

pub mod bus;
pub mod channel;
pub mod framing;
mod infrastructure;
pub mod listener;
pub mod notifications;
pub mod process;
pub mod server;
pub mod telemetry;
pub mod topics;
pub mod transport;
pub mod wait;

pub use channel::{ChannelError, FramedChannel};
pub use infrastructure::{
    HarnessError, HarnessState, Infrastructure, SetupError, daemon_args, listener_args,
    transport_for,
};
pub use notifications::{NotificationLog, NotificationLogError, get_notifications};
pub use telemetry::{TelemetryError, TelemetryHandle};

#[cfg(test)]
mod tests;
