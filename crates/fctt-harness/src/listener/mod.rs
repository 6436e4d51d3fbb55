//! Out-of-process notification listener.
//!
//! One listener runs per harness instance. It attaches to the bus selected on
//! its command line, recreates the notification log and then appends one
//! normalised record per controller notification until it is signalled.

mod cli;
mod mqtt;
mod socket;
mod ubus;

use std::io;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use nix::sys::prctl;
use nix::sys::signal::Signal;
use signal_hook::consts::{SIGINT, SIGTERM};
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use crate::bus::{BusError, MqttConnector, PubSubConnector, RpcBusConnector, UbusConnector};
use crate::notifications::{NotificationLog, NotificationLogError};
use crate::server::{ServerError, SocketServer};
use crate::topics;

pub use cli::{ListenerBus, ListenerCli};
pub use mqtt::normalise_message;
pub use ubus::{EVENT_PATTERN, normalise_event};

pub(crate) const LISTENER_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::listener");

/// Upper bound on a single bus wait; the exit flag is checked in between.
pub const POLL_INTERVAL: Duration = Duration::from_millis(200);

const BUS_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors that stop the listener.
#[derive(Debug, Error)]
pub enum ListenerError {
    /// The parent-death signal could not be installed.
    #[error("failed to install parent-death signal: {0}")]
    ParentDeathSignal(#[source] nix::Error),
    /// Termination signal handlers could not be registered.
    #[error("failed to register signal handlers: {0}")]
    Signals(#[source] io::Error),
    /// The notification socket could not be served.
    #[error(transparent)]
    Socket(#[from] ServerError),
    /// The bus connection failed.
    #[error(transparent)]
    Bus(#[from] BusError),
    /// The notification log could not be written.
    #[error(transparent)]
    Log(#[from] NotificationLogError),
}

/// Runs the listener described by `cli` until SIGTERM or SIGINT.
///
/// The bus attachment is made before the log is recreated, so the log
/// appearing on disk tells the harness the listener is ready.
pub fn run(cli: ListenerCli) -> Result<(), ListenerError> {
    prctl::set_pdeathsig(Signal::SIGKILL).map_err(ListenerError::ParentDeathSignal)?;
    let exit = exit_flag()?;
    let log = Arc::new(NotificationLog::new(cli.log));

    match cli.bus {
        ListenerBus::UnixSocket { socket } => {
            let server = SocketServer::bind(&socket)?;
            log.recreate()?;
            info!(target: LISTENER_TARGET, log = %log.path(), "listener ready");
            socket::serve(server, &log, &exit);
        }
        ListenerBus::Ubus { socket, ubus: program } => {
            let connector = UbusConnector::new(program, socket, BUS_CONNECT_TIMEOUT);
            let mut events = connector.listen(EVENT_PATTERN)?;
            log.recreate()?;
            info!(target: LISTENER_TARGET, log = %log.path(), "listener ready");
            ubus::serve(events.as_mut(), &log, &exit)?;
        }
        ListenerBus::Mqtt {
            host,
            port,
            controller_id,
        } => {
            let connector = MqttConnector::new(host, port, BUS_CONNECT_TIMEOUT);
            let mut session = connector.connect(&format!("fctt-listener-{}", Uuid::new_v4()))?;
            session.subscribe(&topics::notification_wildcard(&controller_id))?;
            log.recreate()?;
            info!(target: LISTENER_TARGET, log = %log.path(), "listener ready");
            let outcome = mqtt::serve(session.as_mut(), &controller_id, &log, &exit);
            session.disconnect();
            outcome?;
        }
    }
    info!(target: LISTENER_TARGET, "listener stopped");
    Ok(())
}

fn exit_flag() -> Result<Arc<AtomicBool>, ListenerError> {
    let exit = Arc::new(AtomicBool::new(false));
    for signal in [SIGTERM, SIGINT] {
        signal_hook::flag::register(signal, Arc::clone(&exit)).map_err(ListenerError::Signals)?;
    }
    Ok(exit)
}
