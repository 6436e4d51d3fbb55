//! Error surface of the orchestrator.

use std::time::Duration;

use camino::Utf8PathBuf;
use fctt_config::ConfigError;
use thiserror::Error;

use super::HarnessState;
use crate::channel::ChannelError;
use crate::notifications::NotificationLogError;
use crate::process::ProcessError;
use crate::transport::TransportError;

/// Failures that leave a harness instance unusable.
#[derive(Debug, Error)]
pub enum SetupError {
    /// The bus broker failed to start.
    #[error("failed to start the bus: {source}")]
    Bus {
        /// Underlying failure.
        #[source]
        source: TransportError,
    },
    /// A child process could not be launched.
    #[error(transparent)]
    Spawn(#[from] ProcessError),
    /// The listener exited before creating its log.
    #[error("notification listener exited before creating {log}")]
    ListenerExited {
        /// Log the listener should have created.
        log: Utf8PathBuf,
    },
    /// The listener did not create its log in time.
    #[error("notification listener did not create {log} within {timeout:?}")]
    ListenerNotReady {
        /// Log the listener should have created.
        log: Utf8PathBuf,
        /// Bound that elapsed.
        timeout: Duration,
    },
}

/// Errors returned by [`super::Infrastructure`].
#[derive(Debug, Error)]
pub enum HarnessError {
    /// The configuration was rejected.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// Startup failed.
    #[error("could not start the harness: {0}")]
    Setup(#[from] SetupError),
    /// A call failed on the wire.
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// The notification log could not be polled.
    #[error(transparent)]
    Notifications(#[from] NotificationLogError),
    /// The client socket channel failed.
    #[error(transparent)]
    Channel(#[from] ChannelError),
    /// The instance is not in a stage that allows the operation.
    #[error("harness is {state}, not ready")]
    NotReady {
        /// Current stage.
        state: HarnessState,
    },
    /// No client socket was configured.
    #[error("no client socket configured")]
    NoClientSocket,
}
