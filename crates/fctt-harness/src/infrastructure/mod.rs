//! The harness orchestrator.
//!
//! An [`Infrastructure`] owns one bus adapter (with its broker), one
//! notification listener process, one controller process and, on demand, a
//! channel to the controller's client socket. Startup walks the stages of
//! [`HarnessState`] in order; [`Infrastructure::exit`] tears everything down
//! best effort and may be called any number of times.

mod error;
mod launch;
mod state;

use std::fs;
use std::io;
use std::time::Duration;

use camino::Utf8Path;
use fctt_config::HarnessConfig;
use fctt_messages::{ChunkEnvelope, ChunkPayload, Notification, NotificationFilter, Reply, Request};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::channel::FramedChannel;
use crate::notifications::{self, NotificationLog};
use crate::process::{ManagedChild, TERMINATE_GRACE};
use crate::transport::BusTransport;
use crate::wait::{PollStep, wait_until};

pub use error::{HarnessError, SetupError};
pub use launch::{daemon_args, listener_args, transport_for};
pub use state::HarnessState;

const INFRASTRUCTURE_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::infrastructure");

/// Poll step while waiting for the listener's log.
const LISTENER_POLL: PollStep = PollStep::Fixed(Duration::from_millis(50));

/// A running controller with its bus and notification listener.
pub struct Infrastructure {
    config: HarnessConfig,
    state: HarnessState,
    transport: Box<dyn BusTransport>,
    log: NotificationLog,
    listener: Option<ManagedChild>,
    daemon: Option<ManagedChild>,
    client: Option<FramedChannel>,
}

impl Infrastructure {
    /// Starts a harness instance for `config`.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::Setup`] when the broker, the listener or the
    /// controller cannot be brought up. Whatever was already started is torn
    /// down before returning.
    pub fn start(config: HarnessConfig) -> Result<Self, HarnessError> {
        let transport = transport_for(&config);
        Self::start_with_transport(config, transport)
    }

    /// Starts a harness instance using a caller-built adapter.
    pub fn start_with_transport(
        config: HarnessConfig,
        transport: Box<dyn BusTransport>,
    ) -> Result<Self, HarnessError> {
        let log = NotificationLog::new(config.paths.notifications_log());
        let mut infrastructure = Self {
            config,
            state: HarnessState::Created,
            transport,
            log,
            listener: None,
            daemon: None,
            client: None,
        };
        // On failure the partially started instance is dropped, which exits it.
        infrastructure.launch()?;
        Ok(infrastructure)
    }

    fn launch(&mut self) -> Result<(), SetupError> {
        remove_stale(self.config.paths.control_socket());
        if let Some(client) = &self.config.client_socket {
            remove_stale(client);
        }

        self.transport
            .start_bus()
            .map_err(|source| SetupError::Bus { source })?;
        self.advance(HarnessState::BusStarted);

        self.start_listener()?;
        self.advance(HarnessState::ListenerStarted);

        let mut command = launch::daemon_command(&self.config, self.transport.as_ref());
        self.daemon = Some(ManagedChild::spawn("controller", &mut command)?);
        self.advance(HarnessState::DaemonStarted);

        self.advance(HarnessState::Ready);
        Ok(())
    }

    fn start_listener(&mut self) -> Result<(), SetupError> {
        // A leftover log would be mistaken for the new listener's.
        self.log.remove();
        let mut command = launch::listener_command(&self.config, self.transport.as_ref());
        let mut listener = ManagedChild::spawn("listener", &mut command)?;
        let timeout = self.config.timeouts.connect;
        let log = &self.log;
        let outcome = wait_until(timeout, LISTENER_POLL, || {
            if log.exists() {
                Some(Ok(()))
            } else if listener.is_running() {
                None
            } else {
                Some(Err(SetupError::ListenerExited {
                    log: log.path().to_owned(),
                }))
            }
        });
        self.listener = Some(listener);
        outcome.unwrap_or_else(|| {
            Err(SetupError::ListenerNotReady {
                log: self.log.path().to_owned(),
                timeout,
            })
        })
    }

    fn advance(&mut self, next: HarnessState) {
        debug_assert_eq!(self.state.next(), Some(next), "lifecycle stages must not be skipped");
        info!(target: INFRASTRUCTURE_TARGET, from = %self.state, to = %next, "harness stage");
        self.state = next;
    }

    fn ensure_ready(&self) -> Result<(), HarnessError> {
        match self.state {
            HarnessState::Ready => Ok(()),
            state => Err(HarnessError::NotReady { state }),
        }
    }

    /// Current lifecycle stage.
    #[must_use]
    pub fn state(&self) -> HarnessState {
        self.state
    }

    /// Configuration the instance was started with.
    #[must_use]
    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Notification log written by the listener.
    #[must_use]
    pub fn notification_log(&self) -> &NotificationLog {
        &self.log
    }

    /// Sends `request` over the active transport and returns its reply.
    ///
    /// Application failures arrive in [`Reply::errors`]; only transport
    /// failures are errors.
    pub fn process_message(&mut self, request: &Request) -> Result<Reply, HarnessError> {
        self.ensure_ready()?;
        debug!(
            target: INFRASTRUCTURE_TARGET,
            module = %request.module,
            action = %request.action,
            "processing message"
        );
        Ok(self.transport.call(request)?)
    }

    /// Waits until the filtered notification log differs from the filtered
    /// `previous` snapshot and returns it.
    ///
    /// See [`notifications::get_notifications`].
    pub fn get_notifications(
        &self,
        previous: Option<&[Notification]>,
        filter: &NotificationFilter,
    ) -> Result<Vec<Notification>, HarnessError> {
        Ok(notifications::get_notifications(
            &self.log,
            previous,
            filter,
            self.config.timeouts.notifications,
        )?)
    }

    /// Issues one hand-built chunk call on the RPC bus.
    ///
    /// Non-multipart calls carry the request data (an empty object when
    /// absent); `multipart_data` is always sent. Returns `None` when the bus
    /// produced no response fragments.
    pub fn rpc_raw_call(
        &mut self,
        request: &Request,
        request_id: &str,
        is_final: bool,
        multipart: bool,
        multipart_data: &str,
    ) -> Result<Option<Reply>, HarnessError> {
        self.ensure_ready()?;
        let envelope = ChunkEnvelope {
            payload: ChunkPayload {
                data: Some(request.data.clone().unwrap_or_else(|| json!({}))),
                multipart_data: Some(multipart_data.to_owned()),
            },
            is_final,
            multipart,
            request_id: request_id.to_owned(),
        };
        Ok(self.transport.raw_call(request, &envelope)?)
    }

    /// Channel to the controller's client socket, connected lazily.
    pub fn client_socket(&mut self) -> Result<&mut FramedChannel, HarnessError> {
        self.ensure_ready()?;
        let path = self
            .config
            .client_socket
            .as_ref()
            .ok_or(HarnessError::NoClientSocket)?;
        let timeout = self.config.timeouts.connect;
        Ok(self
            .client
            .get_or_insert_with(|| FramedChannel::new(path.clone(), timeout)))
    }

    /// Tears the instance down.
    ///
    /// Every step runs even when an earlier one fails; failures are logged.
    /// Calling this again after it completed does nothing.
    pub fn exit(&mut self) {
        if self.state == HarnessState::Exited {
            return;
        }
        info!(target: INFRASTRUCTURE_TARGET, from = %self.state, "tearing harness down");
        if let Some(mut daemon) = self.daemon.take() {
            daemon.kill();
        }
        if let Some(mut listener) = self.listener.take() {
            listener.terminate(TERMINATE_GRACE);
        }
        if let Some(mut client) = self.client.take() {
            client.close();
        }
        self.log.remove();
        if let Some(client) = &self.config.client_socket {
            remove_stale(client);
        }
        self.transport.stop_bus();
        self.state = HarnessState::Exited;
    }
}

impl Drop for Infrastructure {
    fn drop(&mut self) {
        self.exit();
    }
}

fn remove_stale(path: &Utf8Path) {
    match fs::remove_file(path) {
        Ok(()) => debug!(target: INFRASTRUCTURE_TARGET, %path, "removed stale file"),
        Err(error) if error.kind() == io::ErrorKind::NotFound => {}
        Err(error) => warn!(target: INFRASTRUCTURE_TARGET, %path, %error, "failed to remove file"),
    }
}
