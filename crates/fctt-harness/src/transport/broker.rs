//! Broker child processes backing the RPC and pub/sub buses.

use std::ffi::OsString;
use std::process::{Command, Stdio};
use std::time::Duration;

use tracing::info;

use super::{TRANSPORT_TARGET, TransportError};
use crate::process::{ManagedChild, TERMINATE_GRACE, child_output};
use crate::wait::{PollStep, wait_until};

/// Launch recipe and handle for one broker process.
#[derive(Debug)]
pub struct Broker {
    role: &'static str,
    program: OsString,
    args: Vec<OsString>,
    debug: bool,
    child: Option<ManagedChild>,
}

impl Broker {
    /// Describes a broker run as `program args...`.
    #[must_use]
    pub fn new(role: &'static str, program: OsString, args: Vec<OsString>, debug: bool) -> Self {
        Self {
            role,
            program,
            args,
            debug,
            child: None,
        }
    }

    /// Launches the broker and polls `ready` until it reports reachability.
    ///
    /// `endpoint` only labels the error raised when `timeout` elapses; the
    /// half-started broker is stopped before returning it.
    pub fn start<F>(
        &mut self,
        endpoint: &str,
        timeout: Duration,
        step: PollStep,
        mut ready: F,
    ) -> Result<(), TransportError>
    where
        F: FnMut() -> bool,
    {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(child_output(self.debug))
            .stderr(child_output(self.debug));
        self.child = Some(ManagedChild::spawn(self.role, &mut command)?);
        if wait_until(timeout, step, || ready().then_some(())).is_none() {
            self.stop();
            return Err(TransportError::BrokerNotReady {
                endpoint: endpoint.to_owned(),
                timeout,
            });
        }
        info!(target: TRANSPORT_TARGET, role = self.role, endpoint, "broker ready");
        Ok(())
    }

    /// Stops the broker if it runs.
    pub fn stop(&mut self) {
        if let Some(mut child) = self.child.take() {
            child.terminate(TERMINATE_GRACE);
        }
    }
}

impl Drop for Broker {
    fn drop(&mut self) {
        self.stop();
    }
}
