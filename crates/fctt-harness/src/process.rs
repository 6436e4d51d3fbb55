//! Supervision of the child processes a harness instance owns.

use std::io;
use std::process::{Child, Command, Stdio};
use std::time::Duration;

use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::wait::{PollStep, wait_until};

const PROCESS_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::process");

/// Grace period between `SIGTERM` and `SIGKILL`.
pub const TERMINATE_GRACE: Duration = Duration::from_secs(2);

/// Errors raised while launching a child.
#[derive(Debug, Error)]
pub enum ProcessError {
    /// The program could not be started.
    #[error("failed to launch {role} '{program}': {source}")]
    Spawn {
        /// Role of the child, e.g. `listener`.
        role: &'static str,
        /// Program that failed to start.
        program: String,
        /// Underlying failure.
        #[source]
        source: io::Error,
    },
}

/// Output handling for children: inherited when debugging, discarded otherwise.
#[must_use]
pub fn child_output(debug: bool) -> Stdio {
    if debug { Stdio::inherit() } else { Stdio::null() }
}

/// A spawned child that is stopped and reaped when dropped.
#[derive(Debug)]
pub struct ManagedChild {
    role: &'static str,
    child: Option<Child>,
}

impl ManagedChild {
    /// Spawns `command` in the given role.
    pub fn spawn(role: &'static str, command: &mut Command) -> Result<Self, ProcessError> {
        let program = command.get_program().to_string_lossy().into_owned();
        debug!(
            target: PROCESS_TARGET,
            role,
            program = %program,
            args = ?command.get_args().collect::<Vec<_>>(),
            "spawning child"
        );
        let child = command.spawn().map_err(|source| ProcessError::Spawn {
            role,
            program: program.clone(),
            source,
        })?;
        info!(target: PROCESS_TARGET, role, pid = child.id(), program = %program, "child started");
        Ok(Self {
            role,
            child: Some(child),
        })
    }

    /// Role the child was spawned in.
    #[must_use]
    pub fn role(&self) -> &'static str {
        self.role
    }

    /// Returns `true` while the child has not exited.
    pub fn is_running(&mut self) -> bool {
        self.child
            .as_mut()
            .is_some_and(|child| matches!(child.try_wait(), Ok(None)))
    }

    /// Asks the child to stop with `SIGTERM`, escalating to `SIGKILL` after
    /// `grace`, then reaps it.
    pub fn terminate(&mut self, grace: Duration) {
        let Some(mut child) = self.child.take() else {
            return;
        };
        if matches!(child.try_wait(), Ok(Some(_))) {
            return;
        }
        match i32::try_from(child.id()) {
            Ok(raw) => {
                if let Err(error) = kill(Pid::from_raw(raw), Signal::SIGTERM) {
                    debug!(target: PROCESS_TARGET, role = self.role, %error, "SIGTERM not delivered");
                }
            }
            Err(error) => {
                warn!(target: PROCESS_TARGET, role = self.role, %error, "pid out of range");
            }
        }
        let exited = wait_until(grace, PollStep::Fixed(Duration::from_millis(20)), || {
            matches!(child.try_wait(), Ok(Some(_))).then_some(())
        });
        if exited.is_none() {
            warn!(target: PROCESS_TARGET, role = self.role, "child ignored SIGTERM; killing");
            reap(self.role, child);
        }
    }

    /// Kills the child with `SIGKILL` and reaps it.
    pub fn kill(&mut self) {
        if let Some(child) = self.child.take() {
            reap(self.role, child);
        }
    }
}

impl Drop for ManagedChild {
    fn drop(&mut self) {
        self.kill();
    }
}

fn reap(role: &'static str, mut child: Child) {
    if let Err(error) = child.kill() {
        debug!(target: PROCESS_TARGET, role, %error, "kill failed; child likely exited");
    }
    match child.wait() {
        Ok(status) => debug!(target: PROCESS_TARGET, role, %status, "child reaped"),
        Err(error) => warn!(target: PROCESS_TARGET, role, %error, "failed to reap child"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::time::Instant;

    fn sleeper() -> Command {
        let mut command = Command::new("sleep");
        command.arg("30").stdout(Stdio::null()).stderr(Stdio::null());
        command
    }

    #[rstest]
    fn terminate_stops_a_cooperative_child() {
        let mut child = ManagedChild::spawn("sleeper", &mut sleeper()).expect("spawn sleep");
        assert!(child.is_running());
        let started = Instant::now();
        child.terminate(TERMINATE_GRACE);
        assert!(!child.is_running());
        assert!(started.elapsed() < TERMINATE_GRACE);
    }

    #[rstest]
    fn terminate_and_kill_are_idempotent() {
        let mut child = ManagedChild::spawn("sleeper", &mut sleeper()).expect("spawn sleep");
        child.kill();
        child.kill();
        child.terminate(TERMINATE_GRACE);
        assert!(!child.is_running());
    }

    #[rstest]
    fn missing_program_reports_role() {
        let error = ManagedChild::spawn("broker", &mut Command::new("/nonexistent/broker"))
            .expect_err("spawn should fail");
        let ProcessError::Spawn { role, .. } = error;
        assert_eq!(role, "broker");
    }
}
