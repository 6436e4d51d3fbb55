//! Lifecycle stages of a harness instance.

use std::fmt;

/// Stage a harness instance has reached.
///
/// Stages advance strictly in declaration order; [`HarnessState::Exited`] is
/// terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum HarnessState {
    /// Configuration accepted, nothing launched yet.
    Created,
    /// The bus broker, if any, is reachable.
    BusStarted,
    /// The listener has recreated the notification log.
    ListenerStarted,
    /// The controller process has been spawned.
    DaemonStarted,
    /// Calls may be issued.
    Ready,
    /// Everything has been torn down.
    Exited,
}

impl HarnessState {
    /// Lower-case stage name used in logs and errors.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::BusStarted => "bus_started",
            Self::ListenerStarted => "listener_started",
            Self::DaemonStarted => "daemon_started",
            Self::Ready => "ready",
            Self::Exited => "exited",
        }
    }

    /// Stage that follows this one, if any.
    #[must_use]
    pub fn next(self) -> Option<Self> {
        match self {
            Self::Created => Some(Self::BusStarted),
            Self::BusStarted => Some(Self::ListenerStarted),
            Self::ListenerStarted => Some(Self::DaemonStarted),
            Self::DaemonStarted => Some(Self::Ready),
            Self::Ready => Some(Self::Exited),
            Self::Exited => None,
        }
    }
}

impl fmt::Display for HarnessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
