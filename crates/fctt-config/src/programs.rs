//! Resolution of the external executables the harness launches.
//!
//! Each program resolves with the same precedence: an explicit override set on
//! [`Programs`], then an environment variable, then the bare program name
//! looked up on `PATH` when spawned.

use std::collections::BTreeMap;
use std::env;
use std::ffi::OsString;

use strum::{Display, EnumIter};

/// External program launched by the harness.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display, EnumIter,
)]
#[strum(serialize_all = "snake_case")]
pub enum Program {
    /// The controller under test.
    Controller,
    /// The out-of-process notification listener.
    Listener,
    /// The RPC bus resolver daemon.
    Ubusd,
    /// The RPC bus command-line client.
    Ubus,
    /// The pub/sub broker.
    Mosquitto,
}

impl Program {
    /// Environment variable consulted when no override is set.
    #[must_use]
    pub const fn env_var(self) -> &'static str {
        match self {
            Self::Controller => "FCTT_CONTROLLER_BIN",
            Self::Listener => "FCTT_LISTENER_BIN",
            Self::Ubusd => "FCTT_UBUSD_BIN",
            Self::Ubus => "FCTT_UBUS_BIN",
            Self::Mosquitto => "FCTT_MOSQUITTO_BIN",
        }
    }

    /// Program name used when neither override nor variable is present.
    #[must_use]
    pub const fn default_name(self) -> &'static str {
        match self {
            Self::Controller => "foris-controller",
            Self::Listener => "fctt-listener",
            Self::Ubusd => "ubusd",
            Self::Ubus => "ubus",
            Self::Mosquitto => "mosquitto",
        }
    }
}

/// Explicit executable overrides.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Programs {
    overrides: BTreeMap<Program, OsString>,
}

impl Programs {
    /// Pins `program` to `binary`, bypassing the environment.
    #[must_use]
    pub fn with(mut self, program: Program, binary: impl Into<OsString>) -> Self {
        self.overrides.insert(program, binary.into());
        self
    }

    /// Resolves `program` against the process environment.
    #[must_use]
    pub fn resolve(&self, program: Program) -> OsString {
        self.resolve_with(program, |key| env::var_os(key))
    }

    /// Resolves `program` using `lookup` in place of the process environment.
    pub fn resolve_with<F>(&self, program: Program, lookup: F) -> OsString
    where
        F: FnOnce(&str) -> Option<OsString>,
    {
        self.overrides
            .get(&program)
            .cloned()
            .or_else(|| lookup(program.env_var()))
            .unwrap_or_else(|| OsString::from(program.default_name()))
    }
}
