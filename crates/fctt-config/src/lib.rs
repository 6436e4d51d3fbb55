//! Configuration for the controller test harness.
//!
//! A [`HarnessConfig`] captures everything needed to bring one harness
//! instance up: which bus carries messages, which backend and modules the
//! controller loads, where its redirected roots live, where sockets and the
//! notification log are placed, and how long each blocking wait may take.

use std::collections::BTreeMap;
use std::time::Duration;

use camino::Utf8PathBuf;
use thiserror::Error;

pub mod defaults;
mod environment;
mod kinds;
mod logging;
mod paths;
mod programs;

pub use environment::{
    CONFIG_DIR_VAR, FILE_ROOT_VAR, HW_ROOT_VAR, SCRIPT_ROOT_VAR, UPDATER_MODULE_VAR,
};
pub use kinds::{BackendKind, TransportKind};
pub use logging::{LogFormat, LogFormatParseError, LogSettings};
pub use paths::{HarnessPaths, lock_path_for};
pub use programs::{Program, Programs};

use defaults::{
    DEFAULT_BROKER_TIMEOUT, DEFAULT_CALL_TIMEOUT, DEFAULT_CONFIG_DIR, DEFAULT_CONNECT_TIMEOUT,
    DEFAULT_CONTROLLER_ID, DEFAULT_FILE_ROOT, DEFAULT_HW_ROOT, DEFAULT_MODULE_WAIT_TIMEOUT,
    DEFAULT_MQTT_HOST, DEFAULT_MQTT_PORT, DEFAULT_NOTIFICATION_TIMEOUT, DEFAULT_SCRIPT_ROOT,
    DEFAULT_UPDATER_MODULE,
};

/// Errors raised while assembling a harness configuration.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// The backend name is outside the allow-list.
    #[error("backend not supported: '{name}' (expected openwrt or mock)")]
    UnsupportedBackend {
        /// Rejected backend name.
        name: String,
    },
    /// The transport name is unknown.
    #[error("transport not supported: '{name}' (expected unix-socket, ubus or mqtt)")]
    UnsupportedTransport {
        /// Rejected transport name.
        name: String,
    },
    /// The controller identity cannot be embedded in a topic.
    #[error("controller id '{id}' must be non-empty and free of '/', '+' and '#'")]
    InvalidControllerId {
        /// Rejected identity.
        id: String,
    },
    /// A timeout was configured as zero.
    #[error("timeout '{name}' must be greater than zero")]
    ZeroTimeout {
        /// Name of the offending timeout.
        name: &'static str,
    },
}

/// Bounds on every blocking wait performed by the harness.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// Waiting for a socket path to appear and accept a connection.
    pub connect: Duration,
    /// Waiting for a module to register on the RPC bus.
    pub module_wait: Duration,
    /// Waiting for a broker to become reachable.
    pub broker: Duration,
    /// One request/reply exchange.
    pub call: Duration,
    /// Waiting for the notification log to change.
    pub notifications: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            connect: DEFAULT_CONNECT_TIMEOUT,
            module_wait: DEFAULT_MODULE_WAIT_TIMEOUT,
            broker: DEFAULT_BROKER_TIMEOUT,
            call: DEFAULT_CALL_TIMEOUT,
            notifications: DEFAULT_NOTIFICATION_TIMEOUT,
        }
    }
}

impl Timeouts {
    fn validate(&self) -> Result<(), ConfigError> {
        let named = [
            ("connect", self.connect),
            ("module_wait", self.module_wait),
            ("broker", self.broker),
            ("call", self.call),
            ("notifications", self.notifications),
        ];
        match named.into_iter().find(|(_, value)| value.is_zero()) {
            Some((name, _)) => Err(ConfigError::ZeroTimeout { name }),
            None => Ok(()),
        }
    }
}

/// Location and identity used on the pub/sub bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MqttSettings {
    /// Broker host.
    pub host: String,
    /// Broker port; the harness starts its broker on this port.
    pub port: u16,
    /// Controller identity embedded in every topic.
    pub controller_id: String,
}

impl Default for MqttSettings {
    fn default() -> Self {
        Self {
            host: DEFAULT_MQTT_HOST.to_owned(),
            port: DEFAULT_MQTT_PORT,
            controller_id: DEFAULT_CONTROLLER_ID.to_owned(),
        }
    }
}

impl MqttSettings {
    fn validate(&self) -> Result<(), ConfigError> {
        let id = self.controller_id.as_str();
        if id.is_empty() || id.contains(['/', '+', '#']) {
            return Err(ConfigError::InvalidControllerId { id: id.to_owned() });
        }
        Ok(())
    }
}

/// Complete description of one harness instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarnessConfig {
    /// Bus carrying requests, replies and notifications.
    pub transport: TransportKind,
    /// Controller backend.
    pub backend: BackendKind,
    /// Controller modules to load (`-m`).
    pub modules: Vec<String>,
    /// Additional module search paths (`--extra-module-path`).
    pub extra_module_paths: Vec<Utf8PathBuf>,
    /// Redirected UCI configuration directory.
    pub config_dir: Utf8PathBuf,
    /// Redirected helper script root.
    pub script_root: Utf8PathBuf,
    /// Redirected file root.
    pub file_root: Utf8PathBuf,
    /// Mocked hardware tree.
    pub hw_root: Utf8PathBuf,
    /// Updater bindings module.
    pub updater_module: String,
    /// Client socket offered to the controller (`-C`).
    pub client_socket: Option<Utf8PathBuf>,
    /// Inherit child output instead of discarding it.
    pub debug: bool,
    /// Environment variables applied last to the controller environment.
    pub env_overrides: BTreeMap<String, String>,
    /// Sockets and notification log.
    pub paths: HarnessPaths,
    /// Pub/sub bus location and identity.
    pub mqtt: MqttSettings,
    /// Executable resolution.
    pub programs: Programs,
    /// Blocking wait bounds.
    pub timeouts: Timeouts,
    /// Logging settings forwarded to the listener.
    pub log: LogSettings,
}

impl HarnessConfig {
    /// Starts a configuration for `transport` and `backend`.
    #[must_use]
    pub fn builder(transport: TransportKind, backend: BackendKind) -> HarnessConfigBuilder {
        HarnessConfigBuilder {
            config: Self {
                transport,
                backend,
                modules: Vec::new(),
                extra_module_paths: Vec::new(),
                config_dir: Utf8PathBuf::from(DEFAULT_CONFIG_DIR),
                script_root: Utf8PathBuf::from(DEFAULT_SCRIPT_ROOT),
                file_root: Utf8PathBuf::from(DEFAULT_FILE_ROOT),
                hw_root: Utf8PathBuf::from(DEFAULT_HW_ROOT),
                updater_module: DEFAULT_UPDATER_MODULE.to_owned(),
                client_socket: None,
                debug: false,
                env_overrides: BTreeMap::new(),
                paths: HarnessPaths::default(),
                mqtt: MqttSettings::default(),
                programs: Programs::default(),
                timeouts: Timeouts::default(),
                log: LogSettings::default(),
            },
        }
    }

    /// Starts a configuration from transport and backend names.
    ///
    /// Unknown names fail here, before anything is spawned.
    pub fn builder_from_names(
        transport: &str,
        backend: &str,
    ) -> Result<HarnessConfigBuilder, ConfigError> {
        let transport_kind = TransportKind::parse(transport)?;
        let backend_kind = BackendKind::parse(backend)?;
        Ok(Self::builder(transport_kind, backend_kind))
    }
}

/// Incrementally assembles a [`HarnessConfig`].
#[derive(Debug, Clone)]
#[must_use]
pub struct HarnessConfigBuilder {
    config: HarnessConfig,
}

impl HarnessConfigBuilder {
    /// Adds a controller module.
    pub fn module(mut self, name: impl Into<String>) -> Self {
        self.config.modules.push(name.into());
        self
    }

    /// Adds several controller modules.
    pub fn modules<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.modules.extend(names.into_iter().map(Into::into));
        self
    }

    /// Adds an extra module search path.
    pub fn extra_module_path(mut self, path: impl Into<Utf8PathBuf>) -> Self {
        self.config.extra_module_paths.push(path.into());
        self
    }

    /// Sets the redirected UCI configuration directory.
    pub fn config_dir(mut self, path: impl Into<Utf8PathBuf>) -> Self {
        self.config.config_dir = path.into();
        self
    }

    /// Sets the redirected helper script root.
    pub fn script_root(mut self, path: impl Into<Utf8PathBuf>) -> Self {
        self.config.script_root = path.into();
        self
    }

    /// Sets the redirected file root.
    pub fn file_root(mut self, path: impl Into<Utf8PathBuf>) -> Self {
        self.config.file_root = path.into();
        self
    }

    /// Sets the mocked hardware tree.
    pub fn hw_root(mut self, path: impl Into<Utf8PathBuf>) -> Self {
        self.config.hw_root = path.into();
        self
    }

    /// Sets the updater bindings module.
    pub fn updater_module(mut self, name: impl Into<String>) -> Self {
        self.config.updater_module = name.into();
        self
    }

    /// Offers a client socket to the controller.
    pub fn client_socket(mut self, path: impl Into<Utf8PathBuf>) -> Self {
        self.config.client_socket = Some(path.into());
        self
    }

    /// Inherits child stdout and stderr.
    pub fn debug(mut self, enabled: bool) -> Self {
        self.config.debug = enabled;
        self
    }

    /// Adds an environment override for the controller.
    pub fn env_override(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.env_overrides.insert(key.into(), value.into());
        self
    }

    /// Replaces socket and log locations.
    pub fn paths(mut self, paths: HarnessPaths) -> Self {
        self.config.paths = paths;
        self
    }

    /// Replaces pub/sub settings.
    pub fn mqtt(mut self, settings: MqttSettings) -> Self {
        self.config.mqtt = settings;
        self
    }

    /// Replaces executable overrides.
    pub fn programs(mut self, programs: Programs) -> Self {
        self.config.programs = programs;
        self
    }

    /// Replaces wait bounds.
    pub fn timeouts(mut self, timeouts: Timeouts) -> Self {
        self.config.timeouts = timeouts;
        self
    }

    /// Replaces listener logging settings.
    pub fn log(mut self, settings: LogSettings) -> Self {
        self.config.log = settings;
        self
    }

    /// Validates and returns the configuration.
    pub fn build(self) -> Result<HarnessConfig, ConfigError> {
        self.config.timeouts.validate()?;
        if self.config.transport == TransportKind::Mqtt {
            self.config.mqtt.validate()?;
        }
        Ok(self.config)
    }
}
