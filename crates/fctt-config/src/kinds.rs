//! Closed sets of transports and controller backends.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::ConfigError;

/// Message bus used to reach the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize, EnumString, Display)]
pub enum TransportKind {
    /// Length-prefixed JSON over the controller's own unix socket.
    #[serde(rename = "unix-socket")]
    #[strum(serialize = "unix-socket")]
    UnixSocket,
    /// Local RPC bus with a resolver daemon.
    #[serde(rename = "ubus")]
    #[strum(serialize = "ubus")]
    Ubus,
    /// Topic based pub/sub bus.
    #[serde(rename = "mqtt")]
    #[strum(serialize = "mqtt")]
    Mqtt,
}

impl TransportKind {
    /// Every supported transport, in the order test matrices use.
    pub const ALL: [Self; 3] = [Self::UnixSocket, Self::Ubus, Self::Mqtt];

    /// Parses a transport name, rejecting unknown names.
    pub fn parse(name: &str) -> Result<Self, ConfigError> {
        name.parse()
            .map_err(|_| ConfigError::UnsupportedTransport {
                name: name.to_owned(),
            })
    }
}

/// Backend the controller uses to touch the system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize, EnumString, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum BackendKind {
    /// Real OpenWrt backend operating on redirected roots.
    Openwrt,
    /// In-memory mock backend.
    Mock,
}

impl BackendKind {
    /// Parses a backend name, rejecting anything outside the allow-list.
    pub fn parse(name: &str) -> Result<Self, ConfigError> {
        name.parse().map_err(|_| ConfigError::UnsupportedBackend {
            name: name.to_owned(),
        })
    }
}
