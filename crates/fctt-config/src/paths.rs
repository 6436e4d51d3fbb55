//! Filesystem artefacts shared by the harness, the listener and the
//! controller under test.
//!
//! The historical layout keeps everything directly under `/tmp`. Tests that
//! run several harness instances side by side relocate the whole set into a
//! private directory with [`HarnessPaths::in_dir`].

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};

use crate::defaults::{
    DEFAULT_CONTROL_SOCKET, DEFAULT_NOTIFICATIONS_LOG, DEFAULT_NOTIFICATION_SOCKET,
    DEFAULT_UBUS_SOCKET,
};

const LOCK_SUFFIX: &str = ".lock";

/// Socket and log locations for one harness instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HarnessPaths {
    control_socket: Utf8PathBuf,
    notification_socket: Utf8PathBuf,
    ubus_socket: Utf8PathBuf,
    notifications_log: Utf8PathBuf,
}

impl Default for HarnessPaths {
    fn default() -> Self {
        Self {
            control_socket: Utf8PathBuf::from(DEFAULT_CONTROL_SOCKET),
            notification_socket: Utf8PathBuf::from(DEFAULT_NOTIFICATION_SOCKET),
            ubus_socket: Utf8PathBuf::from(DEFAULT_UBUS_SOCKET),
            notifications_log: Utf8PathBuf::from(DEFAULT_NOTIFICATIONS_LOG),
        }
    }
}

impl HarnessPaths {
    /// Places every artefact inside `dir`, keeping the default file names.
    #[must_use]
    pub fn in_dir(dir: &Utf8Path) -> Self {
        let defaults = Self::default();
        let relocate = |path: &Utf8Path| match path.file_name() {
            Some(name) => dir.join(name),
            None => dir.join(path),
        };
        Self {
            control_socket: relocate(&defaults.control_socket),
            notification_socket: relocate(&defaults.notification_socket),
            ubus_socket: relocate(&defaults.ubus_socket),
            notifications_log: relocate(&defaults.notifications_log),
        }
    }

    /// Socket the controller serves requests on (direct-socket transport).
    #[must_use]
    pub fn control_socket(&self) -> &Utf8Path {
        &self.control_socket
    }

    /// Socket the controller pushes notifications to (direct-socket transport).
    #[must_use]
    pub fn notification_socket(&self) -> &Utf8Path {
        &self.notification_socket
    }

    /// Socket of the RPC bus broker.
    #[must_use]
    pub fn ubus_socket(&self) -> &Utf8Path {
        &self.ubus_socket
    }

    /// JSON-lines notification log.
    #[must_use]
    pub fn notifications_log(&self) -> &Utf8Path {
        &self.notifications_log
    }

    /// Lock file guarding appends to the notification log.
    #[must_use]
    pub fn notifications_lock(&self) -> Utf8PathBuf {
        lock_path_for(&self.notifications_log)
    }

    /// Overrides the control socket location.
    #[must_use]
    pub fn with_control_socket(mut self, path: impl Into<Utf8PathBuf>) -> Self {
        self.control_socket = path.into();
        self
    }

    /// Overrides the notification log location.
    #[must_use]
    pub fn with_notifications_log(mut self, path: impl Into<Utf8PathBuf>) -> Self {
        self.notifications_log = path.into();
        self
    }
}

/// Returns the lock file path paired with a notification log.
#[must_use]
pub fn lock_path_for(log: &Utf8Path) -> Utf8PathBuf {
    let mut name = log.as_str().to_owned();
    name.push_str(LOCK_SUFFIX);
    Utf8PathBuf::from(name)
}
