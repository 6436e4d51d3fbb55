//! Fallback values shared by the harness and the listener binary.

use std::time::Duration;

/// Control socket served by the controller on the direct-socket transport.
pub const DEFAULT_CONTROL_SOCKET: &str = "/tmp/foris-controller-test.soc";

/// Socket of the RPC bus broker.
pub const DEFAULT_UBUS_SOCKET: &str = "/tmp/ubus-foris-controller-test.soc";

/// Socket the controller pushes notifications to on the direct-socket transport.
pub const DEFAULT_NOTIFICATION_SOCKET: &str = "/tmp/foris-controller-notifications-test.soc";

/// JSON-lines log collecting normalised notifications.
pub const DEFAULT_NOTIFICATIONS_LOG: &str = "/tmp/foris-controller-notifications-test.json";

/// Host of the pub/sub broker.
pub const DEFAULT_MQTT_HOST: &str = "127.0.0.1";

/// Listening port of the pub/sub broker started by the harness.
pub const DEFAULT_MQTT_PORT: u16 = 11883;

/// Controller identity used in pub/sub topics.
pub const DEFAULT_CONTROLLER_ID: &str = "0000000000000000";

/// Module the controller loads in place of the real updater bindings.
pub const DEFAULT_UPDATER_MODULE: &str = "foris_controller_testtools.svupdater";

/// Redirected UCI configuration directory.
pub const DEFAULT_CONFIG_DIR: &str = "/tmp/uci_configs";

/// Redirected root for the controller's helper scripts.
pub const DEFAULT_SCRIPT_ROOT: &str = "/tmp/test_init";

/// Redirected root for files the controller reads and writes.
pub const DEFAULT_FILE_ROOT: &str = "/tmp/foris_files";

/// Client socket offered to the controller when a test asks for one.
pub const DEFAULT_CLIENT_SOCKET: &str = "/tmp/foris-controller-client-socket.soc";

/// Root of the mocked hardware description tree.
pub const DEFAULT_HW_ROOT: &str = "/tmp/turrishw_root/";

/// Default log filter expression used by the binaries.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Bound on waiting for a socket path to appear and accept a connection.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Bound on waiting for a module to register on the RPC bus.
pub const DEFAULT_MODULE_WAIT_TIMEOUT: Duration = Duration::from_secs(2);

/// Bound on waiting for a broker to become reachable.
pub const DEFAULT_BROKER_TIMEOUT: Duration = Duration::from_secs(10);

/// Bound on a single request/reply exchange.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Bound on waiting for the notification log to change.
pub const DEFAULT_NOTIFICATION_TIMEOUT: Duration = Duration::from_secs(30);
