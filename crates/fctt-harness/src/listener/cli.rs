//! Command-line interface of the `fctt-listener` binary.

use std::ffi::OsString;

use camino::Utf8PathBuf;
use clap::{Parser, Subcommand};
use fctt_config::LogFormat;
use fctt_config::defaults::{DEFAULT_CONTROLLER_ID, DEFAULT_LOG_FILTER, DEFAULT_MQTT_HOST, DEFAULT_MQTT_PORT};

/// Collects controller notifications from one bus into a JSON-lines log.
#[derive(Parser, Debug, Clone, PartialEq, Eq)]
#[command(name = "fctt-listener", disable_help_subcommand = true)]
pub struct ListenerCli {
    /// Notification log to recreate and append to.
    #[arg(long, value_name = "PATH")]
    pub log: Utf8PathBuf,
    /// Tracing filter for the listener's own diagnostics.
    #[arg(long, default_value = DEFAULT_LOG_FILTER)]
    pub log_filter: String,
    /// Diagnostic output format.
    #[arg(long, default_value_t = LogFormat::Compact)]
    pub log_format: LogFormat,
    /// Bus to listen on.
    #[command(subcommand)]
    pub bus: ListenerBus,
}

/// Bus-specific listener settings.
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum ListenerBus {
    /// Serve the framed notification socket the controller pushes to.
    #[command(name = "unix-socket")]
    UnixSocket {
        /// Socket to bind.
        #[arg(long)]
        socket: Utf8PathBuf,
    },
    /// Listen for `foris-controller-*` events on the RPC bus.
    Ubus {
        /// RPC bus socket.
        #[arg(long)]
        socket: Utf8PathBuf,
        /// RPC bus command-line client.
        #[arg(long, default_value = "ubus")]
        ubus: OsString,
    },
    /// Subscribe to the controller's notification topics.
    Mqtt {
        /// Broker host.
        #[arg(long, default_value = DEFAULT_MQTT_HOST)]
        host: String,
        /// Broker port.
        #[arg(long, default_value_t = DEFAULT_MQTT_PORT)]
        port: u16,
        /// Controller identity in topics.
        #[arg(long, default_value = DEFAULT_CONTROLLER_ID)]
        controller_id: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    fn parses_unix_socket_invocation() {
        let cli = ListenerCli::try_parse_from([
            "fctt-listener",
            "--log",
            "/tmp/n.json",
            "--log-format",
            "json",
            "unix-socket",
            "--socket",
            "/tmp/n.soc",
        ])
        .expect("parse");
        assert_eq!(cli.log_format, LogFormat::Json);
        assert_eq!(
            cli.bus,
            ListenerBus::UnixSocket {
                socket: Utf8PathBuf::from("/tmp/n.soc")
            }
        );
    }

    #[rstest]
    fn mqtt_defaults_match_harness_defaults() {
        let cli = ListenerCli::try_parse_from(["fctt-listener", "--log", "/tmp/n.json", "mqtt"])
            .expect("parse");
        assert_eq!(
            cli.bus,
            ListenerBus::Mqtt {
                host: DEFAULT_MQTT_HOST.to_owned(),
                port: DEFAULT_MQTT_PORT,
                controller_id: DEFAULT_CONTROLLER_ID.to_owned(),
            }
        );
        assert_eq!(cli.log_filter, DEFAULT_LOG_FILTER);
    }

    #[rstest]
    fn log_path_is_required() {
        assert!(ListenerCli::try_parse_from(["fctt-listener", "ubus", "--socket", "/tmp/u.soc"]).is_err());
    }
}
