//! Construction of the transport adapter and the child command lines.

use std::env;
use std::ffi::OsString;
use std::process::{Command, Stdio};
use std::sync::Arc;

use fctt_config::{HarnessConfig, Program, TransportKind};

use crate::bus::{MqttConnector, UbusConnector};
use crate::process::child_output;
use crate::transport::{Broker, BusTransport, DirectSocketTransport, PubSubTransport, RpcBusTransport};

/// Builds the adapter for the configured transport, brokers included.
#[must_use]
pub fn transport_for(config: &HarnessConfig) -> Box<dyn BusTransport> {
    let paths = &config.paths;
    let timeouts = &config.timeouts;
    match config.transport {
        TransportKind::UnixSocket => Box::new(DirectSocketTransport::new(
            paths.control_socket(),
            paths.notification_socket(),
            timeouts.connect,
            timeouts.call,
        )),
        TransportKind::Ubus => {
            let client = config.programs.resolve(Program::Ubus);
            let connector = Arc::new(UbusConnector::new(client.clone(), paths.ubus_socket(), timeouts.call));
            let broker = Broker::new(
                "ubusd",
                config.programs.resolve(Program::Ubusd),
                vec!["-s".into(), paths.ubus_socket().as_str().into()],
                config.debug,
            );
            Box::new(
                RpcBusTransport::new(connector, paths.ubus_socket(), client, timeouts.module_wait)
                    .with_broker(broker, timeouts.broker),
            )
        }
        TransportKind::Mqtt => {
            let connector = Arc::new(MqttConnector::new(
                config.mqtt.host.clone(),
                config.mqtt.port,
                timeouts.connect,
            ));
            let broker = Broker::new(
                "mosquitto",
                config.programs.resolve(Program::Mosquitto),
                vec!["-p".into(), config.mqtt.port.to_string().into()],
                config.debug,
            );
            Box::new(
                PubSubTransport::new(connector, config.mqtt.clone(), timeouts.call)
                    .with_broker(broker, timeouts.broker),
            )
        }
    }
}

/// Arguments of the listener process, bus selection last.
#[must_use]
pub fn listener_args(config: &HarnessConfig, transport: &dyn BusTransport) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec![
        "--log".into(),
        config.paths.notifications_log().as_str().into(),
        "--log-filter".into(),
        config.log.filter.clone().into(),
        "--log-format".into(),
        config.log.format.to_string().into(),
    ];
    args.extend(transport.listener_args());
    args
}

/// Arguments of the controller process.
///
/// Module and path flags come first, then `-d`, the backend and finally the
/// bus positional with its flags.
#[must_use]
pub fn daemon_args(config: &HarnessConfig, transport: &dyn BusTransport) -> Vec<OsString> {
    let mut args = Vec::new();
    for module in &config.modules {
        args.push("-m".into());
        args.push(module.into());
    }
    for path in &config.extra_module_paths {
        args.push("--extra-module-path".into());
        args.push(path.as_str().into());
    }
    if let Some(client) = &config.client_socket {
        args.push("-C".into());
        args.push(client.as_str().into());
    }
    args.push("-d".into());
    args.push("-b".into());
    args.push(config.backend.to_string().into());
    args.extend(transport.daemon_args());
    args
}

pub(super) fn listener_command(config: &HarnessConfig, transport: &dyn BusTransport) -> Command {
    let mut command = Command::new(config.programs.resolve(Program::Listener));
    command
        .args(listener_args(config, transport))
        .stdin(Stdio::null())
        .stdout(child_output(config.debug))
        .stderr(child_output(config.debug));
    command
}

pub(super) fn daemon_command(config: &HarnessConfig, transport: &dyn BusTransport) -> Command {
    let base = env::vars_os()
        .filter_map(|(key, value)| Some((key.into_string().ok()?, value.into_string().ok()?)));
    let mut command = Command::new(config.programs.resolve(Program::Controller));
    command
        .args(daemon_args(config, transport))
        .envs(config.daemon_environment(base))
        .stdin(Stdio::null())
        .stdout(child_output(config.debug))
        .stderr(child_output(config.debug));
    command
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino::Utf8PathBuf;
    use fctt_config::{BackendKind, HarnessPaths, LogFormat, LogSettings};
    use rstest::rstest;

    fn strings(args: Vec<OsString>) -> Vec<String> {
        args.into_iter()
            .map(|arg| arg.into_string().expect("utf-8 argument"))
            .collect()
    }

    fn config(transport: TransportKind) -> HarnessConfig {
        HarnessConfig::builder(transport, BackendKind::Mock)
            .modules(["about", "updater"])
            .extra_module_path("/opt/modules")
            .client_socket("/tmp/client.soc")
            .paths(HarnessPaths::in_dir(&Utf8PathBuf::from("/run/fctt")))
            .log(LogSettings {
                filter: "debug".to_owned(),
                format: LogFormat::Json,
            })
            .build()
            .expect("valid config")
    }

    #[rstest]
    fn unix_socket_daemon_command_line() {
        let config = config(TransportKind::UnixSocket);
        let transport = transport_for(&config);
        assert_eq!(
            strings(daemon_args(&config, transport.as_ref())),
            [
                "-m",
                "about",
                "-m",
                "updater",
                "--extra-module-path",
                "/opt/modules",
                "-C",
                "/tmp/client.soc",
                "-d",
                "-b",
                "mock",
                "unix-socket",
                "--path",
                "/run/fctt/foris-controller-test.soc",
                "--notifications-path",
                "/run/fctt/foris-controller-notifications-test.soc",
            ]
        );
    }

    #[rstest]
    fn listener_command_line_ends_with_bus_selection() {
        let config = config(TransportKind::Ubus);
        let transport = transport_for(&config);
        let args = strings(listener_args(&config, transport.as_ref()));
        assert_eq!(
            args.get(..6).expect("logging flags"),
            [
                "--log",
                "/run/fctt/foris-controller-notifications-test.json",
                "--log-filter",
                "debug",
                "--log-format",
                "json",
            ]
        );
        assert_eq!(args.get(6).map(String::as_str), Some("ubus"));
    }

    #[rstest]
    #[case(TransportKind::UnixSocket)]
    #[case(TransportKind::Ubus)]
    #[case(TransportKind::Mqtt)]
    fn adapters_match_the_configured_transport(#[case] kind: TransportKind) {
        assert_eq!(transport_for(&config(kind)).kind(), kind);
    }
}
