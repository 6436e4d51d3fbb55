//! Stand-in controller used by the harness' own integration tests.
//!
//! Accepts the controller's command line for the `unix-socket` bus and
//! answers every request with `{"ok": true}`. Requests for modules outside the
//! `-m` list get an application error instead. `updater`/`run` additionally
//! pushes an `initialize` and, 200ms later, an `exit` notification. Frames
//! written to the client socket (`-C`) are relayed to the notification socket.

use std::os::unix::net::UnixStream;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::thread;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use clap::{Parser, Subcommand};
use fctt_config::{BackendKind, LogFormat};
use fctt_harness::framing;
use fctt_harness::server::SocketServer;
use fctt_harness::{FramedChannel, telemetry};
use fctt_messages::{Notification, Reply, Request};
use serde_json::{Value, json};
use signal_hook::consts::{SIGINT, SIGTERM};
use tracing::{debug, info, warn};

const TARGET: &str = "fctt_echo_controller";
const NOTIFICATION_GAP: Duration = Duration::from_millis(200);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(name = "fctt-echo-controller")]
struct Cli {
    /// Modules to serve; all modules when omitted.
    #[arg(short = 'm', long = "module")]
    modules: Vec<String>,
    /// Accepted for compatibility; unused.
    #[arg(long = "extra-module-path")]
    extra_module_paths: Vec<Utf8PathBuf>,
    /// Socket whose frames are relayed as notifications.
    #[arg(short = 'C', long = "client-socket")]
    client_socket: Option<Utf8PathBuf>,
    /// Emit diagnostics on stderr.
    #[arg(short = 'd', long)]
    debug: bool,
    /// Backend name.
    #[arg(short = 'b', long, value_parser = BackendKind::parse)]
    backend: BackendKind,
    #[command(subcommand)]
    bus: Bus,
}

#[derive(Subcommand, Debug)]
enum Bus {
    /// Serve requests on a framed unix socket.
    #[command(name = "unix-socket")]
    UnixSocket {
        /// Control socket to serve.
        #[arg(long)]
        path: Utf8PathBuf,
        /// Socket notifications are pushed to.
        #[arg(long)]
        notifications_path: Utf8PathBuf,
    },
}

struct Echo {
    modules: Arc<Vec<String>>,
    notifications: Utf8PathBuf,
}

impl Echo {
    fn reply(&self, request: &Request) -> Reply {
        if !self.modules.is_empty() && !self.modules.contains(&request.module) {
            return Reply::with_errors(
                request,
                vec![json!({"description": format!("module '{}' is not loaded", request.module)})],
            );
        }
        if (request.module.as_str(), request.action.as_str()) == ("updater", "run") {
            let notifications = self.notifications.clone();
            thread::spawn(move || push_updater_run(&notifications));
        }
        Reply::with_data(request, json!({"ok": true}))
    }

    fn serve_connection(&self, mut stream: UnixStream) {
        loop {
            let value = match framing::read_json(&mut stream) {
                Ok(Some(value)) => value,
                Ok(None) => break,
                Err(error) => {
                    debug!(target: TARGET, %error, "connection closed");
                    break;
                }
            };
            let reply = match serde_json::from_value::<Request>(value) {
                Ok(request) => serde_json::to_value(self.reply(&request)),
                Err(error) => Ok(json!({"kind": "reply", "errors": [{"description": error.to_string()}]})),
            };
            let sent = reply
                .map_err(framing::FrameError::from)
                .and_then(|reply| framing::write_json(&mut stream, &reply));
            if let Err(error) = sent {
                warn!(target: TARGET, %error, "failed to send reply");
                break;
            }
        }
    }
}

fn push_updater_run(notifications: &Utf8Path) {
    let mut channel = FramedChannel::new(notifications, CONNECT_TIMEOUT);
    for (index, status) in ["initialize", "exit"].into_iter().enumerate() {
        if index > 0 {
            thread::sleep(NOTIFICATION_GAP);
        }
        let notification = Notification::new("updater", "run", Some(json!({"status": status})));
        let pushed = serde_json::to_value(&notification)
            .map_err(|error| error.to_string())
            .and_then(|value| channel.notification(&value).map_err(|error| error.to_string()));
        if let Err(error) = pushed {
            warn!(target: TARGET, %error, "failed to push notification");
        }
    }
}

fn relay_connection(mut stream: UnixStream, notifications: &Utf8Path) {
    let mut channel = FramedChannel::new(notifications, CONNECT_TIMEOUT);
    while let Ok(Some(value)) = framing::read_json(&mut stream) {
        if let Err(error) = channel.notification(&relayed(value)) {
            warn!(target: TARGET, %error, "failed to relay notification");
        }
    }
}

fn relayed(mut value: Value) -> Value {
    if let Value::Object(map) = &mut value {
        map.entry("kind").or_insert_with(|| json!("notification"));
    }
    value
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let filter = if cli.debug { "debug" } else { "warn" };
    if let Err(error) = telemetry::initialise(filter, LogFormat::Compact) {
        eprintln!("fctt-echo-controller: {error}");
        return ExitCode::FAILURE;
    }
    let exit = Arc::new(AtomicBool::new(false));
    for signal in [SIGTERM, SIGINT] {
        if let Err(error) = signal_hook::flag::register(signal, Arc::clone(&exit)) {
            warn!(target: TARGET, %error, "failed to register signal handler");
        }
    }

    let Bus::UnixSocket {
        path,
        notifications_path,
    } = cli.bus;
    info!(
        target: TARGET,
        backend = %cli.backend,
        modules = ?cli.modules,
        extra_module_paths = ?cli.extra_module_paths,
        "echo controller starting"
    );

    if let Some(client_socket) = cli.client_socket {
        match SocketServer::bind(&client_socket) {
            Ok(server) => {
                let exit = Arc::clone(&exit);
                let notifications = notifications_path.clone();
                thread::spawn(move || {
                    server.serve(&exit, move |stream| relay_connection(stream, &notifications));
                });
            }
            Err(error) => {
                warn!(target: TARGET, %error, "client socket unavailable");
                return ExitCode::FAILURE;
            }
        }
    }

    let server = match SocketServer::bind(&path) {
        Ok(server) => server,
        Err(error) => {
            warn!(target: TARGET, %error, "control socket unavailable");
            return ExitCode::FAILURE;
        }
    };
    let echo = Echo {
        modules: Arc::new(cli.modules),
        notifications: notifications_path,
    };
    server.serve(&exit, move |stream| echo.serve_connection(stream));
    ExitCode::SUCCESS
}
