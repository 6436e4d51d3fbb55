//! Entry point of the out-of-process notification listener.

use std::process::ExitCode;

use clap::Parser;
use fctt_harness::listener::{self, ListenerCli};
use fctt_harness::telemetry;

fn main() -> ExitCode {
    let cli = ListenerCli::parse();
    if let Err(error) = telemetry::initialise(&cli.log_filter, cli.log_format) {
        eprintln!("fctt-listener: {error}");
        return ExitCode::FAILURE;
    }
    match listener::run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            tracing::error!(target: "fctt_listener", %error, "listener failed");
            ExitCode::FAILURE
        }
    }
}
