//! # netblame — who is talking to that host?
//!
//! Attributes outbound traffic matching a destination filter to the
//! local process that generated it, by delaying matching packets,
//! logging them through the firewall, and correlating the log stream
//! with the process/socket table.

mod commands;
mod output;

use clap::Parser;

use netblame_common::error::NetblameError;

use crate::commands::Cli;

fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new(if cli.verbose { "netblame=debug" } else { "warn" })
            }),
        )
        .init();

    if let Err(err) = commands::execute(cli) {
        eprintln!("{}error:{} {err:#}", output::RED, output::RESET);
        let code = err.downcast_ref::<NetblameError>().map_or(1, NetblameError::exit_code);
        std::process::exit(code);
    }
}
