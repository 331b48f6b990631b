//! CLI command definitions and dispatch.

pub mod check;
pub mod cleanup;
pub mod run;

use clap::{Parser, Subcommand};

/// netblame — attribute outbound traffic to the process sending it.
#[derive(Parser, Debug)]
#[command(name = "netblame", version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose diagnostic logging.
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

/// Available CLI subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Monitor traffic toward a target and attribute it to processes.
    Run(run::RunArgs),
    /// Report whether the host satisfies every precondition.
    Check(check::CheckArgs),
    /// Remove leftover qdiscs, firewall rules, and the lock marker.
    Cleanup(cleanup::CleanupArgs),
}

/// Dispatches the parsed CLI command to its handler.
///
/// # Errors
///
/// Returns an error if the command execution fails.
pub fn execute(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Command::Run(args) => run::execute(args),
        Command::Check(args) => check::execute(args),
        Command::Cleanup(args) => cleanup::execute(args),
    }
}
