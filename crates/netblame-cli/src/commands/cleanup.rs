//! `netblame cleanup` — sweep state left behind by a crashed run.

use std::path::Path;

use clap::Args;

use netblame_common::constants::LOCK_PATH;
use netblame_core::classifier::IptablesFirewall;
use netblame_core::shaping::TcQdisc;
use netblame_core::{cleanup, iface, preflight};

use crate::output::{BOLD, DIM, GREEN, RESET};

/// Arguments for the `cleanup` command.
#[derive(Args, Debug)]
pub struct CleanupArgs {
    /// Egress interface to reset; auto-detected when omitted.
    #[arg(long)]
    pub interface: Option<String>,
}

/// Executes the `cleanup` command.
///
/// # Errors
///
/// Returns an error if the preconditions for mutating network state
/// are unmet; "nothing to clean" is never an error.
pub fn execute(args: CleanupArgs) -> anyhow::Result<()> {
    preflight::ensure_root()?;
    preflight::ensure_dependencies()?;
    let interface = match args.interface {
        Some(name) => name,
        None => iface::detect_egress_interface()?,
    };

    let report = cleanup::purge(
        &TcQdisc::new(),
        &IptablesFirewall::new(),
        &interface,
        Path::new(LOCK_PATH),
    );

    eprintln!();
    eprintln!("  {BOLD}netblame cleanup{RESET} on {BOLD}{interface}{RESET}");
    eprintln!();
    eprintln!(
        "  {GREEN}●{RESET} root qdisc {}",
        if report.qdisc_reset { "reset" } else { "could not be reset" }
    );
    eprintln!("  {GREEN}●{RESET} {} tagged jump rule(s) deleted", report.jumps_deleted);
    for chain in &report.chains_deleted {
        eprintln!("  {GREEN}●{RESET} chain {chain} removed");
    }
    if report.lock_removed {
        eprintln!("  {GREEN}●{RESET} stale lock marker removed");
    }
    eprintln!();
    eprintln!("  {DIM}Anything not listed above was already clean.{RESET}");
    Ok(())
}
