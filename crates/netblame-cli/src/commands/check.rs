//! `netblame check` — report host preconditions without touching
//! anything.

use clap::Args;

use netblame_core::{iface, preflight};

use crate::output::{BOLD, DIM, GREEN, RED, RESET, YELLOW};

/// Arguments for the `check` command.
#[derive(Args, Debug)]
pub struct CheckArgs {}

/// Executes the `check` command.
///
/// Prints a full report before failing, so a host missing several
/// preconditions shows all of them at once.
///
/// # Errors
///
/// Returns the first unmet fatal precondition (privilege, then
/// missing tool) so the exit status reflects it.
pub fn execute(_args: CheckArgs) -> anyhow::Result<()> {
    eprintln!();
    eprintln!("  {BOLD}netblame preflight{RESET}");
    eprintln!();

    let privilege = preflight::ensure_root();
    match &privilege {
        Ok(()) => eprintln!("  {GREEN}✓{RESET} running as root"),
        Err(_) => eprintln!("  {RED}✗{RESET} not running as root"),
    }

    let mut missing = None;
    for status in preflight::locate_tools() {
        match &status.path {
            Some(path) => {
                eprintln!("  {GREEN}✓{RESET} {} {DIM}({}){RESET}", status.tool, path.display());
            }
            None => {
                eprintln!("  {RED}✗{RESET} {} not found on PATH", status.tool);
                if missing.is_none() {
                    missing = Some(status.tool);
                }
            }
        }
    }

    match iface::detect_egress_interface() {
        Ok(name) => eprintln!("  {GREEN}✓{RESET} egress interface: {BOLD}{name}{RESET}"),
        Err(e) => eprintln!("  {YELLOW}!{RESET} egress interface not detected: {e}"),
    }
    eprintln!();

    privilege?;
    if let Some(tool) = missing {
        return Err(netblame_common::error::NetblameError::MissingDependency {
            tool: tool.to_string(),
        }
        .into());
    }
    Ok(())
}
