//! Egress interface auto-detection.
//!
//! Asks the system route table which interface carries traffic toward a
//! fixed probe destination. The probe address is never contacted; only
//! the routing decision is read, so the answer is deterministic for a
//! given routing table.

use netblame_common::constants::ROUTE_PROBE_ADDR;
use netblame_common::error::{NetblameError, Result};

use crate::cmd;

/// Detects the default egress interface via `ip route get`.
///
/// # Errors
///
/// Returns [`NetblameError::Setup`] if the route lookup fails or its
/// output carries no `dev` token.
pub fn detect_egress_interface() -> Result<String> {
    let out = cmd::run("ip", &["route", "get", ROUTE_PROBE_ADDR]).map_err(|e| {
        NetblameError::Setup { stage: "interface detection", detail: e.to_string() }
    })?;
    parse_route_device(&out.stdout).ok_or_else(|| NetblameError::Setup {
        stage: "interface detection",
        detail: format!("no `dev` token in route output: {}", out.stdout.trim()),
    })
}

/// Extracts the token following `dev` from `ip route get` output.
fn parse_route_device(output: &str) -> Option<String> {
    let mut tokens = output.split_whitespace();
    while let Some(token) = tokens.next() {
        if token == "dev" {
            return tokens.next().map(ToString::to_string);
        }
    }
    None
}
