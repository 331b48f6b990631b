//! Best-effort removal of leftover state from crashed runs.
//!
//! A run that died without tearing down leaves three things behind: the
//! root qdisc on the egress interface, tagged firewall rules, and the
//! lock marker. This module sweeps all three without ever failing on
//! "nothing to clean" — it is the manual remedy the tool points to when
//! a teardown step fails.

use std::path::Path;

use netblame_common::constants::{CHAIN_PREFIX, COMMENT_PREFIX};

use crate::classifier::FirewallOps;
use crate::shaping::QdiscOps;

/// What one cleanup sweep actually found and removed.
#[derive(Debug, Clone, Default)]
pub struct CleanupReport {
    /// Whether the root qdisc reset succeeded.
    pub qdisc_reset: bool,
    /// Number of tagged outbound-path jumps deleted.
    pub jumps_deleted: usize,
    /// Names of the tagged chains flushed and deleted.
    pub chains_deleted: Vec<String>,
    /// Whether a lock marker existed and was removed.
    pub lock_removed: bool,
}

/// Sweeps leftover shaping, classification, and lock state.
///
/// Only state carrying this tool's identifiers is touched: jumps are
/// matched by their comment prefix and chains by their name prefix.
/// Individual failures are logged and skipped.
pub fn purge(
    qdisc: &dyn QdiscOps,
    firewall: &dyn FirewallOps,
    interface: &str,
    lock_path: &Path,
) -> CleanupReport {
    let mut report = CleanupReport { qdisc_reset: qdisc.reset(interface).is_ok(), ..Default::default() };

    match firewall.list_output_rules() {
        Ok(rules) => {
            let mut tagged: Vec<u32> = rules
                .iter()
                .filter(|rule| rule.spec.contains(COMMENT_PREFIX))
                .map(|rule| rule.index)
                .collect();
            tagged.sort_unstable_by(|a, b| b.cmp(a));
            for index in tagged {
                match firewall.delete_output_rule(index) {
                    Ok(()) => report.jumps_deleted += 1,
                    Err(e) => tracing::warn!(index, error = %e, "could not delete jump rule"),
                }
            }
        }
        Err(e) => tracing::warn!(error = %e, "could not list outbound rules"),
    }

    match firewall.list_chains() {
        Ok(chains) => {
            for chain in chains.iter().filter(|c| c.starts_with(CHAIN_PREFIX)) {
                let flushed = firewall.flush_chain(chain);
                let deleted = firewall.delete_chain(chain);
                if flushed.is_ok() && deleted.is_ok() {
                    report.chains_deleted.push(chain.clone());
                } else {
                    tracing::warn!(%chain, "could not remove chain");
                }
            }
        }
        Err(e) => tracing::warn!(error = %e, "could not list chains"),
    }

    if lock_path.exists() {
        match std::fs::remove_file(lock_path) {
            Ok(()) => report.lock_removed = true,
            Err(e) => {
                tracing::warn!(path = %lock_path.display(), error = %e, "could not remove lock");
            }
        }
    }

    report
}
