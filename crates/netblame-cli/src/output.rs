//! Formatted output helpers for CLI commands.
//!
//! Attribution results are always reported; parse degradations only
//! surface through verbose logging.

use netblame_common::types::AttributionResult;
use netblame_core::correlator::{Outcome, ResultSink};

pub const BOLD: &str = "\x1b[1m";
pub const DIM: &str = "\x1b[2m";
pub const GREEN: &str = "\x1b[32m";
pub const CYAN: &str = "\x1b[36m";
pub const YELLOW: &str = "\x1b[33m";
pub const RED: &str = "\x1b[31m";
pub const RESET: &str = "\x1b[0m";

/// Sink printing each attribution result as it is delivered.
#[derive(Debug, Default)]
pub struct ConsoleSink {
    json: bool,
    /// Results with a resolved owning process.
    pub attributed: usize,
    /// Results where no owning process was found in time.
    pub unresolved: usize,
    /// Lines that matched the tag but lacked expected tokens.
    pub degraded: usize,
}

impl ConsoleSink {
    /// Creates a sink; `json` switches to one JSON object per line on
    /// stdout.
    #[must_use]
    pub fn new(json: bool) -> Self {
        Self { json, ..Self::default() }
    }

    fn emit(&self, result: &AttributionResult) {
        if self.json {
            if let Ok(line) = serde_json::to_string(result) {
                println!("{line}");
            }
        } else {
            eprintln!("  {}", format_result(result));
        }
    }
}

impl ResultSink for ConsoleSink {
    fn deliver(&mut self, outcome: &Outcome) {
        match outcome {
            Outcome::Delivered(result) => {
                self.attributed += 1;
                self.emit(result);
            }
            Outcome::ResolutionFailed(result) => {
                self.unresolved += 1;
                self.emit(result);
            }
            Outcome::ParseDegraded(result) => {
                self.degraded += 1;
                tracing::debug!(line = ?result.failure, "skipping malformed event line");
            }
        }
    }
}

/// Renders one attribution result as a human-readable line.
#[must_use]
pub fn format_result(result: &AttributionResult) -> String {
    let endpoint = format!(
        "{}/{}",
        result.protocol.map_or_else(|| "?".to_string(), |p| p.to_string()),
        result.src_port.map_or_else(|| "?".to_string(), |p| p.to_string()),
    );
    match result.pid {
        Some(pid) => format!("{GREEN}●{RESET} {endpoint} {CYAN}->{RESET} {BOLD}PID {pid}{RESET}"),
        None => format!(
            "{YELLOW}○{RESET} {endpoint} {DIM}{}{RESET}",
            result.failure.as_deref().unwrap_or("unresolved"),
        ),
    }
}
