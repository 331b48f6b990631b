//! Unified error types for the netblame workspace.
//!
//! Only the fatal categories terminate a run; everything else is absorbed
//! at the component boundary where it occurs and surfaced as a log line.
//! Each fatal category maps to a distinct process exit status so scripts
//! wrapping the tool can tell the failure modes apart.

use std::path::PathBuf;

use thiserror::Error;

/// Top-level error type shared across the workspace.
#[derive(Debug, Error)]
pub enum NetblameError {
    /// The validated configuration is contradictory or incomplete.
    #[error("invalid configuration: {message}")]
    Config {
        /// Description of the invalid configuration.
        message: String,
    },

    /// Another instance already holds the lock marker.
    #[error("already running: lock file {path} exists (remove it manually if the previous run crashed)")]
    AlreadyRunning {
        /// Path of the existing lock marker.
        path: PathBuf,
    },

    /// The process lacks the privileges needed to mutate network state.
    #[error("insufficient privileges: {message}")]
    Privilege {
        /// Description of the missing privilege.
        message: String,
    },

    /// A required external tool is not installed.
    #[error("required tool not found: {tool}")]
    MissingDependency {
        /// Name of the missing executable.
        tool: String,
    },

    /// Installing shaping or classification rules failed.
    #[error("setup failed during {stage}: {detail}")]
    Setup {
        /// Which installation step failed.
        stage: &'static str,
        /// Underlying failure description.
        detail: String,
    },

    /// A teardown step failed. Reported by the caller, never aborts the
    /// remaining teardown steps.
    #[error("teardown failed during {stage}: {detail}")]
    Teardown {
        /// Which cleanup step failed.
        stage: &'static str,
        /// Underlying failure description.
        detail: String,
    },

    /// The classification event stream became unreadable.
    #[error("event stream failed: {detail}")]
    Stream {
        /// Underlying failure description.
        detail: String,
    },

    /// An external command could not be spawned or returned a failure.
    #[error("command `{program}` failed: {detail}")]
    Command {
        /// Executable that was invoked.
        program: String,
        /// Captured stderr or spawn error.
        detail: String,
    },

    /// An I/O operation failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path where the I/O error occurred.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
}

impl NetblameError {
    /// Returns the process exit status for this error category.
    ///
    /// Fatal categories carry distinct codes; wrapped lower-level failures
    /// that escaped without being classified map to the generic `1`.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::Config { .. } => 2,
            Self::AlreadyRunning { .. } => 3,
            Self::Privilege { .. } => 4,
            Self::MissingDependency { .. } => 5,
            Self::Setup { .. } => 6,
            Self::Stream { .. } => 7,
            Self::Teardown { .. } | Self::Command { .. } | Self::Io { .. } => 1,
        }
    }
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, NetblameError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_are_distinct_per_fatal_category() {
        let errors = [
            NetblameError::Config { message: "m".into() },
            NetblameError::AlreadyRunning { path: "/run/x.lock".into() },
            NetblameError::Privilege { message: "m".into() },
            NetblameError::MissingDependency { tool: "tc".into() },
            NetblameError::Setup { stage: "shaping", detail: "d".into() },
            NetblameError::Stream { detail: "d".into() },
        ];
        let mut codes: Vec<i32> = errors.iter().map(NetblameError::exit_code).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
    }

    #[test]
    fn display_includes_failing_stage() {
        let err = NetblameError::Setup { stage: "classifier", detail: "chain exists".into() };
        assert!(err.to_string().contains("classifier"));
    }
}
