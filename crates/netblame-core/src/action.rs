//! Optional user-supplied side-effect action.
//!
//! Once a process identifier is resolved, an external handler can be
//! invoked with that identifier as its sole argument. The handler's
//! exit status is logged and never propagated as a pipeline error.

use std::path::PathBuf;

/// Handle to the user-supplied action executable.
#[derive(Debug, Clone)]
pub struct ActionHook {
    path: PathBuf,
}

impl ActionHook {
    /// Creates a hook for the given executable path.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Runs the handler synchronously with the PID as its argument.
    ///
    /// Spawn failures and non-zero exits are logged, not returned: a
    /// broken handler must not stall or abort the pipeline.
    pub fn invoke(&self, pid: u32) {
        match std::process::Command::new(&self.path).arg(pid.to_string()).status() {
            Ok(status) => {
                tracing::info!(handler = %self.path.display(), pid, %status, "action handler ran");
            }
            Err(e) => {
                tracing::warn!(handler = %self.path.display(), pid, error = %e, "action handler failed to start");
            }
        }
    }
}
