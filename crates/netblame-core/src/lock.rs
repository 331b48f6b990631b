//! Single-instance enforcement via an exclusive lock marker.
//!
//! The marker's existence for the lifetime of the run is the sole
//! guard against concurrent instances fighting over the interface's
//! qdisc and the firewall chain. There is no stale-lock detection: a
//! crashed run leaves the marker behind and the next run refuses to
//! start until it is removed manually.

use std::io::Write;
use std::path::{Path, PathBuf};

use netblame_common::error::{NetblameError, Result};

/// Held exclusive lock marker.
#[derive(Debug)]
pub struct InstanceLock {
    path: PathBuf,
}

impl InstanceLock {
    /// Creates the lock marker exclusively, failing fast if it exists.
    ///
    /// The holder's PID is written into the file as a diagnostic aid; it
    /// is never read back.
    ///
    /// # Errors
    ///
    /// Returns [`NetblameError::AlreadyRunning`] when the marker already
    /// exists, or [`NetblameError::Io`] on any other creation failure.
    pub fn acquire(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::AlreadyExists {
                    NetblameError::AlreadyRunning { path: path.clone() }
                } else {
                    NetblameError::Io { path: path.clone(), source: e }
                }
            })?;
        let _ = writeln!(file, "{}", std::process::id());
        tracing::debug!(path = %path.display(), "instance lock acquired");
        Ok(Self { path })
    }

    /// Returns the marker path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Deletes the lock marker, consuming the handle.
    ///
    /// Called only after all network state has been torn down.
    ///
    /// # Errors
    ///
    /// Returns [`NetblameError::Io`] if the marker cannot be removed.
    pub fn release(self) -> Result<()> {
        std::fs::remove_file(&self.path)
            .map_err(|e| NetblameError::Io { path: self.path.clone(), source: e })?;
        tracing::debug!(path = %self.path.display(), "instance lock released");
        Ok(())
    }
}
