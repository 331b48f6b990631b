//! Classification event stream.
//!
//! The classification rules log into the kernel ring buffer; this
//! module follows that buffer as a line-oriented, append-only stream.
//! The consume loop blocks on the next line with no timeout (traffic
//! may be sparse), so cancellation works by terminating the underlying
//! reader process, which unblocks the read with end-of-stream.

use std::io::{BufRead, BufReader};
use std::process::{Child, ChildStdout, Command, Stdio};

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;

use netblame_common::error::{NetblameError, Result};

/// A line-oriented, append-only source of classification events.
pub trait EventSource {
    /// Blocks until the next line is available.
    ///
    /// Returns `Ok(None)` at end of stream.
    ///
    /// # Errors
    ///
    /// Returns [`NetblameError::Stream`] if the stream becomes
    /// unreadable.
    fn next_line(&mut self) -> Result<Option<String>>;
}

/// Real adapter following the kernel log via `journalctl -kf`.
#[derive(Debug)]
pub struct JournalStream {
    child: Child,
    reader: BufReader<ChildStdout>,
}

impl JournalStream {
    /// Spawns the journal follower.
    ///
    /// `-o cat` strips journal metadata so each line is the raw kernel
    /// message; `--since now` skips historical entries.
    ///
    /// # Errors
    ///
    /// Returns [`NetblameError::Stream`] if `journalctl` cannot be
    /// spawned or its stdout cannot be captured.
    pub fn spawn() -> Result<Self> {
        let mut child = Command::new("journalctl")
            .args(["-kf", "-o", "cat", "--since", "now"])
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| NetblameError::Stream {
                detail: format!("failed to spawn journalctl: {e}"),
            })?;
        let stdout = child.stdout.take().ok_or_else(|| NetblameError::Stream {
            detail: "journalctl stdout was not captured".into(),
        })?;
        tracing::debug!(pid = child.id(), "journal follower spawned");
        Ok(Self { child, reader: BufReader::new(stdout) })
    }

    /// Returns a handle that can unblock a blocked reader from another
    /// thread by terminating the follower process.
    #[must_use]
    pub fn terminator(&self) -> StreamTerminator {
        StreamTerminator { pid: self.child.id() }
    }
}

impl EventSource for JournalStream {
    fn next_line(&mut self) -> Result<Option<String>> {
        let mut line = String::new();
        match self.reader.read_line(&mut line) {
            Ok(0) => Ok(None),
            Ok(_) => Ok(Some(line.trim_end().to_string())),
            Err(e) => Err(NetblameError::Stream { detail: e.to_string() }),
        }
    }
}

impl Drop for JournalStream {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// Cloneable handle terminating a [`JournalStream`]'s follower process.
#[derive(Debug, Clone, Copy)]
pub struct StreamTerminator {
    pid: u32,
}

impl StreamTerminator {
    /// Sends SIGTERM to the follower. Safe to call more than once; a
    /// follower that already exited is ignored.
    pub fn terminate(&self) {
        if let Ok(pid) = i32::try_from(self.pid) {
            let _ = signal::kill(Pid::from_raw(pid), Signal::SIGTERM);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A canned source used to exercise the trait contract.
    struct VecSource {
        lines: Vec<String>,
    }

    impl EventSource for VecSource {
        fn next_line(&mut self) -> Result<Option<String>> {
            if self.lines.is_empty() {
                Ok(None)
            } else {
                Ok(Some(self.lines.remove(0)))
            }
        }
    }

    #[test]
    fn source_yields_lines_then_end_of_stream() {
        let mut source = VecSource { lines: vec!["a".into(), "b".into()] };
        assert_eq!(source.next_line().expect("line"), Some("a".into()));
        assert_eq!(source.next_line().expect("line"), Some("b".into()));
        assert_eq!(source.next_line().expect("eof"), None);
    }
}
