//! Utilities for invoking external system commands.
//!
//! Every platform capability this tool depends on (`tc`, `iptables`,
//! `lsof`, `ip`) is reached through this runner so invocation and
//! failure capture stay uniform.

use std::process;

use netblame_common::error::{NetblameError, Result};

/// Captured output of a finished external command.
#[derive(Debug, Clone)]
pub struct CmdOutput {
    /// Exit code, if the process terminated normally.
    pub code: Option<i32>,
    /// Captured standard output, lossily decoded.
    pub stdout: String,
    /// Captured standard error, lossily decoded.
    pub stderr: String,
}

impl CmdOutput {
    /// Returns whether the command exited with status zero.
    #[must_use]
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

impl From<process::Output> for CmdOutput {
    fn from(value: process::Output) -> Self {
        Self {
            code: value.status.code(),
            stdout: String::from_utf8_lossy(&value.stdout).to_string(),
            stderr: String::from_utf8_lossy(&value.stderr).to_string(),
        }
    }
}

/// Runs a command and captures its output regardless of exit status.
///
/// # Errors
///
/// Returns [`NetblameError::Command`] only if the command cannot be
/// spawned at all.
pub fn run_unchecked<S: AsRef<str>>(program: &str, args: &[S]) -> Result<CmdOutput> {
    let args: Vec<&str> = args.iter().map(AsRef::as_ref).collect();
    tracing::debug!(program, ?args, "running command");

    let output = process::Command::new(program)
        .args(&args)
        .stdout(process::Stdio::piped())
        .stderr(process::Stdio::piped())
        .output()
        .map_err(|e| NetblameError::Command {
            program: program.to_string(),
            detail: e.to_string(),
        })?;
    let output = CmdOutput::from(output);

    if !output.success() {
        tracing::debug!(
            program,
            code = ?output.code,
            stderr = %output.stderr.trim(),
            "command returned non-zero status"
        );
    }
    Ok(output)
}

/// Runs a command and treats a non-zero exit status as an error.
///
/// # Errors
///
/// Returns [`NetblameError::Command`] if the command cannot be spawned
/// or exits non-zero; the captured stderr becomes the error detail.
pub fn run<S: AsRef<str>>(program: &str, args: &[S]) -> Result<CmdOutput> {
    let output = run_unchecked(program, args)?;
    if output.success() {
        Ok(output)
    } else {
        Err(NetblameError::Command {
            program: program.to_string(),
            detail: if output.stderr.trim().is_empty() {
                format!("exit status {:?}", output.code)
            } else {
                output.stderr.trim().to_string()
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn successful_command_captures_stdout() {
        let out = run("echo", &["hello"]).expect("echo should run");
        assert_eq!(out.stdout.trim(), "hello");
        assert!(out.success());
    }

    #[test]
    fn missing_program_is_a_command_error() {
        let err = run::<&str>("netblame-no-such-binary", &[]).expect_err("must fail");
        assert!(matches!(err, NetblameError::Command { .. }));
    }

    #[test]
    fn non_zero_exit_is_an_error_for_checked_run() {
        let err = run("false", &[] as &[&str]).expect_err("false exits 1");
        assert!(matches!(err, NetblameError::Command { .. }));
    }

    #[test]
    fn non_zero_exit_is_captured_by_unchecked_run() {
        let out = run_unchecked("false", &[] as &[&str]).expect("spawn succeeds");
        assert!(!out.success());
    }
}
