//! Precondition checks run before any network state is touched.

use std::path::PathBuf;

use netblame_common::constants::REQUIRED_TOOLS;
use netblame_common::error::{NetblameError, Result};

/// Presence of one required external tool on `PATH`.
#[derive(Debug, Clone)]
pub struct ToolStatus {
    /// Executable name.
    pub tool: &'static str,
    /// Resolved path, when found.
    pub path: Option<PathBuf>,
}

/// Verifies the process runs with root privileges.
///
/// Shaping and classification both mutate host-global network state,
/// which the kernel only permits for root.
///
/// # Errors
///
/// Returns [`NetblameError::Privilege`] when the effective UID is not 0.
pub fn ensure_root() -> Result<()> {
    if nix::unistd::Uid::effective().is_root() {
        Ok(())
    } else {
        Err(NetblameError::Privilege {
            message: "root is required to program qdiscs and firewall rules".into(),
        })
    }
}

/// Locates every required external tool on `PATH`.
#[must_use]
pub fn locate_tools() -> Vec<ToolStatus> {
    REQUIRED_TOOLS
        .iter()
        .map(|tool| ToolStatus { tool, path: which::which(tool).ok() })
        .collect()
}

/// Verifies every required external tool is installed.
///
/// # Errors
///
/// Returns [`NetblameError::MissingDependency`] naming the first missing
/// tool.
pub fn ensure_dependencies() -> Result<()> {
    for status in locate_tools() {
        if status.path.is_none() {
            return Err(NetblameError::MissingDependency { tool: status.tool.to_string() });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn locate_tools_reports_every_required_tool() {
        let statuses = locate_tools();
        assert_eq!(statuses.len(), REQUIRED_TOOLS.len());
        for (status, tool) in statuses.iter().zip(REQUIRED_TOOLS) {
            assert_eq!(&status.tool, tool);
        }
    }
}
