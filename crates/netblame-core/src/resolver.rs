//! Process/socket table lookup.
//!
//! Maps a transport-layer (protocol, local port) tuple to the
//! process(es) currently holding that socket.

use netblame_common::error::Result;
use netblame_common::types::Protocol;

use crate::cmd;

/// Socket-to-process resolution capability.
pub trait SocketResolver {
    /// Returns the PIDs holding a socket on (`protocol`, `port`), in
    /// the order the system lists them. An empty list is the expected
    /// outcome of the inherent race: the sender may already have
    /// exited.
    ///
    /// # Errors
    ///
    /// Returns an error if the lookup facility itself fails.
    fn find_owning_process(&self, protocol: Protocol, port: u16) -> Result<Vec<u32>>;
}

/// Real adapter invoking `lsof`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LsofResolver;

impl LsofResolver {
    /// Creates the adapter.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl SocketResolver for LsofResolver {
    fn find_owning_process(&self, protocol: Protocol, port: u16) -> Result<Vec<u32>> {
        let spec = format!("{}:{port}", protocol.as_str());
        // lsof exits 1 when nothing matches; that is an empty result,
        // not a failure.
        let out = cmd::run_unchecked("lsof", &["-t", "-i", &spec])?;
        let pids = out.stdout.lines().filter_map(|line| line.trim().parse::<u32>().ok()).collect();
        Ok(pids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_spec_formats_protocol_and_port() {
        // Mirrors the argument LsofResolver builds.
        assert_eq!(format!("{}:{}", Protocol::Tcp.as_str(), 4321), "tcp:4321");
        assert_eq!(format!("{}:{}", Protocol::Udp.as_str(), 53), "udp:53");
    }
}
