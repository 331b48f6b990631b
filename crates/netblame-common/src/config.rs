//! Immutable run configuration.
//!
//! Constructed once by the CLI layer after argument parsing, validated
//! before any network mutation, and passed by reference to each
//! component at construction.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{NetblameError, Result};
use crate::types::{Protocol, TrafficFilter};

/// Root configuration for one monitoring run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Selection predicate shared by shaping and classification.
    pub filter: TrafficFilter,
    /// Artificial delay injected into matching traffic, in milliseconds.
    pub delay_ms: u64,
    /// Ceiling on classification events per rate-limit key, per minute.
    pub rate_per_minute: u32,
    /// Optional executable invoked with each resolved PID.
    pub action: Option<PathBuf>,
    /// Egress interface override; auto-detected when `None`.
    pub interface: Option<String>,
}

impl MonitorConfig {
    /// Validates the configuration before any network state is touched.
    ///
    /// # Errors
    ///
    /// Returns [`NetblameError::Config`] if no protocol is selected, a
    /// protocol is selected twice, SYN-only matching is requested without
    /// TCP, or the delay or rate ceiling is zero.
    pub fn validate(&self) -> Result<()> {
        if self.filter.protocols.is_empty() {
            return Err(NetblameError::Config {
                message: "at least one of TCP or UDP must be selected".into(),
            });
        }
        let mut seen = self.filter.protocols.clone();
        seen.sort_unstable_by_key(|p| p.as_str());
        seen.dedup();
        if seen.len() != self.filter.protocols.len() {
            return Err(NetblameError::Config {
                message: "a protocol was selected more than once".into(),
            });
        }
        if self.filter.tcp_syn_only && !self.filter.selects(Protocol::Tcp) {
            return Err(NetblameError::Config {
                message: "SYN-only matching requires TCP to be selected".into(),
            });
        }
        if self.delay_ms == 0 {
            return Err(NetblameError::Config {
                message: "delay must be greater than zero; the correlation window depends on it"
                    .into(),
            });
        }
        if self.rate_per_minute == 0 {
            return Err(NetblameError::Config {
                message: "rate limit must be greater than zero".into(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> MonitorConfig {
        MonitorConfig {
            filter: TrafficFilter {
                dest: "192.0.2.7".parse().expect("addr"),
                dest_port: Some(443),
                protocols: vec![Protocol::Tcp],
                tcp_syn_only: false,
            },
            delay_ms: 500,
            rate_per_minute: 20,
            action: None,
            interface: None,
        }
    }

    #[test]
    fn valid_config_passes() {
        base_config().validate().expect("valid");
    }

    #[test]
    fn empty_protocol_set_is_rejected() {
        let mut cfg = base_config();
        cfg.filter.protocols.clear();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn duplicate_protocol_is_rejected() {
        let mut cfg = base_config();
        cfg.filter.protocols = vec![Protocol::Tcp, Protocol::Tcp];
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn syn_only_without_tcp_is_rejected() {
        let mut cfg = base_config();
        cfg.filter.protocols = vec![Protocol::Udp];
        cfg.filter.tcp_syn_only = true;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn zero_delay_is_rejected() {
        let mut cfg = base_config();
        cfg.delay_ms = 0;
        assert!(cfg.validate().is_err());
    }
}
