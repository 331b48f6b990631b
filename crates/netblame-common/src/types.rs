//! Domain primitive types used across the netblame workspace.

use std::fmt;
use std::net::IpAddr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Transport protocol selected for monitoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Protocol {
    /// Transmission Control Protocol.
    Tcp,
    /// User Datagram Protocol.
    Udp,
}

impl Protocol {
    /// Returns the lowercase protocol name as used by `tc`, `iptables`,
    /// and `lsof`.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Tcp => "tcp",
            Self::Udp => "udp",
        }
    }

    /// Returns the IP protocol number used in `u32` match rules.
    #[must_use]
    pub const fn ip_proto_number(self) -> u8 {
        match self {
            Self::Tcp => 6,
            Self::Udp => 17,
        }
    }

    /// Parses a protocol token from a classification log line.
    ///
    /// The kernel logs `PROTO=TCP`; tools downstream expect lowercase, so
    /// matching is case-insensitive.
    #[must_use]
    pub fn from_token(token: &str) -> Option<Self> {
        if token.eq_ignore_ascii_case("tcp") {
            Some(Self::Tcp)
        } else if token.eq_ignore_ascii_case("udp") {
            Some(Self::Udp)
        } else {
            None
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Unique identifier for one run, embedded in every piece of network
/// state this tool installs so teardown can find exactly its own rules.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunTag(String);

impl RunTag {
    /// Creates a tag from an existing string value.
    #[must_use]
    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }

    /// Generates a random 8-hex-character tag.
    #[must_use]
    pub fn generate() -> Self {
        let hex = uuid::Uuid::new_v4().simple().to_string();
        Self(hex[..8].to_string())
    }

    /// Returns the inner string representation.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the firewall chain name for this run.
    #[must_use]
    pub fn chain_name(&self) -> String {
        format!("{}{}", crate::constants::CHAIN_PREFIX, self.0.to_uppercase())
    }

    /// Returns the kernel log prefix carried by this run's LOG rules,
    /// including the trailing separator and space.
    #[must_use]
    pub fn log_prefix(&self) -> String {
        format!("{}{}: ", crate::constants::LOG_PREFIX, self.0)
    }

    /// Returns the comment annotating this run's OUTPUT jump rules.
    #[must_use]
    pub fn comment(&self) -> String {
        format!("{}{}", crate::constants::COMMENT_PREFIX, self.0)
    }
}

impl fmt::Display for RunTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Selection predicate shared by the shaping and classification rules.
///
/// Immutable for the process lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrafficFilter {
    /// Destination address to match.
    pub dest: IpAddr,
    /// Destination port to match; `None` means any port.
    pub dest_port: Option<u16>,
    /// Protocols to monitor. Never empty in a validated configuration.
    pub protocols: Vec<Protocol>,
    /// Restrict TCP matching to connection-opening (SYN) packets.
    pub tcp_syn_only: bool,
}

impl TrafficFilter {
    /// Returns whether the given protocol is selected by this filter.
    #[must_use]
    pub fn selects(&self, protocol: Protocol) -> bool {
        self.protocols.contains(&protocol)
    }
}

/// One parsed classification event.
///
/// Produced from a single log line and consumed immediately by the
/// correlation step; never persisted.
#[derive(Debug, Clone)]
pub struct AttributionEvent {
    /// Protocol token extracted from the line, if present.
    pub protocol: Option<Protocol>,
    /// Source-port token extracted from the line, if present.
    pub src_port: Option<u16>,
    /// The raw log line the event was parsed from.
    pub raw: String,
    /// When the line was consumed.
    pub timestamp: DateTime<Utc>,
}

/// Outcome of correlating one event with the process/socket table.
#[derive(Debug, Clone, Serialize)]
pub struct AttributionResult {
    /// Source port of the observed packet.
    pub src_port: Option<u16>,
    /// Protocol of the observed packet.
    pub protocol: Option<Protocol>,
    /// Resolved owning process, when one was found.
    pub pid: Option<u32>,
    /// Why resolution came up empty, when `pid` is absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}
