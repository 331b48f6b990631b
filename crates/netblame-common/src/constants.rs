//! System-wide constants and default paths.

/// Application name used in CLI output and derived identifiers.
pub const APP_NAME: &str = "netblame";

/// Exclusive lock marker guarding against concurrent instances.
///
/// The path is fixed and well known; a crashed run leaves it behind and
/// must be cleaned up manually (`netblame cleanup`).
pub const LOCK_PATH: &str = "/run/netblame.lock";

/// Probe destination handed to `ip route get` when auto-detecting the
/// egress interface. Never contacted; only the route table is consulted.
pub const ROUTE_PROBE_ADDR: &str = "1.1.1.1";

/// Handle of the priority root queuing discipline installed on the
/// egress interface.
pub const ROOT_QDISC_HANDLE: &str = "1:";

/// Number of bands configured on the priority root discipline.
pub const PRIO_BANDS: u8 = 3;

/// Band the delay discipline is attached to; match rules steer filtered
/// traffic here.
pub const DELAY_BAND: &str = "1:1";

/// Handle of the delay-inducing child discipline.
pub const DELAY_QDISC_HANDLE: &str = "10:";

/// Prefix of the per-run firewall chain; the run tag is appended.
pub const CHAIN_PREFIX: &str = "NETBLAME_";

/// Prefix of the kernel log lines emitted by the classification rules.
///
/// The kernel truncates LOG prefixes at 29 characters; prefix plus the
/// 8-hex-character run tag and separators stays within that limit.
pub const LOG_PREFIX: &str = "NETBLAME:";

/// Prefix of the comment annotating the OUTPUT jump rules, so teardown
/// can find exactly the insertion points this run installed.
pub const COMMENT_PREFIX: &str = "netblame:";

/// Default artificial delay injected into matching traffic, in
/// milliseconds.
pub const DEFAULT_DELAY_MS: u64 = 500;

/// Default ceiling on classification events per rate-limit key, per
/// minute.
pub const DEFAULT_RATE_PER_MINUTE: u32 = 20;

/// External tools the run shells out to; checked before setup.
pub const REQUIRED_TOOLS: &[&str] = &["tc", "iptables", "journalctl", "lsof", "ip"];
