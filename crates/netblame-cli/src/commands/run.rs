//! `netblame run` — monitor and attribute traffic toward a target.

use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use clap::Args;

use netblame_common::config::MonitorConfig;
use netblame_common::constants::{DEFAULT_DELAY_MS, DEFAULT_RATE_PER_MINUTE};
use netblame_common::types::{Protocol, TrafficFilter};
use netblame_core::events::JournalStream;
use netblame_core::session::Session;
use netblame_core::{iface, preflight};

use crate::output::{self, BOLD, CYAN, DIM, RESET, YELLOW};

/// Arguments for the `run` command.
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Destination address whose traffic should be attributed.
    #[arg(long)]
    pub target: IpAddr,

    /// Destination port; all ports when omitted.
    #[arg(long)]
    pub port: Option<u16>,

    /// Monitor TCP traffic.
    #[arg(long)]
    pub tcp: bool,

    /// Monitor UDP traffic.
    #[arg(long)]
    pub udp: bool,

    /// Match only TCP connection-opening (SYN) packets.
    #[arg(long, requires = "tcp")]
    pub syn_only: bool,

    /// Delay injected into matching traffic, in milliseconds.
    #[arg(long, default_value_t = DEFAULT_DELAY_MS)]
    pub delay_ms: u64,

    /// Ceiling on classification events per connection key, per minute.
    #[arg(long, default_value_t = DEFAULT_RATE_PER_MINUTE)]
    pub rate_limit: u32,

    /// Executable invoked with each resolved PID as its sole argument.
    #[arg(long)]
    pub action: Option<PathBuf>,

    /// Egress interface; auto-detected from the route table when
    /// omitted.
    #[arg(long)]
    pub interface: Option<String>,

    /// Emit attribution results as JSON objects, one per line.
    #[arg(long)]
    pub json: bool,
}

impl RunArgs {
    fn into_config(self) -> (MonitorConfig, bool) {
        let mut protocols = Vec::new();
        if self.tcp {
            protocols.push(Protocol::Tcp);
        }
        if self.udp {
            protocols.push(Protocol::Udp);
        }
        let config = MonitorConfig {
            filter: TrafficFilter {
                dest: self.target,
                dest_port: self.port,
                protocols,
                tcp_syn_only: self.syn_only,
            },
            delay_ms: self.delay_ms,
            rate_per_minute: self.rate_limit,
            action: self.action,
            interface: self.interface,
        };
        (config, self.json)
    }
}

/// Executes the `run` command.
///
/// # Errors
///
/// Returns an error for any fatal pipeline condition: invalid
/// configuration, missing privileges or tools, a concurrent instance,
/// setup failure, or event stream failure.
pub fn execute(args: RunArgs) -> anyhow::Result<()> {
    let (config, json) = args.into_config();
    config.validate()?;
    preflight::ensure_root()?;
    preflight::ensure_dependencies()?;

    let interface = match &config.interface {
        Some(name) => name.clone(),
        None => iface::detect_egress_interface()?,
    };
    print_header(&config, &interface);

    // Spawn the follower before wiring the signal handler so the
    // handler can unblock a reader waiting on a sparse stream.
    let mut stream = JournalStream::spawn()?;
    let terminator = stream.terminator();
    let cancel = Arc::new(AtomicBool::new(false));
    {
        let cancel = Arc::clone(&cancel);
        ctrlc::set_handler(move || {
            eprintln!();
            eprintln!("  Interrupted; restoring network state...");
            cancel.store(true, Ordering::SeqCst);
            terminator.terminate();
        })
        .map_err(|e| anyhow::anyhow!("failed to set Ctrl+C handler: {e}"))?;
    }

    let mut session = Session::new(config, interface);
    let mut sink = output::ConsoleSink::new(json);
    session.run(&mut stream, &cancel, &mut sink)?;

    print_summary(&sink);
    Ok(())
}

fn print_header(config: &MonitorConfig, interface: &str) {
    let port = config
        .filter
        .dest_port
        .map_or_else(|| "any port".to_string(), |p| format!("port {p}"));
    let protocols: Vec<&str> =
        config.filter.protocols.iter().map(|p| p.as_str()).collect();

    eprintln!();
    eprintln!("  {BOLD}netblame{RESET} {DIM}v{}{RESET}", env!("CARGO_PKG_VERSION"));
    eprintln!();
    eprintln!(
        "  Watching {CYAN}{}{RESET} ({port}, {}) via {BOLD}{interface}{RESET}, +{}ms delay",
        config.filter.dest,
        protocols.join("+"),
        config.delay_ms
    );
    eprintln!("  {DIM}Note: the root qdisc on {interface} is replaced for the duration.{RESET}");
    eprintln!();
    eprintln!("  Press {BOLD}Ctrl+C{RESET} to stop and restore network state...");
    eprintln!();
}

fn print_summary(sink: &output::ConsoleSink) {
    eprintln!();
    eprintln!(
        "  Attributed {BOLD}{}{RESET} event(s); {YELLOW}{}{RESET} unresolved, {DIM}{}{RESET} malformed.",
        sink.attributed, sink.unresolved, sink.degraded
    );
    if sink.unresolved > 0 {
        eprintln!(
            "  {DIM}Unresolved events usually mean the sender exited before it could be observed.{RESET}"
        );
    }
}
