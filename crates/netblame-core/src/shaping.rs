//! Traffic shaping: injects an artificial delay into matching egress
//! traffic to widen the window between "packet sent" and "process
//! queried".
//!
//! Installing the shaper replaces the interface's root queuing
//! discipline; prior qdisc state on that interface is not preserved.
//! This is a documented destructive prerequisite of running the tool.

use std::net::IpAddr;

use netblame_common::constants::{DELAY_BAND, DELAY_QDISC_HANDLE, PRIO_BANDS, ROOT_QDISC_HANDLE};
use netblame_common::error::{NetblameError, Result};
use netblame_common::types::{Protocol, TrafficFilter};

use crate::cmd;

/// Match predicate for one qdisc filter rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterMatch {
    /// Transport protocol to match.
    pub protocol: Protocol,
    /// Destination address to match.
    pub dest: IpAddr,
    /// Destination port to match; `None` means any port.
    pub dest_port: Option<u16>,
}

/// Queuing-discipline configuration capability.
///
/// Implementors handle the platform-specific details; the real adapter
/// shells out to `tc`, tests substitute a recording fake.
pub trait QdiscOps {
    /// Deletes the root qdisc on `iface`, treating "nothing to delete"
    /// as success.
    ///
    /// # Errors
    ///
    /// Returns an error only for failures other than an absent root
    /// qdisc.
    fn reset(&self, iface: &str) -> Result<()>;

    /// Installs a priority-banded root qdisc.
    ///
    /// # Errors
    ///
    /// Returns an error if the qdisc cannot be added.
    fn add_root_priority(&self, iface: &str, handle: &str, bands: u8) -> Result<()>;

    /// Attaches a delay-inducing qdisc to one band of the root.
    ///
    /// # Errors
    ///
    /// Returns an error if the qdisc cannot be added.
    fn add_delay(&self, iface: &str, parent_band: &str, handle: &str, delay_ms: u64) -> Result<()>;

    /// Installs a match rule steering packets satisfying `rule` into
    /// `band`.
    ///
    /// # Errors
    ///
    /// Returns an error if the filter cannot be added.
    fn add_filter_rule(&self, iface: &str, parent: &str, rule: &FilterMatch, band: &str)
    -> Result<()>;
}

/// Real adapter invoking the `tc` utility.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcQdisc;

impl TcQdisc {
    /// Creates the adapter.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

/// Stderr markers `tc` emits when asked to delete a root qdisc that was
/// never installed.
const NOTHING_TO_DELETE: &[&str] = &[
    "No such file or directory",
    "Cannot delete qdisc with handle of zero",
    "Invalid handle",
];

impl QdiscOps for TcQdisc {
    fn reset(&self, iface: &str) -> Result<()> {
        let out = cmd::run_unchecked("tc", &["qdisc", "del", "dev", iface, "root"])?;
        if out.success() || NOTHING_TO_DELETE.iter().any(|m| out.stderr.contains(m)) {
            Ok(())
        } else {
            Err(NetblameError::Command {
                program: "tc".into(),
                detail: out.stderr.trim().to_string(),
            })
        }
    }

    fn add_root_priority(&self, iface: &str, handle: &str, bands: u8) -> Result<()> {
        let bands = bands.to_string();
        let _ = cmd::run(
            "tc",
            &["qdisc", "add", "dev", iface, "root", "handle", handle, "prio", "bands", &bands],
        )?;
        Ok(())
    }

    fn add_delay(&self, iface: &str, parent_band: &str, handle: &str, delay_ms: u64) -> Result<()> {
        let delay = format!("{delay_ms}ms");
        let _ = cmd::run(
            "tc",
            &[
                "qdisc", "add", "dev", iface, "parent", parent_band, "handle", handle, "netem",
                "delay", &delay,
            ],
        )?;
        Ok(())
    }

    fn add_filter_rule(
        &self,
        iface: &str,
        parent: &str,
        rule: &FilterMatch,
        band: &str,
    ) -> Result<()> {
        // u32 selectors differ between address families.
        let (ether_proto, selector, prefix_len) = if rule.dest.is_ipv4() {
            ("ip", "ip", 32)
        } else {
            ("ipv6", "ip6", 128)
        };
        let proto_number = rule.protocol.ip_proto_number().to_string();
        let dest = format!("{}/{prefix_len}", rule.dest);

        let mut args: Vec<String> = [
            "filter", "add", "dev", iface, "parent", parent, "protocol", ether_proto, "prio",
            "1", "u32", "match", selector, "protocol",
        ]
        .iter()
        .map(ToString::to_string)
        .collect();
        args.extend([proto_number, "0xff".into()]);
        args.extend(["match".into(), selector.into(), "dst".into(), dest]);
        if let Some(port) = rule.dest_port {
            args.extend([
                "match".into(),
                selector.into(),
                "dport".into(),
                port.to_string(),
                "0xffff".into(),
            ]);
        }
        args.extend(["flowid".into(), band.into()]);

        let _ = cmd::run("tc", &args)?;
        Ok(())
    }
}

/// Installed shaping configuration, exclusively owned by the
/// controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShapingState {
    /// Interface the configuration lives on.
    pub interface: String,
    /// Injected delay in milliseconds.
    pub delay_ms: u64,
    /// Handle of the installed root qdisc.
    pub root_handle: &'static str,
}

/// Programs the egress queuing discipline that creates the correlation
/// window.
pub struct ShapingController {
    ops: Box<dyn QdiscOps>,
    state: Option<ShapingState>,
}

impl ShapingController {
    /// Creates a controller over the given qdisc capability.
    #[must_use]
    pub fn new(ops: Box<dyn QdiscOps>) -> Self {
        Self { ops, state: None }
    }

    /// Returns whether a shaping configuration is currently installed.
    #[must_use]
    pub const fn is_installed(&self) -> bool {
        self.state.is_some()
    }

    /// Installs the delay configuration on `iface`.
    ///
    /// Resets any existing root qdisc (absence is not an error), adds a
    /// priority root, attaches the delay qdisc to its first band, and
    /// steers packets matching `filter` into that band with one rule
    /// per selected protocol.
    ///
    /// # Errors
    ///
    /// Returns [`NetblameError::Setup`] on any failure; without the
    /// delay there is no correlation window, so the run cannot proceed.
    pub fn install(&mut self, filter: &TrafficFilter, delay_ms: u64, iface: &str) -> Result<()> {
        let result = (|| -> Result<()> {
            self.ops.reset(iface)?;
            self.ops.add_root_priority(iface, ROOT_QDISC_HANDLE, PRIO_BANDS)?;
            self.ops.add_delay(iface, DELAY_BAND, DELAY_QDISC_HANDLE, delay_ms)?;
            for &protocol in &filter.protocols {
                let rule =
                    FilterMatch { protocol, dest: filter.dest, dest_port: filter.dest_port };
                self.ops.add_filter_rule(iface, ROOT_QDISC_HANDLE, &rule, DELAY_BAND)?;
            }
            Ok(())
        })();

        match result {
            Ok(()) => {
                self.state = Some(ShapingState {
                    interface: iface.to_string(),
                    delay_ms,
                    root_handle: ROOT_QDISC_HANDLE,
                });
                tracing::info!(iface, delay_ms, "shaping installed");
                Ok(())
            }
            Err(e) => {
                // A partial install still owns the root qdisc; tear it
                // down so a failed setup leaves the interface unshaped.
                let _ = self.ops.reset(iface);
                Err(NetblameError::Setup { stage: "shaping", detail: e.to_string() })
            }
        }
    }

    /// Removes the installed root qdisc, restoring default behavior.
    ///
    /// A no-op when nothing was installed. A leftover shaping rule only
    /// adds latency, never wrong attribution, so callers treat failures
    /// here as a warning, not an abort.
    ///
    /// # Errors
    ///
    /// Returns [`NetblameError::Teardown`] if the deletion fails; the
    /// interface then needs manual cleanup.
    pub fn remove(&mut self) -> Result<()> {
        let Some(state) = self.state.take() else {
            return Ok(());
        };
        self.ops.reset(&state.interface).map_err(|e| NetblameError::Teardown {
            stage: "shaping removal",
            detail: e.to_string(),
        })?;
        tracing::info!(iface = %state.interface, "shaping removed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;

    /// Records every qdisc operation; optionally fails a named one.
    struct RecordingQdisc {
        calls: Rc<RefCell<Vec<String>>>,
        fail_on: Option<&'static str>,
    }

    impl RecordingQdisc {
        fn record(&self, call: String) -> Result<()> {
            let op = call.split(' ').next().unwrap_or_default().to_string();
            self.calls.borrow_mut().push(call);
            if self.fail_on == Some(op.as_str()) {
                Err(NetblameError::Command { program: "tc".into(), detail: "boom".into() })
            } else {
                Ok(())
            }
        }
    }

    impl QdiscOps for RecordingQdisc {
        fn reset(&self, iface: &str) -> Result<()> {
            self.record(format!("reset {iface}"))
        }
        fn add_root_priority(&self, iface: &str, handle: &str, bands: u8) -> Result<()> {
            self.record(format!("root {iface} {handle} {bands}"))
        }
        fn add_delay(
            &self,
            iface: &str,
            parent_band: &str,
            handle: &str,
            delay_ms: u64,
        ) -> Result<()> {
            self.record(format!("delay {iface} {parent_band} {handle} {delay_ms}"))
        }
        fn add_filter_rule(
            &self,
            iface: &str,
            _parent: &str,
            rule: &FilterMatch,
            band: &str,
        ) -> Result<()> {
            self.record(format!("filter {iface} {} {band}", rule.protocol))
        }
    }

    fn filter(protocols: Vec<Protocol>) -> TrafficFilter {
        TrafficFilter {
            dest: "192.0.2.7".parse().expect("addr"),
            dest_port: Some(443),
            protocols,
            tcp_syn_only: false,
        }
    }

    fn controller(fail_on: Option<&'static str>) -> (ShapingController, Rc<RefCell<Vec<String>>>) {
        let calls = Rc::new(RefCell::new(Vec::new()));
        let ops = RecordingQdisc { calls: Rc::clone(&calls), fail_on };
        (ShapingController::new(Box::new(ops)), calls)
    }

    #[test]
    fn install_sequences_reset_root_delay_filters() {
        let (mut shaper, calls) = controller(None);
        shaper.install(&filter(vec![Protocol::Tcp, Protocol::Udp]), 500, "eth0").expect("install");

        assert_eq!(
            *calls.borrow(),
            vec![
                "reset eth0",
                "root eth0 1: 3",
                "delay eth0 1:1 10: 500",
                "filter eth0 tcp 1:1",
                "filter eth0 udp 1:1",
            ]
        );
        assert!(shaper.is_installed());
    }

    #[test]
    fn install_then_remove_resets_the_interface_again() {
        let (mut shaper, calls) = controller(None);
        shaper.install(&filter(vec![Protocol::Tcp]), 250, "eth0").expect("install");
        shaper.remove().expect("remove");

        assert_eq!(calls.borrow().last().map(String::as_str), Some("reset eth0"));
        assert!(!shaper.is_installed());
    }

    #[test]
    fn failed_install_is_a_setup_error_and_resets() {
        let (mut shaper, calls) = controller(Some("delay"));
        let err = shaper.install(&filter(vec![Protocol::Tcp]), 500, "eth0").expect_err("fails");

        assert!(matches!(err, NetblameError::Setup { stage: "shaping", .. }));
        assert!(!shaper.is_installed());
        // The partial root qdisc is torn down again.
        assert_eq!(calls.borrow().last().map(String::as_str), Some("reset eth0"));
    }

    #[test]
    fn remove_without_install_is_a_noop() {
        let (mut shaper, calls) = controller(None);
        shaper.remove().expect("noop remove");
        assert!(calls.borrow().is_empty());
    }
}
