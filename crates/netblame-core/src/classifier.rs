//! Packet classification and rate-limited event logging.
//!
//! Installs a dedicated, uniquely-tagged firewall chain whose rules log
//! one event per matching outbound packet, capped per (source IP,
//! destination IP, source port) key so a single chatty connection
//! cannot flood the correlator. The cap is keyed by source port, so an
//! application opening many short-lived connections (new source port
//! each time) is not protected against flooding. Known limitation.

use std::net::IpAddr;

use netblame_common::error::{NetblameError, Result};
use netblame_common::types::{Protocol, RunTag, TrafficFilter};

use crate::cmd;

/// One logging rule appended to the classification chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRule {
    /// Transport protocol to match.
    pub protocol: Protocol,
    /// Destination address to match.
    pub dest: IpAddr,
    /// Destination port to match; `None` means any port.
    pub dest_port: Option<u16>,
    /// Restrict matching to connection-opening (SYN) packets. TCP only.
    pub syn_only: bool,
    /// Ceiling on logged events per rate-limit key, per minute. Burst
    /// allowance is exactly one: strict steady-state rate, no credit.
    pub rate_per_minute: u32,
    /// Name of the kernel's rate-limit bucket table for this rule.
    pub limit_name: String,
    /// Prefix stamped on every emitted log line.
    pub log_prefix: String,
}

/// One rule currently present in the outbound path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputRule {
    /// 1-based position within the OUTPUT chain.
    pub index: u32,
    /// The rule specification as printed by the firewall.
    pub spec: String,
}

/// Packet-classification configuration capability.
///
/// The real adapter shells out to `iptables`; tests substitute a
/// recording fake.
pub trait FirewallOps {
    /// Creates a dedicated rule chain.
    ///
    /// # Errors
    ///
    /// Returns an error if the chain cannot be created.
    fn create_chain(&self, chain: &str) -> Result<()>;

    /// Appends one rate-limited logging rule to `chain`.
    ///
    /// # Errors
    ///
    /// Returns an error if the rule cannot be appended.
    fn append_log_rule(&self, chain: &str, rule: &LogRule) -> Result<()>;

    /// Inserts a jump to `chain` into the outbound path at `position`,
    /// annotated with `comment` for later identification.
    ///
    /// # Errors
    ///
    /// Returns an error if the jump cannot be inserted.
    fn insert_output_jump(&self, chain: &str, position: u32, comment: &str) -> Result<()>;

    /// Lists the rules currently in the outbound path, in order.
    ///
    /// # Errors
    ///
    /// Returns an error if the listing fails.
    fn list_output_rules(&self) -> Result<Vec<OutputRule>>;

    /// Deletes the outbound-path rule at the given 1-based position.
    ///
    /// # Errors
    ///
    /// Returns an error if the deletion fails.
    fn delete_output_rule(&self, index: u32) -> Result<()>;

    /// Removes every rule from `chain`.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush fails.
    fn flush_chain(&self, chain: &str) -> Result<()>;

    /// Deletes the (empty) chain itself.
    ///
    /// # Errors
    ///
    /// Returns an error if the deletion fails.
    fn delete_chain(&self, chain: &str) -> Result<()>;

    /// Lists all user-defined chain names.
    ///
    /// # Errors
    ///
    /// Returns an error if the listing fails.
    fn list_chains(&self) -> Result<Vec<String>>;
}

/// Real adapter invoking the `iptables` utility.
#[derive(Debug, Clone, Copy, Default)]
pub struct IptablesFirewall;

impl IptablesFirewall {
    /// Creates the adapter.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl FirewallOps for IptablesFirewall {
    fn create_chain(&self, chain: &str) -> Result<()> {
        let _ = cmd::run("iptables", &["-N", chain])?;
        Ok(())
    }

    fn append_log_rule(&self, chain: &str, rule: &LogRule) -> Result<()> {
        let dest = rule.dest.to_string();
        let upto = format!("{}/minute", rule.rate_per_minute);

        let mut args: Vec<String> =
            vec!["-A".into(), chain.into(), "-p".into(), rule.protocol.as_str().into()];
        args.extend(["-d".into(), dest]);
        if let Some(port) = rule.dest_port {
            args.extend(["--dport".into(), port.to_string()]);
        }
        if rule.syn_only {
            args.push("--syn".into());
        }
        args.extend([
            "-m".into(),
            "hashlimit".into(),
            "--hashlimit-upto".into(),
            upto,
            "--hashlimit-burst".into(),
            "1".into(),
            "--hashlimit-mode".into(),
            "srcip,dstip,srcport".into(),
            "--hashlimit-name".into(),
            rule.limit_name.clone(),
        ]);
        args.extend([
            "-j".into(),
            "LOG".into(),
            "--log-prefix".into(),
            rule.log_prefix.clone(),
            "--log-level".into(),
            "4".into(),
        ]);

        let _ = cmd::run("iptables", &args)?;
        Ok(())
    }

    fn insert_output_jump(&self, chain: &str, position: u32, comment: &str) -> Result<()> {
        let position = position.to_string();
        let _ = cmd::run(
            "iptables",
            &["-I", "OUTPUT", &position, "-j", chain, "-m", "comment", "--comment", comment],
        )?;
        Ok(())
    }

    fn list_output_rules(&self) -> Result<Vec<OutputRule>> {
        let out = cmd::run("iptables", &["-S", "OUTPUT"])?;
        // `-S` prints the policy line first, then rules in position order.
        let rules = out
            .stdout
            .lines()
            .filter(|line| !line.starts_with("-P "))
            .enumerate()
            .map(|(i, line)| OutputRule {
                index: u32::try_from(i).unwrap_or(u32::MAX).saturating_add(1),
                spec: line.to_string(),
            })
            .collect();
        Ok(rules)
    }

    fn delete_output_rule(&self, index: u32) -> Result<()> {
        let index = index.to_string();
        let _ = cmd::run("iptables", &["-D", "OUTPUT", &index])?;
        Ok(())
    }

    fn flush_chain(&self, chain: &str) -> Result<()> {
        let _ = cmd::run("iptables", &["-F", chain])?;
        Ok(())
    }

    fn delete_chain(&self, chain: &str) -> Result<()> {
        let _ = cmd::run("iptables", &["-X", chain])?;
        Ok(())
    }

    fn list_chains(&self) -> Result<Vec<String>> {
        let out = cmd::run("iptables", &["-S"])?;
        let chains = out
            .stdout
            .lines()
            .filter_map(|line| line.strip_prefix("-N "))
            .map(|name| name.trim().to_string())
            .collect();
        Ok(chains)
    }
}

/// Installs and removes the uniquely-tagged classification rule chain.
pub struct Classifier {
    ops: Box<dyn FirewallOps>,
    tag: RunTag,
    installed: bool,
}

impl Classifier {
    /// Creates a classifier over the given firewall capability.
    #[must_use]
    pub fn new(ops: Box<dyn FirewallOps>, tag: RunTag) -> Self {
        Self { ops, tag, installed: false }
    }

    /// Returns whether the rule set is currently installed.
    #[must_use]
    pub const fn is_installed(&self) -> bool {
        self.installed
    }

    /// Installs the classification rule set.
    ///
    /// Creates the tagged chain, appends one logging rule per selected
    /// protocol (TCP narrowed to SYN packets when requested), and
    /// inserts a tagged jump at the highest-priority outbound position.
    ///
    /// # Errors
    ///
    /// Returns [`NetblameError::Setup`]; a failed install attempts to
    /// delete whatever part of the chain it had created.
    pub fn install(&mut self, filter: &TrafficFilter, rate_per_minute: u32) -> Result<()> {
        let chain = self.tag.chain_name();
        let result = (|| -> Result<()> {
            self.ops.create_chain(&chain)?;
            for &protocol in &filter.protocols {
                let rule = LogRule {
                    protocol,
                    dest: filter.dest,
                    dest_port: filter.dest_port,
                    syn_only: protocol == Protocol::Tcp && filter.tcp_syn_only,
                    rate_per_minute,
                    limit_name: format!("nb{}{}", self.tag, &protocol.as_str()[..1]),
                    log_prefix: self.tag.log_prefix(),
                };
                self.ops.append_log_rule(&chain, &rule)?;
            }
            self.ops.insert_output_jump(&chain, 1, &self.tag.comment())?;
            Ok(())
        })();

        match result {
            Ok(()) => {
                self.installed = true;
                tracing::info!(%chain, rate_per_minute, "classifier installed");
                Ok(())
            }
            Err(e) => {
                let _ = self.ops.flush_chain(&chain);
                let _ = self.ops.delete_chain(&chain);
                Err(NetblameError::Setup { stage: "classifier", detail: e.to_string() })
            }
        }
    }

    /// Removes exactly this run's rules from the outbound path, then
    /// flushes and deletes the chain.
    ///
    /// Jump rules are located by their tag comment and deleted in
    /// descending position order so earlier deletions do not shift the
    /// positions of later ones. Rules without the tag are never
    /// touched. Every step is attempted even if an earlier one failed.
    ///
    /// # Errors
    ///
    /// Returns [`NetblameError::Teardown`] carrying the first failure.
    pub fn remove(&mut self) -> Result<()> {
        if !self.installed {
            return Ok(());
        }
        self.installed = false;

        let chain = self.tag.chain_name();
        let comment = self.tag.comment();
        let mut first_failure: Option<String> = None;
        let mut note = |e: NetblameError| {
            if first_failure.is_none() {
                first_failure = Some(e.to_string());
            }
        };

        match self.ops.list_output_rules() {
            Ok(rules) => {
                let mut tagged: Vec<u32> = rules
                    .iter()
                    .filter(|rule| rule.spec.contains(&comment))
                    .map(|rule| rule.index)
                    .collect();
                tagged.sort_unstable_by(|a, b| b.cmp(a));
                for index in tagged {
                    if let Err(e) = self.ops.delete_output_rule(index) {
                        note(e);
                    }
                }
            }
            Err(e) => note(e),
        }
        if let Err(e) = self.ops.flush_chain(&chain) {
            note(e);
        }
        if let Err(e) = self.ops.delete_chain(&chain) {
            note(e);
        }

        match first_failure {
            None => {
                tracing::info!(%chain, "classifier removed");
                Ok(())
            }
            Some(detail) => {
                Err(NetblameError::Teardown { stage: "classifier removal", detail })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;

    /// In-memory firewall: a real OUTPUT rule list plus chain set, so
    /// tag isolation and deletion ordering can be observed.
    #[derive(Default)]
    struct FakeFirewall {
        state: Rc<RefCell<FakeState>>,
    }

    #[derive(Default)]
    struct FakeState {
        output: Vec<String>,
        chains: Vec<String>,
        rules_per_chain: Vec<(String, LogRule)>,
        deletions: Vec<u32>,
    }

    impl FirewallOps for FakeFirewall {
        fn create_chain(&self, chain: &str) -> Result<()> {
            self.state.borrow_mut().chains.push(chain.to_string());
            Ok(())
        }
        fn append_log_rule(&self, chain: &str, rule: &LogRule) -> Result<()> {
            self.state.borrow_mut().rules_per_chain.push((chain.to_string(), rule.clone()));
            Ok(())
        }
        fn insert_output_jump(&self, chain: &str, position: u32, comment: &str) -> Result<()> {
            let spec = format!("-A OUTPUT -j {chain} -m comment --comment {comment}");
            let at = (position as usize).saturating_sub(1).min(self.state.borrow().output.len());
            self.state.borrow_mut().output.insert(at, spec);
            Ok(())
        }
        fn list_output_rules(&self) -> Result<Vec<OutputRule>> {
            Ok(self
                .state
                .borrow()
                .output
                .iter()
                .enumerate()
                .map(|(i, spec)| OutputRule {
                    index: u32::try_from(i + 1).expect("small index"),
                    spec: spec.clone(),
                })
                .collect())
        }
        fn delete_output_rule(&self, index: u32) -> Result<()> {
            let mut state = self.state.borrow_mut();
            let _ = state.output.remove((index as usize) - 1);
            state.deletions.push(index);
            Ok(())
        }
        fn flush_chain(&self, chain: &str) -> Result<()> {
            self.state.borrow_mut().rules_per_chain.retain(|(c, _)| c != chain);
            Ok(())
        }
        fn delete_chain(&self, chain: &str) -> Result<()> {
            self.state.borrow_mut().chains.retain(|c| c != chain);
            Ok(())
        }
        fn list_chains(&self) -> Result<Vec<String>> {
            Ok(self.state.borrow().chains.clone())
        }
    }

    fn filter(protocols: Vec<Protocol>, syn_only: bool) -> TrafficFilter {
        TrafficFilter {
            dest: "192.0.2.7".parse().expect("addr"),
            dest_port: Some(8443),
            protocols,
            tcp_syn_only: syn_only,
        }
    }

    fn classifier() -> (Classifier, Rc<RefCell<FakeState>>) {
        let fake = FakeFirewall::default();
        let state = Rc::clone(&fake.state);
        (Classifier::new(Box::new(fake), RunTag::new("ab12cd34")), state)
    }

    #[test]
    fn install_creates_chain_rules_and_tagged_jump() {
        let (mut clf, state) = classifier();
        clf.install(&filter(vec![Protocol::Tcp, Protocol::Udp], true), 20).expect("install");

        let state = state.borrow();
        assert_eq!(state.chains, vec!["NETBLAME_AB12CD34"]);
        assert_eq!(state.rules_per_chain.len(), 2);
        // SYN narrowing applies to the TCP rule only.
        let tcp = &state.rules_per_chain[0].1;
        let udp = &state.rules_per_chain[1].1;
        assert!(tcp.syn_only);
        assert!(!udp.syn_only);
        assert_eq!(tcp.rate_per_minute, 20);
        assert_eq!(tcp.log_prefix, "NETBLAME:ab12cd34: ");
        assert!(state.output[0].contains("netblame:ab12cd34"));
    }

    #[test]
    fn remove_deletes_only_tagged_jumps() {
        let (mut clf, state) = classifier();
        // Pre-existing rules from elsewhere on the host.
        state.borrow_mut().output.push("-A OUTPUT -j DOCKER-USER".to_string());
        state.borrow_mut().output.push("-A OUTPUT -j ACCEPT".to_string());

        clf.install(&filter(vec![Protocol::Tcp], false), 20).expect("install");
        clf.remove().expect("remove");

        let state = state.borrow();
        assert_eq!(
            state.output,
            vec!["-A OUTPUT -j DOCKER-USER".to_string(), "-A OUTPUT -j ACCEPT".to_string()]
        );
        assert!(state.chains.is_empty());
        assert!(state.rules_per_chain.is_empty());
    }

    #[test]
    fn remove_deletes_jumps_in_descending_position_order() {
        let (mut clf, state) = classifier();
        clf.install(&filter(vec![Protocol::Tcp], false), 20).expect("install");
        // Simulate a second tagged jump further down the chain.
        state
            .borrow_mut()
            .output
            .push("-A OUTPUT -j NETBLAME_AB12CD34 -m comment --comment netblame:ab12cd34".into());

        clf.remove().expect("remove");
        assert_eq!(state.borrow().deletions, vec![2, 1]);
    }

    #[test]
    fn remove_without_install_is_a_noop() {
        let (mut clf, state) = classifier();
        clf.remove().expect("noop");
        assert!(state.borrow().output.is_empty());
    }

    #[test]
    fn remove_continues_past_a_failing_step() {
        struct FailingList {
            inner: FakeFirewall,
        }
        impl FirewallOps for FailingList {
            fn create_chain(&self, chain: &str) -> Result<()> {
                self.inner.create_chain(chain)
            }
            fn append_log_rule(&self, chain: &str, rule: &LogRule) -> Result<()> {
                self.inner.append_log_rule(chain, rule)
            }
            fn insert_output_jump(&self, chain: &str, pos: u32, comment: &str) -> Result<()> {
                self.inner.insert_output_jump(chain, pos, comment)
            }
            fn list_output_rules(&self) -> Result<Vec<OutputRule>> {
                Err(NetblameError::Command { program: "iptables".into(), detail: "boom".into() })
            }
            fn delete_output_rule(&self, index: u32) -> Result<()> {
                self.inner.delete_output_rule(index)
            }
            fn flush_chain(&self, chain: &str) -> Result<()> {
                self.inner.flush_chain(chain)
            }
            fn delete_chain(&self, chain: &str) -> Result<()> {
                self.inner.delete_chain(chain)
            }
            fn list_chains(&self) -> Result<Vec<String>> {
                self.inner.list_chains()
            }
        }

        let fake = FailingList { inner: FakeFirewall::default() };
        let state = Rc::clone(&fake.inner.state);
        let mut clf = Classifier::new(Box::new(fake), RunTag::new("ab12cd34"));
        clf.install(&filter(vec![Protocol::Tcp], false), 20).expect("install");

        let err = clf.remove().expect_err("listing failed");
        assert!(matches!(err, NetblameError::Teardown { stage: "classifier removal", .. }));
        // Chain flush and delete still ran.
        assert!(state.borrow().chains.is_empty());
        assert!(state.borrow().rules_per_chain.is_empty());
    }
}
