//! Run lifecycle: single-instance locking, setup and teardown
//! sequencing.
//!
//! Setup order is shaping then classifier; teardown is the strict
//! reverse (classifier, shaping, lock release) and runs unconditionally
//! once setup began — on success, on setup failure, and on
//! interruption alike. No exit path leaves rules installed without at
//! least attempting cleanup and reporting when cleanup itself fails.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use netblame_common::config::MonitorConfig;
use netblame_common::constants::LOCK_PATH;
use netblame_common::error::Result;
use netblame_common::types::RunTag;

use crate::action::ActionHook;
use crate::classifier::{Classifier, IptablesFirewall};
use crate::correlator::{Correlator, ResultSink};
use crate::events::EventSource;
use crate::lock::InstanceLock;
use crate::resolver::LsofResolver;
use crate::shaping::{ShapingController, TcQdisc};

/// One monitoring run over a resolved egress interface.
pub struct Session {
    config: MonitorConfig,
    interface: String,
    lock_path: PathBuf,
    shaper: ShapingController,
    classifier: Classifier,
    correlator: Correlator,
}

impl Session {
    /// Creates a session wired to the real platform adapters with a
    /// freshly generated run tag.
    #[must_use]
    pub fn new(config: MonitorConfig, interface: String) -> Self {
        let tag = RunTag::generate();
        let action = config.action.clone().map(ActionHook::new);
        Self {
            shaper: ShapingController::new(Box::new(TcQdisc::new())),
            classifier: Classifier::new(Box::new(IptablesFirewall::new()), tag.clone()),
            correlator: Correlator::new(Box::new(LsofResolver::new()), action, tag),
            lock_path: PathBuf::from(LOCK_PATH),
            config,
            interface,
        }
    }

    /// Creates a session from pre-built components.
    ///
    /// This is the seam the integration tests use to substitute
    /// recording fakes for every platform capability.
    #[must_use]
    pub fn with_parts(
        config: MonitorConfig,
        interface: String,
        lock_path: PathBuf,
        shaper: ShapingController,
        classifier: Classifier,
        correlator: Correlator,
    ) -> Self {
        Self { config, interface, lock_path, shaper, classifier, correlator }
    }

    /// Runs the full pipeline: acquire lock, install shaping, install
    /// classifier, consume events until cancellation or stream failure,
    /// then tear down in reverse order.
    ///
    /// # Errors
    ///
    /// Returns the configuration, lock, setup, or stream error that
    /// ended the run. Teardown failures are reported, never returned:
    /// they must not mask the original outcome or abort the remaining
    /// steps.
    pub fn run(
        &mut self,
        source: &mut dyn EventSource,
        cancel: &Arc<AtomicBool>,
        sink: &mut dyn ResultSink,
    ) -> Result<()> {
        self.config.validate()?;
        let lock = InstanceLock::acquire(&self.lock_path)?;
        tracing::info!(
            iface = %self.interface,
            target = %self.config.filter.dest,
            delay_ms = self.config.delay_ms,
            "starting attribution run"
        );

        if let Err(e) = self.setup() {
            self.teardown(lock);
            return Err(e);
        }

        let outcome = self.correlator.consume(source, cancel, sink);
        self.teardown(lock);
        outcome
    }

    fn setup(&mut self) -> Result<()> {
        self.shaper.install(&self.config.filter, self.config.delay_ms, &self.interface)?;
        self.classifier.install(&self.config.filter, self.config.rate_per_minute)?;
        Ok(())
    }

    /// Reverse-order teardown. Each step is attempted regardless of
    /// earlier failures.
    fn teardown(&mut self, lock: InstanceLock) {
        report("classifier removal", self.classifier.remove());
        report("shaping removal", self.shaper.remove());
        report("lock release", lock.release());
    }
}

fn report(stage: &str, result: Result<()>) {
    if let Err(e) = result {
        tracing::error!(stage, error = %e, "cleanup step failed; manual cleanup may be required");
    }
}
