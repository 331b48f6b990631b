//! Streaming event correlation.
//!
//! Consumes the classification event stream one line at a time, parses
//! each line into a (protocol, source port) tuple, queries the
//! process/socket table, and delivers the outcome to the sink before
//! touching the next line. Events are processed strictly sequentially:
//! the socket-table query is a point-in-time snapshot, so overlapping
//! queries would add complexity without improving accuracy.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;

use netblame_common::error::{NetblameError, Result};
use netblame_common::types::{AttributionEvent, AttributionResult, Protocol, RunTag};

use crate::action::ActionHook;
use crate::events::EventSource;
use crate::resolver::SocketResolver;

/// Result of correlating one event, in stream order.
#[derive(Debug, Clone)]
pub enum Outcome {
    /// An owning process was found; the result carries its PID.
    Delivered(AttributionResult),
    /// No owning process was found. The expected outcome of the
    /// inherent race: the sender exited, or never held the socket long
    /// enough to be observed.
    ResolutionFailed(AttributionResult),
    /// The line matched the tag but lacked the expected tokens; the
    /// result carries whatever could be extracted.
    ParseDegraded(AttributionResult),
}

/// Receives correlation outcomes in the order their source events
/// appeared in the stream.
pub trait ResultSink {
    /// Handles one outcome. Called synchronously before the next line
    /// is read.
    fn deliver(&mut self, outcome: &Outcome);
}

/// Parses one classification log line into an event.
///
/// Tokens are extracted by fixed pattern; a missing token leaves the
/// corresponding field unset rather than failing the line.
#[must_use]
pub fn parse_event(line: &str) -> AttributionEvent {
    let protocol = token_after(line, "PROTO=").and_then(Protocol::from_token);
    let src_port = token_after(line, "SPT=").and_then(|t| t.parse::<u16>().ok());
    AttributionEvent { protocol, src_port, raw: line.to_string(), timestamp: Utc::now() }
}

/// Returns the whitespace-delimited token following `key` in `line`.
fn token_after<'a>(line: &'a str, key: &str) -> Option<&'a str> {
    line.split_whitespace().find_map(|token| token.strip_prefix(key)).filter(|t| !t.is_empty())
}

/// The streaming correlator.
pub struct Correlator {
    resolver: Box<dyn SocketResolver>,
    action: Option<ActionHook>,
    tag: RunTag,
}

impl Correlator {
    /// Creates a correlator for the given run tag.
    #[must_use]
    pub fn new(resolver: Box<dyn SocketResolver>, action: Option<ActionHook>, tag: RunTag) -> Self {
        Self { resolver, action, tag }
    }

    /// Runs the consume loop until cancellation or end of stream.
    ///
    /// Lines not carrying this run's tag are skipped. Cancellation is
    /// checked cooperatively between iterations; an in-flight
    /// resolution always completes and is delivered first.
    ///
    /// # Errors
    ///
    /// Returns [`NetblameError::Stream`] if the stream ends or fails
    /// without cancellation having been requested — the caller must
    /// then tear down.
    pub fn consume(
        &self,
        source: &mut dyn EventSource,
        cancel: &Arc<AtomicBool>,
        sink: &mut dyn ResultSink,
    ) -> Result<()> {
        // The kernel prints the LOG prefix verbatim; match without the
        // trailing space in case downstream tooling collapses it.
        let needle = self.tag.log_prefix().trim_end().to_string();

        while !cancel.load(Ordering::SeqCst) {
            match source.next_line()? {
                Some(line) => {
                    if !line.contains(&needle) {
                        continue;
                    }
                    let outcome = self.process_line(&line);
                    sink.deliver(&outcome);
                }
                None => {
                    if cancel.load(Ordering::SeqCst) {
                        break;
                    }
                    return Err(NetblameError::Stream {
                        detail: "event stream ended unexpectedly".into(),
                    });
                }
            }
        }
        tracing::debug!("consume loop cancelled");
        Ok(())
    }

    /// Correlates a single tagged line.
    fn process_line(&self, line: &str) -> Outcome {
        let event = parse_event(line);
        let (Some(protocol), Some(src_port)) = (event.protocol, event.src_port) else {
            tracing::debug!(line = %event.raw, "line lacked PROTO= or SPT= token");
            return Outcome::ParseDegraded(AttributionResult {
                src_port: event.src_port,
                protocol: event.protocol,
                pid: None,
                failure: Some("line lacked expected tokens".into()),
            });
        };

        let pids = match self.resolver.find_owning_process(protocol, src_port) {
            Ok(pids) => pids,
            Err(e) => {
                tracing::warn!(%protocol, src_port, error = %e, "socket table lookup failed");
                Vec::new()
            }
        };

        // Multiple holders: the last-listed process wins. The listing
        // order is system-defined, so this is a heuristic tie-break,
        // not a proof of ownership.
        match pids.last().copied() {
            Some(pid) => {
                if let Some(action) = &self.action {
                    action.invoke(pid);
                }
                Outcome::Delivered(AttributionResult {
                    src_port: Some(src_port),
                    protocol: Some(protocol),
                    pid: Some(pid),
                    failure: None,
                })
            }
            None => Outcome::ResolutionFailed(AttributionResult {
                src_port: Some(src_port),
                protocol: Some(protocol),
                pid: None,
                failure: Some("no owning process found (it may have exited)".into()),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    struct VecSource {
        lines: Vec<String>,
    }

    impl EventSource for VecSource {
        fn next_line(&mut self) -> Result<Option<String>> {
            if self.lines.is_empty() {
                Ok(None)
            } else {
                Ok(Some(self.lines.remove(0)))
            }
        }
    }

    /// A source that requests cancellation once drained, modelling the
    /// follower being terminated by a signal handler.
    struct CancellingSource {
        inner: VecSource,
        cancel: Arc<AtomicBool>,
    }

    impl EventSource for CancellingSource {
        fn next_line(&mut self) -> Result<Option<String>> {
            let next = self.inner.next_line()?;
            if next.is_none() {
                self.cancel.store(true, Ordering::SeqCst);
            }
            Ok(next)
        }
    }

    struct StubResolver {
        table: HashMap<(Protocol, u16), Vec<u32>>,
    }

    impl SocketResolver for StubResolver {
        fn find_owning_process(&self, protocol: Protocol, port: u16) -> Result<Vec<u32>> {
            Ok(self.table.get(&(protocol, port)).cloned().unwrap_or_default())
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        outcomes: Vec<Outcome>,
    }

    impl ResultSink for RecordingSink {
        fn deliver(&mut self, outcome: &Outcome) {
            self.outcomes.push(outcome.clone());
        }
    }

    fn tagged(rest: &str) -> String {
        format!("NETBLAME:ab12cd34: IN= OUT=eth0 SRC=10.0.0.5 DST=192.0.2.7 {rest}")
    }

    fn correlator(table: HashMap<(Protocol, u16), Vec<u32>>) -> Correlator {
        Correlator::new(Box::new(StubResolver { table }), None, RunTag::new("ab12cd34"))
    }

    fn run_to_end(correlator: &Correlator, lines: Vec<String>) -> Vec<Outcome> {
        let cancel = Arc::new(AtomicBool::new(false));
        let mut source = CancellingSource {
            inner: VecSource { lines },
            cancel: Arc::clone(&cancel),
        };
        let mut sink = RecordingSink::default();
        correlator.consume(&mut source, &cancel, &mut sink).expect("loop exits cleanly");
        sink.outcomes
    }

    #[test]
    fn parse_extracts_protocol_and_source_port() {
        let event = parse_event(&tagged("PROTO=TCP SPT=4321 DPT=443"));
        assert_eq!(event.protocol, Some(Protocol::Tcp));
        assert_eq!(event.src_port, Some(4321));
    }

    #[test]
    fn parse_tolerates_missing_tokens() {
        let event = parse_event(&tagged("PROTO=ICMP TYPE=8"));
        assert_eq!(event.protocol, None);
        assert_eq!(event.src_port, None);
    }

    #[test]
    fn last_listed_pid_wins() {
        let mut table = HashMap::new();
        let _ = table.insert((Protocol::Tcp, 4321), vec![111, 222]);
        let outcomes = run_to_end(&correlator(table), vec![tagged("PROTO=tcp SPT=4321")]);

        assert_eq!(outcomes.len(), 1);
        let Outcome::Delivered(result) = &outcomes[0] else {
            panic!("expected delivery, got {:?}", outcomes[0]);
        };
        assert_eq!(result.pid, Some(222));
        assert_eq!(result.src_port, Some(4321));
    }

    #[test]
    fn results_preserve_stream_order() {
        let mut table = HashMap::new();
        let _ = table.insert((Protocol::Tcp, 1111), vec![10]);
        let _ = table.insert((Protocol::Udp, 2222), vec![20]);
        let _ = table.insert((Protocol::Tcp, 3333), vec![30]);
        let outcomes = run_to_end(
            &correlator(table),
            vec![
                tagged("PROTO=TCP SPT=1111"),
                tagged("PROTO=UDP SPT=2222"),
                tagged("PROTO=TCP SPT=3333"),
            ],
        );

        let pids: Vec<Option<u32>> = outcomes
            .iter()
            .map(|o| match o {
                Outcome::Delivered(r) => r.pid,
                other => panic!("expected delivery, got {other:?}"),
            })
            .collect();
        assert_eq!(pids, vec![Some(10), Some(20), Some(30)]);
    }

    #[test]
    fn degraded_line_does_not_stop_the_loop() {
        let mut table = HashMap::new();
        let _ = table.insert((Protocol::Tcp, 4321), vec![99]);
        let outcomes = run_to_end(
            &correlator(table),
            vec![tagged("PROTO=TCP DPT=443"), tagged("PROTO=TCP SPT=4321")],
        );

        assert_eq!(outcomes.len(), 2);
        assert!(matches!(outcomes[0], Outcome::ParseDegraded(_)));
        let Outcome::Delivered(result) = &outcomes[1] else {
            panic!("expected delivery after degraded line");
        };
        assert_eq!(result.pid, Some(99));
    }

    #[test]
    fn empty_resolution_is_reported_not_fatal() {
        let outcomes = run_to_end(&correlator(HashMap::new()), vec![tagged("PROTO=UDP SPT=5353")]);

        assert_eq!(outcomes.len(), 1);
        let Outcome::ResolutionFailed(result) = &outcomes[0] else {
            panic!("expected resolution failure");
        };
        assert_eq!(result.pid, None);
        assert!(result.failure.is_some());
    }

    #[test]
    fn untagged_lines_are_skipped() {
        let mut table = HashMap::new();
        let _ = table.insert((Protocol::Tcp, 4321), vec![7]);
        let outcomes = run_to_end(
            &correlator(table),
            vec![
                "OTHER-TOOL: PROTO=TCP SPT=9999".to_string(),
                tagged("PROTO=TCP SPT=4321"),
            ],
        );
        assert_eq!(outcomes.len(), 1);
    }

    #[test]
    fn unexpected_end_of_stream_is_fatal() {
        let correlator = correlator(HashMap::new());
        let cancel = Arc::new(AtomicBool::new(false));
        let mut source = VecSource { lines: vec![] };
        let mut sink = RecordingSink::default();

        let err = correlator.consume(&mut source, &cancel, &mut sink).expect_err("stream died");
        assert!(matches!(err, NetblameError::Stream { .. }));
    }

    #[test]
    fn pre_set_cancellation_reads_nothing() {
        let correlator = correlator(HashMap::new());
        let cancel = Arc::new(AtomicBool::new(true));
        let mut source = VecSource { lines: vec![tagged("PROTO=TCP SPT=1")] };
        let mut sink = RecordingSink::default();

        correlator.consume(&mut source, &cancel, &mut sink).expect("clean exit");
        assert!(sink.outcomes.is_empty());
    }
}
