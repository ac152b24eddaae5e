//! Workload event watcher (§4.G, cluster mode only): keeps internal Job
//! status aligned with the external orchestrator's workload state.
//!
//! Three fallback tiers are modeled as implementations of
//! [`WorkloadEventSource`]: a native subscription, a CLI subprocess
//! watch, and a fixed-cadence poll. No cluster-orchestrator client
//! library is a dependency of this crate, so [`NativeWatchSource`] is
//! permanently unavailable here and tests exercise the tier-selection
//! and phase-mapping logic against a fake source instead of a live one.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use ghx_proto::{JobStatus, NodeStatus};
use thiserror::Error;
use tracing::{debug, warn};

/// Kind of change an event represents, mirroring the orchestrator's
/// watch API shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkloadEventType {
    /// A workload object was created.
    Added,
    /// A workload object's status changed.
    Modified,
    /// A workload object was removed.
    Deleted,
}

/// One observed change to a workload this watcher tracks.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkloadPhaseEvent {
    /// What kind of change this is.
    pub event_type: WorkloadEventType,
    /// The workload's name, used to look up the owning Job/Node.
    pub workload: String,
    /// Raw phase string as reported by the orchestrator.
    pub phase: String,
    /// Ready replica count, when reported; used to distinguish
    /// "running but not yet ready" from "running".
    pub ready: u32,
}

/// Errors a [`WorkloadEventSource`] tier can fail with. `Unavailable`
/// signals "skip straight to the next tier", distinct from
/// `Disconnected`, which is retried with back-off before falling
/// through.
#[derive(Debug, Error)]
pub enum WatcherError {
    /// This tier has no way to function in the current deployment
    /// (e.g. no client library compiled in).
    #[error("source unavailable")]
    Unavailable,
    /// The connection dropped and may be retried.
    #[error("disconnected: {0}")]
    Disconnected(String),
}

/// A source of workload change events. Each tier implements this the
/// way it naturally produces events; the watcher supervisor is
/// otherwise indifferent to which tier it's reading from.
#[async_trait]
pub trait WorkloadEventSource: Send {
    /// Block until the next event, or return an error that tells the
    /// supervisor whether to retry this tier or fall through.
    async fn next_event(&mut self) -> Result<WorkloadPhaseEvent, WatcherError>;
}

/// Tier 1: native event subscription with resource-version resume
/// tokens. No cluster client library is a dependency of this crate, so
/// this tier is permanently unavailable; it exists as the documented
/// extension point for a deployment that links one in.
#[derive(Debug, Default)]
pub struct NativeWatchSource;

#[async_trait]
impl WorkloadEventSource for NativeWatchSource {
    async fn next_event(&mut self) -> Result<WorkloadPhaseEvent, WatcherError> {
        Err(WatcherError::Unavailable)
    }
}

/// Tier 2: line-oriented subprocess watch against the orchestrator CLI
/// (`kubectl get ... --watch`), parsing whitespace-separated rows of
/// `NAME PHASE READY`.
pub struct CliWatchSource {
    child_stdout_lines: VecDeque<String>,
}

impl CliWatchSource {
    /// Build a source over already-read lines (used by the real
    /// subprocess wiring once it has drained a batch from the child's
    /// stdout pipe).
    #[must_use]
    pub fn from_lines(lines: Vec<String>) -> Self {
        Self { child_stdout_lines: lines.into() }
    }
}

#[async_trait]
impl WorkloadEventSource for CliWatchSource {
    async fn next_event(&mut self) -> Result<WorkloadPhaseEvent, WatcherError> {
        let Some(line) = self.child_stdout_lines.pop_front() else {
            return Err(WatcherError::Disconnected("subprocess watch stream ended".to_string()));
        };
        parse_cli_watch_line(&line).ok_or_else(|| WatcherError::Disconnected(format!("unparseable watch row: {line}")))
    }
}

fn parse_cli_watch_line(line: &str) -> Option<WorkloadPhaseEvent> {
    let mut fields = line.split_whitespace();
    let workload = fields.next()?.to_string();
    let phase = fields.next()?.to_string();
    let ready = fields.next().and_then(|r| r.split('/').next()).and_then(|n| n.parse().ok()).unwrap_or(0);
    Some(WorkloadPhaseEvent { event_type: WorkloadEventType::Modified, workload, phase, ready })
}

/// Tier 3: fixed-cadence poll. Cadence is 10s when the caller reports
/// at least one active Job, else 30s.
pub struct PollingSource<F: FnMut() -> Vec<WorkloadPhaseEvent> + Send> {
    poll_fn: F,
    queue: VecDeque<WorkloadPhaseEvent>,
    active_jobs: u32,
}

impl<F: FnMut() -> Vec<WorkloadPhaseEvent> + Send> PollingSource<F> {
    /// Build a polling source over `poll_fn`, a synchronous callback
    /// that lists the current state of every tracked workload.
    pub fn new(poll_fn: F) -> Self {
        Self { poll_fn, queue: VecDeque::new(), active_jobs: 0 }
    }

    /// Inform this source how many Jobs are currently active, which
    /// determines the next sleep's duration.
    pub fn set_active_jobs(&mut self, count: u32) {
        self.active_jobs = count;
    }

    fn cadence(&self) -> Duration {
        if self.active_jobs > 0 { Duration::from_secs(10) } else { Duration::from_secs(30) }
    }
}

#[async_trait]
impl<F: FnMut() -> Vec<WorkloadPhaseEvent> + Send> WorkloadEventSource for PollingSource<F> {
    async fn next_event(&mut self) -> Result<WorkloadPhaseEvent, WatcherError> {
        loop {
            if let Some(event) = self.queue.pop_front() {
                return Ok(event);
            }
            tokio::time::sleep(self.cadence()).await;
            self.queue.extend((self.poll_fn)());
        }
    }
}

/// Map a reported phase string to the internal node status it implies,
/// per the priority table: pending, running (only if ready ≥ 1),
/// succeeded/completed, failed/error/crashloop, else no mapping
/// (caller passes the stored status through unchanged).
#[must_use]
pub fn map_phase_to_status(phase: &str, ready: u32) -> Option<NodeStatus> {
    let lower = phase.to_ascii_lowercase();
    if lower.contains("failed") || lower.contains("error") || lower.contains("crashloop") {
        Some(NodeStatus::Failed)
    } else if lower.contains("succeeded") || lower.contains("completed") {
        Some(NodeStatus::Passed)
    } else if lower.contains("pending") {
        Some(NodeStatus::Pending)
    } else if lower.contains("running") && ready >= 1 {
        Some(NodeStatus::Running)
    } else {
        None
    }
}

/// Map a reported phase string to the internal Job status, for the
/// bus's `job_status_change` payload. Delegates to
/// [`ghx_proto::JobStatus::from_workload_phase`].
#[must_use]
pub fn map_phase_to_job_status(phase: &str) -> Option<JobStatus> {
    JobStatus::from_workload_phase(phase)
}

/// Exponential back-off schedule for a disconnected tier: base 1s,
/// doubling, capped at 30s, falling through after 10 consecutive
/// failures.
#[derive(Debug, Clone, Copy)]
pub struct BackoffSchedule {
    attempt: u32,
}

impl BackoffSchedule {
    /// Base delay before the first retry.
    pub const BASE: Duration = Duration::from_secs(1);
    /// Cap on any single retry delay.
    pub const CAP: Duration = Duration::from_secs(30);
    /// Consecutive failures before falling through to the next tier.
    pub const MAX_ATTEMPTS: u32 = 10;

    /// A fresh schedule with no recorded failures.
    #[must_use]
    pub const fn new() -> Self {
        Self { attempt: 0 }
    }

    /// Record a failure and return the delay to wait before retrying,
    /// or `None` if the tier has exhausted its retry budget.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempt >= Self::MAX_ATTEMPTS {
            return None;
        }
        self.attempt += 1;
        let scaled = Self::BASE.saturating_mul(1 << (self.attempt - 1).min(16));
        Some(scaled.min(Self::CAP))
    }
}

impl Default for BackoffSchedule {
    fn default() -> Self {
        Self::new()
    }
}

/// One step of the watcher's state machine: which tier to try next
/// after the current one is exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatcherTier {
    /// Native event subscription.
    Native,
    /// CLI subprocess watch.
    Cli,
    /// Fixed-cadence poll.
    Polling,
}

impl WatcherTier {
    /// The tier to fall through to once this one is exhausted. Polling
    /// is terminal — it never falls through further.
    #[must_use]
    pub const fn fallback(self) -> Self {
        match self {
            Self::Native => Self::Cli,
            Self::Cli | Self::Polling => Self::Polling,
        }
    }
}

/// Full re-sync cadence, independent of whichever tier is active.
pub const FULL_RESYNC_INTERVAL: Duration = Duration::from_secs(300);

/// Consume events from `source`, retrying on [`WatcherError::Disconnected`]
/// per [`BackoffSchedule`] and reporting tier exhaustion to the caller so
/// it can swap in the next tier's source. `on_event` is invoked for each
/// event the source yields while this tier remains connected.
pub async fn drain_tier<S: WorkloadEventSource>(source: &mut S, mut on_event: impl FnMut(WorkloadPhaseEvent)) {
    let mut backoff = BackoffSchedule::new();
    loop {
        match source.next_event().await {
            Ok(event) => {
                backoff = BackoffSchedule::new();
                on_event(event);
            }
            Err(WatcherError::Unavailable) => {
                debug!("watcher tier unavailable, falling through immediately");
                return;
            }
            Err(WatcherError::Disconnected(reason)) => {
                let Some(delay) = backoff.next_delay() else {
                    warn!(reason, "watcher tier exhausted its retry budget, falling through");
                    return;
                };
                warn!(reason, delay_ms = delay.as_millis() as u64, "watcher tier disconnected, retrying");
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_case::test_case("Pending", 0, Some(NodeStatus::Pending); "pending maps directly")]
    #[test_case::test_case("Running", 0, None; "running without ready replicas has no mapping")]
    #[test_case::test_case("Running", 1, Some(NodeStatus::Running); "running with ready replicas maps")]
    #[test_case::test_case("Succeeded", 0, Some(NodeStatus::Passed); "succeeded maps to passed")]
    #[test_case::test_case("CrashLoopBackOff", 0, Some(NodeStatus::Failed); "crashloop maps to failed")]
    #[test_case::test_case("Unknown", 0, None; "unrecognized phase passes through")]
    fn phase_mapping_table(phase: &str, ready: u32, expected: Option<NodeStatus>) {
        assert_eq!(map_phase_to_status(phase, ready), expected);
    }

    #[tokio::test]
    async fn native_source_is_always_unavailable() {
        let mut source = NativeWatchSource;
        assert!(matches!(source.next_event().await, Err(WatcherError::Unavailable)));
    }

    #[tokio::test]
    async fn cli_source_parses_rows_then_disconnects() {
        let mut source = CliWatchSource::from_lines(vec!["node-a Running 1/1".to_string()]);
        let event = source.next_event().await.unwrap();
        assert_eq!(event.workload, "node-a");
        assert_eq!(event.phase, "Running");
        assert_eq!(event.ready, 1);
        assert!(matches!(source.next_event().await, Err(WatcherError::Disconnected(_))));
    }

    #[tokio::test]
    async fn polling_source_adjusts_cadence_by_active_jobs() {
        let mut calls = 0;
        let mut source = PollingSource::new(move || {
            calls += 1;
            vec![WorkloadPhaseEvent {
                event_type: WorkloadEventType::Modified,
                workload: "node-a".to_string(),
                phase: "Succeeded".to_string(),
                ready: 0,
            }]
        });
        source.set_active_jobs(1);
        assert_eq!(source.cadence(), Duration::from_secs(10));
        source.set_active_jobs(0);
        assert_eq!(source.cadence(), Duration::from_secs(30));
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let mut schedule = BackoffSchedule::new();
        assert_eq!(schedule.next_delay(), Some(Duration::from_secs(1)));
        assert_eq!(schedule.next_delay(), Some(Duration::from_secs(2)));
        assert_eq!(schedule.next_delay(), Some(Duration::from_secs(4)));
        for _ in 0..20 {
            schedule.next_delay();
        }
        assert_eq!(schedule.next_delay(), None);
    }

    #[test]
    fn tier_fallback_chain_terminates_at_polling() {
        assert_eq!(WatcherTier::Native.fallback(), WatcherTier::Cli);
        assert_eq!(WatcherTier::Cli.fallback(), WatcherTier::Polling);
        assert_eq!(WatcherTier::Polling.fallback(), WatcherTier::Polling);
    }

    #[tokio::test]
    async fn drain_tier_falls_through_on_unavailable_without_calling_callback() {
        let mut source = NativeWatchSource;
        let mut seen = 0;
        drain_tier(&mut source, |_| seen += 1).await;
        assert_eq!(seen, 0);
    }

    #[tokio::test]
    async fn drain_tier_delivers_events_then_falls_through_on_disconnect() {
        let mut source = CliWatchSource::from_lines(vec!["node-a Succeeded 0/0".to_string()]);
        let mut seen = Vec::new();
        drain_tier(&mut source, |e| seen.push(e.workload)).await;
        assert_eq!(seen, vec!["node-a".to_string()]);
    }
}
