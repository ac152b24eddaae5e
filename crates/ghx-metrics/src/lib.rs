//! Operational metrics `[AMBIENT]`: a small, fixed set of counters and
//! gauges describing orchestrator activity, exported in Prometheus
//! text format for a `/metrics` endpoint. Adapted down from a
//! general-purpose time-series registry to just the series this
//! orchestrator emits — no query path, no storage, no retention, since
//! nothing here needs to answer "what was this value an hour ago".

use std::sync::Arc;

use prometheus_client::encoding::text::encode;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::registry::Registry;

/// Label set distinguishing job outcomes.
#[derive(Clone, Debug, Hash, PartialEq, Eq, prometheus_client::encoding::EncodeLabelSet)]
pub struct JobOutcomeLabels {
    /// The terminal status the job reached (`passed`, `failed`, `cancelled`).
    pub outcome: String,
}

/// Label set distinguishing test kinds.
#[derive(Clone, Debug, Hash, PartialEq, Eq, prometheus_client::encoding::EncodeLabelSet)]
pub struct TestKindLabels {
    /// The test kind (`bandwidth`, `p2p`, `nccl`, `dcgm`, `ib`).
    pub kind: String,
}

/// The orchestrator's metric registry. Construct one per process and
/// share it via `Arc` with every component that reports a metric.
pub struct GhxMetrics {
    registry: Registry,
    jobs_submitted: Counter,
    jobs_terminal: Family<JobOutcomeLabels, Counter>,
    tests_run: Family<TestKindLabels, Counter>,
    active_jobs: Gauge,
    event_bus_subscribers: Gauge,
    watcher_tier: Gauge,
}

impl GhxMetrics {
    /// Construct a registry with all series pre-registered under the
    /// `ghx_` namespace.
    #[must_use]
    pub fn new() -> Self {
        let mut registry = Registry::with_prefix("ghx");

        let jobs_submitted = Counter::default();
        registry.register("jobs_submitted", "Total jobs accepted for submission", jobs_submitted.clone());

        let jobs_terminal = Family::<JobOutcomeLabels, Counter>::default();
        registry.register("jobs_terminal", "Jobs that reached a terminal status, by outcome", jobs_terminal.clone());

        let tests_run = Family::<TestKindLabels, Counter>::default();
        registry.register("tests_run", "Test-engine invocations, by test kind", tests_run.clone());

        let active_jobs = Gauge::default();
        registry.register("active_jobs", "Jobs currently pending or running", active_jobs.clone());

        let event_bus_subscribers = Gauge::default();
        registry.register("event_bus_subscribers", "Current SSE subscriber count", event_bus_subscribers.clone());

        let watcher_tier = Gauge::default();
        registry.register("watcher_tier", "Current workload watcher tier (0=native, 1=cli, 2=polling)", watcher_tier.clone());

        Self {
            registry,
            jobs_submitted,
            jobs_terminal,
            tests_run,
            active_jobs,
            event_bus_subscribers,
            watcher_tier,
        }
    }

    /// Record a newly submitted job.
    pub fn record_job_submitted(&self) {
        self.jobs_submitted.inc();
        self.active_jobs.inc();
    }

    /// Record a job reaching a terminal status; decrements the active
    /// gauge so it always reflects jobs still in flight.
    pub fn record_job_terminal(&self, outcome: &str) {
        self.jobs_terminal.get_or_create(&JobOutcomeLabels { outcome: outcome.to_string() }).inc();
        self.active_jobs.dec();
    }

    /// Record one test-engine invocation for `kind`.
    pub fn record_test_run(&self, kind: &str) {
        self.tests_run.get_or_create(&TestKindLabels { kind: kind.to_string() }).inc();
    }

    /// Set the current SSE subscriber count.
    pub fn set_event_bus_subscribers(&self, count: usize) {
        self.event_bus_subscribers.set(i64::try_from(count).unwrap_or(i64::MAX));
    }

    /// Set the watcher's current tier (0=native, 1=cli, 2=polling).
    pub fn set_watcher_tier(&self, tier: u8) {
        self.watcher_tier.set(i64::from(tier));
    }

    /// Render the registry in Prometheus text exposition format.
    pub fn encode(&self) -> String {
        let mut buf = String::new();
        let _ = encode(&mut buf, &self.registry);
        buf
    }
}

impl Default for GhxMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared handle type components take as a constructor argument.
pub type SharedMetrics = Arc<GhxMetrics>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_lifecycle_updates_counters_and_gauge() {
        let metrics = GhxMetrics::new();
        metrics.record_job_submitted();
        metrics.record_job_submitted();
        metrics.record_job_terminal("passed");

        let output = metrics.encode();
        assert!(output.contains("ghx_jobs_submitted_total 2"));
        assert!(output.contains("ghx_active_jobs 1"));
        assert!(output.contains(r#"outcome="passed""#));
    }

    #[test]
    fn test_kind_family_tracks_each_kind_independently() {
        let metrics = GhxMetrics::new();
        metrics.record_test_run("dcgm");
        metrics.record_test_run("dcgm");
        metrics.record_test_run("ib");

        let output = metrics.encode();
        assert!(output.contains(r#"kind="dcgm""#));
        assert!(output.contains(r#"kind="ib""#));
    }

    #[test]
    fn subscriber_and_watcher_gauges_report_latest_value() {
        let metrics = GhxMetrics::new();
        metrics.set_event_bus_subscribers(5);
        metrics.set_watcher_tier(2);

        let output = metrics.encode();
        assert!(output.contains("ghx_event_bus_subscribers 5"));
        assert!(output.contains("ghx_watcher_tier 2"));
    }
}
