//! Shared application state handed to every axum handler.

use std::sync::Arc;

use ghx_bench::BenchmarkCatalog;
use ghx_config::GhxConfig;
use ghx_eventbus::EventBus;
use ghx_ingest::{CronHistoryStore, ManualResultStore};
use ghx_metrics::GhxMetrics;
use ghx_orchestrator::JobOrchestrator;

use crate::multihost::MultiHostStore;

/// Everything a handler needs, cloned cheaply via `Arc` fields.
#[derive(Clone)]
pub struct AppState {
    /// Process configuration.
    pub config: Arc<GhxConfig>,
    /// The job orchestrator core.
    pub orchestrator: Arc<JobOrchestrator>,
    /// Per-GPU-model benchmark thresholds.
    pub catalog: Arc<BenchmarkCatalog>,
    /// SSE subscriber fan-out.
    pub bus: Arc<EventBus>,
    /// Operational counters.
    pub metrics: Arc<GhxMetrics>,
    /// Multi-host NCCL run tracking.
    pub multihost: Arc<MultiHostStore>,
    /// Cluster-mode manual-artifact rows.
    pub manual_results: Arc<ManualResultStore>,
    /// Cluster-mode cron-artifact history.
    pub cron_history: Arc<CronHistoryStore>,
}

impl AppState {
    /// Construct the full application state from a loaded configuration.
    #[must_use]
    pub fn new(config: GhxConfig) -> Self {
        let catalog = Arc::new(BenchmarkCatalog::load(Some(config.catalog_path.clone())));
        let orchestrator = Arc::new(JobOrchestrator::new(catalog.clone(), config.asset_dir.clone(), config.fanout_limit));
        Self {
            config: Arc::new(config),
            orchestrator,
            catalog,
            bus: Arc::new(EventBus::new()),
            metrics: Arc::new(GhxMetrics::new()),
            multihost: Arc::new(MultiHostStore::new()),
            manual_results: Arc::new(ManualResultStore::new()),
            cron_history: Arc::new(CronHistoryStore::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_builds_state_from_defaults() {
        let state = AppState::new(GhxConfig::new());
        assert!(state.metrics.encode().contains("ghx_jobs_submitted_total"));
    }
}
