//! ghx-server binary: the GPU fleet health-check control plane.

use std::net::SocketAddr;
use std::time::Duration;

use ghx_config::GhxConfig;
use ghx_eventbus::run_heartbeat;
use ghx_ingest::{ingest_cron_dir, ingest_manual_dir};
use ghx_server::GhxServer;
use ghx_watcher::{
    drain_tier, map_phase_to_job_status, map_phase_to_status, NativeWatchSource, PollingSource, WorkloadEventType,
    WorkloadPhaseEvent,
};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const INGEST_SWEEP_INTERVAL: Duration = Duration::from_secs(15);

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = GhxConfig::from_env();
    let bind_addr: SocketAddr = std::env::var("GHX_BIND_ADDR").ok().and_then(|s| s.parse().ok()).unwrap_or_else(|| "0.0.0.0:8080".parse().expect("valid default addr"));

    let server = GhxServer::new(config);
    let state = server.state();

    info!(%bind_addr, "starting ghx-server");

    tokio::spawn(run_heartbeat(state.bus.clone()));
    tokio::spawn(run_ingest_sweeps(state.clone()));
    tokio::spawn(run_watcher_loop(state.clone()));

    if let Err(e) = server.serve(bind_addr).await {
        error!(error = %e, "ghx-server exited");
        std::process::exit(1);
    }
}

/// Periodically rescan the manual and cron result directories for new
/// artifacts, publishing a bus event for each one newly ingested.
async fn run_ingest_sweeps(state: ghx_server::AppState) {
    let mut ticker = tokio::time::interval(INGEST_SWEEP_INTERVAL);
    loop {
        ticker.tick().await;
        ingest_once(&state).await;
    }
}

/// One manual+cron ingestion sweep, shared by the periodic ticker and
/// the watcher's immediate trigger on a newly-observed terminal Job.
async fn ingest_once(state: &ghx_server::AppState) {
    let manual_dir = state.config.manual_dir();
    let cron_dir = state.config.cron_dir();

    let (manual_summary, completed_job_ids) = ingest_manual_dir(&manual_dir, &state.manual_results);
    if manual_summary.ingested > 0 {
        debug_ingested("manual", manual_summary.ingested);
    }
    if !completed_job_ids.is_empty() {
        state.bus.publish(ghx_proto::BusEvent::DiagnosticResultsUpdated);
    }

    let cron_summary = ingest_cron_dir(&cron_dir, &state.cron_history);
    if cron_summary.ingested > 0 {
        debug_ingested("cron", cron_summary.ingested);
    }
}

fn debug_ingested(kind: &str, count: usize) {
    tracing::debug!(kind, count, "ingested new artifacts");
}

/// Drive the tier-fallback watcher supervisor. No cluster-orchestrator
/// client library is linked into this binary, so native subscription is
/// permanently unavailable and the watcher settles on the fixed-cadence
/// poll tier, reading back the orchestrator's own view of active jobs:
/// each tick it asks [`ghx_orchestrator::JobOrchestrator::try_active_snapshot`]
/// for every non-terminal Job's node-derived status, which catches a Job
/// whose Nodes all finished but whose own record was never reconciled
/// (its worker task died before reaching `finalize_job`). A Job the
/// snapshot reports as newly terminal has the mapped status persisted
/// via `apply_external_status` and triggers an immediate ingest sweep
/// rather than waiting for the next scheduled one.
async fn run_watcher_loop(state: ghx_server::AppState) {
    let mut native = NativeWatchSource;
    drain_tier(&mut native, |_| {}).await;

    loop {
        let active_jobs = state.orchestrator.list().await.iter().filter(|j| !j.status.is_terminal()).count();
        let orchestrator = state.orchestrator.clone();
        let mut polling = PollingSource::new(move || {
            orchestrator
                .try_active_snapshot()
                .into_iter()
                .filter(|(_, rollup)| rollup.is_terminal())
                .map(|(job_id, rollup)| WorkloadPhaseEvent {
                    event_type: WorkloadEventType::Modified,
                    workload: job_id,
                    phase: rollup.to_string(),
                    ready: 0,
                })
                .collect()
        });
        polling.set_active_jobs(u32::try_from(active_jobs).unwrap_or(u32::MAX));

        let watcher_state = state.clone();
        drain_tier(&mut polling, move |event| {
            let Some(job_status) = map_phase_to_job_status(&event.phase) else { return };
            let node_status = map_phase_to_status(&event.phase, event.ready);
            let state = watcher_state.clone();
            let job_id = event.workload.clone();
            tokio::spawn(async move {
                let became_terminal = state.orchestrator.apply_external_status(&job_id, job_status, node_status).await;
                if became_terminal {
                    state.bus.publish(ghx_proto::BusEvent::JobStatusChange {
                        job_id: job_id.clone(),
                        status: job_status,
                        node_name: None,
                    });
                    ingest_once(&state).await;
                }
            });
        })
        .await;

        tokio::time::sleep(Duration::from_secs(30)).await;
    }
}
