//! Job orchestrator (§4.F): submit/get/list/stop, and the per-job worker
//! that fans out Node runners with a bounded concurrency and merges
//! their results back into the owning Job record.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use ghx_bench::BenchmarkCatalog;
use ghx_proto::{CancelLatch, Job, JobStatus, JobSubmission, JobView, NodeStatus, ProtoError};
use thiserror::Error;
use tokio::sync::{Mutex, Semaphore};
use tracing::info;

/// Errors the orchestrator's public operations can return. Validation
/// failures never create a Job; the rest are read/control-path errors.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// The submission failed validation; no Job was created.
    #[error("validation error: {0}")]
    Validation(#[from] ProtoError),
    /// No Job exists with the given id.
    #[error("job {0} not found")]
    NotFound(String),
    /// Stop was requested on a Job that has already reached a terminal
    /// status; per the idempotence law this is a client error, not a
    /// silent no-op.
    #[error("job {0} is already terminal and cannot be stopped")]
    AlreadyTerminal(String),
}

struct JobEntry {
    job: Job,
    cancel: CancelLatch,
}

/// Default fan-out bound (`GHX_FANOUT_LIMIT`'s default value) when the
/// caller doesn't override it.
pub const DEFAULT_FANOUT_LIMIT: usize = 10;

/// Owns the `jobs` map — the orchestrator's sole shared mutable state —
/// and the catalog/asset configuration node runners need.
pub struct JobOrchestrator {
    jobs: Arc<Mutex<HashMap<String, JobEntry>>>,
    catalog: Arc<BenchmarkCatalog>,
    asset_dir: PathBuf,
    fanout_limit: usize,
}

impl JobOrchestrator {
    /// Construct an orchestrator with no jobs yet registered.
    #[must_use]
    pub fn new(catalog: Arc<BenchmarkCatalog>, asset_dir: PathBuf, fanout_limit: usize) -> Self {
        Self {
            jobs: Arc::new(Mutex::new(HashMap::new())),
            catalog,
            asset_dir,
            fanout_limit: fanout_limit.max(1),
        }
    }

    /// Validate and register a new Job, spawning its worker task.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::Validation`] if `submission` fails
    /// any of [`Job::from_submission`]'s checks; no Job is created.
    pub async fn submit(&self, submission: JobSubmission) -> Result<String, OrchestratorError> {
        let job_id = uuid::Uuid::new_v4().to_string();
        let job = Job::from_submission(submission, job_id.clone())?;
        let cancel = CancelLatch::new();
        {
            let mut jobs = self.jobs.lock().await;
            jobs.insert(job_id.clone(), JobEntry { job, cancel: cancel.clone() });
        }
        self.spawn_worker(job_id.clone(), cancel);
        Ok(job_id)
    }

    /// Fetch a sanitized view of one Job.
    pub async fn get(&self, job_id: &str) -> Option<JobView> {
        self.jobs.lock().await.get(job_id).map(|entry| entry.job.sanitized())
    }

    /// Snapshot sanitized views of every known Job.
    pub async fn list(&self) -> Vec<JobView> {
        self.jobs.lock().await.values().map(|entry| entry.job.sanitized()).collect()
    }

    /// Best-effort synchronous snapshot of non-terminal Jobs' node-
    /// derived status, for the watcher's poll tier, which calls this
    /// from a plain (non-async) closure and cannot await the lock.
    /// Reports each Job's [`Job::rollup_status`] rather than its stored
    /// `status`, so a Job whose Nodes have all already reached a
    /// terminal state but whose own record was never reconciled (its
    /// worker task died before reaching `finalize_job`) is visible to
    /// the poller as a backstop. Returns an empty list on the rare
    /// contended lock rather than blocking; the next poll tick retries.
    #[must_use]
    pub fn try_active_snapshot(&self) -> Vec<(String, JobStatus)> {
        let Ok(jobs) = self.jobs.try_lock() else { return Vec::new() };
        jobs.values()
            .filter(|entry| !entry.job.status.is_terminal())
            .map(|entry| (entry.job.job_id.clone(), entry.job.rollup_status()))
            .collect()
    }

    /// Apply an externally observed cluster-mode status to Job
    /// `job_id`: the Job itself moves to `job_status`, and every
    /// currently non-terminal Node moves to `node_status` when given.
    /// A no-op if the Job is unknown or already terminal: a terminal
    /// Job is never resurrected, per the same rule `merge_node_result`
    /// enforces at the Node level.
    ///
    /// Returns `true` if this call is what made the Job terminal, so
    /// the caller can trigger an immediate ingestion sweep instead of
    /// waiting for the next scheduled one.
    pub async fn apply_external_status(&self, job_id: &str, job_status: JobStatus, node_status: Option<NodeStatus>) -> bool {
        let mut jobs_guard = self.jobs.lock().await;
        let Some(entry) = jobs_guard.get_mut(job_id) else { return false };
        if entry.job.status.is_terminal() {
            return false;
        }
        let now = Utc::now();
        entry.job.status = job_status;
        entry.job.updated_at = now;
        if let Some(node_status) = node_status {
            for node in &mut entry.job.nodes {
                if !node.status.is_terminal() {
                    node.status = node_status;
                    if node_status.is_terminal() {
                        node.completed_at = Some(now);
                    }
                }
            }
        }
        job_status.is_terminal()
    }

    /// Raise the cancel latch and eagerly transition the Job (and every
    /// non-terminal Node) to `cancelled`.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::NotFound`] or
    /// [`OrchestratorError::AlreadyTerminal`].
    pub async fn stop(&self, job_id: &str) -> Result<(), OrchestratorError> {
        let mut jobs = self.jobs.lock().await;
        let entry = jobs.get_mut(job_id).ok_or_else(|| OrchestratorError::NotFound(job_id.to_string()))?;
        if entry.job.status.is_terminal() {
            return Err(OrchestratorError::AlreadyTerminal(job_id.to_string()));
        }
        entry.cancel.raise();
        entry.job.raise_cancel();
        entry.job.status = JobStatus::Cancelled;
        let now = Utc::now();
        for node in &mut entry.job.nodes {
            if !node.status.is_terminal() {
                node.status = NodeStatus::Cancelled;
                node.completed_at = Some(now);
            }
        }
        entry.job.updated_at = now;
        Ok(())
    }

    fn spawn_worker(&self, job_id: String, cancel: CancelLatch) {
        let jobs = self.jobs.clone();
        let catalog = self.catalog.clone();
        let asset_dir = self.asset_dir.clone();
        let fanout_limit = self.fanout_limit;
        tokio::spawn(async move {
            run_job_worker(jobs, job_id, catalog, asset_dir, cancel, fanout_limit).await;
        });
    }
}

async fn run_job_worker(
    jobs: Arc<Mutex<HashMap<String, JobEntry>>>,
    job_id: String,
    catalog: Arc<BenchmarkCatalog>,
    asset_dir: PathBuf,
    cancel: CancelLatch,
    fanout_limit: usize,
) {
    let (tests, dcgm_level, connections) = {
        let mut jobs_guard = jobs.lock().await;
        let Some(entry) = jobs_guard.get_mut(&job_id) else { return };
        entry.job.status = JobStatus::Running;
        entry.job.updated_at = Utc::now();
        let connections: Vec<_> =
            entry.job.nodes.iter().map(|n| (n.node_id.clone(), n.connection.clone())).collect();
        (entry.job.tests.clone(), entry.job.dcgm_level, connections)
    };

    let total = connections.len();
    let bound = fanout_limit.min(total.max(1));
    let semaphore = Arc::new(Semaphore::new(bound));
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

    for (node_id, connection) in connections {
        let catalog = catalog.clone();
        let asset_dir = asset_dir.clone();
        let tests = tests.clone();
        let node_cancel = cancel.clone();
        let tx = tx.clone();
        let semaphore = semaphore.clone();
        tokio::spawn(async move {
            let _permit = semaphore.acquire_owned().await;
            let outcome = ghx_node::run_node(&connection, &tests, dcgm_level, &asset_dir, &catalog, &node_cancel).await;
            let _ = tx.send((node_id, outcome));
        });
    }
    drop(tx);

    let mut received = 0usize;
    while let Some((node_id, outcome)) = rx.recv().await {
        merge_node_result(&jobs, &job_id, &node_id, outcome).await;
        received += 1;
        if cancel.is_raised() {
            // Per the worker algorithm: stop awaiting remaining runners
            // once cancellation is observed at a completion point.
            // Runners still in flight keep running and self-merge when
            // they finish; the job record transitions to terminal now.
            break;
        }
        if received == total {
            break;
        }
    }

    finalize_job(&jobs, &job_id, &cancel).await;
}

async fn merge_node_result(
    jobs: &Arc<Mutex<HashMap<String, JobEntry>>>,
    job_id: &str,
    node_id: &str,
    outcome: ghx_node::NodeRunOutcome,
) {
    let mut jobs_guard = jobs.lock().await;
    let Some(entry) = jobs_guard.get_mut(job_id) else { return };
    let Some(node) = entry.job.nodes.iter_mut().find(|n| n.node_id == node_id) else { return };
    if node.status.is_terminal() {
        // A runner can finish after `stop` already marked this node
        // terminal; the stop remains authoritative (see DESIGN.md).
        return;
    }
    node.status = outcome.status;
    node.gpu_type = outcome.gpu_type;
    node.gpu_list = outcome.gpu_list;
    node.results = outcome.results;
    node.execution_log = outcome.execution_log;
    node.completed_at = Some(Utc::now());
}

async fn finalize_job(jobs: &Arc<Mutex<HashMap<String, JobEntry>>>, job_id: &str, cancel: &CancelLatch) {
    let mut jobs_guard = jobs.lock().await;
    let Some(entry) = jobs_guard.get_mut(job_id) else { return };

    if cancel.is_raised() {
        entry.job.status = JobStatus::Cancelled;
        let now = Utc::now();
        for node in &mut entry.job.nodes {
            if !node.status.is_terminal() {
                node.status = NodeStatus::Cancelled;
                node.completed_at = Some(now);
            }
        }
    } else {
        entry.job.status = entry.job.rollup_status();
    }
    entry.job.updated_at = Utc::now();
    info!(job_id, status = %entry.job.status, "job worker completed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use ghx_proto::{AuthMethod, NodeSubmission, TestKind};

    fn make_submission() -> JobSubmission {
        JobSubmission {
            job_name: Some("smoke".to_string()),
            nodes: vec![NodeSubmission {
                host: "127.0.0.1".to_string(),
                port: Some(2222),
                username: "root".to_string(),
                auth: AuthMethod::Password { value: "hunter2".to_string() },
                sudo_password: None,
                alias: None,
            }],
            tests: vec![TestKind::Dcgm],
            dcgm_level: Some(1),
        }
    }

    fn make_orchestrator() -> JobOrchestrator {
        JobOrchestrator::new(
            Arc::new(BenchmarkCatalog::from_table(std::collections::BTreeMap::new())),
            PathBuf::from("/tmp/ghx-assets"),
            DEFAULT_FANOUT_LIMIT,
        )
    }

    #[tokio::test]
    async fn submit_rejects_invalid_submission() {
        let orchestrator = make_orchestrator();
        let mut submission = make_submission();
        submission.nodes.clear();
        let result = orchestrator.submit(submission).await;
        assert!(matches!(result, Err(OrchestratorError::Validation(_))));
    }

    #[tokio::test]
    async fn submit_registers_a_pending_job_visible_via_get_and_list() {
        let orchestrator = make_orchestrator();
        let job_id = orchestrator.submit(make_submission()).await.unwrap();
        let view = orchestrator.get(&job_id).await.unwrap();
        assert_eq!(view.job_id, job_id);
        assert_eq!(orchestrator.list().await.len(), 1);
    }

    #[tokio::test]
    async fn stop_on_unknown_job_is_not_found() {
        let orchestrator = make_orchestrator();
        let result = orchestrator.stop("does-not-exist").await;
        assert!(matches!(result, Err(OrchestratorError::NotFound(_))));
    }

    #[tokio::test]
    async fn stop_eagerly_cancels_pending_job_and_its_nodes() {
        let orchestrator = make_orchestrator();
        let job_id = orchestrator.submit(make_submission()).await.unwrap();
        orchestrator.stop(&job_id).await.unwrap();
        let view = orchestrator.get(&job_id).await.unwrap();
        assert_eq!(view.status, JobStatus::Cancelled);
        assert!(view.cancel_flag);
    }

    #[tokio::test]
    async fn stop_twice_is_a_client_error_and_does_not_mutate_state() {
        let orchestrator = make_orchestrator();
        let job_id = orchestrator.submit(make_submission()).await.unwrap();
        orchestrator.stop(&job_id).await.unwrap();
        let before = orchestrator.get(&job_id).await.unwrap();
        let result = orchestrator.stop(&job_id).await;
        assert!(matches!(result, Err(OrchestratorError::AlreadyTerminal(_))));
        let after = orchestrator.get(&job_id).await.unwrap();
        assert_eq!(before.updated_at, after.updated_at);
    }

    #[tokio::test]
    async fn merge_node_result_does_not_resurrect_a_cancelled_node() {
        let orchestrator = make_orchestrator();
        let job_id = orchestrator.submit(make_submission()).await.unwrap();
        orchestrator.stop(&job_id).await.unwrap();
        let node_id = orchestrator.get(&job_id).await.unwrap().nodes[0].node_id.clone();

        let late_outcome = ghx_node::NodeRunOutcome {
            status: NodeStatus::Passed,
            gpu_type: Some("H100".to_string()),
            gpu_list: vec!["GPU-0".to_string()],
            results: ghx_proto::TestResultMap::new(),
            execution_log: vec!["late arrival after stop".to_string()],
        };
        merge_node_result(&orchestrator.jobs, &job_id, &node_id, late_outcome).await;

        let view = orchestrator.get(&job_id).await.unwrap();
        assert_eq!(view.nodes[0].status, NodeStatus::Cancelled);
        assert!(view.nodes[0].gpu_type.is_none());
    }

    #[tokio::test]
    async fn apply_external_status_updates_a_running_job() {
        let orchestrator = make_orchestrator();
        let job_id = orchestrator.submit(make_submission()).await.unwrap();

        let became_terminal =
            orchestrator.apply_external_status(&job_id, JobStatus::Failed, Some(NodeStatus::Failed)).await;
        assert!(became_terminal);

        let view = orchestrator.get(&job_id).await.unwrap();
        assert_eq!(view.status, JobStatus::Failed);
        assert_eq!(view.nodes[0].status, NodeStatus::Failed);
    }

    #[tokio::test]
    async fn apply_external_status_does_not_resurrect_a_terminal_job() {
        let orchestrator = make_orchestrator();
        let job_id = orchestrator.submit(make_submission()).await.unwrap();
        orchestrator.stop(&job_id).await.unwrap();

        let became_terminal =
            orchestrator.apply_external_status(&job_id, JobStatus::Completed, Some(NodeStatus::Passed)).await;
        assert!(!became_terminal);

        let view = orchestrator.get(&job_id).await.unwrap();
        assert_eq!(view.status, JobStatus::Cancelled);
        assert_eq!(view.nodes[0].status, NodeStatus::Cancelled);
    }

    #[tokio::test]
    async fn try_active_snapshot_only_reports_non_terminal_jobs() {
        let orchestrator = make_orchestrator();
        let running_job = orchestrator.submit(make_submission()).await.unwrap();
        let stopped_job = orchestrator.submit(make_submission()).await.unwrap();
        orchestrator.stop(&stopped_job).await.unwrap();

        let snapshot = orchestrator.try_active_snapshot();
        let job_ids: Vec<_> = snapshot.iter().map(|(id, _)| id.clone()).collect();
        assert!(job_ids.contains(&running_job));
        assert!(!job_ids.contains(&stopped_job));
    }
}
