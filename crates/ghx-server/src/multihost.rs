//! Multi-node NCCL submit/poll (§6 "Multi-node NCCL"): the alternate
//! `mpirun`-composed form of §4.D, dispatched once against a single
//! launcher node's remote session rather than fanned out per-node like
//! the regular test battery.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use ghx_engine::{build_multi_host_nccl_command, HostTarget, NcclMpiConfig};
use ghx_proto::NodeConnection;
use ghx_remote::RemoteSession;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::warn;
use uuid::Uuid;

/// Request body for a multi-host NCCL submission.
#[derive(Debug, Deserialize)]
pub struct MultiHostSubmission {
    /// Connection for the node that launches `mpirun`.
    pub launcher: NodeConnection,
    /// Total process count (`-np`).
    pub np: usize,
    /// GPUs per node, passed to the trailing `all_reduce_perf -g`.
    pub gpu_per_node: usize,
    /// Explicit comma-joined host target.
    pub hosts: Option<Vec<String>>,
    /// Hostfile path target, used if `hosts` is absent.
    pub hostfile: Option<PathBuf>,
    /// Remote directory holding the extracted NCCL tests build.
    pub test_dir: String,
    /// Optional `mpirun`/NCCL environment overrides.
    #[serde(default)]
    pub config: NcclMpiConfig,
}

impl MultiHostSubmission {
    fn host_target(&self) -> Option<HostTarget> {
        if let Some(hosts) = &self.hosts {
            Some(HostTarget::Hosts(hosts.clone()))
        } else {
            self.hostfile.clone().map(HostTarget::HostFile)
        }
    }
}

/// Status of one multi-host NCCL run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MultiHostStatus {
    /// Dispatched, `mpirun` has not yet returned.
    Running,
    /// `mpirun` exited zero.
    Completed,
    /// `mpirun` exited non-zero, timed out, or the session failed to open.
    Failed,
}

/// A single tracked multi-host run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MultiHostRun {
    /// Opaque run id.
    pub run_id: String,
    /// Current status.
    pub status: MultiHostStatus,
    /// The composed command, for operator visibility.
    pub command: String,
    /// Combined stdout/stderr once the run finishes.
    pub output: Option<String>,
    /// Error message, present only when `status == failed` before any
    /// output was captured (e.g. the session never opened).
    pub error: Option<String>,
    /// When this run was submitted.
    pub created_at: DateTime<Utc>,
}

/// Deserialization-free in-memory store for multi-host runs, keyed by
/// `run_id`. Not persisted across restarts, matching the core's
/// no-persistence-of-in-flight-state non-goal.
#[derive(Default)]
pub struct MultiHostStore {
    runs: Mutex<HashMap<String, MultiHostRun>>,
}

impl MultiHostStore {
    /// An empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new run, spawn the dispatch task, and return its id.
    pub async fn submit(self: &Arc<Self>, submission: MultiHostSubmission) -> Result<String, String> {
        let Some(target) = submission.host_target() else {
            return Err("either hosts or hostfile must be provided".to_string());
        };
        let command = build_multi_host_nccl_command(&submission.test_dir, submission.np, &target, submission.gpu_per_node, &submission.config);
        let run_id = Uuid::new_v4().to_string();
        let run = MultiHostRun {
            run_id: run_id.clone(),
            status: MultiHostStatus::Running,
            command: command.clone(),
            output: None,
            error: None,
            created_at: Utc::now(),
        };
        self.runs.lock().await.insert(run_id.clone(), run);

        let store = self.clone();
        let launcher = submission.launcher;
        let dispatch_run_id = run_id.clone();
        tokio::spawn(async move {
            store.dispatch(dispatch_run_id, launcher, command).await;
        });

        Ok(run_id)
    }

    async fn dispatch(&self, run_id: String, launcher: NodeConnection, command: String) {
        let outcome = match RemoteSession::open(&launcher).await {
            Ok(session) => session.run(&command, Duration::from_secs(600), true).await,
            Err(e) => Err(ghx_remote::RemoteError::Exec(e.to_string())),
        };

        let mut runs = self.runs.lock().await;
        let Some(run) = runs.get_mut(&run_id) else { return };
        match outcome {
            Ok(result) if result.exit_code == 0 => {
                run.status = MultiHostStatus::Completed;
                run.output = Some(format!("{}\n{}", result.stdout, result.stderr));
            }
            Ok(result) => {
                run.status = MultiHostStatus::Failed;
                run.output = Some(format!("{}\n{}", result.stdout, result.stderr));
                warn!(run_id, exit_code = result.exit_code, "multi-host nccl run failed");
            }
            Err(e) => {
                run.status = MultiHostStatus::Failed;
                run.error = Some(e.to_string());
                warn!(run_id, error = %e, "multi-host nccl run failed to dispatch");
            }
        }
    }

    /// Fetch the current state of a run.
    pub async fn get(&self, run_id: &str) -> Option<MultiHostRun> {
        self.runs.lock().await.get(run_id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ghx_proto::AuthMethod;

    fn launcher() -> NodeConnection {
        NodeConnection {
            host: "127.0.0.1".to_string(),
            port: 2222,
            username: "root".to_string(),
            auth: AuthMethod::Password { value: "x".to_string() },
            sudo_password: None,
            alias: None,
        }
    }

    #[tokio::test]
    async fn submit_rejects_missing_host_target() {
        let store = Arc::new(MultiHostStore::new());
        let submission = MultiHostSubmission {
            launcher: launcher(),
            np: 2,
            gpu_per_node: 8,
            hosts: None,
            hostfile: None,
            test_dir: "/tmp/ghx/nccl-tests".to_string(),
            config: NcclMpiConfig::default(),
        };
        assert!(store.submit(submission).await.is_err());
    }

    #[tokio::test]
    async fn submit_registers_a_running_run_visible_via_get() {
        let store = Arc::new(MultiHostStore::new());
        let submission = MultiHostSubmission {
            launcher: launcher(),
            np: 2,
            gpu_per_node: 8,
            hosts: Some(vec!["node-a".to_string(), "node-b".to_string()]),
            hostfile: None,
            test_dir: "/tmp/ghx/nccl-tests".to_string(),
            config: NcclMpiConfig::default(),
        };
        let run_id = store.submit(submission).await.unwrap();
        let run = store.get(&run_id).await.unwrap();
        assert!(run.command.contains("-host node-a,node-b"));
        assert!(run.command.contains("mpirun"));
    }

    #[tokio::test]
    async fn get_on_unknown_run_is_none() {
        let store = MultiHostStore::new();
        assert!(store.get("does-not-exist").await.is_none());
    }
}
