//! Node runner (§4.E): drives one Node's remote session and test
//! sequence. Never raises outward — transport and engine failures are
//! captured into the returned status and log trail.

use std::path::PathBuf;
use std::time::Duration;

use chrono::Utc;
use ghx_bench::{normalize_gpu_model, BenchmarkCatalog};
use ghx_proto::{CancelLatch, NodeConnection, NodeStatus, TestKind, TestResult, TestResultMap};
use ghx_remote::RemoteSession;
use tracing::warn;

/// The outcome of running one Node to completion (or short-circuit).
#[derive(Debug, Clone)]
pub struct NodeRunOutcome {
    /// The Node's terminal status.
    pub status: NodeStatus,
    /// Discovered GPU model, normalized, if discovery ran.
    pub gpu_type: Option<String>,
    /// Raw GPU identity strings, one per device, if discovery ran.
    pub gpu_list: Vec<String>,
    /// Results recorded in the order their tests executed.
    pub results: TestResultMap,
    /// Accumulated timestamped log trail.
    pub execution_log: Vec<String>,
}

fn log_line(log: &mut Vec<String>, line: impl AsRef<str>) {
    log.push(format!("[{}] {}", Utc::now().to_rfc3339(), line.as_ref()));
}

/// Run `tests`, in order, against `connection`, honoring `cancel` at
/// every step boundary the spec names: before opening the session,
/// before GPU discovery, before each test step, and after all tests.
pub async fn run_node(
    connection: &NodeConnection,
    tests: &[TestKind],
    dcgm_level: u8,
    asset_dir: &std::path::Path,
    catalog: &BenchmarkCatalog,
    cancel: &CancelLatch,
) -> NodeRunOutcome {
    let mut log = Vec::new();

    if cancel.is_raised() {
        log_line(&mut log, "cancelled before session open");
        return NodeRunOutcome {
            status: NodeStatus::Cancelled,
            gpu_type: None,
            gpu_list: Vec::new(),
            results: TestResultMap::new(),
            execution_log: log,
        };
    }

    let session = match RemoteSession::open(connection).await {
        Ok(session) => session,
        Err(e) => {
            log_line(&mut log, format!("session open failed: {e}"));
            warn!(host = %connection.host, error = %e, "node runner failed to open session");
            return NodeRunOutcome {
                status: NodeStatus::Failed,
                gpu_type: None,
                gpu_list: Vec::new(),
                results: TestResultMap::new(),
                execution_log: log,
            };
        }
    };

    if let Err(e) = session.run(&format!("mkdir -p {}", ghx_engine::SCRATCH_DIR), Duration::from_secs(30), false).await {
        log_line(&mut log, format!("scratch directory setup failed: {e}"));
        return NodeRunOutcome {
            status: NodeStatus::Error,
            gpu_type: None,
            gpu_list: Vec::new(),
            results: TestResultMap::new(),
            execution_log: log,
        };
    }

    if cancel.is_raised() {
        log_line(&mut log, "cancelled before GPU discovery");
        return NodeRunOutcome {
            status: NodeStatus::Cancelled,
            gpu_type: None,
            gpu_list: Vec::new(),
            results: TestResultMap::new(),
            execution_log: log,
        };
    }

    let (gpu_type, gpu_list) = discover_gpus(&session, &mut log).await;
    let gpu_count = gpu_list.len();

    if cancel.is_raised() {
        log_line(&mut log, "cancelled before test sequence");
        return NodeRunOutcome {
            status: NodeStatus::Cancelled,
            gpu_type: Some(gpu_type),
            gpu_list,
            results: TestResultMap::new(),
            execution_log: log,
        };
    }

    let mut results = TestResultMap::new();
    let mut cancelled_mid_sequence = false;
    for kind in tests {
        if cancel.is_raised() {
            cancelled_mid_sequence = true;
            log_line(&mut log, format!("cancelled before {kind} step; already-completed results retained"));
            break;
        }
        let result = run_one_test(*kind, &session, catalog, &gpu_type, gpu_count, asset_dir, dcgm_level, &mut log).await;
        results.insert(result);
    }

    let status = if cancelled_mid_sequence || cancel.is_raised() {
        NodeStatus::Cancelled
    } else if results.values().all(|r| r.status.contributes_to_pass()) {
        NodeStatus::Passed
    } else {
        NodeStatus::Failed
    };

    NodeRunOutcome { status, gpu_type: Some(gpu_type), gpu_list, results, execution_log: log }
}

async fn run_one_test(
    kind: TestKind,
    session: &RemoteSession,
    catalog: &BenchmarkCatalog,
    gpu_type: &str,
    gpu_count: usize,
    asset_dir: &std::path::Path,
    dcgm_level: u8,
    log: &mut Vec<String>,
) -> TestResult {
    match kind {
        TestKind::Bandwidth => ghx_engine::bandwidth(session, catalog, gpu_type, asset_dir, log).await,
        TestKind::P2p => ghx_engine::p2p(session, catalog, gpu_type, asset_dir, log).await,
        TestKind::Nccl => ghx_engine::nccl(session, catalog, gpu_type, gpu_count, asset_dir, log).await,
        TestKind::Dcgm => ghx_engine::dcgm(session, dcgm_level, log).await,
        TestKind::Ib => ghx_engine::ib(session, asset_dir, log).await,
    }
}

async fn discover_gpus(session: &RemoteSession, log: &mut Vec<String>) -> (String, Vec<String>) {
    let outcome = session.run("nvidia-smi -L || true", Duration::from_secs(300), false).await;
    let stdout = outcome.map(|o| o.stdout).unwrap_or_default();
    let gpu_list: Vec<String> = stdout.lines().map(str::trim).filter(|l| !l.is_empty()).map(str::to_string).collect();
    let gpu_type = gpu_list.first().map(|s| normalize_gpu_model(s)).unwrap_or_default();
    log_line(log, format!("discovered {} GPU(s), type={gpu_type:?}", gpu_list.len()));
    (gpu_type, gpu_list)
}

/// Scratch-area asset layout a runner expects to find binaries under.
#[derive(Debug, Clone)]
pub struct AssetLayout {
    /// Base directory holding `nvbandwidth`, `p2pBandwidthLatencyTest`,
    /// `nccl-tests.tar.gz`, and `ib_health_check.sh`.
    pub asset_dir: PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cancelled_before_session_open_short_circuits() {
        let cancel = CancelLatch::new();
        cancel.raise();
        let connection = NodeConnection {
            host: "unreachable.invalid".to_string(),
            port: 22,
            username: "root".to_string(),
            auth: ghx_proto::AuthMethod::Password { value: "x".to_string() },
            sudo_password: None,
            alias: None,
        };
        let catalog = BenchmarkCatalog::from_table(std::collections::BTreeMap::new());
        let outcome = run_node(
            &connection,
            &[TestKind::Bandwidth],
            1,
            std::path::Path::new("/tmp"),
            &catalog,
            &cancel,
        )
        .await;
        assert_eq!(outcome.status, NodeStatus::Cancelled);
        assert!(outcome.results.is_empty());
    }
}
