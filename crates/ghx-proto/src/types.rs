//! Core entity types shared by every component of the orchestrator.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ProtoError;

/// One of the five diagnostic test kinds, in the closed enumeration the
/// spec requires: adding a kind is a code change, not configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestKind {
    /// GPU memory bandwidth (nvbandwidth).
    Bandwidth,
    /// Peer-to-peer bandwidth (`p2pBandwidthLatencyTest`).
    P2p,
    /// Collective-communication bandwidth (NCCL `all_reduce_perf`).
    Nccl,
    /// Vendor diagnostic (`dcgmi diag`).
    Dcgm,
    /// InfiniBand fabric health script.
    Ib,
}

impl TestKind {
    /// Parse a test kind from its external wire name.
    ///
    /// # Errors
    ///
    /// Returns [`ProtoError::Validation`] if `s` is not one of the five
    /// recognized test kinds.
    pub fn parse(s: &str) -> Result<Self, ProtoError> {
        match s {
            "nvbandwidth" | "bandwidth" => Ok(Self::Bandwidth),
            "p2p" => Ok(Self::P2p),
            "nccl" => Ok(Self::Nccl),
            "dcgm" => Ok(Self::Dcgm),
            "ib" => Ok(Self::Ib),
            other => Err(ProtoError::Validation(format!("unknown test kind: {other}"))),
        }
    }

    /// The benchmark metric name this test kind is gated on, if any.
    #[must_use]
    pub const fn benchmark_metric(&self) -> Option<&'static str> {
        match self {
            Self::Bandwidth => Some("bw"),
            Self::P2p => Some("p2p"),
            Self::Nccl => Some("nccl"),
            Self::Dcgm | Self::Ib => None,
        }
    }
}

impl fmt::Display for TestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Bandwidth => "bandwidth",
            Self::P2p => "p2p",
            Self::Nccl => "nccl",
            Self::Dcgm => "dcgm",
            Self::Ib => "ib",
        };
        write!(f, "{s}")
    }
}

/// Verdict attached to a single [`TestResult`] or rolled up onto a [`Node`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestStatus {
    /// The step ran and the measured value cleared its benchmark.
    Passed,
    /// The step ran and the measured value missed its benchmark.
    Failed,
    /// The step was not attempted (e.g. a prerequisite was absent).
    Skipped,
    /// The step could not be completed (transport or tool error).
    Error,
    /// The step was short-circuited by a raised cancel latch.
    Cancelled,
}

impl TestStatus {
    /// Per invariant 6: `skipped` and `passed` both contribute to an
    /// overall `passed` Node verdict; `error` and `failed` do not.
    #[must_use]
    pub const fn contributes_to_pass(&self) -> bool {
        matches!(self, Self::Passed | Self::Skipped)
    }
}

impl fmt::Display for TestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Passed => "passed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
            Self::Error => "error",
            Self::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

/// Outcome of running one test kind on one node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestResult {
    /// Which test kind produced this result.
    pub kind: TestKind,
    /// Pass/fail/error/skip/cancel verdict.
    pub status: TestStatus,
    /// Primary measured scalar, for numeric tests.
    pub value: Option<f64>,
    /// Unit of `value` (e.g. `"GB/s"`).
    pub unit: Option<String>,
    /// The threshold consulted to produce the verdict; `None` means the
    /// model was unrecognized and no performance gate applied.
    pub benchmark: Option<f64>,
    /// Per-kind sub-scalars (e.g. `h2d`/`d2h` for bandwidth).
    pub details: BTreeMap<String, f64>,
    /// Verbatim tool stdout, retained for forensic logging.
    pub raw_output: String,
    /// Present when `status == error`.
    pub message: Option<String>,
}

impl TestResult {
    /// Build a result that never ran (precondition unmet, e.g. a raised
    /// cancel latch observed at a step boundary).
    #[must_use]
    pub fn skipped(kind: TestKind) -> Self {
        Self {
            kind,
            status: TestStatus::Skipped,
            value: None,
            unit: None,
            benchmark: None,
            details: BTreeMap::new(),
            raw_output: String::new(),
            message: None,
        }
    }

    /// Build a result that was short-circuited by cancellation.
    #[must_use]
    pub fn cancelled(kind: TestKind) -> Self {
        Self {
            kind,
            status: TestStatus::Cancelled,
            value: None,
            unit: None,
            benchmark: None,
            details: BTreeMap::new(),
            raw_output: String::new(),
            message: None,
        }
    }

    /// Build an error result carrying a human-readable cause.
    #[must_use]
    pub fn error(kind: TestKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            status: TestStatus::Error,
            value: None,
            unit: None,
            benchmark: None,
            details: BTreeMap::new(),
            raw_output: String::new(),
            message: Some(message.into()),
        }
    }
}

/// Insertion-ordered `TestKind -> TestResult` association.
///
/// A plain `HashMap` would not preserve the order tests actually executed
/// in, which the node runner's ordering guarantee depends on; this keeps
/// writes append-only in executed order while still supporting lookup.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TestResultMap(Vec<(TestKind, TestResult)>);

impl TestResultMap {
    /// An empty map.
    #[must_use]
    pub const fn new() -> Self {
        Self(Vec::new())
    }

    /// Record a result, appending it after any already written.
    ///
    /// If `kind` was already present its prior result is replaced in
    /// place, preserving its original position (tests only ever run
    /// once per node, so this path exists for test convenience only).
    pub fn insert(&mut self, result: TestResult) {
        if let Some(existing) = self.0.iter_mut().find(|(k, _)| *k == result.kind) {
            existing.1 = result;
        } else {
            self.0.push((result.kind, result));
        }
    }

    /// Look up the result for a given kind, if it ran.
    #[must_use]
    pub fn get(&self, kind: TestKind) -> Option<&TestResult> {
        self.0.iter().find(|(k, _)| *k == kind).map(|(_, r)| r)
    }

    /// Iterate results in the order they were written.
    pub fn values(&self) -> impl Iterator<Item = &TestResult> {
        self.0.iter().map(|(_, r)| r)
    }

    /// Number of results recorded so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether no test has run yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// A keyed snapshot suitable for an external JSON view. Key order is
    /// not guaranteed to match execution order (only the internal vector
    /// guarantees that); this is purely a lookup-friendly rendering.
    #[must_use]
    pub fn as_map(&self) -> BTreeMap<String, TestResult> {
        self.0
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }
}

/// Status of a single target node within a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    /// Not yet started.
    Pending,
    /// Runner is active.
    Running,
    /// Every test reached a passing verdict.
    Passed,
    /// At least one test failed or errored.
    Failed,
    /// Short-circuited by the job's cancel latch.
    Cancelled,
    /// The runner itself failed before producing any verdicts.
    Error,
}

impl NodeStatus {
    /// Whether this status is one a node can never leave.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Passed | Self::Failed | Self::Cancelled | Self::Error
        )
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Passed => "passed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::Error => "error",
        };
        write!(f, "{s}")
    }
}

/// Status of a job as a whole.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Submitted, worker not yet scheduled.
    Pending,
    /// Worker is fanning out node runners.
    Running,
    /// Cancel latch raised, winding down.
    Cancelling,
    /// Terminated by cancellation.
    Cancelled,
    /// Every node passed.
    Completed,
    /// At least one node did not pass.
    Failed,
}

impl JobStatus {
    /// Whether a job in this status can still be stopped.
    #[must_use]
    pub const fn is_stoppable(&self) -> bool {
        matches!(self, Self::Pending | Self::Running | Self::Cancelling)
    }

    /// Whether this status is terminal.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Cancelled | Self::Completed | Self::Failed)
    }

    /// Map a cluster-mode workload phase string (case-insensitive
    /// substring match, per §4.G) onto a job status, if recognized.
    #[must_use]
    pub fn from_workload_phase(phase: &str) -> Option<Self> {
        let p = phase.to_lowercase();
        if p.contains("crashloop") || p.contains("failed") || p.contains("error") {
            Some(Self::Failed)
        } else if p.contains("succeeded") || p.contains("completed") {
            Some(Self::Completed)
        } else if p.contains("pending") {
            Some(Self::Pending)
        } else if p.contains("running") {
            Some(Self::Running)
        } else {
            None
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Cancelling => "cancelling",
            Self::Cancelled => "cancelled",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// How a node proves its identity to the remote session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum AuthMethod {
    /// Plain password authentication.
    Password {
        /// The password.
        value: String,
    },
    /// Private-key authentication.
    PrivateKey {
        /// PEM-encoded key material.
        value: String,
        /// Optional key passphrase.
        passphrase: Option<String>,
    },
}

/// Connection parameters and secrets for one target host.
///
/// This is the sentinel struct the spec calls `_connection`: it is never
/// present, under any name, in a sanitized [`NodeView`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeConnection {
    /// Target hostname or IP.
    pub host: String,
    /// SSH port.
    pub port: u16,
    /// SSH username.
    pub username: String,
    /// Authentication handle.
    pub auth: AuthMethod,
    /// Privilege-escalation secret, if the node needs one to run `sudo`.
    pub sudo_password: Option<String>,
    /// Operator-facing display alias.
    pub alias: Option<String>,
}

/// Request shape for one node in a job submission.
#[derive(Debug, Clone, Deserialize)]
pub struct NodeSubmission {
    /// Target hostname or IP.
    pub host: String,
    /// SSH port; defaults to 22.
    pub port: Option<u16>,
    /// SSH username.
    pub username: String,
    /// Authentication handle.
    pub auth: AuthMethod,
    /// Privilege-escalation secret.
    pub sudo_password: Option<String>,
    /// Operator-facing display alias.
    pub alias: Option<String>,
}

impl NodeSubmission {
    /// Validate required fields and lower into a [`NodeConnection`] plus a
    /// freshly synthesized node ID.
    ///
    /// # Errors
    ///
    /// Returns [`ProtoError::MissingField`] if `host` or `username` is
    /// empty.
    pub fn into_connection(self) -> Result<NodeConnection, ProtoError> {
        if self.host.trim().is_empty() {
            return Err(ProtoError::MissingField("host"));
        }
        if self.username.trim().is_empty() {
            return Err(ProtoError::MissingField("username"));
        }
        Ok(NodeConnection {
            host: self.host,
            port: self.port.unwrap_or(22),
            username: self.username,
            auth: self.auth,
            sudo_password: self.sudo_password,
            alias: self.alias,
        })
    }
}

/// A single target within a job: connection details, discovered GPU
/// inventory, and accumulated test results.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    /// Opaque ID, unique within the owning job.
    pub node_id: String,
    /// Connection parameters, including secrets.
    pub connection: NodeConnection,
    /// Current lifecycle status.
    pub status: NodeStatus,
    /// When the runner started on this node.
    pub started_at: Option<DateTime<Utc>>,
    /// When the runner reached a terminal state.
    pub completed_at: Option<DateTime<Utc>>,
    /// Canonical (post-normalization) GPU model name.
    pub gpu_type: Option<String>,
    /// Raw GPU identity strings from `nvidia-smi -L`.
    pub gpu_list: Vec<String>,
    /// Test results, in the order the engine produced them.
    pub results: TestResultMap,
    /// Timestamped execution log trail.
    pub execution_log: Vec<String>,
}

impl Node {
    /// Build a fresh, not-yet-started node record from a validated
    /// submission.
    #[must_use]
    pub fn new(node_id: String, connection: NodeConnection) -> Self {
        Self {
            node_id,
            connection,
            status: NodeStatus::Pending,
            started_at: None,
            completed_at: None,
            gpu_type: None,
            gpu_list: Vec::new(),
            results: TestResultMap::new(),
            execution_log: Vec::new(),
        }
    }

    /// Append a timestamped line to this node's execution log trail.
    pub fn log(&mut self, line: impl Into<String>) {
        self.execution_log
            .push(format!("[{}] {}", Utc::now().to_rfc3339(), line.into()));
    }

    /// The node's overall verdict, per §4.E step 7: `passed` iff every
    /// result contributes to a pass.
    #[must_use]
    pub fn computed_status(&self, cancelled: bool) -> NodeStatus {
        if cancelled {
            return NodeStatus::Cancelled;
        }
        if self
            .results
            .values()
            .all(|r| r.status.contributes_to_pass())
        {
            NodeStatus::Passed
        } else {
            NodeStatus::Failed
        }
    }

    /// Produce the externally visible, secret-free view of this node.
    #[must_use]
    pub fn sanitized(&self) -> NodeView {
        NodeView {
            node_id: self.node_id.clone(),
            host: self.connection.host.clone(),
            port: self.connection.port,
            username: self.connection.username.clone(),
            alias: self.connection.alias.clone(),
            status: self.status,
            started_at: self.started_at,
            completed_at: self.completed_at,
            gpu_type: self.gpu_type.clone(),
            gpu_list: self.gpu_list.clone(),
            results: self.results.as_map(),
            execution_log: self.execution_log.clone(),
        }
    }
}

/// Secret-free, externally servable rendering of a [`Node`].
#[derive(Debug, Clone, Serialize)]
pub struct NodeView {
    /// Opaque ID, unique within the owning job.
    pub node_id: String,
    /// Target hostname or IP.
    pub host: String,
    /// SSH port.
    pub port: u16,
    /// SSH username.
    pub username: String,
    /// Operator-facing display alias.
    pub alias: Option<String>,
    /// Current lifecycle status.
    pub status: NodeStatus,
    /// When the runner started on this node.
    pub started_at: Option<DateTime<Utc>>,
    /// When the runner reached a terminal state.
    pub completed_at: Option<DateTime<Utc>>,
    /// Canonical (post-normalization) GPU model name.
    pub gpu_type: Option<String>,
    /// Raw GPU identity strings from `nvidia-smi -L`.
    pub gpu_list: Vec<String>,
    /// Test results keyed by kind.
    pub results: BTreeMap<String, TestResult>,
    /// Timestamped execution log trail.
    pub execution_log: Vec<String>,
}

/// Request shape for a job submission.
#[derive(Debug, Clone, Deserialize)]
pub struct JobSubmission {
    /// Operator-supplied job name; also used as the synthesized job ID
    /// when the caller does not supply one directly.
    pub job_name: Option<String>,
    /// Target nodes.
    pub nodes: Vec<NodeSubmission>,
    /// Selected test kinds, in the order they should run.
    pub tests: Vec<TestKind>,
    /// DCGM diagnostic level, 1..4; required iff `dcgm` is selected.
    pub dcgm_level: Option<u8>,
}

/// A health-check job: a batch of node runs over a shared set of tests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Opaque, unique job ID.
    pub job_id: String,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last-mutation timestamp.
    pub updated_at: DateTime<Utc>,
    /// Current lifecycle status.
    pub status: JobStatus,
    /// Selected test kinds, in declared order.
    pub tests: Vec<TestKind>,
    /// DCGM diagnostic level.
    pub dcgm_level: u8,
    /// Target nodes, in submission order.
    pub nodes: Vec<Node>,
    /// One-way cancellation latch: may be raised, never lowered.
    pub cancel_flag: bool,
    /// Cluster-mode reap deadline.
    pub expires_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Validate a submission and materialize a fresh, `pending` job with
    /// a cleared cancel latch.
    ///
    /// # Errors
    ///
    /// Returns [`ProtoError::Validation`] if `nodes` or `tests` is empty,
    /// or `dcgm_level` is out of `1..=4` when `dcgm` is selected.
    /// Returns [`ProtoError::MissingField`] if a node submission is
    /// missing `host` or `username`.
    pub fn from_submission(submission: JobSubmission, job_id: String) -> Result<Self, ProtoError> {
        if submission.nodes.is_empty() {
            return Err(ProtoError::Validation("nodes must not be empty".into()));
        }
        if submission.tests.is_empty() {
            return Err(ProtoError::Validation("tests must not be empty".into()));
        }
        let dcgm_level = submission.dcgm_level.unwrap_or(1);
        if submission.tests.contains(&TestKind::Dcgm) && !(1..=4).contains(&dcgm_level) {
            return Err(ProtoError::Validation(format!(
                "dcgmLevel must be in 1..=4, got {dcgm_level}"
            )));
        }
        let nodes = submission
            .nodes
            .into_iter()
            .enumerate()
            .map(|(i, n)| {
                let connection = n.into_connection()?;
                Ok(Node::new(format!("{job_id}-node-{i}"), connection))
            })
            .collect::<Result<Vec<_>, ProtoError>>()?;

        let now = Utc::now();
        Ok(Self {
            job_id,
            created_at: now,
            updated_at: now,
            status: JobStatus::Pending,
            tests: submission.tests,
            dcgm_level,
            nodes,
            cancel_flag: false,
            expires_at: None,
        })
    }

    /// Raise the cancel latch. One-way: calling this on an already
    /// raised job is a no-op.
    pub fn raise_cancel(&mut self) {
        self.cancel_flag = true;
    }

    /// Recompute this job's status from its nodes, per invariant 1.
    ///
    /// Does not itself consult the cancel latch: cancellation is applied
    /// eagerly by the orchestrator's `Stop` handler, not derived here.
    #[must_use]
    pub fn rollup_status(&self) -> JobStatus {
        if !self.nodes.iter().all(|n| n.status.is_terminal()) {
            return self.status;
        }
        if self.nodes.iter().all(|n| n.status == NodeStatus::Passed) {
            JobStatus::Completed
        } else {
            JobStatus::Failed
        }
    }

    /// Produce the externally visible, secret-free view of this job.
    #[must_use]
    pub fn sanitized(&self) -> JobView {
        JobView {
            job_id: self.job_id.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
            status: self.status,
            tests: self.tests.clone(),
            dcgm_level: self.dcgm_level,
            nodes: self.nodes.iter().map(Node::sanitized).collect(),
            cancel_flag: self.cancel_flag,
            expires_at: self.expires_at,
        }
    }
}

/// Secret-free, externally servable rendering of a [`Job`].
#[derive(Debug, Clone, Serialize)]
pub struct JobView {
    /// Opaque, unique job ID.
    pub job_id: String,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last-mutation timestamp.
    pub updated_at: DateTime<Utc>,
    /// Current lifecycle status.
    pub status: JobStatus,
    /// Selected test kinds, in declared order.
    pub tests: Vec<TestKind>,
    /// DCGM diagnostic level.
    pub dcgm_level: u8,
    /// Target nodes, in submission order.
    pub nodes: Vec<NodeView>,
    /// Cancel latch, rendered as a plain boolean.
    pub cancel_flag: bool,
    /// Cluster-mode reap deadline.
    pub expires_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_submission() -> JobSubmission {
        JobSubmission {
            job_name: Some("probe".into()),
            nodes: vec![NodeSubmission {
                host: "10.0.0.1".into(),
                port: None,
                username: "root".into(),
                auth: AuthMethod::Password { value: "hunter2".into() },
                sudo_password: None,
                alias: None,
            }],
            tests: vec![TestKind::Bandwidth],
            dcgm_level: None,
        }
    }

    #[test]
    fn test_kind_roundtrip_display_parse() {
        for kind in [
            TestKind::Bandwidth,
            TestKind::P2p,
            TestKind::Nccl,
            TestKind::Dcgm,
            TestKind::Ib,
        ] {
            assert_eq!(TestKind::parse(&kind.to_string()).unwrap(), kind);
        }
    }

    #[test]
    fn test_status_contributes_to_pass() {
        assert!(TestStatus::Passed.contributes_to_pass());
        assert!(TestStatus::Skipped.contributes_to_pass());
        assert!(!TestStatus::Failed.contributes_to_pass());
        assert!(!TestStatus::Error.contributes_to_pass());
    }

    #[test]
    fn job_from_submission_rejects_empty_nodes() {
        let mut sub = make_submission();
        sub.nodes.clear();
        assert!(Job::from_submission(sub, "j1".into()).is_err());
    }

    #[test]
    fn job_from_submission_rejects_empty_tests() {
        let mut sub = make_submission();
        sub.tests.clear();
        assert!(Job::from_submission(sub, "j1".into()).is_err());
    }

    #[test]
    fn job_from_submission_rejects_bad_dcgm_level() {
        let mut sub = make_submission();
        sub.tests.push(TestKind::Dcgm);
        sub.dcgm_level = Some(9);
        assert!(Job::from_submission(sub, "j1".into()).is_err());
    }

    #[test]
    fn job_from_submission_rejects_missing_host() {
        let mut sub = make_submission();
        sub.nodes[0].host = String::new();
        assert!(Job::from_submission(sub, "j1".into()).is_err());
    }

    #[test]
    fn sanitized_job_view_has_no_connection_secrets() {
        let job = Job::from_submission(make_submission(), "j1".into()).unwrap();
        let view = job.sanitized();
        let json = serde_json::to_string(&view).unwrap();
        assert!(!json.contains("hunter2"));
        assert!(!json.contains("_connection"));
        assert!(!json.contains("\"connection\""));
        assert!(!json.contains("sudo_password") || !json.contains("hunter2"));
    }

    #[test]
    fn cancel_flag_is_one_way() {
        let mut job = Job::from_submission(make_submission(), "j1".into()).unwrap();
        assert!(!job.cancel_flag);
        job.raise_cancel();
        assert!(job.cancel_flag);
        job.raise_cancel();
        assert!(job.cancel_flag);
    }

    #[test]
    fn rollup_pending_when_nodes_not_terminal() {
        let job = Job::from_submission(make_submission(), "j1".into()).unwrap();
        assert_eq!(job.rollup_status(), JobStatus::Pending);
    }

    #[test]
    fn rollup_completed_iff_all_nodes_passed() {
        let mut job = Job::from_submission(make_submission(), "j1".into()).unwrap();
        job.nodes[0].status = NodeStatus::Passed;
        assert_eq!(job.rollup_status(), JobStatus::Completed);
    }

    #[test]
    fn rollup_failed_if_any_node_not_passed() {
        let mut job = Job::from_submission(make_submission(), "j1".into()).unwrap();
        job.nodes[0].status = NodeStatus::Failed;
        assert_eq!(job.rollup_status(), JobStatus::Failed);
    }

    #[test]
    fn test_result_map_preserves_insertion_order() {
        let mut map = TestResultMap::new();
        map.insert(TestResult::skipped(TestKind::Nccl));
        map.insert(TestResult::skipped(TestKind::Bandwidth));
        let order: Vec<_> = map.values().map(|r| r.kind).collect();
        assert_eq!(order, vec![TestKind::Nccl, TestKind::Bandwidth]);
    }

    #[test]
    fn workload_phase_mapping() {
        assert_eq!(
            JobStatus::from_workload_phase("Running (2/2 ready)"),
            Some(JobStatus::Running)
        );
        assert_eq!(
            JobStatus::from_workload_phase("CrashLoopBackOff"),
            Some(JobStatus::Failed)
        );
        assert_eq!(
            JobStatus::from_workload_phase("Succeeded"),
            Some(JobStatus::Completed)
        );
        assert_eq!(JobStatus::from_workload_phase("Unknown"), None);
    }
}
