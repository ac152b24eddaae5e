//! Cluster-mode artifact and ingested-result types (§3, §6).

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One per-test-kind sub-result as written into an artifact's
/// `test_results.bandwidth`/`p2p`/`nccl` fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactNumericResult {
    /// Human-readable value, e.g. `"55.2 GB/s"`.
    pub value: String,
    /// The numeric value `value` renders.
    pub raw_value: f64,
    /// One of `completed`, `failed`, `skipped`, `timeout`, `error`.
    pub status: String,
}

/// `test_results.dcgm` / `test_results.ib`: a bare pass-flag string.
pub type ArtifactFlagResult = String;

/// The `test_results` object inside an [`Artifact`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ArtifactTestResults {
    /// Bandwidth sub-result, if the test was enabled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bandwidth: Option<ArtifactNumericResult>,
    /// P2P sub-result, if the test was enabled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub p2p: Option<ArtifactNumericResult>,
    /// NCCL sub-result, if the test was enabled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nccl: Option<ArtifactNumericResult>,
    /// DCGM verdict string (`Pass` | `No Pass` | `Skipped`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dcgm: Option<ArtifactFlagResult>,
    /// IB verdict string (`Pass` | `No Pass` | `Skipped`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ib: Option<ArtifactFlagResult>,
}

/// A cluster-mode workload's result artifact, as dropped onto the shared
/// volume. See §6 for the canonical JSON shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    /// Owning job ID.
    pub job_id: String,
    /// `"manual"` or `"cron"`.
    pub job_type: String,
    /// Node name this artifact describes.
    pub node_name: String,
    /// Workload pod name.
    #[serde(default)]
    pub pod_name: String,
    /// Workload-reported hostname.
    #[serde(default)]
    pub hostname: String,
    /// GPU model as discovered by the workload.
    pub gpu_type: String,
    /// Test kinds the workload was configured to run.
    pub enabled_tests: Vec<String>,
    /// DCGM diagnostic level used.
    #[serde(default)]
    pub dcgm_level: u8,
    /// Per-test-kind sub-results.
    pub test_results: ArtifactTestResults,
    /// Workload-computed performance verdict.
    pub performance_pass: bool,
    /// Benchmark thresholds the workload gated against.
    #[serde(default)]
    pub benchmark: BTreeMap<String, f64>,
    /// Wall-clock duration the workload took, as reported by itself.
    #[serde(default)]
    pub execution_time: String,
    /// Verbatim execution log text.
    #[serde(default)]
    pub execution_log: String,
    /// Workload-reported creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl Artifact {
    /// Validate presence of the fields the ingester requires (§4.H step 3).
    #[must_use]
    pub fn has_required_fields(&self) -> bool {
        !self.job_id.is_empty() && !self.node_name.is_empty() && !self.gpu_type.is_empty()
    }

    /// Whether the DCGM/IB health checks both passed or were skipped.
    #[must_use]
    pub fn health_pass(&self) -> bool {
        let ok = |flag: &Option<ArtifactFlagResult>| {
            flag.as_deref()
                .is_none_or(|s| s == "Pass" || s == "Skipped")
        };
        ok(&self.test_results.dcgm) && ok(&self.test_results.ib)
    }

    /// Derive the overall `Pass` / `No Pass` inspection result (§4.H step 4).
    #[must_use]
    pub fn inspection_result(&self) -> &'static str {
        if self.performance_pass && self.health_pass() {
            "Pass"
        } else {
            "No Pass"
        }
    }
}

/// An ingested, persisted row derived from one [`Artifact`] (§3, §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosticResult {
    /// Owning job ID.
    pub job_id: String,
    /// Node name.
    pub node_name: String,
    /// `"manual"` or `"cron"`.
    pub job_type: String,
    /// GPU model.
    pub gpu_type: String,
    /// Test kinds enabled for this run.
    pub enabled_tests: Vec<String>,
    /// DCGM diagnostic level used.
    pub dcgm_level: u8,
    /// `Pass` | `No Pass`.
    pub inspection_result: String,
    /// Workload-reported performance verdict.
    pub performance_pass: bool,
    /// Derived DCGM/IB health verdict.
    pub health_pass: bool,
    /// Workload-reported execution duration.
    pub execution_time: String,
    /// Verbatim execution log text.
    pub execution_log: String,
    /// Benchmark thresholds used.
    pub benchmark_data: BTreeMap<String, f64>,
    /// Full per-test-kind sub-results.
    pub test_results: ArtifactTestResults,
    /// Source artifact file path, for cron-mode dedup.
    pub file_path: String,
    /// Cluster-mode reap deadline.
    pub expires_at: Option<DateTime<Utc>>,
    /// First-ingestion timestamp; preserved across updates (invariant 4).
    pub created_at: DateTime<Utc>,
    /// Most recent ingestion timestamp.
    pub updated_at: DateTime<Utc>,
}

impl DiagnosticResult {
    /// Build a fresh row from a freshly ingested artifact.
    #[must_use]
    pub fn from_artifact(artifact: &Artifact, file_path: String, now: DateTime<Utc>) -> Self {
        Self {
            job_id: artifact.job_id.clone(),
            node_name: artifact.node_name.clone(),
            job_type: artifact.job_type.clone(),
            gpu_type: artifact.gpu_type.clone(),
            enabled_tests: artifact.enabled_tests.clone(),
            dcgm_level: artifact.dcgm_level,
            inspection_result: artifact.inspection_result().to_string(),
            performance_pass: artifact.performance_pass,
            health_pass: artifact.health_pass(),
            execution_time: artifact.execution_time.clone(),
            execution_log: artifact.execution_log.clone(),
            benchmark_data: artifact.benchmark.clone(),
            test_results: artifact.test_results.clone(),
            file_path,
            expires_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Update this row in place from a re-ingested artifact, preserving
    /// `created_at` (invariant 4 / idempotence law).
    pub fn apply_update(&mut self, artifact: &Artifact, file_path: String, now: DateTime<Utc>) {
        self.job_type = artifact.job_type.clone();
        self.gpu_type = artifact.gpu_type.clone();
        self.enabled_tests = artifact.enabled_tests.clone();
        self.dcgm_level = artifact.dcgm_level;
        self.inspection_result = artifact.inspection_result().to_string();
        self.performance_pass = artifact.performance_pass;
        self.health_pass = artifact.health_pass();
        self.execution_time = artifact.execution_time.clone();
        self.execution_log = artifact.execution_log.clone();
        self.benchmark_data = artifact.benchmark.clone();
        self.test_results = artifact.test_results.clone();
        self.file_path = file_path;
        self.updated_at = now;
    }
}

/// Parse the `(nodeName, isLatest)` pair encoded in an artifact filename,
/// per the convention `<nodeName>_<YYYYMMDD_HHMMSS>.json` /
/// `<nodeName>_latest.json`.
#[must_use]
pub fn parse_artifact_filename(file_name: &str) -> Option<(String, bool)> {
    let stem = file_name.strip_suffix(".json")?;
    if let Some(node_name) = stem.strip_suffix("_latest") {
        return Some((node_name.to_string(), true));
    }
    let (node_name, ts) = stem.rsplit_once('_')?;
    let (node_name2, date) = node_name.rsplit_once('_')?;
    if date.len() == 8 && date.chars().all(|c| c.is_ascii_digit()) && ts.chars().all(|c| c.is_ascii_digit())
    {
        Some((node_name2.to_string(), false))
    } else {
        None
    }
}
