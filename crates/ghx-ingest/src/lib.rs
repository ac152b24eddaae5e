//! Artifact ingester (§4.H): turns shared-volume workload artifacts into
//! `DiagnosticResult` rows. Malformed artifacts are skipped with a
//! warning; already-ingested artifacts are silently skipped — ingestion
//! never fails the caller outright.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::Utc;
use ghx_proto::{parse_artifact_filename, Artifact, DiagnosticResult};
use parking_lot::RwLock;
use tracing::{debug, warn};

/// Manual-mode rows, keyed by `(job_id, node_name)` per the spec's
/// upsert contract.
#[derive(Debug, Default)]
pub struct ManualResultStore {
    rows: RwLock<BTreeMap<(String, String), DiagnosticResult>>,
}

impl ManualResultStore {
    /// An empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a row already exists for `(job_id, node_name)`.
    #[must_use]
    pub fn contains(&self, job_id: &str, node_name: &str) -> bool {
        self.rows.read().contains_key(&(job_id.to_string(), node_name.to_string()))
    }

    /// Whether any row exists at all for `node_name`, regardless of
    /// `job_id` — the lenient rule `_latest` sentinel files use.
    #[must_use]
    pub fn any_row_for_node(&self, node_name: &str) -> bool {
        self.rows.read().keys().any(|(_, n)| n == node_name)
    }

    /// Upsert a row, preserving `created_at` on update.
    pub fn upsert(&self, artifact: &Artifact, file_path: String, now: chrono::DateTime<Utc>) {
        let key = (artifact.job_id.clone(), artifact.node_name.clone());
        let mut rows = self.rows.write();
        match rows.get_mut(&key) {
            Some(existing) => existing.apply_update(artifact, file_path, now),
            None => {
                rows.insert(key, DiagnosticResult::from_artifact(artifact, file_path, now));
            }
        }
    }

    /// Snapshot all rows, for read endpoints.
    #[must_use]
    pub fn snapshot(&self) -> Vec<DiagnosticResult> {
        self.rows.read().values().cloned().collect()
    }
}

/// Cron-mode rows, append-only and deduplicated by `file_path` rather
/// than `(job_id, node_name)`.
#[derive(Debug, Default)]
pub struct CronHistoryStore {
    rows: RwLock<BTreeMap<String, DiagnosticResult>>,
}

impl CronHistoryStore {
    /// An empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `file_path` has already been recorded.
    #[must_use]
    pub fn contains(&self, file_path: &str) -> bool {
        self.rows.read().contains_key(file_path)
    }

    /// Record a new history row for `file_path`.
    pub fn insert(&self, artifact: &Artifact, file_path: String, now: chrono::DateTime<Utc>) {
        let row = DiagnosticResult::from_artifact(artifact, file_path.clone(), now);
        self.rows.write().insert(file_path, row);
    }
}

/// Outcome of attempting to ingest a single file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    /// The artifact was parsed and upserted.
    Ingested,
    /// Already ingested per the duplicate-detection rule; skipped.
    AlreadyIngested,
    /// The file could not be parsed or was missing required fields;
    /// skipped with a logged warning.
    Malformed,
}

/// Summary of an `ingest_manual_dir`/cron sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestSummary {
    /// Files newly ingested this sweep.
    pub ingested: usize,
    /// Files already-ingested and skipped.
    pub skipped_duplicate: usize,
    /// Files that failed to parse or validate.
    pub skipped_malformed: usize,
}

/// Sweep `<shared_root>/manual/` for JSON artifacts, ingesting any not
/// already recorded. Returns the jobs that reached a terminal state
/// this sweep, so the caller can transition their owning Job to
/// `completed` and emit the bus event.
pub fn ingest_manual_dir(shared_root: &Path, store: &ManualResultStore) -> (IngestSummary, Vec<String>) {
    let dir = shared_root.join("manual");
    let mut summary = IngestSummary::default();
    let mut completed_job_ids = Vec::new();

    let entries = match std::fs::read_dir(&dir) {
        Ok(entries) => entries,
        Err(e) => {
            debug!(path = %dir.display(), error = %e, "manual artifact directory not readable");
            return (summary, completed_job_ids);
        }
    };

    for entry in entries.flatten() {
        let path = entry.path();
        let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else { continue };
        if !file_name.ends_with(".json") {
            continue;
        }
        match ingest_one_manual(&path, file_name, store) {
            IngestOutcome::Ingested => {
                summary.ingested += 1;
                if let Ok(content) = std::fs::read_to_string(&path) {
                    if let Ok(artifact) = serde_json::from_str::<Artifact>(&content) {
                        completed_job_ids.push(artifact.job_id);
                    }
                }
            }
            IngestOutcome::AlreadyIngested => summary.skipped_duplicate += 1,
            IngestOutcome::Malformed => summary.skipped_malformed += 1,
        }
    }

    (summary, completed_job_ids)
}

fn ingest_one_manual(path: &Path, file_name: &str, store: &ManualResultStore) -> IngestOutcome {
    let Some((node_name, is_latest)) = parse_artifact_filename(file_name) else {
        warn!(file_name, "artifact filename does not match the expected convention, skipping");
        return IngestOutcome::Malformed;
    };

    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) => {
            warn!(file_name, error = %e, "artifact file not readable, skipping");
            return IngestOutcome::Malformed;
        }
    };
    let artifact: Artifact = match serde_json::from_str(&content) {
        Ok(artifact) => artifact,
        Err(e) => {
            warn!(file_name, error = %e, "artifact is not valid JSON, skipping");
            return IngestOutcome::Malformed;
        }
    };
    if !artifact.has_required_fields() {
        warn!(file_name, "artifact missing required fields, skipping");
        return IngestOutcome::Malformed;
    }

    let already_ingested = if is_latest {
        store.any_row_for_node(&node_name)
    } else {
        store.contains(&artifact.job_id, &node_name)
    };
    if already_ingested {
        return IngestOutcome::AlreadyIngested;
    }

    store.upsert(&artifact, path.display().to_string(), Utc::now());
    IngestOutcome::Ingested
}

/// Sweep `<shared_root>/cron/` the same way, but append-only and keyed
/// by file path.
pub fn ingest_cron_dir(shared_root: &Path, store: &CronHistoryStore) -> IngestSummary {
    let dir = shared_root.join("cron");
    let mut summary = IngestSummary::default();

    let entries = match std::fs::read_dir(&dir) {
        Ok(entries) => entries,
        Err(e) => {
            debug!(path = %dir.display(), error = %e, "cron artifact directory not readable");
            return summary;
        }
    };

    for entry in entries.flatten() {
        let path = entry.path();
        let file_path = path.display().to_string();
        if store.contains(&file_path) {
            summary.skipped_duplicate += 1;
            continue;
        }
        let Ok(content) = std::fs::read_to_string(&path) else {
            summary.skipped_malformed += 1;
            continue;
        };
        match serde_json::from_str::<Artifact>(&content) {
            Ok(artifact) if artifact.has_required_fields() => {
                store.insert(&artifact, file_path, Utc::now());
                summary.ingested += 1;
            }
            _ => summary.skipped_malformed += 1,
        }
    }

    summary
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_artifact_json(job_id: &str, node_name: &str) -> String {
        format!(
            r#"{{
                "job_id": "{job_id}",
                "job_type": "manual",
                "node_name": "{node_name}",
                "gpu_type": "H100",
                "enabled_tests": ["dcgm"],
                "test_results": {{"dcgm": "Pass"}},
                "performance_pass": true,
                "created_at": "2026-01-01T00:00:00Z"
            }}"#
        )
    }

    #[test]
    fn ingest_manual_dir_ingests_new_artifact_once() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("manual")).unwrap();
        std::fs::write(dir.path().join("manual/node-a_20260101_000000.json"), sample_artifact_json("job-1", "node-a")).unwrap();

        let store = ManualResultStore::new();
        let (summary, completed) = ingest_manual_dir(dir.path(), &store);
        assert_eq!(summary.ingested, 1);
        assert_eq!(completed, vec!["job-1".to_string()]);

        let (summary_again, _) = ingest_manual_dir(dir.path(), &store);
        assert_eq!(summary_again.skipped_duplicate, 1);
        assert_eq!(summary_again.ingested, 0);
    }

    #[test]
    fn latest_sentinel_is_deduplicated_leniently_by_node_name() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("manual")).unwrap();
        std::fs::write(dir.path().join("manual/node-a_20260101_000000.json"), sample_artifact_json("job-1", "node-a")).unwrap();
        std::fs::write(dir.path().join("manual/node-a_latest.json"), sample_artifact_json("job-1", "node-a")).unwrap();

        let store = ManualResultStore::new();
        let (summary, _) = ingest_manual_dir(dir.path(), &store);
        // The timestamped file is ingested; the _latest sentinel is
        // considered already covered once any row exists for the node.
        assert_eq!(summary.ingested, 1);
        assert_eq!(summary.skipped_duplicate, 1);
    }

    #[test]
    fn malformed_artifact_is_skipped_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("manual")).unwrap();
        std::fs::write(dir.path().join("manual/node-a_20260101_000000.json"), "not json").unwrap();

        let store = ManualResultStore::new();
        let (summary, _) = ingest_manual_dir(dir.path(), &store);
        assert_eq!(summary.skipped_malformed, 1);
    }

    #[test]
    fn reingesting_preserves_created_at() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("manual")).unwrap();
        let path = dir.path().join("manual/node-a_20260101_000000.json");
        std::fs::write(&path, sample_artifact_json("job-1", "node-a")).unwrap();

        let store = ManualResultStore::new();
        ingest_manual_dir(dir.path(), &store);
        let first = store.snapshot().into_iter().next().unwrap();

        // Force a re-ingest by manually invoking the upsert path again
        // with the same artifact, simulating a second delivery.
        let artifact: Artifact = serde_json::from_str(&sample_artifact_json("job-1", "node-a")).unwrap();
        store.upsert(&artifact, path.display().to_string(), Utc::now());
        let second = store.snapshot().into_iter().next().unwrap();

        assert_eq!(first.created_at, second.created_at);
    }

    #[test]
    fn cron_dir_dedupes_by_file_path_not_job_node() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("cron")).unwrap();
        std::fs::write(dir.path().join("cron/run-1.json"), sample_artifact_json("job-1", "node-a")).unwrap();

        let store = CronHistoryStore::new();
        let summary = ingest_cron_dir(dir.path(), &store);
        assert_eq!(summary.ingested, 1);
        let summary_again = ingest_cron_dir(dir.path(), &store);
        assert_eq!(summary_again.skipped_duplicate, 1);
    }
}
