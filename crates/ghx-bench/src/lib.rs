//! Benchmark catalog (§4.A): `threshold(gpuModel, metric) -> number | null`.
//!
//! Loaded once from an external JSON document; on read failure or
//! absence, a built-in fallback table is used. Never fails outward — an
//! absent threshold is a first-class value meaning "do not gate on
//! performance".

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use serde::Deserialize;
use tracing::{debug, warn};

/// Metric names drawn from the closed set the spec recognizes.
pub const METRICS: [&str; 3] = ["bw", "p2p", "nccl"];

type Entry = BTreeMap<String, f64>;
type Table = BTreeMap<String, Entry>;

/// Per-GPU-model performance thresholds, reloadable from disk.
#[derive(Debug)]
pub struct BenchmarkCatalog {
    table: RwLock<Table>,
    source_path: Option<PathBuf>,
}

impl BenchmarkCatalog {
    /// Load the catalog from `source_path` (typically the
    /// `GPU_BENCHMARK_FILE` environment key's value). On any read or
    /// parse failure, or if `source_path` is `None`, falls back to the
    /// built-in table and logs a warning.
    #[must_use]
    pub fn load(source_path: Option<PathBuf>) -> Self {
        let table = source_path
            .as_deref()
            .and_then(read_table)
            .unwrap_or_else(Self::fallback_table);
        Self {
            table: RwLock::new(table),
            source_path,
        }
    }

    /// Construct a catalog directly from an in-memory table, bypassing
    /// disk I/O entirely. Used by callers that already have a table
    /// (tests, and the CLI's inline-catalog mode).
    #[must_use]
    pub fn from_table(table: Table) -> Self {
        Self {
            table: RwLock::new(table),
            source_path: None,
        }
    }

    /// Re-read the catalog from its source path, atomically swapping
    /// the in-memory table. A no-op (with a log line) if there is no
    /// source path or the re-read fails — the prior table is retained.
    pub fn reload(&self) {
        let Some(path) = self.source_path.as_deref() else {
            debug!("benchmark catalog has no source path, reload is a no-op");
            return;
        };
        match read_table(path) {
            Some(table) => {
                *self.table.write() = table;
            }
            None => warn!(path = %path.display(), "benchmark catalog reload failed, keeping prior table"),
        }
    }

    /// Look up the threshold for `gpu_model`/`metric`.
    ///
    /// Model lookup is normalized: whitespace is stripped, casing is
    /// folded, and the first catalog key (in sorted order) whose
    /// compacted form is a substring of the compacted raw identifier is
    /// used. If no catalog key matches, or the metric is absent for the
    /// matched model, returns `None` — never an error.
    #[must_use]
    pub fn threshold(&self, gpu_model: &str, metric: &str) -> Option<f64> {
        let table = self.table.read();
        let compacted = compact(gpu_model);
        let entry = table
            .iter()
            .find(|(key, _)| !key.is_empty() && compacted.contains(&compact(key)))
            .map(|(_, entry)| entry)
            .or_else(|| table.get(""))?;
        entry.get(metric).copied()
    }

    fn fallback_table() -> Table {
        let mut table = Table::new();
        table.insert(
            "H100".into(),
            Entry::from([("bw".into(), 40.0), ("p2p".into(), 700.0), ("nccl".into(), 139.0)]),
        );
        table.insert(
            "H800".into(),
            Entry::from([("bw".into(), 40.0), ("p2p".into(), 600.0), ("nccl".into(), 95.0)]),
        );
        table.insert(
            "A100".into(),
            Entry::from([("bw".into(), 24.0), ("p2p".into(), 280.0), ("nccl".into(), 85.0)]),
        );
        table.insert(
            "A800".into(),
            Entry::from([("bw".into(), 24.0), ("p2p".into(), 200.0), ("nccl".into(), 55.0)]),
        );
        table.insert(String::new(), Entry::new());
        table
    }
}

#[derive(Deserialize)]
struct CatalogDocument(BTreeMap<String, BTreeMap<String, f64>>);

fn read_table(path: &Path) -> Option<Table> {
    let content = std::fs::read_to_string(path)
        .inspect_err(|e| debug!(path = %path.display(), error = %e, "benchmark catalog not readable"))
        .ok()?;
    serde_json::from_str::<CatalogDocument>(&content)
        .inspect_err(|e| warn!(path = %path.display(), error = %e, "benchmark catalog is not valid JSON"))
        .ok()
        .map(|doc| doc.0)
}

/// Strip whitespace and case-fold, per the spec's normalization rule.
fn compact(s: &str) -> String {
    s.chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

/// Normalize a raw `nvidia-smi -L` GPU identity string for display and
/// catalog lookup: trims leading/trailing whitespace and collapses any
/// run of interior whitespace to a single space. Casing is preserved —
/// only [`BenchmarkCatalog::threshold`]'s internal matching folds case.
#[must_use]
pub fn normalize_gpu_model(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("H100", "bw", Some(40.0); "exact model")]
    #[test_case("NVIDIA H100 80GB HBM3", "bw", Some(40.0); "substring match with surrounding text")]
    #[test_case("  h100  ", "bw", Some(40.0); "whitespace and case folded")]
    #[test_case("Some Unknown GPU", "bw", None; "unknown model falls through to default")]
    #[test_case("H100", "unknown_metric", None; "unknown metric on known model")]
    fn threshold_lookup(model: &str, metric: &str, expected: Option<f64>) {
        let catalog = BenchmarkCatalog::from_table(BenchmarkCatalog::fallback_table());
        assert_eq!(catalog.threshold(model, metric), expected);
    }

    #[test]
    fn load_falls_back_when_path_is_absent() {
        let catalog = BenchmarkCatalog::load(None);
        assert_eq!(catalog.threshold("H100", "bw"), Some(40.0));
    }

    #[test]
    fn load_falls_back_on_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.json");
        std::fs::write(&path, "not json").unwrap();
        let catalog = BenchmarkCatalog::load(Some(path));
        assert_eq!(catalog.threshold("H100", "bw"), Some(40.0));
    }

    #[test]
    fn load_reads_custom_catalog_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.json");
        std::fs::write(&path, r#"{"Widget9000": {"bw": 12.5}}"#).unwrap();
        let catalog = BenchmarkCatalog::load(Some(path));
        assert_eq!(catalog.threshold("Widget9000", "bw"), Some(12.5));
        assert_eq!(catalog.threshold("H100", "bw"), None);
    }

    #[test]
    fn reload_picks_up_changes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.json");
        std::fs::write(&path, r#"{"Widget9000": {"bw": 12.5}}"#).unwrap();
        let catalog = BenchmarkCatalog::load(Some(path.clone()));
        assert_eq!(catalog.threshold("Widget9000", "bw"), Some(12.5));

        std::fs::write(&path, r#"{"Widget9000": {"bw": 99.0}}"#).unwrap();
        catalog.reload();
        assert_eq!(catalog.threshold("Widget9000", "bw"), Some(99.0));
    }

    #[test]
    fn reload_without_source_path_is_a_noop() {
        let catalog = BenchmarkCatalog::from_table(BenchmarkCatalog::fallback_table());
        catalog.reload();
        assert_eq!(catalog.threshold("H100", "bw"), Some(40.0));
    }

    proptest::proptest! {
        #[test]
        fn compact_never_panics(s in ".{0,64}") {
            let _ = compact(&s);
        }
    }

    #[test]
    fn normalize_gpu_model_trims_and_collapses_whitespace() {
        assert_eq!(normalize_gpu_model("  NVIDIA   H100   80GB HBM3  "), "NVIDIA H100 80GB HBM3");
    }
}
