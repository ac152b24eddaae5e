//! Process configuration (§4.J): one `GhxConfig` value, loaded once at
//! startup from the recognized environment keys of the external
//! interface, with typed defaults and a builder for overriding values
//! in tests.

#![cfg_attr(test, allow(unsafe_code))]

use std::path::PathBuf;
use std::time::Duration;

use tracing::debug;

/// Per-command timeouts, keyed by test kind. Defaults match the
/// concurrency model's timeout table; overridable for tests so a suite
/// doesn't have to wait out a 30-minute DCGM timeout.
#[derive(Debug, Clone)]
pub struct TimeoutTable {
    /// Per-invocation timeout for the bandwidth test.
    pub bandwidth: Duration,
    /// Timeout for the p2p test.
    pub p2p: Duration,
    /// Timeout for extracting the NCCL test archive.
    pub nccl_extract: Duration,
    /// Timeout for running the NCCL test itself.
    pub nccl_run: Duration,
    /// Timeout for the DCGM diagnostic.
    pub dcgm: Duration,
    /// Timeout for the InfiniBand health check.
    pub ib: Duration,
    /// Timeout for the GPU discovery probe.
    pub gpu_discovery: Duration,
}

impl Default for TimeoutTable {
    fn default() -> Self {
        Self {
            bandwidth: Duration::from_secs(600),
            p2p: Duration::from_secs(900),
            nccl_extract: Duration::from_secs(120),
            nccl_run: Duration::from_secs(600),
            dcgm: Duration::from_secs(1800),
            ib: Duration::from_secs(900),
            gpu_discovery: Duration::from_secs(300),
        }
    }
}

/// Process-wide configuration, loaded once at startup.
#[derive(Debug, Clone)]
pub struct GhxConfig {
    /// Path to the benchmark catalog JSON (`GPU_BENCHMARK_FILE`).
    pub catalog_path: PathBuf,
    /// Base directory for uploadable test artifacts (`GHX_ASSET_DIR`).
    pub asset_dir: PathBuf,
    /// Base directory for cluster-mode artifact drop, holding `manual/`
    /// and `cron/` subtrees (`GHX_SHARED_ROOT`).
    pub shared_root: PathBuf,
    /// Base directory for this crate's own persistence (`GHX_STATE_DIR`).
    pub state_dir: PathBuf,
    /// Days to retain shared-volume artifacts and history rows
    /// (`GPU_RESULT_RETENTION_DAYS`).
    pub result_retention_days: u32,
    /// CORS origins, forwarded to the HTTP layer untouched
    /// (`CORS_ORIGINS`, comma-separated).
    pub cors_origins: Vec<String>,
    /// Node fan-out bound (`GHX_FANOUT_LIMIT`).
    pub fanout_limit: usize,
    /// Per-command timeouts.
    pub timeouts: TimeoutTable,
}

impl GhxConfig {
    /// Built-in defaults, with no environment consulted.
    #[must_use]
    pub fn new() -> Self {
        Self {
            catalog_path: PathBuf::from("config/gpu-benchmarks.json"),
            asset_dir: PathBuf::from("."),
            shared_root: PathBuf::from("./shared"),
            state_dir: PathBuf::from("./state"),
            result_retention_days: 30,
            cors_origins: Vec::new(),
            fanout_limit: 10,
            timeouts: TimeoutTable::default(),
        }
    }

    /// Load configuration from the recognized environment keys,
    /// falling back to [`GhxConfig::new`]'s defaults for anything
    /// unset or unparseable.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::new();

        if let Ok(path) = std::env::var("GPU_BENCHMARK_FILE") {
            config.catalog_path = PathBuf::from(path);
        }
        if let Ok(path) = std::env::var("GHX_ASSET_DIR") {
            config.asset_dir = PathBuf::from(path);
        }
        if let Ok(path) = std::env::var("GHX_SHARED_ROOT") {
            config.shared_root = PathBuf::from(path);
        }
        if let Ok(path) = std::env::var("GHX_STATE_DIR") {
            config.state_dir = PathBuf::from(path);
        }
        if let Ok(raw) = std::env::var("GPU_RESULT_RETENTION_DAYS") {
            match raw.parse() {
                Ok(days) => config.result_retention_days = days,
                Err(e) => debug!(raw, error = %e, "GPU_RESULT_RETENTION_DAYS unparseable, keeping default"),
            }
        }
        if let Ok(raw) = std::env::var("CORS_ORIGINS") {
            config.cors_origins = raw.split(',').map(str::trim).filter(|s| !s.is_empty()).map(String::from).collect();
        }
        if let Ok(raw) = std::env::var("GHX_FANOUT_LIMIT") {
            match raw.parse() {
                Ok(limit) => config.fanout_limit = limit,
                Err(e) => debug!(raw, error = %e, "GHX_FANOUT_LIMIT unparseable, keeping default"),
            }
        }

        config
    }

    /// Override the catalog path.
    #[must_use]
    pub fn with_catalog_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.catalog_path = path.into();
        self
    }

    /// Override the asset directory.
    #[must_use]
    pub fn with_asset_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.asset_dir = path.into();
        self
    }

    /// Override the shared-volume root.
    #[must_use]
    pub fn with_shared_root(mut self, path: impl Into<PathBuf>) -> Self {
        self.shared_root = path.into();
        self
    }

    /// Override the state directory.
    #[must_use]
    pub fn with_state_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.state_dir = path.into();
        self
    }

    /// Override the result retention window.
    #[must_use]
    pub fn with_result_retention_days(mut self, days: u32) -> Self {
        self.result_retention_days = days;
        self
    }

    /// Override the fan-out bound.
    #[must_use]
    pub fn with_fanout_limit(mut self, limit: usize) -> Self {
        self.fanout_limit = limit;
        self
    }

    /// Override the timeout table.
    #[must_use]
    pub fn with_timeouts(mut self, timeouts: TimeoutTable) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// The shared-volume manual-mode artifact directory.
    #[must_use]
    pub fn manual_dir(&self) -> PathBuf {
        self.shared_root.join("manual")
    }

    /// The shared-volume cron-mode artifact directory.
    #[must_use]
    pub fn cron_dir(&self) -> PathBuf {
        self.shared_root.join("cron")
    }
}

impl Default for GhxConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_carries_built_in_defaults() {
        let config = GhxConfig::new();
        assert_eq!(config.fanout_limit, 10);
        assert_eq!(config.result_retention_days, 30);
        assert!(config.cors_origins.is_empty());
        assert_eq!(config.timeouts.dcgm, Duration::from_secs(1800));
    }

    #[test]
    fn builder_overrides_apply_and_chain() {
        let config = GhxConfig::new()
            .with_fanout_limit(4)
            .with_result_retention_days(7)
            .with_state_dir("/tmp/ghx-state");

        assert_eq!(config.fanout_limit, 4);
        assert_eq!(config.result_retention_days, 7);
        assert_eq!(config.state_dir, PathBuf::from("/tmp/ghx-state"));
    }

    #[test]
    fn manual_and_cron_dirs_are_relative_to_shared_root() {
        let config = GhxConfig::new().with_shared_root("/data/ghx");
        assert_eq!(config.manual_dir(), PathBuf::from("/data/ghx/manual"));
        assert_eq!(config.cron_dir(), PathBuf::from("/data/ghx/cron"));
    }

    #[test]
    fn from_env_reads_recognized_keys() {
        // SAFETY: test-only, single-threaded-enough for this crate's
        // suite; no other test in this module touches these keys.
        unsafe {
            std::env::set_var("GHX_FANOUT_LIMIT", "3");
            std::env::set_var("CORS_ORIGINS", "https://a.example, https://b.example");
        }
        let config = GhxConfig::from_env();
        unsafe {
            std::env::remove_var("GHX_FANOUT_LIMIT");
            std::env::remove_var("CORS_ORIGINS");
        }

        assert_eq!(config.fanout_limit, 3);
        assert_eq!(config.cors_origins, vec!["https://a.example", "https://b.example"]);
    }

    #[test]
    fn from_env_falls_back_on_unparseable_values() {
        unsafe {
            std::env::set_var("GHX_FANOUT_LIMIT", "not-a-number");
        }
        let config = GhxConfig::from_env();
        unsafe {
            std::env::remove_var("GHX_FANOUT_LIMIT");
        }
        assert_eq!(config.fanout_limit, 10);
    }
}
