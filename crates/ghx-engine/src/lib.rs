//! Test engine (§4.D): one entry point per diagnostic test kind, each
//! producing a [`TestResult`]. Every step appends timestamped lines to
//! the caller-owned node log trail; none of these functions ever
//! propagate an error outward — transport and tool failures are
//! captured into the returned `TestResult`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use ghx_bench::BenchmarkCatalog;
use ghx_parsers::{parse_dcgm, parse_ib, parse_nccl, parse_nvbandwidth, parse_p2p};
use ghx_proto::{TestKind, TestResult, TestStatus};
use ghx_remote::RemoteSession;

/// Remote scratch directory every engine step stages binaries under.
pub const SCRATCH_DIR: &str = "/tmp/ghx";

fn log_line(log: &mut Vec<String>, line: impl AsRef<str>) {
    log.push(format!("[{}] {}", Utc::now().to_rfc3339(), line.as_ref()));
}

fn status_from_threshold(value: f64, threshold: Option<f64>) -> TestStatus {
    match threshold {
        None => TestStatus::Passed,
        Some(t) if value >= t => TestStatus::Passed,
        Some(_) => TestStatus::Failed,
    }
}

/// GPU memory bandwidth (`nvbandwidth`).
pub async fn bandwidth(
    session: &RemoteSession,
    catalog: &BenchmarkCatalog,
    gpu_type: &str,
    asset_dir: &Path,
    log: &mut Vec<String>,
) -> TestResult {
    log_line(log, "bandwidth: start");
    let remote_bin = format!("{SCRATCH_DIR}/nvbandwidth");
    if let Err(e) = session.upload(&asset_dir.join("nvbandwidth"), &remote_bin, true).await {
        log_line(log, format!("bandwidth: upload failed: {e}"));
        return TestResult::error(TestKind::Bandwidth, e.to_string());
    }

    let h2d = session
        .run(&format!("{remote_bin} -t host_to_device_memcpy_ce"), Duration::from_secs(600), true)
        .await;
    let d2h = session
        .run(&format!("{remote_bin} -t device_to_host_memcpy_ce"), Duration::from_secs(600), true)
        .await;

    let (h2d, d2h) = match (h2d, d2h) {
        (Ok(h2d), Ok(d2h)) => (h2d, d2h),
        (Err(e), _) | (_, Err(e)) => {
            log_line(log, format!("bandwidth: transport error: {e}"));
            return TestResult::error(TestKind::Bandwidth, e.to_string());
        }
    };
    log_line(log, format!("bandwidth: h2d exit={} d2h exit={}", h2d.exit_code, d2h.exit_code));

    if h2d.exit_code != 0 {
        return TestResult::error(TestKind::Bandwidth, "host-to-device pass failed");
    }
    if d2h.exit_code != 0 {
        return TestResult::error(TestKind::Bandwidth, "device-to-host pass failed");
    }

    let h2d_value = parse_nvbandwidth(&h2d.stdout);
    let d2h_value = parse_nvbandwidth(&d2h.stdout);
    if h2d_value <= 0.0 || d2h_value <= 0.0 {
        return TestResult::error(TestKind::Bandwidth, "no usable bandwidth values parsed");
    }

    let value = h2d_value.min(d2h_value);
    let threshold = catalog.threshold(gpu_type, "bw");
    log_line(log, format!("bandwidth: verdict value={value} threshold={threshold:?}"));

    TestResult {
        kind: TestKind::Bandwidth,
        status: status_from_threshold(value, threshold),
        value: Some(value),
        unit: Some("GB/s".to_string()),
        benchmark: threshold,
        details: [("h2d".to_string(), h2d_value), ("d2h".to_string(), d2h_value)].into(),
        raw_output: format!("{}\n{}", h2d.stdout, d2h.stdout),
        message: None,
    }
}

/// Peer-to-peer bandwidth (`p2pBandwidthLatencyTest`).
pub async fn p2p(
    session: &RemoteSession,
    catalog: &BenchmarkCatalog,
    gpu_type: &str,
    asset_dir: &Path,
    log: &mut Vec<String>,
) -> TestResult {
    log_line(log, "p2p: start");
    let remote_bin = format!("{SCRATCH_DIR}/p2pBandwidthLatencyTest");
    if let Err(e) = session.upload(&asset_dir.join("p2pBandwidthLatencyTest"), &remote_bin, true).await {
        log_line(log, format!("p2p: upload failed: {e}"));
        return TestResult::error(TestKind::P2p, e.to_string());
    }

    let outcome = match session.run(&remote_bin, Duration::from_secs(900), true).await {
        Ok(outcome) => outcome,
        Err(e) => {
            log_line(log, format!("p2p: transport error: {e}"));
            return TestResult::error(TestKind::P2p, e.to_string());
        }
    };
    log_line(log, format!("p2p: exit={}", outcome.exit_code));

    if outcome.exit_code != 0 {
        let reason = if outcome.stderr.trim().is_empty() {
            "p2pBandwidthLatencyTest exited non-zero".to_string()
        } else {
            outcome.stderr.trim().to_string()
        };
        return TestResult::error(TestKind::P2p, reason);
    }

    let value = parse_p2p(&outcome.stdout);
    if value <= 0.0 {
        return TestResult::error(TestKind::P2p, "no usable p2p bandwidth values parsed");
    }

    let threshold = catalog.threshold(gpu_type, "p2p");
    log_line(log, format!("p2p: verdict value={value} threshold={threshold:?}"));

    TestResult {
        kind: TestKind::P2p,
        status: status_from_threshold(value, threshold),
        value: Some(value),
        unit: Some("GB/s".to_string()),
        benchmark: threshold,
        details: BTreeMapExt::default(),
        raw_output: outcome.stdout,
        message: None,
    }
}

/// Collective-communication bandwidth (`all_reduce_perf`), single-host form.
pub async fn nccl(
    session: &RemoteSession,
    catalog: &BenchmarkCatalog,
    gpu_type: &str,
    gpu_count: usize,
    asset_dir: &Path,
    log: &mut Vec<String>,
) -> TestResult {
    log_line(log, "nccl: start");
    if gpu_count == 0 {
        return TestResult::error(TestKind::Nccl, "no GPUs discovered on node");
    }

    let archive_remote = format!("{SCRATCH_DIR}/nccl-tests.tar.gz");
    let test_dir = format!("{SCRATCH_DIR}/nccl-tests");
    if let Err(e) = session.upload(&asset_dir.join("nccl-tests.tar.gz"), &archive_remote, false).await {
        log_line(log, format!("nccl: upload failed: {e}"));
        return TestResult::error(TestKind::Nccl, e.to_string());
    }

    let stage_cmd = format!(
        "rm -rf '{test_dir}' && mkdir -p '{test_dir}' && tar -xzf '{archive_remote}' -C '{test_dir}' && rm -f '{archive_remote}'"
    );
    if let Err(e) = session.run(&stage_cmd, Duration::from_secs(120), true).await {
        log_line(log, format!("nccl: stage error: {e}"));
        return TestResult::error(TestKind::Nccl, e.to_string());
    }

    let perf_bin = format!("{test_dir}/build/all_reduce_perf");
    let check_cmd = format!("test -x '{perf_bin}'");
    match session.run(&check_cmd, Duration::from_secs(30), false).await {
        Ok(outcome) if outcome.exit_code == 0 => {}
        _ => return TestResult::error(TestKind::Nccl, "all_reduce_perf missing or not executable after extraction"),
    }

    let run_cmd = format!("{perf_bin} -b 1024 -e 1G -f 2 -g {gpu_count}");
    let outcome = match session.run(&run_cmd, Duration::from_secs(600), true).await {
        Ok(outcome) => outcome,
        Err(e) => {
            log_line(log, format!("nccl: transport error: {e}"));
            return TestResult::error(TestKind::Nccl, e.to_string());
        }
    };
    log_line(log, format!("nccl: exit={}", outcome.exit_code));

    let value = parse_nccl(&outcome.stdout);
    if value <= 0.0 {
        return TestResult::error(TestKind::Nccl, "no usable bus bandwidth parsed from all_reduce_perf output");
    }

    let threshold = catalog.threshold(gpu_type, "nccl");
    TestResult {
        kind: TestKind::Nccl,
        status: status_from_threshold(value, threshold),
        value: Some(value),
        unit: Some("GB/s".to_string()),
        benchmark: threshold,
        details: BTreeMapExt::default(),
        raw_output: outcome.stdout,
        message: None,
    }
}

/// Optional flags for the multi-host `mpirun` NCCL alternate form,
/// applied iff the corresponding field is present.
#[derive(Debug, Default, Clone, serde::Deserialize)]
pub struct NcclMpiConfig {
    /// `--mca btl_tcp_if_include <v>` and `--mca oob_tcp_if_include <v>`.
    pub btl_tcp_if: Option<String>,
    /// `-x NCCL_SOCKET_IFNAME=<v>`.
    pub nccl_socket_ifname: Option<String>,
    /// `-x NCCL_IB_HCA=<v>`.
    pub nccl_ib_hca: Option<String>,
    /// `-x UCX_NET_DEVICES=<v>`.
    pub ucx_net_devices: Option<String>,
    /// `-x NCCL_IB_QPS_PER_CONNECTION=<v>`.
    pub nccl_ib_qps: Option<String>,
    /// `-x NCCL_PXN_DISABLE=<v>`.
    pub nccl_pxn_disable: Option<String>,
    /// `-x NCCL_MIN_NCHANNELS=<v>`.
    pub nccl_min_nchannels: Option<String>,
    /// `-x NCCL_NVLS_ENABLE=<v>`.
    pub nccl_nvls_enable: Option<String>,
    /// `-x SHARP_COLL_ENABLE_PCI_RELAXED_ORDERING=1`, if set at all.
    pub sharp_relaxed_ordering: bool,
    /// Verbatim flags appended as the final set before the test binary.
    pub extra: Option<String>,
}

/// A host-list target for the multi-host NCCL form: either a hostfile
/// path or an explicit comma-joined host list.
#[derive(Debug, Clone)]
pub enum HostTarget {
    /// `-hostfile <path>`.
    HostFile(PathBuf),
    /// `-host h1,h2,...`.
    Hosts(Vec<String>),
}

/// Build (without running) the multi-host `mpirun` NCCL command. Pure
/// and independently testable; the multi-node HTTP endpoint is
/// responsible for dispatching it against the head node's session.
#[must_use]
pub fn build_multi_host_nccl_command(
    test_dir: &str,
    np: usize,
    target: &HostTarget,
    gpu_per_node: usize,
    config: &NcclMpiConfig,
) -> String {
    let mut parts = vec!["mpirun".to_string(), "-np".to_string(), np.to_string(), "--allow-run-as-root".to_string(), "-N".to_string(), "1".to_string()];
    match target {
        HostTarget::HostFile(path) => {
            parts.push("-hostfile".to_string());
            parts.push(path.display().to_string());
        }
        HostTarget::Hosts(hosts) => {
            parts.push("-host".to_string());
            parts.push(hosts.join(","));
        }
    }
    if let Some(v) = &config.btl_tcp_if {
        parts.extend(["--mca".to_string(), format!("btl_tcp_if_include {v}"), "--mca".to_string(), format!("oob_tcp_if_include {v}")]);
    }
    for (key, value) in [
        ("NCCL_SOCKET_IFNAME", &config.nccl_socket_ifname),
        ("NCCL_IB_HCA", &config.nccl_ib_hca),
        ("UCX_NET_DEVICES", &config.ucx_net_devices),
        ("NCCL_IB_QPS_PER_CONNECTION", &config.nccl_ib_qps),
        ("NCCL_PXN_DISABLE", &config.nccl_pxn_disable),
        ("NCCL_MIN_NCHANNELS", &config.nccl_min_nchannels),
        ("NCCL_NVLS_ENABLE", &config.nccl_nvls_enable),
    ] {
        if let Some(v) = value {
            parts.push("-x".to_string());
            parts.push(format!("{key}={v}"));
        }
    }
    if config.sharp_relaxed_ordering {
        parts.push("-x".to_string());
        parts.push("SHARP_COLL_ENABLE_PCI_RELAXED_ORDERING=1".to_string());
    }
    if let Some(extra) = &config.extra {
        parts.push(extra.clone());
    }
    parts.push(format!("{test_dir}/build/all_reduce_perf -b 128M -e 16G -f 2 -g {gpu_per_node}"));
    parts.join(" ")
}

/// Vendor diagnostic (`dcgmi diag`).
pub async fn dcgm(session: &RemoteSession, dcgm_level: u8, log: &mut Vec<String>) -> TestResult {
    log_line(log, format!("dcgm: start level={dcgm_level}"));
    let outcome = match session.run(&format!("dcgmi diag -r {dcgm_level}"), Duration::from_secs(1800), true).await {
        Ok(outcome) => outcome,
        Err(e) => {
            log_line(log, format!("dcgm: transport error: {e}"));
            return TestResult::error(TestKind::Dcgm, e.to_string());
        }
    };
    log_line(log, format!("dcgm: exit={}", outcome.exit_code));

    let status = if parse_dcgm(outcome.exit_code) { TestStatus::Passed } else { TestStatus::Failed };
    TestResult {
        kind: TestKind::Dcgm,
        status,
        value: None,
        unit: None,
        benchmark: None,
        details: BTreeMapExt::default(),
        raw_output: outcome.stdout,
        message: None,
    }
}

/// InfiniBand fabric health script.
pub async fn ib(session: &RemoteSession, asset_dir: &Path, log: &mut Vec<String>) -> TestResult {
    log_line(log, "ib: start");
    let remote_script = format!("{SCRATCH_DIR}/ib_health_check.sh");
    if let Err(e) = session.upload(&asset_dir.join("ib_health_check.sh"), &remote_script, true).await {
        log_line(log, format!("ib: upload failed: {e}"));
        return TestResult::error(TestKind::Ib, e.to_string());
    }

    let path_prefix = "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin:/opt/ib_health_check";
    let command = format!("export TERM=xterm; export PATH={path_prefix}:$PATH; {remote_script}");
    let outcome = match session.run(&command, Duration::from_secs(900), true).await {
        Ok(outcome) => outcome,
        Err(e) => {
            log_line(log, format!("ib: transport error: {e}"));
            return TestResult::error(TestKind::Ib, e.to_string());
        }
    };
    log_line(log, format!("ib: exit={}", outcome.exit_code));

    let combined = format!("{}\n{}", outcome.stdout, outcome.stderr);
    let status = if parse_ib(&combined, outcome.exit_code) { TestStatus::Passed } else { TestStatus::Failed };
    TestResult {
        kind: TestKind::Ib,
        status,
        value: None,
        unit: None,
        benchmark: None,
        details: BTreeMapExt::default(),
        raw_output: combined,
        message: None,
    }
}

/// Local alias so call sites don't spell out the full `BTreeMap` type
/// for every result that carries no sub-scalars.
type BTreeMapExt = std::collections::BTreeMap<String, f64>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multi_host_command_applies_only_present_optional_flags() {
        let config = NcclMpiConfig {
            nccl_socket_ifname: Some("eth0".to_string()),
            sharp_relaxed_ordering: true,
            ..Default::default()
        };
        let cmd = build_multi_host_nccl_command(
            "/tmp/ghx/nccl-tests",
            8,
            &HostTarget::Hosts(vec!["h1".to_string(), "h2".to_string()]),
            4,
            &config,
        );
        assert!(cmd.contains("-np 8"));
        assert!(cmd.contains("-host h1,h2"));
        assert!(cmd.contains("-x NCCL_SOCKET_IFNAME=eth0"));
        assert!(cmd.contains("-x SHARP_COLL_ENABLE_PCI_RELAXED_ORDERING=1"));
        assert!(!cmd.contains("NCCL_IB_HCA"));
        assert!(cmd.ends_with("all_reduce_perf -b 128M -e 16G -f 2 -g 4"));
    }

    #[test]
    fn multi_host_command_supports_hostfile_target() {
        let cmd = build_multi_host_nccl_command(
            "/tmp/ghx/nccl-tests",
            2,
            &HostTarget::HostFile(PathBuf::from("/tmp/hostfile")),
            1,
            &NcclMpiConfig::default(),
        );
        assert!(cmd.contains("-hostfile /tmp/hostfile"));
    }

    #[test]
    fn status_from_threshold_passes_when_threshold_absent() {
        assert_eq!(status_from_threshold(1.0, None), TestStatus::Passed);
    }

    #[test]
    fn status_from_threshold_respects_gate() {
        assert_eq!(status_from_threshold(50.0, Some(40.0)), TestStatus::Passed);
        assert_eq!(status_from_threshold(30.0, Some(40.0)), TestStatus::Failed);
    }
}
