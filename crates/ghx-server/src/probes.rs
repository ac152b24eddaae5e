//! SSH test-connection and command-presence check (§6): a closed menu
//! of one-shot diagnostic probes run over a scoped remote session, used
//! by the UI to validate a node's connection details before it is
//! submitted as part of a job.

use std::time::Duration;

use ghx_proto::NodeConnection;
use ghx_remote::{RemoteError, RemoteSession};
use serde::{Deserialize, Serialize};

const PROBE_TIMEOUT: Duration = Duration::from_secs(30);

/// Compact diagnostic blob returned by the SSH test-connection probe.
#[derive(Debug, Serialize, Deserialize)]
pub struct ConnectionProbe {
    /// Whether the SSH session opened at all.
    pub reachable: bool,
    /// `hostname` output, if reachable.
    pub hostname: Option<String>,
    /// `nvidia-smi -L` output, if reachable.
    pub gpu_list: Option<String>,
    /// `nvidia-smi --query-gpu=driver_version` output, if reachable.
    pub driver_version: Option<String>,
    /// A best-effort internal IP, parsed from `hostname -I`.
    pub internal_ip: Option<String>,
    /// Present when `reachable` is false.
    pub error: Option<String>,
}

/// Run the SSH test-connection probe against `connection`.
pub async fn test_connection(connection: &NodeConnection) -> ConnectionProbe {
    let session = match RemoteSession::open(connection).await {
        Ok(session) => session,
        Err(e) => {
            return ConnectionProbe {
                reachable: false,
                hostname: None,
                gpu_list: None,
                driver_version: None,
                internal_ip: None,
                error: Some(e.to_string()),
            }
        }
    };

    let hostname = run_best_effort(&session, "hostname").await;
    let gpu_list = run_best_effort(&session, "nvidia-smi -L || true").await;
    let driver_version = run_best_effort(&session, "nvidia-smi --query-gpu=driver_version --format=csv,noheader || true").await;
    let internal_ip = run_best_effort(&session, "hostname -I | awk '{print $1}'").await;

    ConnectionProbe {
        reachable: true,
        hostname,
        gpu_list,
        driver_version,
        internal_ip,
        error: None,
    }
}

async fn run_best_effort(session: &RemoteSession, command: &str) -> Option<String> {
    session.run(command, PROBE_TIMEOUT, false).await.ok().map(|o| o.stdout.trim().to_string())
}

/// One probe from the closed command-presence menu.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum CommandPresenceProbe {
    /// Is `name` resolvable on `$PATH`.
    ExecutableOnPath {
        /// Command name.
        name: String,
    },
    /// Is `path` a file with the executable bit set.
    FileIsExecutable {
        /// Absolute path.
        path: String,
    },
    /// Is kernel module `module` currently loaded.
    KernelModuleLoaded {
        /// Module name, as it appears in `lsmod`.
        module: String,
    },
    /// Is kernel module `module` currently absent.
    KernelModuleUnloaded {
        /// Module name.
        module: String,
    },
    /// Are PCIe Access Control Services disabled fleet-wide.
    AcsDisabled,
    /// Does `ulimit -<flag>` report `expected`.
    UlimitValue {
        /// `ulimit` flag, e.g. `"n"` or `"l"`.
        flag: String,
        /// Expected value, compared as text.
        expected: String,
    },
    /// Is systemd unit `unit` currently active.
    SystemdUnitActive {
        /// Unit name.
        unit: String,
    },
    /// Is `package` installed with `cuda_version` present in its
    /// reported version string.
    PackageInstalledWithCudaVersion {
        /// Package name as known to `dpkg`.
        package: String,
        /// Expected CUDA version substring.
        cuda_version: String,
    },
}

impl CommandPresenceProbe {
    fn command(&self) -> String {
        match self {
            Self::ExecutableOnPath { name } => format!("command -v {name}"),
            Self::FileIsExecutable { path } => format!("test -x {path}"),
            Self::KernelModuleLoaded { module } => format!("lsmod | grep -q '^{module} '"),
            Self::KernelModuleUnloaded { module } => format!("! lsmod | grep -q '^{module} '"),
            Self::AcsDisabled => {
                "! (lspci -vvv 2>/dev/null | grep -i acsctl | grep -q 'SrcValid+')".to_string()
            }
            Self::UlimitValue { flag, expected } => {
                format!("[ \"$(ulimit -{flag})\" = \"{expected}\" ]")
            }
            Self::SystemdUnitActive { unit } => format!("systemctl is-active --quiet {unit}"),
            Self::PackageInstalledWithCudaVersion { package, cuda_version } => {
                format!("dpkg -l {package} 2>/dev/null | grep -q {cuda_version}")
            }
        }
    }
}

/// Outcome of a command-presence probe.
#[derive(Debug, Serialize, Deserialize)]
pub struct ProbeOutcome {
    /// Whether the probe's condition held.
    pub pass: bool,
    /// Captured stdout/stderr, for operator diagnosis.
    pub output: String,
}

/// Run one command-presence probe against `connection`.
///
/// # Errors
///
/// Returns [`RemoteError`] if the session could not be opened.
pub async fn run_probe(connection: &NodeConnection, probe: &CommandPresenceProbe) -> Result<ProbeOutcome, RemoteError> {
    let session = RemoteSession::open(connection).await?;
    let command = probe.command();
    let outcome = session.run(&command, PROBE_TIMEOUT, false).await;
    Ok(match outcome {
        Ok(result) => ProbeOutcome { pass: result.exit_code == 0, output: format!("{}{}", result.stdout, result.stderr) },
        Err(RemoteError::Timeout(_)) => ProbeOutcome { pass: false, output: "probe timed out".to_string() },
        Err(e) => return Err(e),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn executable_on_path_command_shape() {
        let probe = CommandPresenceProbe::ExecutableOnPath { name: "nvidia-smi".to_string() };
        assert_eq!(probe.command(), "command -v nvidia-smi");
    }

    #[test]
    fn kernel_module_unloaded_negates_lsmod_grep() {
        let probe = CommandPresenceProbe::KernelModuleUnloaded { module: "nouveau".to_string() };
        assert!(probe.command().starts_with('!'));
    }

    #[test]
    fn ulimit_value_command_compares_with_expected() {
        let probe = CommandPresenceProbe::UlimitValue { flag: "n".to_string(), expected: "1048576".to_string() };
        assert_eq!(probe.command(), "[ \"$(ulimit -n)\" = \"1048576\" ]");
    }
}
