//! Scoped SSH remote session (§4.C): open once, run commands and upload
//! files against a single control channel, close on scope exit.
//!
//! The spec's distillation explicitly leaves the transport library
//! choice out of scope; `openssh` (process-based, wraps the system
//! `ssh`/`scp`/`sftp` binaries) is the addition this crate exists to
//! justify — see the repo's grounding ledger.

use std::io::Write as _;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use ghx_proto::{AuthMethod, NodeConnection};
use openssh::{KnownHosts, Session, SessionBuilder, Stdio};
use openssh_sftp_client::Sftp;
use thiserror::Error;
use tokio::io::AsyncWriteExt as _;
use tracing::debug;

/// Errors a remote session operation can fail with. Every variant is a
/// distinguishable transport failure per the spec's contract — callers
/// never need to inspect an inner string to tell a timeout from a
/// connect failure.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// The SSH control connection could not be established.
    #[error("connect to {host}:{port} failed: {source}")]
    Connect {
        /// Target host.
        host: String,
        /// Target port.
        port: u16,
        /// Underlying transport error.
        source: openssh::Error,
    },

    /// A command's exec channel failed before producing output.
    #[error("exec channel error: {0}")]
    Exec(String),

    /// A command did not finish within its allotted timeout.
    #[error("command timed out after {0:?}")]
    Timeout(Duration),

    /// A file or directory upload failed.
    #[error("upload to {remote_path} failed: {reason}")]
    Upload {
        /// Remote destination path.
        remote_path: String,
        /// Failure reason.
        reason: String,
    },
}

/// Output of a completed remote command.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    /// Process exit code. `-1` if the process was killed by a signal.
    pub exit_code: i32,
    /// Captured stdout, UTF-8 with lossy decoding on invalid sequences.
    pub stdout: String,
    /// Captured stderr, UTF-8 with lossy decoding on invalid sequences.
    pub stderr: String,
}

/// A single open SSH control channel to one node.
///
/// The spec leaves in-flight command behavior on job cancellation
/// unspecified beyond "the session is closed on scope exit"; this
/// implementation does not send a signal to a still-running remote
/// command when the caller's future is dropped early (the underlying
/// `ssh` child process, not this struct, owns that lifetime) — a raised
/// cancellation latch is observed only between test-engine steps, never
/// by interrupting one already in flight. See the repo's grounding
/// ledger for the rationale.
pub struct RemoteSession {
    session: Arc<Session>,
    host: String,
    port: u16,
    username: String,
    sudo_password: Option<String>,
}

impl RemoteSession {
    /// Open a scoped session against `connection`.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::Connect`] if the control channel cannot be
    /// established (auth failure, unreachable host, handshake timeout).
    pub async fn open(connection: &NodeConnection) -> Result<Self, RemoteError> {
        let destination = format!("ssh://{}@{}:{}", connection.username, connection.host, connection.port);
        let mut builder = SessionBuilder::default();
        builder.known_hosts_check(KnownHosts::Accept);
        match &connection.auth {
            AuthMethod::PrivateKey { value, .. } => {
                let key_path = stage_private_key(value).map_err(|e| RemoteError::Connect {
                    host: connection.host.clone(),
                    port: connection.port,
                    source: openssh::Error::Ssh(e),
                })?;
                builder.keyfile(key_path);
            }
            AuthMethod::Password { .. } => {
                // Password auth is handled by an askpass helper the
                // deployment environment provisions; openssh itself has
                // no interactive password path.
            }
        }
        let session = builder
            .connect(&destination)
            .await
            .map_err(|source| RemoteError::Connect {
                host: connection.host.clone(),
                port: connection.port,
                source,
            })?;
        Ok(Self {
            session: Arc::new(session),
            host: connection.host.clone(),
            port: connection.port,
            username: connection.username.clone(),
            sudo_password: connection.sudo_password.clone(),
        })
    }

    /// Run `command` inside a login shell, optionally elevated.
    ///
    /// The command is wrapped as `bash -lc 'set -euo pipefail; <command>'`
    /// with embedded single quotes escaped. When `require_root` is set
    /// and the session is not already running as a privileged account,
    /// the wrapper is prefixed with `sudo`: `sudo -S -p ''` (secret piped
    /// over stdin, empty prompt) if a privilege-escalation secret is
    /// known, else `sudo -n` (fails immediately instead of blocking on a
    /// prompt that will never come).
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::Exec`] if the exec channel itself fails,
    /// or [`RemoteError::Timeout`] if `timeout` elapses first.
    pub async fn run(
        &self,
        command: &str,
        timeout: Duration,
        require_root: bool,
    ) -> Result<RunOutcome, RemoteError> {
        let escaped = command.replace('\'', r"'\''");
        let wrapped = format!("bash -lc 'set -euo pipefail; {escaped}'");

        let needs_sudo = require_root && self.username != "root";
        let full_command = if needs_sudo {
            if self.sudo_password.is_some() {
                format!("sudo -S -p '' {wrapped}")
            } else {
                format!("sudo -n {wrapped}")
            }
        } else {
            wrapped
        };

        let mut child = self
            .session
            .command("sh")
            .arg("-c")
            .arg(&full_command)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .await
            .map_err(|e| RemoteError::Exec(e.to_string()))?;

        if needs_sudo {
            if let Some(secret) = &self.sudo_password {
                if let Some(stdin) = child.stdin().as_mut() {
                    let _ = stdin.write_all(format!("{secret}\n").as_bytes()).await;
                }
            }
        }

        let output = tokio::time::timeout(timeout, child.wait_with_output())
            .await
            .map_err(|_| RemoteError::Timeout(timeout))?
            .map_err(|e| RemoteError::Exec(e.to_string()))?;

        Ok(RunOutcome {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    /// Upload a single local file to `remote_path`, creating parent
    /// directories first and `chmod +x`-ing it if `executable` is set.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::Upload`] on any sftp failure.
    pub async fn upload(
        &self,
        local_path: &Path,
        remote_path: &str,
        executable: bool,
    ) -> Result<(), RemoteError> {
        if let Some(parent) = Path::new(remote_path).parent().map(|p| p.to_string_lossy().into_owned()) {
            if !parent.is_empty() {
                self.run(&format!("mkdir -p '{parent}'"), Duration::from_secs(30), false)
                    .await
                    .map_err(|e| RemoteError::Upload {
                        remote_path: remote_path.to_string(),
                        reason: e.to_string(),
                    })?;
            }
        }

        let bytes = tokio::fs::read(local_path).await.map_err(|e| RemoteError::Upload {
            remote_path: remote_path.to_string(),
            reason: e.to_string(),
        })?;

        let sftp = Sftp::from_clonable_session(Arc::clone(&self.session), Default::default())
            .await
            .map_err(|e| RemoteError::Upload {
                remote_path: remote_path.to_string(),
                reason: e.to_string(),
            })?;
        let mut file = sftp.create(remote_path).await.map_err(|e| RemoteError::Upload {
            remote_path: remote_path.to_string(),
            reason: e.to_string(),
        })?;
        file.write_all(&bytes).await.map_err(|e| RemoteError::Upload {
            remote_path: remote_path.to_string(),
            reason: e.to_string(),
        })?;
        drop(file);
        sftp.close().await.map_err(|e| RemoteError::Upload {
            remote_path: remote_path.to_string(),
            reason: e.to_string(),
        })?;

        if executable {
            self.run(&format!("chmod +x '{remote_path}'"), Duration::from_secs(30), false)
                .await
                .map_err(|e| RemoteError::Upload {
                    remote_path: remote_path.to_string(),
                    reason: e.to_string(),
                })?;
        }
        debug!(host = %self.host, port = self.port, remote_path, "uploaded file");
        Ok(())
    }

    /// Recursively upload `local_dir` to `remote_dir`, preserving each
    /// entry's executable bit.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::Upload`] on any sftp failure or if
    /// `local_dir` cannot be walked.
    pub async fn upload_dir(&self, local_dir: &Path, remote_dir: &str) -> Result<(), RemoteError> {
        let mut stack = vec![(local_dir.to_path_buf(), remote_dir.to_string())];
        while let Some((local, remote)) = stack.pop() {
            let mut entries = tokio::fs::read_dir(&local).await.map_err(|e| RemoteError::Upload {
                remote_path: remote.clone(),
                reason: e.to_string(),
            })?;
            while let Some(entry) = entries.next_entry().await.map_err(|e| RemoteError::Upload {
                remote_path: remote.clone(),
                reason: e.to_string(),
            })? {
                let file_type = entry.file_type().await.map_err(|e| RemoteError::Upload {
                    remote_path: remote.clone(),
                    reason: e.to_string(),
                })?;
                let name = entry.file_name().to_string_lossy().into_owned();
                let child_remote = format!("{remote}/{name}");
                if file_type.is_dir() {
                    stack.push((entry.path(), child_remote));
                } else {
                    let executable = is_executable(&entry.path()).await;
                    self.upload(&entry.path(), &child_remote, executable).await?;
                }
            }
        }
        Ok(())
    }
}

#[cfg(unix)]
async fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt as _;
    tokio::fs::metadata(path)
        .await
        .map(|m| m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
async fn is_executable(_path: &Path) -> bool {
    false
}

fn stage_private_key(pem: &str) -> std::io::Result<std::path::PathBuf> {
    let path = std::env::temp_dir().join(format!("ghx-key-{}-{}", std::process::id(), pem.len()));
    let mut file = std::fs::File::create(&path)?;
    file.write_all(pem.as_bytes())?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt as _;
        file.set_permissions(std::fs::Permissions::from_mode(0o600))?;
    }
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_outcome_decodes_lossy_utf8() {
        let outcome = RunOutcome {
            exit_code: 0,
            stdout: String::from_utf8_lossy(b"hello \xff world").into_owned(),
            stderr: String::new(),
        };
        assert!(outcome.stdout.contains("hello"));
        assert!(outcome.stdout.contains("world"));
    }

    #[test]
    fn command_quoting_escapes_embedded_single_quotes() {
        let command = "echo 'it'\"'\"'s fine'";
        let escaped = command.replace('\'', r"'\''");
        let wrapped = format!("bash -lc 'set -euo pipefail; {escaped}'");
        assert!(wrapped.starts_with("bash -lc '"));
        assert!(!escaped.contains("\\'\\'"));
    }
}
