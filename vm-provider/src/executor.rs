//! Remote command execution over SSH.
//!
//! Every call opens its own SSH session, runs exactly one command to
//! completion, captures stdout and stderr in full and closes the session.
//! A non-zero exit status or a non-empty stderr is NOT an error at this
//! layer: `VBoxManage` writes progress to stderr on success, so callers
//! interpret the text themselves. Only failing to reach or authenticate
//! against the host (or running out of time) is reported, as
//! [`ProviderError::Transport`].

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::sync::Semaphore;
use tracing::{debug, instrument};
use vm_config::HostConfig;

use crate::error::{ProviderError, Result};

/// `ssh` reserves this exit status for its own connection failures.
const SSH_CONNECTION_FAILURE: i32 = 255;

/// `sshpass` exit statuses for a rejected password and an unknown host key.
const SSHPASS_BAD_PASSWORD: i32 = 5;
const SSHPASS_HOST_KEY_UNKNOWN: i32 = 6;

/// Captured result of one remote command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
}

impl RemoteOutput {
    pub fn new(stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: stderr.into(),
            exit_code: Some(0),
        }
    }
}

/// Runs a single command line on the hypervisor host.
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    async fn execute(&self, command: &str) -> Result<RemoteOutput>;
}

/// [`RemoteExecutor`] backed by the system `ssh` client.
///
/// Password credentials are passed to `sshpass -e` through the `SSHPASS`
/// environment variable of the child process, never on the command line.
/// Concurrent sessions are bounded by a semaphore so a burst of operations
/// cannot open an unbounded number of connections to one host.
pub struct SshExecutor {
    host: HostConfig,
    sessions: Arc<Semaphore>,
    timeout: Duration,
}

impl SshExecutor {
    pub fn new(host: HostConfig) -> Self {
        let sessions = Arc::new(Semaphore::new(host.max_sessions.max(1)));
        let timeout = Duration::from_secs(host.command_timeout_secs.max(1));
        Self {
            host,
            sessions,
            timeout,
        }
    }

    /// Check that the local client binaries this executor needs are on PATH.
    pub fn preflight(&self) -> Result<()> {
        let tool = if self.host.password.is_some() {
            "sshpass"
        } else {
            "ssh"
        };
        which::which(tool).map_err(|_| {
            ProviderError::Transport(format!("required tool '{}' not found on PATH", tool))
        })?;
        Ok(())
    }

    fn destination(&self) -> String {
        format!("{}@{}", self.host.username, self.host.address)
    }

    fn build_command(&self, remote_command: &str) -> Command {
        let mut cmd = match &self.host.password {
            Some(password) => {
                let mut cmd = Command::new("sshpass");
                cmd.arg("-e").arg("ssh").env("SSHPASS", password);
                cmd
            }
            None => {
                let mut cmd = Command::new("ssh");
                cmd.args(["-o", "BatchMode=yes"]);
                cmd
            }
        };

        cmd.arg("-p")
            .arg(self.host.port.to_string())
            .args(["-o", "StrictHostKeyChecking=accept-new"])
            .args(["-o", "ConnectTimeout=15"])
            .arg(self.destination())
            .arg("--")
            .arg(remote_command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        cmd
    }

    fn is_transport_failure(&self, exit_code: Option<i32>) -> bool {
        match exit_code {
            Some(SSH_CONNECTION_FAILURE) => true,
            Some(SSHPASS_BAD_PASSWORD) | Some(SSHPASS_HOST_KEY_UNKNOWN) => {
                self.host.password.is_some()
            }
            _ => false,
        }
    }
}

#[async_trait]
impl RemoteExecutor for SshExecutor {
    #[instrument(skip(self), fields(host = %self.host.address))]
    async fn execute(&self, command: &str) -> Result<RemoteOutput> {
        let _permit = self
            .sessions
            .acquire()
            .await
            .map_err(|_| ProviderError::Transport("SSH session pool closed".to_string()))?;

        debug!("opening SSH session");
        let output = tokio::time::timeout(self.timeout, self.build_command(command).output())
            .await
            .map_err(|_| {
                ProviderError::Transport(format!(
                    "remote command timed out after {}s",
                    self.timeout.as_secs()
                ))
            })?
            .map_err(|e| ProviderError::Transport(format!("failed to spawn ssh client: {}", e)))?;

        let result = RemoteOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: output.status.code(),
        };

        if self.is_transport_failure(result.exit_code) {
            return Err(ProviderError::Transport(format!(
                "cannot reach {}:{} as {}: {}",
                self.host.address,
                self.host.port,
                self.host.username,
                result.stderr.trim()
            )));
        }

        debug!(exit_code = ?result.exit_code, "remote command finished");
        Ok(result)
    }
}
