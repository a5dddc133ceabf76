//! SSH executor implementation.
//!
//! Runs commands with the system `ssh` binary and copies files with `scp`.
//! No connection is kept open: each call spawns its own process, which
//! keeps concurrent calls to different slaves independent.
//!
//! # Prerequisites
//!
//! - `ssh` and `scp` available locally
//! - Key-based authentication (password auth not supported)
//! - The droplet template installs the coordinator's public key
//!
//! # Example Configuration
//!
//! ```json
//! "ssh": {
//!     "key-path": "~/.ssh/id_rsa",
//!     "port": 22,
//!     "connect-timeout-secs": 30,
//!     "strict-host-key-checking": false
//! }
//! ```

use std::path::Path;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::debug;

use super::{ExecResult, RemoteError, RemoteExecutor, RemoteResult, RemoteTarget};
use crate::config::SshConfig;

/// Executor that shells out to `ssh` and `scp`.
pub struct SshExecutor {
    ssh_args: Vec<String>,
    scp_args: Vec<String>,
    command_timeout: Option<Duration>,
}

impl SshExecutor {
    /// Creates an executor from the ssh section of the run configuration.
    ///
    /// # Example
    ///
    /// ```
    /// use elastic_fleet::config::SshConfig;
    /// use elastic_fleet::remote::ssh::SshExecutor;
    ///
    /// let executor = SshExecutor::new(&SshConfig::default());
    /// ```
    pub fn new(config: &SshConfig) -> Self {
        let mut common = vec![
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", config.connect_timeout_secs),
            "-o".to_string(),
            "LogLevel=ERROR".to_string(),
        ];

        if !config.strict_host_key_checking {
            common.push("-o".to_string());
            common.push("StrictHostKeyChecking=no".to_string());
            common.push("-o".to_string());
            common.push("UserKnownHostsFile=/dev/null".to_string());
        }

        if let Some(key_path) = &config.key_path {
            let key = shellexpand::tilde(&key_path.to_string_lossy()).into_owned();
            common.push("-i".to_string());
            common.push(key);
        }

        // ssh takes -p, scp takes -P
        let mut ssh_args = common.clone();
        ssh_args.push("-p".to_string());
        ssh_args.push(config.port.to_string());

        let mut scp_args = common;
        scp_args.push("-P".to_string());
        scp_args.push(config.port.to_string());

        Self {
            ssh_args,
            scp_args,
            command_timeout: config.command_timeout_secs.map(Duration::from_secs),
        }
    }

    async fn output(
        &self,
        mut cmd: tokio::process::Command,
        what: &str,
    ) -> RemoteResult<std::process::Output> {
        cmd.kill_on_drop(true);
        match self.command_timeout {
            Some(timeout) => tokio::time::timeout(timeout, cmd.output())
                .await
                .map_err(|_| {
                    RemoteError::Timeout(format!("{} timed out after {:?}", what, timeout))
                })?
                .map_err(RemoteError::from),
            None => cmd.output().await.map_err(RemoteError::from),
        }
    }
}

#[async_trait]
impl RemoteExecutor for SshExecutor {
    async fn exec(&self, target: &RemoteTarget, command: &str) -> RemoteResult<ExecResult> {
        let start = Instant::now();
        debug!("ssh {}: {}", target, command);

        let mut cmd = tokio::process::Command::new("ssh");
        cmd.args(&self.ssh_args).arg(target.to_string()).arg(command);

        let output = self
            .output(cmd, &format!("ssh to {}", target))
            .await
            .map_err(|e| match e {
                RemoteError::Io(io) => RemoteError::ExecFailed {
                    target: target.to_string(),
                    message: io.to_string(),
                },
                other => other,
            })?;

        Ok(ExecResult {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            duration: start.elapsed(),
        })
    }

    async fn upload(
        &self,
        target: &RemoteTarget,
        local: &Path,
        remote_path: &str,
    ) -> RemoteResult<()> {
        let destination = format!("{}:{}", target, remote_path);
        debug!("scp {} -> {}", local.display(), destination);

        let upload_failed = |message: String| RemoteError::UploadFailed {
            target: target.to_string(),
            local: local.display().to_string(),
            remote: remote_path.to_string(),
            message,
        };

        let mut cmd = tokio::process::Command::new("scp");
        cmd.args(&self.scp_args).arg(local).arg(&destination);

        let output = self
            .output(cmd, &format!("scp to {}", target))
            .await
            .map_err(|e| match e {
                RemoteError::Io(io) => upload_failed(io.to_string()),
                other => other,
            })?;

        if !output.status.success() {
            return Err(upload_failed(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }

        Ok(())
    }

    fn name(&self) -> &'static str {
        "ssh"
    }
}
