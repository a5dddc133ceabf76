//! Remote execution over a secure shell channel.
//!
//! [`RemoteExecutor`] runs commands on, and copies files to, a
//! `user@host` target. Readiness probing and slave bootstrap go through
//! this trait only.
//!
//! # Built-in Executors
//!
//! | Executor | Module | Description |
//! |----------|--------|-------------|
//! | SSH | [`ssh`] | System `ssh` and `scp` binaries |
//!
//! # Error Handling
//!
//! A command that runs but exits non-zero is NOT an error at the trait
//! level: [`RemoteExecutor::exec`] returns an [`ExecResult`] and callers
//! decide. [`ExecResult::check`] converts a non-zero exit into
//! [`RemoteError::NonZeroExit`] for callers that need success.

pub mod ssh;

use std::fmt;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;

/// Result type for remote operations.
pub type RemoteResult<T> = Result<T, RemoteError>;

/// Errors that can occur during remote operations.
#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    /// The command could not be started or the channel failed.
    #[error("Failed to execute command on {target}: {message}")]
    ExecFailed { target: String, message: String },

    /// The command ran and exited with a failure code.
    #[error("Command on {target} exited with code {exit_code}: {stderr}")]
    NonZeroExit {
        target: String,
        exit_code: i32,
        stderr: String,
    },

    #[error("Failed to upload {local} to {target}:{remote}: {message}")]
    UploadFailed {
        target: String,
        local: String,
        remote: String,
        message: String,
    },

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Login destination for a remote call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTarget {
    pub user: String,
    pub host: String,
}

impl RemoteTarget {
    pub fn new(user: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            host: host.into(),
        }
    }
}

impl fmt::Display for RemoteTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.user, self.host)
    }
}

/// Result of executing a remote command.
#[derive(Debug, Clone)]
pub struct ExecResult {
    /// Exit code of the command; -1 if it was killed by a signal.
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
}

impl ExecResult {
    /// Returns `true` if the command exited with code 0.
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Turns a non-zero exit into [`RemoteError::NonZeroExit`].
    ///
    /// # Example
    ///
    /// ```
    /// use elastic_fleet::remote::{ExecResult, RemoteTarget};
    /// use std::time::Duration;
    ///
    /// let target = RemoteTarget::new("root", "10.0.0.5");
    /// let result = ExecResult {
    ///     exit_code: 128,
    ///     stdout: String::new(),
    ///     stderr: "fatal: destination path exists".into(),
    ///     duration: Duration::from_millis(40),
    /// };
    /// assert!(result.check(&target).is_err());
    /// ```
    pub fn check(self, target: &RemoteTarget) -> RemoteResult<Self> {
        if self.success() {
            Ok(self)
        } else {
            Err(RemoteError::NonZeroExit {
                target: target.to_string(),
                exit_code: self.exit_code,
                stderr: self.stderr.trim().to_string(),
            })
        }
    }
}

/// Executes commands and file transfers against remote hosts.
///
/// Every call opens its own channel, so one executor can serve concurrent
/// calls to distinct hosts without shared mutable state.
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    /// Runs a shell command string on the target.
    async fn exec(&self, target: &RemoteTarget, command: &str) -> RemoteResult<ExecResult>;

    /// Copies a local file to `remote_path` on the target.
    ///
    /// `remote_path` is interpreted by the remote side, so `~` refers to
    /// the target user's home.
    async fn upload(&self, target: &RemoteTarget, local: &Path, remote_path: &str)
    -> RemoteResult<()>;

    /// Executor name for logging.
    fn name(&self) -> &'static str;
}
