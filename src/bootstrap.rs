//! Slave bootstrap: configure a ready instance and launch its runtime.
//!
//! For every ready instance the driver runs, in order:
//!
//! 1. Build the [`SlaveBootstrapPayload`] for the instance's shard
//! 2. Stage both descriptors in a per-instance temporary directory
//! 3. Clone the workload bundle (workload user) and the runtime bundle
//!    (runtime user)
//! 4. Copy the shard descriptor into the workload bundle and the identity
//!    descriptor into the runtime bundle
//! 5. In alternate delivery mode, copy the session credential
//! 6. Start the runtime detached and return without waiting for it
//!
//! The first failing step ends that instance's bootstrap; later steps
//! depend on earlier ones. Failures of one instance never affect another.

pub mod payload;

use std::path::PathBuf;

use serde_json::Value;
use tracing::{debug, info};

pub use payload::{IdentityDescriptor, ShardDescriptor, SlaveBootstrapPayload};

use crate::config::{BundleConfig, RunConfig};
use crate::fleet::InstanceHandle;
use crate::remote::{RemoteError, RemoteExecutor, RemoteTarget};

/// A failed bootstrap step for one instance.
#[derive(Debug, thiserror::Error)]
pub enum BootstrapError {
    #[error("{instance}: failed to encode payload: {source}")]
    Payload {
        instance: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("{instance}: failed to stage payload: {source}")]
    Staging {
        instance: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{instance}: failed to fetch workload bundle: {source}")]
    FetchWorkload {
        instance: String,
        #[source]
        source: RemoteError,
    },

    #[error("{instance}: failed to fetch runtime bundle: {source}")]
    FetchRuntime {
        instance: String,
        #[source]
        source: RemoteError,
    },

    #[error("{instance}: failed to transfer shard descriptor: {source}")]
    TransferShard {
        instance: String,
        #[source]
        source: RemoteError,
    },

    #[error("{instance}: failed to transfer identity descriptor: {source}")]
    TransferIdentity {
        instance: String,
        #[source]
        source: RemoteError,
    },

    #[error("{instance}: failed to transfer session credential: {source}")]
    TransferSession {
        instance: String,
        #[source]
        source: RemoteError,
    },

    #[error("{instance}: failed to launch slave runtime: {source}")]
    Launch {
        instance: String,
        #[source]
        source: RemoteError,
    },

    #[error("{instance}: bootstrap cancelled")]
    Cancelled { instance: String },
}

impl BootstrapError {
    /// Short name of the failed step.
    pub fn step(&self) -> &'static str {
        match self {
            BootstrapError::Payload { .. } => "payload",
            BootstrapError::Staging { .. } => "staging",
            BootstrapError::FetchWorkload { .. } => "fetch-workload",
            BootstrapError::FetchRuntime { .. } => "fetch-runtime",
            BootstrapError::TransferShard { .. } => "transfer-shard",
            BootstrapError::TransferIdentity { .. } => "transfer-identity",
            BootstrapError::TransferSession { .. } => "transfer-session",
            BootstrapError::Launch { .. } => "launch",
            BootstrapError::Cancelled { .. } => "cancelled",
        }
    }
}

/// Clone command for a bundle: `git clone --recursive <repo>` followed by
/// the bundle's post-clone step, if any.
pub fn clone_command(bundle: &BundleConfig) -> String {
    let clone = format!(
        "git clone --recursive {}",
        shell_words::quote(&bundle.repo)
    );
    match &bundle.post_clone {
        Some(post) => format!("{}; {}", clone, post),
        None => clone,
    }
}

/// Runs the bootstrap protocol against ready instances.
pub struct BootstrapDriver<'a, E> {
    config: &'a RunConfig,
    executor: &'a E,
    session_file: PathBuf,
}

impl<'a, E: RemoteExecutor> BootstrapDriver<'a, E> {
    pub fn new(config: &'a RunConfig, executor: &'a E) -> Self {
        Self {
            config,
            executor,
            session_file: config.session_file_path(),
        }
    }

    /// Bootstraps one instance with its shard.
    pub async fn bootstrap(
        &self,
        instance: &InstanceHandle,
        shard: &[Value],
    ) -> Result<(), BootstrapError> {
        let id = instance.id.clone();
        let workload = RemoteTarget::new(&self.config.workload.user, &instance.ip_address);
        let runtime = RemoteTarget::new(&self.config.runtime.user, &instance.ip_address);

        info!(
            "Bootstrapping {} with {} simulations",
            instance,
            shard.len()
        );

        let payload = SlaveBootstrapPayload::build(instance, shard, self.config);
        let encoded = payload.encode().map_err(|source| BootstrapError::Payload {
            instance: id.clone(),
            source,
        })?;
        let staged = encoded
            .stage(&instance.id)
            .map_err(|source| BootstrapError::Staging {
                instance: id.clone(),
                source,
            })?;

        self.run(&workload, &clone_command(&self.config.workload))
            .await
            .map_err(|source| BootstrapError::FetchWorkload {
                instance: id.clone(),
                source,
            })?;

        self.executor
            .upload(&workload, staged.shard_path(), &self.config.workload.config_path)
            .await
            .map_err(|source| BootstrapError::TransferShard {
                instance: id.clone(),
                source,
            })?;

        self.run(&runtime, &clone_command(&self.config.runtime))
            .await
            .map_err(|source| BootstrapError::FetchRuntime {
                instance: id.clone(),
                source,
            })?;

        self.executor
            .upload(
                &runtime,
                staged.identity_path(),
                &self.config.runtime.config_path,
            )
            .await
            .map_err(|source| BootstrapError::TransferIdentity {
                instance: id.clone(),
                source,
            })?;

        if self.config.google_drive {
            self.executor
                .upload(&runtime, &self.session_file, &self.config.session_path)
                .await
                .map_err(|source| BootstrapError::TransferSession {
                    instance: id.clone(),
                    source,
                })?;
        }

        self.run(&runtime, &self.config.start_command)
            .await
            .map_err(|source| BootstrapError::Launch {
                instance: id.clone(),
                source,
            })?;

        info!("Launched slave runtime on {}", instance);
        Ok(())
    }

    async fn run(&self, target: &RemoteTarget, command: &str) -> Result<(), RemoteError> {
        let result = self.executor.exec(target, command).await?;
        debug!(
            "{} finished with {} in {:?}",
            target, result.exit_code, result.duration
        );
        result.check(target).map(|_| ())
    }
}
