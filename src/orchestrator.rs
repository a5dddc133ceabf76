//! Run orchestration.
//!
//! The orchestrator ties the components together for one batch run.
//!
//! # Architecture
//!
//! ```text
//!   RunConfig
//!       │
//!       ▼
//!  Provisioner ── create_instance() ×N ──► FleetClient
//!       │
//!       │ ReadinessPoller (per instance, ordered)
//!       ▼
//!  ProvisionReport { ready, unready }
//!       │
//!       │ partition(simulations, ready.len())
//!       ▼
//!  PartitionPlan ── assign(ready) ──► (InstanceHandle, shard)
//!                                           │
//!                                           ▼
//!                                   BootstrapDriver ──► RemoteExecutor
//!                                           │
//!                                           ▼
//!                                   RunReport ──► Reporter
//!                                           │
//!                                           ▼
//!                      delete master-droplet-id (alternate delivery only)
//! ```
//!
//! # Execution Flow
//!
//! 1. **Provision**: create every slave in order, then wait for readiness
//! 2. **Partition**: split the jobs over the ready slaves, dropping the
//!    remainder
//! 3. **Bootstrap**: configure and launch each slave with its shard
//! 4. **Teardown**: in alternate delivery mode, once every bootstrap has
//!    succeeded, delete the coordinator's own instance
//!
//! Provisioning failures are fatal. Bootstrap failures are collected per
//! instance and never roll anything back.
//!
//! # Example
//!
//! ```no_run
//! use elastic_fleet::config::load_config;
//! use elastic_fleet::fleet::digitalocean::DigitalOceanClient;
//! use elastic_fleet::orchestrator::Orchestrator;
//! use elastic_fleet::remote::ssh::SshExecutor;
//! use elastic_fleet::report::ConsoleReporter;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = load_config(std::path::Path::new("config.json"))?;
//!
//!     let fleet = DigitalOceanClient::new(&config.api_url, &config.api_key);
//!     let executor = SshExecutor::new(&config.ssh);
//!     let reporter = ConsoleReporter::new(false);
//!
//!     let orchestrator = Orchestrator::new(config, fleet, executor, reporter);
//!     let report = orchestrator.run().await?;
//!
//!     std::process::exit(report.exit_code());
//! }
//! ```

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::StreamExt;
use futures::stream;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::bootstrap::{BootstrapDriver, BootstrapError};
use crate::config::{ConfigError, RunConfig};
use crate::fleet::{FleetClient, FleetError, InstanceHandle};
use crate::partition::partition;
use crate::provision::{ProvisionError, Provisioner, UnreadyInstance};
use crate::remote::RemoteExecutor;
use crate::report::Reporter;

/// Fatal errors that end a run before it completes.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Provision(#[from] ProvisionError),

    #[error("failed to delete coordinator instance {id}: {source}")]
    Teardown {
        id: String,
        #[source]
        source: FleetError,
    },
}

/// A ready instance whose bootstrap failed.
#[derive(Debug)]
pub struct FailedBootstrap {
    pub instance: InstanceHandle,
    pub error: BootstrapError,
}

/// Outcome of an entire run.
///
/// # Exit Codes
///
/// | Code | Meaning |
/// |------|---------|
/// | 0 | Every created slave was launched |
/// | 1 | Some slave never became ready or failed to bootstrap |
#[derive(Debug)]
pub struct RunReport {
    pub started_at: DateTime<Utc>,
    pub duration: Duration,

    /// Ready instances in creation order.
    pub ready: Vec<InstanceHandle>,
    pub unready: Vec<UnreadyInstance>,

    /// Instances whose runtime was launched.
    pub bootstrapped: Vec<InstanceHandle>,
    pub failed: Vec<FailedBootstrap>,

    /// Trailing jobs that no shard received.
    pub dropped_jobs: usize,

    /// Whether the coordinator deleted its own instance.
    pub torn_down: bool,
}

impl RunReport {
    pub fn success(&self) -> bool {
        self.failed.is_empty() && self.unready.is_empty()
    }

    pub fn exit_code(&self) -> i32 {
        if self.success() { 0 } else { 1 }
    }
}

/// Drives a full run against a fleet provider and a remote executor.
///
/// # Type Parameters
///
/// - `F`: The fleet provider client
/// - `E`: The remote executor
/// - `R`: The reporter
pub struct Orchestrator<F, E, R> {
    config: RunConfig,
    fleet: F,
    executor: E,
    reporter: R,
    cancel: CancellationToken,
}

impl<F, E, R> Orchestrator<F, E, R>
where
    F: FleetClient,
    E: RemoteExecutor,
    R: Reporter,
{
    pub fn new(config: RunConfig, fleet: F, executor: E, reporter: R) -> Self {
        Self {
            config,
            fleet,
            executor,
            reporter,
            cancel: CancellationToken::new(),
        }
    }

    /// Uses `token` to abort creation, polling and bootstrap.
    pub fn with_cancellation_token(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn fleet(&self) -> &F {
        &self.fleet
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }

    /// Runs provisioning, partitioning, bootstrap and teardown.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid, provisioning
    /// fails, or the coordinator cannot delete itself. Per-instance
    /// readiness and bootstrap failures are part of the [`RunReport`].
    pub async fn run(&self) -> Result<RunReport, RunError> {
        let started_at = Utc::now();
        let start = Instant::now();

        self.config.validate()?;

        info!("Initialized creation process of slaves");
        let provisioner = Provisioner::new(
            &self.config,
            &self.fleet,
            &self.executor,
            &self.reporter,
            self.cancel.clone(),
        );
        let fleet = provisioner.provision().await?;

        let plan = partition(&self.config.simulations, fleet.ready.len())?;
        if !plan.dropped().is_empty() {
            warn!(
                "{} simulations do not divide evenly over {} slaves and will not run",
                plan.dropped().len(),
                plan.len()
            );
        }
        info!(
            "Assigning {} simulations to each of {} slaves",
            plan.shard_size(),
            plan.len()
        );
        self.reporter.on_plan(&plan.summary()).await;

        let driver = BootstrapDriver::new(&self.config, &self.executor);
        let driver = &driver;
        let cancel = &self.cancel;
        let reporter = &self.reporter;

        let outcomes: Vec<_> = stream::iter(plan.assign(&fleet.ready))
            .map(|(instance, shard)| async move {
                let result = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => Err(BootstrapError::Cancelled {
                        instance: instance.id.clone(),
                    }),
                    result = driver.bootstrap(instance, shard) => result,
                };
                reporter.on_bootstrap_complete(instance, &result).await;
                (instance, result)
            })
            .buffered(self.config.parallelism())
            .collect()
            .await;

        let mut bootstrapped = Vec::new();
        let mut failed = Vec::new();
        for (instance, result) in outcomes {
            match result {
                Ok(()) => bootstrapped.push(instance.clone()),
                Err(error) => {
                    error!("Bootstrap of {} failed at {}: {}", instance, error.step(), error);
                    failed.push(FailedBootstrap {
                        instance: instance.clone(),
                        error,
                    });
                }
            }
        }
        info!("Slaves have been initialized");

        let dropped_jobs = plan.dropped().len();
        let torn_down = self.teardown(&failed).await?;

        let report = RunReport {
            started_at,
            duration: start.elapsed(),
            ready: fleet.ready,
            unready: fleet.unready,
            bootstrapped,
            failed,
            dropped_jobs,
            torn_down,
        };

        self.reporter.on_run_complete(&report).await;

        Ok(report)
    }

    /// Deletes the coordinator's own instance in alternate delivery mode.
    ///
    /// Returns whether the delete was issued.
    async fn teardown(&self, failed: &[FailedBootstrap]) -> Result<bool, RunError> {
        if !self.config.google_drive {
            return Ok(false);
        }
        if !failed.is_empty() || self.cancel.is_cancelled() {
            warn!(
                "Keeping coordinator instance: {} slaves failed to bootstrap",
                failed.len()
            );
            return Ok(false);
        }

        let id = self
            .config
            .master_droplet_id
            .as_deref()
            .ok_or(ConfigError::MissingMasterDropletId)?;

        info!("Deleting coordinator instance {}", id);
        self.fleet
            .delete_instance(id)
            .await
            .map_err(|source| RunError::Teardown {
                id: id.to_string(),
                source,
            })?;
        info!("Goodbye");

        Ok(true)
    }
}
