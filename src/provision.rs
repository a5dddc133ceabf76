//! Fleet provisioning: create the slaves, then wait for them to be usable.
//!
//! Creation is strictly sequential and stops at the first rejected request.
//! Instance ids are kept in creation order, which is also the order shards
//! are later assigned in. Readiness is then polled per instance, up to
//! `max-parallel` at a time, with results kept in creation order.

use futures::StreamExt;
use futures::stream;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::RunConfig;
use crate::fleet::{CreateInstanceRequest, FleetClient, FleetError, InstanceHandle};
use crate::readiness::{ReadinessError, ReadinessPoller, ReadinessPolicy};
use crate::remote::RemoteExecutor;
use crate::report::Reporter;

/// Fatal provisioning failures. Nothing is cleaned up on these.
#[derive(Debug, thiserror::Error)]
pub enum ProvisionError {
    #[error("creation of slave {index} was rejected with status {status}")]
    CreateRejected { index: usize, status: u16 },

    #[error("provider accepted slave {index} but returned no instance id")]
    MissingInstanceId { index: usize },

    #[error("fleet API error: {0}")]
    Fleet(#[from] FleetError),

    #[error("none of the {count} created slaves became ready")]
    NoReadyInstances { count: usize },

    #[error("provisioning cancelled after creating {} slaves", .created.len())]
    Cancelled { created: Vec<String> },
}

/// An instance that was created but never became ready.
#[derive(Debug)]
pub struct UnreadyInstance {
    pub id: String,
    pub error: ReadinessError,
}

/// Outcome of provisioning, in creation order.
#[derive(Debug, Default)]
pub struct ProvisionReport {
    pub ready: Vec<InstanceHandle>,
    pub unready: Vec<UnreadyInstance>,
}

impl ProvisionReport {
    pub fn created(&self) -> usize {
        self.ready.len() + self.unready.len()
    }
}

/// Creates `slaves-used` instances and drives them to readiness.
pub struct Provisioner<'a, F, E, R> {
    config: &'a RunConfig,
    fleet: &'a F,
    executor: &'a E,
    reporter: &'a R,
    policy: ReadinessPolicy,
    cancel: CancellationToken,
}

impl<'a, F, E, R> Provisioner<'a, F, E, R>
where
    F: FleetClient,
    E: RemoteExecutor,
    R: Reporter,
{
    pub fn new(
        config: &'a RunConfig,
        fleet: &'a F,
        executor: &'a E,
        reporter: &'a R,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            fleet,
            executor,
            reporter,
            policy: ReadinessPolicy::from(&config.readiness),
            cancel,
        }
    }

    /// Creates every instance and waits for them.
    ///
    /// Returns [`ProvisionError::NoReadyInstances`] if every instance failed
    /// its readiness checks.
    pub async fn provision(&self) -> Result<ProvisionReport, ProvisionError> {
        let ids = self.create_instances().await?;
        info!("Finished creating slave droplets");

        let report = self.await_fleet(&ids).await;

        if self.cancel.is_cancelled() {
            return Err(ProvisionError::Cancelled { created: ids });
        }
        if report.ready.is_empty() {
            return Err(ProvisionError::NoReadyInstances { count: ids.len() });
        }

        self.reporter.on_fleet_ready(&report).await;
        Ok(report)
    }

    /// Issues one create request per slave, in order.
    ///
    /// Any status other than 202 stops creation; instances created so far
    /// are left running.
    pub async fn create_instances(&self) -> Result<Vec<String>, ProvisionError> {
        let count = self.config.slaves_used;
        let request = CreateInstanceRequest::from_config(self.config);
        let mut ids = Vec::with_capacity(count);

        self.reporter.on_creation_started(count).await;

        for index in 0..count {
            if self.cancel.is_cancelled() {
                return Err(ProvisionError::Cancelled { created: ids });
            }

            let response = self.fleet.create_instance(&request).await?;
            if !response.accepted() {
                return Err(ProvisionError::CreateRejected {
                    index,
                    status: response.status,
                });
            }
            let id = response
                .instance_id
                .ok_or(ProvisionError::MissingInstanceId { index })?;

            info!("Created slave {} of {}: instance {}", index + 1, count, id);
            self.reporter.on_instance_created(index, &id).await;
            ids.push(id);
        }

        Ok(ids)
    }

    /// Polls every instance to readiness and splits them into ready and
    /// unready, preserving the order of `ids`.
    pub async fn await_fleet(&self, ids: &[String]) -> ProvisionReport {
        let poller = ReadinessPoller::new(
            self.fleet,
            self.executor,
            &self.policy,
            &self.config.runtime.user,
            self.cancel.clone(),
        );
        let poller = &poller;

        let outcomes: Vec<_> = stream::iter(ids)
            .map(|id| async move { (id, poller.await_ready(id).await) })
            .buffered(self.config.parallelism())
            .collect()
            .await;

        let mut report = ProvisionReport::default();
        for (id, outcome) in outcomes {
            match outcome {
                Ok(handle) => {
                    self.reporter.on_instance_ready(&handle).await;
                    report.ready.push(handle);
                }
                Err(error) => {
                    warn!("Slave {} is not ready: {}", id, error);
                    let unready = UnreadyInstance {
                        id: id.clone(),
                        error,
                    };
                    self.reporter.on_instance_unready(&unready).await;
                    report.unready.push(unready);
                }
            }
        }

        report
    }
}
