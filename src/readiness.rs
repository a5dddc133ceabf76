//! Two-phase readiness polling for freshly created instances.
//!
//! An instance is ready when:
//!
//! 1. **Action convergence**: every action the provider reports for it is
//!    `completed`, and
//! 2. **Liveness convergence**: it has a public address and answers a
//!    trivial probe command over ssh with exit code 0.
//!
//! Both phases poll at a fixed interval, are bounded by an optional
//! attempt limit, and stop early when the shared cancellation token fires.
//!
//! ```text
//!  list_pending_actions ──┬─ all completed ──► resolve ip ──► probe ──┬─ exit 0 ──► InstanceHandle
//!          ▲              │                      ▲                    │
//!          └── sleep ◄────┘ pending              └──── sleep ◄────────┘ no ip / failure
//! ```

use std::fmt;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{ErroredActionPolicy, ReadinessConfig};
use crate::fleet::{ActionStatus, FleetClient, InstanceHandle};
use crate::remote::{RemoteExecutor, RemoteTarget};

/// Polling intervals and bounds for [`ReadinessPoller`].
#[derive(Debug, Clone)]
pub struct ReadinessPolicy {
    pub action_poll_interval: Duration,
    pub probe_interval: Duration,
    /// `None` polls until the actions converge.
    pub max_action_polls: Option<u32>,
    /// `None` probes until the host answers.
    pub max_probe_attempts: Option<u32>,
    pub errored_actions: ErroredActionPolicy,
    pub probe_command: String,
}

impl Default for ReadinessPolicy {
    fn default() -> Self {
        Self::from(&ReadinessConfig::default())
    }
}

impl From<&ReadinessConfig> for ReadinessPolicy {
    fn from(config: &ReadinessConfig) -> Self {
        Self {
            action_poll_interval: Duration::from_secs(config.action_poll_secs),
            probe_interval: Duration::from_secs(config.probe_interval_secs),
            max_action_polls: config.max_action_polls,
            max_probe_attempts: config.max_probe_attempts,
            errored_actions: config.errored_actions,
            probe_command: config.probe_command.clone(),
        }
    }
}

/// The polling phase an instance was in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadinessPhase {
    Actions,
    Liveness,
}

impl fmt::Display for ReadinessPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReadinessPhase::Actions => f.write_str("action"),
            ReadinessPhase::Liveness => f.write_str("liveness"),
        }
    }
}

/// Why an instance never became ready.
#[derive(Debug, thiserror::Error)]
pub enum ReadinessError {
    /// The provider reported an `errored` action for the instance.
    #[error("instance {instance}: provider action errored")]
    ActionErrored { instance: String },

    #[error("instance {instance}: {phase} polling gave up after {attempts} attempts")]
    Timeout {
        instance: String,
        phase: ReadinessPhase,
        attempts: u32,
    },

    #[error("instance {instance}: readiness polling cancelled")]
    Cancelled { instance: String },
}

enum ActionSummary {
    Converged,
    Pending(usize),
    Errored,
}

fn summarize(actions: &[ActionStatus]) -> ActionSummary {
    if actions.contains(&ActionStatus::Errored) {
        return ActionSummary::Errored;
    }
    let pending = actions
        .iter()
        .filter(|status| **status != ActionStatus::Completed)
        .count();
    if pending == 0 {
        ActionSummary::Converged
    } else {
        ActionSummary::Pending(pending)
    }
}

/// Drives one instance through both readiness phases.
///
/// # Example
///
/// ```no_run
/// use tokio_util::sync::CancellationToken;
/// use elastic_fleet::config::SshConfig;
/// use elastic_fleet::fleet::digitalocean::DigitalOceanClient;
/// use elastic_fleet::readiness::{ReadinessPoller, ReadinessPolicy};
/// use elastic_fleet::remote::ssh::SshExecutor;
///
/// # async fn example() -> anyhow::Result<()> {
/// let fleet = DigitalOceanClient::new("https://api.digitalocean.com", "token");
/// let executor = SshExecutor::new(&SshConfig::default());
/// let policy = ReadinessPolicy::default();
///
/// let poller = ReadinessPoller::new(&fleet, &executor, &policy, "root", CancellationToken::new());
/// let handle = poller.await_ready("3164494").await?;
/// println!("ready: {}", handle);
/// # Ok(())
/// # }
/// ```
pub struct ReadinessPoller<'a, F, E> {
    fleet: &'a F,
    executor: &'a E,
    policy: &'a ReadinessPolicy,
    probe_user: &'a str,
    cancel: CancellationToken,
}

impl<'a, F: FleetClient, E: RemoteExecutor> ReadinessPoller<'a, F, E> {
    pub fn new(
        fleet: &'a F,
        executor: &'a E,
        policy: &'a ReadinessPolicy,
        probe_user: &'a str,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            fleet,
            executor,
            policy,
            probe_user,
            cancel,
        }
    }

    /// Waits until the instance is provider-ready and reachable.
    pub async fn await_ready(&self, instance_id: &str) -> Result<InstanceHandle, ReadinessError> {
        let polls = self.await_actions(instance_id).await?;
        debug!("instance {}: actions completed after {} polls", instance_id, polls);

        let handle = self.await_liveness(instance_id).await?;
        info!("instance {} is ready at {}", handle.id, handle.ip_address);
        Ok(handle)
    }

    /// Polls provider actions until all are completed.
    ///
    /// Returns the number of action queries issued.
    pub async fn await_actions(&self, instance_id: &str) -> Result<u32, ReadinessError> {
        let mut polls = 0u32;

        loop {
            polls += 1;

            match self.fleet.list_pending_actions(instance_id).await {
                Ok(actions) => match summarize(&actions) {
                    ActionSummary::Converged => return Ok(polls),
                    ActionSummary::Errored
                        if self.policy.errored_actions == ErroredActionPolicy::Fail =>
                    {
                        return Err(ReadinessError::ActionErrored {
                            instance: instance_id.to_string(),
                        });
                    }
                    ActionSummary::Errored => {
                        warn!(
                            "instance {}: provider action errored, polling again",
                            instance_id
                        );
                    }
                    ActionSummary::Pending(n) => {
                        debug!("instance {}: {} actions pending", instance_id, n);
                    }
                },
                Err(e) => warn!("instance {}: failed to fetch actions: {}", instance_id, e),
            }

            if let Some(max) = self.policy.max_action_polls
                && polls >= max
            {
                return Err(ReadinessError::Timeout {
                    instance: instance_id.to_string(),
                    phase: ReadinessPhase::Actions,
                    attempts: polls,
                });
            }

            self.pause(self.policy.action_poll_interval, instance_id)
                .await?;
        }
    }

    /// Probes the instance until it answers.
    ///
    /// The address is re-resolved every round because the provider may
    /// assign it after the create action completes.
    pub async fn await_liveness(
        &self,
        instance_id: &str,
    ) -> Result<InstanceHandle, ReadinessError> {
        let mut attempts = 0u32;

        loop {
            attempts += 1;

            match self.resolve_address(instance_id).await {
                Some(ip) => {
                    let target = RemoteTarget::new(self.probe_user, ip.as_str());
                    match self.executor.exec(&target, &self.policy.probe_command).await {
                        Ok(result) if result.success() => {
                            return Ok(InstanceHandle {
                                id: instance_id.to_string(),
                                ip_address: ip,
                            });
                        }
                        Ok(result) => debug!(
                            "instance {}: probe exited with {}",
                            instance_id, result.exit_code
                        ),
                        Err(e) => debug!("instance {}: probe failed: {}", instance_id, e),
                    }
                }
                None => debug!("instance {}: no public address yet", instance_id),
            }

            if let Some(max) = self.policy.max_probe_attempts
                && attempts >= max
            {
                return Err(ReadinessError::Timeout {
                    instance: instance_id.to_string(),
                    phase: ReadinessPhase::Liveness,
                    attempts,
                });
            }

            self.pause(self.policy.probe_interval, instance_id).await?;
        }
    }

    async fn resolve_address(&self, instance_id: &str) -> Option<String> {
        match self.fleet.list_instances().await {
            Ok(instances) => instances
                .into_iter()
                .find(|info| info.id == instance_id)
                .and_then(|info| info.public_ipv4),
            Err(e) => {
                warn!("failed to list instances: {}", e);
                None
            }
        }
    }

    async fn pause(&self, interval: Duration, instance_id: &str) -> Result<(), ReadinessError> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(ReadinessError::Cancelled {
                instance: instance_id.to_string(),
            }),
            _ = tokio::time::sleep(interval) => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::{StubExecutor, StubFleet, fast_policy, ip_for};
    use crate::fleet::{CreateInstanceRequest, FleetClient};
    use crate::config::ResourceRef;

    async fn create_one(fleet: &StubFleet) -> String {
        let request = CreateInstanceRequest {
            name: "slave".into(),
            region: "nyc3".into(),
            size: "s-1vcpu-1gb".into(),
            image: ResourceRef::Id(1),
            ssh_keys: vec![],
        };
        fleet
            .create_instance(&request)
            .await
            .unwrap()
            .instance_id
            .unwrap()
    }

    fn pending(rounds: usize) -> Vec<Vec<ActionStatus>> {
        (0..rounds)
            .map(|_| vec![ActionStatus::Completed, ActionStatus::Pending])
            .collect()
    }

    #[tokio::test]
    async fn test_action_convergence_query_count() {
        let fleet = StubFleet::new().with_actions("101", pending(3));
        let id = create_one(&fleet).await;
        let executor = StubExecutor::new();
        let policy = fast_policy();

        let poller = ReadinessPoller::new(&fleet, &executor, &policy, "root", CancellationToken::new());
        let handle = poller.await_ready(&id).await.unwrap();

        assert_eq!(fleet.action_queries("101"), 4);
        assert_eq!(handle.ip_address, ip_for("101"));
    }

    #[tokio::test]
    async fn test_liveness_probe_count() {
        let fleet = StubFleet::new();
        let id = create_one(&fleet).await;
        let executor = StubExecutor::new().failing_probes(&ip_for("101"), 5);
        let policy = fast_policy();

        let poller = ReadinessPoller::new(&fleet, &executor, &policy, "root", CancellationToken::new());
        poller.await_ready(&id).await.unwrap();

        assert_eq!(executor.probes(&ip_for("101")), 6);
        assert_eq!(fleet.action_queries("101"), 1);
    }

    #[tokio::test]
    async fn test_empty_action_list_is_converged() {
        let fleet = StubFleet::new().with_actions("101", vec![vec![]]);
        let id = create_one(&fleet).await;
        let executor = StubExecutor::new();
        let policy = fast_policy();

        let poller = ReadinessPoller::new(&fleet, &executor, &policy, "root", CancellationToken::new());
        assert_eq!(poller.await_actions(&id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_errored_action_fails_by_default() {
        let fleet = StubFleet::new().with_actions(
            "101",
            vec![vec![ActionStatus::Pending], vec![ActionStatus::Errored]],
        );
        let id = create_one(&fleet).await;
        let executor = StubExecutor::new();
        let policy = fast_policy();

        let poller = ReadinessPoller::new(&fleet, &executor, &policy, "root", CancellationToken::new());
        let err = poller.await_ready(&id).await.unwrap_err();

        assert!(matches!(err, ReadinessError::ActionErrored { .. }));
        assert_eq!(fleet.action_queries("101"), 2);
        assert_eq!(executor.probes(&ip_for("101")), 0);
    }

    #[tokio::test]
    async fn test_errored_action_retried_under_compat_policy() {
        let fleet = StubFleet::new().with_actions(
            "101",
            vec![vec![ActionStatus::Errored], vec![ActionStatus::Errored]],
        );
        let id = create_one(&fleet).await;
        let executor = StubExecutor::new();
        let policy = ReadinessPolicy {
            errored_actions: ErroredActionPolicy::Retry,
            ..fast_policy()
        };

        let poller = ReadinessPoller::new(&fleet, &executor, &policy, "root", CancellationToken::new());
        poller.await_ready(&id).await.unwrap();

        assert_eq!(fleet.action_queries("101"), 3);
    }

    #[tokio::test]
    async fn test_action_polling_times_out() {
        let fleet = StubFleet::new().with_actions("101", pending(10));
        let id = create_one(&fleet).await;
        let executor = StubExecutor::new();
        let policy = ReadinessPolicy {
            max_action_polls: Some(4),
            ..fast_policy()
        };

        let poller = ReadinessPoller::new(&fleet, &executor, &policy, "root", CancellationToken::new());
        let err = poller.await_ready(&id).await.unwrap_err();

        match err {
            ReadinessError::Timeout {
                phase, attempts, ..
            } => {
                assert_eq!(phase, ReadinessPhase::Actions);
                assert_eq!(attempts, 4);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(fleet.action_queries("101"), 4);
    }

    #[tokio::test]
    async fn test_liveness_times_out() {
        let fleet = StubFleet::new();
        let id = create_one(&fleet).await;
        let executor = StubExecutor::new().failing_probes(&ip_for("101"), 100);
        let policy = ReadinessPolicy {
            max_probe_attempts: Some(3),
            ..fast_policy()
        };

        let poller = ReadinessPoller::new(&fleet, &executor, &policy, "root", CancellationToken::new());
        let err = poller.await_ready(&id).await.unwrap_err();

        assert!(matches!(
            err,
            ReadinessError::Timeout {
                phase: ReadinessPhase::Liveness,
                attempts: 3,
                ..
            }
        ));
        assert_eq!(executor.probes(&ip_for("101")), 3);
    }

    #[tokio::test]
    async fn test_waits_for_address_assignment() {
        let fleet = StubFleet::new().without_ip_for("101", 2);
        let id = create_one(&fleet).await;
        let executor = StubExecutor::new();
        let policy = fast_policy();

        let poller = ReadinessPoller::new(&fleet, &executor, &policy, "root", CancellationToken::new());
        let handle = poller.await_ready(&id).await.unwrap();

        assert_eq!(handle.ip_address, ip_for("101"));
        assert_eq!(executor.probes(&ip_for("101")), 1);
    }

    #[tokio::test]
    async fn test_cancellation_stops_polling() {
        let fleet = StubFleet::new().with_actions("101", pending(10));
        let id = create_one(&fleet).await;
        let executor = StubExecutor::new();
        let policy = fast_policy();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let poller = ReadinessPoller::new(&fleet, &executor, &policy, "root", cancel);
        let err = poller.await_ready(&id).await.unwrap_err();

        assert!(matches!(err, ReadinessError::Cancelled { .. }));
        assert_eq!(fleet.action_queries("101"), 1);
    }
}
