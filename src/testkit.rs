//! In-memory collaborators for unit tests.
//!
//! [`StubFleet`] scripts provider responses and counts calls;
//! [`StubExecutor`] scripts probe and command failures and records every
//! command and upload (including the uploaded file's contents);
//! [`RecordingReporter`] keeps the sequence of reporter events.

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::bootstrap::BootstrapError;
use crate::config::{RunConfig, load_config_str};
use crate::fleet::{
    ActionStatus, CreateInstanceRequest, CreateResponse, FleetClient, FleetResult, InstanceHandle,
    InstanceInfo,
};
use crate::orchestrator::RunReport;
use crate::partition::PlanSummary;
use crate::provision::{ProvisionReport, UnreadyInstance};
use crate::readiness::ReadinessPolicy;
use crate::remote::{ExecResult, RemoteExecutor, RemoteResult, RemoteTarget};
use crate::report::Reporter;

/// A config with zero polling intervals and the given overrides merged in.
pub fn test_config(slaves: usize, simulations: &[&str], extra: &str) -> RunConfig {
    let sims = serde_json::to_string(simulations).unwrap();
    load_config_str(&format!(
        r#"{{
            "api-key": "secret-token",
            "slaves-used": {slaves},
            "slave-name": "slave",
            "slave-image": {{"region": "nyc3", "size": "s-1vcpu-1gb", "id": 1234, "ssh_keys": [1]}},
            "simulations": {sims},
            "local-ip": "10.0.0.1",
            "readiness": {{"action-poll-secs": 0, "probe-interval-secs": 0}}
            {extra}
        }}"#
    ))
    .unwrap()
}

pub fn fast_policy() -> ReadinessPolicy {
    ReadinessPolicy {
        action_poll_interval: Duration::ZERO,
        probe_interval: Duration::ZERO,
        ..ReadinessPolicy::default()
    }
}

#[derive(Default)]
struct FleetState {
    next_id: u64,
    create_statuses: VecDeque<u16>,
    created: Vec<String>,
    create_calls: usize,
    actions: HashMap<String, VecDeque<Vec<ActionStatus>>>,
    action_queries: HashMap<String, usize>,
    no_ip: HashMap<String, usize>,
    reverse_listing: bool,
    deleted: Vec<String>,
}

/// Scriptable [`FleetClient`].
///
/// Instances get ids `101`, `102`, ... and ips `192.0.2.<n>` in creation
/// order. Actions default to a single `completed` entry once scripted
/// rounds run out.
pub struct StubFleet {
    state: Mutex<FleetState>,
}

impl StubFleet {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(FleetState {
                next_id: 101,
                ..Default::default()
            }),
        }
    }

    /// Statuses returned by successive create calls; 202 afterwards.
    pub fn with_create_statuses(self, statuses: &[u16]) -> Self {
        self.state.lock().unwrap().create_statuses = statuses.iter().copied().collect();
        self
    }

    /// Action lists returned by successive polls of `id`.
    pub fn with_actions(self, id: &str, rounds: Vec<Vec<ActionStatus>>) -> Self {
        self.state
            .lock()
            .unwrap()
            .actions
            .insert(id.to_string(), rounds.into());
        self
    }

    /// `id` is listed without an address for the first `rounds` listings.
    pub fn without_ip_for(self, id: &str, rounds: usize) -> Self {
        self.state.lock().unwrap().no_ip.insert(id.to_string(), rounds);
        self
    }

    /// List instances newest first.
    pub fn with_reverse_listing(self) -> Self {
        self.state.lock().unwrap().reverse_listing = true;
        self
    }

    pub fn create_calls(&self) -> usize {
        self.state.lock().unwrap().create_calls
    }

    pub fn action_queries(&self, id: &str) -> usize {
        *self.state.lock().unwrap().action_queries.get(id).unwrap_or(&0)
    }

    pub fn deleted(&self) -> Vec<String> {
        self.state.lock().unwrap().deleted.clone()
    }
}

pub fn ip_for(id: &str) -> String {
    let n: u64 = id.parse().unwrap();
    format!("192.0.2.{}", n - 100)
}

#[async_trait]
impl FleetClient for StubFleet {
    async fn create_instance(
        &self,
        _request: &CreateInstanceRequest,
    ) -> FleetResult<CreateResponse> {
        let mut state = self.state.lock().unwrap();
        state.create_calls += 1;
        let status = state.create_statuses.pop_front().unwrap_or(202);
        if status != 202 {
            return Ok(CreateResponse {
                status,
                instance_id: None,
            });
        }
        let id = state.next_id.to_string();
        state.next_id += 1;
        state.created.push(id.clone());
        Ok(CreateResponse {
            status,
            instance_id: Some(id),
        })
    }

    async fn list_instances(&self) -> FleetResult<Vec<InstanceInfo>> {
        let mut state = self.state.lock().unwrap();
        let mut ids = state.created.clone();
        if state.reverse_listing {
            ids.reverse();
        }
        Ok(ids
            .into_iter()
            .map(|id| {
                let hidden = state.no_ip.get_mut(&id).filter(|n| **n > 0);
                let public_ipv4 = match hidden {
                    Some(n) => {
                        *n -= 1;
                        None
                    }
                    None => Some(ip_for(&id)),
                };
                InstanceInfo { id, public_ipv4 }
            })
            .collect())
    }

    async fn list_pending_actions(&self, instance_id: &str) -> FleetResult<Vec<ActionStatus>> {
        let mut state = self.state.lock().unwrap();
        *state
            .action_queries
            .entry(instance_id.to_string())
            .or_default() += 1;
        let scripted = state
            .actions
            .get_mut(instance_id)
            .and_then(|rounds| rounds.pop_front());
        Ok(scripted.unwrap_or_else(|| vec![ActionStatus::Completed]))
    }

    async fn delete_instance(&self, instance_id: &str) -> FleetResult<()> {
        self.state
            .lock()
            .unwrap()
            .deleted
            .push(instance_id.to_string());
        Ok(())
    }

    fn name(&self) -> &'static str {
        "stub"
    }
}

/// A command or upload observed by [`StubExecutor`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteCall {
    Exec {
        target: String,
        command: String,
    },
    Upload {
        target: String,
        remote_path: String,
        contents: String,
    },
}

#[derive(Default)]
struct ExecutorState {
    probe_failures: HashMap<String, usize>,
    probes: HashMap<String, usize>,
    failing: Vec<(String, String)>,
    calls: Vec<RemoteCall>,
}

/// Scriptable [`RemoteExecutor`].
pub struct StubExecutor {
    probe_command: String,
    state: Mutex<ExecutorState>,
}

impl StubExecutor {
    pub fn new() -> Self {
        Self {
            probe_command: "ls".to_string(),
            state: Mutex::new(ExecutorState::default()),
        }
    }

    /// The probe on `host` exits 255 the first `times` attempts.
    pub fn failing_probes(self, host: &str, times: usize) -> Self {
        self.state
            .lock()
            .unwrap()
            .probe_failures
            .insert(host.to_string(), times);
        self
    }

    /// Any command or upload on `host` whose text contains `needle` fails.
    pub fn failing_on(self, host: &str, needle: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .failing
            .push((host.to_string(), needle.to_string()));
        self
    }

    pub fn probes(&self, host: &str) -> usize {
        *self.state.lock().unwrap().probes.get(host).unwrap_or(&0)
    }

    /// Calls other than liveness probes, in order.
    pub fn calls(&self) -> Vec<RemoteCall> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn calls_to(&self, host: &str) -> Vec<RemoteCall> {
        let suffix = format!("@{}", host);
        self.calls()
            .into_iter()
            .filter(|call| match call {
                RemoteCall::Exec { target, .. } | RemoteCall::Upload { target, .. } => {
                    target.ends_with(&suffix)
                }
            })
            .collect()
    }

    fn should_fail(state: &ExecutorState, host: &str, text: &str) -> bool {
        state
            .failing
            .iter()
            .any(|(h, needle)| h == host && text.contains(needle.as_str()))
    }
}

fn exit(code: i32) -> ExecResult {
    ExecResult {
        exit_code: code,
        stdout: String::new(),
        stderr: if code == 0 {
            String::new()
        } else {
            "stub failure".to_string()
        },
        duration: Duration::ZERO,
    }
}

#[async_trait]
impl RemoteExecutor for StubExecutor {
    async fn exec(&self, target: &RemoteTarget, command: &str) -> RemoteResult<ExecResult> {
        let mut state = self.state.lock().unwrap();

        if command == self.probe_command {
            *state.probes.entry(target.host.clone()).or_default() += 1;
            let remaining = state.probe_failures.get_mut(&target.host).filter(|n| **n > 0);
            return Ok(match remaining {
                Some(n) => {
                    *n -= 1;
                    exit(255)
                }
                None => exit(0),
            });
        }

        state.calls.push(RemoteCall::Exec {
            target: target.to_string(),
            command: command.to_string(),
        });
        let code = if Self::should_fail(&state, &target.host, command) {
            1
        } else {
            0
        };
        Ok(exit(code))
    }

    async fn upload(
        &self,
        target: &RemoteTarget,
        local: &Path,
        remote_path: &str,
    ) -> RemoteResult<()> {
        let contents = std::fs::read_to_string(local)?;
        let mut state = self.state.lock().unwrap();
        state.calls.push(RemoteCall::Upload {
            target: target.to_string(),
            remote_path: remote_path.to_string(),
            contents,
        });
        if Self::should_fail(&state, &target.host, remote_path) {
            return Err(crate::remote::RemoteError::UploadFailed {
                target: target.to_string(),
                local: local.display().to_string(),
                remote: remote_path.to_string(),
                message: "stub failure".to_string(),
            });
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "stub"
    }
}

/// Reporter that records a one-line summary of every event.
pub struct RecordingReporter {
    events: Mutex<Vec<String>>,
    cancel_on_bootstrap: Option<CancellationToken>,
}

impl RecordingReporter {
    pub fn new() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            cancel_on_bootstrap: None,
        }
    }

    /// Cancels `token` as soon as the first bootstrap completes.
    pub fn cancelling_after_first_bootstrap(mut self, token: CancellationToken) -> Self {
        self.cancel_on_bootstrap = Some(token);
        self
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    fn record(&self, event: String) {
        self.events.lock().unwrap().push(event);
    }
}

#[async_trait]
impl Reporter for RecordingReporter {
    async fn on_creation_started(&self, count: usize) {
        self.record(format!("creation-started {}", count));
    }

    async fn on_instance_created(&self, index: usize, id: &str) {
        self.record(format!("created {} {}", index, id));
    }

    async fn on_instance_ready(&self, instance: &InstanceHandle) {
        self.record(format!("ready {}", instance.id));
    }

    async fn on_instance_unready(&self, instance: &UnreadyInstance) {
        self.record(format!("unready {}", instance.id));
    }

    async fn on_fleet_ready(&self, report: &ProvisionReport) {
        self.record(format!(
            "fleet-ready {}/{}",
            report.ready.len(),
            report.created()
        ));
    }

    async fn on_plan(&self, plan: &PlanSummary) {
        self.record(format!(
            "plan {}x{} dropped {}",
            plan.shards, plan.shard_size, plan.dropped
        ));
    }

    async fn on_bootstrap_complete(
        &self,
        instance: &InstanceHandle,
        result: &Result<(), BootstrapError>,
    ) {
        let outcome = match result {
            Ok(()) => "ok".to_string(),
            Err(e) => format!("failed {}", e.step()),
        };
        self.record(format!("bootstrapped {} {}", instance.id, outcome));
        if let Some(token) = &self.cancel_on_bootstrap {
            token.cancel();
        }
    }

    async fn on_run_complete(&self, report: &RunReport) {
        self.record(format!("run-complete exit {}", report.exit_code()));
    }
}
