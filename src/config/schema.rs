//! Configuration schema definitions for elastic-fleet.
//!
//! This module defines the run configuration deserialized from the JSON
//! configuration file. Keys use kebab-case to match the file format shared
//! with the slave runtime.
//!
//! # Schema Overview
//!
//! ```text
//! RunConfig (root)
//! ├── api-key, slaves-used, slave-name     - Provider credential and fleet size
//! ├── SlaveImage                           - Droplet template (region, size, image, keys)
//! ├── simulations                          - Ordered job descriptors (opaque)
//! ├── local-ip, google-drive               - Coordinator address, delivery mode
//! ├── master-droplet-id                    - Required when google-drive is set
//! ├── ReadinessConfig                      - Polling intervals and bounds
//! ├── SshConfig                            - ssh/scp options
//! └── BundleConfig (workload, runtime)     - Remote repositories and users
//! ```

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Deserializer, Serialize};

/// Root configuration for a fleet run.
///
/// Immutable for the whole run. Components receive it by reference.
///
/// # Example
///
/// ```
/// use elastic_fleet::config::RunConfig;
///
/// let config: RunConfig = serde_json::from_str(r#"{
///     "api-key": "token",
///     "slaves-used": 2,
///     "slave-name": "slave",
///     "slave-image": {"region": "nyc3", "size": "s-1vcpu-1gb", "id": 1234, "ssh_keys": [42]},
///     "simulations": ["s1", "s2"],
///     "local-ip": "10.0.0.1",
///     "google-drive": false
/// }"#).unwrap();
///
/// assert_eq!(config.slaves_used, 2);
/// assert_eq!(config.workload.user, "log");
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct RunConfig {
    /// Provider API token.
    pub api_key: String,

    /// Number of slave instances to create.
    pub slaves_used: usize,

    /// Name given to every created instance.
    pub slave_name: String,

    /// Instance template shared by every slave.
    pub slave_image: SlaveImage,

    /// Ordered job descriptors. Opaque to the orchestrator.
    #[serde(default)]
    pub simulations: Vec<serde_json::Value>,

    /// Address slaves use to reach the coordinator.
    pub local_ip: String,

    /// Alternate delivery mode: ship the session credential and delete the
    /// coordinator instance once every slave is launched.
    #[serde(default)]
    pub google_drive: bool,

    /// Coordinator's own instance id, deleted in alternate delivery mode.
    #[serde(
        default,
        deserialize_with = "optional_string_or_number",
        skip_serializing_if = "Option::is_none"
    )]
    pub master_droplet_id: Option<String>,

    /// Base URL of the provider API.
    ///
    /// Default: `https://api.digitalocean.com`
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Maximum number of instances polled or bootstrapped concurrently.
    ///
    /// 1 keeps the run fully sequential.
    ///
    /// Default: 1
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,

    /// Readiness polling settings.
    #[serde(default)]
    pub readiness: ReadinessConfig,

    /// ssh/scp connection settings.
    #[serde(default)]
    pub ssh: SshConfig,

    /// Simulation workload bundle.
    #[serde(default = "default_workload_bundle")]
    pub workload: BundleConfig,

    /// Slave runtime bundle.
    #[serde(default = "default_runtime_bundle")]
    pub runtime: BundleConfig,

    /// Command that starts the slave runtime. Must detach from the session.
    #[serde(default = "default_start_command")]
    pub start_command: String,

    /// Local session credential shipped in alternate delivery mode.
    ///
    /// Default: `google-session.json`
    #[serde(default = "default_session_file")]
    pub session_file: PathBuf,

    /// Remote destination of the session credential.
    #[serde(default = "default_session_path")]
    pub session_path: String,
}

/// Droplet template used for every slave.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SlaveImage {
    pub region: String,
    pub size: String,
    /// Image id or slug.
    pub id: ResourceRef,
    /// SSH key ids or fingerprints installed on the instance.
    #[serde(default)]
    pub ssh_keys: Vec<ResourceRef>,
}

/// A provider resource referenced either by numeric id or by slug.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum ResourceRef {
    Id(u64),
    Slug(String),
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceRef::Id(id) => write!(f, "{}", id),
            ResourceRef::Slug(slug) => f.write_str(slug),
        }
    }
}

/// How an `errored` provider action is treated while polling.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ErroredActionPolicy {
    /// The instance is reported as not ready.
    #[default]
    Fail,
    /// Keep polling as if the action were still pending.
    Retry,
}

/// Readiness polling settings.
///
/// # Defaults
///
/// | Field | Default |
/// |-------|---------|
/// | `action-poll-secs` | 60 |
/// | `probe-interval-secs` | 30 |
/// | `max-action-polls` | 60 |
/// | `max-probe-attempts` | 40 |
/// | `errored-actions` | `fail` |
/// | `probe-command` | `ls` |
///
/// Setting either bound to `null` polls without limit.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct ReadinessConfig {
    #[serde(default = "default_action_poll_secs")]
    pub action_poll_secs: u64,

    #[serde(default = "default_probe_interval_secs")]
    pub probe_interval_secs: u64,

    #[serde(default = "default_max_action_polls")]
    pub max_action_polls: Option<u32>,

    #[serde(default = "default_max_probe_attempts")]
    pub max_probe_attempts: Option<u32>,

    #[serde(default)]
    pub errored_actions: ErroredActionPolicy,

    /// Command run over ssh to decide the host is reachable.
    #[serde(default = "default_probe_command")]
    pub probe_command: String,
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            action_poll_secs: default_action_poll_secs(),
            probe_interval_secs: default_probe_interval_secs(),
            max_action_polls: default_max_action_polls(),
            max_probe_attempts: default_max_probe_attempts(),
            errored_actions: ErroredActionPolicy::default(),
            probe_command: default_probe_command(),
        }
    }
}

fn default_action_poll_secs() -> u64 {
    60
}

fn default_probe_interval_secs() -> u64 {
    30
}

fn default_max_action_polls() -> Option<u32> {
    Some(60) // an hour at the default interval
}

fn default_max_probe_attempts() -> Option<u32> {
    Some(40)
}

fn default_probe_command() -> String {
    "ls".to_string()
}

/// ssh and scp options shared by every remote call.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct SshConfig {
    /// Private key passed with `-i`. `~` is expanded.
    pub key_path: Option<PathBuf>,

    #[serde(default = "default_ssh_port")]
    pub port: u16,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Freshly created droplets have unknown host keys, so checking is off
    /// unless explicitly enabled.
    #[serde(default)]
    pub strict_host_key_checking: bool,

    /// Upper bound for a single remote command or copy.
    pub command_timeout_secs: Option<u64>,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            key_path: None,
            port: default_ssh_port(),
            connect_timeout_secs: default_connect_timeout(),
            strict_host_key_checking: false,
            command_timeout_secs: None,
        }
    }
}

fn default_ssh_port() -> u16 {
    22
}

fn default_connect_timeout() -> u64 {
    30
}

/// A repository cloned onto each slave and the user that owns it.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct BundleConfig {
    /// Remote user the bundle is cloned and configured as.
    pub user: String,

    /// Repository URL, cloned with `--recursive`.
    pub repo: String,

    /// Remote destination of the generated descriptor.
    pub config_path: String,

    /// Extra shell run after cloning (e.g. fetching LFS objects).
    #[serde(default)]
    pub post_clone: Option<String>,
}

fn default_workload_bundle() -> BundleConfig {
    BundleConfig {
        user: "log".to_string(),
        repo: "https://github.com/frankyn/ElasticPowerTAC-Simulation.git".to_string(),
        config_path: "~/ElasticPowerTAC-Simulation/config.json".to_string(),
        post_clone: Some(
            "cd ElasticPowerTAC-Simulation/ElasticPowerTAC-Simulation-Config; git lfs pull"
                .to_string(),
        ),
    }
}

fn default_runtime_bundle() -> BundleConfig {
    BundleConfig {
        user: "root".to_string(),
        repo: "https://github.com/frankyn/ElasticPowerTAC-Slave.git".to_string(),
        config_path: "~/ElasticPowerTAC-Slave/config.json".to_string(),
        post_clone: None,
    }
}

fn default_start_command() -> String {
    "cd ~/ElasticPowerTAC-Slave/; python run.py < /dev/null > /tmp/slave-log 2>&1 &".to_string()
}

fn default_session_file() -> PathBuf {
    PathBuf::from("google-session.json")
}

fn default_session_path() -> String {
    "~/ElasticPowerTAC-Slave/google-session.json".to_string()
}

fn default_api_url() -> String {
    "https://api.digitalocean.com".to_string()
}

fn default_max_parallel() -> usize {
    1
}

/// Accepts `"999"` as well as `999` for id fields.
fn optional_string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(u64),
        Text(String),
    }

    Ok(Option::<Raw>::deserialize(deserializer)?.map(|raw| match raw {
        Raw::Number(n) => n.to_string(),
        Raw::Text(s) => s,
    }))
}
