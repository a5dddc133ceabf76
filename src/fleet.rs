//! Fleet client abstraction over the cloud provider's instance lifecycle API.
//!
//! The orchestrator only talks to the provider through [`FleetClient`], so
//! the provisioning and readiness logic can run against any backend (and
//! against in-memory stubs in tests).
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │                 FleetClient                   │
//! │                                               │
//! │  create_instance(request) ──► CreateResponse  │
//! │  list_instances()         ──► [InstanceInfo]  │
//! │  list_pending_actions(id) ──► [ActionStatus]  │
//! │  delete_instance(id)                          │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! # Built-in Clients
//!
//! | Client | Module | Description |
//! |--------|--------|-------------|
//! | DigitalOcean | [`digitalocean`] | DigitalOcean API v2 over HTTPS |

pub mod digitalocean;

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::{ResourceRef, RunConfig};

/// Result type for fleet operations.
pub type FleetResult<T> = Result<T, FleetError>;

/// Errors that can occur while talking to the provider API.
#[derive(Debug, thiserror::Error)]
pub enum FleetError {
    /// The request could not be sent or the response could not be read.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The provider answered with a status the operation does not accept.
    #[error("{operation} returned status {status}: {body}")]
    Status {
        operation: &'static str,
        status: u16,
        body: String,
    },

    /// The response body didn't have the expected shape.
    #[error("Malformed {operation} response: {message}")]
    Decode {
        operation: &'static str,
        message: String,
    },
}

/// Parameters for creating one instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CreateInstanceRequest {
    pub name: String,
    pub region: String,
    pub size: String,
    pub image: ResourceRef,
    pub ssh_keys: Vec<ResourceRef>,
}

impl CreateInstanceRequest {
    /// Builds the request every slave is created with.
    pub fn from_config(config: &RunConfig) -> Self {
        Self {
            name: config.slave_name.clone(),
            region: config.slave_image.region.clone(),
            size: config.slave_image.size.clone(),
            image: config.slave_image.id.clone(),
            ssh_keys: config.slave_image.ssh_keys.clone(),
        }
    }
}

/// Raw outcome of a create call.
///
/// The status is returned rather than mapped to an error so that callers
/// decide which codes are acceptable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateResponse {
    pub status: u16,
    pub instance_id: Option<String>,
}

impl CreateResponse {
    /// Status the provider uses for an accepted creation.
    pub const ACCEPTED: u16 = 202;

    pub fn accepted(&self) -> bool {
        self.status == Self::ACCEPTED
    }
}

/// An instance as reported by [`FleetClient::list_instances`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceInfo {
    pub id: String,
    /// Unset until the provider has assigned a network.
    pub public_ipv4: Option<String>,
}

/// Status of one in-flight provider action on an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionStatus {
    #[serde(rename = "in-progress", alias = "pending")]
    Pending,
    Completed,
    Errored,
    /// Any status this client doesn't know; treated like `Pending`.
    #[serde(other)]
    Unknown,
}

/// A ready instance: provider actions are complete and the host answers
/// the liveness probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstanceHandle {
    pub id: String,
    pub ip_address: String,
}

impl fmt::Display for InstanceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.id, self.ip_address)
    }
}

/// Typed façade over the provider's instance lifecycle API.
///
/// Implementations must be `Send + Sync` so one client can serve
/// concurrent readiness polls.
#[async_trait]
pub trait FleetClient: Send + Sync {
    /// Requests creation of one instance.
    ///
    /// A non-accepted status is returned in [`CreateResponse`], not as an
    /// error. Errors are reserved for transport and decoding failures.
    async fn create_instance(&self, request: &CreateInstanceRequest)
    -> FleetResult<CreateResponse>;

    /// Lists all instances visible to the credential.
    async fn list_instances(&self) -> FleetResult<Vec<InstanceInfo>>;

    /// Fetches the statuses of actions recorded for an instance.
    async fn list_pending_actions(&self, instance_id: &str) -> FleetResult<Vec<ActionStatus>>;

    /// Deletes an instance.
    async fn delete_instance(&self, instance_id: &str) -> FleetResult<()>;

    /// Client name for logging.
    fn name(&self) -> &'static str;
}
