//! DigitalOcean API v2 fleet client.
//!
//! Droplets are created, listed, inspected and deleted through the public
//! REST API using a bearer token.
//!
//! | Operation | Endpoint |
//! |-----------|----------|
//! | create | `POST /v2/droplets` |
//! | list | `GET /v2/droplets` (paginated) |
//! | actions | `GET /v2/droplets/{id}/actions` |
//! | delete | `DELETE /v2/droplets/{id}` |

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use super::{
    ActionStatus, CreateInstanceRequest, CreateResponse, FleetClient, FleetError, FleetResult,
    InstanceInfo,
};

const USER_AGENT: &str = concat!("elastic-fleet/", env!("CARGO_PKG_VERSION"));
const PAGE_SIZE: usize = 200;

/// Fleet client backed by the DigitalOcean API.
pub struct DigitalOceanClient {
    client: Client,
    base_url: String,
    token: String,
}

impl DigitalOceanClient {
    /// Creates a client for the given API base URL and token.
    ///
    /// # Example
    ///
    /// ```
    /// use elastic_fleet::fleet::digitalocean::DigitalOceanClient;
    ///
    /// let client = DigitalOceanClient::new("https://api.digitalocean.com", "token");
    /// ```
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn get(&self, url: &str) -> reqwest::RequestBuilder {
        self.client
            .get(url)
            .bearer_auth(&self.token)
            .header("User-Agent", USER_AGENT)
    }
}

#[derive(Debug, Deserialize)]
struct CreateBody {
    droplet: Option<DropletRef>,
}

#[derive(Debug, Deserialize)]
struct DropletRef {
    id: u64,
}

#[derive(Debug, Deserialize)]
struct DropletList {
    #[serde(default)]
    droplets: Vec<Droplet>,
    #[serde(default)]
    links: Links,
}

#[derive(Debug, Default, Deserialize)]
struct Links {
    #[serde(default)]
    pages: Pages,
}

#[derive(Debug, Default, Deserialize)]
struct Pages {
    next: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Droplet {
    id: u64,
    #[serde(default)]
    networks: Networks,
}

#[derive(Debug, Default, Deserialize)]
struct Networks {
    #[serde(default)]
    v4: Vec<NetworkV4>,
}

#[derive(Debug, Deserialize)]
struct NetworkV4 {
    ip_address: String,
    #[serde(rename = "type")]
    kind: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ActionList {
    #[serde(default)]
    actions: Vec<Action>,
}

#[derive(Debug, Deserialize)]
struct Action {
    status: ActionStatus,
}

impl From<Droplet> for InstanceInfo {
    fn from(droplet: Droplet) -> Self {
        // Prefer the public interface, fall back to whatever is listed first.
        let public_ipv4 = droplet
            .networks
            .v4
            .iter()
            .find(|n| n.kind.as_deref() == Some("public"))
            .or_else(|| droplet.networks.v4.first())
            .map(|n| n.ip_address.clone());

        InstanceInfo {
            id: droplet.id.to_string(),
            public_ipv4,
        }
    }
}

async fn error_for_status(
    operation: &'static str,
    response: reqwest::Response,
) -> FleetResult<reqwest::Response> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    Err(FleetError::Status {
        operation,
        status,
        body,
    })
}

#[async_trait]
impl FleetClient for DigitalOceanClient {
    async fn create_instance(
        &self,
        request: &CreateInstanceRequest,
    ) -> FleetResult<CreateResponse> {
        let response = self
            .client
            .post(self.url("/v2/droplets"))
            .bearer_auth(&self.token)
            .header("User-Agent", USER_AGENT)
            .json(request)
            .send()
            .await?;

        let status = response.status().as_u16();
        let text = response.text().await?;
        debug!("create droplet returned {}: {}", status, text);

        let instance_id = serde_json::from_str::<CreateBody>(&text)
            .ok()
            .and_then(|body| body.droplet)
            .map(|droplet| droplet.id.to_string());

        Ok(CreateResponse {
            status,
            instance_id,
        })
    }

    async fn list_instances(&self) -> FleetResult<Vec<InstanceInfo>> {
        let mut instances = Vec::new();
        let mut next = Some(self.url(&format!("/v2/droplets?per_page={}", PAGE_SIZE)));

        while let Some(url) = next {
            let response = self.get(&url).send().await?;
            let page: DropletList = error_for_status("list droplets", response)
                .await?
                .json()
                .await
                .map_err(|e| FleetError::Decode {
                    operation: "list droplets",
                    message: e.to_string(),
                })?;

            instances.extend(page.droplets.into_iter().map(InstanceInfo::from));
            next = page.links.pages.next;
        }

        Ok(instances)
    }

    async fn list_pending_actions(&self, instance_id: &str) -> FleetResult<Vec<ActionStatus>> {
        let url = self.url(&format!("/v2/droplets/{}/actions", instance_id));
        let response = self.get(&url).send().await?;
        let list: ActionList = error_for_status("list droplet actions", response)
            .await?
            .json()
            .await
            .map_err(|e| FleetError::Decode {
                operation: "list droplet actions",
                message: e.to_string(),
            })?;

        Ok(list.actions.into_iter().map(|a| a.status).collect())
    }

    async fn delete_instance(&self, instance_id: &str) -> FleetResult<()> {
        let response = self
            .client
            .delete(self.url(&format!("/v2/droplets/{}", instance_id)))
            .bearer_auth(&self.token)
            .header("User-Agent", USER_AGENT)
            .send()
            .await?;

        error_for_status("delete droplet", response).await?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "digitalocean"
    }
}
