//! elastic-fleet: one-shot provisioning of a simulation slave fleet.
//!
//! This crate creates a fleet of cloud instances ("slaves"), splits an
//! ordered list of simulation jobs evenly across them, bootstraps each
//! slave with its shard, and launches the slave runtime unattended.
//!
//! # Architecture
//!
//! The main components are:
//!
//! - **Fleet**: Cloud provider client (DigitalOcean)
//! - **Remote**: Command execution and file copy on slaves (ssh/scp)
//! - **Readiness**: Provider action and liveness polling
//! - **Provision**: Ordered creation of the fleet
//! - **Partition**: Contiguous, equal-size job shards
//! - **Bootstrap**: Per-slave payload, transfers and launch
//! - **Orchestrator**: Ties the phases together and produces a report
//!
//! # Example
//!
//! ```no_run
//! use elastic_fleet::config::load_config;
//! use elastic_fleet::fleet::digitalocean::DigitalOceanClient;
//! use elastic_fleet::orchestrator::Orchestrator;
//! use elastic_fleet::remote::ssh::SshExecutor;
//! use elastic_fleet::report::NullReporter;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = load_config(std::path::Path::new("config.json"))?;
//!     let fleet = DigitalOceanClient::new(&config.api_url, &config.api_key);
//!     let executor = SshExecutor::new(&config.ssh);
//!
//!     let report = Orchestrator::new(config, fleet, executor, NullReporter)
//!         .run()
//!         .await?;
//!     println!("{} slaves launched", report.bootstrapped.len());
//!     Ok(())
//! }
//! ```

pub mod bootstrap;
pub mod config;
pub mod fleet;
pub mod orchestrator;
pub mod partition;
pub mod provision;
pub mod readiness;
pub mod remote;
pub mod report;

#[cfg(test)]
mod testkit;

// Re-export commonly used types
pub use config::{RunConfig, load_config};
pub use fleet::{FleetClient, InstanceHandle};
pub use orchestrator::{Orchestrator, RunError, RunReport};
pub use partition::{PartitionPlan, partition};
pub use remote::RemoteExecutor;
pub use report::Reporter;
