//! Configuration loading and validation for elastic-fleet.
//!
//! The run configuration is a JSON file (by default `config.json` in the
//! working directory) read once at startup. The loaded [`RunConfig`] is
//! immutable and handed by reference to every component.

pub mod schema;

pub use schema::*;

use std::path::{Path, PathBuf};

/// Errors raised while loading or validating the run configuration.
///
/// All of these are fatal and surface before any provider call is made.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    /// `slaves-used` is zero, so there is nothing to partition over.
    #[error("slaves-used must be at least 1")]
    NoSlaves,

    #[error("google-drive is enabled but master-droplet-id is not set")]
    MissingMasterDropletId,

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Loads and validates the run configuration from a JSON file.
///
/// # Errors
///
/// Returns an error if:
/// - The file cannot be read
/// - The file is not valid JSON or doesn't match the schema
/// - The configuration fails [`RunConfig::validate`]
///
/// # Example
///
/// ```no_run
/// use elastic_fleet::config::load_config;
/// use std::path::Path;
///
/// let config = load_config(Path::new("config.json"))?;
/// println!("Slaves: {}", config.slaves_used);
/// # Ok::<(), elastic_fleet::config::ConfigError>(())
/// ```
pub fn load_config(path: &Path) -> Result<RunConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    load_config_str(&content)
}

/// Loads and validates the run configuration from a JSON string.
pub fn load_config_str(content: &str) -> Result<RunConfig, ConfigError> {
    let config: RunConfig = serde_json::from_str(content)?;
    config.validate()?;
    Ok(config)
}

impl RunConfig {
    /// Checks invariants serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.slaves_used == 0 {
            return Err(ConfigError::NoSlaves);
        }
        if self.google_drive && self.master_droplet_id.is_none() {
            return Err(ConfigError::MissingMasterDropletId);
        }
        if self.api_key.trim().is_empty() {
            return Err(ConfigError::Invalid("api-key must not be empty".into()));
        }
        if self.local_ip.trim().is_empty() {
            return Err(ConfigError::Invalid("local-ip must not be empty".into()));
        }
        if self.workload.user.is_empty() || self.runtime.user.is_empty() {
            return Err(ConfigError::Invalid("bundle users must not be empty".into()));
        }
        Ok(())
    }

    /// Concurrency limit for readiness polling and bootstrap, at least 1.
    pub fn parallelism(&self) -> usize {
        self.max_parallel.max(1)
    }

    /// Local session credential path with `~` expanded.
    pub fn session_file_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.session_file.to_string_lossy()).into_owned())
    }
}
