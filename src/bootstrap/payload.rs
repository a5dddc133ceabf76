//! Per-instance bootstrap payload.
//!
//! Each slave receives two JSON descriptors:
//!
//! - the **shard descriptor** read by the simulation workload:
//!   `{"master-ip", "simulations", "google-drive"}`
//! - the **identity descriptor** read by the slave runtime:
//!   `{"droplet_id", "api-key", "google-drive"}`
//!
//! Payloads are staged in a temporary directory owned by the instance, so
//! concurrent bootstraps never share a file.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tempfile::TempDir;

use crate::config::RunConfig;
use crate::fleet::InstanceHandle;

/// Job shard handed to the simulation workload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShardDescriptor {
    #[serde(rename = "master-ip")]
    pub master_ip: String,
    pub simulations: Vec<Value>,
    #[serde(rename = "google-drive")]
    pub google_drive: bool,
}

/// Identity handed to the slave runtime.
///
/// `droplet_id` stays numeric when the provider id is numeric, which is
/// what the runtime expects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityDescriptor {
    pub droplet_id: Value,
    #[serde(rename = "api-key")]
    pub api_key: String,
    #[serde(rename = "google-drive")]
    pub google_drive: bool,
}

/// Both descriptors for one instance.
#[derive(Debug, Clone, PartialEq)]
pub struct SlaveBootstrapPayload {
    pub shard: ShardDescriptor,
    pub identity: IdentityDescriptor,
}

impl SlaveBootstrapPayload {
    pub fn build(instance: &InstanceHandle, shard: &[Value], config: &RunConfig) -> Self {
        let droplet_id = instance
            .id
            .parse::<u64>()
            .map(Value::from)
            .unwrap_or_else(|_| Value::String(instance.id.clone()));

        Self {
            shard: ShardDescriptor {
                master_ip: config.local_ip.clone(),
                simulations: shard.to_vec(),
                google_drive: config.google_drive,
            },
            identity: IdentityDescriptor {
                droplet_id,
                api_key: config.api_key.clone(),
                google_drive: config.google_drive,
            },
        }
    }

    /// Serializes both descriptors.
    pub fn encode(&self) -> serde_json::Result<EncodedPayload> {
        Ok(EncodedPayload {
            shard: serde_json::to_vec(&self.shard)?,
            identity: serde_json::to_vec(&self.identity)?,
        })
    }
}

/// Serialized descriptors, ready to be staged.
#[derive(Debug, Clone)]
pub struct EncodedPayload {
    pub shard: Vec<u8>,
    pub identity: Vec<u8>,
}

impl EncodedPayload {
    /// Writes both descriptors into a fresh directory for `instance_id`.
    ///
    /// The directory is removed when the returned value is dropped.
    pub fn stage(&self, instance_id: &str) -> std::io::Result<StagedPayload> {
        let dir = tempfile::Builder::new()
            .prefix(&format!("slave-{}-", instance_id))
            .tempdir()?;

        let shard_path = dir.path().join("simulation.config.json");
        let identity_path = dir.path().join("slave.config.json");
        std::fs::write(&shard_path, &self.shard)?;
        std::fs::write(&identity_path, &self.identity)?;

        Ok(StagedPayload {
            _dir: dir,
            shard_path,
            identity_path,
        })
    }
}

/// Descriptors written to local disk for transfer.
pub struct StagedPayload {
    _dir: TempDir,
    shard_path: PathBuf,
    identity_path: PathBuf,
}

impl StagedPayload {
    pub fn shard_path(&self) -> &Path {
        &self.shard_path
    }

    pub fn identity_path(&self) -> &Path {
        &self.identity_path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::test_config;
    use serde_json::json;

    fn instance(id: &str) -> InstanceHandle {
        InstanceHandle {
            id: id.to_string(),
            ip_address: "192.0.2.1".to_string(),
        }
    }

    #[test]
    fn test_build_payload() {
        let config = test_config(2, &["s1", "s2", "s3", "s4"], "");
        let shard = &config.simulations[2..4];

        let payload = SlaveBootstrapPayload::build(&instance("3164494"), shard, &config);

        assert_eq!(payload.shard.master_ip, "10.0.0.1");
        assert_eq!(payload.shard.simulations, vec![json!("s3"), json!("s4")]);
        assert!(!payload.shard.google_drive);
        assert_eq!(payload.identity.droplet_id, json!(3164494));
        assert_eq!(payload.identity.api_key, "secret-token");
    }

    #[test]
    fn test_wire_format() {
        let config = test_config(
            1,
            &["s1"],
            r#", "google-drive": true, "master-droplet-id": "999""#,
        );
        let payload =
            SlaveBootstrapPayload::build(&instance("abc-1"), &config.simulations, &config);
        let encoded = payload.encode().unwrap();

        let shard: Value = serde_json::from_slice(&encoded.shard).unwrap();
        assert_eq!(
            shard,
            json!({"master-ip": "10.0.0.1", "simulations": ["s1"], "google-drive": true})
        );

        let identity: Value = serde_json::from_slice(&encoded.identity).unwrap();
        assert_eq!(
            identity,
            json!({"droplet_id": "abc-1", "api-key": "secret-token", "google-drive": true})
        );
    }

    #[test]
    fn test_staging_is_per_instance() {
        let config = test_config(2, &["s1", "s2"], "");
        let a = SlaveBootstrapPayload::build(&instance("101"), &config.simulations[..1], &config)
            .encode()
            .unwrap()
            .stage("101")
            .unwrap();
        let b = SlaveBootstrapPayload::build(&instance("102"), &config.simulations[1..], &config)
            .encode()
            .unwrap()
            .stage("102")
            .unwrap();

        assert_ne!(a.shard_path(), b.shard_path());
        let a_shard: ShardDescriptor =
            serde_json::from_str(&std::fs::read_to_string(a.shard_path()).unwrap()).unwrap();
        let b_shard: ShardDescriptor =
            serde_json::from_str(&std::fs::read_to_string(b.shard_path()).unwrap()).unwrap();
        assert_eq!(a_shard.simulations, vec![json!("s1")]);
        assert_eq!(b_shard.simulations, vec![json!("s2")]);
    }

    #[test]
    fn test_staged_files_removed_on_drop() {
        let config = test_config(1, &["s1"], "");
        let staged = SlaveBootstrapPayload::build(&instance("101"), &config.simulations, &config)
            .encode()
            .unwrap()
            .stage("101")
            .unwrap();
        let path = staged.identity_path().to_path_buf();
        assert!(path.exists());

        drop(staged);
        assert!(!path.exists());
    }
}
