//! Configuration types for VaultS3
//!
//! `VaultConfig` is loaded from a TOML file overlaid with `VAULTS3_*`
//! environment variables via the `config` crate, mirroring the teacher's
//! layered `Config` shape.

use crate::types::ErasureConfig;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration for a VaultS3 node
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VaultConfig {
    pub node: NodeConfig,
    pub storage: StorageConfig,
    pub network: NetworkConfig,
    pub cluster: ClusterConfig,
    pub replication: ReplicationConfig,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            node: NodeConfig::default(),
            storage: StorageConfig::default(),
            network: NetworkConfig::default(),
            cluster: ClusterConfig::default(),
            replication: ReplicationConfig::default(),
        }
    }
}

impl VaultConfig {
    /// Load configuration from an optional TOML file path, overlaid with
    /// `VAULTS3_*` environment variables (e.g. `VAULTS3_NODE__NAME`).
    pub fn load(path: Option<&std::path::Path>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder()
            .add_source(config::Config::try_from(&Self::default())?);

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(false));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("VAULTS3")
                .separator("__")
                .try_parsing(true),
        );

        builder.build()?.try_deserialize()
    }
}

/// Node identity configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Node name (human-readable identifier, used in the hash ring)
    pub name: String,
    /// Data directory for objects and embedded metadata
    pub data_dir: PathBuf,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            name: "vaults3-node".to_string(),
            data_dir: PathBuf::from("/var/lib/vaults3"),
        }
    }
}

/// Storage engine chain configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Extra data directories used as auxiliary erasure-coding backends
    pub aux_dirs: Vec<PathBuf>,
    /// Enable the gzip compression decorator
    pub compression_enabled: bool,
    /// Enable the AES-256-GCM static-key encryption decorator
    pub encryption_enabled: bool,
    /// Use the KMS-backed encryption variant instead of a static key
    pub kms_enabled: bool,
    /// Enable the erasure-coding decorator
    pub erasure_enabled: bool,
    /// Default erasure coding configuration
    pub default_ec: ErasureConfig,
    /// Erasure-coding block size threshold: objects smaller than this
    /// bypass EC and go straight to the inner engine
    pub ec_block_size: u64,
    /// Maximum number of bytes buffered in memory for compression/
    /// encryption/erasure coding of a single object
    pub max_inline_object_size: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            aux_dirs: Vec::new(),
            compression_enabled: true,
            encryption_enabled: false,
            kms_enabled: false,
            erasure_enabled: false,
            default_ec: ErasureConfig::EC_4_2,
            ec_block_size: 4 * 1024 * 1024,
            max_inline_object_size: 1024 * 1024 * 1024,
        }
    }
}

/// Network configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Address for the S3/cluster-internal HTTP API
    pub listen: SocketAddr,
    /// This node's externally reachable API address, used by peers
    pub advertise_addr: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:9000".parse().unwrap(),
            advertise_addr: "http://127.0.0.1:9000".to_string(),
        }
    }
}

/// Cluster placement and failure-detection configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClusterConfig {
    pub name: String,
    /// Raft data directory (log + snapshots)
    pub raft_data_dir: PathBuf,
    pub replica_count: usize,
    pub read_quorum: usize,
    pub write_quorum: usize,
    pub virtual_nodes: usize,
    #[serde(with = "duration_secs")]
    pub probe_interval: Duration,
    pub suspect_after: u32,
    pub down_after: u32,
    pub rebalance_batch_size: usize,
    pub rebalance_bandwidth_mb_s: u64,
    #[serde(with = "duration_secs")]
    pub heal_interval: Duration,
    #[serde(with = "duration_secs")]
    pub shutdown_timeout: Duration,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            name: "vaults3".to_string(),
            raft_data_dir: PathBuf::from("/var/lib/vaults3/raft"),
            replica_count: 3,
            read_quorum: 2,
            write_quorum: 2,
            virtual_nodes: 128,
            probe_interval: Duration::from_secs(5),
            suspect_after: 3,
            down_after: 6,
            rebalance_batch_size: 100,
            rebalance_bandwidth_mb_s: 50,
            heal_interval: Duration::from_secs(3600),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

/// Replication configuration — active-passive push, or active-active pull.
/// The two modes are mutually exclusive per spec.md §9's Open Question.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReplicationConfig {
    pub mode: ReplicationMode,
    /// This site's ID (active-active only)
    pub site_id: Option<String>,
    pub peers: Vec<PeerConfig>,
    #[serde(with = "duration_secs")]
    pub tick_interval: Duration,
    pub batch_size: usize,
    pub max_retries: u32,
    pub conflict_resolver: ConflictResolverKind,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            mode: ReplicationMode::Disabled,
            site_id: None,
            peers: Vec::new(),
            tick_interval: Duration::from_secs(30),
            batch_size: 100,
            max_retries: 3,
            conflict_resolver: ConflictResolverKind::LastWriterWins,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReplicationMode {
    #[default]
    Disabled,
    ActivePassive,
    ActiveActive,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConflictResolverKind {
    #[default]
    LastWriterWins,
    LargestObject,
    SitePreference,
}

/// A replication peer
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PeerConfig {
    pub name: String,
    pub url: String,
    /// Site ID (active-active only)
    pub site_id: Option<String>,
    pub access_key: String,
    pub secret_key: String,
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = VaultConfig::default();
        assert_eq!(config.node.name, "vaults3-node");
        assert_eq!(config.storage.default_ec, ErasureConfig::EC_4_2);
        assert_eq!(config.network.listen.port(), 9000);
        assert_eq!(config.cluster.virtual_nodes, 128);
    }
}
