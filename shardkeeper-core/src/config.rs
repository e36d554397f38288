//! Cluster configuration loading and validation.
//!
//! Configuration enumerates the fixed set of cluster nodes plus global tuning
//! parameters (spec §6: "A single configuration document enumerates nodes"). It is
//! loaded the way the teacher lineage loads it: a layered `config` crate builder over
//! an optional file, `SHARDKEEPER_`-prefixed environment variables, and built-in
//! defaults, validated once at startup rather than discovered later at placement time.

use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

/// Per-node bootstrap entry in the cluster configuration document (spec §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeEntry {
    pub hostname: String,
    pub server_port: u16,
    pub raft_port: u16,
    /// Bootstrap hint: true for the node(s) seeded as the initial metadata quorum.
    #[serde(default)]
    pub primary: bool,
}

impl NodeEntry {
    pub fn server_address(&self) -> String {
        format!("{}:{}", self.hostname, self.server_port)
    }

    pub fn raft_address(&self) -> String {
        format!("{}:{}", self.hostname, self.raft_port)
    }
}

/// Global tuning parameters shared by every component (spec §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    pub nodes: Vec<NodeEntry>,

    /// Cache capacity in entries (spec §6: `LRUCapacity`, default 10000).
    #[serde(default = "defaults::lru_capacity")]
    pub lru_capacity: usize,

    /// Upload chunk size in bytes (spec §6: `UPLOAD_SHARD_SIZE`, default 50 MiB).
    #[serde(default = "defaults::upload_shard_size")]
    pub upload_shard_size: u64,

    /// The coordinator's well-known client-facing address.
    pub super_node_address: String,

    /// Target replica count per shard.
    pub replication_factor: usize,

    /// Minimum live replica count tolerated before `DataUnavailable`.
    pub min_replicas: usize,

    #[serde(with = "duration_secs", default = "defaults::heartbeat_interval")]
    pub heartbeat_interval: Duration,

    /// Consecutive missed heartbeats before a node is marked Suspect (spec: `T_miss`, default 3).
    #[serde(default = "defaults::suspect_threshold")]
    pub suspect_threshold: u32,

    /// Duration in Suspect before a node is marked Dead (spec: `T_dead`, default 10s).
    #[serde(with = "duration_secs", default = "defaults::dead_threshold")]
    pub dead_threshold: Duration,

    /// Required sizing for the bounded request-processing pool (spec §4.1, §9): no
    /// hidden default, the deployer must size it for expected concurrency.
    pub worker_pool_size: usize,

    /// Fraction of disk capacity at which a node refuses further `PutChunk`s
    /// (spec §4.1: `OutOfSpace`).
    #[serde(default = "defaults::disk_high_water_mark")]
    pub disk_high_water_mark: f64,

    /// Deadline applied to heartbeat polls (spec §5: "short deadline (200 ms)").
    #[serde(with = "duration_millis", default = "defaults::heartbeat_deadline")]
    pub heartbeat_deadline: Duration,

    /// Local directory each node stores its shard files and log segments under.
    pub data_dir: std::path::PathBuf,
}

mod defaults {
    use std::time::Duration;

    pub fn lru_capacity() -> usize {
        10_000
    }
    pub fn upload_shard_size() -> u64 {
        50 * 1024 * 1024
    }
    pub fn heartbeat_interval() -> Duration {
        Duration::from_secs(1)
    }
    pub fn suspect_threshold() -> u32 {
        3
    }
    pub fn dead_threshold() -> Duration {
        Duration::from_secs(10)
    }
    pub fn disk_high_water_mark() -> f64 {
        0.9
    }
    pub fn heartbeat_deadline() -> Duration {
        Duration::from_millis(200)
    }
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

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

impl ClusterConfig {
    /// Load configuration from an explicit path, falling back to
    /// `SHARDKEEPER_*`-prefixed environment variables and defaults, then validate it.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }
        builder = builder.add_source(config::Environment::with_prefix("SHARDKEEPER").separator("__"));

        let raw = builder.build().context("failed to assemble configuration sources")?;
        let parsed: ClusterConfig = raw
            .try_deserialize()
            .context("failed to parse cluster configuration")?;
        parsed.validate()?;
        Ok(parsed)
    }

    /// Validate cross-field invariants that can't be expressed as a single default.
    pub fn validate(&self) -> Result<()> {
        if self.nodes.is_empty() {
            bail!("cluster configuration must enumerate at least one node");
        }
        if self.min_replicas == 0 {
            bail!("min_replicas must be at least 1");
        }
        if self.min_replicas > self.replication_factor {
            bail!(
                "min_replicas ({}) cannot exceed replication_factor ({})",
                self.min_replicas,
                self.replication_factor
            );
        }
        if self.worker_pool_size == 0 {
            bail!("worker_pool_size is required and must be > 0 (spec §4.1/§9, no hidden default)");
        }
        if !(0.0..=1.0).contains(&self.disk_high_water_mark) {
            bail!("disk_high_water_mark must be in [0.0, 1.0]");
        }
        if self.suspect_threshold == 0 {
            bail!("suspect_threshold must be at least 1");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> ClusterConfig {
        ClusterConfig {
            nodes: vec![NodeEntry {
                hostname: "127.0.0.1".into(),
                server_port: 9000,
                raft_port: 9100,
                primary: true,
            }],
            lru_capacity: defaults::lru_capacity(),
            upload_shard_size: defaults::upload_shard_size(),
            super_node_address: "127.0.0.1:8080".into(),
            replication_factor: 3,
            min_replicas: 2,
            heartbeat_interval: defaults::heartbeat_interval(),
            suspect_threshold: defaults::suspect_threshold(),
            dead_threshold: defaults::dead_threshold(),
            worker_pool_size: 200,
            disk_high_water_mark: defaults::disk_high_water_mark(),
            heartbeat_deadline: defaults::heartbeat_deadline(),
            data_dir: "./data".into(),
        }
    }

    #[test]
    fn rejects_min_replicas_above_replication_factor() {
        let mut cfg = base_config();
        cfg.min_replicas = 5;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_zero_worker_pool() {
        let mut cfg = base_config();
        cfg.worker_pool_size = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn accepts_well_formed_config() {
        assert!(base_config().validate().is_ok());
    }
}
