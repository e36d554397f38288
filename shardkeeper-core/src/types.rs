//! Shared data model types for the shardkeeper cluster.
//!
//! Every value that crosses a process boundary (RPC payload, metadata log entry,
//! configuration document) is represented here as an explicit, `serde`-derived record
//! or a closed enum — nothing is passed around as an untyped map.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Stable identifier for a storage node: `host:port`.
///
/// Nodes are identified by their listen address rather than a generated UUID; the
/// cluster has no separate node-identity bootstrap step, matching spec §3 ("Node ...
/// Identified by a stable id (host:port)").
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub String);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for NodeId {
    fn from(s: String) -> Self {
        NodeId(s)
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        NodeId(s.to_string())
    }
}

/// Coordinator-assigned, monotonically increasing shard identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ShardId(pub u64);

impl fmt::Display for ShardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "shard-{}", self.0)
    }
}

/// Identifies a file by its owning user and name, per spec §3 ("File ... Identified by
/// `(owner, name)`").
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FileKey {
    pub owner: String,
    pub name: String,
}

impl FileKey {
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for FileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

/// Attributes of a file, immutable once written except by whole-file replace or
/// delete (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileAttributes {
    pub key: FileKey,
    pub total_size: u64,
    pub created_at: DateTime<Utc>,
    pub chunk_size: u64,
    pub shards: Vec<ShardId>,
}

/// Attributes of a shard: parent file, position, and replica placement.
///
/// The invariant `|replica_set ∩ live nodes| >= r_min` (spec §3) is enforced by the
/// replication worker, not by this type — this is pure data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShardInfo {
    pub shard_id: ShardId,
    pub file: FileKey,
    pub sequence_index: u32,
    pub byte_length: u64,
    pub digest: ContentDigest,
    pub replica_set: Vec<NodeId>,
}

/// A BLAKE3 content digest, used to detect corruption on `PutChunk` (spec §4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentDigest(pub [u8; 32]);

impl ContentDigest {
    pub fn of(bytes: &[u8]) -> Self {
        ContentDigest(*blake3::hash(bytes).as_bytes())
    }
}

impl fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

/// Membership status of a node, per spec §3. Transitions are monotone forward except
/// for the explicit `Dead` -> `Active` recovery path documented in spec §4.5.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeStatus {
    Joining,
    Active,
    Suspect,
    Dead,
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NodeStatus::Joining => "joining",
            NodeStatus::Active => "active",
            NodeStatus::Suspect => "suspect",
            NodeStatus::Dead => "dead",
        };
        write!(f, "{}", s)
    }
}

/// Load vector reported by a node's heartbeat response, consumed by the placement
/// scorer (spec §4.3).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LoadVector {
    /// CPU utilization in `[0.0, 1.0]`.
    pub cpu: f64,
    /// Bytes currently used on the node's shard directory volume.
    pub disk_used: u64,
    /// Total capacity of the node's shard directory volume, in bytes.
    pub disk_capacity: u64,
    /// Number of shards currently hosted by this node.
    pub shard_count: u64,
    /// Configured soft ceiling used to normalize `shard_count` in the load score.
    pub max_shard_count: u64,
}

impl LoadVector {
    pub fn empty(max_shard_count: u64, disk_capacity: u64) -> Self {
        Self {
            cpu: 0.0,
            disk_used: 0,
            disk_capacity,
            shard_count: 0,
            max_shard_count,
        }
    }

    /// Composite placement score; lower is better (spec §4.3).
    ///
    /// `load_score = 0.5*cpu + 0.3*(disk_used/disk_capacity) + 0.2*(shard_count/max_shard_count)`
    pub fn score(&self) -> f64 {
        let disk_ratio = if self.disk_capacity == 0 {
            1.0
        } else {
            (self.disk_used as f64 / self.disk_capacity as f64).min(1.0)
        };
        let shard_ratio = if self.max_shard_count == 0 {
            1.0
        } else {
            (self.shard_count as f64 / self.max_shard_count as f64).min(1.0)
        };
        0.5 * self.cpu.clamp(0.0, 1.0) + 0.3 * disk_ratio + 0.2 * shard_ratio
    }

    /// Whether disk usage has crossed the node's high-water mark, per spec §4.1
    /// ("fails with `OutOfSpace` when local disk crosses a high-water mark").
    pub fn out_of_space(&self, high_water_mark: f64) -> bool {
        if self.disk_capacity == 0 {
            return false;
        }
        (self.disk_used as f64 / self.disk_capacity as f64) >= high_water_mark
    }
}

/// A totally ordered metadata log record (spec §3, §4.6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum LogRecord {
    FilePut {
        attributes: FileAttributes,
        shards: Vec<ShardInfo>,
    },
    FileDelete {
        key: FileKey,
    },
    ShardReplicaAdd {
        shard_id: ShardId,
        node: NodeId,
    },
    ShardReplicaRemove {
        shard_id: ShardId,
        node: NodeId,
    },
}

/// Error kinds named by spec §7's error handling table. Each variant names both its
/// intended surface (client vs. internal) and its recovery policy in its doc comment;
/// the policy itself lives with the caller that is positioned to act on it.
#[derive(Debug, thiserror::Error)]
pub enum ClusterError {
    /// Surfaced to the client as a 404-equivalent.
    #[error("not found: {0}")]
    NotFound(String),

    /// Internal: computed digest did not match the expected digest on `PutChunk`.
    /// Recovery: retry the PUT once against the same node, then fail the upload.
    #[error("digest mismatch for shard {0}")]
    DigestMismatch(ShardId),

    /// Surfaced to the client: fewer than `R_min` live candidates for placement.
    #[error("insufficient capacity: need {needed} replicas, {available} candidates available")]
    InsufficientCapacity { needed: usize, available: usize },

    /// A node's local disk has crossed its high-water mark.
    /// Recovery: the coordinator demotes the node from placement and triggers repair.
    #[error("node {0} is out of space")]
    OutOfSpace(NodeId),

    /// An RPC exceeded its deadline.
    /// Recovery: one retry against another replica/node, then surface.
    #[error("timeout waiting for {0}")]
    Timeout(String),

    /// The metadata leader changed mid-append.
    /// Recovery: transparent retry against the new leader with the same idempotency key.
    #[error("leader changed, new leader is {0:?}")]
    LeaderChanged(Option<NodeId>),

    /// Surfaced to the client: a shard's replicas were all unreachable.
    #[error("shard {0} has no reachable replica")]
    DataUnavailable(ShardId),

    /// Internal: the operation was cancelled; resources must still be released.
    #[error("operation cancelled: {0}")]
    Cancelled(String),
}

impl ClusterError {
    /// Stable label used as a `prometheus` counter dimension, so every error kind is
    /// mechanically accounted for (spec §7: "No error is silently swallowed; every
    /// failure increments an observability counter").
    pub fn metric_label(&self) -> &'static str {
        match self {
            ClusterError::NotFound(_) => "not_found",
            ClusterError::DigestMismatch(_) => "digest_mismatch",
            ClusterError::InsufficientCapacity { .. } => "insufficient_capacity",
            ClusterError::OutOfSpace(_) => "out_of_space",
            ClusterError::Timeout(_) => "timeout",
            ClusterError::LeaderChanged(_) => "leader_changed",
            ClusterError::DataUnavailable(_) => "data_unavailable",
            ClusterError::Cancelled(_) => "cancelled",
        }
    }
}
