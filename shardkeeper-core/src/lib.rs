//! Shared types, configuration, membership, metrics, and process wiring for the
//! shardkeeper object-storage cluster.

pub mod config;
pub mod metrics;
pub mod node;
pub mod services;
pub mod types;

pub use config::{ClusterConfig, NodeEntry};
pub use metrics::MetricsRegistry;
pub use node::{MembershipSnapshot, MembershipTable, NodeRecord};
pub use services::Services;
pub use types::{
    ClusterError, ContentDigest, FileAttributes, FileKey, LoadVector, LogRecord, NodeId,
    NodeStatus, ShardId, ShardInfo,
};
