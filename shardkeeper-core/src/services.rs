//! The per-process "Services" construction record (spec §9).
//!
//! Built once at startup and passed by reference to every worker task; nothing here is
//! reached via a process-global, mirroring the teacher's top-level orchestrator struct
//! while confining the mutable membership table behind this one owner.

use std::sync::Arc;

use crate::config::ClusterConfig;
use crate::metrics::MetricsRegistry;
use crate::node::{MembershipTable, NodeRecord};
use crate::types::NodeId;

/// Shared collaborators a `shardkeeper-node` or `shardkeeper-coordinator` process owns.
///
/// Downstream crates (`shardkeeper-cache`, `-storage`, `-consensus`, `-network`) each
/// define their own piece of process state; this record is the thing that owns `Arc`s to
/// all of them plus the cluster-wide config and membership table, and is constructed
/// exactly once by the binary's `main`.
pub struct Services {
    pub config: Arc<ClusterConfig>,
    pub metrics: Arc<MetricsRegistry>,
    pub membership: Arc<MembershipTable>,
}

impl Services {
    /// Seeds the membership table with a `Joining` record for every node in
    /// `config.nodes` so the failure detector has something to poll and
    /// placement has candidates to consider from the first heartbeat cycle
    /// onward — an empty table would otherwise poll nothing and every upload
    /// would fail `InsufficientCapacity` forever.
    ///
    /// The seeded load vector's capacity fields are placeholders (`0`, treated
    /// as "unbounded" by `LoadVector`/`ShardStore`); each node reports its real
    /// figures on its first heartbeat, which fully overwrites `load`.
    pub fn new(config: ClusterConfig) -> anyhow::Result<Self> {
        let membership = MembershipTable::new();
        for node in &config.nodes {
            membership.upsert(NodeRecord::joining(NodeId::from(node.server_address()), 0, 0));
        }

        Ok(Self {
            config: Arc::new(config),
            metrics: Arc::new(MetricsRegistry::new()?),
            membership: Arc::new(membership),
        })
    }
}
