//! The coordinator ("SuperNode", spec §2): the single well-known endpoint clients
//! speak to. Owns the cluster view, resolves placement, drives uploads/downloads,
//! and forwards metadata writes to the current metadata leader.
//!
//! Per spec §9's cyclic-reference flag, this is the one component that holds the
//! membership table, the leader router, and the network client together and hands
//! immutable snapshots to the background workers (`FailureDetector`,
//! `ReplicationWorker`) it spawns — they never reach back through a parent handle.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use shardkeeper_core::{ClusterError, MembershipTable, MetricsRegistry, NodeId, ShardId};
use shardkeeper_network::NetworkClient;

use crate::router::LeaderRouter;

/// Deadline applied to shard-level `PutChunk`/`GetChunk`/`DeleteChunk` RPCs. Not part
/// of the cluster configuration document (spec §6 only lists heartbeat-related
/// deadlines); chosen generously since shard bodies can be tens of megabytes.
pub(crate) const SHARD_RPC_DEADLINE: Duration = Duration::from_secs(30);

pub struct Coordinator {
    pub(crate) config: Arc<shardkeeper_core::ClusterConfig>,
    pub(crate) metrics: Arc<MetricsRegistry>,
    pub(crate) membership: Arc<MembershipTable>,
    pub(crate) client: Arc<NetworkClient>,
    pub(crate) router: Arc<LeaderRouter>,
    next_shard_id: AtomicU64,
}

impl Coordinator {
    /// `quorum_nodes` are addressed by their `raft_port` (spec §6): the metadata log's
    /// own RPC surface, kept separate from the `server_port` storage-node surface so
    /// election/heartbeat traffic never queues behind a large chunk PUT.
    pub fn new(services: &shardkeeper_core::Services, quorum_nodes: Vec<NodeId>) -> Self {
        let client = Arc::new(NetworkClient::new(services.metrics.clone()));
        let router = Arc::new(LeaderRouter::new(client.clone(), quorum_nodes));

        // Seeded from wall-clock nanos rather than zero so a restarted coordinator's
        // counter doesn't collide with shard ids it handed out in a previous run.
        let seed = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_nanos() as u64;

        Self {
            config: services.config.clone(),
            metrics: services.metrics.clone(),
            membership: services.membership.clone(),
            client,
            router,
            next_shard_id: AtomicU64::new(seed),
        }
    }

    pub(crate) fn next_shard_id(&self) -> ShardId {
        ShardId(self.next_shard_id.fetch_add(1, Ordering::Relaxed))
    }

    pub fn router(&self) -> Arc<LeaderRouter> {
        self.router.clone()
    }

    pub fn client(&self) -> Arc<NetworkClient> {
        self.client.clone()
    }

    pub fn membership(&self) -> Arc<MembershipTable> {
        self.membership.clone()
    }

    /// Best-effort cleanup used by aborted uploads (spec §4.7) and committed deletes
    /// (spec §4.7: "on commit, issue best-effort `DeleteChunk` to all replicas").
    pub(crate) async fn best_effort_delete(&self, shard_id: ShardId, nodes: &[NodeId]) {
        let futures = nodes.iter().map(|node| {
            let client = self.client.clone();
            let node = node.clone();
            async move {
                if let Err(e) = client.delete_chunk(&node, shard_id, SHARD_RPC_DEADLINE).await {
                    tracing::warn!(%node, %shard_id, error = %e, "best-effort cleanup delete failed");
                }
            }
        });
        futures::future::join_all(futures).await;
    }

    pub(crate) fn record_error(&self, err: &ClusterError) {
        self.metrics.record_error(err);
    }
}
