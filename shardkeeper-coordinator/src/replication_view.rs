//! Adapter from the coordinator's remote metadata log to `shardkeeper_storage`'s
//! `ReplicationView` seam, so `ReplicationWorker` can run on the coordinator without
//! that crate depending on either `shardkeeper-consensus` or `shardkeeper-network`.

use std::sync::Arc;

use shardkeeper_core::{NodeId, ShardId, ShardInfo};
use shardkeeper_network::NetworkClient;
use shardkeeper_storage::ReplicationView;

use crate::router::LeaderRouter;

pub struct RemoteReplicationView {
    client: Arc<NetworkClient>,
    router: Arc<LeaderRouter>,
}

impl RemoteReplicationView {
    pub fn new(client: Arc<NetworkClient>, router: Arc<LeaderRouter>) -> Self {
        Self { client, router }
    }
}

#[async_trait::async_trait]
impl ReplicationView for RemoteReplicationView {
    /// Stale reads are acceptable here (spec §4.6): any reachable quorum node's view
    /// is queried, not necessarily the leader's.
    async fn under_replicated_shards(&self, target_r: usize, live_nodes: &[NodeId]) -> Vec<ShardInfo> {
        for node in self.router.quorum_nodes() {
            if let Ok(shards) = self.client.shards_under_replicated(node, target_r, live_nodes).await {
                return shards;
            }
        }
        tracing::warn!("no quorum node reachable for under-replicated shard query");
        Vec::new()
    }

    async fn record_replica_add(&self, shard_id: ShardId, node: NodeId) -> anyhow::Result<()> {
        self.router
            .propose(shardkeeper_core::LogRecord::ShardReplicaAdd { shard_id, node })
            .await?;
        Ok(())
    }
}
