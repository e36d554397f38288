//! Replication worker (spec §4.4): keeps every shard's live replica count at `R`.
//!
//! Runs as a single long-running task per coordinator. Network and metadata-log access
//! are both seams (`ReplicateDispatcher`, `ReplicationView`) so this crate does not
//! depend on `shardkeeper-network` or `shardkeeper-consensus`; the coordinator wires
//! concrete implementations in at startup.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use shardkeeper_core::{MembershipTable, MetricsRegistry, NodeId, ShardId, ShardInfo};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::placement;

/// Issues the actual `ReplicateFrom` RPC to a target node.
#[async_trait::async_trait]
pub trait ReplicateDispatcher: Send + Sync {
    async fn dispatch_replicate_from(
        &self,
        target: &NodeId,
        shard_id: ShardId,
        source: &NodeId,
    ) -> anyhow::Result<()>;
}

/// Read access to the metadata materialized view, and the means to append a
/// `ShardReplicaAdd` record once a repair succeeds.
#[async_trait::async_trait]
pub trait ReplicationView: Send + Sync {
    /// `live_nodes` lets the view intersect a shard's nominal replica set against
    /// membership liveness before comparing its count to `target_r` — the view
    /// itself holds no membership knowledge.
    async fn under_replicated_shards(&self, target_r: usize, live_nodes: &[NodeId]) -> Vec<ShardInfo>;
    async fn record_replica_add(&self, shard_id: ShardId, node: NodeId) -> anyhow::Result<()>;
}

struct Backoff {
    attempt: u32,
    retry_after: Instant,
}

const BACKOFF_BASE: Duration = Duration::from_secs(1);
const BACKOFF_CAP: Duration = Duration::from_secs(60);

fn backoff_duration(attempt: u32) -> Duration {
    let millis = BACKOFF_BASE.as_millis() as u64 * 2u64.saturating_pow(attempt);
    Duration::from_millis(millis).min(BACKOFF_CAP)
}

pub struct ReplicationWorker {
    membership: std::sync::Arc<MembershipTable>,
    view: std::sync::Arc<dyn ReplicationView>,
    dispatcher: std::sync::Arc<dyn ReplicateDispatcher>,
    metrics: std::sync::Arc<MetricsRegistry>,
    replication_factor: usize,
    min_replicas: usize,
    poll_interval: Duration,
    disk_high_water_mark: f64,
    backoffs: Mutex<HashMap<ShardId, Backoff>>,
}

impl ReplicationWorker {
    pub fn new(
        membership: std::sync::Arc<MembershipTable>,
        view: std::sync::Arc<dyn ReplicationView>,
        dispatcher: std::sync::Arc<dyn ReplicateDispatcher>,
        metrics: std::sync::Arc<MetricsRegistry>,
        replication_factor: usize,
        min_replicas: usize,
        poll_interval: Duration,
        disk_high_water_mark: f64,
    ) -> Self {
        Self {
            membership,
            view,
            dispatcher,
            metrics,
            replication_factor,
            min_replicas,
            poll_interval,
            disk_high_water_mark,
            backoffs: Mutex::new(HashMap::new()),
        }
    }

    /// Runs until `cancel` fires. Idempotent per spec §4.4: re-running against the
    /// same state is always safe, and a `ShardReplicaAdd` for an already-live replica
    /// is a no-op (enforced by the caller's metadata view, not here).
    pub async fn run(&self, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("replication worker shutting down");
                    return;
                }
                _ = tokio::time::sleep(self.poll_interval) => {
                    self.repair_pass(&cancel).await;
                }
            }
        }
    }

    async fn repair_pass(&self, cancel: &CancellationToken) {
        let snapshot = self.membership.snapshot();
        let live_nodes: Vec<NodeId> = snapshot.active().map(|n| n.id.clone()).collect();
        let shards = self.view.under_replicated_shards(self.replication_factor, &live_nodes).await;
        for shard in shards {
            if cancel.is_cancelled() {
                return;
            }
            if !self.ready_to_retry(shard.shard_id).await {
                continue;
            }
            self.repair_shard(shard).await;
        }
    }

    async fn ready_to_retry(&self, shard_id: ShardId) -> bool {
        let guard = self.backoffs.lock().await;
        match guard.get(&shard_id) {
            Some(b) => Instant::now() >= b.retry_after,
            None => true,
        }
    }

    async fn repair_shard(&self, shard: ShardInfo) {
        let snapshot = self.membership.snapshot();

        let Some(source) = shard
            .replica_set
            .iter()
            .find(|id| snapshot.get(id).map(|n| n.status == shardkeeper_core::NodeStatus::Active).unwrap_or(false))
        else {
            tracing::warn!(shard_id = %shard.shard_id, "no healthy source replica available for repair");
            return;
        };

        let target = match placement::select_replicas(
            &snapshot,
            1,
            self.min_replicas,
            &shard.replica_set,
            self.disk_high_water_mark,
        ) {
            Ok(picked) if !picked.is_empty() => picked[0].clone(),
            _ => {
                tracing::warn!(shard_id = %shard.shard_id, "no eligible repair target available");
                return;
            }
        };

        self.metrics.placement_decisions_total.with_label_values(&[&target.0]).inc();
        match self
            .dispatcher
            .dispatch_replicate_from(&target, shard.shard_id, source)
            .await
        {
            Ok(()) => {
                self.clear_backoff(shard.shard_id).await;
                if let Err(e) = self.view.record_replica_add(shard.shard_id, target.clone()).await {
                    tracing::warn!(shard_id = %shard.shard_id, error = %e, "repair succeeded but metadata append failed");
                }
                self.metrics.replication_repairs_total.inc();
                tracing::info!(shard_id = %shard.shard_id, target = %target, "repaired under-replicated shard");
            }
            Err(e) => {
                self.record_failure(shard.shard_id).await;
                tracing::warn!(shard_id = %shard.shard_id, target = %target, error = %e, "replication attempt failed");
            }
        }
    }

    async fn record_failure(&self, shard_id: ShardId) {
        let mut guard = self.backoffs.lock().await;
        let entry = guard.entry(shard_id).or_insert(Backoff {
            attempt: 0,
            retry_after: Instant::now(),
        });
        entry.attempt += 1;
        entry.retry_after = Instant::now() + backoff_duration(entry.attempt);
    }

    async fn clear_backoff(&self, shard_id: ShardId) {
        self.backoffs.lock().await.remove(&shard_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_exponentially_and_caps() {
        assert_eq!(backoff_duration(0), Duration::from_secs(1));
        assert_eq!(backoff_duration(1), Duration::from_secs(2));
        assert_eq!(backoff_duration(2), Duration::from_secs(4));
        assert_eq!(backoff_duration(10), BACKOFF_CAP);
    }
}
