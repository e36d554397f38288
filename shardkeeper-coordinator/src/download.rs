//! Download flow (spec §4.7): metadata lookup, then one parallel fetch per shard with
//! least-load replica selection and fallback to the next replica on failure.

use std::sync::Arc;

use shardkeeper_core::{ClusterError, FileKey, NodeId, ShardInfo};

use crate::coordinator::{Coordinator, SHARD_RPC_DEADLINE};

impl Coordinator {
    pub async fn download(&self, owner: &str, name: &str) -> anyhow::Result<Vec<u8>> {
        let key = FileKey::new(owner, name);
        let attrs = self
            .read_file(&key)
            .await?
            .ok_or_else(|| ClusterError::NotFound(key.to_string()))?;

        let mut shard_infos = Vec::with_capacity(attrs.shards.len());
        for shard_id in &attrs.shards {
            let info = self
                .read_shard(*shard_id)
                .await?
                .ok_or_else(|| ClusterError::NotFound(format!("shard metadata for {shard_id}")))?;
            shard_infos.push(info);
        }

        let fetches = shard_infos.iter().map(|shard| self.fetch_shard(shard));
        let parts = futures::future::try_join_all(fetches).await.map_err(|e| {
            self.record_error(&e);
            e
        })?;

        let mut out = Vec::with_capacity(attrs.total_size as usize);
        for part in parts {
            out.extend_from_slice(&part);
        }
        Ok(out)
    }

    /// Selects replicas by ascending load score and falls back through them in order
    /// (spec §4.7: "A shard GET failure falls back to the next replica; exhaustion of
    /// replicas fails the download with `DataUnavailable`").
    async fn fetch_shard(&self, shard: &ShardInfo) -> Result<Arc<[u8]>, ClusterError> {
        let snapshot = self.membership.snapshot();
        let mut candidates: Vec<NodeId> = shard.replica_set.clone();
        candidates.sort_by(|a, b| {
            let score_a = snapshot.get(a).map(|n| n.load.score()).unwrap_or(f64::MAX);
            let score_b = snapshot.get(b).map(|n| n.load.score()).unwrap_or(f64::MAX);
            score_a.partial_cmp(&score_b).unwrap_or(std::cmp::Ordering::Equal)
        });

        for node in candidates {
            match self.client.get_chunk(&node, shard.shard_id, SHARD_RPC_DEADLINE).await {
                Ok(bytes) => return Ok(bytes),
                Err(e) => {
                    tracing::warn!(%node, shard_id = %shard.shard_id, error = %e, "shard GET failed, trying next replica");
                }
            }
        }

        Err(ClusterError::DataUnavailable(shard.shard_id))
    }
}
