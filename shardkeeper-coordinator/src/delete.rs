//! Delete flow (spec §4.7): commit `FileDelete`, then best-effort `DeleteChunk`
//! every replica the file's shards had at the moment of deletion. Metadata deletion
//! is authoritative; any shard file a cleanup misses is collected lazily.

use shardkeeper_core::{ClusterError, FileKey, LogRecord};

use crate::coordinator::Coordinator;

impl Coordinator {
    pub async fn delete(&self, owner: &str, name: &str) -> anyhow::Result<()> {
        let key = FileKey::new(owner, name);
        let attrs = self
            .read_file(&key)
            .await?
            .ok_or_else(|| ClusterError::NotFound(key.to_string()))?;

        let mut shard_infos = Vec::with_capacity(attrs.shards.len());
        for shard_id in &attrs.shards {
            if let Some(info) = self.read_shard(*shard_id).await? {
                shard_infos.push(info);
            }
        }

        self.router
            .propose(LogRecord::FileDelete { key: key.clone() })
            .await
            .map_err(|e| anyhow::Error::new(e).context("metadata delete commit failed"))?;

        for shard in shard_infos {
            self.best_effort_delete(shard.shard_id, &shard.replica_set).await;
        }

        Ok(())
    }
}
