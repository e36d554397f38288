//! Upload flow (spec §4.7).
//!
//! Chunks the incoming stream into `upload_shard_size`-byte pieces, places and PUTs
//! each chunk to `R` primaries in parallel, retries a single failed primary once
//! against a fresh node, and aborts with best-effort cleanup on a second failure.
//! The client is not acknowledged until the composed `FilePut` record is committed.

use std::sync::Arc;

use chrono::Utc;
use shardkeeper_core::{ClusterError, ContentDigest, FileAttributes, FileKey, LogRecord, NodeId, ShardId, ShardInfo};
use shardkeeper_storage::placement;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::coordinator::{Coordinator, SHARD_RPC_DEADLINE};

impl Coordinator {
    pub async fn upload<R: AsyncRead + Unpin>(&self, owner: &str, name: &str, mut reader: R) -> anyhow::Result<FileAttributes> {
        let key = FileKey::new(owner, name);
        let chunk_size = self.config.upload_shard_size as usize;
        let mut buf = vec![0u8; chunk_size];
        let mut shards: Vec<ShardInfo> = Vec::new();
        let mut total_size: u64 = 0;
        let mut sequence_index: u32 = 0;

        loop {
            let n = read_up_to(&mut reader, &mut buf).await?;
            if n == 0 {
                break;
            }
            let bytes: Arc<[u8]> = Arc::from(&buf[..n]);
            let shard_id = self.next_shard_id();

            match self.write_shard(&key, shard_id, sequence_index, bytes).await {
                Ok(shard) => {
                    total_size += n as u64;
                    shards.push(shard);
                    sequence_index += 1;
                }
                Err(e) => {
                    self.record_error(&e);
                    self.abort_upload(&shards).await;
                    return Err(anyhow::Error::new(e).context("upload aborted"));
                }
            }

            if n < chunk_size {
                break;
            }
        }

        if shards.is_empty() {
            anyhow::bail!("upload rejected: zero-byte file");
        }

        let attributes = FileAttributes {
            key: key.clone(),
            total_size,
            created_at: Utc::now(),
            chunk_size: self.config.upload_shard_size,
            shards: shards.iter().map(|s| s.shard_id).collect(),
        };

        let record = LogRecord::FilePut {
            attributes: attributes.clone(),
            shards,
        };
        self.router
            .propose(record)
            .await
            .map_err(|e| anyhow::Error::new(e).context("metadata commit failed, upload not acknowledged"))?;

        Ok(attributes)
    }

    async fn abort_upload(&self, shards: &[ShardInfo]) {
        for shard in shards {
            self.best_effort_delete(shard.shard_id, &shard.replica_set).await;
        }
    }

    /// Places and writes one chunk, including the single-retry-then-abort policy
    /// (spec §4.7: "Any primary PUT failure within a chunk triggers a single retry
    /// against a fresh node; a second failure aborts the upload").
    async fn write_shard(
        &self,
        file: &FileKey,
        shard_id: ShardId,
        sequence_index: u32,
        bytes: Arc<[u8]>,
    ) -> Result<ShardInfo, ClusterError> {
        let digest = ContentDigest::of(&bytes);
        let snapshot = self.membership.snapshot();
        let high_water_mark = self.config.disk_high_water_mark;
        let primaries = placement::select_replicas(
            &snapshot,
            self.config.replication_factor,
            self.config.min_replicas,
            &[],
            high_water_mark,
        )?;

        for node in &primaries {
            self.metrics.placement_decisions_total.with_label_values(&[&node.0]).inc();
        }
        let results = self.put_to_nodes(shard_id, bytes.clone(), digest, &primaries).await;
        let mut acked = Vec::with_capacity(primaries.len());
        let mut failed = Vec::new();
        for (node, res) in results {
            match res {
                Ok(()) => acked.push(node),
                Err(e) => {
                    if matches!(e, ClusterError::OutOfSpace(_)) {
                        self.membership.mark_out_of_space(&node);
                    }
                    tracing::warn!(%node, %shard_id, error = %e, "primary PUT failed, retrying once against a fresh node");
                    failed.push(node);
                }
            }
        }

        if !failed.is_empty() {
            let fresh = placement::select_replicas(&snapshot, failed.len(), failed.len(), &primaries, high_water_mark)?;
            for node in &fresh {
                self.metrics.placement_decisions_total.with_label_values(&[&node.0]).inc();
            }
            let retry_results = self.put_to_nodes(shard_id, bytes.clone(), digest, &fresh).await;
            for (node, res) in retry_results {
                match res {
                    Ok(()) => acked.push(node),
                    Err(e) => {
                        if matches!(e, ClusterError::OutOfSpace(_)) {
                            self.membership.mark_out_of_space(&node);
                        }
                        self.best_effort_delete(shard_id, &acked).await;
                        return Err(e);
                    }
                }
            }
        }

        Ok(ShardInfo {
            shard_id,
            file: file.clone(),
            sequence_index,
            byte_length: bytes.len() as u64,
            digest,
            replica_set: acked,
        })
    }

    async fn put_to_nodes(
        &self,
        shard_id: ShardId,
        bytes: Arc<[u8]>,
        digest: ContentDigest,
        nodes: &[NodeId],
    ) -> Vec<(NodeId, Result<(), ClusterError>)> {
        let futures = nodes.iter().map(|node| {
            let client = self.client.clone();
            let node = node.clone();
            let bytes = bytes.clone();
            async move {
                let res = client.put_chunk(&node, shard_id, bytes, digest, SHARD_RPC_DEADLINE).await;
                (node, res)
            }
        });
        futures::future::join_all(futures).await
    }
}

/// Fills `buf` from `reader`, stopping only at EOF or a full buffer — `read()` alone
/// may return a short read well before either.
async fn read_up_to<R: AsyncRead + Unpin>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn read_up_to_stops_at_full_buffer() {
        let data = b"hello world".to_vec();
        let mut reader: &[u8] = &data;
        let mut buf = vec![0u8; 5];
        let n = read_up_to(&mut reader, &mut buf).await.unwrap();
        assert_eq!(n, 5);
        assert_eq!(&buf[..n], b"hello");
    }

    #[tokio::test]
    async fn read_up_to_stops_at_eof_short_of_full_buffer() {
        let data = b"hi".to_vec();
        let mut reader: &[u8] = &data;
        let mut buf = vec![0u8; 10];
        let n = read_up_to(&mut reader, &mut buf).await.unwrap();
        assert_eq!(n, 2);
        assert_eq!(&buf[..n], b"hi");
    }
}
