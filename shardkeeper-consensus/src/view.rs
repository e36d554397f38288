//! Materialized view over the committed metadata log (spec §3: "in-memory maps are
//! materialized views").
//!
//! Updated only by the log-apply task; readers take a `DashMap`'s internal sharded
//! locks rather than a single coarse lock, which is the copy-on-write-adjacent
//! reader path spec §5 calls for ("readers take a snapshot pointer ... to avoid
//! blocking").

use dashmap::DashMap;
use shardkeeper_core::{FileAttributes, FileKey, LogRecord, NodeId, ShardId, ShardInfo};

#[derive(Default)]
pub struct MaterializedView {
    files: DashMap<FileKey, FileAttributes>,
    shards: DashMap<ShardId, ShardInfo>,
}

impl MaterializedView {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies one committed record. Called exactly once per committed index, in
    /// order, by the log-apply task.
    pub fn apply(&self, record: &LogRecord) {
        match record {
            LogRecord::FilePut { attributes, shards } => {
                for shard in shards {
                    self.shards.insert(shard.shard_id, shard.clone());
                }
                self.files.insert(attributes.key.clone(), attributes.clone());
            }
            LogRecord::FileDelete { key } => {
                if let Some((_, attrs)) = self.files.remove(key) {
                    for shard_id in attrs.shards {
                        self.shards.remove(&shard_id);
                    }
                }
            }
            LogRecord::ShardReplicaAdd { shard_id, node } => {
                if let Some(mut shard) = self.shards.get_mut(shard_id) {
                    if !shard.replica_set.contains(node) {
                        shard.replica_set.push(node.clone());
                    }
                }
            }
            LogRecord::ShardReplicaRemove { shard_id, node } => {
                if let Some(mut shard) = self.shards.get_mut(shard_id) {
                    shard.replica_set.retain(|n| n != node);
                }
            }
        }
    }

    pub fn file(&self, key: &FileKey) -> Option<FileAttributes> {
        self.files.get(key).map(|r| r.clone())
    }

    pub fn shard(&self, shard_id: ShardId) -> Option<ShardInfo> {
        self.shards.get(&shard_id).map(|r| r.clone())
    }

    pub fn list_files(&self, owner: &str) -> Vec<FileAttributes> {
        self.files
            .iter()
            .filter(|entry| entry.key().owner == owner)
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Shards whose replica set, intersected against `live_nodes`, counts below
    /// `target_r`. A raw `replica_set.len()` check would miss the case where a
    /// shard's nominal replica count still equals `R` but one of those nodes has
    /// since been marked `Dead` by the failure detector — the view has no
    /// membership knowledge of its own, so liveness is supplied by the caller
    /// (the coordinator's `ReplicationWorker`, which owns the membership table).
    pub fn shards_with_live_replica_count_below(&self, target_r: usize, live_nodes: &[NodeId]) -> Vec<ShardInfo> {
        self.shards
            .iter()
            .filter(|entry| {
                let live_count = entry.value().replica_set.iter().filter(|n| live_nodes.contains(n)).count();
                live_count < target_r
            })
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Wholesale replacement used by `InstallSnapshot` to bring a far-behind follower
    /// up to date without replaying every intervening log entry.
    pub fn replace_all(&self, files: Vec<FileAttributes>, shards: Vec<ShardInfo>) {
        self.files.clear();
        for f in files {
            self.files.insert(f.key.clone(), f);
        }
        self.shards.clear();
        for s in shards {
            self.shards.insert(s.shard_id, s);
        }
    }

    /// Snapshots the current view for `InstallSnapshot` compaction.
    pub fn snapshot(&self) -> (Vec<FileAttributes>, Vec<ShardInfo>) {
        (
            self.files.iter().map(|e| e.value().clone()).collect(),
            self.shards.iter().map(|e| e.value().clone()).collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn attrs(key: FileKey, shards: Vec<ShardId>) -> FileAttributes {
        FileAttributes {
            key,
            total_size: 100,
            created_at: Utc::now(),
            chunk_size: 100,
            shards,
        }
    }

    fn shard(id: u64, file: FileKey, replicas: usize) -> ShardInfo {
        ShardInfo {
            shard_id: ShardId(id),
            file,
            sequence_index: 0,
            byte_length: 100,
            digest: shardkeeper_core::ContentDigest::of(b"x"),
            replica_set: (0..replicas).map(|i| shardkeeper_core::NodeId::from(format!("n{i}"))).collect(),
        }
    }

    #[test]
    fn file_put_then_delete_removes_shards() {
        let view = MaterializedView::new();
        let key = FileKey::new("alice", "a.bin");
        let s = shard(1, key.clone(), 2);
        view.apply(&LogRecord::FilePut {
            attributes: attrs(key.clone(), vec![ShardId(1)]),
            shards: vec![s],
        });
        assert!(view.file(&key).is_some());
        assert!(view.shard(ShardId(1)).is_some());

        view.apply(&LogRecord::FileDelete { key: key.clone() });
        assert!(view.file(&key).is_none());
        assert!(view.shard(ShardId(1)).is_none());
    }

    #[test]
    fn replica_add_is_idempotent() {
        let view = MaterializedView::new();
        let key = FileKey::new("alice", "a.bin");
        view.apply(&LogRecord::FilePut {
            attributes: attrs(key.clone(), vec![ShardId(1)]),
            shards: vec![shard(1, key, 1)],
        });
        let node = shardkeeper_core::NodeId::from("n0");
        view.apply(&LogRecord::ShardReplicaAdd { shard_id: ShardId(1), node: node.clone() });
        view.apply(&LogRecord::ShardReplicaAdd { shard_id: ShardId(1), node });
        assert_eq!(view.shard(ShardId(1)).unwrap().replica_set.len(), 1);
    }

    #[test]
    fn under_replicated_query_finds_short_shards() {
        let view = MaterializedView::new();
        let key = FileKey::new("alice", "a.bin");
        view.apply(&LogRecord::FilePut {
            attributes: attrs(key.clone(), vec![ShardId(1)]),
            shards: vec![shard(1, key, 1)],
        });
        let live = vec![NodeId::from("n0")];
        let under = view.shards_with_live_replica_count_below(3, &live);
        assert_eq!(under.len(), 1);
    }

    #[test]
    fn under_replicated_query_counts_only_live_replicas() {
        let view = MaterializedView::new();
        let key = FileKey::new("alice", "a.bin");
        // Nominal replica count is 3 (meets R=3), but only n0 and n1 are live.
        view.apply(&LogRecord::FilePut {
            attributes: attrs(key.clone(), vec![ShardId(1)]),
            shards: vec![shard(1, key, 3)],
        });
        let live = vec![NodeId::from("n0"), NodeId::from("n1")];
        let under = view.shards_with_live_replica_count_below(3, &live);
        assert_eq!(under.len(), 1, "a dead replica holder must not count toward the live replica total");

        let all_live = vec![NodeId::from("n0"), NodeId::from("n1"), NodeId::from("n2")];
        assert!(view.shards_with_live_replica_count_below(3, &all_live).is_empty());
    }
}
