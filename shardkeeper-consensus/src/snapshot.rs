//! Snapshot compaction for `InstallSnapshot` (spec §4.6 supplement).
//!
//! A snapshot is the materialized view serialized wholesale, used when a follower's
//! missing log suffix has already been rotated out of every retained segment.

use serde::{Deserialize, Serialize};
use shardkeeper_core::{FileAttributes, ShardInfo};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotData {
    pub files: Vec<FileAttributes>,
    pub shards: Vec<ShardInfo>,
}

impl SnapshotData {
    pub fn capture(view: &crate::view::MaterializedView) -> Self {
        let (files, shards) = view.snapshot();
        Self { files, shards }
    }

    pub fn encode(&self) -> anyhow::Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }
}
