//! Pure materialized-view reads (spec §4.7: "Search/List ... may be served from any
//! metadata replica").

use shardkeeper_core::{FileAttributes, FileKey, ShardInfo};

use crate::coordinator::Coordinator;

impl Coordinator {
    pub async fn read_file(&self, key: &FileKey) -> anyhow::Result<Option<FileAttributes>> {
        let key = key.clone();
        self.router
            .read_from_any(move |client, node| {
                let key = key.clone();
                async move { client.read_file(&node, key).await }
            })
            .await
    }

    pub async fn read_shard(&self, shard_id: shardkeeper_core::ShardId) -> anyhow::Result<Option<ShardInfo>> {
        self.router
            .read_from_any(move |client, node| async move { client.read_shard(&node, shard_id).await })
            .await
    }

    /// `List`: every file owned by `owner`.
    pub async fn list(&self, owner: &str) -> anyhow::Result<Vec<FileAttributes>> {
        let owner = owner.to_string();
        self.router
            .read_from_any(move |client, node| {
                let owner = owner.clone();
                async move { client.list_files(&node, &owner).await }
            })
            .await
    }

    /// `Search`: files owned by `owner` whose name starts with `prefix`. Built on top
    /// of `List` — the materialized view has no secondary index, so this is a
    /// client-side filter over the owner's file set.
    pub async fn search(&self, owner: &str, prefix: &str) -> anyhow::Result<Vec<FileAttributes>> {
        let files = self.list(owner).await?;
        Ok(filter_by_name_prefix(files, prefix))
    }
}

fn filter_by_name_prefix(files: Vec<FileAttributes>, prefix: &str) -> Vec<FileAttributes> {
    files.into_iter().filter(|f| f.key.name.starts_with(prefix)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn file(owner: &str, name: &str) -> FileAttributes {
        FileAttributes {
            key: FileKey::new(owner, name),
            total_size: 0,
            created_at: Utc::now(),
            chunk_size: 1,
            shards: Vec::new(),
        }
    }

    #[test]
    fn search_keeps_only_matching_prefix() {
        let files = vec![file("alice", "report.pdf"), file("alice", "receipt.pdf"), file("alice", "photo.png")];
        let matched = filter_by_name_prefix(files, "rep");
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].key.name, "report.pdf");
    }
}
