//! Wire messages for the cluster's binary RPC surface (spec §6).
//!
//! One flat request/response pair covers the storage-node operations, the
//! coordinator-facing flows, and the metadata log's consensus messages — all of them
//! travel over the same length-delimited + bincode transport (see [`crate::transport`]).

use serde::{Deserialize, Serialize};
use shardkeeper_consensus::{
    AppendEntries, AppendEntriesResponse, InstallSnapshot, InstallSnapshotResponse, LogIndex, RequestVote,
    RequestVoteResponse,
};
use shardkeeper_core::{ContentDigest, FileAttributes, FileKey, LoadVector, LogRecord, NodeId, ShardId, ShardInfo};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RpcRequest {
    // Storage node operations (spec §4.1).
    PutChunk {
        shard_id: ShardId,
        bytes: Vec<u8>,
        expected_digest: ContentDigest,
    },
    GetChunk {
        shard_id: ShardId,
    },
    DeleteChunk {
        shard_id: ShardId,
    },
    Heartbeat,
    ReplicateFrom {
        shard_id: ShardId,
        source: NodeId,
    },

    // Coordinator-to-quorum-node metadata operations backing the coordinator's
    // Upload/Download/Delete/Search/List flows (spec §4.6, §4.7). The client-facing
    // Upload/Download/Status boundary itself is plain async methods on the
    // coordinator, consumed in-process by the excluded web collaborator — it is not
    // a wire message, since that collaborator's own transport is out of scope here.
    Propose(LogRecord),
    ReadFile(FileKey),
    ReadShard(ShardId),
    ListFiles {
        owner: String,
    },
    WhoIsLeader,
    ShardsUnderReplicated {
        target_r: usize,
        /// Nodes the caller currently considers live. The remote view has no
        /// membership knowledge of its own, so a shard's replica set is
        /// intersected against this list before being compared to `target_r`.
        live_nodes: Vec<NodeId>,
    },

    // Metadata log (spec §4.6).
    RequestVote(RequestVote),
    AppendEntries(AppendEntries),
    InstallSnapshot(InstallSnapshot),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RpcResponse {
    Ack,
    Chunk(Vec<u8>),
    Load(LoadVector),
    FileList(Vec<FileAttributes>),
    FileInfo(Option<FileAttributes>),
    ShardInfoResp(Option<ShardInfo>),
    ShardInfoList(Vec<ShardInfo>),
    ProposeOk(LogIndex),
    NotLeader(Option<NodeId>),
    LeaderInfo(Option<NodeId>),
    VoteResponse(RequestVoteResponse),
    AppendResponse(AppendEntriesResponse),
    SnapshotResponse(InstallSnapshotResponse),
    Error(String),
}

/// Status document assembled by the coordinator's `Status` flow (spec §6: "Status is a
/// JSON document containing active node list, per-node load, cache hit rate, and
/// current leader id").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterStatus {
    pub active_nodes: Vec<NodeId>,
    pub node_loads: Vec<(NodeId, LoadVector)>,
    pub cache_hit_rate: f64,
    pub current_leader: Option<NodeId>,
}
