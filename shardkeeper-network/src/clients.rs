//! Outbound RPC client adapters implementing the transport seams defined by
//! `shardkeeper-storage` and `shardkeeper-consensus`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use shardkeeper_consensus::{
    AppendEntries, AppendEntriesResponse, ConsensusTransport, InstallSnapshot, InstallSnapshotResponse, RequestVote,
    RequestVoteResponse,
};
use shardkeeper_core::{ClusterError, FileAttributes, FileKey, LogRecord, MetricsRegistry, NodeId, ShardId, ShardInfo};
use shardkeeper_storage::{ChunkSource, ReplicateDispatcher};

use crate::envelope::{RpcRequest, RpcResponse};
use crate::transport::send_request;

/// Default deadline for RPCs that don't carry a more specific one (consensus RPCs use
/// the caller's election/heartbeat cadence instead).
const DEFAULT_RPC_DEADLINE: Duration = Duration::from_secs(5);

pub struct NetworkClient {
    metrics: Arc<MetricsRegistry>,
}

impl NetworkClient {
    pub fn new(metrics: Arc<MetricsRegistry>) -> Self {
        Self { metrics }
    }
}

impl NetworkClient {
    /// Sends `request` and records its round-trip latency under `rpc` (spec §4.9 / §6:
    /// "RPC latency histograms").
    async fn timed_request(&self, addr: &str, request: &RpcRequest, deadline: Duration, rpc: &str) -> anyhow::Result<RpcResponse> {
        let start = Instant::now();
        let result = send_request(addr, request, deadline).await;
        self.metrics.rpc_latency_seconds.with_label_values(&[rpc]).observe(start.elapsed().as_secs_f64());
        result
    }

    /// Submits a metadata record to `leader`, returning `LeaderChanged` if it has
    /// since stepped down (the coordinator retries with the same idempotency key).
    pub async fn propose(&self, leader: &NodeId, record: LogRecord) -> Result<shardkeeper_consensus::LogIndex, ClusterError> {
        let response = self
            .timed_request(&leader.0, &RpcRequest::Propose(record), DEFAULT_RPC_DEADLINE, "propose")
            .await
            .map_err(|e| ClusterError::Timeout(e.to_string()))?;
        match response {
            RpcResponse::ProposeOk(index) => Ok(index),
            RpcResponse::NotLeader(leader) => Err(ClusterError::LeaderChanged(leader)),
            RpcResponse::Error(msg) => Err(ClusterError::Timeout(msg)),
            _ => Err(ClusterError::Timeout("unexpected response to Propose".into())),
        }
    }

    pub async fn read_file(&self, replica: &NodeId, key: FileKey) -> anyhow::Result<Option<FileAttributes>> {
        let response = self
            .timed_request(&replica.0, &RpcRequest::ReadFile(key), DEFAULT_RPC_DEADLINE, "read_file")
            .await?;
        match response {
            RpcResponse::FileInfo(info) => Ok(info),
            other => Err(anyhow::anyhow!("unexpected response to ReadFile: {other:?}")),
        }
    }

    pub async fn read_shard(&self, replica: &NodeId, shard_id: ShardId) -> anyhow::Result<Option<ShardInfo>> {
        let response = self
            .timed_request(&replica.0, &RpcRequest::ReadShard(shard_id), DEFAULT_RPC_DEADLINE, "read_shard")
            .await?;
        match response {
            RpcResponse::ShardInfoResp(info) => Ok(info),
            other => Err(anyhow::anyhow!("unexpected response to ReadShard: {other:?}")),
        }
    }

    pub async fn list_files(&self, replica: &NodeId, owner: &str) -> anyhow::Result<Vec<FileAttributes>> {
        let response = self
            .timed_request(
                &replica.0,
                &RpcRequest::ListFiles { owner: owner.to_string() },
                DEFAULT_RPC_DEADLINE,
                "list_files",
            )
            .await?;
        match response {
            RpcResponse::FileList(list) => Ok(list),
            other => Err(anyhow::anyhow!("unexpected response to ListFiles: {other:?}")),
        }
    }

    pub async fn who_is_leader(&self, replica: &NodeId) -> anyhow::Result<Option<NodeId>> {
        let response = self
            .timed_request(&replica.0, &RpcRequest::WhoIsLeader, DEFAULT_RPC_DEADLINE, "who_is_leader")
            .await?;
        match response {
            RpcResponse::LeaderInfo(leader) => Ok(leader),
            other => Err(anyhow::anyhow!("unexpected response to WhoIsLeader: {other:?}")),
        }
    }

    pub async fn shards_under_replicated(
        &self,
        replica: &NodeId,
        target_r: usize,
        live_nodes: &[NodeId],
    ) -> anyhow::Result<Vec<ShardInfo>> {
        let response = self
            .timed_request(
                &replica.0,
                &RpcRequest::ShardsUnderReplicated {
                    target_r,
                    live_nodes: live_nodes.to_vec(),
                },
                DEFAULT_RPC_DEADLINE,
                "shards_under_replicated",
            )
            .await?;
        match response {
            RpcResponse::ShardInfoList(shards) => Ok(shards),
            other => Err(anyhow::anyhow!("unexpected response to ShardsUnderReplicated: {other:?}")),
        }
    }

    pub async fn heartbeat(&self, node: &NodeId, deadline: Duration) -> anyhow::Result<shardkeeper_core::LoadVector> {
        let response = self.timed_request(&node.0, &RpcRequest::Heartbeat, deadline, "heartbeat").await?;
        match response {
            RpcResponse::Load(load) => Ok(load),
            other => Err(anyhow::anyhow!("unexpected response to Heartbeat: {other:?}")),
        }
    }

    pub async fn put_chunk(
        &self,
        node: &NodeId,
        shard_id: ShardId,
        bytes: std::sync::Arc<[u8]>,
        expected_digest: shardkeeper_core::ContentDigest,
        deadline: Duration,
    ) -> Result<(), ClusterError> {
        let response = self
            .timed_request(
                &node.0,
                &RpcRequest::PutChunk {
                    shard_id,
                    bytes: bytes.to_vec(),
                    expected_digest,
                },
                deadline,
                "put_chunk",
            )
            .await
            .map_err(|e| ClusterError::Timeout(e.to_string()))?;
        match response {
            RpcResponse::Ack => Ok(()),
            RpcResponse::Error(msg) if msg.contains("digest mismatch") => Err(ClusterError::DigestMismatch(shard_id)),
            // The node identity embedded in the node's own error message is not
            // trustworthy (the node has no notion of its own cluster-facing
            // address); use the one the caller actually dialed instead.
            RpcResponse::Error(msg) if msg.contains("out of space") => Err(ClusterError::OutOfSpace(node.clone())),
            RpcResponse::Error(msg) => Err(ClusterError::Timeout(msg)),
            _ => Err(ClusterError::Timeout("unexpected response to PutChunk".into())),
        }
    }

    pub async fn get_chunk(&self, node: &NodeId, shard_id: ShardId, deadline: Duration) -> Result<std::sync::Arc<[u8]>, ClusterError> {
        let response = self
            .timed_request(&node.0, &RpcRequest::GetChunk { shard_id }, deadline, "get_chunk")
            .await
            .map_err(|e| ClusterError::Timeout(e.to_string()))?;
        match response {
            RpcResponse::Chunk(bytes) => Ok(std::sync::Arc::from(bytes)),
            RpcResponse::Error(msg) => Err(ClusterError::NotFound(msg)),
            _ => Err(ClusterError::Timeout("unexpected response to GetChunk".into())),
        }
    }

    pub async fn delete_chunk(&self, node: &NodeId, shard_id: ShardId, deadline: Duration) -> Result<(), ClusterError> {
        let response = self
            .timed_request(&node.0, &RpcRequest::DeleteChunk { shard_id }, deadline, "delete_chunk")
            .await
            .map_err(|e| ClusterError::Timeout(e.to_string()))?;
        match response {
            RpcResponse::Ack => Ok(()),
            _ => Err(ClusterError::Timeout("unexpected response to DeleteChunk".into())),
        }
    }
}

#[async_trait::async_trait]
impl ChunkSource for NetworkClient {
    async fn fetch_chunk(&self, node: &NodeId, shard_id: ShardId) -> Result<std::sync::Arc<[u8]>, ClusterError> {
        let response = self
            .timed_request(&node.0, &RpcRequest::GetChunk { shard_id }, DEFAULT_RPC_DEADLINE, "get_chunk")
            .await
            .map_err(|e| ClusterError::Timeout(e.to_string()))?;
        match response {
            RpcResponse::Chunk(bytes) => Ok(std::sync::Arc::from(bytes)),
            RpcResponse::Error(msg) => Err(ClusterError::NotFound(msg)),
            _ => Err(ClusterError::Timeout("unexpected response to GetChunk".into())),
        }
    }
}

#[async_trait::async_trait]
impl ReplicateDispatcher for NetworkClient {
    async fn dispatch_replicate_from(&self, target: &NodeId, shard_id: ShardId, source: &NodeId) -> anyhow::Result<()> {
        let response = self
            .timed_request(
                &target.0,
                &RpcRequest::ReplicateFrom {
                    shard_id,
                    source: source.clone(),
                },
                DEFAULT_RPC_DEADLINE,
                "replicate_from",
            )
            .await?;
        match response {
            RpcResponse::Ack => Ok(()),
            RpcResponse::Error(msg) => Err(anyhow::anyhow!(msg)),
            _ => Err(anyhow::anyhow!("unexpected response to ReplicateFrom")),
        }
    }
}

#[async_trait::async_trait]
impl ConsensusTransport for NetworkClient {
    async fn send_request_vote(&self, peer: &NodeId, req: RequestVote) -> anyhow::Result<RequestVoteResponse> {
        let response = self
            .timed_request(&peer.0, &RpcRequest::RequestVote(req), DEFAULT_RPC_DEADLINE, "request_vote")
            .await?;
        match response {
            RpcResponse::VoteResponse(r) => Ok(r),
            other => Err(anyhow::anyhow!("unexpected response to RequestVote: {other:?}")),
        }
    }

    async fn send_append_entries(&self, peer: &NodeId, req: AppendEntries) -> anyhow::Result<AppendEntriesResponse> {
        let response = self
            .timed_request(&peer.0, &RpcRequest::AppendEntries(req), DEFAULT_RPC_DEADLINE, "append_entries")
            .await?;
        match response {
            RpcResponse::AppendResponse(r) => Ok(r),
            other => Err(anyhow::anyhow!("unexpected response to AppendEntries: {other:?}")),
        }
    }

    async fn send_install_snapshot(&self, peer: &NodeId, req: InstallSnapshot) -> anyhow::Result<InstallSnapshotResponse> {
        let response = self
            .timed_request(&peer.0, &RpcRequest::InstallSnapshot(req), DEFAULT_RPC_DEADLINE, "install_snapshot")
            .await?;
        match response {
            RpcResponse::SnapshotResponse(r) => Ok(r),
            other => Err(anyhow::anyhow!("unexpected response to InstallSnapshot: {other:?}")),
        }
    }
}
