//! Storage node request dispatch: routes each `RpcRequest` to the shard store, the
//! bounded request pool, and (for quorum participants) the consensus engine.

use std::sync::Arc;

use shardkeeper_consensus::{ConsensusEngine, MaterializedView};
use shardkeeper_core::{ClusterError, MetricsRegistry};
use shardkeeper_storage::{ChunkSource, RequestPool, ShardStore};

use crate::clients::NetworkClient;
use crate::envelope::{RpcRequest, RpcResponse};
use crate::transport::RequestHandler;

pub struct NodeHandler {
    store: Arc<ShardStore>,
    pool: Arc<RequestPool>,
    consensus: Option<Arc<ConsensusEngine>>,
    view: Option<Arc<MaterializedView>>,
    chunk_source: Arc<NetworkClient>,
}

impl NodeHandler {
    pub fn new(
        store: Arc<ShardStore>,
        pool: Arc<RequestPool>,
        consensus: Option<Arc<ConsensusEngine>>,
        view: Option<Arc<MaterializedView>>,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        Self {
            store,
            pool,
            consensus,
            view,
            chunk_source: Arc::new(NetworkClient::new(metrics)),
        }
    }

    async fn dispatch(&self, request: RpcRequest) -> Result<RpcResponse, ClusterError> {
        match request {
            RpcRequest::PutChunk {
                shard_id,
                bytes,
                expected_digest,
            } => {
                self.store.put_chunk(shard_id, std::sync::Arc::from(bytes), expected_digest).await?;
                Ok(RpcResponse::Ack)
            }
            RpcRequest::GetChunk { shard_id } => {
                let bytes = self.store.get_chunk(shard_id).await?;
                Ok(RpcResponse::Chunk(bytes.to_vec()))
            }
            RpcRequest::DeleteChunk { shard_id } => {
                self.store.delete_chunk(shard_id).await?;
                Ok(RpcResponse::Ack)
            }
            RpcRequest::Heartbeat => Ok(RpcResponse::Load(self.store.load_vector())),
            RpcRequest::ReplicateFrom { shard_id, source } => {
                self.store.replicate_from(shard_id, &source, self.chunk_source.as_ref()).await?;
                Ok(RpcResponse::Ack)
            }
            RpcRequest::RequestVote(req) => match &self.consensus {
                Some(engine) => Ok(RpcResponse::VoteResponse(engine.handle_request_vote(req).await)),
                None => Err(ClusterError::Cancelled("node is not a metadata quorum participant".into())),
            },
            RpcRequest::AppendEntries(req) => match &self.consensus {
                Some(engine) => Ok(RpcResponse::AppendResponse(engine.handle_append_entries(req).await)),
                None => Err(ClusterError::Cancelled("node is not a metadata quorum participant".into())),
            },
            RpcRequest::InstallSnapshot(req) => match &self.consensus {
                Some(engine) => Ok(RpcResponse::SnapshotResponse(engine.handle_install_snapshot(req).await)),
                None => Err(ClusterError::Cancelled("node is not a metadata quorum participant".into())),
            },
            RpcRequest::Propose(record) => match &self.consensus {
                Some(engine) => match engine.propose(record).await {
                    Ok(index) => Ok(RpcResponse::ProposeOk(index)),
                    Err(ClusterError::LeaderChanged(leader)) => Ok(RpcResponse::NotLeader(leader)),
                    Err(e) => Err(e),
                },
                None => Err(ClusterError::Cancelled("node is not a metadata quorum participant".into())),
            },
            RpcRequest::ReadFile(key) => match &self.view {
                Some(view) => Ok(RpcResponse::FileInfo(view.file(&key))),
                None => Err(ClusterError::Cancelled("node has no metadata view".into())),
            },
            RpcRequest::ReadShard(shard_id) => match &self.view {
                Some(view) => Ok(RpcResponse::ShardInfoResp(view.shard(shard_id))),
                None => Err(ClusterError::Cancelled("node has no metadata view".into())),
            },
            RpcRequest::ListFiles { owner } => match &self.view {
                Some(view) => Ok(RpcResponse::FileList(view.list_files(&owner))),
                None => Err(ClusterError::Cancelled("node has no metadata view".into())),
            },
            RpcRequest::WhoIsLeader => match &self.consensus {
                Some(engine) => Ok(RpcResponse::LeaderInfo(engine.current_leader().await)),
                None => Err(ClusterError::Cancelled("node is not a metadata quorum participant".into())),
            },
            RpcRequest::ShardsUnderReplicated { target_r, live_nodes } => match &self.view {
                Some(view) => Ok(RpcResponse::ShardInfoList(view.shards_with_live_replica_count_below(target_r, &live_nodes))),
                None => Err(ClusterError::Cancelled("node has no metadata view".into())),
            },
        }
    }
}

#[async_trait::async_trait]
impl RequestHandler for NodeHandler {
    async fn handle(&self, request: RpcRequest) -> RpcResponse {
        let pool = self.pool.clone();
        let result = pool.run(|| self.dispatch(request)).await;
        match result {
            Ok(response) => response,
            Err(err) => RpcResponse::Error(err.to_string()),
        }
    }
}
