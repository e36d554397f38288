//! Wire message shapes for the metadata log's RPC surface (spec §4.6, §6).

use serde::{Deserialize, Serialize};
use shardkeeper_core::{LogRecord, NodeId};

pub type Term = u64;
pub type LogIndex = u64;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub term: Term,
    pub index: LogIndex,
    pub record: LogRecord,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestVote {
    pub term: Term,
    pub candidate_id: NodeId,
    pub last_log_index: LogIndex,
    pub last_log_term: Term,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestVoteResponse {
    pub term: Term,
    pub vote_granted: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppendEntries {
    pub term: Term,
    pub leader_id: NodeId,
    pub prev_log_index: LogIndex,
    pub prev_log_term: Term,
    pub entries: Vec<LogEntry>,
    pub leader_commit: LogIndex,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppendEntriesResponse {
    pub term: Term,
    pub success: bool,
    /// Highest index the follower's log now agrees with the leader on, used by the
    /// leader to retreat `next_index` efficiently on a rejected append.
    pub match_index: LogIndex,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstallSnapshot {
    pub term: Term,
    pub leader_id: NodeId,
    pub last_included_index: LogIndex,
    pub last_included_term: Term,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstallSnapshotResponse {
    pub term: Term,
}

/// Outbound RPC seam implemented by `shardkeeper-network`, so this crate has no
/// dependency on the transport.
#[async_trait::async_trait]
pub trait ConsensusTransport: Send + Sync {
    async fn send_request_vote(&self, peer: &NodeId, req: RequestVote) -> anyhow::Result<RequestVoteResponse>;
    async fn send_append_entries(&self, peer: &NodeId, req: AppendEntries) -> anyhow::Result<AppendEntriesResponse>;
    async fn send_install_snapshot(
        &self,
        peer: &NodeId,
        req: InstallSnapshot,
    ) -> anyhow::Result<InstallSnapshotResponse>;
}
