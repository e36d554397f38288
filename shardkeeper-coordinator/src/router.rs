//! Leader discovery and retry-with-idempotency-key submission (spec §4.6).
//!
//! The coordinator is a pure client of the metadata log: it never runs a
//! `ConsensusEngine` itself, only talks to whichever quorum node is currently
//! leader over the `raft_port` RPC surface. `WhoIsLeader` is the bootstrap/recovery
//! path; the happy path reuses a cached hint until a `LeaderChanged` response proves
//! it stale.

use std::sync::Arc;

use shardkeeper_consensus::LogIndex;
use shardkeeper_core::{ClusterError, LogRecord, NodeId};
use shardkeeper_network::NetworkClient;
use tokio::sync::Mutex;

pub struct LeaderRouter {
    client: Arc<NetworkClient>,
    quorum_nodes: Vec<NodeId>,
    hint: Mutex<Option<NodeId>>,
}

impl LeaderRouter {
    pub fn new(client: Arc<NetworkClient>, quorum_nodes: Vec<NodeId>) -> Self {
        Self {
            client,
            quorum_nodes,
            hint: Mutex::new(None),
        }
    }

    pub fn quorum_nodes(&self) -> &[NodeId] {
        &self.quorum_nodes
    }

    /// Any quorum node, used for the stale-read paths (spec §4.6: "reads may be
    /// served from any replica"). Tries each until one answers.
    pub async fn read_from_any<T, F, Fut>(&self, op: F) -> anyhow::Result<T>
    where
        F: Fn(Arc<NetworkClient>, NodeId) -> Fut,
        Fut: std::future::Future<Output = anyhow::Result<T>>,
    {
        let mut last_err = None;
        for node in &self.quorum_nodes {
            match op(self.client.clone(), node.clone()).await {
                Ok(v) => return Ok(v),
                Err(e) => last_err = Some(e),
            }
        }
        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("no quorum node configured")))
    }

    async fn discover_leader(&self) -> Option<NodeId> {
        for node in &self.quorum_nodes {
            if let Ok(Some(leader)) = self.client.who_is_leader(node).await {
                return Some(leader);
            }
        }
        None
    }

    pub async fn current_leader_hint(&self) -> Option<NodeId> {
        self.hint.lock().await.clone()
    }

    /// Submits `record` to the leader, with the single `LeaderChanged` retry spec
    /// §4.6/§9 call for ("transparent retry against new leader with the same
    /// idempotency key" — the record itself, proposed unchanged on retry).
    pub async fn propose(&self, record: LogRecord) -> Result<LogIndex, ClusterError> {
        let leader = match self.hint.lock().await.clone() {
            Some(l) => l,
            None => self
                .discover_leader()
                .await
                .ok_or_else(|| ClusterError::Timeout("no metadata leader known".into()))?,
        };

        match self.client.propose(&leader, record.clone()).await {
            Ok(index) => {
                *self.hint.lock().await = Some(leader);
                Ok(index)
            }
            Err(ClusterError::LeaderChanged(new_leader)) => {
                let retry_leader = match new_leader {
                    Some(l) => l,
                    None => self
                        .discover_leader()
                        .await
                        .ok_or_else(|| ClusterError::Timeout("no metadata leader known after step-down".into()))?,
                };
                *self.hint.lock().await = Some(retry_leader.clone());
                self.client.propose(&retry_leader, record).await
            }
            Err(e) => Err(e),
        }
    }
}
