//! Leader election and quorum-replicated append (spec §4.6).
//!
//! A classical leader-based log over a fixed quorum set: randomized election timeouts
//! with term numbers, one vote per term per follower, commit on majority-of-`2f+1`,
//! apply-to-view only after commit. `ConsensusTransport` is a seam so this crate never
//! depends on `shardkeeper-network`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::Rng;
use shardkeeper_core::{ClusterError, LogRecord, MetricsRegistry, NodeId};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::log::SegmentLog;
use crate::rpc::{
    AppendEntries, AppendEntriesResponse, ConsensusTransport, InstallSnapshot, InstallSnapshotResponse, LogEntry,
    LogIndex, RequestVote, RequestVoteResponse, Term,
};
use crate::view::MaterializedView;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Follower,
    Candidate,
    Leader,
}

struct EngineState {
    current_term: Term,
    voted_for: Option<(Term, NodeId)>,
    role: Role,
    leader_id: Option<NodeId>,
    commit_index: LogIndex,
    last_applied: LogIndex,
    next_index: HashMap<NodeId, LogIndex>,
    match_index: HashMap<NodeId, LogIndex>,
    last_contact: Instant,
}

pub struct ConsensusEngine {
    id: NodeId,
    peers: Vec<NodeId>,
    log: Arc<SegmentLog>,
    view: Arc<MaterializedView>,
    transport: Arc<dyn ConsensusTransport>,
    metrics: Arc<MetricsRegistry>,
    election_timeout: (Duration, Duration),
    heartbeat_interval: Duration,
    state: Mutex<EngineState>,
}

impl ConsensusEngine {
    pub fn new(
        id: NodeId,
        peers: Vec<NodeId>,
        log: Arc<SegmentLog>,
        view: Arc<MaterializedView>,
        transport: Arc<dyn ConsensusTransport>,
        metrics: Arc<MetricsRegistry>,
        heartbeat_interval: Duration,
    ) -> Self {
        Self {
            id,
            peers,
            log,
            view,
            transport,
            metrics,
            election_timeout: (heartbeat_interval * 5, heartbeat_interval * 10),
            heartbeat_interval,
            state: Mutex::new(EngineState {
                current_term: 0,
                voted_for: None,
                role: Role::Follower,
                leader_id: None,
                commit_index: 0,
                last_applied: 0,
                next_index: HashMap::new(),
                match_index: HashMap::new(),
                last_contact: Instant::now(),
            }),
        }
    }

    pub async fn current_leader(&self) -> Option<NodeId> {
        self.state.lock().await.leader_id.clone()
    }

    pub async fn is_leader(&self) -> bool {
        self.state.lock().await.role == Role::Leader
    }

    fn random_election_timeout(&self) -> Duration {
        let (lo, hi) = self.election_timeout;
        let lo_ms = lo.as_millis() as u64;
        let hi_ms = hi.as_millis().max(lo_ms as u128 + 1) as u64;
        Duration::from_millis(rand::thread_rng().gen_range(lo_ms..hi_ms))
    }

    /// Drives elections and, while leader, periodic heartbeats. Runs until `cancel`.
    pub async fn run(self: &Arc<Self>, cancel: CancellationToken) {
        loop {
            let is_leader = self.is_leader().await;
            let tick = if is_leader {
                self.heartbeat_interval
            } else {
                self.random_election_timeout()
            };

            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!(node = %self.id, "consensus engine shutting down");
                    return;
                }
                _ = tokio::time::sleep(tick) => {}
            }

            if is_leader {
                self.send_heartbeats().await;
            } else {
                let elapsed = self.state.lock().await.last_contact.elapsed();
                if elapsed >= tick {
                    self.start_election().await;
                }
            }
        }
    }

    async fn start_election(self: &Arc<Self>) {
        let (term, last_log_index, last_log_term) = {
            let mut state = self.state.lock().await;
            state.current_term += 1;
            state.role = Role::Candidate;
            state.voted_for = Some((state.current_term, self.id.clone()));
            state.leader_id = None;
            state.last_contact = Instant::now();
            (state.current_term, self.log.last_index(), self.log.last_term())
        };

        tracing::info!(node = %self.id, term, "starting election");
        self.metrics.election_count.inc();

        let votes = Arc::new(std::sync::atomic::AtomicUsize::new(1));
        let majority = self.peers.len() / 2 + 1;

        let mut handles = Vec::new();
        for peer in &self.peers {
            if *peer == self.id {
                continue;
            }
            let peer = peer.clone();
            let transport = self.transport.clone();
            let req = RequestVote {
                term,
                candidate_id: self.id.clone(),
                last_log_index,
                last_log_term,
            };
            handles.push(tokio::spawn(async move { transport.send_request_vote(&peer, req).await }));
        }

        for handle in handles {
            if let Ok(Ok(resp)) = handle.await {
                if resp.vote_granted && resp.term == term {
                    votes.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                } else if resp.term > term {
                    self.step_down(resp.term).await;
                    return;
                }
            }
        }

        let mut state = self.state.lock().await;
        if state.current_term != term || state.role != Role::Candidate {
            return;
        }
        if votes.load(std::sync::atomic::Ordering::SeqCst) >= majority {
            let became_leader = state.leader_id.as_ref() != Some(&self.id);
            state.role = Role::Leader;
            state.leader_id = Some(self.id.clone());
            let next = self.log.last_index() + 1;
            for peer in &self.peers {
                state.next_index.insert(peer.clone(), next);
                state.match_index.insert(peer.clone(), 0);
            }
            if became_leader {
                self.metrics.leader_changes_total.inc();
            }
            tracing::info!(node = %self.id, term, "elected leader");
        }
    }

    async fn step_down(&self, new_term: Term) {
        let mut state = self.state.lock().await;
        if new_term > state.current_term {
            state.current_term = new_term;
            state.voted_for = None;
        }
        state.role = Role::Follower;
        state.last_contact = Instant::now();
    }

    async fn send_heartbeats(self: &Arc<Self>) {
        let (term, commit_index) = {
            let state = self.state.lock().await;
            (state.current_term, state.commit_index)
        };

        for peer in self.peers.clone() {
            if peer == self.id {
                continue;
            }
            let engine = self.clone();
            tokio::spawn(async move {
                let next_index = {
                    let state = engine.state.lock().await;
                    *state.next_index.get(&peer).unwrap_or(&1)
                };
                let prev_index = next_index.saturating_sub(1);
                let prev_term = engine.log.term_at(prev_index).unwrap_or(0);
                let entries = engine.log.entries_from(next_index);

                let req = AppendEntries {
                    term,
                    leader_id: engine.id.clone(),
                    prev_log_index: prev_index,
                    prev_log_term: prev_term,
                    entries,
                    leader_commit: commit_index,
                };

                if let Ok(resp) = engine.transport.send_append_entries(&peer, req).await {
                    engine.handle_append_response(&peer, resp, next_index).await;
                }
            });
        }
    }

    async fn handle_append_response(&self, peer: &NodeId, resp: AppendEntriesResponse, attempted_next: LogIndex) {
        if resp.term > self.state.lock().await.current_term {
            self.step_down(resp.term).await;
            return;
        }
        let mut state = self.state.lock().await;
        if state.role != Role::Leader {
            return;
        }
        if resp.success {
            state.match_index.insert(peer.clone(), resp.match_index);
            state.next_index.insert(peer.clone(), resp.match_index + 1);
            self.maybe_advance_commit(&mut state);
        } else {
            let retreated = attempted_next.saturating_sub(1).max(1);
            state.next_index.insert(peer.clone(), retreated);
        }
    }

    fn maybe_advance_commit(&self, state: &mut EngineState) {
        let mut match_indices: Vec<LogIndex> = state.match_index.values().copied().collect();
        match_indices.push(self.log.last_index());
        match_indices.sort_unstable();
        let majority_index = match_indices[match_indices.len() / 2];

        if majority_index > state.commit_index {
            if self.log.term_at(majority_index) == Some(state.current_term) {
                state.commit_index = majority_index;
            }
        }
    }

    /// Applies all newly committed entries to the materialized view. Called after
    /// every commit-index advance, whether driven by leader majority or follower
    /// `leader_commit` catch-up.
    pub async fn apply_committed(&self) {
        let (commit_index, last_applied) = {
            let state = self.state.lock().await;
            (state.commit_index, state.last_applied)
        };
        for index in (last_applied + 1)..=commit_index {
            if let Some(entry) = self.log.get(index) {
                self.view.apply(&entry.record);
            }
        }
        if commit_index > last_applied {
            self.state.lock().await.last_applied = commit_index;
        }
    }

    /// Leader-only: appends `record`, replicates, and returns once committed. Returns
    /// `LeaderChanged` if this node is not the leader, so the coordinator can retry
    /// against the real leader with the same idempotency key.
    pub async fn propose(self: &Arc<Self>, record: LogRecord) -> Result<LogIndex, ClusterError> {
        let (term, index) = {
            let mut state = self.state.lock().await;
            if state.role != Role::Leader {
                let leader = state.leader_id.clone();
                self.metrics.record_error(&ClusterError::LeaderChanged(leader.clone()));
                return Err(ClusterError::LeaderChanged(leader));
            }
            let index = self.log.last_index() + 1;
            (state.current_term, index)
        };

        self.log
            .append(LogEntry { term, index, record })
            .map_err(|e| ClusterError::Timeout(format!("local log append failed: {e}")))?;

        self.send_heartbeats().await;

        let deadline = Instant::now() + self.heartbeat_interval * 20;
        loop {
            self.apply_committed().await;
            if self.state.lock().await.commit_index >= index {
                return Ok(index);
            }
            if Instant::now() >= deadline {
                return Err(ClusterError::Timeout(format!("commit of index {index} timed out")));
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    pub async fn handle_request_vote(&self, req: RequestVote) -> RequestVoteResponse {
        let mut state = self.state.lock().await;
        if req.term > state.current_term {
            state.current_term = req.term;
            state.voted_for = None;
            state.role = Role::Follower;
        }
        if req.term < state.current_term {
            return RequestVoteResponse {
                term: state.current_term,
                vote_granted: false,
            };
        }

        let can_vote_this_term = match &state.voted_for {
            Some((t, id)) if *t == req.term => id == &req.candidate_id,
            _ => true,
        };
        let our_last_term = self.log.last_term();
        let our_last_index = self.log.last_index();
        let candidate_log_current = req.last_log_term > our_last_term
            || (req.last_log_term == our_last_term && req.last_log_index >= our_last_index);

        let grant = can_vote_this_term && candidate_log_current;

        if grant {
            state.voted_for = Some((req.term, req.candidate_id.clone()));
            state.last_contact = Instant::now();
        }

        RequestVoteResponse {
            term: state.current_term,
            vote_granted: grant,
        }
    }

    pub async fn handle_append_entries(&self, req: AppendEntries) -> AppendEntriesResponse {
        let mut state = self.state.lock().await;
        if req.term < state.current_term {
            return AppendEntriesResponse {
                term: state.current_term,
                success: false,
                match_index: 0,
            };
        }

        state.current_term = req.term;
        state.role = Role::Follower;
        if state.leader_id.as_ref() != Some(&req.leader_id) {
            self.metrics.leader_changes_total.inc();
        }
        state.leader_id = Some(req.leader_id.clone());
        state.last_contact = Instant::now();
        let current_term = state.current_term;
        drop(state);

        if req.prev_log_index > 0 {
            match self.log.term_at(req.prev_log_index) {
                Some(t) if t == req.prev_log_term => {}
                _ => {
                    return AppendEntriesResponse {
                        term: current_term,
                        success: false,
                        match_index: 0,
                    };
                }
            }
        }

        if let Err(e) = self.log.append_after_conflict_check(&req.entries) {
            tracing::warn!(error = %e, "failed to persist replicated entries");
            return AppendEntriesResponse {
                term: current_term,
                success: false,
                match_index: 0,
            };
        }

        let match_index = req.entries.last().map(|e| e.index).unwrap_or(req.prev_log_index);

        {
            let mut state = self.state.lock().await;
            if req.leader_commit > state.commit_index {
                state.commit_index = req.leader_commit.min(self.log.last_index());
            }
        }
        self.apply_committed().await;

        AppendEntriesResponse {
            term: current_term,
            success: true,
            match_index,
        }
    }

    pub async fn handle_install_snapshot(&self, req: InstallSnapshot) -> InstallSnapshotResponse {
        let mut state = self.state.lock().await;
        if req.term < state.current_term {
            return InstallSnapshotResponse { term: state.current_term };
        }
        state.current_term = req.term;
        state.role = Role::Follower;
        if state.leader_id.as_ref() != Some(&req.leader_id) {
            self.metrics.leader_changes_total.inc();
        }
        state.leader_id = Some(req.leader_id.clone());
        state.last_contact = Instant::now();
        let term = state.current_term;
        drop(state);

        if let Ok(snapshot) = bincode::deserialize::<crate::snapshot::SnapshotData>(&req.data) {
            self.view.replace_all(snapshot.files, snapshot.shards);
            tracing::info!(last_included_index = req.last_included_index, "installed snapshot");
        } else {
            tracing::warn!("received unparseable snapshot, ignoring");
        }

        InstallSnapshotResponse { term }
    }
}
