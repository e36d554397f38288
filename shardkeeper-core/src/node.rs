//! Cluster membership table.
//!
//! The membership map is a reader-writer lock over a plain `HashMap`: readers are every
//! component that needs a consistent view of who is live (placement, coordinator status),
//! writers are the failure detector alone (spec §5, §4.5). Snapshots handed to workers are
//! cheap `Arc` clones of an immutable vector, never a back-reference into the lock itself.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;

use crate::types::{LoadVector, NodeId, NodeStatus};

/// A single node's membership record as seen by the failure detector.
#[derive(Debug, Clone)]
pub struct NodeRecord {
    pub id: NodeId,
    pub status: NodeStatus,
    pub load: LoadVector,
    /// Wall-clock instant of the last heartbeat response accepted from this node.
    pub last_heartbeat: Instant,
    /// Consecutive missed heartbeats, reset to zero on every successful response.
    pub missed_heartbeats: u32,
}

impl NodeRecord {
    pub fn joining(id: NodeId, max_shard_count: u64, disk_capacity: u64) -> Self {
        Self {
            id,
            status: NodeStatus::Joining,
            load: LoadVector::empty(max_shard_count, disk_capacity),
            last_heartbeat: Instant::now(),
            missed_heartbeats: 0,
        }
    }
}

/// A point-in-time, immutable view of the membership table handed to workers that must
/// not hold a reference back into the coordinator (spec §9's cyclic-reference flag).
#[derive(Debug, Clone)]
pub struct MembershipSnapshot {
    pub nodes: Vec<NodeRecord>,
}

impl MembershipSnapshot {
    pub fn active(&self) -> impl Iterator<Item = &NodeRecord> {
        self.nodes.iter().filter(|n| n.status == NodeStatus::Active)
    }

    pub fn get(&self, id: &NodeId) -> Option<&NodeRecord> {
        self.nodes.iter().find(|n| &n.id == id)
    }
}

/// Reader-writer guarded membership table. Only the failure detector task calls the
/// `_mut` methods; everyone else reads via `snapshot()`.
pub struct MembershipTable {
    inner: RwLock<HashMap<NodeId, NodeRecord>>,
}

impl MembershipTable {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
        }
    }

    pub fn snapshot(&self) -> Arc<MembershipSnapshot> {
        let guard = self.inner.read();
        Arc::new(MembershipSnapshot {
            nodes: guard.values().cloned().collect(),
        })
    }

    pub fn upsert(&self, record: NodeRecord) {
        self.inner.write().insert(record.id.clone(), record);
    }

    pub fn record_heartbeat(&self, id: &NodeId, load: LoadVector) {
        let mut guard = self.inner.write();
        if let Some(record) = guard.get_mut(id) {
            record.load = load;
            record.last_heartbeat = Instant::now();
            record.missed_heartbeats = 0;
            if record.status == NodeStatus::Suspect || record.status == NodeStatus::Dead {
                tracing::info!(node = %id, from = %record.status, "node recovered on heartbeat");
                record.status = NodeStatus::Active;
            } else if record.status == NodeStatus::Joining {
                record.status = NodeStatus::Active;
            }
        }
    }

    /// Advance one node's suspicion state given a missed heartbeat poll. Returns the new
    /// status if it changed, so the caller can log/count the transition once.
    pub fn mark_missed(
        &self,
        id: &NodeId,
        suspect_threshold: u32,
        dead_after: std::time::Duration,
    ) -> Option<NodeStatus> {
        let mut guard = self.inner.write();
        let record = guard.get_mut(id)?;
        let previous = record.status;
        record.missed_heartbeats += 1;

        match previous {
            NodeStatus::Active if record.missed_heartbeats >= suspect_threshold => {
                record.status = NodeStatus::Suspect;
            }
            NodeStatus::Suspect if record.last_heartbeat.elapsed() >= dead_after => {
                record.status = NodeStatus::Dead;
            }
            _ => {}
        }

        if record.status != previous {
            Some(record.status)
        } else {
            None
        }
    }

    pub fn remove(&self, id: &NodeId) {
        self.inner.write().remove(id);
    }

    /// Immediately flags `id` as having crossed its disk high-water mark, without
    /// waiting for its next heartbeat report (spec §7: "`OutOfSpace` ... demote
    /// node to ineligible for placement"). The node's status is left alone — it
    /// is still alive and reachable, just full — so `placement::select_replicas`
    /// must consult `LoadVector::out_of_space` alongside `NodeStatus::Active` to
    /// honor this. The node's next real heartbeat overwrites `load` wholesale
    /// with its actual figures, so this demotion self-clears once space frees up.
    pub fn mark_out_of_space(&self, id: &NodeId) {
        let mut guard = self.inner.write();
        if let Some(record) = guard.get_mut(id) {
            record.load.disk_used = record.load.disk_capacity.max(1);
        }
    }
}

impl Default for MembershipTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn heartbeat_promotes_joining_to_active() {
        let table = MembershipTable::new();
        let id = NodeId::from("127.0.0.1:9000");
        table.upsert(NodeRecord::joining(id.clone(), 100, 1_000_000));

        table.record_heartbeat(&id, LoadVector::empty(100, 1_000_000));

        let snap = table.snapshot();
        assert_eq!(snap.get(&id).unwrap().status, NodeStatus::Active);
    }

    #[test]
    fn repeated_misses_escalate_to_suspect() {
        let table = MembershipTable::new();
        let id = NodeId::from("127.0.0.1:9000");
        let mut record = NodeRecord::joining(id.clone(), 100, 1_000_000);
        record.status = NodeStatus::Active;
        table.upsert(record);

        let mut last = None;
        for _ in 0..3 {
            last = table.mark_missed(&id, 3, Duration::from_secs(10));
        }
        assert_eq!(last, Some(NodeStatus::Suspect));
    }

    #[test]
    fn suspect_recovers_to_active_on_heartbeat() {
        let table = MembershipTable::new();
        let id = NodeId::from("127.0.0.1:9000");
        let mut record = NodeRecord::joining(id.clone(), 100, 1_000_000);
        record.status = NodeStatus::Suspect;
        table.upsert(record);

        table.record_heartbeat(&id, LoadVector::empty(100, 1_000_000));

        assert_eq!(table.snapshot().get(&id).unwrap().status, NodeStatus::Active);
    }
}
