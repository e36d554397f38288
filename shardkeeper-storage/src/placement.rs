//! Placement & load scoring (spec §4.3).

use shardkeeper_core::{ClusterError, LoadVector, MembershipSnapshot, NodeId, NodeStatus};

/// Score a single candidate; lower is better (spec §4.3).
pub fn load_score(load: &LoadVector) -> f64 {
    load.score()
}

/// Select `r` replica-set members from the current membership snapshot.
///
/// Filters to `Active`, not-out-of-space nodes, scores each by [`load_score`], and
/// takes the `r` lowest-scoring candidates, breaking ties by node id for determinism
/// (spec §4.3). `exclude` is used by the replication worker to keep existing replica
/// holders out of consideration when picking a repair target. `high_water_mark` is the
/// same ratio `ShardStore` enforces locally (spec §7: "`OutOfSpace` ... demote node to
/// ineligible for placement") — a node whose last-reported (or immediately-demoted,
/// see `MembershipTable::mark_out_of_space`) load crosses it is never selected.
pub fn select_replicas(
    snapshot: &MembershipSnapshot,
    r: usize,
    min_live: usize,
    exclude: &[NodeId],
    high_water_mark: f64,
) -> Result<Vec<NodeId>, ClusterError> {
    let mut candidates: Vec<(&NodeId, f64)> = snapshot
        .nodes
        .iter()
        .filter(|n| n.status == NodeStatus::Active)
        .filter(|n| !n.load.out_of_space(high_water_mark))
        .filter(|n| !exclude.contains(&n.id))
        .map(|n| (&n.id, load_score(&n.load)))
        .collect();

    if candidates.len() < min_live {
        return Err(ClusterError::InsufficientCapacity {
            needed: min_live,
            available: candidates.len(),
        });
    }

    candidates.sort_by(|a, b| {
        a.1.partial_cmp(&b.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.cmp(b.0))
    });

    Ok(candidates.into_iter().take(r).map(|(id, _)| id.clone()).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use shardkeeper_core::NodeRecord;
    use std::time::Instant;

    fn node(id: &str, status: NodeStatus, cpu: f64) -> NodeRecord {
        node_with_disk(id, status, cpu, 0)
    }

    fn node_with_disk(id: &str, status: NodeStatus, cpu: f64, disk_used: u64) -> NodeRecord {
        NodeRecord {
            id: NodeId::from(id),
            status,
            load: LoadVector {
                cpu,
                disk_used,
                disk_capacity: 1_000_000,
                shard_count: 0,
                max_shard_count: 100,
            },
            last_heartbeat: Instant::now(),
            missed_heartbeats: 0,
        }
    }

    #[test]
    fn picks_lowest_scoring_active_candidates() {
        let snapshot = MembershipSnapshot {
            nodes: vec![
                node("a", NodeStatus::Active, 0.9),
                node("b", NodeStatus::Active, 0.1),
                node("c", NodeStatus::Dead, 0.0),
                node("d", NodeStatus::Active, 0.5),
            ],
        };
        let picked = select_replicas(&snapshot, 2, 1, &[], 0.9).unwrap();
        assert_eq!(picked, vec![NodeId::from("b"), NodeId::from("d")]);
    }

    #[test]
    fn fails_with_insufficient_capacity_below_min_live() {
        let snapshot = MembershipSnapshot {
            nodes: vec![node("a", NodeStatus::Active, 0.1)],
        };
        let err = select_replicas(&snapshot, 3, 2, &[], 0.9).unwrap_err();
        assert!(matches!(err, ClusterError::InsufficientCapacity { .. }));
    }

    #[test]
    fn excludes_requested_nodes() {
        let snapshot = MembershipSnapshot {
            nodes: vec![
                node("a", NodeStatus::Active, 0.1),
                node("b", NodeStatus::Active, 0.2),
            ],
        };
        let picked = select_replicas(&snapshot, 1, 1, &[NodeId::from("a")], 0.9).unwrap();
        assert_eq!(picked, vec![NodeId::from("b")]);
    }

    #[test]
    fn excludes_nodes_past_the_disk_high_water_mark() {
        let snapshot = MembershipSnapshot {
            nodes: vec![
                node_with_disk("full", NodeStatus::Active, 0.0, 950_000),
                node_with_disk("roomy", NodeStatus::Active, 0.5, 10_000),
            ],
        };
        let picked = select_replicas(&snapshot, 2, 1, &[], 0.9).unwrap();
        assert_eq!(picked, vec![NodeId::from("roomy")]);
    }
}
