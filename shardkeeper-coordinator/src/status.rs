//! Status flow (spec §6: "Status is a JSON document containing active node list,
//! per-node load, cache hit rate, and current leader id").

use shardkeeper_network::ClusterStatus;

use crate::coordinator::Coordinator;

impl Coordinator {
    pub async fn status(&self) -> ClusterStatus {
        let snapshot = self.membership.snapshot();
        let active_nodes = snapshot.active().map(|n| n.id.clone()).collect();
        let node_loads = snapshot.nodes.iter().map(|n| (n.id.clone(), n.load)).collect();

        let hits = self.metrics.cache_hits_total.get();
        let misses = self.metrics.cache_misses_total.get();
        let cache_hit_rate = if hits + misses > 0.0 { hits / (hits + misses) } else { 0.0 };

        let current_leader = self.router.current_leader_hint().await;

        ClusterStatus {
            active_nodes,
            node_loads,
            cache_hit_rate,
            current_leader,
        }
    }
}
