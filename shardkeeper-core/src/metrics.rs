//! Process-wide metrics registry (spec §4.9 / §6 observability surface).
//!
//! One `MetricsRegistry` is built per process and threaded through the `Services`
//! record; every component increments its own counters against it rather than reaching
//! for a process-global `prometheus::default_registry()`, so tests can build an isolated
//! registry per case.

use prometheus::{Counter, CounterVec, Gauge, HistogramOpts, HistogramVec, Opts, Registry};

use crate::types::ClusterError;

pub struct MetricsRegistry {
    registry: Registry,
    pub errors_total: CounterVec,
    pub node_failures_total: Counter,
    pub node_recoveries_total: Counter,
    pub cache_hits_total: Counter,
    pub cache_misses_total: Counter,
    pub cache_evictions_total: Counter,
    pub cache_size: Gauge,
    pub cache_capacity: Gauge,
    pub replication_repairs_total: Counter,
    pub placement_decisions_total: CounterVec,
    pub nodes_active: Gauge,
    pub nodes_total: Gauge,
    pub heartbeat_checks_total: Counter,
    pub heartbeat_failures_total: Counter,
    pub leader_changes_total: Counter,
    pub election_count: Counter,
    pub rpc_latency_seconds: HistogramVec,
}

impl MetricsRegistry {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let errors_total = CounterVec::new(
            Opts::new("shardkeeper_errors_total", "Errors returned by kind"),
            &["kind"],
        )?;
        let node_failures_total = Counter::new(
            "shardkeeper_node_failures_total",
            "Nodes transitioning to Suspect or Dead",
        )?;
        let node_recoveries_total = Counter::new(
            "shardkeeper_node_recoveries_total",
            "Nodes transitioning back to Active from Suspect/Dead",
        )?;
        let cache_hits_total = Counter::new("shardkeeper_cache_hits_total", "Cache hits")?;
        let cache_misses_total = Counter::new("shardkeeper_cache_misses_total", "Cache misses")?;
        let cache_evictions_total =
            Counter::new("shardkeeper_cache_evictions_total", "Cache evictions")?;
        let cache_size = Gauge::new("shardkeeper_cache_size", "Current cache entry count")?;
        let cache_capacity = Gauge::new("shardkeeper_cache_capacity", "Configured cache entry capacity")?;
        let replication_repairs_total = Counter::new(
            "shardkeeper_replication_repairs_total",
            "Under-replicated shards repaired",
        )?;
        let placement_decisions_total = CounterVec::new(
            Opts::new("shardkeeper_placement_decisions_total", "Replica placements chosen per node"),
            &["node"],
        )?;
        let nodes_active = Gauge::new("shardkeeper_nodes_active", "Nodes currently Active")?;
        let nodes_total = Gauge::new("shardkeeper_nodes_total", "Nodes known to membership")?;
        let heartbeat_checks_total = Counter::new("shardkeeper_heartbeat_checks_total", "Heartbeat polls issued")?;
        let heartbeat_failures_total =
            Counter::new("shardkeeper_heartbeat_failures_total", "Heartbeat polls that did not get a reply")?;
        let leader_changes_total =
            Counter::new("shardkeeper_leader_changes_total", "Observed changes of the current metadata leader")?;
        let election_count = Counter::new("shardkeeper_election_count", "Leader elections started")?;
        let rpc_latency_seconds = HistogramVec::new(
            HistogramOpts::new("shardkeeper_rpc_latency_seconds", "Outbound RPC round-trip latency"),
            &["rpc"],
        )?;

        registry.register(Box::new(errors_total.clone()))?;
        registry.register(Box::new(node_failures_total.clone()))?;
        registry.register(Box::new(node_recoveries_total.clone()))?;
        registry.register(Box::new(cache_hits_total.clone()))?;
        registry.register(Box::new(cache_misses_total.clone()))?;
        registry.register(Box::new(cache_evictions_total.clone()))?;
        registry.register(Box::new(cache_size.clone()))?;
        registry.register(Box::new(cache_capacity.clone()))?;
        registry.register(Box::new(replication_repairs_total.clone()))?;
        registry.register(Box::new(placement_decisions_total.clone()))?;
        registry.register(Box::new(nodes_active.clone()))?;
        registry.register(Box::new(nodes_total.clone()))?;
        registry.register(Box::new(heartbeat_checks_total.clone()))?;
        registry.register(Box::new(heartbeat_failures_total.clone()))?;
        registry.register(Box::new(leader_changes_total.clone()))?;
        registry.register(Box::new(election_count.clone()))?;
        registry.register(Box::new(rpc_latency_seconds.clone()))?;

        Ok(Self {
            registry,
            errors_total,
            node_failures_total,
            node_recoveries_total,
            cache_hits_total,
            cache_misses_total,
            cache_evictions_total,
            cache_size,
            cache_capacity,
            replication_repairs_total,
            placement_decisions_total,
            nodes_active,
            nodes_total,
            heartbeat_checks_total,
            heartbeat_failures_total,
            leader_changes_total,
            election_count,
            rpc_latency_seconds,
        })
    }

    /// Record an error against its stable metric label (spec §7: "every failure
    /// increments an observability counter").
    pub fn record_error(&self, err: &ClusterError) {
        self.errors_total.with_label_values(&[err.metric_label()]).inc();
    }

    /// Text-exposition rendering, mounted by the excluded web collaborator over HTTP.
    pub fn render(&self) -> anyhow::Result<String> {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let mut buf = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buf)?;
        Ok(String::from_utf8(buf)?)
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new().expect("metric registration with fixed, non-colliding names cannot fail")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_reflects_recorded_samples() {
        let metrics = MetricsRegistry::new().unwrap();
        metrics.cache_capacity.set(128.0);
        metrics.placement_decisions_total.with_label_values(&["n0"]).inc();
        metrics.rpc_latency_seconds.with_label_values(&["put_chunk"]).observe(0.01);
        metrics.election_count.inc();

        let rendered = metrics.render().unwrap();
        assert!(rendered.contains("shardkeeper_cache_capacity 128"));
        assert!(rendered.contains("shardkeeper_placement_decisions_total"));
        assert!(rendered.contains("shardkeeper_rpc_latency_seconds"));
        assert!(rendered.contains("shardkeeper_election_count 1"));
    }
}
