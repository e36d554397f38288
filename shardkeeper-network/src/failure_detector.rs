//! Heartbeat-driven failure detector (spec §4.5).
//!
//! The coordinator polls each known node every `T_hb`. Heartbeats carry a short
//! deadline (200 ms, spec §5) so a slow node is demoted quickly rather than stalling
//! the poll loop.

use std::sync::Arc;
use std::time::Duration;

use shardkeeper_core::{MembershipTable, MetricsRegistry, NodeId, NodeStatus};
use tokio_util::sync::CancellationToken;

use crate::envelope::{RpcRequest, RpcResponse};
use crate::transport::send_request;

pub struct FailureDetector {
    membership: Arc<MembershipTable>,
    metrics: Arc<MetricsRegistry>,
    poll_interval: Duration,
    heartbeat_deadline: Duration,
    suspect_threshold: u32,
    dead_threshold: Duration,
}

impl FailureDetector {
    pub fn new(
        membership: Arc<MembershipTable>,
        metrics: Arc<MetricsRegistry>,
        poll_interval: Duration,
        heartbeat_deadline: Duration,
        suspect_threshold: u32,
        dead_threshold: Duration,
    ) -> Self {
        Self {
            membership,
            metrics,
            poll_interval,
            heartbeat_deadline,
            suspect_threshold,
            dead_threshold,
        }
    }

    pub async fn run(&self, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("failure detector shutting down");
                    return;
                }
                _ = tokio::time::sleep(self.poll_interval) => {
                    self.poll_all().await;
                }
            }
        }
    }

    async fn poll_all(&self) {
        let snapshot = self.membership.snapshot();
        self.metrics.nodes_total.set(snapshot.nodes.len() as f64);
        self.metrics
            .nodes_active
            .set(snapshot.nodes.iter().filter(|n| n.status == NodeStatus::Active).count() as f64);

        let mut handles = Vec::new();
        for node in snapshot.nodes.clone() {
            let membership = self.membership.clone();
            let metrics = self.metrics.clone();
            let deadline = self.heartbeat_deadline;
            let suspect_threshold = self.suspect_threshold;
            let dead_threshold = self.dead_threshold;
            handles.push(tokio::spawn(async move {
                metrics.heartbeat_checks_total.inc();
                let addr = node.id.0.clone();
                match send_request(&addr, &RpcRequest::Heartbeat, deadline).await {
                    Ok(RpcResponse::Load(load)) => {
                        let was_down = node.status == NodeStatus::Suspect || node.status == NodeStatus::Dead;
                        membership.record_heartbeat(&node.id, load);
                        if was_down {
                            metrics.node_recoveries_total.inc();
                        }
                    }
                    _ => {
                        metrics.heartbeat_failures_total.inc();
                        if let Some(new_status) = membership.mark_missed(&node.id, suspect_threshold, dead_threshold) {
                            tracing::info!(node = %node.id, status = %new_status, "node transitioned on missed heartbeat");
                            if matches!(new_status, NodeStatus::Suspect | NodeStatus::Dead) {
                                metrics.node_failures_total.inc();
                            }
                        }
                    }
                }
            }));
        }
        for h in handles {
            let _ = h.await;
        }
    }
}
