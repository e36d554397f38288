//! Background task orchestration for a running coordinator process (spec §4.4, §4.5).
//!
//! Mirrors the teacher lineage's single top-level orchestrator: one struct owns the
//! spawned task handles and the cancellation token, constructed once at startup and
//! torn down once at shutdown.

use std::sync::Arc;

use shardkeeper_network::FailureDetector;
use shardkeeper_storage::{ReplicateDispatcher, ReplicationView, ReplicationWorker};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::coordinator::Coordinator;
use crate::replication_view::RemoteReplicationView;

pub struct RunningCoordinator {
    pub coordinator: Arc<Coordinator>,
    cancel: CancellationToken,
    failure_detector: JoinHandle<()>,
    replication_worker: JoinHandle<()>,
}

impl RunningCoordinator {
    pub fn start(coordinator: Arc<Coordinator>) -> Self {
        let cancel = CancellationToken::new();

        let detector = FailureDetector::new(
            coordinator.membership.clone(),
            coordinator.metrics.clone(),
            coordinator.config.heartbeat_interval,
            coordinator.config.heartbeat_deadline,
            coordinator.config.suspect_threshold,
            coordinator.config.dead_threshold,
        );
        let detector_cancel = cancel.clone();
        let failure_detector = tokio::spawn(async move { detector.run(detector_cancel).await });

        let view: Arc<dyn ReplicationView> = Arc::new(RemoteReplicationView::new(coordinator.client.clone(), coordinator.router.clone()));
        let dispatcher: Arc<dyn ReplicateDispatcher> = coordinator.client.clone();
        let worker = ReplicationWorker::new(
            coordinator.membership.clone(),
            view,
            dispatcher,
            coordinator.metrics.clone(),
            coordinator.config.replication_factor,
            coordinator.config.min_replicas,
            coordinator.config.heartbeat_interval,
            coordinator.config.disk_high_water_mark,
        );
        let worker_cancel = cancel.clone();
        let replication_worker = tokio::spawn(async move { worker.run(worker_cancel).await });

        Self {
            coordinator,
            cancel,
            failure_detector,
            replication_worker,
        }
    }

    pub async fn shutdown(self) {
        self.cancel.cancel();
        let _ = self.failure_detector.await;
        let _ = self.replication_worker.await;
    }
}
