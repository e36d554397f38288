//! End-to-end: upload a file, kill the node holding one of its replicas, and watch
//! the coordinator's background `ReplicationWorker` repair it onto a fresh node
//! within a bounded time (spec §4.4, §8).

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use shardkeeper_cache::{HybridCache, WritebackQueue};
use shardkeeper_consensus::{ConsensusEngine, MaterializedView, SegmentLog};
use shardkeeper_coordinator::{Coordinator, RunningCoordinator};
use shardkeeper_core::{ClusterConfig, MetricsRegistry, NodeEntry, NodeId, Services};
use shardkeeper_network::{serve, NetworkClient, NodeHandler};
use shardkeeper_storage::{RequestPool, ShardStore};
use tokio_util::sync::CancellationToken;

/// One in-process storage node. Dropping `cancel` without awaiting `tasks` leaks
/// the spawned tasks, so `kill` always awaits them to make sure the listening
/// socket is actually closed before the test proceeds.
struct TestNode {
    cancel: CancellationToken,
    tasks: Vec<tokio::task::JoinHandle<()>>,
}

impl TestNode {
    async fn kill(self) {
        self.cancel.cancel();
        for t in self.tasks {
            let _ = t.await;
        }
    }
}

fn free_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap().port()
}

async fn spawn_storage_node(
    entry: &NodeEntry,
    data_dir: &Path,
    metrics: Arc<MetricsRegistry>,
    disk_high_water_mark: f64,
    heartbeat_interval: Duration,
) -> TestNode {
    let cache = Arc::new(HybridCache::new(1_000, metrics.clone()));
    let writeback = WritebackQueue::spawn(cache.clone(), 1_000);
    let store = Arc::new(
        ShardStore::open(
            data_dir.join("shards"),
            cache,
            writeback,
            1_000_000_000,
            disk_high_water_mark,
            10_000,
        )
        .await
        .expect("shard store opens"),
    );
    let pool = Arc::new(RequestPool::new(8));
    let cancel = CancellationToken::new();
    let mut tasks = Vec::new();

    let (consensus, view) = if entry.primary {
        let log = Arc::new(SegmentLog::open(data_dir.join("state")).expect("metadata log opens"));
        let view = Arc::new(MaterializedView::new());
        let peers = vec![NodeId::from(entry.raft_address())];
        let transport = Arc::new(NetworkClient::new(metrics.clone()));
        let engine = Arc::new(ConsensusEngine::new(
            NodeId::from(entry.raft_address()),
            peers,
            log,
            view.clone(),
            transport,
            metrics.clone(),
            heartbeat_interval,
        ));
        let engine_for_task = engine.clone();
        let engine_cancel = cancel.clone();
        tasks.push(tokio::spawn(async move { engine_for_task.run(engine_cancel).await }));
        (Some(engine), Some(view))
    } else {
        (None, None)
    };

    let handler = Arc::new(NodeHandler::new(store, pool, consensus, view, metrics));

    let server_addr = entry.server_address();
    let server_cancel = cancel.clone();
    let server_handler = handler.clone();
    tasks.push(tokio::spawn(async move {
        let _ = serve(&server_addr, server_handler, server_cancel).await;
    }));

    if entry.primary {
        let raft_addr = entry.raft_address();
        let raft_cancel = cancel.clone();
        tasks.push(tokio::spawn(async move {
            let _ = serve(&raft_addr, handler, raft_cancel).await;
        }));
    }

    // Give the listener(s) a moment to actually bind before anyone dials them.
    tokio::time::sleep(Duration::from_millis(20)).await;

    TestNode { cancel, tasks }
}

async fn upload_with_retry(coordinator: &Coordinator, owner: &str, name: &str, data: &[u8]) -> shardkeeper_core::FileAttributes {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        match coordinator.upload(owner, name, data).await {
            Ok(attrs) => return attrs,
            Err(e) => {
                if tokio::time::Instant::now() >= deadline {
                    panic!("upload never succeeded (metadata leader never elected?): {e}");
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn kills_a_replica_and_watches_it_get_repaired() {
    let tmp = tempfile::tempdir().unwrap();

    let primary_server_port = free_port();
    let primary_raft_port = free_port();
    let node_b_port = free_port();
    let node_c_port = free_port();

    let nodes = vec![
        NodeEntry {
            hostname: "127.0.0.1".into(),
            server_port: primary_server_port,
            raft_port: primary_raft_port,
            primary: true,
        },
        NodeEntry {
            hostname: "127.0.0.1".into(),
            server_port: node_b_port,
            raft_port: 0,
            primary: false,
        },
        NodeEntry {
            hostname: "127.0.0.1".into(),
            server_port: node_c_port,
            raft_port: 0,
            primary: false,
        },
    ];

    let config = ClusterConfig {
        nodes: nodes.clone(),
        lru_capacity: 1_000,
        upload_shard_size: 4096,
        super_node_address: "127.0.0.1:0".into(),
        replication_factor: 2,
        min_replicas: 1,
        heartbeat_interval: Duration::from_millis(30),
        suspect_threshold: 1,
        dead_threshold: Duration::from_millis(60),
        worker_pool_size: 8,
        disk_high_water_mark: 0.9,
        heartbeat_deadline: Duration::from_millis(50),
        data_dir: tmp.path().to_path_buf(),
    };

    let services = Services::new(config.clone()).unwrap();

    let mut test_nodes = Vec::new();
    for entry in &nodes {
        let data_dir = tmp.path().join(entry.server_address());
        test_nodes.push(
            spawn_storage_node(
                entry,
                &data_dir,
                services.metrics.clone(),
                config.disk_high_water_mark,
                config.heartbeat_interval,
            )
            .await,
        );
    }

    let quorum_nodes: Vec<NodeId> = nodes
        .iter()
        .filter(|n| n.primary)
        .map(|n| NodeId::from(n.raft_address()))
        .collect();
    let coordinator = Arc::new(Coordinator::new(&services, quorum_nodes));
    let running = RunningCoordinator::start(coordinator.clone());

    let payload = b"the quick brown fox jumps over the lazy dog".to_vec();
    let attributes = upload_with_retry(&coordinator, "alice", "report.txt", &payload).await;
    assert_eq!(attributes.shards.len(), 1);
    let shard_id = attributes.shards[0];

    let shard = coordinator.read_shard(shard_id).await.unwrap().expect("shard exists after upload");
    assert_eq!(shard.replica_set.len(), 2, "replication_factor=2, both primaries acked");

    // Kill whichever of node_b/node_c holds a replica (never the quorum node — the
    // primary also serves as a storage node here, and killing it would take the
    // metadata log down with it).
    let node_b_addr = NodeId::from(format!("127.0.0.1:{node_b_port}"));
    let node_c_addr = NodeId::from(format!("127.0.0.1:{node_c_port}"));
    let dead_node = if shard.replica_set.contains(&node_b_addr) {
        node_b_addr.clone()
    } else {
        node_c_addr.clone()
    };
    assert!(shard.replica_set.contains(&dead_node));

    // test_nodes is ordered [primary, node_b, node_c] (spawned in the same order
    // as `nodes` above).
    let dead_index = if dead_node == node_b_addr { 1 } else { 2 };
    test_nodes.remove(dead_index).kill().await;

    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let shard = coordinator.read_shard(shard_id).await.unwrap().expect("shard still known");
        let live_replica_count = shard.replica_set.iter().filter(|n| *n != &dead_node).count();
        if live_replica_count >= 2 {
            break;
        }
        if tokio::time::Instant::now() >= deadline {
            panic!("shard was not repaired back to 2 live replicas within the deadline; replica_set = {:?}", shard.replica_set);
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    let downloaded = coordinator.download("alice", "report.txt").await.unwrap();
    assert_eq!(downloaded, payload, "file is still fully readable after the repair");

    running.shutdown().await;
    for node in test_nodes {
        node.kill().await;
    }
}
