//! `shardkeeper-node`: a single storage node process (spec §4.1).
//!
//! Owns a local shard directory and hybrid cache, serves chunk PUT/GET/DELETE and
//! heartbeats on `server_port`, and — if this node is configured as a metadata
//! quorum participant (`primary = true`) — also runs a `ConsensusEngine` and serves
//! `AppendEntries`/`RequestVote`/`InstallSnapshot`/`Propose`/`Read*` on `raft_port`.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use shardkeeper_cache::{HybridCache, WritebackQueue};
use shardkeeper_consensus::{ConsensusEngine, MaterializedView, SegmentLog};
use shardkeeper_core::{ClusterConfig, NodeId, Services};
use shardkeeper_network::{serve, NetworkClient, NodeHandler};
use shardkeeper_storage::{RequestPool, ShardStore};
use tokio::signal;
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[command(name = "shardkeeper-node", about = "ShardKeeper storage node process")]
struct Args {
    /// Path to the cluster configuration document (spec §6).
    #[arg(long)]
    config: Option<PathBuf>,

    /// This node's `server_address` (`hostname:server_port`) as it appears in the
    /// configuration's node list — identifies which entry describes this process.
    #[arg(long)]
    listen: String,

    /// Total shard-directory volume capacity in bytes, used against
    /// `disk_high_water_mark` (spec §4.1). Not part of the shared cluster
    /// configuration document since it is a per-node deployment fact.
    #[arg(long, default_value_t = 100 * 1024 * 1024 * 1024)]
    disk_capacity_bytes: u64,

    /// Soft ceiling used to normalize `shard_count` in the placement load score
    /// (spec §4.3).
    #[arg(long, default_value_t = 100_000)]
    max_shard_count: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive("shardkeeper=info".parse()?))
        .json()
        .init();

    let args = Args::parse();
    let config = ClusterConfig::load(args.config.as_deref())?;
    let entry = config
        .nodes
        .iter()
        .find(|n| n.server_address() == args.listen)
        .cloned()
        .context("--listen does not match any node in the cluster configuration")?;

    let services = Services::new(config.clone())?;
    let config = services.config.clone();

    let cache = Arc::new(HybridCache::new(config.lru_capacity, services.metrics.clone()));
    let writeback = WritebackQueue::spawn(cache.clone(), config.lru_capacity);
    let data_dir = config.data_dir.join(&entry.server_address());
    let store = Arc::new(
        ShardStore::open(
            data_dir.join("shards"),
            cache,
            writeback,
            args.disk_capacity_bytes,
            config.disk_high_water_mark,
            args.max_shard_count,
        )
        .await
        .context("failed to open shard store")?,
    );
    let pool = Arc::new(RequestPool::new(config.worker_pool_size));

    let cancel = CancellationToken::new();
    let mut tasks = Vec::new();

    let (consensus, view) = if entry.primary {
        let log = Arc::new(SegmentLog::open(data_dir.join("state")).context("failed to open metadata log")?);
        let view = Arc::new(MaterializedView::new());
        replay_log_into_view(&log, &view);

        let peers: Vec<NodeId> = config
            .nodes
            .iter()
            .filter(|n| n.primary && n.raft_address() != entry.raft_address())
            .map(|n| NodeId::from(n.raft_address()))
            .collect();
        let transport = Arc::new(NetworkClient::new(services.metrics.clone()));
        let engine = Arc::new(ConsensusEngine::new(
            NodeId::from(entry.raft_address()),
            peers,
            log,
            view.clone(),
            transport,
            services.metrics.clone(),
            config.heartbeat_interval,
        ));

        let engine_for_task = engine.clone();
        let engine_cancel = cancel.clone();
        tasks.push(tokio::spawn(async move { engine_for_task.run(engine_cancel).await }));

        (Some(engine), Some(view))
    } else {
        (None, None)
    };

    let handler = Arc::new(NodeHandler::new(store, pool, consensus, view, services.metrics.clone()));

    let server_cancel = cancel.clone();
    let server_addr = entry.server_address();
    let server_handler = handler.clone();
    tasks.push(tokio::spawn(async move {
        if let Err(e) = serve(&server_addr, server_handler, server_cancel).await {
            tracing::error!(error = %e, "storage RPC server exited");
        }
    }));

    if entry.primary {
        let raft_cancel = cancel.clone();
        let raft_addr = entry.raft_address();
        tasks.push(tokio::spawn(async move {
            if let Err(e) = serve(&raft_addr, handler, raft_cancel).await {
                tracing::error!(error = %e, "metadata RPC server exited");
            }
        }));
    }

    tracing::info!(node = %entry.server_address(), primary = entry.primary, "shardkeeper-node started");

    match signal::ctrl_c().await {
        Ok(()) => tracing::info!("shutdown signal received"),
        Err(e) => tracing::error!(error = %e, "failed to listen for shutdown signal"),
    }

    cancel.cancel();
    for task in tasks {
        let _ = task.await;
    }

    Ok(())
}

fn replay_log_into_view(log: &SegmentLog, view: &MaterializedView) {
    for entry in log.entries_from(1) {
        view.apply(&entry.record);
    }
}
