//! `shardkeeper-coordinator`: the SuperNode process (spec §2, §4.7).
//!
//! Holds the in-process `Coordinator` (cluster view, placement, and the
//! Upload/Download/Delete/Search/List/Status flows) and runs the background
//! `FailureDetector` and `ReplicationWorker` for the lifetime of the process. Per
//! spec's scope this binary has no client-facing listener of its own — an
//! out-of-scope outer surface (HTTP, gRPC, whatever a deployer fronts this with)
//! is expected to hold a handle to `coordinator` and call its flow methods
//! directly; this process exists to keep the background workers alive and to be
//! a concrete, runnable demonstration that the wiring is complete.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use shardkeeper_coordinator::{Coordinator, RunningCoordinator};
use shardkeeper_core::{ClusterConfig, NodeId, Services};
use tokio::signal;

#[derive(Parser, Debug)]
#[command(name = "shardkeeper-coordinator", about = "ShardKeeper coordinator (SuperNode) process")]
struct Args {
    /// Path to the cluster configuration document (spec §6).
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive("shardkeeper=info".parse()?))
        .json()
        .init();

    let args = Args::parse();
    let config = ClusterConfig::load(args.config.as_deref())?;
    let services = Services::new(config)?;

    let quorum_nodes: Vec<NodeId> = services
        .config
        .nodes
        .iter()
        .filter(|n| n.primary)
        .map(|n| NodeId::from(n.raft_address()))
        .collect();
    if quorum_nodes.is_empty() {
        anyhow::bail!("cluster configuration names no metadata quorum nodes (no entry has primary = true)");
    }

    let coordinator = Arc::new(Coordinator::new(&services, quorum_nodes));
    let running = RunningCoordinator::start(coordinator.clone());

    tracing::info!(
        super_node = %services.config.super_node_address,
        quorum = running.coordinator.router().quorum_nodes().len(),
        "shardkeeper-coordinator started; failure detector and replication worker running"
    );

    match signal::ctrl_c().await {
        Ok(()) => tracing::info!("shutdown signal received"),
        Err(e) => tracing::error!(error = %e, "failed to listen for shutdown signal"),
    }

    running.shutdown().await;
    Ok(())
}
