//! Kernel Node
//!
//! Opens the store, loads genesis, runs the snapshot processor and serves
//! JSON-RPC until interrupted. State is persisted to disk and survives
//! restarts.

use anyhow::Result;
use clap::Parser;
use kernel::{Genesis, Kernel, ProcessorConfig, SnapshotProcessor, SystemClock};
use kernel_rpc::{HttpRpcServer, RpcContext};
use kernel_storage::SledStore;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod config;

use config::NodeConfig;

/// Consensus kernel node
#[derive(Parser, Debug)]
#[command(name = "kernel-node")]
#[command(about = "Round graph and membership kernel", long_about = None)]
struct Args {
    /// Node configuration file (JSON)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Genesis file (JSON)
    #[arg(long, default_value = "./genesis.json")]
    genesis: PathBuf,

    /// Data directory for persistent state
    #[arg(long, default_value = "./data")]
    data_dir: PathBuf,

    /// HTTP RPC bind address, overrides the config file
    #[arg(long)]
    rpc_addr: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut config = match &args.config {
        Some(path) => NodeConfig::load(path)?,
        None => NodeConfig::default(),
    };
    if let Some(addr) = &args.rpc_addr {
        config.rpc_addr = addr.clone();
    }

    let genesis = Genesis::from_json(&std::fs::read_to_string(&args.genesis)?)?;

    tracing::info!("Starting kernel node");
    tracing::info!("  Signer: {}", config.signer);
    tracing::info!("  HTTP RPC: {}", config.rpc_addr);
    tracing::info!("  Data directory: {:?}", args.data_dir);
    tracing::info!("  Genesis: {} nodes, epoch {}", genesis.nodes.len(), genesis.epoch);

    std::fs::create_dir_all(&args.data_dir)?;
    let store = Arc::new(SledStore::open(&args.data_dir)?);

    let kernel = Kernel::new(
        store.clone(),
        &genesis,
        &config.signer,
        config.kernel.clone(),
        Arc::new(SystemClock),
    )?;
    tracing::info!(
        "Kernel ready: network {}, node {}, membership epoch {}",
        kernel.network_id(),
        kernel.local_id(),
        kernel.membership_epoch()
    );

    let processor = SnapshotProcessor::new(
        kernel,
        ProcessorConfig {
            poll_interval_ms: config.poll_interval_ms,
            queue_capacity: config.queue_capacity,
            ..Default::default()
        },
    );

    let rpc_context = Arc::new(RpcContext {
        reader: processor.reader(),
        snapshot_sender: processor.snapshot_sender(),
        network_id: processor.kernel().network_id(),
        processor_running: processor.running_flag(),
    });

    let mut outcomes = processor.subscribe();
    let running = processor.running_flag();

    let processor_handle = tokio::spawn(processor.run_async());

    let outcome_logger = tokio::spawn(async move {
        while let Ok(outcome) = outcomes.recv().await {
            if outcome.is_accepted() {
                tracing::info!(
                    "Snapshot {} finalized: node {} round {} order {:?}",
                    outcome.snapshot,
                    outcome.node_id,
                    outcome.round_number,
                    outcome.topological_order
                );
            }
        }
    });

    let http_addr = config.rpc_addr.clone();
    let http_server = tokio::spawn(async move {
        let server = HttpRpcServer::new(rpc_context);
        if let Err(e) = server.run(&http_addr).await {
            tracing::error!("HTTP RPC server error: {}", e);
        }
    });

    tracing::info!("Press Ctrl+C to stop.");

    tokio::select! {
        result = processor_handle => {
            match result {
                Ok(Err(e)) => tracing::error!("Snapshot processor halted: {}", e),
                Err(e) => tracing::error!("Snapshot processor task failed: {}", e),
                Ok(Ok(())) => {}
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutting down...");
            running.store(false, std::sync::atomic::Ordering::SeqCst);
        }
    }

    if let Err(e) = store.flush() {
        tracing::error!("Failed to flush store: {}", e);
    }

    outcome_logger.abort();
    http_server.abort();

    tracing::info!("Node stopped");

    Ok(())
}
