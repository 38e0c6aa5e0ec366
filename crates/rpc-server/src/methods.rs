//! RPC Methods - JSON-RPC method handlers over the kernel

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use kernel::{FinalRound, KernelReader, SnapshotSender, SubmitError};
use kernel_common::{ConsensusNode, Hash, RoundLink, Snapshot, Transaction};
use serde::{Deserialize, Serialize};
use std::{
    str::FromStr,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

/// RPC context shared across handlers
pub struct RpcContext {
    pub reader: KernelReader,
    pub snapshot_sender: SnapshotSender,
    pub network_id: Hash,
    /// Cleared once the snapshot processor stops
    pub processor_running: Arc<AtomicBool>,
}

// ============ Request/Response Types ============

#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitSnapshotRequest {
    /// Base64 borsh snapshot
    pub snapshot: String,
    /// Base64 borsh transaction referenced by the snapshot
    #[serde(default)]
    pub transaction: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitSnapshotResponse {
    pub snapshot: Hash,
    pub transaction: Hash,
}

/// Open and last closed round of one node
#[derive(Debug, Serialize)]
pub struct NodeRounds {
    #[serde(rename = "nodeId")]
    pub node_id: Hash,
    #[serde(rename = "cacheRound")]
    pub cache_round: Option<CacheRoundInfo>,
    #[serde(rename = "finalRound")]
    pub final_round: Option<FinalRound>,
}

#[derive(Debug, Serialize)]
pub struct CacheRoundInfo {
    pub number: u64,
    pub timestamp: u64,
    pub references: Option<RoundLink>,
    pub snapshots: Vec<Hash>,
}

#[derive(Debug, Serialize)]
pub struct GetGraphResponse {
    pub epoch: u64,
    #[serde(rename = "graphTimestamp")]
    pub graph_timestamp: u64,
    pub nodes: Vec<NodeRounds>,
}

#[derive(Debug, Serialize)]
pub struct ConsensusNodeInfo {
    #[serde(rename = "nodeId")]
    pub node_id: Hash,
    #[serde(flatten)]
    pub node: ConsensusNode,
}

#[derive(Debug, Serialize)]
pub struct GetConsensusNodesResponse {
    pub epoch: u64,
    pub nodes: Vec<ConsensusNodeInfo>,
    pub pledging: Option<ConsensusNodeInfo>,
}

// ============ RPC Handlers ============

fn node_rounds(ctx: &RpcContext, node_id: Hash) -> NodeRounds {
    let graph = ctx.reader.graph();
    NodeRounds {
        node_id,
        cache_round: graph.cache_round(&node_id).map(|cache| CacheRoundInfo {
            number: cache.number,
            timestamp: cache.timestamp,
            references: cache.references,
            snapshots: cache.snapshots.iter().map(Snapshot::hash).collect(),
        }),
        final_round: graph.final_round(&node_id).copied(),
    }
}

/// Handle getGraph RPC method
pub fn handle_get_graph(ctx: &RpcContext) -> Result<GetGraphResponse, RpcError> {
    let graph = ctx.reader.graph();
    let nodes = graph
        .cache_round
        .keys()
        .chain(graph.final_round.keys().filter(|id| !graph.cache_round.contains_key(id)))
        .map(|id| node_rounds(ctx, *id))
        .collect();

    Ok(GetGraphResponse {
        epoch: graph.epoch,
        graph_timestamp: graph.graph_timestamp,
        nodes,
    })
}

/// Handle getRound RPC method
pub fn handle_get_round(ctx: &RpcContext, node_id: &str) -> Result<Option<NodeRounds>, RpcError> {
    let node_id = Hash::from_str(node_id).map_err(|_| RpcError::InvalidParams("Invalid node id".to_string()))?;
    let rounds = node_rounds(ctx, node_id);
    if rounds.cache_round.is_none() && rounds.final_round.is_none() {
        return Ok(None);
    }
    Ok(Some(rounds))
}

/// Handle getConsensusNodes RPC method
pub fn handle_get_consensus_nodes(ctx: &RpcContext) -> Result<GetConsensusNodesResponse, RpcError> {
    let validators = ctx.reader.validators();
    let info = |node: &ConsensusNode| ConsensusNodeInfo {
        node_id: node.id_for_network(&ctx.network_id),
        node: node.clone(),
    };

    Ok(GetConsensusNodesResponse {
        epoch: validators.epoch,
        nodes: validators.all.iter().map(info).collect(),
        pledging: validators.pledging.as_ref().map(info),
    })
}

/// Handle submitSnapshot RPC method
pub fn handle_submit_snapshot(
    ctx: &RpcContext,
    request: SubmitSnapshotRequest,
) -> Result<SubmitSnapshotResponse, RpcError> {
    let snapshot_bytes = BASE64
        .decode(&request.snapshot)
        .map_err(|_| RpcError::InvalidParams("Invalid base64 encoding".to_string()))?;
    let snapshot = Snapshot::from_bytes(&snapshot_bytes)
        .map_err(|_| RpcError::InvalidParams("Invalid snapshot format".to_string()))?;

    let transaction = match request.transaction {
        Some(encoded) => {
            let tx_bytes = BASE64
                .decode(&encoded)
                .map_err(|_| RpcError::InvalidParams("Invalid base64 encoding".to_string()))?;
            let tx = Transaction::from_bytes(&tx_bytes)
                .map_err(|_| RpcError::InvalidParams("Invalid transaction format".to_string()))?;
            if tx.hash() != snapshot.transaction {
                return Err(RpcError::InvalidParams(format!(
                    "Transaction {} does not match snapshot reference {}",
                    tx.hash(),
                    snapshot.transaction
                )));
            }
            Some(tx)
        }
        None => None,
    };

    let response = SubmitSnapshotResponse {
        snapshot: snapshot.hash(),
        transaction: snapshot.transaction,
    };
    ctx.snapshot_sender
        .send(snapshot, transaction)
        .map_err(|e: SubmitError| RpcError::InternalError(e.to_string()))?;

    tracing::debug!("Queued snapshot {}", response.snapshot);
    Ok(response)
}

/// Handle getHealth RPC method
pub fn handle_get_health(ctx: &RpcContext) -> Result<String, RpcError> {
    if !ctx.processor_running.load(Ordering::SeqCst) {
        return Err(RpcError::InternalError("Kernel halted".to_string()));
    }
    Ok("ok".to_string())
}

/// RPC errors
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    #[error("Invalid params: {0}")]
    InvalidParams(String),

    #[error("Internal error: {0}")]
    InternalError(String),

    #[error("Method not found: {0}")]
    MethodNotFound(String),
}
