//! Genesis validators and the initial round graph they produce

use crate::config::KernelConfig;
use crate::distance::select_closest;
use crate::error::KernelError;
use crate::round::compute_round_hash;
use kernel_common::{Hash, Key, OutputType, RoundLink, Snapshot, SnapshotWithTopologicalOrder, Transaction};
use kernel_storage::Store;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GenesisError {
    #[error("genesis has no nodes")]
    Empty,

    #[error("duplicate genesis signer {0}")]
    DuplicateSigner(Key),

    #[error("invalid genesis file: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenesisNode {
    pub signer: Key,
    pub payee: Key,
}

/// Fixed validator set a network starts from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Genesis {
    /// Network start, nanoseconds since unix epoch
    pub epoch: u64,
    pub nodes: Vec<GenesisNode>,
}

impl Genesis {
    pub fn from_json(json: &str) -> Result<Self, GenesisError> {
        let genesis: Genesis = serde_json::from_str(json).map_err(|e| GenesisError::Invalid(e.to_string()))?;
        genesis.validate()?;
        Ok(genesis)
    }

    pub fn validate(&self) -> Result<(), GenesisError> {
        if self.nodes.is_empty() {
            return Err(GenesisError::Empty);
        }
        let mut seen = HashSet::new();
        for node in &self.nodes {
            if !seen.insert(node.signer) {
                return Err(GenesisError::DuplicateSigner(node.signer));
            }
        }
        Ok(())
    }

    /// Network id committed to the epoch and every genesis key
    pub fn network_id(&self) -> Hash {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&self.epoch.to_be_bytes());
        for node in &self.nodes {
            hasher.update(&node.signer.0);
            hasher.update(&node.payee.0);
        }
        Hash(*hasher.finalize().as_bytes())
    }

    /// Genesis node ids in file order
    pub fn node_ids(&self) -> Vec<Hash> {
        let network_id = self.network_id();
        self.nodes.iter().map(|n| n.signer.node_id(&network_id)).collect()
    }

    /// The accept transaction that admits a genesis node
    pub fn transaction(&self, node: &GenesisNode, config: &KernelConfig) -> Transaction {
        Transaction::node_operation(OutputType::NodeAccept, config.pledge_amount, &node.signer, &node.payee)
    }
}

/// Write the genesis state into an empty store.
///
/// Every genesis node gets an accept transaction, a one-snapshot round 0 and
/// an open round 1 whose external reference is the round 0 of the closest
/// other genesis node. Returns `false` when the store already holds nodes.
pub fn load_genesis(store: &dyn Store, genesis: &Genesis, config: &KernelConfig) -> Result<bool, KernelError> {
    genesis.validate()?;
    if !store.load_consensus_nodes()?.is_empty() {
        return Ok(false);
    }

    let ids = genesis.node_ids();
    let mut round_hashes = Vec::with_capacity(ids.len());
    for (order, (node, node_id)) in genesis.nodes.iter().zip(&ids).enumerate() {
        let tx = genesis.transaction(node, config);
        store.write_transaction(&tx)?;

        let snapshot = Snapshot::new(*node_id, 0, genesis.epoch, tx.hash());
        store.start_new_round(*node_id, 0, None, genesis.epoch)?;
        store.write_snapshot(&SnapshotWithTopologicalOrder {
            snapshot: snapshot.clone(),
            topological_order: order as u64,
        })?;

        let (_, _, hash) = compute_round_hash(node_id, 0, &[snapshot]);
        round_hashes.push(hash);
    }

    let next_round = genesis.epoch + config.snapshot_round_gap + 1;
    for (index, node_id) in ids.iter().enumerate() {
        let others: Vec<Hash> = ids.iter().filter(|id| *id != node_id).copied().collect();
        // a lone genesis node anchors to itself
        let external = match select_closest(node_id, &others) {
            Some(closest) => ids
                .iter()
                .position(|id| *id == closest)
                .map_or(round_hashes[index], |i| round_hashes[i]),
            None => round_hashes[index],
        };
        let link = RoundLink {
            self_hash: round_hashes[index],
            external,
        };
        store.start_new_round(*node_id, 1, Some(link), next_round)?;
    }

    tracing::info!("Loaded genesis with {} nodes", ids.len());
    Ok(true)
}
