//! Kernel Storage - the store adapter consumed by the consensus kernel
//!
//! The kernel never touches a database directly. It calls the [`Store`]
//! trait, which has two implementations:
//! - [`MemoryStore`]: DashMap-backed, used by tests and ephemeral nodes
//! - [`SledStore`]: sled embedded database, used by the node binary

pub mod ledger;
pub mod memory;
pub mod persistence;

pub use memory::MemoryStore;
pub use persistence::SledStore;

use kernel_common::{ConsensusNode, Hash, Key, RoundLink, SnapshotWithTopologicalOrder, Transaction};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from store operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("not found {0}")]
    NotFound(Hash),

    #[error("invalid round sequence for node {node_id}: expected {expected}, got {actual}")]
    InvalidRoundSequence { node_id: Hash, expected: u64, actual: u64 },

    #[error("invalid operation lock {locked_by} {transaction}")]
    NodeOperationLocked { locked_by: Hash, transaction: Hash },

    #[error("invalid node payload in transaction {0}")]
    InvalidNodePayload(Hash),

    #[error("unknown consensus node {0}")]
    UnknownNode(Key),

    #[error("storage I/O error: {0}")]
    Io(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<sled::Error> for StoreError {
    fn from(e: sled::Error) -> Self {
        StoreError::Io(e.to_string())
    }
}

impl From<bincode::Error> for StoreError {
    fn from(e: bincode::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

/// The latest round a node has started
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct RoundRecord {
    pub node_id: Hash,
    pub number: u64,
    pub timestamp: u64,
    /// `None` only for a node's round 0
    pub references: Option<RoundLink>,
}

/// The single pending, time-locked node operation
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct NodeOperation {
    pub transaction: Hash,
    pub timestamp: u64,
}

/// Persistence contract for the kernel.
///
/// Implementations must be safe to share between the kernel worker and
/// read-only reporting code.
pub trait Store: Send + Sync {
    /// All consensus nodes ever recorded, ordered by state timestamp
    fn load_consensus_nodes(&self) -> Result<Vec<ConsensusNode>, StoreError>;

    /// Open round `number` for `node_id`. Fails with
    /// [`StoreError::InvalidRoundSequence`] unless `number` is 0 for a new node
    /// or exactly one past the node's latest round.
    fn start_new_round(
        &self,
        node_id: Hash,
        number: u64,
        references: Option<RoundLink>,
        timestamp: u64,
    ) -> Result<(), StoreError>;

    /// Latest round started by `node_id`
    fn read_round(&self, node_id: &Hash) -> Result<Option<RoundRecord>, StoreError>;

    /// Persist a snapshot. The referenced transaction must already be stored;
    /// membership transactions update the consensus node records atomically
    /// with the snapshot.
    fn write_snapshot(&self, snapshot: &SnapshotWithTopologicalOrder) -> Result<(), StoreError>;

    /// Snapshots of one node round in topological order
    fn read_snapshots_for_node_round(
        &self,
        node_id: &Hash,
        round: u64,
    ) -> Result<Vec<SnapshotWithTopologicalOrder>, StoreError>;

    /// Highest topological order written so far
    fn last_topological_order(&self) -> Result<Option<u64>, StoreError>;

    fn write_transaction(&self, tx: &Transaction) -> Result<(), StoreError>;

    /// Fails with [`StoreError::NotFound`] if absent
    fn read_transaction(&self, hash: &Hash) -> Result<Transaction, StoreError>;

    /// Register `tx` as the pending node operation. Fails while a different
    /// operation is still inside its lock window.
    fn add_node_operation(&self, tx: &Transaction, timestamp: u64, lock_threshold: u64) -> Result<(), StoreError>;
}
