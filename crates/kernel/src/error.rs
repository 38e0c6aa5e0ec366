//! Kernel error types
//!
//! Rejections of incoming snapshots are recoverable. Anything that shows the
//! kernel's own graph or store is inconsistent is an invariant violation and
//! the worker halts on it.

use crate::genesis::GenesisError;
use kernel_common::{Hash, Integer, Key, NodeState, OutputType};
use kernel_storage::StoreError;
use thiserror::Error;

/// A snapshot or transaction failed a kernel rule
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("invalid snapshot timestamp {timestamp} reference {reference}")]
    InvalidSnapshotTimestamp { timestamp: u64, reference: u64 },

    #[error("invalid snapshot signature for node {0}")]
    InvalidSignature(Hash),

    #[error("unknown snapshot node {0}")]
    UnknownSnapshotNode(Hash),

    #[error("invalid snapshot round {0}")]
    InvalidSnapshotRound(u64),

    #[error("snapshot {snapshot} does not fit round {number} of {node_id}")]
    SnapshotOutsideRound { snapshot: Hash, node_id: Hash, number: u64 },

    #[error("invalid node asset {0}")]
    InvalidNodeAsset(Hash),

    #[error("invalid {kind} inputs count {count}")]
    InvalidInputsCount { kind: &'static str, count: usize },

    #[error("invalid {kind} outputs count {count}")]
    InvalidOutputsCount { kind: &'static str, count: usize },

    #[error("invalid {kind} extra length {length}")]
    InvalidExtraLength { kind: &'static str, length: usize },

    #[error("invalid {kind} amount {actual}, expected {expected}")]
    InvalidAmount { kind: &'static str, expected: Integer, actual: Integer },

    #[error("invalid pledge period {elapsed} minimum {minimum}")]
    InvalidPledgePeriod { minimum: u64, elapsed: u64 },

    #[error("invalid node state {signer} {state}")]
    InvalidNodeState { signer: Key, state: NodeState },

    #[error("invalid consensus status")]
    InvalidConsensusStatus,

    #[error("invalid pledging node {expected} {actual}")]
    InvalidPledgingNode { expected: Hash, actual: Hash },

    #[error("invalid pledge utxo source {expected} {actual}")]
    InvalidPledgeSource { expected: Hash, actual: Hash },

    #[error("invalid pledge utxo count {0}")]
    InvalidPledgeOutputCount(usize),

    #[error("invalid pledge utxo type {0:?}")]
    InvalidPledgeOutputType(OutputType),

    #[error("invalid pledge and accept key {pledge} {accept}")]
    InvalidPledgeKeys { pledge: String, accept: String },

    #[error("invalid graph round {node_id} {number}")]
    InvalidGraphRound { node_id: Hash, number: u64 },

    #[error("invalid graph timestamp {timestamp} {graph_timestamp}")]
    InvalidGraphTimestamp { timestamp: u64, graph_timestamp: u64 },

    #[error("invalid node accept hour {0}")]
    InvalidAcceptHour(u64),

    #[error("invalid accept period {elapsed} maximum {maximum}")]
    InvalidAcceptPeriod { maximum: u64, elapsed: u64 },

    #[error("unknown consensus node {0}")]
    UnknownNode(Key),

    #[error("invalid {kind} node {expected} {actual}")]
    InvalidOperationNode { kind: &'static str, expected: Hash, actual: Hash },

    #[error("invalid {kind} utxo source {expected} {actual}")]
    InvalidOperationSource { kind: &'static str, expected: Hash, actual: Hash },

    #[error("invalid {kind} keys {expected} {actual}")]
    InvalidOperationKeys { kind: &'static str, expected: String, actual: String },

    #[error("invalid depart period {elapsed} minimum {minimum}")]
    InvalidDepartPeriod { minimum: u64, elapsed: u64 },

    #[error("node {0} cannot remove itself")]
    SelfRemoval(Hash),

    #[error("node {node_id} still active at {last_active}, remove at {timestamp}")]
    NodeStillActive { node_id: Hash, last_active: u64, timestamp: u64 },
}

/// The kernel's own state is inconsistent
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InvariantViolation {
    #[error("missing cache round for {0}")]
    MissingCacheRound(Hash),

    #[error("missing final round {number} for {node_id}")]
    MissingFinalRound { node_id: Hash, number: u64 },

    #[error("missing references on round {number} of {node_id}")]
    MissingReferences { node_id: Hash, number: u64 },

    #[error("broken self reference on round {number} of {node_id}: expected {expected}, got {actual}")]
    BrokenSelfReference { node_id: Hash, number: u64, expected: Hash, actual: Hash },

    #[error("round {number} of {node_id} already finalized")]
    RoundAlreadyFinal { node_id: Hash, number: u64 },

    #[error("cannot finalize empty round {number} of {node_id}")]
    EmptyRound { node_id: Hash, number: u64 },

    #[error("round {number} of {node_id} does not follow final round {final_number}")]
    RoundGap { node_id: Hash, number: u64, final_number: u64 },

    #[error("snapshot {snapshot} rejected by round {number} of {node_id} after validation")]
    SnapshotOutsideRound { snapshot: Hash, node_id: Hash, number: u64 },

    #[error("no external round available for {0}")]
    NoExternalRound(Hash),

    #[error("round {number} of {node_id} references {external}, which no other node finalized")]
    UnknownExternalReference { node_id: Hash, number: u64, external: Hash },

    #[error("membership epoch mismatch: kernel {kernel}, state {state}")]
    EpochMismatch { kernel: u64, state: u64 },

    #[error("store failure: {0}")]
    Store(StoreError),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KernelError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Genesis(#[from] GenesisError),

    #[error("invariant violation: {0}")]
    Invariant(#[from] InvariantViolation),
}

impl KernelError {
    /// Whether the worker must stop instead of skipping the snapshot
    pub fn is_fatal(&self) -> bool {
        matches!(self, KernelError::Invariant(_))
    }
}

/// Store failures while the graph is being mutated leave it half applied
pub(crate) fn fatal(e: StoreError) -> KernelError {
    KernelError::Invariant(InvariantViolation::Store(e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        let rejected = KernelError::from(ValidationError::InvalidSnapshotRound(1));
        assert!(!rejected.is_fatal());
        assert_eq!(rejected.to_string(), "invalid snapshot round 1");

        let missing = KernelError::from(StoreError::NotFound(Hash::digest(b"tx")));
        assert!(!missing.is_fatal());

        let broken = fatal(StoreError::Io("disk full".to_string()));
        assert!(broken.is_fatal());
        assert!(broken.to_string().contains("disk full"));
    }
}
