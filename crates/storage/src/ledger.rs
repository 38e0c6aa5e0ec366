//! Bookkeeping rules shared by every store implementation
//!
//! These run inside a store's write path. Validation of membership
//! transactions happens in the kernel before anything is written; the rules
//! here only keep the persisted records consistent.

use crate::{NodeOperation, RoundRecord, StoreError};
use kernel_common::{ConsensusNode, Hash, Key, NodeState, Transaction, TransactionType};

/// Expected number for the next round of a node
pub fn check_round_sequence(
    node_id: &Hash,
    current: Option<&RoundRecord>,
    number: u64,
) -> Result<(), StoreError> {
    let expected = current.map(|r| r.number + 1).unwrap_or(0);
    if number != expected {
        return Err(StoreError::InvalidRoundSequence {
            node_id: *node_id,
            expected,
            actual: number,
        });
    }
    Ok(())
}

/// Signer and payee of a membership transaction, `None` for other kinds
pub fn membership_keys(tx: &Transaction) -> Result<Option<(Key, Key)>, StoreError> {
    if !tx.transaction_type().is_membership() {
        return Ok(None);
    }
    tx.node_keys()
        .map(Some)
        .ok_or_else(|| StoreError::InvalidNodePayload(tx.hash()))
}

/// New record for the node touched by a membership transaction.
///
/// Accept without a prior record is allowed: genesis validators are written
/// as accepted directly.
pub fn node_transition(
    existing: Option<ConsensusNode>,
    signer: Key,
    payee: Key,
    tx: &Transaction,
    timestamp: u64,
) -> Result<ConsensusNode, StoreError> {
    let state = match tx.transaction_type() {
        TransactionType::NodePledge => NodeState::Pledging,
        TransactionType::NodeAccept => NodeState::Accepted,
        TransactionType::NodeDepart | TransactionType::NodeRemove if existing.is_none() => {
            return Err(StoreError::UnknownNode(signer));
        }
        TransactionType::NodeDepart => NodeState::Departed,
        TransactionType::NodeRemove => NodeState::Removed,
        TransactionType::Script => return Err(StoreError::InvalidNodePayload(tx.hash())),
    };

    let payee = existing.map(|n| n.payee).unwrap_or(payee);
    Ok(ConsensusNode {
        signer,
        payee,
        state,
        timestamp,
        transaction: tx.hash(),
    })
}

/// Deterministic order used by `load_consensus_nodes`
pub fn sort_consensus_nodes(nodes: &mut [ConsensusNode]) {
    nodes.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then(a.signer.cmp(&b.signer)));
}

/// Check the operation lock and return the operation to store.
///
/// A different transaction may not replace the pending one until
/// `lock_threshold` nanoseconds after it was registered.
pub fn next_node_operation(
    current: Option<&NodeOperation>,
    tx: &Transaction,
    timestamp: u64,
    lock_threshold: u64,
) -> Result<NodeOperation, StoreError> {
    let hash = tx.hash();
    if let Some(op) = current {
        if op.timestamp.saturating_add(lock_threshold) >= timestamp && op.transaction != hash {
            return Err(StoreError::NodeOperationLocked {
                locked_by: op.transaction,
                transaction: hash,
            });
        }
    }
    Ok(NodeOperation {
        transaction: hash,
        timestamp,
    })
}
