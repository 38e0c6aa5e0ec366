//! Consensus node records

use crate::hash::Hash;
use crate::keys::Key;
use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Membership lifecycle state of a validator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub enum NodeState {
    Pledging,
    Accepted,
    Departed,
    Removed,
}

impl NodeState {
    /// Departed and removed nodes never change state again
    pub fn is_terminal(&self) -> bool {
        matches!(self, NodeState::Departed | NodeState::Removed)
    }
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NodeState::Pledging => "PLEDGING",
            NodeState::Accepted => "ACCEPTED",
            NodeState::Departed => "DEPARTED",
            NodeState::Removed => "REMOVED",
        };
        f.write_str(s)
    }
}

/// A validator as recorded by the store
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct ConsensusNode {
    pub signer: Key,
    pub payee: Key,
    pub state: NodeState,
    /// When the node entered `state`, nanoseconds since unix epoch
    pub timestamp: u64,
    /// Transaction that moved the node into `state`
    pub transaction: Hash,
}

impl ConsensusNode {
    pub fn id_for_network(&self, network_id: &Hash) -> Hash {
        self.signer.node_id(network_id)
    }
}
