//! Links between round chains

use crate::hash::Hash;
use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};

/// References recorded by a round when it is opened.
///
/// `self_hash` is the hash of the node's own previous final round, `external`
/// the hash of a final round produced by another validator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct RoundLink {
    #[serde(rename = "self")]
    pub self_hash: Hash,
    pub external: Hash,
}
