//! Kernel Common - data model shared by the kernel, its store and the node
//!
//! Contains:
//! - 32-byte BLAKE3 hashes and network-scoped node identifiers
//! - Fixed-point `Integer` amounts (8 fractional digits)
//! - Transactions, snapshots and consensus node records
//! - Round links recorded between round chains

pub mod hash;
pub mod integer;
pub mod keys;
pub mod node;
pub mod round;
pub mod snapshot;
pub mod transaction;

pub use hash::{Hash, HashParseError};
pub use integer::{Integer, IntegerError, PRECISION};
pub use keys::{Key, Signature};
pub use node::{ConsensusNode, NodeState};
pub use round::RoundLink;
pub use snapshot::{Snapshot, SnapshotWithTopologicalOrder};
pub use transaction::{Input, Output, OutputType, Transaction, TransactionType};

/// Identifier of a validator inside a network namespace.
///
/// Always derived as `hash(signer).for_network(network_id)`, see [`Key::node_id`].
pub type NodeId = Hash;
