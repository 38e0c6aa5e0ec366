//! Kernel - round graph and consensus membership
//!
//! Architecture:
//! - Every validator keeps a chain of rounds; the open one is the cache round,
//!   closed ones are hash-committed final rounds
//! - A new round links to the node's own previous final round and to a final
//!   round of another validator chosen by hash distance
//! - Membership transactions (pledge, accept, depart, remove) are validated
//!   against the current validator set and rebuild the graph when applied
//! - All mutations run on one worker; readers see immutable graph versions

pub mod clock;
pub mod config;
pub mod distance;
pub mod error;
pub mod genesis;
pub mod graph;
pub mod membership;
pub mod node;
pub mod processor;
pub mod round;
pub mod topology;

#[cfg(test)]
mod tests;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::KernelConfig;
pub use distance::{node_distance, select_closest};
pub use error::{InvariantViolation, KernelError, ValidationError};
pub use genesis::{Genesis, GenesisError, GenesisNode};
pub use graph::{load_round_graph, RoundGraph};
pub use membership::{MembershipRules, ValidatorSet};
pub use node::{Kernel, KernelReader, KernelView};
pub use processor::{ProcessorConfig, SnapshotOutcome, SnapshotProcessor, SnapshotSender, SubmitError};
pub use round::{compute_round_hash, CacheRound, FinalRound};
pub use topology::TopologicalCounter;

/// One hour in nanoseconds
pub const HOUR: u64 = 3_600_000_000_000;

/// One second in nanoseconds
pub const SECOND: u64 = 1_000_000_000;
