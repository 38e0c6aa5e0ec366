//! Cache and final rounds

use kernel_common::{Hash, RoundLink, Snapshot};
use serde::Serialize;

/// Hash of a round from its node, number and snapshots.
///
/// Returns `(start, end, hash)` where start and end are the smallest and
/// largest snapshot timestamps. Snapshots are folded in the order given, so
/// callers must pass them in topological order. An empty round yields
/// `(0, 0, base)`.
pub fn compute_round_hash(node_id: &Hash, number: u64, snapshots: &[Snapshot]) -> (u64, u64, Hash) {
    let mut hasher = blake3::Hasher::new();
    hasher.update(node_id.as_bytes());
    hasher.update(&number.to_be_bytes());
    let mut hash = Hash(*hasher.finalize().as_bytes());

    if snapshots.is_empty() {
        return (0, 0, hash);
    }

    let mut start = u64::MAX;
    let mut end = 0;
    for snapshot in snapshots {
        start = start.min(snapshot.timestamp);
        end = end.max(snapshot.timestamp);

        let mut hasher = blake3::Hasher::new();
        hasher.update(hash.as_bytes());
        hasher.update(snapshot.hash().as_bytes());
        hash = Hash(*hasher.finalize().as_bytes());
    }
    (start, end, hash)
}

/// The open round of a node
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheRound {
    pub node_id: Hash,
    pub number: u64,
    /// Opening time; no snapshot in the round may be earlier
    pub timestamp: u64,
    /// `None` only for round 0
    pub references: Option<RoundLink>,
    pub snapshots: Vec<Snapshot>,
}

impl CacheRound {
    pub fn new(node_id: Hash, number: u64, timestamp: u64, references: Option<RoundLink>) -> Self {
        Self {
            node_id,
            number,
            timestamp,
            references,
            snapshots: Vec::new(),
        }
    }

    /// Earliest snapshot timestamp, if the round has any snapshot
    pub fn start(&self) -> Option<u64> {
        self.snapshots.iter().map(|s| s.timestamp).min()
    }

    pub fn is_full(&self, capacity: usize) -> bool {
        self.snapshots.len() >= capacity
    }

    /// Whether `snapshot` belongs in this round.
    ///
    /// A snapshot fits when it carries this node and round, is not earlier
    /// than the round opening, stays inside the round gap counted from the
    /// first snapshot, and repeats neither the hash, the timestamp nor the
    /// transaction of a snapshot already in the round.
    pub fn fits(&self, snapshot: &Snapshot, round_gap: u64) -> bool {
        if snapshot.node_id != self.node_id || snapshot.round_number != self.number {
            return false;
        }
        if snapshot.timestamp < self.timestamp {
            return false;
        }
        if let Some(start) = self.start() {
            if snapshot.timestamp >= start.saturating_add(round_gap) {
                return false;
            }
        }

        let hash = snapshot.hash();
        !self.snapshots.iter().any(|s| {
            s.hash() == hash || s.timestamp == snapshot.timestamp || s.transaction == snapshot.transaction
        })
    }

    /// [`CacheRound::fits`], appending the snapshot when `add` is set
    pub fn validate_snapshot(&mut self, snapshot: &Snapshot, add: bool, round_gap: u64) -> bool {
        if !self.fits(snapshot, round_gap) {
            return false;
        }
        if add {
            self.snapshots.push(snapshot.clone());
        }
        true
    }

    /// Close the round, committing its snapshots to a hash
    pub fn finalize(self) -> FinalRound {
        let (start, end, hash) = compute_round_hash(&self.node_id, self.number, &self.snapshots);
        FinalRound {
            node_id: self.node_id,
            number: self.number,
            start,
            end,
            hash,
        }
    }
}

/// A closed round
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FinalRound {
    pub node_id: Hash,
    pub number: u64,
    pub start: u64,
    pub end: u64,
    pub hash: Hash,
}
