//! Global topological order of finalized snapshots

use kernel_storage::{Store, StoreError};

/// Dense counter seeded from the store.
///
/// The next value is only consumed once a snapshot carrying it is written,
/// so a failed write leaves no hole.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TopologicalCounter {
    next: u64,
}

impl TopologicalCounter {
    pub fn new(next: u64) -> Self {
        Self { next }
    }

    pub fn from_store(store: &dyn Store) -> Result<Self, StoreError> {
        let next = store.last_topological_order()?.map_or(0, |last| last + 1);
        Ok(Self { next })
    }

    /// Order the next written snapshot receives
    pub fn peek(&self) -> u64 {
        self.next
    }

    pub fn advance(&mut self) {
        self.next += 1;
    }
}
