//! In-memory store using DashMap for concurrent access

use crate::ledger;
use crate::{NodeOperation, RoundRecord, Store, StoreError};
use dashmap::{mapref::entry::Entry, DashMap};
use kernel_common::{ConsensusNode, Hash, Key, RoundLink, SnapshotWithTopologicalOrder, Transaction};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;

/// Thread-safe in-memory store
///
/// Cloning is cheap and clones share the same data.
#[derive(Clone, Default)]
pub struct MemoryStore {
    /// Consensus nodes keyed by signer
    nodes: Arc<RwLock<Vec<ConsensusNode>>>,
    /// Latest round per node
    rounds: Arc<DashMap<Hash, RoundRecord>>,
    /// Snapshots per (node, round), in write order
    snapshots: Arc<DashMap<(Hash, u64), Vec<SnapshotWithTopologicalOrder>>>,
    transactions: Arc<DashMap<Hash, Transaction>>,
    node_operation: Arc<Mutex<Option<NodeOperation>>>,
    topology: Arc<RwLock<Option<u64>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored snapshots across all rounds
    pub fn snapshot_count(&self) -> usize {
        self.snapshots.iter().map(|r| r.value().len()).sum()
    }

    /// The pending node operation, if any
    pub fn node_operation(&self) -> Option<NodeOperation> {
        self.node_operation.lock().clone()
    }

    fn find_node(nodes: &[ConsensusNode], signer: &Key) -> Option<usize> {
        nodes.iter().position(|n| &n.signer == signer)
    }
}

impl Store for MemoryStore {
    fn load_consensus_nodes(&self) -> Result<Vec<ConsensusNode>, StoreError> {
        let mut nodes = self.nodes.read().clone();
        ledger::sort_consensus_nodes(&mut nodes);
        Ok(nodes)
    }

    fn start_new_round(
        &self,
        node_id: Hash,
        number: u64,
        references: Option<RoundLink>,
        timestamp: u64,
    ) -> Result<(), StoreError> {
        let record = RoundRecord {
            node_id,
            number,
            timestamp,
            references,
        };
        match self.rounds.entry(node_id) {
            Entry::Occupied(mut occupied) => {
                ledger::check_round_sequence(&node_id, Some(occupied.get()), number)?;
                occupied.insert(record);
            }
            Entry::Vacant(vacant) => {
                ledger::check_round_sequence(&node_id, None, number)?;
                vacant.insert(record);
            }
        }
        Ok(())
    }

    fn read_round(&self, node_id: &Hash) -> Result<Option<RoundRecord>, StoreError> {
        Ok(self.rounds.get(node_id).map(|r| r.value().clone()))
    }

    fn write_snapshot(&self, topo: &SnapshotWithTopologicalOrder) -> Result<(), StoreError> {
        let snapshot = &topo.snapshot;
        let tx = self.read_transaction(&snapshot.transaction)?;

        // Node records and the snapshot must change together
        let mut nodes = self.nodes.write();
        if let Some((signer, payee)) = ledger::membership_keys(&tx)? {
            let index = Self::find_node(&nodes, &signer);
            let existing = index.map(|i| nodes[i].clone());
            let updated = ledger::node_transition(existing, signer, payee, &tx, snapshot.timestamp)?;
            match index {
                Some(i) => nodes[i] = updated,
                None => nodes.push(updated),
            }
        }

        self.snapshots
            .entry((snapshot.node_id, snapshot.round_number))
            .or_default()
            .push(topo.clone());

        let mut topology = self.topology.write();
        *topology = Some(topology.map_or(topo.topological_order, |t| t.max(topo.topological_order)));
        Ok(())
    }

    fn read_snapshots_for_node_round(
        &self,
        node_id: &Hash,
        round: u64,
    ) -> Result<Vec<SnapshotWithTopologicalOrder>, StoreError> {
        Ok(self
            .snapshots
            .get(&(*node_id, round))
            .map(|r| r.value().clone())
            .unwrap_or_default())
    }

    fn last_topological_order(&self) -> Result<Option<u64>, StoreError> {
        Ok(*self.topology.read())
    }

    fn write_transaction(&self, tx: &Transaction) -> Result<(), StoreError> {
        self.transactions.insert(tx.hash(), tx.clone());
        Ok(())
    }

    fn read_transaction(&self, hash: &Hash) -> Result<Transaction, StoreError> {
        self.transactions
            .get(hash)
            .map(|r| r.value().clone())
            .ok_or(StoreError::NotFound(*hash))
    }

    fn add_node_operation(&self, tx: &Transaction, timestamp: u64, lock_threshold: u64) -> Result<(), StoreError> {
        let mut current = self.node_operation.lock();
        let next = ledger::next_node_operation(current.as_ref(), tx, timestamp, lock_threshold)?;
        *current = Some(next);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kernel_common::{Integer, NodeState, OutputType, Snapshot};

    fn pledge_tx() -> Transaction {
        Transaction::node_operation(OutputType::NodePledge, Integer::new(10000), &Key([1; 32]), &Key([2; 32]))
    }

    #[test]
    fn test_round_sequence_enforced() {
        let store = MemoryStore::new();
        let node = Hash::digest(b"node");

        assert!(store.start_new_round(node, 1, None, 0).is_err());
        store.start_new_round(node, 0, None, 10).unwrap();
        store.start_new_round(node, 1, None, 20).unwrap();
        assert!(matches!(
            store.start_new_round(node, 3, None, 30),
            Err(StoreError::InvalidRoundSequence { expected: 2, actual: 3, .. })
        ));

        let record = store.read_round(&node).unwrap().unwrap();
        assert_eq!(record.number, 1);
        assert_eq!(record.timestamp, 20);
    }

    #[test]
    fn test_write_snapshot_needs_transaction() {
        let store = MemoryStore::new();
        let tx = pledge_tx();
        let topo = SnapshotWithTopologicalOrder {
            snapshot: Snapshot::new(Hash::digest(b"node"), 0, 100, tx.hash()),
            topological_order: 0,
        };

        assert_eq!(store.write_snapshot(&topo), Err(StoreError::NotFound(tx.hash())));

        store.write_transaction(&tx).unwrap();
        store.write_snapshot(&topo).unwrap();
        assert_eq!(store.snapshot_count(), 1);
        assert_eq!(store.last_topological_order().unwrap(), Some(0));

        let nodes = store.load_consensus_nodes().unwrap();
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].state, NodeState::Pledging);
        assert_eq!(nodes[0].timestamp, 100);
    }

    #[test]
    fn test_read_missing_transaction() {
        let store = MemoryStore::new();
        let hash = Hash::digest(b"missing");
        assert_eq!(store.read_transaction(&hash), Err(StoreError::NotFound(hash)));
    }
}
