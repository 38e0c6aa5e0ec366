//! Persistence Layer for kernel state
//!
//! Uses sled embedded database so rounds, snapshots and consensus nodes
//! survive restarts. Snapshot writes and the node records they change are
//! committed in one sled transaction.

use crate::ledger;
use crate::{NodeOperation, RoundRecord, Store, StoreError};
use kernel_common::{ConsensusNode, Hash, RoundLink, SnapshotWithTopologicalOrder, Transaction};
use parking_lot::Mutex;
use sled::transaction::{ConflictableTransactionError, TransactionError};
use sled::{Db, Transactional};
use std::path::Path;

const TOPOLOGY_KEY: &[u8] = b"topology";
const NODE_OPERATION_KEY: &[u8] = b"node_operation";

/// sled-backed [`Store`]
pub struct SledStore {
    /// Sled database instance
    db: Db,
    /// Consensus nodes keyed by signer
    consensus_nodes: sled::Tree,
    /// Latest round keyed by node id
    rounds: sled::Tree,
    /// Snapshots keyed by node id || round || topological order
    snapshots: sled::Tree,
    /// Transactions keyed by hash
    transactions: sled::Tree,
    /// Topology counter and pending node operation
    metadata: sled::Tree,
    /// Serializes read-check-write sequences on rounds and operations
    write_lock: Mutex<()>,
}

impl SledStore {
    /// Open or create a store at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let db = sled::open(&path)?;
        let consensus_nodes = db.open_tree("consensus_nodes")?;
        let rounds = db.open_tree("rounds")?;
        let snapshots = db.open_tree("snapshots")?;
        let transactions = db.open_tree("transactions")?;
        let metadata = db.open_tree("metadata")?;

        tracing::info!("Opened kernel store at {:?}", path.as_ref());

        Ok(Self {
            db,
            consensus_nodes,
            rounds,
            snapshots,
            transactions,
            metadata,
            write_lock: Mutex::new(()),
        })
    }

    /// Flush all pending writes to disk
    pub fn flush(&self) -> Result<(), StoreError> {
        self.db.flush()?;
        Ok(())
    }

    fn snapshot_prefix(node_id: &Hash, round: u64) -> Vec<u8> {
        let mut key = Vec::with_capacity(32 + 8 + 8);
        key.extend_from_slice(&node_id.0);
        key.extend_from_slice(&round.to_be_bytes());
        key
    }

    fn snapshot_key(topo: &SnapshotWithTopologicalOrder) -> Vec<u8> {
        let mut key = Self::snapshot_prefix(&topo.snapshot.node_id, topo.snapshot.round_number);
        key.extend_from_slice(&topo.topological_order.to_be_bytes());
        key
    }

    fn read_u64(bytes: &[u8]) -> u64 {
        let arr: [u8; 8] = bytes.try_into().unwrap_or([0u8; 8]);
        u64::from_be_bytes(arr)
    }
}

fn abort<E: Into<StoreError>>(e: E) -> ConflictableTransactionError<StoreError> {
    ConflictableTransactionError::Abort(e.into())
}

impl Store for SledStore {
    fn load_consensus_nodes(&self) -> Result<Vec<ConsensusNode>, StoreError> {
        let mut nodes = Vec::new();
        for result in self.consensus_nodes.iter() {
            let (_, value) = result?;
            let node: ConsensusNode = bincode::deserialize(&value)?;
            nodes.push(node);
        }
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
        let _guard = self.write_lock.lock();
        let current = self.read_round(&node_id)?;
        ledger::check_round_sequence(&node_id, current.as_ref(), number)?;

        let record = RoundRecord {
            node_id,
            number,
            timestamp,
            references,
        };
        self.rounds.insert(&node_id.0[..], bincode::serialize(&record)?)?;
        Ok(())
    }

    fn read_round(&self, node_id: &Hash) -> Result<Option<RoundRecord>, StoreError> {
        match self.rounds.get(node_id.0)? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    fn write_snapshot(&self, topo: &SnapshotWithTopologicalOrder) -> Result<(), StoreError> {
        let tx = self.read_transaction(&topo.snapshot.transaction)?;
        let keys = ledger::membership_keys(&tx)?;
        let snapshot_key = Self::snapshot_key(topo);
        let snapshot_value = bincode::serialize(topo)?;

        let result: Result<(), TransactionError<StoreError>> =
            (&self.snapshots, &self.consensus_nodes, &self.metadata).transaction(|(snapshots, nodes, metadata)| {
                if let Some((signer, payee)) = keys {
                    let existing = match nodes.get(signer.0)? {
                        Some(bytes) => Some(bincode::deserialize::<ConsensusNode>(&bytes).map_err(abort)?),
                        None => None,
                    };
                    let updated = ledger::node_transition(existing, signer, payee, &tx, topo.snapshot.timestamp)
                        .map_err(abort)?;
                    nodes.insert(&signer.0[..], bincode::serialize(&updated).map_err(abort)?)?;
                }

                snapshots.insert(snapshot_key.as_slice(), snapshot_value.as_slice())?;

                let last = metadata.get(TOPOLOGY_KEY)?.map(|b| Self::read_u64(&b));
                if last.map_or(true, |l| topo.topological_order > l) {
                    metadata.insert(TOPOLOGY_KEY, &topo.topological_order.to_be_bytes()[..])?;
                }
                Ok::<(), ConflictableTransactionError<StoreError>>(())
            });

        result.map_err(|e| match e {
            TransactionError::Abort(e) => e,
            TransactionError::Storage(e) => StoreError::from(e),
        })
    }

    fn read_snapshots_for_node_round(
        &self,
        node_id: &Hash,
        round: u64,
    ) -> Result<Vec<SnapshotWithTopologicalOrder>, StoreError> {
        let mut snapshots = Vec::new();
        for result in self.snapshots.scan_prefix(Self::snapshot_prefix(node_id, round)) {
            let (_, value) = result?;
            snapshots.push(bincode::deserialize(&value)?);
        }
        Ok(snapshots)
    }

    fn last_topological_order(&self) -> Result<Option<u64>, StoreError> {
        Ok(self.metadata.get(TOPOLOGY_KEY)?.map(|b| Self::read_u64(&b)))
    }

    fn write_transaction(&self, tx: &Transaction) -> Result<(), StoreError> {
        self.transactions.insert(&tx.hash().0[..], tx.to_bytes())?;
        Ok(())
    }

    fn read_transaction(&self, hash: &Hash) -> Result<Transaction, StoreError> {
        match self.transactions.get(hash.0)? {
            Some(bytes) => Transaction::from_bytes(&bytes).map_err(|e| StoreError::Serialization(e.to_string())),
            None => Err(StoreError::NotFound(*hash)),
        }
    }

    fn add_node_operation(&self, tx: &Transaction, timestamp: u64, lock_threshold: u64) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock();
        let current: Option<NodeOperation> = match self.metadata.get(NODE_OPERATION_KEY)? {
            Some(bytes) => Some(bincode::deserialize(&bytes)?),
            None => None,
        };
        let next = ledger::next_node_operation(current.as_ref(), tx, timestamp, lock_threshold)?;
        self.metadata.insert(NODE_OPERATION_KEY, bincode::serialize(&next)?)?;
        Ok(())
    }
}
