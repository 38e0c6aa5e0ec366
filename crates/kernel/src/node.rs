//! The kernel node: validates snapshots and applies them to the round graph
//!
//! All mutation goes through one `Kernel` owned by a single worker. Readers
//! hold a [`KernelReader`] and always observe a complete graph version
//! together with the validator set it was built from.

use crate::clock::Clock;
use crate::config::KernelConfig;
use crate::distance::select_closest;
use crate::error::{fatal, InvariantViolation, KernelError, ValidationError};
use crate::genesis::{load_genesis, Genesis};
use crate::graph::{load_round_graph, RoundGraph};
use crate::membership::{MembershipRules, ValidatorSet};
use crate::round::{compute_round_hash, CacheRound, FinalRound};
use crate::topology::TopologicalCounter;
use kernel_common::{Hash, Key, RoundLink, Snapshot, SnapshotWithTopologicalOrder, Transaction, TransactionType};
use kernel_storage::{RoundRecord, Store, StoreError};
use parking_lot::RwLock;
use std::sync::Arc;

/// One published kernel state
#[derive(Debug, Clone, Default)]
pub struct KernelView {
    pub graph: Arc<RoundGraph>,
    pub validators: Arc<ValidatorSet>,
}

/// Read handle on the latest published kernel state
#[derive(Clone, Default)]
pub struct KernelReader {
    inner: Arc<RwLock<KernelView>>,
}

impl KernelReader {
    pub fn view(&self) -> KernelView {
        self.inner.read().clone()
    }

    pub fn graph(&self) -> Arc<RoundGraph> {
        self.inner.read().graph.clone()
    }

    pub fn validators(&self) -> Arc<ValidatorSet> {
        self.inner.read().validators.clone()
    }

    fn publish_graph(&self, graph: RoundGraph) {
        self.inner.write().graph = Arc::new(graph);
    }

    fn publish(&self, graph: RoundGraph, validators: ValidatorSet) {
        *self.inner.write() = KernelView {
            graph: Arc::new(graph),
            validators: Arc::new(validators),
        };
    }
}

pub struct Kernel {
    store: Arc<dyn Store>,
    config: KernelConfig,
    clock: Arc<dyn Clock>,
    network_id: Hash,
    local_id: Hash,
    /// Network start time
    epoch_timestamp: u64,
    /// Fixed genesis node ids, the anchors for external references
    genesis_nodes: Vec<Hash>,
    membership_epoch: u64,
    reader: KernelReader,
    topology: TopologicalCounter,
}

impl Kernel {
    /// Open a kernel on `store`, writing genesis first if the store is empty
    pub fn new(
        store: Arc<dyn Store>,
        genesis: &Genesis,
        local_signer: &Key,
        config: KernelConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, KernelError> {
        if load_genesis(store.as_ref(), genesis, &config)? {
            tracing::info!("Initialized store from genesis epoch {}", genesis.epoch);
        }

        let network_id = genesis.network_id();
        let local_id = local_signer.node_id(&network_id);
        let topology = TopologicalCounter::from_store(store.as_ref())?;

        let mut kernel = Self {
            store,
            config,
            clock,
            network_id,
            local_id,
            epoch_timestamp: genesis.epoch,
            genesis_nodes: genesis.node_ids(),
            membership_epoch: 0,
            reader: KernelReader::default(),
            topology,
        };
        kernel.load_consensus_nodes()?;

        tracing::info!(
            "Kernel ready on network {} as node {} (next topology {})",
            network_id,
            local_id,
            kernel.topology.peek()
        );
        Ok(kernel)
    }

    pub fn network_id(&self) -> Hash {
        self.network_id
    }

    pub fn local_id(&self) -> Hash {
        self.local_id
    }

    pub fn membership_epoch(&self) -> u64 {
        self.membership_epoch
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    pub fn reader(&self) -> KernelReader {
        self.reader.clone()
    }

    pub fn graph(&self) -> Arc<RoundGraph> {
        self.reader.graph()
    }

    pub fn validators(&self) -> Arc<ValidatorSet> {
        self.reader.validators()
    }

    pub fn genesis_nodes(&self) -> &[Hash] {
        &self.genesis_nodes
    }

    /// Topological order the next finalized snapshot receives
    pub fn next_topological_order(&self) -> u64 {
        self.topology.peek()
    }

    /// Make a transaction available to snapshots referencing it
    pub fn submit_transaction(&self, tx: &Transaction) -> Result<Hash, KernelError> {
        self.store.write_transaction(tx)?;
        Ok(tx.hash())
    }

    /// Rebuild the validator set and round graph from the store and start a
    /// new membership epoch
    pub fn load_consensus_nodes(&mut self) -> Result<(), KernelError> {
        let epoch = self.membership_epoch + 1;
        let validators = ValidatorSet::load(self.store.as_ref(), epoch)?;
        let mut graph = load_round_graph(self.store.as_ref(), &self.network_id, &self.local_id, epoch)?;
        // the graph timestamp never moves backwards across rebuilds
        graph.graph_timestamp = graph.graph_timestamp.max(self.reader.graph().graph_timestamp);

        tracing::info!(
            "Membership epoch {}: {} accepted, pledging {}",
            epoch,
            validators.accepted.len(),
            validators.pledging.is_some()
        );

        self.membership_epoch = epoch;
        self.reader.publish(graph, validators);
        Ok(())
    }

    /// Reload membership after a membership transaction was finalized
    pub fn reload_consensus_nodes_list(&mut self, tx: &Transaction) -> Result<(), KernelError> {
        if !tx.transaction_type().is_membership() {
            return Ok(());
        }
        self.load_consensus_nodes().map_err(|e| match e {
            KernelError::Store(e) => fatal(e),
            other => other,
        })
    }

    /// Check a snapshot and its transaction against the current state.
    ///
    /// Nothing in the graph changes; a pledge, depart or remove that passes
    /// is registered as the pending node operation.
    pub fn verify_snapshot(&self, snapshot: &Snapshot) -> Result<Transaction, KernelError> {
        let tx = self.store.read_transaction(&snapshot.transaction)?;
        let view = self.reader.view();

        let signer = if tx.transaction_type() == TransactionType::NodeAccept {
            view.validators
                .pledging
                .as_ref()
                .map(|node| node.signer)
                .ok_or(ValidationError::InvalidConsensusStatus)?
        } else {
            let producer = view
                .validators
                .find_accepted(&snapshot.node_id, &self.network_id)
                .ok_or(ValidationError::UnknownSnapshotNode(snapshot.node_id))?;
            self.check_round(&view.graph, snapshot)?;
            producer.signer
        };
        if !snapshot.is_signed_by(&signer) {
            return Err(ValidationError::InvalidSignature(snapshot.node_id).into());
        }

        self.rules(&view).validate(snapshot, &tx)?;
        Ok(tx)
    }

    /// The snapshot must continue the producer's current round or open the
    /// next one once the round gap has passed
    fn check_round(&self, graph: &RoundGraph, snapshot: &Snapshot) -> Result<(), ValidationError> {
        let cache = graph
            .cache_round(&snapshot.node_id)
            .ok_or(ValidationError::UnknownSnapshotNode(snapshot.node_id))?;
        let gap = self.config.snapshot_round_gap;

        let fits = if snapshot.round_number == cache.number {
            cache.fits(snapshot, gap)
        } else if snapshot.round_number == cache.number + 1 {
            let start = cache
                .start()
                .ok_or(ValidationError::InvalidSnapshotRound(snapshot.round_number))?;
            if snapshot.timestamp < start.saturating_add(gap) {
                return Err(ValidationError::InvalidSnapshotRound(snapshot.round_number));
            }
            true
        } else {
            return Err(ValidationError::InvalidSnapshotRound(snapshot.round_number));
        };

        if !fits {
            return Err(ValidationError::SnapshotOutsideRound {
                snapshot: snapshot.hash(),
                node_id: snapshot.node_id,
                number: cache.number,
            });
        }
        Ok(())
    }

    fn rules<'a>(&'a self, view: &'a KernelView) -> MembershipRules<'a> {
        MembershipRules {
            config: &self.config,
            network_id: &self.network_id,
            local_id: &self.local_id,
            epoch_timestamp: self.epoch_timestamp,
            validators: view.validators.as_ref(),
            graph: view.graph.as_ref(),
            store: self.store.as_ref(),
            clock: self.clock.as_ref(),
        }
    }

    /// Verify and finalize in one step
    pub fn process_snapshot(&mut self, snapshot: &Snapshot) -> Result<(), KernelError> {
        let tx = self.verify_snapshot(snapshot)?;
        self.finalize_snapshot(snapshot, &tx)
    }

    /// Apply a verified snapshot.
    ///
    /// Any failure here means the graph or store no longer agree with what
    /// verification saw and is reported as fatal.
    pub fn finalize_snapshot(&mut self, snapshot: &Snapshot, tx: &Transaction) -> Result<(), KernelError> {
        let current = self.reader.view();
        self.ensure_epoch(&current)?;

        if tx.transaction_type() == TransactionType::NodeAccept {
            self.finalize_node_accept_snapshot(snapshot)?;
        } else {
            let mut graph = RoundGraph::clone(&current.graph);
            let node_id = snapshot.node_id;
            let number = graph
                .cache_round(&node_id)
                .map(|cache| cache.number)
                .ok_or(InvariantViolation::MissingCacheRound(node_id))?;
            if snapshot.round_number == number + 1 {
                self.rotate_round(&mut graph, &node_id, snapshot.timestamp)?;
            }

            let gap = self.config.snapshot_round_gap;
            let cache = graph
                .cache_round
                .get_mut(&node_id)
                .ok_or(InvariantViolation::MissingCacheRound(node_id))?;
            if !cache.validate_snapshot(snapshot, true, gap) {
                return Err(InvariantViolation::SnapshotOutsideRound {
                    snapshot: snapshot.hash(),
                    node_id,
                    number: cache.number,
                }
                .into());
            }
            let full = cache.is_full(self.config.round_capacity);
            let last = cache.snapshots.iter().map(|s| s.timestamp).max().unwrap_or(snapshot.timestamp);

            self.write_snapshot(snapshot)?;
            if full {
                self.rotate_round(&mut graph, &node_id, last + 1)?;
            }
            self.reader.publish_graph(graph);
        }

        self.reload_consensus_nodes_list(tx)
    }

    /// A freshly accepted node gets a one-snapshot round 0 and an open
    /// round 1 anchored to the round 0 of the closest genesis node
    fn finalize_node_accept_snapshot(&mut self, snapshot: &Snapshot) -> Result<(), KernelError> {
        let gap = self.config.snapshot_round_gap;
        let node_id = snapshot.node_id;

        let mut cache = CacheRound::new(node_id, snapshot.round_number, snapshot.timestamp, None);
        if !cache.validate_snapshot(snapshot, true, gap) {
            return Err(InvariantViolation::SnapshotOutsideRound {
                snapshot: snapshot.hash(),
                node_id,
                number: snapshot.round_number,
            }
            .into());
        }
        self.store
            .start_new_round(node_id, cache.number, None, cache.timestamp)
            .map_err(fatal)?;
        self.write_snapshot(snapshot)?;
        let final_round = cache.finalize();

        let external_id =
            select_closest(&node_id, &self.genesis_nodes).ok_or(InvariantViolation::NoExternalRound(node_id))?;
        let external_round: Vec<Snapshot> = self
            .store
            .read_snapshots_for_node_round(&external_id, 0)
            .map_err(fatal)?
            .into_iter()
            .map(|topo| topo.snapshot)
            .collect();
        if external_round.is_empty() {
            return Err(InvariantViolation::MissingFinalRound {
                node_id: external_id,
                number: 0,
            }
            .into());
        }
        let (_, _, external) = compute_round_hash(&external_id, 0, &external_round);

        let references = RoundLink {
            self_hash: final_round.hash,
            external,
        };
        let next = CacheRound::new(node_id, final_round.number + 1, snapshot.timestamp + gap + 1, Some(references));
        self.store
            .start_new_round(node_id, next.number, next.references, next.timestamp)
            .map_err(fatal)?;

        let mut graph = RoundGraph::clone(&self.reader.graph());
        graph.assign_new_round(final_round, next)?;
        self.reader.publish_graph(graph);

        tracing::info!("Node {} accepted, round 1 references {}", node_id, external_id);
        Ok(())
    }

    /// Close the cache round of `node_id` and open the next one at `timestamp`
    fn rotate_round(&self, graph: &mut RoundGraph, node_id: &Hash, timestamp: u64) -> Result<(), KernelError> {
        let final_round = graph.finalize_round(node_id)?;
        let external = self.select_external(graph, node_id, &final_round)?;
        let references = RoundLink {
            self_hash: final_round.hash,
            external,
        };
        let number = final_round.number + 1;

        self.store
            .start_new_round(*node_id, number, Some(references), timestamp)
            .map_err(fatal)?;
        graph.assign_new_round(final_round, CacheRound::new(*node_id, number, timestamp, Some(references)))?;

        tracing::debug!("Node {} finalized round {} -> {}", node_id, final_round.number, final_round.hash);
        Ok(())
    }

    /// Latest final round of the closest other genesis node still in the
    /// graph, falling back to any other validator
    fn select_external(
        &self,
        graph: &RoundGraph,
        node_id: &Hash,
        own: &FinalRound,
    ) -> Result<Hash, InvariantViolation> {
        let genesis: Vec<Hash> = self
            .genesis_nodes
            .iter()
            .filter(|id| *id != node_id && graph.final_round.contains_key(*id))
            .copied()
            .collect();
        let candidates = if genesis.is_empty() {
            graph.final_round.keys().filter(|id| *id != node_id).copied().collect()
        } else {
            genesis
        };

        match select_closest(node_id, &candidates) {
            Some(id) => graph
                .final_round(&id)
                .map(|round| round.hash)
                .ok_or(InvariantViolation::NoExternalRound(*node_id)),
            // a sole validator anchors to itself
            None if graph.cache_round.keys().all(|id| id == node_id) => Ok(own.hash),
            None => Err(InvariantViolation::NoExternalRound(*node_id)),
        }
    }

    fn write_snapshot(&mut self, snapshot: &Snapshot) -> Result<u64, KernelError> {
        let order = self.topology.peek();
        self.store
            .write_snapshot(&SnapshotWithTopologicalOrder {
                snapshot: snapshot.clone(),
                topological_order: order,
            })
            .map_err(fatal)?;
        self.topology.advance();
        Ok(order)
    }

    fn ensure_epoch(&self, view: &KernelView) -> Result<(), InvariantViolation> {
        for state in [view.graph.epoch, view.validators.epoch] {
            if state != self.membership_epoch {
                return Err(InvariantViolation::EpochMismatch {
                    kernel: self.membership_epoch,
                    state,
                });
            }
        }
        Ok(())
    }

    /// Latest round record of a node
    pub fn read_round(&self, node_id: &Hash) -> Result<Option<RoundRecord>, StoreError> {
        self.store.read_round(node_id)
    }
}
