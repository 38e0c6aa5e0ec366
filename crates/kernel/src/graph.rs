//! Round graph: the open and last closed round of every accepted validator

use crate::error::{InvariantViolation, KernelError};
use crate::round::{compute_round_hash, CacheRound, FinalRound};
use kernel_common::{Hash, NodeState, Snapshot};
use kernel_storage::Store;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RoundGraph {
    /// Membership epoch this graph was built for
    pub epoch: u64,
    pub cache_round: BTreeMap<Hash, CacheRound>,
    pub final_round: BTreeMap<Hash, FinalRound>,
    /// Latest end time among final rounds
    pub graph_timestamp: u64,
}

impl RoundGraph {
    pub fn new(epoch: u64) -> Self {
        Self {
            epoch,
            ..Default::default()
        }
    }

    pub fn cache_round(&self, node_id: &Hash) -> Option<&CacheRound> {
        self.cache_round.get(node_id)
    }

    pub fn final_round(&self, node_id: &Hash) -> Option<&FinalRound> {
        self.final_round.get(node_id)
    }

    /// Close the cache round of `node_id`.
    ///
    /// The graph is left untouched; the result is published together with
    /// the next cache round by [`RoundGraph::assign_new_round`]. Publishing is
    /// the one-shot step: a second publish of the same round number fails
    /// with [`InvariantViolation::RoundAlreadyFinal`].
    pub fn finalize_round(&self, node_id: &Hash) -> Result<FinalRound, InvariantViolation> {
        let cache = self
            .cache_round
            .get(node_id)
            .ok_or(InvariantViolation::MissingCacheRound(*node_id))?;

        if let Some(last) = self.final_round.get(node_id) {
            if last.number >= cache.number {
                return Err(InvariantViolation::RoundAlreadyFinal {
                    node_id: *node_id,
                    number: cache.number,
                });
            }
        }
        if cache.snapshots.is_empty() {
            return Err(InvariantViolation::EmptyRound {
                node_id: *node_id,
                number: cache.number,
            });
        }

        Ok(cache.clone().finalize())
    }

    /// Record `final_round` and open `cache` as the node's next round
    pub fn assign_new_round(&mut self, final_round: FinalRound, cache: CacheRound) -> Result<(), InvariantViolation> {
        let node_id = final_round.node_id;
        if cache.node_id != node_id || cache.number != final_round.number + 1 {
            return Err(InvariantViolation::RoundGap {
                node_id: cache.node_id,
                number: cache.number,
                final_number: final_round.number,
            });
        }
        if let Some(last) = self.final_round.get(&node_id) {
            if last.number >= final_round.number {
                return Err(InvariantViolation::RoundAlreadyFinal {
                    node_id,
                    number: final_round.number,
                });
            }
        }

        self.graph_timestamp = self.graph_timestamp.max(final_round.end);
        self.final_round.insert(node_id, final_round);
        self.cache_round.insert(node_id, cache);
        Ok(())
    }
}

fn read_round_snapshots(store: &dyn Store, node_id: &Hash, number: u64) -> Result<Vec<Snapshot>, KernelError> {
    Ok(store
        .read_snapshots_for_node_round(node_id, number)?
        .into_iter()
        .map(|topo| topo.snapshot)
        .collect())
}

/// Rebuild the round graph of every accepted validator from the store.
///
/// Every round below a node's open round is recomputed, for departed and
/// removed nodes too, so the graph timestamp never falls behind history and
/// each external reference can be matched to a round another node finalized.
pub fn load_round_graph(
    store: &dyn Store,
    network_id: &Hash,
    local_id: &Hash,
    epoch: u64,
) -> Result<RoundGraph, KernelError> {
    let mut graph = RoundGraph::new(epoch);
    // round hash -> node that finalized it
    let mut committed: HashMap<Hash, Hash> = HashMap::new();

    for node in store.load_consensus_nodes()? {
        let node_id = node.id_for_network(network_id);
        let record = match store.read_round(&node_id)? {
            Some(record) => record,
            None => {
                if node.state == NodeState::Accepted {
                    tracing::warn!("Accepted node {} has no rounds", node_id);
                }
                continue;
            }
        };

        let mut last_final = None;
        for number in 0..record.number {
            let snapshots = read_round_snapshots(store, &node_id, number)?;
            if snapshots.is_empty() {
                return Err(InvariantViolation::MissingFinalRound { node_id, number }.into());
            }
            let (start, end, hash) = compute_round_hash(&node_id, number, &snapshots);
            committed.insert(hash, node_id);
            last_final = Some(FinalRound {
                node_id,
                number,
                start,
                end,
                hash,
            });
        }
        if let Some(round) = &last_final {
            graph.graph_timestamp = graph.graph_timestamp.max(round.end);
        }
        if node.state != NodeState::Accepted {
            continue;
        }

        if let Some(round) = last_final {
            let references = record.references.ok_or(InvariantViolation::MissingReferences {
                node_id,
                number: record.number,
            })?;
            if references.self_hash != round.hash {
                return Err(InvariantViolation::BrokenSelfReference {
                    node_id,
                    number: record.number,
                    expected: round.hash,
                    actual: references.self_hash,
                }
                .into());
            }
            graph.final_round.insert(node_id, round);
        }
        graph.cache_round.insert(
            node_id,
            CacheRound {
                node_id,
                number: record.number,
                timestamp: record.timestamp,
                references: record.references,
                snapshots: read_round_snapshots(store, &node_id, record.number)?,
            },
        );
    }

    for cache in graph.cache_round.values() {
        let Some(references) = cache.references else {
            continue;
        };
        // a validator that was alone anchors to its own history
        if references.external == references.self_hash {
            continue;
        }
        match committed.get(&references.external) {
            Some(owner) if *owner != cache.node_id => {}
            _ => {
                return Err(InvariantViolation::UnknownExternalReference {
                    node_id: cache.node_id,
                    number: cache.number,
                    external: references.external,
                }
                .into())
            }
        }
    }

    tracing::debug!(
        "Loaded round graph epoch {} with {} nodes, local node present: {}",
        epoch,
        graph.cache_round.len(),
        graph.cache_round.contains_key(local_id)
    );
    Ok(graph)
}
