//! Consensus membership: the validator set and the rules for changing it
//!
//! Node lifecycle: pledge (Pledging) -> accept (Accepted) -> depart
//! (Departed) or remove (Removed). At most one node may be Pledging at a
//! time. The store applies a transition when the snapshot carrying the
//! transaction is written; these rules decide whether it may be.

use crate::clock::Clock;
use crate::config::KernelConfig;
use crate::error::{KernelError, ValidationError};
use crate::graph::RoundGraph;
use crate::HOUR;
use kernel_common::transaction::xin_asset_id;
use kernel_common::{ConsensusNode, Hash, Key, NodeState, OutputType, Snapshot, Transaction, TransactionType};
use kernel_storage::Store;
use serde::Serialize;

/// Validators as of one membership epoch
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidatorSet {
    pub epoch: u64,
    /// Accepted nodes ordered by acceptance time
    pub accepted: Vec<ConsensusNode>,
    /// The node currently pledging, if any
    pub pledging: Option<ConsensusNode>,
    /// Every node ever recorded, including departed and removed ones
    pub all: Vec<ConsensusNode>,
}

impl ValidatorSet {
    pub fn from_nodes(nodes: Vec<ConsensusNode>, epoch: u64) -> Self {
        let accepted = nodes.iter().filter(|n| n.state == NodeState::Accepted).cloned().collect();
        let pledging = nodes.iter().find(|n| n.state == NodeState::Pledging).cloned();
        Self {
            epoch,
            accepted,
            pledging,
            all: nodes,
        }
    }

    pub fn load(store: &dyn Store, epoch: u64) -> Result<Self, KernelError> {
        Ok(Self::from_nodes(store.load_consensus_nodes()?, epoch))
    }

    pub fn find_by_signer(&self, signer: &Key) -> Option<&ConsensusNode> {
        self.all.iter().find(|n| &n.signer == signer)
    }

    pub fn find_accepted(&self, node_id: &Hash, network_id: &Hash) -> Option<&ConsensusNode> {
        self.accepted.iter().find(|n| &n.id_for_network(network_id) == node_id)
    }
}

/// Membership rules evaluated against one kernel state
pub struct MembershipRules<'a> {
    pub config: &'a KernelConfig,
    pub network_id: &'a Hash,
    pub local_id: &'a Hash,
    /// Network start, the origin of accept hours
    pub epoch_timestamp: u64,
    pub validators: &'a ValidatorSet,
    pub graph: &'a RoundGraph,
    pub store: &'a dyn Store,
    pub clock: &'a dyn Clock,
}

impl MembershipRules<'_> {
    /// Run the rule matching the transaction type. Script transactions pass.
    pub fn validate(&self, snapshot: &Snapshot, tx: &Transaction) -> Result<(), KernelError> {
        match tx.transaction_type() {
            TransactionType::NodePledge => self.validate_node_pledge_snapshot(snapshot, tx),
            TransactionType::NodeAccept => self.validate_node_accept_snapshot(snapshot, tx),
            TransactionType::NodeDepart => self.validate_node_depart_snapshot(snapshot, tx),
            TransactionType::NodeRemove => self.validate_node_remove_snapshot(snapshot, tx),
            TransactionType::Script => Ok(()),
        }
    }

    fn check_node_payload(&self, tx: &Transaction, kind: &'static str, inputs: Option<usize>) -> Result<(), ValidationError> {
        if tx.asset != xin_asset_id() {
            return Err(ValidationError::InvalidNodeAsset(tx.asset));
        }
        if tx.outputs.len() != 1 {
            return Err(ValidationError::InvalidOutputsCount {
                kind,
                count: tx.outputs.len(),
            });
        }
        if let Some(expected) = inputs {
            if tx.inputs.len() != expected {
                return Err(ValidationError::InvalidInputsCount {
                    kind,
                    count: tx.inputs.len(),
                });
            }
        }
        if tx.extra.len() != Transaction::NODE_EXTRA_LEN {
            return Err(ValidationError::InvalidExtraLength {
                kind,
                length: tx.extra.len(),
            });
        }
        Ok(())
    }

    fn check_amount(&self, tx: &Transaction, kind: &'static str) -> Result<(), ValidationError> {
        let actual = tx.outputs[0].amount;
        if actual != self.config.pledge_amount {
            return Err(ValidationError::InvalidAmount {
                kind,
                expected: self.config.pledge_amount,
                actual,
            });
        }
        Ok(())
    }

    /// The accepted node a depart or remove transaction targets
    fn operation_target(&self, tx: &Transaction) -> Result<&ConsensusNode, ValidationError> {
        let (signer, _) = tx.node_keys().ok_or(ValidationError::InvalidExtraLength {
            kind: "node",
            length: tx.extra.len(),
        })?;
        let node = self
            .validators
            .find_by_signer(&signer)
            .ok_or(ValidationError::UnknownNode(signer))?;
        if node.state != NodeState::Accepted {
            return Err(ValidationError::InvalidNodeState {
                signer,
                state: node.state,
            });
        }
        Ok(node)
    }

    pub fn validate_node_pledge_snapshot(&self, snapshot: &Snapshot, tx: &Transaction) -> Result<(), KernelError> {
        let now = self.clock.now();
        let timestamp = if snapshot.timestamp == 0 && &snapshot.node_id == self.local_id {
            now
        } else {
            snapshot.timestamp
        };

        for node in &self.validators.accepted {
            if timestamp < node.timestamp {
                return Err(ValidationError::InvalidSnapshotTimestamp {
                    timestamp,
                    reference: node.timestamp,
                }
                .into());
            }
            let elapsed = timestamp - node.timestamp;
            if elapsed < self.config.pledge_period_minimum {
                return Err(ValidationError::InvalidPledgePeriod {
                    minimum: self.config.pledge_period_minimum,
                    elapsed,
                }
                .into());
            }
        }

        if timestamp > now.saturating_add(self.config.reference_window()) {
            return Err(ValidationError::InvalidSnapshotTimestamp { timestamp, reference: now }.into());
        }
        if let Some(pledging) = &self.validators.pledging {
            return Err(ValidationError::InvalidNodeState {
                signer: pledging.signer,
                state: pledging.state,
            }
            .into());
        }
        self.check_node_payload(tx, "pledge", None)?;
        if let Some((signer, _)) = tx.node_keys() {
            if let Some(existing) = self.validators.find_by_signer(&signer) {
                return Err(ValidationError::InvalidNodeState {
                    signer,
                    state: existing.state,
                }
                .into());
            }
        }
        self.check_amount(tx, "pledge")?;

        self.store
            .add_node_operation(tx, timestamp, self.config.operation_lock_threshold)?;
        Ok(())
    }

    pub fn validate_node_accept_snapshot(&self, snapshot: &Snapshot, tx: &Transaction) -> Result<(), KernelError> {
        if tx.asset != xin_asset_id() {
            return Err(ValidationError::InvalidNodeAsset(tx.asset).into());
        }
        if tx.outputs.len() != 1 {
            return Err(ValidationError::InvalidOutputsCount {
                kind: "accept",
                count: tx.outputs.len(),
            }
            .into());
        }
        if tx.inputs.len() != 1 {
            return Err(ValidationError::InvalidInputsCount {
                kind: "accept",
                count: tx.inputs.len(),
            }
            .into());
        }
        let pledging = self
            .validators
            .pledging
            .as_ref()
            .ok_or(ValidationError::InvalidConsensusStatus)?;
        let pledging_id = pledging.id_for_network(self.network_id);
        if pledging_id != snapshot.node_id {
            return Err(ValidationError::InvalidPledgingNode {
                expected: pledging_id,
                actual: snapshot.node_id,
            }
            .into());
        }
        if pledging.transaction != tx.inputs[0].hash {
            return Err(ValidationError::InvalidPledgeSource {
                expected: pledging.transaction,
                actual: tx.inputs[0].hash,
            }
            .into());
        }

        let pledge = self.store.read_transaction(&tx.inputs[0].hash)?;
        if pledge.outputs.len() != 1 {
            return Err(ValidationError::InvalidPledgeOutputCount(pledge.outputs.len()).into());
        }
        if pledge.outputs[0].output_type != OutputType::NodePledge {
            return Err(ValidationError::InvalidPledgeOutputType(pledge.outputs[0].output_type).into());
        }
        if pledge.extra != tx.extra {
            return Err(ValidationError::InvalidPledgeKeys {
                pledge: hex::encode(&pledge.extra),
                accept: hex::encode(&tx.extra),
            }
            .into());
        }

        if snapshot.round_number != 0 {
            return Err(ValidationError::InvalidSnapshotRound(snapshot.round_number).into());
        }
        if snapshot.timestamp < self.epoch_timestamp {
            return Err(ValidationError::InvalidSnapshotTimestamp {
                timestamp: snapshot.timestamp,
                reference: self.epoch_timestamp,
            }
            .into());
        }
        if let Some(round) = self.graph.cache_round(&snapshot.node_id) {
            return Err(ValidationError::InvalidGraphRound {
                node_id: snapshot.node_id,
                number: round.number,
            }
            .into());
        }
        if let Some(round) = self.graph.final_round(&snapshot.node_id) {
            return Err(ValidationError::InvalidGraphRound {
                node_id: snapshot.node_id,
                number: round.number,
            }
            .into());
        }
        // rounds left behind by an earlier membership of the same signer
        if let Some(record) = self.store.read_round(&snapshot.node_id)? {
            return Err(ValidationError::InvalidGraphRound {
                node_id: snapshot.node_id,
                number: record.number,
            }
            .into());
        }

        let hour = ((snapshot.timestamp - self.epoch_timestamp) / HOUR) % 24;
        if hour < self.config.accept_time_begin || hour > self.config.accept_time_end {
            return Err(ValidationError::InvalidAcceptHour(hour).into());
        }

        let window = self.config.reference_window();
        if snapshot.timestamp.saturating_add(window.saturating_mul(2)) < self.graph.graph_timestamp {
            return Err(ValidationError::InvalidGraphTimestamp {
                timestamp: snapshot.timestamp,
                graph_timestamp: self.graph.graph_timestamp,
            }
            .into());
        }

        if snapshot.timestamp < pledging.timestamp {
            return Err(ValidationError::InvalidSnapshotTimestamp {
                timestamp: snapshot.timestamp,
                reference: pledging.timestamp,
            }
            .into());
        }
        let elapsed = snapshot.timestamp - pledging.timestamp;
        if elapsed > self.config.accept_period_maximum {
            return Err(ValidationError::InvalidAcceptPeriod {
                maximum: self.config.accept_period_maximum,
                elapsed,
            }
            .into());
        }
        Ok(())
    }

    /// A validator withdraws itself and its collateral
    pub fn validate_node_depart_snapshot(&self, snapshot: &Snapshot, tx: &Transaction) -> Result<(), KernelError> {
        self.check_node_payload(tx, "depart", Some(1))?;
        let node = self.operation_target(tx)?;

        let node_id = node.id_for_network(self.network_id);
        if node_id != snapshot.node_id {
            return Err(ValidationError::InvalidOperationNode {
                kind: "depart",
                expected: node_id,
                actual: snapshot.node_id,
            }
            .into());
        }
        if let Some(pledging) = &self.validators.pledging {
            return Err(ValidationError::InvalidNodeState {
                signer: pledging.signer,
                state: pledging.state,
            }
            .into());
        }
        if node.transaction != tx.inputs[0].hash {
            return Err(ValidationError::InvalidOperationSource {
                kind: "depart",
                expected: node.transaction,
                actual: tx.inputs[0].hash,
            }
            .into());
        }
        let source = self.store.read_transaction(&node.transaction)?;
        if source.extra != tx.extra {
            return Err(ValidationError::InvalidOperationKeys {
                kind: "depart",
                expected: hex::encode(&source.extra),
                actual: hex::encode(&tx.extra),
            }
            .into());
        }

        if snapshot.timestamp < node.timestamp {
            return Err(ValidationError::InvalidSnapshotTimestamp {
                timestamp: snapshot.timestamp,
                reference: node.timestamp,
            }
            .into());
        }
        let elapsed = snapshot.timestamp - node.timestamp;
        if elapsed < self.config.depart_period_minimum {
            return Err(ValidationError::InvalidDepartPeriod {
                minimum: self.config.depart_period_minimum,
                elapsed,
            }
            .into());
        }
        self.check_amount(tx, "depart")?;

        self.store
            .add_node_operation(tx, snapshot.timestamp, self.config.operation_lock_threshold)?;
        Ok(())
    }

    /// Another validator evicts an inactive node
    pub fn validate_node_remove_snapshot(&self, snapshot: &Snapshot, tx: &Transaction) -> Result<(), KernelError> {
        self.check_node_payload(tx, "remove", Some(1))?;
        let node = self.operation_target(tx)?;

        let node_id = node.id_for_network(self.network_id);
        if node_id == snapshot.node_id {
            return Err(ValidationError::SelfRemoval(node_id).into());
        }
        if node.transaction != tx.inputs[0].hash {
            return Err(ValidationError::InvalidOperationSource {
                kind: "remove",
                expected: node.transaction,
                actual: tx.inputs[0].hash,
            }
            .into());
        }

        let last_active = self
            .graph
            .final_round(&node_id)
            .map_or(node.timestamp, |round| round.end.max(node.timestamp));
        if snapshot.timestamp < last_active.saturating_add(self.config.remove_inactivity_threshold) {
            return Err(ValidationError::NodeStillActive {
                node_id,
                last_active,
                timestamp: snapshot.timestamp,
            }
            .into());
        }
        self.check_amount(tx, "remove")?;

        self.store
            .add_node_operation(tx, snapshot.timestamp, self.config.operation_lock_threshold)?;
        Ok(())
    }
}
