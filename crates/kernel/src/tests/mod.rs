//! Kernel scenario tests
//!
//! A [`Harness`] runs a kernel over an in-memory store with a manual clock
//! and a handful of genesis validators whose signing keys are known.

mod election_test;

use std::sync::Arc;

use ed25519_dalek::SigningKey;
use kernel_common::transaction::xin_asset_id;
use kernel_common::{Hash, Integer, Key, OutputType, Snapshot, Transaction};
use kernel_storage::MemoryStore;

use crate::{Genesis, GenesisNode, Kernel, KernelConfig, ManualClock, HOUR, SECOND};

/// Network start shared by all scenarios
pub(crate) const EPOCH: u64 = 1_700_000_000 * SECOND;

/// Deterministic signing key
pub(crate) fn signing_key(seed: u8) -> SigningKey {
    SigningKey::from_bytes(&[seed; 32])
}

pub(crate) fn key(signing_key: &SigningKey) -> Key {
    Key::from_signing_key(signing_key)
}

/// Payee paired with a signing key in every scenario
pub(crate) fn payee(signing_key: &SigningKey) -> Key {
    Key(*key(signing_key).hash().as_bytes())
}

/// Short periods and an always-open accept window
pub(crate) fn test_config() -> KernelConfig {
    KernelConfig {
        pledge_period_minimum: HOUR,
        accept_time_begin: 0,
        accept_time_end: 23,
        ..KernelConfig::default()
    }
}

pub(crate) struct Harness {
    pub kernel: Kernel,
    pub store: MemoryStore,
    pub clock: ManualClock,
    pub genesis: Genesis,
    pub keys: Vec<SigningKey>,
}

impl Harness {
    /// Kernel over `count` genesis validators, running as the first one
    pub fn new(count: u8, config: KernelConfig) -> Self {
        let keys: Vec<SigningKey> = (1..=count).map(signing_key).collect();
        let genesis = Genesis {
            epoch: EPOCH,
            nodes: keys
                .iter()
                .map(|k| GenesisNode {
                    signer: key(k),
                    payee: payee(k),
                })
                .collect(),
        };
        let store = MemoryStore::new();
        let clock = ManualClock::new(EPOCH);
        let kernel = Kernel::new(
            Arc::new(store.clone()),
            &genesis,
            &key(&keys[0]),
            config,
            Arc::new(clock.clone()),
        )
        .unwrap();

        Self {
            kernel,
            store,
            clock,
            genesis,
            keys,
        }
    }

    /// Open a second kernel on the same store, as after a restart
    pub fn restart(&self) -> Kernel {
        Kernel::new(
            Arc::new(self.store.clone()),
            &self.genesis,
            &key(&self.keys[0]),
            self.kernel.config().clone(),
            Arc::new(self.clock.clone()),
        )
        .unwrap()
    }

    pub fn node_id(&self, signing_key: &SigningKey) -> Hash {
        key(signing_key).node_id(&self.kernel.network_id())
    }

    /// Store `tx` and wrap it in a snapshot signed by `signer`
    pub fn snapshot(&self, signer: &SigningKey, round: u64, timestamp: u64, tx: &Transaction) -> Snapshot {
        self.kernel.submit_transaction(tx).unwrap();
        let mut snapshot = Snapshot::new(self.node_id(signer), round, timestamp, tx.hash());
        snapshot.sign(signer);
        snapshot
    }

    /// Current cache round number of a node
    pub fn round_of(&self, signing_key: &SigningKey) -> u64 {
        self.kernel.graph().cache_round(&self.node_id(signing_key)).unwrap().number
    }

    pub fn script_tx(tag: u64) -> Transaction {
        let mut tx = Transaction::new(xin_asset_id());
        tx.add_output(OutputType::Script, Integer::new(1), vec![]);
        tx.extra = tag.to_be_bytes().to_vec();
        tx
    }

    pub fn node_tx(&self, output_type: OutputType, subject: &SigningKey, input: Option<Hash>) -> Transaction {
        let amount = self.kernel.config().pledge_amount;
        let mut tx = Transaction::node_operation(output_type, amount, &key(subject), &payee(subject));
        if let Some(input) = input {
            tx.add_input(input, 0);
        }
        tx
    }

    /// Finalize a pledge for `candidate` produced by the first genesis node
    pub fn pledge(&mut self, candidate: &SigningKey, timestamp: u64) -> Transaction {
        self.clock.set(timestamp);
        let tx = self.node_tx(OutputType::NodePledge, candidate, None);
        let producer = self.keys[0].clone();
        let snapshot = self.snapshot(&producer, self.round_of(&producer), timestamp, &tx);
        self.kernel.process_snapshot(&snapshot).unwrap();
        tx
    }

    /// Accept snapshot for a pledged `candidate`
    pub fn accept_snapshot(&self, candidate: &SigningKey, pledge: &Transaction, round: u64, timestamp: u64) -> Snapshot {
        let tx = self.node_tx(OutputType::NodeAccept, candidate, Some(pledge.hash()));
        self.snapshot(candidate, round, timestamp, &tx)
    }
}
