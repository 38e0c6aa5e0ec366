//! Transactions, as far as membership transitions need them

use crate::hash::Hash;
use crate::integer::Integer;
use crate::keys::Key;
use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};

/// Asset id of the collateral asset used for node pledges
pub fn xin_asset_id() -> Hash {
    Hash::digest(b"c94ac88f-4671-3976-b60a-09064f1811e8")
}

/// Kind of a transaction output
#[derive(Debug, Clone, Copy, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub enum OutputType {
    Script,
    NodePledge,
    NodeAccept,
    NodeDepart,
    NodeRemove,
}

/// Kind of a transaction, derived from its outputs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionType {
    Script,
    NodePledge,
    NodeAccept,
    NodeDepart,
    NodeRemove,
}

impl TransactionType {
    /// Whether applying this transaction changes the validator set
    pub fn is_membership(&self) -> bool {
        !matches!(self, TransactionType::Script)
    }
}

/// Reference to an output of a previous transaction
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct Input {
    pub hash: Hash,
    pub index: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct Output {
    pub output_type: OutputType,
    pub amount: Integer,
    pub keys: Vec<Key>,
}

#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct Transaction {
    pub version: u8,
    pub asset: Hash,
    pub inputs: Vec<Input>,
    pub outputs: Vec<Output>,
    /// Opaque payload; node transactions carry `signer || payee` here
    #[serde(with = "hex::serde")]
    pub extra: Vec<u8>,
}

impl Transaction {
    pub const VERSION: u8 = 1;

    /// Length of the payload carried by node transactions (two keys)
    pub const NODE_EXTRA_LEN: usize = 2 * Key::LEN;

    pub fn new(asset: Hash) -> Self {
        Self {
            version: Self::VERSION,
            asset,
            inputs: Vec::new(),
            outputs: Vec::new(),
            extra: Vec::new(),
        }
    }

    pub fn add_input(&mut self, hash: Hash, index: u32) {
        self.inputs.push(Input { hash, index });
    }

    pub fn add_output(&mut self, output_type: OutputType, amount: Integer, keys: Vec<Key>) {
        self.outputs.push(Output {
            output_type,
            amount,
            keys,
        });
    }

    /// Build a node operation transaction whose payload is `signer || payee`
    pub fn node_operation(
        output_type: OutputType,
        amount: Integer,
        signer: &Key,
        payee: &Key,
    ) -> Self {
        let mut tx = Self::new(xin_asset_id());
        tx.add_output(output_type, amount, Vec::new());
        tx.extra = [signer.0, payee.0].concat();
        tx
    }

    /// The first node output decides the type, otherwise it is a script
    pub fn transaction_type(&self) -> TransactionType {
        for output in &self.outputs {
            match output.output_type {
                OutputType::NodePledge => return TransactionType::NodePledge,
                OutputType::NodeAccept => return TransactionType::NodeAccept,
                OutputType::NodeDepart => return TransactionType::NodeDepart,
                OutputType::NodeRemove => return TransactionType::NodeRemove,
                OutputType::Script => {}
            }
        }
        TransactionType::Script
    }

    /// Signer and payee keys from a node transaction payload
    pub fn node_keys(&self) -> Option<(Key, Key)> {
        if self.extra.len() != Self::NODE_EXTRA_LEN {
            return None;
        }
        let mut signer = [0u8; 32];
        let mut payee = [0u8; 32];
        signer.copy_from_slice(&self.extra[..Key::LEN]);
        payee.copy_from_slice(&self.extra[Key::LEN..]);
        Some((Key(signer), Key(payee)))
    }

    pub fn hash(&self) -> Hash {
        Hash::digest(&self.to_bytes())
    }

    /// Canonical binary encoding
    pub fn to_bytes(&self) -> Vec<u8> {
        borsh::to_vec(self).expect("Transaction serialization should not fail")
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, borsh::io::Error> {
        borsh::from_slice(data)
    }
}
