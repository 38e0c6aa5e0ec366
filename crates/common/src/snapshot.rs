//! Snapshots - confirmed events produced by one validator in one round

use crate::hash::Hash;
use crate::keys::{Key, Signature};
use borsh::{BorshDeserialize, BorshSerialize};
use ed25519_dalek::SigningKey;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct Snapshot {
    /// Producing node
    pub node_id: Hash,
    /// Round of the producing node this snapshot belongs to
    pub round_number: u64,
    /// Nanoseconds since unix epoch
    pub timestamp: u64,
    /// Hash of the referenced transaction
    pub transaction: Hash,
    pub signatures: Vec<Signature>,
}

impl Snapshot {
    pub fn new(node_id: Hash, round_number: u64, timestamp: u64, transaction: Hash) -> Self {
        Self {
            node_id,
            round_number,
            timestamp,
            transaction,
            signatures: Vec::new(),
        }
    }

    /// Bytes covered by signatures and the snapshot hash
    pub fn payload(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(32 + 8 + 8 + 32);
        buf.extend_from_slice(&self.node_id.0);
        buf.extend_from_slice(&self.round_number.to_be_bytes());
        buf.extend_from_slice(&self.timestamp.to_be_bytes());
        buf.extend_from_slice(&self.transaction.0);
        buf
    }

    /// Identity of the snapshot, independent of its signatures
    pub fn hash(&self) -> Hash {
        Hash::digest(&self.payload())
    }

    pub fn sign(&mut self, signing_key: &SigningKey) {
        let signature = Signature::sign(signing_key, &self.payload());
        self.signatures.push(signature);
    }

    /// Whether any attached signature was made by `signer`
    pub fn is_signed_by(&self, signer: &Key) -> bool {
        let payload = self.payload();
        self.signatures.iter().any(|sig| signer.verify(&payload, sig))
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        borsh::to_vec(self).expect("Snapshot serialization should not fail")
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, borsh::io::Error> {
        borsh::from_slice(data)
    }
}

/// A persisted snapshot with its network-wide topological order number
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct SnapshotWithTopologicalOrder {
    pub snapshot: Snapshot,
    pub topological_order: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_ignores_signatures() {
        let signing_key = SigningKey::from_bytes(&[3u8; 32]);
        let mut snapshot = Snapshot::new(Hash::digest(b"node"), 4, 1_000, Hash::digest(b"tx"));
        let unsigned = snapshot.hash();

        snapshot.sign(&signing_key);
        assert_eq!(snapshot.hash(), unsigned);
        assert!(snapshot.is_signed_by(&Key::from_signing_key(&signing_key)));
        assert!(!snapshot.is_signed_by(&Key([9u8; 32])));
    }

    #[test]
    fn test_signature_breaks_on_changed_round() {
        let signing_key = SigningKey::from_bytes(&[3u8; 32]);
        let mut snapshot = Snapshot::new(Hash::digest(b"node"), 4, 1_000, Hash::digest(b"tx"));
        snapshot.sign(&signing_key);

        snapshot.round_number = 5;
        assert!(!snapshot.is_signed_by(&Key::from_signing_key(&signing_key)));
        assert_eq!(Snapshot::from_bytes(&snapshot.to_bytes()).unwrap(), snapshot);
    }
}
