//! Validator signing keys and signatures (ed25519)

use crate::hash::{impl_hex_bytes, Hash};
use borsh::{BorshDeserialize, BorshSerialize};
use ed25519_dalek::{Signer, SigningKey, Verifier, VerifyingKey};

/// Public key identifying a validator signer or payee
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, BorshSerialize, BorshDeserialize)]
pub struct Key(pub [u8; 32]);

impl_hex_bytes!(Key, 32);

impl Key {
    pub const LEN: usize = 32;

    pub fn from_signing_key(signing_key: &SigningKey) -> Self {
        Key(signing_key.verifying_key().to_bytes())
    }

    /// Hash of the raw key bytes
    pub fn hash(&self) -> Hash {
        Hash::digest(&self.0)
    }

    /// Identifier of the validator owning this signer on `network_id`
    pub fn node_id(&self, network_id: &Hash) -> Hash {
        self.hash().for_network(network_id)
    }

    /// Verify `signature` over `message`; malformed keys never verify
    pub fn verify(&self, message: &[u8], signature: &Signature) -> bool {
        let Ok(verifying_key) = VerifyingKey::from_bytes(&self.0) else {
            return false;
        };
        let signature = ed25519_dalek::Signature::from_bytes(&signature.0);
        verifying_key.verify(message, &signature).is_ok()
    }
}

/// Detached ed25519 signature
#[derive(Clone, Copy, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Signature(pub [u8; 64]);

impl_hex_bytes!(Signature, 64);

impl Signature {
    pub fn sign(signing_key: &SigningKey, message: &[u8]) -> Self {
        Signature(signing_key.sign(message).to_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_and_verify() {
        let signing_key = SigningKey::from_bytes(&[7u8; 32]);
        let key = Key::from_signing_key(&signing_key);
        let signature = Signature::sign(&signing_key, b"snapshot");

        assert!(key.verify(b"snapshot", &signature));
        assert!(!key.verify(b"other", &signature));

        let other = Key::from_signing_key(&SigningKey::from_bytes(&[8u8; 32]));
        assert!(!other.verify(b"snapshot", &signature));
    }

    #[test]
    fn test_node_id_depends_on_network() {
        let key = Key::from_signing_key(&SigningKey::from_bytes(&[1u8; 32]));
        let a = key.node_id(&Hash::digest(b"a"));
        let b = key.node_id(&Hash::digest(b"b"));
        assert_ne!(a, b);
        assert_eq!(a, key.hash().for_network(&Hash::digest(b"a")));
    }
}
