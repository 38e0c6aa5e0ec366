//! BLAKE3 digests used for transaction, snapshot, round and node identifiers

use borsh::{BorshDeserialize, BorshSerialize};
use thiserror::Error;

/// Error parsing a fixed-size hex value
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HashParseError {
    #[error("invalid hex: {0}")]
    InvalidHex(String),

    #[error("invalid length {actual}, expected {expected} bytes")]
    InvalidLength { expected: usize, actual: usize },
}

/// Implements `Display`, `Debug`, `FromStr` and hex-string serde for a
/// `[u8; N]` newtype.
macro_rules! impl_hex_bytes {
    ($name:ident, $len:expr) => {
        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&hex::encode(self.0))
            }
        }

        impl std::fmt::Debug for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}({})", stringify!($name), hex::encode(self.0))
            }
        }

        impl std::str::FromStr for $name {
            type Err = $crate::hash::HashParseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let bytes = hex::decode(s)
                    .map_err(|e| $crate::hash::HashParseError::InvalidHex(e.to_string()))?;
                let arr: [u8; $len] = bytes.as_slice().try_into().map_err(|_| {
                    $crate::hash::HashParseError::InvalidLength {
                        expected: $len,
                        actual: bytes.len(),
                    }
                })?;
                Ok($name(arr))
            }
        }

        impl serde::Serialize for $name {
            fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&hex::encode(self.0))
            }
        }

        impl<'de> serde::Deserialize<'de> for $name {
            fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = <String as serde::Deserialize>::deserialize(deserializer)?;
                s.parse().map_err(serde::de::Error::custom)
            }
        }
    };
}

pub(crate) use impl_hex_bytes;

/// 32-byte BLAKE3 digest
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, BorshSerialize, BorshDeserialize)]
pub struct Hash(pub [u8; 32]);

impl_hex_bytes!(Hash, 32);

impl Hash {
    /// Byte length of a hash
    pub const LEN: usize = 32;

    /// Hash arbitrary bytes
    pub fn digest(data: &[u8]) -> Self {
        Hash(*blake3::hash(data).as_bytes())
    }

    /// Scope this hash to a network namespace.
    ///
    /// Node identifiers are the signer hash scoped this way, so the same key
    /// yields different identifiers on different networks.
    pub fn for_network(&self, network_id: &Hash) -> Hash {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&self.0);
        hasher.update(&network_id.0);
        Hash(*hasher.finalize().as_bytes())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }
}

impl AsRef<[u8]> for Hash {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}
