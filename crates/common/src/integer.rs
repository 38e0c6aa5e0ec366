//! Fixed-point amounts
//!
//! Amounts carry 8 fractional digits and are stored as an integer scaled by
//! 10^8. Text encodings use the decimal string form, binary encodings use the
//! minimal big-endian byte sequence of the scaled value.

use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Number of fractional digits
pub const PRECISION: usize = 8;

const SCALE: u128 = 100_000_000;

/// Integer conversion and arithmetic errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IntegerError {
    #[error("invalid amount {0}")]
    InvalidAmount(String),

    #[error("amount bytes too long: {0}")]
    TooLong(usize),

    #[error("amount overflow")]
    Overflow,
}

/// Positive fixed-point amount with 8 fractional digits
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Integer(u128);

impl Integer {
    pub const ZERO: Integer = Integer(0);

    /// Whole units, e.g. `Integer::new(10000)` is `10000.00000000`
    pub fn new(units: u64) -> Self {
        Integer(units as u128 * SCALE)
    }

    /// Build from the already-scaled value
    pub fn from_scaled(scaled: u128) -> Self {
        Integer(scaled)
    }

    /// The scaled value
    pub fn scaled(&self) -> u128 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    pub fn checked_add(self, other: Integer) -> Option<Integer> {
        self.0.checked_add(other.0).map(Integer)
    }

    pub fn checked_sub(self, other: Integer) -> Option<Integer> {
        self.0.checked_sub(other.0).map(Integer)
    }

    pub fn checked_mul(self, factor: u64) -> Option<Integer> {
        self.0.checked_mul(factor as u128).map(Integer)
    }

    pub fn checked_div(self, divisor: u64) -> Option<Integer> {
        self.0.checked_div(divisor as u128).map(Integer)
    }

    /// Minimal big-endian bytes of the scaled value; zero encodes as no bytes
    pub fn to_bytes(&self) -> Vec<u8> {
        let bytes = self.0.to_be_bytes();
        let first = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
        bytes[first..].to_vec()
    }

    /// Decode big-endian bytes, leading zeros allowed
    pub fn from_bytes(data: &[u8]) -> Result<Self, IntegerError> {
        let first = data.iter().position(|b| *b != 0).unwrap_or(data.len());
        let significant = &data[first..];
        if significant.len() > 16 {
            return Err(IntegerError::TooLong(data.len()));
        }
        let mut buf = [0u8; 16];
        buf[16 - significant.len()..].copy_from_slice(significant);
        Ok(Integer(u128::from_be_bytes(buf)))
    }
}

impl std::ops::Add for Integer {
    type Output = Integer;

    fn add(self, other: Integer) -> Integer {
        Integer(self.0 + other.0)
    }
}

impl FromStr for Integer {
    type Err = IntegerError;

    /// Parse a positive decimal string. Digits past the 8th fractional place
    /// are rounded half away from zero.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || IntegerError::InvalidAmount(s.to_string());
        let body = s.strip_prefix('+').unwrap_or(s);
        let (whole, frac) = match body.split_once('.') {
            Some((w, f)) => (w, f),
            None => (body, ""),
        };
        if whole.is_empty() && frac.is_empty() {
            return Err(invalid());
        }
        if !whole.chars().all(|c| c.is_ascii_digit()) || !frac.chars().all(|c| c.is_ascii_digit()) {
            return Err(invalid());
        }

        let mut scaled: u128 = 0;
        for c in whole.chars() {
            scaled = scaled
                .checked_mul(10)
                .and_then(|v| v.checked_add(c as u128 - '0' as u128))
                .ok_or(IntegerError::Overflow)?;
        }
        let frac_bytes = frac.as_bytes();
        for i in 0..PRECISION {
            let digit = frac_bytes.get(i).map(|b| (b - b'0') as u128).unwrap_or(0);
            scaled = scaled
                .checked_mul(10)
                .and_then(|v| v.checked_add(digit))
                .ok_or(IntegerError::Overflow)?;
        }
        if frac_bytes.get(PRECISION).map(|b| *b >= b'5').unwrap_or(false) {
            scaled = scaled.checked_add(1).ok_or(IntegerError::Overflow)?;
        }

        if scaled == 0 {
            return Err(invalid());
        }
        Ok(Integer(scaled))
    }
}

impl fmt::Display for Integer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = self.0.to_string();
        if s.len() > PRECISION {
            let (whole, frac) = s.split_at(s.len() - PRECISION);
            write!(f, "{}.{}", whole, frac)
        } else {
            write!(f, "0.{}{}", "0".repeat(PRECISION - s.len()), s)
        }
    }
}

impl fmt::Debug for Integer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Integer({})", self)
    }
}

impl Serialize for Integer {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Integer {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = <String as Deserialize>::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

impl BorshSerialize for Integer {
    fn serialize<W: borsh::io::Write>(&self, writer: &mut W) -> borsh::io::Result<()> {
        BorshSerialize::serialize(&self.to_bytes(), writer)
    }
}

impl BorshDeserialize for Integer {
    fn deserialize_reader<R: borsh::io::Read>(reader: &mut R) -> borsh::io::Result<Self> {
        let bytes = Vec::<u8>::deserialize_reader(reader)?;
        Integer::from_bytes(&bytes)
            .map_err(|e| borsh::io::Error::new(borsh::io::ErrorKind::InvalidData, e.to_string()))
    }
}
