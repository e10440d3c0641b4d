//! Field elements for the commitment hash.
//!
//! Elements are 32-byte big-endian integers strictly below the BN254 scalar
//! field modulus, the field the paired membership circuit computes over.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

use crate::error::{CommitmentError, Result};

/// BN254 scalar field modulus, big-endian.
///
/// 21888242871839275222246405745257275088548364400416034343698204186575808495617
pub const BN254_MODULUS: [u8; 32] = [
    0x30, 0x64, 0x4e, 0x72, 0xe1, 0x31, 0xa0, 0x29, 0xb8, 0x50, 0x45, 0xb6, 0x81, 0x81, 0x58, 0x5d,
    0x28, 0x33, 0xe8, 0x48, 0x79, 0xb9, 0x70, 0x91, 0x43, 0xe1, 0xf5, 0x93, 0xf0, 0x00, 0x00, 0x01,
];

/// Bytes packed into one field element when absorbing variable-length input.
///
/// 31 bytes always fit below the modulus.
pub const CHUNK_BYTES: usize = 31;

/// A canonical element of the BN254 scalar field.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct FieldElement([u8; 32]);

impl FieldElement {
    /// The additive identity.
    pub const ZERO: Self = Self([0u8; 32]);

    /// Embed a small integer.
    pub fn from_u64(value: u64) -> Self {
        let mut bytes = [0u8; 32];
        bytes[24..].copy_from_slice(&value.to_be_bytes());
        Self(bytes)
    }

    /// Build from big-endian bytes, rejecting values at or above the modulus.
    pub fn from_bytes(bytes: [u8; 32]) -> Result<Self> {
        if bytes >= BN254_MODULUS {
            return Err(CommitmentError::InvalidFieldElement(format!(
                "0x{} is not below the BN254 modulus",
                hex::encode(bytes)
            )));
        }
        Ok(Self(bytes))
    }

    /// Map a 256-bit digest into the field by clearing its top three bits.
    ///
    /// The result is below 2^253, which is below the modulus.
    pub fn from_digest(mut digest: [u8; 32]) -> Self {
        digest[0] &= 0x1f;
        Self(digest)
    }

    /// Pack up to [`CHUNK_BYTES`] bytes as a big-endian integer, the way
    /// [`absorb_bytes`](crate::hash::absorb_bytes) packs each chunk.
    #[cfg(test)]
    pub(crate) fn from_chunk(chunk: &[u8]) -> Result<Self> {
        if chunk.len() > CHUNK_BYTES {
            return Err(CommitmentError::InvalidFieldElement(format!(
                "chunk of {} bytes exceeds {} bytes",
                chunk.len(),
                CHUNK_BYTES
            )));
        }
        let mut bytes = [0u8; 32];
        bytes[32 - chunk.len()..].copy_from_slice(chunk);
        Ok(Self(bytes))
    }

    /// Parse `0x`-prefixed (or bare) hex of at most 64 digits.
    pub fn from_hex(value: &str) -> Result<Self> {
        let digits = value.strip_prefix("0x").unwrap_or(value);
        if digits.is_empty() || digits.len() > 64 {
            return Err(CommitmentError::InvalidFieldElement(format!(
                "expected 1-64 hex digits, got '{}'",
                value
            )));
        }
        let padded = format!("{:0>64}", digits);
        let decoded = hex::decode(&padded)
            .map_err(|e| CommitmentError::InvalidFieldElement(format!("{}: {}", value, e)))?;
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&decoded);
        Self::from_bytes(bytes)
    }

    /// Big-endian byte view.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// `0x` followed by 64 lowercase hex digits.
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }
}

impl fmt::Display for FieldElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for FieldElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FieldElement({})", self.to_hex())
    }
}

impl Serialize for FieldElement {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for FieldElement {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        FieldElement::from_hex(&raw).map_err(serde::de::Error::custom)
    }
}
