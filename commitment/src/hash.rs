//! The commitment hash capability.
//!
//! Every hash in a tree must match the hash computed inside the paired
//! membership circuit bit for bit: same field, same domain separation, same
//! chunking of variable-length input, same absorption order. The engine
//! therefore never hard-codes a hash. It is handed a [`HashFunction`] and
//! implementations prove conformance against published golden vectors
//! (see [`crate::conformance`]).
//!
//! # Contract
//!
//! - Outputs are canonical BN254 scalar field elements.
//! - `hash_pair` is non-commutative: `H(a, b) != H(b, a)` for `a != b`.
//! - `hash_pair`, `hash_single` and `hash_four` are domain separated from
//!   one another.
//! - Strings are absorbed as UTF-8 bytes in 31-byte big-endian chunks:
//!   `state = len; for chunk: state = H(state, chunk); out = H(state)`.

use sha2::{Digest, Sha256};

use crate::field::{FieldElement, CHUNK_BYTES};

/// Identifier of the reference SHA-256 hasher.
pub const SHA256_FIELD_HASHER_ID: &str = "sha256-bn254-masked/v1";

const PAIR_DOMAIN: &[u8] = b"atlas:pair:v1";
const SINGLE_DOMAIN: &[u8] = b"atlas:single:v1";
const FOUR_DOMAIN: &[u8] = b"atlas:leaf:v1";

/// Hash capability injected into tree construction and proof verification.
pub trait HashFunction: Send + Sync {
    /// Stable identifier recorded in snapshots (e.g. `poseidon2-bn254/v1`).
    fn id(&self) -> &str;

    /// Two-to-one compression used for interior nodes.
    fn hash_pair(&self, left: &FieldElement, right: &FieldElement) -> FieldElement;

    /// One-input hash, used to finalize absorbed strings.
    fn hash_single(&self, value: &FieldElement) -> FieldElement;

    /// Four-input hash, used for leaves.
    fn hash_four(&self, inputs: [&FieldElement; 4]) -> FieldElement;

    /// Hash a UTF-8 string by chunked absorption.
    fn hash_string(&self, value: &str) -> FieldElement {
        absorb_bytes(self, value.as_bytes())
    }
}

/// Absorb arbitrary bytes into one field element.
///
/// Prefixing the length keeps inputs that differ only in leading zero bytes
/// of a chunk apart.
pub fn absorb_bytes<H: HashFunction + ?Sized>(hasher: &H, bytes: &[u8]) -> FieldElement {
    let mut state = FieldElement::from_u64(bytes.len() as u64);
    for chunk in bytes.chunks(CHUNK_BYTES) {
        let mut packed = [0u8; 32];
        packed[32 - chunk.len()..].copy_from_slice(chunk);
        // A 31-byte chunk leaves the top byte zero, so this never fails.
        let element = FieldElement::from_digest(packed);
        state = hasher.hash_pair(&state, &element);
    }
    hasher.hash_single(&state)
}

/// Reference hasher: domain-separated SHA-256 mapped into the field.
///
/// Deterministic and non-commutative, but NOT the circuit's native hash.
/// Snapshots committed with it can only be verified off-circuit.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sha256FieldHasher;

impl Sha256FieldHasher {
    pub fn new() -> Self {
        Self
    }

    fn digest(domain: &[u8], inputs: &[&FieldElement]) -> FieldElement {
        let mut hasher = Sha256::new();
        hasher.update(domain);
        for input in inputs {
            hasher.update(input.as_bytes());
        }
        FieldElement::from_digest(hasher.finalize().into())
    }
}

impl HashFunction for Sha256FieldHasher {
    fn id(&self) -> &str {
        SHA256_FIELD_HASHER_ID
    }

    fn hash_pair(&self, left: &FieldElement, right: &FieldElement) -> FieldElement {
        Self::digest(PAIR_DOMAIN, &[left, right])
    }

    fn hash_single(&self, value: &FieldElement) -> FieldElement {
        Self::digest(SINGLE_DOMAIN, &[value])
    }

    fn hash_four(&self, inputs: [&FieldElement; 4]) -> FieldElement {
        Self::digest(FOUR_DOMAIN, &inputs)
    }
}
