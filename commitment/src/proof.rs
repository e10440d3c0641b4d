//! Membership proofs.

use serde::{Deserialize, Serialize};

use crate::field::FieldElement;
use crate::hash::HashFunction;
use crate::tree::MerkleLeafInput;

/// Sibling path from one leaf to the root.
///
/// `path_indices[i]` is the role of the running node at level `i`:
/// 0 when it is the left child, 1 when it is the right child.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleProof {
    pub root: FieldElement,
    pub leaf: FieldElement,
    pub siblings: Vec<FieldElement>,
    pub path_indices: Vec<u8>,
}

impl MerkleProof {
    /// Recompute the root bottom-up and compare.
    ///
    /// Fails when the path length differs from `depth`, when any path index
    /// is not 0 or 1, when `leaf` is not the hash of `input`, or when the
    /// recomputed root differs from `root`. `hash_pair` is non-commutative,
    /// so swapped siblings or flipped indices change the result.
    pub fn verify(&self, hasher: &dyn HashFunction, input: &MerkleLeafInput, depth: usize) -> bool {
        if self.siblings.len() != depth || self.path_indices.len() != depth {
            return false;
        }
        if self.leaf != input.leaf_hash(hasher) {
            return false;
        }

        let mut node = self.leaf;
        for (sibling, index) in self.siblings.iter().zip(&self.path_indices) {
            node = match index {
                0 => hasher.hash_pair(&node, sibling),
                1 => hasher.hash_pair(sibling, &node),
                _ => return false,
            };
        }
        node == self.root
    }

    /// Leaf slot encoded by the path indices.
    pub fn leaf_index(&self) -> usize {
        self.path_indices
            .iter()
            .enumerate()
            .fold(0usize, |acc, (level, bit)| acc | (usize::from(*bit & 1) << level))
    }
}

/// Verify a proof against an explicit leaf input and expected root.
///
/// Use this when the tree itself is not at hand, e.g. with a root taken from
/// a published snapshot document.
pub fn verify_membership(
    hasher: &dyn HashFunction,
    proof: &MerkleProof,
    input: &MerkleLeafInput,
    expected_root: &FieldElement,
    depth: usize,
) -> bool {
    proof.root == *expected_root && proof.verify(hasher, input, depth)
}
