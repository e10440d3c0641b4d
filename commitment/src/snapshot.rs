//! Content-addressed snapshot documents for the distribution layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::Result;
use crate::field::FieldElement;
use crate::tree::{MerkleLeafInput, MerkleTree};

/// Version of the snapshot document layout.
pub const SNAPSHOT_SCHEMA_VERSION: u32 = 1;

/// Published description of one rooted tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotDocument {
    pub schema_version: u32,
    pub root: FieldElement,
    pub leaves: Vec<SnapshotLeaf>,
    pub metadata: SnapshotMetadata,
}

/// One committed leaf with its slot index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotLeaf {
    pub index: usize,
    pub id: String,
    pub boundary_type: String,
    pub authority_level: u8,
    pub geometry_hash: FieldElement,
    pub leaf: FieldElement,
}

impl SnapshotLeaf {
    /// Leaf input as committed, for off-tree proof verification.
    pub fn input(&self) -> MerkleLeafInput {
        MerkleLeafInput {
            id: self.id.clone(),
            boundary_type: self.boundary_type.clone(),
            geometry_hash: self.geometry_hash,
            authority_level: self.authority_level,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotMetadata {
    pub depth: usize,
    pub capacity: usize,
    pub leaf_count: usize,
    pub generated_at: DateTime<Utc>,
    pub hash_function_id: String,
}

impl SnapshotDocument {
    /// Describe a rooted tree.
    pub fn from_tree(tree: &MerkleTree, generated_at: DateTime<Utc>) -> Self {
        let leaves = tree
            .entries()
            .iter()
            .zip(tree.leaves())
            .enumerate()
            .map(|(index, (entry, leaf))| SnapshotLeaf {
                index,
                id: entry.id.clone(),
                boundary_type: entry.boundary_type.clone(),
                authority_level: entry.authority_level,
                geometry_hash: entry.geometry_hash,
                leaf: *leaf,
            })
            .collect();

        Self {
            schema_version: SNAPSHOT_SCHEMA_VERSION,
            root: tree.root(),
            leaves,
            metadata: SnapshotMetadata {
                depth: tree.depth(),
                capacity: tree.capacity(),
                leaf_count: tree.len(),
                generated_at,
                hash_function_id: tree.hash_function_id().to_string(),
            },
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// SHA-256 over the compact JSON encoding, hex encoded.
    pub fn content_id(&self) -> Result<String> {
        let bytes = serde_json::to_vec(self)?;
        Ok(hex::encode(Sha256::digest(&bytes)))
    }

    /// Check the document describes exactly this tree.
    pub fn verify_against(&self, tree: &MerkleTree) -> bool {
        self.root == tree.root()
            && self.metadata.depth == tree.depth()
            && self.metadata.hash_function_id == tree.hash_function_id()
            && self.leaves.len() == tree.len()
            && self
                .leaves
                .iter()
                .zip(tree.entries().iter().zip(tree.leaves()))
                .all(|(doc, (entry, leaf))| doc.input() == *entry && doc.leaf == *leaf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::Sha256FieldHasher;
    use crate::tree::MerkleTreeBuilder;
    use chrono::TimeZone;
    use std::sync::Arc;

    fn tree() -> MerkleTree {
        let entries = ["b", "a"]
            .iter()
            .map(|id| MerkleLeafInput {
                id: id.to_string(),
                boundary_type: "county".to_string(),
                geometry_hash: FieldElement::from_u64(9),
                authority_level: 5,
            })
            .collect();
        MerkleTreeBuilder::new(Arc::new(Sha256FieldHasher::new()))
            .with_depth(2)
            .unwrap()
            .build(entries)
            .unwrap()
    }

    #[test]
    fn test_document_describes_tree() {
        let tree = tree();
        let generated_at = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let doc = SnapshotDocument::from_tree(&tree, generated_at);

        assert_eq!(doc.leaves[0].id, "a");
        assert_eq!(doc.leaves[1].index, 1);
        assert_eq!(doc.metadata.capacity, 4);
        assert!(doc.verify_against(&tree));

        let parsed = SnapshotDocument::from_json(&doc.to_json().unwrap()).unwrap();
        assert_eq!(parsed, doc);
        assert_eq!(parsed.content_id().unwrap(), doc.content_id().unwrap());
    }

    #[test]
    fn test_content_id_tracks_content() {
        let tree = tree();
        let at = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let doc = SnapshotDocument::from_tree(&tree, at);
        let mut later = doc.clone();
        later.metadata.generated_at = Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap();

        assert_ne!(doc.content_id().unwrap(), later.content_id().unwrap());
    }

    #[test]
    fn test_tampered_document_rejected() {
        let tree = tree();
        let mut doc = SnapshotDocument::from_tree(&tree, Utc::now());
        doc.leaves[0].authority_level = 1;
        assert!(!doc.verify_against(&tree));
    }
}
