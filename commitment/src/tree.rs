//! Fixed-depth Merkle tree construction.
//!
//! A build walks one state machine and only ever hands out a rooted tree:
//!
//! ```text
//! Empty ──► LeavesHashed ──► Padded ──► LayersBuilt ──► Rooted
//! ```
//!
//! Trees are immutable once rooted. A new snapshot means a new tree.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::{CommitmentError, Result};
use crate::field::FieldElement;
use crate::hash::HashFunction;
use crate::proof::MerkleProof;

/// Depth of the paired membership circuit.
pub const DEFAULT_DEPTH: usize = 12;

/// Largest depth accepted by the builder.
pub const MAX_DEPTH: usize = 24;

/// Highest authority level a leaf may carry.
pub const MAX_AUTHORITY_LEVEL: u8 = 5;

/// String absorbed to produce the filler hash for unused slots.
pub const PADDING_MARKER: &str = "atlas:padding";

/// Everything that goes into one leaf hash.
///
/// `boundary_type` is part of the hash so two differently typed entities that
/// happen to share an id string can never produce the same leaf.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleLeafInput {
    /// Globally unique boundary identity
    pub id: String,
    /// Boundary type tag (e.g. `city_council_district`)
    pub boundary_type: String,
    /// Hash of the canonical geometry
    pub geometry_hash: FieldElement,
    /// Authority level of the accepted source (0-5)
    pub authority_level: u8,
}

impl MerkleLeafInput {
    /// `H(id, boundary_type, geometry_hash, authority_level)`
    pub fn leaf_hash(&self, hasher: &dyn HashFunction) -> FieldElement {
        let id = hasher.hash_string(&self.id);
        let boundary_type = hasher.hash_string(&self.boundary_type);
        let authority = FieldElement::from_u64(u64::from(self.authority_level));
        hasher.hash_four([&id, &boundary_type, &self.geometry_hash, &authority])
    }
}

/// Filler hash for slots beyond the last real leaf.
pub fn padding_leaf(hasher: &dyn HashFunction) -> FieldElement {
    hasher.hash_string(PADDING_MARKER)
}

/// Order in which entries are assigned to leaf slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeafOrdering {
    /// Sort entries by identity before hashing
    #[default]
    Lexicographic,
    /// Keep caller order; permuting the input changes the root
    AsGiven,
}

/// Stages of one tree build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum BuildStage {
    Empty,
    LeavesHashed,
    Padded,
    LayersBuilt,
    Rooted,
}

impl BuildStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Empty => "empty",
            Self::LeavesHashed => "leaves_hashed",
            Self::Padded => "padded",
            Self::LayersBuilt => "layers_built",
            Self::Rooted => "rooted",
        }
    }
}

/// Builds [`MerkleTree`]s with a fixed depth and an injected hash.
#[derive(Clone)]
pub struct MerkleTreeBuilder {
    hasher: Arc<dyn HashFunction>,
    depth: usize,
    ordering: LeafOrdering,
}

impl MerkleTreeBuilder {
    /// Builder at [`DEFAULT_DEPTH`] with lexicographic ordering.
    pub fn new(hasher: Arc<dyn HashFunction>) -> Self {
        Self {
            hasher,
            depth: DEFAULT_DEPTH,
            ordering: LeafOrdering::default(),
        }
    }

    /// Override the depth. Must match the circuit the tree is paired with.
    pub fn with_depth(mut self, depth: usize) -> Result<Self> {
        if depth == 0 || depth > MAX_DEPTH {
            return Err(CommitmentError::InvalidDepth(depth));
        }
        self.depth = depth;
        Ok(self)
    }

    pub fn with_ordering(mut self, ordering: LeafOrdering) -> Self {
        self.ordering = ordering;
        self
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn capacity(&self) -> usize {
        1usize << self.depth
    }

    /// Build a rooted tree, or fail without exposing any partial state.
    pub fn build(&self, entries: Vec<MerkleLeafInput>) -> Result<MerkleTree> {
        let capacity = self.capacity();
        let mut stage = BuildStage::Empty;

        if entries.len() > capacity {
            return Err(CommitmentError::CapacityExceeded {
                count: entries.len(),
                capacity,
            });
        }
        check_unique(&entries)?;
        if let Some(bad) = entries
            .iter()
            .find(|e| e.authority_level > MAX_AUTHORITY_LEVEL)
        {
            return Err(CommitmentError::InvalidAuthority {
                id: bad.id.clone(),
                level: bad.authority_level,
            });
        }

        let mut entries = entries;
        if self.ordering == LeafOrdering::Lexicographic {
            entries.sort_by(|a, b| a.id.cmp(&b.id));
        }

        let hasher = self.hasher.as_ref();
        let mut leaves: Vec<FieldElement> = entries.iter().map(|e| e.leaf_hash(hasher)).collect();
        advance(&mut stage, BuildStage::LeavesHashed, leaves.len());

        let real_leaves = leaves.clone();
        let padding = padding_leaf(hasher);
        leaves.resize(capacity, padding);
        advance(&mut stage, BuildStage::Padded, leaves.len());

        let mut layers = Vec::with_capacity(self.depth + 1);
        layers.push(leaves);
        for _ in 0..self.depth {
            let below = layers.last().map(Vec::as_slice).unwrap_or_default();
            let above: Vec<FieldElement> = below
                .chunks_exact(2)
                .map(|pair| hasher.hash_pair(&pair[0], &pair[1]))
                .collect();
            layers.push(above);
        }
        advance(&mut stage, BuildStage::LayersBuilt, layers.len());

        let root = layers
            .last()
            .and_then(|top| top.first())
            .copied()
            .ok_or(CommitmentError::InvalidDepth(self.depth))?;
        advance(&mut stage, BuildStage::Rooted, 1);

        let index = entries
            .iter()
            .enumerate()
            .map(|(i, e)| (e.id.clone(), i))
            .collect();

        info!(
            root = %root,
            leaves = entries.len(),
            depth = self.depth,
            hash_function = %hasher.id(),
            "Merkle tree rooted"
        );

        Ok(MerkleTree {
            hasher: Arc::clone(&self.hasher),
            root,
            depth: self.depth,
            leaves: real_leaves,
            layers,
            entries,
            index,
        })
    }
}

fn advance(stage: &mut BuildStage, next: BuildStage, size: usize) {
    debug_assert!(next > *stage);
    debug!(from = stage.as_str(), to = next.as_str(), size, "Tree build stage");
    *stage = next;
}

/// Reject every repeated identity, naming all of them.
///
/// Lookup by identity returns the first match, so a silently kept duplicate
/// would be unprovable forever.
fn check_unique(entries: &[MerkleLeafInput]) -> Result<()> {
    let mut seen = BTreeSet::new();
    let mut duplicates = BTreeSet::new();
    for entry in entries {
        if !seen.insert(entry.id.as_str()) {
            duplicates.insert(entry.id.clone());
        }
    }
    if duplicates.is_empty() {
        Ok(())
    } else {
        Err(CommitmentError::DuplicateIdentity {
            ids: duplicates.into_iter().collect(),
        })
    }
}

/// A rooted, immutable Merkle tree over one snapshot.
#[derive(Clone)]
pub struct MerkleTree {
    hasher: Arc<dyn HashFunction>,
    root: FieldElement,
    depth: usize,
    leaves: Vec<FieldElement>,
    layers: Vec<Vec<FieldElement>>,
    entries: Vec<MerkleLeafInput>,
    index: HashMap<String, usize>,
}

impl MerkleTree {
    pub fn root(&self) -> FieldElement {
        self.root
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn capacity(&self) -> usize {
        1usize << self.depth
    }

    /// Number of real (non-padding) leaves.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Real leaf hashes in slot order.
    pub fn leaves(&self) -> &[FieldElement] {
        &self.leaves
    }

    /// All layers, leaves (padded) first, root last.
    pub fn layers(&self) -> &[Vec<FieldElement>] {
        &self.layers
    }

    /// Entries in slot order.
    pub fn entries(&self) -> &[MerkleLeafInput] {
        &self.entries
    }

    pub fn hash_function_id(&self) -> &str {
        self.hasher.id()
    }

    pub fn hasher(&self) -> &dyn HashFunction {
        self.hasher.as_ref()
    }

    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.index.get(id).copied()
    }

    pub fn entry(&self, id: &str) -> Option<&MerkleLeafInput> {
        self.index_of(id).map(|i| &self.entries[i])
    }

    /// Sibling path from the identity's leaf to the root.
    pub fn prove(&self, id: &str) -> Result<MerkleProof> {
        let index = self
            .index_of(id)
            .ok_or_else(|| CommitmentError::NotFound(id.to_string()))?;

        let mut siblings = Vec::with_capacity(self.depth);
        let mut path_indices = Vec::with_capacity(self.depth);
        let mut position = index;
        for layer in &self.layers[..self.depth] {
            let is_right = position % 2 == 1;
            let sibling = if is_right { position - 1 } else { position + 1 };
            siblings.push(layer[sibling]);
            path_indices.push(u8::from(is_right));
            position /= 2;
        }

        debug!(id = %id, index, "Generated membership proof");

        Ok(MerkleProof {
            root: self.root,
            leaf: self.layers[0][index],
            siblings,
            path_indices,
        })
    }

    /// Verify a proof for an identity committed in this tree.
    ///
    /// The leaf is recomputed from the stored entry, so a proof for an
    /// identity not in this tree is always rejected.
    pub fn verify(&self, proof: &MerkleProof, id: &str) -> bool {
        match self.entry(id) {
            Some(entry) => {
                proof.verify(self.hasher(), entry, self.depth) && proof.root == self.root
            }
            None => false,
        }
    }
}

impl fmt::Debug for MerkleTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MerkleTree")
            .field("root", &self.root)
            .field("depth", &self.depth)
            .field("leaves", &self.entries.len())
            .field("hash_function", &self.hasher.id())
            .finish()
    }
}
