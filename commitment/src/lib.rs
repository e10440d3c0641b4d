//! Merkle commitment engine for district boundary snapshots.
//!
//! Commits a set of boundaries into a fixed-depth binary Merkle tree whose
//! hashing reproduces the paired zero-knowledge membership circuit, so that
//! address-to-district membership can be proven against a published root.
//!
//! # Key Components
//!
//! - [`HashFunction`]: Injected hash capability (circuit-compatible or reference)
//! - [`MerkleTreeBuilder`]: Deterministic, all-or-nothing tree construction
//! - [`MerkleProof`]: Sibling-path membership proofs and their verification
//! - [`SnapshotDocument`]: Content-addressed description of a rooted tree
//! - [`conformance`]: Golden-vector checks for hash implementations
//!
//! # Example
//!
//! ```ignore
//! use commitment::{MerkleTreeBuilder, Sha256FieldHasher};
//!
//! let tree = MerkleTreeBuilder::new(Arc::new(Sha256FieldHasher::new())).build(entries)?;
//! let proof = tree.prove("us-wa-seattle-3")?;
//! assert!(tree.verify(&proof, "us-wa-seattle-3"));
//! ```

pub mod conformance;
pub mod error;
pub mod field;
pub mod hash;
pub mod proof;
pub mod snapshot;
pub mod tree;

pub use conformance::{check_conformance, ConformanceReport, GoldenVectorSet};
pub use error::{CommitmentError, Result};
pub use field::FieldElement;
pub use hash::{HashFunction, Sha256FieldHasher, SHA256_FIELD_HASHER_ID};
pub use proof::{verify_membership, MerkleProof};
pub use snapshot::{SnapshotDocument, SNAPSHOT_SCHEMA_VERSION};
pub use tree::{
    BuildStage, LeafOrdering, MerkleLeafInput, MerkleTree, MerkleTreeBuilder, DEFAULT_DEPTH,
};
