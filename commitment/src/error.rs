//! Error types for commitment operations.

/// Error types for tree construction and proof generation.
///
/// Construction failures are all-or-nothing: no partially built tree is
/// ever returned alongside one of these.
#[derive(Debug, thiserror::Error)]
pub enum CommitmentError {
    /// More entries than the fixed tree capacity
    #[error("Capacity exceeded: {count} entries for a tree of capacity {capacity}")]
    CapacityExceeded { count: usize, capacity: usize },

    /// Two or more entries share an identity
    #[error("Duplicate identity: {}", ids.join(", "))]
    DuplicateIdentity { ids: Vec<String> },

    /// Authority level outside [0, 5]
    #[error("Invalid authority level {level} for '{id}' (expected 0-5)")]
    InvalidAuthority { id: String, level: u8 },

    /// Identity not present in the tree
    #[error("Identity not found in tree: {0}")]
    NotFound(String),

    /// Depth outside the supported range
    #[error("Invalid tree depth: {0}")]
    InvalidDepth(usize),

    /// Bytes or hex that do not encode a field element
    #[error("Invalid field element: {0}")]
    InvalidFieldElement(String),

    /// Snapshot or vector (de)serialization failure
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for CommitmentError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CommitmentError>;
