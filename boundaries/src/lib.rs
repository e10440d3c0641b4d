//! District boundary ingestion for Shadow Atlas
//!
//! Turns raw, untrusted boundary layers into normalized districts ready for
//! commitment:
//!
//! - **Validation**: structural, semantic, geographic and topology checks,
//!   each producing a [`ValidationResult`] with a 0-100 confidence
//! - **Authority**: picks one source per boundary by granularity tier,
//!   authority level and validity window, keeping the reasoning trail
//! - **Normalization**: WGS84, fixed precision, canonical ring order and
//!   stable composite ids
//! - **Commitment**: a fixed-depth Merkle tree over the survivors, built by
//!   the `commitment` crate
//!
//! # Key Components
//!
//! - [`Pipeline`]: Runs every stage over a batch and commits the result
//! - [`AuthorityResolver`]: Tier-aware conflict resolution
//! - [`Normalizer`]: Deterministic geometry canonicalization
//! - [`ReferenceSource`]: Trait for loading authority and count reference data
//! - [`ProvenanceLog`]: Sharded append-only log of resolution trails
//!
//! # Example
//!
//! ```ignore
//! use boundaries::{AtlasConfig, Pipeline, YamlFileReferenceSource};
//!
//! let source = YamlFileReferenceSource::new("reference.yaml");
//! let pipeline = Pipeline::from_source(AtlasConfig::default(), &source).await?;
//! let report = pipeline.run(datasets).await?;
//! println!("root {}", report.snapshot.tree.root());
//! ```

pub mod authority;
pub mod config;
pub mod geometry;
pub mod normalize;
pub mod pipeline;
pub mod provenance;
pub mod reference;
pub mod types;
pub mod validation;

// Re-export main types
pub use authority::{
    AuthorityResolver, BlockerCode, Candidate, GracePeriod, RejectedCandidate, Resolution,
    ResolutionTrail, TemporalStatus, ValidityWindow,
};
pub use config::AtlasConfig;
pub use normalize::{composite_id, reproject, NormalizedDataset, Normalizer};
pub use pipeline::{leaf_input, BatchReport, JurisdictionFailure, Pipeline, RunReport, Snapshot};
pub use provenance::{spawn_merger, AuditRecord, LogWriter, MergerHandle, ProvenanceLog};
pub use reference::{
    KnownCount, ReferenceRecord, ReferenceSnapshot, ReferenceSource, StaticReferenceSource,
    YamlFileReferenceSource,
};
pub use types::*;
pub use validation::{
    check_count, check_geography, check_semantics, check_structure, check_topology,
    check_topology_detailed, validate, validate_dataset, DatasetReport, TopologyDiagnostics,
    TopologyReport, ValidationContext,
};
