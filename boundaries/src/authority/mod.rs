//! Authority-tiered conflict resolution.
//!
//! Competing sources for the same logical boundary are reconciled by
//! granularity tier, authority level and validity window. The reasoning
//! trail is part of the output, not a diagnostic.

pub mod resolver;
pub mod temporal;

pub use resolver::{
    AuthorityResolver, BlockerCode, Candidate, RejectedCandidate, Resolution, ResolutionTrail,
};
pub use temporal::{GracePeriod, TemporalStatus, ValidityWindow};
