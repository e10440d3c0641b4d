//! Drill-down resolution of competing sources for one boundary.
//!
//! Tiers are tried finest first. At each tier the strongest eligible
//! candidate is accepted if it validated and meets the tier's authority
//! floor; otherwise the tier's blocker is recorded and resolution falls back
//! to the next coarser tier. Every decision lands in the trail.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

use super::temporal::{TemporalStatus, ValidityWindow};
use crate::config::AuthorityConfig;
use crate::types::{AtlasError, AuthorityLevel, GranularityTier, Result, ValidationResult};

/// Why a tier could not supply the boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BlockerCode {
    /// Jurisdiction elects at large; there are no districts to find
    AtLargeGovernance,
    /// Portal publishes no layer of this kind
    NoCouncilLayer,
    /// Portal or layer URL is gone
    #[serde(rename = "portal-404")]
    Portal404,
    /// Boundaries were redrawn and the published layer predates it
    RedistrictingCompleted,
    ValidationFailed,
    InsufficientAuthority,
    OutsideValidityWindow,
    /// Another candidate was accepted first
    Superseded,
}

impl BlockerCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AtLargeGovernance => "at-large-governance",
            Self::NoCouncilLayer => "no-council-layer",
            Self::Portal404 => "portal-404",
            Self::RedistrictingCompleted => "redistricting-completed",
            Self::ValidationFailed => "validation-failed",
            Self::InsufficientAuthority => "insufficient-authority",
            Self::OutsideValidityWindow => "outside-validity-window",
            Self::Superseded => "superseded",
        }
    }
}

impl std::fmt::Display for BlockerCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One source offered for a logical boundary.
#[derive(Debug, Clone)]
pub struct Candidate<T> {
    /// Identifies this source, e.g. its URL
    pub id: String,
    /// Logical boundary all competing candidates describe
    pub boundary_key: String,
    pub tier: GranularityTier,
    pub authority: AuthorityLevel,
    pub validity: Option<ValidityWindow>,
    pub validation: ValidationResult,
    /// Known reason this source cannot be used, set by acquisition
    pub blocker: Option<BlockerCode>,
    pub payload: T,
}

/// A candidate that lost, and why.
#[derive(Debug, Clone)]
pub struct RejectedCandidate<T> {
    pub candidate: Candidate<T>,
    pub code: BlockerCode,
    pub reason: String,
}

/// Audit trail for one resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolutionTrail {
    pub boundary_key: String,
    /// Human-readable reasoning, in decision order
    pub why: Vec<String>,
    /// Tiers attempted, in order
    pub tried: Vec<GranularityTier>,
    /// First blocker encountered, if any
    pub blocked: Option<BlockerCode>,
    /// Accepted candidate id, if any
    pub accepted: Option<String>,
    pub resolved_at: DateTime<Utc>,
}

impl ResolutionTrail {
    fn new(boundary_key: &str, resolved_at: DateTime<Utc>) -> Self {
        Self {
            boundary_key: boundary_key.to_string(),
            why: Vec::new(),
            tried: Vec::new(),
            blocked: None,
            accepted: None,
            resolved_at,
        }
    }

    fn block(&mut self, code: BlockerCode, reason: String) {
        if self.blocked.is_none() {
            self.blocked = Some(code);
        }
        self.why.push(reason);
    }

    /// Trail as one line, for error messages.
    pub fn summary(&self) -> String {
        self.why.join("; ")
    }
}

/// Outcome of resolving one boundary.
#[derive(Debug, Clone)]
pub struct Resolution<T> {
    pub accepted: Option<Candidate<T>>,
    pub rejected: Vec<RejectedCandidate<T>>,
    pub trail: ResolutionTrail,
}

impl<T> Resolution<T> {
    pub fn is_resolved(&self) -> bool {
        self.accepted.is_some()
    }

    /// The accepted candidate, or `AuthorityExhausted` carrying the trail.
    pub fn into_accepted(self) -> Result<Candidate<T>> {
        let summary = self.trail.summary();
        let boundary = self.trail.boundary_key;
        self.accepted.ok_or(AtlasError::AuthorityExhausted {
            boundary,
            reason: summary,
        })
    }
}

/// Resolves competing candidates by tier, authority and validity.
pub struct AuthorityResolver {
    config: AuthorityConfig,
}

impl AuthorityResolver {
    pub fn new(config: AuthorityConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AuthorityConfig {
        &self.config
    }

    /// Resolve candidates that all describe `boundary_key`, as of `now`.
    pub fn resolve<T>(
        &self,
        boundary_key: &str,
        candidates: Vec<Candidate<T>>,
        now: DateTime<Utc>,
    ) -> Resolution<T> {
        let mut trail = ResolutionTrail::new(boundary_key, now);
        let mut rejected = Vec::new();

        if candidates.is_empty() {
            trail.why.push("no candidates offered".to_string());
        }

        let eligible = self.apply_temporal_rule(candidates, now, &mut trail, &mut rejected);

        let mut by_tier: BTreeMap<GranularityTier, Vec<Candidate<T>>> = BTreeMap::new();
        for candidate in eligible {
            by_tier.entry(candidate.tier).or_default().push(candidate);
        }
        for group in by_tier.values_mut() {
            group.sort_by(|a, b| rank_order(a, b));
        }

        let mut accepted = None;
        while let Some((tier, group)) = by_tier.pop_first() {
            trail.tried.push(tier);
            let floor = self.config.floor(tier);
            let mut group = group.into_iter();

            while let Some(candidate) = group.next() {
                if let Some((code, reason)) = self.disqualify(&candidate, floor) {
                    debug!(
                        boundary = %boundary_key,
                        candidate = %candidate.id,
                        tier = tier.as_str(),
                        code = code.as_str(),
                        "Candidate blocked"
                    );
                    trail.block(
                        code,
                        format!("tier {} ({}): {}", tier.index(), tier.as_str(), reason),
                    );

                    if code == BlockerCode::ValidationFailed {
                        if let Some(winner) = self.take_override(&candidate, &mut by_tier) {
                            trail.why.push(format!(
                                "tier {} ({}): {} at {} overrides failed {} at {} (margin {} >= {})",
                                winner.tier.index(),
                                winner.tier.as_str(),
                                winner.id,
                                winner.authority.as_str(),
                                candidate.id,
                                candidate.authority.as_str(),
                                winner.authority.margin_over(&candidate.authority),
                                self.config.override_threshold
                            ));
                            trail.tried.push(winner.tier);
                            rejected.push(RejectedCandidate {
                                candidate,
                                code,
                                reason,
                            });
                            rejected.extend(group.by_ref().map(|c| superseded(c, &winner.id)));
                            accepted = Some(winner);
                            break;
                        }
                    }

                    rejected.push(RejectedCandidate {
                        candidate,
                        code,
                        reason,
                    });
                    continue;
                }

                trail.why.push(format!(
                    "tier {} ({}): accepted {} at {} (floor {})",
                    tier.index(),
                    tier.as_str(),
                    candidate.id,
                    candidate.authority.as_str(),
                    floor.as_str()
                ));
                rejected.extend(group.by_ref().map(|c| superseded(c, &candidate.id)));
                accepted = Some(candidate);
                break;
            }

            if accepted.is_some() {
                break;
            }
        }

        match &accepted {
            Some(winner) => {
                trail.accepted = Some(winner.id.clone());
                // Coarser tiers were never needed
                let winner_id = winner.id.clone();
                for group in std::mem::take(&mut by_tier).into_values() {
                    rejected.extend(group.into_iter().map(|c| superseded(c, &winner_id)));
                }
                info!(
                    boundary = %boundary_key,
                    accepted = %winner_id,
                    tier = winner.tier.as_str(),
                    authority = winner.authority.rank(),
                    "Authority resolved"
                );
            }
            None => {
                trail
                    .why
                    .push("no eligible source at any tier".to_string());
                warn!(
                    boundary = %boundary_key,
                    blocked = ?trail.blocked,
                    "Authority exhausted"
                );
            }
        }

        Resolution {
            accepted,
            rejected,
            trail,
        }
    }

    /// Resolve many boundaries; one failure never stops the others.
    pub fn resolve_batch<T>(
        &self,
        groups: BTreeMap<String, Vec<Candidate<T>>>,
        now: DateTime<Utc>,
    ) -> Vec<Resolution<T>> {
        groups
            .into_iter()
            .map(|(key, candidates)| self.resolve(&key, candidates, now))
            .collect()
    }

    /// Drop out-of-window candidates unless nothing in-window exists and a
    /// grace period covers them.
    fn apply_temporal_rule<T>(
        &self,
        candidates: Vec<Candidate<T>>,
        now: DateTime<Utc>,
        trail: &mut ResolutionTrail,
        rejected: &mut Vec<RejectedCandidate<T>>,
    ) -> Vec<Candidate<T>> {
        let status = |c: &Candidate<T>| {
            c.validity
                .as_ref()
                .map(|w| w.status_at(now))
                .unwrap_or(TemporalStatus::InWindow)
        };
        let any_in_window = candidates
            .iter()
            .any(|c| status(c) == TemporalStatus::InWindow);

        let mut eligible = Vec::new();
        for candidate in candidates {
            match status(&candidate) {
                TemporalStatus::InWindow => eligible.push(candidate),
                TemporalStatus::Grace if !any_in_window => {
                    let reason = candidate
                        .validity
                        .as_ref()
                        .and_then(|w| w.grace.as_ref())
                        .map(|g| g.reason.clone())
                        .unwrap_or_default();
                    trail.why.push(format!(
                        "{} admitted past its validity window ({}): no in-window alternative",
                        candidate.id, reason
                    ));
                    eligible.push(candidate);
                }
                other => {
                    let reason = match other {
                        TemporalStatus::NotYetEffective => "not yet effective",
                        TemporalStatus::Grace => "expired; in-window alternative exists",
                        _ => "expired",
                    };
                    let reason = format!("{} outside validity window: {}", candidate.id, reason);
                    trail.block(BlockerCode::OutsideValidityWindow, reason.clone());
                    rejected.push(RejectedCandidate {
                        candidate,
                        code: BlockerCode::OutsideValidityWindow,
                        reason,
                    });
                }
            }
        }
        eligible
    }

    /// Why a candidate cannot be accepted at its own tier, if it cannot.
    fn disqualify<T>(
        &self,
        candidate: &Candidate<T>,
        floor: AuthorityLevel,
    ) -> Option<(BlockerCode, String)> {
        if let Some(code) = candidate.blocker {
            return Some((code, format!("{} blocked: {}", candidate.id, code)));
        }
        if !candidate.validation.valid {
            return Some((
                BlockerCode::ValidationFailed,
                format!(
                    "{} at {} failed validation: {}",
                    candidate.id,
                    candidate.authority.as_str(),
                    candidate.validation.issues.join(", ")
                ),
            ));
        }
        if candidate.authority < floor {
            return Some((
                BlockerCode::InsufficientAuthority,
                format!(
                    "{} at {} is below floor {}",
                    candidate.id,
                    candidate.authority.as_str(),
                    floor.as_str()
                ),
            ));
        }
        None
    }

    /// Remove and return a coarser candidate that overrides the failed one.
    ///
    /// Only the nearest coarser tier with an acceptable candidate is
    /// considered; within it the strongest candidate wins if its authority
    /// exceeds the failed one's by at least the override threshold.
    fn take_override<T>(
        &self,
        failed: &Candidate<T>,
        remaining: &mut BTreeMap<GranularityTier, Vec<Candidate<T>>>,
    ) -> Option<Candidate<T>> {
        let threshold = i16::from(self.config.override_threshold);

        let (tier, acceptable) = remaining.iter().find_map(|(tier, group)| {
            let floor = self.config.floor(*tier);
            let acceptable: Vec<usize> = group
                .iter()
                .enumerate()
                .filter(|(_, c)| self.disqualify(c, floor).is_none())
                .map(|(index, _)| index)
                .collect();
            (!acceptable.is_empty()).then_some((*tier, acceptable))
        })?;

        // Groups are sorted strongest first
        let group = remaining.get_mut(&tier)?;
        let index = acceptable
            .into_iter()
            .find(|&i| group[i].authority.margin_over(&failed.authority) >= threshold)?;
        let winner = group.remove(index);
        if group.is_empty() {
            remaining.remove(&tier);
        }
        Some(winner)
    }
}

/// Strongest first: authority, then confidence, then id for determinism.
fn rank_order<T>(a: &Candidate<T>, b: &Candidate<T>) -> std::cmp::Ordering {
    b.authority
        .cmp(&a.authority)
        .then(b.validation.confidence.cmp(&a.validation.confidence))
        .then_with(|| a.id.cmp(&b.id))
}

fn superseded<T>(candidate: Candidate<T>, winner: &str) -> RejectedCandidate<T> {
    let reason = format!("{} superseded by {}", candidate.id, winner);
    RejectedCandidate {
        candidate,
        code: BlockerCode::Superseded,
        reason,
    }
}
