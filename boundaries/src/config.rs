//! Configuration for the boundary pipeline.
//!
//! Thresholds pinned to the paired circuit or to published methodology are
//! named constants here; the config only lets a deployment override them.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::types::{AtlasError, AuthorityLevel, GranularityTier, Result};

/// Maximum gap/overlap, as a percentage of parent area.
pub const DEFAULT_TOLERANCE_PERCENT: f64 = 0.001;

/// Authority margin that lets a coarser source outrank a failed finer one.
pub const DEFAULT_OVERRIDE_THRESHOLD: u8 = 2;

/// Grace after a validity window closes following redistricting (~18 months).
pub const DEFAULT_REDISTRICTING_GRACE_DAYS: i64 = 548;

/// Allowed difference between discovered and known feature counts.
pub const DEFAULT_COUNT_TOLERANCE: usize = 2;

/// Configuration for a pipeline run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AtlasConfig {
    #[serde(default)]
    pub validation: ValidationConfig,
    #[serde(default)]
    pub topology: TopologyConfig,
    #[serde(default)]
    pub authority: AuthorityConfig,
    #[serde(default)]
    pub count: CountConfig,
    #[serde(default)]
    pub commitment: CommitmentConfig,
    #[serde(default)]
    pub provenance: ProvenanceConfig,
}

impl AtlasConfig {
    /// Load config from YAML.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Self =
            serde_yaml::from_str(yaml).map_err(|e| AtlasError::Config(e.to_string()))?;
        config.check()?;
        Ok(config)
    }

    /// Serialize to YAML.
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(|e| AtlasError::Config(e.to_string()))
    }

    /// Reject settings no run could succeed with.
    pub fn check(&self) -> Result<()> {
        if self.validation.min_features > self.validation.max_features {
            return Err(AtlasError::Config(format!(
                "min_features {} exceeds max_features {}",
                self.validation.min_features, self.validation.max_features
            )));
        }
        if self.validation.semantic_threshold > self.validation.semantic_max_score {
            return Err(AtlasError::Config(
                "semantic_threshold exceeds semantic_max_score".to_string(),
            ));
        }
        let tolerance = self.topology.tolerance_percent;
        if tolerance.is_nan() || tolerance < 0.0 {
            return Err(AtlasError::Config(
                "topology tolerance must be non-negative".to_string(),
            ));
        }
        if self.provenance.merge_interval_secs == 0 {
            return Err(AtlasError::Config(
                "provenance merge interval must be at least one second".to_string(),
            ));
        }
        if self.commitment.depth == 0 || self.commitment.depth > commitment::tree::MAX_DEPTH {
            return Err(AtlasError::Config(format!(
                "commitment depth {} outside 1-{}",
                self.commitment.depth,
                commitment::tree::MAX_DEPTH
            )));
        }
        Ok(())
    }
}

/// Structural, semantic and geographic validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    /// Fewest features a layer may have
    pub min_features: usize,
    /// Most features a layer may have before it looks like precincts/parcels
    pub max_features: usize,
    /// Minimum semantic score for a clean pass
    pub semantic_threshold: u32,
    /// Score of the strongest positive pattern
    pub semantic_max_score: u32,
    /// Widest plausible extent for one jurisdiction (degrees)
    pub max_extent_degrees: f64,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            min_features: 1,
            max_features: 100,
            semantic_threshold: 30,
            semantic_max_score: 40,
            max_extent_degrees: 5.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TopologyConfig {
    pub tolerance_percent: f64,
}

impl Default for TopologyConfig {
    fn default() -> Self {
        Self {
            tolerance_percent: DEFAULT_TOLERANCE_PERCENT,
        }
    }
}

/// Authority resolution.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthorityConfig {
    /// Minimum authority accepted at each tier, finest first
    pub tier_floors: [AuthorityLevel; 5],
    pub override_threshold: u8,
    pub redistricting_grace_days: i64,
}

impl AuthorityConfig {
    pub fn floor(&self, tier: GranularityTier) -> AuthorityLevel {
        self.tier_floors[usize::from(tier.index())]
    }
}

impl Default for AuthorityConfig {
    fn default() -> Self {
        Self {
            tier_floors: [
                AuthorityLevel::CommunityMaintained,
                AuthorityLevel::CommunityMaintained,
                AuthorityLevel::CommunityMaintained,
                AuthorityLevel::HubAggregator,
                AuthorityLevel::HubAggregator,
            ],
            override_threshold: DEFAULT_OVERRIDE_THRESHOLD,
            redistricting_grace_days: DEFAULT_REDISTRICTING_GRACE_DAYS,
        }
    }
}

/// Feature count cross-checks.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CountConfig {
    pub tolerance: usize,
    /// Counts below this may be a missed at-large case
    pub low_threshold: usize,
    /// Counts above this are likely the wrong granularity
    pub high_threshold: usize,
}

impl Default for CountConfig {
    fn default() -> Self {
        Self {
            tolerance: DEFAULT_COUNT_TOLERANCE,
            low_threshold: 3,
            high_threshold: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CommitmentConfig {
    /// Tree depth; must match the paired circuit
    pub depth: usize,
}

impl Default for CommitmentConfig {
    fn default() -> Self {
        Self {
            depth: commitment::DEFAULT_DEPTH,
        }
    }
}

/// Sharded audit log of resolution trails.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvenanceConfig {
    pub log_dir: PathBuf,
    pub merge_interval_secs: u64,
}

impl Default for ProvenanceConfig {
    fn default() -> Self {
        Self {
            log_dir: PathBuf::from("provenance"),
            merge_interval_secs: 5,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AtlasConfig::default();
        assert_eq!(config.validation.max_features, 100);
        assert_eq!(config.commitment.depth, 12);
        assert_eq!(config.authority.override_threshold, 2);
        assert_eq!(
            config.authority.floor(GranularityTier::County),
            AuthorityLevel::HubAggregator
        );
        assert!(config.check().is_ok());
    }

    #[test]
    fn test_yaml_roundtrip() {
        let config = AtlasConfig::default();
        let yaml = config.to_yaml().unwrap();
        let parsed = AtlasConfig::from_yaml(&yaml).unwrap();
        assert_eq!(parsed.topology.tolerance_percent, DEFAULT_TOLERANCE_PERCENT);
        assert_eq!(parsed.authority.tier_floors, config.authority.tier_floors);
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let parsed = AtlasConfig::from_yaml("commitment:\n  depth: 10\n").unwrap();
        assert_eq!(parsed.commitment.depth, 10);
        assert_eq!(parsed.count.tolerance, DEFAULT_COUNT_TOLERANCE);
    }

    #[test]
    fn test_invalid_config_rejected() {
        assert!(AtlasConfig::from_yaml("commitment:\n  depth: 0\n").is_err());
        assert!(AtlasConfig::from_yaml("validation:\n  min_features: 500\n").is_err());
        assert!(AtlasConfig::from_yaml("provenance:\n  merge_interval_secs: 0\n").is_err());
    }
}
