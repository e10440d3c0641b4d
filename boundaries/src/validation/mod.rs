//! Dataset validation stages.
//!
//! Each stage is a pure function returning a [`ValidationResult`]. The
//! composition here runs them in order and stops at the first fatal
//! result, remembering which stage rejected the dataset.

pub mod count;
pub mod geographic;
pub mod structural;
pub mod topology;

use geo::MultiPolygon;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::config::AtlasConfig;
use crate::geometry::feature_geometry;
use crate::normalize::reproject;
use crate::types::{GranularityTier, RawDataset, RejectionKind, ValidationResult};

pub use count::check_count;
pub use geographic::check_geography;
pub use structural::{check_semantics, check_structure};
pub use topology::{check_topology, check_topology_detailed, TopologyDiagnostics, TopologyReport};

/// Inputs beyond the dataset itself.
#[derive(Debug, Clone, Default)]
pub struct ValidationContext {
    pub config: AtlasConfig,
    /// Parent boundary the dataset's features should tile, in WGS84
    pub parent: Option<MultiPolygon<f64>>,
    /// Whether this layer may overlap itself
    pub overlaps_allowed: bool,
}

impl ValidationContext {
    pub fn new(config: AtlasConfig) -> Self {
        Self {
            config,
            parent: None,
            overlaps_allowed: false,
        }
    }

    pub fn with_parent(mut self, parent: MultiPolygon<f64>) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn with_overlaps_allowed(mut self, allowed: bool) -> Self {
        self.overlaps_allowed = allowed;
        self
    }
}

/// Full outcome for one dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetReport {
    /// Source identifier of the dataset
    pub source: String,
    pub jurisdiction: String,
    pub result: ValidationResult,
    /// Stage that rejected the dataset
    pub rejected_by: Option<RejectionKind>,
    /// Topology measurement, when a parent was supplied
    pub topology: Option<TopologyReport>,
}

impl DatasetReport {
    pub fn passed(&self) -> bool {
        self.result.valid
    }
}

/// Run all stages and return the combined result.
pub fn validate(dataset: &RawDataset, ctx: &ValidationContext) -> ValidationResult {
    validate_dataset(dataset, ctx).result
}

/// Run all stages, short-circuiting on the first fatal one.
pub fn validate_dataset(dataset: &RawDataset, ctx: &ValidationContext) -> DatasetReport {
    let config = &ctx.config;
    let mut report = DatasetReport {
        source: dataset.provenance.source.clone(),
        jurisdiction: dataset.provenance.jurisdiction.clone(),
        result: ValidationResult::pass(),
        rejected_by: None,
        topology: None,
    };

    let mut stages = vec![RejectionKind::Structural];
    // Keyword scoring only makes sense for council and ward layers
    if dataset.provenance.boundary_type.tier() == GranularityTier::District {
        stages.push(RejectionKind::Semantic);
    }
    stages.push(RejectionKind::Geographic);

    for kind in stages {
        let outcome = match kind {
            RejectionKind::Structural => {
                check_structure(dataset, &config.validation).merge(check_content_hash(dataset))
            }
            RejectionKind::Semantic => check_semantics(dataset, &config.validation),
            _ => check_geography(dataset, &config.validation),
        };
        report.result = report.result.merge(outcome);
        if !report.result.valid {
            return rejected(report, kind);
        }
    }

    if let Some(parent) = &ctx.parent {
        let children = feature_geometries(dataset, &report.result);
        let topology = check_topology(
            parent,
            &children,
            dataset.provenance.boundary_type,
            config.topology.tolerance_percent,
            ctx.overlaps_allowed,
        );
        report.result = report.result.merge(topology.to_validation());
        report.topology = Some(topology);
        if !report.result.valid {
            return rejected(report, RejectionKind::Topology);
        }
    }

    debug!(
        source = %report.source,
        confidence = report.result.confidence,
        warnings = report.result.warnings.len(),
        "Dataset validated"
    );
    report
}

fn rejected(mut report: DatasetReport, kind: RejectionKind) -> DatasetReport {
    info!(
        source = %report.source,
        jurisdiction = %report.jurisdiction,
        stage = kind.as_str(),
        issues = ?report.result.issues,
        "Dataset rejected"
    );
    report.rejected_by = Some(kind);
    report
}

/// Geometries in WGS84 of the features that will actually be committed.
fn feature_geometries(dataset: &RawDataset, result: &ValidationResult) -> Vec<MultiPolygon<f64>> {
    let crs = &dataset.provenance.coordinate_system;
    dataset
        .features()
        .map(|features| {
            features
                .iter()
                .enumerate()
                .filter(|(i, _)| !result.is_excluded(*i))
                .filter_map(|(_, f)| feature_geometry(f).ok())
                .filter_map(|g| reproject(&g, crs).ok())
                .collect()
        })
        .unwrap_or_default()
}

/// Compare the declared content hash with the collection as delivered.
///
/// Hashes compact JSON, so a mismatch may only mean the acquisition layer
/// hashed different bytes; it is a warning, not a rejection.
fn check_content_hash(dataset: &RawDataset) -> ValidationResult {
    let declared = dataset.provenance.content_hash.trim().to_ascii_lowercase();
    if declared.is_empty() {
        return ValidationResult::pass();
    }
    let actual = match serde_json::to_vec(&dataset.collection) {
        Ok(bytes) => hex::encode(Sha256::digest(bytes)),
        Err(_) => return ValidationResult::pass(),
    };
    if declared.trim_start_matches("0x") == actual {
        ValidationResult::pass()
    } else {
        ValidationResult::pass().with_warning(
            format!("content hash {} does not match delivered payload", declared),
            90,
        )
    }
}
