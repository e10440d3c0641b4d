//! Pipeline orchestration.
//!
//! Raw datasets flow strictly forward: validation (parallel, per dataset),
//! authority resolution (per jurisdiction), count checks, normalization,
//! and finally one Merkle commitment over everything that survived. A
//! failure for one jurisdiction is recorded and the rest carry on; a
//! commitment failure aborts the snapshot.

use chrono::Utc;
use commitment::{
    HashFunction, MerkleLeafInput, MerkleTree, MerkleTreeBuilder, Sha256FieldHasher,
    SnapshotDocument,
};
use geo::MultiPolygon;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{info, warn};

use crate::authority::{AuthorityResolver, Candidate, Resolution, ResolutionTrail};
use crate::config::AtlasConfig;
use crate::geometry::geometry_hash;
use crate::normalize::{NormalizedDataset, Normalizer};
use crate::provenance::ProvenanceLog;
use crate::reference::{ReferenceSnapshot, ReferenceSource};
use crate::types::{
    AtlasError, ExcludedFeature, NormalizedBoundary, RawDataset, RejectionKind, Result,
    ValidationResult,
};
use crate::validation::geographic::{check_feature_in, coordinate_limits};
use crate::validation::{check_count, validate_dataset, DatasetReport, ValidationContext};

/// Per-dataset results of a validation batch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchReport {
    /// One report per input dataset, in input order
    pub results: Vec<DatasetReport>,
    pub passed: usize,
    pub rejected: usize,
    /// Rejections by stage
    pub histogram: BTreeMap<RejectionKind, usize>,
}

impl BatchReport {
    fn from_results(results: Vec<DatasetReport>) -> Self {
        let mut histogram = BTreeMap::new();
        for kind in results.iter().filter_map(|r| r.rejected_by) {
            *histogram.entry(kind).or_insert(0) += 1;
        }
        let passed = results.iter().filter(|r| r.passed()).count();
        Self {
            rejected: results.len() - passed,
            passed,
            histogram,
            results,
        }
    }
}

/// A committed snapshot.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub tree: MerkleTree,
    pub document: SnapshotDocument,
}

/// A jurisdiction that produced no boundaries, and why.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JurisdictionFailure {
    pub jurisdiction: String,
    pub kind: RejectionKind,
    pub reason: String,
}

/// Everything a run produced.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub batch: BatchReport,
    pub trails: Vec<ResolutionTrail>,
    pub failures: Vec<JurisdictionFailure>,
    pub boundaries: Vec<NormalizedBoundary>,
    /// Features dropped from committed jurisdictions
    pub excluded: Vec<ExcludedFeature>,
    pub snapshot: Snapshot,
}

/// Composes the stages over one immutable reference snapshot.
pub struct Pipeline {
    config: AtlasConfig,
    reference: ReferenceSnapshot,
    hasher: Arc<dyn HashFunction>,
    parents: HashMap<String, MultiPolygon<f64>>,
    provenance: Option<Arc<ProvenanceLog>>,
    resolver: AuthorityResolver,
    normalizer: Normalizer,
}

impl Pipeline {
    /// Pipeline with the reference SHA-256 hasher.
    pub fn new(config: AtlasConfig, reference: ReferenceSnapshot) -> Self {
        Self {
            resolver: AuthorityResolver::new(config.authority.clone()),
            config,
            reference,
            hasher: Arc::new(Sha256FieldHasher::new()),
            parents: HashMap::new(),
            provenance: None,
            normalizer: Normalizer::new(),
        }
    }

    /// Load reference data from a source, then build the pipeline.
    pub async fn from_source(config: AtlasConfig, source: &dyn ReferenceSource) -> Result<Self> {
        let reference = source.load().await?;
        info!(
            source = %source.describe(),
            records = reference.len(),
            "Pipeline reference data ready"
        );
        Ok(Self::new(config, reference))
    }

    /// Commit with a different hash, e.g. the circuit's.
    pub fn with_hasher(mut self, hasher: Arc<dyn HashFunction>) -> Self {
        self.hasher = hasher;
        self
    }

    /// Parent geometry (WGS84) a jurisdiction's layers must tile.
    pub fn with_parent(
        mut self,
        jurisdiction: impl Into<String>,
        parent: MultiPolygon<f64>,
    ) -> Self {
        self.parents.insert(jurisdiction.into(), parent);
        self
    }

    /// Log every resolution trail to this audit log.
    pub fn with_provenance_log(mut self, log: Arc<ProvenanceLog>) -> Self {
        self.provenance = Some(log);
        self
    }

    pub fn config(&self) -> &AtlasConfig {
        &self.config
    }

    pub fn reference(&self) -> &ReferenceSnapshot {
        &self.reference
    }

    /// Validation context for one dataset.
    pub fn context_for(&self, dataset: &RawDataset) -> ValidationContext {
        let ctx = ValidationContext::new(self.config.clone());
        match self.parents.get(&dataset.provenance.jurisdiction) {
            Some(parent) => ctx.with_parent(parent.clone()),
            None => ctx,
        }
    }

    /// Validate one dataset.
    pub fn validate(&self, dataset: &RawDataset) -> ValidationResult {
        validate_dataset(dataset, &self.context_for(dataset)).result
    }

    /// Validate datasets in parallel, collecting every outcome.
    pub fn validate_batch(&self, datasets: &[RawDataset]) -> BatchReport {
        let results: Vec<DatasetReport> = datasets
            .par_iter()
            .map(|dataset| validate_dataset(dataset, &self.context_for(dataset)))
            .collect();
        let report = BatchReport::from_results(results);
        info!(
            passed = report.passed,
            rejected = report.rejected,
            histogram = ?report.histogram,
            "Validation batch complete"
        );
        report
    }

    /// Resolve competing candidates for one boundary as of now.
    pub fn resolve_authority<T>(
        &self,
        boundary_key: &str,
        candidates: Vec<Candidate<T>>,
    ) -> Resolution<T> {
        self.resolver.resolve(boundary_key, candidates, Utc::now())
    }

    /// Wrap a validated dataset as a resolution candidate.
    ///
    /// Reference data, when present, overrides the declared authority and
    /// supplies the validity window.
    pub fn candidate(
        &self,
        dataset: RawDataset,
        validation: ValidationResult,
    ) -> Candidate<RawDataset> {
        let provenance = &dataset.provenance;
        let record = self
            .reference
            .get(&provenance.jurisdiction, provenance.boundary_type);
        let validity = record.and_then(|r| r.validity.clone()).map(|window| {
            if window.grace.is_some() {
                window
            } else {
                window.with_redistricting_grace(self.config.authority.redistricting_grace_days)
            }
        });

        Candidate {
            id: provenance.source.clone(),
            boundary_key: provenance.jurisdiction.clone(),
            tier: provenance.boundary_type.tier(),
            authority: record.map(|r| r.authority).unwrap_or(provenance.authority),
            validity,
            validation,
            blocker: None,
            payload: dataset,
        }
    }

    /// Commit normalized boundaries into a tree and its snapshot document.
    pub fn commit(&self, boundaries: &[NormalizedBoundary]) -> Result<Snapshot> {
        let builder = MerkleTreeBuilder::new(Arc::clone(&self.hasher))
            .with_depth(self.config.commitment.depth)?;
        let leaves = boundaries.iter().map(leaf_input).collect();
        let tree = builder.build(leaves)?;
        let document = SnapshotDocument::from_tree(&tree, Utc::now());
        Ok(Snapshot { tree, document })
    }

    /// Run every stage over a batch of datasets and commit the survivors.
    pub async fn run(&self, datasets: Vec<RawDataset>) -> Result<RunReport> {
        let batch = self.validate_batch(&datasets);

        let mut groups: BTreeMap<String, Vec<Candidate<RawDataset>>> = BTreeMap::new();
        for (dataset, report) in datasets.into_iter().zip(&batch.results) {
            let candidate = self.candidate(dataset, report.result.clone());
            groups
                .entry(candidate.boundary_key.clone())
                .or_default()
                .push(candidate);
        }

        let writer = self.provenance.as_ref().map(|log| log.writer());
        let resolutions = self.resolver.resolve_batch(groups, Utc::now());

        let mut trails = Vec::with_capacity(resolutions.len());
        let mut failures = Vec::new();
        let mut boundaries = Vec::new();
        let mut excluded = Vec::new();

        for resolution in resolutions {
            let jurisdiction = resolution.trail.boundary_key.clone();
            let trail = resolution.trail.clone();
            trails.push(trail.clone());

            let outcome = resolution.into_accepted().and_then(|accepted| {
                // Commit under the authority the resolver accepted it at
                let mut dataset = accepted.payload;
                dataset.provenance.authority = accepted.authority;
                self.finish(&dataset, &accepted.validation.excluded)
            });
            let dropped = match outcome {
                Ok(normalized) => {
                    boundaries.extend(normalized.boundaries);
                    excluded.extend(normalized.excluded.iter().cloned());
                    normalized.excluded
                }
                Err(e) => {
                    let kind = e.rejection_kind().unwrap_or(RejectionKind::Normalization);
                    warn!(
                        jurisdiction = %jurisdiction,
                        stage = kind.as_str(),
                        error = %e,
                        "Jurisdiction produced no boundaries"
                    );
                    failures.push(JurisdictionFailure {
                        jurisdiction: jurisdiction.clone(),
                        kind,
                        reason: e.to_string(),
                    });
                    Vec::new()
                }
            };
            if let Some(writer) = &writer {
                writer.record_with_exclusions(&jurisdiction, trail, dropped);
            }
        }
        // The entry is released by the merge below
        drop(writer);

        if let Some(log) = &self.provenance {
            log.merge().await?;
        }

        let snapshot = self.commit(&boundaries)?;
        info!(
            boundaries = boundaries.len(),
            excluded = excluded.len(),
            failures = failures.len(),
            root = %snapshot.tree.root(),
            "Pipeline run committed"
        );

        Ok(RunReport {
            batch,
            trails,
            failures,
            boundaries,
            excluded,
            snapshot,
        })
    }

    /// Count-check and normalize an accepted dataset, leaving out the
    /// features validation excluded.
    fn finish(&self, dataset: &RawDataset, skip: &[usize]) -> Result<NormalizedDataset> {
        let provenance = &dataset.provenance;
        let total = dataset.features().map(Vec::len).unwrap_or(0);
        let discovered = total.saturating_sub(skip.iter().filter(|&&i| i < total).count());
        let known = self
            .reference
            .known_count(&provenance.jurisdiction, provenance.boundary_type);
        let counted = check_count(&provenance.jurisdiction, discovered, known, &self.config.count);
        if !counted.valid {
            return Err(AtlasError::CountMismatch(counted.issues.join("; ")));
        }

        let mut normalized = self.normalizer.normalize_dataset(dataset, skip)?;

        let mut seen = BTreeSet::new();
        let duplicates: BTreeSet<&str> = normalized
            .boundaries
            .iter()
            .filter(|b| !seen.insert(b.id.as_str()))
            .map(|b| b.id.as_str())
            .collect();
        if !duplicates.is_empty() {
            return Err(AtlasError::InvalidGeometry(format!(
                "features share district ids: {}",
                duplicates.into_iter().collect::<Vec<_>>().join(", ")
            )));
        }

        normalized.excluded.extend(validation_exclusions(dataset, skip));
        normalized.excluded.sort_by_key(|e| e.index);
        Ok(normalized)
    }
}

/// Exclusion records for features validation dropped, with the defect found.
fn validation_exclusions(dataset: &RawDataset, skip: &[usize]) -> Vec<ExcludedFeature> {
    let provenance = &dataset.provenance;
    let features = match dataset.features() {
        Some(features) => features,
        None => return Vec::new(),
    };
    let limits = coordinate_limits(&provenance.coordinate_system);
    skip.iter()
        .filter_map(|&index| features.get(index).map(|feature| (index, feature)))
        .map(|(index, feature)| ExcludedFeature {
            jurisdiction: provenance.jurisdiction.clone(),
            index,
            reason: check_feature_in(feature, limits)
                .map(|defect| defect.to_string())
                .unwrap_or_else(|| "excluded during validation".to_string()),
        })
        .collect()
}

/// Leaf input committing one boundary.
pub fn leaf_input(boundary: &NormalizedBoundary) -> MerkleLeafInput {
    MerkleLeafInput {
        id: boundary.id.clone(),
        boundary_type: boundary.boundary_type.as_str().to_string(),
        geometry_hash: geometry_hash(&boundary.geometry),
        authority_level: boundary.provenance.authority.rank(),
    }
}
