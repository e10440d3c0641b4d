//! Core types for boundary ingestion.
//!
//! With the `typescript` feature enabled, the audit-facing types can be
//! exported to TypeScript using ts-rs for the serving layer.

use chrono::{DateTime, Utc};
use geo::MultiPolygon;
use serde::{Deserialize, Serialize};

#[cfg(feature = "typescript")]
use ts_rs::TS;

/// How legally binding a data source is.
///
/// Serialized as its integer rank (0-5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum AuthorityLevel {
    /// Unknown or unverifiable origin
    Unverified = 0,
    /// Volunteer or community-maintained dataset
    CommunityMaintained = 1,
    /// Open-data hub aggregating official layers
    HubAggregator = 2,
    /// Published by the municipality itself
    MunicipalOfficial = 3,
    /// State redistricting body or state GIS mandate
    StateMandate = 4,
    /// Federal mandate (e.g. census TIGER)
    FederalMandate = 5,
}

impl AuthorityLevel {
    /// Get the rank (higher = more authority)
    pub fn rank(&self) -> u8 {
        *self as u8
    }

    /// Rank difference `self - other`, negative when `other` is stronger.
    pub fn margin_over(&self, other: &Self) -> i16 {
        i16::from(self.rank()) - i16::from(other.rank())
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unverified => "unverified",
            Self::CommunityMaintained => "community-maintained",
            Self::HubAggregator => "hub-aggregator",
            Self::MunicipalOfficial => "municipal-official",
            Self::StateMandate => "state-mandate",
            Self::FederalMandate => "federal-mandate",
        }
    }
}

impl TryFrom<u8> for AuthorityLevel {
    type Error = String;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Unverified),
            1 => Ok(Self::CommunityMaintained),
            2 => Ok(Self::HubAggregator),
            3 => Ok(Self::MunicipalOfficial),
            4 => Ok(Self::StateMandate),
            5 => Ok(Self::FederalMandate),
            other => Err(format!("authority level {} outside 0-5", other)),
        }
    }
}

impl From<AuthorityLevel> for u8 {
    fn from(level: AuthorityLevel) -> Self {
        level.rank()
    }
}

/// How fine-grained a boundary layer is (0 finest, 4 coarsest).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum GranularityTier {
    Precinct = 0,
    District = 1,
    Municipal = 2,
    Subdivision = 3,
    County = 4,
}

impl GranularityTier {
    pub fn index(&self) -> u8 {
        *self as u8
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Precinct => "precinct",
            Self::District => "district",
            Self::Municipal => "municipal",
            Self::Subdivision => "subdivision",
            Self::County => "county",
        }
    }

    /// All tiers, finest first.
    pub fn all_ascending() -> [Self; 5] {
        [
            Self::Precinct,
            Self::District,
            Self::Municipal,
            Self::Subdivision,
            Self::County,
        ]
    }
}

impl TryFrom<u8> for GranularityTier {
    type Error = String;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Precinct),
            1 => Ok(Self::District),
            2 => Ok(Self::Municipal),
            3 => Ok(Self::Subdivision),
            4 => Ok(Self::County),
            other => Err(format!("granularity tier {} outside 0-4", other)),
        }
    }
}

impl From<GranularityTier> for u8 {
    fn from(tier: GranularityTier) -> Self {
        tier.index()
    }
}

/// Kind of administrative or electoral unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[cfg_attr(feature = "typescript", derive(TS))]
#[cfg_attr(feature = "typescript", ts(export))]
#[serde(rename_all = "snake_case")]
pub enum BoundaryType {
    VotingPrecinct,
    CityCouncilDistrict,
    Ward,
    IncorporatedPlace,
    CensusDesignatedPlace,
    CountySubdivision,
    StateLegislativeUpper,
    StateLegislativeLower,
    County,
    CongressionalDistrict,
}

impl BoundaryType {
    /// Tag committed into leaf hashes. Must never change for a variant.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::VotingPrecinct => "voting_precinct",
            Self::CityCouncilDistrict => "city_council_district",
            Self::Ward => "ward",
            Self::IncorporatedPlace => "incorporated_place",
            Self::CensusDesignatedPlace => "census_designated_place",
            Self::CountySubdivision => "county_subdivision",
            Self::StateLegislativeUpper => "state_legislative_upper",
            Self::StateLegislativeLower => "state_legislative_lower",
            Self::County => "county",
            Self::CongressionalDistrict => "congressional_district",
        }
    }

    pub fn tier(&self) -> GranularityTier {
        match self {
            Self::VotingPrecinct => GranularityTier::Precinct,
            Self::CityCouncilDistrict | Self::Ward => GranularityTier::District,
            Self::IncorporatedPlace | Self::CensusDesignatedPlace => GranularityTier::Municipal,
            Self::CountySubdivision | Self::StateLegislativeUpper | Self::StateLegislativeLower => {
                GranularityTier::Subdivision
            }
            Self::County | Self::CongressionalDistrict => GranularityTier::County,
        }
    }

    /// Whether children of this type are expected to partition their parent.
    ///
    /// Places and census-designated places may legitimately overlap.
    pub fn is_tiling(&self) -> bool {
        !matches!(self, Self::IncorporatedPlace | Self::CensusDesignatedPlace)
    }
}

/// Coordinate reference system of source geometry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoordinateSystem {
    /// Geographic lon/lat on WGS84 (EPSG:4326, OGC CRS84)
    Wgs84,
    /// Spherical Web Mercator meters (EPSG:3857)
    WebMercator,
    /// Anything else, by its declared name
    Other(String),
}

impl CoordinateSystem {
    /// Parse common spellings (`EPSG:4326`, `urn:ogc:def:crs:OGC:1.3:CRS84`, `3857`).
    pub fn parse(value: &str) -> Self {
        let normalized = value.trim().to_ascii_uppercase();
        let code = normalized
            .rsplit(|c: char| c == ':' || c == '/')
            .next()
            .unwrap_or_default();
        match code {
            "4326" | "CRS84" | "WGS84" => Self::Wgs84,
            "3857" | "900913" | "102100" => Self::WebMercator,
            _ => Self::Other(value.trim().to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Wgs84 => "EPSG:4326",
            Self::WebMercator => "EPSG:3857",
            Self::Other(name) => name,
        }
    }
}

impl Default for CoordinateSystem {
    fn default() -> Self {
        Self::Wgs84
    }
}

/// How the acquisition layer obtained a dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalMethod {
    ArcgisRest,
    ArcgisHub,
    Socrata,
    Ckan,
    StateGis,
    CensusTiger,
    DirectDownload,
    Manual,
}

/// Geometry kind declared by the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GeometryKind {
    Polygon,
    MultiPolygon,
    Mixed,
}

/// Where a dataset came from and how much to trust it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvenanceMetadata {
    /// Source identifier or URL
    pub source: String,
    /// Authority of the publisher
    pub authority: AuthorityLevel,
    /// Jurisdiction key, e.g. `us-wa-seattle`
    pub jurisdiction: String,
    /// Layer type this dataset claims to be
    pub boundary_type: BoundaryType,
    /// When the acquisition layer fetched it
    pub retrieved_at: DateTime<Utc>,
    /// Upstream last-modified, when the portal reports one
    pub last_modified: Option<DateTime<Utc>>,
    pub retrieval_method: RetrievalMethod,
    /// SHA-256 of the raw payload, hex
    pub content_hash: String,
    /// Statute or ordinance establishing the boundaries
    pub legal_basis: Option<String>,
    pub license: Option<String>,
    /// Feature count the source declared
    pub declared_feature_count: Option<usize>,
    pub geometry_kind: GeometryKind,
    pub coordinate_system: CoordinateSystem,
}

/// One fetched layer. Never mutated after acquisition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawDataset {
    /// Layer or service name reported by the portal
    pub layer_name: Option<String>,
    /// GeoJSON feature collection as fetched
    pub collection: serde_json::Value,
    pub provenance: ProvenanceMetadata,
}

impl RawDataset {
    /// Layer name, falling back to the collection's own `name` member.
    pub fn name(&self) -> Option<&str> {
        self.layer_name
            .as_deref()
            .or_else(|| self.collection.get("name").and_then(|n| n.as_str()))
    }

    /// Feature array, when the collection has one.
    pub fn features(&self) -> Option<&Vec<serde_json::Value>> {
        self.collection.get("features").and_then(|f| f.as_array())
    }
}

/// Outcome of one or more validation checks.
///
/// `issues` are fatal, `warnings` are not. Confidence only ever goes down as
/// results are combined. A passing result may still exclude individual
/// features; those indices never reach normalization or commitment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "typescript", derive(TS))]
#[cfg_attr(feature = "typescript", ts(export))]
pub struct ValidationResult {
    pub valid: bool,
    /// 0-100
    pub confidence: u8,
    pub issues: Vec<String>,
    pub warnings: Vec<String>,
    /// Feature indices excluded from the dataset, ascending
    #[serde(default)]
    pub excluded: Vec<usize>,
}

impl ValidationResult {
    /// A clean pass at full confidence.
    pub fn pass() -> Self {
        Self {
            valid: true,
            confidence: 100,
            issues: Vec::new(),
            warnings: Vec::new(),
            excluded: Vec::new(),
        }
    }

    /// A fatal rejection at zero confidence.
    pub fn reject(issue: impl Into<String>) -> Self {
        Self {
            valid: false,
            confidence: 0,
            issues: vec![issue.into()],
            warnings: Vec::new(),
            excluded: Vec::new(),
        }
    }

    /// Record a non-fatal concern and cap confidence.
    pub fn warn(&mut self, warning: impl Into<String>, confidence_cap: u8) {
        self.warnings.push(warning.into());
        self.confidence = self.confidence.min(confidence_cap);
    }

    /// Builder form of [`warn`](Self::warn).
    pub fn with_warning(mut self, warning: impl Into<String>, confidence_cap: u8) -> Self {
        self.warn(warning, confidence_cap);
        self
    }

    /// Record a fatal issue.
    pub fn fail(&mut self, issue: impl Into<String>, confidence_cap: u8) {
        self.valid = false;
        self.issues.push(issue.into());
        self.confidence = self.confidence.min(confidence_cap);
    }

    /// Drop one feature from the dataset without failing it.
    pub fn exclude(&mut self, index: usize) {
        if let Err(at) = self.excluded.binary_search(&index) {
            self.excluded.insert(at, index);
        }
    }

    /// Whether feature `index` was excluded.
    pub fn is_excluded(&self, index: usize) -> bool {
        self.excluded.binary_search(&index).is_ok()
    }

    /// Combine with a later check.
    pub fn merge(mut self, other: ValidationResult) -> Self {
        self.valid &= other.valid;
        self.confidence = self.confidence.min(other.confidence);
        self.issues.extend(other.issues);
        self.warnings.extend(other.warnings);
        for index in other.excluded {
            self.exclude(index);
        }
        self
    }
}

/// A feature left out of a committed dataset, with the reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "typescript", derive(TS))]
#[cfg_attr(feature = "typescript", ts(export))]
pub struct ExcludedFeature {
    pub jurisdiction: String,
    /// Position in the source feature array
    pub index: usize,
    pub reason: String,
}

/// Axis-aligned extent in the canonical CRS.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl BoundingBox {
    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    pub fn union(&self, other: &BoundingBox) -> BoundingBox {
        BoundingBox {
            min_x: self.min_x.min(other.min_x),
            min_y: self.min_y.min(other.min_y),
            max_x: self.max_x.max(other.max_x),
            max_y: self.max_y.max(other.max_y),
        }
    }
}

/// A boundary in canonical form, ready to commit.
///
/// Created by the normalizer and immutable thereafter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedBoundary {
    /// Stable composite key, e.g. `us-wa-seattle-3`
    pub id: String,
    pub name: String,
    pub jurisdiction: String,
    pub boundary_type: BoundaryType,
    /// Canonical geometry in WGS84
    pub geometry: MultiPolygon<f64>,
    pub provenance: ProvenanceMetadata,
    pub bbox: BoundingBox,
}

/// Stage that rejected a dataset or boundary, for batch histograms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[cfg_attr(feature = "typescript", derive(TS))]
#[cfg_attr(feature = "typescript", ts(export))]
#[serde(rename_all = "snake_case")]
pub enum RejectionKind {
    Structural,
    Semantic,
    Geographic,
    Topology,
    Count,
    Authority,
    Normalization,
}

impl RejectionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Structural => "structural",
            Self::Semantic => "semantic",
            Self::Geographic => "geographic",
            Self::Topology => "topology",
            Self::Count => "count",
            Self::Authority => "authority",
            Self::Normalization => "normalization",
        }
    }
}

/// Error types for boundary processing.
#[derive(Debug, thiserror::Error)]
pub enum AtlasError {
    /// Malformed input, never retried
    #[error("Structural error: {0}")]
    Structural(String),

    /// Wrong granularity or wrong kind of layer
    #[error("Semantic rejection: {0}")]
    SemanticRejection(String),

    /// Majority of features geographically invalid
    #[error("Geographic violation: {0}")]
    GeographicViolation(String),

    /// Gap or overlap beyond tolerance for a tiling layer
    #[error("Topology violation: {0}")]
    TopologyViolation(String),

    /// Feature count disagrees with ground truth
    #[error("Count mismatch: {0}")]
    CountMismatch(String),

    /// No eligible source at any tier for one boundary
    #[error("Authority exhausted for {boundary}: {reason}")]
    AuthorityExhausted { boundary: String, reason: String },

    /// Geometry in a CRS the normalizer cannot reproject
    #[error("Unsupported coordinate system: {0}")]
    UnsupportedCrs(String),

    /// Geometry that cannot be converted or normalized
    #[error("Invalid geometry: {0}")]
    InvalidGeometry(String),

    /// Reference data could not be loaded or is inconsistent
    #[error("Reference data error: {0}")]
    Reference(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Filesystem failure in the provenance log
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Tree construction or proof failure
    #[error(transparent)]
    Commitment(#[from] commitment::CommitmentError),
}

impl AtlasError {
    /// Histogram bucket for this error, if it is a rejection.
    pub fn rejection_kind(&self) -> Option<RejectionKind> {
        match self {
            Self::Structural(_) => Some(RejectionKind::Structural),
            Self::SemanticRejection(_) => Some(RejectionKind::Semantic),
            Self::GeographicViolation(_) => Some(RejectionKind::Geographic),
            Self::TopologyViolation(_) => Some(RejectionKind::Topology),
            Self::CountMismatch(_) => Some(RejectionKind::Count),
            Self::AuthorityExhausted { .. } => Some(RejectionKind::Authority),
            Self::UnsupportedCrs(_) | Self::InvalidGeometry(_) => {
                Some(RejectionKind::Normalization)
            }
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, AtlasError>;
