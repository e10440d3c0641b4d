//! Reference data: authority, validity and known feature counts.
//!
//! A pipeline run reads one immutable [`ReferenceSnapshot`]. Where it comes
//! from is behind [`ReferenceSource`], so tests can use fixture tables.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::info;

use crate::authority::ValidityWindow;
use crate::types::{AtlasError, AuthorityLevel, BoundaryType, Result};

/// Ground-truth number of features and who says so.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnownCount {
    pub count: usize,
    /// Citation, e.g. "Seattle City Charter Art. IV"
    pub source: String,
}

/// What is known about one jurisdiction's layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceRecord {
    pub jurisdiction: String,
    pub boundary_type: BoundaryType,
    /// Authority of the official publisher
    pub authority: AuthorityLevel,
    #[serde(default)]
    pub validity: Option<ValidityWindow>,
    #[serde(default)]
    pub known_count: Option<KnownCount>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ReferenceFile {
    #[serde(default)]
    records: Vec<ReferenceRecord>,
}

/// Immutable lookup table keyed by jurisdiction and boundary type.
#[derive(Debug, Clone, Default)]
pub struct ReferenceSnapshot {
    records: Vec<ReferenceRecord>,
    index: HashMap<(String, BoundaryType), usize>,
}

impl ReferenceSnapshot {
    /// Build a snapshot, rejecting duplicate keys.
    pub fn from_records(records: Vec<ReferenceRecord>) -> Result<Self> {
        let mut index = HashMap::with_capacity(records.len());
        for (position, record) in records.iter().enumerate() {
            let key = (record.jurisdiction.clone(), record.boundary_type);
            if index.insert(key, position).is_some() {
                return Err(AtlasError::Reference(format!(
                    "duplicate reference entry for {} {}",
                    record.jurisdiction,
                    record.boundary_type.as_str()
                )));
            }
        }
        Ok(Self { records, index })
    }

    /// Parse the YAML form (`records: [...]`).
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let file: ReferenceFile =
            serde_yaml::from_str(yaml).map_err(|e| AtlasError::Reference(e.to_string()))?;
        Self::from_records(file.records)
    }

    pub fn to_yaml(&self) -> Result<String> {
        let file = ReferenceFile {
            records: self.records.clone(),
        };
        serde_yaml::to_string(&file).map_err(|e| AtlasError::Reference(e.to_string()))
    }

    pub fn get(&self, jurisdiction: &str, boundary_type: BoundaryType) -> Option<&ReferenceRecord> {
        self.index
            .get(&(jurisdiction.to_string(), boundary_type))
            .map(|&i| &self.records[i])
    }

    pub fn known_count(
        &self,
        jurisdiction: &str,
        boundary_type: BoundaryType,
    ) -> Option<&KnownCount> {
        self.get(jurisdiction, boundary_type)
            .and_then(|r| r.known_count.as_ref())
    }

    pub fn records(&self) -> &[ReferenceRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Where reference data is loaded from.
#[async_trait]
pub trait ReferenceSource: Send + Sync {
    /// Load a snapshot for one pipeline run.
    async fn load(&self) -> Result<ReferenceSnapshot>;

    /// Describe the source for logs.
    fn describe(&self) -> String;
}

/// In-memory source, for fixtures and embedding.
pub struct StaticReferenceSource {
    snapshot: ReferenceSnapshot,
}

impl StaticReferenceSource {
    pub fn new(snapshot: ReferenceSnapshot) -> Self {
        Self { snapshot }
    }
}

#[async_trait]
impl ReferenceSource for StaticReferenceSource {
    async fn load(&self) -> Result<ReferenceSnapshot> {
        Ok(self.snapshot.clone())
    }

    fn describe(&self) -> String {
        format!("static ({} records)", self.snapshot.len())
    }
}

/// YAML file on disk, re-read on every load.
pub struct YamlFileReferenceSource {
    path: PathBuf,
}

impl YamlFileReferenceSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl ReferenceSource for YamlFileReferenceSource {
    async fn load(&self) -> Result<ReferenceSnapshot> {
        let yaml = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            AtlasError::Reference(format!("{}: {}", self.path.display(), e))
        })?;
        let snapshot = ReferenceSnapshot::from_yaml(&yaml)?;
        info!(
            path = %self.path.display(),
            records = snapshot.len(),
            "Loaded reference data"
        );
        Ok(snapshot)
    }

    fn describe(&self) -> String {
        format!("yaml file {}", self.path.display())
    }
}
