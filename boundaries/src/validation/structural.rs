//! Structural and semantic validation.
//!
//! Structural checks reject anything that is not a usable feature
//! collection. Semantic checks reject layers of the wrong kind (precincts,
//! parcels, zoning, service districts) by scoring the layer name and
//! property keys against keyword lists.

use serde_json::Value;
use tracing::debug;

use crate::config::ValidationConfig;
use crate::types::{RawDataset, ValidationResult};

/// Keywords that identify layers of the wrong kind. Any hit is fatal.
pub const NEGATIVE_KEYWORDS: &[&str] = &[
    "precinct",
    "voting",
    "election",
    "polling",
    "canopy",
    "zoning",
    "overlay",
    "parcel",
    "school",
    "fire",
    "police",
    "congressional",
    "census tract",
    "block group",
    "neighborhood association",
];

/// Phrases that identify council/ward layers, with their scores.
pub const POSITIVE_PATTERNS: &[(&str, u32)] = &[
    ("council district", 40),
    ("city council", 35),
    ("supervisor district", 35),
    ("supervisorial district", 35),
    ("ward", 30),
    ("alderman", 30),
    ("aldermanic", 30),
    ("council", 25),
    ("commission district", 25),
    ("district", 15),
];

/// Outcome of semantic scoring.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SemanticScore {
    pub score: u32,
    /// Negative keyword that forced rejection, if any
    pub rejected_by: Option<String>,
    /// Positive pattern that produced the score, if any
    pub matched: Option<String>,
}

/// Structural checks: shape of the collection and feature count.
pub fn check_structure(dataset: &RawDataset, config: &ValidationConfig) -> ValidationResult {
    let collection = &dataset.collection;
    if collection.get("type").and_then(Value::as_str) != Some("FeatureCollection") {
        return ValidationResult::reject("top-level object is not a GeoJSON FeatureCollection");
    }
    let features = match dataset.features() {
        Some(features) => features,
        None => return ValidationResult::reject("FeatureCollection has no features array"),
    };

    let count = features.len();
    if count > config.max_features {
        return ValidationResult::reject(format!(
            "{} features exceeds maximum of {}; layer is likely the wrong granularity (precincts or parcels)",
            count, config.max_features
        ));
    }
    if count < config.min_features {
        return ValidationResult::reject(format!(
            "{} features is below minimum of {}",
            count, config.min_features
        ));
    }

    let mut result = ValidationResult::pass();
    if let Some(declared) = dataset.provenance.declared_feature_count {
        if declared != count {
            result.warn(
                format!("source declared {} features but {} were delivered", declared, count),
                90,
            );
        }
    }
    result
}

/// Score a layer's name and property keys.
pub fn score_semantics(dataset: &RawDataset, config: &ValidationConfig) -> SemanticScore {
    let text = semantic_text(dataset);

    if let Some(keyword) = NEGATIVE_KEYWORDS.iter().find(|k| contains_phrase(&text, k)) {
        return SemanticScore {
            score: 0,
            rejected_by: Some(keyword.to_string()),
            matched: None,
        };
    }

    let best = POSITIVE_PATTERNS
        .iter()
        .filter(|(pattern, _)| contains_phrase(&text, pattern))
        .max_by_key(|(_, score)| *score);

    SemanticScore {
        score: best
            .map(|(_, score)| (*score).min(config.semantic_max_score))
            .unwrap_or(0),
        rejected_by: None,
        matched: best.map(|(pattern, _)| pattern.to_string()),
    }
}

/// Semantic check over the scored layer.
pub fn check_semantics(dataset: &RawDataset, config: &ValidationConfig) -> ValidationResult {
    let scored = score_semantics(dataset, config);
    debug!(
        layer = dataset.name().unwrap_or("<unnamed>"),
        score = scored.score,
        matched = ?scored.matched,
        "Semantic score"
    );

    if let Some(keyword) = scored.rejected_by {
        return ValidationResult::reject(format!(
            "layer matches excluded keyword '{}' (wrong layer type)",
            keyword
        ));
    }

    if scored.score >= config.semantic_threshold {
        return ValidationResult::pass();
    }

    // Confidence scales with how close the score came to the threshold
    let cap = 50 + (scored.score * 30 / config.semantic_threshold.max(1)) as u8;
    ValidationResult::pass().with_warning(
        format!(
            "semantic score {} of {} is below threshold {}",
            scored.score, config.semantic_max_score, config.semantic_threshold
        ),
        cap,
    )
}

/// Lowercased layer name plus property keys of the first feature, with
/// separators collapsed to single spaces.
fn semantic_text(dataset: &RawDataset) -> String {
    let mut parts: Vec<String> = Vec::new();
    if let Some(name) = dataset.name() {
        parts.push(name.to_string());
    }
    if let Some(properties) = dataset
        .features()
        .and_then(|f| f.first())
        .and_then(|f| f.get("properties"))
        .and_then(Value::as_object)
    {
        parts.extend(properties.keys().cloned());
    }

    let joined = parts.join(" ").to_lowercase();
    let words: Vec<&str> = joined
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();
    format!(" {} ", words.join(" "))
}

/// Whole-word phrase match, allowing a plural `s`.
fn contains_phrase(text: &str, phrase: &str) -> bool {
    text.contains(&format!(" {} ", phrase)) || text.contains(&format!(" {}s ", phrase))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::*;
    use chrono::Utc;
    use serde_json::json;

    fn dataset(name: &str, properties: Value, count: usize) -> RawDataset {
        let features: Vec<Value> = (0..count)
            .map(|_| json!({"type": "Feature", "properties": properties.clone(), "geometry": null}))
            .collect();
        RawDataset {
            layer_name: Some(name.to_string()),
            collection: json!({"type": "FeatureCollection", "features": features}),
            provenance: ProvenanceMetadata {
                source: "https://example.gov/layer".to_string(),
                authority: AuthorityLevel::MunicipalOfficial,
                jurisdiction: "us-wa-seattle".to_string(),
                boundary_type: BoundaryType::CityCouncilDistrict,
                retrieved_at: Utc::now(),
                last_modified: None,
                retrieval_method: RetrievalMethod::ArcgisRest,
                content_hash: String::new(),
                legal_basis: None,
                license: None,
                declared_feature_count: None,
                geometry_kind: GeometryKind::Polygon,
                coordinate_system: CoordinateSystem::Wgs84,
            },
        }
    }

    #[test]
    fn test_not_a_feature_collection() {
        let mut ds = dataset("Council Districts", json!({}), 3);
        ds.collection = json!({"type": "Feature"});
        let result = check_structure(&ds, &ValidationConfig::default());
        assert!(!result.valid);
        assert_eq!(result.confidence, 0);

        ds.collection = json!({"type": "FeatureCollection", "features": {}});
        assert!(!check_structure(&ds, &ValidationConfig::default()).valid);
    }

    #[test]
    fn test_feature_count_bounds() {
        let config = ValidationConfig::default();
        assert!(check_structure(&dataset("Wards", json!({}), 9), &config).valid);

        let too_many = check_structure(&dataset("Wards", json!({}), 450), &config);
        assert!(!too_many.valid);
        assert!(too_many.issues[0].contains("wrong granularity"));

        assert!(!check_structure(&dataset("Wards", json!({}), 0), &config).valid);
    }

    #[test]
    fn test_declared_count_mismatch_warns() {
        let mut ds = dataset("Wards", json!({}), 7);
        ds.provenance.declared_feature_count = Some(8);
        let result = check_structure(&ds, &ValidationConfig::default());
        assert!(result.valid);
        assert_eq!(result.warnings.len(), 1);
    }

    #[test]
    fn test_negative_keyword_rejects() {
        let config = ValidationConfig::default();
        let result = check_semantics(&dataset("Voting Precincts 2024", json!({}), 5), &config);
        assert!(!result.valid);
        assert!(result.issues[0].contains("precinct"));

        let by_key = check_semantics(
            &dataset("Council Districts", json!({"ZONING_CODE": "R1"}), 5),
            &config,
        );
        assert!(!by_key.valid);
    }

    #[test]
    fn test_positive_patterns() {
        let config = ValidationConfig::default();
        let strong = score_semantics(&dataset("City_Council_Districts", json!({}), 5), &config);
        assert_eq!(strong.score, 40);
        assert_eq!(strong.matched.as_deref(), Some("council district"));

        let ward = check_semantics(&dataset("Wards", json!({"WARD_NUM": 1}), 5), &config);
        assert!(ward.valid);
        assert!(ward.warnings.is_empty());
    }

    #[test]
    fn test_weak_score_passes_with_warning() {
        let config = ValidationConfig::default();
        let result = check_semantics(&dataset("Districts", json!({"NAME": "x"}), 5), &config);
        assert!(result.valid);
        assert_eq!(result.warnings.len(), 1);
        assert_eq!(result.confidence, 65);

        let unscored = check_semantics(&dataset("Layer 0", json!({}), 5), &config);
        assert!(unscored.valid);
        assert_eq!(unscored.confidence, 50);
    }

    #[test]
    fn test_whole_word_matching() {
        // "firefly" must not trip "fire"
        let config = ValidationConfig::default();
        let result = check_semantics(&dataset("Firefly Council Districts", json!({}), 5), &config);
        assert!(result.valid);
    }
}
