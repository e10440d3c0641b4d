//! Coordinate bounds and ring integrity checks.

use geo::Coord;
use serde_json::Value;

use crate::config::ValidationConfig;
use crate::geometry::{bounding_box, feature_geometry, parse_position};
use crate::types::{
    AtlasError, BoundingBox, CoordinateSystem, RawDataset, Result, ValidationResult,
};

/// Why a single feature failed geographic checks.
#[derive(Debug, Clone, PartialEq)]
pub enum FeatureDefect {
    /// Not a polygon or multipolygon, or unparseable
    Geometry(String),
    /// Ring not closed
    OpenRing { ring: usize },
    /// Ring with fewer than four vertices
    ShortRing { ring: usize, vertices: usize },
    /// Coordinate outside [-180,180] x [-90,90]
    OutOfRange { x: f64, y: f64 },
}

impl std::fmt::Display for FeatureDefect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Geometry(reason) => write!(f, "{}", reason),
            Self::OpenRing { ring } => write!(f, "ring {} is not closed", ring),
            Self::ShortRing { ring, vertices } => {
                write!(f, "ring {} has {} vertices (need 4)", ring, vertices)
            }
            Self::OutOfRange { x, y } => write!(f, "coordinate ({}, {}) out of range", x, y),
        }
    }
}

/// Half-width of the Web Mercator square, in meters.
pub const WEB_MERCATOR_EXTENT: f64 = 20_037_508.342_789_244;

/// Meters per degree of longitude at the equator on the Web Mercator sphere.
const METERS_PER_DEGREE: f64 = 111_319.490_793_273_58;

/// Valid coordinate range `(max |x|, max |y|)` for a CRS, if known.
pub fn coordinate_limits(crs: &CoordinateSystem) -> Option<(f64, f64)> {
    match crs {
        CoordinateSystem::Wgs84 => Some((180.0, 90.0)),
        CoordinateSystem::WebMercator => Some((WEB_MERCATOR_EXTENT, WEB_MERCATOR_EXTENT)),
        CoordinateSystem::Other(_) => None,
    }
}

/// Check one WGS84 feature, returning its first defect.
pub fn check_feature(feature: &Value) -> Option<FeatureDefect> {
    check_feature_in(feature, Some((180.0, 90.0)))
}

/// Check one feature against the given coordinate limits.
///
/// Works on the raw GeoJSON rings, since converted polygons are closed
/// implicitly.
pub fn check_feature_in(feature: &Value, limits: Option<(f64, f64)>) -> Option<FeatureDefect> {
    let rings = match raw_rings(feature) {
        Ok(rings) => rings,
        Err(e) => return Some(FeatureDefect::Geometry(e.to_string())),
    };
    rings
        .iter()
        .enumerate()
        .find_map(|(index, ring)| check_ring(index, ring, limits))
}

/// Every ring of a polygon or multipolygon feature, exterior first.
fn raw_rings(feature: &Value) -> Result<Vec<Vec<Coord<f64>>>> {
    let geometry = feature
        .get("geometry")
        .filter(|g| !g.is_null())
        .ok_or_else(|| AtlasError::InvalidGeometry("feature has no geometry".to_string()))?;
    let coordinates = geometry
        .get("coordinates")
        .and_then(Value::as_array)
        .ok_or_else(|| AtlasError::InvalidGeometry("geometry has no coordinates".to_string()))?;

    let polygons: Vec<&Vec<Value>> = match geometry.get("type").and_then(Value::as_str) {
        Some("Polygon") => vec![coordinates],
        Some("MultiPolygon") => coordinates
            .iter()
            .map(|p| {
                p.as_array().ok_or_else(|| {
                    AtlasError::InvalidGeometry("polygon is not an array".to_string())
                })
            })
            .collect::<Result<Vec<_>>>()?,
        other => {
            return Err(AtlasError::InvalidGeometry(format!(
                "geometry type {} is not polygonal",
                other.unwrap_or("<missing>")
            )))
        }
    };

    let mut rings = Vec::new();
    for polygon in polygons {
        if polygon.is_empty() {
            return Err(AtlasError::InvalidGeometry("polygon has no rings".to_string()));
        }
        for ring in polygon {
            let positions = ring
                .as_array()
                .ok_or_else(|| AtlasError::InvalidGeometry("ring is not an array".to_string()))?;
            rings.push(
                positions
                    .iter()
                    .map(parse_position)
                    .collect::<Result<Vec<_>>>()?,
            );
        }
    }
    Ok(rings)
}

fn check_ring(
    index: usize,
    coords: &[Coord<f64>],
    limits: Option<(f64, f64)>,
) -> Option<FeatureDefect> {
    if coords.len() < 4 {
        return Some(FeatureDefect::ShortRing {
            ring: index,
            vertices: coords.len(),
        });
    }
    if coords.first() != coords.last() {
        return Some(FeatureDefect::OpenRing { ring: index });
    }
    let (max_x, max_y) = limits?;
    coords
        .iter()
        .find(|c| !(-max_x..=max_x).contains(&c.x) || !(-max_y..=max_y).contains(&c.y))
        .map(|c| FeatureDefect::OutOfRange { x: c.x, y: c.y })
}

/// Geographic checks over every feature of a dataset.
///
/// Expects a structurally valid collection.
pub fn check_geography(dataset: &RawDataset, config: &ValidationConfig) -> ValidationResult {
    let features = match dataset.features() {
        Some(features) if !features.is_empty() => features,
        _ => return ValidationResult::reject("no features to check"),
    };

    let crs = &dataset.provenance.coordinate_system;
    let limits = coordinate_limits(crs);
    let defects: Vec<(usize, FeatureDefect)> = features
        .iter()
        .enumerate()
        .filter_map(|(i, f)| check_feature_in(f, limits).map(|d| (i, d)))
        .collect();

    if defects.len() * 2 > features.len() {
        let (index, first) = &defects[0];
        return ValidationResult::reject(format!(
            "{} of {} features are geographically invalid (feature {}: {})",
            defects.len(),
            features.len(),
            index,
            first
        ));
    }

    let mut result = ValidationResult::pass();
    if limits.is_none() {
        result.warn(
            format!("coordinate range not checked for {}", crs.as_str()),
            80,
        );
    }
    if !defects.is_empty() {
        for (index, _) in &defects {
            result.exclude(*index);
        }
        let indices: Vec<String> = defects.iter().map(|(i, _)| i.to_string()).collect();
        let valid_share = (features.len() - defects.len()) * 100 / features.len();
        result.warn(
            format!(
                "{} features invalid: indices [{}]",
                defects.len(),
                indices.join(", ")
            ),
            valid_share.min(100) as u8,
        );
    }

    let degrees_per_unit = match crs {
        CoordinateSystem::Wgs84 => Some(1.0),
        CoordinateSystem::WebMercator => Some(1.0 / METERS_PER_DEGREE),
        CoordinateSystem::Other(_) => None,
    };
    let extent = dataset_extent(features, &result.excluded);
    if let (Some(extent), Some(scale)) = (extent, degrees_per_unit) {
        let span = extent.width().max(extent.height()) * scale;
        if span > config.max_extent_degrees {
            result.warn(
                format!(
                    "extent spans {:.2} degrees (limit {:.2}); possible cross-jurisdiction contamination",
                    span, config.max_extent_degrees
                ),
                70,
            );
        }
    }

    result
}

/// Union of the extents of every parseable feature not in `excluded`.
fn dataset_extent(features: &[Value], excluded: &[usize]) -> Option<BoundingBox> {
    features
        .iter()
        .enumerate()
        .filter(|(i, _)| excluded.binary_search(i).is_err())
        .filter_map(|(_, f)| feature_geometry(f).ok())
        .filter_map(|g| bounding_box(&g))
        .reduce(|a, b| a.union(&b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::*;
    use chrono::Utc;
    use serde_json::json;

    fn square_feature(x: f64, y: f64, size: f64) -> Value {
        json!({
            "type": "Feature",
            "properties": {},
            "geometry": {
                "type": "Polygon",
                "coordinates": [[[x, y], [x + size, y], [x + size, y + size], [x, y + size], [x, y]]]
            }
        })
    }

    fn dataset(features: Vec<Value>) -> RawDataset {
        RawDataset {
            layer_name: Some("Council Districts".to_string()),
            collection: json!({"type": "FeatureCollection", "features": features}),
            provenance: ProvenanceMetadata {
                source: "test".to_string(),
                authority: AuthorityLevel::MunicipalOfficial,
                jurisdiction: "us-wa-seattle".to_string(),
                boundary_type: BoundaryType::CityCouncilDistrict,
                retrieved_at: Utc::now(),
                last_modified: None,
                retrieval_method: RetrievalMethod::Manual,
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
    fn test_feature_defects() {
        assert_eq!(check_feature(&square_feature(0.0, 0.0, 1.0)), None);

        let open = json!({"type": "Feature", "geometry": {
            "type": "Polygon", "coordinates": [[[0, 0], [1, 0], [1, 1], [0, 1]]]
        }});
        assert_eq!(check_feature(&open), Some(FeatureDefect::OpenRing { ring: 0 }));

        let short = json!({"type": "Feature", "geometry": {
            "type": "Polygon", "coordinates": [[[0, 0], [1, 0], [0, 0]]]
        }});
        assert!(matches!(
            check_feature(&short),
            Some(FeatureDefect::ShortRing { vertices: 3, .. })
        ));

        assert!(matches!(
            check_feature(&square_feature(179.5, 10.0, 1.0)),
            Some(FeatureDefect::OutOfRange { .. })
        ));

        let point = json!({"type": "Feature",
                           "geometry": {"type": "Point", "coordinates": [0, 0]}});
        assert!(matches!(check_feature(&point), Some(FeatureDefect::Geometry(_))));
    }

    #[test]
    fn test_boundary_coordinates_inclusive() {
        let edge = json!({"type": "Feature", "geometry": {
            "type": "Polygon",
            "coordinates": [[[179.0, 89.0], [180.0, 89.0], [180.0, 90.0], [179.0, 90.0], [179.0, 89.0]]]
        }});
        assert_eq!(check_feature(&edge), None);
    }

    #[test]
    fn test_minority_invalid_warns() {
        let features = vec![
            square_feature(0.0, 0.0, 0.1),
            square_feature(0.1, 0.0, 0.1),
            square_feature(0.2, 0.0, 0.1),
            square_feature(0.0, 95.0, 0.1),
        ];
        let result = check_geography(&dataset(features), &ValidationConfig::default());
        assert!(result.valid);
        assert_eq!(result.confidence, 75);
        assert_eq!(result.warnings.len(), 1);
        assert!(result.warnings[0].contains("[3]"));
        assert_eq!(result.excluded, vec![3]);
    }

    #[test]
    fn test_excluded_features_ignored_for_extent() {
        // A mis-projected feature far away must not trigger the extent warning
        let features = vec![
            square_feature(-122.3, 47.6, 0.1),
            square_feature(-122.2, 47.6, 0.1),
            square_feature(-122.1, 47.6, 0.1),
            square_feature(-80.0, 95.0, 0.1),
        ];
        let result = check_geography(&dataset(features), &ValidationConfig::default());
        assert!(result.valid);
        assert_eq!(result.excluded, vec![3]);
        assert!(result.warnings.iter().all(|w| !w.contains("cross-jurisdiction")));
        assert_eq!(result.confidence, 75);
    }

    #[test]
    fn test_majority_invalid_rejects() {
        let features = vec![
            square_feature(0.0, 0.0, 0.1),
            square_feature(0.0, 95.0, 0.1),
            square_feature(0.0, 96.0, 0.1),
        ];
        let result = check_geography(&dataset(features), &ValidationConfig::default());
        assert!(!result.valid);
        assert_eq!(result.confidence, 0);
    }

    #[test]
    fn test_web_mercator_limits() {
        let mut ds = dataset(vec![square_feature(-13_600_000.0, 6_000_000.0, 5_000.0)]);
        ds.provenance.coordinate_system = CoordinateSystem::WebMercator;
        let result = check_geography(&ds, &ValidationConfig::default());
        assert!(result.valid);
        assert!(result.warnings.is_empty());

        // same coordinates read as degrees are out of range
        ds.provenance.coordinate_system = CoordinateSystem::Wgs84;
        assert!(!check_geography(&ds, &ValidationConfig::default()).valid);
    }

    #[test]
    fn test_wide_extent_warns() {
        let features = vec![square_feature(-122.0, 47.0, 0.1), square_feature(-80.0, 40.0, 0.1)];
        let result = check_geography(&dataset(features), &ValidationConfig::default());
        assert!(result.valid);
        assert!(result.warnings[0].contains("cross-jurisdiction"));
    }
}
