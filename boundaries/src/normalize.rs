//! Geometry canonicalization.
//!
//! Logically identical boundaries from different sources must hash
//! identically. Normalization reprojects to WGS84, rounds to a fixed
//! precision, drops repeated vertices, orients rings (exterior
//! counter-clockwise, holes clockwise), starts every ring at its smallest
//! vertex and orders polygons and holes. Applying it twice changes nothing.

use geo::orient::{Direction, Orient};
use geo::{Coord, LineString, MultiPolygon, Polygon};
use serde_json::Value;
use tracing::{debug, warn};

use crate::geometry::{bounding_box, feature_geometry};
use crate::types::{
    AtlasError, CoordinateSystem, ExcludedFeature, NormalizedBoundary, ProvenanceMetadata,
    RawDataset, Result,
};

/// Decimal places kept in canonical coordinates (~0.11 m at the equator).
pub const COORDINATE_PRECISION: i32 = 6;

/// Sphere radius used by Web Mercator (EPSG:3857), meters.
const WEB_MERCATOR_RADIUS: f64 = 6_378_137.0;

/// Property keys that carry a district number, most specific first.
const DISTRICT_KEYS: &[&str] = &[
    "district",
    "district_id",
    "districtid",
    "district_num",
    "dist_num",
    "council_district",
    "ward",
    "ward_num",
    "ward_id",
    "number",
];

const NAME_KEYS: &[&str] = &["name", "district_name", "label", "namelsad"];

/// Turns raw features into canonical [`NormalizedBoundary`] records.
#[derive(Debug, Clone, Copy, Default)]
pub struct Normalizer;

/// Normalized features of one dataset and the ones left out.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedDataset {
    pub boundaries: Vec<NormalizedBoundary>,
    /// Features that could not be normalized
    pub excluded: Vec<ExcludedFeature>,
}

impl Normalizer {
    pub fn new() -> Self {
        Self
    }

    /// Canonicalize a geometry given in `crs`.
    pub fn normalize_geometry(
        &self,
        geometry: &MultiPolygon<f64>,
        crs: &CoordinateSystem,
    ) -> Result<MultiPolygon<f64>> {
        let projected = reproject(geometry, crs)?;
        canonicalize(&projected)
    }

    /// Re-normalize an already normalized boundary. Geometry is WGS84.
    pub fn normalize(&self, boundary: &NormalizedBoundary) -> Result<NormalizedBoundary> {
        let geometry = canonicalize(&boundary.geometry)?;
        let bbox = bounding_box(&geometry).ok_or_else(|| {
            AtlasError::InvalidGeometry(format!("{} has empty geometry", boundary.id))
        })?;
        Ok(NormalizedBoundary {
            geometry,
            bbox,
            ..boundary.clone()
        })
    }

    /// Normalize one feature of a dataset. `index` is its position, used when
    /// the feature carries no district number.
    pub fn normalize_feature(
        &self,
        feature: &Value,
        index: usize,
        provenance: &ProvenanceMetadata,
    ) -> Result<NormalizedBoundary> {
        let raw = feature_geometry(feature)?;
        let geometry = self.normalize_geometry(&raw, &provenance.coordinate_system)?;
        let bbox = bounding_box(&geometry)
            .ok_or_else(|| AtlasError::InvalidGeometry("empty geometry".to_string()))?;

        let properties = feature.get("properties");
        let district = district_label(properties).unwrap_or_else(|| (index + 1).to_string());
        let name = property(properties, NAME_KEYS)
            .unwrap_or_else(|| format!("District {}", district));

        Ok(NormalizedBoundary {
            id: composite_id(&provenance.jurisdiction, &district),
            name,
            jurisdiction: provenance.jurisdiction.clone(),
            boundary_type: provenance.boundary_type,
            geometry,
            provenance: provenance.clone(),
            bbox,
        })
    }

    /// Normalize every feature except those at the `skip` indices.
    ///
    /// A feature that fails normalization is excluded on its own; the
    /// dataset only fails when no feature survives.
    pub fn normalize_dataset(
        &self,
        dataset: &RawDataset,
        skip: &[usize],
    ) -> Result<NormalizedDataset> {
        let provenance = &dataset.provenance;
        let features = dataset
            .features()
            .ok_or_else(|| AtlasError::Structural("dataset has no features array".to_string()))?;

        let mut boundaries = Vec::with_capacity(features.len());
        let mut excluded = Vec::new();
        let mut first_error = None;
        for (index, feature) in features.iter().enumerate() {
            if skip.contains(&index) {
                continue;
            }
            match self.normalize_feature(feature, index, provenance) {
                Ok(boundary) => boundaries.push(boundary),
                Err(e) => {
                    warn!(
                        jurisdiction = %provenance.jurisdiction,
                        index,
                        error = %e,
                        "Feature excluded during normalization"
                    );
                    excluded.push(ExcludedFeature {
                        jurisdiction: provenance.jurisdiction.clone(),
                        index,
                        reason: e.to_string(),
                    });
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }

        if boundaries.is_empty() {
            return Err(first_error.unwrap_or_else(|| {
                AtlasError::Structural(format!(
                    "{} has no usable features",
                    provenance.jurisdiction
                ))
            }));
        }
        debug!(
            jurisdiction = %provenance.jurisdiction,
            count = boundaries.len(),
            excluded = excluded.len(),
            "Normalized dataset"
        );
        Ok(NormalizedDataset {
            boundaries,
            excluded,
        })
    }
}

/// Reproject to WGS84 lon/lat.
pub fn reproject(
    geometry: &MultiPolygon<f64>,
    crs: &CoordinateSystem,
) -> Result<MultiPolygon<f64>> {
    match crs {
        CoordinateSystem::Wgs84 => Ok(geometry.clone()),
        CoordinateSystem::WebMercator => Ok(map_coords(geometry, web_mercator_to_wgs84)),
        CoordinateSystem::Other(name) => Err(AtlasError::UnsupportedCrs(name.clone())),
    }
}

/// Inverse spherical Mercator.
pub fn web_mercator_to_wgs84(coord: Coord<f64>) -> Coord<f64> {
    let lon = (coord.x / WEB_MERCATOR_RADIUS).to_degrees();
    let lat = (2.0 * (coord.y / WEB_MERCATOR_RADIUS).exp().atan() - std::f64::consts::FRAC_PI_2)
        .to_degrees();
    Coord { x: lon, y: lat }
}

/// Round to [`COORDINATE_PRECISION`] decimal places.
pub fn round_coord(coord: Coord<f64>) -> Coord<f64> {
    let scale = 10f64.powi(COORDINATE_PRECISION);
    // adding 0.0 folds -0.0 into 0.0 so both encode identically
    Coord {
        x: (coord.x * scale).round() / scale + 0.0,
        y: (coord.y * scale).round() / scale + 0.0,
    }
}

/// Stable boundary key, `{jurisdiction}-{district}` slugged.
pub fn composite_id(jurisdiction: &str, district: &str) -> String {
    let jurisdiction = slug(jurisdiction);
    let district = slug(district);
    if district.is_empty() {
        jurisdiction
    } else {
        format!("{}-{}", jurisdiction, district)
    }
}

/// Lowercase, alphanumerics kept, everything else collapsed to single `-`.
pub fn slug(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.trim().chars().flat_map(char::to_lowercase) {
        if c.is_alphanumeric() {
            out.push(c);
        } else if !out.is_empty() && !out.ends_with('-') {
            out.push('-');
        }
    }
    while out.ends_with('-') {
        out.pop();
    }
    out
}

fn canonicalize(geometry: &MultiPolygon<f64>) -> Result<MultiPolygon<f64>> {
    let mut polygons = geometry
        .0
        .iter()
        .map(canonical_polygon)
        .collect::<Result<Vec<_>>>()?;
    polygons.sort_by(|a, b| compare_rings(a.exterior(), b.exterior()));
    if polygons.is_empty() {
        return Err(AtlasError::InvalidGeometry("geometry has no polygons".to_string()));
    }
    Ok(MultiPolygon::new(polygons))
}

fn canonical_polygon(polygon: &Polygon<f64>) -> Result<Polygon<f64>> {
    let exterior = clean_ring(polygon.exterior()).ok_or_else(|| {
        AtlasError::InvalidGeometry("exterior ring collapses after rounding".to_string())
    })?;
    // Holes that collapse to nothing at this precision are dropped
    let interiors: Vec<LineString<f64>> =
        polygon.interiors().iter().filter_map(clean_ring).collect();

    let oriented = Polygon::new(exterior, interiors).orient(Direction::Default);
    let exterior = rotate_to_min(oriented.exterior());
    let mut interiors: Vec<LineString<f64>> =
        oriented.interiors().iter().map(rotate_to_min).collect();
    interiors.sort_by(compare_rings);
    Ok(Polygon::new(exterior, interiors))
}

/// Rounded, closed ring without consecutive duplicates, or `None` when
/// fewer than three distinct vertices remain.
fn clean_ring(ring: &LineString<f64>) -> Option<LineString<f64>> {
    let mut coords: Vec<Coord<f64>> = Vec::with_capacity(ring.0.len());
    for coord in ring.0.iter().copied().map(round_coord) {
        if coords.last() != Some(&coord) {
            coords.push(coord);
        }
    }
    if coords.len() > 1 && coords.first() == coords.last() {
        coords.pop();
    }
    if coords.len() < 3 {
        return None;
    }
    coords.push(coords[0]);
    Some(LineString::new(coords))
}

/// Start a closed ring at its lexicographically smallest vertex.
fn rotate_to_min(ring: &LineString<f64>) -> LineString<f64> {
    let open = &ring.0[..ring.0.len().saturating_sub(1)];
    let start = open
        .iter()
        .enumerate()
        .min_by(|(_, a), (_, b)| compare_coords(a, b))
        .map(|(i, _)| i)
        .unwrap_or(0);
    let mut coords: Vec<Coord<f64>> = open[start..].iter().chain(&open[..start]).copied().collect();
    if let Some(first) = coords.first().copied() {
        coords.push(first);
    }
    LineString::new(coords)
}

fn compare_coords(a: &Coord<f64>, b: &Coord<f64>) -> std::cmp::Ordering {
    a.x.total_cmp(&b.x).then(a.y.total_cmp(&b.y))
}

fn compare_rings(a: &LineString<f64>, b: &LineString<f64>) -> std::cmp::Ordering {
    a.0.iter()
        .zip(&b.0)
        .map(|(x, y)| compare_coords(x, y))
        .find(|o| o.is_ne())
        .unwrap_or_else(|| a.0.len().cmp(&b.0.len()))
}

fn map_coords(geometry: &MultiPolygon<f64>, f: fn(Coord<f64>) -> Coord<f64>) -> MultiPolygon<f64> {
    let ring = |r: &LineString<f64>| LineString::new(r.0.iter().copied().map(f).collect());
    MultiPolygon::new(
        geometry
            .0
            .iter()
            .map(|p| Polygon::new(ring(p.exterior()), p.interiors().iter().map(ring).collect()))
            .collect(),
    )
}

fn district_label(properties: Option<&Value>) -> Option<String> {
    property(properties, DISTRICT_KEYS)
}

/// First non-empty value among `keys`, matched case-insensitively.
fn property(properties: Option<&Value>, keys: &[&str]) -> Option<String> {
    let object = properties?.as_object()?;
    keys.iter().find_map(|key| {
        object
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .and_then(|(_, v)| match v {
                Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::parse_geometry;
    use crate::types::*;
    use chrono::Utc;
    use serde_json::json;

    fn provenance(crs: CoordinateSystem) -> ProvenanceMetadata {
        ProvenanceMetadata {
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
            coordinate_system: crs,
        }
    }

    fn clockwise_square() -> MultiPolygon<f64> {
        parse_geometry(&json!({
            "type": "Polygon",
            "coordinates": [[
                [-122.30000001, 47.6], [-122.3, 47.7], [-122.2, 47.7],
                [-122.2, 47.7], [-122.2, 47.6], [-122.30000001, 47.6]
            ]]
        }))
        .unwrap()
    }

    #[test]
    fn test_canonical_form() {
        let normalized = Normalizer::new()
            .normalize_geometry(&clockwise_square(), &CoordinateSystem::Wgs84)
            .unwrap();
        let ring = normalized.0[0].exterior();

        // duplicate dropped, rounded, closed, starts at smallest vertex
        assert_eq!(ring.0.len(), 5);
        assert_eq!(ring.0[0], Coord { x: -122.3, y: 47.6 });
        assert_eq!(ring.0[0], ring.0[4]);
        // counter-clockwise: second vertex is east of the first
        assert_eq!(ring.0[1], Coord { x: -122.2, y: 47.6 });
    }

    #[test]
    fn test_sources_converge() {
        let normalizer = Normalizer::new();
        let a = normalizer
            .normalize_geometry(&clockwise_square(), &CoordinateSystem::Wgs84)
            .unwrap();
        let b = normalizer
            .normalize_geometry(
                &parse_geometry(&json!({
                    "type": "Polygon",
                    "coordinates": [[
                        [-122.2, 47.7], [-122.3, 47.7], [-122.3, 47.6],
                        [-122.2, 47.6], [-122.2, 47.7]
                    ]]
                }))
                .unwrap(),
                &CoordinateSystem::Wgs84,
            )
            .unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_idempotent() {
        let normalizer = Normalizer::new();
        let once = normalizer
            .normalize_feature(
                &json!({"type": "Feature", "properties": {"DISTRICT": 3},
                        "geometry": {"type": "Polygon", "coordinates": [[
                            [-122.3, 47.6], [-122.3, 47.7], [-122.2, 47.7], [-122.2, 47.6], [-122.3, 47.6]
                        ]]}}),
                0,
                &provenance(CoordinateSystem::Wgs84),
            )
            .unwrap();
        let twice = normalizer.normalize(&once).unwrap();
        assert_eq!(once, twice);
        assert_eq!(once.id, "us-wa-seattle-3");
        assert_eq!(once.name, "District 3");
    }

    #[test]
    fn test_web_mercator_inverse() {
        let coord = web_mercator_to_wgs84(Coord {
            x: -13_614_373.0,
            y: 6_040_565.2,
        });
        assert!((coord.x - -122.3).abs() < 0.01);
        assert!((coord.y - 47.6).abs() < 0.01);

        let origin = web_mercator_to_wgs84(Coord { x: 0.0, y: 0.0 });
        assert_eq!(round_coord(origin), Coord { x: 0.0, y: 0.0 });
    }

    #[test]
    fn test_unsupported_crs() {
        let result = Normalizer::new().normalize_geometry(
            &clockwise_square(),
            &CoordinateSystem::Other("EPSG:2285".to_string()),
        );
        assert!(matches!(result, Err(AtlasError::UnsupportedCrs(_))));
    }

    #[test]
    fn test_composite_id() {
        assert_eq!(composite_id("us-wa-seattle", "District 3"), "us-wa-seattle-district-3");
        assert_eq!(composite_id("US WA Seattle", " 7 "), "us-wa-seattle-7");
        assert_eq!(slug("San José -- Ward 2"), "san-josé-ward-2");
        assert_eq!(composite_id("us-ca-x", ""), "us-ca-x");
    }

    fn dataset(features: Vec<Value>) -> RawDataset {
        RawDataset {
            layer_name: Some("Council Districts".to_string()),
            collection: json!({"type": "FeatureCollection", "features": features}),
            provenance: provenance(CoordinateSystem::Wgs84),
        }
    }

    fn district(number: u32, x: f64) -> Value {
        json!({"type": "Feature", "properties": {"DISTRICT": number},
               "geometry": {"type": "Polygon", "coordinates": [[
                   [x, 47.6], [x + 0.1, 47.6], [x + 0.1, 47.7], [x, 47.7], [x, 47.6]
               ]]}})
    }

    #[test]
    fn test_bad_feature_excluded_alone() {
        let collapsed = json!({"type": "Feature", "properties": {"DISTRICT": 9},
            "geometry": {"type": "Polygon", "coordinates": [[
                [0.0, 0.0], [0.0000001, 0.0], [0.0000001, 0.0000001], [0.0, 0.0]
            ]]}});
        let ds = dataset(vec![district(1, -122.3), collapsed, district(2, -122.2)]);

        let normalized = Normalizer::new().normalize_dataset(&ds, &[]).unwrap();
        let ids: Vec<&str> = normalized.boundaries.iter().map(|b| b.id.as_str()).collect();
        assert_eq!(ids, vec!["us-wa-seattle-1", "us-wa-seattle-2"]);
        assert_eq!(normalized.excluded.len(), 1);
        assert_eq!(normalized.excluded[0].index, 1);
        assert_eq!(normalized.excluded[0].jurisdiction, "us-wa-seattle");
    }

    #[test]
    fn test_skipped_features_not_normalized() {
        let point = json!({"type": "Feature",
                           "geometry": {"type": "Point", "coordinates": [0, 0]}});
        let ds = dataset(vec![point, district(1, -122.3)]);

        let normalized = Normalizer::new().normalize_dataset(&ds, &[0]).unwrap();
        assert_eq!(normalized.boundaries.len(), 1);
        assert!(normalized.excluded.is_empty());
    }

    #[test]
    fn test_dataset_without_survivors_fails() {
        let mut ds = dataset(vec![district(1, -122.3)]);
        ds.provenance.coordinate_system = CoordinateSystem::Other("EPSG:2285".to_string());
        assert!(matches!(
            Normalizer::new().normalize_dataset(&ds, &[]),
            Err(AtlasError::UnsupportedCrs(_))
        ));

        let ds = dataset(vec![district(1, -122.3)]);
        assert!(Normalizer::new().normalize_dataset(&ds, &[0]).is_err());
    }

    #[test]
    fn test_collapsed_ring_rejected() {
        let tiny = parse_geometry(&json!({
            "type": "Polygon",
            "coordinates": [[[0.0, 0.0], [0.0000001, 0.0], [0.0000001, 0.0000001], [0.0, 0.0]]]
        }))
        .unwrap();
        assert!(Normalizer::new()
            .normalize_geometry(&tiny, &CoordinateSystem::Wgs84)
            .is_err());
    }
}
