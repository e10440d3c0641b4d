//! End-to-end behavior of the individual stages on small known layouts.

use boundaries::config::{AuthorityConfig, CountConfig};
use boundaries::geometry::geometry_hash;
use boundaries::{
    check_count, check_topology, check_topology_detailed, AuthorityLevel, AuthorityResolver,
    BlockerCode, BoundaryType, Candidate, CoordinateSystem, GeometryKind, GranularityTier,
    KnownCount, Normalizer, ProvenanceMetadata, RetrievalMethod, ValidationResult,
};
use chrono::Utc;
use geo::{polygon, MultiPolygon};
use serde_json::json;

fn square(x: f64, y: f64, size: f64) -> MultiPolygon<f64> {
    MultiPolygon::new(vec![polygon![
        (x: x, y: y),
        (x: x + size, y: y),
        (x: x + size, y: y + size),
        (x: x, y: y + size),
        (x: x, y: y),
    ]])
}

fn rect(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> MultiPolygon<f64> {
    MultiPolygon::new(vec![polygon![
        (x: min_x, y: min_y),
        (x: max_x, y: min_y),
        (x: max_x, y: max_y),
        (x: min_x, y: max_y),
        (x: min_x, y: min_y),
    ]])
}

fn quadrants() -> Vec<MultiPolygon<f64>> {
    vec![
        square(0.0, 0.0, 0.05),
        square(0.05, 0.0, 0.05),
        square(0.0, 0.05, 0.05),
        square(0.05, 0.05, 0.05),
    ]
}

fn provenance(jurisdiction: &str) -> ProvenanceMetadata {
    ProvenanceMetadata {
        source: format!("https://gis.example.gov/{}", jurisdiction),
        authority: AuthorityLevel::MunicipalOfficial,
        jurisdiction: jurisdiction.to_string(),
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
    }
}

/// Exact quadrant tiling leaves neither gap nor overlap
#[test]
fn test_quadrants_tile_parent_exactly() {
    let parent = square(0.0, 0.0, 0.1);
    let report = check_topology(
        &parent,
        &quadrants(),
        BoundaryType::CityCouncilDistrict,
        0.001,
        false,
    );

    assert!(report.valid, "{:?}", report.issues);
    assert!(report.gap_percentage <= 0.001);
    assert!(report.overlap_percentage <= 0.001);
    assert!((report.children_union_area - report.parent_area).abs() / report.parent_area < 1e-5);
}

/// Pulling one edge in leaves a measurable gap
#[test]
fn test_shrunk_child_leaves_gap() {
    let parent = square(0.0, 0.0, 0.1);
    let mut children = quadrants();
    // Eastern edge of the north-east quadrant moves in
    children[3] = rect(0.05, 0.05, 0.0999, 0.1);

    let district = BoundaryType::CityCouncilDistrict;
    let report = check_topology(&parent, &children, district, 0.001, false);
    assert!(!report.valid);
    assert!(report.gap_percentage > 0.001);
    assert!(report.issues.iter().any(|i| i.contains("gap")));

    let diagnostics = check_topology_detailed(&parent, &children, district, 0.001, false);
    assert!(!diagnostics.gaps.0.is_empty());
    assert!(diagnostics.overlaps.is_empty());
}

#[test]
fn test_overlapping_children_detected() {
    let parent = square(0.0, 0.0, 0.1);
    let mut children = quadrants();
    children[1] = rect(0.04, 0.0, 0.1, 0.05);

    let report = check_topology(&parent, &children, BoundaryType::Ward, 0.001, false);
    assert!(!report.valid);
    assert!(report.overlap_percentage > 0.001);

    let diagnostics = check_topology_detailed(&parent, &children, BoundaryType::Ward, 0.001, false);
    assert_eq!(diagnostics.overlaps.len(), 1);
    assert_eq!((diagnostics.overlaps[0].first, diagnostics.overlaps[0].second), (0, 1));

    // Places may overlap
    let places = check_topology(&parent, &children, BoundaryType::IncorporatedPlace, 0.001, false);
    assert!(places.valid);
}

/// A strong coarse source overrides a weak fine one that failed validation
#[test]
fn test_coarse_authority_overrides_failed_fine_source() {
    let resolver = AuthorityResolver::new(AuthorityConfig::default());
    let candidates = vec![
        Candidate {
            id: "community-precincts".to_string(),
            boundary_key: "us-tx-example".to_string(),
            tier: GranularityTier::Precinct,
            authority: AuthorityLevel::CommunityMaintained,
            validity: None,
            validation: ValidationResult::reject("ring 0 of feature 3 is not closed"),
            blocker: None,
            payload: "fine",
        },
        Candidate {
            id: "census-places".to_string(),
            boundary_key: "us-tx-example".to_string(),
            tier: GranularityTier::Municipal,
            authority: AuthorityLevel::FederalMandate,
            validity: None,
            validation: ValidationResult::pass(),
            blocker: None,
            payload: "coarse",
        },
    ];

    let resolution = resolver.resolve("us-tx-example", candidates, Utc::now());
    let trail = &resolution.trail;

    assert_eq!(trail.accepted.as_deref(), Some("census-places"));
    assert_eq!(
        trail.tried,
        vec![GranularityTier::Precinct, GranularityTier::Municipal]
    );
    assert_eq!(trail.blocked, Some(BlockerCode::ValidationFailed));
    assert!(trail.why.iter().any(|w| w.starts_with("tier 0") && w.contains("failed validation")));
    assert!(trail.why.iter().any(|w| w.starts_with("tier 2") && w.contains("census-places")));

    assert_eq!(resolution.rejected.len(), 1);
    assert_eq!(resolution.rejected[0].code, BlockerCode::ValidationFailed);
    assert_eq!(resolution.into_accepted().unwrap().payload, "coarse");
}

/// Precinct-level layers delivered for a nine-district city
#[test]
fn test_count_mismatch_cites_both_numbers() {
    let known = KnownCount {
        count: 9,
        source: "City Charter Art. III".to_string(),
    };
    let result = check_count("us-ca-example", 150, Some(&known), &CountConfig::default());

    assert!(!result.valid);
    assert_eq!(result.confidence, 0);
    let issue = &result.issues[0];
    assert!(issue.contains("150"), "{}", issue);
    assert!(issue.contains('9'), "{}", issue);
    assert!(issue.contains("City Charter Art. III"));
}

#[test]
fn test_normalization_is_idempotent_and_source_independent() {
    let normalizer = Normalizer::new();
    let provenance = provenance("us-wa-example");

    // Clockwise, extra precision, starting at an arbitrary vertex
    let first = json!({
        "type": "Feature",
        "properties": {"DISTRICT": "3"},
        "geometry": {"type": "Polygon", "coordinates": [[
            [-122.30000004, 47.6], [-122.3, 47.5], [-122.4, 47.5],
            [-122.4, 47.6], [-122.30000004, 47.6]
        ]]}
    });
    // Same district, counter-clockwise, different start, a repeated vertex
    let second = json!({
        "type": "Feature",
        "properties": {"district": 3},
        "geometry": {"type": "MultiPolygon", "coordinates": [[[
            [-122.4, 47.5], [-122.3, 47.5], [-122.3, 47.5], [-122.3, 47.6],
            [-122.4, 47.6], [-122.4, 47.5]
        ]]]}
    });

    let a = normalizer.normalize_feature(&first, 0, &provenance).unwrap();
    let b = normalizer.normalize_feature(&second, 0, &provenance).unwrap();

    assert_eq!(a.id, "us-wa-example-3");
    assert_eq!(a.id, b.id);
    assert_eq!(a.geometry, b.geometry);
    assert_eq!(geometry_hash(&a.geometry), geometry_hash(&b.geometry));

    let again = normalizer.normalize(&a).unwrap();
    assert_eq!(again, a);
}
