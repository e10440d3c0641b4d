//! Gap and overlap measurement between a parent and its children.
//!
//! Areas are geodesic (Chamberlain-Duquette, m²); percentages are relative
//! to the parent's area. Failures are reported as measurements, callers
//! decide whether they are fatal.

use geo::{Area, BooleanOps, ChamberlainDuquetteArea, MultiPolygon};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::types::{BoundaryType, ValidationResult};

/// Intersections smaller than this (m²) are treated as shared edges.
const MIN_REPORTED_AREA: f64 = 1e-6;

/// Gap/overlap measurement for one parent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopologyReport {
    pub valid: bool,
    pub boundary_type: BoundaryType,
    pub parent_area: f64,
    pub children_union_area: f64,
    /// Sum of individual child areas, counting overlaps twice
    pub total_child_area: f64,
    pub gap_area: f64,
    pub gap_percentage: f64,
    pub overlap_area: f64,
    pub overlap_percentage: f64,
    pub tolerance_percent: f64,
    pub overlaps_allowed: bool,
    pub issues: Vec<String>,
}

impl TopologyReport {
    /// Fold the measurement into a validation result.
    pub fn to_validation(&self) -> ValidationResult {
        let mut result = ValidationResult::pass();
        if !self.valid {
            for issue in &self.issues {
                result.fail(issue.clone(), 0);
            }
            return result;
        }
        if self.overlap_percentage > self.tolerance_percent {
            result.warn(
                format!(
                    "children overlap by {:.6}% of parent area (permitted for {})",
                    self.overlap_percentage,
                    self.boundary_type.as_str()
                ),
                90,
            );
        }
        if !self.boundary_type.is_tiling() && self.gap_percentage > self.tolerance_percent {
            result.warn(
                format!(
                    "children leave {:.6}% of parent uncovered",
                    self.gap_percentage
                ),
                95,
            );
        }
        result
    }
}

/// Overlap between two specific children.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairOverlap {
    pub first: usize,
    pub second: usize,
    pub area: f64,
    pub geometry: MultiPolygon<f64>,
}

/// Measurement plus the geometries behind it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopologyDiagnostics {
    pub report: TopologyReport,
    pub overlaps: Vec<PairOverlap>,
    /// Parts of the parent no child covers
    pub gaps: MultiPolygon<f64>,
}

/// Measure how well `children` partition `parent`.
///
/// Tiling types must leave no gap beyond `tolerance_percent` and, unless
/// `overlaps_allowed`, no overlap beyond it either. Non-tiling types are
/// measured but never fail.
pub fn check_topology(
    parent: &MultiPolygon<f64>,
    children: &[MultiPolygon<f64>],
    boundary_type: BoundaryType,
    tolerance_percent: f64,
    overlaps_allowed: bool,
) -> TopologyReport {
    let union = union_all(children);
    measure(
        parent,
        children,
        &union,
        boundary_type,
        tolerance_percent,
        overlaps_allowed,
    )
}

/// [`check_topology`] plus per-pair overlap and gap geometries.
pub fn check_topology_detailed(
    parent: &MultiPolygon<f64>,
    children: &[MultiPolygon<f64>],
    boundary_type: BoundaryType,
    tolerance_percent: f64,
    overlaps_allowed: bool,
) -> TopologyDiagnostics {
    let union = union_all(children);
    let report = measure(
        parent,
        children,
        &union,
        boundary_type,
        tolerance_percent,
        overlaps_allowed,
    );

    let mut overlaps = Vec::new();
    for (i, first) in children.iter().enumerate() {
        for (j, second) in children.iter().enumerate().skip(i + 1) {
            let geometry = first.intersection(second);
            let area = geometry.chamberlain_duquette_unsigned_area();
            if area > MIN_REPORTED_AREA {
                overlaps.push(PairOverlap {
                    first: i,
                    second: j,
                    area,
                    geometry,
                });
            }
        }
    }

    let gaps = parent.difference(&union);
    TopologyDiagnostics {
        report,
        overlaps,
        gaps: MultiPolygon::new(
            gaps.0
                .into_iter()
                .filter(|p| p.chamberlain_duquette_unsigned_area() > MIN_REPORTED_AREA)
                .collect(),
        ),
    }
}

fn union_all(children: &[MultiPolygon<f64>]) -> MultiPolygon<f64> {
    children
        .iter()
        .fold(MultiPolygon::new(Vec::new()), |acc, child| acc.union(child))
}

fn measure(
    parent: &MultiPolygon<f64>,
    children: &[MultiPolygon<f64>],
    union: &MultiPolygon<f64>,
    boundary_type: BoundaryType,
    tolerance_percent: f64,
    overlaps_allowed: bool,
) -> TopologyReport {
    let parent_area = parent.chamberlain_duquette_unsigned_area();
    let children_union_area = union.chamberlain_duquette_unsigned_area();
    let total_child_area: f64 = children
        .iter()
        .map(|c| c.chamberlain_duquette_unsigned_area())
        .sum();

    let gap_area = (parent_area - children_union_area).max(0.0);
    let overlap_area = (total_child_area - children_union_area).max(0.0);

    let mut report = TopologyReport {
        valid: true,
        boundary_type,
        parent_area,
        children_union_area,
        total_child_area,
        gap_area,
        gap_percentage: 0.0,
        overlap_area,
        overlap_percentage: 0.0,
        tolerance_percent,
        overlaps_allowed,
        issues: Vec::new(),
    };

    // Planar area catches degenerate parents the geodesic formula rounds away
    if parent_area <= 0.0 || parent.unsigned_area() <= 0.0 {
        report.valid = false;
        report.issues.push("parent boundary has zero area".to_string());
        return report;
    }

    report.gap_percentage = gap_area / parent_area * 100.0;
    report.overlap_percentage = overlap_area / parent_area * 100.0;

    if boundary_type.is_tiling() {
        if report.gap_percentage > tolerance_percent {
            report.valid = false;
            report.issues.push(format!(
                "gap of {:.6}% exceeds tolerance {}%",
                report.gap_percentage, tolerance_percent
            ));
        }
        if !overlaps_allowed && report.overlap_percentage > tolerance_percent {
            report.valid = false;
            report.issues.push(format!(
                "overlap of {:.6}% exceeds tolerance {}%",
                report.overlap_percentage, tolerance_percent
            ));
        }
    }

    debug!(
        boundary_type = boundary_type.as_str(),
        gap = report.gap_percentage,
        overlap = report.overlap_percentage,
        valid = report.valid,
        "Topology measured"
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{polygon, Polygon};

    fn rect(x0: f64, y0: f64, x1: f64, y1: f64) -> MultiPolygon<f64> {
        let p: Polygon<f64> = polygon![
            (x: x0, y: y0),
            (x: x1, y: y0),
            (x: x1, y: y1),
            (x: x0, y: y1),
            (x: x0, y: y0),
        ];
        MultiPolygon::new(vec![p])
    }

    #[test]
    fn test_single_child_equal_to_parent() {
        let parent = rect(0.0, 0.0, 0.1, 0.1);
        let report = check_topology(&parent, &[parent.clone()], BoundaryType::Ward, 0.001, false);
        assert!(report.valid);
        assert!(report.gap_percentage < 1e-9);
        assert!(report.overlap_percentage < 1e-9);
    }

    #[test]
    fn test_overlap_detected() {
        let parent = rect(0.0, 0.0, 0.1, 0.1);
        let children = vec![rect(0.0, 0.0, 0.06, 0.1), rect(0.04, 0.0, 0.1, 0.1)];
        let report = check_topology(&parent, &children, BoundaryType::Ward, 0.001, false);
        assert!(!report.valid);
        assert!(report.overlap_percentage > 19.0 && report.overlap_percentage < 21.0);
        assert!(report.issues[0].contains("overlap"));

        let allowed = check_topology(&parent, &children, BoundaryType::Ward, 0.001, true);
        assert!(allowed.valid);
        assert_eq!(allowed.to_validation().warnings.len(), 1);
    }

    #[test]
    fn test_non_tiling_never_fails() {
        let parent = rect(0.0, 0.0, 0.1, 0.1);
        let children = vec![rect(0.0, 0.0, 0.03, 0.03), rect(0.02, 0.02, 0.05, 0.05)];
        let report = check_topology(
            &parent,
            &children,
            BoundaryType::CensusDesignatedPlace,
            0.001,
            false,
        );
        assert!(report.valid);
        assert!(report.gap_percentage > 50.0);
        let validation = report.to_validation();
        assert!(validation.valid);
        assert_eq!(validation.warnings.len(), 2);
    }

    #[test]
    fn test_zero_area_parent() {
        let parent = rect(0.0, 0.0, 0.0, 0.1);
        let report = check_topology(&parent, &[], BoundaryType::Ward, 0.001, false);
        assert!(!report.valid);
        assert!(!report.to_validation().valid);
    }

    #[test]
    fn test_detailed_reports_pairs_and_gaps() {
        let parent = rect(0.0, 0.0, 0.1, 0.1);
        let children = vec![
            rect(0.0, 0.0, 0.06, 0.05),
            rect(0.04, 0.0, 0.1, 0.05),
            rect(0.0, 0.05, 0.05, 0.1),
        ];
        let diagnostics =
            check_topology_detailed(&parent, &children, BoundaryType::Ward, 0.001, false);

        assert!(!diagnostics.report.valid);
        assert_eq!(diagnostics.overlaps.len(), 1);
        assert_eq!((diagnostics.overlaps[0].first, diagnostics.overlaps[0].second), (0, 1));
        assert_eq!(diagnostics.gaps.0.len(), 1);

        let gap_area = diagnostics.gaps.chamberlain_duquette_unsigned_area();
        let relative = (gap_area - diagnostics.report.gap_area).abs() / gap_area;
        assert!(relative < 1e-6);
    }
}
