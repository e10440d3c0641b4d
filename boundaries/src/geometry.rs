//! GeoJSON conversion and geometry hashing.

use commitment::FieldElement;
use geo::{BoundingRect, Coord, LineString, MultiPolygon, Polygon};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::types::{AtlasError, BoundingBox, Result};

/// Parse a GeoJSON `Polygon` or `MultiPolygon` geometry object.
pub fn parse_geometry(geometry: &Value) -> Result<MultiPolygon<f64>> {
    let kind = geometry
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| AtlasError::InvalidGeometry("geometry has no type".to_string()))?;
    let coordinates = geometry
        .get("coordinates")
        .and_then(Value::as_array)
        .ok_or_else(|| AtlasError::InvalidGeometry("geometry has no coordinates".to_string()))?;

    match kind {
        "Polygon" => Ok(MultiPolygon::new(vec![parse_polygon(coordinates)?])),
        "MultiPolygon" => coordinates
            .iter()
            .map(|polygon| {
                polygon
                    .as_array()
                    .ok_or_else(|| {
                        AtlasError::InvalidGeometry("polygon is not an array".to_string())
                    })
                    .and_then(|rings| parse_polygon(rings))
            })
            .collect::<Result<Vec<_>>>()
            .map(MultiPolygon::new),
        other => Err(AtlasError::InvalidGeometry(format!(
            "unsupported geometry type {}",
            other
        ))),
    }
}

/// Parse the geometry of a GeoJSON feature.
pub fn feature_geometry(feature: &Value) -> Result<MultiPolygon<f64>> {
    let geometry = feature
        .get("geometry")
        .filter(|g| !g.is_null())
        .ok_or_else(|| AtlasError::InvalidGeometry("feature has no geometry".to_string()))?;
    parse_geometry(geometry)
}

fn parse_polygon(rings: &[Value]) -> Result<Polygon<f64>> {
    let mut parsed = rings.iter().map(parse_ring);
    let exterior = parsed
        .next()
        .ok_or_else(|| AtlasError::InvalidGeometry("polygon has no rings".to_string()))??;
    let interiors = parsed.collect::<Result<Vec<_>>>()?;
    Ok(Polygon::new(exterior, interiors))
}

fn parse_ring(ring: &Value) -> Result<LineString<f64>> {
    ring.as_array()
        .ok_or_else(|| AtlasError::InvalidGeometry("ring is not an array".to_string()))?
        .iter()
        .map(parse_position)
        .collect::<Result<Vec<_>>>()
        .map(LineString::new)
}

/// Read `[x, y, ...]`, ignoring any elevation.
pub fn parse_position(position: &Value) -> Result<Coord<f64>> {
    let values = position
        .as_array()
        .filter(|p| p.len() >= 2)
        .ok_or_else(|| AtlasError::InvalidGeometry("position needs two numbers".to_string()))?;
    match (values[0].as_f64(), values[1].as_f64()) {
        (Some(x), Some(y)) if x.is_finite() && y.is_finite() => Ok(Coord { x, y }),
        _ => Err(AtlasError::InvalidGeometry(format!(
            "non-numeric position {}",
            position
        ))),
    }
}

/// Extent of a geometry, `None` when it has no coordinates.
pub fn bounding_box(geometry: &MultiPolygon<f64>) -> Option<BoundingBox> {
    geometry.bounding_rect().map(|rect| BoundingBox {
        min_x: rect.min().x,
        min_y: rect.min().y,
        max_x: rect.max().x,
        max_y: rect.max().y,
    })
}

/// Unambiguous binary encoding of a geometry.
///
/// Counts precede every polygon, ring and coordinate list so that no two
/// distinct geometries share an encoding.
pub fn canonical_bytes(geometry: &MultiPolygon<f64>) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&(geometry.0.len() as u32).to_be_bytes());
    for polygon in &geometry.0 {
        let rings = std::iter::once(polygon.exterior()).chain(polygon.interiors());
        out.extend_from_slice(&(1 + polygon.interiors().len() as u32).to_be_bytes());
        for ring in rings {
            out.extend_from_slice(&(ring.0.len() as u32).to_be_bytes());
            for coord in &ring.0 {
                out.extend_from_slice(&coord.x.to_be_bytes());
                out.extend_from_slice(&coord.y.to_be_bytes());
            }
        }
    }
    out
}

/// Field-mapped SHA-256 of the canonical encoding.
pub fn geometry_hash(geometry: &MultiPolygon<f64>) -> FieldElement {
    FieldElement::from_digest(Sha256::digest(canonical_bytes(geometry)).into())
}
