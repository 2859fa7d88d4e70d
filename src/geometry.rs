//! Geometry sanitizer: parse, drop, repair, and reproject parcel shapes.
//!
//! Parcels are treated as polygonal throughout. Anything that does not parse
//! as a (multi)polygon is reported against its source row and dropped; the
//! batch itself never fails because of a bad shape.

use anyhow::Result;
use geo::{
    Area, BooleanOps, Geometry, HasDimensions, InteriorPoint, MultiPolygon, Orient, Point,
    orient::Direction,
};
use log::{debug, info, warn};
use sha2::{Digest, Sha256};
use wkt::{ToWkt, TryFromWkt};

use crate::{
    batch::{FeatureBatch, Shape},
    crs::Crs,
};

const SQUARE_METRES_PER_HECTARE: f64 = 10_000.0;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SanitizeReport {
    pub missing: usize,
    pub unreadable: usize,
    pub empty_after_repair: usize,
}

impl SanitizeReport {
    pub fn dropped(&self) -> usize {
        self.missing + self.unreadable + self.empty_after_repair
    }
}

impl Shape {
    /// Parses a WKT cell. Blank cells and `... EMPTY` literals are missing
    /// geometries rather than unreadable ones.
    pub fn from_wkt(text: &str) -> Shape {
        let trimmed = text.trim();
        if trimmed.is_empty() || trimmed.to_ascii_uppercase().ends_with("EMPTY") {
            return Shape::Missing;
        }
        match Geometry::<f64>::try_from_wkt_str(trimmed) {
            Ok(geometry) => Shape::from_geometry(geometry),
            Err(err) => Shape::Invalid(format!("{err:?}")),
        }
    }

    pub fn from_geometry(geometry: Geometry<f64>) -> Shape {
        match geometry {
            Geometry::Polygon(polygon) => Shape::Polygonal(MultiPolygon::new(vec![polygon])),
            Geometry::MultiPolygon(shape) => Shape::Polygonal(shape),
            other => Shape::Invalid(format!(
                "expected a polygonal geometry, found {}",
                geometry_kind(&other)
            )),
        }
    }

    pub fn to_wkt(&self) -> String {
        match self {
            Shape::Polygonal(shape) => shape.wkt_string(),
            _ => String::new(),
        }
    }
}

fn geometry_kind(geometry: &Geometry<f64>) -> &'static str {
    match geometry {
        Geometry::Point(_) => "Point",
        Geometry::Line(_) => "Line",
        Geometry::LineString(_) => "LineString",
        Geometry::Polygon(_) => "Polygon",
        Geometry::MultiPoint(_) => "MultiPoint",
        Geometry::MultiLineString(_) => "MultiLineString",
        Geometry::MultiPolygon(_) => "MultiPolygon",
        Geometry::GeometryCollection(_) => "GeometryCollection",
        Geometry::Rect(_) => "Rect",
        Geometry::Triangle(_) => "Triangle",
    }
}

/// Resolves self-intersections, merges overlapping parts and normalizes
/// ring orientation (exterior counter-clockwise, holes clockwise).
///
/// Each part is cleaned on its own before the parts are unioned, so parts
/// that overlap or repeat add up instead of cancelling out.
pub fn repair(shape: &MultiPolygon<f64>) -> MultiPolygon<f64> {
    let empty = MultiPolygon::new(Vec::new());
    let resolved = shape.0.iter().fold(empty.clone(), |merged, part| {
        let cleaned = MultiPolygon::new(vec![part.clone()]).union(&empty);
        merged.union(&cleaned)
    });
    resolved.orient(Direction::Default)
}

/// Hex digest of the WKT encoding; identical geometries share a key.
pub fn canonical_key(shape: &MultiPolygon<f64>) -> String {
    let digest = Sha256::digest(shape.wkt_string().as_bytes());
    digest.iter().map(|byte| format!("{byte:02x}")).collect()
}

pub fn area_hectares(shape: &MultiPolygon<f64>) -> f64 {
    shape.unsigned_area() / SQUARE_METRES_PER_HECTARE
}

pub fn representative_point(shape: &MultiPolygon<f64>) -> Option<Point<f64>> {
    shape.interior_point()
}

/// Drops missing, unreadable and degenerate shapes, repairs the rest and
/// moves the batch into `working`.
pub fn sanitize(batch: &mut FeatureBatch, working: Crs) -> Result<SanitizeReport> {
    let mut report = SanitizeReport::default();
    let transformer = batch.crs.transformer(working)?;
    let features = std::mem::take(&mut batch.features);
    let mut kept = Vec::with_capacity(features.len());

    for mut feature in features {
        let shape = match std::mem::replace(&mut feature.shape, Shape::Missing) {
            Shape::Missing => {
                report.missing += 1;
                continue;
            }
            Shape::Invalid(reason) => {
                warn!("Row {}: unreadable geometry dropped ({reason})", feature.row);
                report.unreadable += 1;
                continue;
            }
            Shape::Polygonal(shape) if shape.is_empty() => {
                report.missing += 1;
                continue;
            }
            Shape::Polygonal(shape) => shape,
        };

        let projected = match transformer.reproject(&shape) {
            Ok(projected) => projected,
            Err(err) => {
                warn!("Row {}: geometry dropped, {err}", feature.row);
                report.unreadable += 1;
                continue;
            }
        };

        let repaired = repair(&projected);
        if repaired.is_empty() || repaired.unsigned_area() == 0.0 {
            debug!("Row {}: geometry collapsed during repair", feature.row);
            report.empty_after_repair += 1;
            continue;
        }
        feature.shape = Shape::Polygonal(repaired);
        kept.push(feature);
    }

    batch.features = kept;
    batch.crs = working;
    if report.dropped() > 0 {
        info!(
            "Dropped {} record(s) without usable geometry ({} missing, {} unreadable, {} degenerate)",
            report.dropped(),
            report.missing,
            report.unreadable,
            report.empty_after_repair
        );
    }
    Ok(report)
}

/// Moves every remaining shape into `target`. Used for the final output
/// system once areas and identifiers are settled.
pub fn reproject_batch(batch: &mut FeatureBatch, target: Crs) -> Result<()> {
    if batch.crs == target {
        return Ok(());
    }
    let transformer = batch.crs.transformer(target)?;
    for feature in &mut batch.features {
        if let Shape::Polygonal(shape) = &feature.shape {
            let projected = transformer.reproject(shape).map_err(|err| {
                err.context(format!("Reprojecting row {} to {target}", feature.row))
            })?;
            feature.shape = Shape::Polygonal(projected);
        }
    }
    batch.crs = target;
    Ok(())
}
