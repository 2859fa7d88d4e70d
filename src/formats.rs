//! Feature containers the pipeline reads and writes.
//!
//! Formats form a closed set chosen by extension through [`FORMATS`]; the
//! harmonization stages only ever see a [`FeatureBatch`].

use std::{
    fs::{self, File},
    io::BufWriter,
    path::Path,
};

use anyhow::{Context, Result, anyhow};
use encoding_rs::Encoding;
use geo::{Coord, LineString, MultiPolygon, Polygon};
use log::debug;
use serde_json::{Map, Value, json};

use crate::{
    batch::{FeatureBatch, Shape},
    crs::Crs,
    error::HarmonizeError,
    io_utils,
    schema::GEOMETRY,
};

const GEOMETRY_ALIASES: &[&str] = &["geometry", "wkt", "geom", "the_geom"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeatureFormat {
    /// Delimited text with one WKT geometry column.
    Delimited,
    /// GeoJSON FeatureCollection.
    GeoJson,
}

pub const FORMATS: &[(&str, FeatureFormat)] = &[
    ("csv", FeatureFormat::Delimited),
    ("tsv", FeatureFormat::Delimited),
    ("txt", FeatureFormat::Delimited),
    ("geojson", FeatureFormat::GeoJson),
    ("json", FeatureFormat::GeoJson),
];

#[derive(Debug, Clone)]
pub struct ReadOptions {
    pub crs: Crs,
    pub encoding: &'static Encoding,
    pub delimiter: Option<u8>,
    pub geometry_column: Option<String>,
}

impl FeatureFormat {
    pub fn for_path(path: &Path) -> Result<Self, HarmonizeError> {
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        FORMATS
            .iter()
            .find(|(candidate, _)| *candidate == extension)
            .map(|(_, format)| *format)
            .ok_or(HarmonizeError::UnsupportedFormat(extension))
    }

    pub fn read(self, path: &Path, options: &ReadOptions) -> Result<FeatureBatch> {
        let batch = match self {
            FeatureFormat::Delimited => read_delimited(path, options),
            FeatureFormat::GeoJson => read_geojson(path, options),
        }
        .with_context(|| format!("Reading features from {path:?}"))?;
        debug!("Read {} feature(s) from {path:?}", batch.len());
        Ok(batch)
    }

    /// Writes `batch` to `path`. The format is chosen by the caller, so
    /// staged `.partial` files still receive the destination's format.
    pub fn write(self, path: &Path, batch: &FeatureBatch) -> Result<()> {
        match self {
            FeatureFormat::Delimited => write_delimited(path, batch),
            FeatureFormat::GeoJson => write_geojson(path, batch),
        }
        .with_context(|| format!("Writing features to {path:?}"))
    }
}

pub fn read_features(path: &Path, options: &ReadOptions) -> Result<FeatureBatch> {
    FeatureFormat::for_path(path)?.read(path, options)
}

fn geometry_column_index(headers: &[String], explicit: Option<&str>) -> Result<usize> {
    if let Some(name) = explicit {
        return headers
            .iter()
            .position(|header| header == name)
            .ok_or_else(|| anyhow!("Geometry column '{name}' not found"));
    }
    headers
        .iter()
        .position(|header| {
            GEOMETRY_ALIASES
                .iter()
                .any(|alias| header.trim().eq_ignore_ascii_case(alias))
        })
        .ok_or_else(|| {
            anyhow!(
                "No geometry column found; expected one of {}",
                GEOMETRY_ALIASES.join(", ")
            )
        })
}

fn read_delimited(path: &Path, options: &ReadOptions) -> Result<FeatureBatch> {
    let delimiter = io_utils::resolve_input_delimiter(path, options.delimiter);
    let (headers, rows) = io_utils::read_table(path, delimiter, options.encoding)?;
    let geometry_idx = geometry_column_index(&headers, options.geometry_column.as_deref())?;

    let attribute_headers = headers
        .iter()
        .enumerate()
        .filter(|(idx, _)| *idx != geometry_idx)
        .map(|(_, header)| header.clone())
        .collect();
    let mut batch = FeatureBatch::new(attribute_headers, options.crs);
    for mut row in rows {
        let wkt = if geometry_idx < row.len() {
            row.remove(geometry_idx)
        } else {
            String::new()
        };
        batch.push(row, Shape::from_wkt(&wkt));
    }
    Ok(batch)
}

fn write_delimited(path: &Path, batch: &FeatureBatch) -> Result<()> {
    let mut headers = batch.headers.clone();
    headers.push(GEOMETRY.to_string());
    let rows = batch.features.iter().map(|feature| {
        let mut row = feature.values.clone();
        row.push(feature.shape.to_wkt());
        row
    });
    let destination = match path.extension().and_then(|ext| ext.to_str()) {
        Some(io_utils::PARTIAL_SUFFIX) => path.with_extension(""),
        _ => path.to_path_buf(),
    };
    let delimiter = io_utils::resolve_input_delimiter(&destination, None);
    io_utils::write_table(path, delimiter, &headers, rows)
}

fn property_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

fn read_geojson(path: &Path, options: &ReadOptions) -> Result<FeatureBatch> {
    let bytes = fs::read(path).with_context(|| format!("Opening input file {path:?}"))?;
    let text = io_utils::decode_bytes(&bytes, options.encoding)?;
    let document: Value = serde_json::from_str(&text).context("Parsing GeoJSON")?;
    let features = document
        .get("features")
        .and_then(Value::as_array)
        .ok_or_else(|| anyhow!("GeoJSON document is not a FeatureCollection"))?;

    let mut headers: Vec<String> = Vec::new();
    for feature in features {
        if let Some(properties) = feature.get("properties").and_then(Value::as_object) {
            for key in properties.keys() {
                if !headers.contains(key) {
                    headers.push(key.clone());
                }
            }
        }
    }

    let mut batch = FeatureBatch::new(headers.clone(), options.crs);
    for feature in features {
        let properties = feature.get("properties").and_then(Value::as_object);
        let values = headers
            .iter()
            .map(|key| {
                properties
                    .and_then(|props| props.get(key))
                    .map(property_text)
                    .unwrap_or_default()
            })
            .collect();
        let shape = match feature.get("geometry") {
            None | Some(Value::Null) => Shape::Missing,
            Some(geometry) => shape_from_geojson(geometry),
        };
        batch.push(values, shape);
    }
    Ok(batch)
}

fn ring_from_geojson(value: &Value) -> Option<LineString<f64>> {
    value
        .as_array()?
        .iter()
        .map(|position| {
            let position = position.as_array()?;
            Some(Coord {
                x: position.first()?.as_f64()?,
                y: position.get(1)?.as_f64()?,
            })
        })
        .collect::<Option<Vec<_>>>()
        .map(LineString::new)
}

fn polygon_from_geojson(value: &Value) -> Option<Polygon<f64>> {
    let mut rings = value
        .as_array()?
        .iter()
        .map(ring_from_geojson)
        .collect::<Option<Vec<_>>>()?;
    if rings.is_empty() {
        return Some(Polygon::new(LineString::new(Vec::new()), Vec::new()));
    }
    let exterior = rings.remove(0);
    Some(Polygon::new(exterior, rings))
}

fn shape_from_geojson(geometry: &Value) -> Shape {
    let kind = geometry.get("type").and_then(Value::as_str).unwrap_or("");
    let Some(coordinates) = geometry.get("coordinates") else {
        return Shape::Invalid(format!("{kind} geometry without coordinates"));
    };
    let parsed = match kind {
        "Polygon" => polygon_from_geojson(coordinates).map(|polygon| MultiPolygon::new(vec![polygon])),
        "MultiPolygon" => coordinates.as_array().and_then(|polygons| {
            polygons
                .iter()
                .map(polygon_from_geojson)
                .collect::<Option<Vec<_>>>()
                .map(MultiPolygon::new)
        }),
        other => {
            return Shape::Invalid(format!("expected a polygonal geometry, found {other}"));
        }
    };
    match parsed {
        Some(shape) => Shape::Polygonal(shape),
        None => Shape::Invalid(format!("malformed {kind} coordinates")),
    }
}

fn ring_to_geojson(ring: &LineString<f64>) -> Value {
    Value::Array(ring.coords().map(|c| json!([c.x, c.y])).collect())
}

fn shape_to_geojson(shape: &Shape) -> Value {
    let Some(multi) = shape.polygonal() else {
        return Value::Null;
    };
    let polygons = multi
        .iter()
        .map(|polygon| {
            let mut rings = vec![ring_to_geojson(polygon.exterior())];
            rings.extend(polygon.interiors().iter().map(ring_to_geojson));
            Value::Array(rings)
        })
        .collect::<Vec<_>>();
    json!({ "type": "MultiPolygon", "coordinates": polygons })
}

fn write_geojson(path: &Path, batch: &FeatureBatch) -> Result<()> {
    let features = batch
        .features
        .iter()
        .map(|feature| {
            let properties = batch
                .headers
                .iter()
                .zip(&feature.values)
                .map(|(key, value)| (key.clone(), Value::String(value.clone())))
                .collect::<Map<_, _>>();
            json!({
                "type": "Feature",
                "properties": properties,
                "geometry": shape_to_geojson(&feature.shape),
            })
        })
        .collect::<Vec<_>>();
    let document = json!({ "type": "FeatureCollection", "features": features });
    let file = File::create(path).with_context(|| format!("Creating output file {path:?}"))?;
    serde_json::to_writer(BufWriter::new(file), &document).context("Serializing GeoJSON")?;
    Ok(())
}
