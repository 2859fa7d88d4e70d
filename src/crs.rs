//! Coordinate reference systems, addressed by EPSG code.
//!
//! Any code in the EPSG registry is accepted, so national systems such as
//! UTM 25832/25833 or Lambert 2008 read as readily as EPSG:3035. Projection
//! math is delegated to `proj4rs`; definitions come from `crs-definitions`.

use std::{fmt, str::FromStr};

use anyhow::{Result, anyhow};
use geo::{Coord, MapCoords, MultiPolygon};
use proj4rs::proj::Proj;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::HarmonizeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Crs(u16);

impl Crs {
    /// Geographic longitude/latitude in degrees.
    pub const WGS84: Crs = Crs(4326);
    /// ETRS89 / LAEA Europe, metres. Equal-area, used for area and identifiers.
    pub const LAEA_EUROPE: Crs = Crs(3035);

    pub fn from_epsg(code: u16) -> Result<Self, HarmonizeError> {
        crs_definitions::from_code(code)
            .map(|_| Crs(code))
            .ok_or_else(|| HarmonizeError::UnknownCrs(format!("EPSG:{code}")))
    }

    pub fn code(&self) -> u16 {
        self.0
    }

    fn proj4(&self) -> Result<&'static str, HarmonizeError> {
        crs_definitions::from_code(self.0)
            .map(|def| def.proj4)
            .ok_or_else(|| HarmonizeError::UnknownCrs(self.to_string()))
    }

    pub fn is_geographic(&self) -> bool {
        self.proj4()
            .map(|definition| {
                definition.contains("+proj=longlat") || definition.contains("+proj=latlong")
            })
            .unwrap_or(false)
    }

    /// Builds a reusable transform from `self` into `target`.
    pub fn transformer(self, target: Crs) -> Result<Transformer> {
        Transformer::new(self, target)
    }

    /// Transforms a single coordinate from `self` into `target`.
    pub fn transform(self, target: Crs, coord: Coord<f64>) -> Result<Coord<f64>> {
        self.transformer(target)?.transform(coord)
    }

    pub fn reproject(self, target: Crs, shape: &MultiPolygon<f64>) -> Result<MultiPolygon<f64>> {
        if self == target {
            return Ok(shape.clone());
        }
        self.transformer(target)?.reproject(shape)
    }
}

/// Parsed source and target projections. Geographic systems take and
/// return degrees.
pub struct Transformer {
    source: Crs,
    target: Crs,
    projections: Option<(Proj, Proj)>,
    source_geographic: bool,
    target_geographic: bool,
}

impl Transformer {
    fn new(source: Crs, target: Crs) -> Result<Self> {
        let projections = if source == target {
            None
        } else {
            Some((parse_projection(source)?, parse_projection(target)?))
        };
        Ok(Self {
            source,
            target,
            projections,
            source_geographic: source.is_geographic(),
            target_geographic: target.is_geographic(),
        })
    }

    pub fn transform(&self, coord: Coord<f64>) -> Result<Coord<f64>> {
        let Some((from, to)) = &self.projections else {
            return Ok(coord);
        };
        let mut point = if self.source_geographic {
            (coord.x.to_radians(), coord.y.to_radians(), 0.0)
        } else {
            (coord.x, coord.y, 0.0)
        };
        proj4rs::transform::transform(from, to, &mut point).map_err(|err| {
            anyhow!(
                "coordinate ({}, {}) cannot be transformed from {} to {}: {err:?}",
                coord.x,
                coord.y,
                self.source,
                self.target
            )
        })?;
        let projected = if self.target_geographic {
            Coord {
                x: point.0.to_degrees(),
                y: point.1.to_degrees(),
            }
        } else {
            Coord {
                x: point.0,
                y: point.1,
            }
        };
        if projected.x.is_finite() && projected.y.is_finite() {
            Ok(projected)
        } else {
            Err(anyhow!(
                "coordinate ({}, {}) has no image in {}",
                coord.x,
                coord.y,
                self.target
            ))
        }
    }

    pub fn reproject(&self, shape: &MultiPolygon<f64>) -> Result<MultiPolygon<f64>> {
        if self.projections.is_none() {
            return Ok(shape.clone());
        }
        shape.try_map_coords(|coord| self.transform(coord))
    }
}

fn parse_projection(crs: Crs) -> Result<Proj> {
    let definition = crs.proj4()?;
    Proj::from_proj_string(definition)
        .map_err(|err| anyhow!("{crs} cannot be used for reprojection ({definition}): {err:?}"))
}

impl fmt::Display for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EPSG:{}", self.0)
    }
}

impl FromStr for Crs {
    type Err = HarmonizeError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        let code = trimmed
            .strip_prefix("EPSG:")
            .or_else(|| trimmed.strip_prefix("epsg:"))
            .unwrap_or(trimmed);
        code.parse::<u16>()
            .map_err(|_| HarmonizeError::UnknownCrs(value.to_string()))
            .and_then(Crs::from_epsg)
    }
}

impl Serialize for Crs {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Crs {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let token = String::deserialize(deserializer)?;
        Crs::from_str(&token).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::polygon;

    const LAEA_FALSE_EASTING: f64 = 4_321_000.0;
    const LAEA_FALSE_NORTHING: f64 = 3_210_000.0;

    #[test]
    fn laea_matches_published_example() {
        // EPSG guidance note 7-2 worked example for method 9820.
        let projected = Crs::WGS84
            .transform(Crs::LAEA_EUROPE, Coord { x: 5.0, y: 50.0 })
            .unwrap();
        assert!((projected.x - 3_962_799.45).abs() < 1.0, "{projected:?}");
        assert!((projected.y - 2_999_718.85).abs() < 1.0, "{projected:?}");
    }

    #[test]
    fn laea_inverse_returns_to_origin_coordinates() {
        let original = Coord { x: 13.404, y: 52.52 };
        let projected = Crs::WGS84.transform(Crs::LAEA_EUROPE, original).unwrap();
        let back = Crs::LAEA_EUROPE.transform(Crs::WGS84, projected).unwrap();
        assert!((back.x - original.x).abs() < 1e-6);
        assert!((back.y - original.y).abs() < 1e-6);
    }

    #[test]
    fn projection_centre_maps_to_false_origin() {
        let centre = Crs::WGS84
            .transform(Crs::LAEA_EUROPE, Coord { x: 10.0, y: 52.0 })
            .unwrap();
        assert!((centre.x - LAEA_FALSE_EASTING).abs() < 1e-3);
        assert!((centre.y - LAEA_FALSE_NORTHING).abs() < 1e-3);
    }

    #[test]
    fn utm_central_meridian_maps_to_false_easting() {
        let utm32 = "EPSG:25832".parse::<Crs>().unwrap();
        assert!(!utm32.is_geographic());
        let projected = Crs::WGS84
            .transform(utm32, Coord { x: 9.0, y: 52.0 })
            .unwrap();
        assert!((projected.x - 500_000.0).abs() < 0.01, "{projected:?}");
        assert!(
            projected.y > 5_760_000.0 && projected.y < 5_762_500.0,
            "{projected:?}"
        );
    }

    #[test]
    fn national_systems_round_trip_through_laea() {
        let utm33 = Crs::from_epsg(25833).unwrap();
        let start = Coord { x: 390_000.0, y: 5_820_000.0 };
        let laea = utm33.transform(Crs::LAEA_EUROPE, start).unwrap();
        let back = Crs::LAEA_EUROPE.transform(utm33, laea).unwrap();
        assert!((back.x - start.x).abs() < 0.01);
        assert!((back.y - start.y).abs() < 0.01);
    }

    #[test]
    fn reproject_maps_every_vertex() {
        let shape = MultiPolygon::new(vec![polygon![
            (x: 10.0, y: 52.0),
            (x: 10.001, y: 52.0),
            (x: 10.001, y: 52.001),
            (x: 10.0, y: 52.0),
        ]]);
        let projected = Crs::WGS84.reproject(Crs::LAEA_EUROPE, &shape).unwrap();
        let first = projected.0[0].exterior().0[0];
        assert!((first.x - LAEA_FALSE_EASTING).abs() < 1e-3);
        assert_eq!(projected.0[0].exterior().0.len(), 4);
    }

    #[test]
    fn parses_codes_with_and_without_prefix() {
        assert_eq!("EPSG:3035".parse::<Crs>().unwrap(), Crs::LAEA_EUROPE);
        assert_eq!("4326".parse::<Crs>().unwrap(), Crs::WGS84);
        assert_eq!("epsg:2180".parse::<Crs>().unwrap().code(), 2180);
        assert!(Crs::WGS84.is_geographic());
        assert!(matches!(
            "EPSG:not-a-code".parse::<Crs>(),
            Err(HarmonizeError::UnknownCrs(_))
        ));
        assert!(matches!(
            "EPSG:1".parse::<Crs>(),
            Err(HarmonizeError::UnknownCrs(_))
        ));
    }
}
