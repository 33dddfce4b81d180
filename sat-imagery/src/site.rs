//! Survey sites loaded from a GeoJSON feature collection.
//!
//! Every feature must carry a site identifier property and a Polygon or
//! MultiPolygon geometry. Coordinates are brought to WGS84 lon/lat; the
//! legacy GeoJSON `crs` member is honoured for Web Mercator input.

use crate::error::{Error, Result};
use geo::{Coord, CoordsIter, MapCoords, MultiPolygon, Validation};
use geojson::{FeatureCollection, GeoJson, JsonObject, JsonValue};
use log::{debug, info};
use sat_utils::paths::file_stem;
use std::{collections::HashMap, path::Path};

/// Spherical mercator earth radius in metres.
const MERCATOR_RADIUS: f64 = 6_378_137.0;

/// A named survey site. Immutable once loaded.
#[derive(Debug, Clone, PartialEq)]
pub struct Site {
    pub id: String,
    pub geometry: MultiPolygon<f64>,
}

/// Coordinate reference systems the loader can bring to lon/lat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Crs {
    Wgs84,
    WebMercator,
}

impl Crs {
    /// Parse a CRS name such as `EPSG:4326`, `urn:ogc:def:crs:EPSG::3857`
    /// or `urn:ogc:def:crs:OGC:1.3:CRS84`.
    pub fn from_name(name: &str) -> Result<Crs> {
        let upper = name.trim().to_uppercase();
        if upper.ends_with("CRS84") {
            return Ok(Crs::Wgs84);
        }
        match upper.rsplit(':').next().map(str::trim) {
            Some("4326") => Ok(Crs::Wgs84),
            Some("3857") | Some("900913") | Some("3785") => Ok(Crs::WebMercator),
            _ => Err(Error::UnsupportedCrs(name.to_string())),
        }
    }

    fn to_lon_lat(self, c: Coord<f64>) -> Coord<f64> {
        match self {
            Crs::Wgs84 => c,
            Crs::WebMercator => Coord {
                x: (c.x / MERCATOR_RADIUS).to_degrees(),
                y: (2.0 * (c.y / MERCATOR_RADIUS).exp().atan() - std::f64::consts::FRAC_PI_2)
                    .to_degrees(),
            },
        }
    }
}

/// Read and validate all sites from a GeoJSON file.
pub fn load_sites(path: &Path, site_field: &str) -> Result<Vec<Site>> {
    let contents = std::fs::read_to_string(path)?;
    let sites = parse_sites(&contents, site_field)?;
    info!("Loaded {} sites from {}", sites.len(), path.display());
    Ok(sites)
}

/// Parse and validate sites from a GeoJSON string.
pub fn parse_sites(geojson_str: &str, site_field: &str) -> Result<Vec<Site>> {
    let geojson: GeoJson = geojson_str.parse()?;
    let collection = match geojson {
        GeoJson::FeatureCollection(fc) => fc,
        GeoJson::Feature(feature) => FeatureCollection {
            bbox: None,
            features: vec![feature],
            foreign_members: None,
        },
        GeoJson::Geometry(_) => {
            return Err(Error::InvalidFormat(String::from(
                "expected a Feature or FeatureCollection, found a bare geometry",
            )))
        }
    };
    let crs = declared_crs(collection.foreign_members.as_ref())?;
    debug!("Geometry CRS: {crs:?}");

    collection
        .features
        .into_iter()
        .enumerate()
        .map(|(index, feature)| {
            let id = feature
                .property(site_field)
                .and_then(property_to_id)
                .ok_or_else(|| Error::MissingSiteField {
                    index,
                    field: site_field.to_string(),
                })?;
            let geometry = feature.geometry.ok_or_else(|| Error::InvalidGeometry {
                site: id.clone(),
                reason: String::from("feature has no geometry"),
            })?;
            let geometry: geo::Geometry<f64> =
                geometry.try_into().map_err(|e: geojson::Error| Error::InvalidGeometry {
                    site: id.clone(),
                    reason: e.to_string(),
                })?;
            let polygons = match geometry {
                geo::Geometry::MultiPolygon(mp) => mp,
                geo::Geometry::Polygon(p) => MultiPolygon(vec![p]),
                _ => {
                    return Err(Error::InvalidGeometry {
                        site: id,
                        reason: String::from("expected Polygon or MultiPolygon"),
                    })
                }
            };
            let geometry = polygons.map_coords(|c| crs.to_lon_lat(c));
            validate_polygon(&id, &geometry)?;
            Ok(Site { id, geometry })
        })
        .collect::<Result<Vec<_>>>()
        .and_then(check_unique)
}

/// Every site writes `{stem}_{year}.*` files and one summary row per
/// threshold, so ids and their file stems must both be distinct.
fn check_unique(sites: Vec<Site>) -> Result<Vec<Site>> {
    let mut stems: HashMap<String, &str> = HashMap::new();
    for site in &sites {
        if let Some(other) = stems.insert(file_stem(&site.id), &site.id) {
            let reason = if other == site.id {
                format!("duplicate site {:?}", site.id)
            } else {
                format!(
                    "sites {:?} and {:?} map to the same output file name",
                    other, site.id
                )
            };
            return Err(Error::InvalidFormat(reason));
        }
    }
    Ok(sites)
}

fn declared_crs(foreign_members: Option<&JsonObject>) -> Result<Crs> {
    let name = foreign_members
        .and_then(|members| members.get("crs"))
        .and_then(|crs| crs.get("properties"))
        .and_then(|props| props.get("name"))
        .and_then(JsonValue::as_str);
    match name {
        Some(name) => Crs::from_name(name),
        None => Ok(Crs::Wgs84),
    }
}

fn property_to_id(value: &JsonValue) -> Option<String> {
    let id = match value {
        JsonValue::String(s) => s.trim().to_string(),
        JsonValue::Number(n) => n.to_string(),
        _ => return None,
    };
    (!id.is_empty()).then_some(id)
}

fn validate_polygon(site: &str, geometry: &MultiPolygon<f64>) -> Result<()> {
    let invalid = |reason: String| Error::InvalidGeometry {
        site: site.to_string(),
        reason,
    };
    if geometry.0.is_empty() {
        return Err(invalid(String::from("empty geometry")));
    }
    for polygon in &geometry.0 {
        let ring = &polygon.exterior().0;
        let closed = ring.len() > 1 && ring.first() == ring.last();
        let distinct = if closed { ring.len() - 1 } else { ring.len() };
        if distinct < 3 {
            return Err(invalid(format!(
                "exterior ring has {distinct} vertices, need at least 3"
            )));
        }
    }
    if let Some(c) = geometry
        .coords_iter()
        .find(|c| !(-180.0..=180.0).contains(&c.x) || !(-90.0..=90.0).contains(&c.y))
    {
        return Err(invalid(format!(
            "coordinate ({}, {}) is not a lon/lat position",
            c.x, c.y
        )));
    }
    if !geometry.is_valid() {
        return Err(invalid(String::from("polygon is self-intersecting or malformed")));
    }
    Ok(())
}
