//! Boundary GeoJSON parsing.
//!
//! Accepts a `Feature` or a `FeatureCollection` whose geometries are
//! `Polygon` or `MultiPolygon`. All polygons of a collection are merged into
//! one `MultiPolygon`; properties come from the first feature carrying
//! `huc8`. The legacy top-level `crs` member is honoured, otherwise
//! coordinates are EPSG:4326.

use geo::{Coord, LineString, MultiPolygon, Polygon};
use serde::Deserialize;
use serde_json::{Map, Value};

use super::{WatershedError, WatershedId};
use crate::coord::Crs;

/// Parsed contents of a boundary file.
#[derive(Debug, Clone)]
pub struct BoundaryDocument {
    pub id: WatershedId,
    pub name: String,
    pub states: Vec<String>,
    pub crs: Crs,
    pub geometry: MultiPolygon<f64>,
}

#[derive(Deserialize)]
#[serde(tag = "type")]
enum Document {
    FeatureCollection {
        features: Vec<Feature>,
        #[serde(default)]
        crs: Option<LegacyCrs>,
    },
    Feature(Feature),
}

#[derive(Deserialize)]
struct Feature {
    #[serde(default)]
    properties: Option<Map<String, Value>>,
    geometry: Option<Geometry>,
    #[serde(default)]
    crs: Option<LegacyCrs>,
}

#[derive(Deserialize)]
#[serde(tag = "type", content = "coordinates")]
enum Geometry {
    Polygon(Vec<Vec<Vec<f64>>>),
    MultiPolygon(Vec<Vec<Vec<Vec<f64>>>>),
}

#[derive(Deserialize)]
struct LegacyCrs {
    properties: LegacyCrsProperties,
}

#[derive(Deserialize)]
struct LegacyCrsProperties {
    name: String,
}

/// Parse a boundary GeoJSON document.
pub fn parse_boundary(text: &str) -> Result<BoundaryDocument, WatershedError> {
    let document: Document =
        serde_json::from_str(text).map_err(|e| WatershedError::InvalidGeoJson(e.to_string()))?;

    let (features, legacy_crs) = match document {
        Document::FeatureCollection { features, crs } => (features, crs),
        Document::Feature(mut feature) => {
            let crs = feature.crs.take();
            (vec![feature], crs)
        }
    };

    let crs = match legacy_crs {
        Some(legacy) => legacy.properties.name.parse::<Crs>()?,
        None => Crs::WGS84,
    };

    let mut polygons = Vec::new();
    let mut properties = None;
    for feature in features {
        if properties.is_none() {
            if let Some(props) = feature.properties.filter(|p| p.contains_key("huc8")) {
                properties = Some(props);
            }
        }
        match feature.geometry {
            Some(Geometry::Polygon(rings)) => polygons.push(to_polygon(rings)?),
            Some(Geometry::MultiPolygon(parts)) => {
                for rings in parts {
                    polygons.push(to_polygon(rings)?);
                }
            }
            None => {}
        }
    }

    let properties = properties.ok_or(WatershedError::MissingProperty("huc8"))?;
    let id = WatershedId::parse(&property_text(&properties, "huc8")?)?;
    let name = property_text(&properties, "name")?;
    let states = parse_states(
        properties
            .get("states")
            .ok_or(WatershedError::MissingProperty("states"))?,
    );

    if polygons.is_empty() {
        return Err(WatershedError::EmptyBoundary);
    }

    Ok(BoundaryDocument {
        id,
        name,
        states,
        crs,
        geometry: MultiPolygon::new(polygons),
    })
}

fn property_text(props: &Map<String, Value>, key: &'static str) -> Result<String, WatershedError> {
    match props.get(key) {
        Some(Value::String(s)) => Ok(s.trim().to_string()),
        // Numeric HUC codes lose their leading zeros.
        Some(Value::Number(n)) if key == "huc8" => Ok(format!("{:0>8}", n.to_string())),
        Some(Value::Number(n)) => Ok(n.to_string()),
        _ => Err(WatershedError::MissingProperty(key)),
    }
}

/// `states` is either a comma-separated string (`"NC,TN"`) or an array.
fn parse_states(value: &Value) -> Vec<String> {
    match value {
        Value::String(s) => s
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
        Value::Array(items) => items
            .iter()
            .filter_map(Value::as_str)
            .map(|s| s.trim().to_string())
            .collect(),
        _ => Vec::new(),
    }
}

fn to_polygon(rings: Vec<Vec<Vec<f64>>>) -> Result<Polygon<f64>, WatershedError> {
    let mut rings = rings.into_iter().map(to_ring);
    let exterior = rings.next().ok_or(WatershedError::EmptyBoundary)??;
    let interiors = rings.collect::<Result<Vec<_>, _>>()?;
    Ok(Polygon::new(exterior, interiors))
}

fn to_ring(positions: Vec<Vec<f64>>) -> Result<LineString<f64>, WatershedError> {
    let coords = positions
        .into_iter()
        .map(|p| match p.as_slice() {
            [x, y, ..] if x.is_finite() && y.is_finite() => Ok(Coord { x: *x, y: *y }),
            _ => Err(WatershedError::InvalidGeoJson(
                "position must hold two finite numbers".to_string(),
            )),
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(LineString::new(coords))
}
