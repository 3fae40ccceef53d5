//! Watershed value types.
//!
//! A [`Watershed`] is a validated HUC8 boundary in a known CRS, optionally
//! buffered. It is immutable once built; reprojection and buffering return
//! new values.

mod geojson;

pub use geojson::{parse_boundary, BoundaryDocument};

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use geo::{
    BoundingRect, Centroid, Contains, Coord, EuclideanDistance, MapCoords, MultiPolygon, Point,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::coord::{transform_point, Bounds, CoordError, Crs};

/// Errors that can occur while building or loading a watershed.
#[derive(Debug, Error)]
pub enum WatershedError {
    /// The HUC8 code is not exactly eight ASCII digits.
    #[error("invalid HUC8 id '{0}': expected exactly 8 digits")]
    InvalidId(String),

    /// The boundary file could not be read.
    #[error("failed to read {path}: {source}")]
    Read { path: PathBuf, source: io::Error },

    /// The boundary file is not GeoJSON this loader understands.
    #[error("invalid GeoJSON: {0}")]
    InvalidGeoJson(String),

    /// A required feature property is absent.
    #[error("missing required property '{0}'")]
    MissingProperty(&'static str),

    /// The boundary has no polygons or non-finite coordinates.
    #[error("boundary geometry is empty or degenerate")]
    EmptyBoundary,

    /// Buffer distances must be finite and non-negative.
    #[error("invalid buffer distance {0}")]
    InvalidBuffer(f64),

    /// Reprojection of a vertex failed.
    #[error(transparent)]
    Coord(#[from] CoordError),
}

/// Validated 8-digit HUC8 hydrologic unit code.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct WatershedId(String);

impl WatershedId {
    /// Parse a HUC8 code. Surrounding whitespace is not accepted.
    pub fn parse(s: &str) -> Result<Self, WatershedError> {
        if s.len() == 8 && s.bytes().all(|b| b.is_ascii_digit()) {
            Ok(WatershedId(s.to_string()))
        } else {
            Err(WatershedError::InvalidId(s.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WatershedId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for WatershedId {
    type Err = WatershedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        WatershedId::parse(s)
    }
}

impl TryFrom<String> for WatershedId {
    type Error = WatershedError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        WatershedId::parse(&value)
    }
}

impl From<WatershedId> for String {
    fn from(id: WatershedId) -> Self {
        id.0
    }
}

/// A HUC8 watershed boundary in a single CRS.
#[derive(Debug, Clone)]
pub struct Watershed {
    id: WatershedId,
    name: String,
    states: Vec<String>,
    crs: Crs,
    boundary: MultiPolygon<f64>,
    buffer: f64,
    bounding_rect: Bounds,
}

impl Watershed {
    /// Build an unbuffered watershed, validating the geometry.
    pub fn new(
        id: WatershedId,
        name: impl Into<String>,
        states: Vec<String>,
        crs: Crs,
        boundary: MultiPolygon<f64>,
    ) -> Result<Self, WatershedError> {
        let bounding_rect = geometry_bounds(&boundary)?;
        Ok(Self {
            id,
            name: name.into(),
            states,
            crs,
            boundary,
            buffer: 0.0,
            bounding_rect,
        })
    }

    /// Load a watershed from a boundary GeoJSON file.
    pub fn load(path: &Path) -> Result<Self, WatershedError> {
        let text = std::fs::read_to_string(path).map_err(|source| WatershedError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let doc = parse_boundary(&text)?;
        Watershed::new(doc.id, doc.name, doc.states, doc.crs, doc.geometry)
    }

    /// Return a copy whose membership test and bounding rectangle include
    /// `distance` CRS units around the boundary.
    pub fn with_buffer(&self, distance: f64) -> Result<Self, WatershedError> {
        if !distance.is_finite() || distance < 0.0 {
            return Err(WatershedError::InvalidBuffer(distance));
        }
        let base = geometry_bounds(&self.boundary)?;
        Ok(Self {
            buffer: distance,
            bounding_rect: base.expand(distance),
            ..self.clone()
        })
    }

    /// Reproject every boundary vertex into `target`.
    ///
    /// The buffer distance is kept as a number and is read in the target
    /// CRS's units afterwards.
    pub fn to_crs(&self, target: Crs) -> Result<Self, WatershedError> {
        if target == self.crs {
            return Ok(self.clone());
        }
        let from = self.crs;
        let boundary = self.boundary.try_map_coords(move |c: Coord<f64>| {
            let (x, y) = transform_point(from, target, c.x, c.y)?;
            Ok::<_, CoordError>(Coord { x, y })
        })?;
        let base = geometry_bounds(&boundary)?;
        Ok(Self {
            crs: target,
            boundary,
            bounding_rect: base.expand(self.buffer),
            ..self.clone()
        })
    }

    /// Whether `(x, y)` lies inside the boundary or within the buffer
    /// distance of it. Points on the boundary edge count as inside.
    pub fn contains(&self, x: f64, y: f64) -> bool {
        let point = Point::new(x, y);
        if !self.bounding_rect.contains(x, y) {
            return false;
        }
        if self.boundary.contains(&point) {
            return true;
        }
        point.euclidean_distance(&self.boundary) <= self.buffer
    }

    /// Area-weighted centroid of the boundary.
    pub fn centroid(&self) -> (f64, f64) {
        match self.boundary.centroid() {
            Some(p) if p.x().is_finite() && p.y().is_finite() => (p.x(), p.y()),
            _ => self.bounding_rect.center(),
        }
    }

    pub fn id(&self) -> &WatershedId {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn states(&self) -> &[String] {
        &self.states
    }

    pub fn crs(&self) -> Crs {
        self.crs
    }

    pub fn boundary(&self) -> &MultiPolygon<f64> {
        &self.boundary
    }

    pub fn buffer(&self) -> f64 {
        self.buffer
    }

    /// Bounding rectangle including the buffer.
    pub fn bounding_rect(&self) -> Bounds {
        self.bounding_rect
    }
}

fn geometry_bounds(boundary: &MultiPolygon<f64>) -> Result<Bounds, WatershedError> {
    if boundary.0.is_empty() {
        return Err(WatershedError::EmptyBoundary);
    }
    let rect = boundary
        .bounding_rect()
        .ok_or(WatershedError::EmptyBoundary)?;
    let bounds = Bounds::new(rect.min().x, rect.min().y, rect.max().x, rect.max().y);
    let finite = [bounds.min_x, bounds.min_y, bounds.max_x, bounds.max_y]
        .iter()
        .all(|v| v.is_finite());
    if !finite || bounds.area() <= 0.0 {
        return Err(WatershedError::EmptyBoundary);
    }
    Ok(bounds)
}
