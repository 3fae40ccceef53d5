//! Coordinate reference system identifiers.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::CoordError;

/// A supported coordinate reference system, identified by EPSG code.
///
/// Only the systems the export service emits are accepted:
/// - EPSG:4326 (WGS84) and EPSG:4269 (NAD83) geographic
/// - EPSG:5070 (NAD83 / CONUS Albers)
/// - EPSG:326xx / 327xx (WGS84 / UTM north and south)
/// - EPSG:269xx (NAD83 / UTM north, zones 1-23)
/// - EPSG:3857 (Web Mercator)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Crs(u32);

/// Projection family backing a [`Crs`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum ProjectionKind {
    Geographic,
    ConusAlbers,
    Utm { zone: u32, north: bool, grs80: bool },
    WebMercator,
}

impl Crs {
    /// WGS84 geographic, the default for GeoJSON without a `crs` member.
    pub const WGS84: Crs = Crs(4326);

    /// NAD83 / CONUS Albers equal-area.
    pub const CONUS_ALBERS: Crs = Crs(5070);

    /// Validate an EPSG code.
    pub fn from_epsg(code: u32) -> Result<Self, CoordError> {
        match Self::classify(code) {
            Some(_) => Ok(Crs(code)),
            None => Err(CoordError::UnsupportedEpsg(code)),
        }
    }

    pub fn epsg(&self) -> u32 {
        self.0
    }

    /// Whether coordinates are longitude/latitude degrees.
    pub fn is_geographic(&self) -> bool {
        matches!(self.kind(), ProjectionKind::Geographic)
    }

    pub(crate) fn kind(&self) -> ProjectionKind {
        // Construction guarantees the code classifies.
        Self::classify(self.0).unwrap_or(ProjectionKind::Geographic)
    }

    fn classify(code: u32) -> Option<ProjectionKind> {
        match code {
            4326 | 4269 => Some(ProjectionKind::Geographic),
            5070 => Some(ProjectionKind::ConusAlbers),
            3857 => Some(ProjectionKind::WebMercator),
            32601..=32660 => Some(ProjectionKind::Utm {
                zone: code - 32600,
                north: true,
                grs80: false,
            }),
            32701..=32760 => Some(ProjectionKind::Utm {
                zone: code - 32700,
                north: false,
                grs80: false,
            }),
            26901..=26923 => Some(ProjectionKind::Utm {
                zone: code - 26900,
                north: true,
                grs80: true,
            }),
            _ => None,
        }
    }
}

impl fmt::Display for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EPSG:{}", self.0)
    }
}

impl FromStr for Crs {
    type Err = CoordError;

    /// Accepts `EPSG:5070`, `epsg:5070`, `5070` and the OGC URN form
    /// `urn:ogc:def:crs:EPSG::5070`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let upper = trimmed.to_ascii_uppercase();
        if upper == "URN:OGC:DEF:CRS:OGC:1.3:CRS84" {
            return Ok(Crs::WGS84);
        }
        let code = upper
            .rsplit(':')
            .next()
            .filter(|c| !c.is_empty())
            .ok_or_else(|| CoordError::InvalidIdentifier(trimmed.to_string()))?;
        if !(upper.starts_with("EPSG:") || upper.contains(":EPSG:") || upper == code) {
            return Err(CoordError::InvalidIdentifier(trimmed.to_string()));
        }
        let code: u32 = code
            .parse()
            .map_err(|_| CoordError::InvalidIdentifier(trimmed.to_string()))?;
        Crs::from_epsg(code)
    }
}

impl TryFrom<String> for Crs {
    type Error = CoordError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Crs> for String {
    fn from(crs: Crs) -> Self {
        crs.to_string()
    }
}
