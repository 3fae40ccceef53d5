//! Coordinate handling module
//!
//! Provides axis-aligned bounds, coordinate reference system identifiers and
//! pure-Rust reprojection between the CRSs the export service produces
//! (geographic NAD83/WGS84, CONUS Albers, UTM, Web Mercator).

mod crs;
mod projection;

pub use crs::Crs;
pub use projection::{transform_bounds, transform_point, DEFAULT_DENSIFY_SEGMENTS};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised by coordinate parsing and reprojection.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CoordError {
    /// The EPSG code is not one of the supported reference systems.
    #[error("unsupported CRS: EPSG:{0}")]
    UnsupportedEpsg(u32),

    /// The CRS string could not be parsed.
    #[error("invalid CRS identifier '{0}'")]
    InvalidIdentifier(String),

    /// The coordinate lies outside the projection's domain.
    #[error("coordinate ({x}, {y}) is outside the valid domain of {crs}")]
    OutOfDomain { crs: String, x: f64, y: f64 },
}

/// Axis-aligned rectangle in a single coordinate space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl Bounds {
    /// Create bounds, normalising the corner order.
    pub fn new(x0: f64, y0: f64, x1: f64, y1: f64) -> Self {
        Self {
            min_x: x0.min(x1),
            min_y: y0.min(y1),
            max_x: x0.max(x1),
            max_y: y0.max(y1),
        }
    }

    /// Square bounds of side `size` centered on `(x, y)`.
    pub fn centered(x: f64, y: f64, size: f64) -> Self {
        let half = size / 2.0;
        Self::new(x - half, y - half, x + half, y + half)
    }

    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    pub fn area(&self) -> f64 {
        self.width().max(0.0) * self.height().max(0.0)
    }

    /// Center point `(x, y)`.
    pub fn center(&self) -> (f64, f64) {
        (
            (self.min_x + self.max_x) / 2.0,
            (self.min_y + self.max_y) / 2.0,
        )
    }

    /// Whether the point lies inside or on the edge of the bounds.
    pub fn contains(&self, x: f64, y: f64) -> bool {
        x >= self.min_x && x <= self.max_x && y >= self.min_y && y <= self.max_y
    }

    /// Intersection of two bounds, or `None` if they do not overlap with
    /// positive area.
    pub fn intersection(&self, other: &Bounds) -> Option<Bounds> {
        let min_x = self.min_x.max(other.min_x);
        let min_y = self.min_y.max(other.min_y);
        let max_x = self.max_x.min(other.max_x);
        let max_y = self.max_y.min(other.max_y);
        if min_x < max_x && min_y < max_y {
            Some(Bounds {
                min_x,
                min_y,
                max_x,
                max_y,
            })
        } else {
            None
        }
    }

    /// Grow the bounds by `distance` on every side.
    pub fn expand(&self, distance: f64) -> Bounds {
        Bounds {
            min_x: self.min_x - distance,
            min_y: self.min_y - distance,
            max_x: self.max_x + distance,
            max_y: self.max_y + distance,
        }
    }

    /// Whether every edge matches `other` within `tolerance`.
    pub fn approx_eq(&self, other: &Bounds, tolerance: f64) -> bool {
        (self.min_x - other.min_x).abs() <= tolerance
            && (self.min_y - other.min_y).abs() <= tolerance
            && (self.max_x - other.max_x).abs() <= tolerance
            && (self.max_y - other.max_y).abs() <= tolerance
    }

    /// `[min_x, min_y, max_x, max_y]`, the order used in manifests.
    pub fn to_array(&self) -> [f64; 4] {
        [self.min_x, self.min_y, self.max_x, self.max_y]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_normalises_corners() {
        let b = Bounds::new(10.0, 20.0, 0.0, 5.0);
        assert_eq!(b.min_x, 0.0);
        assert_eq!(b.min_y, 5.0);
        assert_eq!(b.max_x, 10.0);
        assert_eq!(b.max_y, 20.0);
    }

    #[test]
    fn test_centered() {
        let b = Bounds::centered(1280.0, 1280.0, 2560.0);
        assert_eq!(b, Bounds::new(0.0, 0.0, 2560.0, 2560.0));
        assert_eq!(b.center(), (1280.0, 1280.0));
    }

    #[test]
    fn test_intersection() {
        let a = Bounds::new(0.0, 0.0, 2560.0, 2560.0);
        let b = Bounds::new(1000.0, 1000.0, 4000.0, 4000.0);
        let i = a.intersection(&b).unwrap();
        assert_eq!(i, Bounds::new(1000.0, 1000.0, 2560.0, 2560.0));
    }

    #[test]
    fn test_touching_bounds_do_not_intersect() {
        let a = Bounds::new(0.0, 0.0, 10.0, 10.0);
        let b = Bounds::new(10.0, 0.0, 20.0, 10.0);
        assert!(a.intersection(&b).is_none());
    }

    #[test]
    fn test_expand_and_area() {
        let b = Bounds::new(0.0, 0.0, 10.0, 10.0).expand(5.0);
        assert_eq!(b, Bounds::new(-5.0, -5.0, 15.0, 15.0));
        assert_eq!(b.area(), 400.0);
    }

    #[test]
    fn test_contains_includes_edges() {
        let b = Bounds::new(0.0, 0.0, 10.0, 10.0);
        assert!(b.contains(0.0, 10.0));
        assert!(!b.contains(-0.1, 5.0));
    }
}
