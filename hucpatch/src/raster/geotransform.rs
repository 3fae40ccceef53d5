//! Affine georeferencing for north-up rasters.

use serde::{Deserialize, Serialize};

use crate::coord::Bounds;

/// Maps pixel coordinates (col, row) to CRS coordinates (x, y):
///
/// ```text
/// x = origin_x + col * pixel_width
/// y = origin_y + row * pixel_height
/// ```
///
/// `pixel_height` is negative for north-up images. Rotated rasters are
/// rejected when opened.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    /// X coordinate of the upper-left corner
    pub origin_x: f64,
    /// Y coordinate of the upper-left corner
    pub origin_y: f64,
    pub pixel_width: f64,
    /// Usually negative
    pub pixel_height: f64,
}

impl GeoTransform {
    pub fn new(origin_x: f64, origin_y: f64, pixel_width: f64, pixel_height: f64) -> Self {
        Self {
            origin_x,
            origin_y,
            pixel_width,
            pixel_height,
        }
    }

    /// Upper-left corner of pixel `(col, row)`. Accepts fractional and
    /// negative indices.
    pub fn pixel_to_geo_corner(&self, col: f64, row: f64) -> (f64, f64) {
        (
            self.origin_x + col * self.pixel_width,
            self.origin_y + row * self.pixel_height,
        )
    }

    /// Center of pixel `(col, row)`.
    pub fn pixel_to_geo(&self, col: usize, row: usize) -> (f64, f64) {
        self.pixel_to_geo_corner(col as f64 + 0.5, row as f64 + 0.5)
    }

    /// Fractional pixel coordinates of `(x, y)`.
    pub fn geo_to_pixel(&self, x: f64, y: f64) -> (f64, f64) {
        (
            (x - self.origin_x) / self.pixel_width,
            (y - self.origin_y) / self.pixel_height,
        )
    }

    /// `(x, y)` pixel size in CRS units, both positive.
    pub fn resolution(&self) -> (f64, f64) {
        (self.pixel_width.abs(), self.pixel_height.abs())
    }

    pub fn is_north_up(&self) -> bool {
        self.pixel_width > 0.0 && self.pixel_height < 0.0
    }

    /// Transform of the sub-grid whose upper-left pixel is `(col, row)`.
    pub fn offset(&self, col: i64, row: i64) -> GeoTransform {
        let (x, y) = self.pixel_to_geo_corner(col as f64, row as f64);
        GeoTransform::new(x, y, self.pixel_width, self.pixel_height)
    }

    /// Extent of a `width` x `height` grid.
    pub fn bounds(&self, width: usize, height: usize) -> Bounds {
        let (x0, y0) = self.pixel_to_geo_corner(0.0, 0.0);
        let (x1, y1) = self.pixel_to_geo_corner(width as f64, height as f64);
        Bounds::new(x0, y0, x1, y1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pixel_geo_round_trip() {
        let gt = GeoTransform::new(1000.0, 5000.0, 10.0, -10.0);
        assert_eq!(gt.pixel_to_geo(0, 0), (1005.0, 4995.0));
        let (col, row) = gt.geo_to_pixel(1005.0, 4995.0);
        assert!((col - 0.5).abs() < 1e-12);
        assert!((row - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_bounds_and_offset() {
        let gt = GeoTransform::new(0.0, 100.0, 10.0, -10.0);
        assert_eq!(gt.bounds(5, 10), Bounds::new(0.0, 0.0, 50.0, 100.0));
        let sub = gt.offset(2, 3);
        assert_eq!(sub.origin_x, 20.0);
        assert_eq!(sub.origin_y, 70.0);
        let outside = gt.offset(-1, -1);
        assert_eq!((outside.origin_x, outside.origin_y), (-10.0, 110.0));
    }

    #[test]
    fn test_north_up() {
        assert!(GeoTransform::new(0.0, 0.0, 1.0, -1.0).is_north_up());
        assert!(!GeoTransform::new(0.0, 0.0, 1.0, 1.0).is_north_up());
    }
}
