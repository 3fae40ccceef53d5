//! Patch center generation.
//!
//! Centers are laid out on a regular grid over the watershed's bounding
//! rectangle (buffer included) and filtered by the boundary. Generation is
//! lazy: [`PatchGridGenerator::centers`] returns an iterator that computes
//! each center on demand and can be cloned to restart.
//!
//! # Layout
//!
//! ```text
//!   max_y ┌───────────────────────┐
//!         │  ·     ·     ·     ·  │   first center: min + size/2
//!         │  ·     ·     ·     ·  │   next:         + k * stride
//!         │  ·     ·     ·     ·  │   scan:         rows by ascending y,
//!   min_y └───────────────────────┘                 then ascending x
//!       min_x                   max_x
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::coord::Bounds;
use crate::watershed::{Watershed, WatershedId};

/// Errors from building a grid specification.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum GridError {
    #[error("{field} must be positive and finite, got {value}")]
    InvalidSpec { field: &'static str, value: f64 },
}

/// Which grid points are kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Coverage {
    /// Keep centers inside the (buffered) boundary.
    #[default]
    Boundary,
    /// Keep every center inside the bounding rectangle.
    BoundingRect,
}

impl Coverage {
    pub fn from_config_str(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "boundary" => Some(Coverage::Boundary),
            "bounding_rect" | "bbox" => Some(Coverage::BoundingRect),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Coverage::Boundary => "boundary",
            Coverage::BoundingRect => "bounding_rect",
        }
    }
}

impl fmt::Display for Coverage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Grid geometry in ground units of the watershed CRS.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridSpec {
    patch_size: f64,
    stride: f64,
    coverage: Coverage,
}

impl GridSpec {
    pub fn new(patch_size: f64, stride: f64, coverage: Coverage) -> Result<Self, GridError> {
        if !(patch_size.is_finite() && patch_size > 0.0) {
            return Err(GridError::InvalidSpec {
                field: "patch_size",
                value: patch_size,
            });
        }
        if !(stride.is_finite() && stride > 0.0) {
            return Err(GridError::InvalidSpec {
                field: "stride",
                value: stride,
            });
        }
        Ok(Self {
            patch_size,
            stride,
            coverage,
        })
    }

    pub fn patch_size(&self) -> f64 {
        self.patch_size
    }

    pub fn stride(&self) -> f64 {
        self.stride
    }

    pub fn coverage(&self) -> Coverage {
        self.coverage
    }
}

/// A patch location in the reference CRS.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatchCenter {
    pub watershed_id: WatershedId,
    /// Position in scan order, starting at 0.
    pub sequence_index: usize,
    pub x: f64,
    pub y: f64,
}

impl PatchCenter {
    /// Stable identifier, e.g. `06010105_000042`.
    pub fn patch_id(&self) -> String {
        format!("{}_{:06}", self.watershed_id, self.sequence_index)
    }

    /// Square footprint of side `size` around this center.
    pub fn footprint(&self, size: f64) -> Bounds {
        Bounds::centered(self.x, self.y, size)
    }
}

/// Positions along one axis.
#[derive(Debug, Clone, Copy)]
struct Axis {
    first: f64,
    stride: f64,
    count: usize,
}

impl Axis {
    fn new(min: f64, max: f64, patch_size: f64, stride: f64) -> Self {
        let first = min + patch_size / 2.0;
        // An extent narrower than one patch gets no grid points; the
        // centroid fallback covers it.
        let count = if max - min >= patch_size {
            // Tolerate rounding when the last center lands exactly on max.
            ((max - first) / stride + 1e-9).floor() as usize + 1
        } else {
            0
        };
        Self {
            first,
            stride,
            count,
        }
    }

    fn at(&self, k: usize) -> f64 {
        self.first + k as f64 * self.stride
    }
}

/// Generates patch centers for one watershed.
#[derive(Debug, Clone)]
pub struct PatchGridGenerator<'a> {
    watershed: &'a Watershed,
    spec: GridSpec,
}

impl<'a> PatchGridGenerator<'a> {
    /// The watershed must already be in the reference CRS.
    pub fn new(watershed: &'a Watershed, spec: GridSpec) -> Self {
        Self { watershed, spec }
    }

    pub fn spec(&self) -> &GridSpec {
        &self.spec
    }

    /// A fresh iterator over the centers, in scan order.
    pub fn centers(&self) -> PatchCenters<'a> {
        let rect = self.watershed.bounding_rect();
        let size = self.spec.patch_size;
        PatchCenters {
            watershed: self.watershed,
            coverage: self.spec.coverage,
            patch_size: size,
            xs: Axis::new(rect.min_x, rect.max_x, size, self.spec.stride),
            ys: Axis::new(rect.min_y, rect.max_y, size, self.spec.stride),
            col: 0,
            row: 0,
            next_index: 0,
            fallback_done: false,
        }
    }
}

/// Lazy iterator over patch centers. Clone it to restart from the same
/// position.
#[derive(Debug, Clone)]
pub struct PatchCenters<'a> {
    watershed: &'a Watershed,
    coverage: Coverage,
    patch_size: f64,
    xs: Axis,
    ys: Axis,
    col: usize,
    row: usize,
    next_index: usize,
    fallback_done: bool,
}

impl PatchCenters<'_> {
    fn keep(&self, x: f64, y: f64) -> bool {
        match self.coverage {
            Coverage::Boundary => self.watershed.contains(x, y),
            Coverage::BoundingRect => self.watershed.bounding_rect().contains(x, y),
        }
    }

    fn emit(&mut self, x: f64, y: f64) -> PatchCenter {
        let center = PatchCenter {
            watershed_id: self.watershed.id().clone(),
            sequence_index: self.next_index,
            x,
            y,
        };
        self.next_index += 1;
        center
    }

    /// Single center for watersheds too small to hold a grid point.
    fn fallback(&self) -> (f64, f64) {
        let rect = self.watershed.bounding_rect();
        let (cx, cy) = self.watershed.centroid();
        let half = self.patch_size / 2.0;
        let clamp = |c: f64, min: f64, max: f64| {
            if max - min >= self.patch_size {
                c.clamp(min + half, max - half)
            } else {
                (min + max) / 2.0
            }
        };
        (
            clamp(cx, rect.min_x, rect.max_x),
            clamp(cy, rect.min_y, rect.max_y),
        )
    }
}

impl Iterator for PatchCenters<'_> {
    type Item = PatchCenter;

    fn next(&mut self) -> Option<PatchCenter> {
        if self.xs.count > 0 {
            while self.row < self.ys.count {
                let (x, y) = (self.xs.at(self.col), self.ys.at(self.row));
                self.col += 1;
                if self.col == self.xs.count {
                    self.col = 0;
                    self.row += 1;
                }
                if self.keep(x, y) {
                    return Some(self.emit(x, y));
                }
            }
        }

        if self.next_index == 0 && !self.fallback_done {
            self.fallback_done = true;
            let (x, y) = self.fallback();
            return Some(self.emit(x, y));
        }
        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let scanned = self.row * self.xs.count + self.col;
        let remaining = (self.xs.count * self.ys.count).saturating_sub(scanned);
        let fallback = usize::from(self.next_index == 0 && !self.fallback_done);
        (0, Some(remaining.max(fallback)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coord::Crs;
    use crate::watershed::tests::square_watershed;
    use geo::{Coord, LineString, MultiPolygon, Polygon};

    fn spec(size: f64, stride: f64) -> GridSpec {
        GridSpec::new(size, stride, Coverage::Boundary).unwrap()
    }

    fn triangle_watershed() -> Watershed {
        let ring = LineString::from(vec![
            Coord { x: 0.0, y: 0.0 },
            Coord { x: 10_000.0, y: 0.0 },
            Coord { x: 0.0, y: 10_000.0 },
            Coord { x: 0.0, y: 0.0 },
        ]);
        Watershed::new(
            WatershedId::parse("07080101").unwrap(),
            "Triangle",
            vec![],
            Crs::CONUS_ALBERS,
            MultiPolygon::new(vec![Polygon::new(ring, vec![])]),
        )
        .unwrap()
    }

    #[test]
    fn test_spec_validation() {
        assert!(GridSpec::new(0.0, 1.0, Coverage::Boundary).is_err());
        assert!(GridSpec::new(1.0, -1.0, Coverage::Boundary).is_err());
        assert!(GridSpec::new(f64::INFINITY, 1.0, Coverage::Boundary).is_err());
        assert!(GridSpec::new(1.0, f64::NAN, Coverage::Boundary).is_err());
        assert!(GridSpec::new(2560.0, 2560.0, Coverage::Boundary).is_ok());
    }

    #[test]
    fn test_square_5000m_yields_quadrant_centers() {
        let ws = square_watershed("06010105", 5000.0);
        let centers: Vec<_> = PatchGridGenerator::new(&ws, spec(2560.0, 2560.0))
            .centers()
            .map(|c| (c.sequence_index, c.x, c.y))
            .collect();
        assert_eq!(
            centers,
            vec![
                (0, 1280.0, 1280.0),
                (1, 3840.0, 1280.0),
                (2, 1280.0, 3840.0),
                (3, 3840.0, 3840.0),
            ]
        );
    }

    #[test]
    fn test_boundary_filter_drops_outside_corner() {
        let ws = triangle_watershed();
        let gen = PatchGridGenerator::new(&ws, spec(2000.0, 2000.0));
        let centers: Vec<_> = gen.centers().collect();
        assert!(centers.iter().all(|c| ws.contains(c.x, c.y)));
        // 5x5 grid, only points with x + y <= 10000 survive.
        assert_eq!(centers.len(), 15);

        let bbox = GridSpec::new(2000.0, 2000.0, Coverage::BoundingRect).unwrap();
        assert_eq!(PatchGridGenerator::new(&ws, bbox).centers().count(), 25);
    }

    #[test]
    fn test_centers_are_restartable() {
        let ws = triangle_watershed();
        let gen = PatchGridGenerator::new(&ws, spec(1000.0, 1500.0));
        let mut iter = gen.centers();
        iter.next();
        let resumed = iter.clone();
        let first: Vec<_> = iter.collect();
        let second: Vec<_> = resumed.collect();
        assert_eq!(first, second);
        assert_eq!(gen.centers().collect::<Vec<_>>(), gen.centers().collect::<Vec<_>>());
    }

    #[test]
    fn test_small_watershed_yields_centroid() {
        let ws = square_watershed("06010105", 1000.0);
        let centers: Vec<_> = PatchGridGenerator::new(&ws, spec(2560.0, 2560.0))
            .centers()
            .collect();
        assert_eq!(centers.len(), 1);
        assert_eq!(centers[0].sequence_index, 0);
        assert!((centers[0].x - 500.0).abs() < 1e-9);
        assert!((centers[0].y - 500.0).abs() < 1e-9);
    }

    #[test]
    fn test_watershed_under_one_patch_yields_centroid() {
        // Wider than half a patch, so min + size/2 would still fit inside.
        let ws = square_watershed("06010105", 2000.0);
        let centers: Vec<_> = PatchGridGenerator::new(&ws, spec(2560.0, 2560.0))
            .centers()
            .map(|c| (c.sequence_index, c.x, c.y))
            .collect();
        assert_eq!(centers, vec![(0, 1000.0, 1000.0)]);
    }

    #[test]
    fn test_narrow_axis_centers_on_rect_midpoint() {
        // 2000 m wide, 10 km tall: too narrow for any grid column.
        let ring = LineString::from(vec![
            Coord { x: 0.0, y: 0.0 },
            Coord { x: 2_000.0, y: 0.0 },
            Coord { x: 2_000.0, y: 10_000.0 },
            Coord { x: 0.0, y: 10_000.0 },
            Coord { x: 0.0, y: 0.0 },
        ]);
        let ws = Watershed::new(
            WatershedId::parse("07080101").unwrap(),
            "Strip",
            vec![],
            Crs::CONUS_ALBERS,
            MultiPolygon::new(vec![Polygon::new(ring, vec![])]),
        )
        .unwrap();

        let centers: Vec<_> = PatchGridGenerator::new(&ws, spec(2560.0, 2560.0))
            .centers()
            .collect();
        assert_eq!(centers.len(), 1);
        assert!((centers[0].x - 1000.0).abs() < 1e-6);
        assert!((centers[0].y - 5000.0).abs() < 1e-6);
    }

    #[test]
    fn test_sparse_grid_falls_back_to_clamped_centroid() {
        // A thin L-shaped watershed whose bounding box holds grid points,
        // none of which fall inside the boundary.
        let ring = LineString::from(vec![
            Coord { x: 0.0, y: 0.0 },
            Coord { x: 10_000.0, y: 0.0 },
            Coord { x: 10_000.0, y: 100.0 },
            Coord { x: 100.0, y: 100.0 },
            Coord { x: 100.0, y: 10_000.0 },
            Coord { x: 0.0, y: 10_000.0 },
            Coord { x: 0.0, y: 0.0 },
        ]);
        let ws = Watershed::new(
            WatershedId::parse("07080101").unwrap(),
            "L",
            vec![],
            Crs::CONUS_ALBERS,
            MultiPolygon::new(vec![Polygon::new(ring, vec![])]),
        )
        .unwrap();

        let centers: Vec<_> = PatchGridGenerator::new(&ws, spec(2000.0, 2000.0))
            .centers()
            .collect();
        assert_eq!(centers.len(), 1);
        // Centroid is near (2500, 2500); clamped into [1000, 9000].
        assert!(centers[0].x >= 1000.0 && centers[0].x <= 9000.0);
        assert!(centers[0].y >= 1000.0 && centers[0].y <= 9000.0);
    }

    #[test]
    fn test_patch_id_and_footprint() {
        let center = PatchCenter {
            watershed_id: WatershedId::parse("06010105").unwrap(),
            sequence_index: 42,
            x: 1280.0,
            y: 1280.0,
        };
        assert_eq!(center.patch_id(), "06010105_000042");
        assert_eq!(center.footprint(2560.0), Bounds::new(0.0, 0.0, 2560.0, 2560.0));
    }

    #[test]
    fn test_coverage_config_strings() {
        assert_eq!(Coverage::from_config_str("Boundary"), Some(Coverage::Boundary));
        assert_eq!(
            Coverage::from_config_str("bounding_rect"),
            Some(Coverage::BoundingRect)
        );
        assert_eq!(Coverage::from_config_str("circle"), None);
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn test_centers_inside_boundary(
                size in 500.0..20_000.0_f64,
                patch in 100.0..5_000.0_f64,
                stride_factor in 0.5..2.0_f64,
                buffer in 0.0..1_000.0_f64,
            ) {
                let ws = square_watershed("06010105", size).with_buffer(buffer).unwrap();
                let gen = PatchGridGenerator::new(&ws, spec(patch, patch * stride_factor));
                let centers: Vec<_> = gen.centers().collect();

                prop_assert!(!centers.is_empty());
                for (i, c) in centers.iter().enumerate() {
                    prop_assert_eq!(c.sequence_index, i);
                    prop_assert!(ws.bounding_rect().contains(c.x, c.y));
                }
                // Grid centers (not the fallback) satisfy the boundary test.
                if centers.len() > 1 {
                    prop_assert!(centers.iter().all(|c| ws.contains(c.x, c.y)));
                }
            }

            #[test]
            fn test_centers_deterministic(
                patch in 100.0..3_000.0_f64,
                stride in 100.0..3_000.0_f64,
            ) {
                let ws = triangle_watershed();
                let gen = PatchGridGenerator::new(&ws, spec(patch, stride));
                let a: Vec<_> = gen.centers().collect();
                let b: Vec<_> = gen.centers().collect();
                prop_assert_eq!(a, b);
            }

            #[test]
            fn test_scan_order_is_row_major(
                patch in 200.0..2_000.0_f64,
            ) {
                let ws = square_watershed("06010105", 8_000.0);
                let centers: Vec<_> = PatchGridGenerator::new(&ws, spec(patch, patch))
                    .centers()
                    .collect();
                for pair in centers.windows(2) {
                    let (a, b) = (&pair[0], &pair[1]);
                    prop_assert!(a.y < b.y || (a.y == b.y && a.x < b.x));
                }
            }
        }
    }
}
