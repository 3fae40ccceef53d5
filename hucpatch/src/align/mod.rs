//! Multi-source patch alignment.
//!
//! Every source in a catalog is cut to the same ground footprint around a
//! patch center. The DEM fixes the footprint: `patch_size_px` DEM pixels on a
//! side. Each other source keeps its own CRS and resolution, so its pixel
//! count is derived from the footprint rather than configured.
//!
//! Only window bounds are reprojected, never pixel data. A source whose
//! window overlaps its raster by less than `min_overlap` is dropped for that
//! patch; a dropped DEM makes the whole patch unusable.

use std::collections::BTreeMap;
use std::fmt;

use thiserror::Error;
use tracing::{debug, trace};

use crate::coord::{transform_bounds, Bounds, Crs, DEFAULT_DENSIFY_SEGMENTS};
use crate::grid::PatchCenter;
use crate::raster::{GeoTransform, PixelData, RasterCatalog, RasterKind, RasterSource};

/// Errors that make a patch unusable.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum AlignError {
    #[error("invalid alignment settings: {0}")]
    InvalidSpec(String),

    /// The DEM window falls (mostly) outside the DEM.
    #[error("reference DEM overlap {overlap:.3} is below the minimum")]
    ReferenceOutOfBounds { overlap: f64 },

    /// The DEM pixels could not be read.
    #[error("reference DEM is unreadable: {0}")]
    ReferenceUnreadable(String),
}

/// Alignment parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AlignSpec {
    /// Patch edge in DEM pixels.
    pub patch_size_px: u32,
    /// Minimum fraction of a window that must lie inside its raster.
    pub min_overlap: f64,
}

impl AlignSpec {
    pub fn new(patch_size_px: u32, min_overlap: f64) -> Result<Self, AlignError> {
        if patch_size_px == 0 {
            return Err(AlignError::InvalidSpec(
                "patch_size_px must be positive".to_string(),
            ));
        }
        if !(min_overlap > 0.0 && min_overlap <= 1.0) {
            return Err(AlignError::InvalidSpec(format!(
                "min_overlap must be in (0, 1], got {}",
                min_overlap
            )));
        }
        Ok(Self {
            patch_size_px,
            min_overlap,
        })
    }
}

/// Why a source contributed nothing to a patch.
#[derive(Debug, Clone, PartialEq)]
pub enum DropReason {
    /// Too little of the window lies inside the raster.
    OutOfBounds { overlap: f64 },
    /// The raster could not be opened or decoded.
    Unreadable { reason: String },
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DropReason::OutOfBounds { overlap } => {
                write!(f, "out of bounds (overlap {:.3})", overlap)
            }
            DropReason::Unreadable { reason } => write!(f, "unreadable: {}", reason),
        }
    }
}

/// Pixels cut from one source, in that source's CRS and resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct SourcePatch {
    pub kind: RasterKind,
    pub pixels: PixelData,
    pub transform: GeoTransform,
    pub crs: Crs,
    pub nodata: f64,
    pub width: usize,
    pub height: usize,
    pub bands: usize,
    /// Fraction of the window inside the source raster.
    pub coverage: f64,
}

impl SourcePatch {
    pub fn resolution(&self) -> (f64, f64) {
        self.transform.resolution()
    }
}

/// Result for one source of one patch.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceOutcome {
    Valid(SourcePatch),
    Dropped(DropReason),
}

impl SourceOutcome {
    pub fn is_valid(&self) -> bool {
        matches!(self, SourceOutcome::Valid(_))
    }
}

/// All sources cut for one patch center.
#[derive(Debug, Clone, PartialEq)]
pub struct PatchStack {
    pub center: PatchCenter,
    /// Ground footprint in the reference CRS, identical for every source.
    pub footprint: Bounds,
    pub crs: Crs,
    pub sources: BTreeMap<RasterKind, SourceOutcome>,
}

impl PatchStack {
    pub fn get(&self, kind: RasterKind) -> Option<&SourceOutcome> {
        self.sources.get(&kind)
    }

    pub fn valid_count(&self) -> usize {
        self.sources.values().filter(|o| o.is_valid()).count()
    }

    pub fn dropped_count(&self) -> usize {
        self.sources.len() - self.valid_count()
    }
}

/// Cuts aligned windows from every source in a catalog.
#[derive(Debug)]
pub struct MultiSourceAligner<'a> {
    catalog: &'a RasterCatalog,
    spec: AlignSpec,
    footprint_size: f64,
}

impl<'a> MultiSourceAligner<'a> {
    pub fn new(catalog: &'a RasterCatalog, spec: AlignSpec) -> Self {
        let (res_x, _) = catalog.reference().resolution();
        Self {
            catalog,
            spec,
            footprint_size: spec.patch_size_px as f64 * res_x,
        }
    }

    /// Footprint edge in reference CRS units.
    pub fn footprint_size(&self) -> f64 {
        self.footprint_size
    }

    pub fn spec(&self) -> &AlignSpec {
        &self.spec
    }

    /// Cut every source around `center`.
    ///
    /// # Errors
    ///
    /// Fails when the DEM itself is dropped; no other source is read then.
    pub fn align(&self, center: &PatchCenter) -> Result<PatchStack, AlignError> {
        let reference = self.catalog.reference();
        let crs = reference.crs();
        let footprint = center.footprint(self.footprint_size);

        let mut sources = BTreeMap::new();
        match self.align_source(reference, &footprint, crs) {
            SourceOutcome::Dropped(DropReason::OutOfBounds { overlap }) => {
                return Err(AlignError::ReferenceOutOfBounds { overlap });
            }
            SourceOutcome::Dropped(DropReason::Unreadable { reason }) => {
                return Err(AlignError::ReferenceUnreadable(reason));
            }
            valid => {
                sources.insert(RasterKind::Dem, valid);
            }
        }

        for source in self.catalog.sources().filter(|s| !s.kind().is_reference()) {
            let outcome = self.align_source(source, &footprint, crs);
            sources.insert(source.kind(), outcome);
        }
        for (kind, error) in self.catalog.unreadable() {
            sources.insert(
                *kind,
                SourceOutcome::Dropped(DropReason::Unreadable {
                    reason: error.to_string(),
                }),
            );
        }

        Ok(PatchStack {
            center: center.clone(),
            footprint,
            crs,
            sources,
        })
    }

    fn align_source(
        &self,
        source: &RasterSource,
        footprint: &Bounds,
        reference_crs: Crs,
    ) -> SourceOutcome {
        let kind = source.kind();
        let bounds = if source.crs() == reference_crs {
            *footprint
        } else {
            match transform_bounds(
                reference_crs,
                source.crs(),
                footprint,
                DEFAULT_DENSIFY_SEGMENTS,
            ) {
                Ok(bounds) => bounds,
                Err(e) => {
                    debug!(kind = %kind, error = %e, "Footprint outside source CRS domain");
                    return SourceOutcome::Dropped(DropReason::OutOfBounds { overlap: 0.0 });
                }
            }
        };

        let window = match source.read_window(&bounds) {
            Ok(window) => window,
            Err(e) => {
                return SourceOutcome::Dropped(DropReason::Unreadable {
                    reason: e.to_string(),
                })
            }
        };

        trace!(kind = %kind, overlap = window.overlap, "Window read");
        if window.overlap <= 0.0 || window.overlap < self.spec.min_overlap {
            return SourceOutcome::Dropped(DropReason::OutOfBounds {
                overlap: window.overlap,
            });
        }

        SourceOutcome::Valid(SourcePatch {
            kind,
            pixels: window.pixels,
            transform: window.transform,
            crs: source.crs(),
            nodata: source.nodata(),
            width: window.width,
            height: window.height,
            bands: window.bands,
            coverage: window.overlap,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raster::{GeoTiffHeader, SampleType};
    use crate::watershed::WatershedId;
    use std::path::Path;

    fn source(
        kind: RasterKind,
        crs: Crs,
        gt: GeoTransform,
        size: usize,
        bands: usize,
    ) -> RasterSource {
        let header = GeoTiffHeader {
            width: size,
            height: size,
            bands,
            sample_type: SampleType::F32,
            transform: gt,
            crs,
            nodata: -9999.0,
        };
        let pixels = PixelData::F32(vec![1.0; size * size * bands]);
        RasterSource::from_pixels(kind, header, pixels).unwrap()
    }

    /// DEM at 10 m over [0, 5000]; SAR at 10 m over [1000, 4000]; optical at
    /// 30 m over the full square.
    fn catalog() -> RasterCatalog {
        let albers = Crs::CONUS_ALBERS;
        let dem_gt = GeoTransform::new(0.0, 5000.0, 10.0, -10.0);
        let sar_gt = GeoTransform::new(1000.0, 4000.0, 10.0, -10.0);
        let optical_gt = GeoTransform::new(0.0, 5010.0, 30.0, -30.0);
        RasterCatalog::from_sources(
            Path::new("/c/06010105"),
            vec![
                source(RasterKind::Dem, albers, dem_gt, 500, 1),
                source(RasterKind::SarVv, albers, sar_gt, 300, 1),
                source(RasterKind::Optical, albers, optical_gt, 168, 3),
            ],
        )
        .unwrap()
    }

    fn center(index: usize, x: f64, y: f64) -> PatchCenter {
        PatchCenter {
            watershed_id: WatershedId::parse("06010105").unwrap(),
            sequence_index: index,
            x,
            y,
        }
    }

    #[test]
    fn test_spec_validation() {
        assert!(AlignSpec::new(0, 0.5).is_err());
        assert!(AlignSpec::new(256, 0.0).is_err());
        assert!(AlignSpec::new(256, 1.5).is_err());
        assert!(AlignSpec::new(256, 1.0).is_ok());
    }

    #[test]
    fn test_footprint_is_constant_across_sources() {
        let catalog = catalog();
        let aligner = MultiSourceAligner::new(&catalog, AlignSpec::new(256, 0.36).unwrap());
        assert_eq!(aligner.footprint_size(), 2560.0);

        let stack = aligner.align(&center(0, 1280.0, 1280.0)).unwrap();
        assert_eq!(stack.footprint, Bounds::new(0.0, 0.0, 2560.0, 2560.0));

        match stack.get(RasterKind::Dem) {
            Some(SourceOutcome::Valid(dem)) => {
                assert_eq!((dem.width, dem.height), (256, 256));
                assert_eq!(dem.coverage, 1.0);
            }
            other => panic!("DEM not valid: {:?}", other.map(|o| o.is_valid())),
        }
        match stack.get(RasterKind::Optical) {
            // 2560 m at 30 m is 85.3 pixels, rounded.
            Some(SourceOutcome::Valid(optical)) => {
                assert_eq!((optical.width, optical.height, optical.bands), (85, 85, 3));
                assert_eq!(optical.pixels.len(), 85 * 85 * 3);
            }
            other => panic!("optical not valid: {:?}", other.map(|o| o.is_valid())),
        }
    }

    #[test]
    fn test_sar_overlap_per_quadrant() {
        let catalog = catalog();
        let aligner = MultiSourceAligner::new(&catalog, AlignSpec::new(256, 0.36).unwrap());
        let centers = [
            (1280.0, 1280.0, 0.372),
            (3840.0, 1280.0, 0.343),
            (1280.0, 3840.0, 0.343),
            (3840.0, 3840.0, 0.316),
        ];
        let mut valid = 0;
        for (i, (x, y, expected)) in centers.iter().enumerate() {
            let stack = aligner.align(&center(i, *x, *y)).unwrap();
            let overlap = match stack.get(RasterKind::SarVv).unwrap() {
                SourceOutcome::Valid(p) => {
                    valid += 1;
                    p.coverage
                }
                SourceOutcome::Dropped(DropReason::OutOfBounds { overlap }) => *overlap,
                other => panic!("unexpected outcome {:?}", other),
            };
            assert!((overlap - expected).abs() < 0.001, "{} vs {}", overlap, expected);
        }
        assert_eq!(valid, 1);
    }

    /// Every valid patch's own extent must sit within half a source pixel
    /// of the footprint, expressed in that source's CRS.
    fn assert_extents_match_footprint(stack: &PatchStack) {
        let mut checked = 0;
        for outcome in stack.sources.values() {
            let SourceOutcome::Valid(patch) = outcome else {
                continue;
            };
            let requested = if patch.crs == stack.crs {
                stack.footprint
            } else {
                transform_bounds(stack.crs, patch.crs, &stack.footprint, DEFAULT_DENSIFY_SEGMENTS)
                    .unwrap()
            };
            let (res_x, res_y) = patch.resolution();
            let actual = patch.transform.bounds(patch.width, patch.height);
            let tolerance = res_x.max(res_y) / 2.0 + 1e-9;
            assert!(
                actual.approx_eq(&requested, tolerance),
                "{}: {:?} vs {:?}",
                patch.kind,
                actual,
                requested
            );
            checked += 1;
        }
        assert!(checked > 0);
    }

    #[test]
    fn test_valid_patch_extents_match_footprint() {
        let catalog = catalog();
        let aligner = MultiSourceAligner::new(&catalog, AlignSpec::new(256, 0.36).unwrap());
        // Off the 30 m optical grid: [720, 3280] spans 85.3 optical pixels.
        for (i, (x, y)) in [(2000.0, 2000.0), (1280.0, 1280.0), (2555.0, 2345.0)]
            .iter()
            .enumerate()
        {
            let stack = aligner.align(&center(i, *x, *y)).unwrap();
            assert_eq!(stack.valid_count(), 3);
            assert_extents_match_footprint(&stack);
        }

        let stack = aligner.align(&center(0, 2000.0, 2000.0)).unwrap();
        match stack.get(RasterKind::Optical) {
            Some(SourceOutcome::Valid(optical)) => {
                let extent = optical.transform.bounds(optical.width, optical.height);
                assert!(extent.approx_eq(&Bounds::new(720.0, 720.0, 3270.0, 3270.0), 1e-9));
            }
            other => panic!("optical not valid: {:?}", other.map(|o| o.is_valid())),
        }
    }

    #[test]
    fn test_reprojected_patch_extent_matches_footprint() {
        let (x, y) =
            crate::coord::transform_point(Crs::WGS84, Crs::CONUS_ALBERS, -81.7, 36.2).unwrap();
        let dem_gt = GeoTransform::new(x - 5000.0, y + 5000.0, 10.0, -10.0);
        let sar_gt = GeoTransform::new(-82.0, 36.5, 0.001, -0.001);
        let catalog = RasterCatalog::from_sources(
            Path::new("/c/06010105"),
            vec![
                source(RasterKind::Dem, Crs::CONUS_ALBERS, dem_gt, 1000, 1),
                source(RasterKind::SarVv, Crs::WGS84, sar_gt, 600, 1),
            ],
        )
        .unwrap();
        let aligner = MultiSourceAligner::new(&catalog, AlignSpec::new(256, 0.5).unwrap());
        for (i, (dx, dy)) in [(0.0, 0.0), (-1234.0, 777.0)].iter().enumerate() {
            let stack = aligner.align(&center(i, x + dx, y + dy)).unwrap();
            assert_eq!(stack.valid_count(), 2);
            assert_extents_match_footprint(&stack);
        }
    }

    #[test]
    fn test_reference_out_of_bounds_fails() {
        let catalog = catalog();
        let aligner = MultiSourceAligner::new(&catalog, AlignSpec::new(256, 0.5).unwrap());
        let err = aligner.align(&center(0, 9000.0, 9000.0)).unwrap_err();
        assert!(matches!(err, AlignError::ReferenceOutOfBounds { overlap } if overlap == 0.0));
    }

    #[test]
    fn test_reprojected_source_window() {
        // DEM in Albers near Boone, NC; SAR in geographic coordinates.
        let (x, y) =
            crate::coord::transform_point(Crs::WGS84, Crs::CONUS_ALBERS, -81.7, 36.2).unwrap();
        let dem_gt = GeoTransform::new(x - 5000.0, y + 5000.0, 10.0, -10.0);
        let sar_gt = GeoTransform::new(-82.0, 36.5, 0.001, -0.001);
        let catalog = RasterCatalog::from_sources(
            Path::new("/c/06010105"),
            vec![
                source(RasterKind::Dem, Crs::CONUS_ALBERS, dem_gt, 1000, 1),
                source(RasterKind::SarVv, Crs::WGS84, sar_gt, 600, 1),
            ],
        )
        .unwrap();
        let aligner = MultiSourceAligner::new(&catalog, AlignSpec::new(256, 0.5).unwrap());
        let stack = aligner.align(&center(0, x, y)).unwrap();

        match stack.get(RasterKind::SarVv) {
            Some(SourceOutcome::Valid(sar)) => {
                assert_eq!(sar.crs, Crs::WGS84);
                // 2.56 km is about 0.023 deg of latitude; the envelope of
                // the rotated footprint is somewhat taller.
                assert!(sar.height > 20 && sar.height < 32, "{}", sar.height);
                assert!(sar.width > sar.height);
                assert_eq!(sar.coverage, 1.0);
            }
            other => panic!("SAR not valid: {:?}", other.map(|o| o.is_valid())),
        }
    }

    #[test]
    fn test_deterministic() {
        let catalog = catalog();
        let aligner = MultiSourceAligner::new(&catalog, AlignSpec::new(128, 0.3).unwrap());
        let a = aligner.align(&center(0, 2000.0, 2000.0)).unwrap();
        let b = aligner.align(&center(0, 2000.0, 2000.0)).unwrap();
        assert_eq!(a, b);
    }
}
