//! The set of rasters available for one watershed.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use super::kind::RasterKind;
use super::source::RasterSource;
use super::{CatalogError, RasterError};

/// Every readable raster in a canonical watershed directory.
///
/// The DEM is the spatial reference and must be readable. Other layers may
/// be missing or corrupt; those are listed in [`RasterCatalog::unreadable`]
/// and simply never contribute to a patch.
#[derive(Debug)]
pub struct RasterCatalog {
    dir: PathBuf,
    sources: BTreeMap<RasterKind, RasterSource>,
    unreadable: BTreeMap<RasterKind, RasterError>,
}

impl RasterCatalog {
    /// Open every raster kind in `dir` by its canonical file name.
    ///
    /// # Errors
    ///
    /// Fails only when the DEM cannot be opened.
    pub fn open(dir: &Path) -> Result<Self, CatalogError> {
        let mut sources = BTreeMap::new();
        let mut unreadable = BTreeMap::new();

        for kind in RasterKind::ALL {
            let path = dir.join(kind.canonical_filename());
            match RasterSource::open(kind, &path) {
                Ok(source) => {
                    sources.insert(kind, source);
                }
                Err(e) if kind.is_reference() => {
                    return Err(CatalogError::ReferenceUnreadable(e));
                }
                Err(e) => {
                    warn!(kind = %kind, path = %path.display(), error = %e, "Raster unavailable");
                    unreadable.insert(kind, e);
                }
            }
        }

        info!(
            dir = %dir.display(),
            readable = sources.len(),
            unreadable = unreadable.len(),
            "Opened raster catalog"
        );
        Ok(Self {
            dir: dir.to_path_buf(),
            sources,
            unreadable,
        })
    }

    /// Build a catalog from sources already opened. One must be the DEM.
    pub fn from_sources(
        dir: &Path,
        sources: impl IntoIterator<Item = RasterSource>,
    ) -> Result<Self, CatalogError> {
        let sources: BTreeMap<_, _> = sources.into_iter().map(|s| (s.kind(), s)).collect();
        if !sources.contains_key(&RasterKind::Dem) {
            let path = dir.join(RasterKind::Dem.canonical_filename());
            return Err(CatalogError::ReferenceUnreadable(RasterError::unreadable(
                &path,
                "no DEM source",
            )));
        }
        Ok(Self {
            dir: dir.to_path_buf(),
            sources,
            unreadable: BTreeMap::new(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// The DEM.
    pub fn reference(&self) -> &RasterSource {
        // Both constructors refuse to build a catalog without a DEM.
        &self.sources[&RasterKind::Dem]
    }

    pub fn get(&self, kind: RasterKind) -> Option<&RasterSource> {
        self.sources.get(&kind)
    }

    /// Readable sources in kind order, DEM first.
    pub fn sources(&self) -> impl Iterator<Item = &RasterSource> {
        self.sources.values()
    }

    /// Sources that failed to open, with the reason.
    pub fn unreadable(&self) -> &BTreeMap<RasterKind, RasterError> {
        &self.unreadable
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coord::Crs;
    use crate::raster::geotiff::{write_geotiff, GeoTiffHeader, GeoTiffImage};
    use crate::raster::{GeoTransform, PixelData, SampleType};
    use std::fs;
    use tempfile::TempDir;

    fn write_raster(dir: &Path, kind: RasterKind) {
        let pixels = PixelData::F32(vec![0.5; 16]);
        write_geotiff(
            &dir.join(kind.canonical_filename()),
            &GeoTiffImage {
                width: 4,
                height: 4,
                bands: 1,
                transform: GeoTransform::new(0.0, 40.0, 10.0, -10.0),
                crs: Crs::CONUS_ALBERS,
                nodata: -9999.0,
                pixels: &pixels,
            },
        )
        .unwrap();
    }

    #[test]
    fn test_open_full_catalog() {
        let temp = TempDir::new().unwrap();
        for kind in RasterKind::ALL {
            write_raster(temp.path(), kind);
        }
        let catalog = RasterCatalog::open(temp.path()).unwrap();
        assert_eq!(catalog.sources().count(), 5);
        assert!(catalog.unreadable().is_empty());
        assert_eq!(catalog.reference().kind(), RasterKind::Dem);
    }

    #[test]
    fn test_missing_dem_is_fatal() {
        let temp = TempDir::new().unwrap();
        write_raster(temp.path(), RasterKind::SarVv);
        let err = RasterCatalog::open(temp.path()).unwrap_err();
        assert!(matches!(err, CatalogError::ReferenceUnreadable(_)));
    }

    #[test]
    fn test_corrupt_optional_source_is_recorded() {
        let temp = TempDir::new().unwrap();
        write_raster(temp.path(), RasterKind::Dem);
        write_raster(temp.path(), RasterKind::SarVv);
        fs::write(temp.path().join("thermal.tif"), b"").unwrap();

        let catalog = RasterCatalog::open(temp.path()).unwrap();
        assert!(catalog.get(RasterKind::SarVv).is_some());
        assert!(catalog.get(RasterKind::Thermal).is_none());
        let unreadable: Vec<_> = catalog.unreadable().keys().copied().collect();
        assert_eq!(
            unreadable,
            vec![
                RasterKind::Optical,
                RasterKind::Thermal,
                RasterKind::FlowDirection
            ]
        );
    }

    #[test]
    fn test_from_sources_requires_dem() {
        let header = GeoTiffHeader {
            width: 1,
            height: 1,
            bands: 1,
            sample_type: SampleType::U8,
            transform: GeoTransform::new(0.0, 1.0, 1.0, -1.0),
            crs: Crs::CONUS_ALBERS,
            nodata: 0.0,
        };
        let sar =
            RasterSource::from_pixels(RasterKind::SarVv, header.clone(), PixelData::U8(vec![1]))
                .unwrap();
        assert!(RasterCatalog::from_sources(Path::new("/x"), vec![sar]).is_err());

        let dem =
            RasterSource::from_pixels(RasterKind::Dem, header, PixelData::U8(vec![1])).unwrap();
        let catalog = RasterCatalog::from_sources(Path::new("/x"), vec![dem]).unwrap();
        assert_eq!(catalog.reference().kind(), RasterKind::Dem);
        assert!(catalog.unreadable().is_empty());
    }
}
