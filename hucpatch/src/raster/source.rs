//! A single georeferenced raster with lazily decoded pixels.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tracing::debug;

use super::geotiff::{self, GeoTiffHeader};
use super::geotransform::GeoTransform;
use super::kind::RasterKind;
use super::pixels::{PixelData, PixelWindow, SampleType};
use super::RasterError;
use crate::coord::{Bounds, Crs};

/// Pixels read for a window, snapped to the source grid.
#[derive(Debug, Clone, PartialEq)]
pub struct Window {
    pub pixels: PixelData,
    /// Georeferencing of the window's upper-left pixel.
    pub transform: GeoTransform,
    pub width: usize,
    pub height: usize,
    pub bands: usize,
    /// Fraction of window pixels that fall inside the source grid.
    pub overlap: f64,
}

impl Window {
    pub fn bounds(&self) -> Bounds {
        self.transform.bounds(self.width, self.height)
    }
}

/// A raster opened from disk (or built in memory).
///
/// Opening validates the header only. The first window read decodes the
/// whole image and caches it; concurrent readers block on the same decode
/// instead of repeating it.
#[derive(Debug)]
pub struct RasterSource {
    kind: RasterKind,
    path: PathBuf,
    header: GeoTiffHeader,
    bounds: Bounds,
    pixels: Mutex<Option<Arc<PixelData>>>,
}

impl RasterSource {
    /// Open a GeoTIFF and validate its header.
    pub fn open(kind: RasterKind, path: &Path) -> Result<Self, RasterError> {
        let header = geotiff::read_header(path)?;
        debug!(
            kind = %kind,
            path = %path.display(),
            crs = %header.crs,
            width = header.width,
            height = header.height,
            bands = header.bands,
            "Opened raster"
        );
        Ok(Self::with_header(kind, path.to_path_buf(), header, None))
    }

    /// A source backed by pixels already in memory.
    pub fn from_pixels(
        kind: RasterKind,
        header: GeoTiffHeader,
        pixels: PixelData,
    ) -> Result<Self, RasterError> {
        let path = PathBuf::from(format!("<memory:{}>", kind));
        let expected = header.width * header.height * header.bands;
        if pixels.len() != expected || pixels.sample_type() != header.sample_type {
            return Err(RasterError::unreadable(
                &path,
                format!(
                    "{} {} samples do not match a {}x{}x{} {} header",
                    pixels.len(),
                    pixels.sample_type(),
                    header.width,
                    header.height,
                    header.bands,
                    header.sample_type
                ),
            ));
        }
        Ok(Self::with_header(kind, path, header, Some(Arc::new(pixels))))
    }

    fn with_header(
        kind: RasterKind,
        path: PathBuf,
        header: GeoTiffHeader,
        pixels: Option<Arc<PixelData>>,
    ) -> Self {
        let bounds = header.transform.bounds(header.width, header.height);
        Self {
            kind,
            path,
            header,
            bounds,
            pixels: Mutex::new(pixels),
        }
    }

    pub fn kind(&self) -> RasterKind {
        self.kind
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn header(&self) -> &GeoTiffHeader {
        &self.header
    }

    pub fn crs(&self) -> Crs {
        self.header.crs
    }

    pub fn transform(&self) -> GeoTransform {
        self.header.transform
    }

    pub fn width(&self) -> usize {
        self.header.width
    }

    pub fn height(&self) -> usize {
        self.header.height
    }

    pub fn bands(&self) -> usize {
        self.header.bands
    }

    pub fn sample_type(&self) -> SampleType {
        self.header.sample_type
    }

    pub fn nodata(&self) -> f64 {
        self.header.nodata
    }

    /// Full extent in the source CRS.
    pub fn bounds(&self) -> Bounds {
        self.bounds
    }

    /// `(x, y)` pixel size in CRS units.
    pub fn resolution(&self) -> (f64, f64) {
        self.header.transform.resolution()
    }

    /// Whether pixels have been decoded yet.
    pub fn is_loaded(&self) -> bool {
        self.pixels.lock().is_some()
    }

    /// Decoded pixels, loading them on first use.
    pub fn pixels(&self) -> Result<Arc<PixelData>, RasterError> {
        let mut guard = self.pixels.lock();
        if let Some(pixels) = guard.as_ref() {
            return Ok(Arc::clone(pixels));
        }

        let start = Instant::now();
        let pixels = Arc::new(geotiff::read_pixels(&self.path, &self.header)?);
        debug!(
            kind = %self.kind,
            path = %self.path.display(),
            samples = pixels.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Decoded raster pixels"
        );
        *guard = Some(Arc::clone(&pixels));
        Ok(pixels)
    }

    /// The pixel window covering `bounds`, given in this source's CRS.
    ///
    /// The window is snapped to the source grid: its upper-left pixel is the
    /// one nearest the bounds' upper-left corner, and its size is the bounds'
    /// extent divided by the resolution, rounded, at least one pixel.
    /// Pixels outside the raster are filled with nodata.
    pub fn read_window(&self, bounds: &Bounds) -> Result<Window, RasterError> {
        let window = self.pixel_window(bounds)?;
        let transform = self.header.transform.offset(window.col, window.row);
        let inside = window.pixels_inside(self.header.width, self.header.height);
        let overlap = inside as f64 / window.len() as f64;
        let bands = self.header.bands;

        let pixels = if inside == 0 {
            PixelData::filled(
                self.header.sample_type,
                window.len() * bands,
                self.header.nodata,
            )
        } else {
            self.pixels()?.window(
                self.header.width,
                self.header.height,
                bands,
                window,
                self.header.nodata,
            )
        };

        Ok(Window {
            pixels,
            transform,
            width: window.cols,
            height: window.rows,
            bands,
            overlap,
        })
    }

    fn pixel_window(&self, bounds: &Bounds) -> Result<PixelWindow, RasterError> {
        let gt = self.header.transform;
        let (res_x, res_y) = gt.resolution();
        // Each edge snaps to its nearest grid line, so the window extent
        // stays within half a pixel of the requested bounds.
        let col = ((bounds.min_x - gt.origin_x) / res_x).round();
        let row = ((gt.origin_y - bounds.max_y) / res_y).round();
        let end_col = ((bounds.max_x - gt.origin_x) / res_x).round();
        let end_row = ((gt.origin_y - bounds.min_y) / res_y).round();
        let cols = (end_col - col).max(1.0);
        let rows = (end_row - row).max(1.0);

        if ![col, row, cols, rows].iter().all(|v| v.is_finite()) {
            return Err(RasterError::unreadable(
                &self.path,
                format!("window {:?} is not addressable", bounds),
            ));
        }
        Ok(PixelWindow {
            col: col as i64,
            row: row as i64,
            cols: cols as usize,
            rows: rows as usize,
        })
    }
}
