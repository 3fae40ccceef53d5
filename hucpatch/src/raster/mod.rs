//! Georeferenced raster access.
//!
//! A [`RasterCatalog`] holds the readable layers of one canonical watershed
//! directory. Each [`RasterSource`] validates its GeoTIFF header on open and
//! decodes pixels on the first window read.

mod catalog;
mod geotiff;
mod geotransform;
mod kind;
mod pixels;
mod source;

use std::path::{Path, PathBuf};

use thiserror::Error;

pub use catalog::RasterCatalog;
pub use geotiff::{
    encode_geotiff, read_header, read_pixels, write_geotiff, GeoTiffHeader, GeoTiffImage,
};
pub use geotransform::GeoTransform;
pub use kind::RasterKind;
pub use pixels::{PixelData, PixelWindow, SampleType};
pub use source::{RasterSource, Window};

/// Errors from reading or encoding rasters.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RasterError {
    #[error("{path}: unreadable raster: {reason}")]
    Unreadable { path: PathBuf, reason: String },

    #[error("failed to encode GeoTIFF: {0}")]
    Encode(String),
}

impl RasterError {
    pub fn unreadable(path: &Path, reason: impl Into<String>) -> Self {
        RasterError::Unreadable {
            path: path.to_path_buf(),
            reason: reason.into(),
        }
    }
}

/// Errors from opening a catalog.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("reference DEM is unreadable: {0}")]
    ReferenceUnreadable(RasterError),
}
