//! hucpatch - Multi-source raster patch extraction for HUC8 watersheds
//!
//! This library turns exported watershed boundaries and rasters (DEM, Landsat
//! optical and thermal, Sentinel-1 SAR VV, flow direction) into a dataset of
//! co-registered GeoTIFF patches for machine learning.
//!
//! # Pipeline
//!
//! ```text
//! export folders ──► reconcile ──► canonical/<huc>/
//!                                        │
//!                          ┌─────────────┴──────────────┐
//!                          ▼                            ▼
//!                    RasterCatalog                  Watershed
//!                          │                            │
//!                          │                  PatchGridGenerator
//!                          │                            │
//!                          └────► MultiSourceAligner ◄──┘
//!                                        │
//!                                   PatchWriter ──► output/<huc>/patch_NNNNNN/
//! ```
//!
//! [`pipeline::PipelineRunner`] drives one run end to end.

pub mod align;
pub mod config;
pub mod coord;
pub mod grid;
pub mod logging;
pub mod pipeline;
pub mod raster;
pub mod reconcile;
pub mod watershed;
pub mod writer;

/// Library version, shared by the CLI and the manifest.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
