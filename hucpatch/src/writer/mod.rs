//! Patch output.
//!
//! # Layout
//!
//! ```text
//! <output_root>/
//! └── <watershed_id>/
//!     ├── manifest.jsonl
//!     ├── patch_000000/
//!     │   ├── dem.tif
//!     │   ├── optical.tif
//!     │   └── sar_vv.tif
//!     └── patch_000001/
//!         └── ...
//! ```
//!
//! Every file is written under a hidden `.partial` name and renamed into
//! place, so an interrupted run never leaves a truncated GeoTIFF behind.

mod manifest;

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, warn};

pub use manifest::{
    manifest_path, read_manifest, write_manifest, ManifestRecord, SourceEntry, SourceStatus,
    MANIFEST_FILE_NAME,
};

use crate::align::{PatchStack, SourceOutcome, SourcePatch};
use crate::grid::PatchCenter;
use crate::raster::{encode_geotiff, GeoTiffImage, RasterError};
use crate::reconcile::partial_path;
use crate::watershed::WatershedId;

/// Errors from writing patch files or manifests.
#[derive(Debug, Error)]
pub enum WriteError {
    #[error("failed to create directory {path}: {source}")]
    CreateDirectory { path: PathBuf, source: io::Error },

    #[error("failed to encode {path}: {source}")]
    Encode { path: PathBuf, source: RasterError },

    #[error("failed to write {path}: {source}")]
    Io { path: PathBuf, source: io::Error },

    #[error("invalid manifest {path}: {reason}")]
    Manifest { path: PathBuf, reason: String },
}

/// Writes aligned patch stacks under an output root.
#[derive(Debug, Clone)]
pub struct PatchWriter {
    output_root: PathBuf,
}

impl PatchWriter {
    pub fn new(output_root: impl Into<PathBuf>) -> Self {
        Self {
            output_root: output_root.into(),
        }
    }

    pub fn output_root(&self) -> &Path {
        &self.output_root
    }

    pub fn watershed_dir(&self, id: &WatershedId) -> PathBuf {
        self.output_root.join(id.as_str())
    }

    pub fn patch_dir(&self, center: &PatchCenter) -> PathBuf {
        self.watershed_dir(&center.watershed_id)
            .join(patch_dir_name(center.sequence_index))
    }

    /// Write every valid source of `stack` and describe the result.
    ///
    /// Each file, patch directory creation included, gets one retry. A
    /// file that still fails is recorded as [`SourceStatus::WriteFailed`];
    /// the remaining sources are still written.
    pub fn write_stack(&self, stack: &PatchStack) -> ManifestRecord {
        let mut record = ManifestRecord::for_stack(stack);
        let dir = self.patch_dir(&stack.center);
        let dir_name = patch_dir_name(stack.center.sequence_index);

        for (kind, outcome) in &stack.sources {
            let SourceOutcome::Valid(patch) = outcome else {
                continue;
            };
            let file_name = kind.canonical_filename();
            let result = self
                .write_with_retry(&dir.join(file_name), patch)
                .map_err(|e| e.to_string());

            let (res_x, res_y) = patch.resolution();
            let mut entry = SourceEntry {
                status: SourceStatus::Written,
                valid: true,
                file: Some(format!("{}/{}", dir_name, file_name)),
                width: Some(patch.width),
                height: Some(patch.height),
                bands: Some(patch.bands),
                resolution: Some([res_x, res_y]),
                crs: Some(patch.crs),
                coverage: Some(patch.coverage),
                reason: None,
            };
            if let Err(e) = result {
                warn!(
                    patch_id = %record.patch_id,
                    kind = %kind,
                    error = %e,
                    "Patch file write failed"
                );
                entry.status = SourceStatus::WriteFailed;
                entry.valid = false;
                entry.file = None;
                entry.reason = Some(e);
            }
            record.sources.insert(*kind, entry);
        }

        debug!(
            patch_id = %record.patch_id,
            written = record.count(SourceStatus::Written),
            dropped = record.count(SourceStatus::Dropped),
            "Patch written"
        );
        record
    }

    fn write_with_retry(&self, target: &Path, patch: &SourcePatch) -> Result<(), WriteError> {
        let bytes = encode_geotiff(&GeoTiffImage {
            width: patch.width,
            height: patch.height,
            bands: patch.bands,
            transform: patch.transform,
            crs: patch.crs,
            nodata: patch.nodata,
            pixels: &patch.pixels,
        })
        .map_err(|source| WriteError::Encode {
            path: target.to_path_buf(),
            source,
        })?;

        retry_once(target, || {
            if let Some(dir) = target.parent() {
                fs::create_dir_all(dir).map_err(|source| WriteError::CreateDirectory {
                    path: dir.to_path_buf(),
                    source,
                })?;
            }
            write_atomic(target, &bytes)
        })
    }

    /// Write the manifest for one watershed.
    pub fn write_manifest(
        &self,
        id: &WatershedId,
        records: &[ManifestRecord],
    ) -> Result<PathBuf, WriteError> {
        let dir = self.watershed_dir(id);
        fs::create_dir_all(&dir).map_err(|source| WriteError::CreateDirectory {
            path: dir.clone(),
            source,
        })?;
        let path = manifest_path(&dir);
        write_manifest(&path, records)?;
        Ok(path)
    }
}

fn patch_dir_name(sequence_index: usize) -> String {
    format!("patch_{:06}", sequence_index)
}

/// Run `attempt`, and once more if it fails.
fn retry_once<T>(
    target: &Path,
    mut attempt: impl FnMut() -> Result<T, WriteError>,
) -> Result<T, WriteError> {
    attempt().or_else(|first| {
        debug!(path = %target.display(), error = %first, "Retrying patch write");
        attempt()
    })
}

fn write_atomic(target: &Path, bytes: &[u8]) -> Result<(), WriteError> {
    let partial = partial_path(target);
    fs::write(&partial, bytes)
        .and_then(|_| fs::rename(&partial, target))
        .map_err(|source| {
            let _ = fs::remove_file(&partial);
            WriteError::Io {
                path: target.to_path_buf(),
                source,
            }
        })
}
