//! Per-watershed patch manifest (JSON Lines).

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::WriteError;
use crate::align::{DropReason, PatchStack, SourceOutcome};
use crate::coord::{Bounds, Crs};
use crate::raster::RasterKind;
use crate::reconcile::partial_path;
use crate::watershed::WatershedId;

/// Manifest file name inside each watershed output directory.
pub const MANIFEST_FILE_NAME: &str = "manifest.jsonl";

/// What happened to one source of one patch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceStatus {
    Written,
    Dropped,
    WriteFailed,
}

/// Manifest entry for one source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceEntry {
    pub status: SourceStatus,
    /// True only when the file was written.
    pub valid: bool,
    /// Path relative to the watershed output directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bands: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<[f64; 2]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crs: Option<Crs>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coverage: Option<f64>,
    /// Drop or write-failure reason.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl SourceEntry {
    pub(crate) fn dropped(reason: &DropReason) -> Self {
        let coverage = match reason {
            DropReason::OutOfBounds { overlap } => Some(*overlap),
            DropReason::Unreadable { .. } => None,
        };
        Self {
            status: SourceStatus::Dropped,
            valid: false,
            file: None,
            width: None,
            height: None,
            bands: None,
            resolution: None,
            crs: None,
            coverage,
            reason: Some(reason.to_string()),
        }
    }
}

/// One line of `manifest.jsonl`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestRecord {
    pub patch_id: String,
    pub watershed_id: WatershedId,
    pub sequence_index: usize,
    pub center_x: f64,
    pub center_y: f64,
    pub crs: Crs,
    pub footprint: Bounds,
    pub sources: BTreeMap<RasterKind, SourceEntry>,
}

impl ManifestRecord {
    /// A record with no sources filled in yet.
    pub(crate) fn for_stack(stack: &PatchStack) -> Self {
        Self {
            patch_id: stack.center.patch_id(),
            watershed_id: stack.center.watershed_id.clone(),
            sequence_index: stack.center.sequence_index,
            center_x: stack.center.x,
            center_y: stack.center.y,
            crs: stack.crs,
            footprint: stack.footprint,
            sources: stack
                .sources
                .iter()
                .filter_map(|(kind, outcome)| match outcome {
                    SourceOutcome::Dropped(reason) => Some((*kind, SourceEntry::dropped(reason))),
                    SourceOutcome::Valid(_) => None,
                })
                .collect(),
        }
    }

    pub fn count(&self, status: SourceStatus) -> usize {
        self.sources.values().filter(|e| e.status == status).count()
    }

    pub fn is_valid(&self, kind: RasterKind) -> bool {
        self.sources.get(&kind).is_some_and(|e| e.valid)
    }
}

/// Write records as JSON Lines, sorted by sequence index, replacing any
/// previous manifest atomically.
pub fn write_manifest(path: &Path, records: &[ManifestRecord]) -> Result<(), WriteError> {
    let mut sorted: Vec<&ManifestRecord> = records.iter().collect();
    sorted.sort_by_key(|r| r.sequence_index);

    let mut out = String::new();
    for record in sorted {
        let line = serde_json::to_string(record).map_err(|e| WriteError::Manifest {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        out.push_str(&line);
        out.push('\n');
    }

    let partial = partial_path(path);
    fs::write(&partial, out)
        .and_then(|_| fs::rename(&partial, path))
        .map_err(|source| {
            let _ = fs::remove_file(&partial);
            WriteError::Io {
                path: path.to_path_buf(),
                source,
            }
        })
}

/// Parse a manifest written by [`write_manifest`].
pub fn read_manifest(path: &Path) -> Result<Vec<ManifestRecord>, WriteError> {
    let text = fs::read_to_string(path).map_err(|source| WriteError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    text.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(i, line)| {
            serde_json::from_str(line).map_err(|e| WriteError::Manifest {
                path: path.to_path_buf(),
                reason: format!("line {}: {}", i + 1, e),
            })
        })
        .collect()
}

/// Manifest location for a watershed output directory.
pub fn manifest_path(watershed_dir: &Path) -> PathBuf {
    watershed_dir.join(MANIFEST_FILE_NAME)
}
