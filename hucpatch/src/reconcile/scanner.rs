//! Export folder discovery and grouping.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use tracing::debug;

use super::types::{ArtifactKind, ExportFile, ExportFolder, FolderName, ReconcileError};
use crate::watershed::WatershedId;

/// List the export folders directly under `export_root`.
///
/// Hidden entries, plain files and directories whose names do not parse as
/// export folders are skipped. The result is sorted by watershed id, then
/// duplicate index, then folder name.
pub fn scan(export_root: &Path) -> Result<Vec<ExportFolder>, ReconcileError> {
    let entries = fs::read_dir(export_root).map_err(|source| ReconcileError::ReadFailed {
        path: export_root.to_path_buf(),
        source,
    })?;

    let mut folders = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| ReconcileError::ReadFailed {
            path: export_root.to_path_buf(),
            source,
        })?;
        let path = entry.path();
        let Some(name) = entry.file_name().to_str().map(str::to_string) else {
            debug!(path = %path.display(), "Skipping non UTF-8 entry");
            continue;
        };
        if name.starts_with('.') || !path.is_dir() {
            continue;
        }
        let Some(parsed) = FolderName::parse(&name) else {
            debug!(folder = %name, "Skipping directory that is not an export folder");
            continue;
        };
        folders.push(scan_folder(&path, name, parsed)?);
    }

    folders.sort_by(|a, b| {
        (&a.watershed_id, a.duplicate_index, &a.folder_name).cmp(&(
            &b.watershed_id,
            b.duplicate_index,
            &b.folder_name,
        ))
    });
    Ok(folders)
}

fn scan_folder(
    path: &Path,
    folder_name: String,
    parsed: FolderName,
) -> Result<ExportFolder, ReconcileError> {
    let read_failed = |source| ReconcileError::ReadFailed {
        path: path.to_path_buf(),
        source,
    };

    let mut files = Vec::new();
    let mut unrecognized = Vec::new();
    for entry in fs::read_dir(path).map_err(read_failed)? {
        let entry = entry.map_err(read_failed)?;
        let file_path = entry.path();
        let file_name = entry.file_name().to_string_lossy().into_owned();
        if file_name.starts_with('.') {
            continue;
        }
        let metadata = entry.metadata().map_err(|source| ReconcileError::ReadFailed {
            path: file_path.clone(),
            source,
        })?;
        if !metadata.is_file() {
            continue;
        }
        match ArtifactKind::classify(&file_name) {
            Some(kind) => {
                let modified =
                    metadata
                        .modified()
                        .map_err(|source| ReconcileError::ReadFailed {
                            path: file_path.clone(),
                            source,
                        })?;
                files.push(ExportFile {
                    kind,
                    path: file_path,
                    modified,
                    size: metadata.len(),
                });
            }
            None => unrecognized.push(file_path),
        }
    }

    files.sort_by(|a, b| a.kind.cmp(&b.kind).then_with(|| a.path.cmp(&b.path)));
    unrecognized.sort();

    debug!(
        folder = %folder_name,
        files = files.len(),
        unrecognized = unrecognized.len(),
        "Scanned export folder"
    );

    Ok(ExportFolder {
        path: path.to_path_buf(),
        folder_name,
        watershed_id: parsed.watershed_id,
        duplicate_index: parsed.duplicate_index,
        files,
        unrecognized,
    })
}

/// Group folders by watershed id with the duplicate suffix stripped.
///
/// Input order is preserved within each group.
pub fn group(folders: Vec<ExportFolder>) -> BTreeMap<WatershedId, Vec<ExportFolder>> {
    folders.into_iter().fold(BTreeMap::new(), |mut acc, folder| {
        acc.entry(folder.watershed_id.clone())
            .or_insert_with(Vec::new)
            .push(folder);
        acc
    })
}
