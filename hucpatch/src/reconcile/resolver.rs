//! Merge resolution for duplicate export folders.
//!
//! For each artifact kind the newest export file wins. Files whose mtimes
//! fall within the tolerance of the newest are tied; ties go to the lowest
//! duplicate index, then to the lexicographically first folder name.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use super::report::{ReconcileReport, WatershedReconcile};
use super::scanner::{group, scan};
use super::types::{
    canonical_dir, Action, ArtifactAction, ArtifactKind, ConflictPolicy, Displacement,
    ExportFolder, ReconcileError, ReconcileOptions, ReconcileWarning, TransferMode,
};
use crate::watershed::WatershedId;

/// Name of the directory holding displaced canonical files.
pub const ARCHIVE_DIR_NAME: &str = ".archive";

/// One export file competing for a canonical slot.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate<'a> {
    pub folder_name: &'a str,
    pub duplicate_index: u32,
    pub path: &'a Path,
    pub modified: SystemTime,
}

/// Pick the winning candidate, returning its index.
///
/// Returns `None` only for an empty slice.
pub fn select_winner(candidates: &[Candidate<'_>], tolerance: Duration) -> Option<usize> {
    let newest = candidates.iter().map(|c| c.modified).max()?;
    candidates
        .iter()
        .enumerate()
        .filter(|(_, c)| {
            newest
                .duration_since(c.modified)
                .map(|age| age <= tolerance)
                .unwrap_or(true)
        })
        .min_by(|(_, a), (_, b)| {
            a.duplicate_index
                .cmp(&b.duplicate_index)
                .then_with(|| a.folder_name.cmp(b.folder_name))
                .then_with(|| a.path.cmp(b.path))
        })
        .map(|(i, _)| i)
}

/// Turns duplicate-suffixed export folders into canonical directories.
#[derive(Debug, Clone, Default)]
pub struct ExportReconciler {
    options: ReconcileOptions,
}

impl ExportReconciler {
    pub fn new(options: ReconcileOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &ReconcileOptions {
        &self.options
    }

    /// Reconcile every watershed found under `export_root`.
    ///
    /// Only an unreadable export root is an error; per-watershed failures
    /// are recorded in the report.
    pub fn reconcile_all(
        &self,
        export_root: &Path,
        canonical_root: &Path,
    ) -> Result<ReconcileReport, ReconcileError> {
        let groups = group(scan(export_root)?);
        info!(
            export_root = %export_root.display(),
            watersheds = groups.len(),
            "Reconciling export folders"
        );

        let mut report = ReconcileReport::new(export_root, canonical_root);
        for (id, folders) in &groups {
            report
                .watersheds
                .push(self.reconcile_group(id, folders, canonical_root));
        }
        Ok(report)
    }

    /// Reconcile only the listed watersheds.
    ///
    /// A requested id without export folders fails for that id alone with
    /// [`ReconcileError::NoExportFolders`].
    pub fn reconcile_ids(
        &self,
        export_root: &Path,
        canonical_root: &Path,
        ids: &[WatershedId],
    ) -> Result<ReconcileReport, ReconcileError> {
        let mut groups = group(scan(export_root)?);
        let mut report = ReconcileReport::new(export_root, canonical_root);

        for id in ids {
            match groups.remove(id) {
                Some(folders) => {
                    report
                        .watersheds
                        .push(self.reconcile_group(id, &folders, canonical_root));
                }
                None => {
                    warn!(huc_id = %id, "No export folders found");
                    let mut entry =
                        WatershedReconcile::new(id.clone(), canonical_dir(canonical_root, id));
                    entry
                        .errors
                        .push(ReconcileError::NoExportFolders(id.clone()));
                    report.watersheds.push(entry);
                }
            }
        }
        Ok(report)
    }

    /// Reconcile one watershed's folders into `<canonical_root>/<id>/`.
    pub fn reconcile_group(
        &self,
        id: &WatershedId,
        folders: &[ExportFolder],
        canonical_root: &Path,
    ) -> WatershedReconcile {
        let dir = canonical_dir(canonical_root, id);
        let mut result = WatershedReconcile::new(id.clone(), dir.clone());
        result.folders = folders.iter().map(|f| f.path.clone()).collect();

        for folder in folders {
            for path in &folder.unrecognized {
                result
                    .warnings
                    .push(ReconcileWarning::UnrecognizedFile(path.clone()));
            }
        }

        for kind in ArtifactKind::ALL {
            let candidates: Vec<Candidate<'_>> = folders
                .iter()
                .flat_map(|folder| {
                    folder
                        .files
                        .iter()
                        .filter(move |f| f.kind == kind)
                        .map(move |f| Candidate {
                            folder_name: &folder.folder_name,
                            duplicate_index: folder.duplicate_index,
                            path: &f.path,
                            modified: f.modified,
                        })
                })
                .collect();

            let target = dir.join(kind.canonical_filename());
            if let Err(e) = self.resolve_kind(kind, &candidates, &target, &mut result) {
                warn!(huc_id = %id, kind = %kind, error = %e, "Reconcile step failed");
                result.errors.push(e);
            }
        }

        info!(
            huc_id = %id,
            folders = folders.len(),
            actions = result.actions.len(),
            warnings = result.warnings.len(),
            errors = result.errors.len(),
            "Reconciled watershed"
        );
        result
    }

    fn resolve_kind(
        &self,
        kind: ArtifactKind,
        candidates: &[Candidate<'_>],
        target: &Path,
        result: &mut WatershedReconcile,
    ) -> Result<(), ReconcileError> {
        let existing = existing_mtime(target)?;

        let Some(winner_index) = select_winner(candidates, self.options.mtime_tolerance) else {
            if existing.is_none() && !kind.is_optional() {
                result.warnings.push(ReconcileWarning::MissingArtifact(kind));
            }
            return Ok(());
        };
        let winner = &candidates[winner_index];

        for (i, loser) in candidates.iter().enumerate() {
            if i != winner_index {
                result.actions.push(ArtifactAction {
                    kind,
                    target: target.to_path_buf(),
                    action: Action::Superseded {
                        path: loser.path.to_path_buf(),
                        modified: loser.modified,
                    },
                });
            }
        }

        // The canonical copy carries the winner's mtime, which a tolerance
        // tie can leave older than the newest candidate.
        if let Some(current) = existing {
            if current >= winner.modified {
                debug!(target = %target.display(), "Canonical file is up to date");
                result.actions.push(ArtifactAction {
                    kind,
                    target: target.to_path_buf(),
                    action: Action::UpToDate,
                });
                return Ok(());
            }
        }

        let dir = target.parent().unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(dir).map_err(|source| ReconcileError::CreateDirectoryFailed {
            path: dir.to_path_buf(),
            source,
        })?;

        let partial = partial_path(target);
        if let Err(e) = self.stage(winner.path, &partial, winner.modified) {
            let _ = fs::remove_file(&partial);
            return Err(e);
        }

        let displaced = match existing {
            Some(_) => match self.displace(target) {
                Ok(d) => Some(d),
                Err(e) => {
                    let _ = fs::remove_file(&partial);
                    return Err(e);
                }
            },
            None => None,
        };

        fs::rename(&partial, target).map_err(|source| ReconcileError::TransferFailed {
            from: partial.clone(),
            to: target.to_path_buf(),
            source,
        })?;

        if self.options.transfer == TransferMode::Move && winner.path.exists() {
            fs::remove_file(winner.path).map_err(|source| ReconcileError::TransferFailed {
                from: winner.path.to_path_buf(),
                to: target.to_path_buf(),
                source,
            })?;
        }

        debug!(
            source = %winner.path.display(),
            target = %target.display(),
            "Installed canonical file"
        );
        let action = match displaced {
            Some(displaced) => Action::Replaced {
                source: winner.path.to_path_buf(),
                modified: winner.modified,
                displaced,
            },
            None => Action::Installed {
                source: winner.path.to_path_buf(),
                modified: winner.modified,
            },
        };
        result.actions.push(ArtifactAction {
            kind,
            target: target.to_path_buf(),
            action,
        });
        Ok(())
    }

    /// Put the winner's bytes at `partial` with the winner's mtime.
    fn stage(
        &self,
        source: &Path,
        partial: &Path,
        modified: SystemTime,
    ) -> Result<(), ReconcileError> {
        let transfer_failed = |e| ReconcileError::TransferFailed {
            from: source.to_path_buf(),
            to: partial.to_path_buf(),
            source: e,
        };

        let moved = self.options.transfer == TransferMode::Move
            && fs::rename(source, partial).is_ok();
        if !moved {
            fs::copy(source, partial).map_err(transfer_failed)?;
        }

        fs::File::options()
            .write(true)
            .open(partial)
            .and_then(|file| file.set_modified(modified))
            .map_err(transfer_failed)
    }

    /// Move the current canonical file out of the way per the conflict
    /// policy.
    fn displace(&self, target: &Path) -> Result<Displacement, ReconcileError> {
        match self.options.conflict_policy {
            ConflictPolicy::Discard => {
                fs::remove_file(target).map_err(|source| ReconcileError::ArchiveFailed {
                    path: target.to_path_buf(),
                    source,
                })?;
                Ok(Displacement::Discarded)
            }
            ConflictPolicy::Archive => {
                let dir = target.parent().unwrap_or_else(|| Path::new("."));
                let archive_dir = dir.join(ARCHIVE_DIR_NAME);
                fs::create_dir_all(&archive_dir).map_err(|source| {
                    ReconcileError::CreateDirectoryFailed {
                        path: archive_dir.clone(),
                        source,
                    }
                })?;
                let archived = archive_dir.join(archive_name(target, Utc::now()));
                fs::rename(target, &archived).map_err(|source| ReconcileError::ArchiveFailed {
                    path: target.to_path_buf(),
                    source,
                })?;
                Ok(Displacement::Archived(archived))
            }
        }
    }
}

fn existing_mtime(target: &Path) -> Result<Option<SystemTime>, ReconcileError> {
    match fs::metadata(target) {
        Ok(meta) => meta
            .modified()
            .map(Some)
            .map_err(|source| ReconcileError::ReadFailed {
                path: target.to_path_buf(),
                source,
            }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(ReconcileError::ReadFailed {
            path: target.to_path_buf(),
            source,
        }),
    }
}

/// Hidden sibling used while a file is being written.
pub(crate) fn partial_path(target: &Path) -> PathBuf {
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    target.with_file_name(format!(".{}.partial", name))
}

fn archive_name(target: &Path, now: DateTime<Utc>) -> String {
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    format!("{}_{}", now.format("%Y%m%dT%H%M%S%.6fZ"), name)
}
