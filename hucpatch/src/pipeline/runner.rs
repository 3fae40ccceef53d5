//! End-to-end run driver.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use rayon::prelude::*;
use rayon::ThreadPool;
use tracing::{debug, info, warn};

use super::cancel::CancellationFlag;
use super::summary::{RunSummary, WatershedOutcome};
use crate::align::{AlignError, AlignSpec, MultiSourceAligner};
use crate::config::RunConfig;
use crate::grid::{GridSpec, PatchCenter, PatchGridGenerator};
use crate::raster::RasterCatalog;
use crate::reconcile::{
    ArtifactKind, ExportReconciler, ReconcileOptions, ReconcileReport, ReconcileStatus,
};
use crate::watershed::{Watershed, WatershedId};
use crate::writer::{ManifestRecord, PatchWriter};

/// Progress notifications emitted during a run.
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    /// Patch work for a watershed is about to start.
    WatershedStarted {
        watershed_id: WatershedId,
        position: usize,
        total: usize,
        centers: usize,
    },
    /// One center was aligned and written, skipped or cancelled.
    PatchFinished { watershed_id: WatershedId },
    WatershedFinished { watershed_id: WatershedId },
}

/// Callback invoked from worker threads.
pub type ProgressCallback = Arc<dyn Fn(&ProgressEvent) + Send + Sync>;

/// What happened to a single center.
enum PatchResult {
    Written(ManifestRecord),
    Skipped(AlignError),
    Cancelled,
}

/// Drives reconciliation, cataloguing, gridding, alignment and writing.
///
/// Watersheds run one after another; the centers of one watershed are
/// aligned and written on a pool of `workers` threads. A failure in one
/// watershed never stops the others.
///
/// # Example
///
/// ```ignore
/// let runner = PipelineRunner::new(config);
/// let summary = runner.run(&CancellationFlag::new());
/// println!("{}", summary.to_text());
/// ```
pub struct PipelineRunner {
    config: RunConfig,
    progress: Option<ProgressCallback>,
}

impl PipelineRunner {
    pub fn new(config: RunConfig) -> Self {
        Self {
            config,
            progress: None,
        }
    }

    /// Receive [`ProgressEvent`]s while running.
    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.progress = Some(callback);
        self
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    fn emit(&self, event: ProgressEvent) {
        if let Some(callback) = &self.progress {
            callback(&event);
        }
    }

    /// Execute a full run. Always returns a summary.
    pub fn run(&self, cancel: &CancellationFlag) -> RunSummary {
        let start = Instant::now();
        let mut summary = RunSummary::new();

        if let Err(e) = self.config.validate() {
            summary.errors.push(e.to_string());
            summary.elapsed_secs = start.elapsed().as_secs_f64();
            return summary;
        }

        let reconcile = self.reconcile(&mut summary);
        let ids = match self.select_watersheds(reconcile.as_ref()) {
            Ok(ids) => ids,
            Err(e) => {
                summary.errors.push(e);
                Vec::new()
            }
        };

        let pool = match rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.run.workers)
            .thread_name(|i| format!("hucpatch-worker-{}", i))
            .build()
        {
            Ok(pool) => pool,
            Err(e) => {
                summary
                    .errors
                    .push(format!("failed to start worker pool: {}", e));
                summary.reconcile = reconcile;
                summary.elapsed_secs = start.elapsed().as_secs_f64();
                return summary;
            }
        };

        info!(
            watersheds = ids.len(),
            workers = self.config.run.workers,
            "Starting patch extraction"
        );

        let total = ids.len();
        for (position, id) in ids.into_iter().enumerate() {
            if cancel.is_cancelled() {
                info!("Run cancelled before remaining watersheds");
                summary.cancelled = true;
                break;
            }

            let reconciled = reconcile.as_ref().and_then(|r| r.get(&id));
            let outcome = match reconciled {
                Some(entry) if entry.status() == ReconcileStatus::Failed => {
                    let errors: Vec<String> = entry.errors.iter().map(|e| e.to_string()).collect();
                    let mut outcome = WatershedOutcome::new(id.clone());
                    outcome.errors = errors;
                    outcome.finish();
                    outcome
                }
                _ => {
                    let mut outcome = self.process_watershed(&id, position, total, &pool, cancel);
                    if let Some(entry) = reconciled {
                        outcome
                            .warnings
                            .extend(entry.warnings.iter().map(|w| w.to_string()));
                        outcome.finish();
                    }
                    outcome
                }
            };

            info!(
                huc_id = %id,
                status = outcome.status.as_str(),
                written = outcome.stacks_written,
                skipped = outcome.stacks_skipped,
                "Watershed finished"
            );
            self.emit(ProgressEvent::WatershedFinished { watershed_id: id });
            if outcome.cancelled {
                summary.cancelled = true;
            }
            summary.watersheds.push(outcome);
        }

        summary.reconcile = reconcile;
        summary.elapsed_secs = start.elapsed().as_secs_f64();
        summary
    }

    fn reconcile(&self, summary: &mut RunSummary) -> Option<ReconcileReport> {
        let export_root = self.config.paths.export_root.as_ref()?;
        let canonical_root = &self.config.paths.canonical_root;
        let reconciler = ExportReconciler::new(ReconcileOptions::from(&self.config.reconcile));

        let result = if self.config.run.huc_ids.is_empty() {
            reconciler.reconcile_all(export_root, canonical_root)
        } else {
            reconciler.reconcile_ids(export_root, canonical_root, &self.config.run.huc_ids)
        };
        match result {
            Ok(report) => Some(report),
            Err(e) => {
                warn!(error = %e, "Reconciliation failed");
                summary.errors.push(e.to_string());
                None
            }
        }
    }

    /// Canonical watershed ids to process, in order, with filters and caps
    /// applied.
    fn select_watersheds(
        &self,
        reconcile: Option<&ReconcileReport>,
    ) -> Result<Vec<WatershedId>, String> {
        let requested = &self.config.run.huc_ids;
        let mut ids = if !requested.is_empty() {
            // Missing canonical directories fail per watershed later on.
            requested.clone()
        } else {
            let mut ids = list_canonical(&self.config.paths.canonical_root)?;
            if let Some(report) = reconcile {
                // Failed reconciliations may have no canonical directory but
                // still belong in the summary.
                for entry in &report.watersheds {
                    if !ids.contains(&entry.watershed_id) {
                        ids.push(entry.watershed_id.clone());
                    }
                }
                ids.sort();
            }
            ids
        };

        if let Some(max) = self.config.run.max_watersheds {
            ids.truncate(max);
        }
        Ok(ids)
    }

    fn process_watershed(
        &self,
        id: &WatershedId,
        position: usize,
        total: usize,
        pool: &ThreadPool,
        cancel: &CancellationFlag,
    ) -> WatershedOutcome {
        let dir = self.config.paths.canonical_root.join(id.as_str());
        let mut outcome = WatershedOutcome::new(id.clone());
        if !dir.is_dir() {
            outcome
                .errors
                .push(format!("no canonical directory {}", dir.display()));
            outcome.finish();
            return outcome;
        }

        let catalog = match RasterCatalog::open(&dir) {
            Ok(catalog) => catalog,
            Err(e) => {
                warn!(huc_id = %id, error = %e, "Skipping watershed");
                outcome.errors.push(e.to_string());
                outcome.finish();
                return outcome;
            }
        };
        for (kind, error) in catalog.unreadable() {
            outcome.warnings.push(format!("{}: {}", kind, error));
        }

        let watershed = match load_watershed(&dir, &catalog, self.config.patch.buffer_m) {
            Ok(watershed) => watershed,
            Err(e) => {
                warn!(huc_id = %id, error = %e, "Boundary unreadable");
                outcome.errors.push(e);
                outcome.finish();
                return outcome;
            }
        };

        let patch = &self.config.patch;
        let aligner = match AlignSpec::new(patch.size_px, patch.min_overlap) {
            Ok(spec) => MultiSourceAligner::new(&catalog, spec),
            Err(e) => {
                outcome.errors.push(e.to_string());
                outcome.finish();
                return outcome;
            }
        };
        let grid = match GridSpec::new(aligner.footprint_size(), patch.stride_m, patch.coverage) {
            Ok(spec) => PatchGridGenerator::new(&watershed, spec),
            Err(e) => {
                outcome.errors.push(e.to_string());
                outcome.finish();
                return outcome;
            }
        };

        let limit = self
            .config
            .run
            .max_patches_per_watershed
            .unwrap_or(usize::MAX);
        let centers: Vec<PatchCenter> = grid.centers().take(limit).collect();
        outcome.centers_generated = centers.len();
        info!(
            huc_id = %id,
            name = watershed.name(),
            centers = centers.len(),
            footprint = aligner.footprint_size(),
            "Extracting patches"
        );
        self.emit(ProgressEvent::WatershedStarted {
            watershed_id: id.clone(),
            position,
            total,
            centers: centers.len(),
        });

        let writer = PatchWriter::new(&self.config.paths.output_root);
        let results: Vec<PatchResult> = pool.install(|| {
            centers
                .par_iter()
                .map(|center| {
                    let result = if cancel.is_cancelled() {
                        PatchResult::Cancelled
                    } else {
                        match aligner.align(center) {
                            Ok(stack) => PatchResult::Written(writer.write_stack(&stack)),
                            Err(e) => {
                                debug!(
                                    huc_id = %id,
                                    sequence_index = center.sequence_index,
                                    reason = %e,
                                    "Patch skipped"
                                );
                                PatchResult::Skipped(e)
                            }
                        }
                    };
                    self.emit(ProgressEvent::PatchFinished {
                        watershed_id: id.clone(),
                    });
                    result
                })
                .collect()
        });

        let mut records = Vec::new();
        let mut dem_errors = BTreeSet::new();
        for result in results {
            match result {
                PatchResult::Written(record) => {
                    outcome.record(&record);
                    records.push(record);
                }
                PatchResult::Skipped(AlignError::ReferenceUnreadable(reason)) => {
                    outcome.stacks_skipped += 1;
                    dem_errors.insert(reason);
                }
                PatchResult::Skipped(_) => outcome.stacks_skipped += 1,
                PatchResult::Cancelled => outcome.cancelled = true,
            }
        }
        for reason in dem_errors {
            outcome
                .errors
                .push(format!("reference DEM is unreadable: {}", reason));
        }

        match writer.write_manifest(id, &records) {
            Ok(path) => outcome.manifest = Some(path),
            Err(e) => {
                warn!(huc_id = %id, error = %e, "Manifest write failed");
                outcome.warnings.push(e.to_string());
            }
        }

        outcome.finish();
        outcome
    }
}

/// Sorted watershed ids with a directory under `canonical_root`.
pub fn list_canonical(canonical_root: &Path) -> Result<Vec<WatershedId>, String> {
    let entries = fs::read_dir(canonical_root).map_err(|e| {
        format!(
            "failed to read canonical root {}: {}",
            canonical_root.display(),
            e
        )
    })?;

    let mut ids: Vec<WatershedId> = entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().map(|t| t.is_dir()).unwrap_or(false))
        .filter_map(|entry| WatershedId::parse(&entry.file_name().to_string_lossy()).ok())
        .collect();
    ids.sort();
    Ok(ids)
}

/// Boundary file for a canonical directory: the unbuffered original when
/// present, else the buffered export.
pub fn boundary_path(dir: &Path) -> PathBuf {
    let original = dir.join(ArtifactKind::OriginalBoundary.canonical_filename());
    if original.is_file() {
        original
    } else {
        dir.join(ArtifactKind::Boundary.canonical_filename())
    }
}

/// Load the boundary, move it into the DEM CRS and apply the buffer.
pub fn load_watershed(dir: &Path, catalog: &RasterCatalog, buffer: f64) -> Result<Watershed, String> {
    let path = boundary_path(dir);
    Watershed::load(&path)
        .and_then(|w| w.to_crs(catalog.reference().crs()))
        .and_then(|w| w.with_buffer(buffer))
        .map_err(|e| format!("boundary {}: {}", path.display(), e))
}
