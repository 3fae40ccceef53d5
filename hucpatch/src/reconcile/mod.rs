//! Export folder reconciliation.
//!
//! The export service writes one folder per watershed, but re-running an
//! export creates siblings with a ` (n)` suffix instead of replacing the
//! original. This module merges those folders into one canonical directory
//! per watershed with fixed file names.
//!
//! # Algorithm
//!
//! 1. **Scan**: list export folders and classify their files
//! 2. **Group**: bucket folders by HUC8 id
//! 3. **Resolve**: per artifact kind, pick the newest file (see
//!    [`select_winner`] for tie-breaking) and install it atomically
//!
//! Reconciliation is idempotent: installed files keep the winner's mtime, so
//! a second pass finds every canonical file up to date.
//!
//! # Example
//!
//! ```ignore
//! use hucpatch::reconcile::{ExportReconciler, ReconcileOptions};
//!
//! let reconciler = ExportReconciler::new(ReconcileOptions::default());
//! let report = reconciler.reconcile_all(&exports, &canonical)?;
//! println!("{}", report.to_text());
//! ```

mod report;
mod resolver;
mod scanner;
mod types;


pub use report::{ReconcileReport, ReconcileStatus, WatershedReconcile};
pub use resolver::{select_winner, Candidate, ExportReconciler, ARCHIVE_DIR_NAME};
pub use scanner::{group, scan};
pub use types::{
    canonical_dir, Action, ArtifactAction, ArtifactKind, ConflictPolicy, Displacement,
    ExportFile, ExportFolder, FolderName, ReconcileError, ReconcileOptions, ReconcileWarning,
    TransferMode,
};

pub(crate) use resolver::partial_path;
