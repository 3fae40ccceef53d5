//! Run orchestration.
//!
//! [`PipelineRunner`] ties the stages together for one run:
//!
//! 1. Reconcile export folders into canonical directories (when an export
//!    root is configured)
//! 2. For each canonical watershed, in id order: open the raster catalog,
//!    load the boundary, generate centers
//! 3. Align and write every center on a worker pool
//! 4. Write the watershed manifest
//!
//! Errors are contained per watershed and per patch; the run always ends
//! with a [`RunSummary`]. A [`CancellationFlag`] stops the run between
//! patches, keeping everything already written.

mod cancel;
mod runner;
mod summary;


pub use cancel::CancellationFlag;
pub use runner::{
    boundary_path, list_canonical, load_watershed, PipelineRunner, ProgressCallback, ProgressEvent,
};
pub use summary::{RunSummary, SourceCounts, WatershedOutcome, WatershedStatus};
