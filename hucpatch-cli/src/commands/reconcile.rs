//! Reconcile command - merge duplicate export folders.

use std::path::PathBuf;

use hucpatch::config::RunConfig;
use hucpatch::reconcile::{ExportReconciler, ReconcileOptions};
use hucpatch::watershed::WatershedId;

use crate::error::CliError;

/// Arguments for the reconcile command.
pub struct ReconcileArgs {
    pub export_root: Option<PathBuf>,
    pub canonical_root: Option<PathBuf>,
    pub huc_ids: Vec<WatershedId>,
    pub json: bool,
}

/// Run the reconcile command.
pub fn run(args: ReconcileArgs, config: &RunConfig) -> Result<(), CliError> {
    // CLI takes precedence, then config
    let export_root = args
        .export_root
        .or_else(|| config.paths.export_root.clone())
        .ok_or_else(|| {
            CliError::Config(
                "no export root. Set export_root in [paths] or use --export-root".to_string(),
            )
        })?;
    let canonical_root = args
        .canonical_root
        .unwrap_or_else(|| config.paths.canonical_root.clone());
    let huc_ids = if args.huc_ids.is_empty() {
        config.run.huc_ids.clone()
    } else {
        args.huc_ids
    };

    let reconciler = ExportReconciler::new(ReconcileOptions::from(&config.reconcile));
    let report = if huc_ids.is_empty() {
        reconciler.reconcile_all(&export_root, &canonical_root)?
    } else {
        reconciler.reconcile_ids(&export_root, &canonical_root, &huc_ids)?
    };

    if args.json {
        println!("{}", report.to_json());
    } else {
        print!("{}", report.to_text());
    }

    match report.failed_count() {
        0 => Ok(()),
        n => Err(CliError::Incomplete(format!(
            "{} watershed(s) failed to reconcile",
            n
        ))),
    }
}
