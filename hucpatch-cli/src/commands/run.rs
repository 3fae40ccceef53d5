//! Run command - the full extraction pipeline.

use std::sync::Arc;

use hucpatch::config::RunConfig;
use hucpatch::pipeline::{CancellationFlag, PipelineRunner, ProgressEvent};
use hucpatch::watershed::WatershedId;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

use crate::error::CliError;

/// Arguments for the run command.
pub struct RunArgs {
    pub huc_ids: Vec<WatershedId>,
    pub workers: Option<usize>,
    pub max_watersheds: Option<usize>,
    pub max_patches: Option<usize>,
    pub json: bool,
    pub no_progress: bool,
}

/// Run the run command.
pub fn run(args: RunArgs, config: &RunConfig) -> Result<(), CliError> {
    let mut config = config.clone();
    if !args.huc_ids.is_empty() {
        config.run.huc_ids = args.huc_ids;
    }
    if let Some(workers) = args.workers {
        config.run.workers = workers;
    }
    if args.max_watersheds.is_some() {
        config.run.max_watersheds = args.max_watersheds;
    }
    if args.max_patches.is_some() {
        config.run.max_patches_per_watershed = args.max_patches;
    }
    config.validate()?;

    // Set up signal handler for graceful shutdown
    let cancel = CancellationFlag::new();
    let handler_flag = cancel.clone();
    ctrlc::set_handler(move || {
        eprintln!();
        eprintln!("Cancelling, waiting for in-flight patches...");
        handler_flag.cancel();
    })
    .map_err(|e| CliError::Signal(e.to_string()))?;

    info!(
        canonical_root = %config.paths.canonical_root.display(),
        output_root = %config.paths.output_root.display(),
        "Starting run"
    );

    let mut runner = PipelineRunner::new(config);
    let bar = (!args.no_progress).then(progress_bar);
    if let Some(bar) = &bar {
        let bar = bar.clone();
        runner = runner.with_progress(Arc::new(move |event| on_progress(&bar, event)));
    }

    let summary = runner.run(&cancel);
    if let Some(bar) = bar {
        bar.finish_and_clear();
    }

    if args.json {
        println!("{}", summary.to_json());
    } else {
        print!("{}", summary.to_text());
    }

    if summary.is_success() {
        Ok(())
    } else if summary.cancelled {
        Err(CliError::Incomplete("run cancelled".to_string()))
    } else {
        Err(CliError::Incomplete("run finished with failures".to_string()))
    }
}

fn progress_bar() -> ProgressBar {
    let bar = ProgressBar::new(0);
    let style = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")
        .map(|s| s.progress_chars("=> "))
        .unwrap_or_else(|_| ProgressStyle::default_bar());
    bar.set_style(style);
    bar
}

fn on_progress(bar: &ProgressBar, event: &ProgressEvent) {
    match event {
        ProgressEvent::WatershedStarted {
            watershed_id,
            position,
            total,
            centers,
        } => {
            bar.set_length(*centers as u64);
            bar.set_position(0);
            bar.set_message(format!("{} ({}/{})", watershed_id, position + 1, total));
        }
        ProgressEvent::PatchFinished { .. } => bar.inc(1),
        ProgressEvent::WatershedFinished { watershed_id } => {
            bar.println(format!("{} done", watershed_id));
        }
    }
}
