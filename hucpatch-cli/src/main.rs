//! hucpatch CLI - Command-line interface
//!
//! Thin front-end over the `hucpatch` library: reconcile export folders,
//! inspect canonical directories and run the patch extraction pipeline.

mod commands;
mod error;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use hucpatch::config::{config_file_path, RunConfig};
use hucpatch::watershed::WatershedId;

use commands::config::ConfigCommands;
use error::CliError;

#[derive(Parser)]
#[command(name = "hucpatch")]
#[command(author, version, about = "Multi-source raster patch extraction for HUC8 watersheds", long_about = None)]
struct Cli {
    /// Configuration file (default: ~/.hucpatch/config.ini)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Debug logging (RUST_LOG still takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Merge duplicate export folders into canonical directories
    Reconcile {
        /// Folder holding the raw exports (overrides [paths] export_root)
        #[arg(long)]
        export_root: Option<PathBuf>,

        /// Canonical output folder (overrides [paths] canonical_root)
        #[arg(long)]
        canonical_root: Option<PathBuf>,

        /// Only reconcile these HUC8 ids (repeatable)
        #[arg(long = "huc", value_parser = parse_huc)]
        huc_ids: Vec<WatershedId>,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show the rasters of a canonical watershed directory
    Catalog {
        /// Canonical watershed directory
        dir: PathBuf,

        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the patch centers of a canonical watershed directory
    Grid {
        /// Canonical watershed directory
        dir: PathBuf,

        /// Stop after this many centers
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Run the full extraction pipeline
    Run {
        /// Only process these HUC8 ids (repeatable)
        #[arg(long = "huc", value_parser = parse_huc)]
        huc_ids: Vec<WatershedId>,

        /// Worker threads per watershed
        #[arg(long)]
        workers: Option<usize>,

        /// Process at most this many watersheds
        #[arg(long)]
        max_watersheds: Option<usize>,

        /// Write at most this many patches per watershed
        #[arg(long)]
        max_patches: Option<usize>,

        /// Print the summary as JSON
        #[arg(long)]
        json: bool,

        /// Disable the progress bar
        #[arg(long)]
        no_progress: bool,
    },

    /// Inspect configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

fn parse_huc(s: &str) -> Result<WatershedId, String> {
    WatershedId::parse(s).map_err(|e| e.to_string())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), CliError> {
    let config_path = cli.config.unwrap_or_else(config_file_path);
    let mut config = RunConfig::load_from(&config_path)?;
    if cli.verbose {
        config.logging.level = "debug".to_string();
    }
    let _log_guard = hucpatch::logging::init(&config.logging)?;
    tracing::debug!(
        version = hucpatch::VERSION,
        config = %config_path.display(),
        "hucpatch starting"
    );

    match cli.command {
        Commands::Reconcile {
            export_root,
            canonical_root,
            huc_ids,
            json,
        } => commands::reconcile::run(
            commands::reconcile::ReconcileArgs {
                export_root,
                canonical_root,
                huc_ids,
                json,
            },
            &config,
        ),
        Commands::Catalog { dir, json } => commands::catalog::run(&dir, json),
        Commands::Grid { dir, limit } => commands::grid::run(&dir, limit, &config),
        Commands::Run {
            huc_ids,
            workers,
            max_watersheds,
            max_patches,
            json,
            no_progress,
        } => commands::run::run(
            commands::run::RunArgs {
                huc_ids,
                workers,
                max_watersheds,
                max_patches,
                json,
                no_progress,
            },
            &config,
        ),
        Commands::Config { command } => commands::config::run(command, &config_path, &config),
    }
}
