//! Configuration CLI commands.
//!
//! Provides `config path` and `config show`. The file is edited by hand.

use std::path::Path;

use clap::Subcommand;
use hucpatch::config::RunConfig;

use crate::error::CliError;

/// Config subcommands.
#[derive(Debug, Subcommand)]
pub enum ConfigCommands {
    /// Show the configuration file path
    Path,

    /// Print the effective configuration as INI
    Show,
}

/// Run a config subcommand.
pub fn run(command: ConfigCommands, path: &Path, config: &RunConfig) -> Result<(), CliError> {
    match command {
        ConfigCommands::Path => {
            println!("{}", path.display());
            if !path.exists() {
                eprintln!("(file does not exist; defaults are in use)");
            }
        }
        ConfigCommands::Show => print!("{}", config.to_ini_string()),
    }
    Ok(())
}
