//! CLI error type.

use std::fmt;

use hucpatch::config::ConfigError;
use hucpatch::logging::LoggingError;
use hucpatch::raster::CatalogError;
use hucpatch::reconcile::ReconcileError;

/// Errors surfaced to the user by a command.
#[derive(Debug)]
pub enum CliError {
    /// Configuration could not be loaded or is incomplete.
    Config(String),
    Logging(LoggingError),
    Catalog(CatalogError),
    /// A watershed boundary could not be loaded or projected.
    Boundary(String),
    Reconcile(ReconcileError),
    /// The Ctrl+C handler could not be installed.
    Signal(String),
    /// The command ran but some work failed; details were already printed.
    Incomplete(String),
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::Config(msg) => write!(f, "Configuration error: {}", msg),
            CliError::Logging(e) => write!(f, "Logging setup failed: {}", e),
            CliError::Catalog(e) => write!(f, "{}", e),
            CliError::Boundary(msg) => write!(f, "{}", msg),
            CliError::Reconcile(e) => write!(f, "Reconciliation failed: {}", e),
            CliError::Signal(msg) => write!(f, "Failed to install Ctrl+C handler: {}", msg),
            CliError::Incomplete(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for CliError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CliError::Logging(e) => Some(e),
            CliError::Catalog(e) => Some(e),
            CliError::Reconcile(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ConfigError> for CliError {
    fn from(e: ConfigError) -> Self {
        CliError::Config(e.to_string())
    }
}

impl From<LoggingError> for CliError {
    fn from(e: LoggingError) -> Self {
        CliError::Logging(e)
    }
}

impl From<CatalogError> for CliError {
    fn from(e: CatalogError) -> Self {
        CliError::Catalog(e)
    }
}

impl From<ReconcileError> for CliError {
    fn from(e: ReconcileError) -> Self {
        CliError::Reconcile(e)
    }
}
