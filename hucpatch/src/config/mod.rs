//! Configuration file handling.
//!
//! Settings live in an INI file at `~/.hucpatch/config.ini` (or a path given
//! on the command line). A missing file yields the defaults. Every value is
//! checked by [`RunConfig::validate`] before any work starts.
//!
//! ```ini
//! [paths]
//! export_root = ~/exports
//! canonical_root = ~/hucpatch/canonical
//! output_root = ~/hucpatch/patches
//!
//! [patch]
//! size_px = 256
//! stride_m = 2560
//! buffer_m = 0
//! min_overlap = 0.5
//! coverage = boundary
//!
//! [reconcile]
//! mtime_tolerance_secs = 2
//! transfer = copy
//! conflict_policy = archive
//!
//! [run]
//! workers = 8
//! huc_ids = 06010105, 03020201
//! max_watersheds =
//! max_patches_per_watershed =
//!
//! [logging]
//! level = info
//! directory =
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use ini::Ini;
use thiserror::Error;

use crate::grid::Coverage;
use crate::reconcile::{ConflictPolicy, TransferMode};
use crate::watershed::WatershedId;

/// Name of the per-user configuration directory under the home directory.
const CONFIG_DIR_NAME: &str = ".hucpatch";

/// Name of the configuration file.
const CONFIG_FILE_NAME: &str = "config.ini";

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file exists but could not be read or parsed.
    #[error("failed to read config {path}: {source}")]
    Read { path: PathBuf, source: ini::Error },

    /// The file could not be parsed as INI.
    #[error("failed to parse config: {0}")]
    Parse(String),

    /// A key holds a value of the wrong shape.
    #[error("invalid value '{value}' for {key}: {reason}")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },

    /// A value parsed but is outside the accepted range.
    #[error("invalid configuration: {key} {reason}")]
    Validation { key: &'static str, reason: String },
}

/// `[paths]` section.
#[derive(Debug, Clone, PartialEq)]
pub struct PathsConfig {
    /// Folder holding raw export folders. Reconciliation is skipped when unset.
    pub export_root: Option<PathBuf>,
    /// One `<huc>/` directory per reconciled watershed.
    pub canonical_root: PathBuf,
    /// Patch dataset output.
    pub output_root: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            export_root: None,
            canonical_root: PathBuf::from("canonical"),
            output_root: PathBuf::from("patches"),
        }
    }
}

/// `[patch]` section.
#[derive(Debug, Clone, PartialEq)]
pub struct PatchConfig {
    /// Patch edge length in reference (DEM) pixels.
    pub size_px: u32,
    /// Distance between neighbouring centers, in DEM CRS units.
    pub stride_m: f64,
    /// Buffer around the boundary, in DEM CRS units.
    pub buffer_m: f64,
    /// Minimum fraction of a window a source must cover to be kept.
    pub min_overlap: f64,
    pub coverage: Coverage,
}

impl Default for PatchConfig {
    fn default() -> Self {
        Self {
            size_px: 256,
            stride_m: 2560.0,
            buffer_m: 0.0,
            min_overlap: 0.5,
            coverage: Coverage::Boundary,
        }
    }
}

/// `[reconcile]` section.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconcileConfig {
    pub mtime_tolerance_secs: u64,
    pub transfer: TransferMode,
    pub conflict_policy: ConflictPolicy,
}

impl ReconcileConfig {
    pub fn mtime_tolerance(&self) -> Duration {
        Duration::from_secs(self.mtime_tolerance_secs)
    }
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            mtime_tolerance_secs: 2,
            transfer: TransferMode::Copy,
            conflict_policy: ConflictPolicy::Archive,
        }
    }
}

/// `[run]` section.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSettings {
    /// Threads in the per-watershed align/write pool.
    pub workers: usize,
    /// Restrict the run to these watersheds. Empty means all.
    pub huc_ids: Vec<WatershedId>,
    /// Test-mode cap on the number of watersheds processed.
    pub max_watersheds: Option<usize>,
    /// Test-mode cap on the number of centers per watershed.
    pub max_patches_per_watershed: Option<usize>,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            huc_ids: Vec::new(),
            max_watersheds: None,
            max_patches_per_watershed: None,
        }
    }
}

/// `[logging]` section.
#[derive(Debug, Clone, PartialEq)]
pub struct LoggingConfig {
    /// Default filter directive, overridden by `RUST_LOG`.
    pub level: String,
    /// When set, logs are also written to `<directory>/hucpatch.log`.
    pub directory: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            directory: None,
        }
    }
}

/// Complete run configuration.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunConfig {
    pub paths: PathsConfig,
    pub patch: PatchConfig,
    pub reconcile: ReconcileConfig,
    pub run: RunSettings,
    pub logging: LoggingConfig,
}

/// `~/.hucpatch`, or `./.hucpatch` when no home directory is known.
pub fn config_directory() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(CONFIG_DIR_NAME)
}

/// Default configuration file path.
pub fn config_file_path() -> PathBuf {
    config_directory().join(CONFIG_FILE_NAME)
}

impl RunConfig {
    /// Load from the default path, falling back to defaults if it is absent.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&config_file_path())
    }

    /// Load from `path`, falling back to defaults if it is absent.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "No config file, using defaults");
            return Ok(Self::default());
        }
        let ini = Ini::load_from_file(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_ini(&ini)
    }

    /// Parse an INI document held in memory.
    pub fn from_ini_str(text: &str) -> Result<Self, ConfigError> {
        let ini = Ini::load_from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        Self::from_ini(&ini)
    }

    fn from_ini(ini: &Ini) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(section) = ini.section(Some("paths")) {
            if let Some(v) = non_empty(section.get("export_root")) {
                config.paths.export_root = Some(expand_tilde(v));
            }
            if let Some(v) = non_empty(section.get("canonical_root")) {
                config.paths.canonical_root = expand_tilde(v);
            }
            if let Some(v) = non_empty(section.get("output_root")) {
                config.paths.output_root = expand_tilde(v);
            }
        }

        if let Some(section) = ini.section(Some("patch")) {
            if let Some(v) = non_empty(section.get("size_px")) {
                config.patch.size_px = parse_value("patch.size_px", v)?;
            }
            if let Some(v) = non_empty(section.get("stride_m")) {
                config.patch.stride_m = parse_value("patch.stride_m", v)?;
            }
            if let Some(v) = non_empty(section.get("buffer_m")) {
                config.patch.buffer_m = parse_value("patch.buffer_m", v)?;
            }
            if let Some(v) = non_empty(section.get("min_overlap")) {
                config.patch.min_overlap = parse_value("patch.min_overlap", v)?;
            }
            if let Some(v) = non_empty(section.get("coverage")) {
                config.patch.coverage = Coverage::from_config_str(v).ok_or_else(|| {
                    invalid("patch.coverage", v, "expected 'boundary' or 'bounding_rect'")
                })?;
            }
        }

        if let Some(section) = ini.section(Some("reconcile")) {
            if let Some(v) = non_empty(section.get("mtime_tolerance_secs")) {
                config.reconcile.mtime_tolerance_secs =
                    parse_value("reconcile.mtime_tolerance_secs", v)?;
            }
            if let Some(v) = non_empty(section.get("transfer")) {
                config.reconcile.transfer = TransferMode::from_config_str(v)
                    .ok_or_else(|| invalid("reconcile.transfer", v, "expected 'copy' or 'move'"))?;
            }
            if let Some(v) = non_empty(section.get("conflict_policy")) {
                config.reconcile.conflict_policy =
                    ConflictPolicy::from_config_str(v).ok_or_else(|| {
                        invalid(
                            "reconcile.conflict_policy",
                            v,
                            "expected 'archive' or 'discard'",
                        )
                    })?;
            }
        }

        if let Some(section) = ini.section(Some("run")) {
            if let Some(v) = non_empty(section.get("workers")) {
                config.run.workers = parse_value("run.workers", v)?;
            }
            if let Some(v) = non_empty(section.get("huc_ids")) {
                config.run.huc_ids = parse_huc_list(v)?;
            }
            if let Some(v) = non_empty(section.get("max_watersheds")) {
                config.run.max_watersheds = Some(parse_value("run.max_watersheds", v)?);
            }
            if let Some(v) = non_empty(section.get("max_patches_per_watershed")) {
                config.run.max_patches_per_watershed =
                    Some(parse_value("run.max_patches_per_watershed", v)?);
            }
        }

        if let Some(section) = ini.section(Some("logging")) {
            if let Some(v) = non_empty(section.get("level")) {
                config.logging.level = v.to_string();
            }
            if let Some(v) = non_empty(section.get("directory")) {
                config.logging.directory = Some(expand_tilde(v));
            }
        }

        Ok(config)
    }

    /// Check every value before a run starts.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let patch = &self.patch;
        if patch.size_px == 0 {
            return Err(validation("patch.size_px", "must be greater than zero"));
        }
        if !patch.stride_m.is_finite() || patch.stride_m <= 0.0 {
            return Err(validation(
                "patch.stride_m",
                format!("must be a positive number, got {}", patch.stride_m),
            ));
        }
        if !patch.buffer_m.is_finite() || patch.buffer_m < 0.0 {
            return Err(validation(
                "patch.buffer_m",
                format!("must be zero or positive, got {}", patch.buffer_m),
            ));
        }
        if !(patch.min_overlap > 0.0 && patch.min_overlap <= 1.0) {
            return Err(validation(
                "patch.min_overlap",
                format!("must be in (0, 1], got {}", patch.min_overlap),
            ));
        }
        if self.run.workers == 0 {
            return Err(validation("run.workers", "must be at least 1"));
        }
        if self.paths.canonical_root.as_os_str().is_empty() {
            return Err(validation("paths.canonical_root", "must not be empty"));
        }
        if self.paths.output_root.as_os_str().is_empty() {
            return Err(validation("paths.output_root", "must not be empty"));
        }
        Ok(())
    }

    /// Render the configuration as INI text, for `config show`.
    pub fn to_ini_string(&self) -> String {
        let mut ini = Ini::new();
        ini.with_section(Some("paths"))
            .set(
                "export_root",
                self.paths
                    .export_root
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_default(),
            )
            .set(
                "canonical_root",
                self.paths.canonical_root.display().to_string(),
            )
            .set("output_root", self.paths.output_root.display().to_string());
        ini.with_section(Some("patch"))
            .set("size_px", self.patch.size_px.to_string())
            .set("stride_m", self.patch.stride_m.to_string())
            .set("buffer_m", self.patch.buffer_m.to_string())
            .set("min_overlap", self.patch.min_overlap.to_string())
            .set("coverage", self.patch.coverage.as_str());
        ini.with_section(Some("reconcile"))
            .set(
                "mtime_tolerance_secs",
                self.reconcile.mtime_tolerance_secs.to_string(),
            )
            .set("transfer", self.reconcile.transfer.as_str())
            .set("conflict_policy", self.reconcile.conflict_policy.as_str());
        ini.with_section(Some("run"))
            .set("workers", self.run.workers.to_string())
            .set(
                "huc_ids",
                self.run
                    .huc_ids
                    .iter()
                    .map(|id| id.as_str())
                    .collect::<Vec<_>>()
                    .join(", "),
            )
            .set(
                "max_watersheds",
                self.run
                    .max_watersheds
                    .map(|n| n.to_string())
                    .unwrap_or_default(),
            )
            .set(
                "max_patches_per_watershed",
                self.run
                    .max_patches_per_watershed
                    .map(|n| n.to_string())
                    .unwrap_or_default(),
            );
        ini.with_section(Some("logging"))
            .set("level", self.logging.level.clone())
            .set(
                "directory",
                self.logging
                    .directory
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_default(),
            );

        let mut buf = Vec::new();
        if ini.write_to(&mut buf).is_err() {
            return String::new();
        }
        String::from_utf8_lossy(&buf).into_owned()
    }
}

/// Parse a comma or whitespace separated list of HUC8 ids.
pub fn parse_huc_list(value: &str) -> Result<Vec<WatershedId>, ConfigError> {
    value
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|s| !s.is_empty())
        .map(|s| {
            WatershedId::parse(s).map_err(|e| invalid("run.huc_ids", s, &e.to_string()))
        })
        .collect()
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn parse_value<T>(key: &str, value: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .parse::<T>()
        .map_err(|e| invalid(key, value, &e.to_string()))
}

fn invalid(key: &str, value: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn validation(key: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Validation {
        key,
        reason: reason.into(),
    }
}

fn expand_tilde(value: &str) -> PathBuf {
    if let Some(rest) = value.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(value)
}
