//! Core types for export reconciliation.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::{Duration, SystemTime};

use regex::Regex;

use crate::config::ReconcileConfig;
use crate::raster::RasterKind;
use crate::watershed::WatershedId;

/// Kind of file an export folder can contribute to a canonical directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ArtifactKind {
    /// Buffered boundary polygon.
    Boundary,
    /// Export region rectangle.
    BoundingBox,
    /// Unbuffered boundary polygon. Optional.
    OriginalBoundary,
    Raster(RasterKind),
}

impl ArtifactKind {
    /// Every artifact kind, vectors first.
    pub const ALL: [ArtifactKind; 8] = [
        ArtifactKind::Boundary,
        ArtifactKind::BoundingBox,
        ArtifactKind::OriginalBoundary,
        ArtifactKind::Raster(RasterKind::Dem),
        ArtifactKind::Raster(RasterKind::Optical),
        ArtifactKind::Raster(RasterKind::Thermal),
        ArtifactKind::Raster(RasterKind::SarVv),
        ArtifactKind::Raster(RasterKind::FlowDirection),
    ];

    /// Fixed file name in the canonical directory.
    pub fn canonical_filename(&self) -> &'static str {
        match self {
            ArtifactKind::Boundary => "boundary.geojson",
            ArtifactKind::BoundingBox => "bounding_box.geojson",
            ArtifactKind::OriginalBoundary => "original_boundary.geojson",
            ArtifactKind::Raster(kind) => kind.canonical_filename(),
        }
    }

    /// Whether a missing artifact of this kind is worth a warning.
    pub fn is_optional(&self) -> bool {
        matches!(self, ArtifactKind::OriginalBoundary)
    }

    /// Classify an export file name by its marker and extension.
    pub fn classify(file_name: &str) -> Option<ArtifactKind> {
        let lower = file_name.to_ascii_lowercase();
        let is_vector = lower.ends_with(".geojson") || lower.ends_with(".json");
        let is_raster = lower.ends_with(".tif") || lower.ends_with(".tiff");

        if is_vector {
            if file_name.contains("_Buffered_Boundary") {
                return Some(ArtifactKind::Boundary);
            }
            if file_name.contains("_BoundingBox") {
                return Some(ArtifactKind::BoundingBox);
            }
            if file_name.contains("_Original_Boundary")
                || file_name.contains("_Original_Boundaries")
            {
                return Some(ArtifactKind::OriginalBoundary);
            }
            return None;
        }

        if is_raster {
            return RasterKind::ALL
                .into_iter()
                .find(|kind| file_name.contains(kind.export_marker()))
                .map(ArtifactKind::Raster);
        }

        None
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.canonical_filename())
    }
}

/// An export folder name split into its parts.
///
/// Export folders are named `<prefix>_<huc8>_<name>`; the export service
/// appends ` (n)` when a folder of the same name already exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderName {
    pub prefix: String,
    pub watershed_id: WatershedId,
    pub name: String,
    /// `0` when the folder carries no duplicate suffix.
    pub duplicate_index: u32,
}

/// Pattern: `<prefix>_<huc8>_<name>[ (<n>)]`
/// Example: `HUC8_07080101_Boone (1)`
fn folder_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        // The name is lazy so a trailing ` (n)` lands in `dup`.
        Regex::new(r"^(?P<prefix>[A-Za-z0-9]+)_(?P<id>\d{8})_(?P<name>.*?)(?: \((?P<dup>\d+)\))?$")
            .unwrap()
    })
}

impl FolderName {
    /// Parse an export folder name, returning `None` for anything else.
    pub fn parse(folder_name: &str) -> Option<Self> {
        let caps = folder_pattern().captures(folder_name)?;
        let watershed_id = WatershedId::parse(&caps["id"]).ok()?;
        let duplicate_index = match caps.name("dup") {
            Some(m) => m.as_str().parse().ok()?,
            None => 0,
        };
        Some(Self {
            prefix: caps["prefix"].to_string(),
            watershed_id,
            name: caps["name"].to_string(),
            duplicate_index,
        })
    }
}

/// A classified file inside an export folder.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportFile {
    pub kind: ArtifactKind,
    pub path: PathBuf,
    pub modified: SystemTime,
    pub size: u64,
}

/// One export folder found under the export root.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportFolder {
    pub path: PathBuf,
    /// Directory name as found on disk.
    pub folder_name: String,
    pub watershed_id: WatershedId,
    pub duplicate_index: u32,
    pub files: Vec<ExportFile>,
    /// Files whose names match no artifact marker.
    pub unrecognized: Vec<PathBuf>,
}

/// How a winning export file reaches the canonical directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransferMode {
    /// Leave the export folder untouched.
    #[default]
    Copy,
    /// Remove the winning file from its export folder.
    Move,
}

impl TransferMode {
    pub fn from_config_str(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "copy" => Some(TransferMode::Copy),
            "move" => Some(TransferMode::Move),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransferMode::Copy => "copy",
            TransferMode::Move => "move",
        }
    }
}

/// What happens to a canonical file that is being replaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConflictPolicy {
    /// Move it into `<canonical>/.archive/`.
    #[default]
    Archive,
    /// Delete it.
    Discard,
}

impl ConflictPolicy {
    pub fn from_config_str(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "archive" => Some(ConflictPolicy::Archive),
            "discard" => Some(ConflictPolicy::Discard),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictPolicy::Archive => "archive",
            ConflictPolicy::Discard => "discard",
        }
    }
}

/// Settings for a reconciliation pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReconcileOptions {
    /// Candidates this close to the newest mtime are treated as tied.
    pub mtime_tolerance: Duration,
    pub transfer: TransferMode,
    pub conflict_policy: ConflictPolicy,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self::from(&ReconcileConfig::default())
    }
}

impl From<&ReconcileConfig> for ReconcileOptions {
    fn from(config: &ReconcileConfig) -> Self {
        Self {
            mtime_tolerance: config.mtime_tolerance(),
            transfer: config.transfer,
            conflict_policy: config.conflict_policy,
        }
    }
}

/// Where a displaced canonical file went.
#[derive(Debug, Clone, PartialEq)]
pub enum Displacement {
    Archived(PathBuf),
    Discarded,
}

/// What reconciliation did for one artifact.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// The winner was written where no canonical file existed.
    Installed { source: PathBuf, modified: SystemTime },
    /// The winner replaced an older canonical file.
    Replaced {
        source: PathBuf,
        modified: SystemTime,
        displaced: Displacement,
    },
    /// The canonical file is at least as new as every candidate.
    UpToDate,
    /// A losing candidate, left in its export folder.
    Superseded { path: PathBuf, modified: SystemTime },
}

impl Action {
    pub fn label(&self) -> &'static str {
        match self {
            Action::Installed { .. } => "installed",
            Action::Replaced { .. } => "replaced",
            Action::UpToDate => "up-to-date",
            Action::Superseded { .. } => "superseded",
        }
    }
}

/// An action applied to one artifact of a watershed.
#[derive(Debug, Clone, PartialEq)]
pub struct ArtifactAction {
    pub kind: ArtifactKind,
    /// Canonical file path.
    pub target: PathBuf,
    pub action: Action,
}

/// Non-fatal findings for a watershed.
#[derive(Debug, Clone, PartialEq)]
pub enum ReconcileWarning {
    /// Neither the exports nor the canonical directory have this artifact.
    MissingArtifact(ArtifactKind),
    /// An export file matched no artifact marker.
    UnrecognizedFile(PathBuf),
}

impl fmt::Display for ReconcileWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReconcileWarning::MissingArtifact(kind) => {
                write!(f, "missing artifact {}", kind)
            }
            ReconcileWarning::UnrecognizedFile(path) => {
                write!(f, "unrecognized export file {}", path.display())
            }
        }
    }
}

/// Errors raised while reconciling.
#[derive(Debug)]
pub enum ReconcileError {
    /// No export folder exists for a requested watershed.
    NoExportFolders(WatershedId),

    /// A directory or file could not be read.
    ReadFailed { path: PathBuf, source: io::Error },

    /// The canonical or archive directory could not be created.
    CreateDirectoryFailed { path: PathBuf, source: io::Error },

    /// Copying or moving a winner into place failed.
    TransferFailed {
        from: PathBuf,
        to: PathBuf,
        source: io::Error,
    },

    /// A displaced canonical file could not be archived or removed.
    ArchiveFailed { path: PathBuf, source: io::Error },
}

impl fmt::Display for ReconcileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReconcileError::NoExportFolders(id) => {
                write!(f, "no export folders found for watershed {}", id)
            }
            ReconcileError::ReadFailed { path, source } => {
                write!(f, "failed to read {}: {}", path.display(), source)
            }
            ReconcileError::CreateDirectoryFailed { path, source } => {
                write!(
                    f,
                    "failed to create directory {}: {}",
                    path.display(),
                    source
                )
            }
            ReconcileError::TransferFailed { from, to, source } => {
                write!(
                    f,
                    "failed to transfer {} to {}: {}",
                    from.display(),
                    to.display(),
                    source
                )
            }
            ReconcileError::ArchiveFailed { path, source } => {
                write!(f, "failed to displace {}: {}", path.display(), source)
            }
        }
    }
}

impl std::error::Error for ReconcileError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ReconcileError::ReadFailed { source, .. }
            | ReconcileError::CreateDirectoryFailed { source, .. }
            | ReconcileError::TransferFailed { source, .. }
            | ReconcileError::ArchiveFailed { source, .. } => Some(source),
            ReconcileError::NoExportFolders(_) => None,
        }
    }
}

/// Canonical directory for a watershed under `canonical_root`.
pub fn canonical_dir(canonical_root: &Path, id: &WatershedId) -> PathBuf {
    canonical_root.join(id.as_str())
}
