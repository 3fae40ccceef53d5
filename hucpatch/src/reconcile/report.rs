//! Reconciliation reports.
//!
//! Every change made to a canonical directory, and every candidate that lost,
//! is listed here. Reports render as plain text for the terminal or JSON for
//! tooling.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{json, Value};

use super::types::{Action, ArtifactAction, Displacement, ReconcileError, ReconcileWarning};
use crate::watershed::WatershedId;

/// Overall result for one watershed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileStatus {
    Clean,
    Warnings,
    Failed,
}

impl ReconcileStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReconcileStatus::Clean => "clean",
            ReconcileStatus::Warnings => "warnings",
            ReconcileStatus::Failed => "failed",
        }
    }
}

/// Everything reconciliation did for one watershed.
#[derive(Debug)]
pub struct WatershedReconcile {
    pub watershed_id: WatershedId,
    pub canonical_dir: PathBuf,
    /// Export folders that took part, in scan order.
    pub folders: Vec<PathBuf>,
    pub actions: Vec<ArtifactAction>,
    pub warnings: Vec<ReconcileWarning>,
    pub errors: Vec<ReconcileError>,
}

impl WatershedReconcile {
    pub fn new(watershed_id: WatershedId, canonical_dir: PathBuf) -> Self {
        Self {
            watershed_id,
            canonical_dir,
            folders: Vec::new(),
            actions: Vec::new(),
            warnings: Vec::new(),
            errors: Vec::new(),
        }
    }

    pub fn status(&self) -> ReconcileStatus {
        if !self.errors.is_empty() {
            ReconcileStatus::Failed
        } else if !self.warnings.is_empty() {
            ReconcileStatus::Warnings
        } else {
            ReconcileStatus::Clean
        }
    }

    /// Count of actions with the given label.
    pub fn count(&self, label: &str) -> usize {
        self.actions
            .iter()
            .filter(|a| a.action.label() == label)
            .count()
    }
}

/// Result of a reconciliation pass over an export root.
#[derive(Debug)]
pub struct ReconcileReport {
    pub export_root: PathBuf,
    pub canonical_root: PathBuf,
    pub watersheds: Vec<WatershedReconcile>,
}

impl ReconcileReport {
    pub fn new(export_root: &Path, canonical_root: &Path) -> Self {
        Self {
            export_root: export_root.to_path_buf(),
            canonical_root: canonical_root.to_path_buf(),
            watersheds: Vec::new(),
        }
    }

    pub fn get(&self, id: &WatershedId) -> Option<&WatershedReconcile> {
        self.watersheds.iter().find(|w| &w.watershed_id == id)
    }

    pub fn failed_count(&self) -> usize {
        self.watersheds
            .iter()
            .filter(|w| w.status() == ReconcileStatus::Failed)
            .count()
    }

    fn total(&self, label: &str) -> usize {
        self.watersheds.iter().map(|w| w.count(label)).sum()
    }

    /// Human-readable report.
    pub fn to_text(&self) -> String {
        let mut out = String::new();
        out.push_str("Reconcile Report\n");
        out.push_str("================\n");
        out.push_str(&format!("Export root:    {}\n", self.export_root.display()));
        out.push_str(&format!("Canonical root: {}\n", self.canonical_root.display()));

        for ws in &self.watersheds {
            out.push('\n');
            out.push_str(&format!(
                "{}  [{}]  {} folder(s) -> {}\n",
                ws.watershed_id,
                ws.status().as_str(),
                ws.folders.len(),
                ws.canonical_dir.display()
            ));
            for action in &ws.actions {
                out.push_str(&format!("  {:<11} {}", action.action.label(), action.kind));
                match &action.action {
                    Action::Installed { source, .. } => {
                        out.push_str(&format!(" <- {}", source.display()));
                    }
                    Action::Replaced {
                        source, displaced, ..
                    } => {
                        out.push_str(&format!(" <- {}", source.display()));
                        match displaced {
                            Displacement::Archived(path) => {
                                out.push_str(&format!(" (old archived to {})", path.display()))
                            }
                            Displacement::Discarded => out.push_str(" (old discarded)"),
                        }
                    }
                    Action::UpToDate => {}
                    Action::Superseded { path, modified } => {
                        out.push_str(&format!(
                            " by newer export, loser {} ({})",
                            path.display(),
                            format_time(*modified)
                        ));
                    }
                }
                out.push('\n');
            }
            for warning in &ws.warnings {
                out.push_str(&format!("  warning: {}\n", warning));
            }
            for error in &ws.errors {
                out.push_str(&format!("  error: {}\n", error));
            }
        }

        out.push('\n');
        out.push_str(&format!(
            "Summary: {} watershed(s), {} installed, {} replaced, {} up to date, {} superseded, {} failed\n",
            self.watersheds.len(),
            self.total("installed"),
            self.total("replaced"),
            self.total("up-to-date"),
            self.total("superseded"),
            self.failed_count()
        ));
        out
    }

    /// JSON report.
    pub fn to_json(&self) -> String {
        let watersheds: Vec<Value> = self
            .watersheds
            .iter()
            .map(|ws| {
                json!({
                    "watershed_id": ws.watershed_id.as_str(),
                    "status": ws.status().as_str(),
                    "canonical_dir": ws.canonical_dir.display().to_string(),
                    "folders": ws.folders.iter().map(|p| p.display().to_string()).collect::<Vec<_>>(),
                    "actions": ws.actions.iter().map(action_json).collect::<Vec<_>>(),
                    "warnings": ws.warnings.iter().map(|w| w.to_string()).collect::<Vec<_>>(),
                    "errors": ws.errors.iter().map(|e| e.to_string()).collect::<Vec<_>>(),
                })
            })
            .collect();

        let report = json!({
            "export_root": self.export_root.display().to_string(),
            "canonical_root": self.canonical_root.display().to_string(),
            "watersheds": watersheds,
            "totals": {
                "installed": self.total("installed"),
                "replaced": self.total("replaced"),
                "up_to_date": self.total("up-to-date"),
                "superseded": self.total("superseded"),
                "failed": self.failed_count(),
            },
        });
        serde_json::to_string_pretty(&report).unwrap_or_else(|_| "{}".to_string())
    }
}

fn action_json(action: &ArtifactAction) -> Value {
    let mut value = json!({
        "kind": action.kind.canonical_filename(),
        "action": action.action.label(),
        "target": action.target.display().to_string(),
    });
    let extra = match &action.action {
        Action::Installed { source, modified } => json!({
            "source": source.display().to_string(),
            "modified": format_time(*modified),
        }),
        Action::Replaced {
            source,
            modified,
            displaced,
        } => json!({
            "source": source.display().to_string(),
            "modified": format_time(*modified),
            "displaced": match displaced {
                Displacement::Archived(path) => path.display().to_string(),
                Displacement::Discarded => "discarded".to_string(),
            },
        }),
        Action::UpToDate => json!({}),
        Action::Superseded { path, modified } => json!({
            "path": path.display().to_string(),
            "modified": format_time(*modified),
        }),
    };
    if let (Some(obj), Value::Object(extra)) = (value.as_object_mut(), extra) {
        obj.extend(extra);
    }
    value
}

fn format_time(time: SystemTime) -> String {
    DateTime::<Utc>::from(time).to_rfc3339_opts(SecondsFormat::Secs, true)
}
