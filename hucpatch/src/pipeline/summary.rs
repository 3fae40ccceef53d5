//! Run and per-watershed outcomes.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Serialize;

use crate::raster::RasterKind;
use crate::reconcile::ReconcileReport;
use crate::watershed::WatershedId;
use crate::writer::{ManifestRecord, SourceStatus};

/// Final state of one watershed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WatershedStatus {
    Succeeded,
    /// Finished with warnings, dropped layers, write failures or
    /// cancellation.
    Partial,
    /// Nothing usable was produced.
    Failed,
}

impl WatershedStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WatershedStatus::Succeeded => "succeeded",
            WatershedStatus::Partial => "partial",
            WatershedStatus::Failed => "failed",
        }
    }
}

/// Per-source tallies across all patches of a watershed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SourceCounts {
    pub valid: usize,
    pub dropped: usize,
    pub write_failed: usize,
}

/// Everything the run did for one watershed.
#[derive(Debug, Clone, Serialize)]
pub struct WatershedOutcome {
    pub watershed_id: WatershedId,
    pub status: WatershedStatus,
    pub centers_generated: usize,
    pub stacks_written: usize,
    /// Centers whose DEM window was unusable.
    pub stacks_skipped: usize,
    pub sources: BTreeMap<RasterKind, SourceCounts>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manifest: Option<PathBuf>,
    pub cancelled: bool,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

impl WatershedOutcome {
    pub fn new(watershed_id: WatershedId) -> Self {
        Self {
            watershed_id,
            status: WatershedStatus::Succeeded,
            centers_generated: 0,
            stacks_written: 0,
            stacks_skipped: 0,
            sources: BTreeMap::new(),
            manifest: None,
            cancelled: false,
            warnings: Vec::new(),
            errors: Vec::new(),
        }
    }

    /// An outcome that failed before any patch work.
    pub fn failed(watershed_id: WatershedId, error: impl Into<String>) -> Self {
        let mut outcome = Self::new(watershed_id);
        outcome.errors.push(error.into());
        outcome.finish();
        outcome
    }

    /// Add one written stack to the tallies.
    pub fn record(&mut self, record: &ManifestRecord) {
        self.stacks_written += 1;
        for (kind, entry) in &record.sources {
            let counts = self.sources.entry(*kind).or_default();
            match entry.status {
                SourceStatus::Written => counts.valid += 1,
                SourceStatus::Dropped => counts.dropped += 1,
                SourceStatus::WriteFailed => counts.write_failed += 1,
            }
        }
    }

    pub fn write_failures(&self) -> usize {
        self.sources.values().map(|c| c.write_failed).sum()
    }

    /// Derive the status from what was recorded.
    pub fn finish(&mut self) {
        self.status = if !self.errors.is_empty() {
            WatershedStatus::Failed
        } else if self.cancelled || !self.warnings.is_empty() || self.write_failures() > 0 {
            WatershedStatus::Partial
        } else {
            WatershedStatus::Succeeded
        };
    }
}

/// Result of a whole run.
#[derive(Debug, Serialize)]
pub struct RunSummary {
    pub watersheds: Vec<WatershedOutcome>,
    /// Failures that affected the run as a whole, such as an unreadable
    /// canonical root.
    pub errors: Vec<String>,
    pub cancelled: bool,
    pub elapsed_secs: f64,
    #[serde(skip)]
    pub reconcile: Option<ReconcileReport>,
}

impl RunSummary {
    pub fn new() -> Self {
        Self {
            watersheds: Vec::new(),
            errors: Vec::new(),
            cancelled: false,
            elapsed_secs: 0.0,
            reconcile: None,
        }
    }

    pub fn get(&self, id: &WatershedId) -> Option<&WatershedOutcome> {
        self.watersheds.iter().find(|w| &w.watershed_id == id)
    }

    pub fn count(&self, status: WatershedStatus) -> usize {
        self.watersheds.iter().filter(|w| w.status == status).count()
    }

    /// True when nothing failed and the run was not cancelled.
    pub fn is_success(&self) -> bool {
        self.errors.is_empty() && !self.cancelled && self.count(WatershedStatus::Failed) == 0
    }

    pub fn to_text(&self) -> String {
        let mut out = String::new();
        out.push_str("Run Summary\n");
        out.push_str("===========\n");
        out.push_str(&format!(
            "Watersheds: {} ({} succeeded, {} partial, {} failed)\n",
            self.watersheds.len(),
            self.count(WatershedStatus::Succeeded),
            self.count(WatershedStatus::Partial),
            self.count(WatershedStatus::Failed)
        ));
        out.push_str(&format!("Elapsed:    {:.1}s\n", self.elapsed_secs));
        if self.cancelled {
            out.push_str("Cancelled:  yes\n");
        }
        for error in &self.errors {
            out.push_str(&format!("error: {}\n", error));
        }

        for ws in &self.watersheds {
            out.push('\n');
            out.push_str(&format!(
                "{}  [{}]  centers {}  written {}  skipped {}{}\n",
                ws.watershed_id,
                ws.status.as_str(),
                ws.centers_generated,
                ws.stacks_written,
                ws.stacks_skipped,
                if ws.cancelled { "  (cancelled)" } else { "" }
            ));
            for (kind, counts) in &ws.sources {
                out.push_str(&format!(
                    "  {:<15} valid {:>5}  dropped {:>5}  write_failed {:>3}\n",
                    kind.as_str(),
                    counts.valid,
                    counts.dropped,
                    counts.write_failed
                ));
            }
            for warning in &ws.warnings {
                out.push_str(&format!("  warning: {}\n", warning));
            }
            for error in &ws.errors {
                out.push_str(&format!("  error: {}\n", error));
            }
        }
        out
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|_| "{}".to_string())
    }
}

impl Default for RunSummary {
    fn default() -> Self {
        Self::new()
    }
}
