//! Run reporting: one outcome per repository, rolled up at the end.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Final state of one repository after its pipeline ran (or didn't).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RepoStatus {
    /// Mirror and all metadata categories captured.
    Success,
    /// Mirror succeeded, one or more metadata categories failed.
    Partial,
    /// Mirror sync (or archive) failed; no archive was produced.
    Failed,
    /// Removed by a filter rule before any work.
    Filtered,
    /// Skipped: destination already populated, or run cancelled.
    Skipped,
}

impl fmt::Display for RepoStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RepoStatus::Success => "success",
            RepoStatus::Partial => "partial",
            RepoStatus::Failed => "failed",
            RepoStatus::Filtered => "filtered",
            RepoStatus::Skipped => "skipped",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepoOutcome {
    /// `workspace/slug`
    pub full_name: String,
    pub status: RepoStatus,
    /// Archive size on disk, zero when no archive was written.
    #[serde(default)]
    pub archive_bytes: u64,
    #[serde(default)]
    pub metadata_items: usize,
    /// Metadata categories that failed, for partial outcomes.
    #[serde(default)]
    pub failed_categories: Vec<String>,
    #[serde(default)]
    pub restored_items: usize,
    /// Human-readable cause for failed/filtered/skipped outcomes.
    #[serde(default)]
    pub error: Option<String>,
}

impl RepoOutcome {
    pub fn new(full_name: impl Into<String>, status: RepoStatus) -> Self {
        Self {
            full_name: full_name.into(),
            status,
            archive_bytes: 0,
            metadata_items: 0,
            failed_categories: Vec::new(),
            restored_items: 0,
            error: None,
        }
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

/// Everything the engine learned in one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub migration_mode: bool,
    pub outcomes: Vec<RepoOutcome>,
    /// Workspaces whose repository listing failed, as `(workspace, cause)`.
    /// Their repositories never reached the pipeline and have no outcome.
    #[serde(default)]
    pub workspace_failures: Vec<(String, String)>,
}

impl RunReport {
    pub fn new(
        started_at: DateTime<Utc>,
        migration_mode: bool,
        mut outcomes: Vec<RepoOutcome>,
    ) -> Self {
        outcomes.sort_by(|a, b| a.full_name.cmp(&b.full_name));
        Self {
            started_at,
            finished_at: Utc::now(),
            migration_mode,
            outcomes,
            workspace_failures: Vec::new(),
        }
    }

    pub fn with_workspace_failures(mut self, failures: Vec<(String, String)>) -> Self {
        self.workspace_failures = failures;
        self
    }

    pub fn discovered(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| o.status != RepoStatus::Filtered)
            .count()
    }

    pub fn count(&self, status: RepoStatus) -> usize {
        self.outcomes.iter().filter(|o| o.status == status).count()
    }

    pub fn total_archive_bytes(&self) -> u64 {
        self.outcomes.iter().map(|o| o.archive_bytes).sum()
    }

    /// True when nothing failed outright. Partial outcomes still count as
    /// overall success; their gaps are listed per repository.
    pub fn is_success(&self) -> bool {
        self.count(RepoStatus::Failed) == 0
    }
}
