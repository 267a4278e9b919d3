//! Workspace and repository discovery with include/exclude filtering.
//!
//! Filtering precedence, applied in this order:
//! 1. explicit workspace allow-list (when given, nothing else is discovered)
//! 2. workspace exclude-patterns (case-insensitive substring)
//! 3. workspace include-patterns (must match at least one, when any given)
//! 4. repository exclude-patterns
//! 5. repository include-patterns
//! 6. global maximum-repository-count safety cap (stops discovery, no error)

use tracing::{info, warn};

use crate::api::BitbucketClient;
use crate::config::FilterConfig;
use crate::error::ApiResult;
use crate::models::{Repository, Workspace};

/// Why a discovered item was left out of the run.
#[derive(Debug, Clone)]
pub struct FilteredOut {
    pub full_name: String,
    pub reason: String,
}

/// Result of one discovery pass. The `selected` pairs are consumed exactly
/// once by the engine; `filtered` and `workspace_failures` feed the report.
#[derive(Debug, Default)]
pub struct DiscoveryOutcome {
    pub selected: Vec<(Workspace, Repository)>,
    pub filtered: Vec<FilteredOut>,
    pub workspace_failures: Vec<(String, String)>,
}

/// Case-insensitive substring match against any of the patterns.
pub fn matches_any(name: &str, patterns: &[String]) -> bool {
    let lower = name.to_lowercase();
    patterns.iter().any(|p| lower.contains(&p.to_lowercase()))
}

/// Pure filter predicate for a workspace slug. Returns the rejection
/// reason, or `None` when the workspace passes.
pub fn workspace_rejection(slug: &str, filters: &FilterConfig) -> Option<String> {
    if matches_any(slug, &filters.workspace_exclude) {
        return Some("workspace matches exclude pattern".to_string());
    }
    if !filters.workspace_include.is_empty() && !matches_any(slug, &filters.workspace_include) {
        return Some("workspace matches no include pattern".to_string());
    }
    None
}

/// Pure filter predicate for a repository slug. Returns the rejection
/// reason, or `None` when the repository passes.
pub fn repo_rejection(slug: &str, filters: &FilterConfig) -> Option<String> {
    if matches_any(slug, &filters.repo_exclude) {
        return Some("repository matches exclude pattern".to_string());
    }
    if !filters.repo_include.is_empty() && !matches_any(slug, &filters.repo_include) {
        return Some("repository matches no include pattern".to_string());
    }
    None
}

/// Discovers accessible workspaces and their repositories on one account.
pub struct Discovery<'a> {
    client: &'a BitbucketClient,
    filters: &'a FilterConfig,
    /// Explicit workspace allow-list; when non-empty only these are used
    allow_list: &'a [String],
}

impl<'a> Discovery<'a> {
    pub fn new(
        client: &'a BitbucketClient,
        filters: &'a FilterConfig,
        allow_list: &'a [String],
    ) -> Self {
        Self {
            client,
            filters,
            allow_list,
        }
    }

    /// Enumerate workspaces to consider, in order. The allow-list, when
    /// given, replaces remote discovery entirely.
    async fn candidate_workspaces(&self) -> ApiResult<Vec<Workspace>> {
        if !self.allow_list.is_empty() {
            return Ok(self
                .allow_list
                .iter()
                .map(|slug| Workspace {
                    slug: slug.clone(),
                    name: slug.clone(),
                    permission: None,
                    account: crate::models::AccountKind::Source,
                })
                .collect());
        }
        self.client.list_workspaces().await
    }

    /// Run the full discovery pass: enumerate workspaces and repositories,
    /// apply the filter precedence, honor the repository cap.
    ///
    /// Failure to enumerate one workspace is recorded and that workspace is
    /// skipped; it does not stop enumeration of the others. Authentication
    /// failures abort the whole pass since every later call would fail the
    /// same way.
    pub async fn discover(&self) -> ApiResult<DiscoveryOutcome> {
        let mut outcome = DiscoveryOutcome::default();
        let workspaces = self.candidate_workspaces().await?;

        info!(count = workspaces.len(), "Considering workspaces");

        'workspaces: for workspace in workspaces {
            if let Some(reason) = workspace_rejection(&workspace.slug, self.filters) {
                info!(workspace = %workspace.slug, reason, "Workspace filtered out");
                outcome.filtered.push(FilteredOut {
                    full_name: workspace.slug.clone(),
                    reason,
                });
                continue;
            }

            let repos = match self.client.list_repositories(&workspace.slug).await {
                Ok(repos) => repos,
                Err(e) if e.is_account_fatal() => return Err(e),
                Err(e) => {
                    warn!(workspace = %workspace.slug, error = %e, "Skipping workspace");
                    outcome
                        .workspace_failures
                        .push((workspace.slug.clone(), e.to_string()));
                    continue;
                }
            };

            for repo in repos {
                if let Some(cap) = self.filters.max_repositories {
                    if outcome.selected.len() >= cap {
                        info!(cap, "Repository cap reached, stopping discovery");
                        break 'workspaces;
                    }
                }

                if let Some(reason) = repo_rejection(&repo.slug, self.filters) {
                    outcome.filtered.push(FilteredOut {
                        full_name: repo.full_name.clone(),
                        reason,
                    });
                    continue;
                }

                outcome.selected.push((workspace.clone(), repo));
            }
        }

        info!(
            selected = outcome.selected.len(),
            filtered = outcome.filtered.len(),
            failed_workspaces = outcome.workspace_failures.len(),
            "Discovery complete"
        );
        Ok(outcome)
    }
}
