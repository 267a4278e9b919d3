//! Data model for workspaces, repositories and captured collaboration data.
//!
//! The wire-facing structs mirror the shapes returned by the Bitbucket 2.0
//! API, kept deliberately tolerant: every field the engine does not need is
//! omitted, and optional fields stay `Option` so that partial payloads
//! deserialize cleanly.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which hosted account a workspace was discovered on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountKind {
    Source,
    Destination,
}

impl AccountKind {
    /// Label used in logs and authentication errors.
    pub fn as_str(self) -> &'static str {
        match self {
            AccountKind::Source => "source",
            AccountKind::Destination => "destination",
        }
    }
}

/// A named container of repositories within one hosted account.
/// Immutable after discovery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workspace {
    pub slug: String,
    #[serde(default)]
    pub name: String,
    /// Access level granted to the authenticated user (admin/write/read)
    #[serde(default)]
    pub permission: Option<String>,
    #[serde(default = "default_account")]
    pub account: AccountKind,
}

fn default_account() -> AccountKind {
    AccountKind::Source
}

/// A repository as discovered in its owning workspace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Repository {
    /// `workspace/slug`
    pub full_name: String,
    pub slug: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub is_private: bool,
    /// Size estimate in bytes, as reported by the API
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub has_wiki: bool,
    #[serde(default)]
    pub has_issues: bool,
    #[serde(default)]
    pub links: RepositoryLinks,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RepositoryLinks {
    #[serde(default)]
    pub clone: Vec<CloneLink>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloneLink {
    pub name: String,
    pub href: String,
}

impl Repository {
    /// Workspace slug derived from the full name.
    pub fn workspace_slug(&self) -> &str {
        self.full_name
            .split_once('/')
            .map(|(ws, _)| ws)
            .unwrap_or(&self.full_name)
    }

    /// HTTPS clone URL, if the API advertised one.
    pub fn https_clone_url(&self) -> Option<&str> {
        self.links
            .clone
            .iter()
            .find(|l| l.name == "https")
            .map(|l| l.href.as_str())
    }
}

/// Author/reporter of an issue, comment or pull request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Actor {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub display_name: String,
}

/// Rendered/raw content wrapper used across Bitbucket payloads.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Content {
    #[serde(default)]
    pub raw: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Issue {
    pub id: u64,
    pub title: String,
    #[serde(default)]
    pub content: Content,
    #[serde(default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub priority: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub reporter: Option<Actor>,
    #[serde(default)]
    pub created_on: Option<DateTime<Utc>>,
    /// Comments in original creation order
    #[serde(default)]
    pub comments: Vec<Comment>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Comment {
    #[serde(default)]
    pub content: Content,
    #[serde(default)]
    pub user: Option<Actor>,
    #[serde(default)]
    pub created_on: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullRequest {
    pub id: u64,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub author: Option<Actor>,
    #[serde(default)]
    pub source: Option<PrEndpoint>,
    #[serde(default)]
    pub destination: Option<PrEndpoint>,
    #[serde(default)]
    pub created_on: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_on: Option<DateTime<Utc>>,
    /// Comments in original creation order
    #[serde(default)]
    pub comments: Vec<Comment>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PrEndpoint {
    #[serde(default)]
    pub branch: Option<BranchRef>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BranchRef {
    #[serde(default)]
    pub name: String,
}

impl PullRequest {
    pub fn source_branch(&self) -> &str {
        self.source
            .as_ref()
            .and_then(|e| e.branch.as_ref())
            .map(|b| b.name.as_str())
            .unwrap_or("unknown")
    }

    pub fn destination_branch(&self) -> &str {
        self.destination
            .as_ref()
            .and_then(|e| e.branch.as_ref())
            .map(|b| b.name.as_str())
            .unwrap_or("unknown")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WikiPage {
    /// Page path, also used as the slug when restoring
    pub path: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub author: Option<Actor>,
    #[serde(default)]
    pub updated_on: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Branch {
    pub name: String,
    #[serde(default)]
    pub target: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tag {
    pub name: String,
    #[serde(default)]
    pub target: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Permission {
    #[serde(default)]
    pub user: Option<Actor>,
    #[serde(default)]
    pub permission: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Webhook {
    #[serde(default)]
    pub description: String,
    pub url: String,
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub events: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployKey {
    #[serde(default)]
    pub label: String,
    pub key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BranchRestriction {
    pub kind: String,
    #[serde(default)]
    pub pattern: String,
    #[serde(default)]
    pub value: Option<i64>,
}

/// Per-repository aggregate of captured collaboration data.
///
/// Produced once per backup run and immutable afterwards; serialized as
/// `metadata-{repo}.json` inside the archive. All derived counts are
/// computed from the bundle contents alone so they stay reproducible.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetadataBundle {
    pub workspace: String,
    pub repo_slug: String,
    pub captured_at: DateTime<Utc>,

    #[serde(default)]
    pub issues: Vec<Issue>,
    #[serde(default)]
    pub pull_requests: Vec<PullRequest>,
    #[serde(default)]
    pub wiki_pages: Vec<WikiPage>,
    #[serde(default)]
    pub branches: Vec<Branch>,
    #[serde(default)]
    pub tags: Vec<Tag>,
    #[serde(default)]
    pub permissions: Vec<Permission>,
    #[serde(default)]
    pub webhooks: Vec<Webhook>,
    #[serde(default)]
    pub deploy_keys: Vec<DeployKey>,
    #[serde(default)]
    pub branch_restrictions: Vec<BranchRestriction>,

    /// Categories whose fetch failed (the bundle is partial but usable)
    #[serde(default)]
    pub failed_categories: Vec<String>,

    // Derived counts, kept in the document for tooling that parses it
    pub total_issues: usize,
    pub total_prs: usize,
    pub total_wiki_pages: usize,
    pub total_branches: usize,
    pub total_tags: usize,
}

impl MetadataBundle {
    pub fn new(workspace: &str, repo_slug: &str) -> Self {
        Self {
            workspace: workspace.to_string(),
            repo_slug: repo_slug.to_string(),
            captured_at: Utc::now(),
            issues: Vec::new(),
            pull_requests: Vec::new(),
            wiki_pages: Vec::new(),
            branches: Vec::new(),
            tags: Vec::new(),
            permissions: Vec::new(),
            webhooks: Vec::new(),
            deploy_keys: Vec::new(),
            branch_restrictions: Vec::new(),
            failed_categories: Vec::new(),
            total_issues: 0,
            total_prs: 0,
            total_wiki_pages: 0,
            total_branches: 0,
            total_tags: 0,
        }
    }

    /// Recompute the derived counts from the bundle contents.
    pub fn finalize(&mut self) {
        self.total_issues = self.issues.len();
        self.total_prs = self.pull_requests.len();
        self.total_wiki_pages = self.wiki_pages.len();
        self.total_branches = self.branches.len();
        self.total_tags = self.tags.len();
    }

    /// Total metadata item count that feeds the archive filename.
    /// Computed purely from the bundle contents.
    pub fn total_items(&self) -> usize {
        let issue_comments: usize = self.issues.iter().map(|i| i.comments.len()).sum();
        let pr_comments: usize = self.pull_requests.iter().map(|p| p.comments.len()).sum();

        self.issues.len()
            + issue_comments
            + self.pull_requests.len()
            + pr_comments
            + self.wiki_pages.len()
            + self.branches.len()
            + self.tags.len()
            + self.permissions.len()
            + self.webhooks.len()
            + self.deploy_keys.len()
            + self.branch_restrictions.len()
    }

    /// Whether any category fetch failed during capture.
    pub fn is_partial(&self) -> bool {
        !self.failed_categories.is_empty()
    }
}

/// Small record written as `backup-info.json` next to the metadata document
/// inside every archive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupInfo {
    pub created_at: DateTime<Utc>,
    pub workspace: String,
    pub repo_slug: String,
    pub metadata_items: usize,
    pub size_bytes: u64,
    pub engine_version: String,
    pub migration_mode: bool,
}

/// Ephemeral unit of work pairing a source repository with its resolved
/// destination. Exists only for the duration of one run.
#[derive(Debug, Clone)]
pub struct MigrationTask {
    pub dest_workspace: String,
    pub dest_slug: String,
    /// Whether the destination repository already existed when resolved
    pub dest_exists: bool,
}
