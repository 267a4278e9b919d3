use anyhow::{Context, Result};
use dirs::config_dir;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ApiError;

/// Main configuration structure for repovault
///
/// Resolved once at startup and passed immutably into every component.
/// Validation happens in [`Config::validate`] before any work begins.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    /// Base directory for local backups (mirrors, archives, temp space)
    pub backup_dir: String,

    /// Source Bitbucket account
    pub source: AccountConfig,

    /// Destination Bitbucket account (required in migration mode)
    #[serde(default)]
    pub destination: Option<AccountConfig>,

    /// Workspace and repository filtering
    #[serde(default)]
    pub filters: FilterConfig,

    /// Migration behavior (ignored outside migration mode)
    #[serde(default)]
    pub migration: MigrationConfig,

    /// Collaboration-data restoration feature flags
    #[serde(default)]
    pub restore: RestoreConfig,

    /// Retention policy for compressed backups
    #[serde(default)]
    pub retention: RetentionConfig,

    /// Timeouts, parallelism and retry tuning
    #[serde(default)]
    pub performance: PerformanceConfig,

    /// Bitbucket API base URL (overridable for testing)
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
}

/// Credentials and workspace scope for one Bitbucket account
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AccountConfig {
    /// Atlassian account email
    pub email: String,

    /// App-scoped API token (not an app password)
    pub api_token: String,

    /// Explicit workspace allow-list. When non-empty, only these
    /// workspaces are processed, in this order; nothing else is discovered.
    #[serde(default)]
    pub workspaces: Vec<String>,
}

/// Include/exclude pattern configuration
///
/// Patterns are case-insensitive substrings, applied in a fixed precedence:
/// workspace excludes, then workspace includes, then repository excludes,
/// then repository includes.
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct FilterConfig {
    #[serde(default)]
    pub workspace_exclude: Vec<String>,

    #[serde(default)]
    pub workspace_include: Vec<String>,

    #[serde(default)]
    pub repo_exclude: Vec<String>,

    #[serde(default)]
    pub repo_include: Vec<String>,

    /// Safety cap: discovery stops once this many repositories are emitted
    #[serde(default)]
    pub max_repositories: Option<usize>,
}

/// Migration-mode settings
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct MigrationConfig {
    /// Create destination repositories that do not exist yet
    #[serde(default = "default_true")]
    pub create_missing_repos: bool,

    /// Skip the mirror push when the destination repo already exists
    /// and is non-empty (local archiving still proceeds)
    #[serde(default = "default_true")]
    pub skip_existing_repos: bool,

    /// Prefix applied to destination repository slugs
    #[serde(default)]
    pub repo_name_prefix: String,

    /// Explicit source-workspace → destination-workspace mapping.
    /// Unmapped workspaces keep their own slug.
    #[serde(default)]
    pub workspace_mapping: Vec<WorkspaceMapping>,
}

/// One entry of the workspace name mapping
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct WorkspaceMapping {
    pub source: String,
    pub destination: String,
}

/// Independent feature flags for each category of collaboration-data replay
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RestoreConfig {
    #[serde(default = "default_true")]
    pub issues: bool,

    #[serde(default = "default_true")]
    pub wiki: bool,

    /// PRs are documented in a consolidated issue, never recreated live
    #[serde(default = "default_true")]
    pub pull_request_docs: bool,

    #[serde(default)]
    pub permissions: bool,

    #[serde(default)]
    pub webhooks: bool,

    #[serde(default)]
    pub branch_restrictions: bool,

    #[serde(default)]
    pub deploy_keys: bool,
}

/// Rotating retention policy
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RetentionConfig {
    /// Number of archives kept per repository
    #[serde(default = "default_max_backups")]
    pub max_backups: usize,
}

/// Timeouts, parallelism and retry tuning
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct PerformanceConfig {
    /// Timeout for `git clone --mirror`, in seconds
    #[serde(default = "default_clone_timeout")]
    pub clone_timeout_secs: u64,

    /// Timeout for `git push --mirror`, in seconds
    #[serde(default = "default_push_timeout")]
    pub push_timeout_secs: u64,

    /// Number of repositories processed in parallel
    #[serde(default = "default_parallel_jobs")]
    pub parallel_jobs: usize,

    /// Timeout for individual HTTP requests, in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Retry attempt cap for retryable API failures
    #[serde(default = "default_max_attempts")]
    pub retry_max_attempts: u32,

    /// Base delay for exponential backoff, in milliseconds
    #[serde(default = "default_base_delay_ms")]
    pub retry_base_delay_ms: u64,
}

// Default value functions
fn default_true() -> bool {
    true
}
fn default_api_base_url() -> String {
    "https://api.bitbucket.org/2.0".to_string()
}
fn default_max_backups() -> usize {
    5
}
fn default_clone_timeout() -> u64 {
    1800
}
fn default_push_timeout() -> u64 {
    3600
}
fn default_parallel_jobs() -> usize {
    3
}
fn default_request_timeout() -> u64 {
    30
}
fn default_max_attempts() -> u32 {
    4
}
fn default_base_delay_ms() -> u64 {
    500
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            create_missing_repos: true,
            skip_existing_repos: true,
            repo_name_prefix: String::new(),
            workspace_mapping: Vec::new(),
        }
    }
}

impl Default for RestoreConfig {
    fn default() -> Self {
        Self {
            issues: true,
            wiki: true,
            pull_request_docs: true,
            permissions: false,
            webhooks: false,
            branch_restrictions: false,
            deploy_keys: false,
        }
    }
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            max_backups: default_max_backups(),
        }
    }
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            clone_timeout_secs: default_clone_timeout(),
            push_timeout_secs: default_push_timeout(),
            parallel_jobs: default_parallel_jobs(),
            request_timeout_secs: default_request_timeout(),
            retry_max_attempts: default_max_attempts(),
            retry_base_delay_ms: default_base_delay_ms(),
        }
    }
}

impl Config {
    /// Load configuration from a specific file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let mut config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        config.expand_paths()?;

        Ok(config)
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_yaml::to_string(self).context("Failed to serialize configuration")?;

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {:?}", path))?;

        Ok(())
    }

    /// Get the default configuration file path (XDG compliant)
    pub fn default_config_path() -> Result<PathBuf> {
        let config_dir = config_dir().context("Failed to get user config directory")?;

        Ok(config_dir.join("repovault").join("config.yml"))
    }

    /// Expand environment variables in configuration paths
    pub fn expand_paths(&mut self) -> Result<()> {
        self.backup_dir = shellexpand::full(&self.backup_dir)
            .context("Failed to expand backup_dir path")?
            .into_owned();

        Ok(())
    }

    /// Validate the resolved configuration, failing fast before any work
    /// begins. Every violation here is fatal at startup.
    pub fn validate(&self, migration_mode: bool) -> Result<(), ApiError> {
        if self.source.email.is_empty() || self.source.api_token.is_empty() {
            return Err(ApiError::Validation(
                "source account requires email and api_token".into(),
            ));
        }
        if self.backup_dir.is_empty() {
            return Err(ApiError::Validation("backup_dir must not be empty".into()));
        }
        if self.performance.parallel_jobs == 0 {
            return Err(ApiError::Validation(
                "performance.parallel_jobs must be at least 1".into(),
            ));
        }
        if self.retention.max_backups == 0 {
            return Err(ApiError::Validation(
                "retention.max_backups must be at least 1".into(),
            ));
        }
        let all_patterns = self
            .filters
            .workspace_exclude
            .iter()
            .chain(&self.filters.workspace_include)
            .chain(&self.filters.repo_exclude)
            .chain(&self.filters.repo_include);
        for pattern in all_patterns {
            if pattern.trim().is_empty() {
                return Err(ApiError::Validation(
                    "filter patterns must not be empty strings".into(),
                ));
            }
        }
        if migration_mode {
            match &self.destination {
                Some(dest) if !dest.email.is_empty() && !dest.api_token.is_empty() => {}
                _ => {
                    return Err(ApiError::Validation(
                        "migration mode requires a destination account with email and api_token"
                            .into(),
                    ))
                }
            }
        }
        Ok(())
    }

    /// Destination workspace slug for a given source workspace, after
    /// applying the explicit mapping.
    pub fn map_workspace<'a>(&'a self, source_slug: &'a str) -> &'a str {
        self.migration
            .workspace_mapping
            .iter()
            .find(|m| m.source == source_slug)
            .map(|m| m.destination.as_str())
            .unwrap_or(source_slug)
    }

    /// Destination repository slug, with the configured prefix applied.
    pub fn map_repo_slug(&self, source_slug: &str) -> String {
        format!("{}{}", self.migration.repo_name_prefix, source_slug)
    }

    pub fn clone_timeout(&self) -> Duration {
        Duration::from_secs(self.performance.clone_timeout_secs)
    }

    pub fn push_timeout(&self) -> Duration {
        Duration::from_secs(self.performance.push_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.performance.request_timeout_secs)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backup_dir: "${HOME}/.local/share/repovault".to_string(),
            source: AccountConfig {
                email: String::new(),
                api_token: String::new(),
                workspaces: Vec::new(),
            },
            destination: None,
            filters: FilterConfig::default(),
            migration: MigrationConfig::default(),
            restore: RestoreConfig::default(),
            retention: RetentionConfig::default(),
            performance: PerformanceConfig::default(),
            api_base_url: default_api_base_url(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> Config {
        let mut config = Config::default();
        config.backup_dir = "/tmp/repovault-test".to_string();
        config.source.email = "ops@example.com".to_string();
        config.source.api_token = "token".to_string();
        config
    }

    #[test]
    fn test_config_default_values() {
        let config = Config::default();

        assert_eq!(config.retention.max_backups, 5);
        assert_eq!(config.performance.parallel_jobs, 3);
        assert_eq!(config.performance.clone_timeout_secs, 1800);
        assert_eq!(config.performance.push_timeout_secs, 3600);
        assert!(config.migration.create_missing_repos);
        assert!(config.migration.skip_existing_repos);
        assert!(config.restore.issues);
        assert!(config.restore.wiki);
        assert!(!config.restore.permissions);
        assert!(!config.restore.webhooks);
        assert_eq!(config.api_base_url, "https://api.bitbucket.org/2.0");
    }

    #[test]
    fn test_validate_requires_source_credentials() {
        let config = Config::default();
        assert!(config.validate(false).is_err());

        let config = valid_config();
        assert!(config.validate(false).is_ok());
    }

    #[test]
    fn test_validate_migration_requires_destination() {
        let mut config = valid_config();
        assert!(config.validate(true).is_err());

        config.destination = Some(AccountConfig {
            email: "dest@example.com".to_string(),
            api_token: "dest-token".to_string(),
            workspaces: vec![],
        });
        assert!(config.validate(true).is_ok());
    }

    #[test]
    fn test_validate_rejects_empty_patterns() {
        let mut config = valid_config();
        config.filters.repo_exclude = vec!["  ".to_string()];
        assert!(config.validate(false).is_err());
    }

    #[test]
    fn test_validate_rejects_zero_parallelism() {
        let mut config = valid_config();
        config.performance.parallel_jobs = 0;
        assert!(config.validate(false).is_err());

        let mut config = valid_config();
        config.retention.max_backups = 0;
        assert!(config.validate(false).is_err());
    }

    #[test]
    fn test_workspace_mapping() {
        let mut config = valid_config();
        config.migration.workspace_mapping = vec![WorkspaceMapping {
            source: "old-team".to_string(),
            destination: "new-team".to_string(),
        }];

        assert_eq!(config.map_workspace("old-team"), "new-team");
        assert_eq!(config.map_workspace("other"), "other");
    }

    #[test]
    fn test_repo_slug_prefix() {
        let mut config = valid_config();
        assert_eq!(config.map_repo_slug("api"), "api");

        config.migration.repo_name_prefix = "migrated-".to_string();
        assert_eq!(config.map_repo_slug("api"), "migrated-api");
    }

    #[test]
    fn test_yaml_parsing() {
        let yaml_content = r#"
backup_dir: "/var/backups/bitbucket"
source:
  email: "ops@example.com"
  api_token: "secret"
  workspaces: ["acme", "acme-labs"]
destination:
  email: "dest@example.com"
  api_token: "dest-secret"
filters:
  repo_exclude: ["test-", "archive-"]
  max_repositories: 100
migration:
  repo_name_prefix: "mig-"
  skip_existing_repos: false
restore:
  issues: true
  wiki: false
retention:
  max_backups: 10
performance:
  parallel_jobs: 5
  clone_timeout_secs: 900
"#;

        let config: Config = serde_yaml::from_str(yaml_content).expect("Failed to parse YAML");

        assert_eq!(config.backup_dir, "/var/backups/bitbucket");
        assert_eq!(config.source.workspaces, vec!["acme", "acme-labs"]);
        assert_eq!(config.filters.repo_exclude, vec!["test-", "archive-"]);
        assert_eq!(config.filters.max_repositories, Some(100));
        assert_eq!(config.migration.repo_name_prefix, "mig-");
        assert!(!config.migration.skip_existing_repos);
        assert!(config.restore.issues);
        assert!(!config.restore.wiki);
        assert_eq!(config.retention.max_backups, 10);
        assert_eq!(config.performance.parallel_jobs, 5);
        assert_eq!(config.performance.clone_timeout_secs, 900);
        // Defaults fill in unset fields
        assert_eq!(config.performance.push_timeout_secs, 3600);
        assert!(config.restore.pull_request_docs);
    }

    #[test]
    fn test_config_save_and_load() {
        let temp_dir = tempfile::TempDir::new().expect("Failed to create temp dir");
        let config_path = temp_dir.path().join("config.yml");

        let mut config = valid_config();
        config.retention.max_backups = 7;
        config.source.workspaces = vec!["acme".to_string()];

        config.save(&config_path).expect("Failed to save config");
        let loaded = Config::load(&config_path).expect("Failed to load config");

        assert_eq!(loaded.retention.max_backups, 7);
        assert_eq!(loaded.source.workspaces, vec!["acme"]);
        assert_eq!(loaded.source.email, "ops@example.com");
    }

    #[test]
    fn test_config_load_nonexistent_file() {
        let result = Config::load(Path::new("/nonexistent/path/config.yml"));
        assert!(result.is_err());
    }

    #[test]
    fn test_expand_paths() {
        std::env::set_var("TEST_REPOVAULT_HOME", "/test/home");

        let mut config = Config::default();
        config.backup_dir = "${TEST_REPOVAULT_HOME}/backups".to_string();
        config.expand_paths().expect("Failed to expand paths");

        assert_eq!(config.backup_dir, "/test/home/backups");

        std::env::remove_var("TEST_REPOVAULT_HOME");
    }
}
