//! Backup engine: orchestrates discovery, mirror sync, metadata capture,
//! archiving, retention and (in migration mode) restoration.
//!
//! Repositories run through a bounded worker pool; each repository's steps
//! are strictly sequential so a failed mirror never produces an archive and
//! retention only runs against its own repository's directory.

use anyhow::{Context, Result};
use chrono::Utc;
use futures::stream::{FuturesUnordered, StreamExt};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, Semaphore};
use tracing::{debug, error, info, warn};

use crate::api::{BitbucketClient, RepoCreate};
use crate::archive::ArchiveBuilder;
use crate::config::Config;
use crate::discovery::{Discovery, DiscoveryOutcome};
use crate::error::ApiError;
use crate::metadata::MetadataCapture;
use crate::mirror::GitMirror;
use crate::models::{AccountKind, MetadataBundle, MigrationTask, Repository, Workspace};
use crate::report::{RepoOutcome, RepoStatus, RunReport};
use crate::restore::CollaborationRestorer;
use crate::retention;
use crate::retry::RetryPolicy;

/// Requests a graceful stop: no new repositories are dispatched, in-flight
/// work drains naturally.
#[derive(Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

/// The main backup/migration engine.
pub struct BackupEngine {
    config: Arc<Config>,
    migration_mode: bool,
    source: BitbucketClient,
    destination: Option<BitbucketClient>,
    mirror: GitMirror,
    cancel_tx: Arc<watch::Sender<bool>>,
    cancel_rx: watch::Receiver<bool>,
}

impl BackupEngine {
    /// Build an engine from a validated configuration.
    ///
    /// `migration_mode` requires `config.destination`; [`Config::validate`]
    /// enforces that before this runs.
    pub fn new(config: Config, migration_mode: bool) -> Result<Self> {
        let config = Arc::new(config);
        let retry = RetryPolicy::new(
            config.performance.retry_max_attempts,
            Duration::from_millis(config.performance.retry_base_delay_ms),
        );

        let source = BitbucketClient::new(
            &config.source,
            &config.api_base_url,
            config.request_timeout(),
            retry.clone(),
            AccountKind::Source,
        )
        .context("Failed to build source API client")?;

        let destination = match (&config.destination, migration_mode) {
            (Some(account), true) => Some(
                BitbucketClient::new(
                    account,
                    &config.api_base_url,
                    config.request_timeout(),
                    retry.clone(),
                    AccountKind::Destination,
                )
                .context("Failed to build destination API client")?,
            ),
            _ => None,
        };

        let mirror = GitMirror::new(
            config.clone_timeout(),
            config.push_timeout(),
            config.performance.retry_max_attempts,
            Duration::from_millis(config.performance.retry_base_delay_ms),
        );

        let (cancel_tx, cancel_rx) = watch::channel(false);

        Ok(Self {
            config,
            migration_mode,
            source,
            destination,
            mirror,
            cancel_tx: Arc::new(cancel_tx),
            cancel_rx,
        })
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            tx: self.cancel_tx.clone(),
        }
    }

    fn cancelled(&self) -> bool {
        *self.cancel_rx.borrow()
    }

    /// Verify credentials against both accounts without doing any work.
    pub async fn check_credentials(&self) -> Result<Vec<(String, String)>> {
        let mut identities = Vec::new();

        let user = self.source.current_user().await?;
        identities.push((self.source.account_label().to_string(), user.display_name));

        if let Some(dest) = &self.destination {
            let user = dest.current_user().await?;
            identities.push((dest.account_label().to_string(), user.display_name));
        }

        Ok(identities)
    }

    /// Discovery pass alone, for the `list` subcommand.
    pub async fn discover(&self) -> Result<DiscoveryOutcome> {
        let discovery = Discovery::new(
            &self.source,
            &self.config.filters,
            &self.config.source.workspaces,
        );
        Ok(discovery.discover().await?)
    }

    /// Run the full pipeline over every selected repository.
    pub async fn run(&self) -> Result<RunReport> {
        let started_at = Utc::now();
        let start = Instant::now();
        let run_id = started_at.format("%Y%m%d_%H%M%S").to_string();

        let user = self
            .source
            .current_user()
            .await
            .context("Source credential check failed")?;
        info!(user = %user.display_name, "Authenticated to source account");

        if let Some(dest) = &self.destination {
            let user = dest
                .current_user()
                .await
                .context("Destination credential check failed")?;
            info!(user = %user.display_name, "Authenticated to destination account");
        }

        let discovered = self.discover().await?;

        let mut outcomes: Vec<RepoOutcome> = discovered
            .filtered
            .iter()
            .map(|f| {
                RepoOutcome::new(f.full_name.clone(), RepoStatus::Filtered)
                    .with_error(f.reason.clone())
            })
            .collect();

        for (workspace, error) in &discovered.workspace_failures {
            warn!(
                workspace = %workspace,
                error = %error,
                "Workspace enumeration failed, repositories not backed up"
            );
        }

        info!(
            repos = discovered.selected.len(),
            parallel = self.config.performance.parallel_jobs,
            migration = self.migration_mode,
            "Starting backup run"
        );

        let semaphore = Arc::new(Semaphore::new(
            self.config.performance.parallel_jobs.max(1),
        ));

        let mut tasks = FuturesUnordered::new();
        for (workspace, repo) in discovered.selected {
            let semaphore = semaphore.clone();
            let run_id = run_id.clone();
            tasks.push(async move {
                let _permit = semaphore.acquire().await.expect("semaphore closed");
                if self.cancelled() {
                    return RepoOutcome::new(repo.full_name.clone(), RepoStatus::Skipped)
                        .with_error("run cancelled");
                }
                self.process_repo(&run_id, &workspace, &repo).await
            });
        }

        while let Some(outcome) = tasks.next().await {
            debug!(repo = %outcome.full_name, status = %outcome.status, "Repository finished");
            outcomes.push(outcome);
        }

        // Run-scoped temp space is empty once every guard has dropped
        let work_root = self.work_root(&run_id);
        let _ = tokio::fs::remove_dir_all(&work_root).await;

        let report = RunReport::new(started_at, self.migration_mode, outcomes)
            .with_workspace_failures(discovered.workspace_failures);
        info!(
            duration_secs = start.elapsed().as_secs(),
            success = report.count(RepoStatus::Success),
            partial = report.count(RepoStatus::Partial),
            failed = report.count(RepoStatus::Failed),
            skipped = report.count(RepoStatus::Skipped),
            filtered = report.count(RepoStatus::Filtered),
            "Run complete"
        );
        Ok(report)
    }

    fn work_root(&self, run_id: &str) -> PathBuf {
        PathBuf::from(&self.config.backup_dir)
            .join("work")
            .join(run_id)
    }

    fn archives_root(&self) -> PathBuf {
        PathBuf::from(&self.config.backup_dir).join("archives")
    }

    /// The whole pipeline for one repository. Never returns an error: every
    /// failure is folded into the outcome so the batch continues.
    async fn process_repo(
        &self,
        run_id: &str,
        workspace: &Workspace,
        repo: &Repository,
    ) -> RepoOutcome {
        let full_name = repo.full_name.clone();
        info!(repo = %full_name, "Processing repository");

        // 1. Mirror clone into run-partitioned temp space
        let clone_url = match repo.https_clone_url() {
            Some(url) => url.to_string(),
            None => format!("https://bitbucket.org/{}.git", repo.full_name),
        };
        let authed_url = self.source.authenticated_remote_url(&clone_url);
        let mirror_dest = self
            .work_root(run_id)
            .join(&workspace.slug)
            .join(format!("{}.git", repo.slug));

        let guard = match self.mirror.clone_mirror(&authed_url, mirror_dest).await {
            Ok(guard) => guard,
            Err(e) => {
                error!(repo = %full_name, error = %e, "Mirror sync failed");
                return RepoOutcome::new(full_name, RepoStatus::Failed)
                    .with_error(format!("mirror sync: {:#}", e));
            }
        };

        // 2. Metadata capture: category failures degrade to partial,
        //    revoked credentials stop the whole account
        let capture = MetadataCapture::new(&self.source);
        let bundle = match capture.capture(repo).await {
            Ok(bundle) => bundle,
            Err(e) if e.is_account_fatal() => {
                error!(repo = %full_name, error = %e, "Account-level failure, cancelling run");
                let _ = self.cancel_tx.send(true);
                return RepoOutcome::new(full_name, RepoStatus::Failed)
                    .with_error(e.to_string());
            }
            Err(e) => {
                error!(repo = %full_name, error = %e, "Metadata capture failed");
                return RepoOutcome::new(full_name, RepoStatus::Failed)
                    .with_error(e.to_string());
            }
        };

        // 3. Archive
        let builder = ArchiveBuilder::new(self.archives_root(), self.migration_mode);
        let archive = match builder
            .build(&workspace.slug, &repo.slug, guard.path(), &bundle)
            .await
        {
            Ok(archive) => archive,
            Err(e) => {
                error!(repo = %full_name, error = %e, "Archive build failed");
                return RepoOutcome::new(full_name, RepoStatus::Failed)
                    .with_error(format!("archive: {:#}", e));
            }
        };

        // 4. Retention, serialized per repo by construction
        let repo_dir = builder.repo_archive_dir(&workspace.slug, &repo.slug);
        match retention::rotate(&repo_dir, self.config.retention.max_backups).await {
            Ok(removed) if !removed.is_empty() => {
                info!(repo = %full_name, removed = removed.len(), "Rotated old backups");
            }
            Ok(_) => {}
            Err(e) => warn!(repo = %full_name, error = %e, "Retention rotation failed"),
        }

        let mut outcome = if bundle.is_partial() {
            RepoOutcome::new(full_name.clone(), RepoStatus::Partial)
        } else {
            RepoOutcome::new(full_name.clone(), RepoStatus::Success)
        };
        outcome.archive_bytes = archive.archive_size_bytes;
        outcome.metadata_items = bundle.total_items();
        outcome.failed_categories = bundle.failed_categories.clone();

        // 5. Migration: push the mirror and replay collaboration data
        if self.migration_mode {
            match self.migrate_repo(workspace, repo, guard.path(), &bundle).await {
                Ok(MigrationOutcome::Pushed { restored }) => {
                    outcome.restored_items = restored;
                }
                Ok(MigrationOutcome::SkippedExisting { dest }) => {
                    info!(repo = %full_name, dest = %dest, "Destination already populated, push skipped");
                    outcome.status = RepoStatus::Skipped;
                    outcome.error = Some(format!("destination {} already populated", dest));
                }
                Err(e) => {
                    error!(repo = %full_name, error = %e, "Migration failed");
                    self.abort_on_account_fatal(&e);
                    outcome.status = RepoStatus::Failed;
                    outcome.error = Some(format!("migration: {:#}", e));
                }
            }
        }

        outcome
    }

    /// Rejected credentials poison every remaining call on that account.
    /// Stops dispatching new repositories, same as the capture path does
    /// for the source account. Returns whether the run was cancelled.
    fn abort_on_account_fatal(&self, e: &anyhow::Error) -> bool {
        match e.downcast_ref::<ApiError>() {
            Some(api) if api.is_account_fatal() => {
                error!(error = %api, "Account-level failure, cancelling run");
                let _ = self.cancel_tx.send(true);
                true
            }
            _ => false,
        }
    }

    /// Resolve the destination coordinates, ensure the repository exists,
    /// push the mirror, then restore collaboration data.
    async fn migrate_repo(
        &self,
        workspace: &Workspace,
        repo: &Repository,
        mirror_dir: &std::path::Path,
        bundle: &MetadataBundle,
    ) -> Result<MigrationOutcome> {
        let dest = self
            .destination
            .as_ref()
            .context("Migration mode without a destination account")?;

        let task = self.destination_task(workspace, repo, dest).await?;

        if task.dest_exists && self.config.migration.skip_existing_repos {
            let populated = dest
                .repository_has_commits(&task.dest_workspace, &task.dest_slug)
                .await
                .unwrap_or(false);
            if populated {
                return Ok(MigrationOutcome::SkippedExisting {
                    dest: format!("{}/{}", task.dest_workspace, task.dest_slug),
                });
            }
        }

        if !task.dest_exists {
            if !self.config.migration.create_missing_repos {
                anyhow::bail!(
                    "destination repository {}/{} does not exist and creation is disabled",
                    task.dest_workspace,
                    task.dest_slug
                );
            }
            // Private, issues/wiki off; the restorer enables features it needs
            dest.create_repository(&task.dest_workspace, &task.dest_slug, &RepoCreate::default())
                .await
                .context("Failed to create destination repository")?;
        }

        let push_url = format!(
            "https://bitbucket.org/{}/{}.git",
            task.dest_workspace, task.dest_slug
        );
        let authed = dest.authenticated_remote_url(&push_url);
        self.mirror
            .push_mirror(mirror_dir, &authed)
            .await
            .context("Mirror push failed")?;

        let restorer = CollaborationRestorer::new(dest, &self.config.restore);
        let summary = restorer
            .restore(&task.dest_workspace, &task.dest_slug, bundle)
            .await?;

        Ok(MigrationOutcome::Pushed {
            restored: summary.restored,
        })
    }

    /// Where this repository lands on the destination account.
    async fn destination_task(
        &self,
        workspace: &Workspace,
        repo: &Repository,
        dest: &BitbucketClient,
    ) -> Result<MigrationTask, ApiError> {
        let dest_workspace = self.config.map_workspace(&workspace.slug).to_string();
        let dest_slug = self.config.map_repo_slug(&repo.slug);

        let existing = dest.get_repository(&dest_workspace, &dest_slug).await?;

        Ok(MigrationTask {
            dest_workspace,
            dest_slug,
            dest_exists: existing.is_some(),
        })
    }
}

enum MigrationOutcome {
    Pushed { restored: usize },
    SkippedExisting { dest: String },
}
