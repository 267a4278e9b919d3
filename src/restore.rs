//! Replay of captured collaboration data into a destination repository.
//!
//! Runs in migration mode only, after the mirror push. Every restored item
//! carries an attribution header naming the original author and timestamps,
//! since the destination API cannot create content on another user's
//! behalf. Items are independent: a failed issue or wiki page is counted
//! and logged, never aborts the repository.

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::api::BitbucketClient;
use crate::config::RestoreConfig;
use crate::error::ApiResult;
use crate::models::{Actor, Issue, MetadataBundle, PullRequest, WikiPage};

/// Outcome of one repository's restore pass.
#[derive(Debug, Default, Clone, Copy)]
pub struct RestoreSummary {
    pub restored: usize,
    pub failed: usize,
}

impl RestoreSummary {
    fn ok(&mut self) {
        self.restored += 1;
    }

    fn err(&mut self) {
        self.failed += 1;
    }

    fn merge(&mut self, other: RestoreSummary) {
        self.restored += other.restored;
        self.failed += other.failed;
    }
}

/// Attribution block prepended to every migrated item.
fn attribution(author: Option<&Actor>, original_date: &str, item_type: &str) -> String {
    let (display, username) = match author {
        Some(a) if !a.display_name.is_empty() || !a.username.is_empty() => {
            let display = if a.display_name.is_empty() {
                "Unknown"
            } else {
                a.display_name.as_str()
            };
            let username = if a.username.is_empty() {
                "unknown"
            } else {
                a.username.as_str()
            };
            (display.to_string(), username.to_string())
        }
        _ => ("Unknown".to_string(), "unknown".to_string()),
    };

    format!(
        "\n---\n**🔄 MIGRATED CONTENT**\n\
         - **Original Author:** {} (@{})\n\
         - **Original Date:** {}\n\
         - **Migration Date:** {}\n\
         - **Type:** {}\n\
         ---\n\n",
        display,
        username,
        original_date,
        Utc::now().format("%Y-%m-%d %H:%M:%S"),
        item_type
    )
}

fn date_string(date: &Option<chrono::DateTime<Utc>>) -> String {
    date.map(|d| d.to_rfc3339())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Restores collaboration data into one destination repository.
pub struct CollaborationRestorer<'a> {
    client: &'a BitbucketClient,
    flags: &'a RestoreConfig,
}

impl<'a> CollaborationRestorer<'a> {
    pub fn new(client: &'a BitbucketClient, flags: &'a RestoreConfig) -> Self {
        Self { client, flags }
    }

    /// Replay the bundle into `{workspace}/{slug}` on the destination.
    ///
    /// Category order matches capture order. Only account-fatal errors
    /// (revoked credentials) propagate; everything else is absorbed into
    /// the summary.
    pub async fn restore(
        &self,
        workspace: &str,
        slug: &str,
        bundle: &MetadataBundle,
    ) -> ApiResult<RestoreSummary> {
        let mut summary = RestoreSummary::default();

        let want_issues = self.flags.issues && !bundle.issues.is_empty();
        let want_wiki = self.flags.wiki && !bundle.wiki_pages.is_empty();
        let want_pr_docs = self.flags.pull_request_docs && !bundle.pull_requests.is_empty();

        // Issue restoration and PR documentation both write issues
        if want_issues || want_wiki || want_pr_docs {
            self.enable_features(workspace, slug, want_issues || want_pr_docs, want_wiki)
                .await?;
        }

        if want_issues {
            summary.merge(self.restore_issues(workspace, slug, &bundle.issues).await?);
        }

        if want_wiki {
            summary.merge(
                self.restore_wiki(workspace, slug, &bundle.wiki_pages)
                    .await?,
            );
        }

        if want_pr_docs {
            summary.merge(
                self.document_pull_requests(workspace, slug, &bundle.pull_requests)
                    .await?,
            );
        }

        if self.flags.permissions {
            summary.merge(
                self.restore_permissions(workspace, slug, bundle).await?,
            );
        }

        if self.flags.webhooks {
            summary.merge(self.restore_webhooks(workspace, slug, bundle).await?);
        }

        if self.flags.branch_restrictions {
            summary.merge(
                self.restore_branch_restrictions(workspace, slug, bundle)
                    .await?,
            );
        }

        if self.flags.deploy_keys {
            summary.merge(self.restore_deploy_keys(workspace, slug, bundle).await?);
        }

        info!(
            workspace,
            slug,
            restored = summary.restored,
            failed = summary.failed,
            "Collaboration restore finished"
        );
        Ok(summary)
    }

    /// Destination mirror repos are created with issues/wiki off; turn a
    /// feature on only when there is content to write into it. Features
    /// this restore does not need are left untouched, never disabled.
    async fn enable_features(
        &self,
        workspace: &str,
        slug: &str,
        issues: bool,
        wiki: bool,
    ) -> ApiResult<()> {
        match self
            .client
            .enable_repository_features(workspace, slug, issues, wiki)
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if e.is_account_fatal() => Err(e),
            Err(e) => {
                warn!(workspace, slug, error = %e, "Could not enable repository features");
                Ok(())
            }
        }
    }

    async fn restore_issues(
        &self,
        workspace: &str,
        slug: &str,
        issues: &[Issue],
    ) -> ApiResult<RestoreSummary> {
        let mut summary = RestoreSummary::default();

        for issue in issues {
            let header = attribution(
                issue.reporter.as_ref(),
                &date_string(&issue.created_on),
                "Issue",
            );
            let body = format!("{}{}", header, issue.content.raw);

            let created = match self
                .client
                .create_issue(workspace, slug, &issue.title, &body)
                .await
            {
                Ok(created) => {
                    summary.ok();
                    created
                }
                Err(e) if e.is_account_fatal() => return Err(e),
                Err(e) => {
                    warn!(workspace, slug, issue = issue.id, error = %e, "Failed to restore issue");
                    summary.err();
                    continue;
                }
            };

            // Comments replay in captured order under the new issue id
            for comment in &issue.comments {
                let header = attribution(
                    comment.user.as_ref(),
                    &date_string(&comment.created_on),
                    "Issue Comment",
                );
                let body = format!("{}{}", header, comment.content.raw);
                match self
                    .client
                    .create_issue_comment(workspace, slug, created.id, &body)
                    .await
                {
                    Ok(_) => summary.ok(),
                    Err(e) if e.is_account_fatal() => return Err(e),
                    Err(e) => {
                        warn!(
                            workspace, slug, issue = issue.id, error = %e,
                            "Failed to restore issue comment"
                        );
                        summary.err();
                    }
                }
            }
        }

        debug!(workspace, slug, count = issues.len(), "Issues restored");
        Ok(summary)
    }

    async fn restore_wiki(
        &self,
        workspace: &str,
        slug: &str,
        pages: &[WikiPage],
    ) -> ApiResult<RestoreSummary> {
        let mut summary = RestoreSummary::default();

        // Captured bundles hold pages sorted by path already; keep the
        // order stable even for hand-edited bundles.
        let mut ordered: Vec<&WikiPage> = pages.iter().collect();
        ordered.sort_by(|a, b| a.path.cmp(&b.path));

        for page in ordered {
            let header = attribution(
                page.author.as_ref(),
                &date_string(&page.updated_on),
                "Wiki Page",
            );
            let body = format!("{}{}", header, page.content);
            match self
                .client
                .put_wiki_page(workspace, slug, &page.path, &body)
                .await
            {
                Ok(_) => summary.ok(),
                Err(e) if e.is_account_fatal() => return Err(e),
                Err(e) => {
                    warn!(workspace, slug, page = %page.path, error = %e, "Failed to restore wiki page");
                    summary.err();
                }
            }
        }

        Ok(summary)
    }

    /// Pull requests cannot be recreated against rewritten history, so
    /// their record survives as one consolidated documentation issue.
    async fn document_pull_requests(
        &self,
        workspace: &str,
        slug: &str,
        prs: &[PullRequest],
    ) -> ApiResult<RestoreSummary> {
        let mut summary = RestoreSummary::default();
        let body = pull_request_document(prs);

        match self
            .client
            .create_issue(
                workspace,
                slug,
                &format!("📋 Migrated Pull Request History ({} PRs)", prs.len()),
                &body,
            )
            .await
        {
            Ok(_) => summary.ok(),
            Err(e) if e.is_account_fatal() => return Err(e),
            Err(e) => {
                warn!(workspace, slug, error = %e, "Failed to create pull request documentation issue");
                summary.err();
            }
        }

        Ok(summary)
    }

    async fn restore_permissions(
        &self,
        workspace: &str,
        slug: &str,
        bundle: &MetadataBundle,
    ) -> ApiResult<RestoreSummary> {
        let mut summary = RestoreSummary::default();
        for perm in &bundle.permissions {
            let Some(user) = perm.user.as_ref().filter(|u| !u.username.is_empty()) else {
                continue;
            };
            match self
                .client
                .set_user_permission(workspace, slug, &user.username, &perm.permission)
                .await
            {
                Ok(_) => summary.ok(),
                Err(e) if e.is_account_fatal() => return Err(e),
                Err(e) => {
                    warn!(workspace, slug, user = %user.username, error = %e, "Failed to restore permission");
                    summary.err();
                }
            }
        }
        Ok(summary)
    }

    async fn restore_webhooks(
        &self,
        workspace: &str,
        slug: &str,
        bundle: &MetadataBundle,
    ) -> ApiResult<RestoreSummary> {
        let mut summary = RestoreSummary::default();
        for hook in &bundle.webhooks {
            match self.client.create_webhook(workspace, slug, hook).await {
                Ok(_) => summary.ok(),
                Err(e) if e.is_account_fatal() => return Err(e),
                Err(e) => {
                    warn!(workspace, slug, url = %hook.url, error = %e, "Failed to restore webhook");
                    summary.err();
                }
            }
        }
        Ok(summary)
    }

    async fn restore_branch_restrictions(
        &self,
        workspace: &str,
        slug: &str,
        bundle: &MetadataBundle,
    ) -> ApiResult<RestoreSummary> {
        let mut summary = RestoreSummary::default();
        for restriction in &bundle.branch_restrictions {
            match self
                .client
                .create_branch_restriction(workspace, slug, restriction)
                .await
            {
                Ok(_) => summary.ok(),
                Err(e) if e.is_account_fatal() => return Err(e),
                Err(e) => {
                    warn!(workspace, slug, kind = %restriction.kind, error = %e, "Failed to restore branch restriction");
                    summary.err();
                }
            }
        }
        Ok(summary)
    }

    async fn restore_deploy_keys(
        &self,
        workspace: &str,
        slug: &str,
        bundle: &MetadataBundle,
    ) -> ApiResult<RestoreSummary> {
        let mut summary = RestoreSummary::default();
        for key in &bundle.deploy_keys {
            match self.client.create_deploy_key(workspace, slug, key).await {
                Ok(_) => summary.ok(),
                Err(e) if e.is_account_fatal() => return Err(e),
                Err(e) => {
                    warn!(workspace, slug, label = %key.label, error = %e, "Failed to restore deploy key");
                    summary.err();
                }
            }
        }
        Ok(summary)
    }
}

/// Markdown body of the consolidated pull request documentation issue.
fn pull_request_document(prs: &[PullRequest]) -> String {
    let mut body = String::from(
        "Pull requests cannot be recreated after a history migration; this \
         issue preserves their record.\n",
    );

    for pr in prs {
        let author = pr
            .author
            .as_ref()
            .map(|a| {
                if a.display_name.is_empty() {
                    a.username.clone()
                } else {
                    a.display_name.clone()
                }
            })
            .unwrap_or_else(|| "Unknown".to_string());

        body.push_str(&format!(
            "\n## PR #{}: {}\n\
             - **State:** {}\n\
             - **Author:** {}\n\
             - **Branches:** `{}` → `{}`\n\
             - **Created:** {}\n",
            pr.id,
            pr.title,
            pr.state.as_deref().unwrap_or("UNKNOWN"),
            author,
            pr.source_branch(),
            pr.destination_branch(),
            date_string(&pr.created_on),
        ));

        if !pr.description.is_empty() {
            body.push_str(&format!("\n{}\n", pr.description));
        }

        for comment in &pr.comments {
            let who = comment
                .user
                .as_ref()
                .map(|u| u.display_name.clone())
                .filter(|d| !d.is_empty())
                .unwrap_or_else(|| "Unknown".to_string());
            body.push_str(&format!(
                "\n> **{}** ({}): {}\n",
                who,
                date_string(&comment.created_on),
                comment.content.raw
            ));
        }
    }

    body
}
