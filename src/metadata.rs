//! Collaboration-metadata capture for one repository.
//!
//! Each sub-fetch (issues, PRs, wiki, branches, tags, permissions,
//! webhooks, deploy keys, branch restrictions) is independent: a failure
//! in one category is recorded on the bundle and capture continues with
//! the next. Missing features (wiki or issue tracker disabled) are
//! zero-count successes, not errors. Only an authentication failure —
//! which would poison every remaining call on the account — propagates.

use tracing::{debug, info, warn};

use crate::api::BitbucketClient;
use crate::error::ApiResult;
use crate::models::{MetadataBundle, Repository};

pub struct MetadataCapture<'a> {
    client: &'a BitbucketClient,
}

impl<'a> MetadataCapture<'a> {
    pub fn new(client: &'a BitbucketClient) -> Self {
        Self { client }
    }

    /// Fetch and assemble the full metadata bundle for one repository.
    pub async fn capture(&self, repo: &Repository) -> ApiResult<MetadataBundle> {
        let workspace = repo.workspace_slug().to_string();
        let slug = repo.slug.clone();
        let mut bundle = MetadataBundle::new(&workspace, &slug);

        info!(repo = %repo.full_name, "Capturing metadata");

        if repo.has_issues {
            match self.client.list_issues(&workspace, &slug).await {
                Ok(mut issues) => {
                    let mut comments_lost = false;
                    for issue in &mut issues {
                        match self
                            .client
                            .list_issue_comments(&workspace, &slug, issue.id)
                            .await
                        {
                            Ok(comments) => issue.comments = comments,
                            Err(e) if e.is_account_fatal() => return Err(e),
                            Err(e) => {
                                // One issue's comments are lost, the issue stays
                                warn!(issue = issue.id, error = %e, "Failed to fetch issue comments");
                                comments_lost = true;
                            }
                        }
                    }
                    if comments_lost {
                        bundle.failed_categories.push("issue_comments".to_string());
                    }
                    bundle.issues = issues;
                }
                Err(e) if e.is_account_fatal() => return Err(e),
                Err(e) => {
                    warn!(error = %e, "Failed to fetch issues");
                    bundle.failed_categories.push("issues".to_string());
                }
            }
        } else {
            debug!(repo = %repo.full_name, "Issue tracker disabled, zero issues");
        }

        match self.client.list_pull_requests(&workspace, &slug).await {
            Ok(mut prs) => {
                let mut comments_lost = false;
                for pr in &mut prs {
                    match self
                        .client
                        .list_pull_request_comments(&workspace, &slug, pr.id)
                        .await
                    {
                        Ok(comments) => pr.comments = comments,
                        Err(e) if e.is_account_fatal() => return Err(e),
                        Err(e) => {
                            warn!(pr = pr.id, error = %e, "Failed to fetch PR comments");
                            comments_lost = true;
                        }
                    }
                }
                if comments_lost {
                    bundle.failed_categories.push("pr_comments".to_string());
                }
                bundle.pull_requests = prs;
            }
            Err(e) if e.is_account_fatal() => return Err(e),
            Err(e) => {
                warn!(error = %e, "Failed to fetch pull requests");
                bundle.failed_categories.push("pull_requests".to_string());
            }
        }

        if repo.has_wiki {
            match self.client.list_wiki_pages(&workspace, &slug).await {
                Ok(mut pages) => {
                    // Restoration replays pages in path order
                    pages.sort_by(|a, b| a.path.cmp(&b.path));
                    bundle.wiki_pages = pages;
                }
                Err(e) if e.is_account_fatal() => return Err(e),
                Err(e) => {
                    warn!(error = %e, "Failed to fetch wiki pages");
                    bundle.failed_categories.push("wiki_pages".to_string());
                }
            }
        } else {
            debug!(repo = %repo.full_name, "Wiki disabled, zero pages");
        }

        macro_rules! capture_category {
            ($field:ident, $call:expr, $name:literal) => {
                match $call.await {
                    Ok(values) => bundle.$field = values,
                    Err(e) if e.is_account_fatal() => return Err(e),
                    Err(e) => {
                        warn!(category = $name, error = %e, "Failed to fetch metadata category");
                        bundle.failed_categories.push($name.to_string());
                    }
                }
            };
        }

        capture_category!(branches, self.client.list_branches(&workspace, &slug), "branches");
        capture_category!(tags, self.client.list_tags(&workspace, &slug), "tags");
        capture_category!(
            permissions,
            self.client.list_permissions(&workspace, &slug),
            "permissions"
        );
        capture_category!(webhooks, self.client.list_webhooks(&workspace, &slug), "webhooks");
        capture_category!(
            deploy_keys,
            self.client.list_deploy_keys(&workspace, &slug),
            "deploy_keys"
        );
        capture_category!(
            branch_restrictions,
            self.client.list_branch_restrictions(&workspace, &slug),
            "branch_restrictions"
        );

        bundle.finalize();

        info!(
            repo = %repo.full_name,
            issues = bundle.total_issues,
            prs = bundle.total_prs,
            wiki_pages = bundle.total_wiki_pages,
            branches = bundle.total_branches,
            tags = bundle.total_tags,
            total_items = bundle.total_items(),
            partial = bundle.is_partial(),
            "Metadata capture complete"
        );

        Ok(bundle)
    }
}
