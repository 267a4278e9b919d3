//! RepoVault - Bitbucket Repository Backup & Migration Engine
//!
//! RepoVault discovers repositories across Bitbucket workspaces, mirrors
//! them with full history, captures their collaboration metadata, and packs
//! everything into rotating compressed archives. In migration mode it also
//! pushes the mirrors into a destination account and replays the captured
//! metadata there.
//!
//! ## Core Features
//!
//! - **Discovery & Filtering**: Exhaustive workspace/repository enumeration
//!   with include/exclude patterns and a hard repository cap
//! - **Mirror Sync**: Full-history `git clone --mirror` / `git push --mirror`
//!   with timeouts and automatic cleanup of partial clones
//! - **Metadata Capture**: Issues, pull requests, wiki pages, permissions,
//!   webhooks, deploy keys and branch restrictions, tolerant of per-category
//!   failures
//! - **Archives & Retention**: Deterministically named `.tar.gz` backups
//!   with a fixed-size rotation per repository
//! - **Collaboration Restore**: Replays issues, wikis and PR documentation
//!   into the destination with attribution headers
//!
//! ## Modules
//!
//! - [`config`]: YAML configuration with validation
//! - [`api`]: Bitbucket API 2.0 client with retry and pagination
//! - [`engine`]: Orchestration of the per-repository pipeline

pub mod api;
pub mod archive;
pub mod config;
pub mod discovery;
pub mod engine;
pub mod error;
pub mod metadata;
pub mod mirror;
pub mod models;
pub mod report;
pub mod restore;
pub mod retention;
pub mod retry;

pub use api::BitbucketClient;
pub use config::Config;
pub use engine::{BackupEngine, CancelHandle};
pub use error::{ApiError, ApiResult};
pub use report::{RepoOutcome, RepoStatus, RunReport};
