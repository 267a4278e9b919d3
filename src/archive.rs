//! Compressed backup archive construction.
//!
//! One `.tar.gz` per (workspace, repository, timestamp), containing exactly
//! the mirrored repository tree (`repository-{repo}/`), the metadata
//! document (`metadata-{repo}.json`) and a small `backup-info.json` record.
//! The archive is written under a temporary name and atomically renamed
//! into place, so a partially written file is never visible under its
//! final name.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::models::{BackupInfo, MetadataBundle};

/// Archive filename: a pure function of its inputs. Two calls with
/// identical arguments produce byte-identical text.
///
/// Format: `WORKSPACE_REPO_YYYY-MM-DD_HH-MM-SS_metaCOUNT_SIZEMB.tar.gz`,
/// size printed with one decimal place and a literal `MB` suffix.
pub fn archive_file_name(
    workspace: &str,
    repo_slug: &str,
    timestamp: &DateTime<Utc>,
    meta_count: usize,
    size_mb: f64,
) -> String {
    format!(
        "{}_{}_{}_meta{}_{:.1}MB.tar.gz",
        workspace,
        repo_slug,
        timestamp.format("%Y-%m-%d_%H-%M-%S"),
        meta_count,
        size_mb
    )
}

/// Total size in bytes of all files under `path`, recursively.
pub fn directory_size_bytes(path: &Path) -> std::io::Result<u64> {
    let mut total = 0u64;
    for entry in std::fs::read_dir(path)? {
        let entry = entry?;
        let meta = entry.metadata()?;
        if meta.is_dir() {
            total += directory_size_bytes(&entry.path())?;
        } else {
            total += meta.len();
        }
    }
    Ok(total)
}

/// A finished archive on disk.
#[derive(Debug)]
pub struct ArchiveResult {
    pub path: PathBuf,
    pub file_name: String,
    pub archive_size_bytes: u64,
    pub info: BackupInfo,
}

/// Builds compressed backup archives under `{archives_root}/{ws}/{repo}/`.
pub struct ArchiveBuilder {
    archives_root: PathBuf,
    migration_mode: bool,
}

impl ArchiveBuilder {
    pub fn new(archives_root: PathBuf, migration_mode: bool) -> Self {
        Self {
            archives_root,
            migration_mode,
        }
    }

    /// Directory holding all archives for one repository.
    pub fn repo_archive_dir(&self, workspace: &str, repo_slug: &str) -> PathBuf {
        self.archives_root.join(workspace).join(repo_slug)
    }

    /// Package a completed mirror and metadata bundle into one archive.
    ///
    /// The mirror directory and the bundle are both fully complete by the
    /// time this runs; the per-repository pipeline is strictly sequential.
    pub async fn build(
        &self,
        workspace: &str,
        repo_slug: &str,
        mirror_dir: &Path,
        bundle: &MetadataBundle,
    ) -> Result<ArchiveResult> {
        let created_at = Utc::now();
        let mirror_bytes =
            directory_size_bytes(mirror_dir).context("Failed to measure mirror size")?;
        // Size field is measured before compression
        let size_mb = mirror_bytes as f64 / (1024.0 * 1024.0);
        let meta_count = bundle.total_items();

        let file_name = archive_file_name(workspace, repo_slug, &created_at, meta_count, size_mb);

        let info = BackupInfo {
            created_at,
            workspace: workspace.to_string(),
            repo_slug: repo_slug.to_string(),
            metadata_items: meta_count,
            size_bytes: mirror_bytes,
            engine_version: env!("CARGO_PKG_VERSION").to_string(),
            migration_mode: self.migration_mode,
        };

        let dir = self.repo_archive_dir(workspace, repo_slug);
        tokio::fs::create_dir_all(&dir)
            .await
            .context("Failed to create archive directory")?;

        let final_path = dir.join(&file_name);
        let tmp_path = dir.join(format!("{}.tmp", file_name));

        let metadata_json =
            serde_json::to_vec_pretty(bundle).context("Failed to serialize metadata bundle")?;
        let info_json =
            serde_json::to_vec_pretty(&info).context("Failed to serialize backup info")?;

        debug!(file = %final_path.display(), "Packing archive");

        // Tar packing is blocking IO
        let mirror_dir = mirror_dir.to_path_buf();
        let repo_slug_owned = repo_slug.to_string();
        let tmp = tmp_path.clone();
        let pack = tokio::task::spawn_blocking(move || -> Result<()> {
            let file = File::create(&tmp).context("Failed to create archive file")?;
            let encoder = GzEncoder::new(file, Compression::default());
            let mut tar = tar::Builder::new(encoder);

            tar.append_dir_all(format!("repository-{}", repo_slug_owned), &mirror_dir)
                .context("Failed to add mirror tree to archive")?;

            append_bytes(
                &mut tar,
                &format!("metadata-{}.json", repo_slug_owned),
                &metadata_json,
            )?;
            append_bytes(&mut tar, "backup-info.json", &info_json)?;

            let encoder = tar.into_inner().context("Failed to finalize archive")?;
            encoder.finish().context("Failed to flush compressed data")?;
            Ok(())
        })
        .await
        .context("Archive task panicked")?;

        if let Err(e) = pack {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(e);
        }

        // Visible under the final name only once fully written
        tokio::fs::rename(&tmp_path, &final_path)
            .await
            .context("Failed to move archive into place")?;

        let archive_size_bytes = tokio::fs::metadata(&final_path)
            .await
            .map(|m| m.len())
            .unwrap_or(0);

        info!(
            file = %final_path.display(),
            bytes = archive_size_bytes,
            items = meta_count,
            "Archive created"
        );

        Ok(ArchiveResult {
            path: final_path,
            file_name,
            archive_size_bytes,
            info,
        })
    }
}

fn append_bytes<W: std::io::Write>(
    tar: &mut tar::Builder<W>,
    name: &str,
    bytes: &[u8],
) -> Result<()> {
    let mut header = tar::Header::new_gnu();
    header.set_size(bytes.len() as u64);
    header.set_mode(0o644);
    header.set_mtime(Utc::now().timestamp() as u64);
    header.set_cksum();
    tar.append_data(&mut header, name, bytes)
        .with_context(|| format!("Failed to add {} to archive", name))?;
    Ok(())
}
