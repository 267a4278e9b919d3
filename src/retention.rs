//! Rotation of old backup archives.
//!
//! Each repository keeps at most `max_backups` archives; older ones are
//! deleted after every successful backup. Ordering comes from the
//! `backup-info.json` record embedded in each archive, with the filesystem
//! modification time as a fallback for archives that cannot be opened.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::models::BackupInfo;

/// Deletes all but the newest `max_backups` archives in `repo_dir`.
///
/// Returns the paths that were removed. Deletion failures are logged and
/// skipped; a stubborn file never fails the backup that triggered the
/// rotation. Running twice in a row is a no-op the second time.
pub async fn rotate(repo_dir: &Path, max_backups: usize) -> Result<Vec<PathBuf>> {
    if max_backups == 0 || !repo_dir.is_dir() {
        return Ok(Vec::new());
    }

    let dir = repo_dir.to_path_buf();
    let mut archives = tokio::task::spawn_blocking(move || scan_archives(&dir))
        .await
        .context("Retention scan task panicked")??;

    if archives.len() <= max_backups {
        return Ok(Vec::new());
    }

    // Newest first, keep the head
    archives.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    let mut removed = Vec::new();
    for stale in archives.split_off(max_backups) {
        match tokio::fs::remove_file(&stale.path).await {
            Ok(()) => {
                debug!(file = %stale.path.display(), "Removed old backup");
                removed.push(stale.path);
            }
            Err(e) => {
                warn!(file = %stale.path.display(), error = %e, "Failed to remove old backup");
            }
        }
    }
    Ok(removed)
}

struct ArchiveAge {
    path: PathBuf,
    created_at: DateTime<Utc>,
}

fn scan_archives(repo_dir: &Path) -> Result<Vec<ArchiveAge>> {
    let mut out = Vec::new();
    for entry in std::fs::read_dir(repo_dir).context("Failed to read archive directory")? {
        let entry = entry?;
        let path = entry.path();
        if !path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.ends_with(".tar.gz"))
            .unwrap_or(false)
        {
            continue;
        }
        let created_at = embedded_created_at(&path).unwrap_or_else(|| {
            entry
                .metadata()
                .and_then(|m| m.modified())
                .map(DateTime::<Utc>::from)
                .unwrap_or_else(|_| Utc::now())
        });
        out.push(ArchiveAge { path, created_at });
    }
    Ok(out)
}

/// Creation timestamp from the archive's embedded `backup-info.json`,
/// if the archive is readable and carries one.
fn embedded_created_at(path: &Path) -> Option<DateTime<Utc>> {
    let file = File::open(path).ok()?;
    let mut archive = tar::Archive::new(GzDecoder::new(file));
    for entry in archive.entries().ok()? {
        let mut entry = entry.ok()?;
        let is_info = entry
            .path()
            .ok()
            .map(|p| p.as_os_str() == "backup-info.json")
            .unwrap_or(false);
        if is_info {
            let mut buf = String::new();
            entry.read_to_string(&mut buf).ok()?;
            return serde_json::from_str::<BackupInfo>(&buf)
                .ok()
                .map(|i| i.created_at);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use flate2::write::GzEncoder;
    use flate2::Compression;

    fn write_archive(dir: &Path, name: &str, created_at: DateTime<Utc>) -> PathBuf {
        let info = BackupInfo {
            created_at,
            workspace: "acme".into(),
            repo_slug: "web".into(),
            metadata_items: 0,
            size_bytes: 0,
            engine_version: "0.0.0".into(),
            migration_mode: false,
        };
        let json = serde_json::to_vec(&info).unwrap();

        let path = dir.join(name);
        let file = File::create(&path).unwrap();
        let mut tar = tar::Builder::new(GzEncoder::new(file, Compression::default()));
        let mut header = tar::Header::new_gnu();
        header.set_size(json.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        tar.append_data(&mut header, "backup-info.json", json.as_slice())
            .unwrap();
        tar.into_inner().unwrap().finish().unwrap();
        path
    }

    #[tokio::test]
    async fn test_rotation_keeps_newest_five() {
        let temp = tempfile::TempDir::new().unwrap();
        let mut paths = Vec::new();
        for day in 1..=6 {
            let ts = Utc.with_ymd_and_hms(2024, 1, day, 12, 0, 0).unwrap();
            paths.push(write_archive(
                temp.path(),
                &format!("acme_web_2024-01-0{}_12-00-00_meta0_0.0MB.tar.gz", day),
                ts,
            ));
        }

        let removed = rotate(temp.path(), 5).await.unwrap();
        assert_eq!(removed, vec![paths[0].clone()]);
        assert!(!paths[0].exists());
        for kept in &paths[1..] {
            assert!(kept.exists());
        }
    }

    #[tokio::test]
    async fn test_rotation_is_idempotent() {
        let temp = tempfile::TempDir::new().unwrap();
        for day in 1..=6 {
            let ts = Utc.with_ymd_and_hms(2024, 2, day, 8, 0, 0).unwrap();
            write_archive(temp.path(), &format!("a_b_{}.tar.gz", day), ts);
        }

        let first = rotate(temp.path(), 5).await.unwrap();
        assert_eq!(first.len(), 1);
        let second = rotate(temp.path(), 5).await.unwrap();
        assert!(second.is_empty());
    }

    #[tokio::test]
    async fn test_under_limit_removes_nothing() {
        let temp = tempfile::TempDir::new().unwrap();
        let ts = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        write_archive(temp.path(), "only.tar.gz", ts);

        let removed = rotate(temp.path(), 5).await.unwrap();
        assert!(removed.is_empty());
    }

    #[tokio::test]
    async fn test_unreadable_archive_falls_back_to_mtime() {
        let temp = tempfile::TempDir::new().unwrap();
        // Garbage bytes, not a valid gzip stream
        std::fs::write(temp.path().join("corrupt.tar.gz"), b"not gzip").unwrap();
        for day in 1..=5 {
            let ts = Utc.with_ymd_and_hms(2024, 4, day, 0, 0, 0).unwrap();
            write_archive(temp.path(), &format!("ok_{}.tar.gz", day), ts);
        }

        // Must not error; exactly one archive goes
        let removed = rotate(temp.path(), 5).await.unwrap();
        assert_eq!(removed.len(), 1);
    }

    #[tokio::test]
    async fn test_missing_directory_is_noop() {
        let temp = tempfile::TempDir::new().unwrap();
        let removed = rotate(&temp.path().join("nope"), 5).await.unwrap();
        assert!(removed.is_empty());
    }

    #[tokio::test]
    async fn test_non_archive_files_untouched() {
        let temp = tempfile::TempDir::new().unwrap();
        std::fs::write(temp.path().join("notes.txt"), "keep me").unwrap();
        for day in 1..=6 {
            let ts = Utc.with_ymd_and_hms(2024, 5, day, 0, 0, 0).unwrap();
            write_archive(temp.path(), &format!("r_{}.tar.gz", day), ts);
        }

        rotate(temp.path(), 5).await.unwrap();
        assert!(temp.path().join("notes.txt").exists());
    }
}
