// db-backuper/src/storage/local.rs
use async_trait::async_trait;
use chrono::NaiveDate;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use super::retention::{self, cutoff_date, is_expired, parse_date_segment};
use super::{normalize_prefix, storage_key, StorageBackend, SweepReport};
use crate::errors::{AppError, Result};

const TEST_FILE_NAME: &str = ".test-write";

/// Artifacts kept in a directory tree on the local filesystem (or a mounted volume).
#[derive(Debug, Clone)]
pub struct FilesystemStorage {
    root: PathBuf,
}

impl FilesystemStorage {
    /// Creates the backup root if it is missing.
    pub fn new(root: &Path) -> Result<Self> {
        fs::create_dir_all(root).map_err(|e| {
            AppError::StorageUnreachable(format!(
                "failed to create backup directory {}: {}",
                root.display(),
                e
            ))
        })?;
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn prefix_dir(&self, prefix: &str) -> PathBuf {
        let prefix = normalize_prefix(prefix);
        if prefix.is_empty() {
            self.root.clone()
        } else {
            self.root.join(prefix)
        }
    }
}

#[async_trait]
impl StorageBackend for FilesystemStorage {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn save_artifact(&self, local_path: &Path, prefix: &str, database: &str) -> Result<String> {
        let transfer_failed = |reason: String| AppError::TransferFailed {
            database: database.to_string(),
            reason,
        };

        let filename = local_path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| transfer_failed(format!("invalid artifact path {}", local_path.display())))?;

        let key = storage_key(prefix, database, retention::today(), filename);
        let destination = self.root.join(&key);

        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                transfer_failed(format!("failed to create directory {}: {}", parent.display(), e))
            })?;
        }

        let bytes = tokio::fs::copy(local_path, &destination).await.map_err(|e| {
            transfer_failed(format!(
                "failed to copy {} to {}: {}",
                local_path.display(),
                destination.display(),
                e
            ))
        })?;

        info!("Backup saved to local storage: {} ({} bytes)", destination.display(), bytes);
        Ok(destination.to_string_lossy().into_owned())
    }

    async fn delete_expired(&self, prefix: &str, retention_days: u32) -> Result<SweepReport> {
        let cutoff = cutoff_date(retention::today(), retention_days);
        let base = self.prefix_dir(prefix);

        info!(
            "Deleting backups older than {} days (before {})",
            retention_days,
            cutoff.format(retention::DATE_FORMAT)
        );

        tokio::task::spawn_blocking(move || sweep_date_dirs(&base, cutoff))
            .await
            .map_err(|e| AppError::SweepFailed(format!("local sweep task failed: {}", e)))?
    }

    async fn test_connection(&self) -> Result<()> {
        let test_file = self.root.join(TEST_FILE_NAME);

        tokio::fs::write(&test_file, b"").await.map_err(|e| {
            AppError::StorageUnreachable(format!(
                "failed to create test file in backup directory {}: {}",
                self.root.display(),
                e
            ))
        })?;

        if let Err(e) = tokio::fs::remove_file(&test_file).await {
            warn!("Failed to remove test file {}: {}", test_file.display(), e);
        }

        info!("Local storage connection test successful");
        Ok(())
    }
}

/// Walks `{base}/{database}/{date}` and removes every date directory before
/// `cutoff`. Blocking; run it off the async executor.
fn sweep_date_dirs(base: &Path, cutoff: NaiveDate) -> Result<SweepReport> {
    if !base.exists() {
        info!("Backup directory {} does not exist, nothing to clean up", base.display());
        return Ok(SweepReport::default());
    }
    fs::read_dir(base).map_err(|e| {
        AppError::SweepFailed(format!("failed to read backup directory {}: {}", base.display(), e))
    })?;

    let mut report = SweepReport::default();

    for entry in WalkDir::new(base).min_depth(2).max_depth(2).sort_by_file_name() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Skipping unreadable entry under {}: {}", base.display(), e);
                report.skipped += 1;
                continue;
            }
        };

        let name = entry.file_name().to_string_lossy();
        if !entry.file_type().is_dir() {
            warn!("Skipping unexpected file in backup tree: {}", entry.path().display());
            report.skipped += 1;
            continue;
        }

        let Some(date) = parse_date_segment(&name) else {
            warn!("Skipping directory with invalid date format: {}", entry.path().display());
            report.skipped += 1;
            continue;
        };

        if !is_expired(date, cutoff) {
            debug!("Keeping {}", entry.path().display());
            continue;
        }

        let artifacts = WalkDir::new(entry.path())
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .count();

        info!("Deleting old backup directory: {}", entry.path().display());
        match fs::remove_dir_all(entry.path()) {
            Ok(()) => report.deleted += artifacts,
            Err(e) => warn!("Failed to delete directory {}: {}", entry.path().display(), e),
        }
    }

    info!(
        "Deleted {} old backups ({} entries skipped)",
        report.deleted, report.skipped
    );
    Ok(report)
}
