pub mod local;
pub mod retention;
pub mod s3;

use async_trait::async_trait;
use chrono::NaiveDate;
use std::path::Path;

use crate::config::StorageConfig;
use crate::errors::Result;

pub use local::FilesystemStorage;
pub use s3::S3Storage;

/// Outcome of one retention sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub deleted: usize,
    /// Entries whose path/key did not have the expected shape.
    pub skipped: usize,
}

/// Where dump artifacts end up. Both implementations lay artifacts out as
/// `{prefix}/{database}/{YYYY-MM-DD}/{filename}`.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Copies the local artifact under today's date and returns where it landed.
    async fn save_artifact(&self, local_path: &Path, prefix: &str, database: &str)
        -> Result<String>;

    /// Deletes every artifact under `prefix` dated strictly before `today - retention_days`.
    async fn delete_expired(&self, prefix: &str, retention_days: u32) -> Result<SweepReport>;

    async fn test_connection(&self) -> Result<()>;
}

/// Leading and trailing slashes are not part of the prefix.
pub fn normalize_prefix(prefix: &str) -> &str {
    prefix.trim_matches('/')
}

/// `{prefix}/{database}/{YYYY-MM-DD}/{filename}`, always relative.
pub fn storage_key(prefix: &str, database: &str, date: NaiveDate, filename: &str) -> String {
    let date = date.format(retention::DATE_FORMAT);
    let prefix = normalize_prefix(prefix);
    if prefix.is_empty() {
        format!("{}/{}/{}", database, date, filename)
    } else {
        format!("{}/{}/{}/{}", prefix, database, date, filename)
    }
}

/// Builds the configured backend. Called once at startup.
pub async fn build_storage(config: &StorageConfig) -> Result<Box<dyn StorageBackend>> {
    match config {
        StorageConfig::Local(local) => {
            let storage = FilesystemStorage::new(&local.path)?;
            tracing::info!("Using local storage for backups: {}", local.path.display());
            Ok(Box::new(storage))
        }
        StorageConfig::S3(aws) => {
            let storage = S3Storage::from_config(aws).await;
            tracing::info!("Using S3 bucket {} for backups", aws.bucket);
            Ok(Box::new(storage))
        }
    }
}
