// db-backuper/src/storage/s3.rs
use async_trait::async_trait;
use aws_sdk_s3 as s3;
use chrono::NaiveDate;
use s3::config::Region;
use s3::error::DisplayErrorContext;
use s3::primitives::ByteStream;
use s3::types::{Delete, ObjectIdentifier};
use std::path::Path;
use tracing::{info, warn};

use super::retention::{self, cutoff_date, date_segment_of_key, is_expired, parse_date_segment};
use super::{normalize_prefix, storage_key, StorageBackend, SweepReport};
use crate::config::AwsConfig;
use crate::errors::{AppError, Result};

/// DeleteObjects accepts at most this many keys per request.
pub const MAX_DELETE_BATCH: usize = 1000;

/// Artifacts kept in an S3 (or S3-compatible) bucket.
#[derive(Debug, Clone)]
pub struct S3Storage {
    client: s3::Client,
    bucket: String,
}

impl S3Storage {
    pub fn new(client: s3::Client, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
        }
    }

    /// Static credentials are only used when configured; otherwise the default
    /// AWS provider chain (environment, profile, instance/task role) applies.
    pub async fn from_config(aws: &AwsConfig) -> Self {
        let mut loader = aws_config::defaults(s3::config::BehaviorVersion::latest())
            .region(Region::new(aws.region.clone()));

        if !aws.access_key_id.is_empty() && !aws.secret_access_key.is_empty() {
            loader = loader.credentials_provider(s3::config::Credentials::new(
                &aws.access_key_id,
                &aws.secret_access_key,
                None, // session_token
                None, // expiry
                "Static", // provider_name
            ));
        }

        let sdk_config = loader.load().await;
        let mut builder = s3::config::Builder::from(&sdk_config);
        if let Some(endpoint) = aws.endpoint_url.as_deref().filter(|e| !e.is_empty()) {
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }

        Self::new(s3::Client::from_conf(builder.build()), aws.bucket.clone())
    }

    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>> {
        let prefix = normalize_prefix(prefix);
        let list_prefix = if prefix.is_empty() {
            String::new()
        } else {
            format!("{}/", prefix)
        };

        let mut pages = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(list_prefix)
            .into_paginator()
            .send();

        let mut keys = Vec::new();
        while let Some(page) = pages.next().await {
            let page = page.map_err(|e| {
                AppError::SweepFailed(format!(
                    "failed to list objects in bucket {}: {}",
                    self.bucket,
                    DisplayErrorContext(&e)
                ))
            })?;
            keys.extend(page.contents().iter().filter_map(|o| o.key()).map(str::to_string));
        }
        Ok(keys)
    }

    /// Returns the number of objects the service reported as deleted, or an
    /// error if the request itself failed.
    async fn delete_batch(&self, batch: &[String]) -> std::result::Result<usize, String> {
        let objects = batch
            .iter()
            .map(|key| ObjectIdentifier::builder().key(key).build())
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| e.to_string())?;
        let delete = Delete::builder()
            .set_objects(Some(objects))
            .build()
            .map_err(|e| e.to_string())?;

        let output = self
            .client
            .delete_objects()
            .bucket(&self.bucket)
            .delete(delete)
            .send()
            .await
            .map_err(|e| DisplayErrorContext(&e).to_string())?;

        for err in output.errors() {
            warn!(
                "Failed to delete {}: {}",
                err.key().unwrap_or("<unknown key>"),
                err.message().unwrap_or("unknown error")
            );
        }
        if !output.errors().is_empty() {
            warn!("Encountered {} errors during deletion", output.errors().len());
        }
        Ok(output.deleted().len())
    }
}

/// Picks the expired keys out of a listing. Keys that do not look like
/// `{prefix}/{database}/{YYYY-MM-DD}/{filename}` are counted as skipped.
pub(crate) fn plan_expired_keys<'a, I>(keys: I, prefix: &str, cutoff: NaiveDate) -> (Vec<String>, usize)
where
    I: IntoIterator<Item = &'a str>,
{
    let mut expired = Vec::new();
    let mut skipped = 0;

    for key in keys {
        let Some(date) = date_segment_of_key(key, prefix).and_then(parse_date_segment) else {
            warn!("Skipping object with unexpected key layout: {}", key);
            skipped += 1;
            continue;
        };
        if is_expired(date, cutoff) {
            info!("Marking for deletion: {} (date: {})", key, date);
            expired.push(key.to_string());
        }
    }
    (expired, skipped)
}

#[async_trait]
impl StorageBackend for S3Storage {
    fn name(&self) -> &'static str {
        "s3"
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

        info!("Uploading backup to S3: s3://{}/{}", self.bucket, key);

        let body = ByteStream::from_path(local_path).await.map_err(|e| {
            transfer_failed(format!(
                "failed to open {} for upload: {}",
                local_path.display(),
                e
            ))
        })?;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .body(body)
            .send()
            .await
            .map_err(|e| {
                transfer_failed(format!(
                    "failed to upload to s3://{}/{}: {}",
                    self.bucket,
                    key,
                    DisplayErrorContext(&e)
                ))
            })?;

        info!("Backup uploaded successfully to: s3://{}/{}", self.bucket, key);
        Ok(key)
    }

    async fn delete_expired(&self, prefix: &str, retention_days: u32) -> Result<SweepReport> {
        let cutoff = cutoff_date(retention::today(), retention_days);
        info!(
            "Deleting backups older than {} days (before {})",
            retention_days,
            cutoff.format(retention::DATE_FORMAT)
        );

        let keys = self.list_keys(prefix).await?;
        let (expired, skipped) = plan_expired_keys(keys.iter().map(String::as_str), prefix, cutoff);
        let mut report = SweepReport {
            deleted: 0,
            skipped,
        };

        if expired.is_empty() {
            info!("No old backups found to delete");
            return Ok(report);
        }

        let total_batches = expired.len().div_ceil(MAX_DELETE_BATCH);
        let mut failed_batches = 0;
        for (index, batch) in expired.chunks(MAX_DELETE_BATCH).enumerate() {
            match self.delete_batch(batch).await {
                Ok(deleted) => {
                    info!("Deleted {} backup files (batch {}/{})", deleted, index + 1, total_batches);
                    report.deleted += deleted;
                }
                Err(e) => {
                    warn!("Delete batch {}/{} failed: {}", index + 1, total_batches, e);
                    failed_batches += 1;
                }
            }
        }

        if failed_batches > 0 {
            return Err(AppError::SweepFailed(format!(
                "{} of {} delete batches failed ({} objects deleted)",
                failed_batches, total_batches, report.deleted
            )));
        }
        Ok(report)
    }

    async fn test_connection(&self) -> Result<()> {
        self.client
            .head_bucket()
            .bucket(&self.bucket)
            .send()
            .await
            .map_err(|e| {
                AppError::StorageUnreachable(format!(
                    "failed to access S3 bucket {}: {}",
                    self.bucket,
                    DisplayErrorContext(&e)
                ))
            })?;

        info!("S3 connection test successful");
        Ok(())
    }
}
