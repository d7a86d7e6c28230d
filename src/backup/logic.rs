use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use super::db_dump::DumpProducer;
use crate::config::DatabaseTarget;
use crate::errors::{AppError, Result};
use crate::storage::{StorageBackend, SweepReport};

/// What happened to one database during a run.
#[derive(Debug)]
pub struct DatabaseOutcome {
    pub database: String,
    /// Where the artifact was stored, or why it was not.
    pub result: std::result::Result<String, AppError>,
}

#[derive(Debug)]
pub struct BackupRunSummary {
    pub outcomes: Vec<DatabaseOutcome>,
    pub success_count: usize,
    pub failure_count: usize,
    pub duration: Duration,
    pub sweep: std::result::Result<SweepReport, AppError>,
}

impl BackupRunSummary {
    fn new(
        outcomes: Vec<DatabaseOutcome>,
        sweep: std::result::Result<SweepReport, AppError>,
        duration: Duration,
    ) -> Self {
        let success_count = outcomes.iter().filter(|o| o.result.is_ok()).count();
        let failure_count = outcomes.len() - success_count;
        Self {
            outcomes,
            success_count,
            failure_count,
            duration,
            sweep,
        }
    }

    pub fn total(&self) -> usize {
        self.outcomes.len()
    }

    /// Any failed database fails the run. Sweep problems never do.
    pub fn into_result(self) -> Result<Self> {
        if self.failure_count > 0 {
            return Err(AppError::RunFailed {
                failed: self.failure_count,
                total: self.total(),
            });
        }
        Ok(self)
    }
}

/// Checks storage, then every database in order. The first failure aborts.
pub async fn preflight(
    targets: &[DatabaseTarget],
    producer: &dyn DumpProducer,
    storage: &dyn StorageBackend,
) -> Result<()> {
    info!("Testing connections...");

    storage.test_connection().await?;

    for (i, target) in targets.iter().enumerate() {
        info!("Testing connection for database {} ({})", i + 1, target);
        producer.test_connection(target).await?;
    }

    info!("All connection tests passed");
    Ok(())
}

async fn backup_one(
    target: &DatabaseTarget,
    producer: &dyn DumpProducer,
    storage: &dyn StorageBackend,
    prefix: &str,
) -> Result<String> {
    let handle = producer.create_backup(target).await?;
    debug!(
        "Dump of {} taken at {}",
        handle.database,
        handle.created_at.format("%Y-%m-%d %H:%M:%S")
    );

    let saved = storage
        .save_artifact(&handle.path, prefix, &handle.database)
        .await;

    // The local artifact goes away whether or not the transfer worked.
    if let Err(e) = producer.cleanup_artifact(&handle) {
        log_housekeeping_failure("Failed to cleanup local backup file", &e);
    }

    saved
}

/// Housekeeping never changes a run's verdict, but an unexpected error kind
/// is still worth an error-level line.
fn log_housekeeping_failure(context: &str, err: &AppError) {
    if err.is_fatal() {
        error!("{}: {}", context, err);
    } else {
        warn!("{}: {}", context, err);
    }
}

/// Backs up every target sequentially, then runs exactly one retention sweep.
/// Per-database failures are recorded and do not stop the remaining targets.
pub async fn run_backup_cycle(
    targets: &[DatabaseTarget],
    producer: &dyn DumpProducer,
    storage: &dyn StorageBackend,
    prefix: &str,
    retention_days: u32,
) -> BackupRunSummary {
    let start = Instant::now();
    info!("Starting backup operation for {} databases", targets.len());

    let mut outcomes = Vec::with_capacity(targets.len());
    for (i, target) in targets.iter().enumerate() {
        info!(
            "Backing up database {} of {}: {}",
            i + 1,
            targets.len(),
            target.database
        );

        let result = backup_one(target, producer, storage, prefix).await;
        match &result {
            Ok(destination) => info!(database = %target.database, "Backup stored at {}", destination),
            Err(e) => error!(database = %target.database, "Backup of {} failed: {}", target, e),
        }
        outcomes.push(DatabaseOutcome {
            database: target.database.clone(),
            result,
        });
    }

    info!("Cleaning up old backups...");
    let sweep = storage.delete_expired(prefix, retention_days).await;
    if let Err(e) = &sweep {
        log_housekeeping_failure(&format!("Failed to cleanup old {} backups", storage.name()), e);
    }

    let summary = BackupRunSummary::new(outcomes, sweep, start.elapsed());
    info!(
        "Backup operation completed in {:?}. Successful: {}, Failed: {}",
        summary.duration, summary.success_count, summary.failure_count
    );
    summary
}

/// One full run: pre-flight checks, the backup cycle, and the run verdict.
pub async fn run_backup(
    targets: &[DatabaseTarget],
    producer: &dyn DumpProducer,
    storage: &dyn StorageBackend,
    prefix: &str,
    retention_days: u32,
) -> Result<BackupRunSummary> {
    preflight(targets, producer, storage).await?;
    run_backup_cycle(targets, producer, storage, prefix, retention_days)
        .await
        .into_result()
}
