pub(crate) mod db_dump;
pub(crate) mod logic;

use crate::config::{DatabaseTarget, Settings};
use crate::errors::Result;
use crate::storage::{build_storage, StorageBackend};

pub use db_dump::{ArtifactHandle, DumpProducer, PgDumpProducer};
pub use logic::{BackupRunSummary, DatabaseOutcome};

/// Everything a backup run needs, resolved once at startup and reused by
/// every scheduled run.
pub struct BackupJob {
    targets: Vec<DatabaseTarget>,
    producer: Box<dyn DumpProducer>,
    storage: Box<dyn StorageBackend>,
    prefix: String,
    retention_days: u32,
}

impl BackupJob {
    pub fn new(
        targets: Vec<DatabaseTarget>,
        producer: Box<dyn DumpProducer>,
        storage: Box<dyn StorageBackend>,
        prefix: impl Into<String>,
        retention_days: u32,
    ) -> Self {
        Self {
            targets,
            producer,
            storage,
            prefix: prefix.into(),
            retention_days,
        }
    }

    pub async fn from_settings(settings: &Settings) -> Result<Self> {
        let storage = build_storage(&settings.storage_selection()?).await?;
        let producer = PgDumpProducer::new(
            settings.tools.pg_dump.clone(),
            settings.backup.scratch_dir.clone(),
        );
        Ok(Self::new(
            settings.databases.clone(),
            Box::new(producer),
            storage,
            settings.backup.backup_prefix.clone(),
            settings.backup.retention_days,
        ))
    }

    pub async fn preflight(&self) -> Result<()> {
        logic::preflight(&self.targets, self.producer.as_ref(), self.storage.as_ref()).await
    }

    /// One full run. Fails with `RunFailed` when any database was not stored.
    pub async fn run(&self) -> Result<BackupRunSummary> {
        logic::run_backup(
            &self.targets,
            self.producer.as_ref(),
            self.storage.as_ref(),
            &self.prefix,
            self.retention_days,
        )
        .await
    }
}

/// Public entry point for a single backup run (`--once`).
pub async fn run_backup_flow(settings: &Settings) -> anyhow::Result<BackupRunSummary> {
    let job = BackupJob::from_settings(settings).await?;
    Ok(job.run().await?)
}
