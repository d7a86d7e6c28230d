// db-backuper/src/backup/db_dump.rs
use async_trait::async_trait;
use chrono::{DateTime, Local};
use std::ffi::OsStr;
use std::fs;
use std::path::PathBuf;
use tracing::{debug, error, info, warn};

use crate::config::DatabaseTarget;
use crate::errors::{AppError, Result};
use crate::utils::{find_executable, run_tool};

/// A plain-SQL dump sitting in the scratch directory, waiting to be stored.
#[derive(Debug, Clone)]
pub struct ArtifactHandle {
    pub path: PathBuf,
    pub database: String,
    pub created_at: DateTime<Local>,
}

/// Produces a dump artifact for one database.
#[async_trait]
pub trait DumpProducer: Send + Sync {
    async fn create_backup(&self, target: &DatabaseTarget) -> Result<ArtifactHandle>;

    fn cleanup_artifact(&self, handle: &ArtifactHandle) -> Result<()> {
        fs::remove_file(&handle.path).map_err(|source| AppError::CleanupFailed {
            path: handle.path.clone(),
            source,
        })?;
        info!("Cleaned up local backup file: {}", handle.path.display());
        Ok(())
    }

    /// Proves the database is reachable and dumpable by taking a throwaway dump.
    async fn test_connection(&self, target: &DatabaseTarget) -> Result<()> {
        let handle = self
            .create_backup(target)
            .await
            .map_err(|e| AppError::ConnectionFailed {
                database: target.database.clone(),
                reason: e.to_string(),
            })?;

        if let Err(e) = self.cleanup_artifact(&handle) {
            warn!("Failed to cleanup test backup: {}", e);
        }
        Ok(())
    }
}

/// Shells out to `pg_dump`, writing `{database}_{YYYY-MM-DD_HH-MM-SS}.sql`
/// into the scratch directory.
#[derive(Debug, Clone)]
pub struct PgDumpProducer {
    pg_dump: Option<PathBuf>,
    scratch_dir: PathBuf,
}

impl PgDumpProducer {
    pub fn new(pg_dump: Option<PathBuf>, scratch_dir: impl Into<PathBuf>) -> Self {
        Self {
            pg_dump,
            scratch_dir: scratch_dir.into(),
        }
    }

    pub fn artifact_file_name(database: &str, at: DateTime<Local>) -> String {
        format!("{}_{}.sql", database, at.format("%Y-%m-%d_%H-%M-%S"))
    }
}

#[async_trait]
impl DumpProducer for PgDumpProducer {
    async fn create_backup(&self, target: &DatabaseTarget) -> Result<ArtifactHandle> {
        let dump_failed = |output: String| AppError::DumpFailed {
            database: target.database.clone(),
            output,
        };

        let pg_dump = find_executable(self.pg_dump.as_deref(), "pg_dump")
            .map_err(|e| dump_failed(format!("{:#}", e)))?;
        debug!("Using pg_dump executable at: {}", pg_dump.display());

        tokio::fs::create_dir_all(&self.scratch_dir).await.map_err(|e| {
            dump_failed(format!(
                "failed to create scratch directory {}: {}",
                self.scratch_dir.display(),
                e
            ))
        })?;

        let created_at = Local::now();
        let path = self
            .scratch_dir
            .join(Self::artifact_file_name(&target.database, created_at));
        let port = target.port.to_string();

        info!("Creating backup: {}", path.display());

        let args = [
            OsStr::new("-h"),
            OsStr::new(&target.host),
            OsStr::new("-p"),
            OsStr::new(&port),
            OsStr::new("-U"),
            OsStr::new(&target.username),
            OsStr::new("-d"),
            OsStr::new(&target.database),
            OsStr::new("-f"),
            path.as_os_str(),
            OsStr::new("--verbose"),
            OsStr::new("--no-password"),
        ];
        let envs = [
            ("PGPASSWORD", target.password.as_str()),
            ("PGSSLMODE", target.ssl_mode.as_str()),
        ];

        let output = run_tool(&pg_dump, args, &envs, None).await.map_err(|e| {
            dump_failed(format!("failed to execute {}: {}", pg_dump.display(), e))
        })?;

        if !output.success {
            error!(
                "pg_dump failed for {} (exit code {:?}): {}",
                target.database, output.code, output.output
            );
            if path.exists() {
                if let Err(e) = fs::remove_file(&path) {
                    warn!("Failed to remove partial dump {}: {}", path.display(), e);
                }
            }
            return Err(dump_failed(output.output));
        }

        info!("Backup created successfully");
        Ok(ArtifactHandle {
            path,
            database: target.database.clone(),
            created_at,
        })
    }
}
