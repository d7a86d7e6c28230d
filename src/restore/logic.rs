use std::path::PathBuf;
use tracing::{error, info, warn};

use super::db_restore::{DatabaseAdmin, PsqlLoader, ADMIN_DATABASE};
use crate::config::{DatabaseTarget, ImportSettings};
use crate::errors::{AppError, Result};

/// One import: which artifact goes into which database.
#[derive(Debug, Clone)]
pub struct ImportSpec {
    pub target: DatabaseTarget,
    pub artifact: PathBuf,
    pub drop_existing: bool,
}

impl From<&ImportSettings> for ImportSpec {
    fn from(settings: &ImportSettings) -> Self {
        Self {
            target: settings.target_database.clone(),
            artifact: settings.backup_path.clone(),
            drop_existing: settings.drop_existing,
        }
    }
}

async fn drop_and_recreate(admin: &dyn DatabaseAdmin, target: &DatabaseTarget) -> Result<()> {
    let failed = |step: &str, e: anyhow::Error| AppError::DropRecreateFailed {
        database: target.database.clone(),
        reason: format!("{}: {:#}", step, e),
    };

    if target.database.eq_ignore_ascii_case(ADMIN_DATABASE) {
        return Err(AppError::DropRecreateFailed {
            database: target.database.clone(),
            reason: format!("refusing to drop the '{}' maintenance database", ADMIN_DATABASE),
        });
    }

    info!("Dropping existing database: {}", target.database);
    let terminated = admin
        .terminate_sessions(target)
        .await
        .map_err(|e| failed("terminate sessions", e))?;
    if terminated > 0 {
        info!("Terminated {} connections to {}", terminated, target.database);
    }

    admin
        .drop_database(target)
        .await
        .map_err(|e| failed("drop database", e))?;

    info!("Creating database: {}", target.database);
    admin
        .create_database(target)
        .await
        .map_err(|e| failed("create database", e))?;
    Ok(())
}

/// Restores a plain-SQL artifact into the target database.
///
/// With `drop_existing` the target is dropped and recreated before the load.
/// There is no rollback: if the load then fails, the target is left empty.
pub async fn import_backup(
    spec: &ImportSpec,
    admin: &dyn DatabaseAdmin,
    loader: &PsqlLoader,
) -> Result<()> {
    let target = &spec.target;
    info!(
        "Starting import from {} to database {}",
        spec.artifact.display(),
        target.database
    );

    if !spec.artifact.is_file() {
        return Err(AppError::ArtifactNotFound(spec.artifact.clone()));
    }

    admin
        .ping(target)
        .await
        .map_err(|e| AppError::ConnectionFailed {
            database: target.database.clone(),
            reason: format!("{:#}", e),
        })?;

    if spec.drop_existing {
        drop_and_recreate(admin, target).await?;
    }

    match loader.load(target, &spec.artifact).await {
        Ok(_) => {
            info!("Import completed successfully");
            Ok(())
        }
        Err(e) => {
            if spec.drop_existing {
                error!(
                    "Database {} was recreated empty before the failed import and has not been restored",
                    target.database
                );
            } else {
                warn!("Database {} may contain a partial import", target.database);
            }
            Err(e)
        }
    }
}
