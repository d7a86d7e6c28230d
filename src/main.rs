//! PostgreSQL backup service
//!
//! Dumps the configured databases on a cron schedule into local or S3 storage,
//! prunes expired artifacts, and can restore a dump into a target database.

// db-backuper/src/main.rs
mod backup;
mod config;
mod errors;
mod logging;
mod restore;
mod scheduler;
mod storage;
mod utils;

use anyhow::{Context, Result};
use clap::Parser;
use config::{LoggingSettings, Settings, DEFAULT_CONFIG_PATH};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "db-backuper", version, about = "PostgreSQL backup and restore service")]
struct Cli {
    /// Path to the JSON settings file
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Run a single backup and exit
    #[arg(long, conflicts_with = "import")]
    once: bool,

    /// Import the configured backup file into the target database and exit
    #[arg(long)]
    import: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    match run_app(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

/// Loads settings, then installs logging from them. If loading fails, logging
/// falls back to defaults so the failure still gets reported.
fn load_settings(path: &Path, loader: fn(&Path) -> Result<Settings>) -> Result<Settings> {
    match loader(path) {
        Ok(settings) => {
            logging::init_logging(&settings.logging);
            Ok(settings)
        }
        Err(e) => {
            logging::init_logging(&LoggingSettings::default());
            Err(e).with_context(|| format!("Failed to load configuration from {}", path.display()))
        }
    }
}

async fn run_app(cli: Cli) -> Result<()> {
    if cli.import {
        let settings = load_settings(&cli.config, Settings::load_for_import)?;
        info!("Starting PostgreSQL import service");
        restore::run_import_flow(&settings)
            .await
            .context("Import failed")?;
        info!("Import completed successfully");
        return Ok(());
    }

    let settings = load_settings(&cli.config, Settings::load_for_backup)?;

    if cli.once {
        info!("Running backup once");
        let summary = backup::run_backup_flow(&settings)
            .await
            .context("Backup failed")?;
        info!(
            "Backup completed: {} of {} databases stored",
            summary.success_count,
            summary.total()
        );
        return Ok(());
    }

    let schedule = scheduler::parse_schedule(&settings.backup.schedule)?;
    let job = backup::BackupJob::from_settings(&settings).await?;

    info!("Starting PostgreSQL backup service");
    job.preflight().await.context("Connection tests failed")?;

    info!("Backup scheduled with cron expression: {}", settings.backup.schedule);
    let job = &job;
    scheduler::run_scheduled(&schedule, scheduler::shutdown_signal(), move || async move {
        job.run().await?;
        Ok::<(), anyhow::Error>(())
    })
    .await?;

    info!("Backup service stopped");
    Ok(())
}
