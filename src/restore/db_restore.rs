// db-backuper/src/restore/db_restore.rs
use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgSslMode};
use sqlx::{Connection, Executor, PgConnection};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::config::{DatabaseTarget, SslMode};
use crate::errors::AppError;
use crate::utils::{find_executable, quote_ident, run_tool};

/// Maintenance database used for DROP/CREATE, which cannot run while
/// connected to the database being replaced.
pub const ADMIN_DATABASE: &str = "postgres";

/// Server-side administration needed around an import.
#[async_trait]
pub trait DatabaseAdmin: Send + Sync {
    /// Connects to the target database itself.
    async fn ping(&self, target: &DatabaseTarget) -> Result<()>;

    /// Terminates other sessions on the target database. Returns how many were signalled.
    async fn terminate_sessions(&self, target: &DatabaseTarget) -> Result<u64>;

    async fn drop_database(&self, target: &DatabaseTarget) -> Result<()>;

    async fn create_database(&self, target: &DatabaseTarget) -> Result<()>;
}

fn pg_ssl_mode(mode: SslMode) -> PgSslMode {
    match mode {
        SslMode::Disable => PgSslMode::Disable,
        SslMode::Allow => PgSslMode::Allow,
        SslMode::Prefer => PgSslMode::Prefer,
        SslMode::Require => PgSslMode::Require,
        SslMode::VerifyCa => PgSslMode::VerifyCa,
        SslMode::VerifyFull => PgSslMode::VerifyFull,
    }
}

/// `DatabaseAdmin` over direct sqlx connections.
#[derive(Debug, Clone, Default)]
pub struct PgAdmin;

impl PgAdmin {
    fn connect_options(target: &DatabaseTarget, database: &str) -> PgConnectOptions {
        PgConnectOptions::new()
            .host(&target.host)
            .port(target.port)
            .username(&target.username)
            .password(&target.password)
            .database(database)
            .ssl_mode(pg_ssl_mode(target.ssl_mode))
    }

    async fn connect(target: &DatabaseTarget, database: &str) -> Result<PgConnection> {
        PgConnection::connect_with(&Self::connect_options(target, database))
            .await
            .with_context(|| {
                format!(
                    "Failed to connect to '{}' database on {}:{}",
                    database, target.host, target.port
                )
            })
    }
}

#[async_trait]
impl DatabaseAdmin for PgAdmin {
    async fn ping(&self, target: &DatabaseTarget) -> Result<()> {
        let mut conn = Self::connect(target, &target.database).await?;
        conn.ping()
            .await
            .with_context(|| format!("Failed to ping database '{}'", target.database))?;
        conn.close().await.ok();
        Ok(())
    }

    async fn terminate_sessions(&self, target: &DatabaseTarget) -> Result<u64> {
        let mut conn = Self::connect(target, ADMIN_DATABASE).await?;
        let terminated = sqlx::query(
            "SELECT pg_terminate_backend(pid) FROM pg_stat_activity WHERE datname = $1 AND pid <> pg_backend_pid()",
        )
        .bind(&target.database)
        .execute(&mut conn)
        .await
        .with_context(|| {
            format!("Failed to terminate connections to database '{}'", target.database)
        })?
        .rows_affected();
        conn.close().await.ok();
        Ok(terminated)
    }

    async fn drop_database(&self, target: &DatabaseTarget) -> Result<()> {
        let mut conn = Self::connect(target, ADMIN_DATABASE).await?;
        let sql = format!("DROP DATABASE IF EXISTS {}", quote_ident(&target.database));
        conn.execute(sql.as_str())
            .await
            .with_context(|| format!("Failed to drop database '{}'", target.database))?;
        conn.close().await.ok();
        Ok(())
    }

    async fn create_database(&self, target: &DatabaseTarget) -> Result<()> {
        let mut conn = Self::connect(target, ADMIN_DATABASE).await?;
        let sql = format!("CREATE DATABASE {}", quote_ident(&target.database));
        conn.execute(sql.as_str())
            .await
            .with_context(|| format!("Failed to create database '{}'", target.database))?;
        conn.close().await.ok();
        Ok(())
    }
}

/// Loads a plain-SQL artifact with `psql`.
#[derive(Debug, Clone, Default)]
pub struct PsqlLoader {
    psql: Option<PathBuf>,
    stop_on_error: bool,
}

impl PsqlLoader {
    pub fn new(psql: Option<PathBuf>, stop_on_error: bool) -> Self {
        Self { psql, stop_on_error }
    }

    /// Runs the artifact against the target and returns psql's combined output.
    /// The working directory is the artifact's own directory so relative
    /// `\i` includes resolve; the artifact itself is passed as an absolute path.
    pub async fn load(&self, target: &DatabaseTarget, artifact: &Path) -> crate::errors::Result<String> {
        let restore_failed = |output: String| AppError::RestoreFailed {
            database: target.database.clone(),
            output,
        };

        let psql = find_executable(self.psql.as_deref(), "psql")
            .map_err(|e| restore_failed(format!("{:#}", e)))?;
        let artifact = tokio::fs::canonicalize(artifact).await.map_err(|e| {
            restore_failed(format!("failed to resolve {}: {}", artifact.display(), e))
        })?;
        let port = target.port.to_string();

        let mut args = vec![
            OsStr::new("-X"),
            OsStr::new("-h"),
            OsStr::new(&target.host),
            OsStr::new("-p"),
            OsStr::new(&port),
            OsStr::new("-U"),
            OsStr::new(&target.username),
            OsStr::new("-d"),
            OsStr::new(&target.database),
        ];
        if self.stop_on_error {
            args.extend([OsStr::new("-v"), OsStr::new("ON_ERROR_STOP=1")]);
        }
        args.extend([OsStr::new("-f"), artifact.as_os_str()]);

        let envs = [
            ("PGPASSWORD", target.password.as_str()),
            ("PGSSLMODE", target.ssl_mode.as_str()),
        ];
        let working_dir = artifact.parent();

        info!("Executing import command for database: {}", target.database);
        let output = run_tool(&psql, args, &envs, working_dir)
            .await
            .map_err(|e| restore_failed(format!("failed to execute {}: {}", psql.display(), e)))?;

        if !output.success {
            warn!("psql exited with code {:?}", output.code);
            return Err(restore_failed(output.output));
        }

        debug!("Import command output: {}", output.output);
        Ok(output.output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn target() -> DatabaseTarget {
        DatabaseTarget {
            host: "db.internal".into(),
            port: 5433,
            username: "admin".into(),
            password: "s3cret".into(),
            database: "restored".into(),
            ssl_mode: SslMode::Require,
        }
    }

    #[test]
    fn test_ssl_mode_mapping() {
        assert!(matches!(pg_ssl_mode(SslMode::Disable), PgSslMode::Disable));
        assert!(matches!(pg_ssl_mode(SslMode::VerifyFull), PgSslMode::VerifyFull));
    }

    #[tokio::test]
    async fn test_missing_psql_is_restore_failure() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let loader = PsqlLoader::new(Some(dir.path().join("no-such-psql")), true);
        let err = loader
            .load(&target(), &dir.path().join("dump.sql"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::RestoreFailed { ref database, .. } if database == "restored"));
        Ok(())
    }

    #[tokio::test]
    async fn test_unreachable_server_fails_ping() {
        let mut unreachable = target();
        unreachable.host = "127.0.0.1".into();
        unreachable.port = 9;
        unreachable.ssl_mode = SslMode::Disable;
        assert!(PgAdmin.ping(&unreachable).await.is_err());
    }

    #[cfg(unix)]
    mod with_fake_psql {
        use super::*;
        use crate::utils::write_fake_tool;

        fn recording_psql(bin: &Path) -> (PathBuf, PathBuf) {
            let record = bin.join("psql.log");
            let psql = write_fake_tool(
                bin,
                "psql",
                &format!(
                    "printf '%s\\n%s\\n%s\\n%s\\n' \"$*\" \"$PGPASSWORD\" \"$PGSSLMODE\" \"$(pwd)\" > '{}'",
                    record.display()
                ),
            );
            (psql, record)
        }

        #[tokio::test]
        async fn test_load_passes_connection_details() -> anyhow::Result<()> {
            let bin = TempDir::new()?;
            let data = TempDir::new()?;
            let artifact = data.path().join("orders_2024-03-10_02-00-00.sql");
            std::fs::write(&artifact, "SELECT 1;")?;
            let (psql, record) = recording_psql(bin.path());

            PsqlLoader::new(Some(psql), true).load(&target(), &artifact).await?;

            let recorded = std::fs::read_to_string(record)?;
            let lines: Vec<&str> = recorded.lines().collect();
            assert_eq!(
                lines[0],
                format!(
                    "-X -h db.internal -p 5433 -U admin -d restored -v ON_ERROR_STOP=1 -f {}",
                    std::fs::canonicalize(&artifact)?.display()
                )
            );
            assert_eq!(lines[1], "s3cret");
            assert_eq!(lines[2], "require");
            assert_eq!(
                std::fs::canonicalize(lines[3])?,
                std::fs::canonicalize(data.path())?
            );
            Ok(())
        }

        #[tokio::test]
        async fn test_relative_artifact_path_is_resolved() -> anyhow::Result<()> {
            let bin = TempDir::new()?;
            let data = tempfile::Builder::new().prefix("restore-").tempdir_in(".")?;
            let dir_name = data.path().file_name().unwrap();
            std::fs::write(data.path().join("dump.sql"), "SELECT 1;")?;
            let relative = Path::new(dir_name).join("dump.sql");
            let psql = write_fake_tool(
                bin.path(),
                "psql",
                r#"for arg in "$@"; do last="$arg"; done
if [ ! -f "$last" ]; then echo "psql: error: $last: No such file or directory" >&2; exit 1; fi
echo "loaded $last""#,
            );

            let output = PsqlLoader::new(Some(psql), true).load(&target(), &relative).await?;

            let loaded = output.trim().trim_start_matches("loaded ");
            assert!(Path::new(loaded).is_absolute());
            assert_eq!(
                std::fs::canonicalize(loaded)?,
                std::fs::canonicalize(&relative)?
            );
            Ok(())
        }

        #[tokio::test]
        async fn test_stop_on_error_is_optional() -> anyhow::Result<()> {
            let bin = TempDir::new()?;
            let data = TempDir::new()?;
            let artifact = data.path().join("dump.sql");
            std::fs::write(&artifact, "SELECT 1;")?;
            let (psql, record) = recording_psql(bin.path());

            PsqlLoader::new(Some(psql), false).load(&target(), &artifact).await?;

            let recorded = std::fs::read_to_string(record)?;
            assert!(!recorded.contains("ON_ERROR_STOP"));
            Ok(())
        }

        #[tokio::test]
        async fn test_psql_failure_carries_output() -> anyhow::Result<()> {
            let bin = TempDir::new()?;
            let psql = write_fake_tool(
                bin.path(),
                "psql",
                "echo 'ERROR:  relation \"orders\" already exists' >&2; exit 3",
            );
            let artifact = bin.path().join("dump.sql");
            std::fs::write(&artifact, "CREATE TABLE orders();")?;

            let err = PsqlLoader::new(Some(psql), true)
                .load(&target(), &artifact)
                .await
                .unwrap_err();

            match err {
                AppError::RestoreFailed { database, output } => {
                    assert_eq!(database, "restored");
                    assert!(output.contains("already exists"));
                }
                other => panic!("unexpected error: {other}"),
            }
            Ok(())
        }
    }
}
