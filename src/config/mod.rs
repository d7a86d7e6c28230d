// db-backuper/src/config/mod.rs
use anyhow::{Context, Result};
use serde::Deserialize;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use url::Url;

use crate::errors::AppError;

pub const DEFAULT_CONFIG_PATH: &str = "appsettings.json";
const DEFAULT_PORT: u16 = 5432;
const DEFAULT_RETENTION_DAYS: u32 = 7;
const DEFAULT_SCHEDULE: &str = "0 2 * * *";
const DEFAULT_BACKUP_PREFIX: &str = "postgres-backup";

/// TLS negotiation mode, spelled the way libpq spells it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SslMode {
    Disable,
    Allow,
    #[default]
    Prefer,
    Require,
    VerifyCa,
    VerifyFull,
}

impl SslMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SslMode::Disable => "disable",
            SslMode::Allow => "allow",
            SslMode::Prefer => "prefer",
            SslMode::Require => "require",
            SslMode::VerifyCa => "verify-ca",
            SslMode::VerifyFull => "verify-full",
        }
    }
}

impl FromStr for SslMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "disable" => Ok(SslMode::Disable),
            "allow" => Ok(SslMode::Allow),
            "prefer" => Ok(SslMode::Prefer),
            "require" => Ok(SslMode::Require),
            "verify-ca" | "verify_ca" => Ok(SslMode::VerifyCa),
            "verify-full" | "verify_full" => Ok(SslMode::VerifyFull),
            other => Err(format!("unknown ssl mode '{}'", other)),
        }
    }
}

/// Connection descriptor for one source (or import target) database.
#[derive(Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct DatabaseTarget {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub database: String,
    pub ssl_mode: SslMode,
}

impl Default for DatabaseTarget {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: DEFAULT_PORT,
            username: String::new(),
            password: String::new(),
            database: String::new(),
            ssl_mode: SslMode::default(),
        }
    }
}

impl fmt::Debug for DatabaseTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseTarget")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("database", &self.database)
            .field("ssl_mode", &self.ssl_mode)
            .finish()
    }
}

impl fmt::Display for DatabaseTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}/{}", self.username, self.host, self.port, self.database)
    }
}

#[derive(Clone, Default, Deserialize)]
#[serde(default)]
pub struct AwsConfig {
    pub region: String,
    pub bucket: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    /// S3-compatible endpoint (MinIO, DigitalOcean Spaces, ...). Empty means AWS itself.
    pub endpoint_url: Option<String>,
}

impl fmt::Debug for AwsConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AwsConfig")
            .field("region", &self.region)
            .field("bucket", &self.bucket)
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("endpoint_url", &self.endpoint_url)
            .finish()
    }
}

impl AwsConfig {
    /// Bucket and region both set. Credentials may come from the default chain.
    fn is_complete(&self) -> bool {
        !self.bucket.is_empty() && !self.region.is_empty()
    }

    fn is_partial(&self) -> bool {
        !self.is_complete() && (!self.bucket.is_empty() || !self.region.is_empty())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LocalConfig {
    pub path: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BackupSettings {
    pub retention_days: u32,
    pub schedule: String,
    pub backup_prefix: String,
    pub scratch_dir: PathBuf,
}

impl Default for BackupSettings {
    fn default() -> Self {
        Self {
            retention_days: DEFAULT_RETENTION_DAYS,
            schedule: DEFAULT_SCHEDULE.to_string(),
            backup_prefix: DEFAULT_BACKUP_PREFIX.to_string(),
            scratch_dir: std::env::temp_dir().join("db-backuper"),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ImportSettings {
    pub target_database: DatabaseTarget,
    pub backup_path: PathBuf,
    pub drop_existing: bool,
    /// Pass `ON_ERROR_STOP=1` to psql so the first failing statement aborts the load.
    pub stop_on_error: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: String,
    pub format: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
        }
    }
}

/// Explicit locations of the PostgreSQL client tools. Unset means "look up on PATH".
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ToolSettings {
    pub pg_dump: Option<PathBuf>,
    pub psql: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub databases: Vec<DatabaseTarget>,
    pub aws: AwsConfig,
    pub local: LocalConfig,
    pub backup: BackupSettings,
    pub import: ImportSettings,
    pub logging: LoggingSettings,
    pub tools: ToolSettings,
}

/// The one storage backend a deployment writes to.
#[derive(Debug, Clone)]
pub enum StorageConfig {
    Local(LocalConfig),
    S3(AwsConfig),
}

impl Settings {
    pub fn from_json_str(content: &str) -> Result<Self> {
        serde_json::from_str(content).context("Failed to parse JSON settings")
    }

    /// Reads the settings file and applies process environment overrides.
    pub fn load(config_path: &Path) -> Result<Self> {
        let content = fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file at {}", config_path.display()))?;
        let mut settings = Self::from_json_str(&content).with_context(|| {
            format!("Failed to parse config file at {}", config_path.display())
        })?;
        settings
            .apply_env_overrides(|key| std::env::var(key).ok())
            .context("Failed to apply environment overrides")?;
        Ok(settings)
    }

    pub fn load_for_backup(config_path: &Path) -> Result<Self> {
        let settings = Self::load(config_path)?;
        settings
            .validate_for_backup()
            .context("Configuration validation failed")?;
        Ok(settings)
    }

    pub fn load_for_import(config_path: &Path) -> Result<Self> {
        let settings = Self::load(config_path)?;
        settings
            .validate_for_import()
            .context("Import configuration validation failed")?;
        Ok(settings)
    }

    /// Overrides file values with environment variables. `lookup` returns the raw
    /// variable; empty values are treated as unset.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        for (index, db) in self.databases.iter_mut().enumerate() {
            if index == 0 {
                override_database(db, "DB_", &get)?;
            }
            override_database(db, &format!("DB_{}_", index), &get)?;
        }

        override_string(&get, "AWS_REGION", &mut self.aws.region);
        override_string(&get, "AWS_BUCKET", &mut self.aws.bucket);
        override_string(&get, "AWS_ACCESS_KEY_ID", &mut self.aws.access_key_id);
        override_string(&get, "AWS_SECRET_ACCESS_KEY", &mut self.aws.secret_access_key);
        if let Some(endpoint) = get("AWS_ENDPOINT_URL") {
            self.aws.endpoint_url = Some(endpoint);
        }

        if let Some(path) = get("LOCAL_BACKUP_PATH") {
            self.local.path = PathBuf::from(path);
        }

        override_parsed(&get, "BACKUP_RETENTION_DAYS", &mut self.backup.retention_days)?;
        override_string(&get, "BACKUP_SCHEDULE", &mut self.backup.schedule);
        override_string(&get, "BACKUP_PREFIX", &mut self.backup.backup_prefix);
        if let Some(dir) = get("BACKUP_SCRATCH_DIR") {
            self.backup.scratch_dir = PathBuf::from(dir);
        }

        if let Some(path) = get("IMPORT_BACKUP_PATH") {
            self.import.backup_path = PathBuf::from(path);
        }
        if let Some(raw) = get("IMPORT_DROP_EXISTING") {
            self.import.drop_existing = parse_bool(&raw)
                .with_context(|| format!("Invalid value for IMPORT_DROP_EXISTING: '{}'", raw))?;
        }
        if let Some(raw) = get("IMPORT_STOP_ON_ERROR") {
            self.import.stop_on_error = parse_bool(&raw)
                .with_context(|| format!("Invalid value for IMPORT_STOP_ON_ERROR: '{}'", raw))?;
        }
        override_database(&mut self.import.target_database, "IMPORT_DB_", &get)?;

        override_string(&get, "LOG_LEVEL", &mut self.logging.level);
        override_string(&get, "LOG_FORMAT", &mut self.logging.format);

        if let Some(path) = get("PG_DUMP_PATH") {
            self.tools.pg_dump = Some(PathBuf::from(path));
        }
        if let Some(path) = get("PSQL_PATH") {
            self.tools.psql = Some(PathBuf::from(path));
        }
        Ok(())
    }

    pub fn validate_for_backup(&self) -> crate::errors::Result<()> {
        if self.databases.is_empty() {
            return Err(AppError::Config(
                "at least one database must be configured".to_string(),
            ));
        }

        for (i, db) in self.databases.iter().enumerate() {
            if db.database.is_empty() {
                return Err(config_error(format!("database name is required for database {}", i)));
            }
            if db.host.is_empty() {
                return Err(config_error(format!("database host is required for database {}", i)));
            }
            if db.username.is_empty() {
                return Err(config_error(format!("database username is required for database {}", i)));
            }
            if db.password.is_empty() {
                return Err(config_error(format!("database password is required for database {}", i)));
            }
        }

        self.storage_selection().map(|_| ())
    }

    pub fn validate_for_import(&self) -> crate::errors::Result<()> {
        let target = &self.import.target_database;
        let complete = !self.import.backup_path.as_os_str().is_empty()
            && !target.host.is_empty()
            && !target.database.is_empty()
            && !target.username.is_empty()
            && !target.password.is_empty();
        if !complete {
            return Err(config_error(
                "import configuration is incomplete - requires target_database (host, database, username, password) and backup_path",
            ));
        }
        Ok(())
    }

    /// Decides which storage backend is configured. Exactly one must be.
    pub fn storage_selection(&self) -> crate::errors::Result<StorageConfig> {
        let has_local = !self.local.path.as_os_str().is_empty();
        let has_aws = self.aws.is_complete();

        match (has_local, has_aws) {
            (false, false) if self.aws.is_partial() => {
                Err(config_error("AWS S3 storage requires both bucket and region"))
            }
            (false, false) => Err(config_error(
                "either local storage path or AWS S3 configuration is required",
            )),
            (true, true) => Err(config_error(
                "both local storage and AWS S3 are configured, please choose one",
            )),
            (true, false) => Ok(StorageConfig::Local(self.local.clone())),
            (false, true) => {
                let aws = &self.aws;
                if aws.access_key_id.is_empty() != aws.secret_access_key.is_empty() {
                    return Err(config_error(
                        "AWS access_key_id and secret_access_key must be set together",
                    ));
                }
                if let Some(endpoint) = aws.endpoint_url.as_deref().filter(|e| !e.is_empty()) {
                    Url::parse(endpoint).map_err(|e| {
                        config_error(format!("invalid AWS endpoint_url '{}': {}", endpoint, e))
                    })?;
                }
                Ok(StorageConfig::S3(aws.clone()))
            }
        }
    }
}

fn config_error(msg: impl Into<String>) -> AppError {
    AppError::Config(msg.into())
}

fn override_string<G>(get: &G, key: &str, slot: &mut String)
where
    G: Fn(&str) -> Option<String>,
{
    if let Some(value) = get(key) {
        *slot = value;
    }
}

fn override_parsed<G, T>(get: &G, key: &str, slot: &mut T) -> Result<()>
where
    G: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: fmt::Display,
{
    if let Some(raw) = get(key) {
        *slot = raw
            .trim()
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("Invalid value for {}: '{}' ({})", key, raw, e))?;
    }
    Ok(())
}

fn override_database<G>(db: &mut DatabaseTarget, prefix: &str, get: &G) -> Result<()>
where
    G: Fn(&str) -> Option<String>,
{
    override_string(get, &format!("{}HOST", prefix), &mut db.host);
    override_parsed(get, &format!("{}PORT", prefix), &mut db.port)?;
    override_string(get, &format!("{}USERNAME", prefix), &mut db.username);
    override_string(get, &format!("{}PASSWORD", prefix), &mut db.password);
    override_string(get, &format!("{}DATABASE", prefix), &mut db.database);
    override_parsed(get, &format!("{}SSL_MODE", prefix), &mut db.ssl_mode)?;
    Ok(())
}

fn parse_bool(raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "t" | "true" | "yes" => Ok(true),
        "0" | "f" | "false" | "no" => Ok(false),
        _ => anyhow::bail!("expected a boolean"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    fn base_settings() -> Settings {
        let value = json!({
            "databases": [
                {
                    "host": "localhost",
                    "port": 5432,
                    "username": "testuser",
                    "password": "testpass",
                    "database": "testdb",
                    "ssl_mode": "disable"
                }
            ],
            "local": { "path": "/tmp/backups" },
            "backup": { "retention_days": 7, "backup_prefix": "nightly" }
        });
        Settings::from_json_str(&value.to_string()).unwrap()
    }

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_fill_missing_sections() -> anyhow::Result<()> {
        let settings = Settings::from_json_str(r#"{"databases": [{"host": "h", "database": "d"}]}"#)?;
        assert_eq!(settings.databases[0].port, 5432);
        assert_eq!(settings.databases[0].ssl_mode, SslMode::Prefer);
        assert_eq!(settings.backup.retention_days, 7);
        assert_eq!(settings.backup.backup_prefix, "postgres-backup");
        assert_eq!(settings.logging.level, "info");
        assert!(settings.tools.pg_dump.is_none());
        Ok(())
    }

    #[test]
    fn test_valid_local_backup_configuration() -> anyhow::Result<()> {
        let settings = base_settings();
        settings.validate_for_backup()?;
        assert!(matches!(settings.storage_selection()?, StorageConfig::Local(_)));
        Ok(())
    }

    #[test]
    fn test_backup_requires_databases() {
        let mut settings = base_settings();
        settings.databases.clear();
        let err = settings.validate_for_backup().unwrap_err();
        assert!(err.to_string().contains("at least one database"));
    }

    #[test]
    fn test_backup_requires_password() {
        let mut settings = base_settings();
        settings.databases[0].password.clear();
        let err = settings.validate_for_backup().unwrap_err();
        assert!(err.to_string().contains("password is required for database 0"));
    }

    #[test]
    fn test_storage_both_or_neither_is_rejected() {
        let mut settings = base_settings();
        settings.aws.bucket = "bucket".into();
        settings.aws.region = "eu-west-1".into();
        let err = settings.storage_selection().unwrap_err();
        assert!(err.to_string().contains("both local storage and AWS S3"));

        settings.local.path = PathBuf::new();
        settings.aws = AwsConfig::default();
        let err = settings.storage_selection().unwrap_err();
        assert!(err.to_string().contains("either local storage path or AWS S3"));
    }

    #[test]
    fn test_ambient_region_does_not_count_as_s3() -> anyhow::Result<()> {
        let mut settings = base_settings();
        settings.apply_env_overrides(env(&[("AWS_REGION", "us-east-1")]))?;
        assert_eq!(settings.aws.region, "us-east-1");
        assert!(matches!(settings.storage_selection()?, StorageConfig::Local(_)));

        settings.local.path = PathBuf::new();
        let err = settings.storage_selection().unwrap_err();
        assert!(err.to_string().contains("requires both bucket and region"));

        settings.aws.region.clear();
        settings.aws.bucket = "bucket".into();
        let err = settings.storage_selection().unwrap_err();
        assert!(err.to_string().contains("requires both bucket and region"));
        Ok(())
    }

    #[test]
    fn test_s3_without_static_keys_uses_default_chain() -> anyhow::Result<()> {
        let mut settings = base_settings();
        settings.local.path = PathBuf::new();
        settings.aws.bucket = "bucket".into();
        settings.aws.region = "eu-west-1".into();
        assert!(matches!(settings.storage_selection()?, StorageConfig::S3(_)));

        settings.aws.access_key_id = "AKIA".into();
        assert!(settings.storage_selection().is_err());
        Ok(())
    }

    #[test]
    fn test_env_overrides_first_database_and_sections() -> anyhow::Result<()> {
        let mut settings = base_settings();
        settings.apply_env_overrides(env(&[
            ("DB_HOST", "db.internal"),
            ("DB_PORT", "6543"),
            ("DB_SSL_MODE", "require"),
            ("BACKUP_RETENTION_DAYS", "14"),
            ("BACKUP_PREFIX", "hourly"),
            ("LOCAL_BACKUP_PATH", "/srv/backups"),
            ("LOG_FORMAT", "json"),
        ]))?;

        let db = &settings.databases[0];
        assert_eq!(db.host, "db.internal");
        assert_eq!(db.port, 6543);
        assert_eq!(db.ssl_mode, SslMode::Require);
        assert_eq!(db.username, "testuser");
        assert_eq!(settings.backup.retention_days, 14);
        assert_eq!(settings.backup.backup_prefix, "hourly");
        assert_eq!(settings.local.path, PathBuf::from("/srv/backups"));
        assert_eq!(settings.logging.format, "json");
        Ok(())
    }

    #[test]
    fn test_indexed_database_overrides_win() -> anyhow::Result<()> {
        let mut settings = base_settings();
        settings.databases.push(DatabaseTarget {
            host: "second".into(),
            database: "seconddb".into(),
            ..DatabaseTarget::default()
        });
        settings.apply_env_overrides(env(&[
            ("DB_HOST", "generic"),
            ("DB_0_HOST", "indexed"),
            ("DB_1_DATABASE", "renamed"),
        ]))?;

        assert_eq!(settings.databases[0].host, "indexed");
        assert_eq!(settings.databases[1].host, "second");
        assert_eq!(settings.databases[1].database, "renamed");
        Ok(())
    }

    #[test]
    fn test_empty_env_values_are_ignored() -> anyhow::Result<()> {
        let mut settings = base_settings();
        settings.apply_env_overrides(env(&[("DB_HOST", ""), ("BACKUP_PREFIX", "  ")]))?;
        assert_eq!(settings.databases[0].host, "localhost");
        assert_eq!(settings.backup.backup_prefix, "nightly");
        Ok(())
    }

    #[test]
    fn test_invalid_numeric_override_names_variable() {
        let mut settings = base_settings();
        let err = settings
            .apply_env_overrides(env(&[("BACKUP_RETENTION_DAYS", "soon")]))
            .unwrap_err();
        assert!(format!("{:#}", err).contains("BACKUP_RETENTION_DAYS"));
    }

    #[test]
    fn test_import_overrides_and_validation() -> anyhow::Result<()> {
        let mut settings = Settings::default();
        assert!(settings.validate_for_import().is_err());

        settings.apply_env_overrides(env(&[
            ("IMPORT_BACKUP_PATH", "/tmp/testdb.sql"),
            ("IMPORT_DROP_EXISTING", "true"),
            ("IMPORT_DB_HOST", "localhost"),
            ("IMPORT_DB_USERNAME", "admin"),
            ("IMPORT_DB_PASSWORD", "secret"),
            ("IMPORT_DB_DATABASE", "restored"),
        ]))?;

        assert!(settings.import.drop_existing);
        assert_eq!(settings.import.target_database.database, "restored");
        // an empty database list is fine for imports
        settings.validate_for_import()?;
        Ok(())
    }

    #[test]
    fn test_debug_output_redacts_secrets() {
        let mut settings = base_settings();
        settings.aws.secret_access_key = "very-secret".into();
        let rendered = format!("{:?}", settings);
        assert!(!rendered.contains("testpass"));
        assert!(!rendered.contains("very-secret"));
    }

    #[test]
    fn test_target_display_is_connection_summary() {
        let settings = base_settings();
        let shown = settings.databases[0].to_string();
        assert_eq!(shown, "testuser@localhost:5432/testdb");
        assert!(!shown.contains("testpass"));
    }
}
