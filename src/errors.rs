use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Dump of database '{database}' failed: {output}")]
    DumpFailed { database: String, output: String },

    #[error("Storage unreachable: {0}")]
    StorageUnreachable(String),

    #[error("Transfer of '{database}' artifact to storage failed: {reason}")]
    TransferFailed { database: String, reason: String },

    #[error("Backup artifact not found: {}", .0.display())]
    ArtifactNotFound(PathBuf),

    #[error("Connection to database '{database}' failed: {reason}")]
    ConnectionFailed { database: String, reason: String },

    #[error("Drop/recreate of database '{database}' failed: {reason}")]
    DropRecreateFailed { database: String, reason: String },

    #[error("Restore into database '{database}' failed: {output}")]
    RestoreFailed { database: String, output: String },

    #[error("Failed to remove local artifact {}: {source}", .path.display())]
    CleanupFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Retention sweep failed: {0}")]
    SweepFailed(String),

    #[error("Backup run completed with {failed} failures out of {total} databases")]
    RunFailed { failed: usize, total: usize },
}

impl AppError {
    /// Cleanup and sweep failures are only ever reported as warnings.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, AppError::CleanupFailed { .. } | AppError::SweepFailed(_))
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_warn_only_variants_are_not_fatal() {
        let cleanup = AppError::CleanupFailed {
            path: PathBuf::from("/tmp/x.sql"),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        };
        assert!(!cleanup.is_fatal());
        assert!(!AppError::SweepFailed("listing failed".into()).is_fatal());
        assert!(AppError::StorageUnreachable("no bucket".into()).is_fatal());
    }

    #[test]
    fn test_messages_name_the_database() {
        let err = AppError::DumpFailed {
            database: "orders".into(),
            output: "pg_dump: error: connection refused".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("orders"));
        assert!(msg.contains("connection refused"));
    }
}
