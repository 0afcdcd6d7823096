//! Application-wide error types.

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::orchestrator::LaunchError;

/// Application-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Application-wide error type.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Database error: {0}")]
    DatabaseSqlx(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Invalid state: cannot {operation} job {id} while it is {status}")]
    InvalidState {
        id: String,
        status: String,
        operation: &'static str,
    },

    #[error("Entity not found: {entity_type} with id {id}")]
    NotFound { entity_type: String, id: String },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error(transparent)]
    Launch(#[from] LaunchError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("IO error while {op} {}: {source}", path.display())]
    IoPath {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Orchestrator is shutting down")]
    ShuttingDown,

    #[error("API error: {0}")]
    ApiError(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn not_found(entity_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity_type: entity_type.into(),
            id: id.into(),
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn invalid_state(
        id: impl Into<String>,
        status: impl std::fmt::Display,
        operation: &'static str,
    ) -> Self {
        Self::InvalidState {
            id: id.into(),
            status: status.to_string(),
            operation,
        }
    }

    pub fn io_path(op: &'static str, path: &Path, source: std::io::Error) -> Self {
        Self::IoPath {
            op,
            path: path.to_path_buf(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_state_message() {
        let err = Error::invalid_state("abc", "RUNNING", "delete");
        assert_eq!(
            err.to_string(),
            "Invalid state: cannot delete job abc while it is RUNNING"
        );
    }

    #[test]
    fn test_io_path_message_includes_path() {
        let err = Error::io_path(
            "opening job log",
            Path::new("/tmp/x.log"),
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        let msg = err.to_string();
        assert!(msg.contains("opening job log"));
        assert!(msg.contains("/tmp/x.log"));
    }
}
