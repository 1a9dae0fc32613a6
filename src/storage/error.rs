//! Error types for store operations

use std::fmt;

/// Result type alias for store operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors raised by a [`MonitoringStore`](super::MonitoringStore)
#[derive(Debug)]
pub enum StorageError {
    /// Could not open the store
    ConnectionFailed(String),

    /// A statement failed
    QueryFailed(String),

    /// Schema migration failed
    MigrationFailed(String),

    /// A stored value could not be converted to or from its model type
    Serialization(String),

    /// The addressed row does not exist
    NotFound(String),

    /// I/O error (file access, etc.)
    Io(std::io::Error),
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::ConnectionFailed(msg) => write!(f, "failed to open store: {msg}"),
            StorageError::QueryFailed(msg) => write!(f, "store query failed: {msg}"),
            StorageError::MigrationFailed(msg) => write!(f, "store migration failed: {msg}"),
            StorageError::Serialization(msg) => write!(f, "stored value is invalid: {msg}"),
            StorageError::NotFound(what) => write!(f, "not found in store: {what}"),
            StorageError::Io(err) => write!(f, "I/O error: {err}"),
        }
    }
}

impl std::error::Error for StorageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StorageError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        StorageError::Io(err)
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

#[cfg(feature = "storage-sqlite")]
impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Io(io_err) => StorageError::Io(io_err),
            sqlx::Error::RowNotFound => StorageError::NotFound("row".to_string()),
            _ => StorageError::QueryFailed(err.to_string()),
        }
    }
}

#[cfg(feature = "storage-sqlite")]
impl From<sqlx::migrate::MigrateError> for StorageError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        StorageError::MigrationFailed(err.to_string())
    }
}
