//! Error types for SQLite operations.

use std::fmt;

use rusqlite::ErrorCode;
use strata_migrate::GatewayError;

/// Result type for SQLite operations.
pub type SqliteResult<T> = Result<T, SqliteError>;

/// Error type for SQLite operations.
#[derive(Debug)]
pub enum SqliteError {
    /// SQLite driver error.
    Sqlite(tokio_rusqlite::Error),
    /// Configuration error.
    Config(String),
    /// Backup error.
    Backup(String),
    /// Restore error.
    Restore(String),
    /// Transaction state error.
    Transaction(String),
}

impl SqliteError {
    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a backup error.
    pub fn backup(msg: impl Into<String>) -> Self {
        Self::Backup(msg.into())
    }

    /// Create a restore error.
    pub fn restore(msg: impl Into<String>) -> Self {
        Self::Restore(msg.into())
    }

    /// Create a transaction error.
    pub fn transaction(msg: impl Into<String>) -> Self {
        Self::Transaction(msg.into())
    }

    /// Whether SQLite reported the database as busy or locked.
    pub fn is_busy(&self) -> bool {
        match self {
            Self::Sqlite(tokio_rusqlite::Error::Rusqlite(rusqlite::Error::SqliteFailure(e, _))) => {
                matches!(e.code, ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked)
            }
            _ => false,
        }
    }
}

impl fmt::Display for SqliteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sqlite(e) => write!(f, "SQLite error: {}", e),
            Self::Config(msg) => write!(f, "Configuration error: {}", msg),
            Self::Backup(msg) => write!(f, "Backup error: {}", msg),
            Self::Restore(msg) => write!(f, "Restore error: {}", msg),
            Self::Transaction(msg) => write!(f, "Transaction error: {}", msg),
        }
    }
}

impl std::error::Error for SqliteError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Sqlite(e) => Some(e),
            _ => None,
        }
    }
}

impl From<tokio_rusqlite::Error> for SqliteError {
    fn from(err: tokio_rusqlite::Error) -> Self {
        Self::Sqlite(err)
    }
}

impl From<rusqlite::Error> for SqliteError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Sqlite(tokio_rusqlite::Error::Rusqlite(err))
    }
}

impl From<SqliteError> for GatewayError {
    fn from(err: SqliteError) -> Self {
        let busy = err.is_busy();
        match err {
            SqliteError::Sqlite(tokio_rusqlite::Error::Rusqlite(e)) if busy => {
                GatewayError::busy(e.to_string())
            }
            SqliteError::Sqlite(tokio_rusqlite::Error::Rusqlite(e)) => GatewayError::query(e.to_string()),
            SqliteError::Sqlite(e) => GatewayError::connection(e.to_string()),
            SqliteError::Config(msg) => GatewayError::connection(format!("config: {}", msg)),
            SqliteError::Backup(msg) => GatewayError::backup(msg),
            SqliteError::Restore(msg) => GatewayError::restore(msg),
            SqliteError::Transaction(msg) => GatewayError::transaction(msg),
        }
    }
}
