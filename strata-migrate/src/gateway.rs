//! Storage gateway abstraction.
//!
//! The engine never talks to a database driver directly. Everything it needs
//! (statement execution, row reads, transactions, backups and integrity
//! checks) goes through [`StorageGateway`], so the same engine can drive any
//! backend that implements it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// A result row, keyed by column name.
pub type Row = serde_json::Map<String, Value>;

/// Result type for gateway operations.
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Errors reported by a storage gateway.
#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    /// Statement failed. `busy` is set when the driver reported a lock/busy status.
    #[error("Query error: {message}")]
    Query {
        /// Driver message.
        message: String,
        /// Transient busy/locked status.
        busy: bool,
    },

    /// Transaction control failed.
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// Backup creation failed.
    #[error("Backup error: {0}")]
    Backup(String),

    /// Restore from backup failed.
    #[error("Restore error: {0}")]
    Restore(String),

    /// Connection is unusable.
    #[error("Connection error: {0}")]
    Connection(String),
}

impl GatewayError {
    /// Create a query error.
    pub fn query(msg: impl Into<String>) -> Self {
        Self::Query {
            message: msg.into(),
            busy: false,
        }
    }

    /// Create a query error flagged as transient busy.
    pub fn busy(msg: impl Into<String>) -> Self {
        Self::Query {
            message: msg.into(),
            busy: true,
        }
    }

    /// Create a transaction error.
    pub fn transaction(msg: impl Into<String>) -> Self {
        Self::Transaction(msg.into())
    }

    /// Create a backup error.
    pub fn backup(msg: impl Into<String>) -> Self {
        Self::Backup(msg.into())
    }

    /// Create a restore error.
    pub fn restore(msg: impl Into<String>) -> Self {
        Self::Restore(msg.into())
    }

    /// Create a connection error.
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    /// Whether the caller may retry after a short delay.
    pub fn is_busy(&self) -> bool {
        matches!(self, Self::Query { busy: true, .. })
    }
}

/// Reference to a whole-database snapshot owned by the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Backup {
    /// Opaque snapshot identifier.
    pub name: String,
    /// When the snapshot was taken.
    pub created_at: DateTime<Utc>,
}

impl Backup {
    /// Create a backup reference taken now.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            created_at: Utc::now(),
        }
    }
}

/// Capabilities the migration engine consumes from the database layer.
///
/// Transactions are connection-scoped: between `begin_transaction` and
/// `commit`/`rollback`, every other call on the same gateway participates in
/// that transaction.
#[async_trait::async_trait]
pub trait StorageGateway: Send + Sync {
    /// Execute a single statement and return the affected row count.
    async fn execute(&self, sql: &str, params: &[Value]) -> GatewayResult<usize>;

    /// Execute a script of one or more statements without parameters.
    async fn execute_batch(&self, sql: &str) -> GatewayResult<()>;

    /// Fetch at most one row.
    async fn select_one(&self, sql: &str, params: &[Value]) -> GatewayResult<Option<Row>>;

    /// Fetch all rows.
    async fn select_all(&self, sql: &str, params: &[Value]) -> GatewayResult<Vec<Row>>;

    /// Insert a record and return its row id.
    async fn insert(&self, table: &str, record: Row) -> GatewayResult<i64>;

    /// Delete rows matching `predicate` and return how many were removed.
    async fn delete(&self, table: &str, predicate: &str, params: &[Value]) -> GatewayResult<usize>;

    /// Begin a transaction.
    async fn begin_transaction(&self) -> GatewayResult<()>;

    /// Commit the active transaction.
    async fn commit(&self) -> GatewayResult<()>;

    /// Roll back the active transaction.
    async fn rollback(&self) -> GatewayResult<()>;

    /// Check whether a table exists.
    async fn table_exists(&self, table: &str) -> GatewayResult<bool>;

    /// Snapshot the entire database.
    async fn create_backup(&self) -> GatewayResult<Backup>;

    /// Replace the database contents with a snapshot.
    async fn restore_from_backup(&self, name: &str) -> GatewayResult<()>;

    /// Run a structural integrity check.
    async fn verify_integrity(&self) -> GatewayResult<bool>;
}
