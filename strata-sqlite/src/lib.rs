//! SQLite storage gateway for the strata migration engine.
//!
//! This crate implements [`strata_migrate::StorageGateway`] on top of
//! `tokio-rusqlite`, so every statement runs on a dedicated blocking thread
//! while the engine stays async.
//!
//! # Features
//!
//! - In-memory and file-based databases
//! - Explicit transactions spanning a migration and its ledger record
//! - Online backups through the SQLite backup API, with optional retention
//! - Restore from a named backup and `PRAGMA integrity_check`
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use strata_sqlite::{SqliteConfig, SqliteGateway};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let gateway = SqliteGateway::open(SqliteConfig::file("./data/app.db").backup_retention(5)).await?;
//!     let gateway: Arc<dyn strata_migrate::StorageGateway> = Arc::new(gateway);
//!
//!     // Hand the gateway to a MigrationEngine...
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod gateway;
pub mod types;

pub use config::{DatabasePath, JournalMode, SqliteConfig, SynchronousMode};
pub use error::{SqliteError, SqliteResult};
pub use gateway::SqliteGateway;
