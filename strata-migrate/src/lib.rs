//! # strata-migrate
//!
//! Versioned schema migration engine.
//!
//! This crate provides functionality for:
//! - Registering versioned migrations with explicit inverses and dependencies
//! - Tracking the applied version in a ledger table inside the managed database
//! - Applying pending migrations in order, each inside a transaction
//! - Post-commit validation (integrity, ledger, custom checks)
//! - Rollback coordination from a per-batch backup, or a compensating `down`
//! - Explicit rollback to an earlier version
//! - Status, history and dry-run introspection
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐     ┌────────────────┐     ┌─────────────────┐
//! │   Registry   │────▶│ MigrationEngine│────▶│ StorageGateway  │
//! └──────────────┘     └────────────────┘     └─────────────────┘
//!                        │            │                │
//!                        ▼            ▼                ▼
//!               ┌──────────────┐ ┌──────────┐   ┌─────────────┐
//!               │VersionTracker│ │ Rollback │   │   Backups   │
//!               └──────────────┘ └──────────┘   └─────────────┘
//! ```
//!
//! The engine never talks to a driver directly. Backends implement
//! [`StorageGateway`]; `strata-sqlite` provides one for SQLite.
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use strata_migrate::{MigrationConfig, MigrationDefinition, MigrationEngine, MigrationRegistry};
//!
//! async fn run(gateway: Arc<dyn strata_migrate::StorageGateway>) -> strata_migrate::MigrateResult<()> {
//!     let mut registry = MigrationRegistry::new();
//!     registry.register(
//!         MigrationDefinition::builder(1, "create customers")
//!             .up_sql("CREATE TABLE customers (id INTEGER PRIMARY KEY, name TEXT NOT NULL)")
//!             .down_sql("DROP TABLE IF EXISTS customers")
//!             .build()?,
//!     )?;
//!     registry.register(
//!         MigrationDefinition::builder(2, "add customer email")
//!             .up_sql("ALTER TABLE customers ADD COLUMN email TEXT")
//!             .down_sql("ALTER TABLE customers DROP COLUMN email")
//!             .depends_on([1])
//!             .build()?,
//!     )?;
//!
//!     let engine = MigrationEngine::new(MigrationConfig::new(), registry, gateway)?;
//!     let report = engine.migrate().await?;
//!     println!("{}", report.summary());
//!     Ok(())
//! }
//! ```

pub mod audit;
pub mod config;
pub mod definition;
pub mod engine;
pub mod error;
pub mod gateway;
pub mod history;
pub mod registry;
pub mod rollback;
pub mod status;

// Re-exports
pub use audit::{AuditEvent, AuditSink, TracingAuditSink};
pub use config::MigrationConfig;
pub use definition::{
    DefinitionSummary, Migration, MigrationBuilder, MigrationDefinition, Procedure,
    ProcedureResult, ScriptedMigration,
};
pub use engine::{AppliedMigration, MigrationEngine, MigrationReport};
pub use error::{BoxError, MigrateResult, MigrationError};
pub use gateway::{Backup, GatewayError, GatewayResult, Row, StorageGateway};
pub use history::{MigrationLock, VersionRecord, VersionTracker};
pub use registry::MigrationRegistry;
pub use rollback::{RecoveryStrategy, RollbackReport};
pub use status::{DryRunEntry, DryRunReport, DryRunStatus, HistoryEntry, MigrationStatus};
