//! # Strata
//!
//! Versioned schema migrations for embedded databases.
//!
//! Strata provides:
//! - A registry of versioned migrations, each with an explicit inverse
//! - Forward migration in version order with one backup per batch
//! - Automatic recovery when a migration or its validation fails
//! - Explicit rollback to an earlier version
//! - Status, history and dry-run reporting
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use strata::prelude::*;
//! use strata::sqlite::{SqliteConfig, SqliteGateway};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let gateway = SqliteGateway::open(SqliteConfig::file("./data/app.db")).await?;
//!
//!     let registry = MigrationRegistry::new().with(
//!         MigrationDefinition::builder(1, "create accounts")
//!             .up_sql("CREATE TABLE accounts (id INTEGER PRIMARY KEY, owner TEXT NOT NULL)")
//!             .down_sql("DROP TABLE IF EXISTS accounts")
//!             .build()?,
//!     )?;
//!
//!     let config = MigrationConfig::load("strata.toml").await?;
//!     let engine = MigrationEngine::new(config, registry, Arc::new(gateway))?;
//!     println!("{}", engine.migrate().await?.summary());
//!     Ok(())
//! }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

pub use strata_migrate::*;

/// SQLite storage gateway.
#[cfg(feature = "sqlite")]
#[cfg_attr(docsrs, doc(cfg(feature = "sqlite")))]
pub mod sqlite {
    pub use strata_sqlite::*;
}

/// Prelude module for convenient imports.
pub mod prelude {
    pub use strata_migrate::{
        Migration, MigrationConfig, MigrationDefinition, MigrationEngine, MigrationError,
        MigrationRegistry, MigrateResult, Procedure, StorageGateway,
    };
}
