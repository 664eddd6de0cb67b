//! SQLite implementation of [`StorageGateway`].

use std::path::{Path, PathBuf};

use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::backup::Progress;
use rusqlite::{DatabaseName, OptionalExtension, params_from_iter};
use serde_json::Value as JsonValue;
use strata_migrate::{Backup, GatewayError, GatewayResult, Row, StorageGateway};
use tokio_rusqlite::Connection;
use tracing::{debug, info, warn};

use crate::config::SqliteConfig;
use crate::error::{SqliteError, SqliteResult};
use crate::types::{json_params, quote_ident, row_to_json};

/// A single-connection SQLite gateway.
///
/// One connection carries all work, so a transaction opened with
/// [`StorageGateway::begin_transaction`] covers every subsequent call until it
/// is committed or rolled back.
pub struct SqliteGateway {
    conn: Connection,
    config: SqliteConfig,
    backups: Mutex<Vec<Backup>>,
}

impl SqliteGateway {
    /// Open a database using the given configuration.
    pub async fn open(config: SqliteConfig) -> SqliteResult<Self> {
        config.validate()?;
        let init_sql = config.init_sql();

        let conn = if config.path.is_memory() {
            Connection::open_in_memory().await?
        } else {
            Connection::open(config.path_str()).await?
        };

        conn.call(move |conn| {
            conn.execute_batch(&init_sql)?;
            Ok(())
        })
        .await?;

        if let Some(dir) = &config.backup_dir {
            tokio::fs::create_dir_all(dir).await.map_err(|e| {
                SqliteError::config(format!(
                    "cannot create backup directory {}: {}",
                    dir.display(),
                    e
                ))
            })?;
        }

        info!(path = %config.path_str(), "SQLite gateway opened");

        Ok(Self {
            conn,
            config,
            backups: Mutex::new(Vec::new()),
        })
    }

    /// Open a database from a URL such as `sqlite://./app.db`.
    pub async fn from_url(url: impl AsRef<str>) -> SqliteResult<Self> {
        Self::open(SqliteConfig::from_url(url)?).await
    }

    /// Gateway configuration.
    pub fn config(&self) -> &SqliteConfig {
        &self.config
    }

    /// The underlying async connection.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Backups created by this gateway and still retained, oldest first.
    pub fn backups(&self) -> Vec<Backup> {
        self.backups.lock().clone()
    }

    /// Filesystem location of a backup.
    pub fn backup_path(&self, name: &str) -> SqliteResult<PathBuf> {
        if name.is_empty() || name.contains(['/', '\\']) || name.contains("..") {
            return Err(SqliteError::restore(format!("invalid backup name '{}'", name)));
        }
        Ok(self.backup_dir()?.join(name))
    }

    fn backup_dir(&self) -> SqliteResult<&Path> {
        self.config
            .backup_dir
            .as_deref()
            .ok_or_else(|| SqliteError::backup("no backup directory configured"))
    }

    fn backup_name(&self) -> String {
        let stem = match &self.config.path {
            crate::config::DatabasePath::Memory => "memory".to_string(),
            crate::config::DatabasePath::File(path) => path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("database")
                .to_string(),
        };
        let id = uuid::Uuid::new_v4().simple().to_string();
        format!(
            "{}-{}-{}.sqlite3",
            stem,
            Utc::now().format("%Y%m%dT%H%M%S%3f"),
            &id[..8]
        )
    }

    async fn call<R, F>(&self, f: F) -> GatewayResult<R>
    where
        F: FnOnce(&mut rusqlite::Connection) -> tokio_rusqlite::Result<R> + Send + 'static,
        R: Send + 'static,
    {
        self.conn
            .call(f)
            .await
            .map_err(|e| GatewayError::from(SqliteError::from(e)))
    }

    async fn transaction_control(&self, statement: &'static str) -> GatewayResult<()> {
        debug!(statement, "Transaction control");
        self.conn
            .call(move |conn| {
                conn.execute_batch(statement)?;
                Ok(())
            })
            .await
            .map_err(|e| {
                let err = SqliteError::from(e);
                if err.is_busy() {
                    GatewayError::from(err)
                } else {
                    GatewayError::from(SqliteError::transaction(format!("{}: {}", statement, err)))
                }
            })
    }

    async fn prune_backups(&self) {
        let Some(keep) = self.config.backup_retention else {
            return;
        };

        let expired: Vec<Backup> = {
            let mut backups = self.backups.lock();
            // The newest backup may still be protecting a running batch.
            let excess = backups.len().saturating_sub(keep.max(1));
            backups.drain(..excess).collect()
        };

        for backup in expired {
            let Ok(path) = self.backup_path(&backup.name) else {
                continue;
            };
            match tokio::fs::remove_file(&path).await {
                Ok(()) => debug!(backup = %backup.name, "Pruned backup"),
                Err(e) => warn!(backup = %backup.name, error = %e, "Failed to prune backup"),
            }
        }
    }
}

#[async_trait::async_trait]
impl StorageGateway for SqliteGateway {
    async fn execute(&self, sql: &str, params: &[JsonValue]) -> GatewayResult<usize> {
        debug!(sql = %sql, "Executing statement");
        let sql = sql.to_string();
        let params = json_params(params);

        self.call(move |conn| Ok(conn.execute(&sql, params_from_iter(params))?))
            .await
    }

    async fn execute_batch(&self, sql: &str) -> GatewayResult<()> {
        debug!(sql = %sql, "Executing batch");
        let sql = sql.to_string();

        self.call(move |conn| {
            conn.execute_batch(&sql)?;
            Ok(())
        })
        .await
    }

    async fn select_one(&self, sql: &str, params: &[JsonValue]) -> GatewayResult<Option<Row>> {
        debug!(sql = %sql, "Executing select_one");
        let sql = sql.to_string();
        let params = json_params(params);

        self.call(move |conn| {
            let mut stmt = conn.prepare(&sql)?;
            let columns: Vec<String> = stmt
                .column_names()
                .iter()
                .map(|s| s.to_string())
                .collect();

            let mut rows = stmt.query(params_from_iter(params))?;
            let row = rows.next()?.map(|row| row_to_json(row, &columns));
            Ok(row)
        })
        .await
    }

    async fn select_all(&self, sql: &str, params: &[JsonValue]) -> GatewayResult<Vec<Row>> {
        debug!(sql = %sql, "Executing select_all");
        let sql = sql.to_string();
        let params = json_params(params);

        self.call(move |conn| {
            let mut stmt = conn.prepare(&sql)?;
            let columns: Vec<String> = stmt
                .column_names()
                .iter()
                .map(|s| s.to_string())
                .collect();

            let rows = stmt.query_map(params_from_iter(params), |row| Ok(row_to_json(row, &columns)))?;
            let results: Result<Vec<_>, _> = rows.collect();
            Ok(results?)
        })
        .await
    }

    async fn insert(&self, table: &str, record: Row) -> GatewayResult<i64> {
        let columns: Vec<String> = record.keys().map(|k| quote_ident(k)).collect();
        let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{}", i)).collect();
        let values: Vec<JsonValue> = record.into_iter().map(|(_, v)| v).collect();

        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            quote_ident(table),
            columns.join(", "),
            placeholders.join(", ")
        );
        debug!(sql = %sql, "Executing insert");
        let params = json_params(&values);

        self.call(move |conn| {
            conn.execute(&sql, params_from_iter(params))?;
            Ok(conn.last_insert_rowid())
        })
        .await
    }

    async fn delete(&self, table: &str, predicate: &str, params: &[JsonValue]) -> GatewayResult<usize> {
        let sql = format!("DELETE FROM {} WHERE {}", quote_ident(table), predicate);
        self.execute(&sql, params).await
    }

    async fn begin_transaction(&self) -> GatewayResult<()> {
        self.transaction_control("BEGIN IMMEDIATE").await
    }

    async fn commit(&self) -> GatewayResult<()> {
        self.transaction_control("COMMIT").await
    }

    async fn rollback(&self) -> GatewayResult<()> {
        self.transaction_control("ROLLBACK").await
    }

    async fn table_exists(&self, table: &str) -> GatewayResult<bool> {
        let table = table.to_string();

        self.call(move |conn| {
            let found = conn
                .query_row(
                    "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1",
                    [&table],
                    |_| Ok(()),
                )
                .optional()?;
            Ok(found.is_some())
        })
        .await
    }

    async fn create_backup(&self) -> GatewayResult<Backup> {
        let name = self.backup_name();
        let path = self.backup_path(&name).map_err(|e| GatewayError::backup(e.to_string()))?;
        let target = path.clone();

        self.conn
            .call(move |conn| {
                conn.backup(DatabaseName::Main, &target, None)?;
                Ok(())
            })
            .await
            .map_err(|e| GatewayError::backup(format!("{}: {}", path.display(), e)))?;

        let backup = Backup::new(name);
        info!(backup = %backup.name, path = %path.display(), "Backup created");

        self.backups.lock().push(backup.clone());
        self.prune_backups().await;

        Ok(backup)
    }

    async fn restore_from_backup(&self, name: &str) -> GatewayResult<()> {
        let path = self.backup_path(name).map_err(|e| GatewayError::restore(e.to_string()))?;
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Err(GatewayError::restore(format!(
                "backup {} not found at {}",
                name,
                path.display()
            )));
        }

        let source = path.clone();
        self.conn
            .call(move |conn| {
                if !conn.is_autocommit() {
                    conn.execute_batch("ROLLBACK")?;
                }
                conn.restore(DatabaseName::Main, &source, None::<fn(Progress)>)?;
                Ok(())
            })
            .await
            .map_err(|e| GatewayError::restore(format!("{}: {}", path.display(), e)))?;

        warn!(backup = %name, "Database restored from backup");
        Ok(())
    }

    async fn verify_integrity(&self) -> GatewayResult<bool> {
        self.call(|conn| {
            let result: String = conn.query_row("PRAGMA integrity_check", [], |row| row.get(0))?;
            Ok(result == "ok")
        })
        .await
    }
}
