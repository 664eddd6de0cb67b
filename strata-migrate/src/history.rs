//! Version ledger tracking.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::{MigrateResult, MigrationError};
use crate::gateway::{GatewayError, Row, StorageGateway};

/// A record of an applied migration version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionRecord {
    /// Applied version.
    pub version: u32,
    /// Description copied from the definition at apply time.
    pub description: String,
    /// When the version was applied.
    pub applied_at: DateTime<Utc>,
}

impl VersionRecord {
    fn from_row(row: &Row) -> MigrateResult<Self> {
        let version = row
            .get("version")
            .and_then(Value::as_u64)
            .and_then(|v| u32::try_from(v).ok())
            .ok_or_else(|| malformed("version", row))?;
        let description = row
            .get("description")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let applied_at = row
            .get("applied_at")
            .and_then(Value::as_str)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
            .ok_or_else(|| malformed("applied_at", row))?;

        Ok(Self {
            version,
            description,
            applied_at,
        })
    }
}

fn malformed(column: &str, row: &Row) -> MigrationError {
    GatewayError::query(format!("malformed ledger column '{}' in row {:?}", column, row)).into()
}

/// Reads and writes the ledger table inside the managed database.
#[derive(Debug, Clone)]
pub struct VersionTracker {
    table: String,
}

impl VersionTracker {
    /// Create a tracker for the given ledger table.
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
        }
    }

    /// Ledger table name.
    pub fn table(&self) -> &str {
        &self.table
    }

    /// SQL creating the ledger table.
    pub fn init_sql(&self) -> String {
        format!(
            "CREATE TABLE IF NOT EXISTS \"{}\" (\n    \
                version INTEGER PRIMARY KEY,\n    \
                applied_at TEXT NOT NULL,\n    \
                description TEXT NOT NULL\n\
            )",
            self.table
        )
    }

    /// Create the ledger table if needed.
    pub async fn ensure_ledger(&self, db: &dyn StorageGateway) -> MigrateResult<()> {
        db.execute_batch(&self.init_sql()).await?;
        Ok(())
    }

    /// Highest applied version; 0 when the ledger is missing or empty.
    pub async fn current_version(&self, db: &dyn StorageGateway) -> MigrateResult<u32> {
        if !db.table_exists(&self.table).await? {
            return Ok(0);
        }

        let sql = format!("SELECT MAX(version) AS version FROM \"{}\"", self.table);
        let row = db.select_one(&sql, &[]).await?;

        Ok(row
            .and_then(|r| r.get("version").and_then(Value::as_u64))
            .and_then(|v| u32::try_from(v).ok())
            .unwrap_or(0))
    }

    /// Insert a record for `version`. Call inside the migration's transaction.
    pub async fn record_version(
        &self,
        db: &dyn StorageGateway,
        version: u32,
        description: &str,
    ) -> MigrateResult<VersionRecord> {
        self.ensure_ledger(db).await?;

        let record = VersionRecord {
            version,
            description: description.to_string(),
            applied_at: Utc::now(),
        };

        let mut row = Row::new();
        row.insert("version".into(), json!(record.version));
        row.insert("applied_at".into(), json!(record.applied_at.to_rfc3339()));
        row.insert("description".into(), json!(record.description));
        db.insert(&self.table, row).await?;

        Ok(record)
    }

    /// Delete the record for exactly `version`. Returns whether a row was removed.
    pub async fn remove_version(&self, db: &dyn StorageGateway, version: u32) -> MigrateResult<bool> {
        if !db.table_exists(&self.table).await? {
            return Ok(false);
        }
        let removed = db
            .delete(&self.table, "version = ?1", &[json!(version)])
            .await?;
        Ok(removed > 0)
    }

    /// Look up the record for `version`.
    pub async fn find(&self, db: &dyn StorageGateway, version: u32) -> MigrateResult<Option<VersionRecord>> {
        if !db.table_exists(&self.table).await? {
            return Ok(None);
        }

        let sql = format!(
            "SELECT version, applied_at, description FROM \"{}\" WHERE version = ?1",
            self.table
        );
        db.select_one(&sql, &[json!(version)])
            .await?
            .map(|row| VersionRecord::from_row(&row))
            .transpose()
    }

    /// All records, most recent version first.
    pub async fn records(&self, db: &dyn StorageGateway) -> MigrateResult<Vec<VersionRecord>> {
        if !db.table_exists(&self.table).await? {
            return Ok(Vec::new());
        }

        let sql = format!(
            "SELECT version, applied_at, description FROM \"{}\" ORDER BY version DESC",
            self.table
        );
        db.select_all(&sql, &[])
            .await?
            .iter()
            .map(VersionRecord::from_row)
            .collect()
    }

    /// Set of applied versions.
    pub async fn applied_versions(&self, db: &dyn StorageGateway) -> MigrateResult<BTreeSet<u32>> {
        Ok(self
            .records(db)
            .await?
            .into_iter()
            .map(|r| r.version)
            .collect())
    }
}

/// Guard preventing overlapping migrate/rollback operations.
///
/// Released when dropped.
pub struct MigrationLock {
    release_fn: Option<Box<dyn FnOnce() + Send>>,
}

impl MigrationLock {
    /// Create a lock that runs `release` when dropped.
    pub fn new(release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            release_fn: Some(Box::new(release)),
        }
    }

    /// Take the flag, failing fast if it is already held.
    pub fn try_acquire(flag: &Arc<AtomicBool>) -> MigrateResult<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| MigrationError::AlreadyInProgress)?;

        let flag = Arc::clone(flag);
        Ok(Self::new(move || flag.store(false, Ordering::Release)))
    }
}

impl Drop for MigrationLock {
    fn drop(&mut self) {
        if let Some(release) = self.release_fn.take() {
            release();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_from_row() {
        let mut row = Row::new();
        row.insert("version".into(), json!(3));
        row.insert("applied_at".into(), json!("2024-05-01T10:00:00+00:00"));
        row.insert("description".into(), json!("add invoices"));

        let record = VersionRecord::from_row(&row).unwrap();
        assert_eq!(record.version, 3);
        assert_eq!(record.description, "add invoices");
        assert_eq!(record.applied_at.to_rfc3339(), "2024-05-01T10:00:00+00:00");
    }

    #[test]
    fn test_record_from_malformed_row() {
        let mut row = Row::new();
        row.insert("version".into(), json!("three"));
        assert!(VersionRecord::from_row(&row).is_err());
    }

    #[test]
    fn test_init_sql_has_columns() {
        let tracker = VersionTracker::new("schema_migrations");
        let sql = tracker.init_sql();
        assert!(sql.contains("\"schema_migrations\""));
        assert!(sql.contains("version INTEGER PRIMARY KEY"));
        assert!(sql.contains("applied_at"));
        assert!(sql.contains("description"));
    }

    #[test]
    fn test_lock_is_exclusive() {
        let flag = Arc::new(AtomicBool::new(false));

        let lock = MigrationLock::try_acquire(&flag).unwrap();
        assert!(matches!(
            MigrationLock::try_acquire(&flag),
            Err(MigrationError::AlreadyInProgress)
        ));

        drop(lock);
        assert!(MigrationLock::try_acquire(&flag).is_ok());
    }
}
