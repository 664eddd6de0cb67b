//! Shared helpers for integration tests.

#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use serde_json::Value;
use strata::sqlite::{SqliteConfig, SqliteGateway};
use strata::{
    AuditEvent, AuditSink, Backup, BoxError, GatewayError, GatewayResult, MigrationDefinition,
    MigrationRegistry, Procedure, Row, StorageGateway,
};
use tokio::sync::Notify;

/// Install a test subscriber once; honours `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

/// In-memory database whose backups land in `backup_dir`.
pub async fn sqlite(backup_dir: &Path) -> Arc<SqliteGateway> {
    init_tracing();
    let gateway = SqliteGateway::open(SqliteConfig::memory().backup_dir(backup_dir))
        .await
        .expect("open in-memory database");
    Arc::new(gateway)
}

/// Version 1: create table `t`.
pub fn create_t() -> MigrationDefinition {
    MigrationDefinition::builder(1, "create t")
        .up_sql("CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT NOT NULL)")
        .down_sql("DROP TABLE IF EXISTS t")
        .build()
        .unwrap()
}

/// Version 2: add column `c` to `t`.
pub fn add_column_c() -> MigrationDefinition {
    MigrationDefinition::builder(2, "add c to t")
        .up_sql("ALTER TABLE t ADD COLUMN c TEXT")
        .down_sql("ALTER TABLE t DROP COLUMN c")
        .depends_on([1])
        .build()
        .unwrap()
}

/// Version 3: create table `u`.
pub fn create_u() -> MigrationDefinition {
    MigrationDefinition::builder(3, "create u")
        .up_sql("CREATE TABLE u (id INTEGER PRIMARY KEY, t_id INTEGER REFERENCES t(id))")
        .down_sql("DROP TABLE IF EXISTS u")
        .depends_on([1])
        .build()
        .unwrap()
}

/// A definition whose `up` is not valid SQL.
pub fn broken(version: u32) -> MigrationDefinition {
    MigrationDefinition::builder(version, "broken")
        .up_sql("ALTER TABLE t ADD COLUMN")
        .down_sql("SELECT 1")
        .build()
        .unwrap()
}

/// A definition whose custom validation always fails.
pub fn failing_validation(version: u32, table: &str) -> MigrationDefinition {
    let reason = format!("{} must contain seed rows", table);
    MigrationDefinition::builder(version, format!("create {}", table))
        .up_sql(format!("CREATE TABLE {} (id INTEGER PRIMARY KEY)", table))
        .down_sql(format!("DROP TABLE IF EXISTS {}", table))
        .validate(Procedure::new(move |_db| {
            let reason = reason.clone();
            async move { Err::<(), BoxError>(reason.into()) }
        }))
        .build()
        .unwrap()
}

pub fn registry(definitions: impl IntoIterator<Item = MigrationDefinition>) -> MigrationRegistry {
    let mut registry = MigrationRegistry::new();
    for definition in definitions {
        registry.register(definition).unwrap();
    }
    registry
}

pub async fn table_exists(db: &dyn StorageGateway, table: &str) -> bool {
    db.table_exists(table).await.unwrap()
}

pub async fn columns(db: &dyn StorageGateway, table: &str) -> Vec<String> {
    db.select_all(&format!("PRAGMA table_info({})", table), &[])
        .await
        .unwrap()
        .into_iter()
        .filter_map(|row| row.get("name").and_then(Value::as_str).map(String::from))
        .collect()
}

pub async fn user_tables(db: &dyn StorageGateway) -> Vec<String> {
    db.select_all(
        "SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name",
        &[],
    )
    .await
    .unwrap()
    .into_iter()
    .filter_map(|row| row.get("name").and_then(Value::as_str).map(String::from))
    .collect()
}

/// Gateway wrapper that injects failures into backup, restore and
/// integrity calls, and can hold `create_backup` until released.
pub struct FaultyGateway {
    inner: Arc<dyn StorageGateway>,
    pub fail_backup: AtomicBool,
    pub fail_restore: AtomicBool,
    pub fail_integrity: AtomicBool,
    hold_backup: AtomicBool,
    pub backup_started: Notify,
    pub release_backup: Notify,
}

impl FaultyGateway {
    pub fn new(inner: Arc<dyn StorageGateway>) -> Self {
        Self {
            inner,
            fail_backup: AtomicBool::new(false),
            fail_restore: AtomicBool::new(false),
            fail_integrity: AtomicBool::new(false),
            hold_backup: AtomicBool::new(false),
            backup_started: Notify::new(),
            release_backup: Notify::new(),
        }
    }

    /// Make the next `create_backup` wait for `release_backup`.
    pub fn hold_backups(&self) {
        self.hold_backup.store(true, Ordering::SeqCst);
    }

    pub fn set(flag: &AtomicBool, value: bool) {
        flag.store(value, Ordering::SeqCst);
    }
}

#[async_trait::async_trait]
impl StorageGateway for FaultyGateway {
    async fn execute(&self, sql: &str, params: &[Value]) -> GatewayResult<usize> {
        self.inner.execute(sql, params).await
    }

    async fn execute_batch(&self, sql: &str) -> GatewayResult<()> {
        self.inner.execute_batch(sql).await
    }

    async fn select_one(&self, sql: &str, params: &[Value]) -> GatewayResult<Option<Row>> {
        self.inner.select_one(sql, params).await
    }

    async fn select_all(&self, sql: &str, params: &[Value]) -> GatewayResult<Vec<Row>> {
        self.inner.select_all(sql, params).await
    }

    async fn insert(&self, table: &str, record: Row) -> GatewayResult<i64> {
        self.inner.insert(table, record).await
    }

    async fn delete(&self, table: &str, predicate: &str, params: &[Value]) -> GatewayResult<usize> {
        self.inner.delete(table, predicate, params).await
    }

    async fn begin_transaction(&self) -> GatewayResult<()> {
        self.inner.begin_transaction().await
    }

    async fn commit(&self) -> GatewayResult<()> {
        self.inner.commit().await
    }

    async fn rollback(&self) -> GatewayResult<()> {
        self.inner.rollback().await
    }

    async fn table_exists(&self, table: &str) -> GatewayResult<bool> {
        self.inner.table_exists(table).await
    }

    async fn create_backup(&self) -> GatewayResult<Backup> {
        if self.hold_backup.swap(false, Ordering::SeqCst) {
            self.backup_started.notify_one();
            self.release_backup.notified().await;
        }
        if self.fail_backup.load(Ordering::SeqCst) {
            return Err(GatewayError::backup("disk full"));
        }
        self.inner.create_backup().await
    }

    async fn restore_from_backup(&self, name: &str) -> GatewayResult<()> {
        if self.fail_restore.load(Ordering::SeqCst) {
            return Err(GatewayError::restore(format!("backup {} is unreadable", name)));
        }
        self.inner.restore_from_backup(name).await
    }

    async fn verify_integrity(&self) -> GatewayResult<bool> {
        if self.fail_integrity.load(Ordering::SeqCst) {
            return Ok(false);
        }
        self.inner.verify_integrity().await
    }
}

/// Audit sink that keeps every event.
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<AuditEvent>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().clone()
    }

    pub fn names(&self) -> Vec<String> {
        self.events.lock().iter().map(|e| e.name.clone()).collect()
    }
}

#[async_trait::async_trait]
impl AuditSink for RecordingSink {
    async fn log_action(&self, event: AuditEvent) -> Result<(), BoxError> {
        self.events.lock().push(event);
        Ok(())
    }
}
