//! Migration engine implementation.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Instant;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::audit::{self, AuditEvent, AuditSink};
use crate::config::MigrationConfig;
use crate::definition::MigrationDefinition;
use crate::error::{BoxError, MigrateResult, MigrationError};
use crate::gateway::{Backup, StorageGateway};
use crate::history::{MigrationLock, VersionTracker};
use crate::registry::MigrationRegistry;

/// Outcome of a single applied migration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppliedMigration {
    /// Applied version.
    pub version: u32,
    /// Definition description.
    pub description: String,
    /// Time spent applying and validating, in milliseconds.
    pub duration_ms: i64,
}

/// Result of a `migrate()` call.
#[derive(Debug, Clone, Serialize)]
pub struct MigrationReport {
    /// Version before the batch.
    pub from_version: u32,
    /// Version after the batch.
    pub to_version: u32,
    /// Migrations applied, in order.
    pub applied: Vec<AppliedMigration>,
    /// Backup taken for the batch. `None` when there was nothing to do.
    pub backup: Option<Backup>,
    /// Total duration in milliseconds.
    pub duration_ms: i64,
}

impl MigrationReport {
    fn up_to_date(version: u32, duration_ms: i64) -> Self {
        Self {
            from_version: version,
            to_version: version,
            applied: Vec::new(),
            backup: None,
            duration_ms,
        }
    }

    /// Number of migrations applied.
    pub fn applied_count(&self) -> usize {
        self.applied.len()
    }

    /// Whether the database was already at the target.
    pub fn is_noop(&self) -> bool {
        self.applied.is_empty()
    }

    /// Get a summary of the result.
    pub fn summary(&self) -> String {
        if self.is_noop() {
            return format!("Database is up to date at version {}", self.to_version);
        }

        format!(
            "{} applied ({} -> {}) in {}ms",
            self.applied_count(),
            self.from_version,
            self.to_version,
            self.duration_ms
        )
    }
}

/// The main migration engine.
///
/// Owns nothing but references: the registry is built by the host and the
/// gateway wraps the managed database. At most one `migrate()` or
/// `rollback_to_version()` runs at a time per engine.
pub struct MigrationEngine {
    pub(crate) config: MigrationConfig,
    pub(crate) registry: Arc<MigrationRegistry>,
    pub(crate) gateway: Arc<dyn StorageGateway>,
    pub(crate) tracker: VersionTracker,
    pub(crate) audit: Option<Arc<dyn AuditSink>>,
    pub(crate) in_progress: Arc<AtomicBool>,
    halted: Mutex<Option<u32>>,
    cursor: AtomicU32,
}

impl MigrationEngine {
    /// Create a new migration engine.
    pub fn new(
        config: MigrationConfig,
        registry: impl Into<Arc<MigrationRegistry>>,
        gateway: Arc<dyn StorageGateway>,
    ) -> MigrateResult<Self> {
        config.validate()?;
        let tracker = VersionTracker::new(config.ledger_table.clone());

        Ok(Self {
            config,
            registry: registry.into(),
            gateway,
            tracker,
            audit: None,
            in_progress: Arc::new(AtomicBool::new(false)),
            halted: Mutex::new(None),
            cursor: AtomicU32::new(0),
        })
    }

    /// Attach an audit sink.
    pub fn with_audit_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(sink);
        self
    }

    /// Engine configuration.
    pub fn config(&self) -> &MigrationConfig {
        &self.config
    }

    /// The registry this engine applies.
    pub fn registry(&self) -> &MigrationRegistry {
        &self.registry
    }

    /// The version tracker.
    pub fn tracker(&self) -> &VersionTracker {
        &self.tracker
    }

    /// The storage gateway.
    pub fn gateway(&self) -> &Arc<dyn StorageGateway> {
        &self.gateway
    }

    /// Version the engine last observed or reached. Not a database read.
    pub fn cached_version(&self) -> u32 {
        self.cursor.load(Ordering::Acquire)
    }

    /// Version `migrate()` aims for.
    pub fn target_version(&self) -> u32 {
        self.config
            .target_version
            .unwrap_or_else(|| self.registry.latest_version())
    }

    /// Read the current version from the ledger.
    pub async fn current_version(&self) -> MigrateResult<u32> {
        let version = self
            .with_retry(|| self.tracker.current_version(self.gateway.as_ref()))
            .await?;
        self.cursor.store(version, Ordering::Release);
        Ok(version)
    }

    /// Whether an unrecovered double failure has halted the engine.
    pub fn is_halted(&self) -> bool {
        self.halted.lock().is_some()
    }

    /// Clear the halted state once an operator has repaired the database.
    pub fn acknowledge_recovery(&self) {
        if let Some(version) = self.halted.lock().take() {
            warn!(version, "Halt cleared by operator; automated migrations re-enabled");
        }
    }

    /// Apply every pending migration up to the target version.
    ///
    /// Gaps and unsatisfied dependencies are rejected before anything is
    /// written. One backup protects the whole batch. The first failure stops
    /// the batch and is returned after rollback coordination has run.
    pub async fn migrate(&self) -> MigrateResult<MigrationReport> {
        let _lock = MigrationLock::try_acquire(&self.in_progress)?;
        self.ensure_not_halted()?;

        let start = Instant::now();
        let current = self.current_version().await?;
        let target = self.target_version();

        if current >= target {
            if current > target {
                warn!(current, target, "Database is ahead of the migration target");
            }
            debug!(current, "No pending migrations");
            return Ok(MigrationReport::up_to_date(
                current,
                start.elapsed().as_millis() as i64,
            ));
        }

        if let Some(missing) = self.registry.first_gap(current, target) {
            return Err(MigrationError::UnreachableTarget {
                current,
                target,
                missing,
            });
        }

        let pending = self.registry.pending_versions(current, target);
        if pending.is_empty() {
            return Err(MigrationError::UnreachableTarget {
                current,
                target,
                missing: current + 1,
            });
        }

        self.check_batch_dependencies(&pending).await?;

        let backup = self
            .gateway
            .create_backup()
            .await
            .map_err(MigrationError::BackupCreationFailed)?;

        info!(
            from = current,
            to = target,
            pending = pending.len(),
            backup = %backup.name,
            "Starting migration batch"
        );

        let mut applied = Vec::with_capacity(pending.len());
        for version in pending {
            let definition = self
                .registry
                .get(version)
                .ok_or(MigrationError::MissingDefinition(version))?;

            match self.apply(definition, Some(&backup)).await {
                Ok(outcome) => applied.push(outcome),
                Err(e) => {
                    error!(version, error = %e, "Migration batch stopped");
                    return Err(e);
                }
            }
        }

        let actual = self.current_version().await?;
        if actual != target {
            error!(expected = target, actual, "Ledger does not match the migration target");
            return Err(MigrationError::VersionMismatch {
                expected: target,
                actual,
            });
        }

        let report = MigrationReport {
            from_version: current,
            to_version: actual,
            applied,
            backup: Some(backup),
            duration_ms: start.elapsed().as_millis() as i64,
        };
        info!(summary = %report.summary(), "Migration batch complete");
        Ok(report)
    }

    /// Apply a single registered migration with the full apply, validate and
    /// rollback protocol.
    ///
    /// With a `backup`, failures restore it; without one, the migration's
    /// `down` procedure is used as compensation.
    pub async fn run_migration(
        &self,
        version: u32,
        backup: Option<&Backup>,
    ) -> MigrateResult<AppliedMigration> {
        let _lock = MigrationLock::try_acquire(&self.in_progress)?;
        self.ensure_not_halted()?;

        let definition = self
            .registry
            .get(version)
            .ok_or(MigrationError::MissingDefinition(version))?;
        self.apply(definition, backup).await
    }

    async fn apply(
        &self,
        definition: &MigrationDefinition,
        backup: Option<&Backup>,
    ) -> MigrateResult<AppliedMigration> {
        let version = definition.version();
        let start = Instant::now();

        let applied = self
            .with_retry(|| self.tracker.applied_versions(self.gateway.as_ref()))
            .await?;
        let missing = definition.missing_dependencies(&applied);
        if !missing.is_empty() {
            return Err(MigrationError::DependencyNotSatisfied { version, missing });
        }

        debug!(version, description = %definition.description(), "Applying migration");

        if let Err(failure) = self.execute_forward(definition).await {
            return Err(self.coordinate_rollback(definition, backup, failure).await);
        }

        if let Err(failure) = self.validate_applied(definition).await {
            return Err(self.coordinate_rollback(definition, backup, failure).await);
        }

        self.cursor.store(version, Ordering::Release);
        let duration_ms = start.elapsed().as_millis() as i64;
        info!(version, description = %definition.description(), duration_ms, "Migration applied");
        audit::emit(
            self.audit.as_ref(),
            AuditEvent::migration_applied(version, definition.description(), duration_ms),
        )
        .await;

        Ok(AppliedMigration {
            version,
            description: definition.description().to_string(),
            duration_ms,
        })
    }

    /// Reject the batch before any write if a pending version depends on
    /// something neither applied nor earlier in the batch.
    async fn check_batch_dependencies(&self, pending: &[u32]) -> MigrateResult<()> {
        let mut satisfied = self
            .with_retry(|| self.tracker.applied_versions(self.gateway.as_ref()))
            .await?;

        for &version in pending {
            let definition = self
                .registry
                .get(version)
                .ok_or(MigrationError::MissingDefinition(version))?;
            let missing = definition.missing_dependencies(&satisfied);
            if !missing.is_empty() {
                warn!(version, ?missing, "Batch rejected: unsatisfied dependencies");
                return Err(MigrationError::DependencyNotSatisfied { version, missing });
            }
            satisfied.insert(version);
        }

        Ok(())
    }

    /// Run `up` and record the version inside one transaction.
    async fn execute_forward(&self, definition: &MigrationDefinition) -> MigrateResult<()> {
        let version = definition.version();

        self.with_retry(|| async { Ok(self.gateway.begin_transaction().await?) })
            .await
            .map_err(|e| MigrationError::MigrationExecutionFailed {
                version,
                source: Box::new(e),
            })?;

        let forward: Result<(), BoxError> = async {
            definition.migration().up(Arc::clone(&self.gateway)).await?;
            self.tracker
                .record_version(self.gateway.as_ref(), version, definition.description())
                .await?;
            Ok(())
        }
        .await;

        let outcome = match forward {
            Ok(()) => self.gateway.commit().await.map_err(BoxError::from),
            Err(e) => Err(e),
        };

        if let Err(source) = outcome {
            if let Err(e) = self.gateway.rollback().await {
                warn!(version, error = %e, "Transaction rollback failed");
            }
            return Err(MigrationError::MigrationExecutionFailed { version, source });
        }

        Ok(())
    }

    /// Post-commit checks: integrity, ledger record, custom validation.
    async fn validate_applied(&self, definition: &MigrationDefinition) -> MigrateResult<()> {
        let version = definition.version();

        match self.gateway.verify_integrity().await {
            Ok(true) => {}
            Ok(false) => return Err(MigrationError::validation(version, "integrity check failed")),
            Err(e) => {
                return Err(MigrationError::ValidationFailed {
                    version,
                    reason: format!("integrity check could not run: {}", e),
                    source: Some(Box::new(e)),
                });
            }
        }

        match self.tracker.find(self.gateway.as_ref(), version).await {
            Ok(Some(_)) => {}
            Ok(None) => {
                return Err(MigrationError::validation(
                    version,
                    "version record missing after commit",
                ));
            }
            Err(e) => {
                return Err(MigrationError::ValidationFailed {
                    version,
                    reason: format!("version record could not be read: {}", e),
                    source: Some(Box::new(e)),
                });
            }
        }

        definition
            .migration()
            .validate(Arc::clone(&self.gateway))
            .await
            .map_err(|e| MigrationError::ValidationFailed {
                version,
                reason: format!("custom validation failed: {}", e),
                source: Some(e),
            })
    }

    pub(crate) fn ensure_not_halted(&self) -> MigrateResult<()> {
        match *self.halted.lock() {
            Some(version) => Err(MigrationError::Halted { version }),
            None => Ok(()),
        }
    }

    pub(crate) fn halt(&self, version: u32) {
        *self.halted.lock() = Some(version);
    }

    pub(crate) fn set_cursor(&self, version: u32) {
        self.cursor.store(version, Ordering::Release);
    }

    /// Retry an operation while the gateway reports a transient busy status.
    pub(crate) async fn with_retry<T, F, Fut>(&self, mut op: F) -> MigrateResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = MigrateResult<T>>,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Err(MigrationError::Gateway(e)) if e.is_busy() && attempt < self.config.busy_retries => {
                    attempt += 1;
                    debug!(attempt, error = %e, "Database busy, retrying");
                    tokio::time::sleep(self.config.retry_delay()).await;
                }
                result => return result,
            }
        }
    }
}
