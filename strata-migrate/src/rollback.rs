//! Rollback coordination.
//!
//! Two paths lead here. A failed forward migration is recovered by restoring
//! the batch backup, or by running the migration's `down` when no backup is
//! available. An operator can also revert applied versions explicitly with
//! [`MigrationEngine::rollback_to_version`].

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::audit::{self, AuditEvent};
use crate::definition::MigrationDefinition;
use crate::engine::MigrationEngine;
use crate::error::{BoxError, MigrateResult, MigrationError};
use crate::gateway::Backup;
use crate::history::MigrationLock;

/// How a failed migration was undone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryStrategy {
    /// The batch backup was restored.
    RestoreBackup,
    /// The migration's `down` procedure was run.
    Compensate,
}

impl RecoveryStrategy {
    /// Stable name used in logs and audit events.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RestoreBackup => "restore_backup",
            Self::Compensate => "compensate",
        }
    }
}

impl fmt::Display for RecoveryStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of an explicit rollback.
#[derive(Debug, Clone, Serialize)]
pub struct RollbackReport {
    /// Version before the rollback.
    pub from_version: u32,
    /// Version after the rollback.
    pub to_version: u32,
    /// Versions reverted, most recent first.
    pub reverted: Vec<u32>,
    /// Backup taken before reverting.
    pub backup: Backup,
    /// Total duration in milliseconds.
    pub duration_ms: i64,
}

impl MigrationEngine {
    /// Recover from a failed migration and return the error to surface.
    ///
    /// Returns `failure` unchanged when recovery succeeds, or a
    /// [`MigrationError::DoubleFailure`] (and halts the engine) when it does not.
    pub(crate) async fn coordinate_rollback(
        &self,
        definition: &MigrationDefinition,
        backup: Option<&Backup>,
        failure: MigrationError,
    ) -> MigrationError {
        let version = definition.version();
        warn!(version, error = %failure, "Migration failed, starting rollback coordination");
        audit::emit(
            self.audit.as_ref(),
            AuditEvent::migration_failed(version, &failure.to_string()),
        )
        .await;

        let (strategy, recovery) = match backup {
            Some(backup) => (
                RecoveryStrategy::RestoreBackup,
                self.gateway
                    .restore_from_backup(&backup.name)
                    .await
                    .map_err(BoxError::from),
            ),
            None => (RecoveryStrategy::Compensate, self.revert_in_transaction(definition).await),
        };

        audit::emit(
            self.audit.as_ref(),
            AuditEvent::rollback_performed(version, strategy.as_str(), recovery.is_ok()),
        )
        .await;

        match recovery {
            Ok(()) => {
                match self.tracker.current_version(self.gateway.as_ref()).await {
                    Ok(current) => self.set_cursor(current),
                    Err(e) => warn!(error = %e, "Could not re-read version after recovery"),
                }
                info!(version, %strategy, "Rollback coordination succeeded");
                failure
            }
            Err(recovery) => {
                self.halt(version);
                error!(
                    version,
                    %strategy,
                    original = %failure,
                    recovery = %recovery,
                    "MANUAL RECOVERY REQUIRED: migration and its rollback both failed"
                );
                MigrationError::DoubleFailure {
                    version,
                    original: Box::new(failure),
                    recovery,
                }
            }
        }
    }

    /// Run `down` and drop the ledger record in one transaction.
    async fn revert_in_transaction(&self, definition: &MigrationDefinition) -> Result<(), BoxError> {
        let version = definition.version();
        self.gateway.begin_transaction().await?;

        let result: Result<(), BoxError> = async {
            definition.migration().down(Arc::clone(&self.gateway)).await?;
            self.tracker
                .remove_version(self.gateway.as_ref(), version)
                .await?;
            Ok(())
        }
        .await;

        match result {
            Ok(()) => {
                self.gateway.commit().await?;
                Ok(())
            }
            Err(e) => {
                if let Err(rollback_err) = self.gateway.rollback().await {
                    warn!(version, error = %rollback_err, "Transaction rollback failed");
                }
                Err(e)
            }
        }
    }

    /// Revert applied versions down to `target`, most recent first.
    ///
    /// A fresh backup is taken first. A failing `down` aborts the remaining
    /// steps; versions already reverted stay reverted.
    pub async fn rollback_to_version(&self, target: u32) -> MigrateResult<RollbackReport> {
        let _lock = MigrationLock::try_acquire(&self.in_progress)?;
        self.ensure_not_halted()?;

        let start = Instant::now();
        let current = self.current_version().await?;
        if target >= current {
            return Err(MigrationError::NothingToRollback { target, current });
        }

        let definitions = (target + 1..=current)
            .rev()
            .map(|version| {
                self.registry
                    .get(version)
                    .ok_or(MigrationError::MissingDefinition(version))
            })
            .collect::<MigrateResult<Vec<_>>>()?;

        let backup = self
            .gateway
            .create_backup()
            .await
            .map_err(MigrationError::BackupCreationFailed)?;

        info!(from = current, to = target, backup = %backup.name, "Rolling back");

        let mut reverted = Vec::with_capacity(definitions.len());
        for definition in definitions {
            let version = definition.version();
            if let Err(source) = self.revert_in_transaction(definition).await {
                let err = MigrationError::RevertFailed { version, source };
                error!(version, error = %err, "Rollback stopped");
                audit::emit(
                    self.audit.as_ref(),
                    AuditEvent::rollback_failed(current, target, version, &err.to_string()),
                )
                .await;
                return Err(err);
            }
            self.set_cursor(version - 1);
            reverted.push(version);
            info!(version, "Migration reverted");
        }

        let actual = self.current_version().await?;
        if actual != target {
            let err = MigrationError::VersionMismatch {
                expected: target,
                actual,
            };
            error!(expected = target, actual, "Ledger does not match the rollback target");
            audit::emit(
                self.audit.as_ref(),
                AuditEvent::rollback_failed(current, target, actual, &err.to_string()),
            )
            .await;
            return Err(err);
        }

        audit::emit(
            self.audit.as_ref(),
            AuditEvent::rolled_back_to_version(current, target, &backup.name),
        )
        .await;

        Ok(RollbackReport {
            from_version: current,
            to_version: target,
            reverted,
            backup,
            duration_ms: start.elapsed().as_millis() as i64,
        })
    }
}
