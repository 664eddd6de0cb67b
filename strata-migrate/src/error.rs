//! Error types for the migration engine.

use thiserror::Error;

use crate::gateway::GatewayError;

/// Result type alias for migration operations.
pub type MigrateResult<T> = Result<T, MigrationError>;

/// Boxed error produced by migration procedures.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors that can occur during migration operations.
#[derive(Debug, Error)]
pub enum MigrationError {
    /// A migration definition was rejected at registration time.
    #[error("Invalid definition for version {version}: {reason}")]
    InvalidDefinition {
        /// Version of the rejected definition.
        version: u32,
        /// Why it was rejected.
        reason: String,
    },

    /// One or more prerequisite versions are not applied.
    #[error("Migration {version} requires versions {missing:?} to be applied first")]
    DependencyNotSatisfied {
        /// Version that was refused.
        version: u32,
        /// Prerequisite versions with no ledger record.
        missing: Vec<u32>,
    },

    /// The registry cannot reach the target version without a gap.
    #[error("Cannot migrate from version {current} to {target}: no definition for version {missing}")]
    UnreachableTarget {
        /// Version the database is at.
        current: u32,
        /// Version that was requested.
        target: u32,
        /// First version in the range with no registered definition.
        missing: u32,
    },

    /// The batch backup could not be created; nothing was changed.
    #[error("Failed to create backup before migrating: {0}")]
    BackupCreationFailed(#[source] GatewayError),

    /// A migration's forward procedure failed.
    #[error("Migration {version} failed: {source}")]
    MigrationExecutionFailed {
        /// Version whose `up` failed.
        version: u32,
        /// Underlying cause.
        #[source]
        source: BoxError,
    },

    /// Post-commit validation of a migration failed.
    #[error("Validation of migration {version} failed: {reason}")]
    ValidationFailed {
        /// Version that failed validation.
        version: u32,
        /// Which check failed.
        reason: String,
        /// Underlying cause, when the check raised an error.
        #[source]
        source: Option<BoxError>,
    },

    /// Both the forward path and the recovery path failed.
    #[error(
        "MANUAL RECOVERY REQUIRED: migration {version} failed ({original}) and recovery also failed: {recovery}"
    )]
    DoubleFailure {
        /// Version being applied when the failure happened.
        version: u32,
        /// The failure that triggered recovery.
        original: Box<MigrationError>,
        /// Why recovery failed.
        #[source]
        recovery: BoxError,
    },

    /// The ledger does not report the expected version after a batch.
    #[error("Version mismatch: expected {expected}, database reports {actual}")]
    VersionMismatch {
        /// Version the engine expected.
        expected: u32,
        /// Version read back from the ledger.
        actual: u32,
    },

    /// Another migrate or rollback operation is running.
    #[error("A migration operation is already in progress")]
    AlreadyInProgress,

    /// The engine refuses work after an unrecovered double failure.
    #[error("Migration engine halted after unrecovered failure of version {version}; manual recovery required")]
    Halted {
        /// Version whose failure halted the engine.
        version: u32,
    },

    /// Rollback target is not below the current version.
    #[error("Nothing to roll back: target {target} is not below current version {current}")]
    NothingToRollback {
        /// Requested target.
        target: u32,
        /// Current version.
        current: u32,
    },

    /// An applied version has no registered definition to revert it.
    #[error("No migration definition registered for version {0}")]
    MissingDefinition(u32),

    /// A `down` procedure failed during an explicit rollback.
    #[error("Reverting migration {version} failed: {source}")]
    RevertFailed {
        /// Version whose `down` failed.
        version: u32,
        /// Underlying cause.
        #[source]
        source: BoxError,
    },

    /// Storage gateway error outside of a migration body.
    #[error(transparent)]
    Gateway(#[from] GatewayError),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl MigrationError {
    /// Create an invalid definition error.
    pub fn invalid_definition(version: u32, reason: impl Into<String>) -> Self {
        Self::InvalidDefinition {
            version,
            reason: reason.into(),
        }
    }

    /// Create a validation failure without an underlying cause.
    pub fn validation(version: u32, reason: impl Into<String>) -> Self {
        Self::ValidationFailed {
            version,
            reason: reason.into(),
            source: None,
        }
    }

    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Version this error refers to, if any.
    pub fn version(&self) -> Option<u32> {
        match self {
            Self::InvalidDefinition { version, .. }
            | Self::DependencyNotSatisfied { version, .. }
            | Self::MigrationExecutionFailed { version, .. }
            | Self::ValidationFailed { version, .. }
            | Self::DoubleFailure { version, .. }
            | Self::Halted { version }
            | Self::RevertFailed { version, .. } => Some(*version),
            Self::MissingDefinition(version) => Some(*version),
            _ => None,
        }
    }

    /// Whether the engine recovers from this error with rollback coordination.
    pub fn triggers_rollback(&self) -> bool {
        matches!(
            self,
            Self::MigrationExecutionFailed { .. } | Self::ValidationFailed { .. }
        )
    }

    /// Whether this error requires operator intervention.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::DoubleFailure { .. } | Self::VersionMismatch { .. } | Self::Halted { .. }
        )
    }

    /// Whether retrying the same call later may succeed without code changes.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::BackupCreationFailed(_) | Self::AlreadyInProgress => true,
            Self::Gateway(e) => e.is_busy(),
            _ => false,
        }
    }
}
