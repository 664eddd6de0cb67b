//! Migration definitions.
//!
//! A definition pairs a version number with the procedures that move the
//! schema forward (`up`) and back (`down`), the versions it depends on, and an
//! optional post-commit validation.

use std::collections::BTreeSet;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use crate::error::{BoxError, MigrateResult, MigrationError};
use crate::gateway::StorageGateway;

/// Result of running a migration procedure.
pub type ProcedureResult = Result<(), BoxError>;

/// Boxed async procedure over a gateway handle.
pub type ProcedureFn =
    Arc<dyn Fn(Arc<dyn StorageGateway>) -> BoxFuture<'static, ProcedureResult> + Send + Sync>;

/// A schema change with an explicit inverse.
#[async_trait::async_trait]
pub trait Migration: Send + Sync {
    /// Apply the change.
    async fn up(&self, db: Arc<dyn StorageGateway>) -> ProcedureResult;

    /// Revert the change.
    async fn down(&self, db: Arc<dyn StorageGateway>) -> ProcedureResult;

    /// Assert domain invariants after the change has been committed.
    async fn validate(&self, _db: Arc<dyn StorageGateway>) -> ProcedureResult {
        Ok(())
    }

    /// Whether [`Migration::validate`] does anything.
    fn has_validation(&self) -> bool {
        false
    }
}

/// One step of a migration: an SQL script or custom async code.
#[derive(Clone)]
pub enum Procedure {
    /// Script executed with [`StorageGateway::execute_batch`].
    Sql(String),
    /// Arbitrary async code.
    Custom(ProcedureFn),
}

impl Procedure {
    /// Create a procedure from an SQL script.
    pub fn sql(script: impl Into<String>) -> Self {
        Self::Sql(script.into())
    }

    /// Create a procedure from an async closure.
    ///
    /// ```rust,ignore
    /// let backfill = Procedure::new(|db| async move {
    ///     db.execute("UPDATE items SET sku = upper(sku)", &[]).await?;
    ///     Ok(())
    /// });
    /// ```
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(Arc<dyn StorageGateway>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ProcedureResult> + Send + 'static,
    {
        Self::Custom(Arc::new(move |db| f(db).boxed()))
    }

    /// Run the procedure against a gateway.
    pub async fn run(&self, db: Arc<dyn StorageGateway>) -> ProcedureResult {
        match self {
            Self::Sql(script) => {
                db.execute_batch(script).await?;
                Ok(())
            }
            Self::Custom(f) => f(db).await,
        }
    }
}

impl fmt::Debug for Procedure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sql(script) => f.debug_tuple("Sql").field(script).finish(),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// A [`Migration`] assembled from [`Procedure`]s.
#[derive(Debug, Clone)]
pub struct ScriptedMigration {
    up: Procedure,
    down: Procedure,
    validate: Option<Procedure>,
}

impl ScriptedMigration {
    /// Create a migration from forward and backward procedures.
    pub fn new(up: Procedure, down: Procedure) -> Self {
        Self {
            up,
            down,
            validate: None,
        }
    }

    /// Attach a validation procedure.
    pub fn with_validation(mut self, validate: Procedure) -> Self {
        self.validate = Some(validate);
        self
    }
}

#[async_trait::async_trait]
impl Migration for ScriptedMigration {
    async fn up(&self, db: Arc<dyn StorageGateway>) -> ProcedureResult {
        self.up.run(db).await
    }

    async fn down(&self, db: Arc<dyn StorageGateway>) -> ProcedureResult {
        self.down.run(db).await
    }

    async fn validate(&self, db: Arc<dyn StorageGateway>) -> ProcedureResult {
        match &self.validate {
            Some(procedure) => procedure.run(db).await,
            None => Ok(()),
        }
    }

    fn has_validation(&self) -> bool {
        self.validate.is_some()
    }
}

/// A registered, immutable migration.
#[derive(Clone)]
pub struct MigrationDefinition {
    version: u32,
    description: String,
    dependencies: BTreeSet<u32>,
    created_at: DateTime<Utc>,
    migration: Arc<dyn Migration>,
}

impl MigrationDefinition {
    /// Start building a definition from procedures.
    pub fn builder(version: u32, description: impl Into<String>) -> MigrationBuilder {
        MigrationBuilder::new(version, description)
    }

    /// Wrap a hand-written [`Migration`] implementation.
    pub fn from_migration(
        version: u32,
        description: impl Into<String>,
        dependencies: impl IntoIterator<Item = u32>,
        migration: impl Migration + 'static,
    ) -> MigrateResult<Self> {
        let dependencies: BTreeSet<u32> = dependencies.into_iter().collect();
        check_shape(version, &dependencies)?;

        Ok(Self {
            version,
            description: description.into(),
            dependencies,
            created_at: Utc::now(),
            migration: Arc::new(migration),
        })
    }

    /// Target version.
    pub fn version(&self) -> u32 {
        self.version
    }

    /// Human description.
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Versions that must be applied first.
    pub fn dependencies(&self) -> &BTreeSet<u32> {
        &self.dependencies
    }

    /// When the definition was registered.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// The migration body.
    pub fn migration(&self) -> &Arc<dyn Migration> {
        &self.migration
    }

    /// Dependencies absent from `applied`.
    pub fn missing_dependencies(&self, applied: &BTreeSet<u32>) -> Vec<u32> {
        self.dependencies
            .iter()
            .filter(|dep| !applied.contains(dep))
            .copied()
            .collect()
    }

    /// Serializable summary of this definition.
    pub fn summary(&self) -> DefinitionSummary {
        DefinitionSummary {
            version: self.version,
            description: self.description.clone(),
            dependencies: self.dependencies.iter().copied().collect(),
            created_at: self.created_at,
            has_validation: self.migration.has_validation(),
        }
    }
}

impl fmt::Debug for MigrationDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MigrationDefinition")
            .field("version", &self.version)
            .field("description", &self.description)
            .field("dependencies", &self.dependencies)
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

/// Serializable view of a [`MigrationDefinition`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefinitionSummary {
    /// Target version.
    pub version: u32,
    /// Human description.
    pub description: String,
    /// Prerequisite versions.
    pub dependencies: Vec<u32>,
    /// Registration time.
    pub created_at: DateTime<Utc>,
    /// Whether a custom validation is attached.
    pub has_validation: bool,
}

/// Builder for [`MigrationDefinition`].
#[derive(Debug)]
pub struct MigrationBuilder {
    version: u32,
    description: String,
    up: Option<Procedure>,
    down: Option<Procedure>,
    validate: Option<Procedure>,
    dependencies: BTreeSet<u32>,
}

impl MigrationBuilder {
    fn new(version: u32, description: impl Into<String>) -> Self {
        Self {
            version,
            description: description.into(),
            up: None,
            down: None,
            validate: None,
            dependencies: BTreeSet::new(),
        }
    }

    /// Set the forward procedure.
    pub fn up(mut self, procedure: Procedure) -> Self {
        self.up = Some(procedure);
        self
    }

    /// Set the forward procedure as an SQL script.
    pub fn up_sql(self, script: impl Into<String>) -> Self {
        self.up(Procedure::sql(script))
    }

    /// Set the backward procedure.
    pub fn down(mut self, procedure: Procedure) -> Self {
        self.down = Some(procedure);
        self
    }

    /// Set the backward procedure as an SQL script.
    pub fn down_sql(self, script: impl Into<String>) -> Self {
        self.down(Procedure::sql(script))
    }

    /// Add prerequisite versions.
    pub fn depends_on(mut self, versions: impl IntoIterator<Item = u32>) -> Self {
        self.dependencies.extend(versions);
        self
    }

    /// Set a post-commit validation procedure.
    pub fn validate(mut self, procedure: Procedure) -> Self {
        self.validate = Some(procedure);
        self
    }

    /// Finish the definition.
    pub fn build(self) -> MigrateResult<MigrationDefinition> {
        check_shape(self.version, &self.dependencies)?;

        let up = self
            .up
            .ok_or_else(|| MigrationError::invalid_definition(self.version, "missing up procedure"))?;
        let down = self.down.ok_or_else(|| {
            MigrationError::invalid_definition(self.version, "missing down procedure")
        })?;

        let mut migration = ScriptedMigration::new(up, down);
        if let Some(validate) = self.validate {
            migration = migration.with_validation(validate);
        }

        Ok(MigrationDefinition {
            version: self.version,
            description: self.description,
            dependencies: self.dependencies,
            created_at: Utc::now(),
            migration: Arc::new(migration),
        })
    }
}

fn check_shape(version: u32, dependencies: &BTreeSet<u32>) -> MigrateResult<()> {
    if version == 0 {
        return Err(MigrationError::invalid_definition(
            version,
            "version must be greater than zero",
        ));
    }

    if let Some(dep) = dependencies.iter().find(|dep| **dep >= version) {
        return Err(MigrationError::invalid_definition(
            version,
            format!("dependency {} is not lower than the migration version", dep),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop;

    #[async_trait::async_trait]
    impl Migration for Noop {
        async fn up(&self, _db: Arc<dyn StorageGateway>) -> ProcedureResult {
            Ok(())
        }

        async fn down(&self, _db: Arc<dyn StorageGateway>) -> ProcedureResult {
            Ok(())
        }
    }

    #[test]
    fn test_builder_requires_up() {
        let err = MigrationDefinition::builder(1, "create items")
            .down_sql("DROP TABLE items")
            .build()
            .unwrap_err();
        assert!(matches!(err, MigrationError::InvalidDefinition { version: 1, .. }));
        assert!(err.to_string().contains("up"));
    }

    #[test]
    fn test_builder_requires_down() {
        let err = MigrationDefinition::builder(1, "create items")
            .up_sql("CREATE TABLE items (id INTEGER PRIMARY KEY)")
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("down"));
    }

    #[test]
    fn test_builder_rejects_version_zero() {
        let err = MigrationDefinition::builder(0, "bootstrap")
            .up_sql("SELECT 1")
            .down_sql("SELECT 1")
            .build()
            .unwrap_err();
        assert!(matches!(err, MigrationError::InvalidDefinition { version: 0, .. }));
    }

    #[test]
    fn test_builder_rejects_forward_dependency() {
        let err = MigrationDefinition::builder(2, "add column")
            .up_sql("SELECT 1")
            .down_sql("SELECT 1")
            .depends_on([2])
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("dependency 2"));
    }

    #[test]
    fn test_builder_success() {
        let def = MigrationDefinition::builder(3, "add invoices")
            .up_sql("CREATE TABLE invoices (id INTEGER PRIMARY KEY)")
            .down_sql("DROP TABLE invoices")
            .depends_on([1, 2])
            .validate(Procedure::sql("SELECT 1"))
            .build()
            .unwrap();

        assert_eq!(def.version(), 3);
        assert_eq!(def.description(), "add invoices");
        assert_eq!(def.dependencies().len(), 2);
        assert!(def.migration().has_validation());

        let summary = def.summary();
        assert_eq!(summary.dependencies, vec![1, 2]);
        assert!(summary.has_validation);
    }

    #[test]
    fn test_missing_dependencies() {
        let def = MigrationDefinition::from_migration(5, "noop", [1, 3, 4], Noop).unwrap();
        let applied: BTreeSet<u32> = [1, 2, 3].into_iter().collect();
        assert_eq!(def.missing_dependencies(&applied), vec![4]);
        assert!(!def.migration().has_validation());
    }

    #[test]
    fn test_procedure_debug() {
        assert_eq!(format!("{:?}", Procedure::sql("SELECT 1")), "Sql(\"SELECT 1\")");
        let custom = Procedure::new(|_db| async { Ok(()) });
        assert_eq!(format!("{:?}", custom), "Custom(..)");
    }
}
