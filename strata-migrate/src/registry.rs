//! Ordered registry of migration definitions.

use std::collections::BTreeMap;

use crate::definition::MigrationDefinition;
use crate::error::{MigrateResult, MigrationError};

/// Migration definitions keyed by version.
///
/// Built once by the host process and handed to the engine. Registration
/// order does not matter; execution order is always ascending by version.
#[derive(Debug, Clone, Default)]
pub struct MigrationRegistry {
    definitions: BTreeMap<u32, MigrationDefinition>,
}

impl MigrationRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a definition. Each version may be registered once.
    pub fn register(&mut self, definition: MigrationDefinition) -> MigrateResult<()> {
        let version = definition.version();
        if self.definitions.contains_key(&version) {
            return Err(MigrationError::invalid_definition(
                version,
                "version is already registered",
            ));
        }

        self.definitions.insert(version, definition);
        Ok(())
    }

    /// Register a definition, builder style.
    pub fn with(mut self, definition: MigrationDefinition) -> MigrateResult<Self> {
        self.register(definition)?;
        Ok(self)
    }

    /// Look up a definition.
    pub fn get(&self, version: u32) -> Option<&MigrationDefinition> {
        self.definitions.get(&version)
    }

    /// Highest registered version, or 0 when empty.
    pub fn latest_version(&self) -> u32 {
        self.definitions.keys().next_back().copied().unwrap_or(0)
    }

    /// All registered versions, ascending.
    pub fn versions(&self) -> impl Iterator<Item = u32> + '_ {
        self.definitions.keys().copied()
    }

    /// Number of registered definitions.
    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    /// Whether nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    /// Registered versions in `(current, target]`, ascending.
    ///
    /// Versions without a definition are absent; use [`Self::first_gap`] to
    /// detect an unreachable target.
    pub fn pending_versions(&self, current: u32, target: u32) -> Vec<u32> {
        if current >= target {
            return Vec::new();
        }
        self.definitions
            .range(current + 1..=target)
            .map(|(version, _)| *version)
            .collect()
    }

    /// First version in `(current, target]` with no definition.
    pub fn first_gap(&self, current: u32, target: u32) -> Option<u32> {
        (current.saturating_add(1)..=target).find(|v| !self.definitions.contains_key(v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn def(version: u32) -> MigrationDefinition {
        MigrationDefinition::builder(version, format!("migration {}", version))
            .up_sql("SELECT 1")
            .down_sql("SELECT 1")
            .build()
            .unwrap()
    }

    #[test]
    fn test_register_out_of_order() {
        let mut registry = MigrationRegistry::new();
        registry.register(def(3)).unwrap();
        registry.register(def(1)).unwrap();
        registry.register(def(2)).unwrap();

        assert_eq!(registry.versions().collect::<Vec<_>>(), vec![1, 2, 3]);
        assert_eq!(registry.latest_version(), 3);
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn test_register_duplicate() {
        let mut registry = MigrationRegistry::new();
        registry.register(def(1)).unwrap();

        let err = registry.register(def(1)).unwrap_err();
        assert!(matches!(err, MigrationError::InvalidDefinition { version: 1, .. }));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_pending_versions() {
        let registry = MigrationRegistry::new()
            .with(def(1))
            .and_then(|r| r.with(def(2)))
            .and_then(|r| r.with(def(4)))
            .unwrap();

        assert_eq!(registry.pending_versions(0, 4), vec![1, 2, 4]);
        assert_eq!(registry.pending_versions(1, 2), vec![2]);
        assert_eq!(registry.pending_versions(2, 3), Vec::<u32>::new());
        assert_eq!(registry.pending_versions(4, 4), Vec::<u32>::new());
        assert_eq!(registry.pending_versions(5, 1), Vec::<u32>::new());
    }

    #[test]
    fn test_first_gap() {
        let registry = MigrationRegistry::new()
            .with(def(1))
            .and_then(|r| r.with(def(3)))
            .unwrap();

        assert_eq!(registry.first_gap(0, 3), Some(2));
        assert_eq!(registry.first_gap(2, 3), None);
        assert_eq!(registry.first_gap(0, 1), None);
        assert_eq!(registry.first_gap(3, 5), Some(4));
    }

    #[test]
    fn test_empty_registry() {
        let registry = MigrationRegistry::new();
        assert!(registry.is_empty());
        assert_eq!(registry.latest_version(), 0);
        assert!(registry.get(1).is_none());
    }
}
