//! Engine configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{MigrateResult, MigrationError};

/// Default name of the ledger table.
pub const DEFAULT_LEDGER_TABLE: &str = "schema_migrations";

/// Configuration for the migration engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MigrationConfig {
    /// Table holding applied version records.
    pub ledger_table: String,
    /// Highest version `migrate()` may reach. Defaults to the registry's latest.
    pub target_version: Option<u32>,
    /// How many times a busy gateway call is retried.
    pub busy_retries: u32,
    /// Delay between busy retries, in milliseconds.
    pub busy_retry_delay_ms: u64,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            ledger_table: DEFAULT_LEDGER_TABLE.to_string(),
            target_version: None,
            busy_retries: 3,
            busy_retry_delay_ms: 50,
        }
    }
}

impl MigrationConfig {
    /// Create a new configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the ledger table name.
    pub fn ledger_table(mut self, table: impl Into<String>) -> Self {
        self.ledger_table = table.into();
        self
    }

    /// Cap the version `migrate()` will reach.
    pub fn target_version(mut self, version: u32) -> Self {
        self.target_version = Some(version);
        self
    }

    /// Set the number of busy retries.
    pub fn busy_retries(mut self, retries: u32) -> Self {
        self.busy_retries = retries;
        self
    }

    /// Set the delay between busy retries.
    pub fn busy_retry_delay(mut self, delay: Duration) -> Self {
        self.busy_retry_delay_ms = delay.as_millis() as u64;
        self
    }

    /// Delay between busy retries.
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.busy_retry_delay_ms)
    }

    /// Check the configuration for values the engine cannot use.
    pub fn validate(&self) -> MigrateResult<()> {
        let table = &self.ledger_table;
        let valid = !table.is_empty()
            && table
                .chars()
                .next()
                .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
            && table.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');

        if !valid {
            return Err(MigrationError::config(format!(
                "invalid ledger table name '{}'",
                table
            )));
        }

        if self.target_version == Some(0) {
            return Err(MigrationError::config("target version must be greater than zero"));
        }

        Ok(())
    }

    /// Parse a configuration from TOML.
    pub fn from_toml_str(content: &str) -> MigrateResult<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| MigrationError::config(format!("failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration file. A missing file yields the defaults.
    pub async fn load(path: impl AsRef<Path>) -> MigrateResult<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Ok(Self::default());
        }

        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            MigrationError::config(format!("failed to read {}: {}", path.display(), e))
        })?;

        Self::from_toml_str(&content)
    }
}
