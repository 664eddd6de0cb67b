//! Read-only introspection: history, status and dry runs.
//!
//! Nothing here writes to the database, takes a backup or opens a transaction.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::definition::DefinitionSummary;
use crate::engine::MigrationEngine;
use crate::error::MigrateResult;
use crate::history::VersionRecord;

/// Aggregate migration state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationStatus {
    /// Version the database is at.
    pub current_version: u32,
    /// Version `migrate()` would reach.
    pub target_version: u32,
    /// Registered versions waiting to be applied.
    pub pending: Vec<u32>,
    /// Number of pending migrations.
    pub pending_count: usize,
    /// Number of ledger records.
    pub applied_count: usize,
    /// Whether the database is behind the target.
    pub needs_migration: bool,
    /// Most recently applied record.
    pub last_applied: Option<VersionRecord>,
}

/// A ledger record joined with its definition, when one is still registered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// The ledger record.
    pub record: VersionRecord,
    /// The registered definition, if the code still carries it.
    pub definition: Option<DefinitionSummary>,
}

/// Dry run verdict for one version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DryRunStatus {
    /// Preconditions hold.
    Valid,
    /// Preconditions do not hold; see the reason.
    Invalid,
}

/// Dry run result for one pending version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DryRunEntry {
    /// Pending version.
    pub version: u32,
    /// Definition description.
    pub description: String,
    /// Verdict.
    pub status: DryRunStatus,
    /// Why the version is invalid.
    pub reason: Option<String>,
}

/// Result of a dry run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DryRunReport {
    /// Version the database is at.
    pub current_version: u32,
    /// Version `migrate()` would reach.
    pub target_version: u32,
    /// First version in range with no definition, if any.
    pub missing_version: Option<u32>,
    /// Per-version verdicts, ascending.
    pub entries: Vec<DryRunEntry>,
}

impl DryRunReport {
    /// Whether `migrate()` would pass its preconditions.
    pub fn is_valid(&self) -> bool {
        self.missing_version.is_none()
            && self
                .entries
                .iter()
                .all(|e| e.status == DryRunStatus::Valid)
    }
}

impl MigrationEngine {
    /// All ledger records, most recent first, joined with their definitions.
    pub async fn history(&self) -> MigrateResult<Vec<HistoryEntry>> {
        let records = self
            .with_retry(|| self.tracker.records(self.gateway.as_ref()))
            .await?;

        Ok(records
            .into_iter()
            .map(|record| HistoryEntry {
                definition: self.registry.get(record.version).map(|d| d.summary()),
                record,
            })
            .collect())
    }

    /// Aggregate status.
    pub async fn status(&self) -> MigrateResult<MigrationStatus> {
        let records = self
            .with_retry(|| self.tracker.records(self.gateway.as_ref()))
            .await?;
        let current_version = records.first().map(|r| r.version).unwrap_or(0);
        self.set_cursor(current_version);

        let target_version = self.target_version();
        let pending = self.registry.pending_versions(current_version, target_version);

        Ok(MigrationStatus {
            current_version,
            target_version,
            pending_count: pending.len(),
            pending,
            applied_count: records.len(),
            needs_migration: current_version < target_version,
            last_applied: records.into_iter().next(),
        })
    }

    /// Check dependencies of every pending version without executing anything.
    ///
    /// Earlier versions of the same batch count as applied when checking later
    /// ones, mirroring the order `migrate()` would run them in.
    pub async fn dry_run(&self) -> MigrateResult<DryRunReport> {
        let current_version = self.current_version().await?;
        let target_version = self.target_version();
        let mut applied: BTreeSet<u32> = self
            .with_retry(|| self.tracker.applied_versions(self.gateway.as_ref()))
            .await?;

        let missing_version = if current_version < target_version {
            self.registry.first_gap(current_version, target_version)
        } else {
            None
        };

        let mut entries = Vec::new();
        for version in self.registry.pending_versions(current_version, target_version) {
            let Some(definition) = self.registry.get(version) else {
                continue;
            };

            let missing = definition.missing_dependencies(&applied);
            let entry = if missing.is_empty() {
                applied.insert(version);
                DryRunEntry {
                    version,
                    description: definition.description().to_string(),
                    status: DryRunStatus::Valid,
                    reason: None,
                }
            } else {
                DryRunEntry {
                    version,
                    description: definition.description().to_string(),
                    status: DryRunStatus::Invalid,
                    reason: Some(format!("missing dependencies: {:?}", missing)),
                }
            };
            entries.push(entry);
        }

        Ok(DryRunReport {
            current_version,
            target_version,
            missing_version,
            entries,
        })
    }
}
