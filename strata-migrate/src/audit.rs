//! Advisory audit events.
//!
//! Sinks are never on the critical path: a failing sink is logged and the
//! migration carries on.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{info, warn};

use crate::error::BoxError;

/// Category attached to every engine event.
pub const AUDIT_CATEGORY: &str = "schema_migration";

/// A single audit event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Event name, e.g. `migration_applied`.
    pub name: String,
    /// Event category.
    pub category: String,
    /// Structured payload.
    pub payload: Value,
}

impl AuditEvent {
    /// Create an event in the engine's category.
    pub fn new(name: impl Into<String>, payload: Value) -> Self {
        Self {
            name: name.into(),
            category: AUDIT_CATEGORY.to_string(),
            payload,
        }
    }

    /// A migration was applied and validated.
    pub fn migration_applied(version: u32, description: &str, duration_ms: i64) -> Self {
        Self::new(
            "migration_applied",
            json!({ "version": version, "description": description, "duration_ms": duration_ms }),
        )
    }

    /// A migration failed.
    pub fn migration_failed(version: u32, error: &str) -> Self {
        Self::new(
            "migration_failed",
            json!({ "version": version, "error": error }),
        )
    }

    /// Rollback coordination ran for a failed migration.
    pub fn rollback_performed(version: u32, strategy: &str, succeeded: bool) -> Self {
        Self::new(
            "rollback_performed",
            json!({ "version": version, "strategy": strategy, "succeeded": succeeded }),
        )
    }

    /// An explicit rollback-to-version completed.
    pub fn rolled_back_to_version(from: u32, to: u32, backup: &str) -> Self {
        Self::new(
            "rolled_back_to_version",
            json!({ "from": from, "to": to, "backup": backup }),
        )
    }

    /// An explicit rollback-to-version stopped before reaching its target.
    pub fn rollback_failed(from: u32, to: u32, version: u32, error: &str) -> Self {
        Self::new(
            "rollback_failed",
            json!({ "from": from, "to": to, "version": version, "error": error }),
        )
    }
}

/// Receiver of audit events.
#[async_trait::async_trait]
pub trait AuditSink: Send + Sync {
    /// Record an event.
    async fn log_action(&self, event: AuditEvent) -> Result<(), BoxError>;
}

/// Sink that forwards events to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditSink;

#[async_trait::async_trait]
impl AuditSink for TracingAuditSink {
    async fn log_action(&self, event: AuditEvent) -> Result<(), BoxError> {
        info!(
            event = %event.name,
            category = %event.category,
            payload = %event.payload,
            "audit"
        );
        Ok(())
    }
}

/// Deliver an event to an optional sink, swallowing failures.
pub(crate) async fn emit(sink: Option<&Arc<dyn AuditSink>>, event: AuditEvent) {
    let Some(sink) = sink else {
        return;
    };

    let name = event.name.clone();
    if let Err(e) = sink.log_action(event).await {
        warn!(event = %name, error = %e, "audit sink failed; continuing");
    }
}
