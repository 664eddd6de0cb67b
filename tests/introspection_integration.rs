//! Integration tests for status, history, dry runs and audit events.

#![cfg(feature = "sqlite")]

mod common;

use std::sync::Arc;

use pretty_assertions::assert_eq;
use strata::{
    AuditSink, DryRunStatus, MigrationConfig, MigrationDefinition, MigrationEngine, TracingAuditSink,
};

use common::*;

#[tokio::test]
async fn test_dry_run_reports_valid_without_writing() {
    let dir = tempfile::tempdir().unwrap();
    let db = sqlite(dir.path()).await;

    let engine = MigrationEngine::new(
        MigrationConfig::new(),
        registry([create_t(), add_column_c(), create_u()]),
        db.clone(),
    )
    .unwrap();

    let report = engine.dry_run().await.unwrap();
    assert!(report.is_valid());
    assert_eq!(report.current_version, 0);
    assert_eq!(report.target_version, 3);
    assert_eq!(report.missing_version, None);

    let versions: Vec<u32> = report.entries.iter().map(|e| e.version).collect();
    assert_eq!(versions, vec![1, 2, 3]);
    assert!(report.entries.iter().all(|e| e.status == DryRunStatus::Valid));

    assert!(user_tables(db.as_ref()).await.is_empty());
    assert!(db.backups().is_empty());
}

#[tokio::test]
async fn test_dry_run_flags_missing_dependency_and_gap() {
    let dir = tempfile::tempdir().unwrap();
    let db = sqlite(dir.path()).await;

    let engine = MigrationEngine::new(MigrationConfig::new(), registry([create_t()]), db.clone()).unwrap();
    engine.migrate().await.unwrap();
    engine.tracker().remove_version(db.as_ref(), 1).await.unwrap();
    engine
        .tracker()
        .record_version(db.as_ref(), 2, "recorded out of band")
        .await
        .unwrap();

    let needs_one = MigrationDefinition::builder(3, "needs one")
        .up_sql("CREATE TABLE w (id INTEGER)")
        .down_sql("DROP TABLE IF EXISTS w")
        .depends_on([1])
        .build()
        .unwrap();
    let engine = MigrationEngine::new(
        MigrationConfig::new(),
        registry([create_t(), add_column_c(), needs_one]),
        db.clone(),
    )
    .unwrap();

    let report = engine.dry_run().await.unwrap();
    assert!(!report.is_valid());
    assert_eq!(report.entries.len(), 1);
    assert_eq!(report.entries[0].status, DryRunStatus::Invalid);
    assert!(report.entries[0].reason.as_deref().unwrap().contains("[1]"));

    let gapped = MigrationEngine::new(
        MigrationConfig::new().target_version(5),
        registry([create_t(), add_column_c(), create_u()]),
        db.clone(),
    )
    .unwrap();
    assert_eq!(gapped.dry_run().await.unwrap().missing_version, Some(4));
}

#[tokio::test]
async fn test_status_reports_pending_work() {
    let dir = tempfile::tempdir().unwrap();
    let db = sqlite(dir.path()).await;

    let capped = MigrationEngine::new(
        MigrationConfig::new().target_version(1),
        registry([create_t(), add_column_c(), create_u()]),
        db.clone(),
    )
    .unwrap();
    capped.migrate().await.unwrap();

    let engine = MigrationEngine::new(
        MigrationConfig::new(),
        registry([create_t(), add_column_c(), create_u()]),
        db.clone(),
    )
    .unwrap();
    let status = engine.status().await.unwrap();

    assert_eq!(status.current_version, 1);
    assert_eq!(status.target_version, 3);
    assert_eq!(status.pending, vec![2, 3]);
    assert_eq!(status.pending_count, 2);
    assert_eq!(status.applied_count, 1);
    assert!(status.needs_migration);
    assert_eq!(status.last_applied.unwrap().description, "create t");

    engine.migrate().await.unwrap();
    let status = engine.status().await.unwrap();
    assert!(!status.needs_migration);
    assert!(status.pending.is_empty());
}

#[tokio::test]
async fn test_status_on_fresh_database() {
    let dir = tempfile::tempdir().unwrap();
    let db = sqlite(dir.path()).await;

    let engine = MigrationEngine::new(MigrationConfig::new(), registry([]), db.clone()).unwrap();
    let status = engine.status().await.unwrap();

    assert_eq!(status.current_version, 0);
    assert_eq!(status.target_version, 0);
    assert!(!status.needs_migration);
    assert!(status.last_applied.is_none());
    assert!(engine.history().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_history_tolerates_missing_definitions() {
    let dir = tempfile::tempdir().unwrap();
    let db = sqlite(dir.path()).await;

    MigrationEngine::new(
        MigrationConfig::new(),
        registry([create_t(), add_column_c()]),
        db.clone(),
    )
    .unwrap()
    .migrate()
    .await
    .unwrap();

    let engine = MigrationEngine::new(MigrationConfig::new(), registry([create_t()]), db.clone()).unwrap();
    let history = engine.history().await.unwrap();

    assert_eq!(history.len(), 2);
    assert_eq!(history[0].record.version, 2);
    assert!(history[0].definition.is_none());

    let known = history[1].definition.as_ref().unwrap();
    assert_eq!(known.version, 1);
    assert_eq!(known.description, "create t");
    assert!(!known.has_validation);
}

#[tokio::test]
async fn test_audit_events_follow_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let db = sqlite(dir.path()).await;
    let sink = Arc::new(RecordingSink::default());

    let engine = MigrationEngine::new(
        MigrationConfig::new(),
        registry([create_t(), add_column_c(), broken(3)]),
        db.clone(),
    )
    .unwrap()
    .with_audit_sink(sink.clone());

    engine.migrate().await.unwrap_err();
    assert_eq!(
        sink.names(),
        vec![
            "migration_applied",
            "migration_applied",
            "migration_failed",
            "rollback_performed"
        ]
    );

    let events = sink.events();
    assert!(events.iter().all(|e| e.category == "schema_migration"));
    assert_eq!(events[3].payload["strategy"], "restore_backup");
    assert_eq!(events[3].payload["succeeded"], true);
}

#[tokio::test]
async fn test_audit_event_for_explicit_rollback() {
    let dir = tempfile::tempdir().unwrap();
    let db = sqlite(dir.path()).await;
    let sink = Arc::new(RecordingSink::default());

    let engine = MigrationEngine::new(
        MigrationConfig::new(),
        registry([create_t(), add_column_c()]),
        db.clone(),
    )
    .unwrap()
    .with_audit_sink(sink.clone());

    engine.migrate().await.unwrap();
    let report = engine.rollback_to_version(1).await.unwrap();

    let last = sink.events().pop().unwrap();
    assert_eq!(last.name, "rolled_back_to_version");
    assert_eq!(last.payload["from"], 2);
    assert_eq!(last.payload["to"], 1);
    assert_eq!(last.payload["backup"], report.backup.name.as_str());
}

#[tokio::test]
async fn test_tracing_audit_sink_accepts_events() {
    let dir = tempfile::tempdir().unwrap();
    let db = sqlite(dir.path()).await;
    let sink: Arc<dyn AuditSink> = Arc::new(TracingAuditSink);

    let engine = MigrationEngine::new(MigrationConfig::new(), registry([create_t()]), db.clone())
        .unwrap()
        .with_audit_sink(sink);

    assert_eq!(engine.migrate().await.unwrap().applied_count(), 1);
}
