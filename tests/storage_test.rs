//! Integration tests for SQLite storage layer
//!
//! Tests strategy statistics persistence and the session archive using
//! in-memory and on-disk SQLite databases.

use std::sync::Arc;

use async_trait::async_trait;
use tempfile::TempDir;

use mcp_document_remediation::backend::{
    AutomationBackend, Detector, FixApplication, FixRequest, UndoResult,
};
use mcp_document_remediation::config::DatabaseConfig;
use mcp_document_remediation::error::BackendResult;
use mcp_document_remediation::remediation::{
    Collaborators, FixId, RemediationConfig, RemediationStorage, SessionCoordinator,
    SessionOutcome, SessionOverrides, SessionStatus, Severity, StrategyStat, StrategyStats,
    StrategyStore, Violation,
};
use mcp_document_remediation::storage::SqliteStorage;

struct CleanDetector;

#[async_trait]
impl Detector for CleanDetector {
    async fn detect(&self, _document_ref: &str) -> BackendResult<Vec<Violation>> {
        Ok(Vec::new())
    }
}

/// Rejects fixes for the violation IDs it was built with.
struct RejectSome(Vec<&'static str>);

#[async_trait]
impl AutomationBackend for RejectSome {
    async fn apply_fix(&self, request: &FixRequest) -> BackendResult<FixApplication> {
        if self.0.contains(&request.violation.id.as_str()) {
            Ok(FixApplication::rejected("object is on a locked layer"))
        } else {
            Ok(FixApplication::applied(40))
        }
    }

    async fn undo_fix(&self, _document_ref: &str, _fix_id: &FixId) -> BackendResult<UndoResult> {
        Ok(UndoResult { success: true })
    }
}

/// Create an in-memory storage instance for testing
async fn create_test_storage() -> RemediationStorage {
    let db = SqliteStorage::new_in_memory()
        .await
        .expect("Failed to create in-memory storage");
    RemediationStorage::new(db)
}

fn disk_config(dir: &TempDir) -> DatabaseConfig {
    DatabaseConfig {
        path: dir.path().join("nested").join("remediation.db"),
        max_connections: 2,
    }
}

fn archiving_coordinator(storage: &RemediationStorage, rejects: Vec<&'static str>) -> SessionCoordinator {
    let mut config = RemediationConfig::default();
    config.executor.max_retries = 0;
    SessionCoordinator::new(
        config,
        Collaborators::new(Arc::new(CleanDetector), Arc::new(RejectSome(rejects))),
        StrategyStats::new(Arc::new(storage.clone())),
    )
    .with_archive(Arc::new(storage.clone()))
}

fn violation(id: &str, violation_type: &str, location: &str) -> Violation {
    Violation::new(id, violation_type, Severity::Major, location, "")
}

#[cfg(test)]
mod strategy_tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_fix_type_loads_none() {
        let storage = create_test_storage().await;
        assert!(storage.load("logo_reposition").await.unwrap().is_none());
        assert!(!storage.delete("logo_reposition").await.unwrap());
    }

    #[tokio::test]
    async fn test_stats_survive_reopen() {
        let dir = TempDir::new().unwrap();
        let config = disk_config(&dir);

        {
            let storage = RemediationStorage::new(SqliteStorage::new(&config).await.unwrap());
            let stats = StrategyStats::new(Arc::new(storage));
            stats
                .update("margin_adjustment", |stat| {
                    stat.sample_count = 7;
                    stat.success_rate = 0.64;
                    stat.avg_duration_ms = 1850.0;
                })
                .await
                .unwrap();
        }

        let reopened = RemediationStorage::new(SqliteStorage::new(&config).await.unwrap());
        let stat = reopened.load("margin_adjustment").await.unwrap().unwrap();
        assert_eq!(stat.sample_count, 7);
        assert!((stat.success_rate - 0.64).abs() < 1e-9);
        assert!((stat.avg_duration_ms - 1850.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_unknown_fix_type_reads_defaults_through_stats() {
        let storage = create_test_storage().await;
        let stats = StrategyStats::new(Arc::new(storage));

        let stat = stats.get("text_reflow").await.unwrap();
        assert_eq!(stat, StrategyStat {
            last_updated_at: stat.last_updated_at,
            ..StrategyStat::new("text_reflow")
        });
        assert!(stats.all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reset_removes_history() {
        let storage = create_test_storage().await;
        let stats = StrategyStats::new(Arc::new(storage.clone()));
        stats
            .update("color_correction", |stat| stat.sample_count = 3)
            .await
            .unwrap();

        assert!(stats.reset("color_correction").await.unwrap());
        assert!(storage.load("color_correction").await.unwrap().is_none());
    }
}

#[cfg(test)]
mod archive_tests {
    use super::*;

    #[tokio::test]
    async fn test_finished_session_is_archived() {
        let storage = create_test_storage().await;
        let coordinator = archiving_coordinator(&storage, vec!["m1"]);

        let violations = vec![
            violation("c1", "forbidden_color", "page:1"),
            violation("m1", "incorrect_margins", "page:2"),
        ];
        let id = coordinator
            .start_session("annual-report.indd", Some(violations), &SessionOverrides::default())
            .await
            .unwrap();
        coordinator.await_session(&id).await.unwrap();

        let summaries = storage.recent_sessions(10).await.unwrap();
        assert_eq!(summaries.len(), 1);
        let summary = &summaries[0];
        assert_eq!(summary.session_id, id.0);
        assert_eq!(summary.document_ref, "annual-report.indd");
        assert_eq!(summary.status, SessionStatus::Completed);
        assert_eq!(summary.outcome, SessionOutcome::PartiallySucceeded);
        assert_eq!(summary.violations_before, 2);
        assert_eq!(summary.fixes_succeeded, 1);
        assert_eq!(summary.fixes_failed, 1);
        assert_eq!(summary.fixes_skipped, 0);
        assert!(summary.finished_at.is_some());
    }

    #[tokio::test]
    async fn test_learning_reaches_storage() {
        let storage = create_test_storage().await;
        let coordinator = archiving_coordinator(&storage, vec![]);

        let id = coordinator
            .start_session(
                "flyer.indd",
                Some(vec![violation("c1", "forbidden_color", "page:1")]),
                &SessionOverrides::default(),
            )
            .await
            .unwrap();
        coordinator.await_session(&id).await.unwrap();

        let stat = storage.load("color_correction").await.unwrap().unwrap();
        assert_eq!(stat.sample_count, 1);
    }

    #[tokio::test]
    async fn test_recent_sessions_newest_first_with_limit() {
        let storage = create_test_storage().await;
        let coordinator = archiving_coordinator(&storage, vec![]);

        let mut ids = Vec::new();
        for doc in ["a.indd", "b.indd", "c.indd"] {
            let id = coordinator
                .start_session(doc, Some(Vec::new()), &SessionOverrides::default())
                .await
                .unwrap();
            coordinator.await_session(&id).await.unwrap();
            ids.push(id);
            // Distinct start timestamps
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }

        let summaries = storage.recent_sessions(2).await.unwrap();
        let docs: Vec<&str> = summaries.iter().map(|s| s.document_ref.as_str()).collect();
        assert_eq!(docs, vec!["c.indd", "b.indd"]);
        assert_eq!(summaries[0].improvement_percent, Some(100.0));
    }
}
