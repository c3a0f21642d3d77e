//! SQLite-backed strategy statistics and session archive.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::session::{RemediationSession, SessionArchive, SessionOutcome};
use super::strategy_store::StrategyStore;
use super::types::{ExecutionStatus, SessionStatus, StrategyStat};
use crate::error::{StorageError, StorageResult};
use crate::storage::SqliteStorage;

/// Compact record of a finished session, as listed by `recent_sessions`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionSummary {
    /// Session identifier
    pub session_id: String,
    /// Document remediated
    pub document_ref: String,
    /// Terminal status
    pub status: SessionStatus,
    /// Derived outcome
    pub outcome: SessionOutcome,
    /// Violations in the pre-execution snapshot
    pub violations_before: usize,
    /// Fixes applied
    pub fixes_succeeded: usize,
    /// Fixes that failed
    pub fixes_failed: usize,
    /// Fixes skipped
    pub fixes_skipped: usize,
    /// Verified improvement, when known
    pub improvement_percent: Option<f64>,
    /// Why the session failed or was aborted
    pub failure_reason: Option<String>,
    /// When the session started
    pub started_at: DateTime<Utc>,
    /// When the session finished
    pub finished_at: Option<DateTime<Utc>>,
}

/// Remediation tables on top of [`SqliteStorage`].
#[derive(Clone)]
pub struct RemediationStorage {
    db: SqliteStorage,
}

impl RemediationStorage {
    /// Wrap an open database.
    pub fn new(db: SqliteStorage) -> Self {
        Self { db }
    }

    /// Store the summary and full JSON of a finished session.
    pub async fn save_session_summary(&self, session: &RemediationSession) -> StorageResult<()> {
        let detail = serde_json::to_string(session).map_err(|e| StorageError::Serialization {
            message: format!("Failed to serialize session {}: {}", session.session_id, e),
        })?;
        let count = |status: ExecutionStatus| {
            session.records.iter().filter(|r| r.status == status).count() as i64
        };

        sqlx::query(
            r#"
            INSERT OR REPLACE INTO remediation_sessions
                (id, document_ref, status, outcome, violations_before,
                 fixes_succeeded, fixes_failed, fixes_skipped, improvement_percent,
                 failure_reason, started_at, finished_at, detail)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&session.session_id.0)
        .bind(&session.document_ref)
        .bind(session.status.as_str())
        .bind(session.outcome().as_str())
        .bind(session.violation_count as i64)
        .bind(count(ExecutionStatus::Success))
        .bind(count(ExecutionStatus::Failed))
        .bind(count(ExecutionStatus::Skipped))
        .bind(session.report.as_ref().and_then(|r| r.improvement_percent))
        .bind(&session.failure_reason)
        .bind(session.started_at.to_rfc3339())
        .bind(session.finished_at.map(|t| t.to_rfc3339()))
        .bind(detail)
        .execute(self.db.pool())
        .await?;

        debug!(session_id = %session.session_id, "Session summary saved");
        Ok(())
    }

    /// Most recently started sessions, newest first.
    pub async fn recent_sessions(&self, limit: u32) -> StorageResult<Vec<SessionSummary>> {
        let rows: Vec<SessionRow> = sqlx::query_as(
            r#"
            SELECT id, document_ref, status, outcome, violations_before,
                   fixes_succeeded, fixes_failed, fixes_skipped, improvement_percent,
                   failure_reason, started_at, finished_at
            FROM remediation_sessions
            ORDER BY started_at DESC
            LIMIT ?
            "#,
        )
        .bind(limit as i64)
        .fetch_all(self.db.pool())
        .await?;

        rows.into_iter().map(SessionSummary::try_from).collect()
    }
}

#[async_trait]
impl StrategyStore for RemediationStorage {
    async fn load(&self, fix_type: &str) -> StorageResult<Option<StrategyStat>> {
        let row: Option<StrategyRow> = sqlx::query_as(
            r#"
            SELECT fix_type, sample_count, success_rate, avg_duration_ms, confidence, last_updated_at
            FROM strategy_stats
            WHERE fix_type = ?
            "#,
        )
        .bind(fix_type)
        .fetch_optional(self.db.pool())
        .await?;

        Ok(row.map(|r| r.into()))
    }

    async fn save(&self, stat: &StrategyStat) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO strategy_stats
                (fix_type, sample_count, success_rate, avg_duration_ms, confidence, last_updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(fix_type) DO UPDATE SET
                sample_count = excluded.sample_count,
                success_rate = excluded.success_rate,
                avg_duration_ms = excluded.avg_duration_ms,
                confidence = excluded.confidence,
                last_updated_at = excluded.last_updated_at
            "#,
        )
        .bind(&stat.fix_type)
        .bind(stat.sample_count as i64)
        .bind(stat.success_rate)
        .bind(stat.avg_duration_ms)
        .bind(stat.confidence)
        .bind(stat.last_updated_at.to_rfc3339())
        .execute(self.db.pool())
        .await?;

        Ok(())
    }

    async fn load_all(&self) -> StorageResult<Vec<StrategyStat>> {
        let rows: Vec<StrategyRow> = sqlx::query_as(
            r#"
            SELECT fix_type, sample_count, success_rate, avg_duration_ms, confidence, last_updated_at
            FROM strategy_stats
            ORDER BY fix_type
            "#,
        )
        .fetch_all(self.db.pool())
        .await?;

        Ok(rows.into_iter().map(|r| r.into()).collect())
    }

    async fn delete(&self, fix_type: &str) -> StorageResult<bool> {
        let result = sqlx::query("DELETE FROM strategy_stats WHERE fix_type = ?")
            .bind(fix_type)
            .execute(self.db.pool())
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl SessionArchive for RemediationStorage {
    async fn archive(&self, session: &RemediationSession) -> StorageResult<()> {
        self.save_session_summary(session).await
    }
}

// Internal row types for SQLx mapping

fn parse_timestamp(value: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

#[derive(sqlx::FromRow)]
struct StrategyRow {
    fix_type: String,
    sample_count: i64,
    success_rate: f64,
    avg_duration_ms: f64,
    confidence: f64,
    last_updated_at: String,
}

impl From<StrategyRow> for StrategyStat {
    fn from(row: StrategyRow) -> Self {
        Self {
            fix_type: row.fix_type,
            sample_count: row.sample_count.max(0) as u64,
            success_rate: row.success_rate,
            avg_duration_ms: row.avg_duration_ms,
            confidence: row.confidence,
            last_updated_at: parse_timestamp(&row.last_updated_at),
        }
    }
}

#[derive(sqlx::FromRow)]
struct SessionRow {
    id: String,
    document_ref: String,
    status: String,
    outcome: String,
    violations_before: i64,
    fixes_succeeded: i64,
    fixes_failed: i64,
    fixes_skipped: i64,
    improvement_percent: Option<f64>,
    failure_reason: Option<String>,
    started_at: String,
    finished_at: Option<String>,
}

impl TryFrom<SessionRow> for SessionSummary {
    type Error = StorageError;

    fn try_from(row: SessionRow) -> Result<Self, Self::Error> {
        let status = row
            .status
            .parse()
            .map_err(|message| StorageError::Serialization { message })?;
        let outcome = row
            .outcome
            .parse()
            .map_err(|message| StorageError::Serialization { message })?;

        Ok(Self {
            session_id: row.id,
            document_ref: row.document_ref,
            status,
            outcome,
            violations_before: row.violations_before.max(0) as usize,
            fixes_succeeded: row.fixes_succeeded.max(0) as usize,
            fixes_failed: row.fixes_failed.max(0) as usize,
            fixes_skipped: row.fixes_skipped.max(0) as usize,
            improvement_percent: row.improvement_percent,
            failure_reason: row.failure_reason,
            started_at: parse_timestamp(&row.started_at),
            finished_at: row.finished_at.as_deref().map(parse_timestamp),
        })
    }
}
