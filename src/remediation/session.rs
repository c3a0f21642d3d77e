//! Session coordination.
//!
//! The [`SessionCoordinator`] owns the per-document lease and runs one
//! remediation session per lease on a background task:
//!
//! ```text
//! start_session ─lease─→ [worker permit] → Diagnose → Plan → (approval) → Execute → Verify → Learn
//!       │                                                                    │
//!       └─ SessionAlreadyRunning                          cancel / deadline ─┘→ rollback policy
//! ```
//!
//! Sessions on different documents run concurrently up to the worker pool
//! size. Within a session everything is sequential.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{watch, Mutex, RwLock, Semaphore};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::config::{RemediationConfig, SessionOverrides};
use super::diagnosis::{DiagnosisEngine, DiagnosisReport};
use super::executor::{AbortReason, ExecutionContext, ExecutionEngine, RecordJournal};
use super::knowledge::{CauseTable, FixCatalog};
use super::learner::{LearningEngine, LearningOutcome};
use super::planner::{PlanningEngine, PlanningError};
use super::strategy_store::StrategyStats;
use super::types::{
    ExecutionRecord, ExecutionStatus, FixId, FixPlan, Phase, PhaseTimestamp, SessionId,
    SessionStatus, Violation,
};
use super::verifier::{VerificationEngine, VerificationReport};
use crate::backend::{ApprovalGate, AutomationBackend, Detector, StaticApproval};
use crate::error::{StorageError, StorageResult};

// ============================================================================
// Errors
// ============================================================================

/// Errors surfaced by the remediation API.
#[derive(Debug, Error)]
pub enum RemediationError {
    /// Another session holds the document lease
    #[error("Session {session_id} is already running for document {document_ref}")]
    SessionAlreadyRunning {
        /// The leased document
        document_ref: String,
        /// The session holding the lease
        session_id: SessionId,
    },

    /// No session with this ID is known
    #[error("Session not found: {session_id}")]
    SessionNotFound {
        /// The requested session
        session_id: SessionId,
    },

    /// Planning failed
    #[error("Planning failed: {0}")]
    Planning(#[from] PlanningError),

    /// The session exceeded its time budget
    #[error("Session timed out after {timeout_secs}s")]
    SessionTimeout {
        /// Configured budget
        timeout_secs: u64,
    },

    /// The initial detector run failed
    #[error("Detection failed: {message}")]
    Detection {
        /// Underlying failure
        message: String,
    },

    /// Strategy statistics could not be read or written
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

// ============================================================================
// Session Record
// ============================================================================

/// How a finished session turned out, derived from status and records.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionOutcome {
    /// Still running
    InProgress,
    /// Completed with every scheduled fix applied
    FullySucceeded,
    /// Completed with some fixes failed or skipped
    PartiallySucceeded,
    /// Stopped by rollback, cancellation, or approval denial
    Aborted,
    /// Stopped by a fatal error
    Failed,
}

impl SessionOutcome {
    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionOutcome::InProgress => "in_progress",
            SessionOutcome::FullySucceeded => "fully_succeeded",
            SessionOutcome::PartiallySucceeded => "partially_succeeded",
            SessionOutcome::Aborted => "aborted",
            SessionOutcome::Failed => "failed",
        }
    }
}

impl std::fmt::Display for SessionOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for SessionOutcome {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "in_progress" => Ok(SessionOutcome::InProgress),
            "fully_succeeded" => Ok(SessionOutcome::FullySucceeded),
            "partially_succeeded" => Ok(SessionOutcome::PartiallySucceeded),
            "aborted" => Ok(SessionOutcome::Aborted),
            "failed" => Ok(SessionOutcome::Failed),
            _ => Err(format!("Unknown session outcome: {}", s)),
        }
    }
}

/// State of one remediation session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RemediationSession {
    /// Session identifier
    pub session_id: SessionId,
    /// Document under remediation
    pub document_ref: String,
    /// Lifecycle status
    pub status: SessionStatus,
    /// Phase in progress, None before the first and after the last
    pub current_phase: Option<Phase>,
    /// Start and end of each phase entered
    pub phase_timestamps: Vec<PhaseTimestamp>,
    /// Violations in the pre-execution snapshot
    pub violation_count: usize,
    /// Diagnosis phase result
    pub diagnosis: Option<DiagnosisReport>,
    /// Planning phase result
    pub plan: Option<FixPlan>,
    /// Execution records in plan order
    pub records: Vec<ExecutionRecord>,
    /// Fixes undone by rollback, in undo order
    pub rolled_back: Vec<FixId>,
    /// Fixes whose undo failed
    pub undo_failures: Vec<FixId>,
    /// Verification phase result
    pub report: Option<VerificationReport>,
    /// Learning phase result
    pub learning: Option<LearningOutcome>,
    /// Why the session failed or was aborted
    pub failure_reason: Option<String>,
    /// When the session was started
    pub started_at: DateTime<Utc>,
    /// When the session reached a terminal status
    pub finished_at: Option<DateTime<Utc>>,
}

impl RemediationSession {
    fn new(session_id: SessionId, document_ref: &str) -> Self {
        Self {
            session_id,
            document_ref: document_ref.to_string(),
            status: SessionStatus::Running,
            current_phase: None,
            phase_timestamps: Vec::new(),
            violation_count: 0,
            diagnosis: None,
            plan: None,
            records: Vec::new(),
            rolled_back: Vec::new(),
            undo_failures: Vec::new(),
            report: None,
            learning: None,
            failure_reason: None,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    /// Classify the session for callers.
    pub fn outcome(&self) -> SessionOutcome {
        match self.status {
            SessionStatus::Running => SessionOutcome::InProgress,
            SessionStatus::Failed => SessionOutcome::Failed,
            SessionStatus::Aborted => SessionOutcome::Aborted,
            SessionStatus::Completed => {
                let all_applied = self
                    .records
                    .iter()
                    .all(|r| r.status == ExecutionStatus::Success);
                if all_applied {
                    SessionOutcome::FullySucceeded
                } else {
                    SessionOutcome::PartiallySucceeded
                }
            }
        }
    }

    /// Time the phase was entered, if it was.
    pub fn phase_started_at(&self, phase: Phase) -> Option<DateTime<Utc>> {
        self.phase_timestamps
            .iter()
            .find(|p| p.phase == phase)
            .map(|p| p.started_at)
    }
}

/// Acknowledgement returned by `cancel_session`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CancelAck {
    /// The session
    pub session_id: SessionId,
    /// False when the session had already finished
    pub accepted: bool,
    /// Status at the time of the request
    pub status: SessionStatus,
}

/// Persists finished sessions.
#[async_trait]
pub trait SessionArchive: Send + Sync {
    /// Store a finished session.
    async fn archive(&self, session: &RemediationSession) -> StorageResult<()>;
}

// ============================================================================
// Collaborators
// ============================================================================

/// External services a coordinator talks to.
#[derive(Clone)]
pub struct Collaborators {
    /// Violation detector
    pub detector: Arc<dyn Detector>,
    /// Fix automation backend
    pub backend: Arc<dyn AutomationBackend>,
    /// Plan approval gate
    pub approval: Arc<dyn ApprovalGate>,
}

impl Collaborators {
    /// Collaborators that approve every plan.
    pub fn new(detector: Arc<dyn Detector>, backend: Arc<dyn AutomationBackend>) -> Self {
        Self {
            detector,
            backend,
            approval: Arc::new(StaticApproval::allow_all()),
        }
    }

    /// Replace the approval gate.
    pub fn with_approval(mut self, approval: Arc<dyn ApprovalGate>) -> Self {
        self.approval = approval;
        self
    }
}

// ============================================================================
// Registry
// ============================================================================

struct SessionSlot {
    document_ref: String,
    session: RwLock<RemediationSession>,
    cancel: CancellationToken,
    journal: RecordJournal,
    done: watch::Sender<bool>,
}

type LeaseMap = Arc<StdMutex<HashMap<String, SessionId>>>;

/// Releases a document lease when dropped.
struct LeaseGuard {
    leases: LeaseMap,
    document_ref: String,
}

impl Drop for LeaseGuard {
    fn drop(&mut self) {
        let mut leases = self.leases.lock().unwrap_or_else(|e| e.into_inner());
        leases.remove(&self.document_ref);
    }
}

#[derive(Default)]
struct Registry {
    leases: LeaseMap,
    sessions: RwLock<HashMap<SessionId, Arc<SessionSlot>>>,
    finished: Mutex<VecDeque<SessionId>>,
}

impl Registry {
    fn acquire_lease(&self, document_ref: &str, session_id: &SessionId) -> Result<LeaseGuard, RemediationError> {
        let mut leases = self.leases.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(holder) = leases.get(document_ref) {
            return Err(RemediationError::SessionAlreadyRunning {
                document_ref: document_ref.to_string(),
                session_id: holder.clone(),
            });
        }
        leases.insert(document_ref.to_string(), session_id.clone());
        Ok(LeaseGuard {
            leases: self.leases.clone(),
            document_ref: document_ref.to_string(),
        })
    }

    async fn slot(&self, session_id: &SessionId) -> Result<Arc<SessionSlot>, RemediationError> {
        self.sessions
            .read()
            .await
            .get(session_id)
            .cloned()
            .ok_or_else(|| RemediationError::SessionNotFound {
                session_id: session_id.clone(),
            })
    }
}

type Halt = (SessionStatus, Option<String>);

// ============================================================================
// Coordinator
// ============================================================================

/// Runs remediation sessions and answers status queries.
#[derive(Clone)]
pub struct SessionCoordinator {
    config: Arc<RemediationConfig>,
    catalog: Arc<FixCatalog>,
    causes: Arc<CauseTable>,
    collaborators: Collaborators,
    stats: StrategyStats,
    archive: Option<Arc<dyn SessionArchive>>,
    registry: Arc<Registry>,
    workers: Arc<Semaphore>,
}

impl SessionCoordinator {
    /// Create a coordinator with the built-in fix catalog.
    pub fn new(config: RemediationConfig, collaborators: Collaborators, stats: StrategyStats) -> Self {
        let causes = CauseTable::load(config.diagnosis.knowledge_path.as_deref());
        let workers = Arc::new(Semaphore::new(config.session.max_concurrent_sessions.max(1)));
        Self {
            config: Arc::new(config),
            catalog: Arc::new(FixCatalog::builtin()),
            causes: Arc::new(causes),
            collaborators,
            stats,
            archive: None,
            registry: Arc::new(Registry::default()),
            workers,
        }
    }

    /// Persist finished sessions to an archive.
    pub fn with_archive(mut self, archive: Arc<dyn SessionArchive>) -> Self {
        self.archive = Some(archive);
        self
    }

    /// Replace the fix catalog.
    pub fn with_catalog(mut self, catalog: FixCatalog) -> Self {
        self.catalog = Arc::new(catalog);
        self
    }

    /// Replace the cause table.
    pub fn with_causes(mut self, causes: CauseTable) -> Self {
        self.causes = Arc::new(causes);
        self
    }

    /// Shared strategy statistics.
    pub fn strategy_stats(&self) -> &StrategyStats {
        &self.stats
    }

    /// Start a session for a document.
    ///
    /// With `violations` set, that list is the pre-execution snapshot;
    /// otherwise the detector is asked for one. Returns as soon as the
    /// session is registered.
    pub async fn start_session(
        &self,
        document_ref: &str,
        violations: Option<Vec<Violation>>,
        overrides: &SessionOverrides,
    ) -> Result<SessionId, RemediationError> {
        let session_id = SessionId::new();
        let lease = self.registry.acquire_lease(document_ref, &session_id)?;

        let config = self.config.with_overrides(overrides);
        let deadline = Instant::now() + config.session.session_timeout();
        let (done, _) = watch::channel(false);
        let slot = Arc::new(SessionSlot {
            document_ref: document_ref.to_string(),
            session: RwLock::new(RemediationSession::new(session_id.clone(), document_ref)),
            cancel: CancellationToken::new(),
            journal: RecordJournal::new(),
            done,
        });

        self.registry
            .sessions
            .write()
            .await
            .insert(session_id.clone(), slot.clone());

        info!(
            session_id = %session_id,
            document = %document_ref,
            provided_violations = violations.as_ref().map(Vec::len),
            "Remediation session started"
        );

        let coordinator = self.clone();
        tokio::spawn(async move {
            coordinator
                .run(slot, violations, config, deadline, lease)
                .await;
        });

        Ok(session_id)
    }

    /// Current state of a session.
    pub async fn get_session_status(
        &self,
        session_id: &SessionId,
    ) -> Result<RemediationSession, RemediationError> {
        let slot = self.registry.slot(session_id).await?;
        let mut session = slot.session.read().await.clone();
        if session.status == SessionStatus::Running {
            session.records = slot.journal.snapshot().await;
        }
        Ok(session)
    }

    /// Request cancellation. Takes effect before the next fix starts.
    pub async fn cancel_session(&self, session_id: &SessionId) -> Result<CancelAck, RemediationError> {
        let slot = self.registry.slot(session_id).await?;
        let status = slot.session.read().await.status;
        let accepted = !status.is_terminal();
        if accepted {
            slot.cancel.cancel();
            info!(session_id = %session_id, "Cancellation requested");
        }
        Ok(CancelAck {
            session_id: session_id.clone(),
            accepted,
            status,
        })
    }

    /// Wait until a session reaches a terminal status and return it.
    pub async fn await_session(
        &self,
        session_id: &SessionId,
    ) -> Result<RemediationSession, RemediationError> {
        let slot = self.registry.slot(session_id).await?;
        let mut done = slot.done.subscribe();
        // The sender lives in the slot, so the channel cannot close while we hold it
        let _ = done.wait_for(|finished| *finished).await;
        let session = slot.session.read().await.clone();
        Ok(session)
    }

    /// Sessions currently known, newest first.
    pub async fn list_sessions(&self) -> Vec<RemediationSession> {
        let slots: Vec<Arc<SessionSlot>> =
            self.registry.sessions.read().await.values().cloned().collect();
        let mut sessions = Vec::with_capacity(slots.len());
        for slot in slots {
            sessions.push(slot.session.read().await.clone());
        }
        sessions.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        sessions
    }

    // ------------------------------------------------------------------------
    // Session task
    // ------------------------------------------------------------------------

    async fn run(
        self,
        slot: Arc<SessionSlot>,
        violations: Option<Vec<Violation>>,
        config: RemediationConfig,
        deadline: Instant,
        lease: LeaseGuard,
    ) {
        // The semaphore is never closed
        let _permit = self.workers.clone().acquire_owned().await.ok();

        let (status, reason) = self.run_phases(&slot, violations, &config, deadline).await;
        self.finish(&slot, status, reason, lease).await;
    }

    async fn run_phases(
        &self,
        slot: &SessionSlot,
        provided: Option<Vec<Violation>>,
        config: &RemediationConfig,
        deadline: Instant,
    ) -> Halt {
        if let Some(halt) = self.checkpoint(slot, config, deadline) {
            return halt;
        }

        // Diagnose
        self.enter_phase(slot, Phase::Diagnose).await;
        let violations = match provided {
            Some(v) => v,
            None => match self.detect_snapshot(&slot.document_ref, config, deadline).await {
                Ok(v) => v,
                Err(e) => {
                    error!(document = %slot.document_ref, error = %e, "Initial detection failed");
                    return (SessionStatus::Failed, Some(e.to_string()));
                }
            },
        };
        let diagnosis = DiagnosisEngine::with_causes(config.diagnosis.clone(), (*self.causes).clone())
            .diagnose(&violations);
        {
            let mut session = slot.session.write().await;
            session.violation_count = violations.len();
            session.diagnosis = Some(diagnosis);
        }

        // Plan
        if let Some(halt) = self.checkpoint(slot, config, deadline) {
            return halt;
        }
        self.enter_phase(slot, Phase::Plan).await;
        let fix_types: Vec<String> = violations
            .iter()
            .map(|v| self.catalog.meta_for(&v.violation_type).fix_type)
            .collect();
        let stats = match self.stats.snapshot(fix_types.iter().map(String::as_str)).await {
            Ok(stats) => stats,
            Err(e) => return (SessionStatus::Failed, Some(RemediationError::from(e).to_string())),
        };
        let plan = match PlanningEngine::new(config, self.catalog.clone()).plan(&violations, &stats) {
            Ok(plan) => plan,
            Err(e) => {
                error!(document = %slot.document_ref, error = %e, "Planning failed");
                return (SessionStatus::Failed, Some(RemediationError::from(e).to_string()));
            }
        };
        slot.session.write().await.plan = Some(plan.clone());

        if config.session.require_approval && plan.scheduled().next().is_some() {
            let session_id = slot.session.read().await.session_id.clone();
            let approved = self
                .collaborators
                .approval
                .approve(&session_id, &slot.document_ref, &plan)
                .await;
            if !approved {
                warn!(session_id = %session_id, "Plan not approved");
                return (SessionStatus::Aborted, Some("Plan was not approved".to_string()));
            }
        }

        // Execute
        if let Some(halt) = self.checkpoint(slot, config, deadline) {
            return halt;
        }
        self.enter_phase(slot, Phase::Execute).await;
        let ctx = ExecutionContext {
            document_ref: slot.document_ref.clone(),
            cancel: slot.cancel.clone(),
            deadline: Some(deadline),
            journal: slot.journal.clone(),
        };
        let outcome = ExecutionEngine::new(
            config.executor.clone(),
            self.catalog.clone(),
            self.collaborators.backend.clone(),
        )
        .execute(&plan, &violations, &ctx)
        .await;
        {
            let mut session = slot.session.write().await;
            session.records = outcome.records.clone();
            session.rolled_back = outcome.rolled_back.clone();
            session.undo_failures = outcome.undo_failures.clone();
        }

        let halted = match &outcome.abort {
            Some(AbortReason::SessionTimeout) => Some(self.timeout_halt(config)),
            Some(reason) => Some((SessionStatus::Aborted, Some(reason.to_string()))),
            None => self.checkpoint(slot, config, deadline),
        };

        // Verify
        let report = if halted.is_none() {
            self.enter_phase(slot, Phase::Verify).await;
            let remaining = deadline.saturating_duration_since(Instant::now());
            let report = VerificationEngine::new(
                self.collaborators.detector.clone(),
                config.executor.call_timeout(),
            )
            .verify(&slot.document_ref, &violations, Some(remaining))
            .await;
            slot.session.write().await.report = Some(report.clone());
            Some(report)
        } else {
            None
        };
        let halted = halted.or_else(|| self.checkpoint(slot, config, deadline));

        // Learn
        self.enter_phase(slot, Phase::Learn).await;
        let learner = LearningEngine::new(config.learner.clone(), self.catalog.clone(), self.stats.clone());
        match learner.learn(&outcome.records, report.as_ref()).await {
            Ok(learning) => slot.session.write().await.learning = Some(learning),
            Err(e) => warn!(document = %slot.document_ref, error = %e, "Failed to persist strategy statistics"),
        }

        halted.unwrap_or((SessionStatus::Completed, None))
    }

    /// Stop between phases on cancellation or an expired deadline.
    fn checkpoint(&self, slot: &SessionSlot, config: &RemediationConfig, deadline: Instant) -> Option<Halt> {
        if slot.cancel.is_cancelled() {
            return Some((SessionStatus::Aborted, Some(AbortReason::Cancelled.to_string())));
        }
        if Instant::now() >= deadline {
            return Some(self.timeout_halt(config));
        }
        None
    }

    fn timeout_halt(&self, config: &RemediationConfig) -> Halt {
        let err = RemediationError::SessionTimeout {
            timeout_secs: config.session.session_timeout_secs,
        };
        (SessionStatus::Failed, Some(err.to_string()))
    }

    async fn detect_snapshot(
        &self,
        document_ref: &str,
        config: &RemediationConfig,
        deadline: Instant,
    ) -> Result<Vec<Violation>, RemediationError> {
        let timeout = deadline
            .saturating_duration_since(Instant::now())
            .min(config.executor.call_timeout());
        VerificationEngine::new(self.collaborators.detector.clone(), timeout)
            .redetect(document_ref, None)
            .await
            .map_err(|e| RemediationError::Detection {
                message: e.to_string(),
            })
    }

    async fn enter_phase(&self, slot: &SessionSlot, phase: Phase) {
        let now = Utc::now();
        let mut session = slot.session.write().await;
        if let Some(last) = session.phase_timestamps.last_mut() {
            last.completed_at.get_or_insert(now);
        }
        session.phase_timestamps.push(PhaseTimestamp {
            phase,
            started_at: now,
            completed_at: None,
        });
        session.current_phase = Some(phase);
        info!(session_id = %session.session_id, phase = %phase, "Entering phase");
    }

    async fn finish(
        &self,
        slot: &SessionSlot,
        status: SessionStatus,
        reason: Option<String>,
        lease: LeaseGuard,
    ) {
        let snapshot = {
            let mut session = slot.session.write().await;
            let now = Utc::now();
            if let Some(last) = session.phase_timestamps.last_mut() {
                last.completed_at.get_or_insert(now);
            }
            session.status = status;
            session.failure_reason = reason;
            session.current_phase = None;
            session.finished_at = Some(now);
            session.clone()
        };

        info!(
            session_id = %snapshot.session_id,
            document = %snapshot.document_ref,
            status = %snapshot.status,
            outcome = ?snapshot.outcome(),
            reason = ?snapshot.failure_reason,
            "Remediation session finished"
        );

        if let Some(archive) = &self.archive {
            if let Err(e) = archive.archive(&snapshot).await {
                warn!(session_id = %snapshot.session_id, error = %e, "Failed to archive session");
            }
        }

        drop(lease);
        slot.done.send_replace(true);
        self.evict_history(snapshot.session_id).await;
    }

    async fn evict_history(&self, finished_id: SessionId) {
        let mut finished = self.registry.finished.lock().await;
        finished.push_back(finished_id);
        while finished.len() > self.config.session.history_limit {
            if let Some(oldest) = finished.pop_front() {
                self.registry.sessions.write().await.remove(&oldest);
            }
        }
    }
}

impl std::fmt::Debug for SessionCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionCoordinator")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{FixApplication, FixRequest, UndoResult};
    use crate::error::BackendResult;
    use crate::remediation::types::Severity;

    struct StaticDetector(Vec<Violation>);

    #[async_trait]
    impl Detector for StaticDetector {
        async fn detect(&self, _document_ref: &str) -> BackendResult<Vec<Violation>> {
            Ok(self.0.clone())
        }
    }

    struct AlwaysApply;

    #[async_trait]
    impl AutomationBackend for AlwaysApply {
        async fn apply_fix(&self, _request: &FixRequest) -> BackendResult<FixApplication> {
            Ok(FixApplication::applied(1))
        }

        async fn undo_fix(&self, _document_ref: &str, _fix_id: &FixId) -> BackendResult<UndoResult> {
            Ok(UndoResult { success: true })
        }
    }

    fn coordinator(remaining: Vec<Violation>) -> SessionCoordinator {
        SessionCoordinator::new(
            RemediationConfig::default(),
            Collaborators::new(Arc::new(StaticDetector(remaining)), Arc::new(AlwaysApply)),
            StrategyStats::in_memory(),
        )
    }

    fn color(id: &str, page: u32) -> Violation {
        Violation::new(id, "forbidden_color", Severity::Critical, format!("page:{}", page), "")
    }

    #[tokio::test]
    async fn test_session_runs_all_phases() {
        let coordinator = coordinator(vec![]);
        let id = coordinator
            .start_session("doc-1", Some(vec![color("a", 1), color("b", 2)]), &SessionOverrides::default())
            .await
            .unwrap();

        let session = coordinator.await_session(&id).await.unwrap();
        assert_eq!(session.status, SessionStatus::Completed);
        assert_eq!(session.outcome(), SessionOutcome::FullySucceeded);
        assert_eq!(session.records.len(), 2);
        assert_eq!(session.report.as_ref().unwrap().fixed_count, Some(2));
        assert!(session.learning.is_some());

        let phases: Vec<Phase> = session.phase_timestamps.iter().map(|p| p.phase).collect();
        assert_eq!(
            phases,
            vec![Phase::Diagnose, Phase::Plan, Phase::Execute, Phase::Verify, Phase::Learn]
        );
        assert!(session.phase_timestamps.iter().all(|p| p.completed_at.is_some()));
        assert!(session.current_phase.is_none());
    }

    #[tokio::test]
    async fn test_detector_supplies_snapshot_when_none_given() {
        let coordinator = coordinator(vec![color("a", 1)]);
        let id = coordinator
            .start_session("doc-1", None, &SessionOverrides::default())
            .await
            .unwrap();

        let session = coordinator.await_session(&id).await.unwrap();
        assert_eq!(session.violation_count, 1);
        // The detector keeps reporting the same violation after the fix
        assert_eq!(session.report.unwrap().fixed_count, Some(0));
    }

    #[tokio::test]
    async fn test_lease_released_after_completion() {
        let coordinator = coordinator(vec![]);
        let first = coordinator
            .start_session("doc-1", Some(vec![]), &SessionOverrides::default())
            .await
            .unwrap();
        coordinator.await_session(&first).await.unwrap();

        let second = coordinator
            .start_session("doc-1", Some(vec![]), &SessionOverrides::default())
            .await;
        assert!(second.is_ok());
    }

    #[tokio::test]
    async fn test_unknown_session() {
        let coordinator = coordinator(vec![]);
        let err = coordinator
            .get_session_status(&SessionId("rem_missing".to_string()))
            .await
            .unwrap_err();
        assert!(matches!(err, RemediationError::SessionNotFound { .. }));
    }

    #[tokio::test]
    async fn test_approval_denial_aborts_before_execution() {
        let coordinator = SessionCoordinator::new(
            RemediationConfig::default(),
            Collaborators::new(Arc::new(StaticDetector(vec![])), Arc::new(AlwaysApply))
                .with_approval(Arc::new(StaticApproval::deny_all())),
            StrategyStats::in_memory(),
        );
        let overrides = SessionOverrides {
            require_approval: Some(true),
            ..Default::default()
        };

        let id = coordinator
            .start_session("doc-1", Some(vec![color("a", 1)]), &overrides)
            .await
            .unwrap();
        let session = coordinator.await_session(&id).await.unwrap();

        assert_eq!(session.status, SessionStatus::Aborted);
        assert!(session.records.is_empty());
        assert!(session.plan.is_some());
        assert_eq!(session.failure_reason.as_deref(), Some("Plan was not approved"));
    }

    #[tokio::test]
    async fn test_history_limit_evicts_oldest() {
        let mut config = RemediationConfig::default();
        config.session.history_limit = 1;
        let coordinator = SessionCoordinator::new(
            config,
            Collaborators::new(Arc::new(StaticDetector(vec![])), Arc::new(AlwaysApply)),
            StrategyStats::in_memory(),
        );

        let first = coordinator
            .start_session("doc-1", Some(vec![]), &SessionOverrides::default())
            .await
            .unwrap();
        coordinator.await_session(&first).await.unwrap();
        let second = coordinator
            .start_session("doc-2", Some(vec![]), &SessionOverrides::default())
            .await
            .unwrap();
        coordinator.await_session(&second).await.unwrap();
        // Eviction runs right after the done signal
        tokio::task::yield_now().await;
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        assert!(coordinator.get_session_status(&first).await.is_err());
        assert!(coordinator.get_session_status(&second).await.is_ok());
    }
}
