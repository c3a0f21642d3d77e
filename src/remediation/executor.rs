//! Execution phase.
//!
//! Applies scheduled fixes one at a time in plan order:
//!
//! ```text
//! Fix → dependencies succeeded? ──no──→ skipped (DependencyNotSatisfied)
//!            │ yes
//!            ▼
//!      apply_fix ⇄ retry with backoff ──exhausted──→ failed ──rollback?──→ undo successes, abort
//!            │ success
//!            ▼
//!         success
//! ```
//!
//! Cancellation and the session deadline are checked between fixes, never
//! during a backend call.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::config::ExecutorConfig;
use super::knowledge::FixCatalog;
use super::types::{
    ExecutionError, ExecutionRecord, ExecutionStatus, Fix, FixId, FixPlan, Violation,
};
use crate::backend::{AutomationBackend, FixRequest};
use crate::error::BackendError;

// ============================================================================
// Retry Policy
// ============================================================================

/// Bounded exponential backoff with relative jitter.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Delay before the first retry (milliseconds)
    pub base_ms: u64,
    /// Growth factor per retry
    pub factor: f64,
    /// Relative jitter, 0.2 = ±20%
    pub jitter: f64,
}

impl RetryPolicy {
    /// Build the policy from executor configuration.
    pub fn from_config(config: &ExecutorConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_ms: config.backoff_base_ms,
            factor: config.backoff_factor,
            jitter: config.backoff_jitter,
        }
    }

    /// Delay before retry number `retry` (1-based) with jitter sample `unit`
    /// in `[-1, 1]`.
    pub fn delay(&self, retry: u32, unit: f64) -> Duration {
        let exponent = retry.saturating_sub(1) as i32;
        let base = self.base_ms as f64 * self.factor.powi(exponent);
        let scaled = base * (1.0 + self.jitter * unit.clamp(-1.0, 1.0));
        Duration::from_millis(scaled.max(0.0).round() as u64)
    }

    /// Delay before retry number `retry` with a random jitter sample.
    pub fn delay_for<R: Rng>(&self, retry: u32, rng: &mut R) -> Duration {
        self.delay(retry, rng.gen_range(-1.0..=1.0))
    }
}

// ============================================================================
// Execution Context and Outcome
// ============================================================================

/// Shared, append-only view of a session's execution records.
///
/// The executor appends as each fix reaches a terminal state; the session
/// coordinator reads it to report progress.
#[derive(Debug, Clone, Default)]
pub struct RecordJournal {
    records: Arc<RwLock<Vec<ExecutionRecord>>>,
}

impl RecordJournal {
    /// Create an empty journal.
    pub fn new() -> Self {
        Self::default()
    }

    async fn append(&self, record: ExecutionRecord) {
        self.records.write().await.push(record);
    }

    /// Records appended so far.
    pub async fn snapshot(&self) -> Vec<ExecutionRecord> {
        self.records.read().await.clone()
    }
}

/// Per-session inputs to the executor.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    /// Document the plan applies to
    pub document_ref: String,
    /// Cancellation checked between fixes
    pub cancel: CancellationToken,
    /// Session deadline, if any
    pub deadline: Option<Instant>,
    /// Where records are published as they are produced
    pub journal: RecordJournal,
}

impl ExecutionContext {
    /// Context with no deadline and a fresh token and journal.
    pub fn new(document_ref: impl Into<String>) -> Self {
        Self {
            document_ref: document_ref.into(),
            cancel: CancellationToken::new(),
            deadline: None,
            journal: RecordJournal::new(),
        }
    }

    /// Set the session deadline.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    fn deadline_passed(&self) -> bool {
        matches!(self.remaining(), Some(r) if r.is_zero())
    }
}

/// Why execution stopped before the end of the plan.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum AbortReason {
    /// A fix failed with rollback enabled
    FixFailed {
        /// The failing fix
        fix_id: FixId,
    },
    /// The session was cancelled
    Cancelled,
    /// The session deadline passed
    SessionTimeout,
}

impl std::fmt::Display for AbortReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AbortReason::FixFailed { fix_id } => write!(f, "Fix {} failed", fix_id),
            AbortReason::Cancelled => write!(f, "Session cancelled"),
            AbortReason::SessionTimeout => write!(f, "Session timed out"),
        }
    }
}

/// Result of running a plan.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ExecutionOutcome {
    /// Records in plan order
    pub records: Vec<ExecutionRecord>,
    /// Fixes undone during rollback, in undo order
    pub rolled_back: Vec<FixId>,
    /// Fixes whose undo failed or timed out
    pub undo_failures: Vec<FixId>,
    /// Set when execution stopped early
    pub abort: Option<AbortReason>,
}

impl ExecutionOutcome {
    fn count(&self, status: ExecutionStatus) -> usize {
        self.records.iter().filter(|r| r.status == status).count()
    }

    /// Successful fixes.
    pub fn succeeded(&self) -> usize {
        self.count(ExecutionStatus::Success)
    }

    /// Failed fixes.
    pub fn failed(&self) -> usize {
        self.count(ExecutionStatus::Failed)
    }

    /// Skipped fixes.
    pub fn skipped(&self) -> usize {
        self.count(ExecutionStatus::Skipped)
    }
}

enum AttemptFailure {
    Timeout,
    Rejected(String),
}

// ============================================================================
// Execution Engine
// ============================================================================

/// Applies fix plans through the automation backend.
#[derive(Clone)]
pub struct ExecutionEngine {
    config: ExecutorConfig,
    retry: RetryPolicy,
    catalog: Arc<FixCatalog>,
    backend: Arc<dyn AutomationBackend>,
}

impl ExecutionEngine {
    /// Create an execution engine.
    pub fn new(
        config: ExecutorConfig,
        catalog: Arc<FixCatalog>,
        backend: Arc<dyn AutomationBackend>,
    ) -> Self {
        Self {
            retry: RetryPolicy::from_config(&config),
            config,
            catalog,
            backend,
        }
    }

    /// Execute the scheduled fixes of a plan.
    ///
    /// `violations` is the snapshot the plan was built from.
    pub async fn execute(
        &self,
        plan: &FixPlan,
        violations: &[Violation],
        ctx: &ExecutionContext,
    ) -> ExecutionOutcome {
        let by_id: HashMap<&str, &Violation> =
            violations.iter().map(|v| (v.id.as_str(), v)).collect();
        let mut succeeded: HashSet<FixId> = HashSet::new();
        let mut outcome = ExecutionOutcome::default();

        info!(
            document = %ctx.document_ref,
            scheduled = plan.scheduled().count(),
            rollback = self.config.rollback_on_failure,
            "Executing fix plan"
        );

        for fix in plan.scheduled() {
            if ctx.cancel.is_cancelled() {
                info!(document = %ctx.document_ref, "Execution cancelled between fixes");
                outcome.abort = Some(AbortReason::Cancelled);
                break;
            }
            if ctx.deadline_passed() {
                warn!(document = %ctx.document_ref, "Session deadline reached during execution");
                outcome.abort = Some(AbortReason::SessionTimeout);
                break;
            }

            let missing: Vec<FixId> = fix
                .depends_on
                .iter()
                .filter(|dep| !succeeded.contains(*dep))
                .cloned()
                .collect();

            let record = if !missing.is_empty() {
                debug!(fix_id = %fix.id, missing = missing.len(), "Skipping fix with unmet dependencies");
                ExecutionRecord {
                    fix_id: fix.id.clone(),
                    fix_type: fix.fix_type.clone(),
                    status: ExecutionStatus::Skipped,
                    started_at: Utc::now(),
                    elapsed_ms: 0,
                    attempts: 0,
                    error: Some(ExecutionError::DependencyNotSatisfied { missing }),
                }
            } else {
                match by_id.get(fix.violation_id.as_str()) {
                    Some(violation) => self.apply_with_retry(fix, violation, ctx).await,
                    None => {
                        error!(fix_id = %fix.id, violation_id = %fix.violation_id, "Fix references unknown violation");
                        ExecutionRecord {
                            fix_id: fix.id.clone(),
                            fix_type: fix.fix_type.clone(),
                            status: ExecutionStatus::Failed,
                            started_at: Utc::now(),
                            elapsed_ms: 0,
                            attempts: 0,
                            error: Some(ExecutionError::BackendRejected {
                                message: format!("Violation {} not in snapshot", fix.violation_id),
                                attempts: 0,
                            }),
                        }
                    }
                }
            };

            let status = record.status;
            ctx.journal.append(record.clone()).await;
            outcome.records.push(record);

            match status {
                ExecutionStatus::Success => {
                    succeeded.insert(fix.id.clone());
                }
                ExecutionStatus::Failed if ctx.deadline_passed() => {
                    warn!(fix_id = %fix.id, "Session deadline reached while applying fix");
                    outcome.abort = Some(AbortReason::SessionTimeout);
                    break;
                }
                ExecutionStatus::Failed if self.config.rollback_on_failure => {
                    outcome.abort = Some(AbortReason::FixFailed {
                        fix_id: fix.id.clone(),
                    });
                    break;
                }
                _ => {}
            }
        }

        if outcome.abort.is_some() && self.config.rollback_on_failure {
            self.rollback(&mut outcome, ctx).await;
        }

        info!(
            document = %ctx.document_ref,
            succeeded = outcome.succeeded(),
            failed = outcome.failed(),
            skipped = outcome.skipped(),
            rolled_back = outcome.rolled_back.len(),
            aborted = outcome.abort.is_some(),
            "Execution finished"
        );

        outcome
    }

    async fn apply_with_retry(
        &self,
        fix: &Fix,
        violation: &Violation,
        ctx: &ExecutionContext,
    ) -> ExecutionRecord {
        let started_at = Utc::now();
        let start = Instant::now();
        let params = self
            .catalog
            .handler(&fix.fix_type)
            .and_then(|h| h.params_for(violation))
            .unwrap_or_else(|| Value::Object(Default::default()));
        let request = FixRequest {
            document_ref: ctx.document_ref.clone(),
            fix_id: fix.id.clone(),
            fix_type: fix.fix_type.clone(),
            violation: violation.clone(),
            params,
        };

        let mut attempts = 0;
        let mut last_failure = AttemptFailure::Rejected("not attempted".to_string());
        let mut last_timeout = self.config.call_timeout();

        while attempts <= self.retry.max_retries {
            if attempts > 0 {
                let delay = self.retry.delay_for(attempts, &mut rand::thread_rng());
                if matches!(ctx.remaining(), Some(r) if r <= delay) {
                    warn!(fix_id = %fix.id, "No time left in session for another retry");
                    break;
                }
                warn!(
                    fix_id = %fix.id,
                    retry = attempts,
                    delay_ms = delay.as_millis(),
                    "Retrying fix"
                );
                tokio::time::sleep(delay).await;
            }

            let timeout = match ctx.remaining() {
                Some(r) => r.min(self.config.call_timeout()),
                None => self.config.call_timeout(),
            };
            attempts += 1;
            last_timeout = timeout;

            match tokio::time::timeout(timeout, self.backend.apply_fix(&request)).await {
                Ok(Ok(application)) if application.success => {
                    let elapsed_ms = start.elapsed().as_millis() as u64;
                    info!(
                        fix_id = %fix.id,
                        fix_type = %fix.fix_type,
                        attempts,
                        elapsed_ms,
                        "Fix applied"
                    );
                    return ExecutionRecord {
                        fix_id: fix.id.clone(),
                        fix_type: fix.fix_type.clone(),
                        status: ExecutionStatus::Success,
                        started_at,
                        elapsed_ms,
                        attempts,
                        error: None,
                    };
                }
                Ok(Ok(application)) => {
                    last_failure = AttemptFailure::Rejected(
                        application
                            .error
                            .unwrap_or_else(|| "Backend reported failure".to_string()),
                    );
                }
                Ok(Err(BackendError::Timeout { .. })) | Err(_) => {
                    last_failure = AttemptFailure::Timeout;
                }
                Ok(Err(e)) => {
                    last_failure = AttemptFailure::Rejected(e.to_string());
                }
            }

            if ctx.deadline_passed() {
                break;
            }
        }

        let error = match last_failure {
            AttemptFailure::Timeout => ExecutionError::BackendTimeout {
                timeout_ms: last_timeout.as_millis() as u64,
                attempts,
            },
            AttemptFailure::Rejected(message) => ExecutionError::BackendRejected { message, attempts },
        };
        error!(fix_id = %fix.id, fix_type = %fix.fix_type, error = %error, "Fix failed");

        ExecutionRecord {
            fix_id: fix.id.clone(),
            fix_type: fix.fix_type.clone(),
            status: ExecutionStatus::Failed,
            started_at,
            elapsed_ms: start.elapsed().as_millis() as u64,
            attempts,
            error: Some(error),
        }
    }

    /// Undo every successful fix in reverse order.
    async fn rollback(&self, outcome: &mut ExecutionOutcome, ctx: &ExecutionContext) {
        let to_undo: Vec<FixId> = outcome
            .records
            .iter()
            .rev()
            .filter(|r| r.is_success())
            .map(|r| r.fix_id.clone())
            .collect();

        if to_undo.is_empty() {
            return;
        }
        warn!(document = %ctx.document_ref, fixes = to_undo.len(), "Rolling back applied fixes");

        for fix_id in to_undo {
            let result = tokio::time::timeout(
                self.config.call_timeout(),
                self.backend.undo_fix(&ctx.document_ref, &fix_id),
            )
            .await;

            match result {
                Ok(Ok(undo)) if undo.success => {
                    debug!(fix_id = %fix_id, "Fix undone");
                    outcome.rolled_back.push(fix_id);
                }
                Ok(Ok(_)) => {
                    error!(fix_id = %fix_id, "Backend refused to undo fix");
                    outcome.undo_failures.push(fix_id);
                }
                Ok(Err(e)) => {
                    error!(fix_id = %fix_id, error = %e, "Undo failed");
                    outcome.undo_failures.push(fix_id);
                }
                Err(_) => {
                    error!(fix_id = %fix_id, "Undo timed out");
                    outcome.undo_failures.push(fix_id);
                }
            }
        }
    }
}

impl std::fmt::Debug for ExecutionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionEngine")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
