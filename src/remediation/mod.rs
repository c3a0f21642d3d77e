//! Closed-loop document remediation.
//!
//! A session takes one document through five phases:
//!
//! ```text
//!                ┌────────────────────────────────────────────┐
//!                │              Strategy Store                │
//!                └───▲──────────────────────────────────┬─────┘
//!                    │ learn                            │ stats
//! Violations → Diagnose → Plan ──(approval)──→ Execute → Verify → Learn
//!                          │                      │         │
//!                    Fix catalog           Automation    Detector
//!                                           Backend
//! ```
//!
//! - [`diagnosis`] groups violations and flags systemic issues
//! - [`planner`] turns violations into an ordered, risk-adjusted [`FixPlan`]
//! - [`executor`] applies the plan with retries, timeouts, and rollback
//! - [`verifier`] re-detects and measures improvement
//! - [`learner`] folds outcomes into per-fix-type [`StrategyStat`]s
//! - [`session`] coordinates the phases, one session per document
//!
//! # Example
//!
//! ```ignore
//! let coordinator = SessionCoordinator::new(
//!     RemediationConfig::from_env(),
//!     Collaborators::new(detector, backend),
//!     StrategyStats::in_memory(),
//! );
//! let id = coordinator.start_session("doc-42", None, &SessionOverrides::default()).await?;
//! let session = coordinator.await_session(&id).await?;
//! println!("{}", session.outcome());
//! ```

pub mod cli;
pub mod config;
pub mod diagnosis;
pub mod executor;
pub mod knowledge;
pub mod learner;
pub mod planner;
pub mod session;
pub mod storage;
pub mod strategy_store;
pub mod types;
pub mod verifier;

pub use config::{
    DiagnosisConfig, ExecutorConfig, LearnerConfig, PlannerConfig, RemediationConfig,
    SessionConfig, SessionOverrides,
};
pub use diagnosis::{DiagnosisEngine, DiagnosisReport, SystemicIssue};
pub use executor::{AbortReason, ExecutionContext, ExecutionEngine, ExecutionOutcome, RetryPolicy};
pub use knowledge::{CauseEntry, CauseTable, FixCatalog, FixHandler, FixTypeMeta};
pub use learner::{LearningEngine, LearningOutcome, PatternRecommendation};
pub use planner::{PlanningEngine, PlanningError};
pub use session::{
    CancelAck, Collaborators, RemediationError, RemediationSession, SessionArchive,
    SessionCoordinator, SessionOutcome,
};
pub use storage::{RemediationStorage, SessionSummary};
pub use strategy_store::{InMemoryStrategyStore, StrategyStats, StrategyStore};
pub use types::{
    ExecutionError, ExecutionRecord, ExecutionStatus, Fix, FixId, FixPlan, Location, Phase,
    PhaseTimestamp, RiskLevel, SessionId, SessionStatus, Severity, StrategyStat, Violation,
};
pub use verifier::{ImprovementBand, VerificationEngine, VerificationError, VerificationReport};
