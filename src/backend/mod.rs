//! External collaborators of the remediation engine.
//!
//! The engine never inspects or edits documents itself. It talks to:
//! - a [`Detector`] that reports violations for a document
//! - an [`AutomationBackend`] that applies and undoes individual fixes
//! - an [`ApprovalGate`] consulted before execution when approval is required
//!
//! HTTP implementations for the document automation bridge live in [`http`].

mod http;

pub use http::{BridgeClient, HttpAutomationBackend, HttpDetector};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::BackendResult;
use crate::remediation::{FixId, FixPlan, SessionId, Violation};

/// A single fix application sent to the automation backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FixRequest {
    /// Document the fix applies to
    pub document_ref: String,
    /// Fix identifier, later used to undo the fix
    pub fix_id: FixId,
    /// Fix type
    pub fix_type: String,
    /// The violation being fixed
    pub violation: Violation,
    /// Handler parameters
    pub params: Value,
}

/// Backend response to a fix application.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FixApplication {
    /// Whether the fix was applied
    pub success: bool,
    /// Time the backend spent applying the fix
    #[serde(default)]
    pub duration_ms: u64,
    /// Backend-reported reason on failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl FixApplication {
    /// A successful application.
    pub fn applied(duration_ms: u64) -> Self {
        Self {
            success: true,
            duration_ms,
            error: None,
        }
    }

    /// A rejected application.
    pub fn rejected(error: impl Into<String>) -> Self {
        Self {
            success: false,
            duration_ms: 0,
            error: Some(error.into()),
        }
    }
}

/// Backend response to an undo request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UndoResult {
    /// Whether the fix was reverted
    pub success: bool,
}

/// Reports the violations present in a document. Must be idempotent.
#[async_trait]
pub trait Detector: Send + Sync {
    /// Detect violations in a document.
    async fn detect(&self, document_ref: &str) -> BackendResult<Vec<Violation>>;
}

/// Applies and reverts fixes against a document.
///
/// Calls may be abandoned by the caller when the per-call timeout expires.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AutomationBackend: Send + Sync {
    /// Apply one fix.
    async fn apply_fix(&self, request: &FixRequest) -> BackendResult<FixApplication>;

    /// Revert a previously applied fix.
    async fn undo_fix(&self, document_ref: &str, fix_id: &FixId) -> BackendResult<UndoResult>;
}

/// Decides whether a plan may be executed.
#[async_trait]
pub trait ApprovalGate: Send + Sync {
    /// Return true to let the plan run.
    async fn approve(&self, session_id: &SessionId, document_ref: &str, plan: &FixPlan) -> bool;
}

/// Approval gate with a fixed answer.
#[derive(Debug, Clone, Copy)]
pub struct StaticApproval {
    approve: bool,
}

impl StaticApproval {
    /// Approve every plan.
    pub fn allow_all() -> Self {
        Self { approve: true }
    }

    /// Deny every plan.
    pub fn deny_all() -> Self {
        Self { approve: false }
    }
}

#[async_trait]
impl ApprovalGate for StaticApproval {
    async fn approve(&self, _session_id: &SessionId, _document_ref: &str, _plan: &FixPlan) -> bool {
        self.approve
    }
}
