//! Core types for the remediation engine.
//!
//! This module defines the data shared across all phases:
//! - [`Violation`]: An immutable detected quality problem
//! - [`Fix`] and [`FixPlan`]: The planner's dependency-ordered output
//! - [`ExecutionRecord`]: The append-only log of what the executor did
//! - [`StrategyStat`]: Cross-session reliability statistics per fix type

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// Identifiers
// ============================================================================

/// Unique identifier for a remediation session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct SessionId(pub String);

impl SessionId {
    /// Create a new unique session ID.
    pub fn new() -> Self {
        Self(format!("rem_{}", uuid::Uuid::new_v4()))
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a planned fix.
///
/// Derived from the violation it addresses so that planning the same
/// snapshot twice yields identical plans.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FixId(pub String);

impl FixId {
    /// Build the fix ID for a violation.
    pub fn for_violation(violation_id: &str) -> Self {
        Self(format!("fix_{}", violation_id))
    }
}

impl std::fmt::Display for FixId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Severity and Risk
// ============================================================================

/// Severity of a detected violation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Cosmetic, reported only
    Warning = 0,
    /// Small deviation from the brand rules
    Minor = 1,
    /// Visible deviation that should be fixed before release
    Major = 2,
    /// Blocks release
    Critical = 3,
}

impl Severity {
    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Warning => "warning",
            Severity::Minor => "minor",
            Severity::Major => "major",
            Severity::Critical => "critical",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "warning" => Ok(Severity::Warning),
            "minor" => Ok(Severity::Minor),
            "major" => Ok(Severity::Major),
            "critical" => Ok(Severity::Critical),
            _ => Err(format!("Unknown severity: {}", s)),
        }
    }
}

/// Risk of applying a fix automatically.
#[derive(
    Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    /// Safe to apply unattended
    #[default]
    Low = 0,
    /// May disturb neighbouring content
    Medium = 1,
    /// Likely to need human review
    High = 2,
}

impl RiskLevel {
    /// Raise the risk by one tier, saturating at `High`.
    pub fn raised(self) -> Self {
        match self {
            RiskLevel::Low => RiskLevel::Medium,
            RiskLevel::Medium | RiskLevel::High => RiskLevel::High,
        }
    }

    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
        }
    }
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for RiskLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "low" => Ok(RiskLevel::Low),
            "medium" => Ok(RiskLevel::Medium),
            "high" => Ok(RiskLevel::High),
            _ => Err(format!("Unknown risk level: {}", s)),
        }
    }
}

// ============================================================================
// Violations
// ============================================================================

/// Region of a document, written as a `/`-separated path such as
/// `page:2/frame:header`. The root region is `document`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct Location(pub String);

impl Location {
    /// The whole-document region.
    pub const DOCUMENT: &'static str = "document";

    /// Create a location from a region path.
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('/').map(str::trim).filter(|s| !s.is_empty())
    }

    /// Whether two regions share any area.
    ///
    /// Equal paths overlap, an ancestor overlaps its descendants, and the
    /// whole-document region overlaps everything.
    pub fn overlaps(&self, other: &Location) -> bool {
        if self.0 == Self::DOCUMENT || other.0 == Self::DOCUMENT {
            return true;
        }
        self.segments()
            .zip(other.segments())
            .all(|(a, b)| a == b)
    }
}

impl std::fmt::Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Location {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A detected document-quality violation. Immutable once detected.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Violation {
    /// Detector-assigned identifier, unique within a snapshot
    pub id: String,
    /// Violation type, e.g. `forbidden_color`
    #[serde(rename = "type")]
    pub violation_type: String,
    /// Severity as reported by the detector
    pub severity: Severity,
    /// Where in the document the violation sits
    pub location: Location,
    /// Human-readable description
    #[serde(default)]
    pub description: String,
    /// Detection time
    #[serde(default = "Utc::now")]
    pub detected_at: DateTime<Utc>,
}

impl Violation {
    /// Create a violation detected now.
    pub fn new(
        id: impl Into<String>,
        violation_type: impl Into<String>,
        severity: Severity,
        location: impl Into<Location>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            violation_type: violation_type.into(),
            severity,
            location: location.into(),
            description: description.into(),
            detected_at: Utc::now(),
        }
    }

    /// Identity used to match violations across detector runs.
    pub fn match_key(&self) -> (&str, &Location) {
        (&self.violation_type, &self.location)
    }
}

impl From<String> for Location {
    fn from(s: String) -> Self {
        Self(s)
    }
}

// ============================================================================
// Fixes and Plans
// ============================================================================

/// A planned corrective action for exactly one violation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Fix {
    /// Fix identifier
    pub id: FixId,
    /// The violation this fix addresses
    pub violation_id: String,
    /// Fix type, keys the handler table and strategy statistics
    pub fix_type: String,
    /// Whether an automation mapping exists for this fix type
    pub automated: bool,
    /// Whether the fix is scheduled for execution in this run
    pub scheduled: bool,
    /// Risk after adjustment by historical statistics
    pub risk_level: RiskLevel,
    /// Expected execution time
    pub estimated_duration_ms: u64,
    /// Fixes that must succeed before this one may run
    pub depends_on: Vec<FixId>,
}

/// A dependency-ordered set of fixes. Immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FixPlan {
    /// Fixes in a valid topological order
    pub fixes: Vec<Fix>,
    /// Number of fixes with an automation mapping
    pub automated_count: usize,
    /// Number of fixes left for a human
    pub manual_count: usize,
    /// Automated fixes held back by the per-run cap
    pub deferred_count: usize,
    /// Sum of estimated durations of scheduled fixes
    pub total_estimated_ms: u64,
    /// Highest risk among scheduled fixes
    pub overall_risk: RiskLevel,
}

impl FixPlan {
    /// Fixes eligible for execution, in plan order.
    pub fn scheduled(&self) -> impl Iterator<Item = &Fix> {
        self.fixes.iter().filter(|f| f.scheduled)
    }

    /// Look up a fix by ID.
    pub fn get(&self, id: &FixId) -> Option<&Fix> {
        self.fixes.iter().find(|f| &f.id == id)
    }

    /// Position of a fix in plan order.
    pub fn position(&self, id: &FixId) -> Option<usize> {
        self.fixes.iter().position(|f| &f.id == id)
    }
}

// ============================================================================
// Execution Records
// ============================================================================

/// Terminal status of a fix in a session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// Backend reported the fix applied
    Success,
    /// All attempts failed
    Failed,
    /// Not attempted because a dependency did not succeed
    Skipped,
}

impl ExecutionStatus {
    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Success => "success",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Skipped => "skipped",
        }
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Per-fix failure reason, absorbed into the execution record.
#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExecutionError {
    /// Every attempt exceeded the call timeout
    #[error("Backend timed out after {timeout_ms}ms ({attempts} attempts)")]
    BackendTimeout {
        /// Per-call timeout
        timeout_ms: u64,
        /// Attempts made
        attempts: u32,
    },
    /// The backend refused or failed to apply the fix
    #[error("Backend rejected fix after {attempts} attempts: {message}")]
    BackendRejected {
        /// Last error reported by the backend
        message: String,
        /// Attempts made
        attempts: u32,
    },
    /// One or more prerequisite fixes have no success record
    #[error("Dependencies not satisfied: {}", join_ids(.missing))]
    DependencyNotSatisfied {
        /// Prerequisites that did not succeed
        missing: Vec<FixId>,
    },
}

fn join_ids(ids: &[FixId]) -> String {
    ids.iter()
        .map(|f| f.0.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Append-only record of one fix's execution.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecutionRecord {
    /// The fix this record belongs to
    pub fix_id: FixId,
    /// Fix type, used by the learner
    pub fix_type: String,
    /// Terminal status
    pub status: ExecutionStatus,
    /// When execution of this fix began
    pub started_at: DateTime<Utc>,
    /// Wall time including retries and backoff
    pub elapsed_ms: u64,
    /// Backend calls made
    pub attempts: u32,
    /// Failure reason for non-success records
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ExecutionError>,
}

impl ExecutionRecord {
    /// Whether this record marks a successful fix.
    pub fn is_success(&self) -> bool {
        self.status == ExecutionStatus::Success
    }
}

// ============================================================================
// Strategy Statistics
// ============================================================================

/// Cross-session reliability statistics for one fix type.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StrategyStat {
    /// Fix type these statistics describe
    pub fix_type: String,
    /// Outcomes observed so far
    pub sample_count: u64,
    /// EMA of success (1.0) and failure (0.0) outcomes
    pub success_rate: f64,
    /// EMA of execution time
    pub avg_duration_ms: f64,
    /// EMA confidence in the estimates
    pub confidence: f64,
    /// Last time any field changed
    pub last_updated_at: DateTime<Utc>,
}

impl StrategyStat {
    /// Statistics for a fix type with no history.
    pub fn new(fix_type: impl Into<String>) -> Self {
        Self {
            fix_type: fix_type.into(),
            sample_count: 0,
            success_rate: 0.5,
            avg_duration_ms: 0.0,
            confidence: 0.0,
            last_updated_at: Utc::now(),
        }
    }

    /// Whether enough samples have been seen for the estimates to move.
    pub fn is_established(&self, min_samples: u64) -> bool {
        self.sample_count >= min_samples
    }
}

// ============================================================================
// Session Lifecycle
// ============================================================================

/// Phases of a remediation session, in execution order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Group violations and find systemic issues
    Diagnose,
    /// Build the fix plan
    Plan,
    /// Apply fixes through the backend
    Execute,
    /// Re-detect and measure improvement
    Verify,
    /// Update strategy statistics
    Learn,
}

impl Phase {
    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Diagnose => "diagnose",
            Phase::Plan => "plan",
            Phase::Execute => "execute",
            Phase::Verify => "verify",
            Phase::Learn => "learn",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Start and end times of a phase.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PhaseTimestamp {
    /// The phase
    pub phase: Phase,
    /// When the phase began
    pub started_at: DateTime<Utc>,
    /// When the phase finished (None while running)
    pub completed_at: Option<DateTime<Utc>>,
}

/// Lifecycle status of a remediation session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Phases still in progress
    Running,
    /// All phases finished (possibly with failed fixes)
    Completed,
    /// A fatal error stopped the session
    Failed,
    /// Stopped by rollback, cancellation, or approval denial
    Aborted,
}

impl SessionStatus {
    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Running => "running",
            SessionStatus::Completed => "completed",
            SessionStatus::Failed => "failed",
            SessionStatus::Aborted => "aborted",
        }
    }

    /// Whether the session has stopped.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, SessionStatus::Running)
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for SessionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "running" => Ok(SessionStatus::Running),
            "completed" => Ok(SessionStatus::Completed),
            "failed" => Ok(SessionStatus::Failed),
            "aborted" => Ok(SessionStatus::Aborted),
            _ => Err(format!("Unknown session status: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Critical > Severity::Major);
        assert!(Severity::Major > Severity::Minor);
        assert!(Severity::Minor > Severity::Warning);
        assert_eq!("CRITICAL".parse::<Severity>().unwrap(), Severity::Critical);
        assert!("blocker".parse::<Severity>().is_err());
    }

    #[test]
    fn test_risk_raised_saturates() {
        assert_eq!(RiskLevel::Low.raised(), RiskLevel::Medium);
        assert_eq!(RiskLevel::Medium.raised(), RiskLevel::High);
        assert_eq!(RiskLevel::High.raised(), RiskLevel::High);
    }

    #[test]
    fn test_location_overlap() {
        let header = Location::new("page:2/frame:header");
        let page = Location::new("page:2");
        let other_page = Location::new("page:3/frame:header");

        assert!(header.overlaps(&page));
        assert!(page.overlaps(&header));
        assert!(header.overlaps(&header.clone()));
        assert!(!header.overlaps(&other_page));
        assert!(Location::new("document").overlaps(&other_page));
    }

    #[test]
    fn test_violation_deserializes_type_field() {
        let json = r#"{
            "id": "v1",
            "type": "forbidden_color",
            "severity": "critical",
            "location": "page:1/frame:hero"
        }"#;
        let v: Violation = serde_json::from_str(json).unwrap();
        assert_eq!(v.violation_type, "forbidden_color");
        assert_eq!(v.severity, Severity::Critical);
        assert_eq!(v.location, Location::new("page:1/frame:hero"));
        assert!(v.description.is_empty());
    }

    #[test]
    fn test_fix_id_is_derived_from_violation() {
        assert_eq!(FixId::for_violation("v7").0, "fix_v7");
    }

    #[test]
    fn test_execution_error_serializes_with_kind_tag() {
        let err = ExecutionError::DependencyNotSatisfied {
            missing: vec![FixId::for_violation("v1")],
        };
        let value = serde_json::to_value(&err).unwrap();
        assert_eq!(value["kind"], "dependency_not_satisfied");
        assert_eq!(err.to_string(), "Dependencies not satisfied: fix_v1");
    }

    #[test]
    fn test_session_status_terminal() {
        assert!(!SessionStatus::Running.is_terminal());
        assert!(SessionStatus::Aborted.is_terminal());
        assert_eq!(
            "completed".parse::<SessionStatus>().unwrap(),
            SessionStatus::Completed
        );
    }
}
