//! Verification phase.
//!
//! Re-runs the detector after execution and compares the two snapshots.
//! Violations are matched by `(type, location)`: detectors are not required
//! to keep IDs stable between runs.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use super::types::{Location, Severity, Violation};
use crate::backend::Detector;

/// Errors reaching the detector during verification.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum VerificationError {
    /// The detector failed or timed out
    #[error("Detector unavailable: {message}")]
    DetectorUnavailable {
        /// Underlying failure
        message: String,
    },
}

/// Qualitative label for an improvement percentage.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ImprovementBand {
    /// 80% or more resolved
    Excellent,
    /// 50% or more resolved
    Good,
    /// 25% or more resolved
    Partial,
    /// Less than 25% resolved
    Limited,
}

impl ImprovementBand {
    /// Band for an improvement percentage.
    pub fn from_percent(percent: f64) -> Self {
        match percent {
            p if p >= 80.0 => ImprovementBand::Excellent,
            p if p >= 50.0 => ImprovementBand::Good,
            p if p >= 25.0 => ImprovementBand::Partial,
            _ => ImprovementBand::Limited,
        }
    }

    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            ImprovementBand::Excellent => "excellent",
            ImprovementBand::Good => "good",
            ImprovementBand::Partial => "partial",
            ImprovementBand::Limited => "limited",
        }
    }
}

impl std::fmt::Display for ImprovementBand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Before/after comparison of a session's document.
///
/// Fields derived from the second detector run are `None` when that run
/// could not be completed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VerificationReport {
    /// Violations in the pre-execution snapshot
    pub violations_before: usize,
    /// Violations after execution
    pub violations_after: Option<usize>,
    /// Before-violations no longer present
    pub fixed_count: Option<usize>,
    /// `fixed_count / violations_before × 100`
    pub improvement_percent: Option<f64>,
    /// Types present after but absent before, sorted
    pub new_violation_types: Vec<String>,
    /// Whether no critical before-violation remains
    pub critical_resolved: Option<bool>,
    /// Label for `improvement_percent`
    pub band: Option<ImprovementBand>,
    /// Detector failure, when the report is incomplete
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detector_error: Option<String>,
    /// When verification finished
    pub verified_at: DateTime<Utc>,
}

impl VerificationReport {
    /// Compare two snapshots.
    pub fn compare(before: &[Violation], after: &[Violation]) -> Self {
        let remaining: HashSet<(&str, &Location)> = after.iter().map(Violation::match_key).collect();
        let still_present = |v: &&Violation| remaining.contains(&v.match_key());

        let fixed_count = before.len() - before.iter().filter(still_present).count();
        let improvement_percent = if before.is_empty() {
            100.0
        } else {
            fixed_count as f64 / before.len() as f64 * 100.0
        };

        let before_types: HashSet<&str> =
            before.iter().map(|v| v.violation_type.as_str()).collect();
        let new_violation_types: Vec<String> = after
            .iter()
            .map(|v| v.violation_type.as_str())
            .filter(|t| !before_types.contains(t))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .map(str::to_string)
            .collect();

        let critical_resolved = !before
            .iter()
            .filter(|v| v.severity == Severity::Critical)
            .any(|v| still_present(&v));

        Self {
            violations_before: before.len(),
            violations_after: Some(after.len()),
            fixed_count: Some(fixed_count),
            improvement_percent: Some(improvement_percent),
            new_violation_types,
            critical_resolved: Some(critical_resolved),
            band: Some(ImprovementBand::from_percent(improvement_percent)),
            detector_error: None,
            verified_at: Utc::now(),
        }
    }

    /// Report for a detector failure: only the before count is known.
    pub fn incomplete(before: &[Violation], error: &VerificationError) -> Self {
        Self {
            violations_before: before.len(),
            violations_after: None,
            fixed_count: None,
            improvement_percent: None,
            new_violation_types: Vec::new(),
            critical_resolved: None,
            band: None,
            detector_error: Some(error.to_string()),
            verified_at: Utc::now(),
        }
    }

    /// Whether the second detector run succeeded.
    pub fn is_complete(&self) -> bool {
        self.detector_error.is_none()
    }
}

/// Measures the effect of a session by re-running the detector.
#[derive(Clone)]
pub struct VerificationEngine {
    detector: Arc<dyn Detector>,
    call_timeout: Duration,
}

impl VerificationEngine {
    /// Create a verification engine.
    pub fn new(detector: Arc<dyn Detector>, call_timeout: Duration) -> Self {
        Self {
            detector,
            call_timeout,
        }
    }

    /// Re-detect violations in a document.
    pub async fn redetect(
        &self,
        document_ref: &str,
        timeout: Option<Duration>,
    ) -> Result<Vec<Violation>, VerificationError> {
        let timeout = timeout.map_or(self.call_timeout, |t| t.min(self.call_timeout));
        match tokio::time::timeout(timeout, self.detector.detect(document_ref)).await {
            Ok(Ok(violations)) => Ok(violations),
            Ok(Err(e)) => Err(VerificationError::DetectorUnavailable {
                message: e.to_string(),
            }),
            Err(_) => Err(VerificationError::DetectorUnavailable {
                message: format!("Detector timed out after {}ms", timeout.as_millis()),
            }),
        }
    }

    /// Verify a document against its pre-execution snapshot.
    ///
    /// Never fails: a detector failure yields an incomplete report.
    pub async fn verify(
        &self,
        document_ref: &str,
        before: &[Violation],
        timeout: Option<Duration>,
    ) -> VerificationReport {
        match self.redetect(document_ref, timeout).await {
            Ok(after) => {
                let report = VerificationReport::compare(before, &after);
                info!(
                    document = %document_ref,
                    before = report.violations_before,
                    after = after.len(),
                    fixed = report.fixed_count.unwrap_or(0),
                    improvement = report.improvement_percent.unwrap_or(0.0),
                    band = %report.band.map(|b| b.as_str()).unwrap_or("unknown"),
                    "Verification complete"
                );
                report
            }
            Err(e) => {
                warn!(document = %document_ref, error = %e, "Verification incomplete");
                VerificationReport::incomplete(before, &e)
            }
        }
    }
}
