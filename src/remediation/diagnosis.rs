//! Diagnosis phase.
//!
//! Groups the violation snapshot by type and flags types that recur often
//! enough to point at an upstream cause (a template, a master page, a
//! missing font) rather than one-off mistakes.
//!
//! ```text
//! [Violation] → group by type → count > threshold? → CauseTable lookup → SystemicIssue
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::config::DiagnosisConfig;
use super::knowledge::CauseTable;
use super::types::Violation;

// ============================================================================
// Diagnosis Output
// ============================================================================

/// A violation type recurring often enough to suggest a shared root cause.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SystemicIssue {
    /// The recurring violation type
    #[serde(rename = "type")]
    pub violation_type: String,
    /// Occurrences in the snapshot
    pub occurrence_count: usize,
    /// Most likely root cause
    pub likely_cause: String,
    /// Upstream change that removes the cause
    pub suggested_fix: String,
    /// Share of the group expected to disappear after the upstream fix
    pub expected_impact_percent: f64,
}

/// Result of the diagnosis phase.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DiagnosisReport {
    /// Violations in the snapshot
    pub total_violations: usize,
    /// Violations grouped by type, in snapshot order
    pub grouped_by_type: BTreeMap<String, Vec<Violation>>,
    /// Violation counts per severity
    pub severity_breakdown: BTreeMap<String, usize>,
    /// Types judged systemic, ordered by descending occurrence count
    pub systemic_issues: Vec<SystemicIssue>,
}

// ============================================================================
// Diagnosis Engine
// ============================================================================

/// Groups violations and detects systemic issues.
#[derive(Debug, Clone)]
pub struct DiagnosisEngine {
    config: DiagnosisConfig,
    causes: CauseTable,
}

impl DiagnosisEngine {
    /// Create an engine with the cause table named by the configuration.
    pub fn new(config: DiagnosisConfig) -> Self {
        let causes = CauseTable::load(config.knowledge_path.as_deref());
        Self { config, causes }
    }

    /// Create an engine with an explicit cause table.
    pub fn with_causes(config: DiagnosisConfig, causes: CauseTable) -> Self {
        Self { config, causes }
    }

    /// Diagnose a violation snapshot. Pure; never fails.
    pub fn diagnose(&self, violations: &[Violation]) -> DiagnosisReport {
        let mut grouped_by_type: BTreeMap<String, Vec<Violation>> = BTreeMap::new();
        let mut severity_breakdown: BTreeMap<String, usize> = BTreeMap::new();

        for violation in violations {
            grouped_by_type
                .entry(violation.violation_type.clone())
                .or_default()
                .push(violation.clone());
            *severity_breakdown
                .entry(violation.severity.as_str().to_string())
                .or_insert(0) += 1;
        }

        let mut systemic_issues: Vec<SystemicIssue> = grouped_by_type
            .iter()
            .filter(|(_, group)| group.len() > self.config.systemic_threshold)
            .filter_map(|(violation_type, group)| {
                let Some(entry) = self.causes.get(violation_type) else {
                    debug!(
                        violation_type = %violation_type,
                        count = group.len(),
                        "Recurring type has no known cause"
                    );
                    return None;
                };
                Some(SystemicIssue {
                    violation_type: violation_type.clone(),
                    occurrence_count: group.len(),
                    likely_cause: entry.likely_cause.clone(),
                    suggested_fix: entry.suggested_fix.clone(),
                    expected_impact_percent: entry.expected_impact_percent,
                })
            })
            .collect();

        // Stable sort keeps alphabetical order among equal counts
        systemic_issues.sort_by(|a, b| b.occurrence_count.cmp(&a.occurrence_count));

        info!(
            violations = violations.len(),
            types = grouped_by_type.len(),
            systemic = systemic_issues.len(),
            "Diagnosis complete"
        );

        DiagnosisReport {
            total_violations: violations.len(),
            grouped_by_type,
            severity_breakdown,
            systemic_issues,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remediation::types::Severity;

    fn violations(kind: &str, count: usize) -> Vec<Violation> {
        (0..count)
            .map(|i| {
                Violation::new(
                    format!("{}-{}", kind, i),
                    kind,
                    Severity::Major,
                    format!("page:{}", i + 1).as_str(),
                    "",
                )
            })
            .collect()
    }

    fn engine() -> DiagnosisEngine {
        DiagnosisEngine::with_causes(DiagnosisConfig::default(), CauseTable::builtin())
    }

    #[test]
    fn test_threshold_is_strict() {
        let report = engine().diagnose(&violations("forbidden_color", 3));
        assert!(report.systemic_issues.is_empty());

        let report = engine().diagnose(&violations("forbidden_color", 4));
        assert_eq!(report.systemic_issues.len(), 1);
        assert_eq!(report.systemic_issues[0].occurrence_count, 4);
        assert_eq!(report.systemic_issues[0].violation_type, "forbidden_color");
    }

    #[test]
    fn test_unknown_type_is_grouped_but_not_systemic() {
        let report = engine().diagnose(&violations("mystery_glyph", 10));
        let group = &report.grouped_by_type["mystery_glyph"];
        assert_eq!(group.len(), 10);
        assert_eq!(group[0].id, "mystery_glyph-0");
        assert_eq!(group[9].location.0, "page:10");
        assert!(report.systemic_issues.is_empty());
    }

    #[test]
    fn test_empty_cause_table_reports_nothing_systemic() {
        let engine = DiagnosisEngine::with_causes(DiagnosisConfig::default(), CauseTable::default());
        let report = engine.diagnose(&violations("forbidden_color", 9));
        assert_eq!(report.total_violations, 9);
        assert!(report.systemic_issues.is_empty());
    }

    #[test]
    fn test_systemic_issues_sorted_by_count() {
        let mut all = violations("incorrect_margins", 5);
        all.extend(violations("forbidden_color", 7));
        let report = engine().diagnose(&all);

        let types: Vec<&str> = report
            .systemic_issues
            .iter()
            .map(|i| i.violation_type.as_str())
            .collect();
        assert_eq!(types, vec!["forbidden_color", "incorrect_margins"]);
        assert_eq!(report.severity_breakdown["major"], 12);
    }

    #[test]
    fn test_empty_snapshot() {
        let report = engine().diagnose(&[]);
        assert_eq!(report, DiagnosisReport::default());
    }
}
