//! Planning phase.
//!
//! Turns a violation snapshot into a [`FixPlan`]:
//!
//! ```text
//! [Violation] → candidate Fix per violation → rank (severity ↓, duration ↑)
//!             → dependency edges from ordering rules → topological sort
//!             → risk adjustment from StrategyStat → schedule under cap → FixPlan
//! ```
//!
//! Planning is pure: the same snapshot, statistics, and catalog always
//! produce the same plan.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info};

use super::config::{PlannerConfig, RemediationConfig};
use super::knowledge::FixCatalog;
use super::types::{Fix, FixId, FixPlan, Location, RiskLevel, Severity, StrategyStat, Violation};

/// Errors that stop planning. Fatal to the session, raised before any side effect.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum PlanningError {
    /// The ordering rules produced a dependency cycle
    #[error("Cyclic dependency among fixes: {}", join_fix_ids(.fix_ids))]
    CyclicDependency {
        /// Fixes that could not be ordered
        fix_ids: Vec<FixId>,
    },
}

fn join_fix_ids(ids: &[FixId]) -> String {
    ids.iter()
        .map(|id| id.0.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Candidate fix carrying the attributes used for ranking and edges.
struct Candidate<'a> {
    fix: Fix,
    severity: Severity,
    location: &'a Location,
}

/// Builds dependency-ordered fix plans.
#[derive(Debug, Clone)]
pub struct PlanningEngine {
    config: PlannerConfig,
    min_samples: u64,
    catalog: Arc<FixCatalog>,
}

impl PlanningEngine {
    /// Create a planning engine.
    pub fn new(config: &RemediationConfig, catalog: Arc<FixCatalog>) -> Self {
        Self {
            config: config.planner.clone(),
            min_samples: config.learner.min_samples_for_update,
            catalog,
        }
    }

    /// Build a plan for a violation snapshot.
    ///
    /// `stats` holds the saved statistics for the fix types involved; types
    /// without enough samples are planned from catalog defaults.
    pub fn plan(
        &self,
        violations: &[Violation],
        stats: &HashMap<String, StrategyStat>,
    ) -> Result<FixPlan, PlanningError> {
        let mut candidates: Vec<Candidate<'_>> = violations
            .iter()
            .map(|v| self.candidate(v, stats))
            .collect();

        // Stable: equal keys keep snapshot order
        candidates.sort_by(|a, b| {
            b.severity
                .cmp(&a.severity)
                .then(a.fix.estimated_duration_ms.cmp(&b.fix.estimated_duration_ms))
        });

        let successors = self.link_dependencies(&mut candidates);
        let order = topological_order(&candidates, &successors)?;

        let mut slots: Vec<Option<Candidate<'_>>> = candidates.into_iter().map(Some).collect();
        let mut fixes: Vec<Fix> = order
            .into_iter()
            .filter_map(|rank| slots[rank].take().map(|c| c.fix))
            .collect();

        let mut scheduled = 0;
        for fix in fixes.iter_mut().filter(|f| f.automated) {
            if scheduled < self.config.max_fixes_per_run {
                fix.scheduled = true;
                scheduled += 1;
            }
        }

        let automated_count = fixes.iter().filter(|f| f.automated).count();
        let plan = FixPlan {
            automated_count,
            manual_count: fixes.len() - automated_count,
            deferred_count: automated_count - scheduled,
            total_estimated_ms: fixes
                .iter()
                .filter(|f| f.scheduled)
                .map(|f| f.estimated_duration_ms)
                .sum(),
            overall_risk: fixes
                .iter()
                .filter(|f| f.scheduled)
                .map(|f| f.risk_level)
                .max()
                .unwrap_or(RiskLevel::Low),
            fixes,
        };

        info!(
            fixes = plan.fixes.len(),
            automated = plan.automated_count,
            manual = plan.manual_count,
            deferred = plan.deferred_count,
            overall_risk = %plan.overall_risk,
            estimated_ms = plan.total_estimated_ms,
            "Fix plan built"
        );

        Ok(plan)
    }

    fn candidate<'a>(
        &self,
        violation: &'a Violation,
        stats: &HashMap<String, StrategyStat>,
    ) -> Candidate<'a> {
        let meta = self.catalog.meta_for(&violation.violation_type);
        let automated = self.catalog.is_automated(&meta);
        let history = stats
            .get(&meta.fix_type)
            .filter(|s| s.is_established(self.min_samples));

        let mut risk_level = meta.risk;
        let mut estimated_duration_ms = meta.base_duration_ms;
        if let Some(stat) = history {
            if stat.success_rate < self.config.risk_downgrade_threshold
                && stat.confidence < self.config.confidence_threshold
            {
                risk_level = risk_level.raised();
                debug!(
                    fix_type = %meta.fix_type,
                    success_rate = stat.success_rate,
                    confidence = stat.confidence,
                    "Raising risk for unreliable fix type"
                );
            }
            if stat.avg_duration_ms > 0.0 {
                estimated_duration_ms = stat.avg_duration_ms.round() as u64;
            }
        }

        Candidate {
            fix: Fix {
                id: FixId::for_violation(&violation.id),
                violation_id: violation.id.clone(),
                fix_type: meta.fix_type,
                automated,
                scheduled: false,
                risk_level,
                estimated_duration_ms,
                depends_on: Vec::new(),
            },
            severity: violation.severity,
            location: &violation.location,
        }
    }

    /// Fill `depends_on` from the ordering rules and return the successor
    /// adjacency list indexed by rank.
    fn link_dependencies(&self, candidates: &mut [Candidate<'_>]) -> Vec<Vec<usize>> {
        let n = candidates.len();
        let mut successors = vec![Vec::new(); n];

        for after in 0..n {
            for before in 0..n {
                if before == after {
                    continue;
                }
                let (b, a) = (&candidates[before], &candidates[after]);
                if self.catalog.precedes(&b.fix.fix_type, &a.fix.fix_type)
                    && b.location.overlaps(a.location)
                {
                    successors[before].push(after);
                    let id = candidates[before].fix.id.clone();
                    candidates[after].fix.depends_on.push(id);
                }
            }
        }

        successors
    }
}

/// Kahn's algorithm, always releasing the best-ranked ready fix first.
fn topological_order(
    candidates: &[Candidate<'_>],
    successors: &[Vec<usize>],
) -> Result<Vec<usize>, PlanningError> {
    let n = candidates.len();
    let mut in_degree = vec![0usize; n];
    for targets in successors {
        for &t in targets {
            in_degree[t] += 1;
        }
    }

    let mut ready: BTreeSet<usize> = (0..n).filter(|&i| in_degree[i] == 0).collect();
    let mut order = Vec::with_capacity(n);

    while let Some(next) = ready.pop_first() {
        order.push(next);
        for &t in &successors[next] {
            in_degree[t] -= 1;
            if in_degree[t] == 0 {
                ready.insert(t);
            }
        }
    }

    if order.len() < n {
        let fix_ids = (0..n)
            .filter(|i| in_degree[*i] > 0)
            .map(|i| candidates[i].fix.id.clone())
            .collect();
        return Err(PlanningError::CyclicDependency { fix_ids });
    }

    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remediation::knowledge::FixTypeMeta;
    use pretty_assertions::assert_eq;

    fn engine() -> PlanningEngine {
        PlanningEngine::new(&RemediationConfig::default(), Arc::new(FixCatalog::builtin()))
    }

    fn v(id: &str, kind: &str, severity: Severity, location: &str) -> Violation {
        Violation::new(id, kind, severity, location, "")
    }

    fn established(fix_type: &str, success_rate: f64, confidence: f64) -> StrategyStat {
        let mut stat = StrategyStat::new(fix_type);
        stat.sample_count = 20;
        stat.success_rate = success_rate;
        stat.confidence = confidence;
        stat
    }

    #[test]
    fn test_empty_snapshot_yields_empty_plan() {
        let plan = engine().plan(&[], &HashMap::new()).unwrap();
        assert!(plan.fixes.is_empty());
        assert_eq!(plan.total_estimated_ms, 0);
        assert_eq!(plan.overall_risk, RiskLevel::Low);
    }

    #[test]
    fn test_one_fix_per_violation_sorted_by_severity_then_duration() {
        let violations = vec![
            v("a", "incorrect_margins", Severity::Minor, "page:1"),
            v("b", "text_cutoff", Severity::Critical, "page:2"),
            v("c", "forbidden_color", Severity::Critical, "page:3"),
        ];
        let plan = engine().plan(&violations, &HashMap::new()).unwrap();

        let ids: Vec<&str> = plan.fixes.iter().map(|f| f.violation_id.as_str()).collect();
        // Critical color (800ms) before critical reflow (3000ms), then minor
        assert_eq!(ids, vec!["c", "b", "a"]);
    }

    #[test]
    fn test_ordering_rule_adds_dependency_on_overlap_only() {
        let violations = vec![
            v("contrast", "low_contrast", Severity::Critical, "page:1/frame:hero"),
            v("color", "forbidden_color", Severity::Minor, "page:1"),
            v("far", "forbidden_color", Severity::Minor, "page:4"),
        ];
        let plan = engine().plan(&violations, &HashMap::new()).unwrap();

        let contrast = plan.get(&FixId::for_violation("contrast")).unwrap();
        assert_eq!(contrast.depends_on, vec![FixId::for_violation("color")]);

        let color_pos = plan.position(&FixId::for_violation("color")).unwrap();
        let contrast_pos = plan.position(&FixId::for_violation("contrast")).unwrap();
        assert!(color_pos < contrast_pos);
    }

    #[test]
    fn test_cycle_is_rejected() {
        let catalog = FixCatalog::empty()
            .with_fix_type("a", FixTypeMeta::new("fix_a", true, RiskLevel::Low, 100))
            .with_fix_type("b", FixTypeMeta::new("fix_b", true, RiskLevel::Low, 100))
            .with_ordering("fix_a", "fix_b")
            .with_ordering("fix_b", "fix_a");
        let engine = PlanningEngine::new(&RemediationConfig::default(), Arc::new(catalog));

        let err = engine
            .plan(
                &[
                    v("1", "a", Severity::Major, "page:1"),
                    v("2", "b", Severity::Major, "page:1"),
                ],
                &HashMap::new(),
            )
            .unwrap_err();

        let PlanningError::CyclicDependency { fix_ids } = err;
        assert_eq!(fix_ids.len(), 2);
    }

    #[test]
    fn test_manual_fixes_stay_in_plan_unscheduled() {
        let violations = vec![
            v("p", "placeholder_metrics", Severity::Critical, "page:1"),
            v("u", "never_seen_before", Severity::Major, "page:1"),
        ];
        let plan = engine().plan(&violations, &HashMap::new()).unwrap();

        assert_eq!(plan.fixes.len(), 2);
        assert_eq!(plan.manual_count, 2);
        assert_eq!(plan.automated_count, 0);
        assert!(plan.fixes.iter().all(|f| !f.scheduled));
        assert_eq!(plan.total_estimated_ms, 0);
        assert_eq!(plan.overall_risk, RiskLevel::Low);
    }

    #[test]
    fn test_unreliable_history_raises_risk() {
        let violations = vec![v("c", "forbidden_color", Severity::Major, "page:1")];
        let mut stats = HashMap::new();
        stats.insert(
            "color_correction".to_string(),
            established("color_correction", 0.6, 0.3),
        );

        let plan = engine().plan(&violations, &stats).unwrap();
        assert_eq!(plan.fixes[0].risk_level, RiskLevel::Medium);
        assert_eq!(plan.overall_risk, RiskLevel::Medium);
    }

    #[test]
    fn test_confident_history_keeps_risk() {
        let violations = vec![v("c", "forbidden_color", Severity::Major, "page:1")];
        let mut stats = HashMap::new();
        stats.insert(
            "color_correction".to_string(),
            established("color_correction", 0.6, 0.7),
        );

        let plan = engine().plan(&violations, &stats).unwrap();
        assert_eq!(plan.fixes[0].risk_level, RiskLevel::Low);
    }

    #[test]
    fn test_history_below_sample_threshold_is_ignored() {
        let violations = vec![v("c", "forbidden_color", Severity::Major, "page:1")];
        let mut stat = established("color_correction", 0.1, 0.0);
        stat.sample_count = 2;
        let mut stats = HashMap::new();
        stats.insert("color_correction".to_string(), stat);

        let plan = engine().plan(&violations, &stats).unwrap();
        assert_eq!(plan.fixes[0].risk_level, RiskLevel::Low);
    }

    #[test]
    fn test_cap_defers_excess_automated_fixes() {
        let mut config = RemediationConfig::default();
        config.planner.max_fixes_per_run = 2;
        let engine = PlanningEngine::new(&config, Arc::new(FixCatalog::builtin()));

        let violations: Vec<Violation> = (0..4)
            .map(|i| v(&format!("c{}", i), "forbidden_color", Severity::Major, &format!("page:{}", i)))
            .collect();
        let plan = engine.plan(&violations, &HashMap::new()).unwrap();

        assert_eq!(plan.scheduled().count(), 2);
        assert_eq!(plan.deferred_count, 2);
        assert_eq!(plan.total_estimated_ms, 1600);
    }

    #[test]
    fn test_planning_is_deterministic() {
        let violations = vec![
            v("1", "forbidden_font", Severity::Major, "page:1/frame:body"),
            v("2", "text_cutoff", Severity::Major, "page:1/frame:body"),
            v("3", "incorrect_type_scale", Severity::Major, "page:1"),
            v("4", "forbidden_color", Severity::Critical, "page:2"),
        ];
        let first = engine().plan(&violations, &HashMap::new()).unwrap();
        let second = engine().plan(&violations, &HashMap::new()).unwrap();
        assert_eq!(first, second);
    }
}
