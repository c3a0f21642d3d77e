//! Learning phase.
//!
//! Closes the loop by folding each session's execution outcomes into the
//! cross-session [`StrategyStat`] for its fix type:
//!
//! ```text
//! ExecutionRecord → outcome (1.0 / 0.0) → sample_count += 1
//!                                       → EMA(success_rate, avg_duration_ms, confidence)
//!                                          once sample_count ≥ min_samples_for_update
//! ```
//!
//! Skipped records carry no information about the fix type and are ignored.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::config::LearnerConfig;
use super::knowledge::FixCatalog;
use super::strategy_store::StrategyStats;
use super::types::{ExecutionRecord, ExecutionStatus, StrategyStat};
use super::verifier::VerificationReport;
use crate::error::StorageResult;

// ============================================================================
// Learning Outcome
// ============================================================================

/// Suggestion raised when a fix type fails repeatedly within one session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PatternRecommendation {
    /// The failing fix type
    pub fix_type: String,
    /// Failures in the session
    pub failure_count: usize,
    /// What to change
    pub suggestion: String,
}

/// What the learner recorded for a session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LearningOutcome {
    /// Records folded into statistics
    pub samples_recorded: usize,
    /// Statistics after the update, by fix type
    pub updated: Vec<StrategyStat>,
    /// Recommendations for repeatedly failing fix types
    pub recommendations: Vec<PatternRecommendation>,
    /// Improvement measured by verification, when known
    pub improvement_percent: Option<f64>,
    /// When learning finished
    pub learned_at: DateTime<Utc>,
}

// ============================================================================
// Update Rule
// ============================================================================

/// Fold one outcome into a statistic.
///
/// The sample counter always advances. The estimates move by
/// `x ← x + α(observed − x)` only once the counter has reached
/// `min_samples_for_update`.
pub fn apply_sample(stat: &mut StrategyStat, succeeded: bool, elapsed_ms: u64, config: &LearnerConfig) {
    stat.sample_count += 1;
    stat.last_updated_at = Utc::now();

    if stat.sample_count < config.min_samples_for_update {
        return;
    }

    let alpha = config.learning_rate;
    let outcome = if succeeded { 1.0 } else { 0.0 };
    stat.success_rate += alpha * (outcome - stat.success_rate);
    stat.avg_duration_ms += alpha * (elapsed_ms as f64 - stat.avg_duration_ms);
    stat.confidence += alpha * (outcome - stat.confidence);
}

// ============================================================================
// Learning Engine
// ============================================================================

/// Updates strategy statistics from execution records.
#[derive(Debug, Clone)]
pub struct LearningEngine {
    config: LearnerConfig,
    catalog: Arc<FixCatalog>,
    stats: StrategyStats,
}

impl LearningEngine {
    /// Create a learning engine.
    pub fn new(config: LearnerConfig, catalog: Arc<FixCatalog>, stats: StrategyStats) -> Self {
        Self {
            config,
            catalog,
            stats,
        }
    }

    /// Learn from one session's records.
    pub async fn learn(
        &self,
        records: &[ExecutionRecord],
        report: Option<&VerificationReport>,
    ) -> StorageResult<LearningOutcome> {
        let mut by_type: BTreeMap<&str, Vec<&ExecutionRecord>> = BTreeMap::new();
        for record in records.iter().filter(|r| r.status != ExecutionStatus::Skipped) {
            by_type.entry(&record.fix_type).or_default().push(record);
        }

        let mut updated = Vec::with_capacity(by_type.len());
        let mut recommendations = Vec::new();
        let mut samples_recorded = 0;

        for (fix_type, type_records) in &by_type {
            let stat = self
                .stats
                .update(fix_type, |stat| {
                    for record in type_records {
                        apply_sample(stat, record.is_success(), record.elapsed_ms, &self.config);
                    }
                })
                .await?;
            samples_recorded += type_records.len();

            debug!(
                fix_type = %fix_type,
                samples = stat.sample_count,
                success_rate = stat.success_rate,
                confidence = stat.confidence,
                "Strategy updated"
            );
            updated.push(stat);

            let failure_count = type_records
                .iter()
                .filter(|r| r.status == ExecutionStatus::Failed)
                .count();
            if failure_count >= self.config.pattern_failure_threshold {
                recommendations.push(PatternRecommendation {
                    fix_type: fix_type.to_string(),
                    failure_count,
                    suggestion: self.catalog.failure_suggestion(fix_type),
                });
            }
        }

        info!(
            samples = samples_recorded,
            fix_types = updated.len(),
            recommendations = recommendations.len(),
            "Learning complete"
        );

        Ok(LearningOutcome {
            samples_recorded,
            updated,
            recommendations,
            improvement_percent: report.and_then(|r| r.improvement_percent),
            learned_at: Utc::now(),
        })
    }
}
