//! Configuration for the remediation engine.
//!
//! One sub-configuration per phase, each with defaults and a `from_env`
//! loader reading `REMEDIATION_*` variables. Invalid values fall back to
//! the defaults.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

/// Like `env_or`, but rejects NaN and infinities.
fn env_f64(key: &str, default: f64) -> f64 {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse::<f64>().ok())
        .filter(|v| v.is_finite())
        .unwrap_or(default)
}

fn env_flag(key: &str, default: bool) -> bool {
    std::env::var(key)
        .map(|v| v.to_lowercase() == "true")
        .unwrap_or(default)
}

/// Configuration for the whole remediation loop.
#[derive(Debug, Clone, Default)]
pub struct RemediationConfig {
    /// Diagnosis phase configuration
    pub diagnosis: DiagnosisConfig,

    /// Planning phase configuration
    pub planner: PlannerConfig,

    /// Execution phase configuration
    pub executor: ExecutorConfig,

    /// Learning phase configuration
    pub learner: LearnerConfig,

    /// Session coordination configuration
    pub session: SessionConfig,
}

impl RemediationConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        Self {
            diagnosis: DiagnosisConfig::from_env(),
            planner: PlannerConfig::from_env(),
            executor: ExecutorConfig::from_env(),
            learner: LearnerConfig::from_env(),
            session: SessionConfig::from_env(),
        }
    }

    /// Copy of this configuration with per-session overrides applied.
    pub fn with_overrides(&self, overrides: &SessionOverrides) -> Self {
        let mut config = self.clone();
        if let Some(v) = overrides.max_fixes_per_run {
            config.planner.max_fixes_per_run = v;
        }
        if let Some(v) = overrides.rollback_on_failure {
            config.executor.rollback_on_failure = v;
        }
        if let Some(v) = overrides.require_approval {
            config.session.require_approval = v;
        }
        if let Some(v) = overrides.learning_rate {
            config.learner.learning_rate = v.clamp(0.0, 1.0);
        }
        if let Some(v) = overrides.min_samples_for_update {
            config.learner.min_samples_for_update = v;
        }
        if let Some(v) = overrides.systemic_threshold {
            config.diagnosis.systemic_threshold = v;
        }
        if let Some(v) = overrides.confidence_threshold {
            config.planner.confidence_threshold = v;
        }
        config
    }
}

/// Per-session configuration overrides accepted by `start_session`.
///
/// Every field is optional; unset fields keep the service-wide value.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct SessionOverrides {
    /// Cap on automated fixes scheduled in one run
    pub max_fixes_per_run: Option<usize>,
    /// Undo applied fixes when one fails
    pub rollback_on_failure: Option<bool>,
    /// Ask the approval gate before executing
    pub require_approval: Option<bool>,
    /// EMA smoothing factor
    pub learning_rate: Option<f64>,
    /// Samples needed before statistics move
    pub min_samples_for_update: Option<u64>,
    /// Group size above which a type is systemic
    pub systemic_threshold: Option<usize>,
    /// Confidence below which unreliable fixes are risk-raised
    pub confidence_threshold: Option<f64>,
}

/// Configuration for the Diagnosis phase.
#[derive(Debug, Clone)]
pub struct DiagnosisConfig {
    /// A violation type is systemic when its count exceeds this
    pub systemic_threshold: usize,

    /// Optional JSON file replacing the built-in cause table
    pub knowledge_path: Option<PathBuf>,
}

impl Default for DiagnosisConfig {
    fn default() -> Self {
        Self {
            systemic_threshold: 3,
            knowledge_path: None,
        }
    }
}

impl DiagnosisConfig {
    /// Load from environment variables.
    pub fn from_env() -> Self {
        Self {
            systemic_threshold: env_or("REMEDIATION_SYSTEMIC_THRESHOLD", 3),
            knowledge_path: std::env::var("REMEDIATION_KNOWLEDGE_PATH")
                .ok()
                .filter(|p| !p.is_empty())
                .map(PathBuf::from),
        }
    }
}

/// Configuration for the Planning phase.
#[derive(Debug, Clone)]
pub struct PlannerConfig {
    /// Success rate below which a fix type counts as unreliable
    pub risk_downgrade_threshold: f64,

    /// Confidence below which an unreliable fix type is risk-raised
    pub confidence_threshold: f64,

    /// Maximum automated fixes scheduled in one run
    pub max_fixes_per_run: usize,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            risk_downgrade_threshold: 0.8,
            confidence_threshold: 0.5,
            max_fixes_per_run: 50,
        }
    }
}

impl PlannerConfig {
    /// Load from environment variables.
    pub fn from_env() -> Self {
        Self {
            risk_downgrade_threshold: env_f64("REMEDIATION_RISK_DOWNGRADE_THRESHOLD", 0.8),
            confidence_threshold: env_f64("REMEDIATION_CONFIDENCE_THRESHOLD", 0.5),
            max_fixes_per_run: env_or("REMEDIATION_MAX_FIXES_PER_RUN", 50),
        }
    }
}

/// Configuration for the Execution phase.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Retries after the first failed attempt
    pub max_retries: u32,

    /// Delay before the first retry (milliseconds)
    pub backoff_base_ms: u64,

    /// Multiplier applied per further retry
    pub backoff_factor: f64,

    /// Relative jitter applied to each delay (0.2 = ±20%)
    pub backoff_jitter: f64,

    /// Timeout for a single backend or detector call (milliseconds)
    pub call_timeout_ms: u64,

    /// Undo successful fixes in reverse order when one fails
    pub rollback_on_failure: bool,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            backoff_base_ms: 500,
            backoff_factor: 2.0,
            backoff_jitter: 0.2,
            call_timeout_ms: 30000,
            rollback_on_failure: false,
        }
    }
}

impl ExecutorConfig {
    /// Load from environment variables.
    pub fn from_env() -> Self {
        Self {
            max_retries: env_or("REMEDIATION_MAX_RETRIES", 2),
            backoff_base_ms: env_or("REMEDIATION_BACKOFF_BASE_MS", 500),
            backoff_factor: env_f64("REMEDIATION_BACKOFF_FACTOR", 2.0),
            backoff_jitter: env_f64("REMEDIATION_BACKOFF_JITTER", 0.2).clamp(0.0, 1.0),
            call_timeout_ms: env_or("REMEDIATION_CALL_TIMEOUT_MS", 30000),
            rollback_on_failure: env_flag("REMEDIATION_ROLLBACK_ON_FAILURE", false),
        }
    }

    /// Get the per-call timeout as Duration.
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }
}

/// Configuration for the Learning phase.
#[derive(Debug, Clone)]
pub struct LearnerConfig {
    /// EMA smoothing factor (0 < alpha < 1)
    pub learning_rate: f64,

    /// Samples required before statistics are updated
    pub min_samples_for_update: u64,

    /// Failures of one fix type in a session that trigger a recommendation
    pub pattern_failure_threshold: usize,
}

impl Default for LearnerConfig {
    fn default() -> Self {
        Self {
            learning_rate: 0.1,
            min_samples_for_update: 5,
            pattern_failure_threshold: 2,
        }
    }
}

impl LearnerConfig {
    /// Load from environment variables.
    pub fn from_env() -> Self {
        Self {
            learning_rate: env_f64("REMEDIATION_LEARNING_RATE", 0.1).clamp(0.0, 1.0),
            min_samples_for_update: env_or("REMEDIATION_MIN_SAMPLES_FOR_UPDATE", 5),
            pattern_failure_threshold: 2,
        }
    }
}

/// Configuration for session coordination.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Overall time budget for a session (seconds)
    pub session_timeout_secs: u64,

    /// Sessions allowed to run at once across documents
    pub max_concurrent_sessions: usize,

    /// Ask the approval gate before executing a plan
    pub require_approval: bool,

    /// Finished sessions kept queryable in memory
    pub history_limit: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            session_timeout_secs: 600, // 10 minutes
            max_concurrent_sessions: 4,
            require_approval: false,
            history_limit: 100,
        }
    }
}

impl SessionConfig {
    /// Load from environment variables.
    pub fn from_env() -> Self {
        Self {
            session_timeout_secs: env_or("REMEDIATION_SESSION_TIMEOUT_SECS", 600),
            max_concurrent_sessions: env_or("REMEDIATION_MAX_CONCURRENT_SESSIONS", 4_usize).max(1),
            require_approval: env_flag("REMEDIATION_REQUIRE_APPROVAL", false),
            history_limit: env_or("REMEDIATION_SESSION_HISTORY_LIMIT", 100),
        }
    }

    /// Get the session timeout as Duration.
    pub fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.session_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RemediationConfig::default();
        assert_eq!(config.diagnosis.systemic_threshold, 3);
        assert_eq!(config.planner.risk_downgrade_threshold, 0.8);
        assert_eq!(config.executor.max_retries, 2);
        assert_eq!(config.executor.backoff_base_ms, 500);
        assert_eq!(config.executor.call_timeout(), Duration::from_secs(30));
        assert_eq!(config.learner.learning_rate, 0.1);
        assert_eq!(config.learner.min_samples_for_update, 5);
        assert_eq!(config.session.session_timeout(), Duration::from_secs(600));
        assert!(!config.executor.rollback_on_failure);
    }

    #[test]
    fn test_overrides_apply_only_set_fields() {
        let base = RemediationConfig::default();
        let overrides: SessionOverrides = serde_json::from_str(
            r#"{"rollback_on_failure": true, "max_fixes_per_run": 3, "learning_rate": 4.0}"#,
        )
        .unwrap();

        let config = base.with_overrides(&overrides);
        assert!(config.executor.rollback_on_failure);
        assert_eq!(config.planner.max_fixes_per_run, 3);
        assert_eq!(config.learner.learning_rate, 1.0);
        assert_eq!(config.diagnosis.systemic_threshold, 3);
        assert!(!config.session.require_approval);
    }
}
