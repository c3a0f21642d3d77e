//! CLI commands for inspecting learned strategies and past sessions.

use chrono::Utc;
use clap::Subcommand;

use super::storage::RemediationStorage;
use super::strategy_store::StrategyStore;
use super::types::StrategyStat;

/// Strategy statistics subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum StrategyCommands {
    /// List statistics for every fix type with history
    List,

    /// Show statistics for one fix type
    Show {
        /// Fix type, e.g. color_correction
        fix_type: String,
    },

    /// Forget the history of a fix type
    Reset {
        /// Fix type, e.g. color_correction
        fix_type: String,
    },
}

/// Result of CLI command execution.
pub struct CliResult {
    /// Exit code (0 = success)
    pub exit_code: i32,
    /// Output message
    pub message: String,
}

impl CliResult {
    /// Create a success result with the given message.
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            exit_code: 0,
            message: message.into(),
        }
    }

    /// Create an error result with the given message.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            exit_code: 1,
            message: message.into(),
        }
    }
}

const RULE: &str = "═══════════════════════════════════════════════════════════════════════════════\n";

/// Execute a strategy subcommand.
pub async fn execute_strategy_command(
    command: StrategyCommands,
    storage: &RemediationStorage,
) -> CliResult {
    match command {
        StrategyCommands::List => execute_list(storage).await,
        StrategyCommands::Show { fix_type } => execute_show(storage, &fix_type).await,
        StrategyCommands::Reset { fix_type } => execute_reset(storage, &fix_type).await,
    }
}

async fn execute_list(storage: &RemediationStorage) -> CliResult {
    let stats = match storage.load_all().await {
        Ok(stats) => stats,
        Err(e) => return CliResult::error(format!("Failed to load strategy statistics: {}", e)),
    };

    let mut output = String::new();
    output.push_str("\nStrategy Statistics\n");
    output.push_str(RULE);
    output.push('\n');

    if stats.is_empty() {
        output.push_str("No strategy history recorded yet.\n");
        return CliResult::success(output);
    }

    output.push_str(&format!(
        "{:<26} {:>8} {:>9} {:>11} {:>11}\n",
        "FIX TYPE", "SAMPLES", "SUCCESS", "AVG MS", "CONFIDENCE"
    ));
    for stat in &stats {
        output.push_str(&format!(
            "{:<26} {:>8} {:>8.1}% {:>11.0} {:>11.2}\n",
            stat.fix_type,
            stat.sample_count,
            stat.success_rate * 100.0,
            stat.avg_duration_ms,
            stat.confidence
        ));
    }

    CliResult::success(output)
}

async fn execute_show(storage: &RemediationStorage, fix_type: &str) -> CliResult {
    match storage.load(fix_type).await {
        Ok(Some(stat)) => CliResult::success(format_stat(&stat)),
        Ok(None) => CliResult::error(format!("No statistics recorded for {}", fix_type)),
        Err(e) => CliResult::error(format!("Failed to load {}: {}", fix_type, e)),
    }
}

async fn execute_reset(storage: &RemediationStorage, fix_type: &str) -> CliResult {
    match storage.delete(fix_type).await {
        Ok(true) => CliResult::success(format!("Reset statistics for {}\n", fix_type)),
        Ok(false) => CliResult::error(format!("No statistics recorded for {}", fix_type)),
        Err(e) => CliResult::error(format!("Failed to reset {}: {}", fix_type, e)),
    }
}

/// List the most recent sessions.
pub async fn execute_sessions_command(limit: u32, storage: &RemediationStorage) -> CliResult {
    let sessions = match storage.recent_sessions(limit).await {
        Ok(sessions) => sessions,
        Err(e) => return CliResult::error(format!("Failed to load sessions: {}", e)),
    };

    let mut output = String::new();
    output.push_str("\nRecent Remediation Sessions\n");
    output.push_str(RULE);
    output.push('\n');

    if sessions.is_empty() {
        output.push_str("No sessions recorded yet.\n");
        return CliResult::success(output);
    }

    for session in &sessions {
        let improvement = session
            .improvement_percent
            .map(|p| format!("{:.1}%", p))
            .unwrap_or_else(|| "n/a".to_string());
        let age = format_age(Utc::now() - session.started_at);
        output.push_str(&format!(
            "  [{}] {} {} ago: {} ({} ok / {} failed / {} skipped, improvement {})\n",
            session.outcome,
            session.session_id,
            age,
            session.document_ref,
            session.fixes_succeeded,
            session.fixes_failed,
            session.fixes_skipped,
            improvement
        ));
        if let Some(reason) = &session.failure_reason {
            output.push_str(&format!("      reason: {}\n", reason));
        }
    }

    CliResult::success(output)
}

fn format_stat(stat: &StrategyStat) -> String {
    let mut output = String::new();
    output.push_str(&format!("\nStrategy: {}\n", stat.fix_type));
    output.push_str(RULE);
    output.push_str(&format!("Samples:        {}\n", stat.sample_count));
    output.push_str(&format!("Success rate:   {:.1}%\n", stat.success_rate * 100.0));
    output.push_str(&format!("Avg duration:   {:.0}ms\n", stat.avg_duration_ms));
    output.push_str(&format!("Confidence:     {:.2}\n", stat.confidence));
    output.push_str(&format!("Last updated:   {}\n", stat.last_updated_at.to_rfc3339()));
    output
}

fn format_age(age: chrono::Duration) -> String {
    if age.num_days() > 0 {
        format!("{}d", age.num_days())
    } else if age.num_hours() > 0 {
        format!("{}h", age.num_hours())
    } else if age.num_minutes() > 0 {
        format!("{}m", age.num_minutes())
    } else {
        format!("{}s", age.num_seconds().max(0))
    }
}
