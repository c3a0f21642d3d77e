use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use super::SharedState;
use crate::error::{McpError, McpResult};
use crate::remediation::{
    RemediationSession, SessionId, SessionOutcome, SessionOverrides, StrategyStat, StrategyStore,
    Violation,
};

/// Route tool calls to appropriate handlers
pub async fn handle_tool_call(
    state: &SharedState,
    tool_name: &str,
    arguments: Option<Value>,
) -> McpResult<Value> {
    info!(tool = %tool_name, "Routing tool call");

    match tool_name {
        "remediation_start" => handle_start(state, arguments).await,
        "remediation_status" => handle_status(state, arguments).await,
        "remediation_cancel" => handle_cancel(state, arguments).await,
        "remediation_strategy_stats" => handle_strategy_stats(state, arguments).await,
        _ => Err(McpError::UnknownTool {
            tool_name: tool_name.to_string(),
        }),
    }
}

// ============================================================================
// Parameters and responses
// ============================================================================

/// Parameters for remediation_start.
#[derive(Debug, Deserialize)]
pub struct StartParams {
    /// Document to remediate
    pub document_ref: String,
    /// Pre-execution snapshot; the detector is asked when absent
    #[serde(default)]
    pub violations: Option<Vec<Violation>>,
    /// Per-session configuration overrides
    #[serde(default)]
    pub overrides: SessionOverrides,
    /// Block until the session finishes
    #[serde(default)]
    pub wait: bool,
}

/// Parameters naming one session.
#[derive(Debug, Deserialize)]
pub struct SessionParams {
    /// Session identifier
    pub session_id: SessionId,
}

/// Parameters for remediation_strategy_stats.
#[derive(Debug, Default, Deserialize)]
pub struct StrategyStatsParams {
    /// Restrict to one fix type
    #[serde(default)]
    pub fix_type: Option<String>,
}

/// Session state with its derived outcome.
#[derive(Debug, Serialize)]
pub struct SessionView {
    /// Derived outcome
    pub outcome: SessionOutcome,
    /// Full session state
    #[serde(flatten)]
    pub session: RemediationSession,
}

impl From<RemediationSession> for SessionView {
    fn from(session: RemediationSession) -> Self {
        Self {
            outcome: session.outcome(),
            session,
        }
    }
}

/// Response of remediation_strategy_stats.
#[derive(Debug, Serialize)]
pub struct StrategyStatsResponse {
    /// Statistics, ordered by fix type
    pub strategies: Vec<StrategyStat>,
}

// ============================================================================
// Handlers
// ============================================================================

/// Handle remediation_start tool call
async fn handle_start(state: &SharedState, arguments: Option<Value>) -> McpResult<Value> {
    let params: StartParams = parse_arguments("remediation_start", arguments)?;
    if params.document_ref.trim().is_empty() {
        return Err(McpError::InvalidParameters {
            tool_name: "remediation_start".to_string(),
            message: "document_ref must not be empty".to_string(),
        });
    }

    let session_id = state
        .coordinator
        .start_session(&params.document_ref, params.violations, &params.overrides)
        .await
        .map_err(execution_failed)?;

    let session = if params.wait {
        state.coordinator.await_session(&session_id).await
    } else {
        state.coordinator.get_session_status(&session_id).await
    }
    .map_err(execution_failed)?;

    serde_json::to_value(SessionView::from(session)).map_err(McpError::Json)
}

/// Handle remediation_status tool call
async fn handle_status(state: &SharedState, arguments: Option<Value>) -> McpResult<Value> {
    execute_handler("remediation_status", arguments, |params: SessionParams| async move {
        state
            .coordinator
            .get_session_status(&params.session_id)
            .await
            .map(SessionView::from)
    })
    .await
}

/// Handle remediation_cancel tool call
async fn handle_cancel(state: &SharedState, arguments: Option<Value>) -> McpResult<Value> {
    execute_handler("remediation_cancel", arguments, |params: SessionParams| async move {
        state.coordinator.cancel_session(&params.session_id).await
    })
    .await
}

/// Handle remediation_strategy_stats tool call
async fn handle_strategy_stats(state: &SharedState, arguments: Option<Value>) -> McpResult<Value> {
    let params: StrategyStatsParams = match arguments {
        Some(args) => parse_arguments("remediation_strategy_stats", Some(args))?,
        None => StrategyStatsParams::default(),
    };

    let strategies = match params.fix_type {
        Some(fix_type) => state
            .storage
            .load(&fix_type)
            .await
            .map_err(execution_failed)?
            .into_iter()
            .collect(),
        None => state.storage.load_all().await.map_err(execution_failed)?,
    };

    serde_json::to_value(StrategyStatsResponse { strategies }).map_err(McpError::Json)
}

// ============================================================================
// Helper functions
// ============================================================================

fn execution_failed(e: impl std::fmt::Display) -> McpError {
    McpError::ExecutionFailed {
        message: e.to_string(),
    }
}

/// Helper to parse arguments with consistent error handling
fn parse_arguments<T: serde::de::DeserializeOwned>(
    tool_name: &str,
    arguments: Option<Value>,
) -> McpResult<T> {
    match arguments {
        Some(args) => serde_json::from_value(args).map_err(|e| McpError::InvalidParameters {
            tool_name: tool_name.to_string(),
            message: e.to_string(),
        }),
        None => Err(McpError::InvalidParameters {
            tool_name: tool_name.to_string(),
            message: "Missing arguments".to_string(),
        }),
    }
}

/// Parse arguments, run an operation, and serialize its result.
async fn execute_handler<P, R, E, F, Fut>(
    tool_name: &str,
    arguments: Option<Value>,
    operation: F,
) -> McpResult<Value>
where
    P: serde::de::DeserializeOwned,
    R: Serialize,
    E: std::fmt::Display,
    F: FnOnce(P) -> Fut,
    Fut: std::future::Future<Output = Result<R, E>>,
{
    let params: P = parse_arguments(tool_name, arguments)?;

    let result = operation(params).await.map_err(execution_failed)?;

    serde_json::to_value(result).map_err(McpError::Json)
}
