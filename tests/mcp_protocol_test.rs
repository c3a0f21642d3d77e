//! Integration tests for MCP protocol handling
//!
//! Drives the server through raw JSON-RPC lines, the way a client on stdio
//! would, with in-process detector and automation backends.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use mcp_document_remediation::backend::{
    AutomationBackend, Detector, FixApplication, FixRequest, UndoResult,
};
use mcp_document_remediation::config::{
    BackendConfig, Config, DatabaseConfig, LogFormat, LoggingConfig, RequestConfig,
};
use mcp_document_remediation::error::BackendResult;
use mcp_document_remediation::remediation::{Collaborators, FixId, RemediationConfig, Violation};
use mcp_document_remediation::storage::SqliteStorage;
use mcp_document_remediation::{AppState, McpServer};

struct CleanDetector;

#[async_trait]
impl Detector for CleanDetector {
    async fn detect(&self, _document_ref: &str) -> BackendResult<Vec<Violation>> {
        Ok(Vec::new())
    }
}

struct SlowBackend(Duration);

#[async_trait]
impl AutomationBackend for SlowBackend {
    async fn apply_fix(&self, _request: &FixRequest) -> BackendResult<FixApplication> {
        tokio::time::sleep(self.0).await;
        Ok(FixApplication::applied(self.0.as_millis() as u64))
    }

    async fn undo_fix(&self, _document_ref: &str, _fix_id: &FixId) -> BackendResult<UndoResult> {
        Ok(UndoResult { success: true })
    }
}

fn test_config() -> Config {
    Config {
        backend: BackendConfig {
            automation_url: "http://127.0.0.1:8012".to_string(),
            detector_url: "http://127.0.0.1:8012".to_string(),
            api_key: None,
        },
        database: DatabaseConfig {
            path: PathBuf::from(":memory:"),
            max_connections: 1,
        },
        logging: LoggingConfig {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        },
        request: RequestConfig::default(),
        remediation: RemediationConfig::default(),
    }
}

async fn create_server(apply_delay: Duration) -> McpServer {
    let storage = SqliteStorage::new_in_memory()
        .await
        .expect("Failed to create in-memory storage");
    let collaborators =
        Collaborators::new(Arc::new(CleanDetector), Arc::new(SlowBackend(apply_delay)));
    McpServer::new(Arc::new(AppState::new(test_config(), storage, collaborators)))
}

/// Send one tools/call and return the result object.
async fn call_tool(server: &McpServer, id: u64, name: &str, arguments: Value) -> Value {
    let request = json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": "tools/call",
        "params": {"name": name, "arguments": arguments}
    });
    let response = server
        .handle_message(&request.to_string())
        .await
        .expect("tools/call always gets a response");
    assert_valid_jsonrpc_response(&serde_json::to_value(&response).unwrap());
    response.result.expect("tool errors are reported in the result")
}

fn tool_body(result: &Value) -> Value {
    let text = result["content"][0]["text"].as_str().unwrap();
    serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
}

/// Verify JSON-RPC 2.0 response structure
fn assert_valid_jsonrpc_response(response: &Value) {
    assert_eq!(response["jsonrpc"], "2.0", "Invalid JSON-RPC version");
    assert!(
        response.get("result").is_some() || response.get("error").is_some(),
        "Response must have result or error"
    );
}

fn colors(count: usize) -> Value {
    let items: Vec<Value> = (1..=count)
        .map(|i| {
            json!({
                "id": format!("v{}", i),
                "type": "forbidden_color",
                "severity": "critical",
                "location": format!("page:{}", i)
            })
        })
        .collect();
    Value::Array(items)
}

#[cfg(test)]
mod handshake_tests {
    use super::*;

    #[tokio::test]
    async fn test_initialize_then_list_tools() {
        let server = create_server(Duration::ZERO).await;

        let init = server
            .handle_message(
                &json!({
                    "jsonrpc": "2.0",
                    "id": 1,
                    "method": "initialize",
                    "params": {
                        "protocolVersion": "2024-11-05",
                        "capabilities": {},
                        "clientInfo": {"name": "test-client", "version": "1.0.0"}
                    }
                })
                .to_string(),
            )
            .await
            .unwrap();
        let init = serde_json::to_value(&init).unwrap();
        assert_valid_jsonrpc_response(&init);
        assert_eq!(init["result"]["capabilities"]["tools"]["listChanged"], false);

        let list = server
            .handle_message(r#"{"jsonrpc":"2.0","id":2,"method":"tools/list"}"#)
            .await
            .unwrap();
        let list = serde_json::to_value(&list).unwrap();
        let names: Vec<&str> = list["result"]["tools"]
            .as_array()
            .unwrap()
            .iter()
            .map(|t| t["name"].as_str().unwrap())
            .collect();
        assert!(names.contains(&"remediation_start"));
        assert!(names.contains(&"remediation_cancel"));
    }

    #[tokio::test]
    async fn test_ping() {
        let server = create_server(Duration::ZERO).await;
        let response = server
            .handle_message(r#"{"jsonrpc":"2.0","id":"p","method":"ping"}"#)
            .await
            .unwrap();
        assert_eq!(response.id, json!("p"));
        assert_eq!(response.result, Some(json!({})));
    }
}

#[cfg(test)]
mod session_tool_tests {
    use super::*;

    #[tokio::test]
    async fn test_start_poll_and_cancel() {
        let server = create_server(Duration::from_millis(100)).await;

        let started = call_tool(
            &server,
            1,
            "remediation_start",
            json!({"document_ref": "catalog.indd", "violations": colors(6)}),
        )
        .await;
        assert!(started.get("isError").is_none());
        let session = tool_body(&started);
        assert_eq!(session["status"], "running");
        assert_eq!(session["outcome"], "in_progress");
        let session_id = session["session_id"].as_str().unwrap().to_string();

        // A second session on the same document is refused
        let competing = call_tool(
            &server,
            2,
            "remediation_start",
            json!({"document_ref": "catalog.indd", "violations": colors(1)}),
        )
        .await;
        assert_eq!(competing["isError"], true);
        assert!(tool_body(&competing)
            .as_str()
            .unwrap()
            .contains("already running"));

        tokio::time::sleep(Duration::from_millis(150)).await;
        let cancelled = tool_body(
            &call_tool(&server, 3, "remediation_cancel", json!({"session_id": session_id})).await,
        );
        assert_eq!(cancelled["accepted"], true);

        // Cancellation lands before the next fix; poll until the session settles
        let mut status = Value::Null;
        for attempt in 0..50 {
            status = tool_body(
                &call_tool(
                    &server,
                    10 + attempt,
                    "remediation_status",
                    json!({"session_id": session_id}),
                )
                .await,
            );
            if status["status"] != "running" {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        assert_eq!(status["status"], "aborted");
        assert_eq!(status["outcome"], "aborted");
        assert_eq!(status["failure_reason"], "Session cancelled");
        assert!(status["records"].as_array().unwrap().len() < 6);
    }

    #[tokio::test]
    async fn test_start_rejects_empty_document_ref() {
        let server = create_server(Duration::ZERO).await;
        let result = call_tool(&server, 1, "remediation_start", json!({"document_ref": "  "})).await;

        assert_eq!(result["isError"], true);
        assert!(tool_body(&result)
            .as_str()
            .unwrap()
            .contains("document_ref must not be empty"));
    }

    #[tokio::test]
    async fn test_overrides_reach_the_session() {
        let server = create_server(Duration::ZERO).await;
        let result = call_tool(
            &server,
            1,
            "remediation_start",
            json!({
                "document_ref": "poster.indd",
                "violations": colors(4),
                "overrides": {"max_fixes_per_run": 2},
                "wait": true
            }),
        )
        .await;

        let session = tool_body(&result);
        assert_eq!(session["status"], "completed");
        assert_eq!(session["plan"]["deferred_count"], 2);
        assert_eq!(session["records"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_strategy_stats_empty_without_history() {
        let server = create_server(Duration::ZERO).await;
        let result = call_tool(&server, 1, "remediation_strategy_stats", json!({})).await;
        assert_eq!(tool_body(&result)["strategies"], json!([]));
    }
}
