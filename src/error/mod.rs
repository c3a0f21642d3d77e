use thiserror::Error;

/// Application-level errors
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("MCP protocol error: {0}")]
    Mcp(#[from] McpError),
}

/// Storage layer errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database connection failed: {message}")]
    Connection { message: String },

    #[error("Migration failed: {message}")]
    Migration { message: String },

    #[error("Serialization failed: {message}")]
    Serialization { message: String },

    #[error("SQLx error: {0}")]
    Sqlx(#[from] sqlx::Error),
}

/// Errors raised by the external Detector and Automation Backend collaborators
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("Backend unavailable: {message}")]
    Unavailable { message: String },

    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    #[error("Invalid response: {message}")]
    InvalidResponse { message: String },

    #[error("Request timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// MCP protocol errors
#[derive(Debug, Error)]
pub enum McpError {
    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    #[error("Unknown tool: {tool_name}")]
    UnknownTool { tool_name: String },

    #[error("Invalid parameters for {tool_name}: {message}")]
    InvalidParameters { tool_name: String, message: String },

    #[error("Tool execution failed: {message}")]
    ExecutionFailed { message: String },

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for application errors
pub type AppResult<T> = Result<T, AppError>;

/// Result type alias for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Result type alias for Detector / Automation Backend calls
pub type BackendResult<T> = Result<T, BackendError>;

/// Result type alias for MCP operations
pub type McpResult<T> = Result<T, McpError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_error_display() {
        let err = AppError::Config {
            message: "missing key".to_string(),
        };
        assert_eq!(err.to_string(), "Configuration error: missing key");
    }

    #[test]
    fn test_storage_error_display() {
        let err = StorageError::Serialization {
            message: "bad plan json".to_string(),
        };
        assert_eq!(err.to_string(), "Serialization failed: bad plan json");

        let err = StorageError::Migration {
            message: "version mismatch".to_string(),
        };
        assert_eq!(err.to_string(), "Migration failed: version mismatch");
    }

    #[test]
    fn test_backend_error_display() {
        let err = BackendError::Unavailable {
            message: "connection refused".to_string(),
        };
        assert_eq!(err.to_string(), "Backend unavailable: connection refused");

        let err = BackendError::Api {
            status: 422,
            message: "frame locked".to_string(),
        };
        assert_eq!(err.to_string(), "API error: 422 - frame locked");

        let err = BackendError::Timeout { timeout_ms: 30000 };
        assert_eq!(err.to_string(), "Request timeout after 30000ms");
    }

    #[test]
    fn test_mcp_error_display() {
        let err = McpError::UnknownTool {
            tool_name: "nonexistent".to_string(),
        };
        assert_eq!(err.to_string(), "Unknown tool: nonexistent");

        let err = McpError::InvalidParameters {
            tool_name: "remediation_start".to_string(),
            message: "missing document_ref".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Invalid parameters for remediation_start: missing document_ref"
        );
    }

    #[test]
    fn test_storage_error_conversion_to_app_error() {
        let storage_err = StorageError::Connection {
            message: "locked".to_string(),
        };
        let app_err: AppError = storage_err.into();
        assert!(matches!(app_err, AppError::Storage(_)));
        assert_eq!(app_err.to_string(), "Storage error: Database connection failed: locked");
    }

    #[test]
    fn test_backend_error_conversion_to_app_error() {
        let backend_err = BackendError::Timeout { timeout_ms: 1000 };
        let app_err: AppError = backend_err.into();
        assert!(matches!(app_err, AppError::Backend(_)));
    }
}
