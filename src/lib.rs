//! # MCP Document Remediation Server
//!
//! A Model Context Protocol (MCP) server that remediates brand and layout
//! violations in documents through a closed loop:
//!
//! - **Diagnose**: group violations and flag systemic issues
//! - **Plan**: order fixes by severity, dependencies, and learned risk
//! - **Execute**: apply automated fixes with retries, timeouts, and rollback
//! - **Verify**: re-detect and measure improvement
//! - **Learn**: update per-fix-type success statistics across sessions
//!
//! ## Architecture
//!
//! ```text
//! MCP Client → MCP Server (Rust) → Automation Bridge (HTTP: detect / apply / undo)
//!                    ↓
//!              SQLite (strategy statistics, session history)
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use mcp_document_remediation::{Config, AppState, McpServer};
//! use mcp_document_remediation::storage::SqliteStorage;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_env()?;
//!     let storage = SqliteStorage::new(&config.database).await?;
//!     let state = Arc::new(AppState::from_config(config, storage)?);
//!     let server = McpServer::new(state);
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]

/// Detector, automation backend, and approval interfaces plus the HTTP bridge.
pub mod backend;
/// Configuration management for the MCP server.
pub mod config;
/// Error types and result aliases for the application.
pub mod error;
/// The remediation engine and its session coordinator.
pub mod remediation;
/// MCP server implementation and request handling.
pub mod server;
/// SQLite storage layer for persistence.
pub mod storage;

pub use config::Config;
pub use error::{AppError, AppResult};
pub use server::{AppState, McpServer, SharedState};
