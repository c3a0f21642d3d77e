//! Server module for MCP protocol handling.
//!
//! This module provides:
//! - MCP server implementation over stdio
//! - Tool call handlers and routing
//! - Shared application state management

mod handlers;
mod mcp;

pub use handlers::*;
pub use mcp::*;

use std::sync::Arc;

use crate::backend::{HttpAutomationBackend, HttpDetector};
use crate::config::Config;
use crate::error::AppResult;
use crate::remediation::{Collaborators, RemediationStorage, SessionCoordinator, StrategyStats};
use crate::storage::SqliteStorage;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Config,
    /// Strategy statistics and session archive.
    pub storage: RemediationStorage,
    /// Runs remediation sessions.
    pub coordinator: SessionCoordinator,
}

impl AppState {
    /// Create application state around explicit collaborators.
    pub fn new(config: Config, storage: SqliteStorage, collaborators: Collaborators) -> Self {
        let storage = RemediationStorage::new(storage);
        let stats = StrategyStats::new(Arc::new(storage.clone()));
        let coordinator =
            SessionCoordinator::new(config.remediation.clone(), collaborators, stats)
                .with_archive(Arc::new(storage.clone()));

        tracing::info!(
            automation_url = %config.backend.automation_url,
            detector_url = %config.backend.detector_url,
            max_concurrent_sessions = config.remediation.session.max_concurrent_sessions,
            "AppState initialized"
        );

        Self {
            config,
            storage,
            coordinator,
        }
    }

    /// Create application state talking to the HTTP bridge.
    pub fn from_config(config: Config, storage: SqliteStorage) -> AppResult<Self> {
        let detector = HttpDetector::new(&config.backend, &config.request)?;
        let backend = HttpAutomationBackend::new(&config.backend, &config.request)?;
        let collaborators = Collaborators::new(Arc::new(detector), Arc::new(backend));
        Ok(Self::new(config, storage, collaborators))
    }
}

/// Shared application state handle
pub type SharedState = Arc<AppState>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BackendConfig, DatabaseConfig, LogFormat, LoggingConfig, RequestConfig};
    use crate::remediation::{RemediationConfig, StrategyStore};
    use std::path::PathBuf;

    fn create_test_config() -> Config {
        Config {
            backend: BackendConfig {
                automation_url: "http://127.0.0.1:8012".to_string(),
                detector_url: "http://127.0.0.1:8013".to_string(),
                api_key: None,
            },
            database: DatabaseConfig {
                path: PathBuf::from(":memory:"),
                max_connections: 5,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                format: LogFormat::Pretty,
            },
            request: RequestConfig::default(),
            remediation: RemediationConfig::default(),
        }
    }

    #[tokio::test]
    async fn test_app_state_from_config() {
        let storage = SqliteStorage::new_in_memory().await.unwrap();
        let state = AppState::from_config(create_test_config(), storage).unwrap();

        assert_eq!(state.config.backend.detector_url, "http://127.0.0.1:8013");
        assert!(state.coordinator.list_sessions().await.is_empty());
    }

    #[tokio::test]
    async fn test_coordinator_shares_storage() {
        let storage = SqliteStorage::new_in_memory().await.unwrap();
        let state = AppState::from_config(create_test_config(), storage).unwrap();

        state
            .coordinator
            .strategy_stats()
            .update("color_correction", |stat| stat.sample_count = 3)
            .await
            .unwrap();

        let stored = state.storage.load("color_correction").await.unwrap().unwrap();
        assert_eq!(stored.sample_count, 3);
    }
}
