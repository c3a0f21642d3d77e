use std::env;
use std::path::PathBuf;

use crate::error::AppError;
use crate::remediation::RemediationConfig;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub backend: BackendConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub request: RequestConfig,
    pub remediation: RemediationConfig,
}

/// Document automation bridge configuration
#[derive(Debug, Clone)]
pub struct BackendConfig {
    /// Base URL of the automation backend (applies and undoes fixes)
    pub automation_url: String,
    /// Base URL of the violation detector
    pub detector_url: String,
    /// Optional bearer token sent with every bridge call
    pub api_key: Option<String>,
}

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub path: PathBuf,
    pub max_connections: u32,
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

/// Log output format
#[derive(Debug, Clone, PartialEq)]
pub enum LogFormat {
    Pretty,
    Json,
}

/// HTTP request configuration
#[derive(Debug, Clone)]
pub struct RequestConfig {
    pub timeout_ms: u64,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, AppError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let automation_url = env::var("AUTOMATION_BASE_URL")
            .unwrap_or_else(|_| "http://127.0.0.1:8012".to_string());
        let backend = BackendConfig {
            detector_url: env::var("DETECTOR_BASE_URL").unwrap_or_else(|_| automation_url.clone()),
            automation_url,
            api_key: env::var("BACKEND_API_KEY").ok().filter(|k| !k.is_empty()),
        };

        for url in [&backend.automation_url, &backend.detector_url] {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(AppError::Config {
                    message: format!("Bridge URL must be http(s): {}", url),
                });
            }
        }

        let database = DatabaseConfig {
            path: PathBuf::from(
                env::var("DATABASE_PATH").unwrap_or_else(|_| "./data/remediation.db".to_string()),
            ),
            max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(5),
        };

        let logging = LoggingConfig {
            level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            format: match env::var("LOG_FORMAT")
                .unwrap_or_else(|_| "pretty".to_string())
                .to_lowercase()
                .as_str()
            {
                "json" => LogFormat::Json,
                _ => LogFormat::Pretty,
            },
        };

        let request = RequestConfig {
            timeout_ms: env::var("REQUEST_TIMEOUT_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(30000),
        };

        Ok(Config {
            backend,
            database,
            logging,
            request,
            remediation: RemediationConfig::from_env(),
        })
    }
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self { timeout_ms: 30000 }
    }
}
