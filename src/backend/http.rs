use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, info};

use super::{AutomationBackend, Detector, FixApplication, FixRequest, UndoResult};
use crate::config::{BackendConfig, RequestConfig};
use crate::error::{BackendError, BackendResult};
use crate::remediation::{FixId, Violation};

/// JSON client for the document automation bridge
#[derive(Clone)]
pub struct BridgeClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    timeout_ms: u64,
}

impl BridgeClient {
    /// Create a new bridge client
    pub fn new(
        base_url: &str,
        api_key: Option<String>,
        request_config: &RequestConfig,
    ) -> BackendResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(request_config.timeout_ms))
            .build()
            .map_err(BackendError::Http)?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            timeout_ms: request_config.timeout_ms,
        })
    }

    /// POST a JSON body and decode the JSON response
    pub async fn post_json<B, R>(&self, path: &str, body: &B) -> BackendResult<R>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, path);
        let start = Instant::now();

        let mut request = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .json(body);
        if let Some(key) = &self.api_key {
            request = request.header("Authorization", format!("Bearer {}", key));
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                BackendError::Timeout {
                    timeout_ms: self.timeout_ms,
                }
            } else if e.is_connect() {
                BackendError::Unavailable {
                    message: format!("{}: {}", url, e),
                }
            } else {
                BackendError::Http(e)
            }
        })?;

        let status = response.status();
        debug!(
            url = %url,
            status = status.as_u16(),
            latency_ms = start.elapsed().as_millis(),
            "Bridge call returned"
        );

        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            return Err(BackendError::Api {
                status: status.as_u16(),
                message: error_body,
            });
        }

        response
            .json()
            .await
            .map_err(|e| BackendError::InvalidResponse {
                message: format!("Failed to parse response from {}: {}", path, e),
            })
    }

    /// Get the base URL (for testing)
    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

// ============================================================================
// Automation Backend
// ============================================================================

#[derive(Serialize)]
struct UndoRequest<'a> {
    document_ref: &'a str,
    fix_id: &'a FixId,
}

/// Automation backend reached over the HTTP bridge
#[derive(Clone)]
pub struct HttpAutomationBackend {
    client: BridgeClient,
}

impl HttpAutomationBackend {
    /// Create a backend client from configuration
    pub fn new(config: &BackendConfig, request_config: &RequestConfig) -> BackendResult<Self> {
        let client = BridgeClient::new(
            &config.automation_url,
            config.api_key.clone(),
            request_config,
        )?;
        info!(base_url = %client.base_url(), "Automation backend client initialized");
        Ok(Self { client })
    }
}

#[async_trait]
impl AutomationBackend for HttpAutomationBackend {
    async fn apply_fix(&self, request: &FixRequest) -> BackendResult<FixApplication> {
        self.client.post_json("/v1/fixes/apply", request).await
    }

    async fn undo_fix(&self, document_ref: &str, fix_id: &FixId) -> BackendResult<UndoResult> {
        self.client
            .post_json(
                "/v1/fixes/undo",
                &UndoRequest {
                    document_ref,
                    fix_id,
                },
            )
            .await
    }
}

// ============================================================================
// Detector
// ============================================================================

#[derive(Serialize)]
struct DetectRequest<'a> {
    document_ref: &'a str,
}

#[derive(Deserialize)]
struct DetectResponse {
    violations: Vec<Violation>,
}

/// Violation detector reached over the HTTP bridge
#[derive(Clone)]
pub struct HttpDetector {
    client: BridgeClient,
}

impl HttpDetector {
    /// Create a detector client from configuration
    pub fn new(config: &BackendConfig, request_config: &RequestConfig) -> BackendResult<Self> {
        let client =
            BridgeClient::new(&config.detector_url, config.api_key.clone(), request_config)?;
        info!(base_url = %client.base_url(), "Detector client initialized");
        Ok(Self { client })
    }
}

#[async_trait]
impl Detector for HttpDetector {
    async fn detect(&self, document_ref: &str) -> BackendResult<Vec<Violation>> {
        let response: DetectResponse = self
            .client
            .post_json("/v1/detect", &DetectRequest { document_ref })
            .await?;
        Ok(response.violations)
    }
}
