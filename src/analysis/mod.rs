//! External analysis service boundary.
//!
//! The service itself is a black box; this module defines the seam the
//! worker pool calls through (always via the circuit breaker) and an HTTP
//! client implementation for it.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Input handed to the analysis service: the extracted document content
/// plus enough context for the service to do its job.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisInput {
    pub fingerprint: String,
    pub title: String,
    pub text: String,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// What the service produces for one document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub summary: String,
    #[serde(default)]
    pub sections: Vec<String>,
    /// True when this is a fallback substitute, not a real analysis.
    #[serde(default)]
    pub degraded: bool,
}

impl AnalysisResult {
    /// Minimal manually-actionable placeholder used when the service is
    /// unavailable and no cached result exists.
    pub fn placeholder(title: &str) -> Self {
        Self {
            summary: format!("analysis unavailable for '{}'; queued content preserved", title),
            sections: Vec::new(),
            degraded: true,
        }
    }
}

/// Errors from the analysis boundary.
#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    /// The call did not complete within the per-call deadline.
    #[error("analysis timed out after {0:?}")]
    Timeout(Duration),

    /// The service answered with an error, or could not be reached.
    #[error("analysis service error: {0}")]
    Service(String),

    /// Fail-fast from an open circuit; the service was never invoked.
    #[error("analysis service unavailable (circuit open)")]
    Unavailable,
}

/// The external analysis collaborator.
#[async_trait]
pub trait AnalysisService: Send + Sync {
    async fn analyze(&self, input: &AnalysisInput) -> Result<AnalysisResult, AnalysisError>;
}

/// Configuration for the HTTP analysis client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// Endpoint accepting POSTed `AnalysisInput` JSON.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    /// Per-call timeout in seconds, enforced here independent of the breaker.
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,
}

fn default_endpoint() -> String {
    "http://127.0.0.1:8653/analyze".to_string()
}

fn default_call_timeout_secs() -> u64 {
    60
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            call_timeout_secs: default_call_timeout_secs(),
        }
    }
}

/// HTTP client for the analysis service.
pub struct HttpAnalysisClient {
    config: AnalysisConfig,
    client: Client,
}

impl HttpAnalysisClient {
    pub fn new(config: AnalysisConfig) -> Result<Self, AnalysisError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.call_timeout_secs))
            .build()
            .map_err(|e| AnalysisError::Service(e.to_string()))?;
        Ok(Self { config, client })
    }
}

#[async_trait]
impl AnalysisService for HttpAnalysisClient {
    async fn analyze(&self, input: &AnalysisInput) -> Result<AnalysisResult, AnalysisError> {
        debug!(fingerprint = %input.fingerprint, "posting document for analysis");

        let resp = self
            .client
            .post(&self.config.endpoint)
            .json(input)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AnalysisError::Timeout(Duration::from_secs(self.config.call_timeout_secs))
                } else {
                    AnalysisError::Service(e.to_string())
                }
            })?;

        if !resp.status().is_success() {
            return Err(AnalysisError::Service(format!("HTTP {}", resp.status())));
        }

        resp.json::<AnalysisResult>()
            .await
            .map_err(|e| AnalysisError::Service(format!("bad response body: {e}")))
    }
}
