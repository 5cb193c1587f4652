//! LLM provider trait: common interface for all inference backends.
//!
//! Each backend implements `LlmClient`. The pipeline holds one behind an
//! `Arc<dyn LlmClient>` and never knows which service is on the other end.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use super::connection::LlmConnection;
use super::ollama::OllamaClient;
use super::openai::OpenAiClient;
use super::types::{AnalysisRequest, LlmError};
use crate::config::{LlmConfig, DEFAULT_OPENAI_URL};

#[async_trait]
pub trait LlmClient: Send + Sync {
    /// One inference call. Returns the whole answer, trimmed.
    async fn infer(&self, request: &AnalysisRequest) -> Result<String, LlmError>;

    fn name(&self) -> &str;
}

/// Supported inference backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    /// Local Ollama daemon (`/api/chat`).
    #[default]
    Ollama,
    /// Any OpenAI-compatible `/v1/chat/completions` endpoint.
    OpenAi,
}

impl Provider {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "ollama" => Some(Provider::Ollama),
            "openai" | "openai-compatible" | "openai_compatible" => Some(Provider::OpenAi),
            _ => None,
        }
    }

    pub fn id(&self) -> &'static str {
        match self {
            Provider::Ollama => "ollama",
            Provider::OpenAi => "openai",
        }
    }

    /// False when the hosted OpenAI endpoint is selected without a key.
    /// Self-hosted compatible servers usually need none.
    pub fn is_configured(&self, config: &LlmConfig) -> bool {
        match self {
            Provider::Ollama => true,
            Provider::OpenAi => {
                config.api_key.as_deref().is_some_and(|k| !k.is_empty())
                    || config.resolved_base_url() != DEFAULT_OPENAI_URL
            }
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.id())
    }
}

/// Build the client for the configured provider on a shared connection.
pub fn build_client(config: &LlmConfig, connection: Arc<LlmConnection>) -> Arc<dyn LlmClient> {
    let provider = config.provider;
    if !provider.is_configured(config) {
        log::warn!(
            "[LLM] {} selected but OPENAI_API_KEY is not set; requests will likely be rejected",
            provider
        );
    }
    log::info!(
        "[LLM] Provider: {}, model: {}, endpoint: {}",
        provider,
        config.model,
        config.resolved_base_url()
    );
    match provider {
        Provider::Ollama => Arc::new(OllamaClient::from_config(config, connection)),
        Provider::OpenAi => Arc::new(OpenAiClient::from_config(config, connection)),
    }
}

/// Map a transport failure onto the client taxonomy.
pub(crate) fn transport_error(e: reqwest::Error, limit: Duration) -> LlmError {
    if e.is_timeout() {
        LlmError::Timeout(limit)
    } else if e.is_connect() {
        LlmError::ServiceUnavailable(e.to_string())
    } else if e.is_decode() || e.is_body() {
        LlmError::ModelResponse(format!("response body could not be read: {}", e))
    } else {
        LlmError::ServiceUnavailable(e.to_string())
    }
}

/// Describe a non-success response, preferring the server's own error text.
pub(crate) fn status_error(status: reqwest::StatusCode, body: &str) -> LlmError {
    let detail = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|json| {
            let error = json.get("error")?;
            error
                .as_str()
                .or_else(|| error.get("message").and_then(|m| m.as_str()))
                .map(str::to_string)
        })
        .unwrap_or_else(|| body.trim().chars().take(300).collect());
    let message = format!("HTTP {}: {}", status.as_u16(), detail);
    match status {
        // Gateway and overload answers say nothing about the request itself.
        reqwest::StatusCode::BAD_GATEWAY
        | reqwest::StatusCode::SERVICE_UNAVAILABLE
        | reqwest::StatusCode::GATEWAY_TIMEOUT => LlmError::ServiceUnavailable(message),
        _ => LlmError::ModelResponse(message),
    }
}
