//! Ollama backend: `/api/chat` on a local or remote daemon.
//!
//! Streaming responses are NDJSON: each line carries a `message.content`
//! fragment, the last one has `done: true` and the token counts.
//! Attached images travel as base64 strings in `messages[].images`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::connection::LlmConnection;
use super::prompts::SYSTEM_PROMPT;
use super::provider::{status_error, transport_error, LlmClient};
use super::streaming::NdjsonBuffer;
use super::types::{AnalysisRequest, GenerationOptions, LlmError, TokenUsage};
use crate::config::LlmConfig;

pub struct OllamaClient {
    connection: Arc<LlmConnection>,
    base_url: String,
    model: String,
    options: GenerationOptions,
    stream: bool,
    timeout: Duration,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    stream: bool,
    options: ChatOptions,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    images: Vec<String>,
}

#[derive(Serialize)]
struct ChatOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    seed: Option<i64>,
    num_predict: u32,
}

/// One NDJSON line, or the whole body when not streaming.
#[derive(Deserialize)]
struct ChatChunk {
    message: Option<ResponseMessage>,
    #[serde(default)]
    done: bool,
    error: Option<String>,
    prompt_eval_count: Option<u64>,
    eval_count: Option<u64>,
}

#[derive(Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: String,
}

impl OllamaClient {
    pub fn from_config(config: &LlmConfig, connection: Arc<LlmConnection>) -> Self {
        Self {
            connection,
            base_url: config.resolved_base_url(),
            model: config.model.clone(),
            options: GenerationOptions::from(config),
            stream: config.stream,
            timeout: config.timeout(),
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/api/chat", self.base_url)
    }

    /// Fold one chunk into the answer. Returns true on the final chunk.
    fn absorb(line: &str, text: &mut String, usage: &mut TokenUsage) -> Result<bool, LlmError> {
        let chunk: ChatChunk = serde_json::from_str(line).map_err(|e| {
            LlmError::ModelResponse(format!("undecodable response chunk: {}", e))
        })?;
        if let Some(error) = chunk.error {
            return Err(LlmError::ModelResponse(error));
        }
        if let Some(message) = chunk.message {
            text.push_str(&message.content);
        }
        if chunk.done {
            usage.input = chunk.prompt_eval_count.unwrap_or(0);
            usage.output = chunk.eval_count.unwrap_or(0);
        }
        Ok(chunk.done)
    }
}

#[async_trait]
impl LlmClient for OllamaClient {
    async fn infer(&self, request: &AnalysisRequest) -> Result<String, LlmError> {
        let client = self.connection.handle().await?;
        let user_message = request.user_message();

        let body = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                    images: Vec::new(),
                },
                ChatMessage {
                    role: "user",
                    content: &user_message,
                    images: request.raw_image.iter().map(|i| i.to_base64()).collect(),
                },
            ],
            stream: self.stream,
            options: ChatOptions {
                temperature: self.options.temperature,
                seed: self.options.seed,
                num_predict: self.options.max_tokens,
            },
        };

        log::info!(
            "[LLM] ollama {} (stream={}, image={})",
            self.model,
            self.stream,
            request.raw_image.is_some()
        );
        let start = Instant::now();

        let mut response = client
            .post(self.endpoint())
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error(e, self.timeout))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            log::error!("[LLM] Ollama returned {}: {}", status, body.trim());
            return Err(status_error(status, &body));
        }
        log::info!("[LLM] TTFB: {}ms", start.elapsed().as_millis());

        let mut text = String::new();
        let mut usage = TokenUsage::default();
        let mut done = false;

        if self.stream {
            let mut lines = NdjsonBuffer::default();
            while let Some(chunk) = response
                .chunk()
                .await
                .map_err(|e| transport_error(e, self.timeout))?
            {
                for line in lines.push(&chunk) {
                    done |= Self::absorb(&line, &mut text, &mut usage)?;
                }
                if done {
                    break;
                }
            }
            if !done {
                if let Some(line) = lines.finish() {
                    done = Self::absorb(&line, &mut text, &mut usage)?;
                }
            }
            if !done {
                return Err(LlmError::ModelResponse(
                    "stream ended before the final chunk".to_string(),
                ));
            }
        } else {
            let raw = response
                .text()
                .await
                .map_err(|e| transport_error(e, self.timeout))?;
            Self::absorb(&raw, &mut text, &mut usage)?;
        }

        log::info!("[LLM] Complete: {}ms", start.elapsed().as_millis());
        usage.log();

        let text = text.trim();
        if text.is_empty() {
            return Err(LlmError::ModelResponse("model returned no text".to_string()));
        }
        Ok(text.to_string())
    }

    fn name(&self) -> &str {
        "ollama"
    }
}
