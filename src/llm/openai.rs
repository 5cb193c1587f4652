//! OpenAI-compatible backend: `/v1/chat/completions`.
//!
//! Works against api.openai.com and self-hosted compatible servers
//! (vLLM, LM Studio, llama.cpp server). Key differences from Ollama:
//! - SSE `data:` events instead of NDJSON, terminated by `[DONE]`; a close
//!   without `[DONE]` is accepted only after a `finish_reason`
//! - Text chunks in `choices[0].delta.content`
//! - Images as `image_url` content parts carrying a data URI
//! - Token usage only arrives when `stream_options.include_usage` is set

use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::connection::LlmConnection;
use super::prompts::SYSTEM_PROMPT;
use super::provider::{status_error, transport_error, LlmClient};
use super::streaming::SseBuffer;
use super::types::{AnalysisRequest, GenerationOptions, LlmError, TokenUsage};
use crate::config::LlmConfig;

pub struct OpenAiClient {
    connection: Arc<LlmConnection>,
    base_url: String,
    model: String,
    api_key: Option<String>,
    options: GenerationOptions,
    stream: bool,
    timeout: Duration,
}

impl OpenAiClient {
    pub fn from_config(config: &LlmConfig, connection: Arc<LlmConnection>) -> Self {
        Self {
            connection,
            base_url: config.resolved_base_url(),
            model: config.model.clone(),
            api_key: config.api_key.clone().filter(|k| !k.is_empty()),
            options: GenerationOptions::from(config),
            stream: config.stream,
            timeout: config.timeout(),
        }
    }

    /// Accepts base URLs with or without the `/v1` suffix.
    fn endpoint(&self) -> String {
        if self.base_url.ends_with("/v1") {
            format!("{}/chat/completions", self.base_url)
        } else {
            format!("{}/v1/chat/completions", self.base_url)
        }
    }

    fn build_body(&self, request: &AnalysisRequest) -> serde_json::Value {
        let user_message = request.user_message();
        let user_content = match &request.raw_image {
            Some(image) => serde_json::json!([
                { "type": "text", "text": user_message },
                { "type": "image_url", "image_url": { "url": image.data_uri() } }
            ]),
            None => serde_json::Value::String(user_message),
        };

        let mut body = serde_json::json!({
            "model": self.model,
            "max_tokens": self.options.max_tokens,
            "stream": self.stream,
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                { "role": "user", "content": user_content }
            ]
        });
        if let Some(t) = self.options.temperature {
            body["temperature"] = serde_json::json!(t);
        }
        if let Some(seed) = self.options.seed {
            body["seed"] = serde_json::json!(seed);
        }
        if self.stream {
            body["stream_options"] = serde_json::json!({ "include_usage": true });
        }
        body
    }
}

/// One decoded SSE `data:` payload.
#[derive(Debug, Default)]
struct StreamEvent {
    delta: Option<String>,
    /// The server set `finish_reason`; the answer is complete.
    finished: bool,
    usage: Option<TokenUsage>,
}

fn parse_stream_event(data: &str) -> Result<StreamEvent, LlmError> {
    let json: serde_json::Value = serde_json::from_str(data)
        .map_err(|e| LlmError::ModelResponse(format!("undecodable stream event: {}", e)))?;
    if let Some(error) = json.get("error") {
        let message = error["message"].as_str().unwrap_or("unknown error");
        return Err(LlmError::ModelResponse(message.to_string()));
    }
    let choice = &json["choices"][0];
    Ok(StreamEvent {
        delta: choice["delta"]["content"].as_str().map(str::to_string),
        finished: !choice["finish_reason"].is_null(),
        usage: parse_usage(&json),
    })
}

fn parse_usage(json: &serde_json::Value) -> Option<TokenUsage> {
    let usage = json.get("usage").filter(|u| u.is_object())?;
    Some(TokenUsage {
        input: usage["prompt_tokens"].as_u64().unwrap_or(0),
        output: usage["completion_tokens"].as_u64().unwrap_or(0),
    })
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn infer(&self, request: &AnalysisRequest) -> Result<String, LlmError> {
        let client = self.connection.handle().await?;
        let body = self.build_body(request);

        log::info!(
            "[LLM] openai {} (stream={}, image={})",
            self.model,
            self.stream,
            request.raw_image.is_some()
        );
        let start = Instant::now();

        let mut builder = client
            .post(self.endpoint())
            .timeout(self.timeout)
            .header("content-type", "application/json");
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        let mut response = builder
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error(e, self.timeout))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            log::error!("[LLM] API returned {}: {}", status, body.trim());
            return Err(status_error(status, &body));
        }
        log::info!("[LLM] TTFB: {}ms", start.elapsed().as_millis());

        let mut text = String::new();
        let mut usage = TokenUsage::default();

        if self.stream {
            let mut events = SseBuffer::default();
            let mut done = false;
            let mut finish_seen = false;
            let mut ttft_logged = false;

            'read: while let Some(chunk) = response
                .chunk()
                .await
                .map_err(|e| transport_error(e, self.timeout))?
            {
                for data in events.push(&chunk) {
                    if data.trim() == "[DONE]" {
                        done = true;
                        break 'read;
                    }
                    let event = parse_stream_event(&data)?;
                    finish_seen |= event.finished;
                    if let Some(delta) = event.delta {
                        if !ttft_logged && !delta.is_empty() {
                            log::info!("[LLM] TTFT: {}ms", start.elapsed().as_millis());
                            ttft_logged = true;
                        }
                        text.push_str(&delta);
                    }
                    if let Some(u) = event.usage {
                        usage = u;
                    }
                }
            }
            if !done {
                if let Some(data) = events.finish() {
                    if data.trim() == "[DONE]" {
                        done = true;
                    } else {
                        let event = parse_stream_event(&data)?;
                        finish_seen |= event.finished;
                        text.push_str(event.delta.as_deref().unwrap_or(""));
                    }
                }
            }
            if !done {
                // Some compatible servers close the stream without [DONE]
                // once finish_reason is sent. Anything else was cut short.
                if !finish_seen {
                    log::error!(
                        "[LLM] Stream closed after {} chars with no finish_reason",
                        text.len()
                    );
                    return Err(LlmError::ModelResponse(
                        "stream ended before the final chunk".to_string(),
                    ));
                }
                log::warn!("[LLM] Stream closed without [DONE]");
            }
        } else {
            let json: serde_json::Value = response
                .json()
                .await
                .map_err(|e| transport_error(e, self.timeout))?;
            if let Some(content) = json["choices"][0]["message"]["content"].as_str() {
                text.push_str(content);
            }
            if let Some(u) = parse_usage(&json) {
                usage = u;
            }
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
        "openai"
    }
}
