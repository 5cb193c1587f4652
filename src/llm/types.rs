//! LLM request types and the client error.

use base64::Engine;
use std::time::Duration;

use super::prompts;
use crate::config::LlmConfig;
use crate::ocr::ImageKind;

/// The original upload, forwarded to vision-capable models.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachedImage {
    pub kind: ImageKind,
    pub data: Vec<u8>,
}

impl AttachedImage {
    pub fn new(kind: ImageKind, data: Vec<u8>) -> Self {
        Self { kind, data }
    }

    pub fn to_base64(&self) -> String {
        base64::engine::general_purpose::STANDARD.encode(&self.data)
    }

    /// `data:image/png;base64,...`
    pub fn data_uri(&self) -> String {
        format!("data:{};base64,{}", self.kind.mime_type(), self.to_base64())
    }
}

/// Composed payload for one inference call. Built once, never mutated.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisRequest {
    /// Recognized text, verbatim. May be empty.
    pub extracted_text: String,
    pub instruction: String,
    pub instruction_is_default: bool,
    pub ocr_confidence: f32,
    pub has_table: bool,
    pub has_code: bool,
    pub raw_image: Option<AttachedImage>,
}

impl AnalysisRequest {
    /// The user turn sent to the model.
    pub fn user_message(&self) -> String {
        prompts::build_user_message(
            &self.extracted_text,
            self.ocr_confidence,
            self.has_table,
            self.has_code,
            self.raw_image.is_some(),
            &self.instruction,
        )
    }
}

/// Sampling knobs shared by every backend.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationOptions {
    pub temperature: Option<f32>,
    pub seed: Option<i64>,
    pub max_tokens: u32,
}

impl From<&LlmConfig> for GenerationOptions {
    fn from(config: &LlmConfig) -> Self {
        Self {
            temperature: config.temperature,
            seed: config.seed,
            max_tokens: config.max_tokens,
        }
    }
}

/// Token counts reported by the backend, when it reports them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenUsage {
    pub input: u64,
    pub output: u64,
}

impl TokenUsage {
    pub fn log(&self) {
        if self.input > 0 || self.output > 0 {
            log::info!("[LLM] Input tokens: {}", self.input);
            log::info!("[LLM] Output tokens: {}", self.output);
        }
    }
}

/// LLM client failures. No variant is retried by the client itself.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    /// Connection refused, DNS failure, a dropped stream, or a 502/503/504.
    #[error("inference service unreachable: {0}")]
    ServiceUnavailable(String),
    #[error("no response within {}s", .0.as_secs())]
    Timeout(Duration),
    /// The service answered, but not with usable text.
    #[error("{0}")]
    ModelResponse(String),
}
