//! Error taxonomy for the analysis pipeline.
//!
//! Each stage fails fast with its own error type. The orchestrator tags the
//! failure with the stage it happened in, so the caller can match on the
//! category instead of parsing a message string.

use serde::Serialize;
use std::time::Duration;

use crate::llm::LlmError;

/// A pipeline stage. Used to tag failures and to trace a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Normalizing,
    Recognizing,
    Composing,
    Inferring,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Stage::Normalizing => "normalizing",
            Stage::Recognizing => "recognizing",
            Stage::Composing => "composing",
            Stage::Inferring => "inferring",
        };
        f.write_str(name)
    }
}

/// Bad, corrupt or unsupported input. Always user-correctable.
#[derive(Debug, thiserror::Error)]
pub enum InvalidImageError {
    #[error("image buffer is empty")]
    Empty,
    #[error("unsupported image format (expected PNG or JPEG)")]
    Unsupported,
    #[error("declared format {declared} does not match content ({actual})")]
    FormatMismatch {
        declared: &'static str,
        actual: &'static str,
    },
    #[error("image could not be decoded: {0}")]
    Decode(String),
    #[error("image exceeds the decode limit of {max_pixels} pixels")]
    TooLarge { max_pixels: u64 },
    #[error("image has a zero dimension ({width}x{height})")]
    ZeroDimension { width: u32, height: u32 },
}

/// Model-level failure. "No text found" is NOT an error.
#[derive(Debug, thiserror::Error)]
pub enum RecognitionError {
    #[error("recognition model could not be loaded: {0}")]
    ModelLoad(String),
    #[error("input tensor shape {actual:?} does not match model geometry {expected:?}")]
    Shape {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },
    #[error("model output is malformed: {0}")]
    Output(String),
    #[error("model produced non-finite values at timestep {step}")]
    Numeric { step: usize },
    #[error("class index {index} is outside the {size}-symbol charset")]
    Vocabulary { index: usize, size: usize },
    #[error("inference failed: {0}")]
    Inference(String),
}

/// Configuration could not be loaded or is inconsistent.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {message}")]
    Read { path: String, message: String },
    #[error("invalid config file {path}: {message}")]
    Parse { path: String, message: String },
    #[error("invalid value for {key}: {message}")]
    Invalid { key: &'static str, message: String },
}

/// The five error categories the pipeline can surface.
#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    #[error(transparent)]
    InvalidImage(#[from] InvalidImageError),
    #[error(transparent)]
    Recognition(#[from] RecognitionError),
    #[error("analysis service unavailable: {0}")]
    ServiceUnavailable(String),
    #[error("analysis service did not answer within {}s", .0.as_secs())]
    Timeout(Duration),
    #[error("analysis service returned an unusable response: {0}")]
    ModelResponse(String),
}

impl From<LlmError> for AnalysisError {
    fn from(e: LlmError) -> Self {
        match e {
            LlmError::ServiceUnavailable(msg) => AnalysisError::ServiceUnavailable(msg),
            LlmError::Timeout(limit) => AnalysisError::Timeout(limit),
            LlmError::ModelResponse(msg) => AnalysisError::ModelResponse(msg),
        }
    }
}

impl AnalysisError {
    /// Stable machine-readable category code.
    pub fn category(&self) -> &'static str {
        match self {
            AnalysisError::InvalidImage(_) => "invalid_image",
            AnalysisError::Recognition(_) => "recognition",
            AnalysisError::ServiceUnavailable(_) => "service_unavailable",
            AnalysisError::Timeout(_) => "timeout",
            AnalysisError::ModelResponse(_) => "model_response",
        }
    }

    /// Transient infrastructure failures. Retrying is the caller's call.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AnalysisError::ServiceUnavailable(_) | AnalysisError::Timeout(_)
        )
    }

    /// True when the user can fix the problem by changing the input.
    pub fn is_user_correctable(&self) -> bool {
        matches!(self, AnalysisError::InvalidImage(_))
    }
}

/// A failed analysis run: what went wrong and where.
#[derive(Debug, thiserror::Error)]
#[error("analysis failed while {stage}: {error}")]
pub struct AnalysisFailure {
    pub stage: Stage,
    #[source]
    pub error: AnalysisError,
    /// States visited before the failure, ending with `Failed`.
    pub trace: Vec<crate::pipeline::PipelineState>,
}

impl AnalysisFailure {
    /// Short, category-appropriate message for the presentation layer.
    pub fn user_message(&self) -> String {
        match &self.error {
            AnalysisError::InvalidImage(e) => {
                format!("Could not read the image: {}. Upload a PNG or JPEG file.", e)
            }
            AnalysisError::Recognition(_) => {
                "Text recognition failed on this image. Try a different image.".to_string()
            }
            AnalysisError::ServiceUnavailable(_) => {
                "The analysis service is unavailable. Check that it is running and try again."
                    .to_string()
            }
            AnalysisError::Timeout(limit) => format!(
                "The analysis service did not respond within {} seconds. Try again.",
                limit.as_secs()
            ),
            AnalysisError::ModelResponse(msg) => {
                format!("The analysis service returned an unusable response: {}", msg)
            }
        }
    }
}
