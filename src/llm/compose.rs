//! Prompt composer: recognition result + instruction into one request.

use super::prompts::DEFAULT_INSTRUCTION;
use super::types::{AnalysisRequest, AttachedImage};
use crate::ocr::RecognitionResult;

#[derive(Debug, Clone, Copy, Default)]
pub struct PromptComposer {
    /// Forward the original image to the model alongside the OCR text.
    pub attach_image: bool,
}

impl PromptComposer {
    pub fn new(attach_image: bool) -> Self {
        Self { attach_image }
    }

    /// Never fails. An empty or whitespace-only instruction is replaced by
    /// `DEFAULT_INSTRUCTION`; anything else passes through unmodified.
    pub fn compose(
        &self,
        recognition: &RecognitionResult,
        instruction: &str,
        image: Option<AttachedImage>,
    ) -> AnalysisRequest {
        let use_default = instruction.trim().is_empty();
        let instruction = if use_default {
            DEFAULT_INSTRUCTION.to_string()
        } else {
            instruction.to_string()
        };

        AnalysisRequest {
            extracted_text: recognition.text.clone(),
            instruction,
            instruction_is_default: use_default,
            ocr_confidence: recognition.confidence,
            has_table: recognition.has_table,
            has_code: recognition.has_code,
            raw_image: if self.attach_image { image } else { None },
        }
    }
}
