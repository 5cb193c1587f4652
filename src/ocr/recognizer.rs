//! Text recognizer: normalized image in, recognized text out.
//!
//! Wraps a `SequenceModel` and a CTC decoder. A blank page is a valid
//! outcome (empty text, zero confidence); only model-level problems are errors.

use serde::Serialize;
use std::path::Path;
use std::sync::Arc;

use super::charset::Charset;
use super::ctc::{CtcDecoder, Decoded};
use super::heuristics;
use super::model::{OnnxCrnnModel, SequenceModel};
use super::normalize::{InputGeometry, NormalizedImage};
use crate::config::OcrConfig;
use crate::error::RecognitionError;

/// A recognized symbol with its horizontal extent in the normalized image.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecognizedSegment {
    pub symbol: String,
    pub confidence: f32,
    /// Pixel columns `[start, end)` of the normalized image.
    pub columns: (u32, u32),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecognitionResult {
    pub text: String,
    /// Advisory. Mean top-class probability of the emitted symbols.
    pub confidence: f32,
    pub segments: Vec<RecognizedSegment>,
    pub has_table: bool,
    pub has_code: bool,
}

impl RecognitionResult {
    /// No text found. Not an error.
    pub fn empty() -> Self {
        Self {
            text: String::new(),
            confidence: 0.0,
            segments: Vec::new(),
            has_table: false,
            has_code: false,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty()
    }

    pub fn char_count(&self) -> usize {
        self.text.chars().count()
    }
}

/// Anything that turns a normalized image into text.
pub trait TextRecognizer: Send + Sync {
    fn recognize(&self, image: &NormalizedImage) -> Result<RecognitionResult, RecognitionError>;

    /// The geometry images must be normalized to before `recognize`.
    fn input_geometry(&self) -> InputGeometry;
}

/// CRNN recognizer: image tensor, sequence model, greedy CTC.
pub struct CrnnRecognizer<M: SequenceModel> {
    model: Arc<M>,
    decoder: CtcDecoder,
    geometry: InputGeometry,
}

impl<M: SequenceModel> CrnnRecognizer<M> {
    pub fn new(model: Arc<M>, charset: Charset, geometry: InputGeometry) -> Self {
        Self {
            model,
            decoder: CtcDecoder::new(charset),
            geometry,
        }
    }

    fn to_result(&self, decoded: Decoded, image_width: u32) -> RecognitionResult {
        let steps = decoded.timesteps.max(1) as f64;
        let px_per_step = image_width as f64 / steps;
        let column = |step: usize| ((step as f64 * px_per_step).round() as u32).min(image_width);

        let segments = decoded
            .segments
            .into_iter()
            .map(|seg| RecognizedSegment {
                columns: (column(seg.start_step), column(seg.end_step)),
                symbol: seg.symbol,
                confidence: seg.confidence,
            })
            .collect();

        let text = decoded.text.trim().to_string();
        RecognitionResult {
            has_table: heuristics::detect_table_structure(&text),
            has_code: heuristics::detect_code_structure(&text),
            text,
            confidence: decoded.confidence,
            segments,
        }
    }
}

impl CrnnRecognizer<OnnxCrnnModel> {
    /// Load the ONNX weights and charset named in the config.
    pub fn from_config(config: &OcrConfig) -> Result<Self, RecognitionError> {
        let model_path = config.model_path.as_deref().ok_or_else(|| {
            RecognitionError::ModelLoad(
                "no recognition model configured (set OCR_MODEL_PATH)".to_string(),
            )
        })?;
        let charset = match config.charset_path.as_deref() {
            Some(path) => Charset::load(path, config.blank_position)?,
            None => Charset::ascii(),
        };
        Self::load(model_path, charset, config.geometry())
    }

    pub fn load(
        model_path: &Path,
        charset: Charset,
        geometry: InputGeometry,
    ) -> Result<Self, RecognitionError> {
        let model = OnnxCrnnModel::load(model_path)?;
        Ok(Self::new(Arc::new(model), charset, geometry))
    }
}

impl<M: SequenceModel> TextRecognizer for CrnnRecognizer<M> {
    fn recognize(&self, image: &NormalizedImage) -> Result<RecognitionResult, RecognitionError> {
        let start = std::time::Instant::now();

        if image.is_uniform() {
            log::info!("[OCR] Uniform image, skipping model");
            return Ok(RecognitionResult::empty());
        }

        let tensor = image.to_tensor(self.geometry.channels);
        let expected = self.geometry.tensor_shape();
        if tensor.shape() != expected.as_slice() {
            return Err(RecognitionError::Shape {
                expected: expected.to_vec(),
                actual: tensor.shape().to_vec(),
            });
        }

        let scores = self.model.forward(&tensor)?;
        if scores.nrows() == 0 {
            return Err(RecognitionError::Output(format!(
                "{} returned zero timesteps",
                self.model.name()
            )));
        }

        let decoded = self.decoder.decode(scores.view())?;
        let result = self.to_result(decoded, image.width());

        log::info!(
            "[OCR] Recognized {} chars in {}ms, confidence={:.2}",
            result.char_count(),
            start.elapsed().as_millis(),
            result.confidence
        );
        if !result.is_empty() {
            let preview: String = result.text.chars().take(200).collect();
            log::debug!("[OCR] Text: {}", preview);
        }

        Ok(result)
    }

    fn input_geometry(&self) -> InputGeometry {
        self.geometry
    }
}
