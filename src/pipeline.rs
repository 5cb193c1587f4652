//! Analysis pipeline: the single entry point the shell calls.
//!
//! normalize → recognize → compose → infer, strictly in order. Each stage
//! fails fast; the failure is tagged with its stage and nothing produced
//! before it leaks out. The recognizer and the LLM client are injected so
//! tests can substitute doubles for either.

use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::AppConfig;
use crate::error::{AnalysisError, AnalysisFailure, InvalidImageError, RecognitionError, Stage};
use crate::llm::{self, AttachedImage, LlmClient, LlmConnection, PromptComposer};
use crate::ocr::{self, CrnnRecognizer, ImageKind, TextRecognizer};

/// Where a run is. `Failed` is terminal and reachable from any stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum PipelineState {
    Idle,
    Normalizing,
    Recognizing,
    Composing,
    Inferring,
    Done,
    Failed {
        stage: Stage,
        category: &'static str,
    },
}

/// Wall-clock time per stage, in milliseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StageTimings {
    pub normalize_ms: u64,
    pub recognize_ms: u64,
    pub compose_ms: u64,
    pub infer_ms: u64,
    pub total_ms: u64,
}

/// A successful run.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisResult {
    /// The model's answer.
    pub text: String,
    pub extracted_text: String,
    pub ocr_confidence: f32,
    pub used_default_instruction: bool,
    pub trace: Vec<PipelineState>,
    pub timings: StageTimings,
}

#[derive(Debug, Clone, Copy)]
pub struct PipelineOptions {
    /// Bounds the LLM call only; local stages are not timed out.
    pub llm_timeout: Duration,
    pub max_image_pixels: u64,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            llm_timeout: Duration::from_secs(120),
            max_image_pixels: 40_000_000,
        }
    }
}

pub struct Pipeline {
    recognizer: Arc<dyn TextRecognizer>,
    composer: PromptComposer,
    llm: Arc<dyn LlmClient>,
    options: PipelineOptions,
}

/// State trace of one run.
struct Run {
    trace: Vec<PipelineState>,
}

impl Run {
    fn start() -> Self {
        Self {
            trace: vec![PipelineState::Idle],
        }
    }

    fn enter(&mut self, state: PipelineState) {
        log::debug!("[PIPELINE] -> {:?}", state);
        self.trace.push(state);
    }

    fn fail(mut self, stage: Stage, error: impl Into<AnalysisError>) -> AnalysisFailure {
        let error = error.into();
        if error.is_user_correctable() {
            log::warn!("[PIPELINE] Failed while {}: {}", stage, error);
        } else {
            log::error!("[PIPELINE] Failed while {}: {}", stage, error);
        }
        self.enter(PipelineState::Failed {
            stage,
            category: error.category(),
        });
        AnalysisFailure {
            stage,
            error,
            trace: self.trace,
        }
    }
}

fn elapsed_ms(since: Instant) -> u64 {
    since.elapsed().as_millis() as u64
}

impl Pipeline {
    pub fn new(
        recognizer: Arc<dyn TextRecognizer>,
        composer: PromptComposer,
        llm: Arc<dyn LlmClient>,
        options: PipelineOptions,
    ) -> Self {
        Self {
            recognizer,
            composer,
            llm,
            options,
        }
    }

    /// Production wiring: ONNX recognizer, configured provider, one shared
    /// lazy connection.
    pub fn from_config(config: &AppConfig) -> Result<Self, RecognitionError> {
        let recognizer = CrnnRecognizer::from_config(&config.ocr)?;
        let connection = Arc::new(LlmConnection::default());
        let llm = llm::build_client(&config.llm, connection);
        Ok(Self::new(
            Arc::new(recognizer),
            PromptComposer::new(config.llm.attach_image),
            llm,
            PipelineOptions {
                llm_timeout: config.llm.timeout(),
                max_image_pixels: config.ocr.max_image_pixels,
            },
        ))
    }

    /// Analyze an image. The format is sniffed from the bytes.
    pub async fn analyze(
        &self,
        image_bytes: &[u8],
        instruction: &str,
    ) -> Result<AnalysisResult, AnalysisFailure> {
        self.analyze_with_format(image_bytes, None, instruction).await
    }

    /// Analyze an image whose format the caller declares (e.g. from the
    /// file extension). A mismatch with the content is an invalid image.
    pub async fn analyze_with_format(
        &self,
        image_bytes: &[u8],
        declared: Option<ImageKind>,
        instruction: &str,
    ) -> Result<AnalysisResult, AnalysisFailure> {
        let started = Instant::now();
        let mut run = Run::start();
        let mut timings = StageTimings::default();

        // Stage 1: normalize. Decoding is CPU work, keep it off the async workers.
        run.enter(PipelineState::Normalizing);
        let stage_start = Instant::now();
        let geometry = self.recognizer.input_geometry();
        let max_pixels = self.options.max_image_pixels;
        let owned = image_bytes.to_vec();
        let normalized = tokio::task::spawn_blocking(move || {
            ocr::normalize(&owned, declared, geometry, max_pixels).map(|img| (img, owned))
        })
        .await;
        let (normalized, original) = match normalized {
            Ok(Ok(pair)) => pair,
            Ok(Err(e)) => return Err(run.fail(Stage::Normalizing, e)),
            Err(e) => {
                return Err(run.fail(
                    Stage::Normalizing,
                    InvalidImageError::Decode(format!("decoder task failed: {}", e)),
                ))
            }
        };
        timings.normalize_ms = elapsed_ms(stage_start);
        log::info!(
            "[PIPELINE] Normalized {} {}x{} in {}ms",
            normalized.source_kind().as_str(),
            normalized.source_size().0,
            normalized.source_size().1,
            timings.normalize_ms
        );

        // Stage 2: recognize.
        run.enter(PipelineState::Recognizing);
        let stage_start = Instant::now();
        let source_kind = normalized.source_kind();
        let recognizer = Arc::clone(&self.recognizer);
        let recognized =
            tokio::task::spawn_blocking(move || recognizer.recognize(&normalized)).await;
        let recognition = match recognized {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => return Err(run.fail(Stage::Recognizing, e)),
            Err(e) => {
                return Err(run.fail(
                    Stage::Recognizing,
                    RecognitionError::Inference(format!("recognizer task failed: {}", e)),
                ))
            }
        };
        timings.recognize_ms = elapsed_ms(stage_start);
        if recognition.is_empty() {
            log::info!("[PIPELINE] No text recognized; continuing with empty extraction");
        }

        // Stage 3: compose. Pure assembly, cannot fail.
        run.enter(PipelineState::Composing);
        let stage_start = Instant::now();
        let image = self
            .composer
            .attach_image
            .then(|| AttachedImage::new(source_kind, original));
        let request = self.composer.compose(&recognition, instruction, image);
        timings.compose_ms = elapsed_ms(stage_start);
        log::info!(
            "[PIPELINE] Prompt composed (default instruction: {}, image attached: {})",
            request.instruction_is_default,
            request.raw_image.is_some()
        );

        // Stage 4: infer. The only stage bounded by a timeout.
        run.enter(PipelineState::Inferring);
        let stage_start = Instant::now();
        let limit = self.options.llm_timeout;
        let answer = match tokio::time::timeout(limit, self.llm.infer(&request)).await {
            Ok(Ok(text)) => text,
            Ok(Err(e)) => return Err(run.fail(Stage::Inferring, e)),
            Err(_) => return Err(run.fail(Stage::Inferring, AnalysisError::Timeout(limit))),
        };
        timings.infer_ms = elapsed_ms(stage_start);

        run.enter(PipelineState::Done);
        timings.total_ms = elapsed_ms(started);
        log::info!(
            "[PIPELINE] Done via {}: {}ms (normalize={} + ocr={} + compose={} + llm={})",
            self.llm.name(),
            timings.total_ms,
            timings.normalize_ms,
            timings.recognize_ms,
            timings.compose_ms,
            timings.infer_ms
        );

        Ok(AnalysisResult {
            text: answer,
            extracted_text: recognition.text,
            ocr_confidence: recognition.confidence,
            used_default_instruction: request.instruction_is_default,
            trace: run.trace,
            timings,
        })
    }
}
