//! Shared test doubles and in-memory image builders.

#![allow(dead_code)]

pub mod http_stub;

use async_trait::async_trait;
use image::{GrayImage, ImageFormat, Luma};
use ndarray::{Array2, Array4};
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use ocr_assistant_lib::error::RecognitionError;
use ocr_assistant_lib::llm::{AnalysisRequest, LlmClient, LlmError, PromptComposer};
use ocr_assistant_lib::ocr::{
    Charset, CrnnRecognizer, InputGeometry, NormalizedImage, RecognitionResult, SequenceModel,
    TextRecognizer,
};
use ocr_assistant_lib::{Pipeline, PipelineOptions};

// ── Images ─────────────────────────────────────────────────────────

pub fn encode(img: &GrayImage, format: ImageFormat) -> Vec<u8> {
    let mut buf = Cursor::new(Vec::new());
    img.write_to(&mut buf, format).unwrap();
    buf.into_inner()
}

pub fn solid_png(width: u32, height: u32, tone: u8) -> Vec<u8> {
    encode(&GrayImage::from_pixel(width, height, Luma([tone])), ImageFormat::Png)
}

/// Dark block letters on white, roughly like a printed word.
pub fn word_image(letters: usize) -> GrayImage {
    let (w, h) = (letters as u32 * 24 + 16, 48);
    GrayImage::from_fn(w, h, |x, y| {
        if x < 8 {
            return Luma([240]);
        }
        let col = (x - 8) % 24;
        let ink = col < 16 && (12..36).contains(&y) && (col < 4 || y < 16 || (x + y) % 7 == 0);
        Luma([if ink { 20 } else { 240 }])
    })
}

pub fn word_png(letters: usize) -> Vec<u8> {
    encode(&word_image(letters), ImageFormat::Png)
}

/// A PNG whose header declares a 0x10 image. Encoders refuse to write one.
pub fn zero_width_png() -> Vec<u8> {
    let mut ihdr = b"IHDR".to_vec();
    ihdr.extend_from_slice(&0u32.to_be_bytes());
    ihdr.extend_from_slice(&10u32.to_be_bytes());
    ihdr.extend_from_slice(&[8, 0, 0, 0, 0]);
    let crc = png_crc(&ihdr);

    let mut png = b"\x89PNG\r\n\x1a\n".to_vec();
    png.extend_from_slice(&13u32.to_be_bytes());
    png.extend(ihdr);
    png.extend_from_slice(&crc.to_be_bytes());
    png
}

fn png_crc(data: &[u8]) -> u32 {
    let mut crc = 0xFFFF_FFFFu32;
    for &byte in data {
        crc ^= byte as u32;
        for _ in 0..8 {
            crc = if crc & 1 == 1 { (crc >> 1) ^ 0xEDB8_8320 } else { crc >> 1 };
        }
    }
    !crc
}

// ── Sequence model ─────────────────────────────────────────────────

/// Emits a fixed string via one-hot logits, one symbol per two timesteps
/// with blanks between, regardless of input. Counts invocations.
pub struct SpellingModel {
    scores: Array2<f32>,
    pub calls: AtomicUsize,
}

impl SpellingModel {
    pub fn new(text: &str, charset: &Charset) -> Self {
        let classes = charset.class_count();
        let blank = charset.blank_index();
        let mut steps = Vec::new();
        for ch in text.chars() {
            let class = charset.class_of(&ch.to_string()).unwrap();
            steps.push(class);
            steps.push(blank);
        }
        while steps.len() < 40 {
            steps.push(blank);
        }
        let mut scores = Array2::<f32>::zeros((steps.len(), classes));
        for (t, &class) in steps.iter().enumerate() {
            scores[[t, class]] = 10.0;
        }
        Self {
            scores,
            calls: AtomicUsize::new(0),
        }
    }
}

impl SequenceModel for SpellingModel {
    fn forward(&self, _input: &Array4<f32>) -> Result<Array2<f32>, RecognitionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.scores.clone())
    }

    fn name(&self) -> &str {
        "spelling"
    }
}

/// Produces a NaN at timestep 3, as a broken export would.
pub struct BrokenModel;

impl SequenceModel for BrokenModel {
    fn forward(&self, _input: &Array4<f32>) -> Result<Array2<f32>, RecognitionError> {
        let mut scores = Array2::<f32>::zeros((8, 96));
        scores[[3, 5]] = f32::NAN;
        Ok(scores)
    }

    fn name(&self) -> &str {
        "broken"
    }
}

pub fn spelling_recognizer(text: &str) -> (Arc<SpellingModel>, CrnnRecognizer<SpellingModel>) {
    let charset = Charset::ascii();
    let model = Arc::new(SpellingModel::new(text, &charset));
    let recognizer = CrnnRecognizer::new(model.clone(), charset, InputGeometry::default());
    (model, recognizer)
}

// ── Recognizer double ──────────────────────────────────────────────

/// Wraps a real recognizer and records every call.
pub struct RecordingRecognizer<R: TextRecognizer> {
    inner: R,
    pub calls: AtomicUsize,
}

impl<R: TextRecognizer> RecordingRecognizer<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl<R: TextRecognizer> TextRecognizer for RecordingRecognizer<R> {
    fn recognize(&self, image: &NormalizedImage) -> Result<RecognitionResult, RecognitionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.recognize(image)
    }

    fn input_geometry(&self) -> InputGeometry {
        self.inner.input_geometry()
    }
}

// ── LLM doubles ────────────────────────────────────────────────────

#[derive(Clone, Copy)]
pub enum Behavior {
    /// Return the composed user message.
    Echo,
    Unavailable,
    Timeout,
    EmptyResponse,
    /// Sleep longer than any test timeout.
    Hang,
}

/// A scripted LLM client that records what it was sent.
pub struct StubLlm {
    behavior: Behavior,
    pub calls: AtomicUsize,
    pub last_request: Mutex<Option<AnalysisRequest>>,
}

impl StubLlm {
    pub fn new(behavior: Behavior) -> Self {
        Self {
            behavior,
            calls: AtomicUsize::new(0),
            last_request: Mutex::new(None),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_request(&self) -> Option<AnalysisRequest> {
        self.last_request.lock().unwrap().clone()
    }
}

#[async_trait]
impl LlmClient for StubLlm {
    async fn infer(&self, request: &AnalysisRequest) -> Result<String, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_request.lock().unwrap() = Some(request.clone());
        match self.behavior {
            Behavior::Echo => Ok(request.user_message()),
            Behavior::Unavailable => Err(LlmError::ServiceUnavailable(
                "connection refused".to_string(),
            )),
            Behavior::Timeout => Err(LlmError::Timeout(Duration::from_secs(1))),
            Behavior::EmptyResponse => Err(LlmError::ModelResponse(
                "model returned no text".to_string(),
            )),
            Behavior::Hang => {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok("too late".to_string())
            }
        }
    }

    fn name(&self) -> &str {
        "stub"
    }
}

// ── Wiring ─────────────────────────────────────────────────────────

pub struct Harness {
    pub pipeline: Pipeline,
    pub recognizer: Arc<RecordingRecognizer<CrnnRecognizer<SpellingModel>>>,
    pub model: Arc<SpellingModel>,
    pub llm: Arc<StubLlm>,
}

pub fn harness(recognized: &str, behavior: Behavior) -> Harness {
    harness_with(recognized, behavior, PromptComposer::default(), PipelineOptions::default())
}

pub fn harness_with(
    recognized: &str,
    behavior: Behavior,
    composer: PromptComposer,
    options: PipelineOptions,
) -> Harness {
    let (model, crnn) = spelling_recognizer(recognized);
    let recognizer = Arc::new(RecordingRecognizer::new(crnn));
    let llm = Arc::new(StubLlm::new(behavior));
    let pipeline = Pipeline::new(
        recognizer.clone() as Arc<dyn TextRecognizer>,
        composer,
        llm.clone() as Arc<dyn LlmClient>,
        options,
    );
    Harness {
        pipeline,
        recognizer,
        model,
        llm,
    }
}
