//! Sequence model backends: the trained CRNN behind the recognizer.
//!
//! A `SequenceModel` maps an NCHW image tensor to a `[timesteps, classes]`
//! score matrix. The production backend runs a CRNN exported to ONNX via
//! ONNX Runtime; tests substitute hand-built score matrices.

use ndarray::{Array2, Array4, ArrayViewD, Axis, Ix2};
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::error::RecognitionError;

/// Convolutional feature extractor + recurrent decoder, as a black box.
pub trait SequenceModel: Send + Sync {
    /// Run one image through the network. Output is `[timesteps, classes]`.
    fn forward(&self, input: &Array4<f32>) -> Result<Array2<f32>, RecognitionError>;

    fn name(&self) -> &str;
}

/// CRNN weights loaded into an ONNX Runtime session.
///
/// `Session::run` needs exclusive access, so concurrent recognitions
/// serialize on the mutex. The weights themselves are never modified.
pub struct OnnxCrnnModel {
    session: Mutex<Session>,
    input_name: String,
    path: PathBuf,
}

impl std::fmt::Debug for OnnxCrnnModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OnnxCrnnModel")
            .field("path", &self.path)
            .field("input_name", &self.input_name)
            .finish_non_exhaustive()
    }
}

impl OnnxCrnnModel {
    /// Load an ONNX model from disk. CPU execution, deterministic kernels.
    pub fn load(path: &Path) -> Result<Self, RecognitionError> {
        if !path.exists() {
            return Err(RecognitionError::ModelLoad(format!(
                "recognition model not found: {}",
                path.display()
            )));
        }

        let start = std::time::Instant::now();
        let session = Session::builder()
            .map_err(load_error)?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(load_error)?
            .with_intra_threads(1)
            .map_err(load_error)?
            .commit_from_file(path)
            .map_err(load_error)?;

        let input_name = session
            .inputs
            .first()
            .map(|input| input.name.clone())
            .unwrap_or_else(|| "x".to_string());

        log::info!(
            "[OCR] Loaded recognition model {} in {}ms (input '{}')",
            path.display(),
            start.elapsed().as_millis(),
            input_name
        );

        Ok(Self {
            session: Mutex::new(session),
            input_name,
            path: path.to_path_buf(),
        })
    }
}

impl SequenceModel for OnnxCrnnModel {
    fn forward(&self, input: &Array4<f32>) -> Result<Array2<f32>, RecognitionError> {
        let mut session = self.session.lock().map_err(|e| {
            RecognitionError::Inference(format!("model session lock poisoned: {}", e))
        })?;

        let tensor = TensorRef::from_array_view(input).map_err(|e| {
            RecognitionError::Inference(format!("failed to create input tensor: {}", e))
        })?;

        let outputs = session
            .run(ort::inputs![self.input_name.as_str() => tensor])
            .map_err(|e| RecognitionError::Inference(e.to_string()))?;

        let (_, output) = outputs
            .iter()
            .next()
            .ok_or_else(|| RecognitionError::Output("model produced no outputs".to_string()))?;

        let scores = output
            .try_extract_array::<f32>()
            .map_err(|e| RecognitionError::Output(format!("output is not an f32 tensor: {}", e)))?;

        let matrix = steps_by_classes(scores)?;
        Ok(matrix)
    }

    fn name(&self) -> &str {
        "onnx-crnn"
    }
}

/// Accept `[1, T, C]`, `[T, 1, C]` or `[T, C]` and return an owned `[T, C]`.
pub(crate) fn steps_by_classes(scores: ArrayViewD<'_, f32>) -> Result<Array2<f32>, RecognitionError> {
    let shape = scores.shape().to_vec();
    let matrix = match shape.as_slice() {
        [1, _, _] => scores.index_axis_move(Axis(0), 0),
        [_, 1, _] => scores.index_axis_move(Axis(1), 0),
        [_, _] => scores,
        _ => {
            return Err(RecognitionError::Output(format!(
                "unexpected output shape {:?}, expected [1,T,C], [T,1,C] or [T,C]",
                shape
            )))
        }
    };
    matrix
        .into_dimensionality::<Ix2>()
        .map(|m| m.to_owned())
        .map_err(|e| RecognitionError::Output(e.to_string()))
}

fn load_error<E: std::fmt::Display>(e: E) -> RecognitionError {
    RecognitionError::ModelLoad(e.to_string())
}
