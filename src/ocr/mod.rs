//! OCR domain: CRNN text recognition.
//!
//! normalize.rs turns uploaded bytes into the recognizer's fixed input,
//! recognizer.rs runs the sequence model and CTC decoding over it.
//! External code should only use the items re-exported here.

pub mod charset;
pub mod ctc;
pub mod heuristics;
pub mod model;
pub mod normalize;
pub mod recognizer;

pub use charset::{BlankPosition, Charset};
pub use model::{OnnxCrnnModel, SequenceModel};
pub use normalize::{normalize, sniff_kind, ImageKind, InputGeometry, NormalizedImage};
pub use recognizer::{CrnnRecognizer, RecognitionResult, RecognizedSegment, TextRecognizer};
