//! OCR Assistant: image in, grounded LLM analysis out.
//!
//! Module layout:
//!   - ocr/         image normalization, CRNN recognition, CTC decoding
//!   - llm/         prompt composition and inference backends
//!   - pipeline.rs  the AnalyzeImage orchestrator (single entry point)
//!   - config.rs    layered configuration
//!   - error.rs     stage-tagged error taxonomy
//!
//! The presentation shell (src/main.rs) only reads a file, calls
//! `Pipeline::analyze` and renders the result or the failure.

pub mod config;
pub mod error;
pub mod llm;
pub mod ocr;
pub mod pipeline;

pub use config::AppConfig;
pub use error::{AnalysisError, AnalysisFailure, Stage};
pub use pipeline::{AnalysisResult, Pipeline, PipelineOptions, PipelineState, StageTimings};

/// Load `.env.local` or `.env` from the working directory (first one found
/// wins), then start the logger. Safe to call more than once.
pub fn init_environment() {
    'env_load: for env_file in [".env.local", ".env"] {
        let path = std::path::Path::new(env_file);
        if path.exists() {
            match dotenvy::from_path(path) {
                Ok(_) => eprintln!("[STARTUP] Loaded {}", path.display()),
                Err(e) => eprintln!("[STARTUP] Failed to load {}: {}", path.display(), e),
            }
            break 'env_load;
        }
    }

    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .try_init();
}
