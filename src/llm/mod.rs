//! LLM domain: prompt composition and inference backends.
//!
//! Public API for the analysis layer. External code should only use the
//! items exported here.
//!
//! Backends:
//!   - Ollama `/api/chat` (ollama.rs), the default
//!   - OpenAI-compatible `/v1/chat/completions` (openai.rs)
//!
//! Shared:
//!   - compose.rs     recognition result + instruction -> AnalysisRequest
//!   - connection.rs  lazily built, process-scoped HTTP handle
//!   - streaming.rs   NDJSON / SSE chunk buffering
//!   - provider.rs    LlmClient trait, provider selection, error mapping

pub mod compose;
pub mod connection;
pub mod ollama;
pub mod openai;
pub mod prompts;
pub mod provider;
pub mod streaming;
pub mod types;

pub use compose::PromptComposer;
pub use connection::LlmConnection;
pub use ollama::OllamaClient;
pub use openai::OpenAiClient;
pub use prompts::{DEFAULT_INSTRUCTION, EXAMPLE_PROMPTS};
pub use provider::{build_client, LlmClient, Provider};
pub use types::{AnalysisRequest, AttachedImage, GenerationOptions, LlmError, TokenUsage};
