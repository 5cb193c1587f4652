//! Configuration: defaults, optional JSON file, environment overrides.
//!
//! Resolution order (later wins):
//! 1. `AppConfig::default()`: works against a local Ollama daemon
//! 2. `~/.config/ocr-assistant/config.json` (platform config dir)
//! 3. Environment variables (`.env.local` / `.env` are loaded first)

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;
use crate::llm::Provider;
use crate::ocr::{BlankPosition, InputGeometry};

pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";
pub const DEFAULT_OPENAI_URL: &str = "https://api.openai.com";
pub const DEFAULT_MODEL: &str = "gemma3:4b";

/// Complete application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub ocr: OcrConfig,
    pub llm: LlmConfig,
}

/// Text recognizer settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrConfig {
    /// ONNX export of the CRNN recognizer.
    pub model_path: Option<PathBuf>,
    /// Character dictionary, one symbol per line. Built-in ASCII set if unset.
    pub charset_path: Option<PathBuf>,
    pub input_height: u32,
    pub input_width: u32,
    pub input_channels: u32,
    pub blank_position: BlankPosition,
    /// Decode guard against oversized uploads.
    pub max_image_pixels: u64,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            model_path: None,
            charset_path: None,
            input_height: 32,
            input_width: 320,
            input_channels: 1,
            blank_position: BlankPosition::First,
            max_image_pixels: 40_000_000,
        }
    }
}

impl OcrConfig {
    pub fn geometry(&self) -> InputGeometry {
        InputGeometry {
            height: self.input_height,
            width: self.input_width,
            channels: self.input_channels,
        }
    }
}

/// Language model service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub provider: Provider,
    /// Service address. Provider default when unset.
    pub base_url: Option<String>,
    pub model: String,
    pub timeout_secs: u64,
    /// Send the original image alongside the OCR text (vision models only).
    pub attach_image: bool,
    pub temperature: Option<f32>,
    pub seed: Option<i64>,
    pub max_tokens: u32,
    pub stream: bool,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: Provider::Ollama,
            base_url: None,
            model: DEFAULT_MODEL.to_string(),
            timeout_secs: 120,
            attach_image: false,
            temperature: None,
            seed: None,
            max_tokens: 1024,
            stream: true,
            api_key: None,
        }
    }
}

impl LlmConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Base URL without a trailing slash.
    pub fn resolved_base_url(&self) -> String {
        let url = match &self.base_url {
            Some(url) if !url.trim().is_empty() => url.trim().to_string(),
            _ => match self.provider {
                Provider::Ollama => DEFAULT_OLLAMA_URL.to_string(),
                Provider::OpenAi => DEFAULT_OPENAI_URL.to_string(),
            },
        };
        url.trim_end_matches('/').to_string()
    }
}

// ── Loading ──────────────────────────────────────────────────────────

/// Location of the optional config file.
pub fn config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("ocr-assistant")
        .join("config.json")
}

impl AppConfig {
    /// Load defaults, then the config file, then environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::from_file(&config_path())?;
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Read a JSON config file. A missing file yields defaults.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::debug!("[CONFIG] No config file at {}", path.display());
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(ConfigError::Read {
                    path: path.display().to_string(),
                    message: e.to_string(),
                })
            }
        };
        let config = serde_json::from_str(&raw).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        log::info!("[CONFIG] Loaded {}", path.display());
        Ok(config)
    }

    /// Apply overrides from a variable lookup (the process env in production).
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("OCR_MODEL_PATH") {
            self.ocr.model_path = Some(PathBuf::from(v));
        }
        if let Some(v) = get("OCR_CHARSET_PATH") {
            self.ocr.charset_path = Some(PathBuf::from(v));
        }
        if let Some(v) = get("OCR_INPUT_HEIGHT") {
            self.ocr.input_height = parse_num("OCR_INPUT_HEIGHT", &v)?;
        }
        if let Some(v) = get("OCR_INPUT_WIDTH") {
            self.ocr.input_width = parse_num("OCR_INPUT_WIDTH", &v)?;
        }
        if let Some(v) = get("OCR_INPUT_CHANNELS") {
            self.ocr.input_channels = parse_num("OCR_INPUT_CHANNELS", &v)?;
        }
        if let Some(v) = get("OCR_BLANK_POSITION") {
            self.ocr.blank_position = match v.trim().to_lowercase().as_str() {
                "first" => BlankPosition::First,
                "last" => BlankPosition::Last,
                other => {
                    return Err(ConfigError::Invalid {
                        key: "OCR_BLANK_POSITION",
                        message: format!("expected 'first' or 'last', got '{}'", other),
                    })
                }
            };
        }
        if let Some(v) = get("OCR_MAX_IMAGE_PIXELS") {
            self.ocr.max_image_pixels = parse_num("OCR_MAX_IMAGE_PIXELS", &v)?;
        }

        if let Some(v) = get("LLM_PROVIDER") {
            self.llm.provider = Provider::parse(&v).ok_or(ConfigError::Invalid {
                key: "LLM_PROVIDER",
                message: format!("unknown provider '{}'", v),
            })?;
        }
        let provider = self.llm.provider;
        // OLLAMA_HOST is what the Ollama CLI itself reads.
        let base_url = get("LLM_BASE_URL").or_else(|| match provider {
            Provider::Ollama => get("OLLAMA_HOST"),
            Provider::OpenAi => None,
        });
        if let Some(v) = base_url {
            self.llm.base_url = Some(normalize_host(&v));
        }
        if let Some(v) = get("LLM_MODEL") {
            self.llm.model = v.trim().to_string();
        }
        if let Some(v) = get("LLM_TIMEOUT_SECS") {
            self.llm.timeout_secs = parse_num("LLM_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = get("LLM_ATTACH_IMAGE") {
            self.llm.attach_image = parse_bool("LLM_ATTACH_IMAGE", &v)?;
        }
        if let Some(v) = get("LLM_TEMPERATURE") {
            self.llm.temperature = Some(parse_num("LLM_TEMPERATURE", &v)?);
        }
        if let Some(v) = get("LLM_SEED") {
            self.llm.seed = Some(parse_num("LLM_SEED", &v)?);
        }
        if let Some(v) = get("LLM_MAX_TOKENS") {
            self.llm.max_tokens = parse_num("LLM_MAX_TOKENS", &v)?;
        }
        if let Some(v) = get("LLM_STREAM") {
            self.llm.stream = parse_bool("LLM_STREAM", &v)?;
        }
        if let Some(v) = get("OPENAI_API_KEY") {
            self.llm.api_key = Some(v);
        }
        Ok(())
    }

    /// Reject settings the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ocr.input_height == 0 || self.ocr.input_width == 0 {
            return Err(ConfigError::Invalid {
                key: "ocr.input_height/input_width",
                message: "recognizer geometry must be non-zero".to_string(),
            });
        }
        if !matches!(self.ocr.input_channels, 1 | 3) {
            return Err(ConfigError::Invalid {
                key: "ocr.input_channels",
                message: format!("expected 1 or 3, got {}", self.ocr.input_channels),
            });
        }
        if self.llm.timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                key: "llm.timeout_secs",
                message: "timeout must be at least one second".to_string(),
            });
        }
        if self.llm.model.trim().is_empty() {
            return Err(ConfigError::Invalid {
                key: "llm.model",
                message: "model identifier is empty".to_string(),
            });
        }
        let url = self.llm.resolved_base_url();
        reqwest::Url::parse(&url).map_err(|e| ConfigError::Invalid {
            key: "llm.base_url",
            message: format!("'{}': {}", url, e),
        })?;
        Ok(())
    }
}

/// `OLLAMA_HOST` is often given as `host:port` without a scheme.
fn normalize_host(raw: &str) -> String {
    let raw = raw.trim();
    if raw.starts_with("http://") || raw.starts_with("https://") {
        raw.to_string()
    } else {
        format!("http://{}", raw)
    }
}

fn parse_num<T: std::str::FromStr>(key: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
        key,
        message: format!("'{}': {}", raw, e),
    })
}

fn parse_bool(key: &'static str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(ConfigError::Invalid {
            key,
            message: format!("expected a boolean, got '{}'", other),
        }),
    }
}
