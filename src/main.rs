use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use ocr_assistant_lib::llm::EXAMPLE_PROMPTS;
use ocr_assistant_lib::ocr::ImageKind;
use ocr_assistant_lib::{init_environment, AppConfig, Pipeline};

#[derive(Parser)]
#[command(name = "ocr-assistant")]
#[command(about = "OCR Assistant: CRNN text recognition analyzed by an LLM")]
#[command(version)]
struct Cli {
    /// PNG or JPEG image to analyze
    #[arg(required_unless_present = "examples")]
    image: Option<PathBuf>,

    /// Instruction for the analysis. Empty means general extraction and description
    #[arg(short, long, default_value = "")]
    prompt: String,

    /// Also send the image itself (needs a vision-capable model)
    #[arg(long)]
    attach_image: bool,

    /// LLM model identifier, overrides LLM_MODEL
    #[arg(short, long)]
    model: Option<String>,

    /// Print the result with its metadata as JSON
    #[arg(long)]
    json: bool,

    /// List example prompts and exit
    #[arg(long)]
    examples: bool,
}

const EXIT_USER_ERROR: u8 = 2;
const EXIT_FAILURE: u8 = 1;

#[tokio::main]
async fn main() -> ExitCode {
    init_environment();
    let cli = Cli::parse();

    if cli.examples {
        println!("Example prompts:");
        for prompt in EXAMPLE_PROMPTS {
            println!("  - {}", prompt);
        }
        return ExitCode::SUCCESS;
    }
    let Some(path) = cli.image else {
        eprintln!("No image given.");
        return ExitCode::from(EXIT_USER_ERROR);
    };

    let mut config = match AppConfig::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            return ExitCode::from(EXIT_USER_ERROR);
        }
    };
    if cli.attach_image {
        config.llm.attach_image = true;
    }
    if let Some(model) = cli.model {
        config.llm.model = model;
    }

    let bytes = match std::fs::read(&path) {
        Ok(bytes) => bytes,
        Err(e) => {
            eprintln!("Could not read {}: {}", path.display(), e);
            return ExitCode::from(EXIT_USER_ERROR);
        }
    };
    let declared = path
        .extension()
        .and_then(|ext| ext.to_str())
        .and_then(ImageKind::from_extension);

    let pipeline = match Pipeline::from_config(&config) {
        Ok(pipeline) => pipeline,
        Err(e) => {
            log::error!("[STARTUP] {}", e);
            eprintln!("Text recognition is not available: {}", e);
            return ExitCode::from(EXIT_FAILURE);
        }
    };

    match pipeline
        .analyze_with_format(&bytes, declared, &cli.prompt)
        .await
    {
        Ok(result) => {
            if cli.json {
                match serde_json::to_string_pretty(&result) {
                    Ok(json) => println!("{}", json),
                    Err(e) => {
                        eprintln!("Could not serialize the result: {}", e);
                        return ExitCode::from(EXIT_FAILURE);
                    }
                }
            } else {
                println!("{}", result.text);
            }
            ExitCode::SUCCESS
        }
        Err(failure) => {
            if cli.json {
                let body = serde_json::json!({
                    "error": {
                        "stage": failure.stage,
                        "category": failure.error.category(),
                        "retryable": failure.error.is_retryable(),
                        "message": failure.user_message(),
                    }
                });
                println!("{}", body);
            }
            eprintln!("{}", failure.user_message());
            if failure.error.is_user_correctable() {
                ExitCode::from(EXIT_USER_ERROR)
            } else {
                ExitCode::from(EXIT_FAILURE)
            }
        }
    }
}
