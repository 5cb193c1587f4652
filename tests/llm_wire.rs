//! Wire-level tests for the LLM backends against a loopback HTTP stub.

mod helpers;

use std::sync::Arc;
use std::time::Duration;

use helpers::http_stub::{self, body_json, full_response, stream_head};
use ocr_assistant_lib::config::LlmConfig;
use ocr_assistant_lib::error::Stage;
use ocr_assistant_lib::llm::{
    AnalysisRequest, AttachedImage, LlmClient, LlmError, OllamaClient, OpenAiClient,
    PromptComposer, Provider,
};
use ocr_assistant_lib::ocr::{ImageKind, TextRecognizer};
use ocr_assistant_lib::{AnalysisError, Pipeline, PipelineOptions, PipelineState};

fn config(provider: Provider, base_url: &str, stream: bool) -> LlmConfig {
    LlmConfig {
        provider,
        base_url: Some(base_url.to_string()),
        model: "test-model".to_string(),
        stream,
        temperature: Some(0.0),
        seed: Some(42),
        ..LlmConfig::default()
    }
}

fn request() -> AnalysisRequest {
    AnalysisRequest {
        extracted_text: "TEST".to_string(),
        instruction: "What does it say?".to_string(),
        instruction_is_default: false,
        ocr_confidence: 0.93,
        has_table: false,
        has_code: false,
        raw_image: None,
    }
}

fn ollama(config: &LlmConfig) -> OllamaClient {
    OllamaClient::from_config(config, http_stub::direct_connection())
}

fn openai(config: &LlmConfig) -> OpenAiClient {
    OpenAiClient::from_config(config, http_stub::direct_connection())
}

// ── Ollama ──────────────────────────────────────────────────────────

#[tokio::test]
async fn ollama_streams_ndjson_split_at_odd_boundaries() {
    let server = http_stub::serve(vec![
        stream_head("application/x-ndjson"),
        br#"{"message":{"role":"assistant","content":"The image "},"done":false}
{"message":{"role":"assi"#
            .to_vec(),
        br#"stant","content":"says TEST."},"done":false}
"#
        .to_vec(),
        br#"{"message":{"role":"assistant","content":""},"done":true,"prompt_eval_count":90,"eval_count":5}
"#
        .to_vec(),
    ])
    .await;

    let client = ollama(&config(Provider::Ollama, &server.base_url, true));
    let answer = client.infer(&request()).await.unwrap();
    assert_eq!(answer, "The image says TEST.");

    let raw = server.request().await;
    assert!(raw.starts_with("POST /api/chat "));
    let body = body_json(&raw);
    assert_eq!(body["model"], "test-model");
    assert_eq!(body["stream"], true);
    assert_eq!(body["options"]["seed"], 42);
    assert_eq!(body["messages"][0]["role"], "system");
    let user = body["messages"][1]["content"].as_str().unwrap();
    assert!(user.contains("<extracted_text>\nTEST\n</extracted_text>"));
    assert!(user.contains("What does it say?"));
    assert!(body["messages"][1].get("images").is_none());
}

#[tokio::test]
async fn ollama_non_streaming_reads_one_object() {
    let server = http_stub::serve(vec![full_response(
        "200 OK",
        "application/json",
        r#"{"message":{"role":"assistant","content":"  It reads TEST.\n"},"done":true}"#,
    )])
    .await;

    let client = ollama(&config(Provider::Ollama, &server.base_url, false));
    assert_eq!(client.infer(&request()).await.unwrap(), "It reads TEST.");
    assert_eq!(body_json(&server.request().await)["stream"], false);
}

#[tokio::test]
async fn ollama_attached_image_travels_as_base64() {
    let server = http_stub::serve(vec![full_response(
        "200 OK",
        "application/json",
        r#"{"message":{"content":"ok"},"done":true}"#,
    )])
    .await;

    let mut req = request();
    req.raw_image = Some(AttachedImage::new(ImageKind::Png, vec![1, 2, 3]));
    let client = ollama(&config(Provider::Ollama, &server.base_url, false));
    client.infer(&req).await.unwrap();

    let body = body_json(&server.request().await);
    assert_eq!(body["messages"][1]["images"][0], "AQID");
}

#[tokio::test]
async fn ollama_missing_model_surfaces_service_message() {
    let server = http_stub::serve(vec![full_response(
        "404 Not Found",
        "application/json",
        r#"{"error":"model 'test-model' not found"}"#,
    )])
    .await;

    let client = ollama(&config(Provider::Ollama, &server.base_url, true));
    let err = client.infer(&request()).await.unwrap_err();
    match err {
        LlmError::ModelResponse(message) => {
            assert!(message.contains("404"), "{}", message);
            assert!(message.contains("model 'test-model' not found"), "{}", message);
        }
        other => panic!("expected ModelResponse, got {:?}", other),
    }
}

#[tokio::test]
async fn ollama_error_mid_stream_fails_the_request() {
    let server = http_stub::serve(vec![
        stream_head("application/x-ndjson"),
        b"{\"message\":{\"content\":\"partial\"},\"done\":false}\n{\"error\":\"out of memory\"}\n"
            .to_vec(),
    ])
    .await;

    let client = ollama(&config(Provider::Ollama, &server.base_url, true));
    let err = client.infer(&request()).await.unwrap_err();
    assert!(matches!(err, LlmError::ModelResponse(ref m) if m == "out of memory"));
}

#[tokio::test]
async fn ollama_truncated_stream_is_a_model_response_error() {
    let server = http_stub::serve(vec![
        stream_head("application/x-ndjson"),
        b"{\"message\":{\"content\":\"half an ans\"},\"done\":false}\n".to_vec(),
    ])
    .await;

    let client = ollama(&config(Provider::Ollama, &server.base_url, true));
    let err = client.infer(&request()).await.unwrap_err();
    assert!(matches!(err, LlmError::ModelResponse(_)), "{:?}", err);
}

#[tokio::test]
async fn ollama_whitespace_only_answer_is_rejected() {
    let server = http_stub::serve(vec![full_response(
        "200 OK",
        "application/json",
        r#"{"message":{"content":" \n "},"done":true}"#,
    )])
    .await;

    let client = ollama(&config(Provider::Ollama, &server.base_url, false));
    let err = client.infer(&request()).await.unwrap_err();
    assert!(matches!(err, LlmError::ModelResponse(_)));
}

// ── Transport failures ─────────────────────────────────────────────

#[tokio::test]
async fn busy_server_is_service_unavailable() {
    let server = http_stub::serve(vec![full_response(
        "503 Service Unavailable",
        "application/json",
        r#"{"error":"server busy, please try again.  maximum pending requests exceeded"}"#,
    )])
    .await;

    let client = ollama(&config(Provider::Ollama, &server.base_url, true));
    match client.infer(&request()).await.unwrap_err() {
        LlmError::ServiceUnavailable(message) => {
            assert!(message.contains("503"), "{}", message);
            assert!(message.contains("server busy"), "{}", message);
        }
        other => panic!("expected ServiceUnavailable, got {:?}", other),
    }
}

#[tokio::test]
async fn refused_connection_is_service_unavailable() {
    let url = http_stub::refused_url().await;
    let client = ollama(&config(Provider::Ollama, &url, true));
    let err = client.infer(&request()).await.unwrap_err();
    assert!(matches!(err, LlmError::ServiceUnavailable(_)), "{:?}", err);
}

#[tokio::test]
async fn silent_server_hits_the_request_timeout() {
    let server = http_stub::hang().await;
    let mut cfg = config(Provider::Ollama, &server.base_url, true);
    cfg.timeout_secs = 1;

    let client = ollama(&cfg);
    let err = client.infer(&request()).await.unwrap_err();
    assert!(
        matches!(err, LlmError::Timeout(limit) if limit == Duration::from_secs(1)),
        "{:?}",
        err
    );
}

// ── OpenAI-compatible ──────────────────────────────────────────────

#[tokio::test]
async fn openai_streams_sse_until_done() {
    let server = http_stub::serve(vec![
        stream_head("text/event-stream"),
        b"data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\n".to_vec(),
        b": keep-alive\n\ndata: {\"choices\":[{\"delta\":{\"content\":\"The word \"}}]}\n\n"
            .to_vec(),
        b"data: {\"choices\":[{\"delta\":{\"con".to_vec(),
        b"tent\":\"is TEST.\"}}]}\n\n".to_vec(),
        b"data: {\"choices\":[],\"usage\":{\"prompt_tokens\":80,\"completion_tokens\":4}}\n\n"
            .to_vec(),
        b"data: [DONE]\n\n".to_vec(),
    ])
    .await;

    let mut cfg = config(Provider::OpenAi, &server.base_url, true);
    cfg.api_key = Some("sk-test".to_string());
    let client = openai(&cfg);
    let answer = client.infer(&request()).await.unwrap();
    assert_eq!(answer, "The word is TEST.");

    let raw = server.request().await;
    assert!(raw.starts_with("POST /v1/chat/completions "));
    assert!(raw.to_lowercase().contains("authorization: bearer sk-test"));
    let body = body_json(&raw);
    assert_eq!(body["stream"], true);
    assert_eq!(body["stream_options"]["include_usage"], true);
    assert_eq!(body["messages"][0]["role"], "system");
    assert!(body["messages"][1]["content"].is_string());
}

#[tokio::test]
async fn openai_base_url_with_v1_suffix() {
    let server = http_stub::serve(vec![full_response(
        "200 OK",
        "application/json",
        r#"{"choices":[{"message":{"role":"assistant","content":"TEST"}}],"usage":{"prompt_tokens":3,"completion_tokens":1}}"#,
    )])
    .await;

    let client = openai(&config(
        Provider::OpenAi,
        &format!("{}/v1/", server.base_url),
        false,
    ));
    assert_eq!(client.infer(&request()).await.unwrap(), "TEST");

    let raw = server.request().await;
    assert!(raw.starts_with("POST /v1/chat/completions "));
    assert!(!raw.to_lowercase().contains("authorization:"));
}

#[tokio::test]
async fn openai_attached_image_is_a_data_uri_part() {
    let server = http_stub::serve(vec![full_response(
        "200 OK",
        "application/json",
        r#"{"choices":[{"message":{"content":"A receipt."}}]}"#,
    )])
    .await;

    let mut req = request();
    req.raw_image = Some(AttachedImage::new(ImageKind::Jpeg, vec![0xff, 0xd8, 0xff]));
    let client = openai(&config(Provider::OpenAi, &server.base_url, false));
    client.infer(&req).await.unwrap();

    let body = body_json(&server.request().await);
    let parts = body["messages"][1]["content"].as_array().unwrap();
    assert_eq!(parts[0]["type"], "text");
    assert_eq!(parts[1]["type"], "image_url");
    assert_eq!(parts[1]["image_url"]["url"], "data:image/jpeg;base64,/9j/");
}

#[tokio::test]
async fn openai_auth_failure_carries_the_api_message() {
    let server = http_stub::serve(vec![full_response(
        "401 Unauthorized",
        "application/json",
        r#"{"error":{"message":"Incorrect API key provided","type":"invalid_request_error"}}"#,
    )])
    .await;

    let client = openai(&config(Provider::OpenAi, &server.base_url, true));
    match client.infer(&request()).await.unwrap_err() {
        LlmError::ModelResponse(message) => {
            assert!(message.contains("401"), "{}", message);
            assert!(message.contains("Incorrect API key provided"), "{}", message);
        }
        other => panic!("expected ModelResponse, got {:?}", other),
    }
}

#[tokio::test]
async fn openai_stream_with_finish_reason_but_no_done_keeps_the_text() {
    let server = http_stub::serve(vec![
        stream_head("text/event-stream"),
        b"data: {\"choices\":[{\"delta\":{\"content\":\"TEST\"},\"finish_reason\":null}]}\n\n"
            .to_vec(),
        b"data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"stop\"}]}\n\n".to_vec(),
    ])
    .await;

    let client = openai(&config(Provider::OpenAi, &server.base_url, true));
    assert_eq!(client.infer(&request()).await.unwrap(), "TEST");
}

#[tokio::test]
async fn openai_stream_cut_before_finish_is_a_model_response_error() {
    let server = http_stub::serve(vec![
        stream_head("text/event-stream"),
        b"data: {\"choices\":[{\"delta\":{\"content\":\"half an ans\"},\"finish_reason\":null}]}\n\n"
            .to_vec(),
    ])
    .await;

    let client = openai(&config(Provider::OpenAi, &server.base_url, true));
    let err = client.infer(&request()).await.unwrap_err();
    assert!(matches!(err, LlmError::ModelResponse(_)), "{:?}", err);
}

// ── Through the pipeline ───────────────────────────────────────────

fn pipeline_against(config: &LlmConfig, recognized: &str) -> Pipeline {
    let (_, recognizer) = helpers::spelling_recognizer(recognized);
    let llm: Arc<dyn LlmClient> = Arc::new(ollama(config));
    Pipeline::new(
        Arc::new(recognizer) as Arc<dyn TextRecognizer>,
        PromptComposer::default(),
        llm,
        PipelineOptions::default(),
    )
}

#[tokio::test]
async fn pipeline_answer_comes_from_the_service() {
    let server = http_stub::serve(vec![
        stream_head("application/x-ndjson"),
        b"{\"message\":{\"content\":\"It says TEST.\"},\"done\":false}\n".to_vec(),
        b"{\"message\":{\"content\":\"\"},\"done\":true}\n".to_vec(),
    ])
    .await;

    let pipeline = pipeline_against(&config(Provider::Ollama, &server.base_url, true), "TEST");
    let result = pipeline.analyze(&helpers::word_png(4), "").await.unwrap();
    assert_eq!(result.text, "It says TEST.");
    assert_eq!(result.extracted_text, "TEST");
    assert!(result.used_default_instruction);
    assert_eq!(result.trace.last(), Some(&PipelineState::Done));

    let body = body_json(&server.request().await);
    let user = body["messages"][1]["content"].as_str().unwrap();
    assert!(user.contains("TEST"));
}

#[tokio::test]
async fn pipeline_reports_unreachable_service_as_retryable() {
    let url = http_stub::refused_url().await;
    let pipeline = pipeline_against(&config(Provider::Ollama, &url, true), "TEST");

    let failure = pipeline
        .analyze(&helpers::word_png(4), "Summarize")
        .await
        .unwrap_err();
    assert_eq!(failure.stage, Stage::Inferring);
    assert!(matches!(failure.error, AnalysisError::ServiceUnavailable(_)));
    assert!(failure.error.is_retryable());
}

#[tokio::test]
async fn pipeline_reports_bad_gateway_as_retryable() {
    let server = http_stub::serve(vec![full_response(
        "502 Bad Gateway",
        "text/html",
        "<html>upstream connect error</html>",
    )])
    .await;
    let pipeline = pipeline_against(&config(Provider::Ollama, &server.base_url, true), "TEST");

    let failure = pipeline
        .analyze(&helpers::word_png(4), "Summarize")
        .await
        .unwrap_err();
    assert_eq!(failure.stage, Stage::Inferring);
    assert!(matches!(failure.error, AnalysisError::ServiceUnavailable(_)));
    assert!(failure.error.is_retryable());
}

#[tokio::test]
async fn one_connection_serves_every_request() {
    let connection = http_stub::direct_connection();
    let mut answers = Vec::new();
    for reply in ["first", "second"] {
        let server = http_stub::serve(vec![full_response(
            "200 OK",
            "application/json",
            &format!(r#"{{"message":{{"content":"{}"}},"done":true}}"#, reply),
        )])
        .await;
        let client = OllamaClient::from_config(
            &config(Provider::Ollama, &server.base_url, false),
            connection.clone(),
        );
        answers.push(client.infer(&request()).await.unwrap());
    }
    assert_eq!(answers, ["first", "second"]);
    assert_eq!(connection.init_count(), 1);
}
