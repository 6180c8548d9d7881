//! Batch summarization client.
//!
//! One [`Summarizer::summarize`] call turns a whole batch of
//! [`SummaryRequest`]s into a single prompt, makes exactly one LLM request
//! (plus optional retries on 429/5xx), and parses the JSON object the
//! model is told to return. The result is either the full [`SummaryMap`]
//! or a [`SummarizeError`] for the batch as a whole; an id missing from a
//! successful map is the caller's business, not a failure.
//!
//! # Providers
//!
//! | Provider | Endpoint | Auth |
//! |----------|----------|------|
//! | `gemini` | `POST {endpoint}/v1beta/models/{model}:generateContent` | `x-goog-api-key` |
//! | `openai` | `POST {endpoint}/chat/completions` | `Authorization: Bearer` |
//!
//! The `openai` provider works with any OpenAI-compatible endpoint
//! (OpenRouter, vLLM, Ollama's `/v1`).

use anyhow::bail;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::{LlmConfig, LlmProvider};
use crate::models::{SummaryMap, SummaryRequest, NO_SUMMARY};

const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com";
const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Why a whole batch got no summaries.
#[derive(Debug, Error)]
pub enum SummarizeError {
    #[error("no LLM API key configured (set llm.api_key or {0})")]
    MissingCredential(String),
    #[error("LLM endpoint unreachable: {0}")]
    Unreachable(String),
    #[error("LLM provider rejected credentials ({status}): {body}")]
    AuthRejected { status: u16, body: String },
    #[error("LLM provider error {status}: {body}")]
    Provider { status: u16, body: String },
    #[error("LLM request timed out after {0}s")]
    Timeout(u64),
    #[error("LLM response contained no text")]
    EmptyResponse,
    #[error("no JSON object found in LLM response")]
    NoJsonObject,
    #[error("invalid JSON in LLM response: {0}")]
    InvalidJson(String),
}

impl SummarizeError {
    /// The provider cannot be reached or will not accept us; further batches
    /// for the same collection would fail the same way.
    pub fn is_connectivity(&self) -> bool {
        matches!(
            self,
            SummarizeError::Unreachable(_) | SummarizeError::AuthRejected { .. }
        )
    }

    /// Nothing in this run can succeed.
    pub fn is_fatal(&self) -> bool {
        matches!(self, SummarizeError::MissingCredential(_))
    }
}

/// Turns a batch into raw per-id summaries.
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, batch: &[SummaryRequest]) -> Result<SummaryMap, SummarizeError>;
}

/// A chat-style completion endpoint: system instruction plus one user
/// message in, free text out.
#[async_trait]
pub trait LlmBackend: Send + Sync {
    fn model(&self) -> &str;

    async fn complete(&self, system: &str, user: &str) -> Result<String, SummarizeError>;
}

pub const SYSTEM_INSTRUCTION: &str = r#"You are an analyst who reads online discussions and retells them as short, insightful narratives. You will receive a batch of discussions, each introduced by a unique ID.

For each discussion write one cohesive paragraph that covers what started the conversation, the dominant view and the reasoning behind it, any significant dissenting view and why it was raised, and the takeaway a reader should leave with. Explain why opinions differed instead of saying the feedback was mixed.

OUTPUT FORMAT: your entire response must be one valid JSON object that starts with { and ends with }. Its keys are the discussion IDs exactly as given and its values are the summary strings. Do not write anything outside the JSON object and do not use markdown.

Never refer to "the post", "the comments", "the user" or "OP". Each summary must be a single paragraph with no lists or headings.

If a discussion lacks enough substance for such a narrative, its value must be exactly the string "NoSummaryGenerated".

Example:
{"abc123": "When a new contributor asked whether to learn async before lifetimes, most replies argued lifetimes come first because async code surfaces them constantly, while a smaller group countered that shipping a small async service teaches both at once, leaving the takeaway that the order matters less than building something real.", "def456": "NoSummaryGenerated"}"#;

/// Combine a batch into one prompt with explicit per-item delimiters.
pub fn build_prompt(batch: &[SummaryRequest]) -> String {
    batch
        .iter()
        .map(|item| {
            format!(
                "--- DISCUSSION START ---\nID: {}\nCONTENT:\n{}\n--- DISCUSSION END ---",
                item.id, item.text
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// The span from the first `{` to the last `}`, inclusive.
pub fn extract_json_object(text: &str) -> Result<&str, SummarizeError> {
    let start = text.find('{').ok_or(SummarizeError::NoJsonObject)?;
    let end = text.rfind('}').ok_or(SummarizeError::NoJsonObject)?;
    if end < start {
        return Err(SummarizeError::NoJsonObject);
    }
    Ok(&text[start..=end])
}

/// Parse the model's reply into id → raw summary.
///
/// Non-string values are dropped, so those ids read as missing.
pub fn parse_summary_map(text: &str) -> Result<SummaryMap, SummarizeError> {
    let span = extract_json_object(text)?;
    let object: serde_json::Map<String, Value> =
        serde_json::from_str(span).map_err(|e| SummarizeError::InvalidJson(e.to_string()))?;

    Ok(object
        .into_iter()
        .filter_map(|(id, value)| match value {
            Value::String(s) => Some((id, s)),
            _ => None,
        })
        .collect())
}

/// [`Summarizer`] that sends each batch to an [`LlmBackend`] in one call
/// and then waits `rate_limit_delay` whatever the outcome.
pub struct BatchSummarizer {
    backend: Box<dyn LlmBackend>,
    rate_limit_delay: Duration,
}

impl BatchSummarizer {
    pub fn new(backend: Box<dyn LlmBackend>, rate_limit_delay: Duration) -> Self {
        Self {
            backend,
            rate_limit_delay,
        }
    }

    /// Build from `[llm]`. Fails when the provider is disabled or the API
    /// key is missing.
    pub fn from_config(config: &LlmConfig) -> anyhow::Result<Self> {
        let backend = create_backend(config)?;
        Ok(Self::new(
            backend,
            Duration::from_millis(config.rate_limit_delay_ms),
        ))
    }

    pub fn model(&self) -> &str {
        self.backend.model()
    }
}

#[async_trait]
impl Summarizer for BatchSummarizer {
    async fn summarize(&self, batch: &[SummaryRequest]) -> Result<SummaryMap, SummarizeError> {
        if batch.is_empty() {
            return Ok(SummaryMap::new());
        }

        let prompt = build_prompt(batch);
        debug!(
            model = self.backend.model(),
            items = batch.len(),
            prompt_chars = prompt.len(),
            "sending summarization batch"
        );

        let result = self.backend.complete(SYSTEM_INSTRUCTION, &prompt).await;

        if !self.rate_limit_delay.is_zero() {
            tokio::time::sleep(self.rate_limit_delay).await;
        }

        let text = result?;
        if text.trim().is_empty() {
            return Err(SummarizeError::EmptyResponse);
        }
        let map = parse_summary_map(&text)?;

        let sentinels = map.values().filter(|s| s.trim() == NO_SUMMARY).count();
        debug!(returned = map.len(), sentinels, "parsed summary map");
        Ok(map)
    }
}

/// Create the backend for the configured provider.
pub fn create_backend(config: &LlmConfig) -> anyhow::Result<Box<dyn LlmBackend>> {
    match config.provider {
        LlmProvider::Disabled => {
            bail!("LLM provider is disabled. Set [llm].provider to gemini or openai.")
        }
        LlmProvider::Gemini => Ok(Box::new(GeminiBackend::new(config)?)),
        LlmProvider::OpenAi => Ok(Box::new(OpenAiBackend::new(config)?)),
    }
}

/// Settings shared by both HTTP backends.
struct HttpSettings {
    client: reqwest::Client,
    api_key: String,
    model: String,
    temperature: f32,
    max_output_tokens: u32,
    timeout_secs: u64,
    max_retries: u32,
}

impl HttpSettings {
    fn new(config: &LlmConfig) -> Result<Self, SummarizeError> {
        let api_key = config
            .resolve_api_key()
            .ok_or_else(|| SummarizeError::MissingCredential(config.key_env_var()))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| SummarizeError::Unreachable(e.to_string()))?;

        Ok(Self {
            client,
            api_key,
            model: config.model_name(),
            temperature: config.temperature,
            max_output_tokens: config.max_output_tokens,
            timeout_secs: config.timeout_secs,
            max_retries: config.max_retries,
        })
    }

    /// POST `body` to `url`, retrying 429/5xx and transport errors with
    /// exponential backoff.
    ///
    /// - 401/403 → [`SummarizeError::AuthRejected`], no retry
    /// - other 4xx → [`SummarizeError::Provider`], no retry
    async fn post_json(
        &self,
        url: &str,
        headers: &[(&str, String)],
        body: &Value,
    ) -> Result<Value, SummarizeError> {
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                // 1s, 2s, 4s, ... capped at 32s
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let mut request = self.client.post(url).json(body);
            for (name, value) in headers {
                request = request.header(*name, value);
            }

            match request.send().await {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        return response
                            .json::<Value>()
                            .await
                            .map_err(|_| SummarizeError::EmptyResponse);
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    let code = status.as_u16();

                    if code == 401 || code == 403 {
                        return Err(SummarizeError::AuthRejected {
                            status: code,
                            body: body_text,
                        });
                    }

                    let err = SummarizeError::Provider {
                        status: code,
                        body: body_text,
                    };
                    if code == 429 || status.is_server_error() {
                        warn!(status = code, attempt, "LLM provider error, will retry if allowed");
                        last_err = Some(err);
                        continue;
                    }
                    return Err(err);
                }
                Err(e) => {
                    let err = if e.is_timeout() {
                        SummarizeError::Timeout(self.timeout_secs)
                    } else {
                        SummarizeError::Unreachable(e.to_string())
                    };
                    warn!(error = %err, attempt, "LLM request failed");
                    last_err = Some(err);
                }
            }
        }

        Err(last_err.unwrap_or(SummarizeError::EmptyResponse))
    }
}

// ============ Gemini ============

pub struct GeminiBackend {
    http: HttpSettings,
    base_url: String,
}

impl GeminiBackend {
    pub fn new(config: &LlmConfig) -> Result<Self, SummarizeError> {
        Ok(Self {
            http: HttpSettings::new(config)?,
            base_url: config
                .endpoint
                .clone()
                .unwrap_or_else(|| GEMINI_BASE_URL.to_string()),
        })
    }
}

#[async_trait]
impl LlmBackend for GeminiBackend {
    fn model(&self) -> &str {
        &self.http.model
    }

    async fn complete(&self, system: &str, user: &str) -> Result<String, SummarizeError> {
        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url.trim_end_matches('/'),
            self.http.model
        );
        let threshold = "BLOCK_ONLY_HIGH";
        let body = json!({
            "systemInstruction": { "parts": [{ "text": system }] },
            "contents": [{ "role": "user", "parts": [{ "text": user }] }],
            "generationConfig": {
                "temperature": self.http.temperature,
                "topP": 1,
                "topK": 1,
                "maxOutputTokens": self.http.max_output_tokens,
            },
            "safetySettings": [
                { "category": "HARM_CATEGORY_HARASSMENT", "threshold": threshold },
                { "category": "HARM_CATEGORY_HATE_SPEECH", "threshold": threshold },
                { "category": "HARM_CATEGORY_SEXUALLY_EXPLICIT", "threshold": threshold },
                { "category": "HARM_CATEGORY_DANGEROUS_CONTENT", "threshold": threshold },
            ],
        });

        let json = self
            .http
            .post_json(&url, &[("x-goog-api-key", self.http.api_key.clone())], &body)
            .await?;
        parse_gemini_response(&json)
    }
}

/// Concatenate the text parts of the first candidate.
fn parse_gemini_response(json: &Value) -> Result<String, SummarizeError> {
    let parts = json
        .pointer("/candidates/0/content/parts")
        .and_then(|p| p.as_array())
        .ok_or(SummarizeError::EmptyResponse)?;

    let text: String = parts
        .iter()
        .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
        .collect();
    Ok(text.trim().to_string())
}

// ============ OpenAI-compatible ============

pub struct OpenAiBackend {
    http: HttpSettings,
    base_url: String,
}

impl OpenAiBackend {
    pub fn new(config: &LlmConfig) -> Result<Self, SummarizeError> {
        Ok(Self {
            http: HttpSettings::new(config)?,
            base_url: config
                .endpoint
                .clone()
                .unwrap_or_else(|| OPENAI_BASE_URL.to_string()),
        })
    }
}

#[async_trait]
impl LlmBackend for OpenAiBackend {
    fn model(&self) -> &str {
        &self.http.model
    }

    async fn complete(&self, system: &str, user: &str) -> Result<String, SummarizeError> {
        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        let body = json!({
            "model": self.http.model,
            "messages": [
                { "role": "system", "content": system },
                { "role": "user", "content": user },
            ],
            "temperature": self.http.temperature,
            "max_tokens": self.http.max_output_tokens,
        });

        let json = self
            .http
            .post_json(
                &url,
                &[("Authorization", format!("Bearer {}", self.http.api_key))],
                &body,
            )
            .await?;

        json.pointer("/choices/0/message/content")
            .and_then(|c| c.as_str())
            .map(|c| c.trim().to_string())
            .ok_or(SummarizeError::EmptyResponse)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    enum Reply {
        Text(String),
        Unreachable,
    }

    struct CannedBackend {
        reply: Reply,
        calls: Arc<AtomicUsize>,
        last_prompt: Arc<Mutex<String>>,
    }

    #[async_trait]
    impl LlmBackend for CannedBackend {
        fn model(&self) -> &str {
            "canned"
        }

        async fn complete(&self, _system: &str, user: &str) -> Result<String, SummarizeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last_prompt.lock().unwrap() = user.to_string();
            match &self.reply {
                Reply::Text(text) => Ok(text.clone()),
                Reply::Unreachable => Err(SummarizeError::Unreachable("down".into())),
            }
        }
    }

    fn summarizer(reply: Reply) -> (BatchSummarizer, Arc<AtomicUsize>, Arc<Mutex<String>>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let prompt = Arc::new(Mutex::new(String::new()));
        let backend = CannedBackend {
            reply,
            calls: calls.clone(),
            last_prompt: prompt.clone(),
        };
        (
            BatchSummarizer::new(Box::new(backend), Duration::ZERO),
            calls,
            prompt,
        )
    }

    fn req(id: &str, text: &str) -> SummaryRequest {
        SummaryRequest {
            id: id.to_string(),
            text: text.to_string(),
        }
    }

    #[test]
    fn prompt_delimits_each_item() {
        let prompt = build_prompt(&[req("a", "first"), req("b", "second")]);
        assert_eq!(
            prompt,
            "--- DISCUSSION START ---\nID: a\nCONTENT:\nfirst\n--- DISCUSSION END ---\n\n\
             --- DISCUSSION START ---\nID: b\nCONTENT:\nsecond\n--- DISCUSSION END ---"
        );
    }

    #[test]
    fn json_span_survives_padding() {
        let map = parse_summary_map(
            "Sure! Here you go:\n```json\n{\"a\": \"one\", \"b\": \"NoSummaryGenerated\"}\n```",
        )
        .unwrap();
        assert_eq!(map["a"], "one");
        assert_eq!(map["b"], NO_SUMMARY);
    }

    #[test]
    fn missing_or_reversed_braces_is_no_json() {
        assert!(matches!(
            parse_summary_map("no braces at all"),
            Err(SummarizeError::NoJsonObject)
        ));
        assert!(matches!(
            parse_summary_map("} backwards {"),
            Err(SummarizeError::NoJsonObject)
        ));
    }

    #[test]
    fn malformed_json_is_invalid() {
        assert!(matches!(
            parse_summary_map("{\"a\": \"unterminated}"),
            Err(SummarizeError::InvalidJson(_))
        ));
        assert!(matches!(
            parse_summary_map("{\"a\": \"x\",}"),
            Err(SummarizeError::InvalidJson(_))
        ));
    }

    #[test]
    fn non_string_values_read_as_missing() {
        let map = parse_summary_map("{\"a\": \"ok\", \"b\": null, \"c\": 3}").unwrap();
        assert_eq!(map.len(), 1);
        assert!(map.contains_key("a"));
    }

    #[test]
    fn error_classification() {
        assert!(SummarizeError::Unreachable("x".into()).is_connectivity());
        assert!(SummarizeError::AuthRejected {
            status: 401,
            body: String::new()
        }
        .is_connectivity());
        assert!(!SummarizeError::Timeout(1).is_connectivity());
        assert!(!SummarizeError::NoJsonObject.is_connectivity());
        assert!(SummarizeError::MissingCredential("K".into()).is_fatal());
        assert!(!SummarizeError::Provider {
            status: 500,
            body: String::new()
        }
        .is_fatal());
    }

    #[tokio::test]
    async fn one_call_per_batch() {
        let (s, calls, prompt) = summarizer(Reply::Text("{\"a\": \"x\", \"b\": \"y\"}".to_string()));
        let map = s.summarize(&[req("a", "ta"), req("b", "tb")]).await.unwrap();
        assert_eq!(map.len(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(prompt.lock().unwrap().contains("ID: b\nCONTENT:\ntb"));
    }

    #[tokio::test]
    async fn empty_batch_makes_no_call() {
        let (s, calls, _) = summarizer(Reply::Text("{}".to_string()));
        assert!(s.summarize(&[]).await.unwrap().is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn backend_failure_fails_the_batch() {
        let (s, calls, _) = summarizer(Reply::Unreachable);
        let err = s.summarize(&[req("a", "t")]).await.unwrap_err();
        assert!(err.is_connectivity());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn blank_reply_is_empty_response() {
        let (s, _, _) = summarizer(Reply::Text("   ".to_string()));
        assert!(matches!(
            s.summarize(&[req("a", "t")]).await,
            Err(SummarizeError::EmptyResponse)
        ));
    }

    #[test]
    fn gemini_parts_are_joined() {
        let json = json!({
            "candidates": [{ "content": { "parts": [{ "text": "{\"a\": " }, { "text": "\"b\"}" }] } }]
        });
        assert_eq!(parse_gemini_response(&json).unwrap(), "{\"a\": \"b\"}");
        assert!(parse_gemini_response(&json!({ "candidates": [] })).is_err());
    }

    #[test]
    fn disabled_provider_cannot_build_a_backend() {
        let config = LlmConfig::default();
        assert!(create_backend(&config).is_err());
    }

    #[test]
    fn missing_key_is_fatal() {
        let config = LlmConfig {
            provider: LlmProvider::OpenAi,
            api_key_env: Some("THREAD_DIGEST_TEST_NO_SUCH_KEY".to_string()),
            ..LlmConfig::default()
        };
        let err = OpenAiBackend::new(&config).err().unwrap();
        assert!(err.is_fatal());
    }

    mod http {
        use super::*;
        use axum::{http::HeaderMap, http::StatusCode, routing::post, Json, Router};

        async fn spawn(app: Router) -> String {
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            tokio::spawn(async move {
                axum::serve(listener, app).await.unwrap();
            });
            format!("http://{}", addr)
        }

        fn openai_config(endpoint: String, retries: u32) -> LlmConfig {
            LlmConfig {
                provider: LlmProvider::OpenAi,
                model: Some("test-model".to_string()),
                endpoint: Some(endpoint),
                api_key: Some("sk-test".to_string()),
                max_retries: retries,
                timeout_secs: 5,
                ..LlmConfig::default()
            }
        }

        #[tokio::test]
        async fn openai_backend_sends_bearer_and_reads_content() {
            let app = Router::new().route(
                "/chat/completions",
                post(|headers: HeaderMap, Json(body): Json<Value>| async move {
                    let auth = headers
                        .get("authorization")
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or_default()
                        .to_string();
                    let content = format!(
                        "{{\"auth\": \"{}\", \"model\": \"{}\"}}",
                        auth,
                        body["model"].as_str().unwrap_or_default()
                    );
                    Json(json!({ "choices": [{ "message": { "content": content } }] }))
                }),
            );
            let url = spawn(app).await;

            let backend = OpenAiBackend::new(&openai_config(url, 0)).unwrap();
            let text = backend.complete("sys", "user").await.unwrap();
            let map = parse_summary_map(&text).unwrap();
            assert_eq!(map["auth"], "Bearer sk-test");
            assert_eq!(map["model"], "test-model");
        }

        #[tokio::test]
        async fn unauthorized_is_auth_rejected_without_retry() {
            let hits = Arc::new(AtomicUsize::new(0));
            let counter = hits.clone();
            let app = Router::new().route(
                "/chat/completions",
                post(move || {
                    let counter = counter.clone();
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        (StatusCode::UNAUTHORIZED, "bad key")
                    }
                }),
            );
            let url = spawn(app).await;

            let backend = OpenAiBackend::new(&openai_config(url, 2)).unwrap();
            let err = backend.complete("sys", "user").await.unwrap_err();
            assert!(matches!(err, SummarizeError::AuthRejected { status: 401, .. }));
            assert_eq!(hits.load(Ordering::SeqCst), 1);
        }

        #[tokio::test]
        async fn server_errors_are_retried() {
            let hits = Arc::new(AtomicUsize::new(0));
            let counter = hits.clone();
            let app = Router::new().route(
                "/chat/completions",
                post(move || {
                    let counter = counter.clone();
                    async move {
                        if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                            (StatusCode::SERVICE_UNAVAILABLE, Json(json!({})))
                        } else {
                            (
                                StatusCode::OK,
                                Json(json!({ "choices": [{ "message": { "content": "{\"a\": \"b\"}" } }] })),
                            )
                        }
                    }
                }),
            );
            let url = spawn(app).await;

            let backend = OpenAiBackend::new(&openai_config(url, 1)).unwrap();
            assert_eq!(backend.complete("s", "u").await.unwrap(), "{\"a\": \"b\"}");
            assert_eq!(hits.load(Ordering::SeqCst), 2);
        }

        #[tokio::test]
        async fn unreachable_endpoint_is_connectivity() {
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            let url = format!("http://{}", listener.local_addr().unwrap());
            drop(listener);

            let backend = OpenAiBackend::new(&openai_config(url, 0)).unwrap();
            let err = backend.complete("s", "u").await.unwrap_err();
            assert!(err.is_connectivity(), "got {:?}", err);
        }
    }
}
