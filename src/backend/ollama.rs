//! Execution tools for Ollama's native API.
//!
//! [`OllamaExecutionTools`] translates [`Prompt`]s into Ollama's
//! `/api/chat`, `/api/generate` and `/api/embeddings` endpoints and lists
//! local models through `/api/tags`. Every request goes through
//! [`with_backoff`], so transient HTTP failures are retried according to the
//! configured [`BackoffConfig`].

use super::{
    with_backoff, AvailableModel, BackoffConfig, EmbeddingPromptResult, LlmExecutionTools,
    ModelCapabilities, Prompt, PromptResult, PromptTiming,
};
use crate::error::Result;
use crate::events::{emit, Event, EventHandler};
use crate::types::ModelVariant;
use crate::usage::{UncertainNumber, Usage};
use crate::PipelineError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Default Ollama address.
pub const DEFAULT_BASE_URL: &str = "http://localhost:11434";

/// Model used when a prompt does not name one.
pub const DEFAULT_MODEL: &str = "llama3.2";

/// Execution tools backed by a local or remote Ollama server.
///
/// Local inference is free, so every result has an exact price of zero.
/// Token counts come from Ollama's `prompt_eval_count`/`eval_count` when
/// present and are estimated otherwise.
///
/// # Example
///
/// ```
/// use prompt_pipeline::backend::{BackoffConfig, OllamaExecutionTools};
///
/// let tools = OllamaExecutionTools::new("http://localhost:11434/api")
///     .with_default_model("llama3.2:3b")
///     .with_backoff(BackoffConfig::interactive());
/// assert_eq!(tools.base_url(), "http://localhost:11434");
/// ```
pub struct OllamaExecutionTools {
    title: String,
    client: Client,
    base_url: String,
    default_model: String,
    backoff: BackoffConfig,
    event_handler: Option<Arc<dyn EventHandler>>,
}

impl OllamaExecutionTools {
    /// Create tools for the server at `base_url` with a 60 second timeout.
    pub fn new(base_url: impl AsRef<str>) -> Self {
        Self {
            title: "Ollama".to_string(),
            client: Client::new(),
            base_url: normalize_base_url(base_url.as_ref()),
            default_model: DEFAULT_MODEL.to_string(),
            backoff: BackoffConfig::none(),
            event_handler: None,
        }
        .with_timeout(Duration::from_secs(60))
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    /// Set the HTTP client. Overrides any timeout set before.
    pub fn with_client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }

    /// Set the request timeout.
    ///
    /// Falls back to a client without a timeout if the builder fails.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.client = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| Client::new());
        self
    }

    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = model.into();
        self
    }

    /// Set the transport retry configuration. Default: [`BackoffConfig::none()`].
    pub fn with_backoff(mut self, config: BackoffConfig) -> Self {
        self.backoff = config;
        self
    }

    /// Report transport retries as [`Event::TransportRetry`].
    pub fn with_event_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.event_handler = Some(handler);
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn model_name(&self, prompt: &Prompt) -> String {
        prompt
            .model_requirements
            .model_name
            .clone()
            .unwrap_or_else(|| self.default_model.clone())
    }

    /// Build the Ollama `options` object from the model requirements.
    fn build_options(prompt: &Prompt) -> Value {
        let mut opts = serde_json::Map::new();
        if let Some(temperature) = prompt.model_requirements.temperature {
            opts.insert("temperature".into(), json!(temperature));
        }
        if let Some(max_tokens) = prompt.model_requirements.max_tokens {
            opts.insert("num_predict".into(), json!(max_tokens));
        }
        Value::Object(opts)
    }

    /// Build the JSON body for `/api/chat`.
    fn build_chat_body(&self, prompt: &Prompt) -> Value {
        let mut messages = Vec::new();
        if let Some(ref sys) = prompt.model_requirements.system_message {
            if !sys.is_empty() {
                messages.push(json!({"role": "system", "content": sys}));
            }
        }
        messages.push(json!({"role": "user", "content": prompt.content}));

        let mut body = json!({
            "model": self.model_name(prompt),
            "messages": messages,
            "stream": false,
            "options": Self::build_options(prompt),
        });
        if prompt.expect_format.is_some() {
            body["format"] = json!("json");
        }
        body
    }

    /// Build the JSON body for `/api/generate`.
    fn build_generate_body(&self, prompt: &Prompt) -> Value {
        let mut body = json!({
            "model": self.model_name(prompt),
            "prompt": prompt.content,
            "stream": false,
            "options": Self::build_options(prompt),
        });
        if let Some(ref sys) = prompt.model_requirements.system_message {
            body["system"] = json!(sys);
        }
        if prompt.expect_format.is_some() {
            body["format"] = json!("json");
        }
        body
    }

    /// Parse a Retry-After header value as seconds.
    fn parse_retry_after(value: &str) -> Option<Duration> {
        value.trim().parse::<u64>().ok().map(Duration::from_secs)
    }

    /// Send one request and parse the JSON response.
    async fn send_once(&self, url: &str, body: Option<&Value>) -> Result<Value> {
        let request = match body {
            Some(body) => self.client.post(url).json(body),
            None => self.client.get(url),
        };
        let resp = request.send().await?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let retry_after = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(Self::parse_retry_after);
            let text = resp.text().await.unwrap_or_default();
            return Err(PipelineError::HttpError {
                status,
                body: text,
                retry_after,
            });
        }

        Ok(resp.json().await?)
    }

    /// Send a request with transport retry.
    async fn send(&self, path: &str, body: Option<&Value>) -> Result<Value> {
        let url = format!("{}{}", self.base_url, path);
        let handler = self.event_handler.clone();
        let title = self.title.clone();
        let mut on_retry = |attempt: u32, delay: Duration, reason: &str| {
            warn!(
                provider = %title,
                attempt,
                delay_ms = delay.as_millis() as u64,
                %reason,
                "Retrying Ollama request"
            );
            emit(
                &handler,
                Event::TransportRetry {
                    name: title.clone(),
                    attempt,
                    delay_ms: delay.as_millis() as u64,
                    reason: reason.to_string(),
                },
            );
        };
        with_backoff(&self.backoff, Some(&mut on_retry), || {
            self.send_once(&url, body)
        })
        .await
    }

    /// Price-free usage with token counts from Ollama when available.
    fn usage(prompt: &Prompt, content: &str, response: &Value, duration_secs: f64) -> Usage {
        let mut usage = Usage::from_texts(&prompt.content, content, duration_secs);
        if let Some(n) = response.get("prompt_eval_count").and_then(Value::as_f64) {
            usage.input.tokens_count = UncertainNumber::exact(n);
        }
        if let Some(n) = response.get("eval_count").and_then(Value::as_f64) {
            usage.output.tokens_count = UncertainNumber::exact(n);
        }
        usage
    }

    fn text_result(
        &self,
        prompt: &Prompt,
        response: Value,
        content: String,
        start: DateTime<Utc>,
    ) -> PromptResult {
        let timing = PromptTiming::since(start);
        PromptResult {
            usage: Self::usage(prompt, &content, &response, timing.duration_secs()),
            model_name: response
                .get("model")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| self.model_name(prompt)),
            content,
            timing,
            raw_response: Some(response),
        }
    }
}

#[async_trait]
impl LlmExecutionTools for OllamaExecutionTools {
    fn title(&self) -> &str {
        &self.title
    }

    fn description(&self) -> &str {
        "Local models served by Ollama"
    }

    fn capabilities(&self) -> ModelCapabilities {
        ModelCapabilities::ALL
    }

    async fn check_configuration(&self) -> Result<()> {
        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            return Err(PipelineError::InvalidConfig(format!(
                "Ollama base URL '{}' must start with http:// or https://",
                self.base_url
            )));
        }
        self.send("/api/tags", None).await.map(|_| ())
    }

    async fn list_models(&self) -> Result<Vec<AvailableModel>> {
        let response = self.send("/api/tags", None).await?;
        let models = response
            .get("models")
            .and_then(Value::as_array)
            .map(|models| {
                models
                    .iter()
                    .filter_map(|m| m.get("name").and_then(Value::as_str))
                    .map(|name| AvailableModel {
                        model_title: format!("Ollama {}", name),
                        model_name: name.to_string(),
                        model_variant: ModelVariant::Chat,
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(models)
    }

    async fn call_chat_model(&self, prompt: &Prompt) -> Result<PromptResult> {
        let start = Utc::now();
        let body = self.build_chat_body(prompt);
        let response = self.send("/api/chat", Some(&body)).await?;
        let content = response
            .get("message")
            .and_then(|m| m.get("content"))
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();
        Ok(self.text_result(prompt, response, content, start))
    }

    async fn call_completion_model(&self, prompt: &Prompt) -> Result<PromptResult> {
        let start = Utc::now();
        let body = self.build_generate_body(prompt);
        let response = self.send("/api/generate", Some(&body)).await?;
        let content = response
            .get("response")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();
        Ok(self.text_result(prompt, response, content, start))
    }

    async fn call_embedding_model(&self, prompt: &Prompt) -> Result<EmbeddingPromptResult> {
        let start = Utc::now();
        let body = json!({
            "model": self.model_name(prompt),
            "prompt": prompt.content,
        });
        let response = self.send("/api/embeddings", Some(&body)).await?;
        let content: Vec<f32> = response
            .get("embedding")
            .and_then(Value::as_array)
            .ok_or_else(|| {
                PipelineError::Other("Ollama response has no 'embedding' array".to_string())
            })?
            .iter()
            .filter_map(Value::as_f64)
            .map(|v| v as f32)
            .collect();
        let timing = PromptTiming::since(start);
        let usage = Usage::from_texts(&prompt.content, "", timing.duration_secs());
        Ok(EmbeddingPromptResult {
            content,
            model_name: self.model_name(prompt),
            timing,
            usage,
            raw_response: None,
        })
    }
}

impl std::fmt::Debug for OllamaExecutionTools {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OllamaExecutionTools")
            .field("title", &self.title)
            .field("base_url", &self.base_url)
            .field("default_model", &self.default_model)
            .field("backoff", &self.backoff)
            .field("has_event_handler", &self.event_handler.is_some())
            .finish()
    }
}

/// Strip known endpoint suffixes from a base URL.
/// This prevents double-pathing when the tools append their own paths.
/// e.g., "http://localhost:11434/api" -> "http://localhost:11434"
fn normalize_base_url(url: &str) -> String {
    let trimmed = url.trim_end_matches('/');
    // Strip known suffixes (order matters, longest first)
    for suffix in &["/api/generate", "/api/chat", "/api/embeddings", "/api"] {
        if let Some(stripped) = trimmed.strip_suffix(suffix) {
            return stripped.to_string();
        }
    }
    trimmed.to_string()
}
