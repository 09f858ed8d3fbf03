//! LLM execution tools: the capability trait, call types and decorators.
//!
//! Every provider adapter and every decorator implements
//! [`LlmExecutionTools`]. A tool declares which model variants it supports
//! through [`ModelCapabilities`]; decorators report the capabilities of what
//! they wrap, so wrapping never adds or hides a variant.
//!
//! ## Architecture
//!
//! ```text
//! AttemptController ──► call_common_model() ──► LlmExecutionTools
//!                                                     │
//!          UsageLimitTools / UsageCountingTools / CachedTools / RateLimitedTools
//!                                                     │
//!                                        MultiLlmExecutionTools (failover)
//!                                                     │
//!                        ┌────────────────────────────┼───────────────┐
//!               OllamaExecutionTools            ScriptedTools     MockedEchoTools
//!          /api/chat /api/generate /api/embeddings
//! ```

pub mod backoff;
pub mod cache;
pub mod counting;
pub mod limit;
pub mod mock;
pub mod ollama;
pub mod rate_limit;
pub mod router;

pub use backoff::{BackoffConfig, JitterStrategy};
pub use cache::{CacheItem, CachedTools};
pub use counting::UsageCountingTools;
pub use limit::{UsageLimitTools, UsageLimits};
pub use mock::{FailingTools, MockedEchoTools, ScriptedTools};
pub use ollama::OllamaExecutionTools;
pub use rate_limit::RateLimitedTools;
pub use router::MultiLlmExecutionTools;

use crate::error::Result;
use crate::expectations::{ExpectFormat, Expectations};
use crate::types::{ModelRequirements, ModelVariant};
use crate::usage::Usage;
use crate::PipelineError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;

/// Type alias for the callback invoked before each transport retry.
///
/// Arguments: `(attempt_number, delay_before_retry, reason_for_retry)`.
pub type RetryCallback<'a> = Option<&'a mut (dyn FnMut(u32, Duration, &str) + Send)>;

/// The set of model variants a tool can call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ModelCapabilities {
    pub chat: bool,
    pub completion: bool,
    pub embedding: bool,
}

impl ModelCapabilities {
    pub const NONE: Self = Self {
        chat: false,
        completion: false,
        embedding: false,
    };

    pub const ALL: Self = Self {
        chat: true,
        completion: true,
        embedding: true,
    };

    /// Chat and completion, no embeddings.
    pub const TEXT: Self = Self {
        chat: true,
        completion: true,
        embedding: false,
    };

    pub fn only(variant: ModelVariant) -> Self {
        Self::NONE.with(variant)
    }

    pub fn with(mut self, variant: ModelVariant) -> Self {
        match variant {
            ModelVariant::Chat => self.chat = true,
            ModelVariant::Completion => self.completion = true,
            ModelVariant::Embedding => self.embedding = true,
        }
        self
    }

    pub fn supports(&self, variant: ModelVariant) -> bool {
        match variant {
            ModelVariant::Chat => self.chat,
            ModelVariant::Completion => self.completion,
            ModelVariant::Embedding => self.embedding,
        }
    }

    pub fn union(self, other: Self) -> Self {
        Self {
            chat: self.chat || other.chat,
            completion: self.completion || other.completion,
            embedding: self.embedding || other.embedding,
        }
    }
}

/// A rendered request to a model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Prompt {
    /// Title of the template that produced this prompt.
    pub title: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pipeline_url: Option<String>,

    /// Parameters the content was rendered with.
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,

    /// Rendered content sent to the model.
    pub content: String,

    pub model_requirements: ModelRequirements,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expectations: Option<Expectations>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expect_format: Option<ExpectFormat>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub postprocessing: Vec<String>,
}

impl Prompt {
    /// A prompt with only title, content and requirements set.
    pub fn new(
        title: impl Into<String>,
        content: impl Into<String>,
        model_requirements: ModelRequirements,
    ) -> Self {
        Self {
            title: title.into(),
            pipeline_url: None,
            parameters: BTreeMap::new(),
            content: content.into(),
            model_requirements,
            expectations: None,
            expect_format: None,
            postprocessing: Vec::new(),
        }
    }

    pub fn with_parameter(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(name.into(), value.into());
        self
    }
}

/// When a call started and completed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PromptTiming {
    pub start: DateTime<Utc>,
    pub complete: DateTime<Utc>,
}

impl PromptTiming {
    /// Timing of a call that started at `start` and completes now.
    pub fn since(start: DateTime<Utc>) -> Self {
        Self {
            start,
            complete: Utc::now(),
        }
    }

    /// Duration in seconds; zero if the clock went backwards.
    pub fn duration_secs(&self) -> f64 {
        (self.complete - self.start)
            .to_std()
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0)
    }
}

/// Result of a chat or completion call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptResult {
    pub content: String,
    pub model_name: String,
    pub timing: PromptTiming,
    pub usage: Usage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_response: Option<serde_json::Value>,
}

/// Result of an embedding call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmbeddingPromptResult {
    pub content: Vec<f32>,
    pub model_name: String,
    pub timing: PromptTiming,
    pub usage: Usage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_response: Option<serde_json::Value>,
}

/// Result of any call, tagged by model variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "variant", rename_all = "UPPERCASE")]
pub enum CommonPromptResult {
    Chat(PromptResult),
    Completion(PromptResult),
    Embedding(EmbeddingPromptResult),
}

impl CommonPromptResult {
    pub fn variant(&self) -> ModelVariant {
        match self {
            CommonPromptResult::Chat(_) => ModelVariant::Chat,
            CommonPromptResult::Completion(_) => ModelVariant::Completion,
            CommonPromptResult::Embedding(_) => ModelVariant::Embedding,
        }
    }

    pub fn usage(&self) -> Usage {
        match self {
            CommonPromptResult::Chat(r) | CommonPromptResult::Completion(r) => r.usage,
            CommonPromptResult::Embedding(r) => r.usage,
        }
    }

    pub fn model_name(&self) -> &str {
        match self {
            CommonPromptResult::Chat(r) | CommonPromptResult::Completion(r) => &r.model_name,
            CommonPromptResult::Embedding(r) => &r.model_name,
        }
    }

    /// The result as a parameter value. Embeddings become a JSON array.
    pub fn to_text(&self) -> Result<String> {
        match self {
            CommonPromptResult::Chat(r) | CommonPromptResult::Completion(r) => {
                Ok(r.content.clone())
            }
            CommonPromptResult::Embedding(r) => Ok(serde_json::to_string(&r.content)?),
        }
    }

    /// Unwrap a chat or completion result.
    pub fn into_prompt_result(self) -> Result<PromptResult> {
        match self {
            CommonPromptResult::Chat(r) | CommonPromptResult::Completion(r) => Ok(r),
            CommonPromptResult::Embedding(_) => Err(PipelineError::Unexpected(
                "Expected a text result but got an embedding".to_string(),
            )),
        }
    }

    /// Unwrap an embedding result.
    pub fn into_embedding_result(self) -> Result<EmbeddingPromptResult> {
        match self {
            CommonPromptResult::Embedding(r) => Ok(r),
            other => Err(PipelineError::Unexpected(format!(
                "Expected an embedding result but got a {} result",
                other.variant()
            ))),
        }
    }
}

/// A model a tool can call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailableModel {
    pub model_title: String,
    pub model_name: String,
    pub model_variant: ModelVariant,
}

/// Capability contract of every LLM provider and decorator.
///
/// Only the `call_*_model` methods named in [`capabilities`](Self::capabilities)
/// may be called; the default implementations fail with
/// [`PipelineError::UnsupportedVariant`].
///
/// # Object Safety
///
/// This trait is object-safe and designed to be used as
/// `Arc<dyn LlmExecutionTools>`.
#[async_trait]
pub trait LlmExecutionTools: Send + Sync {
    /// Human-readable name for logging, reports and failover messages.
    fn title(&self) -> &str;

    fn description(&self) -> &str {
        ""
    }

    /// Which `call_*_model` methods this tool implements.
    fn capabilities(&self) -> ModelCapabilities;

    /// Verify credentials and connectivity. Succeeds by default.
    async fn check_configuration(&self) -> Result<()> {
        Ok(())
    }

    async fn list_models(&self) -> Result<Vec<AvailableModel>>;

    async fn call_chat_model(&self, _prompt: &Prompt) -> Result<PromptResult> {
        Err(PipelineError::UnsupportedVariant {
            variant: ModelVariant::Chat.to_string(),
        })
    }

    async fn call_completion_model(&self, _prompt: &Prompt) -> Result<PromptResult> {
        Err(PipelineError::UnsupportedVariant {
            variant: ModelVariant::Completion.to_string(),
        })
    }

    async fn call_embedding_model(&self, _prompt: &Prompt) -> Result<EmbeddingPromptResult> {
        Err(PipelineError::UnsupportedVariant {
            variant: ModelVariant::Embedding.to_string(),
        })
    }
}

/// Call one specific variant on `tools`, regardless of the prompt's own
/// model variant.
pub async fn call_variant(
    tools: &dyn LlmExecutionTools,
    variant: ModelVariant,
    prompt: &Prompt,
) -> Result<CommonPromptResult> {
    Ok(match variant {
        ModelVariant::Chat => CommonPromptResult::Chat(tools.call_chat_model(prompt).await?),
        ModelVariant::Completion => {
            CommonPromptResult::Completion(tools.call_completion_model(prompt).await?)
        }
        ModelVariant::Embedding => {
            CommonPromptResult::Embedding(tools.call_embedding_model(prompt).await?)
        }
    })
}

/// Dispatch `prompt` by its `model_requirements.model_variant`.
///
/// Calling a variant the tool does not support is a configuration error.
pub async fn call_common_model(
    tools: &dyn LlmExecutionTools,
    prompt: &Prompt,
) -> Result<CommonPromptResult> {
    let variant = prompt.model_requirements.model_variant;
    if !tools.capabilities().supports(variant) {
        return Err(PipelineError::UnsupportedVariant {
            variant: variant.to_string(),
        });
    }
    call_variant(tools, variant, prompt).await
}

/// Turn a title into a lowercase, dash-separated name usable as a file name.
///
/// ```
/// use prompt_pipeline::backend::title_to_name;
///
/// assert_eq!(title_to_name("Write a Bio!"), "write-a-bio");
/// ```
pub fn title_to_name(title: &str) -> String {
    let mut name = String::with_capacity(title.len());
    for c in title.chars() {
        if c.is_alphanumeric() {
            name.extend(c.to_lowercase());
        } else if !name.is_empty() && !name.ends_with('-') {
            name.push('-');
        }
    }
    while name.ends_with('-') {
        name.pop();
    }
    name
}

/// Check whether a [`PipelineError`] is retryable based on the backoff config.
///
/// Retryable conditions:
/// - [`PipelineError::HttpError`] with a status in `config.retryable_statuses`
/// - [`PipelineError::Request`] (connection/transport errors)
pub fn is_retryable(error: &PipelineError, config: &BackoffConfig) -> bool {
    match error {
        PipelineError::HttpError { status, .. } => config.retryable_statuses.contains(status),
        PipelineError::Request(_) => true,
        _ => false,
    }
}

/// Run `call` with transport-level retry and exponential backoff.
///
/// Retries transient failures (429, 5xx, connection errors) according to
/// the [`BackoffConfig`]. Returns the first success, or the last error once
/// retries are exhausted or a non-retryable error occurs.
///
/// * `config` - Backoff configuration
/// * `on_retry` - Optional callback invoked before each retry with (attempt, delay, reason)
/// * `call` - Produces a fresh request future per attempt
pub async fn with_backoff<T, F, Fut>(
    config: &BackoffConfig,
    mut on_retry: RetryCallback<'_>,
    mut call: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut last_error: Option<PipelineError> = None;
    let mut previous_delay: Option<Duration> = None;

    for attempt in 0..=config.max_retries {
        // Wait for backoff delay (not on first attempt)
        if attempt > 0 {
            let retry_after = match &last_error {
                Some(PipelineError::HttpError { retry_after, .. }) => *retry_after,
                _ => None,
            };
            let delay = config.next_delay(attempt - 1, previous_delay, retry_after);
            previous_delay = Some(delay);

            let reason = last_error
                .as_ref()
                .map(|e| e.to_string())
                .unwrap_or_default();

            if let Some(ref mut cb) = on_retry {
                cb(attempt, delay, &reason);
            }

            tokio::time::sleep(delay).await;
        }

        match call().await {
            Ok(response) => return Ok(response),
            Err(e) => {
                if attempt < config.max_retries && is_retryable(&e, config) {
                    last_error = Some(e);
                    continue;
                }
                return Err(e);
            }
        }
    }

    Err(last_error.unwrap_or(PipelineError::Unexpected(
        "backoff loop exited unexpectedly".into(),
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_is_retryable_429() {
        let config = BackoffConfig::standard();
        let err = PipelineError::HttpError {
            status: 429,
            body: "rate limited".into(),
            retry_after: None,
        };
        assert!(is_retryable(&err, &config));
    }

    #[test]
    fn test_is_retryable_400_not_retried() {
        let config = BackoffConfig::standard();
        let err = PipelineError::HttpError {
            status: 400,
            body: "bad request".into(),
            retry_after: None,
        };
        assert!(!is_retryable(&err, &config));
    }

    #[test]
    fn test_is_retryable_other_error_not_retried() {
        let config = BackoffConfig::standard();
        assert!(!is_retryable(&PipelineError::Other("x".into()), &config));
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_backoff_retries_then_succeeds() {
        let calls = AtomicU32::new(0);
        let mut retries = Vec::new();
        let mut on_retry = |attempt: u32, _delay: Duration, reason: &str| {
            retries.push((attempt, reason.to_string()));
        };

        let result = with_backoff(&BackoffConfig::standard(), Some(&mut on_retry), || async {
            if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(PipelineError::HttpError {
                    status: 503,
                    body: "busy".into(),
                    retry_after: Some(Duration::from_secs(2)),
                })
            } else {
                Ok("done")
            }
        })
        .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(retries.len(), 1);
        assert_eq!(retries[0].0, 1);
        assert!(retries[0].1.contains("503"));
    }

    #[tokio::test]
    async fn test_with_backoff_none_does_not_retry() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = with_backoff(&BackoffConfig::none(), None, || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(PipelineError::HttpError {
                status: 429,
                body: "slow down".into(),
                retry_after: None,
            })
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_capabilities() {
        let caps = ModelCapabilities::only(ModelVariant::Chat);
        assert!(caps.supports(ModelVariant::Chat));
        assert!(!caps.supports(ModelVariant::Embedding));
        let both = caps.union(ModelCapabilities::only(ModelVariant::Embedding));
        assert!(both.supports(ModelVariant::Embedding));
        assert!(!both.supports(ModelVariant::Completion));
    }

    #[test]
    fn test_title_to_name() {
        assert_eq!(title_to_name("  Hello,  World  "), "hello-world");
        assert_eq!(title_to_name("Šťastný den"), "šťastný-den");
        assert_eq!(title_to_name("---"), "");
    }

    #[test]
    fn test_embedding_text_is_json_array() {
        let now = Utc::now();
        let result = CommonPromptResult::Embedding(EmbeddingPromptResult {
            content: vec![0.5, 1.0],
            model_name: "embed".into(),
            timing: PromptTiming {
                start: now,
                complete: now,
            },
            usage: Usage::ZERO,
            raw_response: None,
        });
        assert_eq!(result.to_text().unwrap(), "[0.5,1.0]");
        assert!(result.clone().into_prompt_result().is_err());
        assert!(result.into_embedding_result().is_ok());
    }

    #[tokio::test]
    async fn test_call_common_model_rejects_unsupported_variant() {
        let tools = ScriptedTools::fixed("hi").with_capabilities(ModelCapabilities::only(
            ModelVariant::Completion,
        ));
        let prompt = Prompt::new("t", "hello", ModelRequirements::chat());
        let err = call_common_model(&tools, &prompt).await.unwrap_err();
        assert!(matches!(err, PipelineError::UnsupportedVariant { .. }));
        assert_eq!(tools.call_count(), 0);
    }

    #[test]
    fn test_common_result_serializes_with_variant_tag() {
        let now = Utc::now();
        let result = CommonPromptResult::Chat(PromptResult {
            content: "hi".into(),
            model_name: "m".into(),
            timing: PromptTiming {
                start: now,
                complete: now,
            },
            usage: Usage::ZERO,
            raw_response: None,
        });
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["variant"], "CHAT");
        assert_eq!(value["content"], "hi");
        let back: CommonPromptResult = serde_json::from_value(value).unwrap();
        assert_eq!(back, result);
    }
}
