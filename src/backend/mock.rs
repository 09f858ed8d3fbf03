//! Deterministic execution tools for testing without a live LLM.
//!
//! - [`ScriptedTools`] returns pre-configured responses in order and counts
//!   its calls.
//! - [`MockedEchoTools`] answers every prompt with its own content.
//! - [`FailingTools`] fails every call.
//!
//! # Example
//!
//! ```
//! use prompt_pipeline::backend::ScriptedTools;
//!
//! let mock = ScriptedTools::new(vec!["Hello, world!".to_string()]);
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::Utc;

use super::{
    AvailableModel, EmbeddingPromptResult, LlmExecutionTools, ModelCapabilities, Prompt,
    PromptResult, PromptTiming,
};
use crate::error::Result;
use crate::types::ModelVariant;
use crate::usage::Usage;
use crate::PipelineError;

const MOCK_MODEL_NAME: &str = "mocked-model";

fn text_result(prompt: &Prompt, content: String) -> PromptResult {
    let start = Utc::now();
    PromptResult {
        usage: Usage::from_texts(&prompt.content, &content, 0.0),
        content,
        model_name: prompt
            .model_requirements
            .model_name
            .clone()
            .unwrap_or_else(|| MOCK_MODEL_NAME.to_string()),
        timing: PromptTiming::since(start),
        raw_response: None,
    }
}

/// Fake embedding: per-byte values of the content, scaled to `[0, 1]`.
fn embedding_result(prompt: &Prompt) -> EmbeddingPromptResult {
    let start = Utc::now();
    EmbeddingPromptResult {
        content: prompt
            .content
            .bytes()
            .take(16)
            .map(|b| f32::from(b) / 255.0)
            .collect(),
        model_name: MOCK_MODEL_NAME.to_string(),
        timing: PromptTiming::since(start),
        usage: Usage::from_texts(&prompt.content, "", 0.0),
        raw_response: None,
    }
}

fn mocked_models(title: &str, capabilities: ModelCapabilities) -> Vec<AvailableModel> {
    [
        ModelVariant::Chat,
        ModelVariant::Completion,
        ModelVariant::Embedding,
    ]
    .into_iter()
    .filter(|variant| capabilities.supports(*variant))
    .map(|variant| AvailableModel {
        model_title: format!("{} {}", title, variant),
        model_name: MOCK_MODEL_NAME.to_string(),
        model_variant: variant,
    })
    .collect()
}

/// Execution tools that return canned responses in order.
///
/// Cycles back to the beginning when all responses have been consumed.
/// Chat and completion calls draw from the same sequence.
#[derive(Debug)]
pub struct ScriptedTools {
    title: String,
    responses: Vec<String>,
    index: AtomicUsize,
    capabilities: ModelCapabilities,
}

impl ScriptedTools {
    /// Create scripted tools with the given canned responses.
    ///
    /// Responses are returned in order. When exhausted, cycles from the
    /// beginning. An empty list answers every call with an empty string.
    pub fn new(responses: Vec<String>) -> Self {
        Self {
            title: "Scripted".to_string(),
            responses,
            index: AtomicUsize::new(0),
            capabilities: ModelCapabilities::TEXT,
        }
    }

    /// Tools that always return the same response.
    pub fn fixed(response: impl Into<String>) -> Self {
        Self::new(vec![response.into()])
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_capabilities(mut self, capabilities: ModelCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// How many model calls were made so far.
    pub fn call_count(&self) -> usize {
        self.index.load(Ordering::SeqCst)
    }

    fn next_response(&self) -> String {
        let idx = self.index.fetch_add(1, Ordering::SeqCst);
        if self.responses.is_empty() {
            return String::new();
        }
        self.responses[idx % self.responses.len()].clone()
    }
}

#[async_trait]
impl LlmExecutionTools for ScriptedTools {
    fn title(&self) -> &str {
        &self.title
    }

    fn description(&self) -> &str {
        "Returns pre-configured responses in order"
    }

    fn capabilities(&self) -> ModelCapabilities {
        self.capabilities
    }

    async fn list_models(&self) -> Result<Vec<AvailableModel>> {
        Ok(mocked_models(&self.title, self.capabilities))
    }

    async fn call_chat_model(&self, prompt: &Prompt) -> Result<PromptResult> {
        Ok(text_result(prompt, self.next_response()))
    }

    async fn call_completion_model(&self, prompt: &Prompt) -> Result<PromptResult> {
        Ok(text_result(prompt, self.next_response()))
    }

    async fn call_embedding_model(&self, prompt: &Prompt) -> Result<EmbeddingPromptResult> {
        self.index.fetch_add(1, Ordering::SeqCst);
        Ok(embedding_result(prompt))
    }
}

/// Execution tools that answer with the prompt content itself.
#[derive(Debug, Clone)]
pub struct MockedEchoTools {
    title: String,
}

impl MockedEchoTools {
    pub fn new() -> Self {
        Self {
            title: "Mocked echo".to_string(),
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }
}

impl Default for MockedEchoTools {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LlmExecutionTools for MockedEchoTools {
    fn title(&self) -> &str {
        &self.title
    }

    fn description(&self) -> &str {
        "Echoes the prompt content back"
    }

    fn capabilities(&self) -> ModelCapabilities {
        ModelCapabilities::ALL
    }

    async fn list_models(&self) -> Result<Vec<AvailableModel>> {
        Ok(mocked_models(&self.title, ModelCapabilities::ALL))
    }

    async fn call_chat_model(&self, prompt: &Prompt) -> Result<PromptResult> {
        Ok(text_result(prompt, format!("You said:\n{}", prompt.content)))
    }

    async fn call_completion_model(&self, prompt: &Prompt) -> Result<PromptResult> {
        Ok(text_result(prompt, prompt.content.clone()))
    }

    async fn call_embedding_model(&self, prompt: &Prompt) -> Result<EmbeddingPromptResult> {
        Ok(embedding_result(prompt))
    }
}

/// Execution tools whose every call fails.
#[derive(Debug, Clone)]
pub struct FailingTools {
    title: String,
    message: String,
    unexpected: bool,
    capabilities: ModelCapabilities,
}

impl FailingTools {
    /// Tools failing with a provider-level error carrying `message`.
    pub fn new(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            message: message.into(),
            unexpected: false,
            capabilities: ModelCapabilities::ALL,
        }
    }

    /// Fail with [`PipelineError::Unexpected`] instead.
    pub fn unexpected(mut self) -> Self {
        self.unexpected = true;
        self
    }

    pub fn with_capabilities(mut self, capabilities: ModelCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    fn error(&self) -> PipelineError {
        if self.unexpected {
            PipelineError::Unexpected(self.message.clone())
        } else {
            PipelineError::Other(self.message.clone())
        }
    }
}

#[async_trait]
impl LlmExecutionTools for FailingTools {
    fn title(&self) -> &str {
        &self.title
    }

    fn capabilities(&self) -> ModelCapabilities {
        self.capabilities
    }

    async fn check_configuration(&self) -> Result<()> {
        Err(self.error())
    }

    async fn list_models(&self) -> Result<Vec<AvailableModel>> {
        Err(self.error())
    }

    async fn call_chat_model(&self, _prompt: &Prompt) -> Result<PromptResult> {
        Err(self.error())
    }

    async fn call_completion_model(&self, _prompt: &Prompt) -> Result<PromptResult> {
        Err(self.error())
    }

    async fn call_embedding_model(&self, _prompt: &Prompt) -> Result<EmbeddingPromptResult> {
        Err(self.error())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ModelRequirements;

    fn prompt() -> Prompt {
        Prompt::new("test", "hello", ModelRequirements::chat())
    }

    #[tokio::test]
    async fn test_scripted_fixed_response() {
        let mock = ScriptedTools::fixed("Hello!");
        let resp = mock.call_chat_model(&prompt()).await.unwrap();
        assert_eq!(resp.content, "Hello!");
        assert_eq!(resp.model_name, MOCK_MODEL_NAME);
        assert_eq!(mock.call_count(), 1);
    }

    #[tokio::test]
    async fn test_scripted_cycles_responses() {
        let mock = ScriptedTools::new(vec!["first".into(), "second".into()]);
        let r1 = mock.call_chat_model(&prompt()).await.unwrap();
        let r2 = mock.call_completion_model(&prompt()).await.unwrap();
        let r3 = mock.call_chat_model(&prompt()).await.unwrap();
        assert_eq!(r1.content, "first");
        assert_eq!(r2.content, "second");
        assert_eq!(r3.content, "first"); // cycles
        assert_eq!(mock.call_count(), 3);
    }

    #[tokio::test]
    async fn test_echo() {
        let echo = MockedEchoTools::new();
        let resp = echo.call_chat_model(&prompt()).await.unwrap();
        assert_eq!(resp.content, "You said:\nhello");
        assert!(resp.usage.input.tokens_count.is_uncertain);

        let embedding = echo.call_embedding_model(&prompt()).await.unwrap();
        assert_eq!(embedding.content.len(), 5);
    }

    #[tokio::test]
    async fn test_failing() {
        let failing = FailingTools::new("broken", "quota exceeded");
        let err = failing.call_chat_model(&prompt()).await.unwrap_err();
        assert_eq!(err.to_string(), "quota exceeded");
        assert!(!err.is_unexpected());

        let err = failing
            .unexpected()
            .call_chat_model(&prompt())
            .await
            .unwrap_err();
        assert!(err.is_unexpected());
    }

    #[tokio::test]
    async fn test_list_models_follows_capabilities() {
        let mock = ScriptedTools::fixed("x")
            .with_capabilities(ModelCapabilities::only(ModelVariant::Embedding));
        let models = mock.list_models().await.unwrap();
        assert_eq!(models.len(), 1);
        assert_eq!(models[0].model_variant, ModelVariant::Embedding);
    }
}
