//! Usage ceilings.
//!
//! [`UsageLimitTools`] counts usage like [`UsageCountingTools`] and refuses
//! further calls once a configured ceiling has been reached. The call that
//! crosses a ceiling still completes; the next one fails with
//! [`PipelineError::LimitReached`].

use super::{
    AvailableModel, EmbeddingPromptResult, LlmExecutionTools, ModelCapabilities, Prompt,
    PromptResult, UsageCountingTools,
};
use crate::error::Result;
use crate::usage::Usage;
use crate::PipelineError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::warn;

/// Ceilings on the accumulated usage. `None` means unlimited.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UsageLimits {
    /// Maximum total price in USD.
    pub max_price: Option<f64>,
    pub max_input_tokens: Option<f64>,
    pub max_output_tokens: Option<f64>,
}

impl UsageLimits {
    pub fn with_max_price(mut self, price: f64) -> Self {
        self.max_price = Some(price);
        self
    }

    pub fn with_max_input_tokens(mut self, tokens: f64) -> Self {
        self.max_input_tokens = Some(tokens);
        self
    }

    pub fn with_max_output_tokens(mut self, tokens: f64) -> Self {
        self.max_output_tokens = Some(tokens);
        self
    }

    /// Describe the first ceiling `usage` has reached, if any.
    pub fn exceeded_by(&self, usage: &Usage) -> Option<String> {
        let checks = [
            ("price", self.max_price, usage.price.value),
            (
                "input tokens",
                self.max_input_tokens,
                usage.input.tokens_count.value,
            ),
            (
                "output tokens",
                self.max_output_tokens,
                usage.output.tokens_count.value,
            ),
        ];
        checks.into_iter().find_map(|(what, limit, actual)| {
            limit
                .filter(|limit| actual >= *limit)
                .map(|limit| format!("{} {} reached the limit of {}", what, actual, limit))
        })
    }
}

/// Decorator enforcing [`UsageLimits`] on the wrapped tools.
#[derive(Debug)]
pub struct UsageLimitTools {
    counting: UsageCountingTools,
    limits: UsageLimits,
}

impl UsageLimitTools {
    pub fn new(inner: Arc<dyn LlmExecutionTools>, limits: UsageLimits) -> Self {
        Self {
            counting: UsageCountingTools::new(inner),
            limits,
        }
    }

    pub fn limits(&self) -> UsageLimits {
        self.limits
    }

    pub fn total_usage(&self) -> Usage {
        self.counting.total_usage()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Usage> {
        self.counting.subscribe()
    }

    fn check(&self) -> Result<()> {
        match self.limits.exceeded_by(&self.counting.total_usage()) {
            Some(reason) => {
                warn!(provider = self.counting.title(), %reason, "Usage limit reached");
                Err(PipelineError::LimitReached(reason))
            }
            None => Ok(()),
        }
    }
}

#[async_trait]
impl LlmExecutionTools for UsageLimitTools {
    fn title(&self) -> &str {
        self.counting.title()
    }

    fn description(&self) -> &str {
        self.counting.description()
    }

    fn capabilities(&self) -> ModelCapabilities {
        self.counting.capabilities()
    }

    async fn check_configuration(&self) -> Result<()> {
        self.counting.check_configuration().await
    }

    async fn list_models(&self) -> Result<Vec<AvailableModel>> {
        self.counting.list_models().await
    }

    async fn call_chat_model(&self, prompt: &Prompt) -> Result<PromptResult> {
        self.check()?;
        self.counting.call_chat_model(prompt).await
    }

    async fn call_completion_model(&self, prompt: &Prompt) -> Result<PromptResult> {
        self.check()?;
        self.counting.call_completion_model(prompt).await
    }

    async fn call_embedding_model(&self, prompt: &Prompt) -> Result<EmbeddingPromptResult> {
        self.check()?;
        self.counting.call_embedding_model(prompt).await
    }
}
