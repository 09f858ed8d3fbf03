//! Usage accounting decorator.
//!
//! [`UsageCountingTools`] keeps a running total of the [`Usage`] of every
//! call made through it and publishes each call's usage on a broadcast
//! channel. Publishing never blocks; slow subscribers lag instead.

use super::{
    AvailableModel, EmbeddingPromptResult, LlmExecutionTools, ModelCapabilities, Prompt,
    PromptResult,
};
use crate::error::Result;
use crate::usage::Usage;
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tracing::trace;

/// Default broadcast channel capacity.
const DEFAULT_CAPACITY: usize = 256;

/// Decorator counting the usage of the wrapped tools.
pub struct UsageCountingTools {
    inner: Arc<dyn LlmExecutionTools>,
    total: Mutex<Usage>,
    tx: broadcast::Sender<Usage>,
}

impl UsageCountingTools {
    pub fn new(inner: Arc<dyn LlmExecutionTools>) -> Self {
        let (tx, _) = broadcast::channel(DEFAULT_CAPACITY);
        Self {
            inner,
            total: Mutex::new(Usage::ZERO),
            tx,
        }
    }

    /// Sum of the usage of every call so far.
    pub fn total_usage(&self) -> Usage {
        *self.total.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Receive the usage of every call made after this point.
    pub fn subscribe(&self) -> broadcast::Receiver<Usage> {
        self.tx.subscribe()
    }

    fn record(&self, usage: Usage) {
        {
            let mut total = self.total.lock().unwrap_or_else(|e| e.into_inner());
            *total = total.merge(usage);
        }
        trace!(price = usage.price.value, "Recorded call usage");
        // No subscribers is fine.
        let _ = self.tx.send(usage);
    }
}

#[async_trait]
impl LlmExecutionTools for UsageCountingTools {
    fn title(&self) -> &str {
        self.inner.title()
    }

    fn description(&self) -> &str {
        self.inner.description()
    }

    fn capabilities(&self) -> ModelCapabilities {
        self.inner.capabilities()
    }

    async fn check_configuration(&self) -> Result<()> {
        self.inner.check_configuration().await
    }

    async fn list_models(&self) -> Result<Vec<AvailableModel>> {
        self.inner.list_models().await
    }

    async fn call_chat_model(&self, prompt: &Prompt) -> Result<PromptResult> {
        let result = self.inner.call_chat_model(prompt).await?;
        self.record(result.usage);
        Ok(result)
    }

    async fn call_completion_model(&self, prompt: &Prompt) -> Result<PromptResult> {
        let result = self.inner.call_completion_model(prompt).await?;
        self.record(result.usage);
        Ok(result)
    }

    async fn call_embedding_model(&self, prompt: &Prompt) -> Result<EmbeddingPromptResult> {
        let result = self.inner.call_embedding_model(prompt).await?;
        self.record(result.usage);
        Ok(result)
    }
}

impl std::fmt::Debug for UsageCountingTools {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UsageCountingTools")
            .field("inner", &self.inner.title())
            .field("total_usage", &self.total_usage())
            .field("subscribers", &self.tx.receiver_count())
            .finish()
    }
}
