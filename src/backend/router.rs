//! Failover across several execution tools.
//!
//! [`MultiLlmExecutionTools`] tries its tools in priority order and returns
//! the first success. It is not best-of-many: once a tool answers, the
//! remaining tools are never called.

use super::{
    call_variant, AvailableModel, CommonPromptResult, EmbeddingPromptResult, LlmExecutionTools,
    ModelCapabilities, Prompt, PromptResult,
};
use crate::error::{ProviderFailure, Result};
use crate::types::ModelVariant;
use crate::PipelineError;
use async_trait::async_trait;
use futures::future::join_all;
use std::sync::Arc;
use tracing::{debug, warn};

/// Priority-ordered failover router.
///
/// # Example
///
/// ```
/// use prompt_pipeline::backend::{FailingTools, MultiLlmExecutionTools, ScriptedTools};
/// use std::sync::Arc;
///
/// let router = MultiLlmExecutionTools::new(vec![
///     Arc::new(FailingTools::new("primary", "down")),
///     Arc::new(ScriptedTools::fixed("ok")),
/// ]);
/// ```
pub struct MultiLlmExecutionTools {
    title: String,
    tools: Vec<Arc<dyn LlmExecutionTools>>,
}

impl MultiLlmExecutionTools {
    /// Create a router; earlier tools have higher priority.
    pub fn new(tools: Vec<Arc<dyn LlmExecutionTools>>) -> Self {
        let title = if tools.is_empty() {
            "No LLM execution tools".to_string()
        } else {
            let titles: Vec<&str> = tools.iter().map(|t| t.title()).collect();
            format!("Multiple LLM providers ({})", titles.join(", "))
        };
        Self { title, tools }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    /// The wrapped tools in priority order.
    pub fn tools(&self) -> &[Arc<dyn LlmExecutionTools>] {
        &self.tools
    }

    async fn route(&self, variant: ModelVariant, prompt: &Prompt) -> Result<CommonPromptResult> {
        if self.tools.is_empty() {
            return Err(PipelineError::NoProviders);
        }

        let mut failures: Vec<(String, PipelineError)> = Vec::new();

        for tools in &self.tools {
            if !tools.capabilities().supports(variant) {
                debug!(provider = tools.title(), %variant, "Skipping provider without capability");
                continue;
            }

            match call_variant(tools.as_ref(), variant, prompt).await {
                Ok(result) => {
                    debug!(provider = tools.title(), %variant, "Provider answered");
                    return Ok(result);
                }
                Err(e) if e.is_unexpected() => return Err(e),
                Err(e) => {
                    warn!(provider = tools.title(), %variant, error = %e, "Provider failed, trying next");
                    failures.push((tools.title().to_string(), e));
                }
            }
        }

        if failures.len() > 1 {
            return Err(PipelineError::AllProvidersFailed {
                failures: failures
                    .into_iter()
                    .map(|(provider, error)| ProviderFailure {
                        provider,
                        message: error.to_string(),
                    })
                    .collect(),
            });
        }

        match failures.pop() {
            Some((_, error)) => Err(error),
            None => Err(PipelineError::UnsupportedVariant {
                variant: variant.to_string(),
            }),
        }
    }
}

#[async_trait]
impl LlmExecutionTools for MultiLlmExecutionTools {
    fn title(&self) -> &str {
        &self.title
    }

    fn description(&self) -> &str {
        "Failover across multiple LLM execution tools"
    }

    fn capabilities(&self) -> ModelCapabilities {
        self.tools
            .iter()
            .fold(ModelCapabilities::NONE, |caps, t| caps.union(t.capabilities()))
    }

    /// Check every tool concurrently; the first failure in priority order wins.
    async fn check_configuration(&self) -> Result<()> {
        let results = join_all(self.tools.iter().map(|t| t.check_configuration())).await;
        results.into_iter().collect()
    }

    /// Models of every tool, concatenated in priority order.
    async fn list_models(&self) -> Result<Vec<AvailableModel>> {
        let results = join_all(self.tools.iter().map(|t| t.list_models())).await;
        let mut models = Vec::new();
        for result in results {
            models.extend(result?);
        }
        Ok(models)
    }

    async fn call_chat_model(&self, prompt: &Prompt) -> Result<PromptResult> {
        self.route(ModelVariant::Chat, prompt)
            .await?
            .into_prompt_result()
    }

    async fn call_completion_model(&self, prompt: &Prompt) -> Result<PromptResult> {
        self.route(ModelVariant::Completion, prompt)
            .await?
            .into_prompt_result()
    }

    async fn call_embedding_model(&self, prompt: &Prompt) -> Result<EmbeddingPromptResult> {
        self.route(ModelVariant::Embedding, prompt)
            .await?
            .into_embedding_result()
    }
}

impl std::fmt::Debug for MultiLlmExecutionTools {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let titles: Vec<&str> = self.tools.iter().map(|t| t.title()).collect();
        f.debug_struct("MultiLlmExecutionTools")
            .field("title", &self.title)
            .field("tools", &titles)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{FailingTools, ScriptedTools};
    use crate::types::ModelRequirements;

    fn prompt() -> Prompt {
        Prompt::new("Greeting", "Say hi", ModelRequirements::chat())
    }

    #[tokio::test]
    async fn test_first_success_wins() {
        let first = Arc::new(ScriptedTools::fixed("one").with_title("first"));
        let second = Arc::new(ScriptedTools::fixed("two").with_title("second"));
        let router = MultiLlmExecutionTools::new(vec![first.clone(), second.clone()]);

        let result = router.call_chat_model(&prompt()).await.unwrap();
        assert_eq!(result.content, "one");
        assert_eq!(first.call_count(), 1);
        assert_eq!(second.call_count(), 0);
    }

    #[tokio::test]
    async fn test_failover_to_next_provider() {
        let router = MultiLlmExecutionTools::new(vec![
            Arc::new(FailingTools::new("P1", "boom")),
            Arc::new(ScriptedTools::fixed("ok").with_title("P2")),
        ]);
        let result = router.call_chat_model(&prompt()).await.unwrap();
        assert_eq!(result.content, "ok");
    }

    #[tokio::test]
    async fn test_all_failures_are_aggregated() {
        let router = MultiLlmExecutionTools::new(vec![
            Arc::new(FailingTools::new("P1", "boom")),
            Arc::new(FailingTools::new("P2", "bang")),
        ]);
        let err = router.call_chat_model(&prompt()).await.unwrap_err();
        let msg = err.to_string();
        assert!(matches!(err, PipelineError::AllProvidersFailed { .. }));
        assert!(msg.contains("P1"));
        assert!(msg.contains("P2"));
        assert!(msg.contains("boom"));
        assert!(msg.contains("bang"));
    }

    #[tokio::test]
    async fn test_single_failure_passes_through() {
        let router = MultiLlmExecutionTools::new(vec![
            Arc::new(FailingTools::new("P1", "quota exceeded")),
            Arc::new(
                ScriptedTools::fixed("never")
                    .with_capabilities(ModelCapabilities::only(ModelVariant::Embedding)),
            ),
        ]);
        let err = router.call_chat_model(&prompt()).await.unwrap_err();
        assert!(matches!(err, PipelineError::Other(ref m) if m == "quota exceeded"));
    }

    #[tokio::test]
    async fn test_unexpected_error_stops_failover() {
        let backup = Arc::new(ScriptedTools::fixed("ok"));
        let router = MultiLlmExecutionTools::new(vec![
            Arc::new(FailingTools::new("P1", "invariant").unexpected()),
            backup.clone(),
        ]);
        let err = router.call_chat_model(&prompt()).await.unwrap_err();
        assert!(err.is_unexpected());
        assert_eq!(backup.call_count(), 0);
    }

    #[tokio::test]
    async fn test_no_providers() {
        let router = MultiLlmExecutionTools::new(Vec::new());
        let err = router.call_chat_model(&prompt()).await.unwrap_err();
        assert!(matches!(err, PipelineError::NoProviders));
    }

    #[tokio::test]
    async fn test_no_capable_provider() {
        let router = MultiLlmExecutionTools::new(vec![Arc::new(ScriptedTools::fixed("x"))]);
        let err = router.call_embedding_model(&prompt()).await.unwrap_err();
        assert!(matches!(err, PipelineError::UnsupportedVariant { .. }));
        assert!(!router.capabilities().embedding);
    }

    #[tokio::test]
    async fn test_list_models_concatenates() {
        let router = MultiLlmExecutionTools::new(vec![
            Arc::new(ScriptedTools::fixed("a").with_title("A")),
            Arc::new(ScriptedTools::fixed("b").with_title("B")),
        ]);
        let models = router.list_models().await.unwrap();
        assert_eq!(models.len(), 4);
        assert!(models[0].model_title.starts_with('A'));
        assert!(models[3].model_title.starts_with('B'));
    }

    #[tokio::test]
    async fn test_check_configuration_reports_failure() {
        let router = MultiLlmExecutionTools::new(vec![
            Arc::new(ScriptedTools::fixed("a")),
            Arc::new(FailingTools::new("bad", "missing key")),
        ]);
        assert!(router.check_configuration().await.is_err());
    }
}
