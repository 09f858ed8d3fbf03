//! Content-addressed result cache.
//!
//! [`CachedTools`] memoizes calls by a key derived from the prompt title and
//! a SHA-256 of the call parameters. The store is injected, so a cache can be
//! shared across runs or isolated per test.

use super::{
    call_variant, title_to_name, AvailableModel, CommonPromptResult, EmbeddingPromptResult,
    LlmExecutionTools, ModelCapabilities, Prompt, PromptResult,
};
use crate::error::Result;
use crate::storage::Storage;
use crate::types::ModelVariant;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{debug, instrument};

/// Longest title prefix used in a cache key.
const MAX_TITLE_LENGTH: usize = 50;

/// Hex characters of the parameter hash used in a cache key.
const HASH_LENGTH: usize = 10;

/// A persisted cache entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheItem {
    /// When the result was stored.
    pub date: DateTime<Utc>,
    /// Version of this crate that stored it.
    pub tool_version: String,
    pub prompt: Prompt,
    pub result: CommonPromptResult,
}

/// Cache key of `prompt` for `variant`.
///
/// `title_to_name(title[..50]) + "-" + sha256(parameters)[..10]`, where the
/// hashed parameters are the variant, rendered content, template parameters
/// and model requirements. Only the ASCII characters of the title are kept,
/// so every key is a valid file name; a title with none yields the bare hash.
pub fn cache_key(variant: ModelVariant, prompt: &Prompt) -> Result<String> {
    let title: String = prompt
        .title
        .chars()
        .take(MAX_TITLE_LENGTH)
        .filter(char::is_ascii)
        .collect();
    let parameters = json!({
        "variant": variant,
        "content": prompt.content,
        "parameters": prompt.parameters,
        "modelRequirements": prompt.model_requirements,
    });
    let mut hasher = Sha256::new();
    hasher.update(serde_json::to_vec(&parameters)?);
    let hash = format!("{:x}", hasher.finalize());
    let hash = &hash[..HASH_LENGTH];
    Ok(match title_to_name(&title) {
        name if name.is_empty() => hash.to_string(),
        name => format!("{}-{}", name, hash),
    })
}

/// Decorator caching the results of the wrapped tools.
pub struct CachedTools {
    inner: Arc<dyn LlmExecutionTools>,
    storage: Arc<dyn Storage<CacheItem>>,
    force_reload: bool,
}

impl CachedTools {
    pub fn new(inner: Arc<dyn LlmExecutionTools>, storage: Arc<dyn Storage<CacheItem>>) -> Self {
        Self {
            inner,
            storage,
            force_reload: false,
        }
    }

    /// Skip cache reads but keep writing fresh results.
    pub fn force_reload(mut self, force_reload: bool) -> Self {
        self.force_reload = force_reload;
        self
    }

    #[instrument(skip(self, prompt), fields(provider = self.inner.title(), title = %prompt.title))]
    async fn cached(&self, variant: ModelVariant, prompt: &Prompt) -> Result<CommonPromptResult> {
        let key = cache_key(variant, prompt)?;

        if !self.force_reload {
            match self.storage.get_item(&key).await? {
                Some(item) if item.result.variant() == variant => {
                    debug!(%key, "Cache hit");
                    return Ok(item.result);
                }
                Some(_) => debug!(%key, "Cached result has another variant, ignoring"),
                None => debug!(%key, "Cache miss"),
            }
        }

        let result = call_variant(self.inner.as_ref(), variant, prompt).await?;
        let item = CacheItem {
            date: Utc::now(),
            tool_version: env!("CARGO_PKG_VERSION").to_string(),
            prompt: prompt.clone(),
            result: result.clone(),
        };
        self.storage.set_item(&key, item).await?;
        debug!(%key, "Stored result in cache");
        Ok(result)
    }
}

#[async_trait]
impl LlmExecutionTools for CachedTools {
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
        self.cached(ModelVariant::Chat, prompt)
            .await?
            .into_prompt_result()
    }

    async fn call_completion_model(&self, prompt: &Prompt) -> Result<PromptResult> {
        self.cached(ModelVariant::Completion, prompt)
            .await?
            .into_prompt_result()
    }

    async fn call_embedding_model(&self, prompt: &Prompt) -> Result<EmbeddingPromptResult> {
        self.cached(ModelVariant::Embedding, prompt)
            .await?
            .into_embedding_result()
    }
}

impl std::fmt::Debug for CachedTools {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedTools")
            .field("inner", &self.inner.title())
            .field("force_reload", &self.force_reload)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::ScriptedTools;
    use crate::storage::{FileStorage, MemoryStorage};
    use crate::types::ModelRequirements;

    fn prompt(name: &str) -> Prompt {
        Prompt::new("Write a Bio", format!("Bio of {}", name), ModelRequirements::chat())
            .with_parameter("name", name)
    }

    #[test]
    fn test_key_shape() {
        let key = cache_key(ModelVariant::Chat, &prompt("Alice")).unwrap();
        let (name, hash) = key.rsplit_once('-').unwrap();
        assert_eq!(name, "write-a-bio");
        assert_eq!(hash.len(), HASH_LENGTH);
        assert_eq!(key, cache_key(ModelVariant::Chat, &prompt("Alice")).unwrap());
        assert_ne!(key, cache_key(ModelVariant::Chat, &prompt("Bob")).unwrap());
    }

    #[test]
    fn test_key_truncates_long_titles() {
        let mut long = prompt("x");
        long.title = "a".repeat(200);
        let key = cache_key(ModelVariant::Chat, &long).unwrap();
        assert_eq!(key.len(), MAX_TITLE_LENGTH + 1 + HASH_LENGTH);
    }

    #[test]
    fn test_key_keeps_only_ascii_title_characters() {
        let mut czech = prompt("Ada");
        czech.title = "Napiš životopis".to_string();
        let key = cache_key(ModelVariant::Chat, &czech).unwrap();
        assert!(key.starts_with("napi-ivotopis-"), "{}", key);
        assert!(key.is_ascii());

        czech.title = "Привет".to_string();
        assert_eq!(
            cache_key(ModelVariant::Chat, &czech).unwrap().len(),
            HASH_LENGTH
        );
    }

    #[tokio::test]
    async fn test_non_ascii_titles_cache_in_file_storage() {
        let dir = tempfile::tempdir().unwrap();
        let provider = Arc::new(ScriptedTools::new(vec!["první".into(), "druhý".into()]));
        let cached = CachedTools::new(
            provider.clone(),
            Arc::new(FileStorage::<CacheItem>::new(dir.path())),
        );
        for title in ["Napiš životopis", "Привет"] {
            let mut czech = prompt("Ada");
            czech.title = title.to_string();
            let first = cached.call_chat_model(&czech).await.unwrap();
            let second = cached.call_chat_model(&czech).await.unwrap();
            assert_eq!(first, second);
        }
        assert_eq!(provider.call_count(), 2);
    }

    #[tokio::test]
    async fn test_second_call_is_served_from_cache() {
        let provider = Arc::new(ScriptedTools::new(vec!["first".into(), "second".into()]));
        let storage: Arc<MemoryStorage<CacheItem>> = Arc::new(MemoryStorage::new());
        let cached = CachedTools::new(provider.clone(), storage.clone());

        let r1 = cached.call_chat_model(&prompt("Alice")).await.unwrap();
        let r2 = cached.call_chat_model(&prompt("Alice")).await.unwrap();

        assert_eq!(provider.call_count(), 1);
        assert_eq!(r1, r2);
        assert_eq!(r2.content, "first");
        assert_eq!(storage.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_force_reload_bypasses_reads_but_writes() {
        let provider = Arc::new(ScriptedTools::new(vec!["old".into(), "new".into()]));
        let storage: Arc<MemoryStorage<CacheItem>> = Arc::new(MemoryStorage::new());

        let cached = CachedTools::new(provider.clone(), storage.clone());
        cached.call_chat_model(&prompt("Alice")).await.unwrap();

        let reloading = CachedTools::new(provider.clone(), storage.clone()).force_reload(true);
        let fresh = reloading.call_chat_model(&prompt("Alice")).await.unwrap();
        assert_eq!(fresh.content, "new");
        assert_eq!(provider.call_count(), 2);

        let hit = cached.call_chat_model(&prompt("Alice")).await.unwrap();
        assert_eq!(hit.content, "new");
        assert_eq!(provider.call_count(), 2);
    }

    #[tokio::test]
    async fn test_variants_are_cached_separately() {
        let provider = Arc::new(ScriptedTools::new(vec!["chat".into(), "completion".into()]));
        let cached = CachedTools::new(provider.clone(), Arc::new(MemoryStorage::<CacheItem>::new()));

        let chat = cached.call_chat_model(&prompt("Alice")).await.unwrap();
        let completion = cached.call_completion_model(&prompt("Alice")).await.unwrap();
        assert_eq!(chat.content, "chat");
        assert_eq!(completion.content, "completion");
        assert_eq!(provider.call_count(), 2);
    }
}
