//! Requests-per-minute throttling.
//!
//! [`RateLimitedTools`] admits calls through a `governor` GCRA limiter with a
//! quota of one request per `60s / requests_per_minute` and no burst.
//! Callers beyond the budget wait; nothing is rejected. Callers queue on a
//! fair `tokio::sync::Mutex` before asking the limiter, so admission follows
//! arrival order.

use super::{
    AvailableModel, EmbeddingPromptResult, LlmExecutionTools, ModelCapabilities, Prompt,
    PromptResult,
};
use crate::error::Result;
use crate::PipelineError;
use async_trait::async_trait;
use governor::clock::Clock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;

/// Governor clock reading tokio time, so a paused runtime clock applies.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

impl Clock for TokioClock {
    type Instant = std::time::Instant;

    fn now(&self) -> Self::Instant {
        tokio::time::Instant::now().into_std()
    }
}

type DirectRateLimiter = RateLimiter<
    NotKeyed,
    InMemoryState,
    TokioClock,
    governor::middleware::NoOpMiddleware<std::time::Instant>,
>;

/// Decorator throttling calls to the wrapped tools.
pub struct RateLimitedTools {
    inner: Arc<dyn LlmExecutionTools>,
    min_interval: Duration,
    limiter: DirectRateLimiter,
    queue: Mutex<()>,
}

impl RateLimitedTools {
    /// Allow at most `requests_per_minute` calls per minute.
    pub fn new(inner: Arc<dyn LlmExecutionTools>, requests_per_minute: u32) -> Result<Self> {
        if requests_per_minute == 0 {
            return Err(PipelineError::InvalidConfig(
                "requests_per_minute must be at least 1".to_string(),
            ));
        }
        let min_interval = Duration::from_secs(60) / requests_per_minute;
        let quota = Quota::with_period(min_interval).ok_or_else(|| {
            PipelineError::InvalidConfig(format!(
                "requests_per_minute {} is too high",
                requests_per_minute
            ))
        })?;
        debug!(
            "Creating RateLimitedTools with {} requests/minute",
            requests_per_minute
        );
        Ok(Self {
            inner,
            min_interval,
            limiter: RateLimiter::direct_with_clock(quota, TokioClock),
            queue: Mutex::new(()),
        })
    }

    /// Minimum time between two admitted calls.
    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Wait until the next call may start.
    pub async fn acquire(&self) {
        let _turn = self.queue.lock().await;
        while let Err(not_until) = self.limiter.check() {
            let wait = not_until.wait_time_from(TokioClock.now());
            debug!(
                provider = self.inner.title(),
                wait_ms = wait.as_millis() as u64,
                "Rate limit reached, waiting"
            );
            tokio::time::sleep(wait).await;
        }
    }
}

#[async_trait]
impl LlmExecutionTools for RateLimitedTools {
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
        self.acquire().await;
        self.inner.call_chat_model(prompt).await
    }

    async fn call_completion_model(&self, prompt: &Prompt) -> Result<PromptResult> {
        self.acquire().await;
        self.inner.call_completion_model(prompt).await
    }

    async fn call_embedding_model(&self, prompt: &Prompt) -> Result<EmbeddingPromptResult> {
        self.acquire().await;
        self.inner.call_embedding_model(prompt).await
    }
}

impl std::fmt::Debug for RateLimitedTools {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimitedTools")
            .field("inner", &self.inner.title())
            .field("min_interval", &self.min_interval)
            .finish()
    }
}
