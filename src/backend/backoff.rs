//! Transport retry policy of HTTP providers.
//!
//! [`BackoffConfig`] decides whether a failed provider request is tried
//! again and how long to wait first. This is separate from the attempt loop
//! of a template: transport retries are invisible to the pipeline and never
//! produce report entries.

use std::time::Duration;

/// Exponential backoff with jitter for transient provider failures.
///
/// # Example
///
/// ```
/// use prompt_pipeline::backend::BackoffConfig;
/// use std::time::Duration;
///
/// let local = BackoffConfig::none();
/// assert_eq!(local.max_retries, 0);
///
/// let hosted = BackoffConfig::standard().with_max_retries(5);
/// assert_eq!(hosted.max_retries, 5);
/// assert!(hosted.next_delay(0, None, None) <= Duration::from_secs(1));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffConfig {
    /// Retries after the first request. `0` disables retrying.
    pub max_retries: u32,

    /// Base delay before the first retry.
    pub initial_delay: Duration,

    /// Growth factor of the base delay per retry.
    pub multiplier: f64,

    /// Cap on every delay, including `Retry-After` hints.
    pub max_delay: Duration,

    pub jitter: JitterStrategy,

    /// HTTP statuses worth retrying.
    pub retryable_statuses: Vec<u16>,

    /// Wait as long as the provider's `Retry-After` header asks.
    pub respect_retry_after: bool,
}

/// How a computed delay is randomized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JitterStrategy {
    /// Exactly the computed delay.
    None,
    /// Uniform in `[0, delay]`.
    Full,
    /// `delay / 2` plus uniform in `[0, delay / 2]`.
    Equal,
    /// Uniform in `[initial_delay, previous_delay * 3]`, capped.
    Decorrelated,
}

const DEFAULT_RETRYABLE_STATUSES: [u16; 5] = [429, 500, 502, 503, 504];

impl BackoffConfig {
    /// Never retry. Default for local providers.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::standard()
        }
    }

    /// Hosted providers: 3 retries from 1s, doubling up to 60s, full jitter.
    pub fn standard() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(1),
            multiplier: 2.0,
            max_delay: Duration::from_secs(60),
            jitter: JitterStrategy::Full,
            retryable_statuses: DEFAULT_RETRYABLE_STATUSES.to_vec(),
            respect_retry_after: true,
        }
    }

    /// Long unattended runs with many templates: 6 retries up to 2 minutes,
    /// decorrelated jitter so parallel templates spread out.
    pub fn batch() -> Self {
        Self {
            max_retries: 6,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(120),
            jitter: JitterStrategy::Decorrelated,
            ..Self::standard()
        }
    }

    /// A user is waiting (DIALOG-heavy pipelines): 2 quick retries, 10s cap.
    pub fn interactive() -> Self {
        Self {
            max_retries: 2,
            initial_delay: Duration::from_millis(500),
            multiplier: 1.5,
            max_delay: Duration::from_secs(10),
            ..Self::standard()
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_jitter(mut self, jitter: JitterStrategy) -> Self {
        self.jitter = jitter;
        self
    }

    /// Un-jittered delay before retry `attempt` (0-indexed), capped.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let base = self.initial_delay.as_secs_f64() * self.multiplier.powi(attempt as i32);
        Duration::from_secs_f64(base.min(self.max_delay.as_secs_f64()))
    }

    /// Delay before retry `attempt` (0-indexed).
    ///
    /// `previous` is the delay used before the last retry, if any; only
    /// decorrelated jitter looks at it. A `Retry-After` hint wins over the
    /// computed delay when respected. Every delay is capped at `max_delay`.
    pub fn next_delay(
        &self,
        attempt: u32,
        previous: Option<Duration>,
        retry_after: Option<Duration>,
    ) -> Duration {
        if let Some(hint) = retry_after.filter(|_| self.respect_retry_after) {
            return hint.min(self.max_delay);
        }

        let capped = self.base_delay(attempt).as_secs_f64();
        let secs = match self.jitter {
            JitterStrategy::None => capped,
            JitterStrategy::Full => fastrand::f64() * capped,
            JitterStrategy::Equal => capped / 2.0 + fastrand::f64() * (capped / 2.0),
            JitterStrategy::Decorrelated => {
                let low = self.initial_delay.as_secs_f64();
                let high = previous.map_or(low, |p| p.as_secs_f64() * 3.0).max(low);
                (low + fastrand::f64() * (high - low)).min(self.max_delay.as_secs_f64())
            }
        };
        Duration::from_secs_f64(secs)
    }
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self::none()
    }
}
