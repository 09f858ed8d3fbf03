use std::time::Duration;
use thiserror::Error;

/// One provider's failure inside [`PipelineError::AllProvidersFailed`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderFailure {
    /// Title of the provider that failed.
    pub provider: String,
    /// The provider's error message.
    pub message: String,
}

/// Errors produced by the executor, the LLM gateway and its decorators.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Low-level HTTP transport failure (connection refused, timeout, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// JSON parsing failed at the serde level.
    #[error("JSON parsing failed: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP error with status code, response body, and optional Retry-After hint.
    ///
    /// Returned by HTTP providers when the server answers with a non-success
    /// status code. The `retry_after` field is populated from the
    /// `Retry-After` response header when present.
    #[error("HTTP {status}: {body}")]
    HttpError {
        /// HTTP status code (e.g. 429, 500, 503).
        status: u16,
        /// Response body text.
        body: String,
        /// Parsed `Retry-After` header value, if present.
        retry_after: Option<Duration>,
    },

    /// Missing or invalid template, pipeline or provider configuration.
    ///
    /// Never retried; aborts the whole run.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A candidate result failed the template's expectations or format.
    ///
    /// The only error kind the attempt loop retries.
    #[error("{0}")]
    Expectation(String),

    /// Every configured script engine failed to run a script.
    #[error("Script execution failed: {0}")]
    Script(String),

    /// All attempts of a template were used up without a passing result.
    #[error(
        "Template '{template}' failed after {attempts} attempts\n\nLast error: {last_error}\n\nLast result:\n{}",
        display_result(.last_result)
    )]
    AttemptsExhausted {
        /// Name of the template.
        template: String,
        /// Number of real (non-joker) attempts made.
        attempts: u32,
        /// Message of the last expectation failure.
        last_error: String,
        /// The last candidate result that failed the checks.
        last_result: Option<String>,
    },

    /// A template's execution aborted the pipeline run.
    #[error("Template '{template}' failed: {source}")]
    TemplateFailed {
        /// Name of the failing template.
        template: String,
        /// The underlying fatal error.
        #[source]
        source: Box<PipelineError>,
    },

    /// The gateway has no providers at all.
    #[error("No LLM execution tools are configured")]
    NoProviders,

    /// Providers exist but none implements the requested model variant.
    #[error("None of the configured LLM execution tools supports {variant} models")]
    UnsupportedVariant {
        /// The requested variant (e.g. `CHAT`).
        variant: String,
    },

    /// More than one provider was tried and every one of them failed.
    #[error("All LLM execution tools failed:\n{}", format_failures(.failures))]
    AllProvidersFailed {
        /// Every provider's failure, in priority order.
        failures: Vec<ProviderFailure>,
    },

    /// A configured usage or cost ceiling was hit.
    #[error("Usage limit reached: {0}")]
    LimitReached(String),

    /// An internal invariant was violated. Indicates a defect, never retried.
    #[error("Unexpected internal error: {0}")]
    Unexpected(String),

    /// Persisting or reading a storage item failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Catch-all for other errors.
    #[error("{0}")]
    Other(String),
}

impl PipelineError {
    /// Whether this is a retryable expectation failure.
    pub fn is_expectation(&self) -> bool {
        matches!(self, PipelineError::Expectation(_))
    }

    /// Whether this is a programmer/invariant error that must not be
    /// swallowed by provider failover.
    pub fn is_unexpected(&self) -> bool {
        matches!(self, PipelineError::Unexpected(_))
    }

    /// Short kind name used in execution reports.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::Request(_) => "RequestError",
            PipelineError::Json(_) => "JsonError",
            PipelineError::HttpError { .. } => "HttpError",
            PipelineError::InvalidConfig(_) => "ConfigurationError",
            PipelineError::Expectation(_) => "ExpectationError",
            PipelineError::Script(_) => "ScriptError",
            PipelineError::AttemptsExhausted { .. } => "AttemptsExhaustedError",
            PipelineError::TemplateFailed { .. } => "TemplateFailedError",
            PipelineError::NoProviders
            | PipelineError::UnsupportedVariant { .. }
            | PipelineError::AllProvidersFailed { .. } => "ProviderError",
            PipelineError::LimitReached(_) => "LimitReachedError",
            PipelineError::Unexpected(_) => "UnexpectedError",
            PipelineError::Storage(_) => "StorageError",
            PipelineError::Other(_) => "Error",
        }
    }
}

fn display_result(result: &Option<String>) -> &str {
    result.as_deref().unwrap_or("(none)")
}

fn format_failures(failures: &[ProviderFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("- {}: {}", f.provider, f.message))
        .collect::<Vec<_>>()
        .join("\n")
}

impl From<anyhow::Error> for PipelineError {
    fn from(err: anyhow::Error) -> Self {
        PipelineError::Other(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aggregate_message_lists_every_provider() {
        let err = PipelineError::AllProvidersFailed {
            failures: vec![
                ProviderFailure {
                    provider: "alpha".into(),
                    message: "timeout".into(),
                },
                ProviderFailure {
                    provider: "beta".into(),
                    message: "quota".into(),
                },
            ],
        };
        let msg = err.to_string();
        assert!(msg.contains("- alpha: timeout"));
        assert!(msg.contains("- beta: quota"));
    }

    #[test]
    fn test_exhausted_message_embeds_last_result() {
        let err = PipelineError::AttemptsExhausted {
            template: "bio".into(),
            attempts: 3,
            last_error: "Expected at least 1 characters but got 0".into(),
            last_result: Some("".into()),
        };
        let msg = err.to_string();
        assert!(msg.contains("failed after 3 attempts"));
        assert!(msg.contains("Expected at least 1 characters but got 0"));
        assert!(msg.ends_with("Last result:\n"));
    }

    #[test]
    fn test_classifiers() {
        assert!(PipelineError::Expectation("x".into()).is_expectation());
        assert!(!PipelineError::InvalidConfig("x".into()).is_expectation());
        assert!(PipelineError::Unexpected("x".into()).is_unexpected());
        assert_eq!(PipelineError::LimitReached("x".into()).kind(), "LimitReachedError");
    }
}
