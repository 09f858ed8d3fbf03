//! Executor configuration.
//!
//! [`ExecutionSettings`] controls how many real attempts a template gets and
//! how many templates may run at once. It deserializes with per-field
//! defaults, so a partial JSON or YAML object is enough.

use crate::{error::Result, PipelineError};
use serde::{Deserialize, Serialize};

/// Default number of real attempts per template.
pub const DEFAULT_MAX_EXECUTION_ATTEMPTS: u32 = 3;

/// Default number of templates executed concurrently.
pub const DEFAULT_MAX_PARALLEL_COUNT: usize = 5;

/// Configuration of a [`PipelineExecutor`](crate::pipeline::PipelineExecutor).
///
/// # Example
///
/// ```
/// use prompt_pipeline::settings::ExecutionSettings;
///
/// let settings = ExecutionSettings::default().with_max_execution_attempts(5);
/// assert_eq!(settings.max_execution_attempts, 5);
/// assert_eq!(settings.max_parallel_count, 5);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExecutionSettings {
    /// Real attempts per template, not counting jokers. DIALOG templates
    /// ignore this and ask until they get a passing answer.
    pub max_execution_attempts: u32,

    /// Maximum number of templates in flight at the same time.
    pub max_parallel_count: usize,

    /// Log template starts and completions at `info` instead of `debug`.
    pub is_verbose: bool,
}

impl ExecutionSettings {
    /// A single attempt per template, one template at a time.
    pub fn strict() -> Self {
        Self {
            max_execution_attempts: 1,
            max_parallel_count: 1,
            is_verbose: false,
        }
    }

    /// More attempts for flaky expectations and a wider fan-out.
    pub fn lenient() -> Self {
        Self {
            max_execution_attempts: 5,
            max_parallel_count: 10,
            is_verbose: false,
        }
    }

    pub fn with_max_execution_attempts(mut self, attempts: u32) -> Self {
        self.max_execution_attempts = attempts;
        self
    }

    pub fn with_max_parallel_count(mut self, count: usize) -> Self {
        self.max_parallel_count = count;
        self
    }

    pub fn verbose(mut self, is_verbose: bool) -> Self {
        self.is_verbose = is_verbose;
        self
    }

    /// Reject settings that could never execute a template.
    pub fn validate(&self) -> Result<()> {
        if self.max_execution_attempts == 0 {
            return Err(PipelineError::InvalidConfig(
                "max_execution_attempts must be at least 1".to_string(),
            ));
        }
        if self.max_parallel_count == 0 {
            return Err(PipelineError::InvalidConfig(
                "max_parallel_count must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for ExecutionSettings {
    fn default() -> Self {
        Self {
            max_execution_attempts: DEFAULT_MAX_EXECUTION_ATTEMPTS,
            max_parallel_count: DEFAULT_MAX_PARALLEL_COUNT,
            is_verbose: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = ExecutionSettings::default();
        assert_eq!(settings.max_execution_attempts, 3);
        assert_eq!(settings.max_parallel_count, 5);
        assert!(!settings.is_verbose);
    }

    #[test]
    fn test_presets() {
        assert_eq!(ExecutionSettings::strict().max_execution_attempts, 1);
        assert_eq!(ExecutionSettings::lenient().max_execution_attempts, 5);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let settings: ExecutionSettings =
            serde_json::from_str(r#"{"maxExecutionAttempts": 7}"#).unwrap();
        assert_eq!(settings.max_execution_attempts, 7);
        assert_eq!(settings.max_parallel_count, DEFAULT_MAX_PARALLEL_COUNT);
    }

    #[test]
    fn test_zero_attempts_rejected() {
        let err = ExecutionSettings::default()
            .with_max_execution_attempts(0)
            .validate()
            .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidConfig(_)));
    }
}
