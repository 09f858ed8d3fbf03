//! Execution report of a pipeline run.
//!
//! The report records every real MODEL attempt in completion order: the
//! prompt that was sent, the result if the call returned one, and the error
//! if the call or its checks failed. Usage of a run is computed from it.

use crate::backend::{CommonPromptResult, Prompt};
use crate::usage::Usage;
use crate::PipelineError;
use serde::{Deserialize, Serialize};
use std::fmt::Write;

/// An error as stored in a report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportedError {
    /// Kind of the error, e.g. `ExpectationError`.
    pub name: String,
    pub message: String,
}

impl From<&PipelineError> for ReportedError {
    fn from(error: &PipelineError) -> Self {
        Self {
            name: error.kind().to_string(),
            message: error.to_string(),
        }
    }
}

/// One model call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportEntry {
    pub prompt: Prompt,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<CommonPromptResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ReportedError>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionReport {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pipeline_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub prompt_executions: Vec<ReportEntry>,
}

impl ExecutionReport {
    /// Sum of the usage of every entry that has a result.
    pub fn usage(&self) -> Usage {
        self.prompt_executions
            .iter()
            .filter_map(|entry| entry.result.as_ref())
            .map(CommonPromptResult::usage)
            .sum()
    }

    /// Number of entries that carry an error.
    pub fn failed_count(&self) -> usize {
        self.prompt_executions
            .iter()
            .filter(|entry| entry.error.is_some())
            .count()
    }

    /// Render the report as a markdown document.
    pub fn to_markdown(&self) -> String {
        let mut md = String::new();
        let title = self.title.as_deref().unwrap_or("Pipeline");
        let _ = writeln!(md, "# Execution report: {}", title);
        if let Some(url) = &self.pipeline_url {
            let _ = writeln!(md, "\n- Pipeline: {}", url);
        }
        if let Some(description) = &self.description {
            let _ = writeln!(md, "\n{}", description);
        }

        let usage = self.usage();
        let _ = writeln!(
            md,
            "\n- Calls: {}\n- Failed: {}\n- Price: {}$\n- Duration: {:.2}s",
            self.prompt_executions.len(),
            self.failed_count(),
            format_uncertain(usage.price.value, usage.price.is_uncertain),
            usage.duration.value,
        );

        for (i, entry) in self.prompt_executions.iter().enumerate() {
            let _ = writeln!(md, "\n## {}. {}", i + 1, entry.prompt.title);
            let _ = writeln!(
                md,
                "\n- Variant: {}",
                entry.prompt.model_requirements.model_variant
            );
            if let Some(result) = &entry.result {
                let _ = writeln!(md, "- Model: {}", result.model_name());
            }
            let _ = writeln!(md, "\n### Prompt\n\n```\n{}\n```", entry.prompt.content);
            if let Some(result) = &entry.result {
                let text = result.to_text().unwrap_or_default();
                let _ = writeln!(md, "\n### Result\n\n```\n{}\n```", text);
            }
            if let Some(error) = &entry.error {
                let _ = writeln!(md, "\n### Error\n\n{}: {}", error.name, error.message);
            }
        }
        md
    }
}

fn format_uncertain(value: f64, is_uncertain: bool) -> String {
    if is_uncertain {
        format!("~{}", value)
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{PromptResult, PromptTiming};
    use crate::types::ModelRequirements;
    use crate::usage::UncertainNumber;
    use chrono::Utc;

    fn entry(content: &str, price: f64, error: Option<PipelineError>) -> ReportEntry {
        let usage = Usage {
            price: UncertainNumber::exact(price),
            ..Usage::ZERO
        };
        ReportEntry {
            prompt: Prompt::new("Greeting", "Say hi", ModelRequirements::chat()),
            result: Some(CommonPromptResult::Chat(PromptResult {
                content: content.into(),
                model_name: "m".into(),
                timing: PromptTiming::since(Utc::now()),
                usage,
                raw_response: None,
            })),
            error: error.as_ref().map(ReportedError::from),
        }
    }

    #[test]
    fn test_usage_sums_all_results() {
        let report = ExecutionReport {
            prompt_executions: vec![
                entry("", 0.5, Some(PipelineError::Expectation("too short".into()))),
                entry("hi", 0.25, None),
            ],
            ..Default::default()
        };
        assert_eq!(report.usage().price.value, 0.75);
        assert_eq!(report.failed_count(), 1);
    }

    #[test]
    fn test_markdown_lists_entries() {
        let report = ExecutionReport {
            title: Some("Hello".into()),
            prompt_executions: vec![entry(
                "hi",
                0.0,
                Some(PipelineError::Expectation("too short".into())),
            )],
            ..Default::default()
        };
        let md = report.to_markdown();
        assert!(md.starts_with("# Execution report: Hello"));
        assert!(md.contains("## 1. Greeting"));
        assert!(md.contains("ExpectationError: too short"));
    }

    #[test]
    fn test_serializes_camel_case() {
        let report = ExecutionReport {
            prompt_executions: vec![entry("hi", 0.0, None)],
            ..Default::default()
        };
        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["promptExecutions"][0]["result"]["variant"], "CHAT");
        assert!(value["promptExecutions"][0].get("error").is_none());
    }
}
