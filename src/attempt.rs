//! Joker and retry loop of a single template.
//!
//! [`AttemptController`] turns one template plus a snapshot of resolved
//! parameters into a result string. Jokers are tried first, then up to
//! `max_execution_attempts` real attempts. Only expectation failures are
//! retried; any other error ends the template immediately.

use crate::backend::{call_common_model, Prompt};
use crate::dialog::UserInterfaceDialogOptions;
use crate::error::Result;
use crate::events::{emit, Event};
use crate::postprocessing::{execute_script_with_fallback, postprocess};
use crate::report::{ReportEntry, ReportedError};
use crate::script::ScriptExecutionOptions;
use crate::settings::ExecutionSettings;
use crate::template::Template;
use crate::tools::ExecutionTools;
use crate::types::ExecutionType;
use crate::PipelineError;
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Script language assumed when a SCRIPT template does not name one.
pub const DEFAULT_SCRIPT_LANGUAGE: &str = "javascript";

/// What one template execution produced.
#[derive(Debug)]
pub struct TemplateOutcome {
    /// Report entries of every real MODEL attempt, in order.
    pub entries: Vec<ReportEntry>,
    /// The committed value, or the error that ends the run.
    pub result: Result<String>,
}

/// Executes templates against a set of tools.
#[derive(Debug, Clone)]
pub struct AttemptController {
    tools: ExecutionTools,
    max_execution_attempts: u32,
    pipeline_url: Option<String>,
}

impl AttemptController {
    pub fn new(tools: ExecutionTools, settings: &ExecutionSettings) -> Self {
        Self {
            tools,
            max_execution_attempts: settings.max_execution_attempts,
            pipeline_url: None,
        }
    }

    /// URL recorded on every prompt sent to a model.
    pub fn with_pipeline_url(mut self, url: Option<String>) -> Self {
        self.pipeline_url = url;
        self
    }

    /// Real attempts a template of this type gets.
    fn attempt_limit(&self, template: &Template) -> u32 {
        match template.execution_type {
            ExecutionType::Dialog => u32::MAX,
            _ => self.max_execution_attempts,
        }
    }

    /// Execute `template` with `parameters`, the snapshot taken when it started.
    pub async fn execute(
        &self,
        template: &Template,
        parameters: &BTreeMap<String, String>,
    ) -> TemplateOutcome {
        let mut entries = Vec::new();
        let result = self.run(template, parameters, &mut entries).await;
        TemplateOutcome { entries, result }
    }

    async fn run(
        &self,
        template: &Template,
        parameters: &BTreeMap<String, String>,
        entries: &mut Vec<ReportEntry>,
    ) -> Result<String> {
        let parameters: BTreeMap<String, String> = parameters
            .iter()
            .filter(|(name, _)| template.dependent_parameter_names.contains(*name))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();

        let mut last_error: Option<PipelineError> = None;
        let mut last_result: Option<String> = None;

        for joker in &template.jokers {
            let value = parameters.get(joker).ok_or_else(|| {
                PipelineError::InvalidConfig(format!(
                    "Joker parameter {{{}}} of template '{}' is not defined",
                    joker, template.name
                ))
            })?;
            match check(template, value) {
                Ok(()) => {
                    debug!(template = %template.name, %joker, "Joker passed expectations");
                    emit(
                        &self.tools.event_handler,
                        Event::JokerUsed {
                            template: template.name.clone(),
                            joker: joker.clone(),
                        },
                    );
                    return Ok(value.clone());
                }
                Err(e) if e.is_expectation() => {
                    debug!(template = %template.name, %joker, error = %e, "Joker rejected");
                    emit(
                        &self.tools.event_handler,
                        Event::AttemptFailed {
                            template: template.name.clone(),
                            attempt: 0,
                            reason: e.to_string(),
                        },
                    );
                    last_error = Some(e);
                    last_result = Some(value.clone());
                }
                Err(e) => return Err(e),
            }
        }

        let limit = self.attempt_limit(template);
        for attempt in 1..=limit {
            let mut candidate = None;
            match self
                .attempt(template, &parameters, entries, &mut candidate)
                .await
            {
                Ok(result) => {
                    debug!(template = %template.name, attempt, "Attempt succeeded");
                    return Ok(result);
                }
                Err(e) if e.is_expectation() => {
                    warn!(
                        template = %template.name,
                        attempt,
                        max_attempts = limit,
                        error = %e,
                        "Result does not meet expectations, retrying"
                    );
                    emit(
                        &self.tools.event_handler,
                        Event::AttemptFailed {
                            template: template.name.clone(),
                            attempt,
                            reason: e.to_string(),
                        },
                    );
                    last_error = Some(e);
                    last_result = candidate;
                }
                Err(e) => return Err(e),
            }
        }

        Err(PipelineError::AttemptsExhausted {
            template: template.name.clone(),
            attempts: limit,
            last_error: last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "(no attempt was made)".to_string()),
            last_result,
        })
    }

    /// One real attempt. `candidate` receives the result that was checked.
    async fn attempt(
        &self,
        template: &Template,
        parameters: &BTreeMap<String, String>,
        entries: &mut Vec<ReportEntry>,
        candidate: &mut Option<String>,
    ) -> Result<String> {
        match template.execution_type {
            ExecutionType::Simple => {
                let text = template.render(parameters)?;
                self.finish(template, text, candidate).await
            }
            ExecutionType::Script => {
                let options = ScriptExecutionOptions {
                    script_language: template
                        .content_language
                        .clone()
                        .unwrap_or_else(|| DEFAULT_SCRIPT_LANGUAGE.to_string()),
                    script: template.content.clone(),
                    parameters: parameters.clone(),
                };
                let text = execute_script_with_fallback(&self.tools.script, &options).await?;
                self.finish(template, text, candidate).await
            }
            ExecutionType::Dialog => {
                let ui = self.tools.user_interface.as_ref().ok_or_else(|| {
                    PipelineError::InvalidConfig(format!(
                        "Template '{}' is a DIALOG template but no user interface tools are configured",
                        template.name
                    ))
                })?;
                let options = UserInterfaceDialogOptions {
                    prompt_title: template.title.clone(),
                    prompt_message: template.render(parameters)?,
                    default_value: None,
                    placeholder: None,
                    priority: 0,
                };
                let text = ui.prompt_dialog(options).await?;
                self.finish(template, text, candidate).await
            }
            ExecutionType::Model => {
                let model_requirements = template.model_requirements.clone().ok_or_else(|| {
                    PipelineError::InvalidConfig(format!(
                        "Template '{}' is a MODEL template without model requirements",
                        template.name
                    ))
                })?;
                let prompt = Prompt {
                    title: template.title.clone(),
                    pipeline_url: self.pipeline_url.clone(),
                    parameters: parameters.clone(),
                    content: template.render(parameters)?,
                    model_requirements,
                    expectations: template.expectations.clone(),
                    expect_format: template.expect_format,
                    postprocessing: template.postprocessing.clone(),
                };

                let result = match call_common_model(self.tools.llm.as_ref(), &prompt).await {
                    Ok(result) => result,
                    Err(e) => {
                        entries.push(ReportEntry {
                            prompt,
                            result: None,
                            error: Some(ReportedError::from(&e)),
                        });
                        return Err(e);
                    }
                };

                let checked = match result.to_text() {
                    Ok(text) => self.finish(template, text, candidate).await,
                    Err(e) => Err(e),
                };
                entries.push(ReportEntry {
                    prompt,
                    result: Some(result),
                    error: checked.as_ref().err().map(ReportedError::from),
                });
                checked
            }
        }
    }

    /// Postprocess a raw result and check it.
    async fn finish(
        &self,
        template: &Template,
        raw: String,
        candidate: &mut Option<String>,
    ) -> Result<String> {
        *candidate = Some(raw.clone());
        let result = postprocess(&self.tools.script, raw, &template.postprocessing).await?;
        *candidate = Some(result.clone());
        check(template, &result)?;
        Ok(result)
    }
}

/// Expectations, then format.
fn check(template: &Template, text: &str) -> Result<()> {
    if let Some(expectations) = &template.expectations {
        expectations.check(text)?;
    }
    if let Some(format) = template.expect_format {
        format.check(text)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{FailingTools, MockedEchoTools, ScriptedTools};
    use crate::dialog::CallbackInterfaceTools;
    use crate::events::FnEventHandler;
    use crate::expectations::{ExpectFormat, ExpectationUnit, Expectations};
    use crate::types::ModelRequirements;
    use futures::FutureExt;
    use std::sync::{Arc, Mutex};

    fn controller(llm: Arc<dyn crate::backend::LlmExecutionTools>) -> AttemptController {
        let tools = ExecutionTools::builder(llm).builtin_scripts().build();
        AttemptController::new(tools, &ExecutionSettings::default())
    }

    fn non_empty() -> Expectations {
        Expectations::default().with_min(ExpectationUnit::Characters, 1)
    }

    fn params(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[tokio::test]
    async fn test_simple_template_renders() {
        let c = controller(Arc::new(MockedEchoTools::new()));
        let template = Template::new("greeting", "Hello {name}!");
        let outcome = c.execute(&template, &params(&[("name", "Alice")])).await;
        assert_eq!(outcome.result.unwrap(), "Hello Alice!");
        assert!(outcome.entries.is_empty());
    }

    #[tokio::test]
    async fn test_model_retries_until_expectations_pass() {
        let llm = Arc::new(ScriptedTools::new(vec!["".into(), "".into(), "Hello".into()]));
        let c = controller(llm.clone());
        let template = Template::new("greeting", "Say hi")
            .with_model(ModelRequirements::chat())
            .with_expectations(non_empty());

        let outcome = c.execute(&template, &BTreeMap::new()).await;

        assert_eq!(outcome.result.unwrap(), "Hello");
        assert_eq!(llm.call_count(), 3);
        assert_eq!(outcome.entries.len(), 3);
        assert!(outcome.entries[0].error.is_some());
        assert!(outcome.entries[1].error.is_some());
        assert!(outcome.entries[2].error.is_none());
    }

    #[tokio::test]
    async fn test_exhaustion_embeds_last_error_and_result() {
        let c = controller(Arc::new(ScriptedTools::fixed("nope")));
        let template = Template::new("number", "Give me JSON")
            .with_model(ModelRequirements::chat())
            .with_expect_format(ExpectFormat::Json);

        let outcome = c.execute(&template, &BTreeMap::new()).await;

        match outcome.result.unwrap_err() {
            PipelineError::AttemptsExhausted {
                template,
                attempts,
                last_error,
                last_result,
            } => {
                assert_eq!(template, "number");
                assert_eq!(attempts, 3);
                assert!(last_error.contains("Expected valid JSON"));
                assert_eq!(last_result.as_deref(), Some("nope"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(outcome.entries.len(), 3);
    }

    #[tokio::test]
    async fn test_passing_joker_skips_model() {
        let llm = Arc::new(ScriptedTools::fixed("from model"));
        let c = controller(llm.clone());
        let template = Template::new("answer", "Answer")
            .with_model(ModelRequirements::chat())
            .with_joker("cached")
            .with_expectations(non_empty());

        let outcome = c.execute(&template, &params(&[("cached", "from joker")])).await;

        assert_eq!(outcome.result.unwrap(), "from joker");
        assert_eq!(llm.call_count(), 0);
        assert!(outcome.entries.is_empty());
    }

    #[tokio::test]
    async fn test_failing_joker_falls_through_to_model() {
        let llm = Arc::new(ScriptedTools::fixed("from model"));
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let tools = ExecutionTools::builder(llm.clone())
            .event_handler(Arc::new(FnEventHandler(move |e: Event| {
                sink.lock().unwrap().push(e)
            })))
            .build();
        let c = AttemptController::new(tools, &ExecutionSettings::default());
        let template = Template::new("answer", "Answer")
            .with_model(ModelRequirements::chat())
            .with_joker("cached")
            .with_expectations(non_empty());

        let outcome = c.execute(&template, &params(&[("cached", "")])).await;

        assert_eq!(outcome.result.unwrap(), "from model");
        assert_eq!(llm.call_count(), 1);
        let events = events.lock().unwrap();
        assert!(matches!(events[0], Event::AttemptFailed { attempt: 0, .. }));
    }

    #[tokio::test]
    async fn test_provider_error_is_fatal_and_reported() {
        let c = controller(Arc::new(FailingTools::new("down", "connection refused")));
        let template = Template::new("t", "x")
            .with_model(ModelRequirements::chat())
            .with_expectations(non_empty());

        let outcome = c.execute(&template, &BTreeMap::new()).await;

        let err = outcome.result.unwrap_err();
        assert!(!err.is_expectation());
        assert_eq!(outcome.entries.len(), 1);
        assert!(outcome.entries[0].result.is_none());
        assert_eq!(
            outcome.entries[0].error.as_ref().unwrap().message,
            "connection refused"
        );
    }

    #[tokio::test]
    async fn test_postprocessing_runs_before_expectations() {
        let c = controller(Arc::new(ScriptedTools::fixed("  \"Paris\"  ")));
        let template = Template::new("capital", "Capital of France?")
            .with_model(ModelRequirements::chat())
            .with_postprocessing("trim")
            .with_postprocessing("removeQuotes")
            .with_expectations(Expectations::default().with_max(ExpectationUnit::Characters, 5));

        let outcome = c.execute(&template, &BTreeMap::new()).await;
        assert_eq!(outcome.result.unwrap(), "Paris");
    }

    #[tokio::test]
    async fn test_script_template() {
        let c = controller(Arc::new(MockedEchoTools::new()));
        let template = Template::new("shout", "uppercase(name)")
            .with_script("javascript")
            .depends_on("name");

        let outcome = c.execute(&template, &params(&[("name", "alice")])).await;
        assert_eq!(outcome.result.unwrap(), "ALICE");
    }

    #[tokio::test]
    async fn test_dialog_asks_until_answer_passes() {
        let asked = Arc::new(Mutex::new(0u32));
        let counter = asked.clone();
        let ui = CallbackInterfaceTools::new(move |_options| {
            let mut n = counter.lock().unwrap();
            *n += 1;
            let answer = if *n < 5 { String::new() } else { "Bob".to_string() };
            async move { Ok(answer) }.boxed()
        });
        let tools = ExecutionTools::builder(Arc::new(MockedEchoTools::new()))
            .user_interface(Arc::new(ui))
            .build();
        let c = AttemptController::new(tools, &ExecutionSettings::strict());
        let template = Template::new("name", "What is your name?")
            .with_dialog()
            .with_expectations(non_empty());

        let outcome = c.execute(&template, &BTreeMap::new()).await;

        assert_eq!(outcome.result.unwrap(), "Bob");
        assert_eq!(*asked.lock().unwrap(), 5);
    }

    #[tokio::test]
    async fn test_dialog_without_ui_is_configuration_error() {
        let c = controller(Arc::new(MockedEchoTools::new()));
        let template = Template::new("name", "Name?").with_dialog();
        let outcome = c.execute(&template, &BTreeMap::new()).await;
        assert!(matches!(
            outcome.result,
            Err(PipelineError::InvalidConfig(_))
        ));
    }

    #[tokio::test]
    async fn test_embedding_becomes_json_array() {
        let c = controller(Arc::new(MockedEchoTools::new()));
        let template = Template::new("vector", "abc").with_model(ModelRequirements::embedding());
        let outcome = c.execute(&template, &BTreeMap::new()).await;
        let text = outcome.result.unwrap();
        let values: Vec<f32> = serde_json::from_str(&text).unwrap();
        assert!(!values.is_empty());
    }
}
