//! Dependency-driven pipeline execution.
//!
//! [`PipelineExecutor`] schedules the templates of a [`Pipeline`] as soon as
//! their dependencies are committed, runs up to `max_parallel_count` of them
//! concurrently and commits each result before re-evaluating readiness.
//! The first template failure aborts the run; in-flight templates are
//! dropped.
//!
//! # Example
//!
//! ```no_run
//! use prompt_pipeline::backend::OllamaExecutionTools;
//! use prompt_pipeline::types::ModelRequirements;
//! use prompt_pipeline::{ExecutionSettings, ExecutionTools, Pipeline, PipelineExecutor, Template};
//! use std::collections::BTreeMap;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let pipeline = Pipeline::builder("Bio")
//!         .input("name")
//!         .output("bio")
//!         .add_template(
//!             Template::new("bio", "Write a one-line bio of {name}.")
//!                 .with_model(ModelRequirements::chat()),
//!         )
//!         .build()?;
//!
//!     let tools = ExecutionTools::builder(Arc::new(OllamaExecutionTools::new(
//!         "http://localhost:11434",
//!     )))
//!     .builtin_scripts()
//!     .build();
//!
//!     let executor = PipelineExecutor::new(pipeline, tools, ExecutionSettings::default())?;
//!     let result = executor
//!         .execute(BTreeMap::from([("name".to_string(), "Ada".to_string())]))
//!         .await;
//!     println!("{:?}", result.output_parameters.get("bio"));
//!     Ok(())
//! }
//! ```

use crate::{
    attempt::{AttemptController, TemplateOutcome},
    error::Result,
    events::{emit, Event, EventHandler},
    parameters::ParameterSet,
    report::ExecutionReport,
    settings::ExecutionSettings,
    template::Template,
    tools::ExecutionTools,
    types::Pipeline,
    usage::Usage,
    PipelineError,
};
use futures::stream::{FuturesUnordered, StreamExt};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Lower bound on the scheduling iterations a run may take.
///
/// Every iteration settles one template, so a run is allowed
/// `max(LOOP_LIMIT, templates + 1)` iterations before it is treated as stuck.
pub const LOOP_LIMIT: usize = 1000;

/// Outcome of [`PipelineExecutor::execute`].
#[derive(Debug)]
pub struct PipelineExecutorResult {
    pub is_successful: bool,
    /// Declared output parameters that were produced.
    pub output_parameters: BTreeMap<String, String>,
    /// Sum of the usage of every model call in the report.
    pub usage: Usage,
    pub execution_report: ExecutionReport,
    pub errors: Vec<PipelineError>,
    pub warnings: Vec<PipelineError>,
}

/// Progress of a run, passed to the callback of
/// [`PipelineExecutor::execute_with_progress`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionProgress {
    /// Template that just started or settled.
    pub template: String,
    /// Whether it settled (`true`) or started (`false`).
    pub is_done: bool,
    /// Templates settled so far.
    pub done_count: usize,
    pub total_count: usize,
}

/// Runs one pipeline with one set of tools.
pub struct PipelineExecutor {
    pipeline: Pipeline,
    controller: AttemptController,
    event_handler: Option<Arc<dyn EventHandler>>,
    settings: ExecutionSettings,
}

impl std::fmt::Debug for PipelineExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineExecutor")
            .field("pipeline", &self.pipeline.title)
            .field(
                "templates",
                &self
                    .pipeline
                    .templates
                    .iter()
                    .map(|t| &t.name)
                    .collect::<Vec<_>>(),
            )
            .field("settings", &self.settings)
            .finish()
    }
}

impl PipelineExecutor {
    /// Validate `pipeline` and `settings` and prepare an executor.
    pub fn new(
        pipeline: Pipeline,
        tools: ExecutionTools,
        settings: ExecutionSettings,
    ) -> Result<Self> {
        settings.validate()?;
        pipeline.validate()?;
        debug!(
            pipeline = %pipeline.title,
            templates = pipeline.templates.len(),
            llm = tools.llm.title(),
            "Creating PipelineExecutor"
        );
        let event_handler = tools.event_handler.clone();
        let controller = AttemptController::new(tools, &settings)
            .with_pipeline_url(pipeline.pipeline_url.clone());
        Ok(Self {
            pipeline,
            controller,
            event_handler,
            settings,
        })
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    pub fn settings(&self) -> &ExecutionSettings {
        &self.settings
    }

    /// Execute the pipeline with the given input parameters.
    pub async fn execute(&self, input: BTreeMap<String, String>) -> PipelineExecutorResult {
        self.execute_with_progress(input, |_| {}).await
    }

    /// Execute with a progress callback invoked when a template starts and
    /// when it settles.
    pub async fn execute_with_progress<F>(
        &self,
        input: BTreeMap<String, String>,
        mut on_progress: F,
    ) -> PipelineExecutorResult
    where
        F: FnMut(ExecutionProgress),
    {
        let mut report = ExecutionReport {
            pipeline_url: self.pipeline.pipeline_url.clone(),
            title: Some(self.pipeline.title.clone()),
            description: self.pipeline.description.clone(),
            prompt_executions: Vec::new(),
        };
        let mut warnings = Vec::new();
        let mut parameters = ParameterSet::new();

        let outcome = match self.load_input(&input, &mut parameters, &mut warnings) {
            Ok(()) => {
                self.run(&mut parameters, &mut report, &mut on_progress)
                    .await
            }
            Err(e) => Err(e),
        };

        let usage = report.usage();
        let output_names = self.pipeline.output_names();
        let errors = match outcome {
            Ok(()) => {
                for name in &output_names {
                    if !parameters.contains(name) {
                        warnings.push(PipelineError::Other(format!(
                            "Parameter {{{}}} should be an output parameter, but it was not generated",
                            name
                        )));
                    }
                }
                Vec::new()
            }
            Err(e) => {
                warn!(pipeline = %self.pipeline.title, error = %e, "Pipeline execution failed");
                vec![e]
            }
        };
        parameters.retain_names(&output_names);

        PipelineExecutorResult {
            is_successful: errors.is_empty(),
            output_parameters: parameters.into_inner(),
            usage,
            execution_report: report,
            errors,
            warnings,
        }
    }

    /// Seed the parameter set with the declared inputs.
    fn load_input(
        &self,
        input: &BTreeMap<String, String>,
        parameters: &mut ParameterSet,
        warnings: &mut Vec<PipelineError>,
    ) -> Result<()> {
        let declared = self.pipeline.input_names();
        for name in &declared {
            let value = input.get(name).ok_or_else(|| {
                PipelineError::InvalidConfig(format!(
                    "Parameter {{{}}} is required as an input parameter",
                    name
                ))
            })?;
            parameters.insert(name.clone(), value.clone())?;
        }
        for name in input.keys().filter(|name| !declared.contains(*name)) {
            warnings.push(PipelineError::Other(format!(
                "Parameter {{{}}} is passed as input parameter but it is not input",
                name
            )));
        }
        Ok(())
    }

    async fn run<F>(
        &self,
        parameters: &mut ParameterSet,
        report: &mut ExecutionReport,
        on_progress: &mut F,
    ) -> Result<()>
    where
        F: FnMut(ExecutionProgress),
    {
        let total_count = self.pipeline.templates.len();
        let mut pending: Vec<&Template> = self.pipeline.templates.iter().collect();
        let mut in_flight = FuturesUnordered::new();
        let mut done_count = 0;
        let controller = &self.controller;
        let loop_limit = LOOP_LIMIT.max(total_count + 1);

        for iteration in 0.. {
            if pending.is_empty() && in_flight.is_empty() {
                break;
            }
            if iteration >= loop_limit {
                return Err(PipelineError::Unexpected(format!(
                    "Loop limit of {} iterations reached while resolving pipeline '{}'",
                    loop_limit, self.pipeline.title
                )));
            }

            let resolved = parameters.names();
            let mut i = 0;
            while i < pending.len() && in_flight.len() < self.settings.max_parallel_count {
                if !pending[i].is_ready(&resolved) {
                    i += 1;
                    continue;
                }
                let template = pending.remove(i);
                self.log_progress(&template.name, "Template started");
                emit(
                    &self.event_handler,
                    Event::TemplateStart {
                        template: template.name.clone(),
                    },
                );
                on_progress(ExecutionProgress {
                    template: template.name.clone(),
                    is_done: false,
                    done_count,
                    total_count,
                });
                let snapshot = parameters.snapshot();
                in_flight.push(async move {
                    let outcome: TemplateOutcome = controller.execute(template, &snapshot).await;
                    (template, outcome)
                });
            }

            let Some((template, outcome)) = in_flight.next().await else {
                let waiting = pending
                    .iter()
                    .map(|t| t.name.as_str())
                    .collect::<Vec<_>>()
                    .join(", ");
                return Err(PipelineError::Unexpected(format!(
                    "Can not resolve some parameters, templates waiting forever: {}",
                    waiting
                )));
            };

            done_count += 1;
            report.prompt_executions.extend(outcome.entries);
            let ok = outcome.result.is_ok();
            emit(
                &self.event_handler,
                Event::TemplateEnd {
                    template: template.name.clone(),
                    ok,
                },
            );
            on_progress(ExecutionProgress {
                template: template.name.clone(),
                is_done: true,
                done_count,
                total_count,
            });

            let value = outcome.result.map_err(|e| PipelineError::TemplateFailed {
                template: template.name.clone(),
                source: Box::new(e),
            })?;
            parameters.insert(template.resulting_parameter_name.clone(), value)?;
            self.log_progress(&template.name, "Template committed");
            emit(
                &self.event_handler,
                Event::ParameterCommitted {
                    name: template.resulting_parameter_name.clone(),
                },
            );
        }

        Ok(())
    }

    fn log_progress(&self, template: &str, message: &str) {
        if self.settings.is_verbose {
            info!(pipeline = %self.pipeline.title, template, "{}", message);
        } else {
            debug!(pipeline = %self.pipeline.title, template, "{}", message);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{FailingTools, MockedEchoTools, ScriptedTools};
    use crate::events::FnEventHandler;
    use crate::expectations::{ExpectationUnit, Expectations};
    use crate::types::ModelRequirements;
    use std::sync::Mutex;

    fn input(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn tools(llm: Arc<dyn crate::backend::LlmExecutionTools>) -> ExecutionTools {
        ExecutionTools::builder(llm).builtin_scripts().build()
    }

    fn chain() -> Pipeline {
        Pipeline::builder("Chain")
            .input("name")
            .output("shout")
            .add_template(Template::new("greeting", "Hello {name}"))
            .add_template(
                Template::new("shout", "uppercase(greeting)")
                    .with_script("javascript")
                    .depends_on("greeting"),
            )
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_chain_resolves_in_order() {
        let executor = PipelineExecutor::new(
            chain(),
            tools(Arc::new(MockedEchoTools::new())),
            ExecutionSettings::default(),
        )
        .unwrap();

        let result = executor.execute(input(&[("name", "ada")])).await;

        assert!(result.is_successful, "{:?}", result.errors);
        assert_eq!(result.output_parameters.get("shout").unwrap(), "HELLO ADA");
        // Intermediate parameters are filtered out.
        assert!(!result.output_parameters.contains_key("greeting"));
        assert!(result.warnings.is_empty());
    }

    #[tokio::test]
    async fn test_large_pipeline_is_not_cut_by_loop_limit() {
        let count = LOOP_LIMIT + 200;
        let mut builder = Pipeline::builder("Wide")
            .output("t0")
            .output(format!("t{}", count - 1));
        for i in 0..count {
            builder = builder.add_template(
                Template::new(format!("t{}", i), "go").with_model(ModelRequirements::chat()),
            );
        }
        let llm = Arc::new(ScriptedTools::fixed("ok"));
        let executor = PipelineExecutor::new(
            builder.build().unwrap(),
            tools(llm.clone()),
            ExecutionSettings::default(),
        )
        .unwrap();

        let result = executor.execute(BTreeMap::new()).await;

        assert!(result.is_successful, "{:?}", result.errors);
        assert_eq!(llm.call_count(), count);
        assert_eq!(result.output_parameters.len(), 2);
    }

    #[tokio::test]
    async fn test_missing_input_fails_without_running() {
        let llm = Arc::new(ScriptedTools::fixed("x"));
        let executor =
            PipelineExecutor::new(chain(), tools(llm.clone()), ExecutionSettings::default())
                .unwrap();

        let result = executor.execute(BTreeMap::new()).await;

        assert!(!result.is_successful);
        assert!(matches!(result.errors[0], PipelineError::InvalidConfig(_)));
        assert!(result.output_parameters.is_empty());
        assert_eq!(llm.call_count(), 0);
    }

    #[tokio::test]
    async fn test_extra_input_is_a_warning() {
        let executor = PipelineExecutor::new(
            chain(),
            tools(Arc::new(MockedEchoTools::new())),
            ExecutionSettings::default(),
        )
        .unwrap();

        let result = executor
            .execute(input(&[("name", "ada"), ("unused", "1")]))
            .await;

        assert!(result.is_successful);
        assert_eq!(result.warnings.len(), 1);
        assert!(result.warnings[0].to_string().contains("{unused}"));
    }

    #[tokio::test]
    async fn test_failure_aborts_and_wraps_error() {
        let pipeline = Pipeline::builder("Broken")
            .output("answer")
            .add_template(Template::new("answer", "Q").with_model(ModelRequirements::chat()))
            .build()
            .unwrap();
        let executor = PipelineExecutor::new(
            pipeline,
            tools(Arc::new(FailingTools::new("down", "offline"))),
            ExecutionSettings::default(),
        )
        .unwrap();

        let result = executor.execute(BTreeMap::new()).await;

        assert!(!result.is_successful);
        match &result.errors[0] {
            PipelineError::TemplateFailed { template, source } => {
                assert_eq!(template, "answer");
                assert_eq!(source.to_string(), "offline");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(result.execution_report.prompt_executions.len(), 1);
    }

    #[tokio::test]
    async fn test_usage_sums_report() {
        let pipeline = Pipeline::builder("Two calls")
            .output("b")
            .add_template(Template::new("a", "first").with_model(ModelRequirements::completion()))
            .add_template(Template::new("b", "{a} second").with_model(ModelRequirements::completion()))
            .build()
            .unwrap();
        let executor = PipelineExecutor::new(
            pipeline,
            tools(Arc::new(MockedEchoTools::new())),
            ExecutionSettings::default(),
        )
        .unwrap();

        let result = executor.execute(BTreeMap::new()).await;

        assert!(result.is_successful);
        assert_eq!(result.execution_report.prompt_executions.len(), 2);
        assert_eq!(result.usage, result.execution_report.usage());
        assert_eq!(result.output_parameters.get("b").unwrap(), "first second");
    }

    #[tokio::test]
    async fn test_unproduced_output_is_a_warning() {
        let pipeline = Pipeline::builder("Declared")
            .output("a")
            .output("never")
            .add_template(Template::new("a", "x"))
            .build()
            .unwrap();
        let executor = PipelineExecutor::new(
            pipeline,
            tools(Arc::new(MockedEchoTools::new())),
            ExecutionSettings::default(),
        )
        .unwrap();

        let result = executor.execute(BTreeMap::new()).await;

        assert!(result.is_successful);
        assert_eq!(result.warnings.len(), 1);
        assert!(result.warnings[0].to_string().contains("{never}"));
    }

    #[tokio::test]
    async fn test_events_and_progress() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let tools = ExecutionTools::builder(Arc::new(MockedEchoTools::new()))
            .builtin_scripts()
            .event_handler(Arc::new(FnEventHandler(move |e: Event| {
                sink.lock().unwrap().push(e)
            })))
            .build();
        let executor = PipelineExecutor::new(chain(), tools, ExecutionSettings::default()).unwrap();

        let mut progress = Vec::new();
        let result = executor
            .execute_with_progress(input(&[("name", "ada")]), |p| progress.push(p))
            .await;

        assert!(result.is_successful);
        assert_eq!(progress.len(), 4);
        assert_eq!(progress[3].done_count, 2);
        let events = events.lock().unwrap();
        assert_eq!(
            events.first(),
            Some(&Event::TemplateStart {
                template: "greeting".into()
            })
        );
        assert_eq!(
            events.last(),
            Some(&Event::ParameterCommitted {
                name: "shout".into()
            })
        );
    }

    #[tokio::test]
    async fn test_exhausted_template_fails_run() {
        let pipeline = Pipeline::builder("Strict")
            .output("t")
            .add_template(
                Template::new("t", "x")
                    .with_model(ModelRequirements::chat())
                    .with_expectations(Expectations::default().with_min(ExpectationUnit::Words, 100)),
            )
            .build()
            .unwrap();
        let executor = PipelineExecutor::new(
            pipeline,
            tools(Arc::new(ScriptedTools::fixed("too short"))),
            ExecutionSettings::default().with_max_execution_attempts(2),
        )
        .unwrap();

        let result = executor.execute(BTreeMap::new()).await;

        assert!(!result.is_successful);
        let message = result.errors[0].to_string();
        assert!(message.contains("failed after 2 attempts"));
        assert!(message.contains("too short"));
        assert_eq!(result.execution_report.failed_count(), 2);
    }

    #[test]
    fn test_invalid_pipeline_rejected() {
        // Bypasses the builder, which validates too.
        let pipeline = Pipeline {
            pipeline_url: None,
            title: "Cycle".into(),
            description: None,
            parameters: Vec::new(),
            templates: vec![Template::new("a", "{b}"), Template::new("b", "{a}")],
        };
        let err = PipelineExecutor::new(
            pipeline,
            tools(Arc::new(MockedEchoTools::new())),
            ExecutionSettings::default(),
        )
        .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidConfig(_)));
    }
}
