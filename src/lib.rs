//! # Prompt Pipeline
//!
//! Dependency-driven execution of prompt pipelines, plus a resilient gateway
//! to language model providers.
//!
//! A [`Pipeline`] is a set of [`Template`]s, each producing one named
//! parameter from the parameters it depends on. [`PipelineExecutor`] runs
//! every template as soon as its inputs exist, retries results that miss
//! their [`Expectations`](expectations::Expectations), and returns the
//! declared outputs together with an [`ExecutionReport`] and the summed
//! [`Usage`].
//!
//! Model calls go through [`LlmExecutionTools`](backend::LlmExecutionTools).
//! Providers and decorators all implement it, so they stack:
//!
//! - [`MultiLlmExecutionTools`](backend::MultiLlmExecutionTools) fails over
//!   between providers in priority order.
//! - [`UsageCountingTools`](backend::UsageCountingTools) and
//!   [`UsageLimitTools`](backend::UsageLimitTools) account for spend.
//! - [`CachedTools`](backend::CachedTools) memoizes results in a
//!   [`Storage`](storage::Storage).
//! - [`RateLimitedTools`](backend::RateLimitedTools) throttles calls.
//!
//! ## Quick Start
//!
//! ```
//! use prompt_pipeline::backend::{MockedEchoTools, UsageCountingTools};
//! use prompt_pipeline::types::ModelRequirements;
//! use prompt_pipeline::{ExecutionSettings, ExecutionTools, Pipeline, PipelineExecutor, Template};
//! use std::collections::BTreeMap;
//! use std::sync::Arc;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> prompt_pipeline::Result<()> {
//! let pipeline = Pipeline::builder("Shout")
//!     .input("name")
//!     .output("greeting")
//!     .add_template(
//!         Template::new("greeting", "Hello {name}")
//!             .with_model(ModelRequirements::completion())
//!             .with_postprocessing("uppercase"),
//!     )
//!     .build()?;
//!
//! let llm = Arc::new(UsageCountingTools::new(Arc::new(MockedEchoTools::new())));
//! let tools = ExecutionTools::builder(llm.clone()).builtin_scripts().build();
//! let executor = PipelineExecutor::new(pipeline, tools, ExecutionSettings::default())?;
//!
//! let result = executor
//!     .execute(BTreeMap::from([("name".to_string(), "Ada".to_string())]))
//!     .await;
//! assert!(result.is_successful);
//! assert_eq!(result.output_parameters["greeting"], "HELLO ADA");
//! assert_eq!(llm.total_usage(), result.usage);
//! # Ok(())
//! # }
//! ```

pub mod attempt;
pub mod backend;
pub mod dialog;
pub mod error;
pub mod events;
pub mod expectations;
pub mod parameters;
pub mod pipeline;
pub mod postprocessing;
pub mod report;
pub mod script;
pub mod settings;
pub mod storage;
pub mod template;
pub mod tools;
pub mod types;
pub mod usage;

pub use error::{PipelineError, ProviderFailure, Result};
pub use pipeline::{ExecutionProgress, PipelineExecutor, PipelineExecutorResult};
pub use report::ExecutionReport;
pub use settings::ExecutionSettings;
pub use template::{Template, TemplateBuilder};
pub use tools::{ExecutionTools, ExecutionToolsBuilder};
pub use types::{Pipeline, PipelineBuilder};
pub use usage::Usage;
