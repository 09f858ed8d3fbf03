//! Script fallback chain and result postprocessing.
//!
//! A script is tried on each configured engine in priority order until one
//! succeeds. Postprocessing feeds a template result through a list of
//! function names, each executed as `name(resultString)` through that chain.

use crate::error::Result;
use crate::script::{ScriptExecutionOptions, ScriptExecutionTools};
use crate::PipelineError;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// Language postprocessing calls are written in.
pub const POSTPROCESSING_LANGUAGE: &str = "javascript";

/// Name of the variable holding the current result in postprocessing calls.
pub const RESULT_PARAMETER: &str = "resultString";

/// Run `options` on the first engine that succeeds.
///
/// With no engines this is a configuration error. With exactly one engine its
/// error is returned unchanged; with several, the error lists every engine's
/// failure in order.
pub async fn execute_script_with_fallback(
    engines: &[Arc<dyn ScriptExecutionTools>],
    options: &ScriptExecutionOptions,
) -> Result<String> {
    if engines.is_empty() {
        return Err(PipelineError::InvalidConfig(
            "No script execution tools are configured".to_string(),
        ));
    }

    let mut failures = Vec::with_capacity(engines.len());
    for engine in engines {
        match engine.execute(options.clone()).await {
            Ok(result) => return Ok(result),
            Err(e) => {
                debug!(engine = engine.title(), error = %e, "Script engine failed");
                failures.push((engine.title().to_string(), e));
            }
        }
    }

    if failures.len() == 1 {
        if let Some((_, error)) = failures.pop() {
            return Err(error);
        }
    }

    let listing = failures
        .iter()
        .map(|(title, e)| format!("- {}: {}", title, e))
        .collect::<Vec<_>>()
        .join("\n");
    Err(PipelineError::Script(format!(
        "All script execution tools failed:\n{}",
        listing
    )))
}

/// Apply `functions` to `result` in order.
pub async fn postprocess(
    engines: &[Arc<dyn ScriptExecutionTools>],
    result: String,
    functions: &[String],
) -> Result<String> {
    let mut current = result;
    for function in functions {
        let options = ScriptExecutionOptions {
            script_language: POSTPROCESSING_LANGUAGE.to_string(),
            script: format!("{}({})", function, RESULT_PARAMETER),
            parameters: BTreeMap::from([(RESULT_PARAMETER.to_string(), current)]),
        };
        current = execute_script_with_fallback(engines, &options).await?;
    }
    Ok(current)
}
