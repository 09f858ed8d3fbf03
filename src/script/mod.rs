//! Script execution tools.
//!
//! SCRIPT templates and postprocessing functions run through implementations
//! of [`ScriptExecutionTools`]. Several engines can be configured; callers
//! try them in priority order (see [`crate::postprocessing`]).

pub mod builtin;

pub use builtin::BuiltinScriptTools;

use crate::error::Result;
use async_trait::async_trait;
use std::collections::BTreeMap;

/// One script to execute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptExecutionOptions {
    /// Language of `script`, e.g. `javascript`.
    pub script_language: String,
    pub script: String,
    /// Variables visible to the script.
    pub parameters: BTreeMap<String, String>,
}

/// A script engine.
#[async_trait]
pub trait ScriptExecutionTools: Send + Sync {
    /// Human-readable name used in aggregated error messages.
    fn title(&self) -> &str;

    /// Run a script and return its string result. Fails on any script error.
    async fn execute(&self, options: ScriptExecutionOptions) -> Result<String>;
}
