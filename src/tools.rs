//! The tool bundle a pipeline executes with.
//!
//! [`ExecutionTools`] carries the LLM tools, the script engines in priority
//! order, the optional user interface for DIALOG templates and an optional
//! event handler. Build it once and share it across executors; decorator
//! state (usage totals, cache, rate limits) lives in the tools and is shared
//! by every run that uses them.

use crate::backend::LlmExecutionTools;
use crate::dialog::UserInterfaceTools;
use crate::events::EventHandler;
use crate::script::{BuiltinScriptTools, ScriptExecutionTools};
use std::sync::Arc;

#[derive(Clone)]
pub struct ExecutionTools {
    pub llm: Arc<dyn LlmExecutionTools>,
    /// Script engines, tried in order.
    pub script: Vec<Arc<dyn ScriptExecutionTools>>,
    pub user_interface: Option<Arc<dyn UserInterfaceTools>>,
    pub event_handler: Option<Arc<dyn EventHandler>>,
}

impl ExecutionTools {
    /// Start building tools around `llm`.
    ///
    /// # Example
    ///
    /// ```
    /// use prompt_pipeline::backend::MockedEchoTools;
    /// use prompt_pipeline::ExecutionTools;
    /// use std::sync::Arc;
    ///
    /// let tools = ExecutionTools::builder(Arc::new(MockedEchoTools::new()))
    ///     .builtin_scripts()
    ///     .build();
    /// assert_eq!(tools.script.len(), 1);
    /// ```
    pub fn builder(llm: Arc<dyn LlmExecutionTools>) -> ExecutionToolsBuilder {
        ExecutionToolsBuilder {
            llm,
            script: Vec::new(),
            user_interface: None,
            event_handler: None,
        }
    }
}

impl std::fmt::Debug for ExecutionTools {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionTools")
            .field("llm", &self.llm.title())
            .field(
                "script",
                &self.script.iter().map(|s| s.title()).collect::<Vec<_>>(),
            )
            .field("has_user_interface", &self.user_interface.is_some())
            .field("has_event_handler", &self.event_handler.is_some())
            .finish()
    }
}

pub struct ExecutionToolsBuilder {
    llm: Arc<dyn LlmExecutionTools>,
    script: Vec<Arc<dyn ScriptExecutionTools>>,
    user_interface: Option<Arc<dyn UserInterfaceTools>>,
    event_handler: Option<Arc<dyn EventHandler>>,
}

impl ExecutionToolsBuilder {
    /// Append a script engine; earlier engines have priority.
    pub fn script(mut self, engine: Arc<dyn ScriptExecutionTools>) -> Self {
        self.script.push(engine);
        self
    }

    /// Append a [`BuiltinScriptTools`] with the default functions.
    pub fn builtin_scripts(self) -> Self {
        self.script(Arc::new(BuiltinScriptTools::new()))
    }

    pub fn user_interface(mut self, ui: Arc<dyn UserInterfaceTools>) -> Self {
        self.user_interface = Some(ui);
        self
    }

    pub fn event_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.event_handler = Some(handler);
        self
    }

    pub fn build(self) -> ExecutionTools {
        ExecutionTools {
            llm: self.llm,
            script: self.script,
            user_interface: self.user_interface,
            event_handler: self.event_handler,
        }
    }
}
