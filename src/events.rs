//! Event hooks for the template lifecycle.
//!
//! Provides an optional, non-intrusive way to observe a pipeline run.
//! The executor emits events when a template starts, when an attempt fails,
//! when a joker is taken and when a parameter is committed. Implement
//! [`EventHandler`] for progress tracking or auditing; structured logs go
//! through `tracing` regardless.

use std::sync::Arc;

/// Events emitted during pipeline execution.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// A template was dispatched; all of its dependencies are committed.
    TemplateStart {
        /// Name of the template.
        template: String,
    },
    /// A template's result was committed to the parameter set.
    ParameterCommitted {
        /// Name of the committed parameter.
        name: String,
    },
    /// An attempt produced a result that failed the expectations.
    AttemptFailed {
        /// Name of the template.
        template: String,
        /// 1-indexed real attempt number, or 0 for a joker.
        attempt: u32,
        /// The expectation failure message.
        reason: String,
    },
    /// A joker parameter was taken as the template result.
    JokerUsed {
        template: String,
        joker: String,
    },
    /// A template settled.
    TemplateEnd {
        /// Name of the template.
        template: String,
        /// Whether it produced a result.
        ok: bool,
    },
    /// A transport-level retry due to HTTP error.
    TransportRetry {
        /// Provider title or operation description.
        name: String,
        /// The retry attempt number (1-indexed).
        attempt: u32,
        /// Delay before this retry attempt in milliseconds.
        delay_ms: u64,
        /// Reason for the retry (error description).
        reason: String,
    },
}

/// Handler for pipeline lifecycle events.
///
/// This is entirely optional -- pipelines run without an event handler.
///
/// # Example
///
/// ```
/// use prompt_pipeline::events::{Event, EventHandler};
///
/// struct PrintHandler;
///
/// impl EventHandler for PrintHandler {
///     fn on_event(&self, event: Event) {
///         match event {
///             Event::TemplateStart { template } => println!("[start] {}", template),
///             Event::TemplateEnd { template, ok } => println!("[end] {} ok={}", template, ok),
///             _ => {}
///         }
///     }
/// }
/// ```
pub trait EventHandler: Send + Sync {
    /// Called for every emitted event.
    fn on_event(&self, event: Event);
}

/// Emit an event if a handler is present. No-op otherwise.
pub(crate) fn emit(handler: &Option<Arc<dyn EventHandler>>, event: Event) {
    if let Some(ref h) = handler {
        h.on_event(event);
    }
}

/// An [`EventHandler`] backed by a closure.
///
/// # Example
///
/// ```
/// use prompt_pipeline::events::{Event, FnEventHandler};
/// use std::sync::Arc;
///
/// let handler = Arc::new(FnEventHandler(|event: Event| {
///     if let Event::ParameterCommitted { name } = event {
///         println!("resolved {}", name);
///     }
/// }));
/// ```
pub struct FnEventHandler<F: Fn(Event) + Send + Sync>(pub F);

impl<F: Fn(Event) + Send + Sync> EventHandler for FnEventHandler<F> {
    fn on_event(&self, event: Event) {
        (self.0)(event);
    }
}
