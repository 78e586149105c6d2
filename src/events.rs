//! Event system for stage lifecycle and streaming hooks.
//!
//! Provides an optional, non-intrusive way to observe pipeline execution.
//! Stages emit events when they start and finish, model calls emit tokens
//! while streaming, and combinators report routing and fan-in.
//! Implement [`EventHandler`] to receive these events for progress
//! tracking or streaming UIs. Diagnostic logging goes through `tracing`.

use std::sync::Arc;

/// Events emitted during pipeline execution.
#[derive(Debug, Clone)]
pub enum Event {
    /// A stage has started executing.
    StageStart {
        /// Instance name of the stage.
        name: String,
        /// Stable type identifier (e.g. `"llm-call"`, `"parallel"`).
        kind: &'static str,
    },
    /// A token was received during streaming.
    Token {
        /// Instance name of the stage producing this token.
        name: String,
        /// The token text.
        chunk: String,
    },
    /// A stage has finished executing.
    StageEnd {
        /// Instance name of the stage.
        name: String,
        /// Whether execution succeeded.
        ok: bool,
    },
    /// A branch picked the stage it will run.
    BranchRouted {
        /// Instance name of the branch.
        name: String,
        /// Name of the selected stage.
        selected: String,
        /// `true` if no predicate matched and the fallback was chosen.
        fallback: bool,
    },
    /// Every branch of a parallel stage has completed.
    ParallelJoined {
        /// Instance name of the parallel stage.
        name: String,
        /// Keys of the merged result.
        keys: Vec<String>,
    },
}

/// Handler for stage lifecycle events.
///
/// This is entirely optional -- stages work without an event handler.
///
/// # Example
///
/// ```
/// use llm_chains::events::{Event, EventHandler};
///
/// struct PrintHandler;
///
/// impl EventHandler for PrintHandler {
///     fn on_event(&self, event: Event) {
///         match event {
///             Event::Token { chunk, .. } => print!("{}", chunk),
///             Event::StageStart { name, .. } => println!("[start] {}", name),
///             Event::StageEnd { name, ok, .. } => println!("[end] {} ok={}", name, ok),
///             _ => {}
///         }
///     }
/// }
/// ```
pub trait EventHandler: Send + Sync {
    /// Called when a stage emits an event.
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
/// ```
/// use llm_chains::events::{Event, FnEventHandler};
/// use std::sync::Arc;
///
/// let handler = Arc::new(FnEventHandler(|event: Event| {
///     if let Event::Token { chunk, .. } = event {
///         print!("{}", chunk);
///     }
/// }));
/// ```
pub struct FnEventHandler<F: Fn(Event) + Send + Sync>(pub F);

impl<F: Fn(Event) + Send + Sync> EventHandler for FnEventHandler<F> {
    fn on_event(&self, event: Event) {
        (self.0)(event);
    }
}
