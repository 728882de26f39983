//! Event system for run, layer, node and chunk lifecycle hooks.
//!
//! Entirely optional: the executor works without a handler. Implement
//! [`EventHandler`] to drive progress displays or forward chunks to a UI.

use crate::stream::StreamChunk;
use crate::types::NodeStatus;
use std::sync::Arc;

/// Events emitted during a pipeline run.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// A run passed validation and is about to start its first layer.
    RunStart { nodes: usize, layers: usize },
    /// A layer is about to be scheduled.
    LayerStart { index: usize, nodes: Vec<String> },
    /// A node-task started.
    NodeStart { node: String },
    /// The optimization pre-pass replaced a node's prompt.
    PromptOptimized {
        node: String,
        original_chars: usize,
        optimized_chars: usize,
    },
    /// A canonical chunk arrived for a node.
    Chunk { node: String, chunk: StreamChunk },
    /// A node settled.
    NodeEnd { node: String, status: NodeStatus },
    /// Every task of a layer settled.
    LayerEnd { index: usize },
    /// The run finished, or stopped early when `cancelled`.
    RunEnd { cancelled: bool },
}

/// Handler for run lifecycle events.
///
/// Called synchronously from the executor; keep it cheap.
///
/// # Example
///
/// ```
/// use llm_flow::events::{Event, EventHandler};
///
/// struct PrintHandler;
///
/// impl EventHandler for PrintHandler {
///     fn on_event(&self, event: Event) {
///         match event {
///             Event::Chunk { chunk, .. } => print!("{}", chunk.content),
///             Event::NodeStart { node } => println!("[start] {}", node),
///             Event::NodeEnd { node, status } => println!("[end] {} {:?}", node, status),
///             _ => {}
///         }
///     }
/// }
/// ```
pub trait EventHandler: Send + Sync {
    fn on_event(&self, event: Event);
}

/// Emit an event if a handler is present. No-op otherwise.
pub(crate) fn emit(handler: &Option<Arc<dyn EventHandler>>, event: Event) {
    if let Some(h) = handler {
        h.on_event(event);
    }
}

/// An [`EventHandler`] backed by a closure.
///
/// ```
/// use llm_flow::events::{Event, FnEventHandler};
/// use std::sync::Arc;
///
/// let handler = Arc::new(FnEventHandler(|event: Event| {
///     if let Event::Chunk { chunk, .. } = event {
///         print!("{}", chunk.content);
///     }
/// }));
/// ```
pub struct FnEventHandler<F: Fn(Event) + Send + Sync>(pub F);

impl<F: Fn(Event) + Send + Sync> EventHandler for FnEventHandler<F> {
    fn on_event(&self, event: Event) {
        (self.0)(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_fn_handler_receives_events() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let handler: Option<Arc<dyn EventHandler>> = Some(Arc::new(FnEventHandler(move |e| {
            sink.lock().unwrap().push(e);
        })));

        emit(&handler, Event::NodeStart { node: "a".into() });
        emit(&handler, Event::RunEnd { cancelled: false });

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0], Event::NodeStart { node: "a".into() });
    }

    #[test]
    fn test_emit_without_handler_is_noop() {
        emit(&None, Event::LayerEnd { index: 0 });
    }
}
