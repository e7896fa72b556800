//! Agent events and the typed pub/sub emitter.
//!
//! The step loop emits [`AgentEvent`]s at well-defined points (see the
//! ordering guarantees in the runner). Delivery is synchronous within a
//! run: global handlers fire first, then type-specific handlers, each in
//! registration order.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::message::UserInputRequest;

/// Kinds of events emitted during a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum EventType {
    /// A step is beginning.
    StepStart,
    /// A step finished after executing its tools.
    StepEnd,
    /// An LLM request is about to be issued.
    LlmRequest,
    /// The LLM replied.
    LlmResponse,
    /// A tool call is about to execute.
    ToolStart,
    /// A tool call finished.
    ToolEnd,
    /// The run paused for human input.
    UserInputRequired,
    /// The run completed with a final answer. Terminal.
    Completion,
    /// The run terminated with an error. Terminal.
    Error,
    /// Token accounting summary.
    TokenSummary,
}

/// An event emitted by the step loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentEvent {
    /// Kind of event.
    #[serde(rename = "type")]
    pub event_type: EventType,
    /// Step number the event belongs to.
    pub step: usize,
    /// Event payload.
    pub data: Value,
    /// Emission time.
    pub timestamp: DateTime<Utc>,
}

impl AgentEvent {
    /// Create an event stamped with the current time.
    #[must_use]
    pub fn new(event_type: EventType, step: usize, data: Value) -> Self {
        Self {
            event_type,
            step,
            data,
            timestamp: Utc::now(),
        }
    }
}

/// Synchronous event handler.
pub type EventHandler = std::sync::Arc<dyn Fn(&AgentEvent) + Send + Sync>;

/// Opaque handle returned by registration, used to unregister.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandlerId(u64);

/// Typed pub/sub keyed by event type with an additional global handler list.
///
/// Handlers are expected to be total; they have no error channel.
#[derive(Default)]
pub struct EventEmitter {
    handlers: HashMap<EventType, Vec<(HandlerId, EventHandler)>>,
    global_handlers: Vec<(HandlerId, EventHandler)>,
    next_id: u64,
}

impl EventEmitter {
    /// Create an empty emitter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&mut self) -> HandlerId {
        self.next_id += 1;
        HandlerId(self.next_id)
    }

    /// Register a handler for one event type.
    pub fn on(&mut self, event_type: EventType, handler: EventHandler) -> HandlerId {
        let id = self.next_id();
        self.handlers.entry(event_type).or_default().push((id, handler));
        id
    }

    /// Unregister a type-specific handler.
    pub fn off(&mut self, event_type: EventType, id: HandlerId) {
        if let Some(list) = self.handlers.get_mut(&event_type) {
            list.retain(|(hid, _)| *hid != id);
        }
    }

    /// Register a handler for every event.
    pub fn on_all(&mut self, handler: EventHandler) -> HandlerId {
        let id = self.next_id();
        self.global_handlers.push((id, handler));
        id
    }

    /// Unregister a global handler.
    pub fn off_all(&mut self, id: HandlerId) {
        self.global_handlers.retain(|(hid, _)| *hid != id);
    }

    /// Deliver an event: global handlers first, then type-specific, in
    /// registration order.
    pub fn emit(&self, event: &AgentEvent) {
        for (_, handler) in &self.global_handlers {
            handler(event);
        }
        if let Some(list) = self.handlers.get(&event.event_type) {
            for (_, handler) in list {
                handler(event);
            }
        }
    }

    /// Remove every handler.
    pub fn clear(&mut self) {
        self.handlers.clear();
        self.global_handlers.clear();
    }
}

impl std::fmt::Debug for EventEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventEmitter")
            .field("typed_handlers", &self.handlers.len())
            .field("global_handlers", &self.global_handlers.len())
            .finish()
    }
}

/// Events yielded to the caller by a streaming run.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum RunStreamEvent {
    /// A step is beginning.
    Step {
        /// Step number.
        step: usize,
        /// Configured step budget.
        max_steps: usize,
        /// Estimated prompt tokens before the step.
        tokens: usize,
        /// Configured token limit.
        token_limit: usize,
    },
    /// Incremental thinking text.
    Thinking {
        /// The thinking fragment.
        delta: String,
    },
    /// Incremental content text.
    Content {
        /// The content fragment.
        delta: String,
    },
    /// The model requested a tool call.
    ToolCall {
        /// Tool name.
        tool: String,
        /// Argument mapping.
        arguments: Value,
    },
    /// A tool finished executing.
    ToolResult {
        /// Tool name.
        tool: String,
        /// Whether the execution succeeded.
        success: bool,
        /// Result content on success.
        content: Option<String>,
        /// Error message on failure.
        error: Option<String>,
        /// Wall-clock execution time in seconds.
        execution_time: f64,
    },
    /// The run paused for human input.
    UserInputRequired {
        /// The pending request.
        request: UserInputRequest,
    },
    /// The run completed. Terminal.
    Done {
        /// Final assistant text.
        message: String,
        /// Steps taken.
        steps: usize,
        /// Completion reason.
        reason: String,
    },
    /// The run failed. Terminal.
    Error {
        /// Human-readable error message.
        message: String,
        /// Machine-readable reason, when known.
        reason: Option<String>,
    },
}
