//! The LLM capability consumed by the step loop.
//!
//! This module provides:
//! - [`LlmClient`]: the provider trait (non-streaming and streaming)
//! - [`LlmResponse`]: a complete model turn
//! - [`LlmStreamEvent`]: the typed stream-event sum
//! - [`MockLlm`]: a scriptable client for tests
//!
//! Wire protocol adapters live outside this crate; the loop only consumes
//! this surface.

use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::Mutex;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{AgentError, Result};
use crate::message::{Message, ToolCall};
use crate::usage::TokenUsage;

/// A complete response from an LLM.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LlmResponse {
    /// Generated text content.
    #[serde(default)]
    pub content: String,
    /// Model thinking/reasoning text, when surfaced.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking: Option<String>,
    /// Tool calls requested by the model.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    /// Why the model stopped generating.
    #[serde(default = "default_finish_reason")]
    pub finish_reason: String,
    /// Token usage for this turn.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
}

fn default_finish_reason() -> String {
    "stop".to_owned()
}

impl LlmResponse {
    /// Create a text-only response.
    #[must_use]
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            thinking: None,
            tool_calls: None,
            finish_reason: default_finish_reason(),
            usage: None,
        }
    }

    /// Create a response carrying tool calls.
    #[must_use]
    pub fn with_tool_calls(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            content: content.into(),
            thinking: None,
            tool_calls: Some(tool_calls),
            finish_reason: "tool_calls".to_owned(),
            usage: None,
        }
    }

    /// Attach thinking text.
    #[must_use]
    pub fn with_thinking(mut self, thinking: impl Into<String>) -> Self {
        self.thinking = Some(thinking.into());
        self
    }

    /// Attach usage counters.
    #[must_use]
    pub const fn with_usage(mut self, usage: TokenUsage) -> Self {
        self.usage = Some(usage);
        self
    }

    /// Returns `true` if the response contains tool calls.
    #[must_use]
    pub fn has_tool_calls(&self) -> bool {
        self.tool_calls
            .as_ref()
            .is_some_and(|calls| !calls.is_empty())
    }
}

/// Events yielded by a streaming LLM call.
///
/// The final `Done` carries the complete [`LlmResponse`] including usage.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum LlmStreamEvent {
    /// Incremental thinking text.
    ThinkingDelta {
        /// The thinking fragment.
        delta: String,
    },
    /// Incremental content text.
    ContentDelta {
        /// The content fragment.
        delta: String,
    },
    /// A complete tool call assembled by the adapter.
    ToolUse {
        /// The tool call.
        tool_call: ToolCall,
    },
    /// Stream finished; carries the assembled response.
    Done {
        /// The complete response.
        response: LlmResponse,
    },
}

/// Boxed stream of LLM events.
pub type LlmEventStream = Pin<Box<dyn Stream<Item = Result<LlmStreamEvent>> + Send>>;

/// Trait for LLM providers consumed by the agent loop.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Generate a complete response for the given conversation.
    ///
    /// `tools` carries the exposed tool schemas
    /// (`{name, description, input_schema}` objects); `metadata` is an
    /// opaque mapping the provider may use for tracing.
    async fn generate(
        &self,
        messages: &[Message],
        tools: Option<&[Value]>,
        metadata: Option<&Value>,
    ) -> Result<LlmResponse>;

    /// Generate a streaming response.
    ///
    /// The default implementation degrades gracefully: it performs a
    /// non-streaming [`generate`](Self::generate) and replays the result as
    /// a thinking delta, a content delta, the tool-use events, and a final
    /// `Done`. Providers with native streaming should override this.
    async fn generate_stream(
        &self,
        messages: &[Message],
        tools: Option<&[Value]>,
        metadata: Option<&Value>,
    ) -> Result<LlmEventStream> {
        let response = self.generate(messages, tools, metadata).await?;
        let events = replay_as_stream(response);
        Ok(Box::pin(futures::stream::iter(events.into_iter().map(Ok))))
    }

    /// Get the name of this provider, used for error messages and logging.
    fn provider_name(&self) -> &'static str {
        "llm"
    }
}

/// Type alias for an Arc-wrapped LLM client.
pub type SharedLlmClient = Arc<dyn LlmClient>;

/// Expand a complete response into the event sequence a native streaming
/// adapter would have produced.
fn replay_as_stream(response: LlmResponse) -> Vec<LlmStreamEvent> {
    let mut events = Vec::new();
    if let Some(thinking) = &response.thinking {
        if !thinking.is_empty() {
            events.push(LlmStreamEvent::ThinkingDelta {
                delta: thinking.clone(),
            });
        }
    }
    if !response.content.is_empty() {
        events.push(LlmStreamEvent::ContentDelta {
            delta: response.content.clone(),
        });
    }
    if let Some(calls) = &response.tool_calls {
        for call in calls {
            events.push(LlmStreamEvent::ToolUse {
                tool_call: call.clone(),
            });
        }
    }
    events.push(LlmStreamEvent::Done { response });
    events
}

/// One scripted turn for [`MockLlm`].
#[derive(Debug)]
enum ScriptedTurn {
    Response(LlmResponse),
    Failure(String),
}

/// A scriptable mock client for testing.
///
/// Responses are returned in the order they were pushed; when the script
/// runs dry the mock answers with a canned text response. Scripted failures
/// surface as [`AgentError::Llm`].
///
/// # Example
///
/// ```rust,ignore
/// let llm = MockLlm::new();
/// llm.push_response(LlmResponse::with_tool_calls("", vec![call]));
/// llm.push_response(LlmResponse::text("done"));
/// ```
#[derive(Debug, Default)]
pub struct MockLlm {
    script: Mutex<VecDeque<ScriptedTurn>>,
    default_usage: Option<TokenUsage>,
}

impl MockLlm {
    /// Create an empty mock.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a mock pre-loaded with text responses.
    #[must_use]
    pub fn with_texts(texts: impl IntoIterator<Item = impl Into<String>>) -> Self {
        let mock = Self::new();
        for text in texts {
            mock.push_response(LlmResponse::text(text));
        }
        mock
    }

    /// Attach a usage record applied to every scripted response that has none.
    #[must_use]
    pub const fn with_default_usage(mut self, usage: TokenUsage) -> Self {
        self.default_usage = Some(usage);
        self
    }

    /// Queue a response.
    pub fn push_response(&self, response: LlmResponse) {
        self.script
            .lock()
            .expect("mock script lock poisoned")
            .push_back(ScriptedTurn::Response(response));
    }

    /// Queue a failure.
    pub fn push_failure(&self, message: impl Into<String>) {
        self.script
            .lock()
            .expect("mock script lock poisoned")
            .push_back(ScriptedTurn::Failure(message.into()));
    }

    /// Number of scripted turns remaining.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.script.lock().expect("mock script lock poisoned").len()
    }
}

#[async_trait]
impl LlmClient for MockLlm {
    async fn generate(
        &self,
        _messages: &[Message],
        _tools: Option<&[Value]>,
        _metadata: Option<&Value>,
    ) -> Result<LlmResponse> {
        let turn = self
            .script
            .lock()
            .expect("mock script lock poisoned")
            .pop_front();
        match turn {
            Some(ScriptedTurn::Response(mut response)) => {
                if response.usage.is_none() {
                    response.usage = self.default_usage;
                }
                Ok(response)
            }
            Some(ScriptedTurn::Failure(message)) => Err(AgentError::llm(message)),
            None => Ok(LlmResponse::text("No response")),
        }
    }

    fn provider_name(&self) -> &'static str {
        "mock"
    }
}
