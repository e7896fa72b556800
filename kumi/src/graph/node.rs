//! Adapters embedding agents and tools as graph nodes.
//!
//! Both adapters map state fields to their input and output through
//! configurable keys. [`AgentNode`] can additionally accumulate an
//! input/output history entry per invocation; register
//! [`reducers::append`](crate::graph::reducers::append) on the history key
//! so entries concatenate across runs.

use std::sync::Arc;

use serde_json::{Value, json};
use tokio::sync::Mutex;
use tracing::debug;

use super::{GraphState, NodeFunc};
use crate::agent::Agent;
use crate::tool::SharedTool;

/// Embeds an [`Agent`] as a node function.
pub struct AgentNode {
    agent: Arc<Mutex<Agent>>,
    input_key: String,
    output_key: String,
    history_key: Option<String>,
}

impl AgentNode {
    /// Wrap an agent with the default `input`/`output` key mapping.
    #[must_use]
    pub fn new(agent: Agent) -> Self {
        Self {
            agent: Arc::new(Mutex::new(agent)),
            input_key: "input".to_owned(),
            output_key: "output".to_owned(),
            history_key: None,
        }
    }

    /// Set the state field read as the agent's task.
    #[must_use]
    pub fn with_input_key(mut self, key: impl Into<String>) -> Self {
        self.input_key = key.into();
        self
    }

    /// Set the state field written with the agent's final text.
    #[must_use]
    pub fn with_output_key(mut self, key: impl Into<String>) -> Self {
        self.output_key = key.into();
        self
    }

    /// Accumulate `{input, output}` entries under this state field.
    #[must_use]
    pub fn with_history_key(mut self, key: impl Into<String>) -> Self {
        self.history_key = Some(key.into());
        self
    }

    /// Produce the node function.
    #[must_use]
    pub fn into_node(self) -> NodeFunc {
        let Self {
            agent,
            input_key,
            output_key,
            history_key,
        } = self;

        Arc::new(move |state: GraphState| {
            let agent = agent.clone();
            let input_key = input_key.clone();
            let output_key = output_key.clone();
            let history_key = history_key.clone();
            Box::pin(async move {
                let input = state
                    .get(&input_key)
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_owned();

                let mut agent = agent.lock().await;
                debug!(agent = agent.name(), input_key = %input_key, "Agent node invoked");
                agent.add_user_message(input.clone());
                let (response, _logs) = agent.run().await?;

                let mut update = GraphState::new();
                update.insert(output_key, Value::String(response.clone()));
                if let Some(history_key) = history_key {
                    update.insert(
                        history_key,
                        json!([{ "input": input, "output": response }]),
                    );
                }
                Ok(update)
            })
        })
    }
}

impl std::fmt::Debug for AgentNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentNode")
            .field("input_key", &self.input_key)
            .field("output_key", &self.output_key)
            .field("history_key", &self.history_key)
            .finish()
    }
}

/// Embeds a [`Tool`](crate::tool::Tool) as a node function.
///
/// The input field carries the tool's argument mapping; the output field
/// receives the result content, or `"Error: <error>"` on failure (a tool
/// failure does not fail the graph).
pub struct ToolNode {
    tool: SharedTool,
    input_key: String,
    output_key: String,
}

impl ToolNode {
    /// Wrap a tool with the default `tool_input`/`tool_output` mapping.
    #[must_use]
    pub fn new(tool: SharedTool) -> Self {
        Self {
            tool,
            input_key: "tool_input".to_owned(),
            output_key: "tool_output".to_owned(),
        }
    }

    /// Set the state field read as the argument mapping.
    #[must_use]
    pub fn with_input_key(mut self, key: impl Into<String>) -> Self {
        self.input_key = key.into();
        self
    }

    /// Set the state field written with the result.
    #[must_use]
    pub fn with_output_key(mut self, key: impl Into<String>) -> Self {
        self.output_key = key.into();
        self
    }

    /// Produce the node function.
    #[must_use]
    pub fn into_node(self) -> NodeFunc {
        let Self {
            tool,
            input_key,
            output_key,
        } = self;

        Arc::new(move |state: GraphState| {
            let tool = tool.clone();
            let input_key = input_key.clone();
            let output_key = output_key.clone();
            Box::pin(async move {
                let arguments = state.get(&input_key).cloned().unwrap_or(Value::Null);
                debug!(tool = tool.name(), "Tool node invoked");

                let output = match tool.execute(arguments).await {
                    Ok(result) if result.success => result.content.unwrap_or_default(),
                    Ok(result) => format!("Error: {}", result.error.unwrap_or_default()),
                    Err(err) => format!("Error: Tool execution failed: {err}"),
                };

                let mut update = GraphState::new();
                update.insert(output_key, Value::String(output));
                Ok(update)
            })
        })
    }
}

impl std::fmt::Debug for ToolNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolNode")
            .field("tool", &self.tool.name())
            .field("input_key", &self.input_key)
            .field("output_key", &self.output_key)
            .finish()
    }
}
