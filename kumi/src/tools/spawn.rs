//! The `spawn_agent` tool: depth-bounded sub-agent creation.
//!
//! A sub-agent starts with a fresh state and an independent conversation;
//! the parent's context never leaks in. When the inherited tool set would
//! include this tool itself, a new instance with `current_depth + 1` is
//! created instead, and at the depth bound it is omitted entirely.

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{info, warn};

use super::TOOL_SPAWN_AGENT;
use crate::agent::{Agent, AgentConfig};
use crate::error::Result;
use crate::llm::SharedLlmClient;
use crate::tool::{SharedTool, Tool, ToolResult};

/// Hard cap on a sub-agent's step budget.
const MAX_SUB_AGENT_STEPS: usize = 30;

/// Spawns a specialized sub-agent to handle a task autonomously.
#[derive(Clone)]
pub struct SpawnAgentTool {
    llm: SharedLlmClient,
    parent_tools: HashMap<String, SharedTool>,
    workspace_dir: PathBuf,
    current_depth: usize,
    max_depth: usize,
    default_max_steps: usize,
    default_token_limit: usize,
}

impl SpawnAgentTool {
    /// Create the tool for a parent at `current_depth` (root agents are 0).
    #[must_use]
    pub fn new(
        llm: SharedLlmClient,
        parent_tools: HashMap<String, SharedTool>,
        workspace_dir: impl Into<PathBuf>,
        current_depth: usize,
        max_depth: usize,
    ) -> Self {
        Self {
            llm,
            parent_tools,
            workspace_dir: workspace_dir.into(),
            current_depth,
            max_depth,
            default_max_steps: 15,
            default_token_limit: 50_000,
        }
    }

    /// Set the default step budget for spawned agents.
    #[must_use]
    pub const fn with_default_max_steps(mut self, max_steps: usize) -> Self {
        self.default_max_steps = max_steps;
        self
    }

    /// Set the token limit for spawned agents.
    #[must_use]
    pub const fn with_default_token_limit(mut self, limit: usize) -> Self {
        self.default_token_limit = limit;
        self
    }

    /// The depth the tool was created at.
    #[must_use]
    pub const fn current_depth(&self) -> usize {
        self.current_depth
    }

    /// Assemble the sub-agent's tool set.
    ///
    /// With an explicit list, only those parent tools are included, and
    /// `spawn_agent` is dropped when the child would sit at the depth
    /// bound. When inheriting everything, this tool is replaced by a fresh
    /// instance carrying `current_depth + 1`.
    fn build_sub_agent_tools(&self, tool_names: Option<&[String]>) -> Vec<SharedTool> {
        if let Some(names) = tool_names {
            let mut tools = Vec::new();
            for name in names {
                if let Some(tool) = self.parent_tools.get(name) {
                    if name == TOOL_SPAWN_AGENT && self.current_depth + 1 >= self.max_depth {
                        continue;
                    }
                    if name == TOOL_SPAWN_AGENT {
                        tools.push(self.deeper_instance());
                    } else {
                        tools.push(tool.clone());
                    }
                }
            }
            return tools;
        }

        let mut tools = Vec::new();
        for (name, tool) in &self.parent_tools {
            if name == TOOL_SPAWN_AGENT {
                if self.current_depth + 1 < self.max_depth {
                    tools.push(self.deeper_instance());
                }
            } else {
                tools.push(tool.clone());
            }
        }
        tools
    }

    fn deeper_instance(&self) -> SharedTool {
        std::sync::Arc::new(Self {
            llm: self.llm.clone(),
            parent_tools: self.parent_tools.clone(),
            workspace_dir: self.workspace_dir.clone(),
            current_depth: self.current_depth + 1,
            max_depth: self.max_depth,
            default_max_steps: self.default_max_steps,
            default_token_limit: self.default_token_limit,
        })
    }

    fn build_sub_agent_prompt(&self, role: Option<&str>, context: Option<&str>) -> String {
        let mut parts = Vec::new();

        match role {
            Some(role) => parts.push(format!(
                "You are a specialized AI assistant acting as a **{role}**."
            )),
            None => parts.push("You are an AI assistant executing a delegated task.".to_owned()),
        }

        parts.push(
            "Your task has been delegated from a parent agent. Focus on completing it \
             efficiently and thoroughly.\n\
             \n\
             ## Guidelines\n\
             - Stay focused on the assigned task, do not deviate\n\
             - Be thorough but concise in your work\n\
             - Use available tools when necessary\n\
             - Report your findings and results clearly at the end\n\
             - If you encounter blockers, explain them clearly\n\
             \n\
             ## Important\n\
             - You have independent context, you don't see the parent's conversation\n\
             - Complete your task fully before finishing\n\
             - Provide actionable results the parent can use"
                .to_owned(),
        );

        if let Some(context) = context {
            parts.push(format!("## Context from Parent Agent\n{context}"));
        }

        parts.push(format!(
            "## Current Workspace\n\
             You are working in: `{}`\n\
             All relative paths are resolved from this directory.",
            self.workspace_dir.display()
        ));

        if self.current_depth + 1 < self.max_depth {
            parts.push(format!(
                "## Sub-Agent Capability\n\
                 You can spawn sub-agents if needed (depth {}/{}).\n\
                 Use this sparingly and only for truly independent subtasks.",
                self.current_depth + 1,
                self.max_depth
            ));
        }

        parts.join("\n\n")
    }

    fn format_result(
        &self,
        task: &str,
        role: Option<&str>,
        result: &str,
        steps_used: usize,
        tool_calls: usize,
        max_steps: usize,
    ) -> String {
        let mut header = "## Sub-Agent Execution Result".to_owned();
        if let Some(role) = role {
            header.push_str(&format!(" ({role})"));
        }

        let task_display = if task.chars().count() > 300 {
            format!("{}...", task.chars().take(300).collect::<String>())
        } else {
            task.to_owned()
        };

        format!(
            "{header}\n\n\
             **Task:** {task_display}\n\
             **Execution:** {steps_used}/{max_steps} steps, {tool_calls} tool calls\n\
             **Depth:** {}/{}\n\n\
             ---\n\n\
             {result}",
            self.current_depth + 1,
            self.max_depth
        )
    }
}

#[async_trait]
impl Tool for SpawnAgentTool {
    fn name(&self) -> &str {
        TOOL_SPAWN_AGENT
    }

    fn description(&self) -> String {
        format!(
            "Spawn a specialized sub-agent to handle a specific task autonomously.\n\
             \n\
             Use this when:\n\
             - A task requires specialized expertise or a different approach\n\
             - Breaking down a complex task into independent subtasks\n\
             - You need focused work on a specific problem without cluttering your main context\n\
             \n\
             The sub-agent will execute the task and return its final result to you.\n\
             \n\
             Current depth: {}/{}",
            self.current_depth, self.max_depth
        )
    }

    fn parameters(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "task": {
                    "type": "string",
                    "description": "Clear, specific description of what the sub-agent should accomplish"
                },
                "role": {
                    "type": "string",
                    "description": "Specialized role for the sub-agent (e.g., 'security auditor', 'test writer')"
                },
                "context": {
                    "type": "string",
                    "description": "Relevant background information from your current work"
                },
                "tools": {
                    "type": "array",
                    "items": {"type": "string"},
                    "description": "Specific tools to enable. If not specified, inherits parent tools (except spawn_agent at max depth)."
                },
                "max_steps": {
                    "type": "integer",
                    "minimum": 1,
                    "maximum": MAX_SUB_AGENT_STEPS,
                    "description": format!("Maximum steps for sub-agent execution (default: {})", self.default_max_steps)
                }
            },
            "required": ["task"]
        })
    }

    fn instructions(&self) -> Option<String> {
        Some(
            "## Sub-Agent (spawn_agent) Usage Guidelines\n\
             \n\
             When using spawn_agent to delegate tasks:\n\
             \n\
             1. **Be specific**: provide clear, focused tasks with concrete success criteria\n\
             2. **Provide context**: share relevant information the sub-agent needs\n\
             3. **Choose appropriate tools**: only enable tools the sub-agent actually needs\n\
             4. **Set reasonable limits**: use smaller max_steps for simple tasks\n\
             \n\
             Avoid vague tasks, tasks that require your current conversation context \
             (sub-agents start fresh), and simple tasks you could do directly with one \
             or two tool calls."
                .to_owned(),
        )
    }

    fn add_instructions_to_prompt(&self) -> bool {
        true
    }

    async fn execute(&self, arguments: Value) -> Result<ToolResult> {
        if self.current_depth >= self.max_depth {
            return Ok(ToolResult::err(format!(
                "Maximum agent nesting depth ({}) reached. Cannot spawn more sub-agents. \
                 Consider completing the task with available tools instead.",
                self.max_depth
            )));
        }

        let Some(task) = arguments.get("task").and_then(Value::as_str) else {
            return Ok(ToolResult::err("Missing required argument: task"));
        };
        let role = arguments.get("role").and_then(Value::as_str);
        let context = arguments.get("context").and_then(Value::as_str);
        let tool_names: Option<Vec<String>> = arguments.get("tools").and_then(Value::as_array).map(
            |names| {
                names
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_owned)
                    .collect()
            },
        );
        let effective_max_steps = arguments
            .get("max_steps")
            .and_then(Value::as_u64)
            .map_or(self.default_max_steps, |n| n as usize)
            .min(MAX_SUB_AGENT_STEPS);

        let sub_tools = self.build_sub_agent_tools(tool_names.as_deref());
        let system_prompt = self.build_sub_agent_prompt(role, context);

        info!(
            depth = self.current_depth + 1,
            max_depth = self.max_depth,
            role = role.unwrap_or("general"),
            max_steps = effective_max_steps,
            "Spawning sub-agent",
        );

        let config = AgentConfig::default()
            .with_name(format!(
                "sub_agent_d{}_{}",
                self.current_depth + 1,
                role.unwrap_or("general")
            ))
            .with_system_prompt(system_prompt)
            .with_max_steps(effective_max_steps)
            .with_workspace_dir(self.workspace_dir.clone())
            .with_token_limit(self.default_token_limit);

        let mut sub_agent = match Agent::new(self.llm.clone(), config, sub_tools) {
            Ok(agent) => agent,
            Err(err) => {
                warn!(error = %err, "Sub-agent construction failed");
                return Ok(ToolResult::err(format!(
                    "Sub-agent execution failed: {err}"
                )));
            }
        };

        sub_agent.add_user_message(task);
        match sub_agent.run().await {
            Ok((result, logs)) => {
                let steps_used = logs.steps();
                let tool_calls = logs.count_of("tool_call");
                Ok(ToolResult::ok(self.format_result(
                    task,
                    role,
                    &result,
                    steps_used,
                    tool_calls,
                    effective_max_steps,
                )))
            }
            Err(err) => Ok(ToolResult::err(format!(
                "Sub-agent execution failed: {err}"
            ))),
        }
    }
}

impl std::fmt::Debug for SpawnAgentTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpawnAgentTool")
            .field("current_depth", &self.current_depth)
            .field("max_depth", &self.max_depth)
            .field("parent_tools", &self.parent_tools.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{LlmResponse, MockLlm};
    use std::sync::Arc;

    fn spawn_tool(depth: usize, llm: Arc<MockLlm>) -> SpawnAgentTool {
        let dir = std::env::temp_dir().join("kumi-spawn-tests");
        SpawnAgentTool::new(llm, HashMap::new(), dir, depth, 3)
    }

    #[tokio::test]
    async fn depth_bound_refuses_to_spawn() {
        let tool = spawn_tool(3, Arc::new(MockLlm::new()));
        let result = tool
            .execute(serde_json::json!({"task": "anything"}))
            .await
            .unwrap();
        assert!(!result.success);
        assert!(result.error.unwrap().contains("nesting depth"));
    }

    #[tokio::test]
    async fn sub_agent_result_is_wrapped_with_header() {
        let llm = Arc::new(MockLlm::new());
        llm.push_response(LlmResponse::text("sub agent answer"));

        let tool = spawn_tool(0, llm);
        let result = tool
            .execute(serde_json::json!({"task": "summarize", "role": "researcher"}))
            .await
            .unwrap();
        assert!(result.success);
        let content = result.content.unwrap();
        assert!(content.contains("## Sub-Agent Execution Result (researcher)"));
        assert!(content.contains("**Depth:** 1/3"));
        assert!(content.contains("sub agent answer"));
    }

    #[tokio::test]
    async fn requested_steps_are_capped() {
        let llm = Arc::new(MockLlm::new());
        llm.push_response(LlmResponse::text("ok"));

        let tool = spawn_tool(0, llm);
        let result = tool
            .execute(serde_json::json!({"task": "t", "max_steps": 500}))
            .await
            .unwrap();
        assert!(result.content.unwrap().contains("/30 steps"));
    }

    #[test]
    fn inherited_spawn_tool_carries_incremented_depth() {
        let llm: Arc<MockLlm> = Arc::new(MockLlm::new());
        let mut parent_tools: HashMap<String, SharedTool> = HashMap::new();
        let base = spawn_tool(0, llm.clone());
        parent_tools.insert(TOOL_SPAWN_AGENT.to_owned(), Arc::new(base));

        let tool = SpawnAgentTool::new(
            llm,
            parent_tools,
            std::env::temp_dir().join("kumi-spawn-tests"),
            1,
            3,
        );
        let tools = tool.build_sub_agent_tools(None);
        // Child would sit at depth 2, still below max_depth 3.
        assert_eq!(tools.len(), 1);
        assert!(tools[0].description().contains("Current depth: 2/3"));
    }

    #[test]
    fn spawn_tool_omitted_at_depth_bound() {
        let llm: Arc<MockLlm> = Arc::new(MockLlm::new());
        let mut parent_tools: HashMap<String, SharedTool> = HashMap::new();
        parent_tools.insert(
            TOOL_SPAWN_AGENT.to_owned(),
            Arc::new(spawn_tool(0, llm.clone())),
        );

        let tool = SpawnAgentTool::new(
            llm,
            parent_tools,
            std::env::temp_dir().join("kumi-spawn-tests"),
            2,
            3,
        );
        assert!(tool.build_sub_agent_tools(None).is_empty());
    }
}
