//! Ralph-mode tools: cached-result retrieval, working-memory access, and
//! the completion signal.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;

use super::{
    TOOL_GET_CACHED_RESULT, TOOL_GET_WORKING_MEMORY, TOOL_SIGNAL_COMPLETION,
    TOOL_UPDATE_WORKING_MEMORY,
};
use crate::error::Result;
use crate::ralph::{MemoryCategory, ToolResultCache, WorkingMemory};
use crate::tool::{Tool, ToolResult};

/// Retrieves the full content of a previously summarized tool result.
#[derive(Clone)]
pub struct GetCachedResultTool {
    cache: Arc<Mutex<ToolResultCache>>,
}

impl GetCachedResultTool {
    /// Create the tool over a shared cache handle.
    #[must_use]
    pub const fn new(cache: Arc<Mutex<ToolResultCache>>) -> Self {
        Self { cache }
    }
}

#[async_trait]
impl Tool for GetCachedResultTool {
    fn name(&self) -> &str {
        TOOL_GET_CACHED_RESULT
    }

    fn description(&self) -> String {
        "Retrieve the full content of a previously executed tool result. \
         Use this when you need complete details that were summarized earlier. \
         Provide the tool_call_id from the original execution."
            .to_owned()
    }

    fn parameters(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "tool_call_id": {
                    "type": "string",
                    "description": "The ID of the tool call to retrieve the full result for"
                }
            },
            "required": ["tool_call_id"]
        })
    }

    async fn execute(&self, arguments: Value) -> Result<ToolResult> {
        let Some(tool_call_id) = arguments.get("tool_call_id").and_then(Value::as_str) else {
            return Ok(ToolResult::err("Missing required argument: tool_call_id"));
        };

        let content = self
            .cache
            .lock()
            .expect("cache lock poisoned")
            .get_full_content(tool_call_id);
        match content {
            Some(content) => Ok(ToolResult::ok(content)),
            None => Ok(ToolResult::err(format!(
                "No cached result found for tool_call_id: {tool_call_id}"
            ))),
        }
    }
}

impl std::fmt::Debug for GetCachedResultTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GetCachedResultTool").finish_non_exhaustive()
    }
}

/// Records progress, findings, todos, decisions, and errors into the
/// working memory.
#[derive(Clone)]
pub struct UpdateWorkingMemoryTool {
    memory: Arc<Mutex<WorkingMemory>>,
}

impl UpdateWorkingMemoryTool {
    /// Create the tool over a shared memory handle.
    #[must_use]
    pub const fn new(memory: Arc<Mutex<WorkingMemory>>) -> Self {
        Self { memory }
    }
}

#[async_trait]
impl Tool for UpdateWorkingMemoryTool {
    fn name(&self) -> &str {
        TOOL_UPDATE_WORKING_MEMORY
    }

    fn description(&self) -> String {
        "Update the working memory with progress, findings, decisions, or todos. \
         This persists information across iterations."
            .to_owned()
    }

    fn parameters(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "action": {
                    "type": "string",
                    "enum": [
                        "add_progress", "add_finding", "add_todo",
                        "complete_todo", "add_decision", "add_error"
                    ],
                    "description": "The type of memory update to perform"
                },
                "content": {
                    "type": "string",
                    "description": "The content to add (description, finding, task, or error message)"
                },
                "reason": {
                    "type": "string",
                    "description": "For decisions, the reasoning behind the decision"
                },
                "todo_key": {
                    "type": "string",
                    "description": "For complete_todo, the key of the todo to mark complete"
                },
                "context": {
                    "type": "string",
                    "description": "For errors, additional context about the error"
                }
            },
            "required": ["action", "content"]
        })
    }

    async fn execute(&self, arguments: Value) -> Result<ToolResult> {
        let action = arguments
            .get("action")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let content = arguments
            .get("content")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_owned();
        let reason = arguments.get("reason").and_then(Value::as_str);
        let todo_key = arguments.get("todo_key").and_then(Value::as_str);
        let context = arguments
            .get("context")
            .and_then(Value::as_str)
            .map(str::to_owned);

        let mut memory = self.memory.lock().expect("memory lock poisoned");
        let result = match action {
            "add_progress" => {
                memory.add_progress(content)?;
                ToolResult::ok("Progress recorded")
            }
            "add_finding" => {
                memory.add_finding(content)?;
                ToolResult::ok("Finding recorded")
            }
            "add_todo" => {
                let key = memory.add_todo(content)?;
                ToolResult::ok(format!("Todo added with key: {key}"))
            }
            "complete_todo" => match todo_key {
                None => ToolResult::err("todo_key is required for complete_todo action"),
                Some(key) => {
                    if memory.complete_todo(key)? {
                        ToolResult::ok(format!("Todo {key} marked complete"))
                    } else {
                        ToolResult::err(format!("Todo {key} not found"))
                    }
                }
            },
            "add_decision" => match reason {
                None => ToolResult::err("reason is required for add_decision action"),
                Some(reason) => {
                    memory.add_decision(content, reason)?;
                    ToolResult::ok("Decision recorded")
                }
            },
            "add_error" => {
                memory.add_error(content, context)?;
                ToolResult::ok("Error recorded")
            }
            other => ToolResult::err(format!("Unknown action: {other}")),
        };
        Ok(result)
    }
}

impl std::fmt::Debug for UpdateWorkingMemoryTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpdateWorkingMemoryTool").finish_non_exhaustive()
    }
}

/// Reads back the working-memory summary, optionally filtered by category.
#[derive(Clone)]
pub struct GetWorkingMemoryTool {
    memory: Arc<Mutex<WorkingMemory>>,
}

impl GetWorkingMemoryTool {
    /// Create the tool over a shared memory handle.
    #[must_use]
    pub const fn new(memory: Arc<Mutex<WorkingMemory>>) -> Self {
        Self { memory }
    }
}

#[async_trait]
impl Tool for GetWorkingMemoryTool {
    fn name(&self) -> &str {
        TOOL_GET_WORKING_MEMORY
    }

    fn description(&self) -> String {
        "Retrieve the current working memory summary including progress, \
         findings, pending todos, and any errors from previous iterations."
            .to_owned()
    }

    fn parameters(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "category": {
                    "type": "string",
                    "enum": ["all", "progress", "findings", "todo", "decisions", "errors"],
                    "description": "Filter memory by category, or 'all' for the full summary"
                }
            },
            "required": []
        })
    }

    async fn execute(&self, arguments: Value) -> Result<ToolResult> {
        let category = arguments
            .get("category")
            .and_then(Value::as_str)
            .unwrap_or("all");

        let memory = self.memory.lock().expect("memory lock poisoned");
        if category == "all" {
            return Ok(ToolResult::ok(memory.to_context_string()));
        }

        let mapped = match category {
            "progress" => MemoryCategory::Progress,
            "findings" => MemoryCategory::Findings,
            "todo" => MemoryCategory::Todo,
            "decisions" => MemoryCategory::Decisions,
            "errors" => MemoryCategory::Errors,
            other => return Ok(ToolResult::err(format!("Unknown category: {other}"))),
        };

        let entries = memory.get_by_category(mapped);
        if entries.is_empty() {
            return Ok(ToolResult::ok(format!("No {category} entries found")));
        }

        let mut lines = vec![format!("## {category} ({} entries)", entries.len())];
        for entry in entries {
            lines.push(format!("- [{}] {}", entry.iteration, entry.value));
        }
        Ok(ToolResult::ok(lines.join("\n")))
    }
}

impl std::fmt::Debug for GetWorkingMemoryTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GetWorkingMemoryTool").finish_non_exhaustive()
    }
}

/// Emits the completion promise tag when the agent judges the task done.
#[derive(Debug, Clone, Copy, Default)]
pub struct SignalCompletionTool;

#[async_trait]
impl Tool for SignalCompletionTool {
    fn name(&self) -> &str {
        TOOL_SIGNAL_COMPLETION
    }

    fn description(&self) -> String {
        "Signal that the iterative task is complete. Use this when you have \
         finished the assigned task and verified the results."
            .to_owned()
    }

    fn parameters(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "summary": {
                    "type": "string",
                    "description": "Brief summary of what was accomplished"
                },
                "confidence": {
                    "type": "number",
                    "description": "Confidence level (0-1) that the task is truly complete",
                    "minimum": 0,
                    "maximum": 1
                }
            },
            "required": ["summary"]
        })
    }

    fn instructions(&self) -> Option<String> {
        Some(
            "When using signal_completion:\n\
             - Only call this when you are confident the task is fully complete\n\
             - Include a summary of what was accomplished"
                .to_owned(),
        )
    }

    fn add_instructions_to_prompt(&self) -> bool {
        true
    }

    async fn execute(&self, arguments: Value) -> Result<ToolResult> {
        let summary = arguments
            .get("summary")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let confidence = arguments
            .get("confidence")
            .and_then(Value::as_f64)
            .unwrap_or(1.0);
        Ok(ToolResult::ok(format!(
            "Task Summary: {summary}\nConfidence: {confidence}\n<promise>TASK COMPLETE</promise>"
        )))
    }
}
