//! Tool dispatch: validate, execute, truncate, time.
//!
//! The executor turns a step's `(tool_call_id, name, arguments)` triples
//! into [`ToolExecutionResult`]s in input order. A single tool's failure
//! never fails the batch; unknown names and captured errors are surfaced
//! in the result object and the loop decides whether to continue.

use std::collections::HashMap;
use std::time::Instant;

use futures::future::join_all;
use serde_json::Value;
use tracing::{debug, warn};

use crate::tool::{SharedTool, ToolResult};

/// Default character bound applied to successful tool output.
pub const DEFAULT_OUTPUT_LIMIT: usize = 10_000;

/// Result of executing one tool call.
#[derive(Debug, Clone)]
pub struct ToolExecutionResult {
    /// Name of the executed tool.
    pub tool_name: String,
    /// Id linking back to the assistant's request.
    pub tool_call_id: String,
    /// The tool's result.
    pub result: ToolResult,
    /// Wall-clock execution time in seconds (monotonic clock).
    pub execution_time: f64,
    /// The argument mapping that was passed.
    pub arguments: Value,
}

/// Dispatches tool calls for the step loop.
#[derive(Default)]
pub struct ToolExecutor {
    tools: HashMap<String, SharedTool>,
    output_limit: usize,
    parallel_execution: bool,
}

impl ToolExecutor {
    /// Create an executor over the given tools.
    #[must_use]
    pub fn new(tools: Vec<SharedTool>, output_limit: usize, parallel_execution: bool) -> Self {
        Self {
            tools: tools
                .into_iter()
                .map(|tool| (tool.name().to_owned(), tool))
                .collect(),
            output_limit,
            parallel_execution,
        }
    }

    /// Replace the tool set.
    pub fn set_tools(&mut self, tools: Vec<SharedTool>) {
        self.tools = tools
            .into_iter()
            .map(|tool| (tool.name().to_owned(), tool))
            .collect();
    }

    /// Look up a tool by name.
    #[must_use]
    pub fn get_tool(&self, name: &str) -> Option<&SharedTool> {
        self.tools.get(name)
    }

    /// Whether a tool with this name is registered.
    #[must_use]
    pub fn has_tool(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Names of the registered tools.
    #[must_use]
    pub fn tool_names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    /// Execute one tool call.
    pub async fn execute_single(
        &self,
        tool_call_id: &str,
        name: &str,
        arguments: Value,
    ) -> ToolExecutionResult {
        let start = Instant::now();

        let result = match self.tools.get(name) {
            None => {
                warn!(tool = name, "Unknown tool");
                ToolResult::err(format!("Unknown tool: {name}"))
            }
            Some(tool) => match tool.execute(arguments.clone()).await {
                Ok(mut result) if result.success => {
                    result.content = result.content.map(|c| self.truncate_output(&c));
                    result
                }
                Ok(result) => result,
                Err(error) => {
                    warn!(tool = name, %error, "Tool execution failed");
                    ToolResult::err(format!("Tool execution failed: {error}"))
                }
            },
        };

        let execution_time = start.elapsed().as_secs_f64();
        debug!(
            tool = name,
            success = result.success,
            execution_time,
            "Tool call finished"
        );

        ToolExecutionResult {
            tool_name: name.to_owned(),
            tool_call_id: tool_call_id.to_owned(),
            result,
            execution_time,
            arguments,
        }
    }

    /// Execute a batch of tool calls.
    ///
    /// When parallel execution is enabled and the batch has more than one
    /// call, calls run concurrently and the join preserves input order.
    /// Otherwise calls run sequentially.
    pub async fn execute_batch(
        &self,
        tool_calls: &[(String, String, Value)],
    ) -> Vec<ToolExecutionResult> {
        if tool_calls.is_empty() {
            return Vec::new();
        }

        if self.parallel_execution && tool_calls.len() > 1 {
            let futures = tool_calls
                .iter()
                .map(|(id, name, args)| self.execute_single(id, name, args.clone()));
            join_all(futures).await
        } else {
            let mut results = Vec::with_capacity(tool_calls.len());
            for (id, name, args) in tool_calls {
                results.push(self.execute_single(id, name, args.clone()).await);
            }
            results
        }
    }

    fn truncate_output(&self, content: &str) -> String {
        if self.output_limit == 0 || content.chars().count() <= self.output_limit {
            return content.to_owned();
        }
        let truncated: String = content.chars().take(self.output_limit).collect();
        format!(
            "{truncated}\n...[truncated, total {} chars]",
            content.chars().count()
        )
    }
}

impl std::fmt::Debug for ToolExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolExecutor")
            .field("tools", &self.tools.keys().collect::<Vec<_>>())
            .field("output_limit", &self.output_limit)
            .field("parallel_execution", &self.parallel_execution)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{AgentError, Result};
    use crate::tool::Tool;
    use async_trait::async_trait;
    use std::sync::Arc;
    use std::time::Duration;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }

        fn description(&self) -> String {
            "Echo the message back.".to_owned()
        }

        fn parameters(&self) -> Value {
            serde_json::json!({
                "type": "object",
                "properties": {"msg": {"type": "string"}},
                "required": ["msg"]
            })
        }

        async fn execute(&self, arguments: Value) -> Result<ToolResult> {
            let msg = arguments["msg"].as_str().unwrap_or_default();
            Ok(ToolResult::ok(msg))
        }
    }

    struct FailingTool;

    #[async_trait]
    impl Tool for FailingTool {
        fn name(&self) -> &str {
            "boom"
        }

        fn description(&self) -> String {
            "Always raises.".to_owned()
        }

        fn parameters(&self) -> Value {
            serde_json::json!({"type": "object", "properties": {}})
        }

        async fn execute(&self, _arguments: Value) -> Result<ToolResult> {
            Err(AgentError::tool_execution("boom", "kaput"))
        }
    }

    struct SlowTool {
        delay_ms: u64,
        reply: &'static str,
    }

    #[async_trait]
    impl Tool for SlowTool {
        fn name(&self) -> &str {
            self.reply
        }

        fn description(&self) -> String {
            "Sleeps then replies.".to_owned()
        }

        fn parameters(&self) -> Value {
            serde_json::json!({"type": "object", "properties": {}})
        }

        async fn execute(&self, _arguments: Value) -> Result<ToolResult> {
            tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
            Ok(ToolResult::ok(self.reply))
        }
    }

    fn executor(parallel: bool) -> ToolExecutor {
        ToolExecutor::new(
            vec![Arc::new(EchoTool), Arc::new(FailingTool)],
            DEFAULT_OUTPUT_LIMIT,
            parallel,
        )
    }

    #[tokio::test]
    async fn unknown_tool_synthesizes_error_result() {
        let result = executor(false)
            .execute_single("c1", "missing", Value::Null)
            .await;
        assert!(!result.result.success);
        assert_eq!(
            result.result.error.as_deref(),
            Some("Unknown tool: missing")
        );
    }

    #[tokio::test]
    async fn captured_tool_error_is_converted() {
        let result = executor(false)
            .execute_single("c1", "boom", serde_json::json!({}))
            .await;
        assert!(!result.result.success);
        assert!(
            result
                .result
                .error
                .as_deref()
                .unwrap()
                .starts_with("Tool execution failed: ")
        );
    }

    #[tokio::test]
    async fn successful_output_is_truncated_with_marker() {
        let executor = ToolExecutor::new(vec![Arc::new(EchoTool)], 10, false);
        let long = "x".repeat(50);
        let result = executor
            .execute_single("c1", "echo", serde_json::json!({"msg": long}))
            .await;
        let content = result.result.content.unwrap();
        assert!(content.starts_with("xxxxxxxxxx\n"));
        assert!(content.contains("total 50 chars"));
    }

    #[tokio::test]
    async fn empty_batch_returns_empty() {
        assert!(executor(true).execute_batch(&[]).await.is_empty());
    }

    #[tokio::test]
    async fn one_failure_does_not_fail_the_batch() {
        let calls = vec![
            ("c1".to_owned(), "boom".to_owned(), serde_json::json!({})),
            (
                "c2".to_owned(),
                "echo".to_owned(),
                serde_json::json!({"msg": "ok"}),
            ),
        ];
        let results = executor(false).execute_batch(&calls).await;
        assert_eq!(results.len(), 2);
        assert!(!results[0].result.success);
        assert!(results[1].result.success);
    }

    #[tokio::test]
    async fn parallel_results_match_input_order() {
        let executor = ToolExecutor::new(
            vec![
                Arc::new(SlowTool { delay_ms: 40, reply: "slow" }),
                Arc::new(SlowTool { delay_ms: 1, reply: "fast" }),
            ],
            DEFAULT_OUTPUT_LIMIT,
            true,
        );
        let calls = vec![
            ("c1".to_owned(), "slow".to_owned(), serde_json::json!({})),
            ("c2".to_owned(), "fast".to_owned(), serde_json::json!({})),
        ];
        let results = executor.execute_batch(&calls).await;
        assert_eq!(results[0].tool_call_id, "c1");
        assert_eq!(results[0].result.content.as_deref(), Some("slow"));
        assert_eq!(results[1].tool_call_id, "c2");
    }

    #[tokio::test]
    async fn execution_time_is_recorded() {
        let executor = ToolExecutor::new(
            vec![Arc::new(SlowTool { delay_ms: 20, reply: "slow" })],
            DEFAULT_OUTPUT_LIMIT,
            false,
        );
        let result = executor
            .execute_single("c1", "slow", serde_json::json!({}))
            .await;
        assert!(result.execution_time >= 0.02);
    }
}
