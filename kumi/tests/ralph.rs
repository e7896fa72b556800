//! End-to-end tests of the Ralph loop: completion conditions, working
//! memory persistence, and tool-result caching across iterations.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};

use kumi::llm::{LlmResponse, MockLlm};
use kumi::message::ToolCall;
use kumi::ralph::{CompletionCondition, RalphConfig, RalphLoop};
use kumi::tool::{SharedTool, Tool, ToolResult};

/// Stand-in for a file-writing tool; only the `path` argument matters for
/// idle detection.
struct WriteFileTool;

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> String {
        "Write content to a file.".to_owned()
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string"},
                "content": {"type": "string"}
            },
            "required": ["path", "content"]
        })
    }

    async fn execute(&self, arguments: Value) -> kumi::Result<ToolResult> {
        Ok(ToolResult::ok(format!(
            "wrote {}",
            arguments["path"].as_str().unwrap_or_default()
        )))
    }
}

fn write_call(id: &str, path: &str) -> ToolCall {
    ToolCall::new(id, "write_file", json!({"path": path, "content": "data"}))
}

#[tokio::test]
async fn promise_tag_in_assistant_text_ends_the_loop() {
    let llm = Arc::new(MockLlm::new());
    llm.push_response(LlmResponse::text(
        "Everything checks out. <promise>TASK COMPLETE</promise>",
    ));

    let dir = tempfile::tempdir().unwrap();
    let mut ralph = RalphLoop::new(RalphConfig::default(), dir.path());
    let result = ralph
        .run(llm, Vec::new(), "finish the task")
        .await
        .unwrap();

    assert!(result.completed);
    assert_eq!(result.reason, Some(CompletionCondition::PromiseTag));
    assert_eq!(result.iterations, 1);
}

#[tokio::test]
async fn signal_completion_tool_ends_the_loop() {
    let llm = Arc::new(MockLlm::new());
    // Iteration 1: call signal_completion, then produce a closing message.
    llm.push_response(LlmResponse::with_tool_calls(
        "",
        vec![ToolCall::new(
            "c1",
            "signal_completion",
            json!({"summary": "refactor finished", "confidence": 0.9}),
        )],
    ));
    llm.push_response(LlmResponse::text("wrapping up"));

    let dir = tempfile::tempdir().unwrap();
    let mut ralph = RalphLoop::new(RalphConfig::default(), dir.path());
    let result = ralph.run(llm, Vec::new(), "refactor").await.unwrap();

    assert!(result.completed);
    assert_eq!(result.reason, Some(CompletionCondition::PromiseTag));
}

#[tokio::test]
async fn idle_threshold_ends_the_loop_after_identical_file_sets() {
    let config = RalphConfig::default()
        .with_idle_threshold(2)
        .with_max_iterations(10)
        .with_conditions(vec![
            CompletionCondition::IdleThreshold,
            CompletionCondition::MaxIterations,
        ]);

    let llm = Arc::new(MockLlm::new());
    // Three iterations, each touching the same file then answering.
    for i in 0..3 {
        llm.push_response(LlmResponse::with_tool_calls(
            "",
            vec![write_call(&format!("c{i}"), "src/main.rs")],
        ));
        llm.push_response(LlmResponse::text("still going"));
    }

    let dir = tempfile::tempdir().unwrap();
    let tools: Vec<SharedTool> = vec![Arc::new(WriteFileTool)];
    let mut ralph = RalphLoop::new(config, dir.path());
    let result = ralph.run(llm, tools, "improve the code").await.unwrap();

    assert!(result.completed);
    assert_eq!(result.reason, Some(CompletionCondition::IdleThreshold));
    assert_eq!(result.iterations, 3);

    // Working memory survived on disk with the iteration counter.
    let memory_file = dir.path().join(".ralph").join("memory.json");
    assert!(memory_file.exists());
    let raw: Value =
        serde_json::from_str(&std::fs::read_to_string(memory_file).unwrap()).unwrap();
    assert_eq!(raw["current_iteration"], 3);
}

#[tokio::test]
async fn max_iterations_bound_always_terminates() {
    let config = RalphConfig::default()
        .with_max_iterations(2)
        .with_conditions(vec![CompletionCondition::MaxIterations]);

    let llm = Arc::new(MockLlm::new());
    llm.push_response(LlmResponse::text("iteration one"));
    llm.push_response(LlmResponse::text("iteration two"));

    let dir = tempfile::tempdir().unwrap();
    let mut ralph = RalphLoop::new(config, dir.path());
    let result = ralph.run(llm, Vec::new(), "never finishes").await.unwrap();

    assert!(result.completed);
    assert_eq!(result.reason, Some(CompletionCondition::MaxIterations));
    assert_eq!(result.iterations, 2);
    assert_eq!(result.final_response, "iteration two");
}

#[tokio::test]
async fn tool_results_are_cached_and_surfaced_in_the_next_context() {
    let config = RalphConfig::default()
        .with_max_iterations(2)
        .with_conditions(vec![CompletionCondition::MaxIterations]);

    let llm = Arc::new(MockLlm::new());
    // Iteration 1 writes a file; iteration 2 just answers.
    llm.push_response(LlmResponse::with_tool_calls(
        "",
        vec![write_call("c1", "notes.md")],
    ));
    llm.push_response(LlmResponse::text("first pass done"));
    llm.push_response(LlmResponse::text("second pass done"));

    let dir = tempfile::tempdir().unwrap();
    let tools: Vec<SharedTool> = vec![Arc::new(WriteFileTool)];
    let mut ralph = RalphLoop::new(config, dir.path());
    let result = ralph.run(llm, tools, "take notes").await.unwrap();
    assert!(result.completed);

    // The cached result is retrievable in full, and the next context
    // prefix carried its summary.
    let cache = ralph.tool_cache();
    let full = cache.lock().unwrap().get_full_content("c1");
    assert_eq!(full.as_deref(), Some("wrote notes.md"));

    let prefix = ralph.context_prefix();
    assert!(prefix.contains("## Working Memory"));
    assert!(prefix.contains("[write_file] wrote notes.md"));
    assert!(ralph.state().files_modified.contains("notes.md"));
}

#[tokio::test]
async fn working_memory_reset_clears_disk_state() {
    let llm = Arc::new(MockLlm::new());
    llm.push_response(LlmResponse::text("<promise>TASK COMPLETE</promise>"));

    let dir = tempfile::tempdir().unwrap();
    let mut ralph = RalphLoop::new(RalphConfig::default(), dir.path());
    ralph.run(llm, Vec::new(), "quick job").await.unwrap();

    assert!(dir.path().join(".ralph").join("memory.json").exists());
    ralph.reset().unwrap();
    assert!(!dir.path().join(".ralph").join("memory.json").exists());
    assert_eq!(ralph.state().iteration, 0);
}
