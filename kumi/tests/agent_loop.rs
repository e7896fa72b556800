//! End-to-end tests of the step loop: tool execution, human-in-the-loop
//! pauses, step budgets, checkpointing, and streaming.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{Value, json};

use kumi::agent::{
    AgentEvent, AgentLoop, AgentState, AgentStatus, EventType, LoopConfig, RunStreamEvent,
    TokenManager, ToolExecutor, WAITING_FOR_USER_INPUT,
};
use kumi::checkpoint::{CheckpointConfig, CheckpointStore, InMemoryCheckpointStore};
use kumi::llm::{LlmResponse, MockLlm};
use kumi::message::{Message, Role, ToolCall};
use kumi::tool::{SharedTool, Tool, ToolResult};
use kumi::tools::GetUserInputTool;
use kumi::usage::TokenUsage;
use kumi::{Agent, AgentConfig};

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
        json!({
            "type": "object",
            "properties": {"msg": {"type": "string"}},
            "required": ["msg"]
        })
    }

    async fn execute(&self, arguments: Value) -> kumi::Result<ToolResult> {
        Ok(ToolResult::ok(
            arguments["msg"].as_str().unwrap_or_default(),
        ))
    }
}

struct FailTool;

#[async_trait]
impl Tool for FailTool {
    fn name(&self) -> &str {
        "fail"
    }

    fn description(&self) -> String {
        "Always fails.".to_owned()
    }

    fn parameters(&self) -> Value {
        json!({"type": "object", "properties": {}})
    }

    async fn execute(&self, _arguments: Value) -> kumi::Result<ToolResult> {
        Ok(ToolResult::err("broken"))
    }
}

fn build_loop(
    llm: Arc<MockLlm>,
    tools: Vec<SharedTool>,
    config: LoopConfig,
) -> AgentLoop {
    let executor = ToolExecutor::new(tools.clone(), 10_000, config.parallel_tools);
    let tokens = TokenManager::new(llm.clone(), 120_000, true);
    let mut agent_loop = AgentLoop::new(llm, executor, tokens, config, Some("test-agent".into()));
    agent_loop.set_tools(tools);
    agent_loop
}

fn seeded_state(max_steps: usize, task: &str) -> AgentState {
    let mut state = AgentState::new(max_steps);
    state.messages.push(Message::system("You are a test agent."));
    state.messages.push(Message::user(task));
    state
}

fn record_events(agent_loop: &mut AgentLoop) -> Arc<Mutex<Vec<(EventType, usize)>>> {
    let log: Arc<Mutex<Vec<(EventType, usize)>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = log.clone();
    agent_loop.events_mut().on_all(Arc::new(move |event: &AgentEvent| {
        sink.lock().unwrap().push((event.event_type, event.step));
    }));
    log
}

#[tokio::test]
async fn single_tool_happy_path() {
    let llm = Arc::new(MockLlm::new());
    llm.push_response(
        LlmResponse::with_tool_calls(
            "",
            vec![ToolCall::new("c1", "echo", json!({"msg": "hi"}))],
        )
        .with_usage(TokenUsage::new(10, 5)),
    );
    llm.push_response(LlmResponse::text("done").with_usage(TokenUsage::new(20, 7)));

    let mut agent_loop = build_loop(
        llm,
        vec![Arc::new(EchoTool)],
        LoopConfig {
            max_steps: 5,
            ..LoopConfig::default()
        },
    );
    let events = record_events(&mut agent_loop);

    let mut state = seeded_state(5, "say hi");
    let result = agent_loop.run(&mut state, None).await.unwrap();

    assert_eq!(result, "done");
    assert_eq!(state.status, AgentStatus::Completed);

    // Transcript shape: system, user, assistant(tool_calls), tool, assistant.
    let roles: Vec<&str> = state.messages.iter().map(|m| m.role.as_str()).collect();
    assert_eq!(roles, ["system", "user", "assistant", "tool", "assistant"]);
    assert_eq!(state.messages[3].tool_call_id.as_deref(), Some("c1"));
    assert_eq!(state.messages[3].text(), "hi");
    assert_eq!(state.messages[4].text(), "done");

    // Token totals are the per-step sums.
    assert_eq!(state.total_input_tokens, 30);
    assert_eq!(state.total_output_tokens, 12);

    let recorded = events.lock().unwrap().clone();
    let expected = [
        (EventType::StepStart, 1),
        (EventType::LlmResponse, 1),
        (EventType::ToolStart, 1),
        (EventType::ToolEnd, 1),
        (EventType::StepEnd, 1),
        (EventType::StepStart, 2),
        (EventType::LlmResponse, 2),
        (EventType::Completion, 2),
    ];
    assert_eq!(recorded, expected);
}

#[tokio::test]
async fn parallel_batch_keeps_call_order_and_survives_failure() {
    let llm = Arc::new(MockLlm::new());
    llm.push_response(LlmResponse::with_tool_calls(
        "",
        vec![
            ToolCall::new("c1", "fail", json!({})),
            ToolCall::new("c2", "echo", json!({"msg": "ok"})),
        ],
    ));
    llm.push_response(LlmResponse::text("finished"));

    let mut agent_loop = build_loop(
        llm,
        vec![Arc::new(EchoTool), Arc::new(FailTool)],
        LoopConfig {
            max_steps: 5,
            parallel_tools: true,
            ..LoopConfig::default()
        },
    );

    let mut state = seeded_state(5, "run both");
    let result = agent_loop.run(&mut state, None).await.unwrap();
    assert_eq!(result, "finished");

    // Tool messages appear in call order and carry a permutation of the
    // call ids; failures surface as "Error: ..." content.
    let tool_messages: Vec<&Message> = state
        .messages
        .iter()
        .filter(|m| m.role == Role::Tool)
        .collect();
    assert_eq!(tool_messages.len(), 2);
    assert_eq!(tool_messages[0].tool_call_id.as_deref(), Some("c1"));
    assert_eq!(tool_messages[0].text(), "Error: broken");
    assert_eq!(tool_messages[1].tool_call_id.as_deref(), Some("c2"));
    assert_eq!(tool_messages[1].text(), "ok");
}

#[tokio::test]
async fn unknown_tool_is_surfaced_not_fatal() {
    let llm = Arc::new(MockLlm::new());
    llm.push_response(LlmResponse::with_tool_calls(
        "",
        vec![ToolCall::new("c1", "ghost", json!({}))],
    ));
    llm.push_response(LlmResponse::text("recovered"));

    let mut agent_loop = build_loop(llm, vec![Arc::new(EchoTool)], LoopConfig::default());
    let mut state = seeded_state(5, "call a ghost");
    let result = agent_loop.run(&mut state, None).await.unwrap();

    assert_eq!(result, "recovered");
    let tool_msg = state.messages.iter().find(|m| m.role == Role::Tool).unwrap();
    assert_eq!(tool_msg.text(), "Error: Unknown tool: ghost");
}

#[tokio::test]
async fn llm_failure_terminates_run() {
    let llm = Arc::new(MockLlm::new());
    llm.push_failure("socket closed");

    let agent_loop = build_loop(llm, vec![], LoopConfig::default());
    let mut state = seeded_state(5, "anything");
    let result = agent_loop.run(&mut state, None).await.unwrap();

    assert_eq!(result, "LLM call failed: socket closed");
    assert_eq!(state.status, AgentStatus::Error);
    assert_eq!(state.error_message.as_deref(), Some("LLM call failed: socket closed"));
}

#[tokio::test]
async fn max_steps_exhaustion() {
    let llm = Arc::new(MockLlm::new());
    for i in 0..3 {
        llm.push_response(LlmResponse::with_tool_calls(
            "",
            vec![ToolCall::new(
                format!("c{i}"),
                "echo",
                json!({"msg": "again"}),
            )],
        ));
    }

    let mut agent_loop = build_loop(
        llm,
        vec![Arc::new(EchoTool)],
        LoopConfig {
            max_steps: 3,
            ..LoopConfig::default()
        },
    );
    let events = record_events(&mut agent_loop);

    let mut state = seeded_state(3, "loop forever");
    let result = agent_loop.run(&mut state, None).await.unwrap();

    assert!(result.starts_with("Task couldn't be completed after 3 steps."));
    assert_eq!(state.status, AgentStatus::Error);
    assert_eq!(state.current_step, 3);

    let recorded = events.lock().unwrap().clone();
    let step_ends: Vec<usize> = recorded
        .iter()
        .filter(|(t, _)| *t == EventType::StepEnd)
        .map(|(_, s)| *s)
        .collect();
    assert_eq!(step_ends, [1, 2, 3]);
    assert_eq!(recorded.last().unwrap().0, EventType::Error);
}

#[tokio::test]
async fn human_in_the_loop_pause_and_resume() {
    let llm = Arc::new(MockLlm::new());
    llm.push_response(LlmResponse::with_tool_calls(
        "",
        vec![ToolCall::new(
            "c1",
            "get_user_input",
            json!({
                "user_input_fields": [
                    {"field_name": "api_key", "field_type": "str", "field_description": "your key"}
                ],
                "context": "needed to call the API"
            }),
        )],
    ));
    llm.push_response(LlmResponse::text("configured"));

    let workspace = tempfile::tempdir().unwrap();
    let config = AgentConfig::default()
        .with_max_steps(5)
        .with_workspace_dir(workspace.path());
    let mut agent = Agent::new(llm, config, vec![Arc::new(GetUserInputTool)]).unwrap();
    agent.add_user_message("configure the API");

    let (result, logs) = agent.run().await.unwrap();
    assert_eq!(result, WAITING_FOR_USER_INPUT);
    assert_eq!(agent.status(), AgentStatus::WaitingInput);
    assert_eq!(logs.count_of("user_input_required"), 1);

    let request = agent.pending_user_input().unwrap();
    assert_eq!(request.fields[0].field_name, "api_key");
    assert_eq!(request.context.as_deref(), Some("needed to call the API"));

    let mut values = HashMap::new();
    values.insert("api_key".to_owned(), json!("K"));
    agent.provide_user_input(values).unwrap();
    assert_eq!(agent.status(), AgentStatus::Running);

    // The synthetic tool reply answers the paused call.
    let tool_msg = agent
        .history()
        .iter()
        .rfind(|m| m.role == Role::Tool)
        .unwrap();
    assert_eq!(tool_msg.tool_call_id.as_deref(), Some("c1"));
    assert!(tool_msg.text().contains(r#"[{"name":"api_key","value":"K"}]"#));

    let (result, _logs) = agent.resume().await.unwrap();
    assert_eq!(result, "configured");
    assert_eq!(agent.status(), AgentStatus::Completed);
}

#[tokio::test]
async fn checkpoints_are_saved_and_retention_is_enforced() {
    let llm = Arc::new(MockLlm::new());
    for i in 0..4 {
        llm.push_response(LlmResponse::with_tool_calls(
            "",
            vec![ToolCall::new(format!("c{i}"), "echo", json!({"msg": "x"}))],
        ));
    }
    llm.push_response(LlmResponse::text("all done"));

    let store = Arc::new(InMemoryCheckpointStore::new());
    let agent_loop = build_loop(
        llm,
        vec![Arc::new(EchoTool)],
        LoopConfig {
            max_steps: 10,
            checkpoint: Some(CheckpointConfig::new(store.clone()).with_max_checkpoints(2)),
            ..LoopConfig::default()
        },
    );

    let mut state = seeded_state(10, "work");
    let result = agent_loop.run(&mut state, None).await.unwrap();
    assert_eq!(result, "all done");

    let thread_id = state.thread_id.clone().unwrap();
    let listed = store.list(&thread_id, 10).await.unwrap();
    assert!(listed.len() <= 2, "retention keeps the newest N");

    // Round-trip: the newest checkpoint restores step, status, and usage.
    let latest = store.load_latest(&thread_id).await.unwrap().unwrap();
    let restored = AgentState::from_checkpoint(&latest, 10);
    assert_eq!(restored.current_step, latest.step);
    assert_eq!(restored.messages.len(), latest.messages.len());
    assert_eq!(restored.total_input_tokens, latest.token_usage.input);
}

#[tokio::test]
async fn resume_from_checkpoint_runs_forward() {
    let llm = Arc::new(MockLlm::new());
    llm.push_response(LlmResponse::with_tool_calls(
        "",
        vec![ToolCall::new("c1", "echo", json!({"msg": "step one"}))],
    ));
    llm.push_failure("interrupted");

    let store = Arc::new(InMemoryCheckpointStore::new());
    let checkpoint_config = CheckpointConfig::new(store.clone());
    let agent_loop = build_loop(
        llm.clone(),
        vec![Arc::new(EchoTool)],
        LoopConfig {
            max_steps: 10,
            checkpoint: Some(checkpoint_config.clone()),
            ..LoopConfig::default()
        },
    );

    let mut state = seeded_state(10, "work");
    let result = agent_loop.run(&mut state, None).await.unwrap();
    assert!(result.starts_with("LLM call failed"));
    let thread_id = state.thread_id.clone().unwrap();

    // A fresh loop resumes from the stored snapshot and completes.
    llm.push_response(LlmResponse::text("resumed fine"));
    let resume_loop = build_loop(
        llm,
        vec![Arc::new(EchoTool)],
        LoopConfig {
            max_steps: 10,
            checkpoint: Some(checkpoint_config),
            ..LoopConfig::default()
        },
    );
    let (resumed_state, result) = resume_loop
        .resume_from_checkpoint(None, Some(&thread_id), None)
        .await
        .unwrap();
    assert_eq!(result, "resumed fine");
    assert_eq!(resumed_state.status, AgentStatus::Completed);
    assert!(resumed_state.current_step > 1, "runs forward from the restored step");
}

#[tokio::test]
async fn streaming_run_mirrors_the_state_machine() {
    let llm = Arc::new(MockLlm::new());
    llm.push_response(
        LlmResponse::with_tool_calls(
            "",
            vec![ToolCall::new("c1", "echo", json!({"msg": "streamed"}))],
        )
        .with_thinking("let me use the tool"),
    );
    llm.push_response(LlmResponse::text("stream done"));

    let workspace = tempfile::tempdir().unwrap();
    let config = AgentConfig::default()
        .with_max_steps(5)
        .with_workspace_dir(workspace.path());
    let mut agent = Agent::new(llm, config, vec![Arc::new(EchoTool)]).unwrap();
    agent.add_user_message("stream it");

    let mut kinds = Vec::new();
    let mut final_message = String::new();
    {
        let mut stream = agent.run_stream();
        while let Some(event) = stream.next().await {
            match event.unwrap() {
                RunStreamEvent::Step { .. } => kinds.push("step"),
                RunStreamEvent::Thinking { .. } => kinds.push("thinking"),
                RunStreamEvent::Content { .. } => kinds.push("content"),
                RunStreamEvent::ToolCall { .. } => kinds.push("tool_call"),
                RunStreamEvent::ToolResult { tool, success, .. } => {
                    assert_eq!(tool, "echo");
                    assert!(success);
                    kinds.push("tool_result");
                }
                RunStreamEvent::UserInputRequired { .. } => kinds.push("user_input_required"),
                RunStreamEvent::Done { message, .. } => {
                    final_message = message;
                    kinds.push("done");
                }
                RunStreamEvent::Error { .. } => kinds.push("error"),
                _ => kinds.push("other"),
            }
        }
    }

    assert_eq!(
        kinds,
        ["step", "thinking", "tool_call", "tool_result", "step", "content", "done"]
    );
    assert_eq!(final_message, "stream done");
    assert_eq!(agent.status(), AgentStatus::Completed);
}

#[tokio::test]
async fn empty_tool_batch_completes_without_tool_events() {
    let llm = Arc::new(MockLlm::new());
    llm.push_response(LlmResponse::text("immediate answer"));

    let mut agent_loop = build_loop(llm, vec![Arc::new(EchoTool)], LoopConfig::default());
    let events = record_events(&mut agent_loop);

    let mut state = seeded_state(5, "quick");
    let result = agent_loop.run(&mut state, None).await.unwrap();
    assert_eq!(result, "immediate answer");

    let recorded = events.lock().unwrap().clone();
    assert!(recorded.iter().all(|(t, _)| *t != EventType::ToolStart));
    assert!(recorded.iter().all(|(t, _)| *t != EventType::ToolEnd));
}
