//! The agent: an LLM, tools, durable state, and the step loop.
//!
//! [`Agent`] composes the pieces this module defines — [`AgentState`],
//! [`EventEmitter`], [`TokenManager`], [`ToolExecutor`], [`AgentLoop`] —
//! behind a small run/stream/resume API. It builds the system prompt,
//! seeds the transcript, and wires the loop's events into a chronological
//! execution log the caller can retrieve after a run.
//!
//! # Example
//!
//! ```rust,ignore
//! let agent = Agent::new(llm, AgentConfig::default(), vec![echo_tool])?;
//! agent.add_user_message("say hi");
//! let (text, logs) = agent.run().await?;
//! ```

mod events;
mod executor;
mod hook;
mod prompt;
mod runner;
mod state;
mod tokens;

pub use events::{AgentEvent, EventEmitter, EventHandler, EventType, HandlerId, RunStreamEvent};
pub use executor::{DEFAULT_OUTPUT_LIMIT, ToolExecutionResult, ToolExecutor};
pub use hook::{AgentHook, HookManager, SharedHook, StepData};
pub use prompt::{SystemPromptConfig, SystemPromptBuilder};
pub use runner::{AgentLoop, LoopConfig, RunEventStream, WAITING_FOR_USER_INPUT};
pub use state::{AgentState, AgentStatus};
pub use tokens::TokenManager;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use serde_json::{Value, json};
use tracing::debug;

use crate::checkpoint::CheckpointConfig;
use crate::error::{AgentError, Result};
use crate::llm::SharedLlmClient;
use crate::message::{Message, UserInputRequest};
use crate::skills::SkillLoader;
use crate::tool::SharedTool;
use crate::tools::TOOL_GET_USER_INPUT;

/// Agent construction options.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Agent name, used in logging and trace metadata.
    pub name: String,
    /// Verbatim system prompt. Workspace info is appended when missing.
    pub system_prompt: Option<String>,
    /// Structured prompt configuration; takes precedence over
    /// `system_prompt` when set.
    pub prompt: Option<SystemPromptConfig>,
    /// Step budget per run.
    pub max_steps: usize,
    /// Working directory exposed to the model and to tools.
    pub workspace_dir: PathBuf,
    /// Token limit before history summarization triggers.
    pub token_limit: usize,
    /// Enable automatic history summarization.
    pub enable_summarization: bool,
    /// Character bound for successful tool output.
    pub tool_output_limit: usize,
    /// Execute a step's tool batch concurrently.
    pub parallel_tools: bool,
    /// Checkpointing policy.
    pub checkpoint: Option<CheckpointConfig>,
    /// Skills made visible through progressive disclosure.
    pub skill_loader: Option<SkillLoader>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            name: "agent".to_owned(),
            system_prompt: None,
            prompt: None,
            max_steps: 50,
            workspace_dir: PathBuf::from("./workspace"),
            token_limit: 120_000,
            enable_summarization: true,
            tool_output_limit: DEFAULT_OUTPUT_LIMIT,
            parallel_tools: false,
            checkpoint: None,
            skill_loader: None,
        }
    }
}

impl AgentConfig {
    /// Set the agent name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set a verbatim system prompt.
    #[must_use]
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    /// Set a structured prompt configuration.
    #[must_use]
    pub fn with_prompt(mut self, prompt: SystemPromptConfig) -> Self {
        self.prompt = Some(prompt);
        self
    }

    /// Set the step budget.
    #[must_use]
    pub const fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps;
        self
    }

    /// Set the workspace directory.
    #[must_use]
    pub fn with_workspace_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.workspace_dir = dir.into();
        self
    }

    /// Set the token limit.
    #[must_use]
    pub const fn with_token_limit(mut self, limit: usize) -> Self {
        self.token_limit = limit;
        self
    }

    /// Enable or disable history summarization.
    #[must_use]
    pub const fn with_summarization(mut self, enabled: bool) -> Self {
        self.enable_summarization = enabled;
        self
    }

    /// Enable or disable parallel tool execution.
    #[must_use]
    pub const fn with_parallel_tools(mut self, enabled: bool) -> Self {
        self.parallel_tools = enabled;
        self
    }

    /// Set the checkpointing policy.
    #[must_use]
    pub fn with_checkpoint(mut self, checkpoint: CheckpointConfig) -> Self {
        self.checkpoint = Some(checkpoint);
        self
    }

    /// Attach a skill loader.
    #[must_use]
    pub fn with_skill_loader(mut self, loader: SkillLoader) -> Self {
        self.skill_loader = Some(loader);
        self
    }
}

/// Chronological log of one run, accumulated from loop events.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct ExecutionLog {
    entries: Vec<Value>,
}

impl ExecutionLog {
    /// The raw log entries, oldest first.
    #[must_use]
    pub fn entries(&self) -> &[Value] {
        &self.entries
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the log is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Count of executed steps.
    #[must_use]
    pub fn steps(&self) -> usize {
        self.count_of("step")
    }

    /// Count of entries of one kind.
    #[must_use]
    pub fn count_of(&self, kind: &str) -> usize {
        self.entries
            .iter()
            .filter(|e| e["type"] == kind)
            .count()
    }

    /// Whether the run terminated on the step budget.
    #[must_use]
    pub fn max_steps_reached(&self) -> bool {
        self.count_of("max_steps_reached") > 0
    }

    /// Final token totals from the terminal entry, `(input, output)`.
    #[must_use]
    pub fn final_usage(&self) -> (u64, u64) {
        for entry in &self.entries {
            if entry["type"] == "completion" || entry["type"] == "max_steps_reached" {
                return (
                    entry["total_input_tokens"].as_u64().unwrap_or(0),
                    entry["total_output_tokens"].as_u64().unwrap_or(0),
                );
            }
        }
        (0, 0)
    }

    fn push(&mut self, entry: Value) {
        self.entries.push(entry);
    }
}

/// A stateful executor combining an LLM, tools, memory, and the step loop.
pub struct Agent {
    name: String,
    config: AgentConfig,
    tools: Vec<SharedTool>,
    state: AgentState,
    runner: AgentLoop,
    system_prompt: String,
    logs: Arc<Mutex<ExecutionLog>>,
}

impl Agent {
    /// Build an agent.
    ///
    /// Creates the workspace directory, assembles the system prompt, and
    /// seeds the transcript with the system message.
    pub fn new(llm: SharedLlmClient, config: AgentConfig, tools: Vec<SharedTool>) -> Result<Self> {
        std::fs::create_dir_all(&config.workspace_dir)?;

        let system_prompt = Self::build_system_prompt(&config, &tools);

        let mut state = AgentState::new(config.max_steps);
        state.messages.push(Message::system(system_prompt.clone()));

        let token_manager = TokenManager::new(
            llm.clone(),
            config.token_limit,
            config.enable_summarization,
        );
        let executor = ToolExecutor::new(
            tools.clone(),
            config.tool_output_limit,
            config.parallel_tools,
        );
        let mut runner = AgentLoop::new(
            llm,
            executor,
            token_manager,
            LoopConfig {
                max_steps: config.max_steps,
                parallel_tools: config.parallel_tools,
                checkpoint: config.checkpoint.clone(),
            },
            Some(config.name.clone()),
        );
        runner.set_tools(tools.clone());

        Ok(Self {
            name: config.name.clone(),
            tools,
            state,
            runner,
            system_prompt,
            logs: Arc::new(Mutex::new(ExecutionLog::default())),
            config,
        })
    }

    fn build_system_prompt(config: &AgentConfig, tools: &[SharedTool]) -> String {
        let tool_instructions: Vec<String> = tools
            .iter()
            .filter(|t| t.add_instructions_to_prompt())
            .filter_map(|t| t.instructions())
            .collect();
        let skills_metadata = config
            .skill_loader
            .as_ref()
            .map(SkillLoader::metadata_prompt);

        if let Some(prompt_config) = &config.prompt {
            return SystemPromptBuilder::build(
                prompt_config,
                Some(&config.workspace_dir),
                skills_metadata.as_deref(),
                &tool_instructions,
            );
        }

        if let Some(prompt) = &config.system_prompt {
            if prompt.contains("Current Workspace") || prompt.contains("workspace_info") {
                return prompt.clone();
            }
            let workspace = config
                .workspace_dir
                .canonicalize()
                .unwrap_or_else(|_| config.workspace_dir.clone());
            return format!(
                "{prompt}\n\n## Current Workspace\n\
                 You are currently working in: `{}`\n\
                 All relative paths will be resolved relative to this directory.",
                workspace.display()
            );
        }

        let default_config = SystemPromptConfig::described("You are a helpful AI assistant.")
            .with_instruction("Always think step by step")
            .with_instruction("Use available tools when appropriate")
            .with_instruction("Provide clear and accurate responses");
        SystemPromptBuilder::build(
            &default_config,
            Some(&config.workspace_dir),
            skills_metadata.as_deref(),
            &tool_instructions,
        )
    }

    /// Register the event handlers that accumulate the execution log.
    fn setup_execution_logging(&mut self) {
        *self.logs.lock().expect("log lock poisoned") = ExecutionLog::default();
        let events = self.runner.events_mut();
        events.clear();

        let log = |logs: &Arc<Mutex<ExecutionLog>>, entry: Value| {
            logs.lock().expect("log lock poisoned").push(entry);
        };

        let logs = Arc::clone(&self.logs);
        events.on(
            EventType::StepStart,
            Arc::new(move |event: &AgentEvent| {
                log(&logs, json!({
                    "type": "step",
                    "step": event.step,
                    "max_steps": event.data["max_steps"],
                    "tokens": event.data["tokens"],
                    "token_limit": event.data["token_limit"],
                }));
            }),
        );

        let logs = Arc::clone(&self.logs);
        events.on(
            EventType::LlmResponse,
            Arc::new(move |event: &AgentEvent| {
                log(&logs, json!({
                    "type": "llm_response",
                    "thinking": event.data["thinking"],
                    "content": event.data["content"],
                    "has_tool_calls": event.data["has_tool_calls"],
                    "tool_count": event.data["tool_count"],
                    "input_tokens": event.data["input_tokens"],
                    "output_tokens": event.data["output_tokens"],
                }));
            }),
        );

        let logs = Arc::clone(&self.logs);
        events.on(
            EventType::ToolStart,
            Arc::new(move |event: &AgentEvent| {
                log(&logs, json!({
                    "type": "tool_call",
                    "tool": event.data["tool"],
                    "tool_call_id": event.data["tool_call_id"],
                    "arguments": event.data["arguments"],
                }));
            }),
        );

        let logs = Arc::clone(&self.logs);
        events.on(
            EventType::ToolEnd,
            Arc::new(move |event: &AgentEvent| {
                log(&logs, json!({
                    "type": "tool_result",
                    "tool": event.data["tool"],
                    "tool_call_id": event.data["tool_call_id"],
                    "arguments": event.data["arguments"],
                    "success": event.data["success"],
                    "content": event.data["content"],
                    "error": event.data["error"],
                    "execution_time": event.data["execution_time"],
                }));
            }),
        );

        let logs = Arc::clone(&self.logs);
        events.on(
            EventType::UserInputRequired,
            Arc::new(move |event: &AgentEvent| {
                log(&logs, json!({
                    "type": "user_input_required",
                    "tool_call_id": event.data["tool_call_id"],
                    "fields": event.data["fields"],
                    "context": event.data["context"],
                }));
            }),
        );

        let logs = Arc::clone(&self.logs);
        events.on(
            EventType::Completion,
            Arc::new(move |event: &AgentEvent| {
                log(&logs, json!({
                    "type": "completion",
                    "message": "Task completed successfully",
                    "total_steps": event.data["total_steps"],
                    "total_input_tokens": event.data["total_input_tokens"],
                    "total_output_tokens": event.data["total_output_tokens"],
                }));
            }),
        );

        let logs = Arc::clone(&self.logs);
        events.on(
            EventType::Error,
            Arc::new(move |event: &AgentEvent| {
                if event.data["reason"] == "max_steps_reached" {
                    log(&logs, json!({
                        "type": "max_steps_reached",
                        "message": event.data["message"],
                        "total_input_tokens": event.data["total_input_tokens"],
                        "total_output_tokens": event.data["total_output_tokens"],
                    }));
                } else {
                    log(&logs, json!({
                        "type": "error",
                        "message": event.data["message"],
                    }));
                }
            }),
        );
    }

    /// Append a user message to the transcript.
    pub fn add_user_message(&mut self, content: impl Into<String>) {
        self.state.messages.push(Message::user(content.into()));
    }

    /// Run to completion, pause, or error.
    ///
    /// Returns the final text plus the chronological execution log. The
    /// log sequence always ends with a `completion`, `max_steps_reached`,
    /// or `error` entry (or `user_input_required` when paused).
    pub async fn run(&mut self) -> Result<(String, ExecutionLog)> {
        debug!(agent = %self.name, "Starting run");
        self.setup_execution_logging();
        let result = self.runner.run(&mut self.state, None).await?;
        Ok((result, self.snapshot_logs()))
    }

    /// Streaming run; yields [`RunStreamEvent`]s as they happen.
    pub fn run_stream(&mut self) -> RunEventStream<'_> {
        self.setup_execution_logging();
        self.runner.run_stream(&mut self.state, None)
    }

    /// Fill the pending input request and append the synthetic tool reply.
    ///
    /// The run is not resumed; call [`resume`](Self::resume) (or
    /// [`resume_stream`](Self::resume_stream)) afterwards.
    pub fn provide_user_input(&mut self, field_values: HashMap<String, Value>) -> Result<()> {
        let Some(mut request) = self.state.pending_user_input.clone() else {
            return Err(AgentError::configuration("No pending user input request"));
        };

        for field in &mut request.fields {
            if let Some(value) = field_values.get(&field.field_name) {
                field.value = Some(value.clone());
            }
        }

        let payload: Vec<Value> = request
            .fields
            .iter()
            .map(|field| json!({ "name": field.field_name, "value": field.value }))
            .collect();

        self.state.messages.push(Message::tool(
            request.tool_call_id.clone(),
            TOOL_GET_USER_INPUT,
            format!("User inputs received: {}", serde_json::to_string(&payload)?),
        ));

        self.logs.lock().expect("log lock poisoned").push(json!({
            "type": "user_input_received",
            "tool_call_id": request.tool_call_id,
            "field_values": field_values,
        }));

        self.state.resume_from_input();
        Ok(())
    }

    /// Continue a run paused for input, after
    /// [`provide_user_input`](Self::provide_user_input).
    pub async fn resume(&mut self) -> Result<(String, ExecutionLog)> {
        if self.state.pending_user_input.is_some() {
            return Err(AgentError::configuration(
                "Cannot resume: still waiting for user input. Call provide_user_input first.",
            ));
        }
        self.setup_execution_logging();
        let result = self.runner.continue_run(&mut self.state, None).await?;
        Ok((result, self.snapshot_logs()))
    }

    /// Restore state from a checkpoint and run it forward.
    pub async fn resume_from_checkpoint(
        &mut self,
        checkpoint_id: Option<&str>,
        thread_id: Option<&str>,
    ) -> Result<(String, ExecutionLog)> {
        self.setup_execution_logging();
        let (state, result) = self
            .runner
            .resume_from_checkpoint(checkpoint_id, thread_id, None)
            .await?;
        self.state = state;
        Ok((result, self.snapshot_logs()))
    }

    fn snapshot_logs(&self) -> ExecutionLog {
        self.logs.lock().expect("log lock poisoned").clone()
    }

    /// The agent name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The assembled system prompt.
    #[must_use]
    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    /// The configuration this agent was built with.
    #[must_use]
    pub const fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// The conversation transcript.
    #[must_use]
    pub fn history(&self) -> &[Message] {
        &self.state.messages
    }

    /// The current execution state.
    #[must_use]
    pub const fn state(&self) -> &AgentState {
        &self.state
    }

    /// Mutable access to the execution state.
    ///
    /// Callers must not mutate state concurrently with a running loop.
    pub const fn state_mut(&mut self) -> &mut AgentState {
        &mut self.state
    }

    /// Current run status.
    #[must_use]
    pub const fn status(&self) -> AgentStatus {
        self.state.status
    }

    /// The pending input request, when paused.
    #[must_use]
    pub const fn pending_user_input(&self) -> Option<&UserInputRequest> {
        self.state.pending_user_input.as_ref()
    }

    /// Whether the agent is paused for input.
    #[must_use]
    pub fn is_waiting_for_input(&self) -> bool {
        self.state.is_waiting_input()
    }

    /// The tools this agent exposes.
    #[must_use]
    pub fn tools(&self) -> &[SharedTool] {
        &self.tools
    }

    /// Mutable access to the loop's event emitter.
    ///
    /// Starting a run clears the emitter and re-registers the
    /// execution-log handlers, so handlers added here do not survive into
    /// the next run. For persistent observation register a hook instead.
    pub const fn events_mut(&mut self) -> &mut EventEmitter {
        self.runner.events_mut()
    }

    /// Mutable access to the loop's hook registry.
    pub const fn hooks_mut(&mut self) -> &mut HookManager {
        self.runner.hooks_mut()
    }
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("name", &self.name)
            .field("status", &self.state.status)
            .field("tools", &self.tools.len())
            .field("messages", &self.state.messages.len())
            .finish()
    }
}
