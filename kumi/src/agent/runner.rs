//! The core step loop.
//!
//! [`AgentLoop`] drives one [`AgentState`] through the run state machine:
//!
//! 1. Summarize history if over the token limit
//! 2. Call the LLM with the exposed tool schemas
//! 3. No tool calls -> complete with the final text
//! 4. A `get_user_input` call -> pause for the human
//! 5. Otherwise execute the batch, append tool messages, loop
//!
//! Event ordering per step: `StepStart` precedes `LlmResponse` precedes any
//! `ToolStart` precedes its matching `ToolEnd` precedes `StepEnd`.
//! `Completion` and `Error` are terminal for a run.
//!
//! Checkpoint storage failures are the one error the loop refuses to
//! swallow; silent checkpoint loss is worse than crashing.

use std::collections::HashMap;
use std::pin::Pin;

use futures::{Stream, StreamExt};
use serde_json::{Value, json};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::events::{AgentEvent, EventEmitter, EventType, RunStreamEvent};
use super::executor::ToolExecutor;
use super::hook::{HookManager, StepData};
use super::state::AgentState;
use super::tokens::TokenManager;
use crate::checkpoint::{Checkpoint, CheckpointConfig, UsageTotals};
use crate::error::{AgentError, Result};
use crate::llm::{LlmStreamEvent, SharedLlmClient};
use crate::message::{Message, ToolCall, UserInputRequest};
use crate::tools::{TOOL_GET_USER_INPUT, parse_user_input_fields};

/// Sentinel returned when a run pauses for human input.
pub const WAITING_FOR_USER_INPUT: &str = "Waiting for user input";

/// Configuration for the step loop.
#[derive(Debug, Clone)]
pub struct LoopConfig {
    /// Step budget per run.
    pub max_steps: usize,
    /// Execute a step's tool-call batch concurrently.
    pub parallel_tools: bool,
    /// Checkpointing policy, inert when `None`.
    pub checkpoint: Option<CheckpointConfig>,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            max_steps: 50,
            parallel_tools: false,
            checkpoint: None,
        }
    }
}

/// Outcome of one step.
#[derive(Debug, Default)]
struct StepResult {
    completed: bool,
    waiting_input: bool,
    content: String,
    error: Option<String>,
}

/// Boxed stream of run events yielded by [`AgentLoop::run_stream`].
pub type RunEventStream<'a> = Pin<Box<dyn Stream<Item = Result<RunStreamEvent>> + Send + 'a>>;

/// The sequential state machine executing agent runs.
pub struct AgentLoop {
    llm: SharedLlmClient,
    executor: ToolExecutor,
    tokens: TokenManager,
    events: EventEmitter,
    hooks: HookManager,
    config: LoopConfig,
    tool_schemas: Vec<Value>,
    agent_id: String,
}

impl AgentLoop {
    /// Create a loop over the given collaborators.
    #[must_use]
    pub fn new(
        llm: SharedLlmClient,
        executor: ToolExecutor,
        tokens: TokenManager,
        config: LoopConfig,
        agent_id: Option<String>,
    ) -> Self {
        Self {
            llm,
            executor,
            tokens,
            events: EventEmitter::new(),
            hooks: HookManager::new(),
            config,
            tool_schemas: Vec::new(),
            agent_id: agent_id.unwrap_or_else(|| Uuid::new_v4().to_string()),
        }
    }

    /// Replace the tool set and the schemas exposed to the model.
    pub fn set_tools(&mut self, tools: Vec<crate::tool::SharedTool>) {
        self.tool_schemas = tools.iter().map(|t| t.to_schema()).collect();
        self.executor.set_tools(tools);
    }

    /// The schemas currently exposed to the model.
    #[must_use]
    pub fn tool_schemas(&self) -> &[Value] {
        &self.tool_schemas
    }

    /// The loop's event emitter.
    #[must_use]
    pub const fn events(&self) -> &EventEmitter {
        &self.events
    }

    /// Mutable access to the event emitter, for handler registration.
    pub const fn events_mut(&mut self) -> &mut EventEmitter {
        &mut self.events
    }

    /// Mutable access to the hook registry.
    pub const fn hooks_mut(&mut self) -> &mut HookManager {
        &mut self.hooks
    }

    /// The loop configuration.
    #[must_use]
    pub const fn config(&self) -> &LoopConfig {
        &self.config
    }

    fn checkpoint_config(&self) -> Option<&CheckpointConfig> {
        self.config.checkpoint.as_ref().filter(|c| c.is_active())
    }

    /// Run to completion, pause, or error from a fresh start.
    ///
    /// Counters are reset; messages are preserved. The returned string is
    /// the final assistant text, the waiting-input sentinel, or a
    /// human-readable error string. Only checkpoint storage failures
    /// surface as `Err`.
    pub async fn run(&self, state: &mut AgentState, metadata: Option<&Value>) -> Result<String> {
        state.reset_for_run(false);
        state.max_steps = self.config.max_steps;
        self.run_loop(state, metadata).await
    }

    /// Run forward without resetting counters.
    ///
    /// Used after a waiting-input resume and after checkpoint restores,
    /// where `current_step` and token totals carry over.
    pub async fn continue_run(
        &self,
        state: &mut AgentState,
        metadata: Option<&Value>,
    ) -> Result<String> {
        state.max_steps = self.config.max_steps;
        self.run_loop(state, metadata).await
    }

    async fn run_loop(&self, state: &mut AgentState, metadata: Option<&Value>) -> Result<String> {
        self.hooks.trigger_before_run(state).await;

        while state.current_step < self.config.max_steps {
            state.increment_step();
            debug!(agent = %self.agent_id, step = state.current_step, "Starting step");

            let result = self.execute_step(state, metadata).await?;

            let step_data = StepData {
                completed: result.completed,
                content: result.content.clone(),
                error: result.error.clone(),
            };
            self.hooks.trigger_on_step(state, &step_data).await;

            if result.completed {
                state.mark_completed();
                self.events.emit(&AgentEvent::new(
                    EventType::Completion,
                    state.current_step,
                    json!({
                        "message": result.content,
                        "total_steps": state.current_step,
                        "total_input_tokens": state.total_input_tokens,
                        "total_output_tokens": state.total_output_tokens,
                    }),
                ));
                info!(
                    agent = %self.agent_id,
                    steps = state.current_step,
                    input_tokens = state.total_input_tokens,
                    output_tokens = state.total_output_tokens,
                    "Agent run completed",
                );
                self.hooks.trigger_after_run(state, &result.content, true).await;
                return Ok(result.content);
            }

            if result.waiting_input {
                self.hooks
                    .trigger_after_run(state, WAITING_FOR_USER_INPUT, true)
                    .await;
                return Ok(WAITING_FOR_USER_INPUT.to_owned());
            }

            if let Some(error_msg) = result.error {
                state.mark_error(&error_msg);
                error!(agent = %self.agent_id, step = state.current_step, error = %error_msg, "Run failed");
                self.events.emit(&AgentEvent::new(
                    EventType::Error,
                    state.current_step,
                    json!({ "message": error_msg }),
                ));
                self.hooks.trigger_after_run(state, &error_msg, false).await;
                return Ok(error_msg);
            }
        }

        let error_msg =
            AgentError::max_steps(state.current_step, self.config.max_steps).to_string();
        state.mark_error(&error_msg);
        warn!(agent = %self.agent_id, max_steps = self.config.max_steps, "Max steps exceeded");
        self.events.emit(&AgentEvent::new(
            EventType::Error,
            state.current_step,
            json!({
                "message": error_msg,
                "reason": "max_steps_reached",
                "total_input_tokens": state.total_input_tokens,
                "total_output_tokens": state.total_output_tokens,
            }),
        ));
        self.hooks.trigger_after_run(state, &error_msg, false).await;
        Ok(error_msg)
    }

    async fn execute_step(
        &self,
        state: &mut AgentState,
        metadata: Option<&Value>,
    ) -> Result<StepResult> {
        let current_tokens = self.tokens.estimate_tokens(&state.messages);
        state.messages = self
            .tokens
            .maybe_summarize(std::mem::take(&mut state.messages))
            .await;

        self.events.emit(&AgentEvent::new(
            EventType::StepStart,
            state.current_step,
            json!({
                "tokens": current_tokens,
                "token_limit": self.tokens.token_limit(),
                "max_steps": self.config.max_steps,
            }),
        ));

        let schemas = (!self.tool_schemas.is_empty()).then_some(self.tool_schemas.as_slice());
        let response = match self.llm.generate(&state.messages, schemas, metadata).await {
            Ok(response) => response,
            Err(error) => {
                return Ok(StepResult {
                    error: Some(llm_error_message(&error)),
                    ..StepResult::default()
                });
            }
        };

        if let Some(usage) = response.usage {
            state.add_tokens(usage.input_tokens, usage.output_tokens);
        }

        let tool_count = response.tool_calls.as_ref().map_or(0, Vec::len);
        self.events.emit(&AgentEvent::new(
            EventType::LlmResponse,
            state.current_step,
            json!({
                "content": response.content,
                "thinking": response.thinking,
                "has_tool_calls": tool_count > 0,
                "tool_count": tool_count,
                "input_tokens": response.usage.map_or(0, |u| u.input_tokens),
                "output_tokens": response.usage.map_or(0, |u| u.output_tokens),
            }),
        ));

        state.messages.push(Message::assistant_with_tool_calls(
            response.content.clone(),
            response.thinking.clone(),
            response.tool_calls.clone(),
        ));

        let Some(tool_calls) = response.tool_calls.filter(|calls| !calls.is_empty()) else {
            return Ok(StepResult {
                completed: true,
                content: response.content,
                ..StepResult::default()
            });
        };

        // A user-input call pauses the run before any tool in the batch
        // executes.
        for call in &tool_calls {
            if call.name() == TOOL_GET_USER_INPUT {
                return self.pause_for_user_input(state, call).await;
            }
        }

        let calls_data: Vec<(String, String, Value)> = tool_calls
            .iter()
            .map(|tc| (tc.id.clone(), tc.name().to_owned(), tc.arguments().clone()))
            .collect();

        for (call_id, name, args) in &calls_data {
            self.events.emit(&AgentEvent::new(
                EventType::ToolStart,
                state.current_step,
                json!({ "tool": name, "arguments": args, "tool_call_id": call_id }),
            ));
        }

        let results = self.executor.execute_batch(&calls_data).await;

        for exec_result in &results {
            self.events.emit(&AgentEvent::new(
                EventType::ToolEnd,
                state.current_step,
                json!({
                    "tool": exec_result.tool_name,
                    "tool_call_id": exec_result.tool_call_id,
                    "arguments": exec_result.arguments,
                    "success": exec_result.result.success,
                    "content": exec_result.result.success.then(|| exec_result.result.content.clone()).flatten(),
                    "error": (!exec_result.result.success).then(|| exec_result.result.error.clone()).flatten(),
                    "execution_time": exec_result.execution_time,
                }),
            ));

            state.messages.push(Message::tool(
                &exec_result.tool_call_id,
                &exec_result.tool_name,
                tool_message_content(exec_result),
            ));
        }

        self.events.emit(&AgentEvent::new(
            EventType::StepEnd,
            state.current_step,
            json!({ "tools_executed": results.len() }),
        ));

        if let Some(ckpt) = self.checkpoint_config() {
            if ckpt.save_on_tool_execution {
                self.save_checkpoint(state, "tool_execution", Vec::new()).await?;
            }
        }

        Ok(StepResult::default())
    }

    async fn pause_for_user_input(
        &self,
        state: &mut AgentState,
        call: &ToolCall,
    ) -> Result<StepResult> {
        let fields = parse_user_input_fields(call.arguments());
        let context = call
            .arguments()
            .get("context")
            .and_then(Value::as_str)
            .map(str::to_owned);
        let request = UserInputRequest {
            tool_call_id: call.id.clone(),
            fields: fields.clone(),
            context: context.clone(),
        };
        state.mark_waiting_input(request, call.id.clone());

        self.events.emit(&AgentEvent::new(
            EventType::UserInputRequired,
            state.current_step,
            json!({
                "tool_call_id": call.id,
                "fields": fields,
                "context": context,
            }),
        ));

        if let Some(ckpt) = self.checkpoint_config() {
            if ckpt.save_on_user_input {
                self.save_checkpoint(state, "user_input_wait", vec![call.clone()])
                    .await?;
            }
        }

        Ok(StepResult {
            waiting_input: true,
            ..StepResult::default()
        })
    }

    /// Persist a checkpoint and enforce per-thread retention.
    async fn save_checkpoint(
        &self,
        state: &mut AgentState,
        trigger: &str,
        pending_tool_calls: Vec<ToolCall>,
    ) -> Result<Option<String>> {
        let Some(config) = self.checkpoint_config() else {
            return Ok(None);
        };
        let Some(store) = config.store.as_ref() else {
            return Ok(None);
        };

        let thread_id = state
            .thread_id
            .get_or_insert_with(|| Uuid::new_v4().to_string())
            .clone();

        let checkpoint = Checkpoint::new(
            self.agent_id.clone(),
            thread_id.clone(),
            state.current_step,
            state.status,
            state.messages.clone(),
            pending_tool_calls,
            UsageTotals {
                input: state.total_input_tokens,
                output: state.total_output_tokens,
            },
            json!({ "trigger": trigger }),
            state.last_checkpoint_id.clone(),
        );

        store.save(&checkpoint).await?;
        debug!(checkpoint = %checkpoint.id, thread = %thread_id, trigger, "Checkpoint saved");
        state.last_checkpoint_id = Some(checkpoint.id.clone());

        let max = config.max_checkpoints_per_thread;
        if max > 0 {
            let existing = store.list(&thread_id, max + 10).await?;
            if existing.len() > max {
                for old in &existing[max..] {
                    store.delete(&old.id).await?;
                }
            }
        }

        Ok(Some(checkpoint.id))
    }

    /// Append the synthetic tool reply for a waiting-input pause and run
    /// forward.
    pub async fn resume_from_input(
        &self,
        state: &mut AgentState,
        user_response: &HashMap<String, Value>,
        metadata: Option<&Value>,
    ) -> Result<String> {
        let Some(tool_call_id) = state
            .is_waiting_input()
            .then(|| state.paused_tool_call_id.clone())
            .flatten()
        else {
            return Ok("Agent is not waiting for user input".to_owned());
        };

        let mut names: Vec<&String> = user_response.keys().collect();
        names.sort();
        let payload: Vec<Value> = names
            .iter()
            .map(|name| json!({ "name": name, "value": user_response[*name] }))
            .collect();

        state.messages.push(Message::tool(
            tool_call_id,
            TOOL_GET_USER_INPUT,
            serde_json::to_string(&payload)?,
        ));
        state.resume_from_input();

        self.continue_run(state, metadata).await
    }

    /// Reconstruct a state from a checkpoint and run it forward.
    ///
    /// Loads by checkpoint id when given, otherwise the newest checkpoint
    /// of `thread_id`.
    pub async fn resume_from_checkpoint(
        &self,
        checkpoint_id: Option<&str>,
        thread_id: Option<&str>,
        metadata: Option<&Value>,
    ) -> Result<(AgentState, String)> {
        let config = self
            .checkpoint_config()
            .ok_or_else(|| AgentError::checkpoint("checkpointing is not enabled"))?;
        let store = config
            .store
            .as_ref()
            .ok_or_else(|| AgentError::checkpoint("no checkpoint store configured"))?;

        let checkpoint = match (checkpoint_id, thread_id) {
            (Some(id), _) => store.load(id).await?,
            (None, Some(thread)) => store.load_latest(thread).await?,
            (None, None) => None,
        };
        let Some(checkpoint) = checkpoint else {
            return Err(AgentError::checkpoint(format!(
                "Checkpoint not found: checkpoint_id={checkpoint_id:?}, thread_id={thread_id:?}"
            )));
        };

        info!(
            checkpoint = %checkpoint.id,
            thread = %checkpoint.thread_id,
            step = checkpoint.step,
            "Resuming from checkpoint",
        );
        let mut state = AgentState::from_checkpoint(&checkpoint, self.config.max_steps);
        state.resume_from_checkpoint();

        let result = self.continue_run(&mut state, metadata).await?;
        Ok((state, result))
    }

    /// Streaming run: the same state machine, surfaced as an event stream.
    ///
    /// Deltas are accumulated into the assistant message exactly as the
    /// non-streaming path would have produced it; tool execution and
    /// completion behave identically. Stream items are `Err` only for
    /// checkpoint storage failures.
    pub fn run_stream<'a>(
        &'a self,
        state: &'a mut AgentState,
        metadata: Option<Value>,
    ) -> RunEventStream<'a> {
        Box::pin(async_stream::stream! {
            state.reset_for_run(false);
            state.max_steps = self.config.max_steps;
            self.hooks.trigger_before_run(state).await;

            while state.current_step < self.config.max_steps {
                state.increment_step();
                debug!(agent = %self.agent_id, step = state.current_step, "Starting streamed step");

                let current_tokens = self.tokens.estimate_tokens(&state.messages);
                state.messages = self
                    .tokens
                    .maybe_summarize(std::mem::take(&mut state.messages))
                    .await;

                yield Ok(RunStreamEvent::Step {
                    step: state.current_step,
                    max_steps: self.config.max_steps,
                    tokens: current_tokens,
                    token_limit: self.tokens.token_limit(),
                });

                let mut thinking_buffer = String::new();
                let mut content_buffer = String::new();
                let mut calls_buffer: Vec<ToolCall> = Vec::new();

                let schemas =
                    (!self.tool_schemas.is_empty()).then_some(self.tool_schemas.as_slice());
                let mut llm_events = match self
                    .llm
                    .generate_stream(&state.messages, schemas, metadata.as_ref())
                    .await
                {
                    Ok(events) => events,
                    Err(err) => {
                        let message = llm_error_message(&err);
                        state.mark_error(&message);
                        yield Ok(RunStreamEvent::Error { message: message.clone(), reason: None });
                        self.hooks.trigger_after_run(state, &message, false).await;
                        return;
                    }
                };

                let mut stream_failed = false;
                while let Some(event) = llm_events.next().await {
                    match event {
                        Ok(LlmStreamEvent::ThinkingDelta { delta }) => {
                            thinking_buffer.push_str(&delta);
                            yield Ok(RunStreamEvent::Thinking { delta });
                        }
                        Ok(LlmStreamEvent::ContentDelta { delta }) => {
                            content_buffer.push_str(&delta);
                            yield Ok(RunStreamEvent::Content { delta });
                        }
                        Ok(LlmStreamEvent::ToolUse { tool_call }) => {
                            yield Ok(RunStreamEvent::ToolCall {
                                tool: tool_call.name().to_owned(),
                                arguments: tool_call.arguments().clone(),
                            });
                            calls_buffer.push(tool_call);
                        }
                        Ok(LlmStreamEvent::Done { response }) => {
                            if let Some(usage) = response.usage {
                                state.add_tokens(usage.input_tokens, usage.output_tokens);
                            }
                            break;
                        }
                        Err(err) => {
                            let message = llm_error_message(&err);
                            state.mark_error(&message);
                            yield Ok(RunStreamEvent::Error { message: message.clone(), reason: None });
                            self.hooks.trigger_after_run(state, &message, false).await;
                            stream_failed = true;
                            break;
                        }
                    }
                }
                if stream_failed {
                    return;
                }

                state.messages.push(Message::assistant_with_tool_calls(
                    content_buffer.clone(),
                    (!thinking_buffer.is_empty()).then(|| thinking_buffer.clone()),
                    (!calls_buffer.is_empty()).then(|| calls_buffer.clone()),
                ));

                if calls_buffer.is_empty() {
                    state.mark_completed();
                    yield Ok(RunStreamEvent::Done {
                        message: content_buffer.clone(),
                        steps: state.current_step,
                        reason: "completed".to_owned(),
                    });
                    self.hooks.trigger_after_run(state, &content_buffer, true).await;
                    return;
                }

                let mut paused = false;
                for call in &calls_buffer {
                    if call.name() == TOOL_GET_USER_INPUT {
                        let fields = parse_user_input_fields(call.arguments());
                        let context = call
                            .arguments()
                            .get("context")
                            .and_then(Value::as_str)
                            .map(str::to_owned);
                        let request = UserInputRequest {
                            tool_call_id: call.id.clone(),
                            fields,
                            context,
                        };
                        state.mark_waiting_input(request.clone(), call.id.clone());
                        yield Ok(RunStreamEvent::UserInputRequired { request });

                        if let Some(ckpt) = self.checkpoint_config() {
                            if ckpt.save_on_user_input {
                                if let Err(err) = self
                                    .save_checkpoint(state, "user_input_wait", vec![call.clone()])
                                    .await
                                {
                                    yield Err(err);
                                    return;
                                }
                            }
                        }

                        self.hooks
                            .trigger_after_run(state, WAITING_FOR_USER_INPUT, true)
                            .await;
                        paused = true;
                        break;
                    }
                }
                if paused {
                    return;
                }

                let calls_data: Vec<(String, String, Value)> = calls_buffer
                    .iter()
                    .map(|tc| (tc.id.clone(), tc.name().to_owned(), tc.arguments().clone()))
                    .collect();
                let results = self.executor.execute_batch(&calls_data).await;

                for exec_result in &results {
                    yield Ok(RunStreamEvent::ToolResult {
                        tool: exec_result.tool_name.clone(),
                        success: exec_result.result.success,
                        content: exec_result.result.content.clone(),
                        error: exec_result.result.error.clone(),
                        execution_time: exec_result.execution_time,
                    });

                    state.messages.push(Message::tool(
                        &exec_result.tool_call_id,
                        &exec_result.tool_name,
                        tool_message_content(exec_result),
                    ));
                }

                if let Some(ckpt) = self.checkpoint_config() {
                    if ckpt.save_on_tool_execution {
                        if let Err(err) =
                            self.save_checkpoint(state, "tool_execution", Vec::new()).await
                        {
                            yield Err(err);
                            return;
                        }
                    }
                }
            }

            let message =
                AgentError::max_steps(state.current_step, self.config.max_steps).to_string();
            state.mark_error(&message);
            yield Ok(RunStreamEvent::Error {
                message: message.clone(),
                reason: Some("max_steps_reached".to_owned()),
            });
            self.hooks.trigger_after_run(state, &message, false).await;
        })
    }
}

impl std::fmt::Debug for AgentLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentLoop")
            .field("agent_id", &self.agent_id)
            .field("config", &self.config)
            .field("tools", &self.tool_schemas.len())
            .finish()
    }
}

/// The transcript content of a tool reply: the result content on success,
/// `"Error: <error>"` on failure.
fn tool_message_content(exec_result: &super::executor::ToolExecutionResult) -> String {
    if exec_result.result.success {
        exec_result.result.content.clone().unwrap_or_default()
    } else {
        format!(
            "Error: {}",
            exec_result.result.error.clone().unwrap_or_default()
        )
    }
}

/// Format an LLM failure with the user-visible prefix, without doubling it
/// when the error already is an LLM error.
fn llm_error_message(error: &AgentError) -> String {
    match error {
        AgentError::Llm { .. } => error.to_string(),
        other => format!("LLM call failed: {other}"),
    }
}
