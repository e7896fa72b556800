//! The Ralph loop: iterative completion over a fresh agent per iteration.
//!
//! Ralph re-runs the same task until a completion condition fires, letting
//! the agent see its own prior work through three channels:
//! - [`ToolResultCache`]: full tool outputs cached behind summaries,
//!   recoverable via the `get_cached_result` tool
//! - [`WorkingMemory`]: categorized notes persisted to
//!   `<workspace>/.ralph/memory.json` on every mutation
//! - [`ContextManager`]: the per-iteration context prefix (memory block,
//!   recent iteration summaries, recent tool summaries)
//!
//! Completion fires on a `<promise>` tag, the iteration bound, or an idle
//! streak of identical file-modification sets.

mod cache;
mod context;
mod detector;
mod memory;

pub use cache::{CachedToolResult, ToolResultCache};
pub use context::ContextManager;
pub use detector::CompletionDetector;
pub use memory::{MemoryCategory, MemoryEntry, WorkingMemory};

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, info};

use crate::agent::{Agent, AgentConfig};
use crate::error::Result;
use crate::llm::SharedLlmClient;
use crate::tool::SharedTool;
use crate::tools::{
    GetCachedResultTool, GetWorkingMemoryTool, SignalCompletionTool, UpdateWorkingMemoryTool,
};

/// Completion detection conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionCondition {
    /// The content carries the configured promise inside a `<promise>` tag.
    PromiseTag,
    /// The iteration bound was reached.
    MaxIterations,
    /// The file-modification set was unchanged for the idle streak.
    IdleThreshold,
}

/// Result of a completion check.
#[derive(Debug, Clone)]
pub struct CompletionResult {
    /// Whether a condition fired.
    pub completed: bool,
    /// The condition that fired.
    pub reason: Option<CompletionCondition>,
    /// Human-readable detail.
    pub message: String,
}

impl CompletionResult {
    /// A negative result.
    #[must_use]
    pub const fn not_completed() -> Self {
        Self {
            completed: false,
            reason: None,
            message: String::new(),
        }
    }
}

/// Ralph configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RalphConfig {
    /// Iteration bound.
    pub max_iterations: usize,
    /// Promise text expected inside the `<promise>` tag.
    pub completion_promise: String,
    /// Consecutive identical file-set iterations before idle completion.
    pub idle_threshold: usize,
    /// Enabled completion conditions.
    pub completion_conditions: Vec<CompletionCondition>,
    /// Working-memory directory, relative to the workspace.
    pub memory_dir: String,
}

impl Default for RalphConfig {
    fn default() -> Self {
        Self {
            max_iterations: 20,
            completion_promise: "TASK COMPLETE".to_owned(),
            idle_threshold: 3,
            completion_conditions: vec![
                CompletionCondition::PromiseTag,
                CompletionCondition::MaxIterations,
                CompletionCondition::IdleThreshold,
            ],
            memory_dir: ".ralph".to_owned(),
        }
    }
}

impl RalphConfig {
    /// Set the iteration bound.
    #[must_use]
    pub const fn with_max_iterations(mut self, max: usize) -> Self {
        self.max_iterations = max;
        self
    }

    /// Set the idle threshold.
    #[must_use]
    pub const fn with_idle_threshold(mut self, threshold: usize) -> Self {
        self.idle_threshold = threshold;
        self
    }

    /// Set the promise text.
    #[must_use]
    pub fn with_completion_promise(mut self, promise: impl Into<String>) -> Self {
        self.completion_promise = promise.into();
        self
    }

    /// Set the enabled conditions.
    #[must_use]
    pub fn with_conditions(mut self, conditions: Vec<CompletionCondition>) -> Self {
        self.completion_conditions = conditions;
        self
    }
}

/// Runtime state of one Ralph run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RalphState {
    /// Current iteration number.
    pub iteration: usize,
    /// Whether a completion condition fired.
    pub completed: bool,
    /// The condition that fired, as a string.
    pub completion_reason: Option<CompletionCondition>,
    /// Agent steps accumulated across iterations.
    pub total_steps: usize,
    /// Files modified across the whole run.
    pub files_modified: BTreeSet<String>,
}

/// Result of a full Ralph run.
#[derive(Debug, Clone)]
pub struct RalphRunResult {
    /// Whether a completion condition fired (always true at return).
    pub completed: bool,
    /// The condition that ended the loop.
    pub reason: Option<CompletionCondition>,
    /// Iterations executed.
    pub iterations: usize,
    /// Agent steps accumulated across iterations.
    pub total_steps: usize,
    /// The final iteration's assistant text.
    pub final_response: String,
}

/// The iterative completion controller.
pub struct RalphLoop {
    config: RalphConfig,
    workspace: PathBuf,
    cache: Arc<Mutex<ToolResultCache>>,
    memory: Arc<Mutex<WorkingMemory>>,
    context: ContextManager,
    detector: CompletionDetector,
    state: RalphState,
}

impl RalphLoop {
    /// Create a loop over a workspace. Working memory persisted by an
    /// earlier run in the same workspace is loaded back.
    #[must_use]
    pub fn new(config: RalphConfig, workspace: impl Into<PathBuf>) -> Self {
        let workspace = workspace.into();
        let cache = Arc::new(Mutex::new(ToolResultCache::default()));
        let memory = Arc::new(Mutex::new(WorkingMemory::new(
            workspace.clone(),
            &config.memory_dir,
        )));
        let context = ContextManager::new(cache.clone(), memory.clone());
        let detector = CompletionDetector::new(config.clone());
        Self {
            config,
            workspace,
            cache,
            memory,
            context,
            detector,
            state: RalphState::default(),
        }
    }

    /// Attach an LLM used for tool-result and iteration summaries.
    #[must_use]
    pub fn with_summarizer(mut self, llm: SharedLlmClient) -> Self {
        self.context = self.context.with_summarizer(llm);
        self
    }

    /// The configuration.
    #[must_use]
    pub const fn config(&self) -> &RalphConfig {
        &self.config
    }

    /// The run state.
    #[must_use]
    pub const fn state(&self) -> &RalphState {
        &self.state
    }

    /// Shared handle to the working memory.
    #[must_use]
    pub fn working_memory(&self) -> Arc<Mutex<WorkingMemory>> {
        self.memory.clone()
    }

    /// Shared handle to the tool-result cache.
    #[must_use]
    pub fn tool_cache(&self) -> Arc<Mutex<ToolResultCache>> {
        self.cache.clone()
    }

    /// Begin a new iteration: bump the counter and clear the iteration's
    /// file-modification set.
    pub fn start_iteration(&mut self) -> Result<usize> {
        let mut memory = self.memory.lock().expect("memory lock poisoned");
        let iteration = memory.increment_iteration()?;
        memory.clear_iteration_files()?;
        self.state.iteration = iteration;
        Ok(iteration)
    }

    /// Record a file modification for idle detection.
    pub fn record_file_modified(&mut self, path: &str) -> Result<()> {
        self.memory
            .lock()
            .expect("memory lock poisoned")
            .record_file_modified(path)?;
        self.state.files_modified.insert(path.to_owned());
        Ok(())
    }

    /// Cache one tool result and return the summary the agent should see.
    ///
    /// Write/edit tools have their `file_path`/`path` argument recorded as
    /// a modification.
    pub async fn process_tool_result(
        &mut self,
        tool_call_id: &str,
        tool_name: &str,
        arguments: &Value,
        content: &str,
    ) -> Result<String> {
        if matches!(tool_name, "write_file" | "edit_file") {
            let path = arguments
                .get("file_path")
                .or_else(|| arguments.get("path"))
                .and_then(Value::as_str);
            if let Some(path) = path {
                self.record_file_modified(path)?;
            }
        }

        Ok(self
            .context
            .process_tool_result(
                tool_call_id,
                tool_name,
                arguments.clone(),
                content,
                self.state.iteration,
            )
            .await)
    }

    /// Run the completion detector against content from this iteration.
    pub fn check_completion(&mut self, content: &str) -> CompletionResult {
        let files = self
            .memory
            .lock()
            .expect("memory lock poisoned")
            .files_modified();
        let result = self
            .detector
            .check(content, self.state.iteration, &files);
        if result.completed {
            self.state.completed = true;
            self.state.completion_reason = result.reason;
        }
        result
    }

    /// The context prefix injected into the next iteration.
    #[must_use]
    pub fn context_prefix(&self) -> String {
        self.context.build_context_prefix()
    }

    /// Summarize and record the finished iteration.
    pub async fn summarize_iteration(&mut self, messages_content: &str) -> String {
        self.context
            .summarize_iteration(self.state.iteration, messages_content)
            .await
    }

    /// Reset state, detector, context, and persisted memory.
    pub fn reset(&mut self) -> Result<()> {
        self.state = RalphState::default();
        self.detector.reset();
        self.context.clear();
        self.memory.lock().expect("memory lock poisoned").clear()?;
        Ok(())
    }

    /// Status snapshot for observers.
    #[must_use]
    pub fn status(&self) -> Value {
        json!({
            "state": self.state,
            "memory_summary": self.memory.lock().expect("memory lock poisoned").summary(),
            "config": self.config,
        })
    }

    /// Drive the loop: one fresh agent run per iteration until a
    /// completion condition fires.
    ///
    /// Each iteration's agent carries the caller's tools plus the Ralph
    /// tool set (`get_cached_result`, `update_working_memory`,
    /// `get_working_memory`, `signal_completion`), and its user message is
    /// the context prefix followed by the unchanged task.
    pub async fn run(
        &mut self,
        llm: SharedLlmClient,
        tools: Vec<SharedTool>,
        task: &str,
    ) -> Result<RalphRunResult> {
        loop {
            let iteration = self.start_iteration()?;
            info!(iteration, max = self.config.max_iterations, "Ralph iteration starting");

            let prefix = self.context_prefix();

            let mut iteration_tools = tools.clone();
            iteration_tools.push(Arc::new(GetCachedResultTool::new(self.cache.clone())));
            iteration_tools.push(Arc::new(UpdateWorkingMemoryTool::new(self.memory.clone())));
            iteration_tools.push(Arc::new(GetWorkingMemoryTool::new(self.memory.clone())));
            iteration_tools.push(Arc::new(SignalCompletionTool));

            let agent_config = AgentConfig::default()
                .with_name(format!("ralph_iteration_{iteration}"))
                .with_workspace_dir(self.workspace.clone());
            let mut agent = Agent::new(llm.clone(), agent_config, iteration_tools)?;

            let message = if prefix.is_empty() {
                task.to_owned()
            } else {
                format!("{prefix}\n\n## Task\n{task}")
            };
            agent.add_user_message(message);

            let (response, logs) = agent.run().await?;
            self.state.total_steps += logs.steps();

            // Intercept every tool result from the run: cache it, track
            // file modifications, and keep only the summary in context.
            let mut checked_content = response.clone();
            for entry in logs.entries() {
                if entry["type"] != "tool_result" {
                    continue;
                }
                let tool_call_id = entry["tool_call_id"].as_str().unwrap_or_default();
                let tool_name = entry["tool"].as_str().unwrap_or_default();
                let arguments = entry.get("arguments").cloned().unwrap_or(Value::Null);
                let content = entry["content"].as_str().unwrap_or_default().to_owned();

                self.process_tool_result(tool_call_id, tool_name, &arguments, &content)
                    .await?;

                // Completion promises may arrive through a tool reply
                // (signal_completion) rather than the assistant text.
                if entry["success"] == true {
                    checked_content.push('\n');
                    checked_content.push_str(&content);
                }
            }

            let completion = self.check_completion(&checked_content);
            self.summarize_iteration(&response).await;

            if completion.completed {
                info!(
                    iteration,
                    reason = ?completion.reason,
                    "Ralph loop completed"
                );
                return Ok(RalphRunResult {
                    completed: true,
                    reason: completion.reason,
                    iterations: iteration,
                    total_steps: self.state.total_steps,
                    final_response: response,
                });
            }

            debug!(iteration, "Ralph iteration finished without completion");

            // Backstop when the configured conditions exclude the
            // iteration bound.
            if iteration >= self.config.max_iterations {
                self.state.completed = true;
                self.state.completion_reason = Some(CompletionCondition::MaxIterations);
                return Ok(RalphRunResult {
                    completed: true,
                    reason: Some(CompletionCondition::MaxIterations),
                    iterations: iteration,
                    total_steps: self.state.total_steps,
                    final_response: response,
                });
            }
        }
    }
}

impl std::fmt::Debug for RalphLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RalphLoop")
            .field("workspace", &self.workspace)
            .field("state", &self.state)
            .finish()
    }
}
