//! Agent execution state and its status machine.
//!
//! [`AgentState`] is owned exclusively by one agent; the step loop borrows
//! it for the duration of a run and mutates it in place. Two invariants
//! hold throughout: exactly one message has the system role and it is
//! element 0, and every tool message answers a preceding assistant tool
//! call.

use serde::{Deserialize, Serialize};

use crate::checkpoint::Checkpoint;
use crate::message::{Message, UserInputRequest};

/// Status of an agent run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    /// No run in progress.
    Idle,
    /// A run is executing steps.
    Running,
    /// Paused for human input.
    WaitingInput,
    /// The last run finished with a final answer.
    Completed,
    /// The last run terminated with an error.
    Error,
}

impl AgentStatus {
    /// Get the string representation of the status.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::WaitingInput => "waiting_input",
            Self::Completed => "completed",
            Self::Error => "error",
        }
    }
}

/// Mutable state of one agent: step counter, status, transcript, token
/// totals, pending input, and checkpoint linkage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentState {
    /// Current status.
    pub status: AgentStatus,
    /// Current step number (1-based while running).
    pub current_step: usize,
    /// Step budget for a run.
    pub max_steps: usize,
    /// Total input tokens accumulated. Monotone within a run.
    pub total_input_tokens: u64,
    /// Total output tokens accumulated. Monotone within a run.
    pub total_output_tokens: u64,
    /// Conversation transcript. Element 0 is the system message.
    pub messages: Vec<Message>,
    /// The pending input request, set iff status is `WaitingInput`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_user_input: Option<UserInputRequest>,
    /// Tool call id the run paused on, set iff status is `WaitingInput`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paused_tool_call_id: Option<String>,
    /// Error message, set iff status is `Error`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Id of the last checkpoint saved for this state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_checkpoint_id: Option<String>,
    /// Checkpointing thread this state belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
}

impl AgentState {
    /// Create an idle state with the given step budget.
    #[must_use]
    pub fn new(max_steps: usize) -> Self {
        Self {
            status: AgentStatus::Idle,
            current_step: 0,
            max_steps,
            total_input_tokens: 0,
            total_output_tokens: 0,
            messages: Vec::new(),
            pending_user_input: None,
            paused_tool_call_id: None,
            error_message: None,
            last_checkpoint_id: None,
            thread_id: None,
        }
    }

    /// Reset counters and enter `Running`. Messages are always preserved;
    /// checkpoint linkage is dropped unless `preserve_linkage` is set.
    pub fn reset_for_run(&mut self, preserve_linkage: bool) {
        self.status = AgentStatus::Running;
        self.current_step = 0;
        self.total_input_tokens = 0;
        self.total_output_tokens = 0;
        self.pending_user_input = None;
        self.paused_tool_call_id = None;
        self.error_message = None;
        if !preserve_linkage {
            self.last_checkpoint_id = None;
        }
    }

    /// Advance to the next step and return its number.
    pub const fn increment_step(&mut self) -> usize {
        self.current_step += 1;
        self.current_step
    }

    /// Accumulate token usage into the totals.
    pub const fn add_tokens(&mut self, input_tokens: u64, output_tokens: u64) {
        self.total_input_tokens += input_tokens;
        self.total_output_tokens += output_tokens;
    }

    /// Total tokens accumulated so far.
    #[must_use]
    pub const fn total_tokens(&self) -> u64 {
        self.total_input_tokens + self.total_output_tokens
    }

    /// Enter `WaitingInput` with the pending request.
    pub fn mark_waiting_input(&mut self, request: UserInputRequest, tool_call_id: String) {
        self.status = AgentStatus::WaitingInput;
        self.pending_user_input = Some(request);
        self.paused_tool_call_id = Some(tool_call_id);
    }

    /// Enter `Completed`.
    pub fn mark_completed(&mut self) {
        self.status = AgentStatus::Completed;
        self.pending_user_input = None;
        self.paused_tool_call_id = None;
    }

    /// Enter `Error` with a message.
    pub fn mark_error(&mut self, message: impl Into<String>) {
        self.status = AgentStatus::Error;
        self.error_message = Some(message.into());
    }

    /// Leave `WaitingInput` and resume `Running`. No-op in other states.
    pub fn resume_from_input(&mut self) {
        if self.status == AgentStatus::WaitingInput {
            self.status = AgentStatus::Running;
            self.pending_user_input = None;
            self.paused_tool_call_id = None;
        }
    }

    /// Re-enter `Running` from a terminal or idle state after a checkpoint
    /// restore.
    pub fn resume_from_checkpoint(&mut self) {
        if matches!(
            self.status,
            AgentStatus::Idle | AgentStatus::Completed | AgentStatus::Error
        ) {
            self.status = AgentStatus::Running;
            self.error_message = None;
        }
    }

    /// Whether the loop may enter another step.
    #[must_use]
    pub fn can_continue(&self) -> bool {
        self.status == AgentStatus::Running && self.current_step < self.max_steps
    }

    /// Whether the state is paused on a user-input request.
    #[must_use]
    pub fn is_waiting_input(&self) -> bool {
        self.status == AgentStatus::WaitingInput
    }

    /// Reconstruct a state from a checkpoint snapshot.
    #[must_use]
    pub fn from_checkpoint(checkpoint: &Checkpoint, max_steps: usize) -> Self {
        Self {
            status: checkpoint.status,
            current_step: checkpoint.step,
            max_steps,
            total_input_tokens: checkpoint.token_usage.input,
            total_output_tokens: checkpoint.token_usage.output,
            messages: checkpoint.messages.clone(),
            pending_user_input: None,
            paused_tool_call_id: None,
            error_message: None,
            last_checkpoint_id: Some(checkpoint.id.clone()),
            thread_id: Some(checkpoint.thread_id.clone()),
        }
    }
}
