//! Checkpointing: durable snapshots of agent execution state.
//!
//! A [`Checkpoint`] is an append-only snapshot keyed by `(agent, thread)`;
//! it is never mutated after creation, and resumed runs parent their new
//! checkpoints on the prior one. The [`CheckpointStore`] capability has two
//! built-in implementations:
//! - [`InMemoryCheckpointStore`] for tests and ephemeral runs
//! - [`FileCheckpointStore`] with the `<base>/<thread_id>/<checkpoint_id>.json`
//!   layout

mod file;
mod in_memory;

pub use file::FileCheckpointStore;
pub use in_memory::InMemoryCheckpointStore;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::agent::AgentStatus;
use crate::error::Result;
use crate::message::{Message, ToolCall};

/// Input/output token totals carried by a checkpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageTotals {
    /// Total input tokens at snapshot time.
    #[serde(default)]
    pub input: u64,
    /// Total output tokens at snapshot time.
    #[serde(default)]
    pub output: u64,
}

/// A persisted snapshot of an agent's execution state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Checkpoint id (`ckpt_` prefixed).
    pub id: String,
    /// Owning agent id.
    pub agent_id: String,
    /// Thread grouping a linear sequence of snapshots.
    pub thread_id: String,
    /// Step number at snapshot time.
    pub step: usize,
    /// Agent status at snapshot time.
    pub status: AgentStatus,
    /// Full message transcript.
    pub messages: Vec<Message>,
    /// Tool calls that were pending when the snapshot was taken.
    #[serde(default)]
    pub pending_tool_calls: Vec<ToolCall>,
    /// Token totals at snapshot time.
    #[serde(default)]
    pub token_usage: UsageTotals,
    /// Arbitrary metadata (e.g. the save trigger).
    #[serde(default)]
    pub metadata: Value,
    /// Creation time, ISO-8601.
    pub created_at: DateTime<Utc>,
    /// Prior checkpoint in the thread, when resuming.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
}

impl Checkpoint {
    /// Create a new checkpoint with a fresh id and the current timestamp.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        agent_id: impl Into<String>,
        thread_id: impl Into<String>,
        step: usize,
        status: AgentStatus,
        messages: Vec<Message>,
        pending_tool_calls: Vec<ToolCall>,
        token_usage: UsageTotals,
        metadata: Value,
        parent_id: Option<String>,
    ) -> Self {
        Self {
            id: format!("ckpt_{}", &Uuid::new_v4().simple().to_string()[..12]),
            agent_id: agent_id.into(),
            thread_id: thread_id.into(),
            step,
            status,
            messages,
            pending_tool_calls,
            token_usage,
            metadata,
            created_at: Utc::now(),
            parent_id,
        }
    }
}

/// Storage capability for checkpoints.
///
/// Implementations must be safe for concurrent save/load; per-thread writes
/// serialize on the underlying storage.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Persist a checkpoint.
    async fn save(&self, checkpoint: &Checkpoint) -> Result<()>;

    /// Load a checkpoint by id.
    async fn load(&self, checkpoint_id: &str) -> Result<Option<Checkpoint>>;

    /// Load the newest checkpoint of a thread.
    async fn load_latest(&self, thread_id: &str) -> Result<Option<Checkpoint>>;

    /// List a thread's checkpoints, newest first, up to `limit`.
    async fn list(&self, thread_id: &str, limit: usize) -> Result<Vec<Checkpoint>>;

    /// Delete a checkpoint by id. Returns whether it existed.
    async fn delete(&self, checkpoint_id: &str) -> Result<bool>;

    /// Delete every checkpoint of a thread. Returns the count removed.
    async fn delete_thread(&self, thread_id: &str) -> Result<usize>;
}

/// Type alias for an Arc-wrapped checkpoint store.
pub type SharedCheckpointStore = Arc<dyn CheckpointStore>;

/// Checkpointing configuration for the step loop.
#[derive(Clone)]
pub struct CheckpointConfig {
    /// Master switch.
    pub enabled: bool,
    /// The backing store. Checkpointing is inert without one.
    pub store: Option<SharedCheckpointStore>,
    /// Save a checkpoint after each tool-execution step.
    pub save_on_tool_execution: bool,
    /// Save a checkpoint when pausing for user input.
    pub save_on_user_input: bool,
    /// Retention bound per thread; surplus oldest checkpoints are dropped
    /// after each save. Zero disables retention.
    pub max_checkpoints_per_thread: usize,
}

impl CheckpointConfig {
    /// Create a config with the given store and default policy.
    #[must_use]
    pub fn new(store: SharedCheckpointStore) -> Self {
        Self {
            store: Some(store),
            ..Self::default()
        }
    }

    /// Set the per-thread retention bound.
    #[must_use]
    pub const fn with_max_checkpoints(mut self, max: usize) -> Self {
        self.max_checkpoints_per_thread = max;
        self
    }

    /// Whether checkpointing is actually active.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.enabled && self.store.is_some()
    }
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            store: None,
            save_on_tool_execution: true,
            save_on_user_input: true,
            max_checkpoints_per_thread: 50,
        }
    }
}

impl std::fmt::Debug for CheckpointConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckpointConfig")
            .field("enabled", &self.enabled)
            .field("has_store", &self.store.is_some())
            .field("save_on_tool_execution", &self.save_on_tool_execution)
            .field("save_on_user_input", &self.save_on_user_input)
            .field("max_checkpoints_per_thread", &self.max_checkpoints_per_thread)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checkpoint_ids_are_prefixed_and_unique() {
        let a = Checkpoint::new(
            "agent",
            "thread",
            1,
            AgentStatus::Running,
            Vec::new(),
            Vec::new(),
            UsageTotals::default(),
            Value::Null,
            None,
        );
        let b = Checkpoint::new(
            "agent",
            "thread",
            1,
            AgentStatus::Running,
            Vec::new(),
            Vec::new(),
            UsageTotals::default(),
            Value::Null,
            None,
        );
        assert!(a.id.starts_with("ckpt_"));
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn serde_roundtrip_preserves_core_fields() {
        let checkpoint = Checkpoint::new(
            "agent",
            "thread",
            3,
            AgentStatus::WaitingInput,
            vec![Message::system("s"), Message::user("u")],
            vec![ToolCall::new("c1", "echo", serde_json::json!({}))],
            UsageTotals { input: 10, output: 4 },
            serde_json::json!({"trigger": "user_input_wait"}),
            Some("ckpt_parent".into()),
        );

        let json = serde_json::to_string(&checkpoint).unwrap();
        let parsed: Checkpoint = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.id, checkpoint.id);
        assert_eq!(parsed.step, 3);
        assert_eq!(parsed.status, AgentStatus::WaitingInput);
        assert_eq!(parsed.messages.len(), 2);
        assert_eq!(parsed.pending_tool_calls.len(), 1);
        assert_eq!(parsed.token_usage.input, 10);
        assert_eq!(parsed.parent_id.as_deref(), Some("ckpt_parent"));
    }

    #[test]
    fn config_is_inactive_without_store() {
        let config = CheckpointConfig::default();
        assert!(!config.is_active());
    }
}
