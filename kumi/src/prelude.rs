//! Prelude module for convenient imports.
//!
//! Re-exports the most commonly used types and traits so you can get
//! started with a single `use` statement.
//!
//! ```rust,ignore
//! use kumi::prelude::*;
//!
//! let mut agent = Agent::new(llm, AgentConfig::default(), tools)?;
//! agent.add_user_message("summarize the repo");
//! let (text, logs) = agent.run().await?;
//! ```

pub use crate::agent::{
    Agent, AgentConfig, AgentEvent, AgentHook, AgentState, AgentStatus, EventEmitter, EventType,
    ExecutionLog, HookManager, RunStreamEvent, StepData, SystemPromptConfig,
    WAITING_FOR_USER_INPUT,
};
pub use crate::checkpoint::{
    Checkpoint, CheckpointConfig, CheckpointStore, FileCheckpointStore, InMemoryCheckpointStore,
};
pub use crate::error::{AgentError, Result};
pub use crate::graph::{
    AgentNode, CompiledGraph, END, GraphConfig, GraphEvent, GraphState, START, StateGraph,
    ToolNode, reducers,
};
pub use crate::llm::{LlmClient, LlmResponse, LlmStreamEvent, MockLlm, SharedLlmClient};
pub use crate::message::{Content, Message, Role, ToolCall, UserInputRequest};
pub use crate::ralph::{CompletionCondition, RalphConfig, RalphLoop, RalphRunResult};
pub use crate::session::{InMemorySessionStore, SessionStore};
pub use crate::skills::SkillLoader;
pub use crate::team::{
    TaskStatus, TaskWithDependencies, Team, TeamConfig, TeamMemberConfig, TeamRunOptions,
};
pub use crate::tool::{SharedTool, Tool, ToolResult};
pub use crate::tools::{GetSkillTool, GetUserInputTool, SpawnAgentTool};
pub use crate::usage::TokenUsage;
