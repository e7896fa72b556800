#![cfg_attr(docsrs, feature(doc_cfg))]
//! Kumi is an LLM agent runtime: an event-driven step loop over durable
//! conversation state, with tool execution, token management,
//! checkpointing, multi-agent teams, the Ralph iterative completion loop,
//! and a graph workflow engine.
//!
//! # Architecture
//!
//! The crate is organized in dependency order, leaves first:
//!
//! - [`message`], [`usage`]: the canonical conversation model and token
//!   counters
//! - [`tool`], [`llm`]: the capabilities the runtime consumes — tools are
//!   named callables with JSON-Schema interfaces, LLM clients produce
//!   complete or streamed responses
//! - [`agent`]: the execution core — [`AgentState`](agent::AgentState),
//!   the [`EventEmitter`](agent::EventEmitter), the
//!   [`ToolExecutor`](agent::ToolExecutor), the
//!   [`TokenManager`](agent::TokenManager), the step loop, and the
//!   [`Agent`](agent::Agent) facade
//! - [`checkpoint`], [`session`]: storage capabilities with built-in
//!   in-memory and filesystem backends
//! - [`skills`], [`tools`]: progressive-disclosure skills and the
//!   reserved-name tools (`get_user_input`, `get_skill`, `spawn_agent`,
//!   the Ralph tool set)
//! - [`team`]: Leader/Member orchestration — targeted delegation,
//!   broadcast, and dependency-DAG execution
//! - [`ralph`]: the iterative completion loop with its tool-result cache,
//!   working memory, and completion detector
//! - [`graph`]: the state-graph workflow engine with agent and tool node
//!   adapters
//!
//! # Quick start
//!
//! ```rust,ignore
//! use kumi::prelude::*;
//! use std::sync::Arc;
//!
//! # async fn demo() -> kumi::Result<()> {
//! let llm: SharedLlmClient = Arc::new(MockLlm::with_texts(["done"]));
//! let mut agent = Agent::new(llm, AgentConfig::default(), vec![])?;
//! agent.add_user_message("say done");
//! let (text, logs) = agent.run().await?;
//! assert_eq!(text, "done");
//! assert!(logs.steps() >= 1);
//! # Ok(())
//! # }
//! ```

pub mod agent;
pub mod checkpoint;
pub mod error;
pub mod graph;
pub mod llm;
pub mod message;
pub mod prelude;
pub mod ralph;
pub mod session;
pub mod skills;
pub mod team;
pub mod tool;
pub mod tools;
pub mod usage;

pub use agent::{
    Agent, AgentConfig, AgentEvent, AgentHook, AgentLoop, AgentState, AgentStatus, EventEmitter,
    EventType, ExecutionLog, HookManager, RunStreamEvent, SystemPromptBuilder, SystemPromptConfig,
    TokenManager, ToolExecutor, WAITING_FOR_USER_INPUT,
};
pub use checkpoint::{
    Checkpoint, CheckpointConfig, CheckpointStore, FileCheckpointStore, InMemoryCheckpointStore,
    SharedCheckpointStore, UsageTotals,
};
pub use error::{AgentError, Result};
pub use graph::{
    AgentNode, CompilationError, CompiledGraph, END, GraphConfig, GraphEvent, GraphState, START,
    StateGraph, ToolNode,
};
pub use llm::{LlmClient, LlmEventStream, LlmResponse, LlmStreamEvent, MockLlm, SharedLlmClient};
pub use message::{
    Content, FunctionCall, Message, Role, ToolCall, UserInputField, UserInputRequest,
    UserInputResponse,
};
pub use ralph::{
    CompletionCondition, CompletionDetector, CompletionResult, RalphConfig, RalphLoop,
    RalphRunResult, RalphState, ToolResultCache, WorkingMemory,
};
pub use session::{InMemorySessionStore, SessionStore, SharedSessionStore};
pub use skills::{Skill, SkillLoader};
pub use team::{
    DependencyRunResponse, MemberRunResult, RunRecord, TaskStatus, TaskWithDependencies, Team,
    TeamConfig, TeamMemberConfig, TeamRunOptions, TeamRunResponse, TeamSessionManager,
};
pub use tool::{SharedTool, Tool, ToolResult, validate_arguments};
pub use tools::{GetSkillTool, GetUserInputTool, SpawnAgentTool};
pub use usage::TokenUsage;
