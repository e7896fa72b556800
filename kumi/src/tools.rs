//! Built-in tools with loop-level semantics.
//!
//! The step loop, the Ralph loop, and the team orchestrator recognize a
//! handful of tool names and alter control flow when they appear; the
//! `TOOL_*` constants below are those reserved names. Re-using them for
//! arbitrary tools will change loop behaviour.

mod ralph;
mod skill;
mod spawn;
mod user_input;

pub use ralph::{
    GetCachedResultTool, GetWorkingMemoryTool, SignalCompletionTool, UpdateWorkingMemoryTool,
};
pub use skill::GetSkillTool;
pub use spawn::SpawnAgentTool;
pub use user_input::{GetUserInputTool, parse_user_input_fields};

/// Pauses the run and requests structured input from the human.
pub const TOOL_GET_USER_INPUT: &str = "get_user_input";

/// Resolves a named skill to its full content (progressive disclosure).
pub const TOOL_GET_SKILL: &str = "get_skill";

/// Spawns a depth-bounded sub-agent.
pub const TOOL_SPAWN_AGENT: &str = "spawn_agent";

/// Retrieves the full content of a summarized tool result (Ralph mode).
pub const TOOL_GET_CACHED_RESULT: &str = "get_cached_result";

/// Records progress/findings/todos/decisions/errors (Ralph mode).
pub const TOOL_UPDATE_WORKING_MEMORY: &str = "update_working_memory";

/// Reads back the working-memory summary (Ralph mode).
pub const TOOL_GET_WORKING_MEMORY: &str = "get_working_memory";

/// Signals Ralph-loop completion via the promise tag.
pub const TOOL_SIGNAL_COMPLETION: &str = "signal_completion";

/// Team leader tool: delegate one task to one member.
pub const TOOL_DELEGATE_TASK: &str = "delegate_task_to_member";

/// Team leader tool: broadcast one task to every member.
pub const TOOL_DELEGATE_ALL: &str = "delegate_task_to_all_members";
