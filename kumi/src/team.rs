//! Multi-agent teams: a Leader that delegates to Members.
//!
//! Two execution modes:
//! - **Standard** ([`Team::run`]): a Leader agent receives the user task
//!   and delegates through a dynamically built tool, either to one member
//!   by id or broadcast to every member.
//! - **Dependency** ([`Team::run_with_dependencies`]): a DAG of tasks is
//!   topologically layered; each layer fans out concurrently, dependency
//!   results are injected into downstream prompts, and a failure skips
//!   every later layer.
//!
//! Members are transient: each delegation constructs a fresh agent with a
//! role-specific prompt and the member's declared tool subset.

mod dependency;
mod session;

pub use dependency::{DependencyRunResponse, TaskStatus, TaskWithDependencies};
pub use session::{RunRecord, SharedTeamSessionManager, TeamSession, TeamSessionManager};

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use crate::agent::{Agent, AgentConfig};
use crate::error::Result;
use crate::llm::SharedLlmClient;
use crate::tool::{SharedTool, Tool, ToolResult};
use crate::tools::{SpawnAgentTool, TOOL_DELEGATE_ALL, TOOL_DELEGATE_TASK, TOOL_SPAWN_AGENT};

/// Default step budget for transient member agents.
const MEMBER_MAX_STEPS: usize = 10;

/// Configuration of one team member.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamMemberConfig {
    /// Member id, referenced by the delegation tool.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Role; dependency-mode tasks are matched against it.
    pub role: String,
    /// Names of the team tools this member may use.
    #[serde(default)]
    pub tools: Vec<String>,
    /// Role-specific instructions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
}

impl TeamMemberConfig {
    /// Create a member.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        role: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            role: role.into(),
            tools: Vec::new(),
            instructions: None,
        }
    }

    /// Declare the tools this member may use.
    #[must_use]
    pub fn with_tools(mut self, tools: Vec<String>) -> Self {
        self.tools = tools;
        self
    }

    /// Set role-specific instructions.
    #[must_use]
    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }
}

/// Team configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamConfig {
    /// Team name.
    pub name: String,
    /// Team description, shown to the Leader.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// The members.
    #[serde(default)]
    pub members: Vec<TeamMemberConfig>,
    /// Broadcast mode: the Leader's tool sends every task to all members.
    #[serde(default)]
    pub delegate_to_all: bool,
    /// Extra instructions for the Leader.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub leader_instructions: Option<String>,
}

impl TeamConfig {
    /// Create a team config.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            members: Vec::new(),
            delegate_to_all: false,
            leader_instructions: None,
        }
    }

    /// Set the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Add a member.
    #[must_use]
    pub fn with_member(mut self, member: TeamMemberConfig) -> Self {
        self.members.push(member);
        self
    }

    /// Enable broadcast delegation.
    #[must_use]
    pub const fn with_delegate_to_all(mut self, enabled: bool) -> Self {
        self.delegate_to_all = enabled;
        self
    }

    /// Set Leader instructions.
    #[must_use]
    pub fn with_leader_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.leader_instructions = Some(instructions.into());
        self
    }
}

/// Result of one member invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemberRunResult {
    /// Member display name.
    pub member_name: String,
    /// Member role.
    pub member_role: String,
    /// The delegated task.
    pub task: String,
    /// The member's response.
    pub response: String,
    /// Whether the member succeeded.
    pub success: bool,
    /// Error detail when the member failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Steps the member took.
    pub steps: usize,
    /// Token counts and other metadata.
    #[serde(default)]
    pub metadata: Value,
}

/// Response of a standard team run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamRunResponse {
    /// Whether the Leader completed without failure.
    pub success: bool,
    /// Team name.
    pub team_name: String,
    /// The Leader's final message.
    pub message: String,
    /// Every member invocation of this run, in execution order.
    pub member_runs: Vec<MemberRunResult>,
    /// Leader steps plus the sum of member steps.
    pub total_steps: usize,
    /// Number of member invocations.
    pub iterations: usize,
    /// Session, run, and trace identifiers plus token counts.
    #[serde(default)]
    pub metadata: Value,
}

/// Options for a team run.
#[derive(Debug, Clone, Default)]
pub struct TeamRunOptions {
    /// Leader step budget. Zero means the default of 50.
    pub max_steps: usize,
    /// Session id for conversation continuity.
    pub session_id: Option<String>,
    /// User id for session scoping.
    pub user_id: Option<String>,
    /// How many prior runs to inject as history context. Zero means the
    /// default of 3.
    pub num_history_runs: usize,
}

impl TeamRunOptions {
    /// Set the Leader step budget.
    #[must_use]
    pub const fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps;
        self
    }

    /// Attach a session id.
    #[must_use]
    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    const fn effective_max_steps(&self) -> usize {
        if self.max_steps == 0 { 50 } else { self.max_steps }
    }

    const fn effective_history_runs(&self) -> usize {
        if self.num_history_runs == 0 { 3 } else { self.num_history_runs }
    }
}

/// Spawn-agent policy for members.
#[derive(Debug, Clone, Copy)]
struct SpawnSettings {
    enabled: bool,
    max_depth: usize,
    default_max_steps: usize,
    token_limit: usize,
    current_depth: usize,
}

/// Shared machinery for running members, used by the delegation tools and
/// the dependency executor.
pub(crate) struct MemberContext {
    llm: SharedLlmClient,
    members: Vec<TeamMemberConfig>,
    available_tools: Vec<SharedTool>,
    workspace_dir: PathBuf,
    session_manager: SharedTeamSessionManager,
    session_id: Option<String>,
    parent_run_id: Option<String>,
    member_runs: Arc<Mutex<Vec<MemberRunResult>>>,
    spawn: SpawnSettings,
}

impl MemberContext {
    fn find_member(&self, id: &str) -> Option<&TeamMemberConfig> {
        self.members.iter().find(|m| m.id == id)
    }

    pub(crate) fn find_member_by_role(&self, role: &str) -> Option<&TeamMemberConfig> {
        self.members.iter().find(|m| m.role == role)
    }

    fn member_tools(&self, member: &TeamMemberConfig) -> Vec<SharedTool> {
        let mut tools: Vec<SharedTool> = self
            .available_tools
            .iter()
            .filter(|t| member.tools.iter().any(|name| name == t.name()))
            .cloned()
            .collect();

        if self.spawn.enabled
            && member.tools.iter().any(|name| name == TOOL_SPAWN_AGENT)
            && self.spawn.current_depth < self.spawn.max_depth
        {
            let parent_tools: HashMap<String, SharedTool> = tools
                .iter()
                .map(|t| (t.name().to_owned(), t.clone()))
                .collect();
            tools.push(Arc::new(
                SpawnAgentTool::new(
                    self.llm.clone(),
                    parent_tools,
                    self.workspace_dir.clone(),
                    self.spawn.current_depth + 1,
                    self.spawn.max_depth,
                )
                .with_default_max_steps(self.spawn.default_max_steps)
                .with_default_token_limit(self.spawn.token_limit),
            ));
        }

        tools
    }

    /// Run one member on a task and record the result.
    pub(crate) async fn run_member(
        &self,
        member: &TeamMemberConfig,
        task: &str,
    ) -> MemberRunResult {
        info!(member = %member.name, role = %member.role, "Delegating task to member");

        let system_prompt = format!(
            "You are {}, a {}.\n\n{}\n\nFocus on your area of expertise and provide clear, actionable responses.",
            member.name,
            member.role,
            member.instructions.as_deref().unwrap_or_default(),
        );

        let result = match self.execute_member(member, task, system_prompt).await {
            Ok(result) => result,
            Err(error) => {
                warn!(member = %member.name, %error, "Member run failed");
                MemberRunResult {
                    member_name: member.name.clone(),
                    member_role: member.role.clone(),
                    task: task.to_owned(),
                    response: String::new(),
                    success: false,
                    error: Some(error.to_string()),
                    steps: 0,
                    metadata: Value::Null,
                }
            }
        };

        self.member_runs.lock().await.push(result.clone());

        if let Some(session_id) = &self.session_id {
            let mut record = RunRecord::new(
                "member",
                &result.member_name,
                task,
                &result.response,
                result.success,
                result.steps,
            )
            .with_metadata(json!({ "role": result.member_role }));
            if let Some(parent) = &self.parent_run_id {
                record = record.with_parent(parent.clone());
            }
            if let Err(error) = self.session_manager.add_run(session_id, record).await {
                warn!(session = %session_id, %error, "Failed to record member run");
            }
        }

        result
    }

    async fn execute_member(
        &self,
        member: &TeamMemberConfig,
        task: &str,
        system_prompt: String,
    ) -> Result<MemberRunResult> {
        let config = AgentConfig::default()
            .with_name(member.id.clone())
            .with_system_prompt(system_prompt)
            .with_max_steps(MEMBER_MAX_STEPS)
            .with_workspace_dir(self.workspace_dir.clone());
        let mut agent = Agent::new(self.llm.clone(), config, self.member_tools(member))?;

        agent.add_user_message(task);
        let (response, logs) = agent.run().await?;

        let steps = logs.steps();
        let max_steps_reached = logs.max_steps_reached();
        let llm_failed = response.starts_with("LLM call failed");
        let success = !response.is_empty() && !max_steps_reached && !llm_failed;
        let (input_tokens, output_tokens) = logs.final_usage();

        Ok(MemberRunResult {
            member_name: member.name.clone(),
            member_role: member.role.clone(),
            task: task.to_owned(),
            response: response.clone(),
            success,
            error: (!success).then(|| response),
            steps,
            metadata: json!({ "input_tokens": input_tokens, "output_tokens": output_tokens }),
        })
    }
}

/// Leader tool for targeted delegation.
struct DelegateToMemberTool {
    ctx: Arc<MemberContext>,
}

#[async_trait]
impl Tool for DelegateToMemberTool {
    fn name(&self) -> &str {
        TOOL_DELEGATE_TASK
    }

    fn description(&self) -> String {
        "Delegate a task to a specific team member by their ID. Use this to \
         assign work to the team member best suited for the task. Available \
         members and their IDs are listed in the team_members section."
            .to_owned()
    }

    fn parameters(&self) -> Value {
        let ids: Vec<&str> = self.ctx.members.iter().map(|m| m.id.as_str()).collect();
        let roster = self
            .ctx
            .members
            .iter()
            .map(|m| format!("{} ({})", m.id, m.name))
            .collect::<Vec<_>>()
            .join(", ");
        serde_json::json!({
            "type": "object",
            "properties": {
                "member_id": {
                    "type": "string",
                    "enum": ids,
                    "description": format!("ID of the team member to delegate to. Available: {roster}")
                },
                "task": {
                    "type": "string",
                    "description": "Clear description of the task to delegate"
                }
            },
            "required": ["member_id", "task"]
        })
    }

    async fn execute(&self, arguments: Value) -> Result<ToolResult> {
        let member_id = arguments
            .get("member_id")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let task = arguments
            .get("task")
            .and_then(Value::as_str)
            .unwrap_or_default();

        let Some(member) = self.ctx.find_member(member_id) else {
            let ids = self
                .ctx
                .members
                .iter()
                .map(|m| m.id.as_str())
                .collect::<Vec<_>>()
                .join(", ");
            return Ok(ToolResult::ok(format!(
                "Error: Member with ID '{member_id}' not found in team. Available members: {ids}"
            )));
        };
        let member = member.clone();

        let result = self.ctx.run_member(&member, task).await;
        if result.success {
            Ok(ToolResult::ok(format!(
                "{} completed task:\n{}",
                member.name, result.response
            )))
        } else {
            Ok(ToolResult::ok(format!(
                "{} failed: {}",
                member.name,
                result.error.unwrap_or_default()
            )))
        }
    }
}

/// Leader tool for broadcast delegation: every member runs the same task
/// sequentially.
struct DelegateToAllTool {
    ctx: Arc<MemberContext>,
}

#[async_trait]
impl Tool for DelegateToAllTool {
    fn name(&self) -> &str {
        TOOL_DELEGATE_ALL
    }

    fn description(&self) -> String {
        "Delegate a task to ALL team members at once. Use this to get diverse \
         perspectives or brainstorm ideas by sending the same task to every \
         member."
            .to_owned()
    }

    fn parameters(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "task": {
                    "type": "string",
                    "description": "Clear description of the task to delegate"
                }
            },
            "required": ["task"]
        })
    }

    async fn execute(&self, arguments: Value) -> Result<ToolResult> {
        let task = arguments
            .get("task")
            .and_then(Value::as_str)
            .unwrap_or_default();

        let members = self.ctx.members.clone();
        let mut sections = Vec::with_capacity(members.len());
        for member in &members {
            let result = self.ctx.run_member(member, task).await;
            sections.push(format!("{}: {}", member.name, result.response));
        }
        Ok(ToolResult::ok(sections.join("\n\n")))
    }
}

/// A Leader plus Members orchestrator.
pub struct Team {
    config: TeamConfig,
    llm: SharedLlmClient,
    available_tools: Vec<SharedTool>,
    workspace_dir: PathBuf,
    team_id: String,
    session_manager: SharedTeamSessionManager,
    enable_spawn_agent: bool,
    spawn_max_depth: usize,
    spawn_default_max_steps: usize,
    spawn_token_limit: usize,
    current_depth: usize,
}

impl Team {
    /// Create a team.
    #[must_use]
    pub fn new(config: TeamConfig, llm: SharedLlmClient) -> Self {
        Self {
            config,
            llm,
            available_tools: Vec::new(),
            workspace_dir: PathBuf::from("./workspace"),
            team_id: Uuid::new_v4().to_string(),
            session_manager: Arc::new(TeamSessionManager::new()),
            enable_spawn_agent: true,
            spawn_max_depth: 3,
            spawn_default_max_steps: 15,
            spawn_token_limit: 50_000,
            current_depth: 0,
        }
    }

    /// Set the tool pool members draw from.
    #[must_use]
    pub fn with_tools(mut self, tools: Vec<SharedTool>) -> Self {
        self.available_tools = tools;
        self
    }

    /// Set the workspace directory.
    #[must_use]
    pub fn with_workspace_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.workspace_dir = dir.into();
        self
    }

    /// Attach a session manager.
    #[must_use]
    pub fn with_session_manager(mut self, manager: SharedTeamSessionManager) -> Self {
        self.session_manager = manager;
        self
    }

    /// Enable or disable member spawn-agent support.
    #[must_use]
    pub const fn with_spawn_agent(mut self, enabled: bool) -> Self {
        self.enable_spawn_agent = enabled;
        self
    }

    /// The team id.
    #[must_use]
    pub fn team_id(&self) -> &str {
        &self.team_id
    }

    /// The team configuration.
    #[must_use]
    pub const fn config(&self) -> &TeamConfig {
        &self.config
    }

    pub(crate) fn member_context(
        &self,
        session_id: Option<String>,
        parent_run_id: Option<String>,
    ) -> Arc<MemberContext> {
        Arc::new(MemberContext {
            llm: self.llm.clone(),
            members: self.config.members.clone(),
            available_tools: self.available_tools.clone(),
            workspace_dir: self.workspace_dir.clone(),
            session_manager: self.session_manager.clone(),
            session_id,
            parent_run_id,
            member_runs: Arc::new(Mutex::new(Vec::new())),
            spawn: SpawnSettings {
                enabled: self.enable_spawn_agent,
                max_depth: self.spawn_max_depth,
                default_max_steps: self.spawn_default_max_steps,
                token_limit: self.spawn_token_limit,
                current_depth: self.current_depth,
            },
        })
    }

    fn build_leader_system_prompt(&self, history_context: &str) -> String {
        let mut members_desc = Vec::new();
        for (idx, member) in self.config.members.iter().enumerate() {
            let mut entry = format!(
                " - Agent {}:\n   - ID: {}\n   - Name: {}\n   - Role: {}",
                idx + 1,
                member.id,
                member.name,
                member.role
            );
            if member.tools.is_empty() {
                entry.push_str("\n   - Member tools: (no tools)");
            } else {
                entry.push_str("\n   - Member tools:\n    - ");
                entry.push_str(&member.tools.join("\n    - "));
            }
            if let Some(instructions) = &member.instructions {
                entry.push_str(&format!("\n   - Instructions: {instructions}"));
            }
            members_desc.push(entry);
        }

        let delegation_method = if self.config.delegate_to_all {
            "- You cannot use a member tool directly. You can only delegate tasks to members.\n\
             - Use the `delegate_task_to_all_members` tool to send the task to ALL team members.\n\
             - When you delegate a task, provide a clear description of the task.\n\
             - You must always analyze the responses from members before responding to the user.\n\
             - After analyzing the responses from the members, if you feel the task has been completed, you can stop and respond to the user.\n\
             - If you are NOT satisfied with the responses from the members, you should re-assign the task."
        } else {
            "- Your role is to delegate tasks to members in your team with the highest likelihood of completing the user's request.\n\
             - Carefully analyze the tools available to the members and their roles before delegating tasks.\n\
             - You cannot use a member tool directly. You can only delegate tasks to members.\n\
             - When you delegate a task to another member, make sure to include:\n\
               - member_id (str): The ID of the member to delegate the task to. Use only the ID of the member.\n\
               - task (str): A clear description of the task.\n\
             - You can delegate tasks to multiple members at once.\n\
             - You must always analyze the responses from members before responding to the user.\n\
             - After analyzing the responses from the members, if you feel the task has been completed, you can stop and respond to the user.\n\
             - If you are NOT satisfied with the responses from the members, you should re-assign the task to a different member.\n\
             - For simple greetings, thanks, or questions about the team itself, you should respond directly.\n\
             - For all work requests, tasks, or questions requiring expertise, route to appropriate team members."
        };

        let mut prompt = format!(
            "You are the leader of a team of AI Agents.\n\n\
             Your task is to coordinate the team to complete the user's request.\n\n\
             <team_name>\n{}\n</team_name>\n\n\
             <team_description>\n{}\n</team_description>\n\n\
             <team_members>\n{}\n</team_members>\n\n\
             <how_to_respond>\n{delegation_method}\n</how_to_respond>",
            self.config.name,
            self.config
                .description
                .as_deref()
                .unwrap_or("A collaborative team of specialized agents"),
            members_desc.join("\n"),
        );

        if let Some(instructions) = &self.config.leader_instructions {
            prompt.push_str(&format!("\n\n<instructions>\n{instructions}\n</instructions>"));
        }

        if !history_context.is_empty() {
            prompt.push_str(&format!(
                "\n\n<previous_interactions>\n{history_context}\n\n\
                 Use the previous interactions to maintain continuity and context.\n\
                 </previous_interactions>"
            ));
        }

        prompt
    }

    /// Execute a team task in standard mode.
    pub async fn run(&self, message: &str, options: TeamRunOptions) -> TeamRunResponse {
        let run_id = Uuid::new_v4().to_string();
        let trace_id = Uuid::new_v4().to_string();
        let session_id = options.session_id.clone();

        info!(team = %self.config.name, %run_id, "Team run starting");

        let history_context = match &session_id {
            Some(id) => {
                let session = self
                    .session_manager
                    .get_session(id, &self.config.name, options.user_id.as_deref())
                    .await;
                session.history_context(options.effective_history_runs())
            }
            None => String::new(),
        };

        let ctx = self.member_context(session_id.clone(), Some(run_id.clone()));
        let leader_tool: SharedTool = if self.config.delegate_to_all {
            Arc::new(DelegateToAllTool { ctx: ctx.clone() })
        } else {
            Arc::new(DelegateToMemberTool { ctx: ctx.clone() })
        };

        let system_prompt = self.build_leader_system_prompt(&history_context);
        let leader_config = AgentConfig::default()
            .with_name(format!("{}_leader", self.config.name))
            .with_system_prompt(system_prompt)
            .with_max_steps(options.effective_max_steps())
            .with_workspace_dir(self.workspace_dir.clone());

        let leader_outcome = async {
            let mut leader = Agent::new(self.llm.clone(), leader_config, vec![leader_tool])?;
            leader.add_user_message(message);
            leader.run().await
        }
        .await;

        let member_runs = ctx.member_runs.lock().await.clone();
        let member_steps: usize = member_runs.iter().map(|r| r.steps).sum();

        match leader_outcome {
            Ok((response, logs)) => {
                let leader_steps = logs.steps();
                let total_steps = leader_steps + member_steps;
                let (input_tokens, output_tokens) = logs.final_usage();
                let llm_failed = response.starts_with("LLM call failed");
                let success = !response.is_empty() && !logs.max_steps_reached() && !llm_failed;

                if let Some(id) = &session_id {
                    let record = RunRecord::new(
                        "team_leader",
                        &self.config.name,
                        message,
                        &response,
                        success,
                        total_steps,
                    )
                    .with_run_id(run_id.clone())
                    .with_metadata(json!({ "member_count": member_runs.len() }));
                    if let Err(error) = self.session_manager.add_run(id, record).await {
                        warn!(session = %id, %error, "Failed to record leader run");
                    }
                }

                info!(
                    team = %self.config.name,
                    total_steps,
                    members = member_runs.len(),
                    success,
                    "Team run finished",
                );

                TeamRunResponse {
                    success,
                    team_name: self.config.name.clone(),
                    message: response,
                    iterations: member_runs.len(),
                    member_runs,
                    total_steps,
                    metadata: json!({
                        "session_id": session_id,
                        "run_id": run_id,
                        "trace_id": trace_id,
                        "input_tokens": input_tokens,
                        "output_tokens": output_tokens,
                    }),
                }
            }
            Err(error) => {
                warn!(team = %self.config.name, %error, "Team run failed");
                TeamRunResponse {
                    success: false,
                    team_name: self.config.name.clone(),
                    message: format!("Team execution failed: {error}"),
                    iterations: member_runs.len(),
                    member_runs,
                    total_steps: member_steps,
                    metadata: json!({
                        "error": error.to_string(),
                        "run_id": run_id,
                        "trace_id": trace_id,
                    }),
                }
            }
        }
    }
}

impl std::fmt::Debug for Team {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Team")
            .field("name", &self.config.name)
            .field("members", &self.config.members.len())
            .field("delegate_to_all", &self.config.delegate_to_all)
            .finish()
    }
}
