//! Dependency-mode team execution: a task DAG resolved into layers.
//!
//! Validation fails fast on unknown references; topological layering
//! detects cycles; layers execute concurrently with a join barrier; a
//! failed task skips every later layer.

use std::collections::{HashMap, HashSet};

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{info, warn};
use uuid::Uuid;

use super::{RunRecord, Team, TeamRunOptions};
use crate::error::{AgentError, Result};

/// Lifecycle of a dependency-mode task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Not started.
    Pending,
    /// Currently executing.
    Running,
    /// Finished successfully.
    Completed,
    /// Finished with an error or no matching member.
    Failed,
    /// Not executed because an upstream task failed.
    Skipped,
}

impl TaskStatus {
    /// Get the string representation of the status.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }
}

/// One task in a dependency DAG.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskWithDependencies {
    /// Task id, unique within a run.
    pub id: String,
    /// The task text given to the member.
    pub task: String,
    /// Role of the member this task is assigned to.
    pub assigned_to: String,
    /// Ids of tasks that must complete first.
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Current status.
    #[serde(default = "default_status")]
    pub status: TaskStatus,
    /// Result text once terminal.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    /// Execution metadata (member, steps, elapsed).
    #[serde(default)]
    pub metadata: Value,
}

const fn default_status() -> TaskStatus {
    TaskStatus::Pending
}

impl TaskWithDependencies {
    /// Create a task assigned to a role.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        task: impl Into<String>,
        assigned_to: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            task: task.into(),
            assigned_to: assigned_to.into(),
            depends_on: Vec::new(),
            status: TaskStatus::Pending,
            result: None,
            metadata: Value::Null,
        }
    }

    /// Declare dependencies.
    #[must_use]
    pub fn with_dependencies(mut self, depends_on: Vec<String>) -> Self {
        self.depends_on = depends_on;
        self
    }
}

/// Response of a dependency-mode run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependencyRunResponse {
    /// Whether every task completed.
    pub success: bool,
    /// Team name.
    pub team_name: String,
    /// Summary message listing every task's terminal status.
    pub message: String,
    /// The tasks, each carrying its terminal status and result.
    pub tasks: Vec<TaskWithDependencies>,
    /// Layered execution order: one list of ids per layer.
    pub execution_order: Vec<Vec<String>>,
    /// Sum of member steps across all executed tasks.
    pub total_steps: usize,
    /// Run identifiers and failure detail.
    #[serde(default)]
    pub metadata: Value,
}

/// Outcome of executing one task, gathered at the layer barrier.
struct TaskOutcome {
    id: String,
    status: TaskStatus,
    result: String,
    steps: usize,
    metadata: Value,
}

/// Resolve tasks into concurrently executable layers.
///
/// Fails on references to unknown tasks and on cycles.
fn resolve_dependencies(tasks: &[TaskWithDependencies]) -> Result<Vec<Vec<String>>> {
    let ids: HashSet<&str> = tasks.iter().map(|t| t.id.as_str()).collect();
    for task in tasks {
        for dep in &task.depends_on {
            if !ids.contains(dep.as_str()) {
                return Err(AgentError::dependency(format!(
                    "Task '{}' depends on non-existent task '{dep}'",
                    task.id
                )));
            }
        }
    }

    let mut in_degree: HashMap<&str, usize> = tasks
        .iter()
        .map(|t| (t.id.as_str(), t.depends_on.len()))
        .collect();
    let mut remaining: HashSet<&str> = ids.clone();
    let mut layers = Vec::new();

    while !remaining.is_empty() {
        let mut layer: Vec<String> = tasks
            .iter()
            .filter(|t| remaining.contains(t.id.as_str()) && in_degree[t.id.as_str()] == 0)
            .map(|t| t.id.clone())
            .collect();
        layer.sort();

        if layer.is_empty() {
            let mut stuck: Vec<&str> = remaining.iter().copied().collect();
            stuck.sort_unstable();
            return Err(AgentError::dependency(format!(
                "Circular dependency detected among tasks: {}",
                stuck.join(", ")
            )));
        }

        for id in &layer {
            remaining.remove(id.as_str());
        }
        for task in tasks {
            if remaining.contains(task.id.as_str()) {
                let satisfied = task
                    .depends_on
                    .iter()
                    .filter(|dep| layer.contains(dep))
                    .count();
                if satisfied > 0 {
                    *in_degree.get_mut(task.id.as_str()).expect("known id") -= satisfied;
                }
            }
        }

        layers.push(layer);
    }

    Ok(layers)
}

impl Team {
    /// Execute a set of dependent tasks.
    ///
    /// Layers run concurrently; each task's prompt carries the results of
    /// its dependencies; a failure marks every later layer skipped.
    pub async fn run_with_dependencies(
        &self,
        mut tasks: Vec<TaskWithDependencies>,
        options: TeamRunOptions,
    ) -> DependencyRunResponse {
        let run_id = Uuid::new_v4().to_string();
        let trace_id = Uuid::new_v4().to_string();
        let session_id = options.session_id.clone();

        let layers = match resolve_dependencies(&tasks) {
            Ok(layers) => layers,
            Err(error) => {
                warn!(team = %self.config().name, %error, "Dependency resolution failed");
                return DependencyRunResponse {
                    success: false,
                    team_name: self.config().name.clone(),
                    message: format!("Dependency execution failed: {error}"),
                    tasks,
                    execution_order: Vec::new(),
                    total_steps: 0,
                    metadata: json!({ "error": error.to_string(), "run_id": run_id, "trace_id": trace_id }),
                };
            }
        };
        let execution_order = layers.clone();

        info!(
            team = %self.config().name,
            tasks = tasks.len(),
            layers = layers.len(),
            "Dependency run starting",
        );

        let ctx = self.member_context(session_id.clone(), Some(run_id.clone()));
        let mut completed_results: HashMap<String, String> = HashMap::new();
        let mut total_steps = 0usize;

        for (layer_idx, layer) in layers.iter().enumerate() {
            let futures: Vec<_> = layer
                .iter()
                .map(|id| {
                    let task = tasks
                        .iter()
                        .find(|t| t.id == *id)
                        .expect("layer ids come from tasks")
                        .clone();
                    let ctx = ctx.clone();
                    let completed = completed_results.clone();
                    async move {
                        let started = std::time::Instant::now();

                        let Some(member) = ctx.find_member_by_role(&task.assigned_to).cloned()
                        else {
                            return TaskOutcome {
                                id: task.id,
                                status: TaskStatus::Failed,
                                result: format!(
                                    "Error: No member with role '{}' found",
                                    task.assigned_to
                                ),
                                steps: 0,
                                metadata: Value::Null,
                            };
                        };

                        let mut description = task.task.clone();
                        if !task.depends_on.is_empty() {
                            description.push_str("\n\nDependent task results:");
                            for dep in &task.depends_on {
                                if let Some(result) = completed.get(dep) {
                                    description.push_str(&format!("\n[{dep}]: {result}"));
                                }
                            }
                        }

                        let member_result = ctx.run_member(&member, &description).await;
                        let elapsed = started.elapsed().as_secs_f64();

                        if member_result.success {
                            TaskOutcome {
                                id: task.id,
                                status: TaskStatus::Completed,
                                result: member_result.response,
                                steps: member_result.steps,
                                metadata: json!({
                                    "member_name": member_result.member_name,
                                    "steps": member_result.steps,
                                    "elapsed": elapsed,
                                }),
                            }
                        } else {
                            TaskOutcome {
                                id: task.id,
                                status: TaskStatus::Failed,
                                result: member_result
                                    .error
                                    .unwrap_or_else(|| "Unknown error".to_owned()),
                                steps: member_result.steps,
                                metadata: json!({
                                    "member_name": member_result.member_name,
                                    "steps": member_result.steps,
                                    "elapsed": elapsed,
                                }),
                            }
                        }
                    }
                })
                .collect();

            let outcomes = join_all(futures).await;

            let mut failed_task: Option<String> = None;
            for outcome in outcomes {
                completed_results.insert(outcome.id.clone(), outcome.result.clone());
                total_steps += outcome.steps;

                let task = tasks
                    .iter_mut()
                    .find(|t| t.id == outcome.id)
                    .expect("outcome ids come from tasks");
                task.status = outcome.status;
                task.result = Some(outcome.result);
                task.metadata = outcome.metadata;

                if task.status == TaskStatus::Failed && failed_task.is_none() {
                    failed_task = Some(task.id.clone());
                }
            }

            if let Some(failed_id) = failed_task {
                let later_ids: HashSet<&String> =
                    layers[layer_idx + 1..].iter().flatten().collect();
                for task in &mut tasks {
                    if later_ids.contains(&task.id) {
                        task.status = TaskStatus::Skipped;
                        task.result = Some(format!(
                            "Skipped due to dependency failure: {failed_id}"
                        ));
                    }
                }

                let failure_detail = tasks
                    .iter()
                    .find(|t| t.id == failed_id)
                    .and_then(|t| t.result.clone())
                    .unwrap_or_default();
                let message = format!(
                    "Execution failed: task '{failed_id}' failed\n\nFailure details:\n{failure_detail}"
                );

                if let Some(id) = &session_id {
                    self.record_dependency_run(id, &run_id, &tasks, &message, false, total_steps)
                        .await;
                }

                return DependencyRunResponse {
                    success: false,
                    team_name: self.config().name.clone(),
                    message,
                    tasks,
                    execution_order,
                    total_steps,
                    metadata: json!({
                        "run_id": run_id,
                        "trace_id": trace_id,
                        "failed_task": failed_id,
                    }),
                };
            }
        }

        let completed_count = tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Completed)
            .count();
        let mut message = format!(
            "All tasks completed ({completed_count}/{})\n\nResults:\n",
            tasks.len()
        );
        for task in &tasks {
            let preview: String = task
                .result
                .as_deref()
                .unwrap_or_default()
                .chars()
                .take(200)
                .collect();
            message.push_str(&format!(
                "\n[{}] {}: {preview}...",
                task.id,
                task.status.as_str()
            ));
        }

        if let Some(id) = &session_id {
            self.record_dependency_run(id, &run_id, &tasks, &message, true, total_steps)
                .await;
        }

        info!(
            team = %self.config().name,
            total_steps,
            completed = completed_count,
            "Dependency run finished",
        );

        DependencyRunResponse {
            success: true,
            team_name: self.config().name.clone(),
            message,
            tasks,
            execution_order,
            total_steps,
            metadata: json!({ "run_id": run_id, "trace_id": trace_id }),
        }
    }

    async fn record_dependency_run(
        &self,
        session_id: &str,
        run_id: &str,
        tasks: &[TaskWithDependencies],
        message: &str,
        success: bool,
        total_steps: usize,
    ) {
        let record = RunRecord::new(
            "team_dependency",
            &self.config().name,
            format!("Dependency-based execution with {} tasks", tasks.len()),
            message,
            success,
            total_steps,
        )
        .with_run_id(run_id)
        .with_metadata(json!({
            "tasks": tasks,
            "task_count": tasks.len(),
        }));
        if let Err(error) = self.session_manager.add_run(session_id, record).await {
            warn!(session = %session_id, %error, "Failed to record dependency run");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(id: &str, deps: &[&str]) -> TaskWithDependencies {
        TaskWithDependencies::new(id, format!("do {id}"), "worker")
            .with_dependencies(deps.iter().map(|s| (*s).to_owned()).collect())
    }

    #[test]
    fn single_layer_for_independent_tasks() {
        let layers = resolve_dependencies(&[task("a", &[]), task("b", &[])]).unwrap();
        assert_eq!(layers, vec![vec!["a".to_owned(), "b".to_owned()]]);
    }

    #[test]
    fn layering_follows_dependencies() {
        let tasks = [
            task("t1", &[]),
            task("t2", &["t1"]),
            task("t3", &["t2"]),
            task("t4", &["t1"]),
        ];
        let layers = resolve_dependencies(&tasks).unwrap();
        assert_eq!(
            layers,
            vec![
                vec!["t1".to_owned()],
                vec!["t2".to_owned(), "t4".to_owned()],
                vec!["t3".to_owned()],
            ]
        );
    }

    #[test]
    fn unknown_reference_fails_fast() {
        let err = resolve_dependencies(&[task("a", &["ghost"])]).unwrap_err();
        assert!(err.to_string().contains("non-existent task 'ghost'"));
    }

    #[test]
    fn cycle_is_detected() {
        let err = resolve_dependencies(&[task("a", &["b"]), task("b", &["a"])]).unwrap_err();
        assert!(err.to_string().contains("Circular dependency"));
    }

    #[test]
    fn diamond_resolves_into_three_layers() {
        let tasks = [
            task("root", &[]),
            task("left", &["root"]),
            task("right", &["root"]),
            task("join", &["left", "right"]),
        ];
        let layers = resolve_dependencies(&tasks).unwrap();
        assert_eq!(layers.len(), 3);
        assert_eq!(layers[1], vec!["left".to_owned(), "right".to_owned()]);
        assert_eq!(layers[2], vec!["join".to_owned()]);
    }
}
