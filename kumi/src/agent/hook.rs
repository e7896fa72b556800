//! Run-lifecycle hooks.
//!
//! Hooks are priority-ordered interceptors invoked before a run, after
//! every step, and after the run finishes. Typical uses: memory injection
//! into the system prompt, personalization, tracing. Lower priority runs
//! first.

use async_trait::async_trait;

use super::state::AgentState;

/// Data handed to [`AgentHook::on_step`] after each step.
#[derive(Debug, Clone, Default)]
pub struct StepData {
    /// Whether the step completed the run.
    pub completed: bool,
    /// The step's final content, when any.
    pub content: String,
    /// Error surfaced by the step, when any.
    pub error: Option<String>,
}

/// A lifecycle extension point for agent runs.
///
/// All callbacks default to no-ops; implement only what you need.
#[async_trait]
pub trait AgentHook: Send + Sync {
    /// Ordering key; lower runs first.
    fn priority(&self) -> i32 {
        100
    }

    /// Invoked once before the step loop starts. May mutate the state,
    /// e.g. to inject context into the transcript.
    async fn before_run(&self, state: &mut AgentState) {
        let _ = state;
    }

    /// Invoked after every step.
    async fn on_step(&self, state: &AgentState, step_data: &StepData) {
        let _ = (state, step_data);
    }

    /// Invoked once when the run terminates, with the final result text.
    async fn after_run(&self, state: &AgentState, result: &str, success: bool) {
        let _ = (state, result, success);
    }
}

/// Type alias for an Arc-wrapped hook.
pub type SharedHook = std::sync::Arc<dyn AgentHook>;

/// Registry of hooks kept sorted by priority.
#[derive(Default)]
pub struct HookManager {
    hooks: Vec<SharedHook>,
}

impl HookManager {
    /// Create an empty manager.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a hook; the list is re-sorted by priority.
    pub fn add(&mut self, hook: SharedHook) {
        self.hooks.push(hook);
        self.hooks.sort_by_key(|h| h.priority());
    }

    /// Remove every hook.
    pub fn clear(&mut self) {
        self.hooks.clear();
    }

    /// Number of registered hooks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    /// Whether no hooks are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    /// Fire `before_run` on every hook, in priority order.
    pub async fn trigger_before_run(&self, state: &mut AgentState) {
        for hook in &self.hooks {
            hook.before_run(state).await;
        }
    }

    /// Fire `on_step` on every hook, in priority order.
    pub async fn trigger_on_step(&self, state: &AgentState, step_data: &StepData) {
        for hook in &self.hooks {
            hook.on_step(state, step_data).await;
        }
    }

    /// Fire `after_run` on every hook, in priority order.
    pub async fn trigger_after_run(&self, state: &AgentState, result: &str, success: bool) {
        for hook in &self.hooks {
            hook.after_run(state, result, success).await;
        }
    }
}

impl std::fmt::Debug for HookManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookManager")
            .field("hooks", &self.hooks.len())
            .finish()
    }
}
