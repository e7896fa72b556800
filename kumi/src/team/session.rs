//! Team session history: run records and the bounded context block.
//!
//! The manager caches sessions in-memory behind a mutex; per-session
//! appends serialize on the same mutex. When a [`SessionStore`] is
//! attached, every append also persists the session as JSON.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::warn;
use uuid::Uuid;

use crate::error::Result;
use crate::session::SharedSessionStore;

/// One recorded run within a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    /// Unique run id.
    pub run_id: String,
    /// Parent run id (members link to their leader's run).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_run_id: Option<String>,
    /// Kind of runner: `team_leader`, `member`, `team_dependency`.
    pub runner_type: String,
    /// Name of the runner.
    pub runner_name: String,
    /// The task that was executed.
    pub task: String,
    /// The runner's response.
    pub response: String,
    /// Whether the run succeeded.
    pub success: bool,
    /// Steps the run took.
    pub steps: usize,
    /// Record time.
    pub timestamp: DateTime<Utc>,
    /// Arbitrary metadata.
    #[serde(default)]
    pub metadata: Value,
}

impl RunRecord {
    /// Create a record stamped with the current time and a fresh id.
    #[must_use]
    pub fn new(
        runner_type: impl Into<String>,
        runner_name: impl Into<String>,
        task: impl Into<String>,
        response: impl Into<String>,
        success: bool,
        steps: usize,
    ) -> Self {
        Self {
            run_id: Uuid::new_v4().to_string(),
            parent_run_id: None,
            runner_type: runner_type.into(),
            runner_name: runner_name.into(),
            task: task.into(),
            response: response.into(),
            success,
            steps,
            timestamp: Utc::now(),
            metadata: Value::Null,
        }
    }

    /// Set the run id.
    #[must_use]
    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = run_id.into();
        self
    }

    /// Link this record to a parent run.
    #[must_use]
    pub fn with_parent(mut self, parent_run_id: impl Into<String>) -> Self {
        self.parent_run_id = Some(parent_run_id.into());
        self
    }

    /// Attach metadata.
    #[must_use]
    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// A persisted multi-run conversation scope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamSession {
    /// Session id.
    pub session_id: String,
    /// Owning team name.
    pub team_name: String,
    /// Optional user scope.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Recorded runs, oldest first.
    #[serde(default)]
    pub runs: Vec<RunRecord>,
}

impl TeamSession {
    /// Render the bounded history block injected into the leader prompt.
    ///
    /// Only top-level runs (those without a parent) are listed, newest
    /// last, up to `num_runs`.
    #[must_use]
    pub fn history_context(&self, num_runs: usize) -> String {
        let top_level: Vec<&RunRecord> = self
            .runs
            .iter()
            .filter(|r| r.parent_run_id.is_none())
            .collect();
        if top_level.is_empty() || num_runs == 0 {
            return String::new();
        }

        let start = top_level.len().saturating_sub(num_runs);
        let mut lines = Vec::new();
        for record in &top_level[start..] {
            lines.push(format!("User: {}", record.task));
            lines.push(format!("Team: {}", record.response));
        }
        lines.join("\n")
    }
}

/// Caches team sessions in-memory, with optional store persistence.
pub struct TeamSessionManager {
    sessions: Mutex<HashMap<String, TeamSession>>,
    store: Option<SharedSessionStore>,
}

impl Default for TeamSessionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl TeamSessionManager {
    /// Create a manager without persistence.
    #[must_use]
    pub fn new() -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            store: None,
        }
    }

    /// Create a manager that persists sessions through a store.
    #[must_use]
    pub fn with_store(store: SharedSessionStore) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            store: Some(store),
        }
    }

    /// Fetch a session, loading it from the store or creating it fresh.
    pub async fn get_session(
        &self,
        session_id: &str,
        team_name: &str,
        user_id: Option<&str>,
    ) -> TeamSession {
        let mut sessions = self.sessions.lock().await;
        if let Some(session) = sessions.get(session_id) {
            return session.clone();
        }

        let mut session = TeamSession {
            session_id: session_id.to_owned(),
            team_name: team_name.to_owned(),
            user_id: user_id.map(str::to_owned),
            runs: Vec::new(),
        };

        if let Some(store) = &self.store {
            match store.get_session(session_id).await {
                Ok(Some(raw)) => match serde_json::from_slice::<TeamSession>(&raw) {
                    Ok(loaded) => session = loaded,
                    Err(error) => {
                        warn!(session = session_id, %error, "Ignoring unreadable stored session");
                    }
                },
                Ok(None) => {}
                Err(error) => {
                    warn!(session = session_id, %error, "Session store read failed");
                }
            }
        }

        sessions.insert(session_id.to_owned(), session.clone());
        session
    }

    /// Append a run record to a session, persisting when a store is set.
    pub async fn add_run(&self, session_id: &str, record: RunRecord) -> Result<()> {
        let mut sessions = self.sessions.lock().await;
        let session = sessions
            .entry(session_id.to_owned())
            .or_insert_with(|| TeamSession {
                session_id: session_id.to_owned(),
                team_name: String::new(),
                user_id: None,
                runs: Vec::new(),
            });
        session.runs.push(record);

        if let Some(store) = &self.store {
            let raw = serde_json::to_vec(&session)?;
            store.save_session(session_id, &raw).await?;
        }
        Ok(())
    }

    /// Drop a session from the cache (and the store, when set).
    pub async fn delete_session(&self, session_id: &str) -> Result<bool> {
        let cached = self.sessions.lock().await.remove(session_id).is_some();
        if let Some(store) = &self.store {
            let stored = store.delete_session(session_id).await?;
            return Ok(cached || stored);
        }
        Ok(cached)
    }
}

impl std::fmt::Debug for TeamSessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TeamSessionManager")
            .field("has_store", &self.store.is_some())
            .finish()
    }
}

/// Type alias for an Arc-wrapped session manager.
pub type SharedTeamSessionManager = Arc<TeamSessionManager>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::InMemorySessionStore;

    #[tokio::test]
    async fn add_run_then_history_context() {
        let manager = TeamSessionManager::new();
        manager
            .add_run("s1", RunRecord::new("team_leader", "crew", "do x", "did x", true, 3))
            .await
            .unwrap();
        manager
            .add_run(
                "s1",
                RunRecord::new("member", "worker", "sub", "sub done", true, 1)
                    .with_parent("leader-run"),
            )
            .await
            .unwrap();

        let session = manager.get_session("s1", "crew", None).await;
        let context = session.history_context(3);
        assert!(context.contains("User: do x"));
        assert!(context.contains("Team: did x"));
        // Member runs are excluded from the top-level history.
        assert!(!context.contains("sub done"));
    }

    #[tokio::test]
    async fn history_is_bounded() {
        let manager = TeamSessionManager::new();
        for i in 0..5 {
            manager
                .add_run(
                    "s1",
                    RunRecord::new("team_leader", "crew", format!("task {i}"), "r", true, 1),
                )
                .await
                .unwrap();
        }
        let session = manager.get_session("s1", "crew", None).await;
        let context = session.history_context(2);
        assert!(!context.contains("task 2"));
        assert!(context.contains("task 3"));
        assert!(context.contains("task 4"));
    }

    #[tokio::test]
    async fn sessions_persist_through_store() {
        let store: SharedSessionStore = Arc::new(InMemorySessionStore::new());
        {
            let manager = TeamSessionManager::with_store(store.clone());
            manager
                .add_run("s1", RunRecord::new("team_leader", "crew", "t", "r", true, 1))
                .await
                .unwrap();
        }

        // A fresh manager sees the stored session.
        let manager = TeamSessionManager::with_store(store);
        let session = manager.get_session("s1", "crew", None).await;
        assert_eq!(session.runs.len(), 1);
    }

    #[tokio::test]
    async fn empty_session_renders_empty_context() {
        let manager = TeamSessionManager::new();
        let session = manager.get_session("s1", "crew", None).await;
        assert!(session.history_context(3).is_empty());
    }
}
