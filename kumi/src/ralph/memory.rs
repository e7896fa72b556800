//! Disk-persisted working memory for Ralph iterations.
//!
//! Entries are categorized notes keyed by generated ids; the whole memory
//! (entries, current iteration, file-modification set) is written to
//! `<workspace>/<memory_dir>/memory.json` after every mutation and loaded
//! back on construction.

use std::collections::BTreeSet;
use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::warn;
use uuid::Uuid;

use super::cache::now_secs;
use crate::error::Result;

/// Categories of working-memory entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryCategory {
    /// Progress notes.
    Progress,
    /// Findings and insights.
    Findings,
    /// Todo items with a completion flag.
    Todo,
    /// Decisions with their reasoning.
    Decisions,
    /// Errors with optional context.
    Errors,
    /// Anything else.
    General,
}

/// One working-memory entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryEntry {
    /// Entry key.
    pub key: String,
    /// Entry value; shape depends on the category.
    pub value: Value,
    /// Category.
    pub category: MemoryCategory,
    /// Iteration the entry was created or last touched in.
    pub iteration: usize,
    /// Unix timestamp in seconds.
    pub timestamp: f64,
}

#[derive(Debug, Serialize, Deserialize)]
struct MemoryFile {
    #[serde(default)]
    current_iteration: usize,
    #[serde(default)]
    files_modified: Vec<String>,
    #[serde(default)]
    entries: HashMap<String, MemoryEntry>,
}

/// Structured notes maintained across Ralph iterations.
#[derive(Debug)]
pub struct WorkingMemory {
    memory_file: PathBuf,
    entries: Vec<MemoryEntry>,
    current_iteration: usize,
    files_modified: BTreeSet<String>,
}

impl WorkingMemory {
    /// Create (and best-effort load) the memory for a workspace.
    #[must_use]
    pub fn new(workspace_dir: PathBuf, memory_dir: &str) -> Self {
        let memory_file = workspace_dir.join(memory_dir).join("memory.json");
        let mut memory = Self {
            memory_file,
            entries: Vec::new(),
            current_iteration: 0,
            files_modified: BTreeSet::new(),
        };
        memory.load();
        memory
    }

    fn load(&mut self) {
        let Ok(raw) = std::fs::read_to_string(&self.memory_file) else {
            return;
        };
        match serde_json::from_str::<MemoryFile>(&raw) {
            Ok(file) => {
                self.current_iteration = file.current_iteration;
                self.files_modified = file.files_modified.into_iter().collect();
                let mut entries: Vec<MemoryEntry> = file.entries.into_values().collect();
                entries.sort_by(|a, b| {
                    a.timestamp
                        .partial_cmp(&b.timestamp)
                        .unwrap_or(std::cmp::Ordering::Equal)
                });
                self.entries = entries;
            }
            Err(error) => {
                warn!(path = %self.memory_file.display(), %error, "Ignoring corrupt working memory file");
            }
        }
    }

    fn save(&self) -> Result<()> {
        if let Some(parent) = self.memory_file.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = MemoryFile {
            current_iteration: self.current_iteration,
            files_modified: self.files_modified.iter().cloned().collect(),
            entries: self
                .entries
                .iter()
                .map(|e| (e.key.clone(), e.clone()))
                .collect(),
        };
        std::fs::write(&self.memory_file, serde_json::to_string_pretty(&file)?)?;
        Ok(())
    }

    fn generated_key(&self, prefix: &str) -> String {
        format!(
            "{prefix}_{}_{}",
            self.current_iteration,
            &Uuid::new_v4().simple().to_string()[..8]
        )
    }

    /// Insert or replace an entry, persisting the memory.
    pub fn set_entry(
        &mut self,
        key: impl Into<String>,
        value: Value,
        category: MemoryCategory,
    ) -> Result<()> {
        let key = key.into();
        self.entries.retain(|e| e.key != key);
        self.entries.push(MemoryEntry {
            key,
            value,
            category,
            iteration: self.current_iteration,
            timestamp: now_secs(),
        });
        self.save()
    }

    /// Get an entry value by key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.iter().find(|e| e.key == key).map(|e| &e.value)
    }

    /// Every entry of a category, oldest first.
    #[must_use]
    pub fn get_by_category(&self, category: MemoryCategory) -> Vec<&MemoryEntry> {
        self.entries
            .iter()
            .filter(|e| e.category == category)
            .collect()
    }

    /// Record a progress note.
    pub fn add_progress(&mut self, description: impl Into<String>) -> Result<()> {
        let key = self.generated_key("progress");
        self.set_entry(key, Value::String(description.into()), MemoryCategory::Progress)
    }

    /// Record a finding.
    pub fn add_finding(&mut self, finding: impl Into<String>) -> Result<()> {
        let key = self.generated_key("finding");
        self.set_entry(key, Value::String(finding.into()), MemoryCategory::Findings)
    }

    /// Add a todo; returns its key for later completion.
    pub fn add_todo(&mut self, task: impl Into<String>) -> Result<String> {
        let key = format!("todo_{}", &Uuid::new_v4().simple().to_string()[..8]);
        self.set_entry(
            key.clone(),
            json!({ "task": task.into(), "completed": false }),
            MemoryCategory::Todo,
        )?;
        Ok(key)
    }

    /// Mark a todo complete. Returns whether the key existed.
    pub fn complete_todo(&mut self, key: &str) -> Result<bool> {
        let iteration = self.current_iteration;
        let Some(entry) = self
            .entries
            .iter_mut()
            .find(|e| e.key == key && e.category == MemoryCategory::Todo)
        else {
            return Ok(false);
        };
        entry.value["completed"] = Value::Bool(true);
        entry.iteration = iteration;
        self.save()?;
        Ok(true)
    }

    /// Record a decision with its reasoning.
    pub fn add_decision(
        &mut self,
        decision: impl Into<String>,
        reason: impl Into<String>,
    ) -> Result<()> {
        let key = self.generated_key("decision");
        self.set_entry(
            key,
            json!({ "decision": decision.into(), "reason": reason.into() }),
            MemoryCategory::Decisions,
        )
    }

    /// Record an error with optional context.
    pub fn add_error(
        &mut self,
        error: impl Into<String>,
        context: Option<String>,
    ) -> Result<()> {
        let key = self.generated_key("error");
        self.set_entry(
            key,
            json!({ "error": error.into(), "context": context }),
            MemoryCategory::Errors,
        )
    }

    /// Record a file modification for the current iteration.
    pub fn record_file_modified(&mut self, file_path: impl Into<String>) -> Result<()> {
        self.files_modified.insert(file_path.into());
        self.save()
    }

    /// The current iteration's file-modification set.
    #[must_use]
    pub fn files_modified(&self) -> BTreeSet<String> {
        self.files_modified.clone()
    }

    /// Clear the file-modification set at an iteration boundary.
    pub fn clear_iteration_files(&mut self) -> Result<()> {
        self.files_modified.clear();
        self.save()
    }

    /// Advance the iteration counter.
    pub fn increment_iteration(&mut self) -> Result<usize> {
        self.current_iteration += 1;
        self.save()?;
        Ok(self.current_iteration)
    }

    /// The current iteration.
    #[must_use]
    pub const fn current_iteration(&self) -> usize {
        self.current_iteration
    }

    /// Structured summary of the memory.
    #[must_use]
    pub fn summary(&self) -> Value {
        let todos = self.get_by_category(MemoryCategory::Todo);
        let pending = todos
            .iter()
            .filter(|e| e.value["completed"] != true)
            .count();
        let completed = todos.len() - pending;

        let recent = |category: MemoryCategory| -> Vec<Value> {
            let entries = self.get_by_category(category);
            let start = entries.len().saturating_sub(5);
            entries[start..].iter().map(|e| e.value.clone()).collect()
        };

        json!({
            "iteration": self.current_iteration,
            "files_modified_count": self.files_modified.len(),
            "total_entries": self.entries.len(),
            "pending_todos": pending,
            "completed_todos": completed,
            "recent_progress": recent(MemoryCategory::Progress),
            "recent_findings": recent(MemoryCategory::Findings),
            "errors": self
                .get_by_category(MemoryCategory::Errors)
                .iter()
                .map(|e| e.value.clone())
                .collect::<Vec<_>>(),
        })
    }

    /// Render the memory as the context block injected into prompts.
    #[must_use]
    pub fn to_context_string(&self) -> String {
        let summary = self.summary();
        let mut lines = vec![
            format!("## Working Memory (Iteration {})", summary["iteration"]),
            String::new(),
            format!("Files Modified: {}", summary["files_modified_count"]),
            format!("Pending Tasks: {}", summary["pending_todos"]),
            format!("Completed Tasks: {}", summary["completed_todos"]),
        ];

        let progress = summary["recent_progress"].as_array().cloned().unwrap_or_default();
        if !progress.is_empty() {
            lines.push(String::new());
            lines.push("### Recent Progress".to_owned());
            for p in progress {
                lines.push(format!("- {}", p.as_str().unwrap_or_default()));
            }
        }

        let findings = summary["recent_findings"].as_array().cloned().unwrap_or_default();
        if !findings.is_empty() {
            lines.push(String::new());
            lines.push("### Key Findings".to_owned());
            for f in findings {
                lines.push(format!("- {}", f.as_str().unwrap_or_default()));
            }
        }

        let pending: Vec<&MemoryEntry> = self
            .get_by_category(MemoryCategory::Todo)
            .into_iter()
            .filter(|e| e.value["completed"] != true)
            .collect();
        if !pending.is_empty() {
            lines.push(String::new());
            lines.push("### Pending Tasks".to_owned());
            for todo in pending {
                lines.push(format!(
                    "- [ ] {}",
                    todo.value["task"].as_str().unwrap_or_default()
                ));
            }
        }

        let errors = summary["errors"].as_array().cloned().unwrap_or_default();
        if !errors.is_empty() {
            lines.push(String::new());
            lines.push("### Errors to Address".to_owned());
            for e in errors {
                lines.push(format!("- {}", e["error"].as_str().unwrap_or_default()));
            }
        }

        lines.join("\n")
    }

    /// Wipe everything, including the persisted file.
    pub fn clear(&mut self) -> Result<()> {
        self.entries.clear();
        self.files_modified.clear();
        self.current_iteration = 0;
        if self.memory_file.exists() {
            std::fs::remove_file(&self.memory_file)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory(dir: &std::path::Path) -> WorkingMemory {
        WorkingMemory::new(dir.to_path_buf(), ".ralph")
    }

    #[test]
    fn mutations_persist_to_disk() {
        let dir = tempfile::tempdir().unwrap();
        let mut mem = memory(dir.path());
        mem.add_progress("wrote the parser").unwrap();

        let file = dir.path().join(".ralph").join("memory.json");
        assert!(file.exists());
        let raw: Value = serde_json::from_str(&std::fs::read_to_string(file).unwrap()).unwrap();
        assert_eq!(raw["entries"].as_object().unwrap().len(), 1);
    }

    #[test]
    fn reload_restores_state() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut mem = memory(dir.path());
            mem.increment_iteration().unwrap();
            mem.add_finding("cache invalidation is hard").unwrap();
            mem.record_file_modified("src/lib.rs").unwrap();
        }

        let mem = memory(dir.path());
        assert_eq!(mem.current_iteration(), 1);
        assert!(mem.files_modified().contains("src/lib.rs"));
        assert_eq!(mem.get_by_category(MemoryCategory::Findings).len(), 1);
    }

    #[test]
    fn todos_track_completion() {
        let dir = tempfile::tempdir().unwrap();
        let mut mem = memory(dir.path());
        let key = mem.add_todo("write tests").unwrap();

        assert_eq!(mem.summary()["pending_todos"], 1);
        assert!(mem.complete_todo(&key).unwrap());
        assert_eq!(mem.summary()["pending_todos"], 0);
        assert_eq!(mem.summary()["completed_todos"], 1);
        assert!(!mem.complete_todo("todo_missing").unwrap());
    }

    #[test]
    fn iteration_files_clear_at_boundary() {
        let dir = tempfile::tempdir().unwrap();
        let mut mem = memory(dir.path());
        mem.record_file_modified("a.rs").unwrap();
        assert_eq!(mem.files_modified().len(), 1);

        mem.clear_iteration_files().unwrap();
        assert!(mem.files_modified().is_empty());
    }

    #[test]
    fn context_string_lists_sections() {
        let dir = tempfile::tempdir().unwrap();
        let mut mem = memory(dir.path());
        mem.add_progress("step one done").unwrap();
        mem.add_todo("step two").unwrap();
        mem.add_error("flaky test", Some("ci only".into())).unwrap();

        let context = mem.to_context_string();
        assert!(context.contains("### Recent Progress"));
        assert!(context.contains("- step one done"));
        assert!(context.contains("- [ ] step two"));
        assert!(context.contains("### Errors to Address"));
    }

    #[test]
    fn corrupt_file_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let ralph_dir = dir.path().join(".ralph");
        std::fs::create_dir_all(&ralph_dir).unwrap();
        std::fs::write(ralph_dir.join("memory.json"), "{bad json").unwrap();

        let mem = memory(dir.path());
        assert_eq!(mem.current_iteration(), 0);
    }

    #[test]
    fn clear_removes_persisted_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut mem = memory(dir.path());
        mem.add_progress("x").unwrap();
        mem.clear().unwrap();
        assert!(!dir.path().join(".ralph").join("memory.json").exists());
    }
}
