//! Context coordination for the Ralph loop.
//!
//! [`ContextManager`] owns the compression policy: tool results are cached
//! with a summary, iterations are summarized, and the per-iteration prompt
//! prefix is assembled from the working-memory block, the last three
//! iteration summaries, and the last ten tool-result summaries.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tracing::warn;

use super::cache::ToolResultCache;
use super::memory::WorkingMemory;
use crate::llm::SharedLlmClient;
use crate::message::Message;

/// Content at or below this length passes through unsummarized.
const SHORT_CONTENT_CHARS: usize = 500;

/// Coordinates the tool cache, working memory, and iteration summaries.
pub struct ContextManager {
    cache: Arc<Mutex<ToolResultCache>>,
    memory: Arc<Mutex<WorkingMemory>>,
    summarizer: Option<SharedLlmClient>,
    iteration_summaries: BTreeMap<usize, String>,
}

impl ContextManager {
    /// Create a manager over shared cache and memory handles.
    #[must_use]
    pub fn new(cache: Arc<Mutex<ToolResultCache>>, memory: Arc<Mutex<WorkingMemory>>) -> Self {
        Self {
            cache,
            memory,
            summarizer: None,
            iteration_summaries: BTreeMap::new(),
        }
    }

    /// Attach an LLM for summaries. Without one, deterministic truncation
    /// is used.
    #[must_use]
    pub fn with_summarizer(mut self, llm: SharedLlmClient) -> Self {
        self.summarizer = Some(llm);
        self
    }

    /// Summarize one tool result.
    ///
    /// Short content passes through; long content goes through the
    /// summarizer when present, otherwise a first-ten-lines (or
    /// first-500-chars) truncation with a count marker.
    pub async fn summarize_tool_result(&self, tool_name: &str, content: &str) -> String {
        if content.chars().count() <= SHORT_CONTENT_CHARS {
            return content.to_owned();
        }

        if let Some(llm) = &self.summarizer {
            let clipped: String = content.chars().take(5000).collect();
            let prompt = format!("Summarize this {tool_name} result concisely:\n{clipped}");
            match llm.generate(&[Message::user(prompt)], None, None).await {
                Ok(response) => return response.content,
                Err(error) => {
                    warn!(%error, tool = tool_name, "Tool-result summarization failed");
                }
            }
        }

        let lines: Vec<&str> = content.split('\n').collect();
        if lines.len() > 20 {
            let preview = lines[..10].join("\n");
            return format!("{preview}\n... ({} more lines)", lines.len() - 10);
        }

        if content.chars().count() > 1000 {
            let preview: String = content.chars().take(SHORT_CONTENT_CHARS).collect();
            return format!(
                "{preview}... ({} more chars)",
                content.chars().count() - SHORT_CONTENT_CHARS
            );
        }

        content.to_owned()
    }

    /// Cache a tool result and return the summary the agent should see.
    pub async fn process_tool_result(
        &self,
        tool_call_id: &str,
        tool_name: &str,
        arguments: Value,
        content: &str,
        iteration: usize,
    ) -> String {
        let summary = self.summarize_tool_result(tool_name, content).await;
        self.cache.lock().expect("cache lock poisoned").store(
            tool_call_id,
            tool_name,
            arguments,
            content,
            summary.clone(),
            iteration,
        );
        summary
    }

    /// Summarize a finished iteration and record the summary.
    pub async fn summarize_iteration(
        &mut self,
        iteration: usize,
        messages_content: &str,
    ) -> String {
        let summary = if let Some(llm) = &self.summarizer {
            let clipped: String = messages_content.chars().take(8000).collect();
            let prompt = format!("Summarize iteration {iteration} progress:\n{clipped}");
            match llm.generate(&[Message::user(prompt)], None, None).await {
                Ok(response) => response.content,
                Err(error) => {
                    warn!(%error, iteration, "Iteration summarization failed");
                    format!("Iteration {iteration} completed. See working memory for details.")
                }
            }
        } else {
            format!("Iteration {iteration} completed. See working memory for details.")
        };

        self.iteration_summaries.insert(iteration, summary.clone());
        summary
    }

    /// Assemble the context prefix for the next iteration.
    #[must_use]
    pub fn build_context_prefix(&self) -> String {
        let mut parts = vec![
            self.memory
                .lock()
                .expect("memory lock poisoned")
                .to_context_string(),
        ];

        if !self.iteration_summaries.is_empty() {
            parts.push("\n## Previous Iterations".to_owned());
            let start = self.iteration_summaries.len().saturating_sub(3);
            for (iteration, summary) in self.iteration_summaries.iter().skip(start) {
                parts.push(format!("\n### Iteration {iteration}\n{summary}"));
            }
        }

        let cache = self.cache.lock().expect("cache lock poisoned");
        let recent = cache.recent(10);
        if !recent.is_empty() {
            parts.push("\n## Recent Tool Results (Summaries)".to_owned());
            for result in recent {
                let mut summary: String = result.summary.chars().take(200).collect();
                if result.summary.chars().count() > 200 {
                    summary.push_str("...");
                }
                parts.push(format!("\n- [{}] {summary}", result.tool_name));
            }
        }

        parts.join("\n")
    }

    /// Fetch the full content of a cached tool result.
    #[must_use]
    pub fn get_full_tool_result(&self, tool_call_id: &str) -> Option<String> {
        self.cache
            .lock()
            .expect("cache lock poisoned")
            .get_full_content(tool_call_id)
    }

    /// Drop the cache and iteration summaries. Working memory is untouched.
    pub fn clear(&mut self) {
        self.cache.lock().expect("cache lock poisoned").clear();
        self.iteration_summaries.clear();
    }
}

impl std::fmt::Debug for ContextManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextManager")
            .field("has_summarizer", &self.summarizer.is_some())
            .field("iteration_summaries", &self.iteration_summaries.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{LlmResponse, MockLlm};

    fn manager(dir: &std::path::Path) -> ContextManager {
        let cache = Arc::new(Mutex::new(ToolResultCache::default()));
        let memory = Arc::new(Mutex::new(WorkingMemory::new(dir.to_path_buf(), ".ralph")));
        ContextManager::new(cache, memory)
    }

    #[tokio::test]
    async fn short_content_passes_through() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager(dir.path());
        let summary = mgr.summarize_tool_result("read_file", "short output").await;
        assert_eq!(summary, "short output");
    }

    #[tokio::test]
    async fn long_multiline_content_truncates_to_ten_lines() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager(dir.path());
        let content = (0..40)
            .map(|i| format!("line {i} with some padding text here"))
            .collect::<Vec<_>>()
            .join("\n");
        let summary = mgr.summarize_tool_result("bash", &content).await;
        assert!(summary.contains("line 9"));
        assert!(!summary.contains("line 15"));
        assert!(summary.contains("(30 more lines)"));
    }

    #[tokio::test]
    async fn llm_summarizer_is_preferred() {
        let dir = tempfile::tempdir().unwrap();
        let llm = Arc::new(MockLlm::new());
        llm.push_response(LlmResponse::text("llm summary"));
        let mgr = manager(dir.path()).with_summarizer(llm);

        let summary = mgr
            .summarize_tool_result("bash", &"x".repeat(2000))
            .await;
        assert_eq!(summary, "llm summary");
    }

    #[tokio::test]
    async fn summarizer_failure_degrades_to_truncation() {
        let dir = tempfile::tempdir().unwrap();
        let llm = Arc::new(MockLlm::new());
        llm.push_failure("down");
        let mgr = manager(dir.path()).with_summarizer(llm);

        let summary = mgr
            .summarize_tool_result("bash", &"y".repeat(2000))
            .await;
        assert!(summary.contains("more chars"));
    }

    #[tokio::test]
    async fn context_prefix_carries_memory_summaries_and_tools() {
        let dir = tempfile::tempdir().unwrap();
        let mut mgr = manager(dir.path());

        mgr.process_tool_result("c1", "read_file", Value::Null, "file body", 1)
            .await;
        mgr.summarize_iteration(1, "did things").await;

        let prefix = mgr.build_context_prefix();
        assert!(prefix.contains("## Working Memory"));
        assert!(prefix.contains("## Previous Iterations"));
        assert!(prefix.contains("### Iteration 1"));
        assert!(prefix.contains("## Recent Tool Results"));
        assert!(prefix.contains("[read_file] file body"));
    }

    #[tokio::test]
    async fn only_last_three_iteration_summaries_survive() {
        let dir = tempfile::tempdir().unwrap();
        let mut mgr = manager(dir.path());
        for i in 1..=5 {
            mgr.summarize_iteration(i, "progress").await;
        }
        let prefix = mgr.build_context_prefix();
        assert!(!prefix.contains("### Iteration 1\n"));
        assert!(!prefix.contains("### Iteration 2\n"));
        assert!(prefix.contains("### Iteration 3"));
        assert!(prefix.contains("### Iteration 5"));
    }

    #[tokio::test]
    async fn full_content_is_recoverable() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager(dir.path());
        let long = "z".repeat(2000);
        mgr.process_tool_result("c9", "bash", Value::Null, &long, 2)
            .await;
        assert_eq!(mgr.get_full_tool_result("c9").unwrap(), long);
    }
}
