//! LRU cache of tool results with separate summary and full-content reads.
//!
//! Reading a summary does not touch the access order; reading the full
//! content does. Eviction drops the least recently accessed entry.

use serde_json::Value;

use std::collections::HashMap;

/// Default capacity of the cache.
pub const DEFAULT_CACHE_SIZE: usize = 100;

/// One cached tool execution.
#[derive(Debug, Clone)]
pub struct CachedToolResult {
    /// Id of the originating tool call.
    pub tool_call_id: String,
    /// Tool name.
    pub tool_name: String,
    /// Argument mapping of the call.
    pub arguments: Value,
    /// Complete result content.
    pub full_content: String,
    /// Summary surfaced to the agent.
    pub summary: String,
    /// Iteration the call belonged to.
    pub iteration: usize,
    /// Unix timestamp of the execution, in seconds.
    pub timestamp: f64,
}

/// Bounded cache of tool results.
#[derive(Debug)]
pub struct ToolResultCache {
    entries: HashMap<String, CachedToolResult>,
    /// Least recently accessed first.
    access_order: Vec<String>,
    /// Oldest stored first.
    insertion_order: Vec<String>,
    max_size: usize,
}

impl Default for ToolResultCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_SIZE)
    }
}

impl ToolResultCache {
    /// Create a cache bounded to `max_size` entries.
    #[must_use]
    pub fn new(max_size: usize) -> Self {
        Self {
            entries: HashMap::new(),
            access_order: Vec::new(),
            insertion_order: Vec::new(),
            max_size: max_size.max(1),
        }
    }

    /// Store a result, evicting the least recently accessed entry at
    /// capacity.
    pub fn store(
        &mut self,
        tool_call_id: impl Into<String>,
        tool_name: impl Into<String>,
        arguments: Value,
        full_content: impl Into<String>,
        summary: impl Into<String>,
        iteration: usize,
    ) {
        let tool_call_id = tool_call_id.into();

        if self.entries.len() >= self.max_size && !self.entries.contains_key(&tool_call_id) {
            if !self.access_order.is_empty() {
                let oldest = self.access_order.remove(0);
                self.entries.remove(&oldest);
                self.insertion_order.retain(|id| id != &oldest);
            }
        }

        self.entries.insert(
            tool_call_id.clone(),
            CachedToolResult {
                tool_call_id: tool_call_id.clone(),
                tool_name: tool_name.into(),
                arguments,
                full_content: full_content.into(),
                summary: summary.into(),
                iteration,
                timestamp: now_secs(),
            },
        );

        self.access_order.retain(|id| id != &tool_call_id);
        self.access_order.push(tool_call_id.clone());
        self.insertion_order.retain(|id| id != &tool_call_id);
        self.insertion_order.push(tool_call_id);
    }

    /// The summary for a call. Does not touch the access order.
    #[must_use]
    pub fn get_summary(&self, tool_call_id: &str) -> Option<&str> {
        self.entries.get(tool_call_id).map(|e| e.summary.as_str())
    }

    /// The full content for a call. Touches the access order.
    #[must_use]
    pub fn get_full_content(&mut self, tool_call_id: &str) -> Option<String> {
        if self.entries.contains_key(tool_call_id) {
            self.access_order.retain(|id| id != tool_call_id);
            self.access_order.push(tool_call_id.to_owned());
        }
        self.entries
            .get(tool_call_id)
            .map(|e| e.full_content.clone())
    }

    /// Every cached result of one tool, oldest stored first.
    #[must_use]
    pub fn get_by_tool_name(&self, tool_name: &str) -> Vec<&CachedToolResult> {
        self.insertion_order
            .iter()
            .filter_map(|id| self.entries.get(id))
            .filter(|e| e.tool_name == tool_name)
            .collect()
    }

    /// Every cached result of one iteration, oldest stored first.
    #[must_use]
    pub fn iteration_results(&self, iteration: usize) -> Vec<&CachedToolResult> {
        self.insertion_order
            .iter()
            .filter_map(|id| self.entries.get(id))
            .filter(|e| e.iteration == iteration)
            .collect()
    }

    /// The `n` most recently stored entries, oldest first.
    #[must_use]
    pub fn recent(&self, n: usize) -> Vec<&CachedToolResult> {
        let start = self.insertion_order.len().saturating_sub(n);
        self.insertion_order[start..]
            .iter()
            .filter_map(|id| self.entries.get(id))
            .collect()
    }

    /// Number of cached entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every entry.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.access_order.clear();
        self.insertion_order.clear();
    }
}

pub(crate) fn now_secs() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0
}
