//! Completion detection for the Ralph loop.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use super::{CompletionCondition, CompletionResult, RalphConfig};

static PROMISE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<promise>(.*?)</promise>").expect("static regex"));

/// Checks the configured completion conditions after each iteration.
#[derive(Debug)]
pub struct CompletionDetector {
    config: RalphConfig,
    idle_count: usize,
    last_files_modified: BTreeSet<String>,
}

impl CompletionDetector {
    /// Create a detector for the given config.
    #[must_use]
    pub const fn new(config: RalphConfig) -> Self {
        Self {
            config,
            idle_count: 0,
            last_files_modified: BTreeSet::new(),
        }
    }

    /// Check the iteration's content and file-modification set.
    ///
    /// Conditions are evaluated in order: promise tag, iteration bound,
    /// idle streak. The idle counter tallies consecutive iterations whose
    /// file set equals the previous iteration's set.
    pub fn check(
        &mut self,
        content: &str,
        iteration: usize,
        files_modified: &BTreeSet<String>,
    ) -> CompletionResult {
        let conditions = &self.config.completion_conditions;

        if conditions.contains(&CompletionCondition::PromiseTag) {
            if let Some(caps) = PROMISE_PATTERN.captures(content) {
                let promise_text = caps[1].trim().to_owned();
                if promise_text
                    .to_lowercase()
                    .contains(&self.config.completion_promise.to_lowercase())
                {
                    return CompletionResult {
                        completed: true,
                        reason: Some(CompletionCondition::PromiseTag),
                        message: format!("Completion promise detected: {promise_text}"),
                    };
                }
            }
        }

        if conditions.contains(&CompletionCondition::MaxIterations)
            && iteration >= self.config.max_iterations
        {
            return CompletionResult {
                completed: true,
                reason: Some(CompletionCondition::MaxIterations),
                message: format!("Max iterations ({}) reached", self.config.max_iterations),
            };
        }

        if conditions.contains(&CompletionCondition::IdleThreshold) {
            if *files_modified == self.last_files_modified {
                self.idle_count += 1;
            } else {
                self.idle_count = 0;
                self.last_files_modified = files_modified.clone();
            }
            debug!(idle_count = self.idle_count, "Idle streak updated");

            if self.idle_count >= self.config.idle_threshold {
                return CompletionResult {
                    completed: true,
                    reason: Some(CompletionCondition::IdleThreshold),
                    message: format!("No file changes for {} iterations", self.idle_count),
                };
            }
        }

        CompletionResult::not_completed()
    }

    /// Reset the idle tracking.
    pub fn reset(&mut self) {
        self.idle_count = 0;
        self.last_files_modified.clear();
    }
}
