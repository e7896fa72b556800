//! Token accounting and iterative history summarization.
//!
//! [`TokenManager`] estimates the prompt size of a transcript and, when
//! the estimate exceeds the configured limit, rewrites the history so that
//! every user turn survives in place while each execution round between
//! user turns collapses into a single synthetic summary message.
//!
//! The estimator is an approximation: roughly 2.5 characters per token
//! plus a small per-message overhead. It only needs to be consistent, not
//! exact; the limit exists to bound prompt growth, not to bill tokens.

use tracing::{debug, info, warn};

use crate::llm::SharedLlmClient;
use crate::message::{Message, Role, ToolCall};

/// Per-message metadata overhead, in tokens.
const MESSAGE_OVERHEAD_TOKENS: usize = 4;

/// Label prefixed to synthetic summary messages.
const SUMMARY_LABEL: &str = "[Assistant Execution Summary]";

/// Manages token estimation and history summarization for one agent.
pub struct TokenManager {
    llm: SharedLlmClient,
    token_limit: usize,
    enable_summarization: bool,
}

impl TokenManager {
    /// Create a manager that summarizes through the given client.
    #[must_use]
    pub fn new(llm: SharedLlmClient, token_limit: usize, enable_summarization: bool) -> Self {
        Self {
            llm,
            token_limit,
            enable_summarization,
        }
    }

    /// The configured token limit.
    #[must_use]
    pub const fn token_limit(&self) -> usize {
        self.token_limit
    }

    /// Approximate the token count of a transcript.
    #[must_use]
    pub fn estimate_tokens(&self, messages: &[Message]) -> usize {
        let mut total_chars = 0usize;
        for msg in messages {
            total_chars += msg.content.char_len();
            if let Some(thinking) = &msg.thinking {
                total_chars += thinking.chars().count();
            }
            if let Some(calls) = &msg.tool_calls {
                for call in calls {
                    total_chars += call.function.name.chars().count();
                    total_chars += call.function.arguments.to_string().chars().count();
                }
            }
        }
        let content_tokens = (total_chars as f64 / 2.5).ceil() as usize;
        content_tokens + messages.len() * MESSAGE_OVERHEAD_TOKENS
    }

    /// Return a possibly shorter transcript.
    ///
    /// Summarizes only when enabled and the estimate exceeds the limit.
    /// Message 0 (system) is always retained; the order of user turns is
    /// preserved; no assistant/tool message survives outside its summary.
    /// Never fails: a summarizer error degrades to a deterministic
    /// placeholder.
    pub async fn maybe_summarize(&self, messages: Vec<Message>) -> Vec<Message> {
        if !self.enable_summarization {
            return messages;
        }

        let estimated = self.estimate_tokens(&messages);
        if estimated <= self.token_limit {
            return messages;
        }

        info!(
            estimated,
            limit = self.token_limit,
            "Token limit exceeded, summarizing execution rounds"
        );

        // User turns after the system message anchor the rounds.
        let user_indices: Vec<usize> = messages
            .iter()
            .enumerate()
            .filter(|(i, msg)| *i > 0 && msg.role == Role::User)
            .map(|(i, _)| i)
            .collect();

        if user_indices.is_empty() {
            warn!("No user turns to anchor summarization, keeping history as is");
            return messages;
        }

        let mut new_messages = vec![messages[0].clone()];
        for (round, &user_idx) in user_indices.iter().enumerate() {
            new_messages.push(messages[user_idx].clone());

            let round_end = user_indices
                .get(round + 1)
                .copied()
                .unwrap_or(messages.len());
            let round_messages = &messages[user_idx + 1..round_end];
            if round_messages.is_empty() {
                continue;
            }

            let summary = self.create_summary(round_messages, round + 1).await;
            if !summary.is_empty() {
                new_messages.push(Message::user(format!("{SUMMARY_LABEL}\n\n{summary}")));
            }
        }

        debug!(
            before = estimated,
            after = self.estimate_tokens(&new_messages),
            "Summarization complete"
        );
        new_messages
    }

    /// Summarize one execution round through the LLM, with a deterministic
    /// placeholder on failure.
    async fn create_summary(&self, round: &[Message], round_num: usize) -> String {
        let mut transcript = format!("Round {round_num} execution process:\n\n");
        for msg in round {
            match msg.role {
                Role::Assistant => {
                    transcript.push_str(&format!("Assistant: {}\n", msg.text()));
                    if let Some(calls) = &msg.tool_calls {
                        let names: Vec<&str> = calls.iter().map(ToolCall::name).collect();
                        transcript.push_str(&format!("  -> Called tools: {}\n", names.join(", ")));
                    }
                }
                Role::Tool => {
                    let mut preview = msg.text();
                    if preview.chars().count() > 500 {
                        preview = preview.chars().take(500).collect::<String>() + "...";
                    }
                    transcript.push_str(&format!("  <- Tool returned: {preview}\n"));
                }
                Role::System | Role::User => {}
            }
        }

        let prompt = format!(
            "Please provide a concise summary of the following agent execution process:\n\n\
             {transcript}\n\
             Requirements:\n\
             1. Focus on what tasks were completed and which tools were called\n\
             2. Keep key execution results and important findings\n\
             3. Be concise and clear, within 1000 words\n\
             4. Only summarize the assistant's execution process"
        );

        let request = vec![
            Message::system(
                "You are an assistant skilled at summarizing agent execution processes.",
            ),
            Message::user(prompt),
        ];

        match self.llm.generate(&request, None, None).await {
            Ok(response) => response.content,
            Err(error) => {
                warn!(%error, round = round_num, "Summary generation failed");
                format!(
                    "Round {round_num}: executed {} steps (summary generation failed)",
                    round.len()
                )
            }
        }
    }
}

impl std::fmt::Debug for TokenManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenManager")
            .field("token_limit", &self.token_limit)
            .field("enable_summarization", &self.enable_summarization)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{LlmResponse, MockLlm};
    use std::sync::Arc;

    fn manager(limit: usize, enabled: bool) -> (Arc<MockLlm>, TokenManager) {
        let llm = Arc::new(MockLlm::new());
        let mgr = TokenManager::new(llm.clone(), limit, enabled);
        (llm, mgr)
    }

    fn transcript() -> Vec<Message> {
        vec![
            Message::system("system prompt"),
            Message::user("first task"),
            Message::assistant("working on it"),
            Message::tool("c1", "echo", "tool output one"),
            Message::user("second task"),
            Message::assistant("done with everything"),
        ]
    }

    #[test]
    fn estimate_counts_content_thinking_and_calls() {
        let (_, mgr) = manager(1000, true);
        let plain = vec![Message::user("abcde")];
        let base = mgr.estimate_tokens(&plain);
        assert_eq!(base, 2 + MESSAGE_OVERHEAD_TOKENS);

        let mut with_thinking = plain.clone();
        with_thinking[0].thinking = Some("abcde".into());
        assert!(mgr.estimate_tokens(&with_thinking) > base);
    }

    #[tokio::test]
    async fn under_limit_returns_input_unchanged() {
        let (_, mgr) = manager(100_000, true);
        let messages = transcript();
        let out = mgr.maybe_summarize(messages.clone()).await;
        assert_eq!(out.len(), messages.len());
    }

    #[tokio::test]
    async fn disabled_summarization_is_identity() {
        let (_, mgr) = manager(1, false);
        let messages = transcript();
        let out = mgr.maybe_summarize(messages.clone()).await;
        assert_eq!(out.len(), messages.len());
    }

    #[tokio::test]
    async fn summarization_preserves_system_and_user_order() {
        let (llm, mgr) = manager(1, true);
        llm.push_response(LlmResponse::text("round one summary"));
        llm.push_response(LlmResponse::text("round two summary"));

        let out = mgr.maybe_summarize(transcript()).await;

        assert_eq!(out[0].role, Role::System);
        let user_texts: Vec<String> = out
            .iter()
            .filter(|m| m.role == Role::User && !m.text().starts_with(SUMMARY_LABEL))
            .map(Message::text)
            .collect();
        assert_eq!(user_texts, ["first task", "second task"]);

        // No assistant/tool message survives outside its summary.
        assert!(out.iter().all(|m| m.role != Role::Assistant && m.role != Role::Tool));

        let summaries: Vec<&Message> = out
            .iter()
            .filter(|m| m.text().starts_with(SUMMARY_LABEL))
            .collect();
        assert_eq!(summaries.len(), 2);
        assert!(summaries[0].text().contains("round one summary"));
    }

    #[tokio::test]
    async fn summarizer_failure_uses_deterministic_placeholder() {
        let (llm, mgr) = manager(1, true);
        llm.push_failure("unavailable");
        llm.push_failure("unavailable");

        let out = mgr.maybe_summarize(transcript()).await;
        let summaries: Vec<String> = out
            .iter()
            .filter(|m| m.text().starts_with(SUMMARY_LABEL))
            .map(Message::text)
            .collect();
        assert!(summaries[0].contains("Round 1: executed 2 steps (summary generation failed)"));
    }
}
