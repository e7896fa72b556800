//! Error types for the kumi runtime.
//!
//! A single [`AgentError`] enum covers every failure surface of the crate,
//! with struct variants carrying enough context for debugging. User-visible
//! strings produced by the step loop (see the agent module) are built from
//! these variants' `Display` output.

use thiserror::Error;

/// A type alias for `Result<T, AgentError>`.
pub type Result<T> = std::result::Result<T, AgentError>;

/// The main error type for agent operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AgentError {
    /// The upstream LLM call raised. Terminal for a run.
    #[error("LLM call failed: {message}")]
    Llm {
        /// The underlying error message.
        message: String,
    },

    /// A tool failed during execution.
    #[error("Tool execution error in '{tool_name}': {message}")]
    ToolExecution {
        /// Name of the tool that failed.
        tool_name: String,
        /// The underlying error message.
        message: String,
    },

    /// The step loop exhausted its budget without completing the task.
    #[error("Task couldn't be completed after {max_steps} steps.")]
    MaxSteps {
        /// Number of steps taken.
        steps: usize,
        /// Maximum allowed steps.
        max_steps: usize,
    },

    /// Invalid configuration.
    #[error("Configuration error: {message}")]
    Configuration {
        /// Description of the configuration issue.
        message: String,
    },

    /// Checkpoint storage failed. The loop never swallows this.
    #[error("Checkpoint error: {message}")]
    Checkpoint {
        /// The underlying error message.
        message: String,
    },

    /// Session storage failed.
    #[error("Session error: {message}")]
    Session {
        /// The underlying error message.
        message: String,
    },

    /// Graph definition or execution failed.
    #[error("Graph error: {message}")]
    Graph {
        /// The underlying error message.
        message: String,
    },

    /// Task dependency resolution failed (missing reference or cycle).
    #[error("Dependency error: {message}")]
    Dependency {
        /// The underlying error message.
        message: String,
    },

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error from a filesystem-backed store.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl AgentError {
    /// Create a new LLM error.
    #[must_use]
    pub fn llm(message: impl Into<String>) -> Self {
        Self::Llm {
            message: message.into(),
        }
    }

    /// Create a new tool execution error.
    #[must_use]
    pub fn tool_execution(tool_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ToolExecution {
            tool_name: tool_name.into(),
            message: message.into(),
        }
    }

    /// Create a new max steps error.
    #[must_use]
    pub const fn max_steps(steps: usize, max_steps: usize) -> Self {
        Self::MaxSteps { steps, max_steps }
    }

    /// Create a new configuration error.
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a new checkpoint error.
    #[must_use]
    pub fn checkpoint(message: impl Into<String>) -> Self {
        Self::Checkpoint {
            message: message.into(),
        }
    }

    /// Create a new session error.
    #[must_use]
    pub fn session(message: impl Into<String>) -> Self {
        Self::Session {
            message: message.into(),
        }
    }

    /// Create a new graph error.
    #[must_use]
    pub fn graph(message: impl Into<String>) -> Self {
        Self::Graph {
            message: message.into(),
        }
    }

    /// Create a new dependency error.
    #[must_use]
    pub fn dependency(message: impl Into<String>) -> Self {
        Self::Dependency {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn llm_error_display_matches_loop_contract() {
        let err = AgentError::llm("connection reset");
        assert_eq!(err.to_string(), "LLM call failed: connection reset");
    }

    #[test]
    fn max_steps_display_matches_loop_contract() {
        let err = AgentError::max_steps(3, 3);
        assert_eq!(err.to_string(), "Task couldn't be completed after 3 steps.");
    }

    #[test]
    fn tool_execution_carries_tool_name() {
        let err = AgentError::tool_execution("bash", "timed out");
        assert!(err.to_string().contains("bash"));
        assert!(err.to_string().contains("timed out"));
    }

    #[test]
    fn json_error_converts() {
        let parse: serde_json::Result<serde_json::Value> = serde_json::from_str("{");
        let err: AgentError = parse.unwrap_err().into();
        assert!(matches!(err, AgentError::Json(_)));
    }
}
