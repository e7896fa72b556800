//! Message types for agent-model communication.
//!
//! This module defines the canonical conversation representation shared by
//! the step loop, the checkpoint system, and the LLM capability: roles,
//! messages, tool calls, and the human-in-the-loop input request types.
//!
//! Order within a conversation is significant: a `tool` message always
//! answers a preceding assistant `tool_calls` entry via its `tool_call_id`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Role of a message in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System message providing instructions. Always element 0.
    System,
    /// User message.
    User,
    /// Assistant (model) message.
    Assistant,
    /// Tool result message.
    Tool,
}

impl Role {
    /// Get the string representation of the role.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Tool => "tool",
        }
    }
}

/// Message content: plain text or a sequence of structured blocks.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Content {
    /// Plain text content.
    Text(String),
    /// Structured content blocks (provider-specific shapes).
    Blocks(Vec<Value>),
}

impl Content {
    /// Flatten the content into a single text string.
    ///
    /// Structured blocks are rendered through their JSON form, which is the
    /// behaviour the token estimator and summarizer rely on.
    #[must_use]
    pub fn text(&self) -> String {
        match self {
            Self::Text(s) => s.clone(),
            Self::Blocks(blocks) => blocks
                .iter()
                .map(|b| b.as_str().map_or_else(|| b.to_string(), ToString::to_string))
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }

    /// Character length of the flattened content.
    #[must_use]
    pub fn char_len(&self) -> usize {
        match self {
            Self::Text(s) => s.chars().count(),
            Self::Blocks(blocks) => blocks.iter().map(|b| b.to_string().chars().count()).sum(),
        }
    }

    /// Check whether the content is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Text(s) => s.is_empty(),
            Self::Blocks(blocks) => blocks.is_empty(),
        }
    }
}

impl Default for Content {
    fn default() -> Self {
        Self::Text(String::new())
    }
}

impl From<&str> for Content {
    fn from(s: &str) -> Self {
        Self::Text(s.to_owned())
    }
}

impl From<String> for Content {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

/// Function call information in a tool call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionCall {
    /// Name of the function to call.
    pub name: String,
    /// Arguments to pass to the function as a JSON mapping.
    #[serde(default)]
    pub arguments: Value,
    /// Raw arguments string preserved when parsing failed upstream.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments_raw: Option<String>,
    /// Parsing error message for the arguments, when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parse_error: Option<String>,
}

/// A tool call requested by the model.
///
/// The `id` links an assistant's request to its `tool` reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique identifier for the tool call.
    pub id: String,
    /// Type of the tool call (always `"function"`).
    #[serde(rename = "type", default = "default_call_type")]
    pub call_type: String,
    /// The function to call.
    pub function: FunctionCall,
}

fn default_call_type() -> String {
    "function".to_owned()
}

impl ToolCall {
    /// Create a new tool call.
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: id.into(),
            call_type: default_call_type(),
            function: FunctionCall {
                name: name.into(),
                arguments,
                arguments_raw: None,
                parse_error: None,
            },
        }
    }

    /// Get the name of the function being called.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.function.name
    }

    /// Get the arguments as a JSON value.
    #[must_use]
    pub const fn arguments(&self) -> &Value {
        &self.function.arguments
    }
}

/// A message in the conversation history.
///
/// Immutable once appended to an [`AgentState`](crate::agent::AgentState)
/// transcript.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Role of the message sender.
    pub role: Role,
    /// Content of the message.
    #[serde(default)]
    pub content: Content,
    /// Model thinking/reasoning text, when surfaced by the provider.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking: Option<String>,
    /// Tool calls requested by the model (assistant messages only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    /// Tool call ID this message answers (tool messages only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// Tool name (tool messages only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Message {
    /// Create a new system message.
    #[must_use]
    pub fn system(content: impl Into<Content>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
            thinking: None,
            tool_calls: None,
            tool_call_id: None,
            name: None,
        }
    }

    /// Create a new user message.
    #[must_use]
    pub fn user(content: impl Into<Content>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            thinking: None,
            tool_calls: None,
            tool_call_id: None,
            name: None,
        }
    }

    /// Create a new assistant message.
    #[must_use]
    pub fn assistant(content: impl Into<Content>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            thinking: None,
            tool_calls: None,
            tool_call_id: None,
            name: None,
        }
    }

    /// Create an assistant message carrying content, thinking, and tool calls.
    #[must_use]
    pub fn assistant_with_tool_calls(
        content: impl Into<Content>,
        thinking: Option<String>,
        tool_calls: Option<Vec<ToolCall>>,
    ) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            thinking,
            tool_calls,
            tool_call_id: None,
            name: None,
        }
    }

    /// Create a new tool result message.
    #[must_use]
    pub fn tool(
        tool_call_id: impl Into<String>,
        name: impl Into<String>,
        content: impl Into<Content>,
    ) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
            thinking: None,
            tool_calls: None,
            tool_call_id: Some(tool_call_id.into()),
            name: Some(name.into()),
        }
    }

    /// Get the flattened text content of the message.
    #[must_use]
    pub fn text(&self) -> String {
        self.content.text()
    }

    /// Check if this message has tool calls.
    #[must_use]
    pub fn has_tool_calls(&self) -> bool {
        self.tool_calls
            .as_ref()
            .is_some_and(|calls| !calls.is_empty())
    }
}

/// Schema for a single user input field request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserInputField {
    /// The name of the field.
    pub field_name: String,
    /// Expected type (`str`, `int`, `float`, `bool`, `list`, `dict`).
    #[serde(default = "default_field_type")]
    pub field_type: String,
    /// Description of what information is needed.
    pub field_description: String,
    /// Value provided by the user, filled after input.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

fn default_field_type() -> String {
    "str".to_owned()
}

/// Request for user input, surfaced when the agent pauses for a human.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserInputRequest {
    /// ID of the tool call that triggered this request.
    pub tool_call_id: String,
    /// Fields requiring user input.
    #[serde(default)]
    pub fields: Vec<UserInputField>,
    /// Context explaining why input is needed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

/// The user's response to an input request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserInputResponse {
    /// ID of the original tool call.
    pub tool_call_id: String,
    /// Map of field name to the provided value.
    #[serde(default)]
    pub field_values: std::collections::HashMap<String, Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    mod content {
        use super::*;

        #[test]
        fn text_flattens_blocks() {
            let content = Content::Blocks(vec![
                Value::String("hello".into()),
                serde_json::json!({"type": "image", "url": "x"}),
            ]);
            let text = content.text();
            assert!(text.contains("hello"));
            assert!(text.contains("image"));
        }

        #[test]
        fn serde_untagged_roundtrip() {
            let text: Content = serde_json::from_str("\"hi\"").unwrap();
            assert_eq!(text.text(), "hi");

            let blocks: Content = serde_json::from_str(r#"[{"type":"text"}]"#).unwrap();
            assert!(matches!(blocks, Content::Blocks(_)));
        }
    }

    mod message {
        use super::*;

        #[test]
        fn constructors_set_roles() {
            assert_eq!(Message::system("s").role.as_str(), "system");
            assert_eq!(Message::user("u").role.as_str(), "user");
            assert_eq!(Message::assistant("a").role.as_str(), "assistant");
            assert_eq!(Message::tool("c1", "echo", "out").role.as_str(), "tool");
        }

        #[test]
        fn tool_message_links_call_id() {
            let msg = Message::tool("call_42", "echo", "done");
            assert_eq!(msg.tool_call_id.as_deref(), Some("call_42"));
            assert_eq!(msg.name.as_deref(), Some("echo"));
        }

        #[test]
        fn has_tool_calls_ignores_empty_list() {
            let msg = Message::assistant_with_tool_calls("", None, Some(vec![]));
            assert!(!msg.has_tool_calls());

            let call = ToolCall::new("c1", "echo", serde_json::json!({}));
            let msg = Message::assistant_with_tool_calls("", None, Some(vec![call]));
            assert!(msg.has_tool_calls());
        }

        #[test]
        fn serde_skips_absent_fields() {
            let json = serde_json::to_string(&Message::user("hi")).unwrap();
            assert!(!json.contains("tool_calls"));
            assert!(!json.contains("thinking"));
        }

        #[test]
        fn serde_roundtrip_with_tool_calls() {
            let call = ToolCall::new("c1", "echo", serde_json::json!({"msg": "hi"}));
            let msg = Message::assistant_with_tool_calls("text", Some("why".into()), Some(vec![call]));
            let json = serde_json::to_string(&msg).unwrap();
            let parsed: Message = serde_json::from_str(&json).unwrap();
            assert_eq!(parsed.tool_calls.unwrap()[0].name(), "echo");
            assert_eq!(parsed.thinking.as_deref(), Some("why"));
        }
    }

    mod tool_call {
        use super::*;

        #[test]
        fn new_defaults_to_function_type() {
            let call = ToolCall::new("c1", "search", serde_json::json!({"q": "rust"}));
            assert_eq!(call.call_type, "function");
            assert_eq!(call.name(), "search");
            assert_eq!(call.arguments()["q"], "rust");
        }

        #[test]
        fn serde_renames_call_type() {
            let call = ToolCall::new("c1", "search", Value::Null);
            let json = serde_json::to_value(&call).unwrap();
            assert_eq!(json["type"], "function");
        }
    }
}
