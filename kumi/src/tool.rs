//! The tool capability: a named callable with a JSON-Schema interface.
//!
//! Every capability the model can invoke implements [`Tool`]. The executor
//! dispatches calls by name, so names must be unique within an agent.
//! A handful of names carry special loop semantics; see the constants in
//! the tools module.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;

/// Result of a tool execution.
///
/// Returned by every tool invocation; failures are carried in-band and
/// never abort the batch.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolResult {
    /// Whether the execution was successful.
    pub success: bool,
    /// The result content for the conversation transcript.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Error message when `success` is false.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Optional structured payload alongside the text content.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ToolResult {
    /// Create a successful result.
    #[must_use]
    pub fn ok(content: impl Into<String>) -> Self {
        Self {
            success: true,
            content: Some(content.into()),
            error: None,
            data: None,
        }
    }

    /// Create a failed result.
    #[must_use]
    pub fn err(error: impl Into<String>) -> Self {
        Self {
            success: false,
            content: None,
            error: Some(error.into()),
            data: None,
        }
    }

    /// Attach a structured payload.
    #[must_use]
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Return a JSON-serializable payload for LLM tool messages.
    #[must_use]
    pub fn to_payload(&self) -> Value {
        let mut payload = serde_json::Map::new();
        payload.insert("success".to_owned(), Value::Bool(self.success));
        if let Some(content) = &self.content {
            payload.insert("content".to_owned(), Value::String(content.clone()));
        }
        if let Some(data) = &self.data {
            payload.insert("data".to_owned(), data.clone());
        }
        if let Some(error) = &self.error {
            payload.insert("error".to_owned(), Value::String(error.clone()));
        }
        Value::Object(payload)
    }
}

/// Trait for callable capabilities exposed to the model.
///
/// # Example
///
/// ```rust,ignore
/// struct EchoTool;
///
/// #[async_trait]
/// impl Tool for EchoTool {
///     fn name(&self) -> &str {
///         "echo"
///     }
///
///     fn description(&self) -> String {
///         "Echo the message back.".to_owned()
///     }
///
///     fn parameters(&self) -> Value {
///         serde_json::json!({
///             "type": "object",
///             "properties": {
///                 "msg": {"type": "string", "description": "Message to echo"}
///             },
///             "required": ["msg"]
///         })
///     }
///
///     async fn execute(&self, arguments: Value) -> Result<ToolResult> {
///         let msg = arguments["msg"].as_str().unwrap_or_default();
///         Ok(ToolResult::ok(msg))
///     }
/// }
/// ```
#[async_trait]
pub trait Tool: Send + Sync {
    /// Tool name. Must be unique within an agent.
    fn name(&self) -> &str;

    /// Tool description for the LLM.
    fn description(&self) -> String;

    /// Tool parameters as a JSON Schema object.
    fn parameters(&self) -> Value;

    /// Optional in-prompt usage guidance.
    fn instructions(&self) -> Option<String> {
        None
    }

    /// Whether [`instructions`](Self::instructions) should be assembled into
    /// the system prompt.
    fn add_instructions_to_prompt(&self) -> bool {
        false
    }

    /// Execute the tool with the given argument mapping.
    ///
    /// An `Err` here is captured by the executor and converted into a
    /// failed [`ToolResult`]; it never crosses the loop boundary.
    async fn execute(&self, arguments: Value) -> Result<ToolResult>;

    /// Exposed schema: `{name, description, input_schema}`.
    fn to_schema(&self) -> Value {
        serde_json::json!({
            "name": self.name(),
            "description": self.description(),
            "input_schema": self.parameters(),
        })
    }
}

/// Type alias for an Arc-wrapped tool.
pub type SharedTool = Arc<dyn Tool>;

/// Validate arguments against a JSON-Schema subset.
///
/// Checks types, `enum`, `required`, numeric `minimum`/`maximum`, nested
/// `properties`, and array `items`/`minItems`/`maxItems`. Returns a list of
/// human-readable violations; empty means valid. Tools that want schema
/// enforcement call this at the top of `execute`.
#[must_use]
pub fn validate_arguments(schema: &Value, arguments: &Value) -> Vec<String> {
    let mut errors = Vec::new();
    validate_value(arguments, schema, "$", &mut errors);
    errors
}

fn validate_value(value: &Value, schema: &Value, path: &str, errors: &mut Vec<String>) {
    let Some(schema_obj) = schema.as_object() else {
        return;
    };

    if let Some(schema_type) = schema_obj.get("type").and_then(Value::as_str) {
        if !matches_type(value, schema_type) {
            errors.push(format!(
                "{path}: expected {schema_type}, got {}",
                type_name(value)
            ));
            return;
        }
    }

    if let Some(allowed) = schema_obj.get("enum").and_then(Value::as_array) {
        if !allowed.contains(value) {
            errors.push(format!("{path}: value must be one of {allowed:?}"));
        }
    }

    if let Some(number) = value.as_f64() {
        if let Some(minimum) = schema_obj.get("minimum").and_then(Value::as_f64) {
            if number < minimum {
                errors.push(format!("{path}: value {number} is less than minimum {minimum}"));
            }
        }
        if let Some(maximum) = schema_obj.get("maximum").and_then(Value::as_f64) {
            if number > maximum {
                errors.push(format!("{path}: value {number} is greater than maximum {maximum}"));
            }
        }
    }

    if let Some(object) = value.as_object() {
        if let Some(required) = schema_obj.get("required").and_then(Value::as_array) {
            for key in required.iter().filter_map(Value::as_str) {
                if !object.contains_key(key) {
                    errors.push(format!("{path}.{key}: missing required field"));
                }
            }
        }
        if let Some(properties) = schema_obj.get("properties").and_then(Value::as_object) {
            for (key, item) in object {
                if let Some(prop_schema) = properties.get(key) {
                    validate_value(item, prop_schema, &format!("{path}.{key}"), errors);
                }
            }
        }
    }

    if let Some(array) = value.as_array() {
        if let Some(items_schema) = schema_obj.get("items") {
            for (idx, item) in array.iter().enumerate() {
                validate_value(item, items_schema, &format!("{path}[{idx}]"), errors);
            }
        }
        if let Some(min_items) = schema_obj.get("minItems").and_then(Value::as_u64) {
            if (array.len() as u64) < min_items {
                errors.push(format!("{path}: expected at least {min_items} items"));
            }
        }
        if let Some(max_items) = schema_obj.get("maxItems").and_then(Value::as_u64) {
            if (array.len() as u64) > max_items {
                errors.push(format!("{path}: expected at most {max_items} items"));
            }
        }
    }
}

fn matches_type(value: &Value, schema_type: &str) -> bool {
    match schema_type {
        "string" => value.is_string(),
        "integer" => value.is_i64() || value.is_u64(),
        "number" => value.is_number(),
        "boolean" => value.is_boolean(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        "null" => value.is_null(),
        _ => true,
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod tool_result {
        use super::*;

        #[test]
        fn ok_sets_success_and_content() {
            let result = ToolResult::ok("done");
            assert!(result.success);
            assert_eq!(result.content.as_deref(), Some("done"));
            assert!(result.error.is_none());
        }

        #[test]
        fn err_sets_failure() {
            let result = ToolResult::err("bad input");
            assert!(!result.success);
            assert_eq!(result.error.as_deref(), Some("bad input"));
        }

        #[test]
        fn payload_includes_present_fields_only() {
            let payload = ToolResult::ok("x").to_payload();
            assert_eq!(payload["success"], true);
            assert_eq!(payload["content"], "x");
            assert!(payload.get("error").is_none());

            let payload = ToolResult::err("y")
                .with_data(serde_json::json!({"k": 1}))
                .to_payload();
            assert_eq!(payload["error"], "y");
            assert_eq!(payload["data"]["k"], 1);
        }
    }

    mod validation {
        use super::*;

        fn schema() -> Value {
            serde_json::json!({
                "type": "object",
                "properties": {
                    "name": {"type": "string"},
                    "count": {"type": "integer", "minimum": 1, "maximum": 10},
                    "mode": {"type": "string", "enum": ["fast", "slow"]},
                    "tags": {"type": "array", "items": {"type": "string"}, "maxItems": 2}
                },
                "required": ["name"]
            })
        }

        #[test]
        fn valid_arguments_pass() {
            let args = serde_json::json!({
                "name": "a", "count": 3, "mode": "fast", "tags": ["x"]
            });
            assert!(validate_arguments(&schema(), &args).is_empty());
        }

        #[test]
        fn missing_required_field_reported() {
            let errors = validate_arguments(&schema(), &serde_json::json!({"count": 3}));
            assert!(errors.iter().any(|e| e.contains("name")));
        }

        #[test]
        fn type_mismatch_reported() {
            let errors =
                validate_arguments(&schema(), &serde_json::json!({"name": 42}));
            assert!(errors.iter().any(|e| e.contains("expected string")));
        }

        #[test]
        fn range_and_enum_checked() {
            let errors = validate_arguments(
                &schema(),
                &serde_json::json!({"name": "a", "count": 99, "mode": "warp"}),
            );
            assert_eq!(errors.len(), 2);
        }

        #[test]
        fn array_bounds_checked() {
            let errors = validate_arguments(
                &schema(),
                &serde_json::json!({"name": "a", "tags": ["x", "y", "z"]}),
            );
            assert!(errors.iter().any(|e| e.contains("at most 2")));
        }
    }
}
