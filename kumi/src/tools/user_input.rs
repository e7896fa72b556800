//! The `get_user_input` tool for human-in-the-loop pauses.
//!
//! The tool's execute body is a placeholder: the step loop detects a call
//! to this name before executing the batch, parks the run in the
//! waiting-input state, and handles the pause/resume protocol itself.

use async_trait::async_trait;
use serde_json::Value;

use super::TOOL_GET_USER_INPUT;
use crate::error::Result;
use crate::message::UserInputField;
use crate::tool::{Tool, ToolResult};

/// Requests additional information from the user mid-run.
#[derive(Debug, Clone, Copy, Default)]
pub struct GetUserInputTool;

#[async_trait]
impl Tool for GetUserInputTool {
    fn name(&self) -> &str {
        TOOL_GET_USER_INPUT
    }

    fn description(&self) -> String {
        "Request additional information from the user. Use this when you need \
         clarification or missing information to complete a task. Provide all \
         required fields as if the user were filling out a form."
            .to_owned()
    }

    fn parameters(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "user_input_fields": {
                    "type": "array",
                    "description": "List of fields requiring user input",
                    "items": {
                        "type": "object",
                        "properties": {
                            "field_name": {
                                "type": "string",
                                "description": "The name of the field"
                            },
                            "field_type": {
                                "type": "string",
                                "description": "The type of the field (str, int, float, bool, list, dict)",
                                "enum": ["str", "int", "float", "bool", "list", "dict"]
                            },
                            "field_description": {
                                "type": "string",
                                "description": "A description of what information is needed"
                            }
                        },
                        "required": ["field_name", "field_description"]
                    }
                },
                "context": {
                    "type": "string",
                    "description": "Additional context explaining why this input is needed"
                }
            },
            "required": ["user_input_fields"]
        })
    }

    fn instructions(&self) -> Option<String> {
        Some(
            "## User Input Tool Guidelines\n\
             \n\
             You have access to the `get_user_input` tool to request information from the user.\n\
             \n\
             ### When to Use:\n\
             - When you don't have enough information to complete a task\n\
             - When you need clarification on ambiguous requirements\n\
             - When critical information is missing (e.g., API keys, file paths, configuration values)\n\
             \n\
             ### Important Guidelines:\n\
             - Don't guess or make up information, ask the user instead\n\
             - Include only required fields\n\
             - Provide clear descriptions so the user understands what's needed\n\
             - Don't ask the same question twice; accept whatever the user provides"
                .to_owned(),
        )
    }

    fn add_instructions_to_prompt(&self) -> bool {
        true
    }

    async fn execute(&self, _arguments: Value) -> Result<ToolResult> {
        // The pause/resume logic lives in the step loop; this body only
        // runs if the tool is invoked outside of it.
        Ok(ToolResult::ok(
            "User input request registered. Waiting for user response.",
        ))
    }
}

/// Parse the `user_input_fields` argument of a `get_user_input` call.
#[must_use]
pub fn parse_user_input_fields(arguments: &Value) -> Vec<UserInputField> {
    arguments
        .get("user_input_fields")
        .and_then(Value::as_array)
        .map(|fields| {
            fields
                .iter()
                .map(|field| UserInputField {
                    field_name: field
                        .get("field_name")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_owned(),
                    field_type: field
                        .get("field_type")
                        .and_then(Value::as_str)
                        .unwrap_or("str")
                        .to_owned(),
                    field_description: field
                        .get("field_description")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_owned(),
                    value: None,
                })
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_fields_defaults_missing_type_to_str() {
        let args = serde_json::json!({
            "user_input_fields": [
                {"field_name": "api_key", "field_description": "your key"},
                {"field_name": "count", "field_type": "int", "field_description": "how many"}
            ]
        });
        let fields = parse_user_input_fields(&args);
        assert_eq!(fields.len(), 2);
        assert_eq!(fields[0].field_type, "str");
        assert_eq!(fields[1].field_type, "int");
    }

    #[test]
    fn parse_fields_tolerates_missing_list() {
        assert!(parse_user_input_fields(&serde_json::json!({})).is_empty());
    }

    #[tokio::test]
    async fn execute_returns_placeholder() {
        let result = GetUserInputTool
            .execute(serde_json::json!({"user_input_fields": []}))
            .await
            .unwrap();
        assert!(result.success);
    }

    #[test]
    fn schema_requires_field_list() {
        let schema = GetUserInputTool.to_schema();
        assert_eq!(schema["name"], TOOL_GET_USER_INPUT);
        assert_eq!(schema["input_schema"]["required"][0], "user_input_fields");
    }
}
