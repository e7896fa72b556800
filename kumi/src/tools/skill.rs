//! The `get_skill` tool: level-2 of progressive disclosure.
//!
//! The system prompt carries only skill names and descriptions; the agent
//! fetches a skill's full content through this tool when the task calls
//! for it.

use async_trait::async_trait;
use serde_json::Value;

use super::TOOL_GET_SKILL;
use crate::error::Result;
use crate::skills::SkillLoader;
use crate::tool::{Tool, ToolResult};

/// Resolves a named skill to its full content.
#[derive(Debug, Clone)]
pub struct GetSkillTool {
    loader: SkillLoader,
}

impl GetSkillTool {
    /// Create the tool over a loader with discovered skills.
    #[must_use]
    pub const fn new(loader: SkillLoader) -> Self {
        Self { loader }
    }
}

#[async_trait]
impl Tool for GetSkillTool {
    fn name(&self) -> &str {
        TOOL_GET_SKILL
    }

    fn description(&self) -> String {
        "Load the full content of an available skill by name. Use this when a \
         task matches one of the skills listed in your system prompt."
            .to_owned()
    }

    fn parameters(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "name": {
                    "type": "string",
                    "description": "Name of the skill to load"
                }
            },
            "required": ["name"]
        })
    }

    async fn execute(&self, arguments: Value) -> Result<ToolResult> {
        let Some(name) = arguments.get("name").and_then(Value::as_str) else {
            return Ok(ToolResult::err("Missing required argument: name"));
        };

        match self.loader.get_skill(name) {
            Some(skill) => Ok(ToolResult::ok(skill.to_prompt())),
            None => {
                let available = self.loader.list_skills().join(", ");
                Ok(ToolResult::err(format!(
                    "Skill '{name}' not found. Available skills: {available}"
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn loader_with_skill(dir: &Path) -> SkillLoader {
        let skill_dir = dir.join("pdf");
        std::fs::create_dir_all(&skill_dir).unwrap();
        std::fs::write(
            skill_dir.join("SKILL.md"),
            "---\nname: pdf\ndescription: Work with PDFs\n---\nUse a PDF library.",
        )
        .unwrap();
        let mut loader = SkillLoader::new(dir);
        loader.discover();
        loader
    }

    #[tokio::test]
    async fn returns_full_skill_content() {
        let dir = tempfile::tempdir().unwrap();
        let tool = GetSkillTool::new(loader_with_skill(dir.path()));

        let result = tool
            .execute(serde_json::json!({"name": "pdf"}))
            .await
            .unwrap();
        assert!(result.success);
        let content = result.content.unwrap();
        assert!(content.contains("# Skill: pdf"));
        assert!(content.contains("Use a PDF library."));
    }

    #[tokio::test]
    async fn unknown_skill_lists_available() {
        let dir = tempfile::tempdir().unwrap();
        let tool = GetSkillTool::new(loader_with_skill(dir.path()));

        let result = tool
            .execute(serde_json::json!({"name": "ghost"}))
            .await
            .unwrap();
        assert!(!result.success);
        assert!(result.error.unwrap().contains("pdf"));
    }

    #[tokio::test]
    async fn missing_name_argument_fails() {
        let dir = tempfile::tempdir().unwrap();
        let tool = GetSkillTool::new(loader_with_skill(dir.path()));

        let result = tool.execute(serde_json::json!({})).await.unwrap();
        assert!(!result.success);
    }
}
