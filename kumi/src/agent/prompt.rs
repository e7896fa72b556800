//! Structured system prompt assembly.
//!
//! Sections are rendered in a fixed order and wrapped in XML tags so the
//! model can parse the structure reliably:
//!
//! 1. name heading, 2. description, 3. `<your_role>`, 4. `<instructions>`,
//! 5. `<output_format>` (markdown guidance), 6. `<tool_usage_guidelines>`,
//! 7. skills metadata, 8. `<expected_output>`, 9. `<workspace_info>`,
//! 10. `<current_datetime>`, 11. `<additional_information>`,
//! 12. custom sections in insertion order, 13. trailing context.

use std::path::Path;

use chrono::{FixedOffset, Utc};
use serde::{Deserialize, Serialize};

/// Configuration for the structured system prompt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemPromptConfig {
    /// Agent name, rendered as a heading.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Description paragraph at the top of the prompt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Role definition, wrapped in `<your_role>`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// Instruction list, wrapped in `<instructions>`.
    #[serde(default)]
    pub instructions: Vec<String>,
    /// Expected output format, wrapped in `<expected_output>`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_output: Option<String>,
    /// Ask for markdown-formatted output.
    #[serde(default)]
    pub markdown: bool,
    /// Add the current time to the context.
    #[serde(default)]
    pub add_datetime_to_context: bool,
    /// Add workspace information to the context.
    #[serde(default = "default_true")]
    pub add_workspace_info: bool,
    /// Timezone identifier (`UTC` or a fixed offset like `+09:00`).
    #[serde(default = "default_timezone")]
    pub timezone: String,
    /// Trailing context paragraph at the end of the prompt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional_context: Option<String>,
    /// Extra bullet list, wrapped in `<additional_information>`.
    #[serde(default)]
    pub additional_information: Vec<String>,
    /// Custom XML-tagged sections, rendered in insertion order.
    #[serde(default)]
    pub custom_sections: Vec<(String, String)>,
}

fn default_true() -> bool {
    true
}

fn default_timezone() -> String {
    "UTC".to_owned()
}

impl Default for SystemPromptConfig {
    fn default() -> Self {
        Self {
            name: None,
            description: None,
            role: None,
            instructions: Vec::new(),
            expected_output: None,
            markdown: false,
            add_datetime_to_context: false,
            add_workspace_info: true,
            timezone: default_timezone(),
            additional_context: None,
            additional_information: Vec::new(),
            custom_sections: Vec::new(),
        }
    }
}

impl SystemPromptConfig {
    /// Create a config with only a description.
    #[must_use]
    pub fn described(description: impl Into<String>) -> Self {
        Self {
            description: Some(description.into()),
            ..Self::default()
        }
    }

    /// Set the agent name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the role definition.
    #[must_use]
    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }

    /// Append an instruction.
    #[must_use]
    pub fn with_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.instructions.push(instruction.into());
        self
    }

    /// Set the expected output section.
    #[must_use]
    pub fn with_expected_output(mut self, expected: impl Into<String>) -> Self {
        self.expected_output = Some(expected.into());
        self
    }

    /// Append a custom XML-tagged section.
    #[must_use]
    pub fn with_custom_section(
        mut self,
        tag: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        self.custom_sections.push((tag.into(), content.into()));
        self
    }
}

/// Builds the structured system prompt from a config plus runtime inputs.
#[derive(Debug, Default)]
pub struct SystemPromptBuilder;

impl SystemPromptBuilder {
    /// Assemble the prompt.
    ///
    /// `skills_metadata` is the level-1 skills block (names and
    /// descriptions only); `tool_instructions` is collected from every
    /// tool that opts into prompt guidance.
    #[must_use]
    pub fn build(
        config: &SystemPromptConfig,
        workspace_dir: Option<&Path>,
        skills_metadata: Option<&str>,
        tool_instructions: &[String],
    ) -> String {
        let mut sections: Vec<String> = Vec::new();

        if let Some(name) = &config.name {
            sections.push(format!("# {name}\n"));
        }

        if let Some(description) = &config.description {
            sections.push(description.clone());
        }

        if let Some(role) = &config.role {
            sections.push(format!("<your_role>\n{role}\n</your_role>"));
        }

        if !config.instructions.is_empty() {
            sections.push(Self::instructions_section(&config.instructions));
        }

        if config.markdown {
            sections.push(Self::markdown_section());
        }

        if !tool_instructions.is_empty() {
            let mut section = String::from("<tool_usage_guidelines>");
            for instruction in tool_instructions {
                section.push('\n');
                section.push_str(instruction);
            }
            section.push_str("\n</tool_usage_guidelines>");
            sections.push(section);
        }

        if let Some(metadata) = skills_metadata {
            if !metadata.is_empty() {
                sections.push(metadata.to_owned());
            }
        }

        if let Some(expected) = &config.expected_output {
            sections.push(format!(
                "<expected_output>\n{}\n</expected_output>",
                expected.trim()
            ));
        }

        if config.add_workspace_info {
            if let Some(dir) = workspace_dir {
                sections.push(Self::workspace_section(dir));
            }
        }

        if config.add_datetime_to_context {
            sections.push(Self::datetime_section(&config.timezone));
        }

        if !config.additional_information.is_empty() {
            let mut section = String::from("<additional_information>");
            for info in &config.additional_information {
                section.push_str(&format!("\n- {info}"));
            }
            section.push_str("\n</additional_information>");
            sections.push(section);
        }

        for (tag, content) in &config.custom_sections {
            sections.push(format!("<{tag}>\n{content}\n</{tag}>"));
        }

        if let Some(context) = &config.additional_context {
            sections.push(context.clone());
        }

        sections.join("\n\n")
    }

    fn instructions_section(instructions: &[String]) -> String {
        let mut section = String::from("<instructions>");
        if instructions.len() == 1 {
            section.push_str(&format!("\n{}", instructions[0]));
        } else {
            for instruction in instructions {
                section.push_str(&format!("\n- {instruction}"));
            }
        }
        section.push_str("\n</instructions>");
        section
    }

    fn markdown_section() -> String {
        "<output_format>\n\
         Use markdown formatting to improve readability:\n\
         - Use headers (##, ###) to organize sections\n\
         - Use bullet points and numbered lists\n\
         - Use code blocks for code snippets\n\
         - Use **bold** for emphasis\n\
         </output_format>"
            .to_owned()
    }

    fn workspace_section(workspace_dir: &Path) -> String {
        let absolute = workspace_dir
            .canonicalize()
            .unwrap_or_else(|_| workspace_dir.to_path_buf());
        format!(
            "<workspace_info>\n\
             Current working directory: `{}`\n\
             All relative file paths are resolved relative to this directory.\n\
             </workspace_info>",
            absolute.display()
        )
    }

    fn datetime_section(timezone: &str) -> String {
        let rendered = if timezone.eq_ignore_ascii_case("utc") {
            Utc::now().format("%Y-%m-%d %H:%M:%S UTC").to_string()
        } else if let Ok(offset) = timezone.parse::<FixedOffset>() {
            Utc::now()
                .with_timezone(&offset)
                .format("%Y-%m-%d %H:%M:%S %:z")
                .to_string()
        } else {
            // Unknown zone names fall back to UTC.
            Utc::now().format("%Y-%m-%d %H:%M:%S UTC").to_string()
        };
        format!("<current_datetime>\n{rendered}\n</current_datetime>")
    }
}
