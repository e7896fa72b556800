//! Skill loading with progressive disclosure.
//!
//! A skill is a directory containing `SKILL.md`: YAML front-matter with a
//! required `name` and `description` (plus optional `license`,
//! `allowed-tools`, `metadata`) followed by a Markdown body. Only the
//! front-matter is materialized into the system prompt (level 1); the body
//! is fetched on demand through the `get_skill` tool. Relative file
//! references in the body are rewritten to absolute paths at load time so
//! the agent can read nested resources directly.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use regex::{Captures, Regex};
use serde::Deserialize;
use tracing::{error, warn};

/// A loaded skill.
#[derive(Debug, Clone)]
pub struct Skill {
    /// Skill name, unique within a loader.
    pub name: String,
    /// One-line description, shown in the level-1 prompt block.
    pub description: String,
    /// Full Markdown body with rewritten paths.
    pub content: String,
    /// Optional license identifier.
    pub license: Option<String>,
    /// Optional tool allowlist declared by the skill.
    pub allowed_tools: Option<Vec<String>>,
    /// Optional free-form metadata.
    pub metadata: Option<HashMap<String, String>>,
    /// Path of the `SKILL.md` this was loaded from.
    pub skill_path: Option<PathBuf>,
}

impl Skill {
    /// Render the full skill as prompt text.
    #[must_use]
    pub fn to_prompt(&self) -> String {
        format!(
            "# Skill: {}\n\n{}\n\n---\n\n{}",
            self.name, self.description, self.content
        )
    }
}

#[derive(Debug, Deserialize)]
struct FrontMatter {
    name: String,
    description: String,
    #[serde(default)]
    license: Option<String>,
    #[serde(default, rename = "allowed-tools")]
    allowed_tools: Option<Vec<String>>,
    #[serde(default)]
    metadata: Option<HashMap<String, String>>,
}

/// Discovers and loads skills from a directory tree.
#[derive(Debug, Clone, Default)]
pub struct SkillLoader {
    skills_dir: PathBuf,
    loaded: HashMap<String, Skill>,
    order: Vec<String>,
}

impl SkillLoader {
    /// Create a loader rooted at `skills_dir`.
    #[must_use]
    pub fn new(skills_dir: impl Into<PathBuf>) -> Self {
        Self {
            skills_dir: skills_dir.into(),
            loaded: HashMap::new(),
            order: Vec::new(),
        }
    }

    /// Load a single skill from a `SKILL.md` path.
    ///
    /// Returns `None` (with a log line) for files without valid
    /// front-matter rather than failing discovery.
    #[must_use]
    pub fn load_skill(&self, skill_path: &Path) -> Option<Skill> {
        let raw = match std::fs::read_to_string(skill_path) {
            Ok(raw) => raw,
            Err(err) => {
                error!(path = %skill_path.display(), error = %err, "Failed to read skill file");
                return None;
            }
        };

        let front_matter_re =
            Regex::new(r"(?s)\A---\r?\n(.*?)\r?\n---\r?\n(.*)\z").expect("static regex");
        let Some(caps) = front_matter_re.captures(&raw) else {
            warn!(path = %skill_path.display(), "Skill missing YAML front-matter");
            return None;
        };

        let front_matter: FrontMatter = match serde_yaml::from_str(&caps[1]) {
            Ok(fm) => fm,
            Err(err) => {
                error!(path = %skill_path.display(), error = %err, "Failed to parse skill front-matter");
                return None;
            }
        };

        let skill_dir = skill_path.parent().unwrap_or(Path::new("."));
        let content = rewrite_relative_paths(caps[2].trim(), skill_dir);

        Some(Skill {
            name: front_matter.name,
            description: front_matter.description,
            content,
            license: front_matter.license,
            allowed_tools: front_matter.allowed_tools,
            metadata: front_matter.metadata,
            skill_path: Some(skill_path.to_path_buf()),
        })
    }

    /// Walk the skills directory and load every `SKILL.md` found.
    pub fn discover(&mut self) -> Vec<Skill> {
        let mut skills = Vec::new();
        if !self.skills_dir.exists() {
            warn!(dir = %self.skills_dir.display(), "Skills directory not found");
            return skills;
        }

        let mut files = Vec::new();
        collect_skill_files(&self.skills_dir, &mut files);
        files.sort();

        for file in files {
            if let Some(skill) = self.load_skill(&file) {
                if !self.loaded.contains_key(&skill.name) {
                    self.order.push(skill.name.clone());
                }
                self.loaded.insert(skill.name.clone(), skill.clone());
                skills.push(skill);
            }
        }
        skills
    }

    /// Get a loaded skill by name.
    #[must_use]
    pub fn get_skill(&self, name: &str) -> Option<&Skill> {
        self.loaded.get(name)
    }

    /// Names of every loaded skill.
    #[must_use]
    pub fn list_skills(&self) -> Vec<String> {
        self.order.clone()
    }

    /// Level-1 metadata prompt: names and descriptions only.
    #[must_use]
    pub fn metadata_prompt(&self) -> String {
        if self.loaded.is_empty() {
            return String::new();
        }

        let mut lines = vec![
            "## Available Skills\n".to_owned(),
            "You have access to specialized skills. Each skill provides expert guidance for specific tasks.\n".to_owned(),
            "Load a skill's full content using the `get_skill` tool when needed.\n".to_owned(),
        ];
        for name in &self.order {
            if let Some(skill) = self.loaded.get(name) {
                lines.push(format!("- `{}`: {}", skill.name, skill.description));
            }
        }
        lines.join("\n")
    }
}

fn collect_skill_files(dir: &Path, files: &mut Vec<PathBuf>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_skill_files(&path, files);
        } else if path.file_name().is_some_and(|n| n == "SKILL.md") {
            files.push(path);
        }
    }
}

/// Rewrite relative file references in a skill body to absolute paths.
///
/// Covers directory-prefixed references (`scripts/x.py`), prose references
/// (`see reference.md`), and markdown links (`[guide](./reference/x.md)`).
/// Only paths that actually exist under the skill directory are rewritten.
fn rewrite_relative_paths(content: &str, skill_dir: &Path) -> String {
    let dir_re = Regex::new(r"(python\s+|`)((?:scripts|examples|templates|reference)/[^\s`)]+)")
        .expect("static regex");
    let content = dir_re.replace_all(content, |caps: &Captures<'_>| {
        let abs = skill_dir.join(&caps[2]);
        if abs.exists() {
            format!("{}{}", &caps[1], abs.display())
        } else {
            caps[0].to_owned()
        }
    });

    let doc_re = Regex::new(
        r"(?i)\b(see|read|refer to|check)\s+([A-Za-z0-9_-]+\.(?:md|txt|json|yaml))([.,;\s])",
    )
    .expect("static regex");
    let content = doc_re.replace_all(&content, |caps: &Captures<'_>| {
        let abs = skill_dir.join(&caps[2]);
        if abs.exists() {
            format!("{} `{}` (use read_file to access){}", &caps[1], abs.display(), &caps[3])
        } else {
            caps[0].to_owned()
        }
    });

    let link_re = Regex::new(r"\[(`?[^`\]]+`?)\]\(((?:\./)?[^)]+\.(?:md|txt|json|yaml|js|py|html))\)")
        .expect("static regex");
    link_re
        .replace_all(&content, |caps: &Captures<'_>| {
            let clean = caps[2].trim_start_matches("./");
            let abs = skill_dir.join(clean);
            if abs.exists() {
                format!("[{}](`{}`) (use read_file to access)", &caps[1], abs.display())
            } else {
                caps[0].to_owned()
            }
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_skill(dir: &Path, name: &str, body: &str) -> PathBuf {
        let skill_dir = dir.join(name);
        std::fs::create_dir_all(&skill_dir).unwrap();
        let path = skill_dir.join("SKILL.md");
        let content = format!(
            "---\nname: {name}\ndescription: A {name} skill\nlicense: MIT\n---\n{body}"
        );
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn load_skill_parses_front_matter() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_skill(dir.path(), "pdf", "Handle PDFs carefully.");

        let loader = SkillLoader::new(dir.path());
        let skill = loader.load_skill(&path).unwrap();
        assert_eq!(skill.name, "pdf");
        assert_eq!(skill.description, "A pdf skill");
        assert_eq!(skill.license.as_deref(), Some("MIT"));
        assert_eq!(skill.content, "Handle PDFs carefully.");
    }

    #[test]
    fn missing_front_matter_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("SKILL.md");
        std::fs::write(&path, "no front matter here").unwrap();

        let loader = SkillLoader::new(dir.path());
        assert!(loader.load_skill(&path).is_none());
    }

    #[test]
    fn discover_loads_nested_skills() {
        let dir = tempfile::tempdir().unwrap();
        write_skill(dir.path(), "alpha", "a");
        write_skill(&dir.path().join("nested"), "beta", "b");

        let mut loader = SkillLoader::new(dir.path());
        let skills = loader.discover();
        assert_eq!(skills.len(), 2);
        assert!(loader.get_skill("alpha").is_some());
        assert!(loader.get_skill("beta").is_some());
    }

    #[test]
    fn metadata_prompt_lists_names_and_descriptions_only() {
        let dir = tempfile::tempdir().unwrap();
        write_skill(dir.path(), "alpha", "the full body text");

        let mut loader = SkillLoader::new(dir.path());
        loader.discover();
        let prompt = loader.metadata_prompt();
        assert!(prompt.contains("- `alpha`: A alpha skill"));
        assert!(prompt.contains("get_skill"));
        assert!(!prompt.contains("the full body text"));
    }

    #[test]
    fn empty_loader_renders_empty_metadata() {
        let loader = SkillLoader::new("/nonexistent");
        assert!(loader.metadata_prompt().is_empty());
    }

    #[test]
    fn relative_paths_are_rewritten_when_present() {
        let dir = tempfile::tempdir().unwrap();
        let skill_dir = dir.path().join("tool");
        std::fs::create_dir_all(skill_dir.join("scripts")).unwrap();
        std::fs::write(skill_dir.join("scripts/run.py"), "print()").unwrap();
        std::fs::write(skill_dir.join("reference.md"), "ref").unwrap();

        let path = skill_dir.join("SKILL.md");
        std::fs::write(
            &path,
            "---\nname: tool\ndescription: d\n---\nRun `scripts/run.py` and see reference.md for more.",
        )
        .unwrap();

        let loader = SkillLoader::new(dir.path());
        let skill = loader.load_skill(&path).unwrap();
        assert!(skill.content.contains(&skill_dir.join("scripts/run.py").display().to_string()));
        assert!(skill.content.contains("use read_file to access"));
    }

    #[test]
    fn missing_referenced_files_are_left_alone() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_skill(dir.path(), "tool", "Run `scripts/ghost.py` please.");

        let loader = SkillLoader::new(dir.path());
        let skill = loader.load_skill(&path).unwrap();
        assert!(skill.content.contains("`scripts/ghost.py`"));
    }
}
