//! Role skill loading with project overrides.
//!
//! Every role has a built-in [`SkillDefinition`]; a project may override it
//! with a file named `skills/{ROLE}.md`. Override files support an optional
//! key-value preamble:
//!
//! ```text
//! version: 2
//! required_outputs: audit_report, change_request
//! constraints: never modify code
//!
//! You are the project auditor...
//! ```
//!
//! Keys end at the first blank line; everything after it is the system
//! prompt. A file with no preamble is treated as a whole-file system prompt.
//! The merge is field-by-field: override fields win, absent fields keep the
//! built-in value. Loaded skills are cached by role.

use crate::roles::{Role, SkillDefinition};
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// The skills directory name within the project.
pub const SKILLS_DIR: &str = "skills";

/// Fields an override file's preamble may set.
#[derive(Debug, Default, PartialEq)]
struct SkillOverride {
    version: Option<String>,
    required_outputs: Option<Vec<String>>,
    constraints: Option<Vec<String>>,
    system_prompt: String,
}

/// Loads and caches per-role skill definitions.
#[derive(Debug)]
pub struct SkillLoader {
    skills_dir: PathBuf,
    cache: HashMap<Role, SkillDefinition>,
}

impl SkillLoader {
    pub fn new(project_dir: &Path) -> Self {
        Self {
            skills_dir: project_dir.join(SKILLS_DIR),
            cache: HashMap::new(),
        }
    }

    /// Load a role's skill: built-in default merged with the project
    /// override, if one exists.
    pub fn load(&mut self, role: Role) -> Result<SkillDefinition> {
        if let Some(skill) = self.cache.get(&role) {
            return Ok(skill.clone());
        }

        let mut skill = SkillDefinition::builtin(role);
        let override_path = self.skills_dir.join(format!("{}.md", role.as_str()));
        if override_path.exists() {
            let content = fs::read_to_string(&override_path).with_context(|| {
                format!("Failed to read skill override {}", override_path.display())
            })?;
            let parsed = parse_override(&content);
            if parsed.version.is_some() {
                skill.version = parsed.version;
            }
            if let Some(outputs) = parsed.required_outputs {
                skill.required_outputs = outputs;
            }
            if let Some(constraints) = parsed.constraints {
                skill.constraints = constraints;
            }
            if !parsed.system_prompt.is_empty() {
                skill.system_prompt = parsed.system_prompt;
            }
            debug!(role = %role, path = %override_path.display(), "loaded skill override");
        }

        self.cache.insert(role, skill.clone());
        Ok(skill)
    }

    pub fn clear_cache(&mut self) {
        self.cache.clear();
    }

    pub fn skills_dir(&self) -> &Path {
        &self.skills_dir
    }
}

fn parse_override(content: &str) -> SkillOverride {
    let mut parsed = SkillOverride::default();
    let mut lines = content.lines().peekable();

    // A preamble exists only when the first line looks like `key: value`
    // with a known key; otherwise the whole file is the system prompt.
    let has_preamble = lines
        .peek()
        .and_then(|line| line.split_once(':'))
        .map(|(key, _)| matches!(key.trim(), "version" | "required_outputs" | "constraints"))
        .unwrap_or(false);

    if !has_preamble {
        parsed.system_prompt = content.trim().to_string();
        return parsed;
    }

    let mut body = Vec::new();
    let mut in_body = false;
    for line in lines {
        if in_body {
            body.push(line);
            continue;
        }
        if line.trim().is_empty() {
            in_body = true;
            continue;
        }
        match line.split_once(':') {
            Some(("version", value)) => parsed.version = Some(value.trim().to_string()),
            Some(("required_outputs", value)) => {
                parsed.required_outputs = Some(split_list(value));
            }
            Some(("constraints", value)) => parsed.constraints = Some(split_list(value)),
            _ => {
                // Unknown line inside the preamble: treat it as prompt start
                in_body = true;
                body.push(line);
            }
        }
    }

    parsed.system_prompt = body.join("\n").trim().to_string();
    parsed
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}
