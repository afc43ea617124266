//! Derive canonical build/test/lint/typecheck/migrate/start commands from a
//! repo snapshot.
//!
//! Node projects front their script names with the detected package manager;
//! Python projects get the conventional pytest/ruff/mypy/build invocations.
//! Mixed trees prefer node for frontend checks and python for the backend.
//! Per-type overrides replace the derived command verbatim.

use crate::snapshot::RepoSnapshot;
use serde::{Deserialize, Serialize};

/// The resolved command set, one optional invocation per check type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResolvedCommands {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub typecheck: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub migration: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<String>,
    /// Which manifest drove the derivation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_from: Option<String>,
}

/// Per-type command overrides; a set value replaces derivation verbatim.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommandOverrides {
    #[serde(default)]
    pub build: Option<String>,
    #[serde(default)]
    pub test: Option<String>,
    #[serde(default)]
    pub lint: Option<String>,
    #[serde(default)]
    pub typecheck: Option<String>,
    #[serde(default)]
    pub migration: Option<String>,
    #[serde(default)]
    pub start: Option<String>,
}

/// Resolve commands for a snapshot, applying overrides last.
pub fn resolve_commands(snapshot: &RepoSnapshot, overrides: &CommandOverrides) -> ResolvedCommands {
    let is_node = snapshot.package_manager.is_some();
    let is_python = snapshot
        .languages_detected
        .iter()
        .any(|l| l == "python");
    let is_typescript = snapshot
        .languages_detected
        .iter()
        .any(|l| l == "typescript");

    let mut resolved = if is_node {
        resolve_node(snapshot, is_typescript)
    } else if is_python {
        resolve_python()
    } else {
        ResolvedCommands::default()
    };

    // Mixed tree: node already claimed frontend checks; python fills the
    // backend gaps it left open.
    if is_node && is_python {
        let py = resolve_python();
        if resolved.test.is_none() {
            resolved.test = py.test;
        }
        if resolved.lint.is_none() {
            resolved.lint = py.lint;
        }
        resolved.resolved_from = Some("package.json+pyproject.toml".to_string());
    }

    if has_config(snapshot, "schema.prisma") {
        resolved.migration = Some("prisma migrate deploy".to_string());
    } else if has_config(snapshot, "alembic.ini") {
        resolved.migration = Some("alembic upgrade head".to_string());
    }

    apply_overrides(&mut resolved, overrides);
    resolved
}

fn resolve_node(snapshot: &RepoSnapshot, is_typescript: bool) -> ResolvedCommands {
    let pm = snapshot
        .package_manager
        .as_deref()
        .unwrap_or("npm");
    let run = |script: &str| -> Option<String> {
        snapshot
            .scripts
            .contains_key(script)
            .then(|| format!("{pm} run {script}"))
    };

    let typecheck = run("typecheck").or_else(|| {
        // No typecheck script; fall back to the compiler when TS is present
        is_typescript.then(|| "tsc --noEmit".to_string())
    });

    ResolvedCommands {
        build: run("build"),
        test: run("test"),
        lint: run("lint"),
        typecheck,
        migration: None,
        start: run("start").or_else(|| run("dev")),
        resolved_from: Some("package.json".to_string()),
    }
}

fn resolve_python() -> ResolvedCommands {
    ResolvedCommands {
        build: Some("python -m build".to_string()),
        test: Some("pytest tests/".to_string()),
        lint: Some("ruff check .".to_string()),
        typecheck: Some("mypy src/".to_string()),
        migration: None,
        start: None,
        resolved_from: Some("pyproject.toml".to_string()),
    }
}

fn has_config(snapshot: &RepoSnapshot, name: &str) -> bool {
    snapshot.config_files.iter().any(|f| f.ends_with(name))
}

fn apply_overrides(resolved: &mut ResolvedCommands, overrides: &CommandOverrides) {
    if let Some(v) = &overrides.build {
        resolved.build = Some(v.clone());
    }
    if let Some(v) = &overrides.test {
        resolved.test = Some(v.clone());
    }
    if let Some(v) = &overrides.lint {
        resolved.lint = Some(v.clone());
    }
    if let Some(v) = &overrides.typecheck {
        resolved.typecheck = Some(v.clone());
    }
    if let Some(v) = &overrides.migration {
        resolved.migration = Some(v.clone());
    }
    if let Some(v) = &overrides.start {
        resolved.start = Some(v.clone());
    }
}
