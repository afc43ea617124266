//! Repo snapshot: a structured description of the working tree.
//!
//! Snapshots feed two consumers: the command resolver (which build/test/lint
//! invocations make sense here) and the review phase's drift detection
//! (which configs changed, how many lines moved).

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use uuid::Uuid;
use walkdir::WalkDir;

pub mod commands;

pub use commands::{CommandOverrides, ResolvedCommands, resolve_commands};

/// Directories never descended into when walking a project tree.
const SKIP_DIRS: &[&str] = &[
    ".git",
    "node_modules",
    "target",
    "dist",
    "build",
    ".venv",
    "venv",
    "__pycache__",
    ".popeye",
    "docs",
];

/// Well-known configuration filenames, classified as `config_files`.
const CONFIG_FILES: &[&str] = &[
    "package.json",
    "tsconfig.json",
    "pyproject.toml",
    "setup.py",
    "requirements.txt",
    "Cargo.toml",
    "go.mod",
    "Dockerfile",
    "docker-compose.yml",
    "docker-compose.yaml",
    ".eslintrc",
    ".eslintrc.json",
    ".eslintrc.js",
    "vite.config.ts",
    "vite.config.js",
    "webpack.config.js",
    "next.config.js",
    "next.config.mjs",
    "alembic.ini",
    "schema.prisma",
];

/// A point-in-time description of the project tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepoSnapshot {
    pub snapshot_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub tree_summary: String,
    pub config_files: Vec<String>,
    pub languages_detected: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package_manager: Option<String>,
    #[serde(default)]
    pub scripts: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_framework: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_tool: Option<String>,
    pub env_files: Vec<String>,
    pub migrations_present: bool,
    pub ports_entrypoints: Vec<String>,
    pub total_files: usize,
    pub total_lines: usize,
}

impl RepoSnapshot {
    /// Absolute difference in total line count against another snapshot.
    pub fn line_delta(&self, other: &RepoSnapshot) -> i64 {
        (self.total_lines as i64 - other.total_lines as i64).abs()
    }

    /// Whether the set of config files differs from another snapshot.
    pub fn configs_changed(&self, other: &RepoSnapshot) -> bool {
        let mut a = self.config_files.clone();
        let mut b = other.config_files.clone();
        a.sort();
        b.sort();
        a != b
    }
}

/// Walk the project and build a [`RepoSnapshot`].
pub fn generate_repo_snapshot(project_dir: &Path) -> Result<RepoSnapshot> {
    let mut config_files = Vec::new();
    let mut env_files = Vec::new();
    let mut ext_counts: BTreeMap<&'static str, usize> = BTreeMap::new();
    let mut top_level: BTreeMap<String, usize> = BTreeMap::new();
    let mut migrations_present = false;
    let mut total_files = 0usize;
    let mut total_lines = 0usize;
    let mut entrypoint_candidates: Vec<std::path::PathBuf> = Vec::new();

    for entry in WalkDir::new(project_dir)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| {
            e.depth() == 0
                || e.file_name()
                    .to_str()
                    .is_none_or(|name| !SKIP_DIRS.contains(&name))
        })
    {
        let entry = entry.context("Failed to walk project tree")?;
        let name = entry.file_name().to_string_lossy().to_string();

        if entry.file_type().is_dir() {
            if matches!(name.as_str(), "migrations" | "alembic") {
                migrations_present = true;
            }
            continue;
        }

        total_files += 1;
        let rel = entry
            .path()
            .strip_prefix(project_dir)
            .unwrap_or(entry.path())
            .to_string_lossy()
            .replace('\\', "/");

        if let Some(top) = rel.split('/').next() {
            *top_level.entry(top.to_string()).or_insert(0) += 1;
        }

        if CONFIG_FILES.contains(&name.as_str()) {
            config_files.push(rel.clone());
        }
        if name == ".env" || name.starts_with(".env.") {
            env_files.push(rel.clone());
        }

        if let Some(lang) = language_for_extension(entry.path()) {
            *ext_counts.entry(lang).or_insert(0) += 1;
            if let Ok(content) = fs::read_to_string(entry.path()) {
                total_lines += content.lines().count();
            }
            if is_entrypoint_name(&name) {
                entrypoint_candidates.push(entry.path().to_path_buf());
            }
        }
    }

    let languages_detected: Vec<String> =
        ext_counts.keys().map(|l| l.to_string()).collect();
    let package_manager = detect_package_manager(project_dir);
    let scripts = extract_package_scripts(project_dir).unwrap_or_default();
    let test_framework = detect_test_framework(project_dir, &scripts, &languages_detected);
    let build_tool = detect_build_tool(&config_files, &languages_detected);
    let ports_entrypoints = scan_ports_entrypoints(project_dir, &entrypoint_candidates);

    let tree_summary = top_level
        .iter()
        .map(|(dir, count)| format!("{dir} ({count})"))
        .collect::<Vec<_>>()
        .join(", ");

    config_files.sort();
    env_files.sort();

    Ok(RepoSnapshot {
        snapshot_id: Uuid::new_v4(),
        timestamp: Utc::now(),
        tree_summary,
        config_files,
        languages_detected,
        package_manager,
        scripts,
        test_framework,
        build_tool,
        env_files,
        migrations_present,
        ports_entrypoints,
        total_files,
        total_lines,
    })
}

fn language_for_extension(path: &Path) -> Option<&'static str> {
    match path.extension()?.to_str()? {
        "ts" | "tsx" => Some("typescript"),
        "js" | "jsx" | "mjs" => Some("javascript"),
        "py" => Some("python"),
        "rs" => Some("rust"),
        "go" => Some("go"),
        "rb" => Some("ruby"),
        "java" => Some("java"),
        _ => None,
    }
}

fn is_entrypoint_name(name: &str) -> bool {
    matches!(
        name,
        "index.ts" | "index.js" | "main.ts" | "main.js" | "server.ts" | "server.js"
            | "main.py" | "app.py" | "manage.py"
    )
}

fn detect_package_manager(project_dir: &Path) -> Option<String> {
    // Lockfile presence decides; pnpm and yarn take precedence over npm
    if project_dir.join("pnpm-lock.yaml").exists() {
        Some("pnpm".to_string())
    } else if project_dir.join("yarn.lock").exists() {
        Some("yarn".to_string())
    } else if project_dir.join("package-lock.json").exists()
        || project_dir.join("package.json").exists()
    {
        Some("npm".to_string())
    } else {
        None
    }
}

fn extract_package_scripts(project_dir: &Path) -> Option<BTreeMap<String, String>> {
    let manifest = project_dir.join("package.json");
    let content = fs::read_to_string(manifest).ok()?;
    let parsed: serde_json::Value = serde_json::from_str(&content).ok()?;
    let scripts = parsed.get("scripts")?.as_object()?;
    Some(
        scripts
            .iter()
            .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
            .collect(),
    )
}

fn detect_test_framework(
    project_dir: &Path,
    scripts: &BTreeMap<String, String>,
    languages: &[String],
) -> Option<String> {
    if let Some(test) = scripts.get("test") {
        for framework in ["vitest", "jest", "mocha", "playwright"] {
            if test.contains(framework) {
                return Some(framework.to_string());
            }
        }
    }
    if languages.iter().any(|l| l == "python") {
        let pyproject = fs::read_to_string(project_dir.join("pyproject.toml")).unwrap_or_default();
        if pyproject.contains("pytest") || project_dir.join("tests").exists() {
            return Some("pytest".to_string());
        }
    }
    None
}

fn detect_build_tool(config_files: &[String], languages: &[String]) -> Option<String> {
    for (marker, tool) in [
        ("vite.config", "vite"),
        ("webpack.config", "webpack"),
        ("next.config", "next"),
        ("Cargo.toml", "cargo"),
    ] {
        if config_files.iter().any(|f| f.contains(marker)) {
            return Some(tool.to_string());
        }
    }
    if languages.iter().any(|l| l == "typescript") {
        return Some("tsc".to_string());
    }
    None
}

static PORT_PATTERN: std::sync::LazyLock<Regex> = std::sync::LazyLock::new(|| {
    Regex::new(r"(?i)(?:listen|port)\D{0,10}(\d{4,5})").expect("port pattern must compile")
});

/// Scan entrypoint candidates for listen/port patterns.
fn scan_ports_entrypoints(project_dir: &Path, candidates: &[std::path::PathBuf]) -> Vec<String> {
    let mut found = Vec::new();
    for path in candidates {
        let Ok(content) = fs::read_to_string(path) else {
            continue;
        };
        let rel = path
            .strip_prefix(project_dir)
            .unwrap_or(path)
            .to_string_lossy()
            .replace('\\', "/");
        match PORT_PATTERN.captures(&content) {
            Some(caps) => found.push(format!("{rel}:{}", &caps[1])),
            None => found.push(rel),
        }
    }
    found.sort();
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write(dir: &Path, rel: &str, content: &str) {
        let path = dir.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[test]
    fn test_snapshot_of_node_project() {
        let dir = tempdir().unwrap();
        write(
            dir.path(),
            "package.json",
            r#"{"scripts": {"build": "vite build", "test": "vitest run", "lint": "eslint ."}}"#,
        );
        write(dir.path(), "pnpm-lock.yaml", "");
        write(dir.path(), "src/index.ts", "app.listen(3000);\n");
        write(dir.path(), "src/util.ts", "export const x = 1;\n");
        write(dir.path(), ".env.example", "API_KEY=\n");

        let snap = generate_repo_snapshot(dir.path()).unwrap();

        assert!(snap.languages_detected.contains(&"typescript".to_string()));
        assert_eq!(snap.package_manager.as_deref(), Some("pnpm"));
        assert_eq!(snap.scripts.get("build").unwrap(), "vite build");
        assert_eq!(snap.test_framework.as_deref(), Some("vitest"));
        assert!(snap.config_files.iter().any(|f| f == "package.json"));
        assert!(snap.env_files.iter().any(|f| f == ".env.example"));
        assert!(snap.ports_entrypoints.iter().any(|p| p == "src/index.ts:3000"));
        assert!(!snap.migrations_present);
        assert!(snap.total_files >= 4);
        assert!(snap.total_lines >= 2);
    }

    #[test]
    fn test_snapshot_of_python_project() {
        let dir = tempdir().unwrap();
        write(dir.path(), "pyproject.toml", "[tool.pytest.ini_options]\n");
        write(dir.path(), "src/main.py", "PORT = 8000\n");
        write(dir.path(), "migrations/0001_init.py", "pass\n");

        let snap = generate_repo_snapshot(dir.path()).unwrap();

        assert!(snap.languages_detected.contains(&"python".to_string()));
        assert_eq!(snap.test_framework.as_deref(), Some("pytest"));
        assert!(snap.migrations_present);
        assert!(snap.package_manager.is_none());
    }

    #[test]
    fn test_snapshot_skips_vendored_trees() {
        let dir = tempdir().unwrap();
        write(dir.path(), "src/a.ts", "let a = 1;\n");
        write(dir.path(), "node_modules/lib/b.ts", "let b = 2;\n");
        write(dir.path(), ".git/objects/c.ts", "let c = 3;\n");

        let snap = generate_repo_snapshot(dir.path()).unwrap();
        assert_eq!(snap.total_files, 1);
    }

    #[test]
    fn test_line_delta_and_configs_changed() {
        let dir = tempdir().unwrap();
        write(dir.path(), "src/a.py", "x = 1\ny = 2\n");
        let before = generate_repo_snapshot(dir.path()).unwrap();

        write(dir.path(), "src/b.py", &"z = 1\n".repeat(50));
        write(dir.path(), "pyproject.toml", "[project]\n");
        let after = generate_repo_snapshot(dir.path()).unwrap();

        assert_eq!(after.line_delta(&before), 50);
        assert!(after.configs_changed(&before));
        assert!(!after.configs_changed(&after.clone()));
    }
}
