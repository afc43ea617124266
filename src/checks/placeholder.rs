//! Placeholder scan: flag unfinished or templated source files.
//!
//! Walks the conventional source roots and reports TODO/FIXME markers,
//! lorem-ipsum filler, and known template fingerprints. Files listed in the
//! allowlist (one relative path per line) are exempt.

use crate::gate::{CheckStatus, CheckType, GateCheckResult};
use crate::util::summarize_output;
use chrono::Utc;
use regex::Regex;
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::sync::LazyLock;
use std::time::Instant;
use walkdir::WalkDir;

/// Source roots the scan descends into, when present.
const SCAN_ROOTS: &[&str] = &["src", "app", "pages", "lib", "components", "server"];

/// Allowlist file path, relative to the project directory.
pub const ALLOWLIST_PATH: &str = ".popeye/placeholder-allowlist.txt";

const SOURCE_EXTENSIONS: &[&str] = &[
    "ts", "tsx", "js", "jsx", "mjs", "py", "rs", "go", "rb", "java", "html", "css", "vue",
    "svelte",
];

static PLACEHOLDER_PATTERNS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    [
        (r"\bTODO\b", "TODO marker"),
        (r"\bFIXME\b", "FIXME marker"),
        (r"(?i)lorem ipsum", "lorem ipsum filler"),
        (r"(?i)your[-_ ]api[-_ ]key", "template credential"),
        (r"(?i)\bchangeme\b", "template credential"),
        (r"\{\{\s*placeholder\s*\}\}", "template fingerprint"),
        (r"<INSERT[ _][A-Z _]+>", "template fingerprint"),
    ]
    .iter()
    .map(|(p, label)| (Regex::new(p).expect("placeholder pattern must compile"), *label))
    .collect()
});

/// Scan the project's source roots for placeholder content.
///
/// Returns a fail result when any hit remains after allowlist filtering;
/// every hit is listed (bounded) in the stderr summary.
pub fn run_placeholder_scan(project_dir: &Path) -> GateCheckResult {
    let start = Instant::now();
    let allowlist = load_allowlist(project_dir);
    let mut hits: Vec<String> = Vec::new();

    for root in SCAN_ROOTS {
        let root_path = project_dir.join(root);
        if !root_path.is_dir() {
            continue;
        }
        for entry in WalkDir::new(&root_path)
            .follow_links(false)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
        {
            let Some(ext) = entry.path().extension().and_then(|e| e.to_str()) else {
                continue;
            };
            if !SOURCE_EXTENSIONS.contains(&ext) {
                continue;
            }
            let rel = entry
                .path()
                .strip_prefix(project_dir)
                .unwrap_or(entry.path())
                .to_string_lossy()
                .replace('\\', "/");
            if allowlist.contains(rel.as_str()) {
                continue;
            }
            let Ok(content) = fs::read_to_string(entry.path()) else {
                continue;
            };
            for (line_no, line) in content.lines().enumerate() {
                for (pattern, label) in PLACEHOLDER_PATTERNS.iter() {
                    if pattern.is_match(line) {
                        hits.push(format!("{rel}:{}: {label}", line_no + 1));
                    }
                }
            }
        }
    }

    let status = if hits.is_empty() {
        CheckStatus::Pass
    } else {
        CheckStatus::Fail
    };

    GateCheckResult {
        check_type: CheckType::PlaceholderScan,
        status,
        command: String::new(),
        exit_code: if hits.is_empty() { 0 } else { 1 },
        stdout_artifact: None,
        stderr_summary: (!hits.is_empty()).then(|| summarize_output(&hits.join("\n"), 500)),
        duration_ms: start.elapsed().as_millis() as u64,
        timestamp: Utc::now(),
    }
}

fn load_allowlist(project_dir: &Path) -> HashSet<String> {
    let Ok(content) = fs::read_to_string(project_dir.join(ALLOWLIST_PATH)) else {
        return HashSet::new();
    };
    content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(|l| l.to_string())
        .collect()
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
    fn test_clean_tree_passes() {
        let dir = tempdir().unwrap();
        write(dir.path(), "src/app.ts", "export const ready = true;\n");
        let result = run_placeholder_scan(dir.path());
        assert_eq!(result.status, CheckStatus::Pass);
        assert_eq!(result.exit_code, 0);
    }

    #[test]
    fn test_todo_and_lorem_are_flagged() {
        let dir = tempdir().unwrap();
        write(dir.path(), "src/app.ts", "// TODO: wire this up\n");
        write(dir.path(), "pages/index.html", "<p>Lorem ipsum dolor</p>\n");

        let result = run_placeholder_scan(dir.path());
        assert_eq!(result.status, CheckStatus::Fail);
        let summary = result.stderr_summary.unwrap();
        assert!(summary.contains("src/app.ts:1"));
        assert!(summary.contains("lorem ipsum"));
    }

    #[test]
    fn test_allowlist_exempts_files() {
        let dir = tempdir().unwrap();
        write(dir.path(), "src/app.ts", "// TODO: known gap\n");
        write(dir.path(), ALLOWLIST_PATH, "# exemptions\nsrc/app.ts\n");

        let result = run_placeholder_scan(dir.path());
        assert_eq!(result.status, CheckStatus::Pass);
    }

    #[test]
    fn test_non_source_files_are_ignored() {
        let dir = tempdir().unwrap();
        write(dir.path(), "src/notes.txt", "TODO later\n");
        write(dir.path(), "docs-site/readme.md", "TODO\n");
        let result = run_placeholder_scan(dir.path());
        assert_eq!(result.status, CheckStatus::Pass);
    }
}
