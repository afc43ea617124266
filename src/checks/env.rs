//! Environment completeness check.
//!
//! `.env.example` is the contract: every non-comment, non-empty key it
//! declares must exist in `.env`. Empty values warn but pass; missing keys
//! fail. Projects without an example file pass trivially.

use crate::gate::{CheckStatus, CheckType, GateCheckResult};
use chrono::Utc;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Instant;

/// Compare `.env` against the keys declared in `.env.example`.
pub fn run_env_check(project_dir: &Path) -> GateCheckResult {
    let start = Instant::now();
    let example = project_dir.join(".env.example");

    let finish = |status: CheckStatus, exit_code: i32, summary: String| GateCheckResult {
        check_type: CheckType::EnvCheck,
        status,
        command: String::new(),
        exit_code,
        stdout_artifact: None,
        stderr_summary: Some(summary),
        duration_ms: start.elapsed().as_millis() as u64,
        timestamp: Utc::now(),
    };

    if !example.exists() {
        return finish(
            CheckStatus::Pass,
            0,
            "No .env.example present; nothing to check".to_string(),
        );
    }

    let required = match read_env_keys(&example) {
        Ok(keys) => keys,
        Err(e) => return finish(CheckStatus::Fail, 1, format!("Unreadable .env.example: {e}")),
    };

    let env_path = project_dir.join(".env");
    if !env_path.exists() {
        let missing: Vec<&str> = required.keys().map(String::as_str).collect();
        return finish(
            CheckStatus::Fail,
            1,
            format!(".env missing; Missing vars: {}", missing.join(", ")),
        );
    }

    let actual = match read_env_keys(&env_path) {
        Ok(keys) => keys,
        Err(e) => return finish(CheckStatus::Fail, 1, format!("Unreadable .env: {e}")),
    };

    let missing: Vec<&str> = required
        .keys()
        .filter(|k| !actual.contains_key(*k))
        .map(String::as_str)
        .collect();
    if !missing.is_empty() {
        return finish(
            CheckStatus::Fail,
            1,
            format!("Missing vars: {}", missing.join(", ")),
        );
    }

    let empty: Vec<&str> = required
        .keys()
        .filter(|k| actual.get(*k).is_some_and(|v| v.is_empty()))
        .map(String::as_str)
        .collect();
    let summary = if empty.is_empty() {
        "All declared vars present".to_string()
    } else {
        format!("Warning: empty values for {}", empty.join(", "))
    };
    finish(CheckStatus::Pass, 0, summary)
}

/// Parse an env file into key/value pairs, dotenv syntax.
fn read_env_keys(path: &Path) -> anyhow::Result<BTreeMap<String, String>> {
    let mut keys = BTreeMap::new();
    for item in dotenvy::from_path_iter(path)? {
        let (key, value) = item?;
        keys.insert(key, value);
    }
    Ok(keys)
}
