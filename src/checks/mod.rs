//! Subprocess check runner with command sanitization.
//!
//! Every gate check runs through here: the command is screened against a
//! deny-list, executed under the project directory with a wall-clock bound,
//! and summarized into a [`GateCheckResult`]. Large stdout is stored as a
//! typed artifact instead of inlined into the result.

use crate::artifact::ArtifactManager;
use crate::errors::CheckError;
use crate::gate::{CheckStatus, CheckType, GateCheckResult};
use crate::phase::PipelinePhase;
use crate::snapshot::ResolvedCommands;
use crate::util::summarize_output;
use anyhow::{Context, Result};
use chrono::Utc;
use regex::Regex;
use std::path::Path;
use std::process::Stdio;
use std::sync::LazyLock;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tracing::{debug, warn};

pub mod env;
pub mod placeholder;

pub use env::run_env_check;
pub use placeholder::run_placeholder_scan;

/// Default wall-clock bound for a single check.
pub const DEFAULT_CHECK_TIMEOUT_MS: u64 = 300_000;

/// Maximum characters kept in a stderr summary.
const STDERR_SUMMARY_MAX: usize = 500;

/// Stdout beyond this size is stored as an artifact, not inlined.
const STDOUT_INLINE_MAX: usize = 4_096;

static DENY_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?:^|\s)sudo\s",
        r"rm\s+-[a-z]*r[a-z]*f[a-z]*\s+/(?:\s|$)",
        r"curl[^|;]*\|\s*(?:ba|z)?sh",
        r"wget[^|;]*\|\s*(?:ba|z)?sh",
        r"mkfs",
        r"dd\s+if=",
        r">\s*/dev/sd",
        r":\(\)\s*\{.*\};\s*:",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("deny pattern must compile"))
    .collect()
});

/// Screen a command against the deny-list.
pub fn sanitize_command(command: &str) -> Result<(), CheckError> {
    // Pad so anchored patterns see word boundaries at both ends
    let padded = format!(" {command} ");
    for pattern in DENY_PATTERNS.iter() {
        if pattern.is_match(&padded) {
            return Err(CheckError::Rejected {
                command: command.to_string(),
            });
        }
    }
    Ok(())
}

fn rejected_result(check_type: CheckType, command: &str) -> GateCheckResult {
    GateCheckResult {
        check_type,
        status: CheckStatus::Fail,
        command: command.to_string(),
        exit_code: -1,
        stdout_artifact: None,
        stderr_summary: Some("Command rejected".to_string()),
        duration_ms: 0,
        timestamp: Utc::now(),
    }
}

/// Execute one check command under the project directory.
///
/// Status is pass exactly when the process exits zero. Sanitizer rejection
/// and timeout both produce a fail result with exit_code -1; neither is an
/// `Err` because a failed check is an ordinary gate outcome.
pub async fn run_check(
    check_type: CheckType,
    command: &str,
    project_dir: &Path,
    timeout_ms: u64,
) -> GateCheckResult {
    run_check_with_output(check_type, command, project_dir, timeout_ms)
        .await
        .0
}

/// As [`run_check`], additionally returning the captured stdout so callers
/// can archive oversized output through [`attach_stdout_artifact`].
pub async fn run_check_with_output(
    check_type: CheckType,
    command: &str,
    project_dir: &Path,
    timeout_ms: u64,
) -> (GateCheckResult, String) {
    if let Err(e) = sanitize_command(command) {
        warn!(%check_type, error = %e, "command rejected by sanitizer");
        return (rejected_result(check_type, command), String::new());
    }

    let start = Instant::now();
    let spawned = Command::new("sh")
        .arg("-c")
        .arg(command)
        .current_dir(project_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn();

    let child = match spawned {
        Ok(child) => child,
        Err(e) => {
            let result = GateCheckResult {
                check_type,
                status: CheckStatus::Fail,
                command: command.to_string(),
                exit_code: -1,
                stdout_artifact: None,
                stderr_summary: Some(format!("Failed to spawn: {e}")),
                duration_ms: start.elapsed().as_millis() as u64,
                timestamp: Utc::now(),
            };
            return (result, String::new());
        }
    };

    let output = tokio::time::timeout(
        Duration::from_millis(timeout_ms),
        child.wait_with_output(),
    )
    .await;

    let duration_ms = start.elapsed().as_millis() as u64;
    match output {
        Ok(Ok(output)) => {
            let exit_code = output.status.code().unwrap_or(-1);
            let stdout = String::from_utf8_lossy(&output.stdout).to_string();
            let stderr = String::from_utf8_lossy(&output.stderr);
            debug!(%check_type, exit_code, duration_ms, "check finished");
            let result = GateCheckResult {
                check_type,
                status: if exit_code == 0 {
                    CheckStatus::Pass
                } else {
                    CheckStatus::Fail
                },
                command: command.to_string(),
                exit_code,
                stdout_artifact: None,
                stderr_summary: (!stderr.trim().is_empty())
                    .then(|| summarize_output(&stderr, STDERR_SUMMARY_MAX)),
                duration_ms,
                timestamp: Utc::now(),
            };
            (result, stdout)
        }
        Ok(Err(e)) => (
            GateCheckResult {
                check_type,
                status: CheckStatus::Fail,
                command: command.to_string(),
                exit_code: -1,
                stdout_artifact: None,
                stderr_summary: Some(format!("Process error: {e}")),
                duration_ms,
                timestamp: Utc::now(),
            },
            String::new(),
        ),
        Err(_) => {
            // kill_on_drop reaps the child once the future is dropped
            warn!(%check_type, timeout_ms, "check timed out");
            (
                GateCheckResult {
                    check_type,
                    status: CheckStatus::Fail,
                    command: command.to_string(),
                    exit_code: -1,
                    stdout_artifact: None,
                    stderr_summary: Some(format!("Timed out after {timeout_ms}ms")),
                    duration_ms,
                    timestamp: Utc::now(),
                },
                String::new(),
            )
        }
    }
}

/// Run the standard command set in a stable order. Checks with no resolved
/// command yield a skip result in place.
pub async fn run_all_checks(
    commands: &ResolvedCommands,
    project_dir: &Path,
    timeout_ms: u64,
) -> Vec<GateCheckResult> {
    let plan: [(CheckType, Option<&String>); 5] = [
        (CheckType::Build, commands.build.as_ref()),
        (CheckType::Test, commands.test.as_ref()),
        (CheckType::Lint, commands.lint.as_ref()),
        (CheckType::Typecheck, commands.typecheck.as_ref()),
        (CheckType::Migration, commands.migration.as_ref()),
    ];

    let mut results = Vec::with_capacity(plan.len());
    for (check_type, command) in plan {
        match command {
            Some(command) => results.push(run_check(check_type, command, project_dir, timeout_ms).await),
            None => results.push(GateCheckResult::skipped(check_type)),
        }
    }
    results
}

/// Start-style check: the command is healthy if it is still running when the
/// deadline arrives; an early non-zero exit fails it.
pub async fn run_start_check(
    command: &str,
    project_dir: &Path,
    timeout_ms: u64,
    port: Option<u16>,
) -> GateCheckResult {
    if sanitize_command(command).is_err() {
        return rejected_result(CheckType::Start, command);
    }

    let start = Instant::now();
    let spawned = Command::new("sh")
        .arg("-c")
        .arg(command)
        .current_dir(project_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn();

    let mut child = match spawned {
        Ok(child) => child,
        Err(e) => {
            return GateCheckResult {
                check_type: CheckType::Start,
                status: CheckStatus::Fail,
                command: command.to_string(),
                exit_code: -1,
                stdout_artifact: None,
                stderr_summary: Some(format!("Failed to spawn: {e}")),
                duration_ms: 0,
                timestamp: Utc::now(),
            };
        }
    };

    let waited = tokio::time::timeout(Duration::from_millis(timeout_ms), child.wait()).await;
    let duration_ms = start.elapsed().as_millis() as u64;

    match waited {
        Ok(Ok(status)) => {
            let exit_code = status.code().unwrap_or(-1);
            GateCheckResult {
                check_type: CheckType::Start,
                status: if exit_code == 0 {
                    CheckStatus::Pass
                } else {
                    CheckStatus::Fail
                },
                command: command.to_string(),
                exit_code,
                stdout_artifact: None,
                stderr_summary: (exit_code != 0)
                    .then(|| format!("Exited with code {exit_code} before deadline")),
                duration_ms,
                timestamp: Utc::now(),
            }
        }
        Ok(Err(e)) => GateCheckResult {
            check_type: CheckType::Start,
            status: CheckStatus::Fail,
            command: command.to_string(),
            exit_code: -1,
            stdout_artifact: None,
            stderr_summary: Some(format!("Process error: {e}")),
            duration_ms,
            timestamp: Utc::now(),
        },
        Err(_) => {
            // Still alive at the deadline
            let note = match port {
                Some(port) => format!("Alive after {timeout_ms}ms (expected port {port})"),
                None => format!("Alive after {timeout_ms}ms"),
            };
            let _ = child.kill().await;
            GateCheckResult {
                check_type: CheckType::Start,
                status: CheckStatus::Pass,
                command: command.to_string(),
                exit_code: 0,
                stdout_artifact: None,
                stderr_summary: Some(note),
                duration_ms,
                timestamp: Utc::now(),
            }
        }
    }
}

/// Persist each check result as its typed artifact in the given phase.
pub fn store_check_results(
    results: &[GateCheckResult],
    artifacts: &ArtifactManager,
    phase: PipelinePhase,
) -> Result<()> {
    for result in results {
        artifacts
            .create_and_store_json(result.check_type.artifact_type(), result, phase, None)
            .with_context(|| format!("Failed to store {} check result", result.check_type))?;
    }
    Ok(())
}

/// Store oversized check stdout as an artifact and link it from the result.
pub fn attach_stdout_artifact(
    result: &mut GateCheckResult,
    stdout: &str,
    artifacts: &ArtifactManager,
    phase: PipelinePhase,
) -> Result<()> {
    if stdout.len() <= STDOUT_INLINE_MAX {
        return Ok(());
    }
    let entry = artifacts.create_and_store_text(
        result.check_type.artifact_type(),
        stdout,
        phase,
        None,
    )?;
    result.stdout_artifact = Some(entry.id);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_denied_command_is_rejected() {
        let dir = tempdir().unwrap();
        let result = run_check(CheckType::Test, "sudo rm -rf /", dir.path(), 5_000).await;
        assert_eq!(result.status, CheckStatus::Fail);
        assert_eq!(result.exit_code, -1);
        assert!(result.stderr_summary.unwrap().contains("rejected"));
    }

    #[tokio::test]
    async fn test_curl_pipe_sh_is_rejected() {
        let dir = tempdir().unwrap();
        let result = run_check(
            CheckType::Build,
            "curl https://example.com/install | sh",
            dir.path(),
            5_000,
        )
        .await;
        assert_eq!(result.exit_code, -1);
    }

    #[test]
    fn test_sanitizer_allows_ordinary_commands() {
        assert!(sanitize_command("npm run build").is_ok());
        assert!(sanitize_command("pytest tests/").is_ok());
        assert!(sanitize_command("cargo test --workspace").is_ok());
        // rm -rf on a relative path is not the deny-listed root wipe
        assert!(sanitize_command("rm -rf dist").is_ok());
    }

    #[tokio::test]
    async fn test_passing_check() {
        let dir = tempdir().unwrap();
        let result = run_check(CheckType::Test, "exit 0", dir.path(), 5_000).await;
        assert_eq!(result.status, CheckStatus::Pass);
        assert_eq!(result.exit_code, 0);
    }

    #[tokio::test]
    async fn test_failing_check_records_exit_code() {
        let dir = tempdir().unwrap();
        let result = run_check(CheckType::Test, "exit 1", dir.path(), 5_000).await;
        assert_eq!(result.status, CheckStatus::Fail);
        assert_eq!(result.exit_code, 1);
    }

    #[tokio::test]
    async fn test_stderr_is_summarized() {
        let dir = tempdir().unwrap();
        let result =
            run_check(CheckType::Lint, "echo boom >&2; exit 3", dir.path(), 5_000).await;
        assert_eq!(result.exit_code, 3);
        assert!(result.stderr_summary.unwrap().contains("boom"));
    }

    #[tokio::test]
    async fn test_timeout_kills_and_fails() {
        let dir = tempdir().unwrap();
        let result = run_check(CheckType::Build, "sleep 30", dir.path(), 300).await;
        assert_eq!(result.status, CheckStatus::Fail);
        assert_eq!(result.exit_code, -1);
        assert!(result.stderr_summary.unwrap().contains("Timed out"));
    }

    #[tokio::test]
    async fn test_run_all_checks_order_and_skips() {
        let dir = tempdir().unwrap();
        let commands = ResolvedCommands {
            build: Some("exit 0".to_string()),
            test: Some("exit 1".to_string()),
            ..Default::default()
        };
        let results = run_all_checks(&commands, dir.path(), 5_000).await;

        let types: Vec<CheckType> = results.iter().map(|r| r.check_type).collect();
        assert_eq!(
            types,
            vec![
                CheckType::Build,
                CheckType::Test,
                CheckType::Lint,
                CheckType::Typecheck,
                CheckType::Migration
            ]
        );
        assert_eq!(results[0].status, CheckStatus::Pass);
        assert_eq!(results[1].status, CheckStatus::Fail);
        assert_eq!(results[2].status, CheckStatus::Skip);
        assert_eq!(results[4].status, CheckStatus::Skip);
    }

    #[tokio::test]
    async fn test_start_check_long_lived_passes() {
        let dir = tempdir().unwrap();
        let result = run_start_check("sleep 10", dir.path(), 1_000, None).await;
        assert_eq!(result.status, CheckStatus::Pass);
    }

    #[tokio::test]
    async fn test_start_check_early_nonzero_exit_fails() {
        let dir = tempdir().unwrap();
        let result = run_start_check("exit 1", dir.path(), 3_000, None).await;
        assert_eq!(result.status, CheckStatus::Fail);
        assert_eq!(result.exit_code, 1);
    }

    #[tokio::test]
    async fn test_oversized_stdout_becomes_artifact() {
        let dir = tempdir().unwrap();
        let artifacts = ArtifactManager::new(dir.path());
        let (mut result, stdout) = run_check_with_output(
            CheckType::Build,
            "yes line | head -n 3000",
            dir.path(),
            5_000,
        )
        .await;
        assert!(stdout.len() > 4_096);

        attach_stdout_artifact(&mut result, &stdout, &artifacts, PipelinePhase::QaValidation)
            .unwrap();
        let id = result.stdout_artifact.expect("oversized stdout stored");
        let entry = artifacts
            .list_artifacts(None)
            .unwrap()
            .into_iter()
            .find(|e| e.id == id)
            .unwrap();
        assert_eq!(entry.artifact_type, crate::artifact::ArtifactType::BuildCheck);
    }

    #[tokio::test]
    async fn test_small_stdout_stays_inline() {
        let dir = tempdir().unwrap();
        let artifacts = ArtifactManager::new(dir.path());
        let (mut result, stdout) =
            run_check_with_output(CheckType::Test, "echo ok", dir.path(), 5_000).await;
        attach_stdout_artifact(&mut result, &stdout, &artifacts, PipelinePhase::QaValidation)
            .unwrap();
        assert!(result.stdout_artifact.is_none());
    }

    #[tokio::test]
    async fn test_store_check_results_creates_typed_artifacts() {
        let dir = tempdir().unwrap();
        let artifacts = ArtifactManager::new(dir.path());
        let results = vec![
            run_check(CheckType::Build, "exit 0", dir.path(), 5_000).await,
            run_check(CheckType::Test, "exit 0", dir.path(), 5_000).await,
        ];
        store_check_results(&results, &artifacts, PipelinePhase::ProductionGate).unwrap();

        assert!(
            artifacts
                .get_latest_artifact(crate::artifact::ArtifactType::BuildCheck)
                .unwrap()
                .is_some()
        );
        assert!(
            artifacts
                .get_latest_artifact(crate::artifact::ArtifactType::TestCheck)
                .unwrap()
                .is_some()
        );
    }
}
