//! Execution-side handlers: IMPLEMENTATION and QA_VALIDATION.

use crate::artifact::ArtifactType;
use crate::checks::{attach_stdout_artifact, run_check_with_output, store_check_results};
use crate::gate::{CheckType, GateCheckResult};
use crate::phase::PipelinePhase;
use crate::pipeline::handlers::{PhaseContext, PhaseOutcome};
use crate::roles::Role;
use crate::snapshot::{generate_repo_snapshot, resolve_commands};
use anyhow::{Context, Result};
use tracing::info;

/// Roles whose plans are executed against the project tree.
const IMPLEMENTING_ROLES: &[Role] = &[
    Role::DbExpert,
    Role::BackendProgrammer,
    Role::FrontendProgrammer,
    Role::WebsiteProgrammer,
];

/// IMPLEMENTATION: inject per-role constraints into the external executor,
/// then snapshot the changed tree.
pub async fn run_implementation(ctx: &mut PhaseContext<'_>) -> Result<PhaseOutcome> {
    let phase = PipelinePhase::Implementation;

    let roles: Vec<Role> = ctx
        .state
        .active_roles
        .iter()
        .copied()
        .filter(|r| IMPLEMENTING_ROLES.contains(r))
        .collect();

    for role in &roles {
        let skill = ctx.skills.load(*role)?;
        let mut prompt = skill.system_prompt.clone();
        if !skill.constraints.is_empty() {
            prompt.push_str("\n\nConstraints:\n");
            for constraint in &skill.constraints {
                prompt.push_str(&format!("- {constraint}\n"));
            }
        }
        ctx.executor
            .execute(ctx.project_dir, Some(&prompt))
            .await
            .with_context(|| format!("Executor failed for role {role}"))?;
        info!(%role, "implementation executor finished");
    }

    // Post-implementation snapshot: QA and REVIEW both key off it
    let snapshot = generate_repo_snapshot(ctx.project_dir)?;
    let entry =
        ctx.artifacts
            .create_and_store_json(ArtifactType::RepoSnapshot, &snapshot, phase, None)?;
    let id = ctx.push_artifact(entry);
    ctx.state.latest_repo_snapshot = Some(snapshot);

    Ok(PhaseOutcome::ok(
        phase,
        vec![id],
        format!("{} implementing roles executed", roles.len()),
    ))
}

/// QA_VALIDATION: resolve commands, run the test check, store results and a
/// validation summary.
pub async fn run_qa_validation(ctx: &mut PhaseContext<'_>) -> Result<PhaseOutcome> {
    let phase = PipelinePhase::QaValidation;
    let mut created = Vec::new();

    let snapshot = match &ctx.state.latest_repo_snapshot {
        Some(snapshot) => snapshot.clone(),
        None => generate_repo_snapshot(ctx.project_dir)?,
    };
    let commands = resolve_commands(&snapshot, &ctx.config.checks.overrides);

    let commands_entry = ctx.artifacts.create_and_store_json(
        ArtifactType::ResolvedCommands,
        &commands,
        phase,
        None,
    )?;
    created.push(ctx.push_artifact(commands_entry));

    let timeout_ms = ctx.config.checks.timeout_secs * 1_000;
    let test_result = match commands.test.as_deref() {
        Some(command) => {
            let (mut result, stdout) =
                run_check_with_output(CheckType::Test, command, ctx.project_dir, timeout_ms).await;
            attach_stdout_artifact(&mut result, &stdout, ctx.artifacts, phase)?;
            result
        }
        None => GateCheckResult::skipped(CheckType::Test),
    };

    store_check_results(std::slice::from_ref(&test_result), ctx.artifacts, phase)?;
    let summary = format!(
        "# QA Validation\n\n\
         **Test command:** {}\n\n\
         **Status:** {:?} (exit {})\n\n\
         **Duration:** {}ms\n{}",
        if test_result.command.is_empty() {
            "(none resolved)"
        } else {
            test_result.command.as_str()
        },
        test_result.status,
        test_result.exit_code,
        test_result.duration_ms,
        test_result
            .stderr_summary
            .as_ref()
            .map(|s| format!("\n## Output\n\n```\n{s}\n```\n"))
            .unwrap_or_default(),
    );
    let summary_entry =
        ctx.artifacts
            .create_and_store_text(ArtifactType::QaValidation, &summary, phase, None)?;
    created.push(ctx.push_artifact(summary_entry));

    let status = test_result.status;
    ctx.state.record_checks(phase, vec![test_result]);
    ctx.state.resolved_commands = Some(commands);

    Ok(PhaseOutcome::ok(
        phase,
        created,
        format!("Test check finished: {status:?}"),
    ))
}
