//! Planning-side handlers: INTAKE, ARCHITECTURE, ROLE_PLANNING.

use crate::artifact::ArtifactType;
use crate::constitution::create_constitution_artifact;
use crate::phase::PipelinePhase;
use crate::pipeline::handlers::{PhaseContext, PhaseOutcome};
use crate::roles::Role;
use crate::snapshot::generate_repo_snapshot;
use anyhow::{Context, Result};
use tracing::info;

/// INTAKE: build the master plan, pin the constitution, and snapshot the
/// starting tree.
pub async fn run_intake(ctx: &mut PhaseContext<'_>) -> Result<PhaseOutcome> {
    let phase = PipelinePhase::Intake;
    let mut created = Vec::new();

    if ctx.state.active_roles.is_empty() {
        ctx.state.active_roles = ctx.config.pipeline.active_roles.clone();
    }

    // Re-entry (rewind to INTAKE) extends the existing plan's version chain
    let existing_group = ctx
        .state
        .latest_artifact(ArtifactType::MasterPlan)
        .map(|e| e.group_id);

    let skill = ctx.skills.load(Role::Dispatcher)?;
    let mut prompt = format!(
        "{}\n\nProduce the master plan for the project at '{}', as markdown.\n",
        skill.system_prompt,
        ctx.project_dir
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| ctx.project_dir.display().to_string()),
    );
    if let Some(guidance) = &ctx.state.session_guidance {
        prompt = format!("Session guidance: {guidance}\n\n{prompt}");
    }

    let plan_markdown = ctx
        .planner
        .complete(&prompt)
        .await
        .context("Master plan generation failed")?;
    let plan = ctx.artifacts.create_and_store_text(
        ArtifactType::MasterPlan,
        &plan_markdown,
        phase,
        existing_group,
    )?;
    created.push(ctx.push_artifact(plan));

    let constitution = create_constitution_artifact(ctx.project_dir, ctx.artifacts, ctx.state)?;
    created.push(ctx.push_artifact(constitution));

    let snapshot = generate_repo_snapshot(ctx.project_dir)?;
    let snapshot_entry =
        ctx.artifacts
            .create_and_store_json(ArtifactType::RepoSnapshot, &snapshot, phase, None)?;
    created.push(ctx.push_artifact(snapshot_entry));
    ctx.state.latest_repo_snapshot = Some(snapshot);

    info!(artifacts = created.len(), "intake complete");
    Ok(PhaseOutcome::ok(
        phase,
        created,
        "Master plan, constitution, and repo snapshot recorded",
    ))
}

/// ARCHITECTURE: produce the architecture document citing the master plan
/// and the current snapshot.
pub async fn run_architecture(ctx: &mut PhaseContext<'_>) -> Result<PhaseOutcome> {
    let phase = PipelinePhase::Architecture;

    let master_plan = ctx
        .state
        .latest_artifact(ArtifactType::MasterPlan)
        .cloned()
        .context("No master plan available for architecture")?;
    let plan_text = ctx.artifacts.read_payload(&master_plan)?;

    let tree = ctx
        .state
        .latest_repo_snapshot
        .as_ref()
        .map(|s| s.tree_summary.clone())
        .unwrap_or_default();

    let skill = ctx.skills.load(Role::Architect)?;
    let prompt = format!(
        "{}\n\n## Master plan ({})\n\n{}\n\n## Current tree\n\n{}\n\n\
         Produce the architecture document as markdown.\n",
        skill.system_prompt, master_plan.path, plan_text, tree,
    );

    let architecture = ctx
        .planner
        .complete(&prompt)
        .await
        .context("Architecture generation failed")?;

    let existing_group = ctx
        .state
        .latest_artifact(ArtifactType::Architecture)
        .map(|e| e.group_id);
    let entry = ctx.artifacts.create_and_store_text(
        ArtifactType::Architecture,
        &architecture,
        phase,
        existing_group,
    )?;
    let id = ctx.push_artifact(entry);

    Ok(PhaseOutcome::ok(phase, vec![id], "Architecture document recorded"))
}

/// ROLE_PLANNING: one role plan per active role, carrying tasks, role
/// dependencies, and acceptance criteria.
pub async fn run_role_planning(ctx: &mut PhaseContext<'_>) -> Result<PhaseOutcome> {
    let phase = PipelinePhase::RolePlanning;
    let mut created = Vec::new();

    let architecture = ctx
        .state
        .latest_artifact(ArtifactType::Architecture)
        .cloned()
        .context("No architecture available for role planning")?;
    let architecture_text = ctx.artifacts.read_payload(&architecture)?;

    let roles = ctx.state.active_roles.clone();
    for role in roles {
        let skill = ctx.skills.load(role)?;
        let depends = skill
            .depends_on
            .iter()
            .map(|r| r.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        let prompt = format!(
            "{}\n\n## Architecture\n\n{}\n\n\
             Produce the work plan for role {role}: tasks, dependencies on\n\
             other roles ({depends}), and acceptance criteria, as markdown.\n",
            skill.system_prompt, architecture_text,
        );
        let plan_body = ctx
            .planner
            .complete(&prompt)
            .await
            .with_context(|| format!("Role plan generation failed for {role}"))?;

        let plan = format!("# Role plan: {role}\n\n{plan_body}");
        let entry =
            ctx.artifacts
                .create_and_store_text(ArtifactType::RolePlan, &plan, phase, None)?;
        created.push(ctx.push_artifact(entry));
    }

    info!(plans = created.len(), "role planning complete");
    Ok(PhaseOutcome::ok(
        phase,
        created,
        format!("{} role plans recorded", ctx.state.active_roles.len()),
    ))
}
