//! Out-of-band and terminal handlers: RECOVERY_LOOP, DONE, STUCK.

use crate::artifact::ArtifactType;
use crate::packets::RcaPacket;
use crate::phase::PipelinePhase;
use crate::pipeline::handlers::{PhaseContext, PhaseOutcome};
use crate::roles::Role;
use crate::util::summarize_output;
use anyhow::Result;
use tracing::{info, warn};

/// RECOVERY_LOOP: produce a root-cause-analysis packet for the failed
/// phase, with an explicit rewind target.
///
/// The packet core is deterministic; the debugger skill enriches the
/// narrative when the provider cooperates, and is skipped when it does not.
pub async fn run_recovery_loop(ctx: &mut PhaseContext<'_>) -> Result<PhaseOutcome> {
    let phase = PipelinePhase::RecoveryLoop;
    let mut created = Vec::new();

    let failed = ctx.state.failed_phase.unwrap_or(PipelinePhase::Intake);
    let blockers = ctx
        .state
        .gate_results
        .get(&failed)
        .map(|r| r.blockers.clone())
        .unwrap_or_default();

    let mut packet = RcaPacket::for_failed_phase(failed, &blockers);

    let skill = ctx.skills.load(Role::Debugger)?;
    let prompt = format!(
        "{}\n\nPhase {failed} failed with blockers:\n{}\n\nState the root cause in one paragraph.\n",
        skill.system_prompt,
        blockers.join("\n"),
    );
    match ctx.planner.complete(&prompt).await {
        Ok(analysis) if !analysis.trim().is_empty() => {
            packet.root_cause = summarize_output(&analysis, 2_000);
        }
        Ok(_) => {}
        Err(e) => warn!(error = %e, "debugger enrichment unavailable; using deterministic RCA"),
    }

    let json_entry =
        ctx.artifacts
            .create_and_store_json(ArtifactType::RcaReport, &packet, phase, None)?;
    created.push(ctx.push_artifact(json_entry));
    let md_entry = ctx.artifacts.create_and_store_text(
        ArtifactType::RcaReport,
        &packet.to_markdown(),
        phase,
        None,
    )?;
    created.push(ctx.push_artifact(md_entry));

    info!(
        %failed,
        rewind = ?packet.requires_phase_rewind_to,
        iteration = ctx.state.recovery_count,
        "rca recorded"
    );
    Ok(PhaseOutcome::ok(
        phase,
        created,
        format!(
            "RCA for {failed}; rewind to {}",
            packet
                .requires_phase_rewind_to
                .map(|p| p.to_string())
                .unwrap_or_else(|| "retry".to_string()),
        ),
    ))
}

/// DONE: emit the release set and refresh the docs index.
pub async fn run_done(ctx: &mut PhaseContext<'_>) -> Result<PhaseOutcome> {
    let phase = PipelinePhase::Done;
    let mut created = Vec::new();

    let artifact_count = ctx.state.artifacts.len();
    let release_notes = format!(
        "# Release Notes\n\n\
         Pipeline completed after {} recovery iteration(s).\n\n\
         {} artifacts on record; see docs/INDEX.md for the full inventory.\n",
        ctx.state.recovery_count, artifact_count,
    );
    let deployment = "# Deployment\n\n\
         1. Verify the production gate verdict is READY.\n\
         2. Apply migrations with the resolved migration command.\n\
         3. Deploy the build artifact to the target environment.\n\
         4. Run the start check against the deployed instance.\n";
    let rollback = "# Rollback\n\n\
         1. Redeploy the previous release artifact.\n\
         2. Revert migrations applied by this release, newest first.\n\
         3. Confirm the start check passes on the restored instance.\n";

    for (ty, body) in [
        (ArtifactType::ReleaseNotes, release_notes.as_str()),
        (ArtifactType::Deployment, deployment),
        (ArtifactType::Rollback, rollback),
    ] {
        let entry = ctx.artifacts.create_and_store_text(ty, body, phase, None)?;
        created.push(ctx.push_artifact(entry));
    }

    ctx.artifacts.update_index(&ctx.state.artifacts)?;

    Ok(PhaseOutcome::ok(
        phase,
        created,
        "Release notes, deployment, and rollback recorded",
    ))
}

/// STUCK: document the final failure state.
pub async fn run_stuck(ctx: &mut PhaseContext<'_>) -> Result<PhaseOutcome> {
    let phase = PipelinePhase::Stuck;

    let failed = ctx.state.failed_phase;
    let blockers = failed
        .and_then(|p| ctx.state.gate_results.get(&p))
        .map(|r| r.blockers.clone())
        .unwrap_or_default();

    let report = format!(
        "# Stuck Report\n\n\
         Recovery budget exhausted after {} of {} iterations.\n\n\
         **Last failed phase:** {}\n\n\
         ## Outstanding blockers\n\n{}\n",
        ctx.state.recovery_count,
        ctx.state.max_recovery_iterations,
        failed
            .map(|p| p.to_string())
            .unwrap_or_else(|| "unknown".to_string()),
        if blockers.is_empty() {
            "- (none recorded)".to_string()
        } else {
            blockers
                .iter()
                .map(|b| format!("- {b}"))
                .collect::<Vec<_>>()
                .join("\n")
        },
    );

    let entry =
        ctx.artifacts
            .create_and_store_text(ArtifactType::StuckReport, &report, phase, None)?;
    let id = ctx.push_artifact(entry);
    ctx.artifacts.update_index(&ctx.state.artifacts)?;

    Ok(PhaseOutcome::ok(phase, vec![id], "Stuck report recorded"))
}
