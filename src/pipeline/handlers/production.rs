//! PRODUCTION_GATE handler: the full check battery plus a readiness
//! verdict.

use crate::artifact::ArtifactType;
use crate::checks::{
    run_all_checks, run_env_check, run_placeholder_scan, run_start_check, store_check_results,
};
use crate::gate::CheckStatus;
use crate::phase::PipelinePhase;
use crate::pipeline::handlers::{PhaseContext, PhaseOutcome};
use crate::snapshot::{generate_repo_snapshot, resolve_commands};
use anyhow::Result;
use tracing::info;

pub async fn run_production_gate(ctx: &mut PhaseContext<'_>) -> Result<PhaseOutcome> {
    let phase = PipelinePhase::ProductionGate;
    let mut created = Vec::new();

    let commands = match &ctx.state.resolved_commands {
        Some(commands) => commands.clone(),
        None => {
            let snapshot = match &ctx.state.latest_repo_snapshot {
                Some(snapshot) => snapshot.clone(),
                None => generate_repo_snapshot(ctx.project_dir)?,
            };
            resolve_commands(&snapshot, &ctx.config.checks.overrides)
        }
    };

    let timeout_ms = ctx.config.checks.timeout_secs * 1_000;
    let mut results = run_all_checks(&commands, ctx.project_dir, timeout_ms).await;
    results.push(run_placeholder_scan(ctx.project_dir));
    results.push(run_env_check(ctx.project_dir));
    if let Some(start) = commands.start.as_deref() {
        results.push(
            run_start_check(
                start,
                ctx.project_dir,
                ctx.config.checks.start_timeout_secs * 1_000,
                None,
            )
            .await,
        );
    }

    store_check_results(&results, ctx.artifacts, phase)?;

    let failed: Vec<String> = results
        .iter()
        .filter(|r| r.status == CheckStatus::Fail)
        .map(|r| format!("{} (exit {})", r.check_type, r.exit_code))
        .collect();
    let ready = failed.is_empty();

    let mut verdict = format!(
        "# Production Readiness\n\n**Verdict:** {}\n\n| Check | Status | Exit | Duration |\n|---|---|---|---|\n",
        if ready { "READY" } else { "NOT READY" },
    );
    for result in &results {
        verdict.push_str(&format!(
            "| {} | {:?} | {} | {}ms |\n",
            result.check_type, result.status, result.exit_code, result.duration_ms,
        ));
    }
    if !ready {
        verdict.push_str(&format!("\nFailed checks: {}\n", failed.join(", ")));
    }

    let entry = ctx.artifacts.create_and_store_text(
        ArtifactType::ProductionReadiness,
        &verdict,
        phase,
        None,
    )?;
    created.push(ctx.push_artifact(entry));
    ctx.state.record_checks(phase, results);

    info!(ready, "production gate checks recorded");
    Ok(PhaseOutcome::ok(
        phase,
        created,
        if ready {
            "All production checks passed".to_string()
        } else {
            format!("Production checks failed: {}", failed.join(", "))
        },
    ))
}
