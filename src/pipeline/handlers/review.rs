//! REVIEW and AUDIT handlers.

use crate::artifact::ArtifactType;
use crate::packets::{
    AuditFinding, ChangeRequest, ChangeType, ImpactAnalysis, RiskLevel, build_audit_report,
};
use crate::phase::PipelinePhase;
use crate::pipeline::handlers::{PhaseContext, PhaseOutcome};
use crate::roles::Role;
use crate::snapshot::{RepoSnapshot, generate_repo_snapshot};
use crate::util::extract_json_object;
use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::{info, warn};

/// Line-movement ceiling before REVIEW escalates to a scope re-consent.
const LINE_DELTA_THRESHOLD: i64 = 1000;

/// REVIEW: diff the tree against the snapshot pinned at the role-plan
/// consensus; drift in configs or bulk line movement raises change
/// requests.
pub async fn run_review(ctx: &mut PhaseContext<'_>) -> Result<PhaseOutcome> {
    let phase = PipelinePhase::Review;
    let mut created = Vec::new();
    let mut raised: Vec<ChangeRequest> = Vec::new();

    let current = generate_repo_snapshot(ctx.project_dir)?;
    let baseline = load_baseline_snapshot(ctx)?;

    // One CR per drift kind per pipeline run; re-reviews after a routed
    // re-consent must not raise the same drift again
    let already_raised = |ty: ChangeType| {
        ctx.state
            .pending_change_requests
            .iter()
            .any(|cr| cr.change_type == ty)
    };

    if let Some(baseline) = &baseline {
        if !already_raised(ChangeType::Config) && current.configs_changed(baseline) {
            raised.push(
                ChangeRequest::new(
                    phase,
                    Role::Reviewer.as_str(),
                    ChangeType::Config,
                    "Configuration files changed since the role-plan consensus",
                    "Config drift invalidates the validated environment",
                )
                .with_impact(ImpactAnalysis {
                    affected_artifacts: diff_configs(&current, baseline),
                    affected_phases: vec![PipelinePhase::QaValidation],
                    risk_level: RiskLevel::Medium,
                }),
            );
        }
        let delta = current.line_delta(baseline);
        if !already_raised(ChangeType::Scope) && delta > LINE_DELTA_THRESHOLD {
            raised.push(
                ChangeRequest::new(
                    phase,
                    Role::Reviewer.as_str(),
                    ChangeType::Scope,
                    &format!("Implementation moved {delta} lines against a plan ceiling of {LINE_DELTA_THRESHOLD}"),
                    "Bulk drift suggests the delivered scope no longer matches the consented plan",
                )
                .with_impact(ImpactAnalysis {
                    affected_artifacts: vec![],
                    affected_phases: vec![PipelinePhase::ConsensusMasterPlan],
                    risk_level: RiskLevel::High,
                }),
            );
        }
    } else {
        warn!("no baseline snapshot from role-plan consensus; skipping drift checks");
    }

    for cr in &raised {
        let entry = ctx.artifacts.create_and_store_text(
            ArtifactType::ChangeRequest,
            &cr.to_markdown(),
            phase,
            None,
        )?;
        created.push(ctx.push_artifact(entry));
        ctx.state.pending_change_requests.push(cr.to_pending());
    }

    let decision = format!(
        "# Review Decision\n\n\
         **Baseline:** {}\n\n\
         **Change requests raised:** {}\n\n\
         {}",
        baseline
            .as_ref()
            .map(|b| b.snapshot_id.to_string())
            .unwrap_or_else(|| "none".to_string()),
        raised.len(),
        if raised.is_empty() {
            "No drift detected; proceeding to audit.".to_string()
        } else {
            raised
                .iter()
                .map(|cr| format!("- {} ({})", cr.description, cr.change_type))
                .collect::<Vec<_>>()
                .join("\n")
        },
    );
    let entry =
        ctx.artifacts
            .create_and_store_text(ArtifactType::ReviewDecision, &decision, phase, None)?;
    created.push(ctx.push_artifact(entry));

    info!(change_requests = raised.len(), "review complete");
    Ok(PhaseOutcome::ok(
        phase,
        created,
        format!("Review recorded; {} change request(s)", raised.len()),
    ))
}

/// The auditor's JSON envelope.
#[derive(Debug, Deserialize)]
struct FindingsEnvelope {
    #[serde(default)]
    findings: Vec<AuditFinding>,
}

/// AUDIT: run the auditor skill, fold findings into an audit report, and
/// raise change requests for blocking architectural or security findings.
pub async fn run_audit(ctx: &mut PhaseContext<'_>) -> Result<PhaseOutcome> {
    let phase = PipelinePhase::Audit;
    let mut created = Vec::new();

    let skill = ctx.skills.load(Role::Auditor)?;
    let tree = ctx
        .state
        .latest_repo_snapshot
        .as_ref()
        .map(|s| s.tree_summary.clone())
        .unwrap_or_default();
    let prompt = format!(
        "{}\n\n## Project tree\n\n{}\n\n\
         Respond with JSON: {{\"findings\": [{{\"severity\": \"P0|P1|P2|P3\",\n\
         \"category\": \"...\", \"description\": \"...\", \"blocking\": false}}]}}\n",
        skill.system_prompt, tree,
    );

    let completion = ctx
        .planner
        .complete(&prompt)
        .await
        .context("Auditor call failed")?;
    let envelope: FindingsEnvelope = extract_json_object(&completion)
        .and_then(|json| serde_json::from_str(&json).ok())
        .context("Auditor returned no parseable findings JSON")?;

    let snapshot_id = ctx
        .state
        .latest_repo_snapshot
        .as_ref()
        .map(|s| s.snapshot_id);
    let report = build_audit_report(envelope.findings, snapshot_id);

    let json_entry =
        ctx.artifacts
            .create_and_store_json(ArtifactType::AuditReport, &report, phase, None)?;
    created.push(ctx.push_artifact(json_entry));
    let md_entry = ctx.artifacts.create_and_store_text(
        ArtifactType::AuditReport,
        &report.to_markdown(),
        phase,
        None,
    )?;
    created.push(ctx.push_artifact(md_entry));

    // Blocking architectural/security findings force a re-consent
    let escalating: Vec<&AuditFinding> = report
        .findings
        .iter()
        .filter(|f| f.blocking && matches!(f.category.as_str(), "architecture" | "security"))
        .collect();
    for finding in &escalating {
        let cr = ChangeRequest::new(
            phase,
            Role::Auditor.as_str(),
            ChangeType::Architecture,
            &finding.description,
            &format!("Blocking {} finding ({})", finding.category, finding.severity),
        )
        .with_impact(ImpactAnalysis {
            affected_artifacts: vec![],
            affected_phases: vec![PipelinePhase::ConsensusArchitecture],
            risk_level: RiskLevel::High,
        });
        let entry = ctx.artifacts.create_and_store_text(
            ArtifactType::ChangeRequest,
            &cr.to_markdown(),
            phase,
            None,
        )?;
        created.push(ctx.push_artifact(entry));
        ctx.state.pending_change_requests.push(cr.to_pending());
    }

    info!(
        findings = report.findings.len(),
        risk = report.system_risk_score,
        escalated = escalating.len(),
        "audit complete"
    );
    Ok(PhaseOutcome::ok(
        phase,
        created,
        format!(
            "Audit {:?}: {} finding(s), risk {}",
            report.overall_status,
            report.findings.len(),
            report.system_risk_score,
        ),
    ))
}

/// The snapshot stored during the role-plan consensus, parsed back from its
/// artifact payload.
fn load_baseline_snapshot(ctx: &PhaseContext<'_>) -> Result<Option<RepoSnapshot>> {
    let Some(entry) = ctx
        .state
        .latest_artifact_in_phase(ArtifactType::RepoSnapshot, PipelinePhase::ConsensusRolePlans)
    else {
        return Ok(None);
    };
    let payload = ctx.artifacts.read_payload(entry)?;
    let snapshot = serde_json::from_str(&payload)
        .context("Baseline snapshot artifact failed to parse")?;
    Ok(Some(snapshot))
}

fn diff_configs(current: &RepoSnapshot, baseline: &RepoSnapshot) -> Vec<String> {
    let mut changed: Vec<String> = current
        .config_files
        .iter()
        .filter(|f| !baseline.config_files.contains(f))
        .chain(
            baseline
                .config_files
                .iter()
                .filter(|f| !current.config_files.contains(f)),
        )
        .cloned()
        .collect();
    changed.sort();
    changed.dedup();
    changed
}
