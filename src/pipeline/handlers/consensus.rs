//! Consensus-phase handler, shared by all three consensus phases.
//!
//! The handler builds a plan packet around the artifact under review, runs
//! the reviewer fan-out, stores the resulting packet, and writes both
//! scores into the phase's gate result. The gate engine later reads the
//! weighted score back; it never recomputes it.

use crate::artifact::{ArtifactRef, ArtifactType};
use crate::consensus::ConsensusRules;
use crate::gate::{GateResult, engine};
use crate::packets::{PlanPacket, PlanReferences};
use crate::phase::PipelinePhase;
use crate::pipeline::handlers::{PhaseContext, PhaseOutcome};
use crate::roles::Role;
use crate::snapshot::generate_repo_snapshot;
use anyhow::{Context, Result, bail};
use chrono::Utc;
use tracing::info;

/// Which artifact type a consensus phase reviews, and who submits it.
fn subject_of(phase: PipelinePhase) -> Option<(ArtifactType, Role)> {
    match phase {
        PipelinePhase::ConsensusMasterPlan => Some((ArtifactType::MasterPlan, Role::Dispatcher)),
        PipelinePhase::ConsensusArchitecture => Some((ArtifactType::Architecture, Role::Architect)),
        PipelinePhase::ConsensusRolePlans => Some((ArtifactType::RolePlan, Role::Dispatcher)),
        _ => None,
    }
}

pub async fn run_consensus_phase(
    phase: PipelinePhase,
    ctx: &mut PhaseContext<'_>,
) -> Result<PhaseOutcome> {
    let Some((subject_type, submitted_by)) = subject_of(phase) else {
        bail!("{phase} is not a consensus phase");
    };
    let mut created = Vec::new();

    // Every current-generation artifact of the subject type is proposed:
    // the newest version of each group. Role plans come as a set, plans
    // and architectures as one document.
    let mut heads: std::collections::BTreeMap<uuid::Uuid, &crate::artifact::ArtifactEntry> =
        std::collections::BTreeMap::new();
    for artifact in ctx
        .state
        .artifacts
        .iter()
        .filter(|a| a.artifact_type == subject_type)
    {
        let head = heads.entry(artifact.group_id).or_insert(artifact);
        if artifact.version > head.version {
            *head = artifact;
        }
    }
    let subjects: Vec<ArtifactRef> = heads.values().map(|a| ArtifactRef::from(*a)).collect();
    if subjects.is_empty() {
        bail!("No {subject_type} artifact available for {phase}");
    }

    let references = PlanReferences {
        master_plan: ctx
            .state
            .latest_artifact(ArtifactType::MasterPlan)
            .map(ArtifactRef::from),
        constitution: ctx
            .state
            .latest_artifact(ArtifactType::Constitution)
            .map(ArtifactRef::from),
        repo_snapshot: ctx
            .state
            .latest_artifact(ArtifactType::RepoSnapshot)
            .map(ArtifactRef::from),
    };

    let skill = ctx.skills.load(submitted_by)?;
    let mut packet = PlanPacket::new(phase, submitted_by)
        .with_references(references)
        .with_acceptance_criteria([
            format!("The {subject_type} satisfies the master plan"),
            "No unresolved blocking issues".to_string(),
        ])
        .with_constraints(skill.constraints.clone());
    for subject in subjects {
        packet = packet.propose(subject);
    }

    // The gate definition owns the threshold and reviewer floor; the
    // config supplies the quorum and may only tighten the floor
    let gate = engine::gate_definition(phase);
    let configured = ctx.config.consensus.rules();
    let rules = ConsensusRules {
        threshold: gate.consensus_threshold.unwrap_or(configured.threshold),
        quorum: configured.quorum,
        min_reviewers: gate.min_reviewers.max(configured.min_reviewers),
    };
    // A round revisited through recovery rewinds counts as stuck once the
    // iteration bound is crossed; the runner then forces arbitration
    let consensus_packet = ctx
        .consensus
        .run_structured_consensus(&packet, rules, ctx.state.recovery_count)
        .await
        .with_context(|| format!("Consensus round failed for {phase}"))?;

    let entry = ctx.artifacts.create_and_store_json(
        ArtifactType::Consensus,
        &consensus_packet,
        phase,
        None,
    )?;
    created.push(ctx.push_artifact(entry));

    // Handler-written scores: weighted into `score`, simple into
    // `consensus_score`. The orchestrator's merge preserves both.
    ctx.state.gate_results.insert(
        phase,
        GateResult {
            phase,
            pass: consensus_packet.result.approved,
            score: Some(consensus_packet.result.weighted_score),
            blockers: Vec::new(),
            missing_artifacts: Vec::new(),
            failed_checks: Vec::new(),
            consensus_score: Some(consensus_packet.result.score),
            timestamp: Utc::now(),
        },
    );

    // The role-plan consensus pins the pre-implementation tree; REVIEW
    // later diffs against exactly this snapshot.
    if phase == PipelinePhase::ConsensusRolePlans {
        let snapshot = generate_repo_snapshot(ctx.project_dir)?;
        let snapshot_entry = ctx.artifacts.create_and_store_json(
            ArtifactType::RepoSnapshot,
            &snapshot,
            phase,
            None,
        )?;
        created.push(ctx.push_artifact(snapshot_entry));
    }

    info!(
        %phase,
        status = ?consensus_packet.final_status,
        weighted = consensus_packet.result.weighted_score,
        simple = consensus_packet.result.score,
        "consensus round stored"
    );
    Ok(PhaseOutcome::ok(
        phase,
        created,
        format!(
            "Consensus {:?} (weighted {:.2}, simple {:.2}, {} reviewers)",
            consensus_packet.final_status,
            consensus_packet.result.weighted_score,
            consensus_packet.result.score,
            consensus_packet.result.participating_reviewers,
        ),
    ))
}
