//! Pure gate evaluation: no I/O, no clocks beyond the result timestamp.
//!
//! Each phase has a static [`GateDefinition`]; [`evaluate_gate`] folds the
//! pipeline state through it and returns a [`GateResult`] whose `pass` is
//! true exactly when no blocker was collected. The one deliberate asymmetry:
//! PRODUCTION_GATE requires an `audit_report` to exist *anywhere* in state,
//! while every other artifact requirement is matched against the gated
//! phase itself.

use crate::artifact::ArtifactType;
use crate::constitution::ConstitutionStatus;
use crate::gate::{CheckStatus, CheckType, GateDefinition, GateResult};
use crate::phase::PipelinePhase;
use crate::pipeline::state::PipelineState;
use chrono::Utc;

/// Weighted-score floor for consensus phases.
pub const CONSENSUS_THRESHOLD: f64 = 0.95;

/// Minimum reviewers a consensus round must reach.
pub const MIN_REVIEWERS: usize = 2;

const NON_TERMINAL: &[PipelinePhase] = &[
    PipelinePhase::Intake,
    PipelinePhase::ConsensusMasterPlan,
    PipelinePhase::Architecture,
    PipelinePhase::ConsensusArchitecture,
    PipelinePhase::RolePlanning,
    PipelinePhase::ConsensusRolePlans,
    PipelinePhase::Implementation,
    PipelinePhase::QaValidation,
    PipelinePhase::Review,
    PipelinePhase::Audit,
    PipelinePhase::ProductionGate,
];

/// Phases a change request may route to from REVIEW or AUDIT.
const CR_TARGETS: &[PipelinePhase] = &[
    PipelinePhase::ConsensusMasterPlan,
    PipelinePhase::ConsensusArchitecture,
    PipelinePhase::ConsensusRolePlans,
    PipelinePhase::QaValidation,
];

/// The static gate for a phase.
pub fn gate_definition(phase: PipelinePhase) -> GateDefinition {
    use ArtifactType as A;
    use PipelinePhase as P;

    let (required_artifacts, required_checks, consensus, allowed): (
        &'static [A],
        &'static [CheckType],
        bool,
        &'static [P],
    ) = match phase {
        P::Intake => (
            &[A::MasterPlan, A::RepoSnapshot, A::Constitution],
            &[],
            false,
            &[P::ConsensusMasterPlan],
        ),
        P::ConsensusMasterPlan => (&[A::Consensus], &[], true, &[P::Architecture]),
        P::Architecture => (&[A::Architecture], &[], false, &[P::ConsensusArchitecture]),
        P::ConsensusArchitecture => (&[A::Consensus], &[], true, &[P::RolePlanning]),
        P::RolePlanning => (&[A::RolePlan], &[], false, &[P::ConsensusRolePlans]),
        P::ConsensusRolePlans => (&[A::Consensus], &[], true, &[P::Implementation]),
        P::Implementation => (&[A::RepoSnapshot], &[], false, &[P::QaValidation]),
        P::QaValidation => (
            &[A::QaValidation],
            &[CheckType::Test],
            false,
            &[P::Review],
        ),
        P::Review => (
            &[A::ReviewDecision],
            &[],
            false,
            &[
                P::Audit,
                P::ConsensusMasterPlan,
                P::ConsensusArchitecture,
                P::ConsensusRolePlans,
                P::QaValidation,
            ],
        ),
        P::Audit => (
            &[A::AuditReport],
            &[],
            false,
            &[
                P::ProductionGate,
                P::ConsensusMasterPlan,
                P::ConsensusArchitecture,
                P::ConsensusRolePlans,
                P::QaValidation,
            ],
        ),
        P::ProductionGate => (
            &[A::ProductionReadiness],
            &[
                CheckType::Build,
                CheckType::Test,
                CheckType::Lint,
                CheckType::Typecheck,
            ],
            false,
            &[P::Done],
        ),
        P::Done => (&[A::ReleaseNotes, A::Deployment, A::Rollback], &[], false, &[]),
        P::RecoveryLoop => (&[A::RcaReport], &[], false, NON_TERMINAL),
        P::Stuck => (&[A::StuckReport], &[], false, &[]),
    };

    GateDefinition {
        phase,
        required_artifacts,
        required_checks,
        consensus_threshold: consensus.then_some(CONSENSUS_THRESHOLD),
        min_reviewers: if consensus { MIN_REVIEWERS } else { 0 },
        allowed_transitions: allowed,
        fail_transition: (!phase.is_terminal()).then_some(PipelinePhase::RecoveryLoop),
    }
}

/// Evaluate a phase's gate against the pipeline state.
///
/// Consensus scores are read back from `state.gate_results[phase]`, where
/// the consensus handler wrote them; the engine never recomputes them.
pub fn evaluate_gate(
    phase: PipelinePhase,
    state: &PipelineState,
    constitution: &ConstitutionStatus,
) -> GateResult {
    let def = gate_definition(phase);
    let mut blockers = Vec::new();
    let mut missing_artifacts = Vec::new();
    let mut failed_checks = Vec::new();

    if !constitution.valid {
        blockers.push(
            constitution
                .reason
                .clone()
                .unwrap_or_else(|| "Constitution integrity check failed".to_string()),
        );
    }

    for ty in def.required_artifacts {
        if !state.has_artifact_in_phase(*ty, phase) {
            blockers.push(format!("Missing required artifact '{ty}' for phase {phase}"));
            missing_artifacts.push(*ty);
        }
    }

    for check in def.required_checks {
        match state.check_result(phase, *check) {
            None => {
                blockers.push(format!("No '{check}' check result recorded for {phase}"));
                failed_checks.push(*check);
            }
            Some(result) if result.status != CheckStatus::Pass => {
                blockers.push(format!(
                    "Check '{check}' failed (exit_code={})",
                    result.exit_code
                ));
                failed_checks.push(*check);
            }
            Some(_) => {}
        }
    }

    if let Some(threshold) = def.consensus_threshold {
        if !state.has_artifact_in_phase(ArtifactType::Consensus, phase) {
            blockers.push(format!("No consensus packet recorded for {phase}"));
            missing_artifacts.push(ArtifactType::Consensus);
        } else {
            match state.gate_results.get(&phase).and_then(|r| r.score) {
                None => blockers.push(format!("Consensus score missing for {phase}")),
                Some(score) if score < threshold => blockers.push(format!(
                    "Consensus weighted score {score:.2} below threshold {threshold:.2}"
                )),
                Some(_) => {}
            }
        }
    }

    // Anywhere-scope: the audit report may come from any phase
    if phase == PipelinePhase::ProductionGate
        && !state.has_artifact_anywhere(ArtifactType::AuditReport)
    {
        blockers.push("No audit_report artifact exists in pipeline state".to_string());
        missing_artifacts.push(ArtifactType::AuditReport);
    }

    GateResult {
        phase,
        pass: blockers.is_empty(),
        score: None,
        blockers,
        missing_artifacts,
        failed_checks,
        consensus_score: None,
        timestamp: Utc::now(),
    }
}

/// Next phase in the linear sequence on a passing gate.
pub fn next_phase(current: PipelinePhase) -> Option<PipelinePhase> {
    current.next_in_sequence()
}

/// Whether `from` may hand off to `to`: the transition must be declared and
/// the from-gate must evaluate to pass. Change-request targets are legal
/// transitions out of REVIEW and AUDIT.
pub fn can_transition(
    from: PipelinePhase,
    to: PipelinePhase,
    state: &PipelineState,
    constitution: &ConstitutionStatus,
) -> bool {
    let def = gate_definition(from);
    if !def.allowed_transitions.contains(&to) {
        return false;
    }
    evaluate_gate(from, state, constitution).pass
}

/// Whether `to` is a legal change-request routing target.
pub fn is_cr_target(to: PipelinePhase) -> bool {
    CR_TARGETS.contains(&to)
}
