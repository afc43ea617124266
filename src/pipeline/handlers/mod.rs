//! The 14 phase handlers.
//!
//! Handlers are a closed set dispatched by phase tag. Each one reads a
//! [`PhaseContext`], writes artifacts through the artifact manager, appends
//! every created artifact to the pipeline state, and returns a
//! [`PhaseOutcome`]. A handler error never escapes [`dispatch`]: it becomes
//! a failed outcome that the orchestrator routes through recovery.

use crate::artifact::{ArtifactEntry, ArtifactManager};
use crate::config::PopeyeConfig;
use crate::consensus::ConsensusRunner;
use crate::phase::PipelinePhase;
use crate::pipeline::state::PipelineState;
use crate::provider::{ProjectExecutor, ReasoningProvider};
use crate::skills::SkillLoader;
use anyhow::Result;
use std::path::Path;
use tracing::error;
use uuid::Uuid;

mod consensus;
mod execution;
mod planning;
mod production;
mod recovery;
mod review;

/// Everything a handler may touch.
pub struct PhaseContext<'a> {
    pub project_dir: &'a Path,
    pub state: &'a mut PipelineState,
    pub artifacts: &'a ArtifactManager,
    pub skills: &'a mut SkillLoader,
    pub consensus: &'a ConsensusRunner,
    pub planner: &'a dyn ReasoningProvider,
    pub executor: &'a dyn ProjectExecutor,
    pub config: &'a PopeyeConfig,
}

impl PhaseContext<'_> {
    /// Record a created artifact on the pipeline state and return its id.
    /// Every handler routes its artifacts through here so nothing escapes
    /// the state's artifact list.
    pub fn push_artifact(&mut self, entry: ArtifactEntry) -> Uuid {
        let id = entry.id;
        self.state.artifacts.push(entry);
        id
    }
}

/// What a handler reports back to the orchestrator.
#[derive(Debug, Clone)]
pub struct PhaseOutcome {
    pub phase: PipelinePhase,
    pub success: bool,
    pub artifacts: Vec<Uuid>,
    pub message: String,
    pub error: Option<String>,
}

impl PhaseOutcome {
    pub fn ok(phase: PipelinePhase, artifacts: Vec<Uuid>, message: impl Into<String>) -> Self {
        Self {
            phase,
            success: true,
            artifacts,
            message: message.into(),
            error: None,
        }
    }

    pub fn failed(phase: PipelinePhase, error: impl Into<String>) -> Self {
        let error = error.into();
        Self {
            phase,
            success: false,
            artifacts: Vec::new(),
            message: format!("Phase {phase} failed"),
            error: Some(error),
        }
    }
}

/// Run the handler for a phase. Handler errors are caught here and turned
/// into failed outcomes; the orchestrator treats those as gate failures.
pub async fn dispatch(phase: PipelinePhase, ctx: &mut PhaseContext<'_>) -> PhaseOutcome {
    let result: Result<PhaseOutcome> = match phase {
        PipelinePhase::Intake => planning::run_intake(ctx).await,
        PipelinePhase::Architecture => planning::run_architecture(ctx).await,
        PipelinePhase::RolePlanning => planning::run_role_planning(ctx).await,
        PipelinePhase::ConsensusMasterPlan
        | PipelinePhase::ConsensusArchitecture
        | PipelinePhase::ConsensusRolePlans => consensus::run_consensus_phase(phase, ctx).await,
        PipelinePhase::Implementation => execution::run_implementation(ctx).await,
        PipelinePhase::QaValidation => execution::run_qa_validation(ctx).await,
        PipelinePhase::Review => review::run_review(ctx).await,
        PipelinePhase::Audit => review::run_audit(ctx).await,
        PipelinePhase::ProductionGate => production::run_production_gate(ctx).await,
        PipelinePhase::RecoveryLoop => recovery::run_recovery_loop(ctx).await,
        PipelinePhase::Done => recovery::run_done(ctx).await,
        PipelinePhase::Stuck => recovery::run_stuck(ctx).await,
    };

    match result {
        Ok(outcome) => outcome,
        Err(e) => {
            error!(%phase, error = %e, "phase handler failed");
            PhaseOutcome::failed(phase, format!("{e:#}"))
        }
    }
}
