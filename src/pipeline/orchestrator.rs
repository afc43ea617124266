//! The orchestrator: one cooperative driver over the phase handlers.
//!
//! Each turn of the loop runs the current phase's handler, re-verifies the
//! constitution, evaluates the gate, and routes: forward on pass, into the
//! recovery loop on fail, to a change-request target after REVIEW/AUDIT,
//! or to an RCA rewind target after a passing RECOVERY_LOOP. State is
//! persisted after every transition.

use crate::artifact::{ArtifactEntry, ArtifactManager, ArtifactType, ContentType};
use crate::config::PopeyeConfig;
use crate::consensus::ConsensusRunner;
use crate::constitution::verify_constitution;
use crate::gate::{GateResult, engine};
use crate::packets::{CrStatus, RcaPacket};
use crate::phase::PipelinePhase;
use crate::pipeline::handlers::{self, PhaseContext, PhaseOutcome};
use crate::pipeline::state::PipelineState;
use crate::provider::{ProjectExecutor, ReasoningProvider};
use crate::skills::SkillLoader;
use anyhow::Result;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

/// Callback invoked with per-phase progress messages.
pub type ProgressCallback = Box<dyn Fn(PipelinePhase, &str) + Send + Sync>;

/// What a finished pipeline run reports.
#[derive(Debug)]
pub struct PipelineResult {
    pub success: bool,
    pub final_phase: PipelinePhase,
    pub artifacts: Vec<ArtifactEntry>,
    pub recovery_iterations: u32,
    pub error: Option<String>,
}

pub struct Orchestrator {
    project_dir: PathBuf,
    state: PipelineState,
    artifacts: ArtifactManager,
    skills: SkillLoader,
    consensus: ConsensusRunner,
    planner: Arc<dyn ReasoningProvider>,
    executor: Arc<dyn ProjectExecutor>,
    config: PopeyeConfig,
    on_progress: Option<ProgressCallback>,
}

impl Orchestrator {
    /// Load the persisted state (or initialize a fresh one) and assemble
    /// the subsystems.
    pub fn new(
        project_dir: PathBuf,
        config: PopeyeConfig,
        consensus: ConsensusRunner,
        planner: Arc<dyn ReasoningProvider>,
        executor: Arc<dyn ProjectExecutor>,
    ) -> Result<Self> {
        let artifacts = ArtifactManager::new(&project_dir);
        artifacts.ensure_docs_structure()?;
        let skills = SkillLoader::new(&project_dir);

        let mut state = PipelineState::load(&project_dir).unwrap_or_default();
        state.max_recovery_iterations = config.pipeline.max_recovery_iterations;

        Ok(Self {
            project_dir,
            state,
            artifacts,
            skills,
            consensus,
            planner,
            executor,
            config,
            on_progress: None,
        })
    }

    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.on_progress = Some(callback);
        self
    }

    /// Seed guidance prepended to the intake planning prompt.
    pub fn with_session_guidance(mut self, guidance: &str) -> Self {
        self.state.session_guidance = Some(guidance.to_string());
        self
    }

    pub fn state(&self) -> &PipelineState {
        &self.state
    }

    fn progress(&self, phase: PipelinePhase, message: &str) {
        if let Some(callback) = &self.on_progress {
            callback(phase, message);
        }
    }

    /// Drive the pipeline until DONE or STUCK.
    pub async fn run(mut self) -> Result<PipelineResult> {
        let mut last_error: Option<String> = None;

        while !self.state.pipeline_phase.is_terminal() {
            let phase = self.state.pipeline_phase;
            self.progress(phase, "starting");

            let outcome = self.run_handler(phase).await;
            self.progress(phase, &outcome.message);
            if let Some(error) = &outcome.error {
                last_error = Some(error.clone());
            }

            let constitution = verify_constitution(&self.state, &self.project_dir);
            let evaluated = engine::evaluate_gate(phase, &self.state, &constitution);
            let mut merged = merge_gate_result(self.state.gate_results.get(&phase), evaluated);
            if !outcome.success {
                // A handler failure is a gate failure even when the gate's
                // own requirements happen to hold from an earlier pass
                merged.pass = false;
                if let Some(error) = &outcome.error {
                    merged.blockers.push(format!("Handler error: {error}"));
                }
            }
            let passed = merged.pass;
            self.state.gate_results.insert(phase, merged);

            let next = if passed {
                self.route_on_pass(phase)?
            } else {
                self.route_on_fail(phase)
            };

            info!(from = %phase, to = %next, passed, "phase transition");
            self.state.pipeline_phase = next;
            self.state.save(&self.project_dir)?;
        }

        // Terminal handler runs once, best-effort
        let terminal = self.state.pipeline_phase;
        let outcome = self.run_handler(terminal).await;
        if let Some(error) = outcome.error {
            warn!(phase = %terminal, error, "terminal handler failed");
        }
        self.state.save(&self.project_dir)?;

        let success = terminal == PipelinePhase::Done;
        Ok(PipelineResult {
            success,
            final_phase: terminal,
            artifacts: self.state.artifacts.clone(),
            recovery_iterations: self.state.recovery_count,
            error: if success {
                None
            } else {
                Some(last_error.unwrap_or_else(|| format!("Pipeline halted at {terminal}")))
            },
        })
    }

    async fn run_handler(&mut self, phase: PipelinePhase) -> PhaseOutcome {
        let mut ctx = PhaseContext {
            project_dir: &self.project_dir,
            state: &mut self.state,
            artifacts: &self.artifacts,
            skills: &mut self.skills,
            consensus: &self.consensus,
            planner: self.planner.as_ref(),
            executor: self.executor.as_ref(),
            config: &self.config,
        };
        handlers::dispatch(phase, &mut ctx).await
    }

    /// Routing after a passing gate.
    fn route_on_pass(&mut self, phase: PipelinePhase) -> Result<PipelinePhase> {
        // Pending change requests are consulted only after REVIEW and AUDIT
        if matches!(phase, PipelinePhase::Review | PipelinePhase::Audit) {
            let proposed = self
                .state
                .pending_change_requests
                .iter_mut()
                .find(|cr| cr.status == CrStatus::Proposed);
            if let Some(cr) = proposed {
                cr.status = CrStatus::Approved;
                let target = cr.target_phase;
                info!(cr = %cr.cr_id, %target, "routing approved change request");
                return Ok(target);
            }
        }

        if phase == PipelinePhase::RecoveryLoop {
            let rewind = self
                .load_latest_rca()?
                .and_then(|rca| rca.requires_phase_rewind_to)
                .or(self.state.failed_phase)
                .unwrap_or(PipelinePhase::Intake);
            self.state.failed_phase = None;
            return Ok(rewind);
        }

        Ok(engine::next_phase(phase).unwrap_or(PipelinePhase::Done))
    }

    /// Routing after a failing gate: recovery first, STUCK once the budget
    /// is spent.
    fn route_on_fail(&mut self, phase: PipelinePhase) -> PipelinePhase {
        self.state.failed_phase = Some(phase);
        if self.state.recovery_count >= self.state.max_recovery_iterations {
            warn!(
                recovery_count = self.state.recovery_count,
                "recovery budget exhausted"
            );
            return PipelinePhase::Stuck;
        }
        self.state.recovery_count += 1;
        PipelinePhase::RecoveryLoop
    }

    /// The most recent RCA packet, parsed back from its JSON artifact.
    fn load_latest_rca(&self) -> Result<Option<RcaPacket>> {
        let Some(entry) = self
            .state
            .artifacts
            .iter()
            .filter(|a| {
                a.artifact_type == ArtifactType::RcaReport && a.content_type == ContentType::Json
            })
            .max_by_key(|a| a.timestamp)
        else {
            return Ok(None);
        };
        let payload = self.artifacts.read_payload(entry)?;
        Ok(serde_json::from_str(&payload).ok())
    }
}

/// Merge a fresh engine evaluation with a handler-written result: the
/// engine never computes consensus scores, so handler-written `score` and
/// `consensus_score` survive re-evaluation.
fn merge_gate_result(existing: Option<&GateResult>, mut fresh: GateResult) -> GateResult {
    if let Some(previous) = existing {
        if fresh.score.is_none() {
            fresh.score = previous.score;
        }
        if fresh.consensus_score.is_none() {
            fresh.consensus_score = previous.consensus_score;
        }
    }
    fresh
}
