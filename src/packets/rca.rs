//! Root-cause-analysis packet, produced once per recovery iteration.

use crate::phase::PipelinePhase;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Diagnosis of a failed phase, optionally carrying a rewind target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RcaPacket {
    pub rca_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub incident_summary: String,
    #[serde(default)]
    pub symptoms: Vec<String>,
    pub root_cause: String,
    pub responsible_layer: String,
    pub origin_phase: PipelinePhase,
    pub governance_gap: String,
    #[serde(default)]
    pub corrective_actions: Vec<String>,
    pub prevention: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requires_phase_rewind_to: Option<PipelinePhase>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub requires_consensus_on: Vec<PipelinePhase>,
}

impl RcaPacket {
    /// A deterministic packet for a failed phase, with the standard rewind
    /// target. Handlers enrich `root_cause` with provider analysis when one
    /// is available.
    pub fn for_failed_phase(failed: PipelinePhase, blockers: &[String]) -> Self {
        Self {
            rca_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            incident_summary: format!("Gate failure at {failed}"),
            symptoms: blockers.to_vec(),
            root_cause: format!("Phase {failed} did not satisfy its gate requirements"),
            responsible_layer: layer_for(failed).to_string(),
            origin_phase: failed,
            governance_gap: "Gate requirements were not pre-verified by the producing phase"
                .to_string(),
            corrective_actions: vec![format!(
                "Rewind to {} and regenerate the failing artifacts",
                rewind_target(failed)
            )],
            prevention: "Validate gate requirements inside the phase before handing off"
                .to_string(),
            requires_phase_rewind_to: Some(rewind_target(failed)),
            requires_consensus_on: Vec::new(),
        }
    }

    pub fn to_markdown(&self) -> String {
        let mut out = format!(
            "# Root Cause Analysis\n\n\
             **Incident:** {}\n\n\
             **Origin phase:** {}\n\n\
             **Responsible layer:** {}\n\n\
             ## Root cause\n\n{}\n\n\
             ## Governance gap\n\n{}\n\n\
             ## Prevention\n\n{}\n",
            self.incident_summary,
            self.origin_phase,
            self.responsible_layer,
            self.root_cause,
            self.governance_gap,
            self.prevention,
        );
        if !self.symptoms.is_empty() {
            out.push_str("\n## Symptoms\n\n");
            for symptom in &self.symptoms {
                out.push_str(&format!("- {symptom}\n"));
            }
        }
        if !self.corrective_actions.is_empty() {
            out.push_str("\n## Corrective actions\n\n");
            for action in &self.corrective_actions {
                out.push_str(&format!("- {action}\n"));
            }
        }
        if let Some(target) = self.requires_phase_rewind_to {
            out.push_str(&format!("\n**Rewind to:** {target}\n"));
        }
        out
    }
}

/// The phase a recovery iteration rewinds to for a given failure.
///
/// Validation-side failures rewind to IMPLEMENTATION; a failed consensus
/// rewinds to the planning phase it was consenting.
pub fn rewind_target(failed: PipelinePhase) -> PipelinePhase {
    use PipelinePhase as P;
    match failed {
        P::ProductionGate | P::Audit | P::QaValidation | P::Review | P::Implementation => {
            P::Implementation
        }
        consensus if consensus.is_consensus() => consensus
            .preceding_planning_phase()
            .expect("consensus phases have a planning predecessor"),
        other => other,
    }
}

fn layer_for(failed: PipelinePhase) -> &'static str {
    use PipelinePhase as P;
    match failed {
        P::Intake | P::Architecture | P::RolePlanning => "planning",
        P::ConsensusMasterPlan | P::ConsensusArchitecture | P::ConsensusRolePlans => "governance",
        P::Implementation => "implementation",
        P::QaValidation | P::Review | P::Audit | P::ProductionGate => "validation",
        P::RecoveryLoop | P::Stuck | P::Done => "pipeline",
    }
}
