//! Pipeline phase definitions for the popeye orchestrator.
//!
//! The pipeline is a fixed, closed set of 14 phases: a linear delivery
//! sequence from INTAKE to DONE, plus two out-of-band phases (RECOVERY_LOOP
//! and STUCK) reachable only through gate failures.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A phase of the governance pipeline.
///
/// `Done` and `Stuck` are terminal: once the pipeline reaches either, the
/// orchestrator loop exits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PipelinePhase {
    Intake,
    ConsensusMasterPlan,
    Architecture,
    ConsensusArchitecture,
    RolePlanning,
    ConsensusRolePlans,
    Implementation,
    QaValidation,
    Review,
    Audit,
    ProductionGate,
    Done,
    RecoveryLoop,
    Stuck,
}

/// The linear delivery sequence. RECOVERY_LOOP and STUCK are not part of it;
/// they are entered through fail transitions only.
pub const LINEAR_SEQUENCE: [PipelinePhase; 12] = [
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
    PipelinePhase::Done,
];

impl PipelinePhase {
    /// The canonical SCREAMING_SNAKE_CASE tag, as persisted in state files.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Intake => "INTAKE",
            Self::ConsensusMasterPlan => "CONSENSUS_MASTER_PLAN",
            Self::Architecture => "ARCHITECTURE",
            Self::ConsensusArchitecture => "CONSENSUS_ARCHITECTURE",
            Self::RolePlanning => "ROLE_PLANNING",
            Self::ConsensusRolePlans => "CONSENSUS_ROLE_PLANS",
            Self::Implementation => "IMPLEMENTATION",
            Self::QaValidation => "QA_VALIDATION",
            Self::Review => "REVIEW",
            Self::Audit => "AUDIT",
            Self::ProductionGate => "PRODUCTION_GATE",
            Self::Done => "DONE",
            Self::RecoveryLoop => "RECOVERY_LOOP",
            Self::Stuck => "STUCK",
        }
    }

    /// Whether the orchestrator loop stops at this phase.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Stuck)
    }

    /// Whether this phase gates on a multi-reviewer consensus packet.
    pub fn is_consensus(&self) -> bool {
        matches!(
            self,
            Self::ConsensusMasterPlan | Self::ConsensusArchitecture | Self::ConsensusRolePlans
        )
    }

    /// The next phase in the linear sequence, if this phase is part of it.
    ///
    /// Returns `None` for DONE (end of sequence) and for the out-of-band
    /// phases, whose successors are decided by the orchestrator.
    pub fn next_in_sequence(&self) -> Option<PipelinePhase> {
        let idx = LINEAR_SEQUENCE.iter().position(|p| p == self)?;
        LINEAR_SEQUENCE.get(idx + 1).copied()
    }

    /// The planning phase a consensus phase re-consents. Used for change
    /// request routing and RCA rewind targets.
    pub fn preceding_planning_phase(&self) -> Option<PipelinePhase> {
        match self {
            Self::ConsensusMasterPlan => Some(Self::Intake),
            Self::ConsensusArchitecture => Some(Self::Architecture),
            Self::ConsensusRolePlans => Some(Self::RolePlanning),
            _ => None,
        }
    }
}

impl fmt::Display for PipelinePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linear_sequence_starts_and_ends() {
        assert_eq!(LINEAR_SEQUENCE[0], PipelinePhase::Intake);
        assert_eq!(LINEAR_SEQUENCE[11], PipelinePhase::Done);
    }

    #[test]
    fn test_next_in_sequence_moves_forward() {
        let mut phase = PipelinePhase::Intake;
        let mut visited = vec![phase];
        while let Some(next) = phase.next_in_sequence() {
            // Strictly forward: the successor appears one slot later
            let from = LINEAR_SEQUENCE.iter().position(|p| *p == phase).unwrap();
            let to = LINEAR_SEQUENCE.iter().position(|p| *p == next).unwrap();
            assert_eq!(to, from + 1);
            visited.push(next);
            phase = next;
        }
        assert_eq!(visited.len(), 12);
        assert_eq!(phase, PipelinePhase::Done);
    }

    #[test]
    fn test_production_gate_advances_to_done() {
        assert_eq!(
            PipelinePhase::ProductionGate.next_in_sequence(),
            Some(PipelinePhase::Done)
        );
    }

    #[test]
    fn test_out_of_band_phases_have_no_linear_successor() {
        assert_eq!(PipelinePhase::RecoveryLoop.next_in_sequence(), None);
        assert_eq!(PipelinePhase::Stuck.next_in_sequence(), None);
        assert_eq!(PipelinePhase::Done.next_in_sequence(), None);
    }

    #[test]
    fn test_terminal_phases() {
        assert!(PipelinePhase::Done.is_terminal());
        assert!(PipelinePhase::Stuck.is_terminal());
        assert!(!PipelinePhase::RecoveryLoop.is_terminal());
        assert!(!PipelinePhase::Intake.is_terminal());
    }

    #[test]
    fn test_consensus_phases() {
        assert!(PipelinePhase::ConsensusMasterPlan.is_consensus());
        assert!(PipelinePhase::ConsensusArchitecture.is_consensus());
        assert!(PipelinePhase::ConsensusRolePlans.is_consensus());
        assert!(!PipelinePhase::Review.is_consensus());
    }

    #[test]
    fn test_preceding_planning_phase() {
        assert_eq!(
            PipelinePhase::ConsensusArchitecture.preceding_planning_phase(),
            Some(PipelinePhase::Architecture)
        );
        assert_eq!(PipelinePhase::Audit.preceding_planning_phase(), None);
    }

    #[test]
    fn test_serde_screaming_snake_tags() {
        let json = serde_json::to_string(&PipelinePhase::QaValidation).unwrap();
        assert_eq!(json, "\"QA_VALIDATION\"");
        let parsed: PipelinePhase = serde_json::from_str("\"RECOVERY_LOOP\"").unwrap();
        assert_eq!(parsed, PipelinePhase::RecoveryLoop);
    }

    #[test]
    fn test_display_matches_serde_tag() {
        for phase in LINEAR_SEQUENCE {
            let json = serde_json::to_string(&phase).unwrap();
            assert_eq!(json, format!("\"{}\"", phase));
        }
    }
}
