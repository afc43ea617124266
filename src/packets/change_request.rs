//! Change requests and their routing to re-consent phases.

use crate::phase::PipelinePhase;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// What kind of change a CR proposes. Each kind maps to exactly one phase
/// that must re-consent before the pipeline may proceed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    Scope,
    Architecture,
    Dependency,
    Config,
    Requirement,
}

impl fmt::Display for ChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Scope => "scope",
            Self::Architecture => "architecture",
            Self::Dependency => "dependency",
            Self::Config => "config",
            Self::Requirement => "requirement",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CrStatus {
    Proposed,
    Approved,
    Rejected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

/// Which artifacts and phases a change would touch, and how risky it is.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImpactAnalysis {
    #[serde(default)]
    pub affected_artifacts: Vec<String>,
    #[serde(default)]
    pub affected_phases: Vec<PipelinePhase>,
    pub risk_level: RiskLevel,
}

impl Default for RiskLevel {
    fn default() -> Self {
        Self::Low
    }
}

/// A proposed re-consent, persisted both as a markdown artifact and as a
/// compact pending entry on the pipeline state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeRequest {
    pub cr_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub origin_phase: PipelinePhase,
    pub requested_by: String,
    pub change_type: ChangeType,
    pub description: String,
    pub justification: String,
    pub impact_analysis: ImpactAnalysis,
    pub status: CrStatus,
}

impl ChangeRequest {
    pub fn new(
        origin_phase: PipelinePhase,
        requested_by: &str,
        change_type: ChangeType,
        description: &str,
        justification: &str,
    ) -> Self {
        Self {
            cr_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            origin_phase,
            requested_by: requested_by.to_string(),
            change_type,
            description: description.to_string(),
            justification: justification.to_string(),
            impact_analysis: ImpactAnalysis::default(),
            status: CrStatus::Proposed,
        }
    }

    pub fn with_impact(mut self, impact: ImpactAnalysis) -> Self {
        self.impact_analysis = impact;
        self
    }

    /// The compact record kept on the pipeline state's pending list.
    pub fn to_pending(&self) -> PendingChangeRequest {
        PendingChangeRequest {
            cr_id: self.cr_id,
            change_type: self.change_type,
            target_phase: route_change_request(self),
            status: self.status,
        }
    }

    pub fn to_markdown(&self) -> String {
        format!(
            "# Change Request {}\n\n\
             **Type:** {}\n\n\
             **Origin phase:** {}\n\n\
             **Requested by:** {}\n\n\
             **Routes to:** {}\n\n\
             ## Description\n\n{}\n\n\
             ## Justification\n\n{}\n\n\
             **Risk:** {:?}\n",
            self.cr_id,
            self.change_type,
            self.origin_phase,
            self.requested_by,
            route_change_request(self),
            self.description,
            self.justification,
            self.impact_analysis.risk_level,
        )
    }
}

/// Compact pending-CR record carried on the pipeline state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingChangeRequest {
    pub cr_id: Uuid,
    pub change_type: ChangeType,
    pub target_phase: PipelinePhase,
    pub status: CrStatus,
}

/// Map a change type to the phase that must re-consent. Total: every kind
/// routes somewhere.
pub fn route_change_request(cr: &ChangeRequest) -> PipelinePhase {
    match cr.change_type {
        ChangeType::Scope | ChangeType::Requirement => PipelinePhase::ConsensusMasterPlan,
        ChangeType::Architecture => PipelinePhase::ConsensusArchitecture,
        ChangeType::Dependency => PipelinePhase::ConsensusRolePlans,
        ChangeType::Config => PipelinePhase::QaValidation,
    }
}
