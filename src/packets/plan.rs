//! Plan packet: the unit submitted to a consensus round.

use crate::artifact::ArtifactRef;
use crate::phase::PipelinePhase;
use crate::roles::Role;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Weak references to the documents a plan packet is grounded on.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlanReferences {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub master_plan: Option<ArtifactRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constitution: Option<ArtifactRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo_snapshot: Option<ArtifactRef>,
}

/// What a phase proposes, what accepting it means, and what it depends on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanPacket {
    pub packet_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub phase: PipelinePhase,
    pub submitted_by: Role,
    pub version: u32,
    pub references: PlanReferences,
    #[serde(default)]
    pub proposed_artifacts: Vec<ArtifactRef>,
    #[serde(default)]
    pub acceptance_criteria: Vec<String>,
    #[serde(default)]
    pub artifact_dependencies: Vec<String>,
    #[serde(default)]
    pub constraints: Vec<String>,
    #[serde(default)]
    pub open_questions: Vec<String>,
}

impl PlanPacket {
    pub fn new(phase: PipelinePhase, submitted_by: Role) -> Self {
        Self {
            packet_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            phase,
            submitted_by,
            version: 1,
            references: PlanReferences::default(),
            proposed_artifacts: Vec::new(),
            acceptance_criteria: Vec::new(),
            artifact_dependencies: Vec::new(),
            constraints: Vec::new(),
            open_questions: Vec::new(),
        }
    }

    pub fn with_references(mut self, references: PlanReferences) -> Self {
        self.references = references;
        self
    }

    pub fn propose(mut self, artifact: ArtifactRef) -> Self {
        self.proposed_artifacts.push(artifact);
        self
    }

    pub fn with_acceptance_criteria(
        mut self,
        criteria: impl IntoIterator<Item = String>,
    ) -> Self {
        self.acceptance_criteria.extend(criteria);
        self
    }

    pub fn with_constraints(mut self, constraints: impl IntoIterator<Item = String>) -> Self {
        self.constraints.extend(constraints);
        self
    }

    pub fn with_open_questions(mut self, questions: impl IntoIterator<Item = String>) -> Self {
        self.open_questions.extend(questions);
        self
    }
}
