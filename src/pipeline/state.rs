//! Persisted pipeline state.
//!
//! One JSON document per project, written atomically (tempfile + rename)
//! after every phase transition. A document that fails the shape check is
//! refused on load; the caller then initializes a fresh state.

use crate::artifact::{ArtifactEntry, ArtifactType};
use crate::errors::PipelineError;
use crate::gate::{CheckType, GateCheckResult, GateResult};
use crate::packets::PendingChangeRequest;
use crate::phase::PipelinePhase;
use crate::roles::Role;
use crate::snapshot::{RepoSnapshot, ResolvedCommands};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::warn;

/// State file path relative to the project directory.
pub const STATE_PATH: &str = ".popeye/pipeline.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineState {
    pub pipeline_phase: PipelinePhase,
    pub artifacts: Vec<ArtifactEntry>,
    pub recovery_count: u32,
    pub max_recovery_iterations: u32,
    pub gate_results: BTreeMap<PipelinePhase, GateResult>,
    pub gate_checks: BTreeMap<PipelinePhase, Vec<GateCheckResult>>,
    pub active_roles: Vec<Role>,
    pub constitution_hash: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latest_repo_snapshot: Option<RepoSnapshot>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_commands: Option<ResolvedCommands>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_phase: Option<PipelinePhase>,
    pub pending_change_requests: Vec<PendingChangeRequest>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_guidance: Option<String>,
}

impl Default for PipelineState {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineState {
    /// A fresh state at INTAKE.
    pub fn new() -> Self {
        Self {
            pipeline_phase: PipelinePhase::Intake,
            artifacts: Vec::new(),
            recovery_count: 0,
            max_recovery_iterations: 5,
            gate_results: BTreeMap::new(),
            gate_checks: BTreeMap::new(),
            active_roles: Vec::new(),
            constitution_hash: String::new(),
            latest_repo_snapshot: None,
            resolved_commands: None,
            failed_phase: None,
            pending_change_requests: Vec::new(),
            session_guidance: None,
        }
    }

    /// Load a persisted state. Missing file and malformed documents both
    /// yield `None`; the latter is logged since it usually means manual
    /// editing.
    pub fn load(project_dir: &Path) -> Option<PipelineState> {
        let path = project_dir.join(STATE_PATH);
        let content = fs::read_to_string(&path).ok()?;
        match serde_json::from_str(&content) {
            Ok(state) => Some(state),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "refusing malformed pipeline state");
                None
            }
        }
    }

    /// Persist atomically: write a sibling tempfile, then rename over the
    /// target so readers never observe a torn document.
    pub fn save(&self, project_dir: &Path) -> Result<()> {
        let path = project_dir.join(STATE_PATH);
        let parent = path
            .parent()
            .context("State path has no parent directory")?;
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;

        let json = serde_json::to_string_pretty(self).context("Failed to serialize state")?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json).map_err(|source| PipelineError::StatePersist {
            path: tmp.clone(),
            source,
        })?;
        fs::rename(&tmp, &path).map_err(|source| PipelineError::StatePersist {
            path: path.clone(),
            source,
        })?;
        Ok(())
    }

    /// Whether an artifact of this type was produced in this phase.
    pub fn has_artifact_in_phase(&self, ty: ArtifactType, phase: PipelinePhase) -> bool {
        self.artifacts
            .iter()
            .any(|a| a.artifact_type == ty && a.phase == phase)
    }

    /// Whether an artifact of this type exists in any phase.
    pub fn has_artifact_anywhere(&self, ty: ArtifactType) -> bool {
        self.artifacts.iter().any(|a| a.artifact_type == ty)
    }

    /// Most recent artifact of a type, by timestamp.
    pub fn latest_artifact(&self, ty: ArtifactType) -> Option<&ArtifactEntry> {
        self.artifacts
            .iter()
            .filter(|a| a.artifact_type == ty)
            .max_by_key(|a| a.timestamp)
    }

    /// Most recent artifact of a type produced in a specific phase.
    pub fn latest_artifact_in_phase(
        &self,
        ty: ArtifactType,
        phase: PipelinePhase,
    ) -> Option<&ArtifactEntry> {
        self.artifacts
            .iter()
            .filter(|a| a.artifact_type == ty && a.phase == phase)
            .max_by_key(|a| a.timestamp)
    }

    /// The recorded result for a check in a phase, if any.
    pub fn check_result(&self, phase: PipelinePhase, check: CheckType) -> Option<&GateCheckResult> {
        self.gate_checks
            .get(&phase)?
            .iter()
            .find(|r| r.check_type == check)
    }

    /// Replace this phase's check records.
    pub fn record_checks(&mut self, phase: PipelinePhase, results: Vec<GateCheckResult>) {
        self.gate_checks.insert(phase, results);
    }

    /// First pending change request still in proposed status.
    pub fn first_proposed_cr(&self) -> Option<&PendingChangeRequest> {
        self.pending_change_requests
            .iter()
            .find(|cr| cr.status == crate::packets::CrStatus::Proposed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packets::{ChangeRequest, ChangeType, CrStatus};
    use tempfile::tempdir;

    #[test]
    fn test_new_state_starts_at_intake() {
        let state = PipelineState::new();
        assert_eq!(state.pipeline_phase, PipelinePhase::Intake);
        assert_eq!(state.recovery_count, 0);
        assert_eq!(state.max_recovery_iterations, 5);
        assert!(state.artifacts.is_empty());
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = tempdir().unwrap();
        let mut state = PipelineState::new();
        state.pipeline_phase = PipelinePhase::Review;
        state.recovery_count = 2;
        state.constitution_hash = "abc".to_string();
        state.save(dir.path()).unwrap();

        let loaded = PipelineState::load(dir.path()).unwrap();
        assert_eq!(loaded, state);
        // No stray tempfile left behind
        assert!(!dir.path().join(".popeye/pipeline.json.tmp").exists());
    }

    #[test]
    fn test_load_missing_returns_none() {
        let dir = tempdir().unwrap();
        assert!(PipelineState::load(dir.path()).is_none());
    }

    #[test]
    fn test_load_refuses_malformed_document() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join(".popeye")).unwrap();
        fs::write(
            dir.path().join(STATE_PATH),
            r#"{"pipeline_phase": "NOT_A_PHASE"}"#,
        )
        .unwrap();
        assert!(PipelineState::load(dir.path()).is_none());
    }

    #[test]
    fn test_first_proposed_cr_skips_approved() {
        let mut state = PipelineState::new();
        let mut approved = ChangeRequest::new(
            PipelinePhase::Review,
            "REVIEWER",
            ChangeType::Config,
            "d",
            "j",
        )
        .to_pending();
        approved.status = CrStatus::Approved;
        let proposed = ChangeRequest::new(
            PipelinePhase::Review,
            "REVIEWER",
            ChangeType::Scope,
            "d",
            "j",
        )
        .to_pending();

        state.pending_change_requests = vec![approved, proposed.clone()];
        assert_eq!(state.first_proposed_cr().unwrap().cr_id, proposed.cr_id);
    }
}
