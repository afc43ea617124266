//! Gate check and gate result types.
//!
//! A gate is a deterministic predicate over the pipeline state: required
//! artifact types produced in the gated phase, required check results, and
//! an optional consensus threshold. The pure evaluation lives in
//! [`engine`]; these are the records it consumes and produces.

use crate::artifact::ArtifactType;
use crate::phase::PipelinePhase;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

pub mod engine;

/// Kinds of executable checks a gate can require.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckType {
    Build,
    Test,
    Lint,
    Typecheck,
    Migration,
    PlaceholderScan,
    Start,
    EnvCheck,
}

impl CheckType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Build => "build",
            Self::Test => "test",
            Self::Lint => "lint",
            Self::Typecheck => "typecheck",
            Self::Migration => "migration",
            Self::PlaceholderScan => "placeholder_scan",
            Self::Start => "start",
            Self::EnvCheck => "env_check",
        }
    }

    /// The artifact type a stored result of this check is filed under.
    pub fn artifact_type(&self) -> ArtifactType {
        match self {
            Self::Build => ArtifactType::BuildCheck,
            Self::Test => ArtifactType::TestCheck,
            Self::Lint => ArtifactType::LintCheck,
            Self::Typecheck => ArtifactType::TypecheckCheck,
            Self::PlaceholderScan => ArtifactType::PlaceholderScan,
            // Migration, start, and env results ride along with build output
            Self::Migration | Self::Start | Self::EnvCheck => ArtifactType::BuildCheck,
        }
    }
}

impl fmt::Display for CheckType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Outcome of a single check execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Pass,
    Fail,
    Skip,
}

impl CheckStatus {
    pub fn is_pass(&self) -> bool {
        matches!(self, Self::Pass)
    }
}

/// The record of one check execution, as consumed by gate evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateCheckResult {
    pub check_type: CheckType,
    pub status: CheckStatus,
    pub command: String,
    pub exit_code: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdout_artifact: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stderr_summary: Option<String>,
    pub duration_ms: u64,
    pub timestamp: DateTime<Utc>,
}

impl GateCheckResult {
    /// A skip record for a check whose command could not be resolved.
    pub fn skipped(check_type: CheckType) -> Self {
        Self {
            check_type,
            status: CheckStatus::Skip,
            command: String::new(),
            exit_code: 0,
            stdout_artifact: None,
            stderr_summary: Some("no command resolved".to_string()),
            duration_ms: 0,
            timestamp: Utc::now(),
        }
    }
}

/// The outcome of evaluating one phase's gate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateResult {
    pub phase: PipelinePhase,
    pub pass: bool,
    /// Weighted consensus score, written by consensus-phase handlers and
    /// preserved across engine re-evaluation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    pub blockers: Vec<String>,
    pub missing_artifacts: Vec<ArtifactType>,
    pub failed_checks: Vec<CheckType>,
    /// Simple (unweighted) consensus score, handler-written like `score`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consensus_score: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

/// Static description of one phase's gate.
#[derive(Debug, Clone)]
pub struct GateDefinition {
    pub phase: PipelinePhase,
    /// Artifact types that must exist and have been produced in this phase.
    pub required_artifacts: &'static [ArtifactType],
    /// Checks that must have a passing result recorded for this phase.
    pub required_checks: &'static [CheckType],
    /// Minimum weighted consensus score, for consensus phases.
    pub consensus_threshold: Option<f64>,
    /// Minimum number of reviewers a consensus round must reach.
    pub min_reviewers: usize,
    /// Phases this one may legally hand off to on a passing gate.
    pub allowed_transitions: &'static [PipelinePhase],
    /// Where a failing gate routes; `None` for terminal phases.
    pub fail_transition: Option<PipelinePhase>,
}
