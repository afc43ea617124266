//! Typed error hierarchy for the popeye pipeline.
//!
//! Three top-level enums cover the three subsystems:
//! - `PipelineError` — orchestrator and state persistence failures
//! - `CheckError` — check runner sandbox failures
//! - `ConsensusError` — reviewer fan-out failures
//!
//! Handlers never let these escape the orchestrator loop: every handler
//! error is converted into a failed phase outcome and routed through the
//! recovery loop.

use crate::phase::PipelinePhase;
use thiserror::Error;

/// Errors from the orchestrator and pipeline state subsystem.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Phase {phase} handler failed: {message}")]
    HandlerFailed {
        phase: PipelinePhase,
        message: String,
    },

    #[error("Failed to persist pipeline state at {path}: {source}")]
    StatePersist {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Pipeline state at {path} does not match the expected shape")]
    SchemaViolation { path: std::path::PathBuf },

    #[error("Artifact {id} failed integrity verification")]
    ArtifactIntegrity { id: uuid::Uuid },

    #[error("Constitution drift detected: {reason}")]
    ConstitutionDrift { reason: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Errors from the check runner subprocess sandbox.
#[derive(Debug, Error)]
pub enum CheckError {
    #[error("Command rejected by sanitizer: {command}")]
    Rejected { command: String },

    #[error("Failed to spawn check process: {0}")]
    SpawnFailed(#[source] std::io::Error),

    #[error("Check timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
}

/// Errors from the consensus reviewer fan-out.
#[derive(Debug, Error)]
pub enum ConsensusError {
    #[error("Reviewer {reviewer_id} produced no usable vote: {message}")]
    ReviewerFailure {
        reviewer_id: String,
        message: String,
    },

    #[error("Consensus round had {got} reviewers, need at least {need}")]
    BelowQuorum { got: usize, need: usize },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
