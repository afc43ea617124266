//! Constitution integrity verification.
//!
//! The constitution is a fixed governance document under the skills
//! directory. Its SHA-256 is captured once at INTAKE and re-checked before
//! every gate evaluation; any drift becomes a blocker until resolved.

use crate::artifact::{ArtifactEntry, ArtifactManager, ArtifactType};
use crate::phase::PipelinePhase;
use crate::pipeline::state::PipelineState;
use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::Path;

/// Fixed constitution path, relative to the project directory.
pub const CONSTITUTION_PATH: &str = "skills/POPEYE_CONSTITUTION.md";

/// Result of a constitution check, consumed by gate evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct ConstitutionStatus {
    pub valid: bool,
    pub reason: Option<String>,
}

impl ConstitutionStatus {
    pub fn valid() -> Self {
        Self {
            valid: true,
            reason: None,
        }
    }

    pub fn invalid(reason: &str) -> Self {
        Self {
            valid: false,
            reason: Some(reason.to_string()),
        }
    }
}

/// SHA-256 of the constitution file's bytes; empty string if the file is
/// missing (pre-INTAKE projects have no constitution yet).
pub fn compute_constitution_hash(project_dir: &Path) -> Result<String> {
    let path = project_dir.join(CONSTITUTION_PATH);
    if !path.exists() {
        return Ok(String::new());
    }
    let bytes = fs::read(&path)
        .with_context(|| format!("Failed to read constitution at {}", path.display()))?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(format!("{:x}", hasher.finalize()))
}

/// Store the constitution as an immutable INTAKE artifact and record its
/// hash on the pipeline state. Creates a minimal document if none exists.
pub fn create_constitution_artifact(
    project_dir: &Path,
    artifacts: &ArtifactManager,
    state: &mut PipelineState,
) -> Result<ArtifactEntry> {
    let path = project_dir.join(CONSTITUTION_PATH);
    if !path.exists() {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        fs::write(&path, default_constitution())
            .with_context(|| format!("Failed to write {}", path.display()))?;
    }

    let content = fs::read_to_string(&path)
        .with_context(|| format!("Failed to read constitution at {}", path.display()))?;
    let entry = artifacts.create_and_store_text(
        ArtifactType::Constitution,
        &content,
        PipelinePhase::Intake,
        None,
    )?;
    state.constitution_hash = compute_constitution_hash(project_dir)?;
    Ok(entry)
}

/// Compare the current constitution hash against the one captured at
/// INTAKE. An empty stored hash means pre-INTAKE: nothing to check yet.
pub fn verify_constitution(state: &PipelineState, project_dir: &Path) -> ConstitutionStatus {
    if state.constitution_hash.is_empty() {
        return ConstitutionStatus::valid();
    }
    let path = project_dir.join(CONSTITUTION_PATH);
    if !path.exists() {
        return ConstitutionStatus::invalid("Constitution file missing after INTAKE");
    }
    match compute_constitution_hash(project_dir) {
        Ok(hash) if hash == state.constitution_hash => ConstitutionStatus::valid(),
        Ok(_) => ConstitutionStatus::invalid(
            "Constitution file modified since INTAKE (hash mismatch)",
        ),
        Err(e) => ConstitutionStatus::invalid(&format!("Constitution unreadable: {e}")),
    }
}

fn default_constitution() -> &'static str {
    "# Project Constitution\n\n\
     1. Every phase boundary is a gate; gates are deterministic.\n\
     2. Artifacts are immutable; replacement is additive by version.\n\
     3. Plan-level decisions require multi-reviewer consensus.\n\
     4. Failures route through root-cause analysis before any rewind.\n\
     5. Nothing ships without a passing production gate and a clean audit.\n"
}
