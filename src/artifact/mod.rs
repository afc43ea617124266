//! Artifact types and the content-addressed store.
//!
//! Every document the pipeline produces is an immutable, typed, versioned
//! artifact: a payload file under `docs/` plus a metadata sidecar under
//! `docs/.artifacts/`. Artifacts reference each other only through weak
//! [`ArtifactRef`]s; replacement is additive via group version chains.

use crate::phase::PipelinePhase;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

pub mod store;

pub use store::ArtifactManager;

/// The closed set of artifact types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactType {
    MasterPlan,
    Architecture,
    RolePlan,
    Consensus,
    Arbitration,
    AuditReport,
    RcaReport,
    ProductionReadiness,
    ReleaseNotes,
    Deployment,
    Rollback,
    RepoSnapshot,
    BuildCheck,
    TestCheck,
    LintCheck,
    TypecheckCheck,
    PlaceholderScan,
    QaValidation,
    ReviewDecision,
    StuckReport,
    JournalistTrace,
    ResolvedCommands,
    Constitution,
    ChangeRequest,
    AdditionalContext,
}

impl ArtifactType {
    /// The snake_case token used as the filename prefix and serde tag.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MasterPlan => "master_plan",
            Self::Architecture => "architecture",
            Self::RolePlan => "role_plan",
            Self::Consensus => "consensus",
            Self::Arbitration => "arbitration",
            Self::AuditReport => "audit_report",
            Self::RcaReport => "rca_report",
            Self::ProductionReadiness => "production_readiness",
            Self::ReleaseNotes => "release_notes",
            Self::Deployment => "deployment",
            Self::Rollback => "rollback",
            Self::RepoSnapshot => "repo_snapshot",
            Self::BuildCheck => "build_check",
            Self::TestCheck => "test_check",
            Self::LintCheck => "lint_check",
            Self::TypecheckCheck => "typecheck_check",
            Self::PlaceholderScan => "placeholder_scan",
            Self::QaValidation => "qa_validation",
            Self::ReviewDecision => "review_decision",
            Self::StuckReport => "stuck_report",
            Self::JournalistTrace => "journalist_trace",
            Self::ResolvedCommands => "resolved_commands",
            Self::Constitution => "constitution",
            Self::ChangeRequest => "change_request",
            Self::AdditionalContext => "additional_context",
        }
    }

    /// The `docs/` subdirectory this type's payload files live under.
    pub fn dir_name(&self) -> &'static str {
        match self {
            Self::MasterPlan => "master-plan",
            Self::Architecture => "architecture",
            Self::RolePlan => "role-plans",
            Self::Consensus => "consensus",
            Self::Arbitration => "arbitration",
            Self::AuditReport => "audit",
            Self::RcaReport | Self::StuckReport => "incidents",
            Self::ProductionReadiness => "production",
            Self::ReleaseNotes | Self::Deployment | Self::Rollback => "release",
            Self::RepoSnapshot => "snapshots",
            Self::BuildCheck
            | Self::TestCheck
            | Self::LintCheck
            | Self::TypecheckCheck
            | Self::PlaceholderScan
            | Self::QaValidation
            | Self::ResolvedCommands => "checks",
            Self::ReviewDecision
            | Self::JournalistTrace
            | Self::ChangeRequest
            | Self::AdditionalContext => "journal",
            Self::Constitution => "governance",
        }
    }

    /// All `docs/` subdirectories, for `ensure_docs_structure`.
    pub fn all_dir_names() -> [&'static str; 13] {
        [
            "master-plan",
            "architecture",
            "role-plans",
            "consensus",
            "arbitration",
            "audit",
            "incidents",
            "production",
            "release",
            "snapshots",
            "checks",
            "journal",
            "governance",
        ]
    }
}

impl fmt::Display for ArtifactType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Payload encoding of an artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Markdown,
    Json,
}

impl ContentType {
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Markdown => "md",
            Self::Json => "json",
        }
    }
}

/// The unit of storage: one immutable document plus its provenance.
///
/// Within a `group_id`, `version` forms a strict 1..N chain linked through
/// `previous_id`. `sha256` is the hash of the payload bytes at write time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactEntry {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub artifact_type: ArtifactType,
    pub phase: PipelinePhase,
    pub version: u32,
    /// Repo-relative payload path under `docs/`.
    pub path: String,
    pub sha256: String,
    pub timestamp: DateTime<Utc>,
    pub immutable: bool,
    pub content_type: ContentType,
    pub group_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_id: Option<Uuid>,
}

/// A weak reference to an artifact, carried inside packets. It refers
/// without owning; consumers re-resolve through the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactRef {
    pub artifact_id: Uuid,
    pub path: String,
    pub sha256: String,
    pub version: u32,
    #[serde(rename = "type")]
    pub artifact_type: ArtifactType,
}

impl From<&ArtifactEntry> for ArtifactRef {
    fn from(entry: &ArtifactEntry) -> Self {
        ArtifactRef {
            artifact_id: entry.id,
            path: entry.path.clone(),
            sha256: entry.sha256.clone(),
            version: entry.version,
            artifact_type: entry.artifact_type,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_tag_matches_serde() {
        let json = serde_json::to_string(&ArtifactType::RcaReport).unwrap();
        assert_eq!(json, "\"rca_report\"");
        let parsed: ArtifactType = serde_json::from_str("\"production_readiness\"").unwrap();
        assert_eq!(parsed, ArtifactType::ProductionReadiness);
    }

    #[test]
    fn test_every_dir_name_is_known() {
        let known = ArtifactType::all_dir_names();
        for ty in [
            ArtifactType::MasterPlan,
            ArtifactType::Architecture,
            ArtifactType::RolePlan,
            ArtifactType::Consensus,
            ArtifactType::Arbitration,
            ArtifactType::AuditReport,
            ArtifactType::RcaReport,
            ArtifactType::ProductionReadiness,
            ArtifactType::ReleaseNotes,
            ArtifactType::Deployment,
            ArtifactType::Rollback,
            ArtifactType::RepoSnapshot,
            ArtifactType::BuildCheck,
            ArtifactType::TestCheck,
            ArtifactType::LintCheck,
            ArtifactType::TypecheckCheck,
            ArtifactType::PlaceholderScan,
            ArtifactType::QaValidation,
            ArtifactType::ReviewDecision,
            ArtifactType::StuckReport,
            ArtifactType::JournalistTrace,
            ArtifactType::ResolvedCommands,
            ArtifactType::Constitution,
            ArtifactType::ChangeRequest,
            ArtifactType::AdditionalContext,
        ] {
            assert!(known.contains(&ty.dir_name()), "{} unmapped", ty);
        }
    }

    #[test]
    fn test_content_type_extensions() {
        assert_eq!(ContentType::Markdown.extension(), "md");
        assert_eq!(ContentType::Json.extension(), "json");
    }

    #[test]
    fn test_artifact_ref_from_entry() {
        let entry = ArtifactEntry {
            id: Uuid::new_v4(),
            artifact_type: ArtifactType::MasterPlan,
            phase: PipelinePhase::Intake,
            version: 3,
            path: "docs/master-plan/master_plan_00000000_v3_2026-08-01.md".into(),
            sha256: "abc".into(),
            timestamp: Utc::now(),
            immutable: true,
            content_type: ContentType::Markdown,
            group_id: Uuid::new_v4(),
            previous_id: Some(Uuid::new_v4()),
        };
        let r = ArtifactRef::from(&entry);
        assert_eq!(r.artifact_id, entry.id);
        assert_eq!(r.version, 3);
        assert_eq!(r.artifact_type, ArtifactType::MasterPlan);
        assert_eq!(r.path, entry.path);
    }
}
