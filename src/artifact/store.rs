//! Write-once artifact store with metadata sidecars and group versioning.
//!
//! Layout under the project directory:
//!
//! ```text
//! docs/
//! ├── INDEX.md                      # human-readable journal index
//! ├── .artifacts/{uuid}.json        # one metadata sidecar per artifact
//! └── {subdir}/{type}_{sid}_v{ver}_{date}.{md|json}
//! ```
//!
//! The sidecar is written after the payload file, so a crash between the two
//! leaves an orphan payload that enumeration ignores. Malformed sidecars are
//! skipped, never fatal.

use crate::artifact::{ArtifactEntry, ArtifactRef, ArtifactType, ContentType};
use crate::phase::PipelinePhase;
use crate::util::short_id;
use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

/// Directory holding metadata sidecars, relative to `docs/`.
const SIDECAR_DIR: &str = ".artifacts";

/// Hex SHA-256 of a byte slice.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// The artifact manager owns all writes under `docs/`.
pub struct ArtifactManager {
    project_dir: PathBuf,
    docs_dir: PathBuf,
}

impl ArtifactManager {
    pub fn new(project_dir: &Path) -> Self {
        Self {
            project_dir: project_dir.to_path_buf(),
            docs_dir: project_dir.join("docs"),
        }
    }

    /// Create the fixed `docs/` subtree and the sidecar directory.
    pub fn ensure_docs_structure(&self) -> Result<()> {
        fs::create_dir_all(self.docs_dir.join(SIDECAR_DIR))
            .with_context(|| format!("Failed to create {}", self.docs_dir.display()))?;
        for dir in ArtifactType::all_dir_names() {
            fs::create_dir_all(self.docs_dir.join(dir))
                .with_context(|| format!("Failed to create docs subdirectory {dir}"))?;
        }
        Ok(())
    }

    /// Store a markdown document as a new immutable artifact.
    pub fn create_and_store_text(
        &self,
        artifact_type: ArtifactType,
        markdown: &str,
        phase: PipelinePhase,
        group_id: Option<Uuid>,
    ) -> Result<ArtifactEntry> {
        self.store(
            artifact_type,
            markdown.as_bytes(),
            ContentType::Markdown,
            phase,
            group_id,
        )
    }

    /// Serialize a value to pretty JSON and store it as a new artifact.
    pub fn create_and_store_json<T: Serialize>(
        &self,
        artifact_type: ArtifactType,
        value: &T,
        phase: PipelinePhase,
        group_id: Option<Uuid>,
    ) -> Result<ArtifactEntry> {
        let json =
            serde_json::to_string_pretty(value).context("Failed to serialize artifact payload")?;
        self.store(
            artifact_type,
            json.as_bytes(),
            ContentType::Json,
            phase,
            group_id,
        )
    }

    fn store(
        &self,
        artifact_type: ArtifactType,
        bytes: &[u8],
        content_type: ContentType,
        phase: PipelinePhase,
        group_id: Option<Uuid>,
    ) -> Result<ArtifactEntry> {
        self.ensure_docs_structure()?;

        let id = Uuid::new_v4();
        let timestamp = Utc::now();

        // A fresh group starts at v1; a provided group continues its chain.
        let (group_id, version, previous_id) = match group_id {
            None => (Uuid::new_v4(), 1, None),
            Some(group) => {
                let chain = self.group_chain(group)?;
                let latest = chain.last();
                (
                    group,
                    latest.map(|e| e.version + 1).unwrap_or(1),
                    latest.map(|e| e.id),
                )
            }
        };

        let filename = format!(
            "{}_{}_v{}_{}.{}",
            artifact_type.as_str(),
            short_id(&id),
            version,
            timestamp.format("%Y-%m-%d"),
            content_type.extension(),
        );
        let rel_path = format!("docs/{}/{}", artifact_type.dir_name(), filename);
        let abs_path = self.project_dir.join(&rel_path);

        fs::write(&abs_path, bytes)
            .with_context(|| format!("Failed to write artifact {}", abs_path.display()))?;

        let entry = ArtifactEntry {
            id,
            artifact_type,
            phase,
            version,
            path: rel_path,
            sha256: sha256_hex(bytes),
            timestamp,
            immutable: true,
            content_type,
            group_id,
            previous_id,
        };

        // Sidecar last: readers only see artifacts whose metadata landed.
        let sidecar = self.sidecar_path(&id);
        let meta = serde_json::to_string_pretty(&entry)
            .context("Failed to serialize artifact metadata")?;
        fs::write(&sidecar, meta)
            .with_context(|| format!("Failed to write sidecar {}", sidecar.display()))?;

        debug!(artifact = %entry.path, %artifact_type, version, "stored artifact");
        Ok(entry)
    }

    /// All artifacts, optionally filtered by type, timestamp ascending.
    pub fn list_artifacts(&self, artifact_type: Option<ArtifactType>) -> Result<Vec<ArtifactEntry>> {
        let sidecar_dir = self.docs_dir.join(SIDECAR_DIR);
        if !sidecar_dir.exists() {
            return Ok(Vec::new());
        }

        let mut entries = Vec::new();
        for dir_entry in fs::read_dir(&sidecar_dir)
            .with_context(|| format!("Failed to read {}", sidecar_dir.display()))?
        {
            let path = dir_entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Ok(content) = fs::read_to_string(&path) else {
                continue;
            };
            match serde_json::from_str::<ArtifactEntry>(&content) {
                Ok(entry) => {
                    if artifact_type.is_none_or(|t| t == entry.artifact_type) {
                        entries.push(entry);
                    }
                }
                Err(e) => {
                    warn!(sidecar = %path.display(), error = %e, "skipping malformed sidecar");
                }
            }
        }

        entries.sort_by_key(|e| e.timestamp);
        Ok(entries)
    }

    /// The most recent artifact of a type, if any.
    pub fn get_latest_artifact(&self, artifact_type: ArtifactType) -> Result<Option<ArtifactEntry>> {
        Ok(self.list_artifacts(Some(artifact_type))?.pop())
    }

    /// Re-read the payload and compare its hash against the recorded one.
    /// A missing payload file fails verification rather than erroring.
    pub fn verify_artifact(&self, entry: &ArtifactEntry) -> Result<bool> {
        let path = self.project_dir.join(&entry.path);
        if !path.exists() {
            return Ok(false);
        }
        let bytes =
            fs::read(&path).with_context(|| format!("Failed to read {}", path.display()))?;
        Ok(sha256_hex(&bytes) == entry.sha256)
    }

    /// Read an artifact's payload back as a UTF-8 string.
    pub fn read_payload(&self, entry: &ArtifactEntry) -> Result<String> {
        let path = self.project_dir.join(&entry.path);
        fs::read_to_string(&path)
            .with_context(|| format!("Failed to read artifact payload {}", path.display()))
    }

    pub fn to_artifact_ref(&self, entry: &ArtifactEntry) -> ArtifactRef {
        ArtifactRef::from(entry)
    }

    /// Rewrite `docs/INDEX.md`: a per-type table of every artifact, oldest
    /// first within each type.
    pub fn update_index(&self, artifacts: &[ArtifactEntry]) -> Result<()> {
        let mut out = String::from("# Artifact Index\n");
        let mut types: Vec<ArtifactType> = artifacts.iter().map(|a| a.artifact_type).collect();
        types.sort();
        types.dedup();

        for ty in types {
            out.push_str(&format!("\n## {}\n\n", ty));
            out.push_str("| Version | Phase | Path | Written |\n");
            out.push_str("|---|---|---|---|\n");
            for entry in artifacts.iter().filter(|a| a.artifact_type == ty) {
                out.push_str(&format!(
                    "| v{} | {} | {} | {} |\n",
                    entry.version,
                    entry.phase,
                    entry.path,
                    entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
                ));
            }
        }

        let index_path = self.docs_dir.join("INDEX.md");
        fs::write(&index_path, out)
            .with_context(|| format!("Failed to write {}", index_path.display()))?;
        Ok(())
    }

    /// Entries of one group, version ascending.
    fn group_chain(&self, group_id: Uuid) -> Result<Vec<ArtifactEntry>> {
        let mut chain: Vec<ArtifactEntry> = self
            .list_artifacts(None)?
            .into_iter()
            .filter(|e| e.group_id == group_id)
            .collect();
        chain.sort_by_key(|e| e.version);
        Ok(chain)
    }

    fn sidecar_path(&self, id: &Uuid) -> PathBuf {
        self.docs_dir.join(SIDECAR_DIR).join(format!("{id}.json"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn manager() -> (tempfile::TempDir, ArtifactManager) {
        let dir = tempdir().unwrap();
        let mgr = ArtifactManager::new(dir.path());
        (dir, mgr)
    }

    #[test]
    fn test_store_text_writes_payload_and_sidecar() {
        let (dir, mgr) = manager();
        let entry = mgr
            .create_and_store_text(
                ArtifactType::MasterPlan,
                "# Plan\n\nBuild it.",
                PipelinePhase::Intake,
                None,
            )
            .unwrap();

        assert_eq!(entry.version, 1);
        assert!(entry.previous_id.is_none());
        assert!(entry.immutable);
        assert!(dir.path().join(&entry.path).exists());
        assert!(
            dir.path()
                .join(format!("docs/.artifacts/{}.json", entry.id))
                .exists()
        );
    }

    #[test]
    fn test_filename_matches_contract() {
        let (_dir, mgr) = manager();
        let entry = mgr
            .create_and_store_json(
                ArtifactType::RepoSnapshot,
                &serde_json::json!({"files": 3}),
                PipelinePhase::Intake,
                None,
            )
            .unwrap();

        let name = entry.path.rsplit('/').next().unwrap();
        let re =
            regex::Regex::new(r"^[a-z_]+_[a-f0-9]{8}_v\d+_\d{4}-\d{2}-\d{2}\.(md|json)$").unwrap();
        assert!(re.is_match(name), "bad filename: {name}");
        assert!(name.starts_with("repo_snapshot_"));
    }

    #[test]
    fn test_group_chain_versions_are_gapless() {
        let (_dir, mgr) = manager();
        let v1 = mgr
            .create_and_store_text(ArtifactType::MasterPlan, "v1", PipelinePhase::Intake, None)
            .unwrap();
        let v2 = mgr
            .create_and_store_text(
                ArtifactType::MasterPlan,
                "v2",
                PipelinePhase::Intake,
                Some(v1.group_id),
            )
            .unwrap();
        let v3 = mgr
            .create_and_store_text(
                ArtifactType::MasterPlan,
                "v3",
                PipelinePhase::Intake,
                Some(v1.group_id),
            )
            .unwrap();

        assert_eq!((v1.version, v2.version, v3.version), (1, 2, 3));
        assert_eq!(v2.previous_id, Some(v1.id));
        assert_eq!(v3.previous_id, Some(v2.id));
        assert_eq!(v3.group_id, v1.group_id);
        // Replacement is additive: all three remain listed
        assert_eq!(
            mgr.list_artifacts(Some(ArtifactType::MasterPlan))
                .unwrap()
                .len(),
            3
        );
    }

    #[test]
    fn test_sha256_matches_payload_bytes() {
        let (dir, mgr) = manager();
        let entry = mgr
            .create_and_store_text(ArtifactType::Architecture, "design", PipelinePhase::Architecture, None)
            .unwrap();
        let bytes = fs::read(dir.path().join(&entry.path)).unwrap();
        assert_eq!(sha256_hex(&bytes), entry.sha256);
        assert!(mgr.verify_artifact(&entry).unwrap());
    }

    #[test]
    fn test_verify_detects_tamper_and_missing_file() {
        let (dir, mgr) = manager();
        let entry = mgr
            .create_and_store_text(ArtifactType::Deployment, "steps", PipelinePhase::Done, None)
            .unwrap();

        fs::write(dir.path().join(&entry.path), "tampered").unwrap();
        assert!(!mgr.verify_artifact(&entry).unwrap());

        fs::remove_file(dir.path().join(&entry.path)).unwrap();
        assert!(!mgr.verify_artifact(&entry).unwrap());
    }

    #[test]
    fn test_list_is_timestamp_ascending_and_filtered() {
        let (_dir, mgr) = manager();
        mgr.create_and_store_text(ArtifactType::MasterPlan, "a", PipelinePhase::Intake, None)
            .unwrap();
        mgr.create_and_store_text(ArtifactType::Rollback, "b", PipelinePhase::Done, None)
            .unwrap();
        mgr.create_and_store_text(ArtifactType::MasterPlan, "c", PipelinePhase::Intake, None)
            .unwrap();

        let all = mgr.list_artifacts(None).unwrap();
        assert_eq!(all.len(), 3);
        assert!(all.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));

        let plans = mgr.list_artifacts(Some(ArtifactType::MasterPlan)).unwrap();
        assert_eq!(plans.len(), 2);
    }

    #[test]
    fn test_malformed_sidecar_is_skipped() {
        let (dir, mgr) = manager();
        mgr.create_and_store_text(ArtifactType::MasterPlan, "ok", PipelinePhase::Intake, None)
            .unwrap();
        fs::write(
            dir.path().join("docs/.artifacts/broken.json"),
            "{ not json",
        )
        .unwrap();

        assert_eq!(mgr.list_artifacts(None).unwrap().len(), 1);
    }

    #[test]
    fn test_orphan_payload_is_ignored() {
        let (dir, mgr) = manager();
        mgr.ensure_docs_structure().unwrap();
        // Payload without sidecar, as left by a crash between the two writes
        fs::write(
            dir.path()
                .join("docs/master-plan/master_plan_deadbeef_v1_2026-08-01.md"),
            "orphan",
        )
        .unwrap();
        assert!(mgr.list_artifacts(None).unwrap().is_empty());
    }

    #[test]
    fn test_get_latest_artifact() {
        let (_dir, mgr) = manager();
        assert!(
            mgr.get_latest_artifact(ArtifactType::MasterPlan)
                .unwrap()
                .is_none()
        );
        mgr.create_and_store_text(ArtifactType::MasterPlan, "old", PipelinePhase::Intake, None)
            .unwrap();
        let newer = mgr
            .create_and_store_text(ArtifactType::MasterPlan, "new", PipelinePhase::Intake, None)
            .unwrap();
        let latest = mgr
            .get_latest_artifact(ArtifactType::MasterPlan)
            .unwrap()
            .unwrap();
        assert_eq!(latest.id, newer.id);
    }

    #[test]
    fn test_update_index_groups_by_type() {
        let (dir, mgr) = manager();
        let a = mgr
            .create_and_store_text(ArtifactType::MasterPlan, "p", PipelinePhase::Intake, None)
            .unwrap();
        let b = mgr
            .create_and_store_text(ArtifactType::ReleaseNotes, "r", PipelinePhase::Done, None)
            .unwrap();
        mgr.update_index(&[a, b]).unwrap();

        let index = fs::read_to_string(dir.path().join("docs/INDEX.md")).unwrap();
        assert!(index.contains("## master_plan"));
        assert!(index.contains("## release_notes"));
        assert!(index.contains("docs/master-plan/"));
    }
}
