//! End-to-end pipeline scenarios against a temp project with scripted
//! providers and executors. No network, no real reasoning CLI.

use anyhow::Result;
use async_trait::async_trait;
use popeye::artifact::{ArtifactManager, ArtifactType, ContentType};
use popeye::config::PopeyeConfig;
use popeye::consensus::{ConsensusRunner, ConsensusPacket, ReviewerSpec};
use popeye::phase::PipelinePhase;
use popeye::pipeline::{Orchestrator, PipelineState};
use popeye::provider::{
    ProjectExecutor, ProviderKey, ReasoningProvider, ScriptedExecutor, ScriptedProvider,
};
use popeye::snapshot::CommandOverrides;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

/// Planner stub: returns findings JSON to auditor prompts, markdown to
/// everything else.
struct StubPlanner {
    audit_findings: String,
}

impl StubPlanner {
    fn clean() -> Self {
        Self {
            audit_findings: r#"{"findings": []}"#.to_string(),
        }
    }
}

#[async_trait]
impl ReasoningProvider for StubPlanner {
    fn key(&self) -> ProviderKey {
        ProviderKey::new("stub", "planner")
    }

    async fn complete(&self, prompt: &str) -> Result<String> {
        if prompt.contains("\"findings\"") {
            Ok(self.audit_findings.clone())
        } else {
            Ok("# Generated Document\n\nDeterministic stub content.".to_string())
        }
    }
}

fn approve_json() -> String {
    r#"{"vote": "APPROVE", "confidence": 1.0, "blocking_issues": [], "suggestions": []}"#
        .to_string()
}

fn reviewer(
    id: &str,
    response: &str,
) -> (ReviewerSpec, Arc<dyn ReasoningProvider>) {
    (
        ReviewerSpec {
            reviewer_id: id.to_string(),
            temperature: 0.2,
            system_prompt: None,
        },
        Arc::new(ScriptedProvider::constant(
            ProviderKey::new("stub", "reviewer"),
            response,
        )),
    )
}

fn approving_runner() -> ConsensusRunner {
    ConsensusRunner::new(vec![
        reviewer("r1", &approve_json()),
        reviewer("r2", &approve_json()),
    ])
}

fn test_config(test_command: &str) -> PopeyeConfig {
    let mut config = PopeyeConfig::default();
    config.checks.overrides = CommandOverrides {
        build: Some("exit 0".to_string()),
        test: Some(test_command.to_string()),
        lint: Some("exit 0".to_string()),
        typecheck: Some("exit 0".to_string()),
        migration: None,
        start: None,
    };
    config
}

fn seed_project() -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("src")).unwrap();
    std::fs::write(dir.path().join("src/main.py"), "x = 1\n").unwrap();
    dir
}

fn orchestrator(
    dir: &TempDir,
    config: PopeyeConfig,
    consensus: ConsensusRunner,
    executor: Arc<dyn ProjectExecutor>,
) -> Orchestrator {
    Orchestrator::new(
        dir.path().to_path_buf(),
        config,
        consensus,
        Arc::new(StubPlanner::clean()),
        executor,
    )
    .unwrap()
}

#[tokio::test]
async fn happy_path_reaches_done_with_release_set() {
    let dir = seed_project();
    let result = orchestrator(
        &dir,
        test_config("exit 0"),
        approving_runner(),
        Arc::new(ScriptedExecutor::noop()),
    )
    .run()
    .await
    .unwrap();

    assert!(result.success, "error: {:?}", result.error);
    assert_eq!(result.final_phase, PipelinePhase::Done);
    assert_eq!(result.recovery_iterations, 0);
    assert!(result.error.is_none());

    for ty in [
        ArtifactType::MasterPlan,
        ArtifactType::Constitution,
        ArtifactType::RepoSnapshot,
        ArtifactType::Architecture,
        ArtifactType::RolePlan,
        ArtifactType::Consensus,
        ArtifactType::QaValidation,
        ArtifactType::ReviewDecision,
        ArtifactType::AuditReport,
        ArtifactType::ProductionReadiness,
        ArtifactType::ReleaseNotes,
        ArtifactType::Deployment,
        ArtifactType::Rollback,
    ] {
        assert!(
            result.artifacts.iter().any(|a| a.artifact_type == ty),
            "missing artifact type {ty}"
        );
    }

    // Persisted state reflects the terminal phase
    let state = PipelineState::load(dir.path()).unwrap();
    assert_eq!(state.pipeline_phase, PipelinePhase::Done);
    assert!(dir.path().join("docs/INDEX.md").exists());
}

#[tokio::test]
async fn every_stored_artifact_rehashes_clean() {
    let dir = seed_project();
    let result = orchestrator(
        &dir,
        test_config("exit 0"),
        approving_runner(),
        Arc::new(ScriptedExecutor::noop()),
    )
    .run()
    .await
    .unwrap();
    assert!(result.success);

    let manager = ArtifactManager::new(dir.path());
    let entries = manager.list_artifacts(None).unwrap();
    assert!(!entries.is_empty());
    for entry in &entries {
        assert!(
            manager.verify_artifact(entry).unwrap(),
            "integrity drift in {}",
            entry.path
        );
    }
}

#[tokio::test]
async fn qa_failure_recovers_once_then_completes() {
    let dir = seed_project();
    // Each implementing role appends one line; three roles run per
    // implementation pass. The test command needs four lines, so QA fails
    // on the first pass and succeeds after one rewind.
    let executor = ScriptedExecutor::new(|project_dir: &Path| {
        use std::io::Write;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(project_dir.join("impl.log"))?;
        writeln!(file, "worked")?;
        Ok(())
    });

    let result = orchestrator(
        &dir,
        test_config("test \"$(wc -l < impl.log)\" -ge 4"),
        approving_runner(),
        Arc::new(executor),
    )
    .run()
    .await
    .unwrap();

    assert!(result.success, "error: {:?}", result.error);
    assert_eq!(result.final_phase, PipelinePhase::Done);
    assert_eq!(result.recovery_iterations, 1);

    // The recovery pass left an RCA pointing back at implementation
    let rca = result
        .artifacts
        .iter()
        .find(|a| a.artifact_type == ArtifactType::RcaReport && a.content_type == ContentType::Json)
        .expect("rca recorded");
    let payload = std::fs::read_to_string(dir.path().join(&rca.path)).unwrap();
    assert!(payload.contains("\"IMPLEMENTATION\""));
}

#[tokio::test]
async fn persistent_qa_failure_exhausts_budget_into_stuck() {
    let dir = seed_project();
    let result = orchestrator(
        &dir,
        test_config("exit 1"),
        approving_runner(),
        Arc::new(ScriptedExecutor::noop()),
    )
    .run()
    .await
    .unwrap();

    assert!(!result.success);
    assert_eq!(result.final_phase, PipelinePhase::Stuck);
    assert_eq!(result.recovery_iterations, 5);
    assert!(result.error.is_some());
    assert!(
        result
            .artifacts
            .iter()
            .any(|a| a.artifact_type == ArtifactType::StuckReport)
    );

    let state = PipelineState::load(dir.path()).unwrap();
    assert_eq!(state.pipeline_phase, PipelinePhase::Stuck);
}

#[tokio::test]
async fn config_drift_routes_review_through_qa_revalidation() {
    let dir = seed_project();
    // Implementation introduces a new config file; REVIEW diffs against
    // the snapshot pinned at the role-plan consensus and must flag it
    let executor = ScriptedExecutor::new(|project_dir: &Path| {
        std::fs::write(project_dir.join("package.json"), "{}\n")?;
        Ok(())
    });

    let result = orchestrator(
        &dir,
        test_config("exit 0"),
        approving_runner(),
        Arc::new(executor),
    )
    .run()
    .await
    .unwrap();

    assert!(result.success, "error: {:?}", result.error);

    let state = PipelineState::load(dir.path()).unwrap();
    let config_cr = state
        .pending_change_requests
        .iter()
        .find(|cr| cr.change_type == popeye::packets::ChangeType::Config)
        .expect("config change request raised");
    assert_eq!(config_cr.target_phase, PipelinePhase::QaValidation);
    assert_eq!(config_cr.status, popeye::packets::CrStatus::Approved);

    assert!(
        result
            .artifacts
            .iter()
            .any(|a| a.artifact_type == ArtifactType::ChangeRequest)
    );
    // QA ran at least twice: the linear pass plus the CR-routed revalidation
    let qa_runs = result
        .artifacts
        .iter()
        .filter(|a| a.artifact_type == ArtifactType::QaValidation)
        .count();
    assert!(qa_runs >= 2, "expected revalidation, saw {qa_runs} QA run(s)");
}

#[tokio::test]
async fn constitution_tamper_blocks_every_gate_until_stuck() {
    let dir = seed_project();
    // The executor tampers with the pinned constitution mid-pipeline
    let executor = ScriptedExecutor::new(|project_dir: &Path| {
        std::fs::write(
            project_dir.join("skills/POPEYE_CONSTITUTION.md"),
            "amended in flight",
        )?;
        Ok(())
    });

    let result = orchestrator(
        &dir,
        test_config("exit 0"),
        approving_runner(),
        Arc::new(executor),
    )
    .run()
    .await
    .unwrap();

    assert!(!result.success);
    assert_eq!(result.final_phase, PipelinePhase::Stuck);

    let state = PipelineState::load(dir.path()).unwrap();
    let blocked = state
        .gate_results
        .values()
        .filter(|r| r.blockers.iter().any(|b| b.contains("modified")))
        .count();
    assert!(blocked >= 1, "no gate recorded the tamper blocker");
}

#[tokio::test]
async fn blocking_issue_vetoes_consensus_despite_unanimous_approval() {
    let dir = seed_project();
    let veto = r#"{"vote": "APPROVE", "confidence": 1.0, "blocking_issues": ["credentials committed"], "suggestions": []}"#;
    let consensus = ConsensusRunner::new(vec![
        reviewer("r1", &approve_json()),
        reviewer("r2", &approve_json()),
        reviewer("r3", veto),
    ]);

    let result = orchestrator(
        &dir,
        test_config("exit 0"),
        consensus,
        Arc::new(ScriptedExecutor::noop()),
    )
    .run()
    .await
    .unwrap();

    // The master-plan consensus can never clear its gate; the pipeline
    // burns the recovery budget and sticks
    assert!(!result.success);
    assert_eq!(result.final_phase, PipelinePhase::Stuck);

    let manager = ArtifactManager::new(dir.path());
    let entry = manager
        .get_latest_artifact(ArtifactType::Consensus)
        .unwrap()
        .expect("consensus packet stored");
    let packet: ConsensusPacket =
        serde_json::from_str(&std::fs::read_to_string(dir.path().join(&entry.path)).unwrap())
            .unwrap();
    assert_eq!(packet.result.score, 1.0);
    assert_eq!(packet.result.weighted_score, 0.0);
    // The stored record itself must carry the veto, not just the gate
    assert!(!packet.result.approved);
    assert_eq!(
        packet.final_status,
        popeye::consensus::ConsensusStatus::Rejected
    );
}

#[tokio::test]
async fn consensus_scores_survive_gate_merge() {
    let dir = seed_project();
    let result = orchestrator(
        &dir,
        test_config("exit 0"),
        approving_runner(),
        Arc::new(ScriptedExecutor::noop()),
    )
    .run()
    .await
    .unwrap();
    assert!(result.success);

    let state = PipelineState::load(dir.path()).unwrap();
    for phase in [
        PipelinePhase::ConsensusMasterPlan,
        PipelinePhase::ConsensusArchitecture,
        PipelinePhase::ConsensusRolePlans,
    ] {
        let gate = state.gate_results.get(&phase).expect("gate result recorded");
        assert_eq!(gate.score, Some(1.0), "{phase} lost its weighted score");
        assert_eq!(gate.consensus_score, Some(1.0), "{phase} lost its simple score");
        assert!(gate.pass);
    }
}
