//! Consensus types and pure vote aggregation.
//!
//! A consensus round fans a plan packet out to independent reviewers and
//! folds their votes into a [`ConsensusPacket`]. Scoring is deliberately
//! simple and auditable:
//!
//! - `score` — approvals over total votes
//! - `weighted_score` — confidence-weighted vote values (APPROVE 1.0,
//!   CONDITIONAL 0.5, REJECT 0.0), vetoed to zero by any blocking issue
//! - `approved` — simple score meets the threshold and the round met quorum

use crate::artifact::ArtifactRef;
use crate::phase::PipelinePhase;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

pub mod runner;

pub use runner::{ConsensusRunner, ReviewerSpec};

/// A reviewer's verdict on a plan packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VoteKind {
    Approve,
    Conditional,
    Reject,
}

impl VoteKind {
    /// The vote's contribution to the weighted score.
    pub fn weight(&self) -> f64 {
        match self {
            Self::Approve => 1.0,
            Self::Conditional => 0.5,
            Self::Reject => 0.0,
        }
    }
}

impl fmt::Display for VoteKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Approve => "APPROVE",
            Self::Conditional => "CONDITIONAL",
            Self::Reject => "REJECT",
        };
        write!(f, "{s}")
    }
}

/// One reviewer's structured vote. Produced once per reviewer per round and
/// never modified.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewerVote {
    pub reviewer_id: String,
    pub provider: String,
    pub model: String,
    pub temperature: f32,
    /// SHA-256 of the exact prompt this reviewer saw, for reproducibility.
    pub prompt_hash: String,
    pub vote: VoteKind,
    /// Self-reported confidence in [0, 1].
    pub confidence: f64,
    #[serde(default)]
    pub blocking_issues: Vec<String>,
    #[serde(default)]
    pub suggestions: Vec<String>,
    #[serde(default)]
    pub evidence_refs: Vec<String>,
}

/// The thresholds a round is judged against.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConsensusRules {
    pub threshold: f64,
    pub quorum: usize,
    pub min_reviewers: usize,
}

/// Aggregated outcome of a round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsensusResult {
    pub approved: bool,
    pub score: f64,
    pub weighted_score: f64,
    pub participating_reviewers: usize,
}

/// Arbitrator output, when a round was escalated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArbitratorResult {
    pub provider: String,
    pub model: String,
    pub verdict: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConsensusStatus {
    Approved,
    Rejected,
    Arbitrated,
}

/// The stored record of one consensus round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsensusPacket {
    pub packet_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub phase: PipelinePhase,
    pub plan: ArtifactRef,
    pub votes: Vec<ReviewerVote>,
    pub rules: ConsensusRules,
    pub result: ConsensusResult,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arbitrator_result: Option<ArbitratorResult>,
    pub final_status: ConsensusStatus,
}

/// Fold votes into a consensus packet. Pure; the runner and tests share it.
pub fn build_consensus_packet(
    phase: PipelinePhase,
    plan: ArtifactRef,
    votes: Vec<ReviewerVote>,
    rules: ConsensusRules,
    arbitrator_result: Option<ArbitratorResult>,
) -> ConsensusPacket {
    let total = votes.len();
    let approvals = votes.iter().filter(|v| v.vote == VoteKind::Approve).count();
    let score = if total == 0 {
        0.0
    } else {
        approvals as f64 / total as f64
    };

    let confidence_sum: f64 = votes.iter().map(|v| v.confidence).sum();
    let any_blocking = votes.iter().any(|v| !v.blocking_issues.is_empty());
    let weighted_score = if any_blocking || confidence_sum == 0.0 {
        // A single blocking issue vetoes the round outright
        0.0
    } else {
        votes
            .iter()
            .map(|v| v.vote.weight() * v.confidence)
            .sum::<f64>()
            / confidence_sum
    };

    // The veto applies to approval as well: a unanimous round with one
    // blocking issue is rejected, not approved
    let approved = !any_blocking && score >= rules.threshold && total >= rules.quorum;

    let final_status = if arbitrator_result.is_some() {
        ConsensusStatus::Arbitrated
    } else if approved {
        ConsensusStatus::Approved
    } else {
        ConsensusStatus::Rejected
    };

    ConsensusPacket {
        packet_id: Uuid::new_v4(),
        timestamp: Utc::now(),
        phase,
        plan,
        votes,
        rules,
        result: ConsensusResult {
            approved,
            score,
            weighted_score,
            participating_reviewers: total,
        },
        arbitrator_result,
        final_status,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::ArtifactType;

    fn plan_ref() -> ArtifactRef {
        ArtifactRef {
            artifact_id: Uuid::new_v4(),
            path: "docs/master-plan/x.md".to_string(),
            sha256: "0".repeat(64),
            version: 1,
            artifact_type: ArtifactType::MasterPlan,
        }
    }

    fn vote(id: &str, kind: VoteKind, confidence: f64, blocking: &[&str]) -> ReviewerVote {
        ReviewerVote {
            reviewer_id: id.to_string(),
            provider: "test".to_string(),
            model: "model-1".to_string(),
            temperature: 0.2,
            prompt_hash: "hash".to_string(),
            vote: kind,
            confidence,
            blocking_issues: blocking.iter().map(|s| s.to_string()).collect(),
            suggestions: vec![],
            evidence_refs: vec![],
        }
    }

    fn rules() -> ConsensusRules {
        ConsensusRules {
            threshold: 0.95,
            quorum: 2,
            min_reviewers: 2,
        }
    }

    #[test]
    fn test_unanimous_approval() {
        let packet = build_consensus_packet(
            PipelinePhase::ConsensusMasterPlan,
            plan_ref(),
            vec![
                vote("r1", VoteKind::Approve, 1.0, &[]),
                vote("r2", VoteKind::Approve, 1.0, &[]),
            ],
            rules(),
            None,
        );
        assert_eq!(packet.final_status, ConsensusStatus::Approved);
        assert_eq!(packet.result.score, 1.0);
        assert_eq!(packet.result.weighted_score, 1.0);
        assert!(packet.result.approved);
        assert_eq!(packet.result.participating_reviewers, 2);
    }

    #[test]
    fn test_split_vote_rejects() {
        let packet = build_consensus_packet(
            PipelinePhase::ConsensusMasterPlan,
            plan_ref(),
            vec![
                vote("r1", VoteKind::Approve, 1.0, &[]),
                vote("r2", VoteKind::Reject, 1.0, &[]),
            ],
            rules(),
            None,
        );
        assert_eq!(packet.result.score, 0.5);
        assert_eq!(packet.final_status, ConsensusStatus::Rejected);
        assert!(!packet.result.approved);
    }

    #[test]
    fn test_arbitrated_overrides_status() {
        let packet = build_consensus_packet(
            PipelinePhase::ConsensusArchitecture,
            plan_ref(),
            vec![
                vote("r1", VoteKind::Approve, 1.0, &[]),
                vote("r2", VoteKind::Reject, 1.0, &[]),
            ],
            rules(),
            Some(ArbitratorResult {
                provider: "test".to_string(),
                model: "arbiter".to_string(),
                verdict: "proceed with caution".to_string(),
                timestamp: Utc::now(),
            }),
        );
        assert_eq!(packet.final_status, ConsensusStatus::Arbitrated);
    }

    #[test]
    fn test_blocking_issue_vetoes_weighted_score_and_approval() {
        // Three confident approvals, one of which carries a blocking issue
        let packet = build_consensus_packet(
            PipelinePhase::ConsensusRolePlans,
            plan_ref(),
            vec![
                vote("r1", VoteKind::Approve, 1.0, &[]),
                vote("r2", VoteKind::Approve, 1.0, &["secret committed to repo"]),
                vote("r3", VoteKind::Approve, 1.0, &[]),
            ],
            rules(),
            None,
        );
        assert_eq!(packet.result.score, 1.0);
        assert_eq!(packet.result.weighted_score, 0.0);
        // The simple score clears the threshold; the veto still rejects
        assert!(!packet.result.approved);
        assert_eq!(packet.final_status, ConsensusStatus::Rejected);
    }

    #[test]
    fn test_conditional_votes_weigh_half() {
        let packet = build_consensus_packet(
            PipelinePhase::ConsensusMasterPlan,
            plan_ref(),
            vec![
                vote("r1", VoteKind::Approve, 1.0, &[]),
                vote("r2", VoteKind::Conditional, 1.0, &[]),
            ],
            rules(),
            None,
        );
        assert_eq!(packet.result.weighted_score, 0.75);
        assert_eq!(packet.result.score, 0.5);
    }

    #[test]
    fn test_confidence_weighting() {
        // A hesitant approval drags the weighted score toward the confident
        // conditional
        let packet = build_consensus_packet(
            PipelinePhase::ConsensusMasterPlan,
            plan_ref(),
            vec![
                vote("r1", VoteKind::Approve, 0.2, &[]),
                vote("r2", VoteKind::Conditional, 0.8, &[]),
            ],
            rules(),
            None,
        );
        let expected = (1.0 * 0.2 + 0.5 * 0.8) / 1.0;
        assert!((packet.result.weighted_score - expected).abs() < 1e-9);
    }

    #[test]
    fn test_below_quorum_rejects_even_unanimous() {
        let packet = build_consensus_packet(
            PipelinePhase::ConsensusMasterPlan,
            plan_ref(),
            vec![vote("r1", VoteKind::Approve, 1.0, &[])],
            rules(),
            None,
        );
        assert_eq!(packet.result.score, 1.0);
        assert!(!packet.result.approved);
        assert_eq!(packet.final_status, ConsensusStatus::Rejected);
    }

    #[test]
    fn test_empty_round_scores_zero() {
        let packet = build_consensus_packet(
            PipelinePhase::ConsensusMasterPlan,
            plan_ref(),
            vec![],
            rules(),
            None,
        );
        assert_eq!(packet.result.score, 0.0);
        assert_eq!(packet.result.weighted_score, 0.0);
        assert!(!packet.result.approved);
    }

    #[test]
    fn test_vote_kind_serde_tags() {
        assert_eq!(serde_json::to_string(&VoteKind::Approve).unwrap(), "\"APPROVE\"");
        let parsed: VoteKind = serde_json::from_str("\"CONDITIONAL\"").unwrap();
        assert_eq!(parsed, VoteKind::Conditional);
    }
}
