//! Reviewer fan-out and arbitration.
//!
//! Reviewers are invoked in parallel and never see each other's output
//! within a round. A reviewer that times out, errors, or returns malformed
//! JSON contributes a synthetic REJECT vote naming the failure, so a broken
//! reviewer can never silently approve a plan.

use crate::artifact::store::sha256_hex;
use crate::consensus::{
    ArbitratorResult, ConsensusPacket, ConsensusRules, ReviewerVote, VoteKind,
    build_consensus_packet,
};
use crate::packets::PlanPacket;
use crate::provider::ReasoningProvider;
use crate::util::extract_json_object;
use anyhow::Result;
use chrono::Utc;
use futures::future::join_all;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Default per-reviewer timeout.
pub const DEFAULT_REVIEWER_TIMEOUT_SECS: u64 = 120;

/// Recovery iterations after which a round counts as stuck and is sent to
/// the arbitrator regardless of its own outcome.
pub const DEFAULT_STUCK_ITERATIONS: u32 = 2;

/// One configured reviewer seat.
#[derive(Debug, Clone)]
pub struct ReviewerSpec {
    pub reviewer_id: String,
    pub temperature: f32,
    pub system_prompt: Option<String>,
}

/// The vote fields a reviewer is asked to return.
#[derive(Debug, Deserialize)]
struct VoteBody {
    vote: VoteKind,
    confidence: f64,
    #[serde(default)]
    blocking_issues: Vec<String>,
    #[serde(default)]
    suggestions: Vec<String>,
    #[serde(default)]
    evidence_refs: Vec<String>,
}

/// Fans a plan packet out to reviewers and aggregates the votes.
pub struct ConsensusRunner {
    reviewers: Vec<(ReviewerSpec, Arc<dyn ReasoningProvider>)>,
    arbitrator: Option<Arc<dyn ReasoningProvider>>,
    timeout: Duration,
    stuck_after: u32,
}

impl ConsensusRunner {
    pub fn new(reviewers: Vec<(ReviewerSpec, Arc<dyn ReasoningProvider>)>) -> Self {
        Self {
            reviewers,
            arbitrator: None,
            timeout: Duration::from_secs(DEFAULT_REVIEWER_TIMEOUT_SECS),
            stuck_after: DEFAULT_STUCK_ITERATIONS,
        }
    }

    pub fn with_arbitrator(mut self, arbitrator: Arc<dyn ReasoningProvider>) -> Self {
        self.arbitrator = Some(arbitrator);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set how many recovery iterations a round survives before it counts
    /// as stuck and is arbitrated regardless of outcome.
    pub fn with_stuck_after(mut self, iterations: u32) -> Self {
        self.stuck_after = iterations;
        self
    }

    pub fn reviewer_count(&self) -> usize {
        self.reviewers.len()
    }

    /// Run one structured consensus round over a plan packet.
    ///
    /// The plan reference stored in the packet is the first proposed
    /// artifact; callers build packets with the artifact under review as
    /// their proposal. `iteration` is the pipeline's current recovery
    /// count: a round re-reached past the stuck bound goes to the
    /// arbitrator even when the reviewers agree.
    pub async fn run_structured_consensus(
        &self,
        plan: &PlanPacket,
        rules: ConsensusRules,
        iteration: u32,
    ) -> Result<ConsensusPacket> {
        if self.reviewers.len() < rules.min_reviewers {
            return Err(crate::errors::ConsensusError::BelowQuorum {
                got: self.reviewers.len(),
                need: rules.min_reviewers,
            }
            .into());
        }
        let plan_ref = plan
            .proposed_artifacts
            .first()
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("Plan packet proposes no artifact to review"))?;

        let futures: Vec<_> = self
            .reviewers
            .iter()
            .map(|(spec, provider)| self.collect_vote(spec, provider.clone(), plan))
            .collect();
        let votes: Vec<ReviewerVote> = join_all(futures).await;

        info!(
            phase = %plan.phase,
            votes = votes.len(),
            approvals = votes.iter().filter(|v| v.vote == VoteKind::Approve).count(),
            "consensus round collected"
        );

        // Judge the round first: arbitration runs on contested rounds, and
        // on any round the pipeline keeps coming back to
        let preliminary = build_consensus_packet(
            plan.phase,
            plan_ref.clone(),
            votes.clone(),
            rules,
            None,
        );

        let stuck = iteration >= self.stuck_after;
        if stuck {
            warn!(iteration, bound = self.stuck_after, "consensus round stuck; arbitrating");
        }
        let arbitrator_result = if !preliminary.result.approved || stuck {
            self.arbitrate(&votes).await
        } else {
            None
        };

        if arbitrator_result.is_none() {
            return Ok(preliminary);
        }
        Ok(build_consensus_packet(
            plan.phase,
            plan_ref,
            votes,
            rules,
            arbitrator_result,
        ))
    }

    /// Ask one reviewer for a vote; any failure becomes a synthetic REJECT.
    async fn collect_vote(
        &self,
        spec: &ReviewerSpec,
        provider: Arc<dyn ReasoningProvider>,
        plan: &PlanPacket,
    ) -> ReviewerVote {
        let key = provider.key();
        let prompt = build_review_prompt(spec, plan);
        let prompt_hash = sha256_hex(prompt.as_bytes());

        let completion =
            match tokio::time::timeout(self.timeout, provider.complete(&prompt)).await {
                Ok(Ok(text)) => text,
                Ok(Err(e)) => {
                    warn!(reviewer = %spec.reviewer_id, error = %e, "reviewer failed");
                    return synthetic_reject(
                        spec,
                        &key.provider,
                        &key.model,
                        &prompt_hash,
                        &format!("Reviewer call failed: {e}"),
                    );
                }
                Err(_) => {
                    warn!(reviewer = %spec.reviewer_id, "reviewer timed out");
                    return synthetic_reject(
                        spec,
                        &key.provider,
                        &key.model,
                        &prompt_hash,
                        "Reviewer timed out",
                    );
                }
            };

        let body = extract_json_object(&completion)
            .and_then(|json| serde_json::from_str::<VoteBody>(&json).ok());

        match body {
            Some(body) => ReviewerVote {
                reviewer_id: spec.reviewer_id.clone(),
                provider: key.provider,
                model: key.model,
                temperature: spec.temperature,
                prompt_hash,
                vote: body.vote,
                confidence: body.confidence.clamp(0.0, 1.0),
                blocking_issues: body.blocking_issues,
                suggestions: body.suggestions,
                evidence_refs: body.evidence_refs,
            },
            None => synthetic_reject(
                spec,
                &key.provider,
                &key.model,
                &prompt_hash,
                "Reviewer returned no parseable vote JSON",
            ),
        }
    }

    /// Run the arbitrator over the full vote set, if one is configured.
    async fn arbitrate(&self, votes: &[ReviewerVote]) -> Option<ArbitratorResult> {
        let arbitrator = self.arbitrator.as_ref()?;
        let key = arbitrator.key();
        let prompt = build_arbitration_prompt(votes);

        match tokio::time::timeout(self.timeout, arbitrator.complete(&prompt)).await {
            Ok(Ok(verdict)) => Some(ArbitratorResult {
                provider: key.provider,
                model: key.model,
                verdict: verdict.trim().to_string(),
                timestamp: Utc::now(),
            }),
            Ok(Err(e)) => {
                warn!(error = %e, "arbitrator failed; round stays rejected");
                None
            }
            Err(_) => {
                warn!("arbitrator timed out; round stays rejected");
                None
            }
        }
    }
}

fn synthetic_reject(
    spec: &ReviewerSpec,
    provider: &str,
    model: &str,
    prompt_hash: &str,
    reason: &str,
) -> ReviewerVote {
    ReviewerVote {
        reviewer_id: spec.reviewer_id.clone(),
        provider: provider.to_string(),
        model: model.to_string(),
        temperature: spec.temperature,
        prompt_hash: prompt_hash.to_string(),
        vote: VoteKind::Reject,
        confidence: 1.0,
        blocking_issues: vec![reason.to_string()],
        suggestions: vec![],
        evidence_refs: vec![],
    }
}

/// One prompt per reviewer per round; its hash rides on the vote.
fn build_review_prompt(spec: &ReviewerSpec, plan: &PlanPacket) -> String {
    let mut prompt = String::new();
    if let Some(system) = &spec.system_prompt {
        prompt.push_str(system);
        prompt.push_str("\n\n");
    }
    prompt.push_str(&format!(
        "# Plan Review\n\n\
         Phase: {}\n\
         Submitted by: {}\n\n",
        plan.phase, plan.submitted_by
    ));

    if !plan.acceptance_criteria.is_empty() {
        prompt.push_str("## Acceptance criteria\n\n");
        for criterion in &plan.acceptance_criteria {
            prompt.push_str(&format!("- {criterion}\n"));
        }
        prompt.push('\n');
    }
    if !plan.constraints.is_empty() {
        prompt.push_str("## Constraints\n\n");
        for constraint in &plan.constraints {
            prompt.push_str(&format!("- {constraint}\n"));
        }
        prompt.push('\n');
    }
    if !plan.open_questions.is_empty() {
        prompt.push_str("## Open questions\n\n");
        for question in &plan.open_questions {
            prompt.push_str(&format!("- {question}\n"));
        }
        prompt.push('\n');
    }

    prompt.push_str(
        "## Instructions\n\n\
         Review the referenced plan independently. Respond with a JSON object:\n\n\
         ```json\n\
         {\n\
           \"vote\": \"APPROVE|CONDITIONAL|REJECT\",\n\
           \"confidence\": 0.0,\n\
           \"blocking_issues\": [],\n\
           \"suggestions\": []\n\
         }\n\
         ```\n\n\
         List a blocking issue only for defects that must stop the pipeline.\n",
    );
    prompt
}

fn build_arbitration_prompt(votes: &[ReviewerVote]) -> String {
    let mut prompt = String::from(
        "# Arbitration\n\n\
         A consensus round did not approve. You see every vote; return a\n\
         single binding verdict with rationale.\n\n## Votes\n\n",
    );
    for vote in votes {
        prompt.push_str(&format!(
            "- {} ({} {}): {} confidence={:.2}",
            vote.reviewer_id, vote.provider, vote.model, vote.vote, vote.confidence
        ));
        if !vote.blocking_issues.is_empty() {
            prompt.push_str(&format!("; blocking: {}", vote.blocking_issues.join("; ")));
        }
        prompt.push('\n');
    }
    prompt
}
