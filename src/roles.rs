//! Role definitions and built-in skill defaults.
//!
//! Roles form a closed set of 16 names. Each role carries a built-in
//! [`SkillDefinition`] (system prompt, required outputs, constraints, role
//! dependencies) that a project may override file-by-file through the skill
//! loader.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A pipeline role. The set is closed; project overrides can change what a
/// role says, never which roles exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Dispatcher,
    Architect,
    DbExpert,
    BackendProgrammer,
    FrontendProgrammer,
    WebsiteProgrammer,
    QaTester,
    Reviewer,
    Arbitrator,
    Debugger,
    Auditor,
    Journalist,
    ReleaseManager,
    MarketingExpert,
    SocialExpert,
    UiUxSpecialist,
}

impl Role {
    /// All sixteen roles, in declaration order.
    pub fn all() -> [Role; 16] {
        [
            Role::Dispatcher,
            Role::Architect,
            Role::DbExpert,
            Role::BackendProgrammer,
            Role::FrontendProgrammer,
            Role::WebsiteProgrammer,
            Role::QaTester,
            Role::Reviewer,
            Role::Arbitrator,
            Role::Debugger,
            Role::Auditor,
            Role::Journalist,
            Role::ReleaseManager,
            Role::MarketingExpert,
            Role::SocialExpert,
            Role::UiUxSpecialist,
        ]
    }

    /// The canonical tag, matching the override filename `skills/{ROLE}.md`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Dispatcher => "DISPATCHER",
            Role::Architect => "ARCHITECT",
            Role::DbExpert => "DB_EXPERT",
            Role::BackendProgrammer => "BACKEND_PROGRAMMER",
            Role::FrontendProgrammer => "FRONTEND_PROGRAMMER",
            Role::WebsiteProgrammer => "WEBSITE_PROGRAMMER",
            Role::QaTester => "QA_TESTER",
            Role::Reviewer => "REVIEWER",
            Role::Arbitrator => "ARBITRATOR",
            Role::Debugger => "DEBUGGER",
            Role::Auditor => "AUDITOR",
            Role::Journalist => "JOURNALIST",
            Role::ReleaseManager => "RELEASE_MANAGER",
            Role::MarketingExpert => "MARKETING_EXPERT",
            Role::SocialExpert => "SOCIAL_EXPERT",
            Role::UiUxSpecialist => "UI_UX_SPECIALIST",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A role's working instructions: the merge of a built-in default and an
/// optional project override.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkillDefinition {
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    pub system_prompt: String,
    #[serde(default)]
    pub required_outputs: Vec<String>,
    #[serde(default)]
    pub constraints: Vec<String>,
    #[serde(default)]
    pub depends_on: Vec<Role>,
}

impl SkillDefinition {
    /// The built-in default for a role. Projects override these through
    /// `skills/{ROLE}.md`; the override wins field-by-field.
    pub fn builtin(role: Role) -> Self {
        let (system_prompt, required_outputs, constraints, depends_on): (
            &str,
            &[&str],
            &[&str],
            &[Role],
        ) = match role {
            Role::Dispatcher => (
                "You translate a raw project idea into a master plan: goals, scope, \
                 deliverables, and sequencing. Be concrete about what ships and what does not.",
                &["master_plan"],
                &["Do not design implementation detail; stay at plan level."],
                &[],
            ),
            Role::Architect => (
                "You produce the system architecture for the approved master plan: \
                 components, data flow, storage, and integration boundaries.",
                &["architecture"],
                &["Cite the master plan sections each decision serves."],
                &[Role::Dispatcher],
            ),
            Role::DbExpert => (
                "You own schema design, migrations, and query access patterns.",
                &["role_plan"],
                &["Schema changes go through migrations; never edit applied migrations."],
                &[Role::Architect],
            ),
            Role::BackendProgrammer => (
                "You implement server-side services and APIs per the architecture.",
                &["role_plan"],
                &["Work only under backend source paths.", "Do not touch frontend assets."],
                &[Role::Architect, Role::DbExpert],
            ),
            Role::FrontendProgrammer => (
                "You implement the client application per the architecture.",
                &["role_plan"],
                &["Work only under frontend source paths."],
                &[Role::Architect],
            ),
            Role::WebsiteProgrammer => (
                "You implement public-facing site pages and content plumbing.",
                &["role_plan"],
                &["Work only under website source paths."],
                &[Role::Architect],
            ),
            Role::QaTester => (
                "You validate the implementation: run the test suite, probe edge cases, \
                 and report every failure with reproduction steps.",
                &["qa_validation"],
                &["Never modify production code; file findings instead."],
                &[Role::BackendProgrammer, Role::FrontendProgrammer],
            ),
            Role::Reviewer => (
                "You review a submitted plan packet and return a structured vote: \
                 APPROVE, CONDITIONAL, or REJECT with confidence and blocking issues.",
                &["review_decision"],
                &["Vote independently; you never see other reviewers' output."],
                &[],
            ),
            Role::Arbitrator => (
                "You resolve a split or failed consensus round. You see every vote and \
                 return a single binding verdict with rationale.",
                &["arbitration"],
                &[],
                &[Role::Reviewer],
            ),
            Role::Debugger => (
                "You perform root-cause analysis on a failed phase: symptoms, root cause, \
                 responsible layer, corrective actions, and the phase to rewind to.",
                &["rca_report"],
                &["Diagnose first; never patch code during analysis."],
                &[],
            ),
            Role::Auditor => (
                "You audit the project for architectural, security, and quality findings, \
                 each classified by severity P0..P3 and whether it blocks release.",
                &["audit_report"],
                &["Report findings as structured JSON; do not fix them."],
                &[],
            ),
            Role::Journalist => (
                "You keep the project journal: readable traces of what each phase did and why.",
                &["journalist_trace"],
                &[],
                &[],
            ),
            Role::ReleaseManager => (
                "You produce release notes, the deployment runbook, and the rollback plan.",
                &["release_notes", "deployment", "rollback"],
                &["Every deployment step needs a matching rollback step."],
                &[Role::QaTester, Role::Auditor],
            ),
            Role::MarketingExpert => (
                "You draft positioning and launch messaging for the release.",
                &["additional_context"],
                &[],
                &[Role::ReleaseManager],
            ),
            Role::SocialExpert => (
                "You draft social announcement copy for the release.",
                &["additional_context"],
                &[],
                &[Role::MarketingExpert],
            ),
            Role::UiUxSpecialist => (
                "You review flows and interface copy for usability and consistency.",
                &["review_decision"],
                &[],
                &[Role::FrontendProgrammer],
            ),
        };

        SkillDefinition {
            role,
            version: None,
            system_prompt: system_prompt.to_string(),
            required_outputs: required_outputs.iter().map(|s| s.to_string()).collect(),
            constraints: constraints.iter().map(|s| s.to_string()).collect(),
            depends_on: depends_on.to_vec(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_covers_sixteen_roles() {
        let roles = Role::all();
        assert_eq!(roles.len(), 16);
        let mut tags: Vec<_> = roles.iter().map(|r| r.as_str()).collect();
        tags.dedup();
        assert_eq!(tags.len(), 16);
    }

    #[test]
    fn test_serde_tag_matches_as_str() {
        for role in Role::all() {
            let json = serde_json::to_string(&role).unwrap();
            assert_eq!(json, format!("\"{}\"", role.as_str()));
        }
    }

    #[test]
    fn test_every_role_has_builtin_skill() {
        for role in Role::all() {
            let skill = SkillDefinition::builtin(role);
            assert_eq!(skill.role, role);
            assert!(!skill.system_prompt.is_empty());
        }
    }

    #[test]
    fn test_builtin_dependencies_stay_in_closed_set() {
        for role in Role::all() {
            for dep in SkillDefinition::builtin(role).depends_on {
                assert!(Role::all().contains(&dep));
            }
        }
    }

    #[test]
    fn test_release_manager_outputs() {
        let skill = SkillDefinition::builtin(Role::ReleaseManager);
        assert_eq!(
            skill.required_outputs,
            vec!["release_notes", "deployment", "rollback"]
        );
    }
}
