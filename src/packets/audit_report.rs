//! Audit report construction.
//!
//! Findings arrive from the auditor as structured JSON; the builder folds
//! them into an overall verdict, a bounded risk score, and a recovery flag.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Finding severity, most critical first. The numeric weight feeds the
/// system risk score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum FindingSeverity {
    P0,
    P1,
    P2,
    P3,
}

impl FindingSeverity {
    pub fn weight(&self) -> u32 {
        match self {
            Self::P0 => 40,
            Self::P1 => 20,
            Self::P2 => 8,
            Self::P3 => 2,
        }
    }
}

impl fmt::Display for FindingSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::P0 => "P0",
            Self::P1 => "P1",
            Self::P2 => "P2",
            Self::P3 => "P3",
        };
        write!(f, "{s}")
    }
}

/// One auditor finding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditFinding {
    pub severity: FindingSeverity,
    pub category: String,
    pub description: String,
    #[serde(default)]
    pub blocking: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AuditStatus {
    Pass,
    Fail,
}

/// The aggregated audit verdict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditReport {
    pub report_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub overall_status: AuditStatus,
    /// min(100, sum of severity weights) across all findings.
    pub system_risk_score: u32,
    /// True when any blocking finding has severity P0 or P1.
    pub recovery_required: bool,
    #[serde(default)]
    pub findings: Vec<AuditFinding>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot_id: Option<Uuid>,
}

impl AuditReport {
    pub fn to_markdown(&self) -> String {
        let mut out = format!(
            "# Audit Report\n\n\
             **Status:** {:?}\n\n\
             **System risk score:** {}/100\n\n\
             **Recovery required:** {}\n",
            self.overall_status, self.system_risk_score, self.recovery_required,
        );
        if self.findings.is_empty() {
            out.push_str("\nNo findings.\n");
        } else {
            out.push_str("\n## Findings\n\n");
            out.push_str("| Severity | Category | Blocking | Description |\n");
            out.push_str("|---|---|---|---|\n");
            for finding in &self.findings {
                out.push_str(&format!(
                    "| {} | {} | {} | {} |\n",
                    finding.severity, finding.category, finding.blocking, finding.description,
                ));
            }
        }
        out
    }
}

/// Fold findings into a report.
pub fn build_audit_report(findings: Vec<AuditFinding>, snapshot_id: Option<Uuid>) -> AuditReport {
    let any_blocking = findings.iter().any(|f| f.blocking);
    let risk: u32 = findings.iter().map(|f| f.severity.weight()).sum();
    let recovery_required = findings
        .iter()
        .any(|f| f.blocking && matches!(f.severity, FindingSeverity::P0 | FindingSeverity::P1));

    AuditReport {
        report_id: Uuid::new_v4(),
        timestamp: Utc::now(),
        overall_status: if any_blocking {
            AuditStatus::Fail
        } else {
            AuditStatus::Pass
        },
        system_risk_score: risk.min(100),
        recovery_required,
        findings,
        snapshot_id,
    }
}
