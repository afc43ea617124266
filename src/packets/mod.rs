//! Pure packet builders: plan packets, RCA packets, change requests, and
//! audit reports. Nothing here touches the filesystem; handlers persist the
//! built records through the artifact manager.

pub mod audit_report;
pub mod change_request;
pub mod plan;
pub mod rca;

pub use audit_report::{AuditFinding, AuditReport, AuditStatus, FindingSeverity, build_audit_report};
pub use change_request::{
    ChangeRequest, ChangeType, CrStatus, ImpactAnalysis, PendingChangeRequest, RiskLevel,
    route_change_request,
};
pub use plan::{PlanPacket, PlanReferences};
pub use rca::{RcaPacket, rewind_target};
