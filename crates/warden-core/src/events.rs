use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::types::{AuditLevel, IntentStatus};

/// Every event name that can appear in the audit ledger.
///
/// The serialized form is the upper-case name stored in the `action` column
/// and shown to operators.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    // =========================================================================
    // Intent lifecycle
    // =========================================================================
    IntentCreated,
    IntentClaimed,
    PolicyDecision,
    ExecutionBlocked,
    AwaitingHumanApproval,
    IntentRequeued,
    WorkflowNotFound,
    Executed,
    Failed,

    // =========================================================================
    // Decision memos
    // =========================================================================
    DecisionMemoCreated,
    MemoApproved,
    MemoRejected,
    MemoApprovalBlocked,
    MemoExecuted,

    // =========================================================================
    // Tenant escalation
    // =========================================================================
    TenantHalted,
    TenantResumed,
}

impl AuditAction {
    pub const ALL: [AuditAction; 16] = [
        AuditAction::IntentCreated,
        AuditAction::IntentClaimed,
        AuditAction::PolicyDecision,
        AuditAction::ExecutionBlocked,
        AuditAction::AwaitingHumanApproval,
        AuditAction::IntentRequeued,
        AuditAction::WorkflowNotFound,
        AuditAction::Executed,
        AuditAction::Failed,
        AuditAction::DecisionMemoCreated,
        AuditAction::MemoApproved,
        AuditAction::MemoRejected,
        AuditAction::MemoApprovalBlocked,
        AuditAction::MemoExecuted,
        AuditAction::TenantHalted,
        AuditAction::TenantResumed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::IntentCreated => "INTENT_CREATED",
            AuditAction::IntentClaimed => "INTENT_CLAIMED",
            AuditAction::PolicyDecision => "POLICY_DECISION",
            AuditAction::ExecutionBlocked => "EXECUTION_BLOCKED",
            AuditAction::AwaitingHumanApproval => "AWAITING_HUMAN_APPROVAL",
            AuditAction::IntentRequeued => "INTENT_REQUEUED",
            AuditAction::WorkflowNotFound => "WORKFLOW_NOT_FOUND",
            AuditAction::Executed => "EXECUTED",
            AuditAction::Failed => "FAILED",
            AuditAction::DecisionMemoCreated => "DECISION_MEMO_CREATED",
            AuditAction::MemoApproved => "MEMO_APPROVED",
            AuditAction::MemoRejected => "MEMO_REJECTED",
            AuditAction::MemoApprovalBlocked => "MEMO_APPROVAL_BLOCKED",
            AuditAction::MemoExecuted => "MEMO_EXECUTED",
            AuditAction::TenantHalted => "TENANT_HALTED",
            AuditAction::TenantResumed => "TENANT_RESUMED",
        }
    }

    /// Level used when the caller does not override it.
    pub fn default_level(&self) -> AuditLevel {
        match self {
            AuditAction::ExecutionBlocked | AuditAction::TenantHalted => AuditLevel::Security,
            AuditAction::AwaitingHumanApproval
            | AuditAction::MemoApprovalBlocked
            | AuditAction::WorkflowNotFound => AuditLevel::Warn,
            AuditAction::Failed => AuditLevel::Error,
            _ => AuditLevel::Info,
        }
    }

    /// The event recorded when an intent enters `status`.
    pub fn for_status(status: IntentStatus) -> AuditAction {
        match status {
            IntentStatus::Draft => AuditAction::IntentRequeued,
            IntentStatus::Validating => AuditAction::IntentClaimed,
            IntentStatus::AwaitingHuman => AuditAction::AwaitingHumanApproval,
            IntentStatus::BlockedSgl => AuditAction::ExecutionBlocked,
            IntentStatus::Executed => AuditAction::Executed,
            IntentStatus::Failed => AuditAction::Failed,
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuditAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AuditAction::ALL
            .iter()
            .find(|a| a.as_str() == s)
            .copied()
            .ok_or_else(|| format!("Unknown audit action: {}", s))
    }
}
