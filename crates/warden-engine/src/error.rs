//! Error types for the engine.

use uuid::Uuid;
use warden_core::error::WardenError;
use warden_core::types::{Decision, IntentStatus, MemoStatus, WorkflowRef};

/// A status change the lifecycle does not allow.
#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error("Invalid intent transition: {0} -> {1}")]
    Intent(IntentStatus, IntentStatus),
    #[error("Invalid memo transition: {0} -> {1}")]
    Memo(MemoStatus, MemoStatus),
}

/// Errors from the audit ledger.
#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    #[error("Required audit write failed for tenant {tenant}, privileged processing halted: {source}")]
    Escalated {
        tenant: String,
        #[source]
        source: WardenError,
    },
    #[error("Tenant {0} is halted pending operator review")]
    TenantHalted(String),
}

/// Errors returned by workflow handlers.
#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error("Invalid workflow input: {0}")]
    InvalidInput(String),
    #[error("Workflow failed: {0}")]
    Failed(String),
}

/// Errors from workflow resolution.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("Workflow not found: {0}")]
    WorkflowNotFound(WorkflowRef),
    #[error("Workflow {workflow} maps to unregistered handler '{handler}'")]
    HandlerNotRegistered {
        workflow: WorkflowRef,
        handler: String,
    },
    #[error("Storage error: {0}")]
    Storage(#[from] WardenError),
}

impl DispatchError {
    /// Stable failure code recorded on the intent and in the audit ledger.
    pub fn code(&self) -> &'static str {
        match self {
            DispatchError::WorkflowNotFound(_) | DispatchError::HandlerNotRegistered { .. } => {
                "WORKFLOW_NOT_FOUND"
            }
            DispatchError::Storage(_) => "DISPATCH_STORAGE_ERROR",
        }
    }

    pub fn is_not_found(&self) -> bool {
        !matches!(self, DispatchError::Storage(_))
    }
}

/// Errors from decision memo operations.
#[derive(Debug, thiserror::Error)]
pub enum MemoError {
    #[error("Decision memo not found: {0}")]
    NotFound(Uuid),
    #[error("Decision memo {id} is already {status}")]
    Conflict { id: Uuid, status: MemoStatus },
    #[error("guardrail_block ({guardrail}): {reason}")]
    GuardrailBlock { guardrail: String, reason: String },
    #[error("Decision memos are only raised for REVIEW decisions, got {0}")]
    NotReviewable(Decision),
    #[error(transparent)]
    Audit(#[from] AuditError),
    #[error("Storage error: {0}")]
    Storage(#[from] WardenError),
}

impl MemoError {
    /// Short machine-readable condition name for operator tooling.
    pub fn code(&self) -> &'static str {
        match self {
            MemoError::NotFound(_) => "not_found",
            MemoError::Conflict { .. } => "conflict",
            MemoError::GuardrailBlock { .. } => "guardrail_block",
            MemoError::NotReviewable(_) => "not_reviewable",
            MemoError::Audit(_) => "audit_escalated",
            MemoError::Storage(_) => "storage",
        }
    }
}

/// Errors raised while the engine processes a claimed intent.
///
/// None of these escape a tick: they are contained, recorded on the intent,
/// and written to the audit ledger.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Claim on intent {0} was lost")]
    ClaimLost(Uuid),
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
    #[error(transparent)]
    Audit(#[from] AuditError),
    #[error(transparent)]
    Memo(#[from] MemoError),
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
    #[error(transparent)]
    Core(#[from] WardenError),
    #[error("Intent processing panicked: {0}")]
    Panicked(String),
}
