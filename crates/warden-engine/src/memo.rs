//! Decision memos: the human checkpoint for REVIEW decisions.
//!
//! A memo is raised when the policy gate returns REVIEW and the intent is
//! parked in `AWAITING_HUMAN`. Approval runs the configured guardrails and
//! re-queues the intent in one write transaction; rejection terminates it.

use std::sync::Arc;

use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use warden_core::error::WardenError;
use warden_core::types::{
    AuditEntry, AuditLevel, Decision, DecisionMemo, EntityType, Intent, MemoStatus,
    PolicyDecision, Timestamp,
};
use warden_core::AuditAction;
use warden_storage::{Approval, ApprovalView, IntentRepository, MemoFilter, MemoRepository};

use crate::audit::{AuditLedger, AuditTier};
use crate::error::MemoError;
use crate::lifecycle::validate_memo_transition;

// =============================================================================
// Guardrails
// =============================================================================

/// A guardrail refused an approval.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuardrailViolation {
    pub guardrail: String,
    pub reason: String,
}

impl From<GuardrailViolation> for MemoError {
    fn from(v: GuardrailViolation) -> Self {
        MemoError::GuardrailBlock {
            guardrail: v.guardrail,
            reason: v.reason,
        }
    }
}

/// A check run on every approval before the memo leaves `PROPOSED`.
pub trait Guardrail: Send + Sync {
    fn name(&self) -> &str;

    /// Refuse the approval with a violation. Implementations fail closed
    /// when they cannot evaluate.
    ///
    /// `view` reads inside the approval's write transaction, so totals it
    /// reports cannot change before the memo is approved.
    fn check(&self, memo: &DecisionMemo, view: &ApprovalView<'_>) -> Result<(), GuardrailViolation>;
}

/// Caps approved spend per tenant per calendar month (UTC).
pub struct MonthlySpendCap {
    cap_usd: f64,
}

impl MonthlySpendCap {
    pub fn new(cap_usd: f64) -> Self {
        Self { cap_usd }
    }
}

impl Guardrail for MonthlySpendCap {
    fn name(&self) -> &str {
        "monthly_spend_cap"
    }

    fn check(&self, memo: &DecisionMemo, view: &ApprovalView<'_>) -> Result<(), GuardrailViolation> {
        let since = Timestamp::now().start_of_month();
        let committed = view
            .committed_spend(&memo.tenant_id, since)
            .map_err(|e| GuardrailViolation {
                guardrail: self.name().to_string(),
                reason: format!("could not compute committed spend: {}", e),
            })?;

        let projected = committed + memo.spend_usd;
        if projected > self.cap_usd {
            return Err(GuardrailViolation {
                guardrail: self.name().to_string(),
                reason: format!(
                    "approving ${:.2} brings {} to ${:.2} this month, cap is ${:.2}",
                    memo.spend_usd, memo.tenant_id, projected, self.cap_usd
                ),
            });
        }
        Ok(())
    }
}

// =============================================================================
// Memo service
// =============================================================================

#[derive(Clone)]
pub struct MemoService {
    memos: MemoRepository,
    intents: IntentRepository,
    ledger: Arc<AuditLedger>,
    guardrails: Vec<Arc<dyn Guardrail>>,
}

impl MemoService {
    pub fn new(
        memos: MemoRepository,
        intents: IntentRepository,
        ledger: Arc<AuditLedger>,
        guardrails: Vec<Arc<dyn Guardrail>>,
    ) -> Self {
        Self {
            memos,
            intents,
            ledger,
            guardrails,
        }
    }

    /// Raise a memo for an intent the policy gate sent to review.
    pub fn propose(
        &self,
        intent: &Intent,
        decision: &PolicyDecision,
        risk_tier: u8,
    ) -> Result<DecisionMemo, MemoError> {
        if decision.decision != Decision::Review {
            return Err(MemoError::NotReviewable(decision.decision));
        }

        let reasons: Vec<&str> = decision.reasons.iter().map(|r| r.as_str()).collect();
        let memo = DecisionMemo {
            id: Uuid::new_v4(),
            tenant_id: intent.tenant_id.clone(),
            intent_id: Some(intent.id),
            agent: intent.actor.clone(),
            title: format!("{} requires review", intent.intent_type()),
            rationale: reasons.join(", "),
            risk_tier: risk_tier.clamp(1, 3),
            requires_approval: decision.requires_human_approval,
            status: MemoStatus::Proposed,
            payload: serde_json::to_value(&intent.payload).map_err(WardenError::from)?,
            spend_usd: intent.spend_usd,
            decided_by: None,
            decision_reason: None,
            created_at: Timestamp::now(),
            decided_at: None,
            executed_at: None,
        };
        self.memos.insert(&memo)?;

        self.ledger.record(
            AuditEntry::new(
                &memo.tenant_id,
                &memo.agent,
                AuditAction::DecisionMemoCreated,
                EntityType::DecisionMemo,
                memo.id,
            )
            .with_message(memo.title.clone())
            .with_meta(json!({
                "intent_id": intent.id,
                "risk_tier": memo.risk_tier,
                "reasons": reasons,
                "spend_usd": memo.spend_usd,
            })),
            AuditTier::Required,
        )?;
        info!(memo_id = %memo.id, intent_id = %intent.id, risk_tier = memo.risk_tier, "Decision memo proposed");
        Ok(memo)
    }

    /// Approve a `PROPOSED` memo and re-queue its intent.
    ///
    /// Guardrails, the memo update and the requeue share one transaction.
    /// If a required audit write fails afterwards, the approval stands and
    /// the tenant is halted, which keeps the intent from being claimed until
    /// an operator resumes it.
    pub fn approve(&self, memo_id: Uuid, actor: &str) -> Result<DecisionMemo, MemoError> {
        let memo = self.load_open(memo_id, MemoStatus::Approved)?;

        let outcome =
            self.memos
                .approve(memo.id, actor, |memo, view| -> Result<(), GuardrailViolation> {
                    for guardrail in &self.guardrails {
                        guardrail.check(memo, view)?;
                    }
                    Ok(())
                })?;

        let requeued = match outcome {
            Approval::Approved { requeued } => requeued,
            Approval::NotProposed => return Err(self.conflict(memo.id)),
            Approval::Refused(violation) => {
                warn!(
                    memo_id = %memo.id,
                    guardrail = %violation.guardrail,
                    reason = %violation.reason,
                    "Approval blocked by guardrail"
                );
                self.ledger.record(
                    AuditEntry::new(
                        &memo.tenant_id,
                        actor,
                        AuditAction::MemoApprovalBlocked,
                        EntityType::DecisionMemo,
                        memo.id,
                    )
                    .with_level(AuditLevel::Warn)
                    .with_message(violation.reason.clone())
                    .with_meta(json!({"guardrail": violation.guardrail})),
                    AuditTier::BestEffort,
                )?;
                return Err(violation.into());
            }
        };

        self.ledger.record(
            AuditEntry::new(
                &memo.tenant_id,
                actor,
                AuditAction::MemoApproved,
                EntityType::DecisionMemo,
                memo.id,
            )
            .with_message(format!("approved by {}", actor))
            .with_meta(json!({"intent_id": memo.intent_id, "spend_usd": memo.spend_usd})),
            AuditTier::Required,
        )?;

        if let Some(intent_id) = memo.intent_id {
            if requeued {
                self.ledger.record(
                    AuditEntry::new(
                        &memo.tenant_id,
                        actor,
                        AuditAction::IntentRequeued,
                        EntityType::Intent,
                        intent_id,
                    )
                    .with_message("re-queued after approval")
                    .with_meta(json!({"memo_id": memo.id})),
                    AuditTier::Required,
                )?;
            } else {
                warn!(memo_id = %memo.id, intent_id = %intent_id, "Approved memo's intent was not awaiting approval");
            }
        }

        info!(memo_id = %memo.id, actor = %actor, "Decision memo approved");
        self.get(memo.id)
    }

    /// Reject a `PROPOSED` memo. Its parked intent fails.
    pub fn reject(&self, memo_id: Uuid, actor: &str, reason: &str) -> Result<DecisionMemo, MemoError> {
        let memo = self.load_open(memo_id, MemoStatus::Rejected)?;

        if !self
            .memos
            .resolve(memo.id, MemoStatus::Rejected, actor, Some(reason))?
        {
            return Err(self.conflict(memo.id));
        }
        self.ledger.record(
            AuditEntry::new(
                &memo.tenant_id,
                actor,
                AuditAction::MemoRejected,
                EntityType::DecisionMemo,
                memo.id,
            )
            .with_message(reason)
            .with_meta(json!({"intent_id": memo.intent_id})),
            AuditTier::Required,
        )?;

        if let Some(intent_id) = memo.intent_id {
            let last_error = format!("decision memo rejected: {}", reason);
            if self.intents.fail_parked(intent_id, &last_error)? {
                self.ledger.record(
                    AuditEntry::new(
                        &memo.tenant_id,
                        actor,
                        AuditAction::Failed,
                        EntityType::Intent,
                        intent_id,
                    )
                    .with_message(last_error)
                    .with_meta(json!({"memo_id": memo.id, "code": "MEMO_REJECTED"})),
                    AuditTier::Required,
                )?;
            }
        }

        info!(memo_id = %memo.id, actor = %actor, "Decision memo rejected");
        self.get(memo.id)
    }

    /// Close a memo whose intent could not be parked. The memo is rejected
    /// without touching the intent, which stays with whoever owns it now.
    ///
    /// Returns `false` if the memo had already left `PROPOSED`.
    pub fn withdraw(&self, memo_id: Uuid, actor: &str, reason: &str) -> Result<bool, MemoError> {
        let memo = self.get(memo_id)?;
        if !self
            .memos
            .resolve(memo.id, MemoStatus::Rejected, actor, Some(reason))?
        {
            return Ok(false);
        }
        self.ledger.record(
            AuditEntry::new(
                &memo.tenant_id,
                actor,
                AuditAction::MemoRejected,
                EntityType::DecisionMemo,
                memo.id,
            )
            .with_level(AuditLevel::Warn)
            .with_message(reason)
            .with_meta(json!({"intent_id": memo.intent_id, "code": "WITHDRAWN"})),
            AuditTier::BestEffort,
        )?;
        warn!(memo_id = %memo.id, reason = %reason, "Decision memo withdrawn");
        Ok(true)
    }

    /// Move an approved memo to `EXECUTED`. Returns `false` if it was not
    /// `APPROVED`.
    pub fn mark_executed(&self, memo_id: Uuid, tenant_id: &str) -> Result<bool, MemoError> {
        if !self.memos.mark_executed(memo_id)? {
            return Ok(false);
        }
        self.ledger.record(
            AuditEntry::new(
                tenant_id,
                "system",
                AuditAction::MemoExecuted,
                EntityType::DecisionMemo,
                memo_id,
            ),
            AuditTier::Required,
        )?;
        Ok(true)
    }

    pub fn get(&self, memo_id: Uuid) -> Result<DecisionMemo, MemoError> {
        self.memos
            .get(memo_id)?
            .ok_or(MemoError::NotFound(memo_id))
    }

    /// Memos still waiting on a human, oldest first.
    pub fn list_pending(&self, tenant_id: Option<&str>) -> Result<Vec<DecisionMemo>, MemoError> {
        let memos = self.memos.list(&MemoFilter {
            tenant_id: tenant_id.map(str::to_string),
            status: Some(MemoStatus::Proposed),
            limit: None,
        })?;
        Ok(memos)
    }

    fn load_open(&self, memo_id: Uuid, to: MemoStatus) -> Result<DecisionMemo, MemoError> {
        let memo = self.get(memo_id)?;
        self.ledger.ensure_active(&memo.tenant_id)?;
        validate_memo_transition(memo.status, to).map_err(|_| MemoError::Conflict {
            id: memo.id,
            status: memo.status,
        })?;
        Ok(memo)
    }

    fn conflict(&self, memo_id: Uuid) -> MemoError {
        match self.memos.get(memo_id) {
            Ok(Some(current)) => MemoError::Conflict {
                id: memo_id,
                status: current.status,
            },
            Ok(None) => MemoError::NotFound(memo_id),
            Err(e) => MemoError::Storage(e),
        }
    }
}
