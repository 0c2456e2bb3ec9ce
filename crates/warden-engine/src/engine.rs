//! The engine tick: claim one intent, gate it, then park, block, or run it.
//!
//! Processing runs in its own task. Errors and panics inside it are
//! contained by `tick`, which fails the intent on a best-effort basis and
//! reports the problem instead of propagating it.

use std::sync::Arc;

use serde::Serialize;
use serde_json::json;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use warden_core::types::{
    AuditEntry, AuditLevel, Decision, EntityType, Intent, IntentStatus, MemoStatus,
};
use warden_core::AuditAction;

use crate::audit::{AuditLedger, AuditTier};
use crate::dispatch::{Dispatcher, ResolvedWorkflow, WorkflowContext, WorkflowOutcome};
use crate::error::{EngineError, MemoError};
use crate::memo::MemoService;
use crate::policy::PolicyGate;
use crate::queue::IntentQueue;

/// What a single tick did.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TickReport {
    pub ran: bool,
    pub intent_id: Option<Uuid>,
    pub status: Option<IntentStatus>,
    pub error: Option<String>,
}

impl TickReport {
    fn idle() -> Self {
        Self {
            ran: false,
            intent_id: None,
            status: None,
            error: None,
        }
    }
}

#[derive(Clone)]
pub struct Engine {
    worker_id: String,
    queue: IntentQueue,
    policy: PolicyGate,
    memos: MemoService,
    dispatcher: Dispatcher,
    ledger: Arc<AuditLedger>,
}

impl Engine {
    pub fn new(
        worker_id: impl Into<String>,
        queue: IntentQueue,
        policy: PolicyGate,
        memos: MemoService,
        dispatcher: Dispatcher,
        ledger: Arc<AuditLedger>,
    ) -> Self {
        Self {
            worker_id: worker_id.into(),
            queue,
            policy,
            memos,
            dispatcher,
            ledger,
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// Claim and process at most one intent. Never fails.
    pub async fn tick(&self) -> TickReport {
        let intent = match self.queue.claim(&self.worker_id) {
            Ok(Some(intent)) => intent,
            Ok(None) => return TickReport::idle(),
            Err(e) => {
                warn!(worker = %self.worker_id, error = %e, "Claim failed");
                return TickReport {
                    error: Some(e.to_string()),
                    ..TickReport::idle()
                };
            }
        };

        let intent_id = intent.id;
        let tenant_id = intent.tenant_id.clone();
        debug!(worker = %self.worker_id, intent_id = %intent_id, attempts = intent.attempts, "Claimed intent");

        let engine = self.clone();
        let result = match tokio::spawn(async move { engine.process(intent).await }).await {
            Ok(result) => result,
            Err(join_err) => Err(EngineError::Panicked(panic_message(join_err))),
        };

        match result {
            Ok(status) => TickReport {
                ran: true,
                intent_id: Some(intent_id),
                status: Some(status),
                error: None,
            },
            Err(e) => {
                let status = self.contain_failure(intent_id, &tenant_id, &e);
                TickReport {
                    ran: true,
                    intent_id: Some(intent_id),
                    status,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    async fn process(&self, intent: Intent) -> Result<IntentStatus, EngineError> {
        self.ledger.record(
            self.entry(&intent, AuditAction::IntentClaimed)
                .with_message(format!("claimed by {}", self.worker_id))
                .with_meta(json!({"attempts": intent.attempts})),
            AuditTier::BestEffort,
        )?;

        let decision = self.policy.evaluate(&intent);
        self.queue
            .record_decision(&intent, &self.worker_id, decision.decision)?;

        let reasons: Vec<&str> = decision.reasons.iter().map(|r| r.as_str()).collect();
        let level = if decision.decision == Decision::Allow {
            AuditLevel::Info
        } else {
            AuditLevel::Security
        };
        self.ledger.record(
            self.entry(&intent, AuditAction::PolicyDecision)
                .with_level(level)
                .with_message(format!("{}: {}", decision.decision, reasons.join(", ")))
                .with_meta(json!({
                    "decision": decision.decision,
                    "reasons": reasons,
                    "requires_human_approval": decision.requires_human_approval,
                    "intent_type": intent.intent_type(),
                    "spend_usd": intent.spend_usd,
                })),
            AuditTier::Required,
        )?;

        match decision.decision {
            Decision::Block => {
                let reason = reasons.join(", ");
                self.queue.transition(
                    intent.id,
                    &self.worker_id,
                    IntentStatus::BlockedSgl,
                    Some(&reason),
                )?;
                self.ledger.record(
                    self.entry(&intent, AuditAction::ExecutionBlocked)
                        .with_message(format!("blocked: {}", reason))
                        .with_meta(json!({"reasons": reasons})),
                    AuditTier::Required,
                )?;
                info!(intent_id = %intent.id, reason = %reason, "Intent blocked");
                Ok(IntentStatus::BlockedSgl)
            }
            Decision::Review => {
                if let Some(memo_id) = self.approved_memo(&intent)? {
                    debug!(intent_id = %intent.id, memo_id = %memo_id, "Proceeding under approved memo");
                    return self.execute(&intent, Some(memo_id)).await;
                }

                // No memo for an intent this worker no longer owns.
                self.queue.renew_lease(intent.id, &self.worker_id)?;
                let risk_tier = self.policy.review_risk_tier(&intent, &decision);
                let memo = self.memos.propose(&intent, &decision, risk_tier)?;
                if let Err(e) = self.queue.transition(
                    intent.id,
                    &self.worker_id,
                    IntentStatus::AwaitingHuman,
                    None,
                ) {
                    let reason = format!("intent could not be parked: {}", e);
                    if let Err(withdraw_err) =
                        self.memos.withdraw(memo.id, &self.worker_id, &reason)
                    {
                        error!(memo_id = %memo.id, error = %withdraw_err, "Could not withdraw memo");
                    }
                    return Err(e);
                }
                self.ledger.record(
                    self.entry(&intent, AuditAction::AwaitingHumanApproval)
                        .with_message(format!("awaiting approval of memo {}", memo.id))
                        .with_meta(json!({"memo_id": memo.id, "risk_tier": risk_tier})),
                    AuditTier::Required,
                )?;
                info!(intent_id = %intent.id, memo_id = %memo.id, "Intent parked for review");
                Ok(IntentStatus::AwaitingHuman)
            }
            Decision::Allow => self.execute(&intent, None).await,
        }
    }

    /// The approving memo, if this intent was re-queued by an approval that
    /// still stands.
    fn approved_memo(&self, intent: &Intent) -> Result<Option<Uuid>, EngineError> {
        let Some(memo_id) = intent.approved_memo_id else {
            return Ok(None);
        };
        let memo = match self.memos.get(memo_id) {
            Ok(memo) => memo,
            Err(MemoError::NotFound(_)) => {
                warn!(intent_id = %intent.id, memo_id = %memo_id, "Approving memo missing");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };
        if memo.status == MemoStatus::Approved && memo.intent_id == Some(intent.id) {
            Ok(Some(memo_id))
        } else {
            Ok(None)
        }
    }

    async fn execute(
        &self,
        intent: &Intent,
        memo_id: Option<Uuid>,
    ) -> Result<IntentStatus, EngineError> {
        let workflow = intent.payload.workflow_ref();
        let resolved = match self.dispatcher.resolve(&workflow) {
            Ok(resolved) => resolved,
            Err(e) if e.is_not_found() => {
                let last_error = format!("{}: {}", e.code(), e);
                self.ledger.record(
                    self.entry(intent, AuditAction::WorkflowNotFound)
                        .with_message(e.to_string())
                        .with_meta(json!({"workflow": workflow.to_string()})),
                    AuditTier::BestEffort,
                )?;
                self.queue.transition(
                    intent.id,
                    &self.worker_id,
                    IntentStatus::Failed,
                    Some(&last_error),
                )?;
                self.ledger.record(
                    self.entry(intent, AuditAction::Failed)
                        .with_message(last_error)
                        .with_meta(json!({"code": e.code(), "workflow": workflow.to_string()})),
                    AuditTier::Required,
                )?;
                return Ok(IntentStatus::Failed);
            }
            Err(e) => return Err(e.into()),
        };

        let trace_id = Uuid::new_v4();
        let ctx = WorkflowContext {
            tenant_id: intent.tenant_id.clone(),
            requested_by: intent.actor.clone(),
            agent_id: intent.payload.agent_id().map(str::to_string),
            workflow_id: resolved.workflow_id.clone(),
            input: intent.payload.workflow_input(),
            trace_id,
            intent_id: intent.id,
        };
        let outcome = self.invoke_holding_lease(intent.id, &resolved, ctx).await;

        if outcome.ok {
            self.queue
                .transition(intent.id, &self.worker_id, IntentStatus::Executed, None)?;
            self.ledger.record(
                self.entry(intent, AuditAction::Executed)
                    .with_message(outcome.message.clone().unwrap_or_default())
                    .with_meta(json!({
                        "workflow_id": resolved.workflow_id,
                        "trace_id": trace_id,
                        "memo_id": memo_id,
                        "output": outcome.output,
                    })),
                AuditTier::Required,
            )?;
            if let Some(memo_id) = memo_id {
                self.memos.mark_executed(memo_id, &intent.tenant_id)?;
            }
            info!(intent_id = %intent.id, workflow = %resolved.workflow_id, "Intent executed");
            Ok(IntentStatus::Executed)
        } else {
            let message = outcome
                .message
                .unwrap_or_else(|| "workflow failed".to_string());
            self.queue.transition(
                intent.id,
                &self.worker_id,
                IntentStatus::Failed,
                Some(&message),
            )?;
            self.ledger.record(
                self.entry(intent, AuditAction::Failed)
                    .with_message(message.clone())
                    .with_meta(json!({
                        "code": "WORKFLOW_FAILED",
                        "workflow_id": resolved.workflow_id,
                        "trace_id": trace_id,
                    })),
                AuditTier::Required,
            )?;
            warn!(intent_id = %intent.id, workflow = %resolved.workflow_id, error = %message, "Workflow failed");
            Ok(IntentStatus::Failed)
        }
    }

    /// Run a handler while renewing this worker's lease on the intent.
    /// The handler always runs to completion; a failed renewal is logged and
    /// the later transition reports the lost claim.
    async fn invoke_holding_lease(
        &self,
        intent_id: Uuid,
        resolved: &ResolvedWorkflow,
        ctx: WorkflowContext,
    ) -> WorkflowOutcome {
        let invocation = self.dispatcher.invoke(resolved, ctx);
        tokio::pin!(invocation);

        let mut renewal = tokio::time::interval(self.queue.renewal_period());
        renewal.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick fires immediately; the claim was just taken.
        renewal.tick().await;

        loop {
            tokio::select! {
                outcome = &mut invocation => return outcome,
                _ = renewal.tick() => {
                    match self.queue.renew_lease(intent_id, &self.worker_id) {
                        Ok(()) => debug!(intent_id = %intent_id, "Lease renewed"),
                        Err(e) => warn!(
                            worker = %self.worker_id,
                            intent_id = %intent_id,
                            error = %e,
                            "Lease renewal failed"
                        ),
                    }
                }
            }
        }
    }

    /// Fail the intent after an error escaped processing.
    ///
    /// Returns the status the intent was left in, if this call moved it.
    fn contain_failure(
        &self,
        intent_id: Uuid,
        tenant_id: &str,
        err: &EngineError,
    ) -> Option<IntentStatus> {
        error!(worker = %self.worker_id, intent_id = %intent_id, error = %err, "Intent processing failed");
        if matches!(err, EngineError::ClaimLost(_)) {
            return None;
        }

        let message = err.to_string();
        match self
            .queue
            .transition(intent_id, &self.worker_id, IntentStatus::Failed, Some(&message))
        {
            Ok(()) => {}
            Err(EngineError::ClaimLost(_)) => {
                debug!(intent_id = %intent_id, "Intent already left VALIDATING");
                return None;
            }
            Err(e) => {
                error!(intent_id = %intent_id, error = %e, "Could not mark intent failed");
                return None;
            }
        }

        let entry = AuditEntry::new(
            tenant_id,
            self.worker_id.as_str(),
            AuditAction::Failed,
            EntityType::Intent,
            intent_id,
        )
        .with_level(AuditLevel::Error)
        .with_message(message)
        .with_meta(json!({"code": "ENGINE_ERROR"}));
        let _ = self.ledger.record(entry, AuditTier::BestEffort);
        Some(IntentStatus::Failed)
    }

    fn entry(&self, intent: &Intent, action: AuditAction) -> AuditEntry {
        AuditEntry::new(
            &intent.tenant_id,
            self.worker_id.as_str(),
            action,
            EntityType::Intent,
            intent.id,
        )
    }
}

fn panic_message(err: tokio::task::JoinError) -> String {
    if !err.is_panic() {
        return err.to_string();
    }
    let payload = err.into_panic();
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
