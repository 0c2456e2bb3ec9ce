//! Intent queue: producer-facing enqueue and the engine's claim and
//! transition primitives.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tracing::info;
use uuid::Uuid;

use warden_core::config::QueueConfig;
use warden_core::error::WardenError;
use warden_core::types::{AuditEntry, Decision, EntityType, Intent, IntentStatus, NewIntent};
use warden_core::AuditAction;
use warden_storage::{ClaimRequest, IntentFilter, IntentRepository};

use crate::audit::{AuditLedger, AuditTier};
use crate::error::EngineError;
use crate::lifecycle::validate_intent_transition;

#[derive(Clone)]
pub struct IntentQueue {
    intents: IntentRepository,
    ledger: Arc<AuditLedger>,
    config: QueueConfig,
    default_actor: String,
}

impl IntentQueue {
    pub fn new(
        intents: IntentRepository,
        ledger: Arc<AuditLedger>,
        config: QueueConfig,
        default_actor: impl Into<String>,
    ) -> Self {
        Self {
            intents,
            ledger,
            config,
            default_actor: default_actor.into(),
        }
    }

    /// Validate and queue a producer submission as `DRAFT`.
    pub fn enqueue(&self, new: NewIntent) -> Result<Intent, EngineError> {
        let intent = Intent::from_new(new, &self.default_actor)?;
        self.intents.insert(&intent)?;

        self.ledger.record(
            AuditEntry::new(
                &intent.tenant_id,
                &intent.actor,
                AuditAction::IntentCreated,
                EntityType::Intent,
                intent.id,
            )
            .with_message(format!("{} queued", intent.intent_type()))
            .with_meta(json!({
                "intent_type": intent.intent_type(),
                "data_class": intent.data_class,
                "spend_usd": intent.spend_usd,
                "spend_reported": intent.spend_reported,
            })),
            AuditTier::BestEffort,
        )?;
        info!(intent_id = %intent.id, tenant = %intent.tenant_id, intent_type = %intent.intent_type(), "Intent queued");
        Ok(intent)
    }

    /// Claim the oldest eligible intent, skipping halted tenants.
    pub fn claim(&self, worker_id: &str) -> Result<Option<Intent>, WardenError> {
        let excluded = self.ledger.halted_tenants();
        self.intents.claim_next(&ClaimRequest {
            worker_id,
            lease_secs: self.config.lease_secs,
            excluded_tenants: &excluded,
            max_attempts: self.config.max_claim_attempts,
        })
    }

    /// Store the policy decision. Fails with `ClaimLost` if the worker no
    /// longer owns the intent.
    pub fn record_decision(
        &self,
        intent: &Intent,
        worker_id: &str,
        decision: Decision,
    ) -> Result<(), EngineError> {
        if !self.intents.record_decision(intent.id, worker_id, decision)? {
            return Err(EngineError::ClaimLost(intent.id));
        }
        Ok(())
    }

    /// Extend the worker's lease by another `lease_secs`. Fails with
    /// `ClaimLost` if the worker no longer owns the intent.
    pub fn renew_lease(&self, id: Uuid, worker_id: &str) -> Result<(), EngineError> {
        if !self
            .intents
            .renew_lease(id, worker_id, self.config.lease_secs)?
        {
            return Err(EngineError::ClaimLost(id));
        }
        Ok(())
    }

    /// How often a running intent renews its lease: half the lease, so one
    /// missed renewal still leaves the claim standing.
    pub fn renewal_period(&self) -> Duration {
        Duration::from_millis(self.config.lease_secs.saturating_mul(500))
            .max(Duration::from_millis(50))
    }

    /// Move an owned intent out of `VALIDATING`.
    pub fn transition(
        &self,
        id: Uuid,
        worker_id: &str,
        to: IntentStatus,
        last_error: Option<&str>,
    ) -> Result<(), EngineError> {
        validate_intent_transition(IntentStatus::Validating, to)?;
        if !self.intents.complete(id, worker_id, to, last_error)? {
            return Err(EngineError::ClaimLost(id));
        }
        Ok(())
    }

    pub fn get(&self, id: Uuid) -> Result<Option<Intent>, WardenError> {
        self.intents.get(id)
    }

    pub fn list(&self, filter: &IntentFilter) -> Result<Vec<Intent>, WardenError> {
        self.intents.list(filter)
    }

    pub fn count_by_status(
        &self,
        tenant_id: Option<&str>,
    ) -> Result<Vec<(IntentStatus, u64)>, WardenError> {
        self.intents.count_by_status(tenant_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_core::types::{IntentPayload, WorkflowRef};
    use warden_storage::{AuditFilter, AuditRepository, Database, TenantHaltRepository};

    fn queue() -> (IntentQueue, AuditRepository, TenantHaltRepository) {
        let db = Arc::new(Database::in_memory().unwrap());
        let audit = AuditRepository::new(Arc::clone(&db));
        let halts = TenantHaltRepository::new(Arc::clone(&db));
        let ledger = Arc::new(AuditLedger::with_halts(Box::new(audit.clone()), halts.clone()));
        let queue = IntentQueue::new(
            IntentRepository::new(db),
            ledger,
            QueueConfig::default(),
            "EXECUTOR",
        );
        (queue, audit, halts)
    }

    fn new_intent(tenant: &str) -> NewIntent {
        NewIntent {
            tenant_id: tenant.to_string(),
            actor: None,
            payload: IntentPayload::EngineRun {
                workflow: WorkflowRef::Key("noop.echo".to_string()),
                input: json!({"n": 1}),
            },
            data_class: None,
            spend_usd: Some(5.0),
        }
    }

    #[test]
    fn test_enqueue_defaults_and_audits() {
        let (queue, audit, _) = queue();
        let intent = queue.enqueue(new_intent("acme")).unwrap();
        assert_eq!(intent.status, IntentStatus::Draft);
        assert_eq!(intent.actor, "EXECUTOR");

        let stored = queue.get(intent.id).unwrap().unwrap();
        assert_eq!(stored.payload, intent.payload);
        assert_eq!(stored.status, IntentStatus::Draft);

        let entries = audit
            .list(&AuditFilter {
                entity_id: Some(intent.id.to_string()),
                ..AuditFilter::default()
            })
            .unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].action, AuditAction::IntentCreated);
    }

    #[test]
    fn test_enqueue_rejects_invalid_payload() {
        let (queue, _, _) = queue();
        let mut bad = new_intent("acme");
        bad.payload = IntentPayload::ChatCall {
            agent_id: "a".to_string(),
            prompt: String::new(),
        };
        let err = queue.enqueue(bad).unwrap_err();
        assert!(matches!(err, EngineError::Core(WardenError::Validation(_))));
    }

    #[test]
    fn test_claim_skips_halted_tenants() {
        let (queue, _, halts) = queue();
        let halted = queue.enqueue(new_intent("acme")).unwrap();
        let other = queue.enqueue(new_intent("globex")).unwrap();
        halts.halt("acme", "audit write failed").unwrap();

        let claimed = queue.claim("w-1").unwrap().unwrap();
        assert_eq!(claimed.id, other.id);
        assert!(queue.claim("w-1").unwrap().is_none());

        halts.resume("acme").unwrap();
        assert_eq!(queue.claim("w-1").unwrap().unwrap().id, halted.id);
    }

    #[test]
    fn test_transition_requires_ownership() {
        let (queue, _, _) = queue();
        let intent = queue.enqueue(new_intent("acme")).unwrap();
        let claimed = queue.claim("w-1").unwrap().unwrap();
        assert_eq!(claimed.id, intent.id);

        let err = queue
            .transition(intent.id, "w-2", IntentStatus::Executed, None)
            .unwrap_err();
        assert!(matches!(err, EngineError::ClaimLost(_)));

        let err = queue
            .record_decision(&claimed, "w-2", Decision::Allow)
            .unwrap_err();
        assert!(matches!(err, EngineError::ClaimLost(_)));

        queue.record_decision(&claimed, "w-1", Decision::Allow).unwrap();
        queue
            .transition(intent.id, "w-1", IntentStatus::Executed, None)
            .unwrap();
        let done = queue.get(intent.id).unwrap().unwrap();
        assert_eq!(done.status, IntentStatus::Executed);
        assert_eq!(done.sgl_result, Some(Decision::Allow));
        assert!(done.claimed_by.is_none());
    }

    #[test]
    fn test_renew_lease_requires_ownership() {
        let (queue, _, _) = queue();
        let intent = queue.enqueue(new_intent("acme")).unwrap();
        let err = queue.renew_lease(intent.id, "w-1").unwrap_err();
        assert!(matches!(err, EngineError::ClaimLost(_)));

        queue.claim("w-1").unwrap().unwrap();
        queue.renew_lease(intent.id, "w-1").unwrap();
        let err = queue.renew_lease(intent.id, "w-2").unwrap_err();
        assert!(matches!(err, EngineError::ClaimLost(_)));
        assert_eq!(queue.renewal_period(), Duration::from_secs(150));
    }

    #[test]
    fn test_transition_rejects_invalid_target() {
        let (queue, _, _) = queue();
        queue.enqueue(new_intent("acme")).unwrap();
        let claimed = queue.claim("w-1").unwrap().unwrap();
        let err = queue
            .transition(claimed.id, "w-1", IntentStatus::Draft, None)
            .unwrap_err();
        assert!(matches!(err, EngineError::Lifecycle(_)));
    }

    #[test]
    fn test_count_by_status() {
        let (queue, _, _) = queue();
        queue.enqueue(new_intent("acme")).unwrap();
        queue.enqueue(new_intent("acme")).unwrap();
        queue.claim("w-1").unwrap().unwrap();

        let counts = queue.count_by_status(Some("acme")).unwrap();
        assert!(counts.contains(&(IntentStatus::Draft, 1)));
        assert!(counts.contains(&(IntentStatus::Validating, 1)));
    }
}
