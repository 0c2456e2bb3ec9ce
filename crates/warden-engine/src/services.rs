//! Wiring: builds every engine component from configuration and a database.

use std::sync::Arc;

use tracing::{info, warn};

use warden_core::config::WardenConfig;
use warden_core::error::WardenError;
use warden_core::types::{Timestamp, WorkflowRecord};
use warden_storage::{
    AuditRepository, Database, IntentRepository, MemoRepository, TenantHaltRepository,
    WorkflowRepository,
};

use crate::audit::{AuditLedger, AuditSink};
use crate::dispatch::{Dispatcher, WorkflowHandler, WorkflowRegistry};
use crate::engine::Engine;
use crate::memo::{Guardrail, MemoService, MonthlySpendCap};
use crate::policy::PolicyGate;
use crate::queue::IntentQueue;
use crate::risk::RiskClassifier;

/// All components sharing one database connection.
#[derive(Clone)]
pub struct Services {
    pub db: Arc<Database>,
    pub audit: AuditRepository,
    pub workflows: WorkflowRepository,
    pub halts: TenantHaltRepository,
    pub ledger: Arc<AuditLedger>,
    pub classifier: Arc<RiskClassifier>,
    pub policy: PolicyGate,
    pub queue: IntentQueue,
    pub memos: MemoService,
    pub dispatcher: Dispatcher,
}

impl Services {
    /// Built-in handlers only, auditing to the database.
    pub fn new(config: &WardenConfig, db: Arc<Database>) -> Result<Self, WardenError> {
        Self::with_handlers(config, db, Vec::new())
    }

    /// Built-in handlers plus `handlers`, auditing to the database.
    pub fn with_handlers(
        config: &WardenConfig,
        db: Arc<Database>,
        handlers: Vec<Arc<dyn WorkflowHandler>>,
    ) -> Result<Self, WardenError> {
        let sink = Box::new(AuditRepository::new(Arc::clone(&db)));
        Self::assemble(config, db, handlers, sink)
    }

    /// Like `with_handlers`, with audit entries sent to `sink`.
    pub fn with_audit_sink(
        config: &WardenConfig,
        db: Arc<Database>,
        handlers: Vec<Arc<dyn WorkflowHandler>>,
        sink: Box<dyn AuditSink>,
    ) -> Result<Self, WardenError> {
        Self::assemble(config, db, handlers, sink)
    }

    fn assemble(
        config: &WardenConfig,
        db: Arc<Database>,
        handlers: Vec<Arc<dyn WorkflowHandler>>,
        sink: Box<dyn AuditSink>,
    ) -> Result<Self, WardenError> {
        config.validate()?;

        let classifier = Arc::new(RiskClassifier::with_extra_blocked(
            &config.risk.extra_blocked_patterns,
        )?);

        let mut registry = WorkflowRegistry::with_builtins(Arc::clone(&classifier));
        for handler in handlers {
            registry.register(handler);
        }

        let workflows = WorkflowRepository::new(Arc::clone(&db));
        for mapping in &config.workflows.registered {
            if !registry.contains(&mapping.handler) {
                warn!(
                    workflow = %mapping.id,
                    handler = %mapping.handler,
                    "Workflow maps to a handler that is not registered"
                );
            }
            workflows.upsert(&WorkflowRecord {
                id: mapping.id.clone(),
                key: mapping.key.clone(),
                handler: mapping.handler.clone(),
                description: mapping.description.clone(),
                created_at: Timestamp::now(),
            })?;
        }
        info!(
            handlers = registry.keys().len(),
            durable = config.workflows.registered.len(),
            "Workflow registry ready"
        );

        let halts = TenantHaltRepository::new(Arc::clone(&db));
        let ledger = Arc::new(AuditLedger::with_halts(sink, halts.clone()));
        let intents = IntentRepository::new(Arc::clone(&db));

        let mut guardrails: Vec<Arc<dyn Guardrail>> = Vec::new();
        if let Some(cap) = config.guardrails.monthly_spend_cap_usd {
            guardrails.push(Arc::new(MonthlySpendCap::new(cap)));
        }

        Ok(Self {
            audit: AuditRepository::new(Arc::clone(&db)),
            workflows: workflows.clone(),
            halts,
            policy: PolicyGate::new(config.policy.clone(), Arc::clone(&classifier)),
            queue: IntentQueue::new(
                intents.clone(),
                Arc::clone(&ledger),
                config.queue.clone(),
                config.policy.executor_identity.clone(),
            ),
            memos: MemoService::new(
                MemoRepository::new(Arc::clone(&db)),
                intents,
                Arc::clone(&ledger),
                guardrails,
            ),
            dispatcher: Dispatcher::new(Arc::new(registry), Some(workflows)),
            classifier,
            ledger,
            db,
        })
    }

    /// An engine for one worker.
    pub fn engine(&self, worker_id: impl Into<String>) -> Engine {
        Engine::new(
            worker_id,
            self.queue.clone(),
            self.policy.clone(),
            self.memos.clone(),
            self.dispatcher.clone(),
            Arc::clone(&self.ledger),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_core::config::WorkflowMapping;
    use warden_core::types::WorkflowRef;

    #[test]
    fn test_seeds_durable_workflows() {
        let mut config = WardenConfig::default();
        config.workflows.registered.push(WorkflowMapping {
            id: "WF-1".to_string(),
            key: "ops.echo".to_string(),
            handler: "noop.echo".to_string(),
            description: "echo for smoke tests".to_string(),
        });
        let services =
            Services::new(&config, Arc::new(Database::in_memory().unwrap())).unwrap();

        let record = services
            .workflows
            .find(&WorkflowRef::Id("WF-1".to_string()))
            .unwrap()
            .unwrap();
        assert_eq!(record.handler, "noop.echo");
        assert!(services
            .dispatcher
            .resolve(&WorkflowRef::Key("ops.echo".to_string()))
            .is_ok());
    }

    #[test]
    fn test_rejects_invalid_config() {
        let mut config = WardenConfig::default();
        config.risk.extra_blocked_patterns.push("(".to_string());
        assert!(Services::new(&config, Arc::new(Database::in_memory().unwrap())).is_err());

        let mut config = WardenConfig::default();
        config.queue.lease_secs = 0;
        assert!(Services::new(&config, Arc::new(Database::in_memory().unwrap())).is_err());
    }

    #[test]
    fn test_engine_uses_worker_id() {
        let services = Services::new(
            &WardenConfig::default(),
            Arc::new(Database::in_memory().unwrap()),
        )
        .unwrap();
        assert_eq!(services.engine("w-7").worker_id(), "w-7");
    }
}
