//! End-to-end engine scenarios against a real SQLite database.

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tempfile::TempDir;

use warden_core::config::WardenConfig;
use warden_core::error::WardenError;
use warden_core::types::{
    AuditEntry, AuditLevel, BrowserActionStep, DataClass, Decision, IntentPayload, IntentStatus,
    MemoStatus, NewIntent, OrderSide, WorkflowRef,
};
use warden_core::AuditAction;
use warden_engine::{
    AuditSink, MemoError, Services, WorkflowContext, WorkflowError, WorkflowHandler,
    WorkflowOutcome,
};
use warden_storage::{AuditFilter, AuditRepository, Database, MemoFilter, MemoRepository};

// =============================================================================
// Fixtures
// =============================================================================

/// Counts invocations so tests can prove a handler never ran.
struct CountingWorkflow {
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl WorkflowHandler for CountingWorkflow {
    fn key(&self) -> &str {
        "test.count"
    }

    async fn run(&self, ctx: WorkflowContext) -> Result<WorkflowOutcome, WorkflowError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(WorkflowOutcome::success("counted", Some(ctx.input)))
    }
}

struct PanickingWorkflow;

#[async_trait]
impl WorkflowHandler for PanickingWorkflow {
    fn key(&self) -> &str {
        "test.panic"
    }

    async fn run(&self, _ctx: WorkflowContext) -> Result<WorkflowOutcome, WorkflowError> {
        panic!("handler exploded");
    }
}

/// Sleeps for `input.sleep_ms` before succeeding.
struct SlowWorkflow {
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl WorkflowHandler for SlowWorkflow {
    fn key(&self) -> &str {
        "test.slow"
    }

    async fn run(&self, ctx: WorkflowContext) -> Result<WorkflowOutcome, WorkflowError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let sleep_ms = ctx.input["sleep_ms"].as_u64().unwrap_or(0);
        tokio::time::sleep(Duration::from_millis(sleep_ms)).await;
        Ok(WorkflowOutcome::success("slept", None))
    }
}

/// Writes through to the database, with switchable failure modes.
struct ControlledSink {
    db: Arc<Database>,
    inner: AuditRepository,
    fail_executed: Arc<AtomicBool>,
    panic_on_policy: Arc<AtomicBool>,
    steal_on_policy: Arc<AtomicBool>,
    fail_all: Arc<AtomicBool>,
}

impl AuditSink for ControlledSink {
    fn append(&self, entry: &AuditEntry) -> Result<(), WardenError> {
        if self.fail_all.load(Ordering::SeqCst) {
            return Err(WardenError::Storage("audit volume unavailable".to_string()));
        }
        if entry.action == AuditAction::PolicyDecision && self.panic_on_policy.load(Ordering::SeqCst)
        {
            panic!("audit sink crashed");
        }
        if entry.action == AuditAction::PolicyDecision && self.steal_on_policy.load(Ordering::SeqCst)
        {
            // Another worker reclaims the intent mid-processing.
            self.db.with_conn(|conn| {
                conn.execute(
                    "UPDATE intents SET claimed_by = 'w-other' WHERE id = ?1",
                    [&entry.entity_id],
                )
                .map_err(|e| WardenError::Storage(e.to_string()))?;
                Ok(())
            })?;
        }
        if entry.action == AuditAction::Executed && self.fail_executed.load(Ordering::SeqCst) {
            return Err(WardenError::Storage("disk I/O error".to_string()));
        }
        self.inner.append(entry)
    }
}

struct Harness {
    _dir: TempDir,
    services: Services,
    calls: Arc<AtomicUsize>,
    fail_executed: Arc<AtomicBool>,
    panic_on_policy: Arc<AtomicBool>,
    steal_on_policy: Arc<AtomicBool>,
    fail_all: Arc<AtomicBool>,
}

impl Harness {
    fn new() -> Self {
        Self::with_config(WardenConfig::default())
    }

    fn with_config(config: WardenConfig) -> Self {
        let dir = TempDir::new().unwrap();
        let db = Arc::new(Database::new(&dir.path().join("warden.db")).unwrap());
        let calls = Arc::new(AtomicUsize::new(0));
        let fail_executed = Arc::new(AtomicBool::new(false));
        let panic_on_policy = Arc::new(AtomicBool::new(false));
        let steal_on_policy = Arc::new(AtomicBool::new(false));
        let fail_all = Arc::new(AtomicBool::new(false));

        let sink = ControlledSink {
            db: Arc::clone(&db),
            inner: AuditRepository::new(Arc::clone(&db)),
            fail_executed: Arc::clone(&fail_executed),
            panic_on_policy: Arc::clone(&panic_on_policy),
            steal_on_policy: Arc::clone(&steal_on_policy),
            fail_all: Arc::clone(&fail_all),
        };
        let handlers: Vec<Arc<dyn WorkflowHandler>> = vec![
            Arc::new(CountingWorkflow {
                calls: Arc::clone(&calls),
            }),
            Arc::new(PanickingWorkflow),
        ];
        let services =
            Services::with_audit_sink(&config, db, handlers, Box::new(sink)).unwrap();

        Self {
            _dir: dir,
            services,
            calls,
            fail_executed,
            panic_on_policy,
            steal_on_policy,
            fail_all,
        }
    }

    fn submit(&self, new: NewIntent) -> uuid::Uuid {
        self.services.queue.enqueue(new).unwrap().id
    }

    fn status(&self, id: uuid::Uuid) -> IntentStatus {
        self.services.queue.get(id).unwrap().unwrap().status
    }

    fn actions(&self, entity_id: impl ToString) -> Vec<AuditAction> {
        self.entries(entity_id).into_iter().map(|e| e.action).collect()
    }

    fn entries(&self, entity_id: impl ToString) -> Vec<AuditEntry> {
        self.services
            .audit
            .list(&AuditFilter {
                entity_id: Some(entity_id.to_string()),
                ..AuditFilter::default()
            })
            .unwrap()
    }
}

fn counted(tenant: &str, spend: Option<f64>) -> NewIntent {
    NewIntent {
        tenant_id: tenant.to_string(),
        actor: None,
        payload: IntentPayload::EngineRun {
            workflow: WorkflowRef::Key("test.count".to_string()),
            input: json!({"report": "weekly"}),
        },
        data_class: None,
        spend_usd: spend,
    }
}

// =============================================================================
// Scenarios
// =============================================================================

#[tokio::test]
async fn high_spend_is_reviewed_approved_and_executed() {
    let h = Harness::new();
    let engine = h.services.engine("w-1");
    let id = h.submit(counted("acme", Some(500.0)));

    let report = engine.tick().await;
    assert!(report.ran);
    assert_eq!(report.status, Some(IntentStatus::AwaitingHuman));
    assert_eq!(h.calls.load(Ordering::SeqCst), 0);

    let pending = h.services.memos.list_pending(Some("acme")).unwrap();
    assert_eq!(pending.len(), 1);
    let memo = &pending[0];
    assert_eq!(memo.intent_id, Some(id));
    assert_eq!(memo.risk_tier, 2);
    assert_eq!(memo.rationale, "spend_threshold");
    assert!(memo.requires_approval);

    h.services.memos.approve(memo.id, "ops@acme").unwrap();
    assert_eq!(h.status(id), IntentStatus::Draft);

    let report = engine.tick().await;
    assert_eq!(report.status, Some(IntentStatus::Executed));
    assert_eq!(h.calls.load(Ordering::SeqCst), 1);
    assert_eq!(
        h.services.memos.get(memo.id).unwrap().status,
        MemoStatus::Executed
    );

    let intent = h.services.queue.get(id).unwrap().unwrap();
    assert_eq!(intent.sgl_result, Some(Decision::Review));
    assert_eq!(intent.approved_memo_id, Some(memo.id));
    assert_eq!(intent.attempts, 2);

    let actions = h.actions(id);
    assert_eq!(
        actions,
        vec![
            AuditAction::IntentCreated,
            AuditAction::IntentClaimed,
            AuditAction::PolicyDecision,
            AuditAction::AwaitingHumanApproval,
            AuditAction::IntentRequeued,
            AuditAction::IntentClaimed,
            AuditAction::PolicyDecision,
            AuditAction::Executed,
        ]
    );
    let memo_actions = h.actions(memo.id);
    assert_eq!(
        memo_actions,
        vec![
            AuditAction::DecisionMemoCreated,
            AuditAction::MemoApproved,
            AuditAction::MemoExecuted,
        ]
    );
}

#[tokio::test]
async fn non_executor_actor_is_blocked_without_running() {
    let h = Harness::new();
    let mut new = counted("acme", Some(1.0));
    new.actor = Some("SUBROUTINE".to_string());
    let id = h.submit(new);

    let report = h.services.engine("w-1").tick().await;
    assert_eq!(report.status, Some(IntentStatus::BlockedSgl));
    assert_eq!(h.status(id), IntentStatus::BlockedSgl);
    assert_eq!(h.calls.load(Ordering::SeqCst), 0);

    let entries = h.entries(id);
    let decision = entries
        .iter()
        .find(|e| e.action == AuditAction::PolicyDecision)
        .unwrap();
    assert_eq!(decision.level, AuditLevel::Security);
    assert_eq!(decision.meta["reasons"][0], "actor_not_executor");

    let blocked = entries.last().unwrap();
    assert_eq!(blocked.action, AuditAction::ExecutionBlocked);
    assert_eq!(blocked.level, AuditLevel::Security);
}

#[tokio::test]
async fn unregistered_workflow_fails_with_not_found() {
    let h = Harness::new();
    let id = h.submit(NewIntent {
        payload: IntentPayload::EngineRun {
            workflow: WorkflowRef::Id("WF-999".to_string()),
            input: json!({}),
        },
        ..counted("acme", Some(0.0))
    });

    let report = h.services.engine("w-1").tick().await;
    assert_eq!(report.status, Some(IntentStatus::Failed));
    assert!(report.error.is_none());

    let intent = h.services.queue.get(id).unwrap().unwrap();
    assert_eq!(intent.sgl_result, Some(Decision::Allow));
    assert!(intent.last_error.unwrap().starts_with("WORKFLOW_NOT_FOUND"));

    let entries = h.entries(id);
    assert!(entries
        .iter()
        .any(|e| e.action == AuditAction::WorkflowNotFound));
    let failed = entries.last().unwrap();
    assert_eq!(failed.action, AuditAction::Failed);
    assert_eq!(failed.meta["code"], "WORKFLOW_NOT_FOUND");
}

#[tokio::test]
async fn blocked_browser_step_rejects_whole_session() {
    let h = Harness::new();
    let id = h.submit(NewIntent {
        payload: IntentPayload::BrowserTask {
            session_id: "sess-1".to_string(),
            steps: vec![
                BrowserActionStep::new("navigate").with_target("https://bank.example/login"),
                BrowserActionStep::new("type").with_description("enter password"),
            ],
        },
        ..counted("acme", Some(0.0))
    });

    let report = h.services.engine("w-1").tick().await;
    assert_eq!(report.status, Some(IntentStatus::BlockedSgl));

    let decision = h
        .entries(id)
        .into_iter()
        .find(|e| e.action == AuditAction::PolicyDecision)
        .unwrap();
    assert_eq!(decision.meta["reasons"][0], "browser_step_blocked");
    assert!(!h.actions(id).contains(&AuditAction::Executed));
}

#[tokio::test]
async fn racing_workers_claim_once() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("warden.db");
    let config = WardenConfig::default();

    let first = Services::new(&config, Arc::new(Database::new(&path).unwrap())).unwrap();
    let second = Services::new(&config, Arc::new(Database::new(&path).unwrap())).unwrap();
    let id = first
        .queue
        .enqueue(NewIntent {
            payload: IntentPayload::EngineRun {
                workflow: WorkflowRef::Key("noop.echo".to_string()),
                input: json!({}),
            },
            ..counted("acme", Some(0.0))
        })
        .unwrap()
        .id;

    let engine_a = first.engine("w-a");
    let engine_b = second.engine("w-b");
    let (a, b) = tokio::join!(engine_a.tick(), engine_b.tick());
    let winners: Vec<_> = [&a, &b].into_iter().filter(|r| r.ran).collect();
    assert_eq!(winners.len(), 1);
    assert_eq!(winners[0].intent_id, Some(id));

    let claims = first
        .audit
        .list(&AuditFilter {
            entity_id: Some(id.to_string()),
            action: Some(AuditAction::IntentClaimed),
            ..AuditFilter::default()
        })
        .unwrap();
    assert_eq!(claims.len(), 1);
}

/// Services on their own connection with the slow handler registered.
fn slow_services(config: &WardenConfig, path: &Path, calls: &Arc<AtomicUsize>) -> Services {
    let handlers: Vec<Arc<dyn WorkflowHandler>> = vec![Arc::new(SlowWorkflow {
        calls: Arc::clone(calls),
    })];
    Services::with_handlers(config, Arc::new(Database::new(path).unwrap()), handlers).unwrap()
}

#[tokio::test]
async fn slow_handler_keeps_its_lease() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("warden.db");
    let mut config = WardenConfig::default();
    config.queue.lease_secs = 1;
    let calls = Arc::new(AtomicUsize::new(0));

    let first = slow_services(&config, &path, &calls);
    let second = slow_services(&config, &path, &calls);
    let id = first
        .queue
        .enqueue(NewIntent {
            payload: IntentPayload::EngineRun {
                workflow: WorkflowRef::Key("test.slow".to_string()),
                input: json!({"sleep_ms": 3500}),
            },
            ..counted("acme", Some(0.0))
        })
        .unwrap()
        .id;

    let engine_a = first.engine("w-a");
    let engine_b = second.engine("w-b");
    // B polls well after A's original lease has run out.
    let (a, b) = tokio::join!(engine_a.tick(), async {
        tokio::time::sleep(Duration::from_millis(2300)).await;
        engine_b.tick().await
    });

    assert_eq!(a.intent_id, Some(id));
    assert_eq!(a.status, Some(IntentStatus::Executed));
    assert!(a.error.is_none());
    assert!(!b.ran);
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let intent = first.queue.get(id).unwrap().unwrap();
    assert_eq!(intent.status, IntentStatus::Executed);
    assert_eq!(intent.attempts, 1);
}

#[tokio::test]
async fn claim_lost_before_review_raises_no_memo() {
    let h = Harness::new();
    let id = h.submit(counted("acme", Some(500.0)));

    h.steal_on_policy.store(true, Ordering::SeqCst);
    let report = h.services.engine("w-1").tick().await;
    assert_eq!(report.intent_id, Some(id));
    assert_eq!(report.status, None);
    assert!(report.error.unwrap().contains("lost"));

    let memos = MemoRepository::new(Arc::clone(&h.services.db))
        .list(&MemoFilter::default())
        .unwrap();
    assert!(memos.is_empty());

    // The new owner still holds it.
    let intent = h.services.queue.get(id).unwrap().unwrap();
    assert_eq!(intent.status, IntentStatus::Validating);
    assert_eq!(intent.claimed_by.as_deref(), Some("w-other"));
    assert!(!h.actions(id).contains(&AuditAction::AwaitingHumanApproval));
}

// =============================================================================
// Memo resolution
// =============================================================================

#[tokio::test]
async fn rejected_memo_fails_intent_and_cannot_be_approved() {
    let h = Harness::new();
    let id = h.submit(NewIntent {
        payload: IntentPayload::BrokerageOrder {
            symbol: "ACME".to_string(),
            side: OrderSide::Buy,
            quantity: 10.0,
        },
        ..counted("acme", Some(90.0))
    });

    h.services.engine("w-1").tick().await;
    let memo = h.services.memos.list_pending(None).unwrap().remove(0);
    assert_eq!(memo.risk_tier, 3);
    assert_eq!(memo.rationale, "regulated_action");

    h.services
        .memos
        .reject(memo.id, "ops@acme", "not this quarter")
        .unwrap();
    assert_eq!(h.status(id), IntentStatus::Failed);

    let err = h.services.memos.approve(memo.id, "ops@acme").unwrap_err();
    assert!(matches!(
        err,
        MemoError::Conflict {
            status: MemoStatus::Rejected,
            ..
        }
    ));
    assert!(!h.services.engine("w-1").tick().await.ran);
    assert_eq!(h.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn phi_review_memo_has_top_risk_tier() {
    let h = Harness::new();
    h.submit(NewIntent {
        data_class: Some(DataClass::Phi),
        ..counted("clinic", Some(0.0))
    });

    let report = h.services.engine("w-1").tick().await;
    assert_eq!(report.status, Some(IntentStatus::AwaitingHuman));
    let memo = h.services.memos.list_pending(Some("clinic")).unwrap().remove(0);
    assert_eq!(memo.risk_tier, 3);
    assert_eq!(memo.rationale, "phi_requires_review");
}

#[tokio::test]
async fn monthly_cap_blocks_approval() {
    let mut config = WardenConfig::default();
    config.guardrails.monthly_spend_cap_usd = Some(400.0);
    let h = Harness::with_config(config);
    h.submit(counted("acme", Some(500.0)));

    h.services.engine("w-1").tick().await;
    let memo = h.services.memos.list_pending(None).unwrap().remove(0);
    let err = h.services.memos.approve(memo.id, "ops").unwrap_err();
    assert_eq!(err.code(), "guardrail_block");
    assert_eq!(
        h.services.memos.get(memo.id).unwrap().status,
        MemoStatus::Proposed
    );
}

// =============================================================================
// Failure containment
// =============================================================================

#[tokio::test]
async fn handler_panic_becomes_failed_intent() {
    let h = Harness::new();
    let id = h.submit(NewIntent {
        payload: IntentPayload::EngineRun {
            workflow: WorkflowRef::Key("test.panic".to_string()),
            input: json!({}),
        },
        ..counted("acme", Some(0.0))
    });

    let report = h.services.engine("w-1").tick().await;
    assert_eq!(report.status, Some(IntentStatus::Failed));

    let intent = h.services.queue.get(id).unwrap().unwrap();
    assert!(intent.last_error.unwrap().contains("panicked"));
    assert_eq!(h.actions(id).last(), Some(&AuditAction::Failed));
}

#[tokio::test]
async fn panic_during_processing_is_contained() {
    let h = Harness::new();
    let id = h.submit(counted("acme", Some(0.0)));
    h.panic_on_policy.store(true, Ordering::SeqCst);

    let report = h.services.engine("w-1").tick().await;
    assert!(report.ran);
    assert_eq!(report.status, Some(IntentStatus::Failed));
    assert!(report.error.unwrap().contains("audit sink crashed"));
    assert_eq!(h.status(id), IntentStatus::Failed);
    assert_eq!(h.calls.load(Ordering::SeqCst), 0);

    let failed = h.entries(id).pop().unwrap();
    assert_eq!(failed.action, AuditAction::Failed);
    assert_eq!(failed.level, AuditLevel::Error);
    assert_eq!(failed.meta["code"], "ENGINE_ERROR");
}

#[tokio::test]
async fn required_audit_failure_halts_tenant_until_resumed() {
    let h = Harness::new();
    let engine = h.services.engine("w-1");
    let first = h.submit(counted("acme", Some(0.0)));
    let second = h.submit(counted("acme", Some(0.0)));
    let other = h.submit(counted("globex", Some(0.0)));

    h.fail_executed.store(true, Ordering::SeqCst);
    let report = engine.tick().await;
    assert_eq!(report.intent_id, Some(first));
    assert!(report.error.is_some());
    assert!(h.services.ledger.is_halted("acme"));
    h.fail_executed.store(false, Ordering::SeqCst);

    let report = engine.tick().await;
    assert_eq!(report.intent_id, Some(other));
    assert!(!engine.tick().await.ran);
    assert_eq!(h.status(second), IntentStatus::Draft);

    assert!(h.services.ledger.resume_tenant("acme", "ops@acme").unwrap());
    let report = engine.tick().await;
    assert_eq!(report.intent_id, Some(second));
    assert_eq!(report.status, Some(IntentStatus::Executed));
}

#[tokio::test]
async fn every_terminal_status_is_audited() {
    let h = Harness::new();
    let engine = h.services.engine("w-1");

    let executed = h.submit(counted("acme", Some(1.0)));
    let mut blocked = counted("acme", Some(1.0));
    blocked.actor = Some("intruder".to_string());
    let blocked = h.submit(blocked);
    let failed = h.submit(NewIntent {
        payload: IntentPayload::EngineRun {
            workflow: WorkflowRef::Key("missing.flow".to_string()),
            input: json!({}),
        },
        ..counted("acme", Some(1.0))
    });

    while engine.tick().await.ran {}

    for (id, status, action) in [
        (executed, IntentStatus::Executed, AuditAction::Executed),
        (blocked, IntentStatus::BlockedSgl, AuditAction::ExecutionBlocked),
        (failed, IntentStatus::Failed, AuditAction::Failed),
    ] {
        assert_eq!(h.status(id), status);
        assert_eq!(AuditAction::for_status(status), action);
        assert_eq!(h.actions(id).last(), Some(&action), "intent {}", id);
    }
}

#[tokio::test]
async fn chat_call_runs_builtin_handler() {
    let h = Harness::new();
    let id = h.submit(NewIntent {
        payload: IntentPayload::ChatCall {
            agent_id: "planner".to_string(),
            prompt: "draft the weekly summary".to_string(),
        },
        ..counted("acme", Some(0.5))
    });

    let report = h.services.engine("w-1").tick().await;
    assert_eq!(report.status, Some(IntentStatus::Executed));
    let executed = h.entries(id).pop().unwrap();
    assert_eq!(executed.meta["output"]["agent_id"], "planner");
    assert_eq!(executed.meta["workflow_id"], "chat.call");
}

#[tokio::test]
async fn approval_survives_failed_audit_and_runs_after_resume() {
    let h = Harness::new();
    let engine = h.services.engine("w-1");
    let id = h.submit(counted("acme", Some(500.0)));
    assert_eq!(engine.tick().await.status, Some(IntentStatus::AwaitingHuman));
    let memo = h.services.memos.list_pending(Some("acme")).unwrap().remove(0);

    // Every audit write fails while the approval is recorded.
    h.fail_all.store(true, Ordering::SeqCst);
    let err = h.services.memos.approve(memo.id, "ops@acme").unwrap_err();
    assert_eq!(err.code(), "audit_escalated");
    h.fail_all.store(false, Ordering::SeqCst);

    assert_eq!(h.services.memos.get(memo.id).unwrap().status, MemoStatus::Approved);
    assert_eq!(h.status(id), IntentStatus::Draft);
    assert!(!engine.tick().await.ran);

    assert!(h.services.ledger.resume_tenant("acme", "ops@acme").unwrap());
    let report = engine.tick().await;
    assert_eq!(report.status, Some(IntentStatus::Executed));
    assert_eq!(h.calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.services.memos.get(memo.id).unwrap().status, MemoStatus::Executed);
}

