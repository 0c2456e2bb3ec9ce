//! Warden Engine - governed execution of agent intents.
//!
//! Pipeline: queue -> claim -> policy gate -> (decision memo | dispatch) ->
//! audit. The risk classifier and policy gate are pure; everything with side
//! effects goes through the storage repositories and the audit ledger.

pub mod audit;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod lifecycle;
pub mod memo;
pub mod policy;
pub mod queue;
pub mod risk;
pub mod services;
pub mod worker;

pub use audit::{AuditLedger, AuditSink, AuditTier};
pub use dispatch::{
    Dispatcher, ResolvedWorkflow, WorkflowContext, WorkflowHandler, WorkflowOutcome,
    WorkflowRegistry,
};
pub use engine::{Engine, TickReport};
pub use error::{AuditError, DispatchError, EngineError, LifecycleError, MemoError, WorkflowError};
pub use memo::{Guardrail, GuardrailViolation, MemoService, MonthlySpendCap};
pub use policy::PolicyGate;
pub use queue::IntentQueue;
pub use risk::{RiskClassifier, SessionVerdict};
pub use services::Services;
pub use worker::{Worker, WorkerStats};
