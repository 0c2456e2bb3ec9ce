//! Workflow registry and dispatcher.
//!
//! Handlers are registered once at start-up under a canonical key. A
//! `WorkflowRef` resolves against the live registry first, then against the
//! durable `workflows` table, which maps stable ids and keys onto a
//! registered handler.

pub mod builtin;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};
use uuid::Uuid;

use warden_core::types::WorkflowRef;
use warden_storage::WorkflowRepository;

use crate::error::{DispatchError, WorkflowError};

/// Everything a handler is told about the run it performs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowContext {
    pub tenant_id: String,
    pub requested_by: String,
    pub agent_id: Option<String>,
    pub workflow_id: String,
    pub input: serde_json::Value,
    pub trace_id: Uuid,
    pub intent_id: Uuid,
}

/// Result of a workflow run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowOutcome {
    pub ok: bool,
    pub message: Option<String>,
    pub output: Option<serde_json::Value>,
}

impl WorkflowOutcome {
    pub fn success(message: impl Into<String>, output: Option<serde_json::Value>) -> Self {
        Self {
            ok: true,
            message: Some(message.into()),
            output,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            message: Some(message.into()),
            output: None,
        }
    }
}

/// A unit of work the engine may run once an intent is allowed.
#[async_trait]
pub trait WorkflowHandler: Send + Sync {
    /// Canonical key this handler is registered under.
    fn key(&self) -> &str;

    async fn run(&self, ctx: WorkflowContext) -> Result<WorkflowOutcome, WorkflowError>;
}

/// Immutable after start-up; shared behind an `Arc`.
#[derive(Default)]
pub struct WorkflowRegistry {
    handlers: HashMap<String, Arc<dyn WorkflowHandler>>,
    ids: HashMap<String, String>,
}

impl WorkflowRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the handlers shipped in this crate.
    pub fn with_builtins(classifier: Arc<crate::risk::RiskClassifier>) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(builtin::EchoWorkflow));
        registry.register(Arc::new(builtin::ChatCallWorkflow));
        registry.register(Arc::new(builtin::BrowserSessionWorkflow::new(classifier)));
        registry
    }

    /// Register a handler under its key. A later registration replaces an
    /// earlier one with the same key.
    pub fn register(&mut self, handler: Arc<dyn WorkflowHandler>) {
        let key = handler.key().to_string();
        if self.handlers.insert(key.clone(), handler).is_some() {
            warn!(key = %key, "Replaced workflow handler");
        }
    }

    /// Give a registered handler a stable id.
    pub fn register_id(&mut self, id: impl Into<String>, key: impl Into<String>) {
        self.ids.insert(id.into(), key.into());
    }

    pub fn get(&self, key: &str) -> Option<Arc<dyn WorkflowHandler>> {
        self.handlers.get(key).cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.handlers.contains_key(key)
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.handlers.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Look up a reference in the live registry only.
    pub fn lookup(&self, workflow: &WorkflowRef) -> Option<(String, Arc<dyn WorkflowHandler>)> {
        let key = match workflow {
            WorkflowRef::Key(key) => key.as_str(),
            WorkflowRef::Id(id) => self.ids.get(id)?.as_str(),
        };
        self.get(key).map(|h| (workflow.value().to_string(), h))
    }
}

/// A reference resolved to a runnable handler.
#[derive(Clone)]
pub struct ResolvedWorkflow {
    /// Id recorded in the context (the stable id when known, else the key).
    pub workflow_id: String,
    pub handler: Arc<dyn WorkflowHandler>,
}

impl std::fmt::Debug for ResolvedWorkflow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedWorkflow")
            .field("workflow_id", &self.workflow_id)
            .field("handler", &self.handler.key())
            .finish()
    }
}

#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<WorkflowRegistry>,
    store: Option<WorkflowRepository>,
}

impl Dispatcher {
    pub fn new(registry: Arc<WorkflowRegistry>, store: Option<WorkflowRepository>) -> Self {
        Self { registry, store }
    }

    pub fn registry(&self) -> &WorkflowRegistry {
        &self.registry
    }

    /// Resolve a workflow reference to a handler.
    pub fn resolve(&self, workflow: &WorkflowRef) -> Result<ResolvedWorkflow, DispatchError> {
        if let Some((workflow_id, handler)) = self.registry.lookup(workflow) {
            return Ok(ResolvedWorkflow {
                workflow_id,
                handler,
            });
        }

        let Some(store) = &self.store else {
            return Err(DispatchError::WorkflowNotFound(workflow.clone()));
        };
        let record = store
            .find(workflow)?
            .ok_or_else(|| DispatchError::WorkflowNotFound(workflow.clone()))?;

        match self.registry.get(&record.handler) {
            Some(handler) => {
                debug!(workflow = %workflow, handler = %record.handler, "Resolved durable workflow");
                Ok(ResolvedWorkflow {
                    workflow_id: record.id,
                    handler,
                })
            }
            None => Err(DispatchError::HandlerNotRegistered {
                workflow: workflow.clone(),
                handler: record.handler,
            }),
        }
    }

    /// Run a resolved handler in its own task.
    ///
    /// Handler errors and panics come back as `ok: false`.
    pub async fn invoke(&self, resolved: &ResolvedWorkflow, ctx: WorkflowContext) -> WorkflowOutcome {
        let handler = Arc::clone(&resolved.handler);
        let key = handler.key().to_string();
        let intent_id = ctx.intent_id;

        match tokio::spawn(async move { handler.run(ctx).await }).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => {
                warn!(intent_id = %intent_id, handler = %key, error = %e, "Workflow returned an error");
                WorkflowOutcome::failure(e.to_string())
            }
            Err(join_err) => {
                error!(intent_id = %intent_id, handler = %key, error = %join_err, "Workflow panicked");
                WorkflowOutcome::failure(format!("workflow handler '{}' panicked", key))
            }
        }
    }
}
