//! Handlers shipped with the engine.
//!
//! None of these touch the outside world. `browser.session` and `chat.call`
//! stage their work for an external runner and report what was staged.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tracing::info;

use warden_core::types::{workflow_keys, BrowserActionStep};

use super::{WorkflowContext, WorkflowHandler, WorkflowOutcome};
use crate::error::WorkflowError;
use crate::risk::{RiskClassifier, SessionVerdict};

/// `noop.echo`: returns its input unchanged.
pub struct EchoWorkflow;

#[async_trait]
impl WorkflowHandler for EchoWorkflow {
    fn key(&self) -> &str {
        "noop.echo"
    }

    async fn run(&self, ctx: WorkflowContext) -> Result<WorkflowOutcome, WorkflowError> {
        Ok(WorkflowOutcome::success("echo", Some(ctx.input)))
    }
}

/// `chat.call`: stages a prompt for the named agent.
pub struct ChatCallWorkflow;

#[async_trait]
impl WorkflowHandler for ChatCallWorkflow {
    fn key(&self) -> &str {
        workflow_keys::CHAT_CALL
    }

    async fn run(&self, ctx: WorkflowContext) -> Result<WorkflowOutcome, WorkflowError> {
        let prompt = ctx
            .input
            .get("prompt")
            .and_then(|v| v.as_str())
            .unwrap_or("");
        if prompt.trim().is_empty() {
            return Err(WorkflowError::InvalidInput(
                "prompt must not be empty".to_string(),
            ));
        }
        let agent = ctx.agent_id.as_deref().unwrap_or("default");

        info!(intent_id = %ctx.intent_id, agent = %agent, "Staged chat call");
        Ok(WorkflowOutcome::success(
            format!("Staged chat call for agent {}", agent),
            Some(json!({
                "agent_id": agent,
                "prompt_chars": prompt.chars().count(),
                "trace_id": ctx.trace_id,
            })),
        ))
    }
}

/// `browser.session`: re-validates the steps and stages them.
///
/// The policy gate already refused blocked sessions; this second check covers
/// sessions dispatched through a durable mapping or a direct engine run.
pub struct BrowserSessionWorkflow {
    classifier: Arc<RiskClassifier>,
}

impl BrowserSessionWorkflow {
    pub fn new(classifier: Arc<RiskClassifier>) -> Self {
        Self { classifier }
    }
}

#[async_trait]
impl WorkflowHandler for BrowserSessionWorkflow {
    fn key(&self) -> &str {
        workflow_keys::BROWSER_SESSION
    }

    async fn run(&self, ctx: WorkflowContext) -> Result<WorkflowOutcome, WorkflowError> {
        let steps: Vec<BrowserActionStep> = ctx
            .input
            .get("steps")
            .cloned()
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| WorkflowError::InvalidInput(format!("invalid steps: {}", e)))?
            .unwrap_or_default();
        if steps.is_empty() {
            return Err(WorkflowError::InvalidInput(
                "browser session has no steps".to_string(),
            ));
        }
        let session_id = ctx
            .input
            .get("session_id")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string();

        let risk_tier = match self.classifier.validate_session(&steps) {
            SessionVerdict::Rejected { reason, .. } => return Err(WorkflowError::Failed(reason)),
            SessionVerdict::NeedsApproval { risk_tier, .. }
            | SessionVerdict::Allowed { risk_tier } => risk_tier,
        };

        let staged: Vec<_> = steps
            .iter()
            .map(|s| json!({"type": s.action_type, "risk": self.classifier.classify(s)}))
            .collect();

        info!(
            intent_id = %ctx.intent_id,
            session_id = %session_id,
            steps = steps.len(),
            risk_tier,
            "Staged browser session"
        );
        Ok(WorkflowOutcome::success(
            format!("Staged {} browser steps", steps.len()),
            Some(json!({
                "session_id": session_id,
                "risk_tier": risk_tier,
                "steps": staged,
            })),
        ))
    }
}
