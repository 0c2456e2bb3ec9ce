//! Policy gate: decides ALLOW, REVIEW, or BLOCK for a claimed intent.
//!
//! Rules are checked in a fixed order and the first match wins. Evaluation
//! reads only the intent and the configuration it was built with.

use std::sync::Arc;

use warden_core::config::{PolicyConfig, UnknownSpend};
use warden_core::types::{DataClass, Decision, Intent, PolicyDecision, PolicyRule};

use crate::risk::{RiskClassifier, SessionVerdict};

#[derive(Clone)]
pub struct PolicyGate {
    config: PolicyConfig,
    classifier: Arc<RiskClassifier>,
}

impl PolicyGate {
    pub fn new(config: PolicyConfig, classifier: Arc<RiskClassifier>) -> Self {
        Self { config, classifier }
    }

    pub fn executor_identity(&self) -> &str {
        &self.config.executor_identity
    }

    pub fn classifier(&self) -> &RiskClassifier {
        &self.classifier
    }

    /// Evaluate an intent against the ordered rule set.
    pub fn evaluate(&self, intent: &Intent) -> PolicyDecision {
        if intent.actor != self.config.executor_identity {
            return PolicyDecision::block(PolicyRule::ActorNotExecutor);
        }

        let session = intent
            .payload
            .browser_steps()
            .map(|steps| self.classifier.validate_session(steps));

        if matches!(session, Some(SessionVerdict::Rejected { .. })) {
            return PolicyDecision::block(PolicyRule::BrowserStepBlocked);
        }
        if intent.data_class == DataClass::Phi {
            return PolicyDecision::review(PolicyRule::PhiRequiresReview);
        }
        if intent.intent_type().is_regulated() {
            return PolicyDecision::review(PolicyRule::RegulatedAction);
        }
        if intent.spend_usd >= self.config.review_spend_threshold_usd {
            return PolicyDecision::review(PolicyRule::SpendThreshold);
        }
        if matches!(session, Some(SessionVerdict::NeedsApproval { .. })) {
            return PolicyDecision::review(PolicyRule::BrowserHighRisk);
        }
        if !intent.spend_reported && self.config.unknown_spend == UnknownSpend::Review {
            return PolicyDecision::review(PolicyRule::SpendUnreported);
        }

        PolicyDecision::allow()
    }

    /// Risk tier (1-3) recorded on the decision memo raised for a REVIEW.
    pub fn review_risk_tier(&self, intent: &Intent, decision: &PolicyDecision) -> u8 {
        if decision.decision != Decision::Review {
            return 1;
        }
        if let Some(steps) = intent.payload.browser_steps() {
            return self.classifier.session_risk_tier(steps);
        }
        if intent.data_class == DataClass::Phi || intent.intent_type().is_regulated() {
            return 3;
        }
        2
    }
}
