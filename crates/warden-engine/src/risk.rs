//! Browser step risk classification.
//!
//! Maps each proposed browser step to `low`, `medium`, `high`, or `blocked`.
//! Classification is total: unknown step types default to `medium`.

use regex::Regex;
use serde::Serialize;

use warden_core::error::WardenError;
use warden_core::sensitive::contains_sensitive_number;
use warden_core::types::{BrowserActionStep, RiskLevel};

/// Outcome of validating a whole browser session before it may start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum SessionVerdict {
    /// Every step is low or medium risk.
    Allowed { risk_tier: u8 },
    /// At least one step is high risk and needs in-session approval.
    NeedsApproval { risk_tier: u8, step_index: usize },
    /// A step touches blocked data; the session must not start.
    Rejected { step_index: usize, reason: String },
}

/// Compiled pattern sets, built once and shared read-only.
pub struct RiskClassifier {
    blocked: Vec<Regex>,
    destructive: Vec<Regex>,
    search: Vec<Regex>,
}

impl Default for RiskClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl RiskClassifier {
    /// Create a classifier with the built-in pattern sets.
    pub fn new() -> Self {
        // =====================================================================
        // Blocked: credentials and payment or identity data
        // =====================================================================
        let blocked_patterns = [
            r"(?i)pass(?:word|wd|code|phrase)",
            r"(?i)credit[\s_-]*card",
            r"(?i)card[\s_-]*(?:number|num\b|no\b)",
            r"(?i)(?:^|[^a-z0-9])(?:cvv2?|cvc|csc)(?:[^a-z0-9]|$)",
            r"(?i)security[\s_-]*code",
            r"(?i)(?:^|[^a-z0-9])ssn(?:[^a-z0-9]|$)",
            r"(?i)social[\s_-]*security",
            r"(?i)account[\s_-]*(?:number|num\b|no\b)",
            r"(?i)routing[\s_-]*(?:number|num\b|no\b)",
            r"(?i)\biban\b",
            r"(?i)(?:^|[^a-z0-9])pin(?:[^a-z0-9]|$)",
            r"(?i)\b(?:api|secret|private)[\s_-]*key\b",
            r"(?i)\b(?:2fa|otp|mfa)\b",
            r"(?i)one[\s_-]*time[\s_-]*code",
        ];

        // =====================================================================
        // Destructive verbs (click)
        // =====================================================================
        let destructive_patterns = [
            r"(?i)\b(?:delete|remove|erase|destroy)\b",
            r"(?i)\b(?:purchase|buy|checkout|check\s+out|place\s+order|order)\b",
            r"(?i)\b(?:pay|payment|transfer|withdraw)\b",
            r"(?i)\b(?:confirm|submit|approve|authorize|sign)\b",
            r"(?i)\b(?:publish|post|send|share)\b",
            r"(?i)\b(?:cancel|unsubscribe|deactivate|terminate|close\s+account)\b",
        ];

        // =====================================================================
        // Search and filter input (type)
        // =====================================================================
        let search_patterns = [r"(?i)\b(?:search|filter|query|find|look\s*up|keyword|sort)\b"];

        Self {
            blocked: compile(&blocked_patterns),
            destructive: compile(&destructive_patterns),
            search: compile(&search_patterns),
        }
    }

    /// Built-in patterns plus operator-supplied blocklist entries.
    pub fn with_extra_blocked(patterns: &[String]) -> Result<Self, WardenError> {
        let mut classifier = Self::new();
        for pattern in patterns {
            let regex = Regex::new(pattern).map_err(|e| {
                WardenError::Config(format!("Invalid blocked pattern '{}': {}", pattern, e))
            })?;
            classifier.blocked.push(regex);
        }
        Ok(classifier)
    }

    /// Classify one step. Blocked data wins over every other rule.
    pub fn classify(&self, step: &BrowserActionStep) -> RiskLevel {
        let fields = [
            step.action_type.as_str(),
            step.target.as_str(),
            step.value.as_str(),
            step.description.as_str(),
        ];
        if fields.iter().any(|f| matches_any(&self.blocked, f))
            || contains_sensitive_number(&step.value)
            || contains_sensitive_number(&step.description)
        {
            return RiskLevel::Blocked;
        }

        let text = format!("{} {} {}", step.target, step.value, step.description);
        match step.action_type.trim().to_ascii_lowercase().as_str() {
            "navigate" | "screenshot" | "scroll" | "extract" => RiskLevel::Low,
            "click" => {
                if matches_any(&self.destructive, &text) {
                    RiskLevel::High
                } else {
                    RiskLevel::Low
                }
            }
            "type" => {
                if matches_any(&self.search, &text) {
                    RiskLevel::Low
                } else {
                    RiskLevel::Medium
                }
            }
            "submit" => RiskLevel::High,
            _ => RiskLevel::Medium,
        }
    }

    /// Worst-case tier (1-3) for a set of steps. Empty sets are tier 1.
    pub fn session_risk_tier(&self, steps: &[BrowserActionStep]) -> u8 {
        steps
            .iter()
            .map(|s| self.classify(s))
            .max()
            .map(|level| level.tier())
            .unwrap_or(1)
    }

    /// Decide whether a browser session may start at all.
    pub fn validate_session(&self, steps: &[BrowserActionStep]) -> SessionVerdict {
        let mut worst = RiskLevel::Low;
        let mut first_high = None;

        for (index, step) in steps.iter().enumerate() {
            let level = self.classify(step);
            if level == RiskLevel::Blocked {
                return SessionVerdict::Rejected {
                    step_index: index,
                    reason: format!(
                        "step {} ({}) touches blocked data",
                        index,
                        step.action_type.trim()
                    ),
                };
            }
            if level == RiskLevel::High && first_high.is_none() {
                first_high = Some(index);
            }
            worst = worst.max(level);
        }

        match first_high {
            Some(step_index) => SessionVerdict::NeedsApproval {
                risk_tier: worst.tier(),
                step_index,
            },
            None => SessionVerdict::Allowed {
                risk_tier: worst.tier(),
            },
        }
    }
}

fn compile(patterns: &[&str]) -> Vec<Regex> {
    patterns
        .iter()
        .map(|p| Regex::new(p).expect("built-in risk pattern must compile"))
        .collect()
}

fn matches_any(set: &[Regex], text: &str) -> bool {
    set.iter().any(|r| r.is_match(text))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify(step: BrowserActionStep) -> RiskLevel {
        RiskClassifier::new().classify(&step)
    }

    // =====================================================================
    // Blocklist
    // =====================================================================

    #[test]
    fn test_password_entry_blocked() {
        let step = BrowserActionStep::new("type").with_description("enter password");
        assert_eq!(classify(step), RiskLevel::Blocked);
    }

    #[test]
    fn test_blocked_wins_over_low_types() {
        let step = BrowserActionStep::new("navigate").with_target("https://bank/ssn-lookup");
        assert_eq!(classify(step), RiskLevel::Blocked);

        let step = BrowserActionStep::new("screenshot").with_description("capture CVV field");
        assert_eq!(classify(step), RiskLevel::Blocked);
    }

    #[test]
    fn test_blocked_field_names() {
        for target in [
            "#cardNumber",
            "input[name=card_number]",
            "#routing-number",
            "account_number",
            "#user_pin",
            "Social Security",
            "api_key",
        ] {
            let step = BrowserActionStep::new("type").with_target(target);
            assert_eq!(classify(step), RiskLevel::Blocked, "target {}", target);
        }
    }

    #[test]
    fn test_raw_card_number_value_blocked() {
        let step = BrowserActionStep::new("type")
            .with_target("#field-7")
            .with_value("4111 1111 1111 1111");
        assert_eq!(classify(step), RiskLevel::Blocked);
    }

    #[test]
    fn test_card_number_with_expiry_blocked() {
        let step = BrowserActionStep::new("type")
            .with_target("#field-7")
            .with_value("4111111111111111 12/25");
        assert_eq!(classify(step), RiskLevel::Blocked);
    }

    #[test]
    fn test_raw_ssn_value_blocked() {
        let step = BrowserActionStep::new("type")
            .with_target("#field-3")
            .with_value("078-05-1120");
        assert_eq!(classify(step), RiskLevel::Blocked);
    }

    #[test]
    fn test_words_containing_pin_not_blocked() {
        let step = BrowserActionStep::new("click").with_target("Open shopping list");
        assert_eq!(classify(step), RiskLevel::Low);
        let step = BrowserActionStep::new("click").with_target("spinner");
        assert_eq!(classify(step), RiskLevel::Low);
    }

    // =====================================================================
    // Per-type rules
    // =====================================================================

    #[test]
    fn test_read_only_types_low() {
        for kind in ["navigate", "screenshot", "scroll", "extract", "NAVIGATE"] {
            assert_eq!(classify(BrowserActionStep::new(kind)), RiskLevel::Low);
        }
    }

    #[test]
    fn test_click_destructive_high() {
        for label in ["Delete account", "Buy now", "Confirm", "Pay $20", "Publish post"] {
            let step = BrowserActionStep::new("click").with_target(label);
            assert_eq!(classify(step), RiskLevel::High, "label {}", label);
        }
    }

    #[test]
    fn test_click_benign_low() {
        let step = BrowserActionStep::new("click")
            .with_target("a.next-page")
            .with_description("go to page 2");
        assert_eq!(classify(step), RiskLevel::Low);
    }

    #[test]
    fn test_type_search_low_else_medium() {
        let search = BrowserActionStep::new("type")
            .with_target("#search")
            .with_value("standing desk");
        assert_eq!(classify(search), RiskLevel::Low);

        let message = BrowserActionStep::new("type")
            .with_target("#message")
            .with_value("hello there");
        assert_eq!(classify(message), RiskLevel::Medium);
    }

    #[test]
    fn test_submit_high() {
        assert_eq!(classify(BrowserActionStep::new("submit")), RiskLevel::High);
    }

    #[test]
    fn test_unknown_type_medium() {
        assert_eq!(classify(BrowserActionStep::new("hover")), RiskLevel::Medium);
        assert_eq!(classify(BrowserActionStep::new("")), RiskLevel::Medium);
    }

    // =====================================================================
    // Sessions
    // =====================================================================

    #[test]
    fn test_session_risk_tier() {
        let classifier = RiskClassifier::new();
        assert_eq!(classifier.session_risk_tier(&[]), 1);
        assert_eq!(
            classifier.session_risk_tier(&[BrowserActionStep::new("navigate")]),
            1
        );
        assert_eq!(
            classifier.session_risk_tier(&[
                BrowserActionStep::new("navigate"),
                BrowserActionStep::new("type").with_target("#comment"),
            ]),
            2
        );
        assert_eq!(
            classifier.session_risk_tier(&[
                BrowserActionStep::new("navigate"),
                BrowserActionStep::new("type").with_description("enter password"),
            ]),
            3
        );
        assert_eq!(
            classifier.session_risk_tier(&[BrowserActionStep::new("submit")]),
            3
        );
    }

    #[test]
    fn test_validate_session_rejects_before_navigation() {
        let classifier = RiskClassifier::new();
        let steps = vec![
            BrowserActionStep::new("navigate").with_target("https://example.com/login"),
            BrowserActionStep::new("type").with_description("enter password"),
        ];
        match classifier.validate_session(&steps) {
            SessionVerdict::Rejected { step_index, reason } => {
                assert_eq!(step_index, 1);
                assert!(reason.contains("blocked"));
            }
            other => panic!("expected rejection, got {:?}", other),
        }
    }

    #[test]
    fn test_validate_session_needs_approval_for_high() {
        let classifier = RiskClassifier::new();
        let steps = vec![
            BrowserActionStep::new("navigate"),
            BrowserActionStep::new("click").with_target("Place order"),
        ];
        assert_eq!(
            classifier.validate_session(&steps),
            SessionVerdict::NeedsApproval {
                risk_tier: 3,
                step_index: 1
            }
        );
    }

    #[test]
    fn test_validate_session_allowed() {
        let classifier = RiskClassifier::new();
        let steps = vec![
            BrowserActionStep::new("navigate"),
            BrowserActionStep::new("type")
                .with_target("#q")
                .with_description("search box"),
            BrowserActionStep::new("extract"),
        ];
        assert_eq!(
            classifier.validate_session(&steps),
            SessionVerdict::Allowed { risk_tier: 1 }
        );
    }

    #[test]
    fn test_extra_blocked_patterns() {
        let classifier =
            RiskClassifier::with_extra_blocked(&["(?i)tax[\\s_-]*id".to_string()]).unwrap();
        let step = BrowserActionStep::new("type").with_target("#tax_id");
        assert_eq!(classifier.classify(&step), RiskLevel::Blocked);

        assert!(RiskClassifier::with_extra_blocked(&["(unclosed".to_string()]).is_err());
    }
}
