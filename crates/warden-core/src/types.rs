use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Result, WardenError};
use crate::events::AuditAction;

// =============================================================================
// Enums - Intent
// =============================================================================

/// Lifecycle status of an intent.
///
/// `Draft` is the queued state. `Validating` means a worker holds the claim.
/// `AwaitingHuman` is parked until its decision memo is resolved.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IntentStatus {
    Draft,
    Validating,
    AwaitingHuman,
    BlockedSgl,
    Executed,
    Failed,
}

impl IntentStatus {
    pub const ALL: [IntentStatus; 6] = [
        IntentStatus::Draft,
        IntentStatus::Validating,
        IntentStatus::AwaitingHuman,
        IntentStatus::BlockedSgl,
        IntentStatus::Executed,
        IntentStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            IntentStatus::Draft => "DRAFT",
            IntentStatus::Validating => "VALIDATING",
            IntentStatus::AwaitingHuman => "AWAITING_HUMAN",
            IntentStatus::BlockedSgl => "BLOCKED_SGL",
            IntentStatus::Executed => "EXECUTED",
            IntentStatus::Failed => "FAILED",
        }
    }

    /// No further transition is possible.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            IntentStatus::BlockedSgl | IntentStatus::Executed | IntentStatus::Failed
        )
    }
}

impl fmt::Display for IntentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IntentStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        IntentStatus::ALL
            .iter()
            .find(|st| st.as_str().eq_ignore_ascii_case(s))
            .copied()
            .ok_or_else(|| format!("Unknown intent status: {}", s))
    }
}

/// Sensitivity tag consumed by the policy gate.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DataClass {
    #[default]
    None,
    Pii,
    Phi,
}

impl DataClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataClass::None => "NONE",
            DataClass::Pii => "PII",
            DataClass::Phi => "PHI",
        }
    }
}

impl fmt::Display for DataClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataClass {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "NONE" => Ok(DataClass::None),
            "PII" => Ok(DataClass::Pii),
            "PHI" => Ok(DataClass::Phi),
            _ => Err(format!("Unknown data class: {}", s)),
        }
    }
}

/// The kind of action an intent proposes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IntentType {
    EngineRun,
    ChatCall,
    BrowserTask,
    TaxFiling,
    BankTransfer,
    BrokerageOrder,
    CryptoOrder,
}

impl IntentType {
    pub const ALL: [IntentType; 7] = [
        IntentType::EngineRun,
        IntentType::ChatCall,
        IntentType::BrowserTask,
        IntentType::TaxFiling,
        IntentType::BankTransfer,
        IntentType::BrokerageOrder,
        IntentType::CryptoOrder,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            IntentType::EngineRun => "ENGINE_RUN",
            IntentType::ChatCall => "CHAT_CALL",
            IntentType::BrowserTask => "BROWSER_TASK",
            IntentType::TaxFiling => "TAX_FILING",
            IntentType::BankTransfer => "BANK_TRANSFER",
            IntentType::BrokerageOrder => "BROKERAGE_ORDER",
            IntentType::CryptoOrder => "CRYPTO_ORDER",
        }
    }

    /// Financial and legal actions that always need a human, whatever the spend.
    pub fn is_regulated(&self) -> bool {
        matches!(
            self,
            IntentType::TaxFiling
                | IntentType::BankTransfer
                | IntentType::BrokerageOrder
                | IntentType::CryptoOrder
        )
    }
}

impl fmt::Display for IntentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IntentType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        IntentType::ALL
            .iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s))
            .copied()
            .ok_or_else(|| format!("Unknown intent type: {}", s))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderSide {
    Buy,
    Sell,
}

// =============================================================================
// Workflow references
// =============================================================================

/// Canonical workflow keys for intent types that do not name a workflow.
pub mod workflow_keys {
    pub const CHAT_CALL: &str = "chat.call";
    pub const BROWSER_SESSION: &str = "browser.session";
    pub const TAX_FILING: &str = "finance.tax_filing";
    pub const BANK_TRANSFER: &str = "finance.bank_transfer";
    pub const BROKERAGE_ORDER: &str = "finance.brokerage_order";
    pub const CRYPTO_ORDER: &str = "finance.crypto_order";
}

/// A reference to a workflow, either by stable id or by canonical key.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum WorkflowRef {
    Id(String),
    Key(String),
}

impl WorkflowRef {
    pub fn value(&self) -> &str {
        match self {
            WorkflowRef::Id(v) | WorkflowRef::Key(v) => v,
        }
    }
}

impl fmt::Display for WorkflowRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkflowRef::Id(v) => write!(f, "id:{}", v),
            WorkflowRef::Key(v) => write!(f, "key:{}", v),
        }
    }
}

impl FromStr for WorkflowRef {
    type Err = String;

    /// Parses `id:<value>` or `key:<value>`.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.split_once(':') {
            Some(("id", v)) if !v.is_empty() => Ok(WorkflowRef::Id(v.to_string())),
            Some(("key", v)) if !v.is_empty() => Ok(WorkflowRef::Key(v.to_string())),
            _ => Err(format!(
                "Invalid workflow reference '{}': expected id:<value> or key:<value>",
                s
            )),
        }
    }
}

/// A durable workflow mapping row.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorkflowRecord {
    pub id: String,
    pub key: String,
    /// Name of the live handler that runs this workflow.
    pub handler: String,
    pub description: String,
    pub created_at: Timestamp,
}

// =============================================================================
// Browser steps and risk
// =============================================================================

/// A single granular browser automation step.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrowserActionStep {
    #[serde(rename = "type")]
    pub action_type: String,
    #[serde(default)]
    pub target: String,
    #[serde(default)]
    pub value: String,
    #[serde(default)]
    pub description: String,
}

impl BrowserActionStep {
    pub fn new(action_type: impl Into<String>) -> Self {
        Self {
            action_type: action_type.into(),
            ..Self::default()
        }
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = target.into();
        self
    }

    pub fn with_value(mut self, value: impl Into<String>) -> Self {
        self.value = value.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// Risk of a single browser step. Ordered from least to most severe.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Blocked,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
            RiskLevel::Blocked => "blocked",
        }
    }

    /// Tier contribution (1-3) used for session and memo risk tiers.
    pub fn tier(&self) -> u8 {
        match self {
            RiskLevel::Low => 1,
            RiskLevel::Medium => 2,
            RiskLevel::High | RiskLevel::Blocked => 3,
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Intent payload
// =============================================================================

/// Typed payload of an intent, keyed by intent type.
///
/// Serialized as `{"intent_type": "...", "payload": {...}}` so that unknown
/// intent types fail to deserialize at the queue boundary.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "intent_type",
    content = "payload",
    rename_all = "SCREAMING_SNAKE_CASE"
)]
pub enum IntentPayload {
    EngineRun {
        workflow: WorkflowRef,
        #[serde(default)]
        input: serde_json::Value,
    },
    ChatCall {
        agent_id: String,
        prompt: String,
    },
    BrowserTask {
        session_id: String,
        steps: Vec<BrowserActionStep>,
    },
    TaxFiling {
        jurisdiction: String,
        period: String,
        amount_usd: f64,
    },
    BankTransfer {
        from_account: String,
        to_account: String,
        amount_usd: f64,
    },
    BrokerageOrder {
        symbol: String,
        side: OrderSide,
        quantity: f64,
    },
    CryptoOrder {
        asset: String,
        side: OrderSide,
        quantity: f64,
    },
}

impl IntentPayload {
    pub fn intent_type(&self) -> IntentType {
        match self {
            IntentPayload::EngineRun { .. } => IntentType::EngineRun,
            IntentPayload::ChatCall { .. } => IntentType::ChatCall,
            IntentPayload::BrowserTask { .. } => IntentType::BrowserTask,
            IntentPayload::TaxFiling { .. } => IntentType::TaxFiling,
            IntentPayload::BankTransfer { .. } => IntentType::BankTransfer,
            IntentPayload::BrokerageOrder { .. } => IntentType::BrokerageOrder,
            IntentPayload::CryptoOrder { .. } => IntentType::CryptoOrder,
        }
    }

    /// The workflow that executes this intent once allowed.
    pub fn workflow_ref(&self) -> WorkflowRef {
        let key = match self {
            IntentPayload::EngineRun { workflow, .. } => return workflow.clone(),
            IntentPayload::ChatCall { .. } => workflow_keys::CHAT_CALL,
            IntentPayload::BrowserTask { .. } => workflow_keys::BROWSER_SESSION,
            IntentPayload::TaxFiling { .. } => workflow_keys::TAX_FILING,
            IntentPayload::BankTransfer { .. } => workflow_keys::BANK_TRANSFER,
            IntentPayload::BrokerageOrder { .. } => workflow_keys::BROKERAGE_ORDER,
            IntentPayload::CryptoOrder { .. } => workflow_keys::CRYPTO_ORDER,
        };
        WorkflowRef::Key(key.to_string())
    }

    /// Input handed to the workflow handler.
    ///
    /// Engine runs pass their explicit input; every other variant passes its
    /// own fields.
    pub fn workflow_input(&self) -> serde_json::Value {
        if let IntentPayload::EngineRun { input, .. } = self {
            return input.clone();
        }
        serde_json::to_value(self)
            .ok()
            .and_then(|mut v| v.get_mut("payload").map(serde_json::Value::take))
            .unwrap_or(serde_json::Value::Null)
    }

    pub fn browser_steps(&self) -> Option<&[BrowserActionStep]> {
        match self {
            IntentPayload::BrowserTask { steps, .. } => Some(steps),
            _ => None,
        }
    }

    pub fn agent_id(&self) -> Option<&str> {
        match self {
            IntentPayload::ChatCall { agent_id, .. } => Some(agent_id),
            _ => None,
        }
    }

    /// Structural checks applied before an intent is queued.
    pub fn validate(&self) -> Result<()> {
        fn required(field: &str, value: &str) -> Result<()> {
            if value.trim().is_empty() {
                return Err(WardenError::Validation(format!(
                    "{} must not be empty",
                    field
                )));
            }
            Ok(())
        }

        fn positive(field: &str, value: f64) -> Result<()> {
            if !value.is_finite() || value <= 0.0 {
                return Err(WardenError::Validation(format!(
                    "{} must be a positive number, got {}",
                    field, value
                )));
            }
            Ok(())
        }

        match self {
            IntentPayload::EngineRun { workflow, .. } => required("workflow", workflow.value()),
            IntentPayload::ChatCall { agent_id, prompt } => {
                required("agent_id", agent_id)?;
                required("prompt", prompt)
            }
            IntentPayload::BrowserTask { session_id, steps } => {
                required("session_id", session_id)?;
                if steps.is_empty() {
                    return Err(WardenError::Validation(
                        "browser task needs at least one step".to_string(),
                    ));
                }
                for (i, step) in steps.iter().enumerate() {
                    required(&format!("steps[{}].type", i), &step.action_type)?;
                }
                Ok(())
            }
            IntentPayload::TaxFiling {
                jurisdiction,
                period,
                amount_usd,
            } => {
                required("jurisdiction", jurisdiction)?;
                required("period", period)?;
                if !amount_usd.is_finite() || *amount_usd < 0.0 {
                    return Err(WardenError::Validation(format!(
                        "amount_usd must be a non-negative number, got {}",
                        amount_usd
                    )));
                }
                Ok(())
            }
            IntentPayload::BankTransfer {
                from_account,
                to_account,
                amount_usd,
            } => {
                required("from_account", from_account)?;
                required("to_account", to_account)?;
                positive("amount_usd", *amount_usd)
            }
            IntentPayload::BrokerageOrder {
                symbol, quantity, ..
            } => {
                required("symbol", symbol)?;
                positive("quantity", *quantity)
            }
            IntentPayload::CryptoOrder {
                asset, quantity, ..
            } => {
                required("asset", asset)?;
                positive("quantity", *quantity)
            }
        }
    }
}

// =============================================================================
// Intent
// =============================================================================

/// An intent as submitted by a producer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NewIntent {
    pub tenant_id: String,
    /// Submitting identity. Defaults to the configured executor.
    #[serde(default)]
    pub actor: Option<String>,
    #[serde(flatten)]
    pub payload: IntentPayload,
    #[serde(default)]
    pub data_class: Option<DataClass>,
    #[serde(default)]
    pub spend_usd: Option<f64>,
}

/// Normalize a reported spend.
///
/// Returns the spend to evaluate and whether the producer reported a usable
/// value. Absent, negative, and non-finite values become 0.
pub fn normalize_spend(spend: Option<f64>) -> (f64, bool) {
    match spend {
        Some(v) if v.is_finite() && v >= 0.0 => (v, true),
        _ => (0.0, false),
    }
}

/// A proposed action moving through the engine.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Intent {
    pub id: Uuid,
    pub tenant_id: String,
    pub actor: String,
    #[serde(flatten)]
    pub payload: IntentPayload,
    pub data_class: DataClass,
    pub spend_usd: f64,
    pub spend_reported: bool,
    pub status: IntentStatus,
    /// Last policy decision.
    pub sgl_result: Option<Decision>,
    /// Set when an approved decision memo re-queued this intent.
    pub approved_memo_id: Option<Uuid>,
    pub claimed_by: Option<String>,
    pub lease_expires_at: Option<Timestamp>,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Intent {
    /// Build a queued intent from a producer submission.
    pub fn from_new(new: NewIntent, default_actor: &str) -> Result<Self> {
        if new.tenant_id.trim().is_empty() {
            return Err(WardenError::Validation(
                "tenant_id must not be empty".to_string(),
            ));
        }
        let actor = match new.actor {
            Some(a) if a.trim().is_empty() => {
                return Err(WardenError::Validation(
                    "actor must not be empty when provided".to_string(),
                ))
            }
            Some(a) => a,
            None => default_actor.to_string(),
        };
        new.payload.validate()?;

        let (spend_usd, spend_reported) = normalize_spend(new.spend_usd);
        let now = Timestamp::now();
        Ok(Self {
            id: Uuid::new_v4(),
            tenant_id: new.tenant_id,
            actor,
            payload: new.payload,
            data_class: new.data_class.unwrap_or_default(),
            spend_usd,
            spend_reported,
            status: IntentStatus::Draft,
            sgl_result: None,
            approved_memo_id: None,
            claimed_by: None,
            lease_expires_at: None,
            attempts: 0,
            last_error: None,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn intent_type(&self) -> IntentType {
        self.payload.intent_type()
    }
}

// =============================================================================
// Policy decisions
// =============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Decision {
    Allow,
    Review,
    Block,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Allow => "ALLOW",
            Decision::Review => "REVIEW",
            Decision::Block => "BLOCK",
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Decision {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "ALLOW" => Ok(Decision::Allow),
            "REVIEW" => Ok(Decision::Review),
            "BLOCK" => Ok(Decision::Block),
            _ => Err(format!("Unknown decision: {}", s)),
        }
    }
}

/// Identifier of the policy rule that produced a decision.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyRule {
    ActorNotExecutor,
    BrowserStepBlocked,
    PhiRequiresReview,
    RegulatedAction,
    SpendThreshold,
    BrowserHighRisk,
    SpendUnreported,
    Default,
}

impl PolicyRule {
    pub fn as_str(&self) -> &'static str {
        match self {
            PolicyRule::ActorNotExecutor => "actor_not_executor",
            PolicyRule::BrowserStepBlocked => "browser_step_blocked",
            PolicyRule::PhiRequiresReview => "phi_requires_review",
            PolicyRule::RegulatedAction => "regulated_action",
            PolicyRule::SpendThreshold => "spend_threshold",
            PolicyRule::BrowserHighRisk => "browser_high_risk",
            PolicyRule::SpendUnreported => "spend_unreported",
            PolicyRule::Default => "default_allow",
        }
    }
}

impl fmt::Display for PolicyRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of evaluating an intent. Folded into audit entries and memos.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyDecision {
    pub decision: Decision,
    pub reasons: Vec<PolicyRule>,
    pub requires_human_approval: bool,
}

impl PolicyDecision {
    pub fn allow() -> Self {
        Self {
            decision: Decision::Allow,
            reasons: vec![PolicyRule::Default],
            requires_human_approval: false,
        }
    }

    pub fn review(rule: PolicyRule) -> Self {
        Self {
            decision: Decision::Review,
            reasons: vec![rule],
            requires_human_approval: true,
        }
    }

    pub fn block(rule: PolicyRule) -> Self {
        Self {
            decision: Decision::Block,
            reasons: vec![rule],
            requires_human_approval: false,
        }
    }
}

// =============================================================================
// Decision memos
// =============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MemoStatus {
    Proposed,
    Approved,
    Rejected,
    Executed,
}

impl MemoStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoStatus::Proposed => "PROPOSED",
            MemoStatus::Approved => "APPROVED",
            MemoStatus::Rejected => "REJECTED",
            MemoStatus::Executed => "EXECUTED",
        }
    }
}

impl fmt::Display for MemoStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MemoStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "PROPOSED" => Ok(MemoStatus::Proposed),
            "APPROVED" => Ok(MemoStatus::Approved),
            "REJECTED" => Ok(MemoStatus::Rejected),
            "EXECUTED" => Ok(MemoStatus::Executed),
            _ => Err(format!("Unknown memo status: {}", s)),
        }
    }
}

/// A durable proposal awaiting human judgment.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DecisionMemo {
    pub id: Uuid,
    pub tenant_id: String,
    /// Originating intent, when the memo was raised by the engine.
    pub intent_id: Option<Uuid>,
    /// Actor who proposed the action.
    pub agent: String,
    pub title: String,
    pub rationale: String,
    /// 1 (low) to 3 (high).
    pub risk_tier: u8,
    pub requires_approval: bool,
    pub status: MemoStatus,
    pub payload: serde_json::Value,
    pub spend_usd: f64,
    pub decided_by: Option<String>,
    pub decision_reason: Option<String>,
    pub created_at: Timestamp,
    pub decided_at: Option<Timestamp>,
    pub executed_at: Option<Timestamp>,
}

// =============================================================================
// Audit entries
// =============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditLevel {
    Info,
    Warn,
    Error,
    Security,
}

impl AuditLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditLevel::Info => "info",
            AuditLevel::Warn => "warn",
            AuditLevel::Error => "error",
            AuditLevel::Security => "security",
        }
    }
}

impl fmt::Display for AuditLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuditLevel {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "info" => Ok(AuditLevel::Info),
            "warn" => Ok(AuditLevel::Warn),
            "error" => Ok(AuditLevel::Error),
            "security" => Ok(AuditLevel::Security),
            _ => Err(format!("Unknown audit level: {}", s)),
        }
    }
}

/// Kind of record an audit entry refers to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Intent,
    DecisionMemo,
    Tenant,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Intent => "intent",
            EntityType::DecisionMemo => "decision_memo",
            EntityType::Tenant => "tenant",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "intent" => Ok(EntityType::Intent),
            "decision_memo" => Ok(EntityType::DecisionMemo),
            "tenant" => Ok(EntityType::Tenant),
            _ => Err(format!("Unknown entity type: {}", s)),
        }
    }
}

/// An append-only ledger record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: Uuid,
    pub tenant_id: String,
    pub actor: String,
    pub action: AuditAction,
    pub entity_type: EntityType,
    pub entity_id: String,
    pub level: AuditLevel,
    pub message: String,
    pub meta: serde_json::Value,
    pub timestamp: Timestamp,
}

impl AuditEntry {
    /// Start an entry with the action's default level and empty context.
    pub fn new(
        tenant_id: impl Into<String>,
        actor: impl Into<String>,
        action: AuditAction,
        entity_type: EntityType,
        entity_id: impl ToString,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            tenant_id: tenant_id.into(),
            actor: actor.into(),
            action,
            entity_type,
            entity_id: entity_id.to_string(),
            level: action.default_level(),
            message: String::new(),
            meta: serde_json::Value::Null,
            timestamp: Timestamp::now(),
        }
    }

    pub fn with_level(mut self, level: AuditLevel) -> Self {
        self.level = level;
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    pub fn with_meta(mut self, meta: serde_json::Value) -> Self {
        self.meta = meta;
        self
    }
}

// =============================================================================
// Newtype Wrappers - Temporal
// =============================================================================

/// Unix timestamp in seconds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(pub i64);

impl Timestamp {
    pub fn now() -> Self {
        Self(Utc::now().timestamp())
    }

    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        Self(dt.timestamp())
    }

    pub fn to_datetime(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.0, 0).unwrap_or_default()
    }

    pub fn plus_secs(&self, secs: u64) -> Self {
        Self(self.0.saturating_add(i64::try_from(secs).unwrap_or(i64::MAX)))
    }

    /// Midnight UTC on the first day of this timestamp's month.
    pub fn start_of_month(&self) -> Self {
        let dt = self.to_datetime();
        Utc.with_ymd_and_hms(dt.year(), dt.month(), 1, 0, 0, 0)
            .single()
            .map(Self::from_datetime)
            .unwrap_or(*self)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_datetime().to_rfc3339())
    }
}
