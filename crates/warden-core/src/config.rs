use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{Result, WardenError};

/// Top-level configuration for the Warden engine.
///
/// Loaded from `~/.warden/config.toml` by default. Each section corresponds
/// to one component of the admission pipeline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WardenConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub policy: PolicyConfig,
    #[serde(default)]
    pub risk: RiskConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub guardrails: GuardrailConfig,
    #[serde(default)]
    pub workflows: WorkflowsConfig,
}

impl WardenConfig {
    /// Load configuration from a TOML file.
    ///
    /// Returns an error if the file cannot be read, parsed, or fails validation.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: WardenConfig = toml::from_str(&content)?;
        config.validate()?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Load configuration from a TOML file, falling back to defaults if the
    /// file does not exist or cannot be parsed.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    "Failed to load config from {}: {}. Using defaults.",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Save the current configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }

    /// Reject values that would make the engine unsafe to run.
    pub fn validate(&self) -> Result<()> {
        if self.policy.executor_identity.trim().is_empty() {
            return Err(WardenError::Config(
                "policy.executor_identity must not be empty".to_string(),
            ));
        }
        let threshold = self.policy.review_spend_threshold_usd;
        if !threshold.is_finite() || threshold < 0.0 {
            return Err(WardenError::Config(format!(
                "policy.review_spend_threshold_usd must be a non-negative number, got {}",
                threshold
            )));
        }
        if self.queue.lease_secs == 0 {
            return Err(WardenError::Config(
                "queue.lease_secs must be at least 1".to_string(),
            ));
        }
        if self.queue.max_claim_attempts == 0 {
            return Err(WardenError::Config(
                "queue.max_claim_attempts must be at least 1".to_string(),
            ));
        }
        if let Some(cap) = self.guardrails.monthly_spend_cap_usd {
            if !cap.is_finite() || cap < 0.0 {
                return Err(WardenError::Config(format!(
                    "guardrails.monthly_spend_cap_usd must be a non-negative number, got {}",
                    cap
                )));
            }
        }
        for mapping in &self.workflows.registered {
            if mapping.id.trim().is_empty() || mapping.key.trim().is_empty() {
                return Err(WardenError::Config(
                    "workflows.registered entries need both an id and a key".to_string(),
                ));
            }
        }
        Ok(())
    }
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Data directory holding the SQLite database.
    pub data_dir: String,
    /// Log level: trace, debug, info, warn, error.
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            data_dir: "~/.warden/data".to_string(),
            log_level: "info".to_string(),
        }
    }
}

/// How the policy gate treats an intent that did not report a usable spend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnknownSpend {
    /// Treat missing spend as zero.
    #[default]
    Allow,
    /// Route intents with missing spend to human review.
    Review,
}

/// Policy gate settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// The only actor identity allowed to trigger execution.
    pub executor_identity: String,
    /// Spend at or above this amount (USD) requires human review.
    pub review_spend_threshold_usd: f64,
    /// Handling of absent or invalid spend values.
    pub unknown_spend: UnknownSpend,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            executor_identity: "EXECUTOR".to_string(),
            review_spend_threshold_usd: 250.0,
            unknown_spend: UnknownSpend::Allow,
        }
    }
}

/// Risk classifier settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    /// Additional regular expressions that mark a browser step as blocked.
    pub extra_blocked_patterns: Vec<String>,
}

/// Intent queue and worker settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// How long a claim is held before another worker may reclaim it.
    pub lease_secs: u64,
    /// Idle sleep between polls when the queue is empty.
    pub poll_interval_ms: u64,
    /// Candidates tried per claim before reporting nothing claimable.
    pub max_claim_attempts: u32,
    /// Number of workers started by `warden run`.
    pub workers: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            lease_secs: 300,
            poll_interval_ms: 1000,
            max_claim_attempts: 5,
            workers: 1,
        }
    }
}

/// Checks applied when a human approves a decision memo.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardrailConfig {
    /// Upper bound on approved spend per tenant per calendar month (USD).
    pub monthly_spend_cap_usd: Option<f64>,
}

/// Durable workflow mappings seeded into storage at start-up.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowsConfig {
    pub registered: Vec<WorkflowMapping>,
}

/// Maps a stable workflow id and a canonical key to a registered handler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowMapping {
    pub id: String,
    pub key: String,
    pub handler: String,
    #[serde(default)]
    pub description: String,
}
