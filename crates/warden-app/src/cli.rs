//! CLI argument definitions for the Warden binary.
//!
//! Uses `clap` with derive macros for ergonomic argument parsing.
//! Priority resolution: CLI args > env vars > config file > defaults.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use uuid::Uuid;
use warden_core::types::{IntentStatus, MemoStatus};
use warden_core::AuditAction;

/// Warden - governed execution of agent-proposed actions.
#[derive(Parser, Debug)]
#[command(name = "warden", version, about)]
pub struct CliArgs {
    /// Path to the configuration file.
    #[arg(short = 'c', long = "config", global = true)]
    pub config: Option<PathBuf>,

    /// Data directory holding the SQLite database.
    #[arg(short = 'd', long = "data-dir", global = true)]
    pub data_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short = 'l', long = "log-level", global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run engine workers until interrupted.
    Run {
        /// Number of workers, each with its own database connection.
        #[arg(short = 'w', long = "workers")]
        workers: Option<usize>,
    },
    /// Queue intents from a JSON file (object or array). Reads stdin when
    /// no file is given or the file is `-`.
    Submit { file: Option<PathBuf> },
    /// Inspect intents.
    #[command(subcommand)]
    Intent(IntentCommand),
    /// Review decision memos.
    #[command(subcommand)]
    Memo(MemoCommand),
    /// Query the audit ledger.
    Audit {
        #[arg(long)]
        tenant: Option<String>,
        /// Intent id, memo id, or tenant id.
        #[arg(long)]
        entity: Option<String>,
        #[arg(long)]
        action: Option<AuditAction>,
        #[arg(long)]
        limit: Option<u32>,
    },
    /// Classify browser steps from a JSON array without queuing anything.
    Classify { file: Option<PathBuf> },
    /// Manage halted tenants.
    #[command(subcommand)]
    Tenant(TenantCommand),
    /// List registered workflow handlers and durable workflow mappings.
    Workflows,
    /// Manage the configuration file.
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[derive(Subcommand, Debug)]
pub enum IntentCommand {
    /// Show one intent with its audit trail.
    Show { id: Uuid },
    /// List intents, newest first.
    List {
        #[arg(long)]
        tenant: Option<String>,
        #[arg(long)]
        status: Option<IntentStatus>,
        #[arg(long)]
        limit: Option<u32>,
    },
    /// Intent counts per status.
    Stats {
        #[arg(long)]
        tenant: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
pub enum MemoCommand {
    /// List memos. Defaults to those awaiting a decision.
    List {
        #[arg(long)]
        tenant: Option<String>,
        #[arg(long)]
        status: Option<MemoStatus>,
    },
    Show { id: Uuid },
    /// Approve a proposed memo and re-queue its intent.
    Approve {
        id: Uuid,
        #[arg(long)]
        actor: String,
    },
    /// Reject a proposed memo and fail its intent.
    Reject {
        id: Uuid,
        #[arg(long)]
        actor: String,
        #[arg(long)]
        reason: String,
    },
}

#[derive(Subcommand, Debug)]
pub enum TenantCommand {
    /// List tenants whose privileged processing is halted.
    Halted,
    /// Lift a halt after review.
    Resume {
        tenant: String,
        #[arg(long)]
        actor: String,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Write a default configuration file.
    Init {
        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },
    /// Print the effective configuration.
    Show,
}

impl CliArgs {
    /// Resolve the configuration file path.
    ///
    /// Priority: --config flag > WARDEN_CONFIG env var > ~/.warden/config.toml.
    pub fn resolve_config_path(&self) -> PathBuf {
        if let Some(ref p) = self.config {
            return p.clone();
        }
        if let Ok(p) = std::env::var("WARDEN_CONFIG") {
            return PathBuf::from(p);
        }
        default_config_path()
    }

    /// Resolve the data directory.
    ///
    /// Priority: --data-dir flag > WARDEN_DATA_DIR env var > config file value.
    pub fn resolve_data_dir(&self, config_data_dir: &str) -> String {
        if let Some(ref p) = self.data_dir {
            return p.to_string_lossy().to_string();
        }
        if let Ok(p) = std::env::var("WARDEN_DATA_DIR") {
            return p;
        }
        config_data_dir.to_string()
    }

    /// Resolve the log level.
    ///
    /// Priority: --log-level flag > config file value.
    pub fn resolve_log_level(&self, config_level: &str) -> String {
        self.log_level
            .clone()
            .unwrap_or_else(|| config_level.to_string())
    }
}

/// Default config file path for the current platform.
fn default_config_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    if let Ok(home) = std::env::var("USERPROFILE") {
        return PathBuf::from(home).join(".warden").join("config.toml");
    }
    #[cfg(not(target_os = "windows"))]
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".warden").join("config.toml");
    }
    PathBuf::from("config.toml")
}
