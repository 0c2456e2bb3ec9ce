//! Warden application binary - composition root.
//!
//! Ties the Warden crates into a single executable:
//! 1. Load configuration from TOML
//! 2. Open the SQLite database
//! 3. Build the immutable registries and engine services
//! 4. Run workers until Ctrl-C, or run one operator command and exit

mod cli;

use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use serde::Serialize;
use serde_json::json;

use warden_core::config::WardenConfig;
use warden_core::types::{BrowserActionStep, MemoStatus, NewIntent};
use warden_engine::{Services, Worker};
use warden_storage::{AuditFilter, Database, IntentFilter, MemoFilter, MemoRepository};

use cli::{CliArgs, Command, ConfigCommand, IntentCommand, MemoCommand, TenantCommand};

type AppResult<T> = Result<T, Box<dyn std::error::Error>>;

/// Expand ~ to home directory in a path string.
fn resolve_data_dir(data_dir: &str) -> PathBuf {
    if data_dir.starts_with("~/") || data_dir.starts_with("~\\") {
        #[cfg(target_os = "windows")]
        let home = std::env::var("USERPROFILE").unwrap_or_else(|_| ".".to_string());
        #[cfg(not(target_os = "windows"))]
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        PathBuf::from(home).join(&data_dir[2..])
    } else {
        PathBuf::from(data_dir)
    }
}

/// Load the config file if present. A file that exists but does not parse or
/// validate is an error; the engine never runs on silently substituted policy.
fn load_config(path: &Path) -> AppResult<WardenConfig> {
    if path.exists() {
        Ok(WardenConfig::load(path)?)
    } else {
        Ok(WardenConfig::default())
    }
}

/// Read a file, or stdin for `None` and `-`.
fn read_input(file: Option<&Path>) -> AppResult<String> {
    match file {
        Some(path) if path != Path::new("-") => Ok(std::fs::read_to_string(path)?),
        _ => {
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf)?;
            Ok(buf)
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> AppResult<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Run `workers` engine workers, each on its own connection, until Ctrl-C.
async fn run_workers(config: &WardenConfig, db_path: &Path, workers: usize) -> AppResult<()> {
    let poll_interval = Duration::from_millis(config.queue.poll_interval_ms);
    let mut shutdown_handles = Vec::with_capacity(workers);
    let mut tasks = Vec::with_capacity(workers);

    for n in 0..workers {
        let db = Arc::new(Database::new(db_path)?);
        let services = Services::new(config, db)?;
        let worker_id = format!("worker-{}-{}", std::process::id(), n);
        let worker = Worker::new(services.engine(worker_id), poll_interval);
        shutdown_handles.push(worker.shutdown_handle());
        tasks.push(tokio::spawn(async move { worker.run().await }));
    }
    tracing::info!(workers, poll_interval_ms = config.queue.poll_interval_ms, "Workers started");

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown requested, finishing in-flight intents");
    for handle in &shutdown_handles {
        handle.notify_one();
    }

    for task in tasks {
        match task.await {
            Ok(stats) => tracing::info!(
                ticks = stats.ticks,
                processed = stats.processed,
                errors = stats.errors,
                "Worker finished"
            ),
            Err(e) => tracing::error!(error = %e, "Worker task failed"),
        }
    }
    Ok(())
}

fn submit(services: &Services, input: &str) -> AppResult<()> {
    let value: serde_json::Value = serde_json::from_str(input)?;
    let submissions: Vec<NewIntent> = match value {
        serde_json::Value::Array(items) => items
            .into_iter()
            .map(serde_json::from_value)
            .collect::<Result<_, _>>()?,
        other => vec![serde_json::from_value(other)?],
    };

    let mut queued = Vec::with_capacity(submissions.len());
    for new in submissions {
        let intent = services.queue.enqueue(new)?;
        queued.push(json!({
            "id": intent.id,
            "tenant_id": intent.tenant_id,
            "intent_type": intent.intent_type(),
            "status": intent.status,
        }));
    }
    print_json(&queued)
}

fn classify(services: &Services, input: &str) -> AppResult<()> {
    let steps: Vec<BrowserActionStep> = serde_json::from_str(input)?;
    let classifier = &services.classifier;
    let levels: Vec<_> = steps
        .iter()
        .enumerate()
        .map(|(i, step)| {
            json!({
                "index": i,
                "type": step.action_type,
                "risk": classifier.classify(step),
            })
        })
        .collect();
    print_json(&json!({
        "steps": levels,
        "risk_tier": classifier.session_risk_tier(&steps),
        "verdict": classifier.validate_session(&steps),
    }))
}

fn intent_command(services: &Services, cmd: IntentCommand) -> AppResult<()> {
    match cmd {
        IntentCommand::Show { id } => {
            let intent = services
                .queue
                .get(id)?
                .ok_or_else(|| format!("Intent {} not found", id))?;
            let trail = services.audit.list(&AuditFilter {
                entity_id: Some(id.to_string()),
                ..AuditFilter::default()
            })?;
            print_json(&json!({"intent": intent, "audit": trail}))
        }
        IntentCommand::List {
            tenant,
            status,
            limit,
        } => print_json(&services.queue.list(&IntentFilter {
            tenant_id: tenant,
            status,
            limit,
        })?),
        IntentCommand::Stats { tenant } => {
            let counts: serde_json::Map<String, serde_json::Value> = services
                .queue
                .count_by_status(tenant.as_deref())?
                .into_iter()
                .map(|(status, n)| (status.to_string(), json!(n)))
                .collect();
            print_json(&counts)
        }
    }
}

fn memo_command(services: &Services, cmd: MemoCommand) -> AppResult<()> {
    match cmd {
        MemoCommand::List { tenant, status } => match status {
            None | Some(MemoStatus::Proposed) => {
                print_json(&services.memos.list_pending(tenant.as_deref())?)
            }
            Some(status) => {
                let repo = MemoRepository::new(Arc::clone(&services.db));
                print_json(&repo.list(&MemoFilter {
                    tenant_id: tenant,
                    status: Some(status),
                    limit: None,
                })?)
            }
        },
        MemoCommand::Show { id } => print_json(&services.memos.get(id)?),
        MemoCommand::Approve { id, actor } => {
            let memo = services.memos.approve(id, &actor)?;
            tracing::info!(memo_id = %memo.id, actor = %actor, "Memo approved");
            print_json(&memo)
        }
        MemoCommand::Reject { id, actor, reason } => {
            let memo = services.memos.reject(id, &actor, &reason)?;
            tracing::info!(memo_id = %memo.id, actor = %actor, "Memo rejected");
            print_json(&memo)
        }
    }
}

fn tenant_command(services: &Services, cmd: TenantCommand) -> AppResult<()> {
    match cmd {
        TenantCommand::Halted => print_json(&services.halts.list()?),
        TenantCommand::Resume { tenant, actor } => {
            let resumed = services.ledger.resume_tenant(&tenant, &actor)?;
            if !resumed {
                tracing::warn!(tenant = %tenant, "Tenant was not halted");
            }
            print_json(&json!({"tenant": tenant, "resumed": resumed}))
        }
    }
}

fn workflows(services: &Services) -> AppResult<()> {
    print_json(&json!({
        "handlers": services.dispatcher.registry().keys(),
        "durable": services.workflows.list()?,
    }))
}

#[tokio::main]
async fn main() -> AppResult<()> {
    let args = CliArgs::parse();

    let config_file = args.resolve_config_path();
    let mut config = load_config(&config_file)?;
    config.general.data_dir = args.resolve_data_dir(&config.general.data_dir);
    config.general.log_level = args.resolve_log_level(&config.general.log_level);

    // Tracing. RUST_LOG wins over the configured level.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.general.log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    tracing::debug!(path = %config_file.display(), "Configuration resolved");

    // Commands that need no database.
    if let Command::Config(cmd) = &args.command {
        return match cmd {
            ConfigCommand::Init { force } => {
                if config_file.exists() && !force {
                    return Err(format!(
                        "{} already exists, pass --force to overwrite",
                        config_file.display()
                    )
                    .into());
                }
                WardenConfig::default().save(&config_file)?;
                println!("{}", config_file.display());
                Ok(())
            }
            ConfigCommand::Show => print_json(&config),
        };
    }

    // Storage.
    let data_dir = resolve_data_dir(&config.general.data_dir);
    if let Err(e) = std::fs::create_dir_all(&data_dir) {
        tracing::error!(path = %data_dir.display(), error = %e, "Failed to create data directory");
        return Err(e.into());
    }
    let db_path = data_dir.join("warden.db");

    if let Command::Run { workers } = args.command {
        let workers = workers.unwrap_or(config.queue.workers).max(1);
        tracing::info!(
            "Starting Warden v{} ({} workers)",
            env!("CARGO_PKG_VERSION"),
            workers
        );
        return run_workers(&config, &db_path, workers).await;
    }

    let db = Arc::new(Database::new(&db_path)?);
    tracing::debug!(path = %db_path.display(), "SQLite database opened");
    let services = Services::new(&config, db)?;

    match args.command {
        Command::Submit { file } => submit(&services, &read_input(file.as_deref())?),
        Command::Intent(cmd) => intent_command(&services, cmd),
        Command::Memo(cmd) => memo_command(&services, cmd),
        Command::Audit {
            tenant,
            entity,
            action,
            limit,
        } => print_json(&services.audit.list(&AuditFilter {
            tenant_id: tenant,
            entity_id: entity,
            action,
            limit,
        })?),
        Command::Classify { file } => classify(&services, &read_input(file.as_deref())?),
        Command::Tenant(cmd) => tenant_command(&services, cmd),
        Command::Workflows => workflows(&services),
        Command::Run { .. } | Command::Config(_) => Ok(()),
    }
}
