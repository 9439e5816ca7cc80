//! # TaskMind Reminders
//!
//! Scans open tasks and sends 24-hour and final deadline reminders over
//! Telegram and email.
//!
//! Usage:
//!   taskmind                              # Run the reminder loop (default)
//!   taskmind check                        # Run one cycle and exit
//!   taskmind preview --task-id 42         # Render the reminder a task would get
//!   taskmind deliveries --limit 20        # Show the delivery log
//!   taskmind init-config                  # Write a default config file

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use taskmind_channels::{TelegramChannel, senders_from_config};
use taskmind_core::config::TaskMindConfig;
use taskmind_core::traits::ReminderStore;
use taskmind_core::types::{ReminderKind, TaskId};
use taskmind_scheduler::{Decision, Dispatcher, ReminderDb, ReminderEngine, ReminderScheduler};

#[derive(Parser)]
#[command(name = "taskmind", version, about = "🔔 TaskMind deadline reminders")]
struct Cli {
    /// Config file (default: ~/.taskmind/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the reminder loop until Ctrl-C
    Run,
    /// Run a single reminder cycle and exit
    Check,
    /// Show the reminder a task would receive right now
    Preview {
        #[arg(long)]
        task_id: TaskId,
        /// Force a reminder kind (24h or 1h)
        #[arg(long)]
        kind: Option<String>,
    },
    /// Write a default config file
    InitConfig,
    /// Show recent delivery attempts
    Deliveries {
        #[arg(long, default_value = "20")]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "taskmind=debug,taskmind_scheduler=debug,taskmind_channels=debug,taskmind_core=debug"
    } else {
        "taskmind=info,taskmind_scheduler=info,taskmind_channels=info,taskmind_core=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_target(false)
        .init();

    let config_path = cli.config.clone().unwrap_or_else(TaskMindConfig::default_path);

    if let Some(Command::InitConfig) = cli.command {
        if config_path.exists() {
            println!("⚠️  Config already exists at {}", config_path.display());
        } else {
            TaskMindConfig::default().save_to(&config_path)?;
            println!("✅ Config written to {}", config_path.display());
        }
        return Ok(());
    }

    let mut config = if config_path.exists() {
        TaskMindConfig::load_from(&config_path)?
    } else {
        tracing::info!("No config at {}, using defaults", config_path.display());
        TaskMindConfig::default()
    };
    config.apply_env_overrides();
    config.validate()?;

    let db_path = config.database_path();
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let db = Arc::new(
        ReminderDb::open(&db_path).with_context(|| format!("opening {}", db_path.display()))?,
    );

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run(config, db).await,
        Command::Check => {
            let engine = build_engine(&config, db);
            let report = engine.run_cycle().await?;
            println!(
                "🔍 {} candidate(s), {} reminder(s): {} delivered, {} failed, {} skipped",
                report.scanned, report.reminders, report.delivered, report.failed, report.skipped
            );
            if report.mark_failures > 0 {
                println!("⚠️  {} sent-flag update(s) failed", report.mark_failures);
            }
            Ok(())
        }
        Command::Preview { task_id, kind } => {
            let kind = match kind.as_deref() {
                Some(s) => Some(
                    ReminderKind::parse(s).with_context(|| format!("unknown reminder kind '{s}' (use 24h or 1h)"))?,
                ),
                None => None,
            };
            let candidate = db
                .load_candidate(task_id)?
                .with_context(|| format!("task {task_id} not found"))?;
            let now = db.now().await?;
            let engine = build_engine(&config, db);
            let preview = engine.preview(&candidate.task, now, kind);

            println!("Task {task_id} at {now}: {}", describe(&preview.decision));
            match preview.message {
                Some(msg) => {
                    println!("\n--- Telegram ---\n{}", msg.chat_text);
                    println!("\n--- Email ---\nSubject: {}\n\n{}", msg.email_subject, msg.email_html);
                }
                None => println!("No reminder due. Pass --kind to render one anyway."),
            }
            Ok(())
        }
        Command::Deliveries { limit } => {
            let rows = db.recent_deliveries(limit)?;
            if rows.is_empty() {
                println!("No deliveries recorded yet.");
            }
            for row in rows {
                println!(
                    "{}  task {:>5}  {:<3}  {:<8}  {:<7}  {}",
                    row.created_at,
                    row.task_id,
                    row.kind,
                    row.channel.as_deref().unwrap_or("-"),
                    row.status,
                    row.detail.as_deref().unwrap_or("")
                );
            }
            Ok(())
        }
        Command::InitConfig => Ok(()),
    }
}

fn build_engine(config: &TaskMindConfig, db: Arc<ReminderDb>) -> ReminderEngine {
    let send_timeout = config.scheduler.send_timeout();
    let (chat, email) = senders_from_config(&config.channel, send_timeout);
    ReminderEngine::from_config(db, Dispatcher::new(chat, email, send_timeout), config)
}

async fn run(config: TaskMindConfig, db: Arc<ReminderDb>) -> Result<()> {
    println!("🔔 TaskMind Reminders v{}", env!("CARGO_PKG_VERSION"));

    let engine = Arc::new(build_engine(&config, db));
    let channels = engine.dispatcher().configured_channels();
    if channels.is_empty() {
        tracing::warn!("⚠️ No reminder channel configured; reminders will be marked without sending");
    } else {
        println!("   Channels: {}", channels.join(", "));
    }
    println!("   Database: {}", config.database_path().display());
    println!("   Interval: {}s", config.scheduler.check_interval_secs);

    let (stop_tx, stop_rx) = watch::channel(false);
    let onboarding = if config.channel.telegram.enabled && config.channel.telegram.onboarding {
        match TelegramChannel::from_config(&config.channel.telegram, config.scheduler.send_timeout()) {
            Ok(bot) => Some(bot.start_onboarding(stop_rx)),
            Err(e) => {
                tracing::warn!("⚠️ Telegram onboarding disabled: {e}");
                None
            }
        }
    } else {
        None
    };

    let mut scheduler = ReminderScheduler::new(engine.clone(), config.scheduler.check_interval());
    scheduler.start();

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down...");

    let _ = stop_tx.send(true);
    scheduler.stop().await;
    if let Some(handle) = onboarding {
        if let Err(e) = handle.await {
            tracing::warn!("⚠️ Onboarding poller ended abnormally: {e}");
        }
    }

    let stats = engine.stats();
    println!(
        "👋 Stopped after {} cycle(s): {} reminder(s), {} delivered, {} failed",
        stats.cycles, stats.reminders, stats.delivered, stats.failed_deliveries
    );
    Ok(())
}

fn describe(decision: &Decision) -> String {
    match decision {
        Decision::Send { kind, hours_remaining } => format!("{kind} reminder due ({hours_remaining:.2}h left)"),
        Decision::AlreadyNotified(kind) => format!("{kind} reminder already sent"),
        Decision::OutsideBands { hours_remaining } => format!("outside reminder bands ({hours_remaining:.2}h left)"),
        Decision::Completed => "task is completed".into(),
        Decision::NoDeadline => "task has no deadline".into(),
    }
}
