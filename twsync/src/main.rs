// twsync - Taskwarrior <-> reminders sync
// Entry point and CLI

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use twsync::app::AppState;
use twsync::config;
use twsync::services::{HookOutput, HookService, Listener};
use twsync::sync::Trigger;

/// Exit code for a pass that could not run at all
const EXIT_FATAL: u8 = 2;

#[derive(Parser)]
#[command(name = "twsync", version)]
#[command(about = "Two-way sync between Taskwarrior and reminders")]
struct Cli {
    /// Data directory (settings, sync state, locations)
    #[arg(long, global = true, env = config::DATA_DIR_ENV)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one full sync pass
    Sync {
        /// Print the summary as JSON
        #[arg(long)]
        json: bool,
    },
    /// Sync on every reminders change until interrupted
    Listen,
    /// Taskwarrior hook entry points
    Hook {
        #[command(subcommand)]
        event: HookEvent,
    },
    /// Show the sync state
    Status,
}

#[derive(Subcommand)]
enum HookEvent {
    OnAdd,
    OnModify,
}

#[tokio::main]
async fn main() -> ExitCode {
    // Logs go to stderr; hook stdout belongs to Taskwarrior
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "twsync=info,warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let data_dir = config::resolve_data_dir(cli.data_dir);

    let code = match cli.command {
        Command::Hook { event } => {
            run_hook(data_dir, event).await;
            0
        }
        Command::Sync { json } => report(sync(data_dir, json).await),
        Command::Listen => report(listen(data_dir).await),
        Command::Status => report(status(data_dir).await),
    };
    ExitCode::from(code)
}

fn report(result: anyhow::Result<u8>) -> u8 {
    result.unwrap_or_else(|e| {
        tracing::error!("{:#}", e);
        eprintln!("twsync: {:#}", e);
        EXIT_FATAL
    })
}

async fn sync(data_dir: PathBuf, json: bool) -> anyhow::Result<u8> {
    let state = AppState::initialize(data_dir).await?;
    let reconciler = state.reconciler(state.task_store(), state.reminder_store());
    let summary = reconciler.run_sync_pass(Trigger::Remote).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!("{}", summary);
        for error in &summary.errors {
            println!("  {} failed for {}: {}", error.operation, error.item, error.message);
        }
    }
    Ok(summary.exit_code() as u8)
}

async fn listen(data_dir: PathBuf) -> anyhow::Result<u8> {
    let state = AppState::initialize(data_dir).await?;
    let remote = state.reminder_store();
    let reconciler = Arc::new(state.reconciler(state.task_store(), remote.clone()));
    let listener = Listener::new(reconciler, remote, state.listener_options());

    let stats = listener
        .run(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;
    tracing::info!(
        "Listener stopped after {} pass(es), {} failed",
        stats.passes,
        stats.failed_passes
    );
    Ok(0)
}

async fn status(data_dir: PathBuf) -> anyhow::Result<u8> {
    let state = AppState::initialize(data_dir).await?;
    let report = state.status().await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(0)
}

/// Hooks always print the task JSON and exit 0
async fn run_hook(data_dir: PathBuf, event: HookEvent) {
    let mut input = String::new();
    if let Err(e) = tokio::io::stdin().read_to_string(&mut input).await {
        tracing::error!("Failed to read hook input: {}", e);
    }

    let output = match AppState::initialize(data_dir).await {
        Ok(state) => {
            let reconciler = state.reconciler(state.task_store(), state.reminder_store());
            let hooks = HookService::new(&reconciler);
            match event {
                HookEvent::OnAdd => hooks.on_add(&input).await,
                HookEvent::OnModify => hooks.on_modify(&input).await,
            }
        }
        Err(e) => {
            tracing::error!("Hook setup failed: {}", e);
            let task = match event {
                HookEvent::OnAdd => input.lines().next(),
                HookEvent::OnModify => input.lines().filter(|l| !l.trim().is_empty()).last(),
            };
            HookOutput {
                task_json: task.unwrap_or_default().trim().to_string(),
                feedback: vec![format!("twsync: sync skipped: {}", e)],
            }
        }
    };

    print!("{}", output.render());
}
