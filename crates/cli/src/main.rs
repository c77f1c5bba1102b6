//! Steward CLI entry point.
//!
//! This binary is the composition root. It reads the worker configuration
//! from the environment, wires tracing (with an optional OTLP exporter),
//! builds the handler list against a dry-run backend and runs one of:
//!
//! - `resolve`: print the dispatch units an event resolves to.
//! - `run`: submit the event's tasks to an in-process queue and execute them,
//!   including retries.

mod telemetry;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use dispatch::{Event, HandlerFactory, HandlerRegistry, PackageConfig, TaskDisposition};
use handlers::{default_factories, default_registry, factories_by_task_name, DryRunBackend};
use listener::{
    EventIntake, InMemoryQueue, PushgatewayMetrics, QueueReceiver, ScratchVolume, TaskWorker,
    WorkerConfig,
};
use serde::de::DeserializeOwned;
use tracing::{error, info, Level};

#[derive(Parser)]
#[command(name = "steward")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Webhook event dispatcher for packaging automation", long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the dispatch units an event resolves to
    Resolve {
        /// Path to the event (JSON)
        #[arg(short, long)]
        event: PathBuf,

        /// Path to the project's package configuration (JSON)
        #[arg(short, long)]
        package_config: PathBuf,
    },

    /// Resolve an event and execute its tasks against a dry-run backend
    Run {
        /// Path to the event (JSON)
        #[arg(short, long)]
        event: PathBuf,

        /// Path to the project's package configuration (JSON)
        #[arg(short, long)]
        package_config: PathBuf,

        /// Keep running until delayed retries have been delivered
        #[arg(long)]
        wait_for_retries: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let _telemetry = telemetry::init_tracing(cli.json, level)?;

    let config = WorkerConfig::from_env().context("invalid worker configuration")?;
    let factories = factories(&config)?;
    let registry = install_registry(&factories)?;

    match cli.command {
        Commands::Resolve {
            event,
            package_config,
        } => resolve(&config, registry, &event, &package_config),
        Commands::Run {
            event,
            package_config,
            wait_for_retries,
        } => {
            run(
                &config,
                registry,
                &factories,
                &event,
                &package_config,
                wait_for_retries,
            )
            .await
        }
    }
}

fn resolve(
    config: &WorkerConfig,
    registry: &'static HandlerRegistry,
    event_path: &Path,
    package_config_path: &Path,
) -> Result<()> {
    let event: Event = read_json(event_path)?;
    let package_config: PackageConfig = read_json(package_config_path)?;

    let (queue, _receiver) = InMemoryQueue::channel();
    let intake = intake(config, registry, Arc::new(queue));

    let units = intake.resolve(&event, &package_config);
    println!("{}", serde_json::to_string_pretty(&units)?);
    Ok(())
}

async fn run(
    config: &WorkerConfig,
    registry: &'static HandlerRegistry,
    factories: &[Arc<dyn HandlerFactory>],
    event_path: &Path,
    package_config_path: &Path,
    wait_for_retries: bool,
) -> Result<()> {
    let event: Event = read_json(event_path)?;
    let package_config: PackageConfig = read_json(package_config_path)?;

    let (queue, mut receiver) = InMemoryQueue::channel();
    let queue = Arc::new(queue);
    let intake = intake(config, registry, queue.clone());
    let worker = TaskWorker::new(
        factories_by_task_name(factories),
        queue,
        Arc::new(ScratchVolume::from_config(config)),
        Arc::new(PushgatewayMetrics::new(config.pushgateway_url.clone())),
        config.retry,
    );

    let submitted = intake.process(&event, &package_config).await?;
    info!(tasks = submitted.len(), "Event accepted");

    let mut failed = 0usize;
    while let Some(message) = next_message(&mut receiver, wait_for_retries).await {
        match worker.process(&message).await {
            Ok(disposition) => {
                if matches!(disposition, TaskDisposition::TerminalFailure(_)) {
                    failed += 1;
                }
                let summary = serde_json::json!({
                    "task_id": message.id,
                    "task_name": message.task_name,
                    "attempt": message.attempt,
                    "disposition": disposition_label(&disposition),
                    "results": disposition.results(),
                });
                println!("{summary}");
            }
            Err(e) => {
                error!(task_name = %message.task_name, error = %e, "Task could not be executed");
                failed += 1;
            }
        }
    }

    let pending = receiver.pending_delayed();
    if pending > 0 {
        info!(pending, "Exiting with retries still scheduled");
    }
    if failed > 0 {
        bail!("{failed} task(s) failed");
    }
    Ok(())
}

async fn next_message(
    receiver: &mut QueueReceiver,
    wait_for_retries: bool,
) -> Option<dispatch::TaskMessage> {
    if let Some(message) = receiver.try_recv() {
        return Some(message);
    }
    if wait_for_retries && receiver.pending_delayed() > 0 {
        return receiver.recv().await;
    }
    None
}

fn factories(config: &WorkerConfig) -> Result<Vec<Arc<dyn HandlerFactory>>> {
    let allowlist = config.load_allowlist()?;
    Ok(default_factories(
        Arc::new(DryRunBackend::new()),
        Arc::new(allowlist),
    ))
}

/// Builds the registry from `factories` and installs it process-wide.
fn install_registry(factories: &[Arc<dyn HandlerFactory>]) -> Result<&'static HandlerRegistry> {
    let registry = HandlerRegistry::install(default_registry(factories))
        .context("failed to install the handler registry")?;
    info!(handlers = registry.len(), "Handler registry installed");
    Ok(registry)
}

fn intake(
    config: &WorkerConfig,
    registry: &'static HandlerRegistry,
    queue: Arc<InMemoryQueue>,
) -> EventIntake<'static> {
    EventIntake::new(registry, queue).with_command_prefix(config.command_prefix.clone())
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("failed to parse {}", path.display()))
}

fn disposition_label(disposition: &TaskDisposition) -> &'static str {
    match disposition {
        TaskDisposition::Skipped => "skipped",
        TaskDisposition::Completed(_) => "completed",
        TaskDisposition::RetryScheduled { .. } => "retry_scheduled",
        TaskDisposition::TerminalFailure(_) => "terminal_failure",
    }
}
