//! dirsubmit-worker: standalone submission worker and reminder runner.

use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use dirsubmit_orchestrator::{
    Clock, IntegrationRegistry, LogMailer, PostgresStore, ReminderScheduler, SubmissionWorker,
    SystemClock, WorkerConfig,
};

#[derive(Parser)]
#[command(name = "dirsubmit-worker")]
#[command(about = "Directory submission worker and reminder runner")]
#[command(version)]
struct Cli {
    /// Postgres connection string
    #[arg(long, env = "DATABASE_URL", hide_env_values = true)]
    database_url: String,

    /// Connection pool size
    #[arg(long, env = "DATABASE_MAX_CONNECTIONS", default_value = "5")]
    max_connections: u32,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the submission worker and the daily reminder pass until interrupted
    Run,
    /// Run one reminder/deadline pass and exit (for cron)
    Reminders,
    /// Create the database schema
    Migrate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    dirsubmit_observability::init();

    let cli = Cli::parse();
    let config = WorkerConfig::from_env().context("invalid worker configuration")?;
    let store = Arc::new(
        PostgresStore::connect(&cli.database_url, cli.max_connections)
            .await
            .context("failed to connect to database")?,
    );
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    match cli.command {
        Commands::Migrate => {
            store.ensure_schema().await.context("schema migration failed")?;
            info!("schema up to date");
        }
        Commands::Reminders => {
            if !config.reminders_enabled {
                warn!("reminders disabled, nothing to do");
                return Ok(());
            }
            let scheduler = ReminderScheduler::new(store, Arc::new(LogMailer), clock)
                .with_quiet_hours_fallback(config.quiet_hours_fallback);
            let report = scheduler.run_pass().await.context("reminder pass failed")?;
            println!("{}", serde_json::to_string(&report)?);
        }
        Commands::Run => run(store, clock, config).await?,
    }

    Ok(())
}

async fn run(
    store: Arc<PostgresStore>,
    clock: Arc<dyn Clock>,
    config: WorkerConfig,
) -> anyhow::Result<()> {
    if !config.worker_enabled && !config.reminders_enabled {
        warn!("worker and reminders both disabled, exiting");
        return Ok(());
    }

    let reminders = config.reminders_enabled.then(|| {
        Arc::new(
            ReminderScheduler::new(store.clone(), Arc::new(LogMailer), clock.clone())
                .with_quiet_hours_fallback(config.quiet_hours_fallback),
        )
        .spawn_periodic(config.reminder_interval)
    });

    let worker = config.worker_enabled.then(|| {
        SubmissionWorker::new(store.clone(), IntegrationRegistry::new(), clock.clone(), config.clone())
            .spawn()
    });

    shutdown_signal().await?;
    info!("shutdown requested, finishing in-flight work");

    if let Some(worker) = worker {
        let stats = worker.shutdown().await;
        info!(stats = %serde_json::to_string(&stats)?, "submission worker stopped");
    }
    if let Some(reminders) = reminders {
        reminders.shutdown().await;
    }
    Ok(())
}

#[cfg(unix)]
async fn shutdown_signal() -> anyhow::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut terminate = signal(SignalKind::terminate()).context("failed to install SIGTERM handler")?;
    tokio::select! {
        res = tokio::signal::ctrl_c() => res.context("failed to listen for ctrl-c")?,
        _ = terminate.recv() => {}
    }
    Ok(())
}

#[cfg(not(unix))]
async fn shutdown_signal() -> anyhow::Result<()> {
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")
}
