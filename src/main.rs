//! Taskwell — personal task-management service backend.
//!
//! One binary, three long-running processes plus a one-shot migration
//! command:
//! - `taskwell serve`     — the HTTP API
//! - `taskwell worker`    — the polling job worker (run any number)
//! - `taskwell scheduler` — the daily UTC-midnight enqueue loop
//! - `taskwell migrate`   — apply migrations and seed data, then exit

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::info;

use taskwell::ai::AiService;
use taskwell::auth::AuthService;
use taskwell::config::TaskwellConfig;
use taskwell::events::{handlers::register_standard_handlers, EventBus};
use taskwell::http::state::AppState;
use taskwell::jobs::worker::{JobContext, Worker};
use taskwell::jobs::{handlers as job_handlers, scheduler};
use taskwell::metrics::Metrics;
use taskwell::notify::push::PushClient;
use taskwell::{http, logging, migrations, store};

#[derive(Parser)]
#[command(name = "taskwell", about = "Personal task-management service backend")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP API server.
    Serve,
    /// Run a background job worker.
    Worker,
    /// Run the daily scheduler loop.
    Scheduler,
    /// Apply pending migrations and seed static data, then exit.
    Migrate,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = TaskwellConfig::load().context("failed to load configuration")?;

    let logs_dir = Path::new(&config.server.logs_dir).to_owned();
    match cli.command {
        Command::Migrate => {
            let _guard = logging::init(logging::LogMode::OneShot, &logs_dir)?;
            let pool = store::connect(&config.database)
                .await
                .context("failed to connect to database")?;
            migrations::run(&pool).await.context("migrations failed")?;
            info!("migrations complete");
            Ok(())
        }
        Command::Serve => {
            let _guard = logging::init(logging::LogMode::Api, &logs_dir)?;
            run_api(config).await
        }
        Command::Worker => {
            let _guard = logging::init(logging::LogMode::Worker, &logs_dir)?;
            run_worker(config).await
        }
        Command::Scheduler => {
            let _guard = logging::init(logging::LogMode::Scheduler, &logs_dir)?;
            run_scheduler(config).await
        }
    }
}

/// Build the event bus with the standard handler set.
fn build_bus() -> Arc<EventBus> {
    let mut bus = EventBus::new();
    register_standard_handlers(&mut bus);
    Arc::new(bus)
}

/// Run the API process.
async fn run_api(config: TaskwellConfig) -> Result<()> {
    info!("taskwell API starting");
    let config = Arc::new(config);

    let pool = store::connect(&config.database)
        .await
        .context("failed to connect to database")?;
    migrations::run(&pool).await.context("migrations failed")?;

    let bus = build_bus();
    let metrics = Metrics::new().context("failed to build metrics registry")?;
    let auth = Arc::new(AuthService::new(config.auth.clone()).context("auth setup failed")?);
    let ai = Arc::new(AiService::new(
        pool.clone(),
        Arc::clone(&config),
        Arc::clone(&bus),
    ));
    let push = Arc::new(PushClient::new(&config.push));

    let state = AppState::new(
        pool,
        Arc::clone(&config),
        bus,
        metrics,
        auth,
        ai,
        push,
    );

    http::serve(state, shutdown_signal()).await?;
    info!("taskwell API stopped");
    Ok(())
}

/// Run a worker process.
async fn run_worker(config: TaskwellConfig) -> Result<()> {
    info!("taskwell worker starting");
    let config = Arc::new(config);

    let pool = store::connect(&config.database)
        .await
        .context("failed to connect to database")?;

    let ctx = JobContext {
        pool,
        config: Arc::clone(&config),
        bus: build_bus(),
        push: Arc::new(PushClient::new(&config.push)),
    };

    let mut worker = Worker::new(ctx);
    job_handlers::register_all(&mut worker);

    let (stop_tx, stop_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = stop_tx.send(true);
    });

    worker.run(stop_rx).await;
    info!("taskwell worker stopped");
    Ok(())
}

/// Run the scheduler process.
async fn run_scheduler(config: TaskwellConfig) -> Result<()> {
    info!("taskwell scheduler starting");
    let config = Arc::new(config);

    let pool = store::connect(&config.database)
        .await
        .context("failed to connect to database")?;

    let (stop_tx, stop_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = stop_tx.send(true);
    });

    scheduler::run(pool, config, stop_rx).await;
    info!("taskwell scheduler stopped");
    Ok(())
}

/// Resolve on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        if let Ok(mut signal) =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        {
            signal.recv().await;
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}
