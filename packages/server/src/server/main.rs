// Main entry point for the capture API server

use std::sync::Arc;

use anyhow::{Context, Result};
use server_core::kernel::captures::sweeper;
use server_core::kernel::ServerKernel;
use server_core::{server::build_app, Config};
use sqlx::postgres::PgPoolOptions;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,server_core=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting capture API");

    // Load configuration
    let config = Config::from_env().context("Failed to load configuration")?;
    tracing::info!("Configuration loaded");

    // Connect to database
    tracing::info!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await
        .context("Failed to connect to database")?;
    tracing::info!("Database connected");

    // Run migrations
    tracing::info!("Running database migrations...");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("Failed to run migrations")?;
    tracing::info!("Migrations complete");

    let port = config.port;
    let kernel = Arc::new(ServerKernel::new(pool, config));

    // Hourly retention sweep of expired working directories
    let _scheduler = start_sweep_scheduler(kernel.clone()).await?;

    // Build application
    let app = build_app(kernel);

    // Start server
    let addr = format!("0.0.0.0:{port}");
    tracing::info!("Starting server on {}", addr);
    tracing::info!("Liveness probe: http://localhost:{}/ping", port);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, app).await.context("Server error")?;

    Ok(())
}

/// Schedule the retention sweeper to run at the top of every hour.
async fn start_sweep_scheduler(kernel: Arc<ServerKernel>) -> Result<JobScheduler> {
    let scheduler = JobScheduler::new().await?;

    let sweep_job = Job::new_async("0 0 * * * *", move |_uuid, _lock| {
        let kernel = kernel.clone();
        Box::pin(async move {
            match sweeper::sweep(&kernel.config).await {
                Ok(report) => {
                    tracing::info!(deleted = report.deleted.len(), "retention sweep complete")
                }
                Err(e) => tracing::error!(error = format!("{e:#}"), "retention sweep failed"),
            }
        })
    })?;

    scheduler.add(sweep_job).await?;
    scheduler.start().await?;

    tracing::info!("Scheduled tasks started (retention sweep every hour)");
    Ok(scheduler)
}
