//! Operational CLI for the capture service: worker and supervisor
//! processes, retention cleanup, access-key management and inspection.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use server_core::kernel::access_keys::AccessKey;
use server_core::kernel::captures::{
    supervisor, sweeper, CaptureToolCli, CaptureWorker, CaptureWorkerConfig, PostgresCaptureStore,
    WebhookNotifier,
};
use server_core::kernel::ServerKernel;
use server_core::{CaptureToolOptions, Config};

#[derive(Parser)]
#[command(name = "capture_cli")]
#[command(about = "Capture service operations")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one capture worker process
    Worker {
        /// Proxy port the capture tool binds during runs
        #[arg(long, default_value_t = 9000)]
        proxy_port: u16,
        /// Process a single capture (or one empty cycle), then exit
        #[arg(long)]
        single_run: bool,
    },

    /// Run the worker supervisor (launches and restarts PROCESSES workers)
    Supervisor,

    /// Delete expired capture working directories
    Cleanup,

    /// Create an access key; the plaintext is printed exactly once
    CreateAccessKey {
        #[arg(long)]
        label: String,
    },

    /// Revoke an access key
    CancelAccessKey {
        #[arg(long)]
        id: i64,
    },

    /// Show access keys and capture queue counts
    Status,

    /// Dump the full record of one capture as JSON, logs included
    InspectCapture {
        #[arg(long)]
        id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,server_core=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = Config::from_env().context("Failed to load configuration")?;

    match cli.command {
        Commands::Worker {
            proxy_port,
            single_run,
        } => {
            if proxy_port == 0 {
                bail!("--proxy-port must be a valid, free TCP port");
            }
            run_worker(config, proxy_port, single_run).await
        }
        Commands::Supervisor => supervisor::run_supervisor(&config).await,
        Commands::Cleanup => {
            let report = sweeper::sweep(&config).await?;
            println!("{} expired directories deleted", report.deleted.len());
            for path in report.deleted {
                println!("{}", path.display());
            }
            Ok(())
        }
        Commands::CreateAccessKey { label } => create_access_key(&config, &label).await,
        Commands::CancelAccessKey { id } => cancel_access_key(&config, id).await,
        Commands::Status => status(&config).await,
        Commands::InspectCapture { id } => inspect_capture(&config, &id).await,
    }
}

async fn connect(config: &Config) -> Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(2)
        .connect(&config.database_url)
        .await
        .context("Failed to connect to database")
}

async fn run_worker(config: Config, proxy_port: u16, single_run: bool) -> Result<()> {
    let pool = connect(&config).await?;
    let kernel = ServerKernel::new(pool, config.clone());

    let tool_options = CaptureToolOptions::default();
    let worker = CaptureWorker::new(
        Arc::new(PostgresCaptureStore::new(kernel.db.clone())),
        Arc::new(CaptureToolCli::new(
            config.capture_tool_command.clone(),
            tool_options.clone(),
        )),
        Arc::new(WebhookNotifier::new(kernel.http.clone(), config.clone())),
        config,
        tool_options,
        CaptureWorkerConfig::new(proxy_port, single_run),
    );

    // Operator interrupt cancels the loop cooperatively; a capture in
    // flight is marked failed before the worker exits.
    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received - stopping worker");
            signal_token.cancel();
        }
    });

    worker.run(shutdown).await
}

async fn create_access_key(config: &Config, label: &str) -> Result<()> {
    let label = label.replace("\r\n", " ").replace('\n', " ");
    let label = label.trim();
    if label.is_empty() {
        bail!("label must not be empty");
    }

    let pool = connect(config).await?;
    let (key, digest) = AccessKey::generate(&config.access_key_salt);
    let access_key = AccessKey::create(&pool, label, &digest).await?;

    println!("Access key #{} ({}):", access_key.id, access_key.label);
    println!("{key}");
    println!("-- This key will never be displayed again");
    Ok(())
}

async fn cancel_access_key(config: &Config, id: i64) -> Result<()> {
    let pool = connect(config).await?;

    match AccessKey::find_by_id(&pool, id).await? {
        None => bail!("access key #{id} could not be found"),
        Some(key) if key.canceled_at.is_some() => {
            println!("access key #{id} has already been canceled");
            Ok(())
        }
        Some(_) => {
            AccessKey::cancel(&pool, id).await?;
            println!("access key #{id} canceled");
            Ok(())
        }
    }
}

async fn status(config: &Config) -> Result<()> {
    let pool = connect(config).await?;
    let store = PostgresCaptureStore::new(pool.clone());

    println!("{}", "-".repeat(80));
    println!("Access keys:");
    println!("{}", "-".repeat(80));
    for key in AccessKey::list_all(&pool).await? {
        let mut line = format!("#{} {} created: {}", key.id, key.label, key.created_at);
        if let Some(canceled_at) = key.canceled_at {
            line.push_str(&format!(" canceled: {canceled_at}"));
        }
        println!("{line}");
    }

    let counts = store.queue_counts().await?;
    println!("{}", "-".repeat(80));
    println!("Capture queue:");
    println!("{}", "-".repeat(80));
    println!("-- {} pending, {} started.", counts.pending, counts.started);
    Ok(())
}

async fn inspect_capture(config: &Config, id: &str) -> Result<()> {
    let id = Uuid::parse_str(id).context("invalid capture id format")?;

    let pool = connect(config).await?;
    let store = PostgresCaptureStore::new(pool);

    // Full record on purpose: unlike the public representation this
    // includes logs and the summary regardless of state.
    use server_core::kernel::captures::CaptureStore;
    match store.find_by_id(id).await? {
        Some(capture) => {
            println!("{}", serde_json::to_string_pretty(&capture)?);
            Ok(())
        }
        None => bail!("capture {id} could not be found"),
    }
}
