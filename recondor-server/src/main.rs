//! # Recondor Server
//!
//! Campaign orchestration server for staged domain reconnaissance:
//!
//! - **Campaign control**: REST endpoints creating and driving generation,
//!   DNS validation, and HTTP/keyword campaigns
//! - **Worker pool**: lease-based job claim loop running the stage runners
//! - **Event stream**: ordered per-campaign WebSocket events with replay
//! - **Persistence**: PostgreSQL for campaigns, jobs, and result rows

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Args as ClapArgs, Parser, Subcommand};
use recondor_core::campaign::{CampaignService, CampaignStore, PostgresCampaignStore};
use recondor_core::directory::{Directory, PostgresDirectory};
use recondor_core::events::EventBroadcaster;
use recondor_core::generation::{GenerationRunner, GenerationStateStore, PostgresGenerationStateStore};
use recondor_core::orchestration::{
    run_lease_housekeeper, CampaignWorker, JobKind, JobStore, PostgresJobStore, RunnerRegistry,
};
use recondor_core::results::{PostgresResultStore, ResultStore};
use recondor_core::validation::{
    DnsValidationRunner, HickoryResolverProvider, HttpKeywordRunner, ReqwestFetcherProvider,
};
use recondor_server::infra::config::{load_orchestrator_config, ServerConfig};
use recondor_server::infra::AppState;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// CLI entry point
#[derive(Parser, Debug)]
#[command(name = "recondor-server")]
#[command(about = "Campaign orchestration server for staged domain reconnaissance")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    #[command(flatten)]
    serve: ServeArgs,
}

#[derive(ClapArgs, Debug, Clone)]
struct ServeArgs {
    /// Server host
    #[arg(long, env = "SERVER_HOST", default_value = "0.0.0.0")]
    host: String,

    /// Server port
    #[arg(short, long, env = "SERVER_PORT", default_value_t = 8080)]
    port: u16,

    /// PostgreSQL connection URL
    #[arg(long, env = "DATABASE_URL")]
    database_url: String,

    /// Worker task count (overrides orchestrator config)
    #[arg(long, env = "ORCHESTRATOR_WORKERS")]
    workers: Option<usize>,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(subcommand)]
    Db(DbCommand),
}

#[derive(Debug, Subcommand)]
enum DbCommand {
    /// Apply database migrations and exit
    Migrate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Some(Command::Db(DbCommand::Migrate)) = cli.command {
        run_db_migrate(&cli.serve).await?;
        return Ok(());
    }

    run_server(cli.serve).await
}

async fn connect_pool(database_url: &str) -> anyhow::Result<PgPool> {
    if !(database_url.starts_with("postgres://") || database_url.starts_with("postgresql://")) {
        anyhow::bail!("Invalid database URL: must start with postgres:// or postgresql://");
    }
    PgPoolOptions::new()
        .max_connections(16)
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url)
        .await
        .context("failed to connect to PostgreSQL")
}

async fn run_db_migrate(args: &ServeArgs) -> anyhow::Result<()> {
    let pool = connect_pool(&args.database_url).await?;
    recondor_core::MIGRATOR
        .run(&pool)
        .await
        .context("database migration failed")?;
    info!("Database migrations applied successfully");
    Ok(())
}

fn load_config(args: &ServeArgs) -> anyhow::Result<ServerConfig> {
    let (mut orchestrator, warnings) = load_orchestrator_config()?;
    for warning in &warnings.items {
        warn!(message = %warning, "configuration warning");
    }
    if let Some(workers) = args.workers {
        orchestrator.workers = workers.max(1);
    }
    Ok(ServerConfig {
        host: args.host.clone(),
        port: args.port,
        database_url: args.database_url.clone(),
        orchestrator,
    })
}

async fn run_server(args: ServeArgs) -> anyhow::Result<()> {
    let config = load_config(&args)?;
    info!(
        workers = config.orchestrator.workers,
        poll_interval_ms = config.orchestrator.poll_interval_ms,
        lease_ttl_secs = config.orchestrator.lease.lease_ttl_secs,
        "orchestrator configuration in effect"
    );

    let pool = connect_pool(&config.database_url).await?;
    recondor_core::MIGRATOR
        .run(&pool)
        .await
        .context("database migration failed")?;
    info!("Successfully connected to PostgreSQL");

    let campaigns: Arc<dyn CampaignStore> = Arc::new(PostgresCampaignStore::new(pool.clone()));
    let results: Arc<dyn ResultStore> = Arc::new(PostgresResultStore::new(pool.clone()));
    let generation_state: Arc<dyn GenerationStateStore> =
        Arc::new(PostgresGenerationStateStore::new(pool.clone()));
    let directory: Arc<dyn Directory> = Arc::new(PostgresDirectory::new(pool.clone()));
    let jobs: Arc<dyn JobStore> = Arc::new(
        PostgresJobStore::new(
            pool.clone(),
            config.orchestrator.retry,
            config.orchestrator.lease,
        )
        .await
        .context("job store initialisation failed")?,
    );

    let events = Arc::new(EventBroadcaster::default());
    let service = Arc::new(CampaignService::new(
        Arc::clone(&campaigns),
        Arc::clone(&jobs),
        Arc::clone(&events),
        config.orchestrator.retry.max_attempts,
    ));

    let registry = Arc::new(
        RunnerRegistry::new()
            .register(
                JobKind::Generation,
                Arc::new(GenerationRunner::new(
                    Arc::clone(&campaigns),
                    Arc::clone(&results),
                    Arc::clone(&generation_state),
                    Arc::clone(&events),
                )),
            )
            .register(
                JobKind::DnsValidation,
                Arc::new(DnsValidationRunner::new(
                    Arc::clone(&campaigns),
                    Arc::clone(&results),
                    Arc::clone(&directory),
                    Arc::new(HickoryResolverProvider),
                    Arc::clone(&events),
                )),
            )
            .register(
                JobKind::HttpKeyword,
                Arc::new(HttpKeywordRunner::new(
                    Arc::clone(&campaigns),
                    Arc::clone(&results),
                    Arc::clone(&directory),
                    Arc::new(ReqwestFetcherProvider),
                    Arc::clone(&events),
                )),
            ),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut background = Vec::new();
    for i in 0..config.orchestrator.workers.max(1) {
        let worker = CampaignWorker::new(
            format!("worker-{i}"),
            Arc::clone(&jobs),
            Arc::clone(&registry),
            Arc::clone(&service),
            config.orchestrator,
        );
        background.push(tokio::spawn(worker.run(shutdown_rx.clone())));
    }
    background.push(tokio::spawn(run_lease_housekeeper(
        Arc::clone(&jobs),
        Arc::clone(&service),
        config.orchestrator,
        shutdown_rx.clone(),
    )));

    let state = AppState::new(service, results, events);
    let app = recondor_server::create_app(state);

    let addr = config.addr();
    info!("Starting Recondor server on {addr}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("shutting down workers");
    shutdown_tx.send(true).ok();
    for handle in background {
        handle.await.ok();
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for shutdown signal: {e}");
    }
}
