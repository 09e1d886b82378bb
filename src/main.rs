//! Entrypoint of the service.

use std::sync::Arc;

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use wps::config::Config;
use wps::crypto::VerifyingKey;
use wps::events::{EventConsumer, EventRouter, KafkaEventPublisher};
use wps::store::{migrations, DocumentStore, MemoryStore};
use wps::{AccessCheckClient, AppState, WorkPackageRepository};

#[derive(Parser)]
#[command(name = "wps", about = "The work package service", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP REST API.
    RunRest,
    /// Run an event consumer listening to the configured topics.
    ConsumeEvents {
        /// Stop after processing this many events instead of running forever.
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Run database migrations.
    MigrateDb,
}

fn build_repository(
    config: &Config,
    store: Arc<dyn DocumentStore>,
) -> anyhow::Result<Arc<WorkPackageRepository>> {
    let access = AccessCheckClient::new(&config.access_url)
        .context("failed to build the access check client")?;
    let repository = WorkPackageRepository::new(config, access, store)
        .context("failed to build the work package repository")?;
    Ok(Arc::new(repository))
}

async fn run_rest(config: Config) -> anyhow::Result<()> {
    let store = Arc::new(MemoryStore::new());
    let repository = build_repository(&config, store)?;
    let auth_key = VerifyingKey::from_jwk(&config.auth_key)
        .context("failed to parse the auth key")?;
    let app = wps::router(AppState::new(repository, auth_key));

    let listener = tokio::net::TcpListener::bind(config.bind_address())
        .await
        .context("failed to bind the REST API address")?;
    info!(address = %listener.local_addr()?, "serving the REST API");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("the REST API server failed")
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::error!(%error, "failed to install the shutdown handler");
    } else {
        info!("received shutdown signal");
    }
}

async fn consume_events(config: Config, limit: Option<usize>) -> anyhow::Result<()> {
    let store = Arc::new(MemoryStore::new());
    let repository = build_repository(&config, store)?;
    let router = EventRouter::new(&config, repository);
    let publisher = Arc::new(KafkaEventPublisher::new(config.kafka_servers.clone()));
    let consumer = EventConsumer::new(&config, router, publisher);
    consumer.run(limit).await
}

async fn migrate_db(config: Config) -> anyhow::Result<()> {
    let store = MemoryStore::new();
    let count =
        migrations::migrate_work_packages(&store, &config.work_packages_collection).await?;
    info!(count, "database migration finished");
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    let config = Config::load()?;
    match cli.command {
        Command::RunRest => run_rest(config).await,
        Command::ConsumeEvents { limit } => consume_events(config, limit).await,
        Command::MigrateDb => migrate_db(config).await,
    }
}
