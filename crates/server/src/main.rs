use std::path::PathBuf;

use anyhow::{anyhow, Context};
use clap::Parser;
use phonebook_server::{logging, migrate_database, router, ServiceConfig};
use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "phonebook-server")]
#[command(about = "Phonebook REST service", version)]
struct Cli {
    /// YAML config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Skip the database migration on startup
    #[arg(short, long)]
    skip_migration: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = ServiceConfig::load(cli.config.as_deref()).context("Unable to load configuration")?;
    config.validate().context("Invalid configuration")?;
    logging::init_logging(&config.loglevel, config.log_format)
        .map_err(|e| anyhow!("Unable to initialize logging: {e}"))?;

    match &cli.config {
        Some(path) => info!(path = %path.display(), "Parsed config"),
        None => info!("Config file is not specified"),
    }
    info!(db_url = %config.db.masked_url(), "Using database");

    let pool = PgPoolOptions::new()
        .max_connections(config.db.max_connections)
        .connect(&config.db.url)
        .await
        .context("Unable to connect to database")?;
    info!("Connected");

    let shutdown = CancellationToken::new();
    tokio::spawn(watch_ctrl_c(shutdown.clone()));

    if cli.skip_migration {
        info!("Skipping migration");
    } else {
        migrate_database(&pool, &config.migrations, shutdown.clone())
            .await
            .context("Unable to migrate")?;
    }

    let listener = tokio::net::TcpListener::bind(&config.listen)
        .await
        .with_context(|| format!("Unable to listen on {}", config.listen))?;
    info!(listen = %config.listen, "Starting HTTP server");

    axum::serve(listener, router(pool))
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
        .context("HTTP server failed")?;

    info!("Server stopped");
    Ok(())
}

async fn watch_ctrl_c(shutdown: CancellationToken) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Unable to listen for shutdown signal");
        return;
    }
    info!("Shutdown requested");
    shutdown.cancel();
}
