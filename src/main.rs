use anyhow::Context;
use clap::Parser;
use std::{net::SocketAddr, sync::Arc};
use tracing_subscriber::EnvFilter;

use tenant_gate::database::{MemoryBackend, PgBackend, TenantBackend};
use tenant_gate::{app, config};

#[derive(Parser)]
#[command(name = "tenant-gate")]
#[command(about = "Tenant-scoped record API")]
#[command(version)]
struct Cli {
    #[arg(long, help = "Port to listen on (overrides API_PORT)")]
    port: Option<u16>,

    #[arg(long, default_value = "0.0.0.0", help = "Address to bind")]
    bind: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present so cargo run picks up DATABASE_URL, SECURITY_JWT_SECRET, etc.
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = config::config();
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("invalid configuration: {}", e))?;
    tracing::info!("Starting tenant-gate in {:?} mode", config.environment);

    let backend: Arc<dyn TenantBackend> = match config.database.url {
        Some(_) => {
            let pg = PgBackend::connect(&config.database)
                .await
                .context("failed to connect to database")?;
            pg.ensure_schema().await.context("failed to prepare schema")?;
            Arc::new(pg)
        }
        None => {
            tracing::warn!("DATABASE_URL not set; records are kept in memory and lost on exit");
            Arc::new(MemoryBackend::new())
        }
    };

    let router = app::build(config, backend)?;

    let port = cli.port.unwrap_or(config.api.port);
    let addr: SocketAddr = format!("{}:{}", cli.bind, port)
        .parse()
        .with_context(|| format!("invalid bind address {}:{}", cli.bind, port))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;

    tracing::info!("tenant-gate listening on http://{}", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    tracing::info!("tenant-gate stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}
