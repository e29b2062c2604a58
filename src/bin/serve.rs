use anyhow::{Context, Result};
use clap::Parser;
use sheetpoints::{api, config::Config, logging, sink::postgis::connect};
use std::{net::SocketAddr, path::PathBuf, sync::Arc};
use tokio::net::TcpListener;
use tracing::info;

/// Read-only HTTP API over the published feature table.
#[derive(Debug, Parser)]
#[command(name = "sheetpoints-serve", version)]
struct Cli {
    #[arg(long, env = "SHEETPOINTS_CONFIG")]
    config: Option<PathBuf>,
    /// Overrides API_PORT.
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // ─── 1) config & logging ─────────────────────────────────────────
    let cli = Cli::parse();
    let mut cfg = Config::load(cli.config.as_deref())?;
    logging::init(&cfg.logging);
    if let Some(p) = cli.port {
        cfg.api.port = p;
    }

    // ─── 2) database pool ────────────────────────────────────────────
    let pool = connect(&cfg.database).await?;
    let store = api::PgFeatureStore::new(pool, &cfg.api.table).await?;

    // ─── 3) serve ────────────────────────────────────────────────────
    let app = api::router(Arc::new(store), &cfg.api);
    let addr = SocketAddr::from(([0, 0, 0, 0], cfg.api.port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {}", addr))?;
    info!(%addr, table = %cfg.api.table, "listening");
    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}
