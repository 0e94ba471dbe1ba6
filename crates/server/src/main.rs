use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;
use wsjobd_core::{JobCatalog, SysinfoProbe};
use wsjobd_server::config::ServerConfig;
use wsjobd_server::demo_jobs;
use wsjobd_server::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServerConfig::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log.as_str().into()),
        )
        .init();

    let catalog = JobCatalog::new().with_module(demo_jobs::MODULE_PATH, demo_jobs::module());
    let state = AppState::new(catalog, Arc::new(SysinfoProbe::new()), config.dispatch_workers);

    let addr = config.socket_addr();
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("bind {addr}"))?;
    info!(%addr, dispatch_workers = state.pool.size(), "wsjobd listening");

    wsjobd_server::serve(listener, state)
        .await
        .context("wsjobd server")?;
    Ok(())
}
