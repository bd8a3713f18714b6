//! Process entry point: loads configuration, constructs the embedded engine
//! and shared state, and serves [`dbgrid_server::app`]. Logging uses plain
//! `tracing`/`tracing-subscriber`: one `EnvFilter`-driven `fmt` subscriber
//! installed at startup, a ctrl-c triggered graceful shutdown.

use std::sync::Arc;

use clap::Parser;
use dbgrid_core::executor::datafusion_engine::DataFusionExecutor;
use dbgrid_server::{app, AppState, Cli};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    let executor = DataFusionExecutor::try_new()?;
    executor.run_init_sql(&cli.init_sql_path).await?;

    let hostname = whoami::fallible::hostname().unwrap_or_else(|_| whoami::devicename());

    let state = Arc::new(AppState {
        executor: Arc::new(executor),
        cache: cli.cache_config(),
        http_client: reqwest::Client::new(),
        hostname,
    });

    let listener = tokio::net::TcpListener::bind(cli.listen_endpoint_http).await?;
    tracing::info!(addr = %cli.listen_endpoint_http, "dbgrid-server listening");
    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received, draining in-flight requests");
}
