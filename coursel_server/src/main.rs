//! Coursel server - main entry point.
//!
//! Initializes configuration, tracing, application state, and runs the Axum
//! server with graceful dispatcher shutdown.

use anyhow::Result;
use coursel_server::{AppConfig, AppState, get_router};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
  let (config, internal) = AppConfig::load()?;

  tracing_subscriber::registry()
    .with(tracing_subscriber::fmt::layer())
    .with(tracing_subscriber::EnvFilter::new(
      &config.observability.log_level,
    ))
    .init();

  let state = AppState::try_new(config.clone(), internal).await?;
  let app = get_router(state.clone()).await?;

  let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
  info!("Server listening on {}", addr);

  let listener = TcpListener::bind(addr).await?;
  axum::serve(listener, app.into_make_service())
    .with_graceful_shutdown(shutdown_signal())
    .await?;

  info!("HTTP server stopped, draining dispatcher");
  state.dispatcher.shutdown().await;

  Ok(())
}

async fn shutdown_signal() {
  if let Err(e) = tokio::signal::ctrl_c().await {
    tracing::error!("failed to listen for shutdown signal: {e}");
  }
}
