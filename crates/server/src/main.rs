//! mediagate server entry point.
//!
//! Boots the HTTP media cache: loads configuration, opens the metadata and
//! object stores, starts the expired-response sweeper and serves the router.
//! Logs are JSON on stderr.

use std::time::Duration;

use anyhow::{Context, Result};
use mediagate_core::{AppConfig, ResponseCache};
use tokio::time::MissedTickBehavior;
use tracing_subscriber::EnvFilter;

mod error;
mod handler;
mod routes;
#[cfg(test)]
mod testing;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .json()
        .init();

    let config = AppConfig::load().context("failed to load configuration")?;
    let state = handler::AppState::open(&config).await?;

    if let Some(period) = config.sweep_interval() {
        tokio::spawn(sweep_responses(state.responses.clone(), period));
    }

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;
    tracing::info!(addr = %listener.local_addr()?, "mediagate listening");

    axum::serve(listener, handler::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("mediagate stopped");
    Ok(())
}

/// Periodically delete expired response cache rows.
async fn sweep_responses(responses: ResponseCache, period: Duration) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The startup sweep already ran.
    interval.tick().await;

    loop {
        interval.tick().await;
        responses.sweep_expired().await;
    }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown requested");
}
