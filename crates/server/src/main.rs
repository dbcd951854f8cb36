mod bootstrap;
mod collaborators_http;
mod health;
mod routes;

use std::time::Duration;

use anyhow::Result;
use patter_core::config::{AppConfig, LoadOptions};

fn init_logging(config: &AppConfig) {
    use patter_core::config::LogFormat::*;
    use tracing::Level;

    let log_level = config.logging.level.parse::<Level>().unwrap_or(Level::INFO);

    match config.logging.format {
        Compact => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).compact().init();
        }
        Pretty => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).pretty().init();
        }
        Json => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).json().init();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    run().await
}

pub async fn run() -> Result<()> {
    // Load config and initialize logging before any other operations
    let config = AppConfig::load(LoadOptions::default())?;
    init_logging(&config);

    let app = bootstrap::bootstrap_with_config(config).await?;

    spawn_session_sweeper(&app);

    let router =
        routes::router(app.state.clone()).merge(health::router(app.db_pool.clone()));

    let address = format!("{}:{}", app.config.server.bind_address, app.config.server.port);
    let listener = tokio::net::TcpListener::bind(&address).await?;

    tracing::info!(
        event_name = "system.server.started",
        correlation_id = "bootstrap",
        session_id = "unknown",
        bind_address = %address,
        "patter-server started"
    );

    axum::serve(listener, router).with_graceful_shutdown(wait_for_shutdown()).await?;

    tracing::info!(
        event_name = "system.server.stopping",
        correlation_id = "shutdown",
        session_id = "unknown",
        "patter-server stopping"
    );

    Ok(())
}

/// Periodically closes sessions idle past their TTL; a closed session is
/// read-only history and the next turn for that identity starts fresh.
fn spawn_session_sweeper(app: &bootstrap::App) {
    let orchestrator = app.state.orchestrator.clone();

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(60));
        loop {
            interval.tick().await;
            match orchestrator.close_idle_sessions().await {
                Ok(0) => {}
                Ok(closed) => {
                    tracing::info!(
                        event_name = "system.session_sweep.closed",
                        correlation_id = "sweeper",
                        session_id = "unknown",
                        closed,
                        "closed idle sessions"
                    );
                }
                Err(error) => {
                    tracing::warn!(
                        event_name = "system.session_sweep.failed",
                        correlation_id = "sweeper",
                        session_id = "unknown",
                        error = %error,
                        "session sweep failed"
                    );
                }
            }
        }
    });
}

async fn wait_for_shutdown() {
    let _ = tokio::signal::ctrl_c().await;
}
