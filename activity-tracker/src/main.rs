use std::net::SocketAddr;

use activity_tracker::app_state::AppState;
use activity_tracker::config::TrackerConfig;
use activity_tracker::{handlers, shutdown};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = TrackerConfig::from_env()?;
    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    let prewarm_cron_enabled = config.prewarm_cron_enabled;

    let (state, prewarmer_shutdown_rx) = AppState::bootstrap(config).await?;

    if prewarm_cron_enabled {
        state.prewarmer.spawn_schedule(prewarmer_shutdown_rx);
    }

    let app = handlers::router(state.clone());
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "activity tracker listening");

    let (server_shutdown_tx, server_shutdown_rx) = oneshot::channel();

    let shutdown_state = state.clone();
    let shutdown_task = tokio::spawn(async move {
        shutdown::wait_for_signal().await;
        info!("shutdown signal received");
        shutdown::run(shutdown_state, server_shutdown_tx).await;
    });

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = server_shutdown_rx.await;
        })
        .await?;

    let _ = shutdown_task.await;

    Ok(())
}
