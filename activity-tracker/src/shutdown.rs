use std::time::Duration;

use tokio::sync::oneshot;
use tracing::{error, info, warn};

use crate::app_state::AppState;

const HARD_DEADLINE: Duration = Duration::from_secs(10);

/// Drives the seven-step graceful shutdown state machine: stop accepting
/// requests, stop the pre-warmer timer, close the live subscriber server,
/// stop the HTTP listener, stop the ingestion timer and flush once, close
/// KV/DB connections, exit. A hard deadline forces exit if any step stalls.
pub async fn run(state: AppState, server_shutdown_tx: oneshot::Sender<()>) {
    let sequence = async {
        info!("shutdown: step 1/7 - no longer accepting new requests");

        info!("shutdown: step 2/7 - stopping pre-warmer timer");
        state.prewarmer.shutdown().await;

        info!("shutdown: step 3/7 - closing live subscriber server (signalled via HTTP listener stop)");

        info!("shutdown: step 4/7 - stopping HTTP listener");
        if server_shutdown_tx.send(()).is_err() {
            warn!("HTTP listener already stopped");
        }

        info!("shutdown: step 5/7 - stopping ingestion timer and flushing once");
        state.ingestion.shutdown().await;

        info!("shutdown: step 6/7 - closing KV and DB connections");
        state.store.close().await;

        info!("shutdown: step 7/7 - exiting");
    };

    if tokio::time::timeout(HARD_DEADLINE, sequence).await.is_err() {
        error!("graceful shutdown exceeded hard deadline, forcing exit");
        std::process::exit(1);
    }
}

/// Waits for either a Ctrl-C or a platform terminate signal.
pub async fn wait_for_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
