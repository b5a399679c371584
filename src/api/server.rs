use std::net::SocketAddr;

use axum::{Router, routing::get, routing::post};
use tokio::net::TcpListener;
use tower_http::decompression::RequestDecompressionLayer;
use tracing::{error, info};

use super::{
    services::{download, get_file, get_info, get_status, health, live},
    state::AppState,
};

type AnyError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// All public routes.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/download", post(download))
        .route("/get_info", post(get_info))
        .route("/live", post(live))
        .route("/status/{task_id}", get(get_status))
        .route("/files/{*path}", get(get_file))
        .route("/health", get(health))
        .with_state(state)
        // Automatically decompress gzip request bodies
        .layer(RequestDecompressionLayer::new())
}

/// Serve until Ctrl+C or SIGTERM.
pub async fn run(state: AppState, address: SocketAddr) -> Result<(), AnyError> {
    let app = router(state);

    let listener = TcpListener::bind(address).await?;
    info!(%address, "GrabBox API listening");

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
