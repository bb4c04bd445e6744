//! Graceful shutdown signal. This gateway binds a single port, so no
//! multi-process port arbitration is needed — just SIGTERM/SIGINT
//! detection for the worker pool and HTTP intake to drain against.

use tracing::info;

/// Resolves when SIGTERM or SIGINT (Ctrl+C) is received. Callers race
/// this against `axum::serve(...)` so the worker pool and HTTP intake
/// can drain in-flight work before the process exits (§5 Cancellation).
pub async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate()).expect("failed to register SIGTERM handler");
        let mut sigint = signal(SignalKind::interrupt()).expect("failed to register SIGINT handler");

        tokio::select! {
            _ = sigterm.recv() => info!("received SIGTERM"),
            _ = sigint.recv() => info!("received SIGINT (Ctrl+C)"),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.expect("failed to listen for Ctrl+C");
        info!("received Ctrl+C");
    }
}
