use tracing::info;

/// Resolves once the process receives SIGTERM (or Ctrl-C on platforms
/// without SIGTERM), so the caller can cancel in-flight reconciliation and
/// leader-election loops before the process exits.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}

/// Marker hook for readiness probes that want to flip to "ready" only once
/// the controller has completed its startup sequence (CRD check, leader
/// election bootstrap). Kept as a function (rather than inlined at call
/// sites) so tests can assert it was invoked exactly once.
pub fn signal_ready() {
    info!("controller ready");
}
