use causeway_gateway::config::{GatewayConfig, StartupError};
use causeway_gateway::http;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    if let Err(err) = run().await {
        eprintln!("STARTUP_ERROR {}", err);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), StartupError> {
    let config = GatewayConfig::load()?;
    let app = http::router(config.clone()).await?;

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .map_err(|err| StartupError {
            code: "ERR_BIND_FAILED",
            message: format!("cannot bind {}: {}", config.bind_addr, err),
        })?;

    tracing::info!(bind_addr = %config.bind_addr, "catalog gateway accepting requests");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|err| StartupError {
            code: "ERR_SERVER_FAILED",
            message: err.to_string(),
        })?;

    tracing::info!("catalog gateway stopped");
    Ok(())
}

/// Resolves when the process receives Ctrl-C. If the signal handler cannot
/// be installed the server simply runs until killed.
async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("shutdown signal received, draining connections"),
        Err(err) => {
            tracing::warn!(error = %err, "cannot listen for shutdown signal");
            std::future::pending::<()>().await;
        }
    }
}
