//! Startup orchestration.
//!
//! Order: listener, signal handler, server. On the way out the
//! server drains first, then telemetry flushes what the drain produced.

use std::time::Duration;

use tokio::net::TcpListener;

use crate::config::AppConfig;
use crate::http::HttpServer;
use crate::lifecycle::{signals, Shutdown};
use crate::observability::Telemetry;

/// Run the backend until a termination signal arrives.
///
/// Telemetry and logging must already be initialized.
pub async fn run_backend(
    config: AppConfig,
    telemetry: Telemetry,
) -> Result<(), Box<dyn std::error::Error>> {
    telemetry.log_summary(&config.telemetry);

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(
        address = %listener.local_addr()?,
        request_timeout_secs = config.timeouts.request_secs,
        "Listening for connections"
    );

    let shutdown = Shutdown::new();
    signals::spawn_signal_handler(shutdown.clone());

    let shutdown_timeout = Duration::from_secs(config.timeouts.shutdown_secs);
    let server = HttpServer::new(config, telemetry.tracer(), telemetry.prometheus());
    let served = server.run(listener, shutdown).await;

    telemetry.shutdown(shutdown_timeout).await;
    served?;

    tracing::info!("Shutdown complete");
    Ok(())
}
