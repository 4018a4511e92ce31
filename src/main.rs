//! Items backend.
//!
//! # Architecture Overview
//!
//! ```text
//!     traced client (demo-frontend)
//!         │  traceparent
//!         ▼
//!  ┌──────────────────────────────────────────────────────────┐
//!  │  request id → CORS → timeout                             │
//!  │      → telemetry middleware (server span, log, metrics)  │
//!  │          → items handlers (operation span) → ItemStore   │
//!  └──────────────────────────────────────────────────────────┘
//!         │ spans (OTLP/HTTP)      │ metrics (push + /metrics)
//!         ▼                        ▼
//!    trace backend           metrics backend
//! ```

use std::path::PathBuf;

use clap::Parser;

use items_telemetry::config::load_config;
use items_telemetry::lifecycle::startup::run_backend;
use items_telemetry::observability::logging::init_logging;
use items_telemetry::observability::Telemetry;

#[derive(Parser)]
#[command(name = "demo-backend")]
#[command(about = "Instrumented items API", long_about = None)]
struct Cli {
    /// Optional TOML configuration file. Environment variables override it.
    #[arg(short, long, env = "CONFIG_FILE")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    // The tracer comes first so the logging layer can bridge into it.
    let telemetry = Telemetry::init(&config.telemetry)?;
    init_logging(&config.telemetry, Some(telemetry.sdk_tracer()));
    tracing::info!(
        service = %config.telemetry.service_name,
        version = %config.telemetry.service_version,
        bind_address = %config.listener.bind_address,
        "demo-backend starting"
    );

    run_backend(config, telemetry).await
}
