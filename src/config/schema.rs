//! Configuration schema definitions.
//!
//! All types derive Serde traits for deserialization from config files.
//! Every section has defaults, so an empty file is a valid configuration.

use serde::{Deserialize, Serialize};

/// Root configuration for the items service.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Logging, tracing and metrics settings.
    pub telemetry: TelemetryConfig,

    /// Item store behaviour.
    pub items: ItemsConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:3000").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:3000".to_string(),
        }
    }
}

/// Timeout configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Total request timeout in seconds.
    pub request_secs: u64,

    /// Upper bound for each shutdown step (server drain, telemetry flush).
    pub shutdown_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            request_secs: 30,
            shutdown_secs: 5,
        }
    }
}

/// Log line encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// JSON in production, human-readable elsewhere.
    #[default]
    Auto,
    Json,
    Pretty,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "json" => Ok(Self::Json),
            "pretty" | "text" => Ok(Self::Pretty),
            other => Err(format!("unknown log format '{other}'")),
        }
    }
}

/// Telemetry configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Reported as `service.name` on spans and metric batches.
    pub service_name: String,

    pub service_version: String,

    /// Deployment environment; "production" switches logs to JSON.
    pub environment: String,

    /// Minimum severity: debug, info, warn, error or fatal.
    pub log_level: String,

    pub log_format: LogFormat,

    /// Export spans to the OTLP/HTTP collector.
    pub traces_enabled: bool,

    /// Collector base URL; spans are posted to `{otlp_endpoint}/v1/traces`.
    pub otlp_endpoint: String,

    /// Full OTLP/HTTP metrics URL, usually `{otlp_endpoint}/v1/metrics`.
    /// `None` disables the periodic push.
    pub metrics_endpoint: Option<String>,

    /// Seconds between metric flushes.
    pub metrics_interval_secs: u64,

    /// Serve `GET /metrics` for Prometheus scraping.
    pub prometheus_enabled: bool,

    /// Spans held for export before new ones are dropped.
    pub span_queue_capacity: usize,
    pub span_batch_size: usize,
    pub span_flush_interval_ms: u64,

    /// Per-request timeout for span and metric exports.
    pub export_timeout_secs: u64,
}

impl TelemetryConfig {
    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "demo-backend".to_string(),
            service_version: "1.0.0".to_string(),
            environment: "development".to_string(),
            log_level: "info".to_string(),
            log_format: LogFormat::Auto,
            traces_enabled: true,
            otlp_endpoint: "http://localhost:4318".to_string(),
            metrics_endpoint: Some("http://localhost:4318/v1/metrics".to_string()),
            metrics_interval_secs: 15,
            prometheus_enabled: true,
            span_queue_capacity: 2048,
            span_batch_size: 512,
            span_flush_interval_ms: 5000,
            export_timeout_secs: 10,
        }
    }
}

/// Item store configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ItemsConfig {
    /// Seed the store with three sample items.
    pub seed: bool,

    /// Sleep a random amount before each store operation.
    pub simulate_latency: bool,
}

impl Default for ItemsConfig {
    fn default() -> Self {
        Self {
            seed: true,
            simulate_latency: true,
        }
    }
}
