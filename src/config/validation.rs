//! Configuration validation.
//!
//! Serde handles syntax; this checks values. Every problem is reported,
//! not just the first.

use std::fmt;
use std::net::SocketAddr;

use url::Url;

use crate::config::schema::AppConfig;
use crate::observability::logging::Severity;

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

pub fn validate_config(config: &AppConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "listener.bind_address",
            format!("'{}' is not a socket address", config.listener.bind_address),
        ));
    }

    if config.timeouts.request_secs == 0 {
        errors.push(ValidationError::new("timeouts.request_secs", "must be greater than 0"));
    }
    if config.timeouts.shutdown_secs == 0 {
        errors.push(ValidationError::new("timeouts.shutdown_secs", "must be greater than 0"));
    }

    let telemetry = &config.telemetry;
    if telemetry.service_name.trim().is_empty() {
        errors.push(ValidationError::new("telemetry.service_name", "must not be empty"));
    }
    if telemetry.log_level.parse::<Severity>().is_err() {
        errors.push(ValidationError::new(
            "telemetry.log_level",
            format!("unknown level '{}'", telemetry.log_level),
        ));
    }
    if telemetry.traces_enabled {
        check_http_url(&mut errors, "telemetry.otlp_endpoint", &telemetry.otlp_endpoint);
    }
    if let Some(endpoint) = &telemetry.metrics_endpoint {
        check_http_url(&mut errors, "telemetry.metrics_endpoint", endpoint);
    }
    if telemetry.metrics_interval_secs == 0 {
        errors.push(ValidationError::new(
            "telemetry.metrics_interval_secs",
            "must be greater than 0",
        ));
    }
    if telemetry.span_queue_capacity == 0 {
        errors.push(ValidationError::new("telemetry.span_queue_capacity", "must be greater than 0"));
    }
    if telemetry.span_batch_size == 0 || telemetry.span_batch_size > telemetry.span_queue_capacity {
        errors.push(ValidationError::new(
            "telemetry.span_batch_size",
            "must be between 1 and span_queue_capacity",
        ));
    }
    if telemetry.span_flush_interval_ms == 0 {
        errors.push(ValidationError::new(
            "telemetry.span_flush_interval_ms",
            "must be greater than 0",
        ));
    }
    if telemetry.export_timeout_secs == 0 {
        errors.push(ValidationError::new("telemetry.export_timeout_secs", "must be greater than 0"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_http_url(errors: &mut Vec<ValidationError>, field: &'static str, value: &str) {
    match Url::parse(value) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => {}
        Ok(url) => errors.push(ValidationError::new(
            field,
            format!("unsupported scheme '{}'", url.scheme()),
        )),
        Err(e) => errors.push(ValidationError::new(field, format!("invalid URL: {e}"))),
    }
}
